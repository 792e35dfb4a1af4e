use async_trait::async_trait;

use crate::models::Reservation;

/// Invoicing/notification collaborator. Fire-and-forget: confirmation never
/// waits on or fails with this.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn reservation_confirmed(&self, reservation: &Reservation, invoice_reference: &str);
    async fn reservation_cancelled(&self, reservation: &Reservation, reason: &str);
}

/// Posts confirmation events to the school's back-office webhook. An empty
/// URL disables delivery.
pub struct HttpNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl HttpNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url,
        }
    }

    async fn post(&self, event: &str, payload: serde_json::Value) {
        if self.webhook_url.is_empty() {
            return;
        }
        let body = serde_json::json!({ "event": event, "payload": payload });
        if let Err(e) = self.client.post(&self.webhook_url).json(&body).send().await {
            tracing::error!("notification delivery failed: {}", e);
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn reservation_confirmed(&self, reservation: &Reservation, invoice_reference: &str) {
        self.post(
            "reservation.confirmed",
            serde_json::json!({
                "reservation_id": reservation.id,
                "date": reservation.date,
                "start_time": reservation.start_time,
                "payment_method": reservation.payment_method,
                "invoice_reference": invoice_reference,
            }),
        )
        .await;
    }

    async fn reservation_cancelled(&self, reservation: &Reservation, reason: &str) {
        self.post(
            "reservation.cancelled",
            serde_json::json!({
                "reservation_id": reservation.id,
                "date": reservation.date,
                "start_time": reservation.start_time,
                "reason": reason,
            }),
        )
        .await;
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Records every event so tests can assert side effects fire at most once.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub confirmed: Mutex<Vec<i64>>,
        pub cancelled: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn reservation_confirmed(&self, reservation: &Reservation, _invoice: &str) {
            self.confirmed.lock().unwrap().push(reservation.id);
        }

        async fn reservation_cancelled(&self, reservation: &Reservation, _reason: &str) {
            self.cancelled.lock().unwrap().push(reservation.id);
        }
    }
}
