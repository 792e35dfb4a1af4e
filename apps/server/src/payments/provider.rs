use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::DomainError;

type HmacSha256 = Hmac<Sha256>;

/// Order state as reported by the payment provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderOrderStatus {
    Pending,
    Paid,
    Cancelled,
    Failed,
}

impl ProviderOrderStatus {
    pub fn from_provider(s: &str) -> Self {
        match s {
            "paid" => ProviderOrderStatus::Paid,
            "cancelled" => ProviderOrderStatus::Cancelled,
            "failed" => ProviderOrderStatus::Failed,
            _ => ProviderOrderStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProviderOrderStatus::Pending)
    }
}

#[derive(Debug, Clone)]
pub struct ProviderOrder {
    pub provider_order_id: String,
    pub status: ProviderOrderStatus,
    pub payment_url: Option<String>,
}

/// Narrow client onto the external payment provider. The core never sees
/// provider internals beyond these three calls.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_order(
        &self,
        merchant_reference: &str,
        amount: i64,
        description: &str,
    ) -> Result<ProviderOrder, DomainError>;

    async fn get_order(&self, provider_order_id: &str) -> Result<ProviderOrder, DomainError>;
}

/// Verify a webhook signature header against the raw body using the
/// provider's shared secret. `Mac::verify_slice` compares in constant time.
pub fn verify_signature(secret: &str, raw_body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(raw_body);
    mac.verify_slice(&expected).is_ok()
}

/// Compute an HMAC signature over a raw body. Outbound provider requests are
/// signed with it; webhook tests use it to forge valid callbacks.
pub fn sign_body(secret: &str, raw_body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(raw_body);
    hex::encode(mac.finalize().into_bytes())
}

/// HTTP implementation against the provider's REST API.
pub struct HttpPaymentProvider {
    client: reqwest::Client,
    api_base: String,
    merchant_id: String,
    api_key: String,
    return_url: String,
}

impl HttpPaymentProvider {
    pub fn new(api_base: String, merchant_id: String, api_key: String, return_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base,
            merchant_id,
            api_key,
            return_url,
        }
    }

    fn parse_order(json: &serde_json::Value) -> Result<ProviderOrder, DomainError> {
        let id = json["id"]
            .as_str()
            .ok_or_else(|| DomainError::Invalid("provider response missing order id".into()))?;
        let status = json["status"].as_str().unwrap_or("pending");
        Ok(ProviderOrder {
            provider_order_id: id.to_string(),
            status: ProviderOrderStatus::from_provider(status),
            payment_url: json["payment_url"].as_str().map(str::to_string),
        })
    }
}

#[async_trait]
impl PaymentProvider for HttpPaymentProvider {
    async fn create_order(
        &self,
        merchant_reference: &str,
        amount: i64,
        description: &str,
    ) -> Result<ProviderOrder, DomainError> {
        let body = serde_json::json!({
            "amount": { "value": format!("{}.00", amount), "currency": "SEK" },
            "merchant_reference": merchant_reference,
            "description": description,
            "return_url": self.return_url,
        });
        let raw = serde_json::to_vec(&body)
            .map_err(|e| DomainError::Invalid(format!("provider payload: {}", e)))?;

        let resp = self
            .client
            .post(format!("{}/v1/orders", self.api_base))
            .basic_auth(&self.merchant_id, Some(&self.api_key))
            .header("Idempotence-Key", merchant_reference)
            .header("Content-Type", "application/json")
            .header("X-Request-Signature", sign_body(&self.api_key, &raw))
            .body(raw)
            .send()
            .await
            .map_err(|e| DomainError::Invalid(format!("provider unreachable: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            tracing::error!("provider order creation failed: {} - {}", status, text);
            return Err(DomainError::Invalid(format!("provider error: {}", status)));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| DomainError::Invalid(format!("provider response: {}", e)))?;
        let order = Self::parse_order(&json)?;
        tracing::info!(
            "provider order created: {} for {}",
            order.provider_order_id,
            merchant_reference
        );
        Ok(order)
    }

    async fn get_order(&self, provider_order_id: &str) -> Result<ProviderOrder, DomainError> {
        let resp = self
            .client
            .get(format!("{}/v1/orders/{}", self.api_base, provider_order_id))
            .basic_auth(&self.merchant_id, Some(&self.api_key))
            .send()
            .await
            .map_err(|e| DomainError::Invalid(format!("provider unreachable: {}", e)))?;

        if !resp.status().is_success() {
            return Err(DomainError::Invalid(format!(
                "provider error: {}",
                resp.status()
            )));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| DomainError::Invalid(format!("provider response: {}", e)))?;
        Self::parse_order(&json)
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Provider double: serves scripted orders and records every call.
    pub struct FakeProvider {
        pub created: Mutex<Vec<String>>,
        pub polled: Mutex<Vec<String>>,
        pub poll_status: Mutex<ProviderOrderStatus>,
        counter: Mutex<u64>,
    }

    impl Default for FakeProvider {
        fn default() -> Self {
            Self {
                created: Mutex::new(Vec::new()),
                polled: Mutex::new(Vec::new()),
                poll_status: Mutex::new(ProviderOrderStatus::Pending),
                counter: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl PaymentProvider for FakeProvider {
        async fn create_order(
            &self,
            merchant_reference: &str,
            _amount: i64,
            _description: &str,
        ) -> Result<ProviderOrder, DomainError> {
            self.created.lock().unwrap().push(merchant_reference.to_string());
            let mut n = self.counter.lock().unwrap();
            *n += 1;
            Ok(ProviderOrder {
                provider_order_id: format!("prov-{}", n),
                status: ProviderOrderStatus::Pending,
                payment_url: Some(format!("https://pay.example/o/prov-{}", n)),
            })
        }

        async fn get_order(&self, provider_order_id: &str) -> Result<ProviderOrder, DomainError> {
            self.polled.lock().unwrap().push(provider_order_id.to_string());
            Ok(ProviderOrder {
                provider_order_id: provider_order_id.to_string(),
                status: *self.poll_status.lock().unwrap(),
                payment_url: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_roundtrip() {
        let body = br#"{"status":"paid"}"#;
        let sig = sign_body("secret", body);
        assert!(verify_signature("secret", body, &sig));
    }

    #[test]
    fn test_signature_wrong_secret() {
        let body = br#"{"status":"paid"}"#;
        let sig = sign_body("secret", body);
        assert!(!verify_signature("other", body, &sig));
    }

    #[test]
    fn test_signature_tampered_body() {
        let sig = sign_body("secret", br#"{"status":"paid"}"#);
        assert!(!verify_signature("secret", br#"{"status":"PAID"}"#, &sig));
    }

    #[test]
    fn test_signature_not_hex() {
        assert!(!verify_signature("secret", b"body", "zz-not-hex"));
    }

    #[test]
    fn test_provider_status_parsing() {
        assert_eq!(
            ProviderOrderStatus::from_provider("paid"),
            ProviderOrderStatus::Paid
        );
        assert_eq!(
            ProviderOrderStatus::from_provider("anything-else"),
            ProviderOrderStatus::Pending
        );
        assert!(ProviderOrderStatus::Paid.is_terminal());
        assert!(!ProviderOrderStatus::Pending.is_terminal());
    }
}
