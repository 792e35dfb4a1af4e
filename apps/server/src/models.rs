use serde::{Deserialize, Serialize};

// ── Database models ──

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SlotTemplate {
    pub id: i64,
    pub weekday: i64,
    pub start_time: String,
    pub end_time: String,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DateOverride {
    pub id: i64,
    pub date: String,
    pub kind: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub reserved_for_customer_id: Option<i64>,
    pub reason: Option<String>,
}

impl DateOverride {
    pub const FULL_DAY_BLOCK: &'static str = "full_day_block";
    pub const RANGE_BLOCK: &'static str = "range_block";
    pub const EXTRA_SLOT: &'static str = "extra_slot";
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Reservation {
    pub id: i64,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub duration_minutes: i64,
    pub status: String,
    pub payment_status: String,
    pub payment_method: Option<String>,
    pub customer_id: Option<i64>,
    pub guest_name: Option<String>,
    pub guest_phone: Option<String>,
    pub guest_email: Option<String>,
    pub total_price: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PaymentOrder {
    pub id: i64,
    pub reservation_id: i64,
    pub provider_order_id: String,
    pub merchant_reference: String,
    pub amount: i64,
    pub status: String,
    pub callback_token: String,
    pub callback_token_expires_at: String,
    pub created_at: String,
}

// ── Status vocabularies ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationStatus {
    Temporary,
    Confirmed,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Temporary => "temporary",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Unset,
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unset => "unset",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        }
    }
}

/// Closed set of accepted payment methods with their confirmation outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Swish,
    Card,
    PayAtLocation,
    Credits,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Swish => "swish",
            PaymentMethod::Card => "card",
            PaymentMethod::PayAtLocation => "pay_at_location",
            PaymentMethod::Credits => "credits",
        }
    }

    /// Payment status a reservation ends in when confirmed with this method.
    /// Swish and pay-at-location await later verification; credits are
    /// debited up front; card settles immediately.
    pub fn confirmed_payment_status(&self) -> PaymentStatus {
        match self {
            PaymentMethod::Swish | PaymentMethod::PayAtLocation => PaymentStatus::Pending,
            PaymentMethod::Credits | PaymentMethod::Card => PaymentStatus::Paid,
        }
    }
}

/// Payment order statuses. `open` is the only non-terminal state.
pub mod order_status {
    pub const OPEN: &str = "open";
    pub const PAID: &str = "paid";
    pub const FAILED: &str = "failed";
    pub const EXPIRED: &str = "expired";
}

// ── Availability views ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Available,
    MustCall,
    Held,
    HeldStale,
    Booked,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotView {
    pub time: String,
    pub end_time: String,
    pub status: SlotStatus,
    pub clickable: bool,
    pub status_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_phone: Option<String>,
}

// ── API request/response types ──

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    /// Comma-separated list of `YYYY-MM-DD` dates.
    pub dates: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateHoldRequest {
    pub date: String,
    pub start_time: String,
    pub duration_minutes: i64,
    pub guest_name: Option<String>,
    pub guest_phone: Option<String>,
    pub guest_email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub reservation: Reservation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub reservation_id: i64,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub order_id: i64,
    pub provider_order_id: String,
    pub merchant_reference: String,
    pub amount: i64,
    pub payment_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReservationStatusResponse {
    pub status: String,
    pub payment_status: String,
}

#[derive(Debug, Deserialize)]
pub struct WebhookQuery {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTemplateRequest {
    pub weekday: i64,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTemplateRequest {
    pub weekday: Option<i64>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CreateOverrideRequest {
    pub date: String,
    pub kind: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub reserved_for_customer_id: Option<i64>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReservationsQuery {
    pub date: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SweepReport {
    pub holds_expired: u64,
    pub orders_expired: u64,
    pub cancelled_purged: u64,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
            code: None,
        }
    }

    pub fn error_with_code(msg: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
            code: Some(code.into()),
        }
    }
}

// ── Identity ──

/// Caller resolved by the identity collaborator. Guests carry no identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CustomerIdentity {
    pub customer_id: i64,
}
