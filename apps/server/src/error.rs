use axum::http::StatusCode;
use axum::Json;

use crate::models::ApiResponse;

/// Domain error taxonomy. Conflict and policy variants surface to callers as
/// actionable, typed results; only `Db` maps to a 500.
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    /// Date/time is blocked by an admin override.
    #[error("this time is blocked")]
    SlotBlocked,

    /// Another active reservation already holds the slot.
    #[error("this time was just taken, please choose another")]
    SlotConflict,

    /// Slot starts too soon for self-service booking.
    #[error("this time can only be booked by phone")]
    MustCallWindow,

    /// Webhook signature or callback token failed verification.
    #[error("callback authentication failed")]
    StaleCallbackAuth,

    /// Callback references nothing local. Acknowledged, not errored.
    #[error("unknown reference")]
    UnknownReference,

    /// Target reservation is already in a terminal state; the requested
    /// transition is an idempotent no-op.
    #[error("reservation is already settled")]
    AlreadyTerminal,

    #[error("reservation not found")]
    NotFound,

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("insufficient lesson credits")]
    InsufficientCredits,

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl DomainError {
    /// Machine-readable code the UI branches on.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::SlotBlocked => "slot_blocked",
            DomainError::SlotConflict => "slot_conflict",
            DomainError::MustCallWindow => "must_call_window",
            DomainError::StaleCallbackAuth => "stale_callback_auth",
            DomainError::UnknownReference => "unknown_reference",
            DomainError::AlreadyTerminal => "already_terminal",
            DomainError::NotFound => "not_found",
            DomainError::Invalid(_) => "invalid",
            DomainError::InsufficientCredits => "insufficient_credits",
            DomainError::Db(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            DomainError::SlotBlocked | DomainError::MustCallWindow => StatusCode::UNPROCESSABLE_ENTITY,
            DomainError::SlotConflict | DomainError::AlreadyTerminal => StatusCode::CONFLICT,
            DomainError::StaleCallbackAuth => StatusCode::UNAUTHORIZED,
            DomainError::UnknownReference | DomainError::NotFound => StatusCode::NOT_FOUND,
            DomainError::Invalid(_) => StatusCode::BAD_REQUEST,
            DomainError::InsufficientCredits => StatusCode::PAYMENT_REQUIRED,
            DomainError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Shape a domain error the way handlers answer: typed code + message.
    pub fn into_response_parts(self) -> (StatusCode, Json<ApiResponse<()>>) {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("internal error: {}", self);
            return (status, Json(ApiResponse::error("Internal error")));
        }
        (
            status,
            Json(ApiResponse::error_with_code(self.to_string(), self.code())),
        )
    }
}
