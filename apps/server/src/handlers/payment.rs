use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;

use crate::{
    error::DomainError,
    models::*,
    payments::reconcile::{self, RejectReason, WebhookOutcome},
    AppState,
};

use super::client::{check_ownership, optional_customer};

/// Signature header the provider sends with every callback.
const SIGNATURE_HEADER: &str = "x-provider-signature";

type ApiError = (StatusCode, Json<ApiResponse<()>>);

/// POST /api/payments/checkout — open (or reuse) a provider order for a
/// reservation and hand back the payment URL.
pub async fn checkout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CheckoutRequest>,
) -> Result<Json<ApiResponse<CheckoutResponse>>, ApiError> {
    let caller = optional_customer(&headers, &state)?;
    let reservation = crate::reservations::get(&state.db, body.reservation_id)
        .await
        .map_err(DomainError::into_response_parts)?;
    check_ownership(&reservation, caller)?;

    let (order, payment_url) = reconcile::open_or_get_order(
        &state.db,
        state.clock.as_ref(),
        state.provider.as_ref(),
        body.reservation_id,
    )
    .await
    .map_err(DomainError::into_response_parts)?;

    Ok(Json(ApiResponse::success(CheckoutResponse {
        order_id: order.id,
        provider_order_id: order.provider_order_id,
        merchant_reference: order.merchant_reference,
        amount: order.amount,
        payment_url,
    })))
}

/// POST /api/payments/webhook?token=… — provider callback endpoint.
///
/// Returns a bare status: 200 for everything verified or ignorable, 401/400
/// for requests that can never succeed, so the provider stops retrying them.
/// Internal state is never echoed.
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WebhookQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome = reconcile::handle_provider_callback(
        &state.db,
        state.clock.as_ref(),
        &state.webhook_secret,
        signature,
        &body,
        query.token.as_deref(),
    )
    .await;

    match outcome {
        Ok(WebhookOutcome::Applied { .. }) | Ok(WebhookOutcome::Acknowledged(_)) => StatusCode::OK,
        Ok(WebhookOutcome::Rejected(RejectReason::MalformedBody)) => StatusCode::BAD_REQUEST,
        // Signature/token failures share the taxonomy's auth status
        Ok(WebhookOutcome::Rejected(_)) => DomainError::StaleCallbackAuth.status_code(),
        Err(e) => {
            tracing::error!("webhook processing failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
