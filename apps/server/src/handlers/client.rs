use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    Json,
};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{
    auth,
    error::DomainError,
    models::*,
    reservations::{self, HolderRef},
    sweep, AppState,
};

type ApiError = (StatusCode, Json<ApiResponse<()>>);

// ── Auth helpers ──

/// Resolve the caller's identity if an Authorization header is present.
/// Anonymous access is fine for reads; a bad token is still rejected.
/// Shared with payment.rs.
pub(crate) fn optional_customer(
    headers: &axum::http::HeaderMap,
    state: &AppState,
) -> Result<Option<CustomerIdentity>, ApiError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let raw = value.to_str().map_err(|_| unauthorized())?;
    let now_unix = state.clock.now().timestamp();
    auth::extract_customer_from_header(raw, &state.identity_secret, now_unix)
        .map(Some)
        .ok_or_else(unauthorized)
}

fn require_customer(
    headers: &axum::http::HeaderMap,
    state: &AppState,
) -> Result<CustomerIdentity, ApiError> {
    optional_customer(headers, state)?.ok_or_else(unauthorized)
}

fn unauthorized() -> ApiError {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiResponse::error("Invalid or missing customer token")),
    )
}

/// Reservations owned by a customer may only be touched by that customer.
/// Guest reservations are addressed by id alone.
pub(crate) fn check_ownership(
    reservation: &Reservation,
    caller: Option<CustomerIdentity>,
) -> Result<(), ApiError> {
    match reservation.customer_id {
        Some(owner) if caller.map(|c| c.customer_id) != Some(owner) => Err((
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("Reservation not found")),
        )),
        _ => Ok(()),
    }
}

// ── Endpoints ──

/// GET /api/availability?dates=d1,d2 — per-date ordered slot views.
pub async fn availability(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<ApiResponse<BTreeMap<String, Vec<SlotView>>>>, ApiError> {
    let caller = optional_customer(&headers, &state)?;

    let dates: Vec<String> = query
        .dates
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .take(31)
        .map(str::to_string)
        .collect();
    if dates.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("No dates requested")),
        ));
    }

    // Opportunistic cleanup so freshly-expired holds reopen right away
    sweep::run(&state.db, state.clock.as_ref()).await;

    let result = crate::availability::compute_availability(
        &state.db,
        state.clock.as_ref(),
        &dates,
        caller,
        &state.booking_phone,
    )
    .await;

    Ok(Json(ApiResponse::success(result)))
}

/// POST /api/reservations — create a temporary hold.
pub async fn create_hold(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Json(body): Json<CreateHoldRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Reservation>>), ApiError> {
    let caller = optional_customer(&headers, &state)?;

    if caller.is_none() && (body.guest_name.is_none() || body.guest_phone.is_none()) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(
                "Guest bookings need a name and phone number",
            )),
        ));
    }

    let holder = HolderRef {
        customer: caller,
        guest_name: body.guest_name,
        guest_phone: body.guest_phone,
        guest_email: body.guest_email,
    };

    let reservation = reservations::create_hold(
        &state.db,
        state.clock.as_ref(),
        &body.date,
        &body.start_time,
        body.duration_minutes,
        holder,
    )
    .await
    .map_err(DomainError::into_response_parts)?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(reservation))))
}

/// POST /api/reservations/{id}/confirm — confirm a hold into a booking.
pub async fn confirm(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<ConfirmRequest>,
) -> Result<Json<ApiResponse<ConfirmResponse>>, ApiError> {
    let caller = optional_customer(&headers, &state)?;
    let reservation = reservations::get(&state.db, id)
        .await
        .map_err(DomainError::into_response_parts)?;
    check_ownership(&reservation, caller)?;

    let (reservation, invoice_reference) = reservations::confirm(
        &state.db,
        state.clock.as_ref(),
        state.credits.as_ref(),
        state.notifier.as_ref(),
        id,
        body.payment_method,
    )
    .await
    .map_err(DomainError::into_response_parts)?;

    Ok(Json(ApiResponse::success(ConfirmResponse {
        reservation,
        invoice_reference,
    })))
}

/// DELETE /api/reservations/{id} — cancel a hold or booking.
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let caller = optional_customer(&headers, &state)?;
    let reservation = reservations::get(&state.db, id)
        .await
        .map_err(DomainError::into_response_parts)?;
    check_ownership(&reservation, caller)?;

    reservations::cancel(
        &state.db,
        state.clock.as_ref(),
        state.notifier.as_ref(),
        id,
        "customer request",
    )
    .await
    .map_err(DomainError::into_response_parts)?;

    Ok(Json(ApiResponse::success(())))
}

/// GET /api/reservations/{id}/status — poll booking/payment status.
pub async fn reservation_status(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<ReservationStatusResponse>>, ApiError> {
    let caller = optional_customer(&headers, &state)?;
    let reservation = reservations::get(&state.db, id)
        .await
        .map_err(DomainError::into_response_parts)?;
    check_ownership(&reservation, caller)?;

    Ok(Json(ApiResponse::success(ReservationStatusResponse {
        status: reservation.status,
        payment_status: reservation.payment_status,
    })))
}

/// GET /api/reservations/my — the caller's upcoming reservations.
pub async fn my_reservations(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
) -> Result<Json<ApiResponse<Vec<Reservation>>>, ApiError> {
    let customer = require_customer(&headers, &state)?;
    let today = state.clock.now().format("%Y-%m-%d").to_string();

    let list = sqlx::query_as::<_, Reservation>(
        "SELECT * FROM reservations
         WHERE customer_id = ? AND status IN ('temporary', 'confirmed') AND date >= ?
         ORDER BY date ASC, start_time ASC",
    )
    .bind(customer.customer_id)
    .bind(&today)
    .fetch_all(&state.db)
    .await
    .map_err(|e| DomainError::from(e).into_response_parts())?;

    Ok(Json(ApiResponse::success(list)))
}
