use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;

use crate::{auth, error::DomainError, models::*, reservations, sweep, AppState};

type ApiError = (StatusCode, Json<ApiResponse<()>>);

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Every admin endpoint starts here: the admin token header must match.
fn require_admin(headers: &HeaderMap, state: &AppState) -> Result<(), ApiError> {
    let presented = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !auth::is_admin_token(presented, &state.admin_token) {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ApiResponse::error("Admin access denied")),
        ));
    }
    Ok(())
}

fn db_error(e: sqlx::Error) -> ApiError {
    DomainError::from(e).into_response_parts()
}

// ── Slot templates ──

/// GET /api/admin/templates — all templates, active or not.
pub async fn list_templates(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<SlotTemplate>>>, ApiError> {
    require_admin(&headers, &state)?;

    let templates = sqlx::query_as::<_, SlotTemplate>(
        "SELECT id, weekday, start_time, end_time, active
         FROM slot_templates ORDER BY weekday ASC, start_time ASC",
    )
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    Ok(Json(ApiResponse::success(templates)))
}

/// POST /api/admin/templates — add a weekly slot.
pub async fn create_template(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateTemplateRequest>,
) -> Result<Json<ApiResponse<SlotTemplate>>, ApiError> {
    require_admin(&headers, &state)?;

    if !(0..=6).contains(&body.weekday) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Weekday must be 0 (Monday) to 6 (Sunday)")),
        ));
    }
    if body.start_time >= body.end_time {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Start time must precede end time")),
        ));
    }

    let id = sqlx::query(
        "INSERT INTO slot_templates (weekday, start_time, end_time, active)
         VALUES (?, ?, ?, 1)",
    )
    .bind(body.weekday)
    .bind(&body.start_time)
    .bind(&body.end_time)
    .execute(&state.db)
    .await
    .map_err(db_error)?
    .last_insert_rowid();

    let template = sqlx::query_as::<_, SlotTemplate>(
        "SELECT id, weekday, start_time, end_time, active FROM slot_templates WHERE id = ?",
    )
    .bind(id)
    .fetch_one(&state.db)
    .await
    .map_err(db_error)?;

    Ok(Json(ApiResponse::success(template)))
}

/// PUT /api/admin/templates/{id} — partial update.
pub async fn update_template(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<UpdateTemplateRequest>,
) -> Result<Json<ApiResponse<SlotTemplate>>, ApiError> {
    require_admin(&headers, &state)?;

    let existing = sqlx::query_as::<_, SlotTemplate>(
        "SELECT id, weekday, start_time, end_time, active FROM slot_templates WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&state.db)
    .await
    .map_err(db_error)?
    .ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("Template not found")),
        )
    })?;

    sqlx::query(
        "UPDATE slot_templates SET weekday = ?, start_time = ?, end_time = ?, active = ?
         WHERE id = ?",
    )
    .bind(body.weekday.unwrap_or(existing.weekday))
    .bind(body.start_time.as_deref().unwrap_or(&existing.start_time))
    .bind(body.end_time.as_deref().unwrap_or(&existing.end_time))
    .bind(body.active.unwrap_or(existing.active))
    .bind(id)
    .execute(&state.db)
    .await
    .map_err(db_error)?;

    let updated = sqlx::query_as::<_, SlotTemplate>(
        "SELECT id, weekday, start_time, end_time, active FROM slot_templates WHERE id = ?",
    )
    .bind(id)
    .fetch_one(&state.db)
    .await
    .map_err(db_error)?;

    Ok(Json(ApiResponse::success(updated)))
}

/// DELETE /api/admin/templates/{id}
pub async fn delete_template(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    require_admin(&headers, &state)?;

    sqlx::query("DELETE FROM slot_templates WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(ApiResponse::success(())))
}

// ── Date overrides ──

/// GET /api/admin/overrides?date=YYYY-MM-DD — overrides, optionally by date.
pub async fn list_overrides(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ReservationsQuery>,
) -> Result<Json<ApiResponse<Vec<DateOverride>>>, ApiError> {
    require_admin(&headers, &state)?;

    let overrides = match &query.date {
        Some(date) => sqlx::query_as::<_, DateOverride>(
            "SELECT id, date, kind, start_time, end_time, reserved_for_customer_id, reason
             FROM date_overrides WHERE date = ? ORDER BY start_time ASC",
        )
        .bind(date)
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?,
        None => sqlx::query_as::<_, DateOverride>(
            "SELECT id, date, kind, start_time, end_time, reserved_for_customer_id, reason
             FROM date_overrides ORDER BY date ASC, start_time ASC",
        )
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?,
    };

    Ok(Json(ApiResponse::success(overrides)))
}

/// POST /api/admin/overrides — block a day/range or add an extra slot.
pub async fn create_override(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateOverrideRequest>,
) -> Result<Json<ApiResponse<DateOverride>>, ApiError> {
    require_admin(&headers, &state)?;

    let bad_request = |msg: &str| {
        (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(msg.to_string())),
        )
    };

    if chrono::NaiveDate::parse_from_str(&body.date, "%Y-%m-%d").is_err() {
        return Err(bad_request("Malformed date"));
    }
    match body.kind.as_str() {
        DateOverride::FULL_DAY_BLOCK => {}
        DateOverride::RANGE_BLOCK | DateOverride::EXTRA_SLOT => {
            if body.start_time.is_none() || body.end_time.is_none() {
                return Err(bad_request("This override kind needs a time range"));
            }
        }
        _ => return Err(bad_request("Unknown override kind")),
    }

    let id = sqlx::query(
        "INSERT INTO date_overrides
             (date, kind, start_time, end_time, reserved_for_customer_id, reason)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&body.date)
    .bind(&body.kind)
    .bind(&body.start_time)
    .bind(&body.end_time)
    .bind(body.reserved_for_customer_id)
    .bind(&body.reason)
    .execute(&state.db)
    .await
    .map_err(db_error)?
    .last_insert_rowid();

    let created = sqlx::query_as::<_, DateOverride>(
        "SELECT id, date, kind, start_time, end_time, reserved_for_customer_id, reason
         FROM date_overrides WHERE id = ?",
    )
    .bind(id)
    .fetch_one(&state.db)
    .await
    .map_err(db_error)?;

    Ok(Json(ApiResponse::success(created)))
}

/// DELETE /api/admin/overrides/{id}
pub async fn delete_override(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    require_admin(&headers, &state)?;

    sqlx::query("DELETE FROM date_overrides WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(ApiResponse::success(())))
}

// ── Reservations ──

/// GET /api/admin/reservations?date=…&from=…&to=… — filtered listing.
pub async fn list_reservations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ReservationsQuery>,
) -> Result<Json<ApiResponse<Vec<Reservation>>>, ApiError> {
    require_admin(&headers, &state)?;

    let list = if let Some(date) = &query.date {
        sqlx::query_as::<_, Reservation>(
            "SELECT * FROM reservations WHERE date = ? ORDER BY start_time ASC",
        )
        .bind(date)
        .fetch_all(&state.db)
        .await
    } else if let (Some(from), Some(to)) = (&query.from, &query.to) {
        sqlx::query_as::<_, Reservation>(
            "SELECT * FROM reservations WHERE date >= ? AND date <= ?
             ORDER BY date ASC, start_time ASC",
        )
        .bind(from)
        .bind(to)
        .fetch_all(&state.db)
        .await
    } else {
        sqlx::query_as::<_, Reservation>(
            "SELECT * FROM reservations ORDER BY date DESC, start_time ASC LIMIT 200",
        )
        .fetch_all(&state.db)
        .await
    }
    .map_err(db_error)?;

    Ok(Json(ApiResponse::success(list)))
}

/// POST /api/admin/reservations/{id}/cancel
pub async fn cancel_reservation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    require_admin(&headers, &state)?;

    reservations::cancel(
        &state.db,
        state.clock.as_ref(),
        state.notifier.as_ref(),
        id,
        "admin cancellation",
    )
    .await
    .map_err(DomainError::into_response_parts)?;

    Ok(Json(ApiResponse::success(())))
}

/// POST /api/admin/sweep — run the garbage collector on demand.
pub async fn run_sweep(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<SweepReport>>, ApiError> {
    require_admin(&headers, &state)?;

    let report = sweep::run(&state.db, state.clock.as_ref()).await;
    Ok(Json(ApiResponse::success(report)))
}
