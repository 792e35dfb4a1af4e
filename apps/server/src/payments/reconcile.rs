use rand::RngCore;
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::clock::{self, Clock};
use crate::error::DomainError;
use crate::models::{order_status, PaymentOrder};
use crate::payments::provider::{self, PaymentProvider, ProviderOrderStatus};
use crate::reservations;

/// Merchant reference prefix: `TSK-{reservation_id}-{unix_millis}`.
const REFERENCE_PREFIX: &str = "TSK-";

// ── Checkout: open or reuse a provider order ──

fn generate_callback_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn merchant_reference(reservation_id: i64, now_millis: i64) -> String {
    format!("{}{}-{}", REFERENCE_PREFIX, reservation_id, now_millis)
}

/// Extract the reservation id from a merchant reference. Strict format check:
/// anything unexpected yields `None` rather than a guess.
pub fn parse_merchant_reference(reference: &str) -> Option<i64> {
    let rest = reference.strip_prefix(REFERENCE_PREFIX)?;
    let (id_part, millis_part) = rest.split_once('-')?;
    if millis_part.is_empty() || !millis_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    id_part.parse::<i64>().ok().filter(|id| *id > 0)
}

async fn open_order_for(
    db: &SqlitePool,
    reservation_id: i64,
) -> Result<Option<PaymentOrder>, DomainError> {
    let order = sqlx::query_as::<_, PaymentOrder>(
        "SELECT * FROM payment_orders WHERE reservation_id = ? AND status = 'open'",
    )
    .bind(reservation_id)
    .fetch_optional(db)
    .await?;
    Ok(order)
}

async fn set_order_status(db: &SqlitePool, order_id: i64, status: &str) -> Result<(), DomainError> {
    sqlx::query("UPDATE payment_orders SET status = ? WHERE id = ?")
        .bind(status)
        .bind(order_id)
        .execute(db)
        .await?;
    Ok(())
}

/// Open a provider order for a reservation, or reuse the existing open one.
///
/// A second checkout attempt refreshes the existing order's live status from
/// the provider instead of creating a duplicate. Each attempt binds a fresh
/// single-use callback token to the order.
pub async fn open_or_get_order(
    db: &SqlitePool,
    clock: &dyn Clock,
    provider: &dyn PaymentProvider,
    reservation_id: i64,
) -> Result<(PaymentOrder, Option<String>), DomainError> {
    let reservation = reservations::get(db, reservation_id).await?;
    if !reservations::eligible_for_payment(&reservation) {
        return Err(DomainError::AlreadyTerminal);
    }

    let now = clock.now();

    if let Some(existing) = open_order_for(db, reservation_id).await? {
        let live = provider.get_order(&existing.provider_order_id).await?;
        match live.status {
            ProviderOrderStatus::Paid => {
                // Poll beat the webhook; reconcile now
                set_order_status(db, existing.id, order_status::PAID).await?;
                reservations::mark_paid(db, clock, reservation_id).await?;
                let refreshed = fetch_order(db, existing.id).await?;
                return Ok((refreshed, None));
            }
            ProviderOrderStatus::Cancelled | ProviderOrderStatus::Failed => {
                set_order_status(db, existing.id, order_status::FAILED).await?;
                // fall through and open a replacement order
            }
            ProviderOrderStatus::Pending => {
                let token = generate_callback_token();
                sqlx::query(
                    "UPDATE payment_orders
                     SET callback_token = ?, callback_token_expires_at = ?
                     WHERE id = ?",
                )
                .bind(&token)
                .bind(clock::callback_token_expiry(now))
                .bind(existing.id)
                .execute(db)
                .await?;
                let refreshed = fetch_order(db, existing.id).await?;
                return Ok((refreshed, live.payment_url));
            }
        }
    }

    let reference = merchant_reference(reservation_id, now.timestamp_millis());
    let description = format!(
        "Driving lesson {} {}",
        reservation.date, reservation.start_time
    );
    let created = provider
        .create_order(&reference, reservation.total_price, &description)
        .await?;

    let token = generate_callback_token();
    let insert = sqlx::query(
        "INSERT INTO payment_orders
             (reservation_id, provider_order_id, merchant_reference, amount, status,
              callback_token, callback_token_expires_at, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(reservation_id)
    .bind(&created.provider_order_id)
    .bind(&reference)
    .bind(reservation.total_price)
    .bind(order_status::OPEN)
    .bind(&token)
    .bind(clock::callback_token_expiry(now))
    .bind(clock::format_db_datetime(now))
    .execute(db)
    .await;

    let order_id = match insert {
        Ok(done) => done.last_insert_rowid(),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            // Concurrent checkout won the insert; reuse its order
            let existing = open_order_for(db, reservation_id)
                .await?
                .ok_or(DomainError::UnknownReference)?;
            return Ok((existing, None));
        }
        Err(e) => return Err(e.into()),
    };

    let order = fetch_order(db, order_id).await?;
    Ok((order, created.payment_url))
}

async fn fetch_order(db: &SqlitePool, order_id: i64) -> Result<PaymentOrder, DomainError> {
    sqlx::query_as::<_, PaymentOrder>("SELECT * FROM payment_orders WHERE id = ?")
        .bind(order_id)
        .fetch_optional(db)
        .await?
        .ok_or(DomainError::UnknownReference)
}

// ── Webhook verification pipeline ──

#[derive(Debug, Deserialize)]
pub struct ProviderCallback {
    pub order_id: Option<String>,
    pub merchant_reference: Option<String>,
    pub status: String,
}

/// Why a callback was turned away. Rejections answer 401/400 so the provider
/// stops retrying requests that can never succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MissingSignature,
    BadSignature,
    MalformedBody,
    MissingToken,
    TokenMismatch,
    TokenExpired,
    ReferenceMismatch,
}

/// Why a callback was acknowledged without touching any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckReason {
    IgnoredStatus,
    MalformedReference,
    UnknownReservation,
    AlreadySettled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Rejected(RejectReason),
    Acknowledged(AckReason),
    Applied { reservation_id: i64 },
}

fn mask(id: &str) -> String {
    match id.get(..6) {
        Some(prefix) if id.len() > 6 => format!("{}…", prefix),
        _ => "…".to_string(),
    }
}

/// Resolve the local order for a callback. Ordered per the verification
/// pipeline: ids first, token fallback second, each with its own failure.
async fn resolve_order(
    db: &SqlitePool,
    clock: &dyn Clock,
    callback: &ProviderCallback,
    token: Option<&str>,
) -> Result<Result<PaymentOrder, RejectReason>, DomainError> {
    let by_ids = sqlx::query_as::<_, PaymentOrder>(
        "SELECT * FROM payment_orders
         WHERE (provider_order_id = ? AND ? IS NOT NULL)
            OR (merchant_reference = ? AND ? IS NOT NULL)
         LIMIT 1",
    )
    .bind(&callback.order_id)
    .bind(&callback.order_id)
    .bind(&callback.merchant_reference)
    .bind(&callback.merchant_reference)
    .fetch_optional(db)
    .await?;

    if let Some(order) = by_ids {
        // The order carries a token: the caller must present it, unexpired
        let Some(presented) = token else {
            return Ok(Err(RejectReason::MissingToken));
        };
        if presented != order.callback_token {
            return Ok(Err(RejectReason::TokenMismatch));
        }
        if clock::token_expired(clock.now(), &order.callback_token_expires_at) {
            return Ok(Err(RejectReason::TokenExpired));
        }
        return Ok(Ok(order));
    }

    // No match by ids: fall back to the token, requiring the order's own
    // identifiers to agree with the payload
    let Some(presented) = token else {
        return Ok(Err(RejectReason::MissingToken));
    };
    let by_token = sqlx::query_as::<_, PaymentOrder>(
        "SELECT * FROM payment_orders WHERE callback_token = ? LIMIT 1",
    )
    .bind(presented)
    .fetch_optional(db)
    .await?;
    let Some(order) = by_token else {
        return Ok(Err(RejectReason::MissingToken));
    };
    if clock::token_expired(clock.now(), &order.callback_token_expires_at) {
        return Ok(Err(RejectReason::TokenExpired));
    }
    if let Some(ref oid) = callback.order_id {
        if *oid != order.provider_order_id {
            return Ok(Err(RejectReason::ReferenceMismatch));
        }
    }
    if let Some(ref mref) = callback.merchant_reference {
        if *mref != order.merchant_reference {
            return Ok(Err(RejectReason::ReferenceMismatch));
        }
    }
    Ok(Ok(order))
}

/// Run the full webhook verification pipeline and apply the payment when it
/// passes. Safe under at-least-once and out-of-order delivery: replays and
/// post-cancellation callbacks end as acknowledged no-ops.
pub async fn handle_provider_callback(
    db: &SqlitePool,
    clock: &dyn Clock,
    webhook_secret: &str,
    signature_header: Option<&str>,
    raw_body: &[u8],
    token: Option<&str>,
) -> Result<WebhookOutcome, DomainError> {
    // 1. Signature over the raw body
    let Some(signature) = signature_header else {
        tracing::warn!("webhook rejected: missing signature");
        return Ok(WebhookOutcome::Rejected(RejectReason::MissingSignature));
    };
    if !provider::verify_signature(webhook_secret, raw_body, signature) {
        tracing::warn!("webhook rejected: bad signature");
        return Ok(WebhookOutcome::Rejected(RejectReason::BadSignature));
    }

    let Ok(callback) = serde_json::from_slice::<ProviderCallback>(raw_body) else {
        tracing::warn!("webhook rejected: malformed body");
        return Ok(WebhookOutcome::Rejected(RejectReason::MalformedBody));
    };

    // 2–5. Resolve the local order and authorize via its callback token
    let order = match resolve_order(db, clock, &callback, token).await? {
        Ok(order) => order,
        Err(reason) => {
            tracing::warn!(
                "webhook rejected: {:?} (order_id={})",
                reason,
                callback.order_id.as_deref().map(mask).unwrap_or_default()
            );
            return Ok(WebhookOutcome::Rejected(reason));
        }
    };

    // 6. Only the paid terminal state mutates anything
    if ProviderOrderStatus::from_provider(&callback.status) != ProviderOrderStatus::Paid {
        tracing::info!(
            "webhook ignored: status {} for order {}",
            callback.status,
            mask(&order.provider_order_id)
        );
        return Ok(WebhookOutcome::Acknowledged(AckReason::IgnoredStatus));
    }

    // 7. Locate the reservation; anything off silently acknowledges
    let Some(reservation_id) = parse_merchant_reference(&order.merchant_reference) else {
        tracing::warn!(
            "webhook acknowledged: malformed merchant reference on order {}",
            mask(&order.provider_order_id)
        );
        return Ok(WebhookOutcome::Acknowledged(AckReason::MalformedReference));
    };
    let reservation = match reservations::get(db, reservation_id).await {
        Ok(r) => r,
        Err(DomainError::NotFound) => {
            tracing::warn!(
                "webhook acknowledged: order {} references unknown reservation",
                mask(&order.provider_order_id)
            );
            return Ok(WebhookOutcome::Acknowledged(AckReason::UnknownReservation));
        }
        Err(e) => return Err(e),
    };
    if !reservations::eligible_for_payment(&reservation) {
        return Ok(WebhookOutcome::Acknowledged(AckReason::AlreadySettled));
    }

    // 8. Apply: confirm/pay the reservation, settle the order
    let transitioned = reservations::mark_paid(db, clock, reservation_id).await?;
    set_order_status(db, order.id, order_status::PAID).await?;
    if transitioned {
        tracing::info!("payment applied to reservation {}", reservation_id);
        Ok(WebhookOutcome::Applied { reservation_id })
    } else {
        Ok(WebhookOutcome::Acknowledged(AckReason::AlreadySettled))
    }
}

// ── Tests ──
