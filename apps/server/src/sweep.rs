use sqlx::SqlitePool;

use crate::clock::{self, Clock};
use crate::error::DomainError;
use crate::models::SweepReport;

/// Stale-hold sweep. The single place cleanup happens: handlers and the
/// background task both call in here rather than scattering DELETEs.
///
/// Every UPDATE repeats its predicate in the WHERE clause, so a reservation
/// confirmed between read and write is left untouched and the sweep is safe
/// to run concurrently with confirmation.

/// Cancel temporary holds past the hold TTL that never saw a payment, and
/// expire their open orders.
async fn expire_stale_holds(db: &SqlitePool, clock: &dyn Clock) -> Result<(u64, u64), DomainError> {
    let now = clock.now();
    let cutoff = clock::stale_cutoff(now);
    let stamp = clock::format_db_datetime(now);

    let holds = sqlx::query(
        "UPDATE reservations SET status = 'cancelled', updated_at = ?
         WHERE status = 'temporary'
           AND payment_status IN ('unset', 'pending')
           AND created_at < ?",
    )
    .bind(&stamp)
    .bind(&cutoff)
    .execute(db)
    .await?
    .rows_affected();

    let orders = sqlx::query(
        "UPDATE payment_orders SET status = 'expired'
         WHERE status = 'open'
           AND reservation_id IN (SELECT id FROM reservations WHERE status = 'cancelled')",
    )
    .execute(db)
    .await?
    .rows_affected();

    Ok((holds, orders))
}

/// Expire open orders whose reservation date has already passed. A slot in
/// the past can never be honored, whatever the hold TTL says.
async fn expire_past_date_orders(db: &SqlitePool, clock: &dyn Clock) -> Result<u64, DomainError> {
    let today = clock.now().format("%Y-%m-%d").to_string();
    let orders = sqlx::query(
        "UPDATE payment_orders SET status = 'expired'
         WHERE status = 'open'
           AND reservation_id IN (SELECT id FROM reservations WHERE date < ?)",
    )
    .bind(&today)
    .execute(db)
    .await?
    .rows_affected();
    Ok(orders)
}

/// Retention: drop cancelled reservations that have sat for longer than the
/// retention window and have no paid order worth keeping for audit.
async fn purge_cancelled(db: &SqlitePool, clock: &dyn Clock) -> Result<u64, DomainError> {
    let cutoff = clock::retention_cutoff(clock.now());
    let purged = sqlx::query(
        "DELETE FROM reservations
         WHERE status = 'cancelled'
           AND updated_at < ?
           AND id NOT IN (SELECT reservation_id FROM payment_orders WHERE status = 'paid')",
    )
    .bind(&cutoff)
    .execute(db)
    .await?
    .rows_affected();
    Ok(purged)
}

/// Run all sweep phases. Errors are logged and reported as zeros: the sweep
/// is opportunistic and must never fail its caller.
pub async fn run(db: &SqlitePool, clock: &dyn Clock) -> SweepReport {
    let (holds_expired, mut orders_expired) = match expire_stale_holds(db, clock).await {
        Ok(counts) => counts,
        Err(e) => {
            tracing::error!("stale-hold sweep failed: {}", e);
            (0, 0)
        }
    };

    match expire_past_date_orders(db, clock).await {
        Ok(n) => orders_expired += n,
        Err(e) => tracing::error!("past-date order sweep failed: {}", e),
    }

    let cancelled_purged = match purge_cancelled(db, clock).await {
        Ok(n) => n,
        Err(e) => {
            tracing::error!("cancelled purge failed: {}", e);
            0
        }
    };

    if holds_expired > 0 || orders_expired > 0 || cancelled_purged > 0 {
        tracing::info!(
            "sweep: {} holds expired, {} orders expired, {} cancelled purged",
            holds_expired,
            orders_expired,
            cancelled_purged
        );
    }

    SweepReport {
        holds_expired,
        orders_expired,
        cancelled_purged,
    }
}

// ── Tests ──
