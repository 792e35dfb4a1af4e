use chrono::Timelike;
use sqlx::SqlitePool;

use crate::catalog;
use crate::clock::{self, Clock};
use crate::credits::CreditsLedger;
use crate::error::DomainError;
use crate::models::{
    order_status, CustomerIdentity, PaymentMethod, PaymentStatus, Reservation, ReservationStatus,
};
use crate::notify::Notifier;

/// Price of one lesson-hour in SEK.
const PRICE_PER_HOUR: i64 = 700;

/// Shortest and longest bookable lesson.
const MIN_DURATION_MINUTES: i64 = 40;
const MAX_DURATION_MINUTES: i64 = 180;

/// Holder of a new reservation: an authenticated customer or guest contact.
#[derive(Debug, Clone)]
pub struct HolderRef {
    pub customer: Option<CustomerIdentity>,
    pub guest_name: Option<String>,
    pub guest_phone: Option<String>,
    pub guest_email: Option<String>,
}

pub async fn get(db: &SqlitePool, id: i64) -> Result<Reservation, DomainError> {
    sqlx::query_as::<_, Reservation>("SELECT * FROM reservations WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or(DomainError::NotFound)
}

fn add_minutes(time: &str, minutes: i64) -> Option<String> {
    let t = chrono::NaiveTime::parse_from_str(time, "%H:%M").ok()?;
    let total = t.hour() as i64 * 60 + t.minute() as i64 + minutes;
    if total >= 24 * 60 {
        return None;
    }
    Some(format!("{:02}:{:02}", total / 60, total % 60))
}

fn lesson_price(duration_minutes: i64) -> i64 {
    PRICE_PER_HOUR * duration_minutes / 60
}

/// Create a temporary hold on a slot.
///
/// The existence check and the insert are one operation: the partial unique
/// index on active (date, start_time) rows makes the insert itself the
/// conflict check, so two concurrent holds on the same slot cannot both
/// succeed.
pub async fn create_hold(
    db: &SqlitePool,
    clock: &dyn Clock,
    date: &str,
    start_time: &str,
    duration_minutes: i64,
    holder: HolderRef,
) -> Result<Reservation, DomainError> {
    if chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
        return Err(DomainError::Invalid("malformed date".into()));
    }
    if chrono::NaiveTime::parse_from_str(start_time, "%H:%M").is_err() {
        return Err(DomainError::Invalid("malformed start time".into()));
    }
    if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&duration_minutes) {
        return Err(DomainError::Invalid("unsupported lesson duration".into()));
    }
    let end_time = add_minutes(start_time, duration_minutes)
        .ok_or_else(|| DomainError::Invalid("lesson runs past midnight".into()))?;

    let overrides = catalog::overrides_for_date(db, date).await?;
    if catalog::is_blocked(&overrides, start_time, &end_time) {
        return Err(DomainError::SlotBlocked);
    }

    let now = clock.now();
    if clock::in_must_call_window(now, date, start_time) {
        return Err(DomainError::MustCallWindow);
    }

    let stamp = clock::format_db_datetime(now);
    let insert = sqlx::query(
        "INSERT INTO reservations
             (date, start_time, end_time, duration_minutes, status, payment_status,
              customer_id, guest_name, guest_phone, guest_email, total_price,
              created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(date)
    .bind(start_time)
    .bind(&end_time)
    .bind(duration_minutes)
    .bind(ReservationStatus::Temporary.as_str())
    .bind(PaymentStatus::Unset.as_str())
    .bind(holder.customer.map(|c| c.customer_id))
    .bind(&holder.guest_name)
    .bind(&holder.guest_phone)
    .bind(&holder.guest_email)
    .bind(lesson_price(duration_minutes))
    .bind(&stamp)
    .bind(&stamp)
    .execute(db)
    .await;

    let id = match insert {
        Ok(done) => done.last_insert_rowid(),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            return Err(DomainError::SlotConflict);
        }
        Err(e) => return Err(e.into()),
    };

    get(db, id).await
}

/// Confirm a hold into a booking. Idempotent: an already-confirmed
/// reservation is returned unchanged with no repeated side effects.
pub async fn confirm(
    db: &SqlitePool,
    clock: &dyn Clock,
    credits: &dyn CreditsLedger,
    notifier: &dyn Notifier,
    id: i64,
    method: PaymentMethod,
) -> Result<(Reservation, Option<String>), DomainError> {
    let reservation = get(db, id).await?;

    match reservation.status.as_str() {
        "confirmed" => return Ok((reservation, None)),
        "cancelled" => return Err(DomainError::AlreadyTerminal),
        _ => {}
    }

    // Blocks may have been added after the hold was created
    let overrides = catalog::overrides_for_date(db, &reservation.date).await?;
    if catalog::is_blocked(&overrides, &reservation.start_time, &reservation.end_time) {
        return Err(DomainError::SlotBlocked);
    }

    let credits_customer = if method == PaymentMethod::Credits {
        Some(reservation.customer_id.ok_or_else(|| {
            DomainError::Invalid("credits require a customer account".into())
        })?)
    } else {
        None
    };

    let payment_status = method.confirmed_payment_status();
    let stamp = clock::format_db_datetime(clock.now());
    let updated = sqlx::query(
        "UPDATE reservations
         SET status = 'confirmed', payment_status = ?, payment_method = ?, updated_at = ?
         WHERE id = ? AND status = 'temporary'",
    )
    .bind(payment_status.as_str())
    .bind(method.as_str())
    .bind(&stamp)
    .bind(id)
    .execute(db)
    .await?
    .rows_affected();

    let reservation = get(db, id).await?;
    if updated == 0 {
        // Lost a race: someone confirmed or the sweep cancelled meanwhile.
        // Nothing was debited yet, so the ledger stays intact either way.
        return match reservation.status.as_str() {
            "confirmed" => Ok((reservation, None)),
            _ => Err(DomainError::AlreadyTerminal),
        };
    }

    // Debit only once the status transition is ours. A failed debit hands
    // the slot back; the guard keeps a concurrent cancel's write intact.
    if let Some(customer) = credits_customer {
        if !credits.debit(customer, 1).await? {
            sqlx::query(
                "UPDATE reservations
                 SET status = 'temporary', payment_status = ?, payment_method = NULL,
                     updated_at = ?
                 WHERE id = ? AND status = 'confirmed' AND payment_method = ?",
            )
            .bind(PaymentStatus::Unset.as_str())
            .bind(&stamp)
            .bind(id)
            .bind(method.as_str())
            .execute(db)
            .await?;
            return Err(DomainError::InsufficientCredits);
        }
    }

    let invoice_reference = format!("INV-{:06}", reservation.id);
    notifier
        .reservation_confirmed(&reservation, &invoice_reference)
        .await;

    Ok((reservation, Some(invoice_reference)))
}

/// Record a verified payment against a reservation. Used by webhook
/// reconciliation; callable any number of times.
///
/// Returns `true` when this call transitioned the row, `false` when the
/// reservation was already paid or terminal (idempotent no-op).
pub async fn mark_paid(db: &SqlitePool, clock: &dyn Clock, id: i64) -> Result<bool, DomainError> {
    let stamp = clock::format_db_datetime(clock.now());
    let updated = sqlx::query(
        "UPDATE reservations
         SET status = 'confirmed', payment_status = 'paid', updated_at = ?
         WHERE id = ?
           AND status IN ('temporary', 'confirmed')
           AND payment_status IN ('unset', 'pending')",
    )
    .bind(&stamp)
    .bind(id)
    .execute(db)
    .await?
    .rows_affected();
    Ok(updated == 1)
}

/// Cancel a reservation. Safe to call repeatedly; already-cancelled rows are
/// left alone. Open payment orders become irrelevant and are expired.
pub async fn cancel(
    db: &SqlitePool,
    clock: &dyn Clock,
    notifier: &dyn Notifier,
    id: i64,
    reason: &str,
) -> Result<(), DomainError> {
    let reservation = get(db, id).await?;
    if reservation.status == ReservationStatus::Cancelled.as_str() {
        return Ok(());
    }

    let stamp = clock::format_db_datetime(clock.now());
    let updated = sqlx::query(
        "UPDATE reservations SET status = 'cancelled', updated_at = ?
         WHERE id = ? AND status != 'cancelled'",
    )
    .bind(&stamp)
    .bind(id)
    .execute(db)
    .await?
    .rows_affected();

    sqlx::query(
        "UPDATE payment_orders SET status = ?
         WHERE reservation_id = ? AND status = ?",
    )
    .bind(order_status::EXPIRED)
    .bind(id)
    .bind(order_status::OPEN)
    .execute(db)
    .await?;

    if updated == 1 {
        notifier.reservation_cancelled(&reservation, reason).await;
    }
    Ok(())
}

/// True when the reservation can still receive a payment completion.
pub fn eligible_for_payment(reservation: &Reservation) -> bool {
    reservation.status != ReservationStatus::Cancelled.as_str()
        && reservation.payment_status != PaymentStatus::Paid.as_str()
        && reservation.payment_status != PaymentStatus::Failed.as_str()
}

// ── Tests ──

#[cfg(test)]
pub mod test_support {
    use super::*;

    pub fn guest_holder() -> HolderRef {
        HolderRef {
            customer: None,
            guest_name: Some("Test Guest".into()),
            guest_phone: Some("+46 70 000 00 00".into()),
            guest_email: None,
        }
    }

    pub fn customer_holder(customer_id: i64) -> HolderRef {
        HolderRef {
            customer: Some(CustomerIdentity { customer_id }),
            guest_name: None,
            guest_phone: None,
            guest_email: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::clock::test_support::FixedClock;
    use crate::credits::DbCreditsLedger;
    use crate::db;
    use crate::notify::test_support::RecordingNotifier;

    // Clock sits well before the slot so the must-call guard stays out of
    // the way unless a test wants it.
    fn clock() -> FixedClock {
        FixedClock::at("2025-03-09 10:00:00")
    }

    #[tokio::test]
    async fn test_create_hold_basic() {
        let pool = db::test_support::test_pool().await;
        let clock = clock();

        let r = create_hold(&pool, &clock, "2025-03-10", "10:00", 60, guest_holder())
            .await
            .unwrap();
        assert_eq!(r.status, "temporary");
        assert_eq!(r.payment_status, "unset");
        assert_eq!(r.end_time, "11:00");
        assert_eq!(r.total_price, 700);
    }

    #[tokio::test]
    async fn test_second_hold_on_same_slot_conflicts() {
        let pool = db::test_support::test_pool().await;
        let clock = clock();

        create_hold(&pool, &clock, "2025-03-10", "14:00", 60, guest_holder())
            .await
            .unwrap();
        let second = create_hold(&pool, &clock, "2025-03-10", "14:00", 60, guest_holder()).await;
        assert!(matches!(second, Err(DomainError::SlotConflict)));
    }

    #[tokio::test]
    async fn test_concurrent_holds_exactly_one_succeeds() {
        let pool = db::test_support::test_pool().await;
        let clock = clock();

        let (a, b) = tokio::join!(
            create_hold(&pool, &clock, "2025-03-10", "14:00", 60, guest_holder()),
            create_hold(&pool, &clock, "2025-03-10", "14:00", 60, guest_holder()),
        );
        let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        let conflict = if a.is_err() { a } else { b };
        assert!(matches!(conflict, Err(DomainError::SlotConflict)));
    }

    #[tokio::test]
    async fn test_hold_in_must_call_window_rejected() {
        let pool = db::test_support::test_pool().await;
        let clock = FixedClock::at("2025-03-10 09:00:00");

        let result = create_hold(&pool, &clock, "2025-03-10", "10:00", 60, guest_holder()).await;
        assert!(matches!(result, Err(DomainError::MustCallWindow)));
    }

    #[tokio::test]
    async fn test_hold_on_blocked_day_rejected() {
        let pool = db::test_support::test_pool().await;
        let clock = clock();

        sqlx::query("INSERT INTO date_overrides (date, kind) VALUES ('2025-03-10', 'full_day_block')")
            .execute(&pool)
            .await
            .unwrap();

        let result = create_hold(&pool, &clock, "2025-03-10", "10:00", 60, guest_holder()).await;
        assert!(matches!(result, Err(DomainError::SlotBlocked)));
    }

    #[tokio::test]
    async fn test_cancelled_hold_frees_the_slot() {
        let pool = db::test_support::test_pool().await;
        let clock = clock();
        let notifier = RecordingNotifier::default();

        let r = create_hold(&pool, &clock, "2025-03-10", "10:00", 60, guest_holder())
            .await
            .unwrap();
        cancel(&pool, &clock, &notifier, r.id, "customer request")
            .await
            .unwrap();

        // Slot can be held again once the previous hold left the active set
        create_hold(&pool, &clock, "2025-03-10", "10:00", 60, guest_holder())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_confirm_with_credits_pays_immediately() {
        let pool = db::test_support::test_pool().await;
        let clock = clock();
        let notifier = RecordingNotifier::default();
        let ledger = DbCreditsLedger::new(pool.clone());

        sqlx::query("INSERT INTO lesson_credits (customer_id, balance) VALUES (5, 3)")
            .execute(&pool)
            .await
            .unwrap();

        let r = create_hold(&pool, &clock, "2025-03-10", "10:00", 60, customer_holder(5))
            .await
            .unwrap();
        let (confirmed, invoice) =
            confirm(&pool, &clock, &ledger, &notifier, r.id, PaymentMethod::Credits)
                .await
                .unwrap();

        assert_eq!(confirmed.status, "confirmed");
        assert_eq!(confirmed.payment_status, "paid");
        assert!(invoice.is_some());
        assert_eq!(ledger.balance(5).await.unwrap(), 2);
        // No provider order was opened for a credits confirmation
        let orders: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payment_orders")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(orders, 0);
    }

    #[tokio::test]
    async fn test_confirm_with_swish_stays_pending() {
        let pool = db::test_support::test_pool().await;
        let clock = clock();
        let notifier = RecordingNotifier::default();
        let ledger = DbCreditsLedger::new(pool.clone());

        let r = create_hold(&pool, &clock, "2025-03-10", "10:00", 60, guest_holder())
            .await
            .unwrap();
        let (confirmed, _) = confirm(&pool, &clock, &ledger, &notifier, r.id, PaymentMethod::Swish)
            .await
            .unwrap();

        assert_eq!(confirmed.status, "confirmed");
        assert_eq!(confirmed.payment_status, "pending");
        assert_eq!(confirmed.payment_method.as_deref(), Some("swish"));
    }

    #[tokio::test]
    async fn test_confirm_twice_fires_side_effects_once() {
        let pool = db::test_support::test_pool().await;
        let clock = clock();
        let notifier = RecordingNotifier::default();
        let ledger = DbCreditsLedger::new(pool.clone());

        let r = create_hold(&pool, &clock, "2025-03-10", "10:00", 60, guest_holder())
            .await
            .unwrap();
        let (first, invoice) =
            confirm(&pool, &clock, &ledger, &notifier, r.id, PaymentMethod::Card)
                .await
                .unwrap();
        assert!(invoice.is_some());

        let (second, repeat_invoice) =
            confirm(&pool, &clock, &ledger, &notifier, r.id, PaymentMethod::Card)
                .await
                .unwrap();
        assert_eq!(second.status, first.status);
        assert_eq!(second.payment_status, first.payment_status);
        assert!(repeat_invoice.is_none());
        assert_eq!(notifier.confirmed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_confirm_rejected_when_block_added_after_hold() {
        let pool = db::test_support::test_pool().await;
        let clock = clock();
        let notifier = RecordingNotifier::default();
        let ledger = DbCreditsLedger::new(pool.clone());

        let r = create_hold(&pool, &clock, "2025-03-10", "10:00", 60, guest_holder())
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO date_overrides (date, kind, start_time, end_time)
             VALUES ('2025-03-10', 'range_block', '09:00', '12:00')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let result = confirm(&pool, &clock, &ledger, &notifier, r.id, PaymentMethod::Card).await;
        assert!(matches!(result, Err(DomainError::SlotBlocked)));
    }

    #[tokio::test]
    async fn test_confirm_cancelled_is_already_terminal() {
        let pool = db::test_support::test_pool().await;
        let clock = clock();
        let notifier = RecordingNotifier::default();
        let ledger = DbCreditsLedger::new(pool.clone());

        let r = create_hold(&pool, &clock, "2025-03-10", "10:00", 60, guest_holder())
            .await
            .unwrap();
        cancel(&pool, &clock, &notifier, r.id, "test").await.unwrap();

        let result = confirm(&pool, &clock, &ledger, &notifier, r.id, PaymentMethod::Card).await;
        assert!(matches!(result, Err(DomainError::AlreadyTerminal)));
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let pool = db::test_support::test_pool().await;
        let clock = clock();
        let notifier = RecordingNotifier::default();

        let r = create_hold(&pool, &clock, "2025-03-10", "10:00", 60, guest_holder())
            .await
            .unwrap();
        cancel(&pool, &clock, &notifier, r.id, "first").await.unwrap();
        cancel(&pool, &clock, &notifier, r.id, "second").await.unwrap();
        assert_eq!(notifier.cancelled.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_paid_is_idempotent() {
        let pool = db::test_support::test_pool().await;
        let clock = clock();
        let notifier = RecordingNotifier::default();
        let ledger = DbCreditsLedger::new(pool.clone());

        let r = create_hold(&pool, &clock, "2025-03-10", "10:00", 60, guest_holder())
            .await
            .unwrap();
        confirm(&pool, &clock, &ledger, &notifier, r.id, PaymentMethod::Swish)
            .await
            .unwrap();

        assert!(mark_paid(&pool, &clock, r.id).await.unwrap());
        assert!(!mark_paid(&pool, &clock, r.id).await.unwrap());

        let paid = get(&pool, r.id).await.unwrap();
        assert_eq!(paid.payment_status, "paid");
    }

    #[tokio::test]
    async fn test_credits_not_debited_when_confirm_loses_to_sweep() {
        let pool = db::test_support::test_pool().await;
        let clock = clock();
        let notifier = RecordingNotifier::default();
        let ledger = DbCreditsLedger::new(pool.clone());

        sqlx::query("INSERT INTO lesson_credits (customer_id, balance) VALUES (5, 3)")
            .execute(&pool)
            .await
            .unwrap();

        let r = create_hold(&pool, &clock, "2025-03-10", "10:00", 60, customer_holder(5))
            .await
            .unwrap();

        // Hold goes stale and the sweep cancels it before the confirm lands
        clock.advance_minutes(6);
        crate::sweep::run(&pool, &clock).await;

        let result = confirm(&pool, &clock, &ledger, &notifier, r.id, PaymentMethod::Credits).await;
        assert!(matches!(result, Err(DomainError::AlreadyTerminal)));
        assert_eq!(ledger.balance(5).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_insufficient_credits_leaves_hold_untouched() {
        let pool = db::test_support::test_pool().await;
        let clock = clock();
        let notifier = RecordingNotifier::default();
        let ledger = DbCreditsLedger::new(pool.clone());

        let r = create_hold(&pool, &clock, "2025-03-10", "10:00", 60, customer_holder(8))
            .await
            .unwrap();
        let result = confirm(&pool, &clock, &ledger, &notifier, r.id, PaymentMethod::Credits).await;
        assert!(matches!(result, Err(DomainError::InsufficientCredits)));

        let unchanged = get(&pool, r.id).await.unwrap();
        assert_eq!(unchanged.status, "temporary");
    }
}
