use chrono::{DateTime, Datelike, NaiveDate, Utc};
use sqlx::SqlitePool;
use std::collections::BTreeMap;

use crate::catalog;
use crate::clock::{self, Clock};
use crate::models::{
    CustomerIdentity, DateOverride, Reservation, ReservationStatus, SlotStatus, SlotView,
};

/// Derives per-slot status for a set of dates by combining the slot catalog
/// with the current reservation table. Pure read: callers wanting cleanup run
/// the sweep explicitly first.

/// Classify one slot given the active reservation at its exact start time,
/// if any.
pub fn classify_slot(
    now: DateTime<Utc>,
    date: &str,
    start_time: &str,
    reservation: Option<&Reservation>,
) -> SlotStatus {
    match reservation {
        Some(r) if r.status == ReservationStatus::Confirmed.as_str() => SlotStatus::Booked,
        Some(r) if r.status == ReservationStatus::Temporary.as_str() => {
            let unpaid = matches!(r.payment_status.as_str(), "unset" | "pending");
            if unpaid && clock::hold_is_stale(now, &r.created_at) {
                // Past TTL but not yet swept: flagged, never re-offered
                SlotStatus::HeldStale
            } else {
                SlotStatus::Held
            }
        }
        _ => {
            if clock::in_must_call_window(now, date, start_time) {
                SlotStatus::MustCall
            } else {
                SlotStatus::Available
            }
        }
    }
}

fn view_for(status: SlotStatus, start: &str, end: &str, call_phone: &str) -> SlotView {
    let (clickable, status_text, phone) = match status {
        SlotStatus::Available => (true, "Available".to_string(), None),
        SlotStatus::MustCall => (
            false,
            "Call to book".to_string(),
            Some(call_phone.to_string()),
        ),
        SlotStatus::Held => (false, "Reserved".to_string(), None),
        SlotStatus::HeldStale => (false, "Reserved (expiring)".to_string(), None),
        SlotStatus::Booked => (false, "Booked".to_string(), None),
    };
    SlotView {
        time: start.to_string(),
        end_time: end.to_string(),
        status,
        clickable,
        status_text,
        call_phone: phone,
    }
}

fn ranges_overlap(a_start: &str, a_end: &str, b_start: &str, b_end: &str) -> bool {
    a_start < b_end && b_start < a_end
}

/// Build the slot list for one date from already-fetched inputs. Pure, so the
/// classification rules are unit-testable with a fixed clock.
pub fn build_day(
    now: DateTime<Utc>,
    date: &str,
    templates: &[(String, String)],
    overrides: &[DateOverride],
    reservations: &[Reservation],
    caller: Option<CustomerIdentity>,
    call_phone: &str,
) -> Vec<SlotView> {
    if overrides
        .iter()
        .any(|o| o.kind == DateOverride::FULL_DAY_BLOCK)
    {
        return Vec::new();
    }

    let active: Vec<&Reservation> = reservations
        .iter()
        .filter(|r| r.status != ReservationStatus::Cancelled.as_str())
        .collect();
    let at_start = |start: &str| active.iter().find(|r| r.start_time == start).copied();

    // Keyed by start time; extra slots overwrite template slots at the same
    // start, so the extra slot's computed status wins the tie-break.
    let mut slots: BTreeMap<String, SlotView> = BTreeMap::new();

    for (start, end) in templates {
        if catalog::is_blocked(overrides, start, end) {
            continue;
        }
        let status = classify_slot(now, date, start, at_start(start));
        slots.insert(start.clone(), view_for(status, start, end, call_phone));
    }

    for o in overrides.iter().filter(|o| o.kind == DateOverride::EXTRA_SLOT) {
        let (Some(start), Some(end)) = (o.start_time.as_deref(), o.end_time.as_deref()) else {
            continue;
        };
        if catalog::is_blocked(overrides, start, end) {
            continue;
        }
        // Pinned extra slots are only visible to their customer
        if let Some(owner) = o.reserved_for_customer_id {
            if caller.map(|c| c.customer_id) != Some(owner) {
                continue;
            }
        }
        if let Some(r) = at_start(start) {
            let status = classify_slot(now, date, start, Some(r));
            slots.insert(start.to_string(), view_for(status, start, end, call_phone));
            continue;
        }
        // Overlapping (but not same-start) active reservation: not offered
        if active
            .iter()
            .any(|r| ranges_overlap(start, end, &r.start_time, &r.end_time))
        {
            slots.remove(start);
            continue;
        }
        let status = classify_slot(now, date, start, None);
        slots.insert(start.to_string(), view_for(status, start, end, call_phone));
    }

    slots.into_values().collect()
}

/// Weekday index used by slot templates: 0 = Monday .. 6 = Sunday.
fn weekday_index(date: &NaiveDate) -> i64 {
    date.weekday().num_days_from_monday() as i64
}

/// Compute availability for each requested date. A date with malformed or
/// missing catalog data yields an empty list; it never fails the whole query.
pub async fn compute_availability(
    db: &SqlitePool,
    clock: &dyn Clock,
    dates: &[String],
    caller: Option<CustomerIdentity>,
    call_phone: &str,
) -> BTreeMap<String, Vec<SlotView>> {
    let now = clock.now();
    let mut result = BTreeMap::new();

    for date in dates {
        let Ok(parsed) = NaiveDate::parse_from_str(date, "%Y-%m-%d") else {
            result.insert(date.clone(), Vec::new());
            continue;
        };

        let day = async {
            let templates = catalog::templates_for_weekday(db, weekday_index(&parsed)).await?;
            let overrides = catalog::overrides_for_date(db, date).await?;
            let reservations = sqlx::query_as::<_, Reservation>(
                "SELECT * FROM reservations
                 WHERE date = ? AND status IN ('temporary', 'confirmed')",
            )
            .bind(date)
            .fetch_all(db)
            .await?;

            let template_times: Vec<(String, String)> = templates
                .into_iter()
                .map(|t| (t.start_time, t.end_time))
                .collect();

            Ok::<_, crate::error::DomainError>(build_day(
                now,
                date,
                &template_times,
                &overrides,
                &reservations,
                caller,
                call_phone,
            ))
        }
        .await;

        match day {
            Ok(slots) => {
                result.insert(date.clone(), slots);
            }
            Err(e) => {
                tracing::warn!("availability for {} failed: {}", date, e);
                result.insert(date.clone(), Vec::new());
            }
        }
    }

    result
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::FixedClock;

    const PHONE: &str = "+46 8 123 456";

    fn reservation(start: &str, status: &str, payment: &str, created_at: &str) -> Reservation {
        let hour: u32 = start[..2].parse().unwrap();
        Reservation {
            id: 1,
            date: "2025-03-10".into(),
            start_time: start.into(),
            end_time: format!("{:02}:00", hour + 1),
            duration_minutes: 60,
            status: status.into(),
            payment_status: payment.into(),
            payment_method: None,
            customer_id: None,
            guest_name: None,
            guest_phone: None,
            guest_email: None,
            total_price: 700,
            created_at: created_at.into(),
            updated_at: created_at.into(),
        }
    }

    fn res_with_end(start: &str, end: &str, status: &str) -> Reservation {
        let mut r = reservation(start, status, "unset", "2025-03-10 06:00:00");
        r.end_time = end.into();
        r
    }

    fn extra(start: &str, end: &str, owner: Option<i64>) -> DateOverride {
        DateOverride {
            id: 9,
            date: "2025-03-10".into(),
            kind: DateOverride::EXTRA_SLOT.into(),
            start_time: Some(start.into()),
            end_time: Some(end.into()),
            reserved_for_customer_id: owner,
            reason: None,
        }
    }

    fn range_block(start: &str, end: &str) -> DateOverride {
        DateOverride {
            id: 8,
            date: "2025-03-10".into(),
            kind: DateOverride::RANGE_BLOCK.into(),
            start_time: Some(start.into()),
            end_time: Some(end.into()),
            reserved_for_customer_id: None,
            reason: None,
        }
    }

    fn templates() -> Vec<(String, String)> {
        vec![
            ("09:00".into(), "10:00".into()),
            ("10:00".into(), "11:00".into()),
            ("11:00".into(), "12:00".into()),
        ]
    }

    #[test]
    fn test_free_future_slot_is_available() {
        let clock = FixedClock::at("2025-03-10 06:00:00");
        let status = classify_slot(clock.now(), "2025-03-10", "10:00", None);
        assert_eq!(status, SlotStatus::Available);
    }

    #[test]
    fn test_free_slot_in_lead_window_is_must_call() {
        let clock = FixedClock::at("2025-03-10 09:00:00");
        let status = classify_slot(clock.now(), "2025-03-10", "10:00", None);
        assert_eq!(status, SlotStatus::MustCall);
    }

    #[test]
    fn test_fresh_hold_is_held() {
        let clock = FixedClock::at("2025-03-10 06:02:00");
        let r = reservation("10:00", "temporary", "unset", "2025-03-10 06:00:00");
        assert_eq!(
            classify_slot(clock.now(), "2025-03-10", "10:00", Some(&r)),
            SlotStatus::Held
        );
    }

    #[test]
    fn test_stale_hold_is_held_stale_not_available() {
        let clock = FixedClock::at("2025-03-10 06:10:00");
        let r = reservation("10:00", "temporary", "unset", "2025-03-10 06:00:00");
        assert_eq!(
            classify_slot(clock.now(), "2025-03-10", "10:00", Some(&r)),
            SlotStatus::HeldStale
        );
    }

    #[test]
    fn test_paid_temporary_is_never_stale() {
        let clock = FixedClock::at("2025-03-10 06:30:00");
        let r = reservation("10:00", "temporary", "paid", "2025-03-10 06:00:00");
        assert_eq!(
            classify_slot(clock.now(), "2025-03-10", "10:00", Some(&r)),
            SlotStatus::Held
        );
    }

    #[test]
    fn test_confirmed_is_booked() {
        let clock = FixedClock::at("2025-03-10 06:00:00");
        let r = reservation("10:00", "confirmed", "paid", "2025-03-10 05:00:00");
        assert_eq!(
            classify_slot(clock.now(), "2025-03-10", "10:00", Some(&r)),
            SlotStatus::Booked
        );
    }

    #[test]
    fn test_full_day_block_empties_day() {
        let clock = FixedClock::at("2025-03-10 06:00:00");
        let overrides = vec![DateOverride {
            id: 1,
            date: "2025-03-10".into(),
            kind: DateOverride::FULL_DAY_BLOCK.into(),
            start_time: None,
            end_time: None,
            reserved_for_customer_id: None,
            reason: None,
        }];
        let day = build_day(
            clock.now(),
            "2025-03-10",
            &templates(),
            &overrides,
            &[],
            None,
            PHONE,
        );
        assert!(day.is_empty());
    }

    #[test]
    fn test_range_block_removes_overlapping_templates() {
        let clock = FixedClock::at("2025-03-10 06:00:00");
        let overrides = vec![range_block("10:00", "11:00")];
        let day = build_day(
            clock.now(),
            "2025-03-10",
            &templates(),
            &overrides,
            &[],
            None,
            PHONE,
        );
        let times: Vec<&str> = day.iter().map(|s| s.time.as_str()).collect();
        assert_eq!(times, vec!["09:00", "11:00"]);
    }

    #[test]
    fn test_day_is_sorted_by_start_time() {
        let clock = FixedClock::at("2025-03-10 06:00:00");
        let overrides = vec![extra("08:00", "09:00", None)];
        let day = build_day(
            clock.now(),
            "2025-03-10",
            &templates(),
            &overrides,
            &[],
            None,
            PHONE,
        );
        let times: Vec<&str> = day.iter().map(|s| s.time.as_str()).collect();
        assert_eq!(times, vec!["08:00", "09:00", "10:00", "11:00"]);
    }

    #[test]
    fn test_extra_slot_wins_tie_break_over_template() {
        let clock = FixedClock::at("2025-03-10 06:00:00");
        // Extra slot at 10:00 runs 90 minutes where the template runs 60
        let overrides = vec![extra("10:00", "11:30", None)];
        let day = build_day(
            clock.now(),
            "2025-03-10",
            &templates(),
            &overrides,
            &[],
            None,
            PHONE,
        );
        let slot = day.iter().find(|s| s.time == "10:00").unwrap();
        assert_eq!(slot.end_time, "11:30");
    }

    #[test]
    fn test_pinned_extra_slot_hidden_from_strangers() {
        let clock = FixedClock::at("2025-03-10 06:00:00");
        let overrides = vec![extra("08:00", "09:00", Some(42))];

        let anon = build_day(
            clock.now(),
            "2025-03-10",
            &templates(),
            &overrides,
            &[],
            None,
            PHONE,
        );
        assert!(!anon.iter().any(|s| s.time == "08:00"));

        let other = build_day(
            clock.now(),
            "2025-03-10",
            &templates(),
            &overrides,
            &[],
            Some(CustomerIdentity { customer_id: 7 }),
            PHONE,
        );
        assert!(!other.iter().any(|s| s.time == "08:00"));

        let owner = build_day(
            clock.now(),
            "2025-03-10",
            &templates(),
            &overrides,
            &[],
            Some(CustomerIdentity { customer_id: 42 }),
            PHONE,
        );
        assert!(owner.iter().any(|s| s.time == "08:00"));
    }

    #[test]
    fn test_extra_slot_overlapping_reservation_not_offered() {
        let clock = FixedClock::at("2025-03-10 06:00:00");
        let overrides = vec![extra("08:30", "09:30", None)];
        let reservations = vec![res_with_end("09:00", "10:00", "confirmed")];
        let day = build_day(
            clock.now(),
            "2025-03-10",
            &templates(),
            &overrides,
            &reservations,
            None,
            PHONE,
        );
        assert!(!day.iter().any(|s| s.time == "08:30"));
    }

    #[test]
    fn test_must_call_exposes_phone() {
        let clock = FixedClock::at("2025-03-10 08:30:00");
        let day = build_day(
            clock.now(),
            "2025-03-10",
            &templates(),
            &[],
            &[],
            None,
            PHONE,
        );
        let slot = day.iter().find(|s| s.time == "09:00").unwrap();
        assert_eq!(slot.status, SlotStatus::MustCall);
        assert!(!slot.clickable);
        assert_eq!(slot.call_phone.as_deref(), Some(PHONE));
    }

    #[test]
    fn test_held_slot_not_clickable() {
        let clock = FixedClock::at("2025-03-10 06:02:00");
        let reservations = vec![reservation("10:00", "temporary", "unset", "2025-03-10 06:00:00")];
        let day = build_day(
            clock.now(),
            "2025-03-10",
            &templates(),
            &[],
            &reservations,
            None,
            PHONE,
        );
        let slot = day.iter().find(|s| s.time == "10:00").unwrap();
        assert_eq!(slot.status, SlotStatus::Held);
        assert!(!slot.clickable);
    }
}
