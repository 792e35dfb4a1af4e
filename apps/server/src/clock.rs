use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};

// ── Booking policy ──

/// How long an unpaid hold blocks a slot before it is considered stale.
pub const HOLD_TTL_MINUTES: i64 = 5;

/// Lead time before a slot's start during which self-service booking is
/// disabled and customers must call instead.
pub const MUST_CALL_LEAD_MINUTES: i64 = 120;

/// Lifetime of a payment callback token. Independent of the hold TTL:
/// checkout may legitimately outlive a hold's base life.
pub const CALLBACK_TOKEN_TTL_MINUTES: i64 = 30;

/// How long cancelled reservations are retained before the sweep purges them.
pub const CANCELLED_RETENTION_MINUTES: i64 = 15;

/// Injectable time source. All TTL and lead-time checks go through this so
/// tests can simulate time passage deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Format used for `created_at`/`updated_at` columns.
pub const DB_DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_db_datetime(dt: DateTime<Utc>) -> String {
    dt.format(DB_DATETIME_FMT).to_string()
}

pub fn parse_db_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, DB_DATETIME_FMT).ok()
}

/// Combine a `YYYY-MM-DD` date and `HH:MM` time into a naive datetime.
/// Returns `None` on malformed input.
pub fn slot_start_datetime(date: &str, time: &str) -> Option<NaiveDateTime> {
    let d = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let t = NaiveTime::parse_from_str(time, "%H:%M").ok()?;
    Some(d.and_time(t))
}

/// True when the slot starts within the must-call lead time (or has already
/// started). Only slots strictly more than the lead time away are bookable,
/// so exactly two hours out still means calling. Malformed input counts as
/// inside the window: we never offer a slot we cannot place in time.
pub fn in_must_call_window(now: DateTime<Utc>, date: &str, time: &str) -> bool {
    match slot_start_datetime(date, time) {
        Some(start) => start - now.naive_utc() <= Duration::minutes(MUST_CALL_LEAD_MINUTES),
        None => true,
    }
}

/// True when a hold created at `created_at` has outlived the hold TTL.
pub fn hold_is_stale(now: DateTime<Utc>, created_at: &str) -> bool {
    match parse_db_datetime(created_at) {
        Some(created) => now.naive_utc() - created > Duration::minutes(HOLD_TTL_MINUTES),
        None => true,
    }
}

/// Cutoff timestamp for the sweep's stale predicate: holds created before
/// this instant are stale.
pub fn stale_cutoff(now: DateTime<Utc>) -> String {
    format_db_datetime(now - Duration::minutes(HOLD_TTL_MINUTES))
}

/// Cutoff for purging cancelled reservations.
pub fn retention_cutoff(now: DateTime<Utc>) -> String {
    format_db_datetime(now - Duration::minutes(CANCELLED_RETENTION_MINUTES))
}

/// Expiry timestamp for a callback token issued now.
pub fn callback_token_expiry(now: DateTime<Utc>) -> String {
    format_db_datetime(now + Duration::minutes(CALLBACK_TOKEN_TTL_MINUTES))
}

/// True when a stored token expiry lies in the past (or cannot be parsed).
pub fn token_expired(now: DateTime<Utc>, expires_at: &str) -> bool {
    match parse_db_datetime(expires_at) {
        Some(exp) => now.naive_utc() > exp,
        None => true,
    }
}

// ── Tests ──
