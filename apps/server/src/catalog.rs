use sqlx::SqlitePool;

use crate::error::DomainError;
use crate::models::{DateOverride, SlotTemplate};

/// Read side of the slot catalog: weekly templates plus date overrides.
/// Admin CRUD lives in the admin handlers; the core only reads.

/// Active templates for one weekday (0 = Monday .. 6 = Sunday), ordered by
/// start time.
pub async fn templates_for_weekday(
    db: &SqlitePool,
    weekday: i64,
) -> Result<Vec<SlotTemplate>, DomainError> {
    let templates = sqlx::query_as::<_, SlotTemplate>(
        "SELECT id, weekday, start_time, end_time, active
         FROM slot_templates WHERE weekday = ? AND active = 1
         ORDER BY start_time ASC",
    )
    .bind(weekday)
    .fetch_all(db)
    .await?;
    Ok(templates)
}

/// All overrides for one date.
pub async fn overrides_for_date(
    db: &SqlitePool,
    date: &str,
) -> Result<Vec<DateOverride>, DomainError> {
    let overrides = sqlx::query_as::<_, DateOverride>(
        "SELECT id, date, kind, start_time, end_time, reserved_for_customer_id, reason
         FROM date_overrides WHERE date = ? ORDER BY start_time ASC",
    )
    .bind(date)
    .fetch_all(db)
    .await?;
    Ok(overrides)
}

/// True when `time..end` overlaps a half-open `[start_time, end_time)` range
/// block. Blocks missing either bound block nothing.
pub fn overlaps_range_block(block: &DateOverride, start: &str, end: &str) -> bool {
    match (block.start_time.as_deref(), block.end_time.as_deref()) {
        (Some(bs), Some(be)) => start < be && bs < end,
        _ => false,
    }
}

/// Whether a (start, end) range on `date` is blocked by any override.
pub fn is_blocked(overrides: &[DateOverride], start: &str, end: &str) -> bool {
    overrides.iter().any(|o| match o.kind.as_str() {
        DateOverride::FULL_DAY_BLOCK => true,
        DateOverride::RANGE_BLOCK => overlaps_range_block(o, start, end),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(kind: &str, start: Option<&str>, end: Option<&str>) -> DateOverride {
        DateOverride {
            id: 1,
            date: "2025-03-10".into(),
            kind: kind.into(),
            start_time: start.map(Into::into),
            end_time: end.map(Into::into),
            reserved_for_customer_id: None,
            reason: None,
        }
    }

    #[test]
    fn test_full_day_blocks_everything() {
        let overrides = vec![block(DateOverride::FULL_DAY_BLOCK, None, None)];
        assert!(is_blocked(&overrides, "10:00", "11:00"));
        assert!(is_blocked(&overrides, "23:00", "23:59"));
    }

    #[test]
    fn test_range_block_overlap() {
        let overrides = vec![block(
            DateOverride::RANGE_BLOCK,
            Some("10:00"),
            Some("12:00"),
        )];
        assert!(is_blocked(&overrides, "11:00", "12:00"));
        assert!(is_blocked(&overrides, "09:30", "10:30"));
    }

    #[test]
    fn test_range_block_adjacent_does_not_overlap() {
        let overrides = vec![block(
            DateOverride::RANGE_BLOCK,
            Some("10:00"),
            Some("12:00"),
        )];
        assert!(!is_blocked(&overrides, "12:00", "13:00"));
        assert!(!is_blocked(&overrides, "09:00", "10:00"));
    }

    #[test]
    fn test_extra_slot_never_blocks() {
        let overrides = vec![block(DateOverride::EXTRA_SLOT, Some("10:00"), Some("11:00"))];
        assert!(!is_blocked(&overrides, "10:00", "11:00"));
    }

    #[test]
    fn test_range_block_missing_bounds() {
        let overrides = vec![block(DateOverride::RANGE_BLOCK, None, Some("12:00"))];
        assert!(!is_blocked(&overrides, "10:00", "11:00"));
    }
}
