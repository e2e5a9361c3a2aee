//! Timestamp utilities
//!
//! The store keeps timestamps as epoch milliseconds so that range queries
//! (`due_date < now`) compare integers rather than formatted strings.

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Offset, TimeZone, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert a timestamp to epoch milliseconds for storage
pub fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// Convert stored epoch milliseconds back to a timestamp
///
/// Out-of-range values clamp to the Unix epoch rather than failing the read.
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// `ts` plus a whole number of days
pub fn add_days(ts: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    ts + Duration::days(days)
}

/// The instant at `hour:minute` local time on the local calendar day of `ts`
///
/// Local time is expressed as a fixed UTC offset, e.g. the business timezone
/// the sweep schedule is defined in.
pub fn at_local_time(ts: DateTime<Utc>, offset: FixedOffset, hour: u32, minute: u32) -> DateTime<Utc> {
    let local_date = ts.with_timezone(&offset).date_naive();
    let time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN);
    match offset.from_local_datetime(&local_date.and_time(time)).single() {
        Some(local) => local.with_timezone(&Utc),
        None => ts,
    }
}

/// Build a fixed offset from minutes east of UTC, falling back to UTC when out of range
pub fn offset_from_minutes(minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(minutes.saturating_mul(60)).unwrap_or_else(|| Utc.fix())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_round_trip_keeps_millisecond_precision() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap() + Duration::milliseconds(535);
        assert_eq!(from_millis(to_millis(ts)), ts);
    }

    #[test]
    fn test_add_days_crosses_month_boundary() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 31, 12, 0, 0).unwrap();
        assert_eq!(add_days(ts, 1), Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_at_local_time_uses_local_calendar_day() {
        // 22:00 UTC on the 9th is 02:00 on the 10th at UTC+4
        let offset = offset_from_minutes(240);
        let ts = Utc.with_ymd_and_hms(2026, 5, 9, 22, 0, 0).unwrap();
        let six_am = at_local_time(ts, offset, 6, 0);
        assert_eq!(six_am, Utc.with_ymd_and_hms(2026, 5, 10, 2, 0, 0).unwrap());
    }

    #[test]
    fn test_offset_from_minutes_out_of_range_falls_back_to_utc() {
        assert_eq!(offset_from_minutes(100_000).local_minus_utc(), 0);
    }
}
