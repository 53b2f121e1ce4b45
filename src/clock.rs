//! Wall-clock source and local-time helpers.
//!
//! The device keeps UTC and applies `localeOffset` hours for anything a person
//! reads: row timestamps, the date in a log file name and the quiet-hours check.

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to one instant, for tests and replays
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Convert a UTC instant into local time for the given offset in hours
pub fn to_local(now: DateTime<Utc>, offset_hours: i32) -> DateTime<FixedOffset> {
    let offset = FixedOffset::east_opt(offset_hours * 3600).unwrap_or_else(|| Utc.fix());
    now.with_timezone(&offset)
}

/// Local calendar date
pub fn local_date(now: DateTime<Utc>, offset_hours: i32) -> NaiveDate {
    to_local(now, offset_hours).date_naive()
}

/// Row timestamp: local date-time with millisecond precision
pub fn format_timestamp(now: DateTime<Utc>, offset_hours: i32) -> String {
    to_local(now, offset_hours)
        .format("%Y-%m-%d %H:%M:%S%.3f")
        .to_string()
}

/// Milliseconds since the Unix epoch
pub fn epoch_millis(now: DateTime<Utc>) -> i64 {
    now.timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn test_local_date_crosses_midnight() {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 23, 30, 0).unwrap();
        assert_eq!(local_date(now, 0), NaiveDate::from_ymd_opt(2026, 10, 16).unwrap());
        assert_eq!(local_date(now, 2), NaiveDate::from_ymd_opt(2026, 10, 17).unwrap());
        assert_eq!(local_date(now, -1), NaiveDate::from_ymd_opt(2026, 10, 16).unwrap());
    }

    #[test]
    fn test_format_timestamp() {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 8, 5, 9).unwrap();
        assert_eq!(format_timestamp(now, 0), "2026-10-16 08:05:09.000");
        assert_eq!(format_timestamp(now, 3), "2026-10-16 11:05:09.000");
    }

    #[test]
    fn test_to_local_hour() {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 22, 30, 0).unwrap();
        assert_eq!(to_local(now, 2).hour(), 0);
    }
}
