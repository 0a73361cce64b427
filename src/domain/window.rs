use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Timelike};
use thiserror::Error;

pub const QUERY_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Lets the upstream finish aggregating the most recent minute bucket.
const SETTLE_SECONDS: i64 = 60;

#[derive(Debug, Error, PartialEq)]
pub enum WindowError {
    #[error("lookback must be at least one hour")]
    EmptyLookback,
    #[error("window arithmetic overflowed for offset {offset_hours}h and lookback {lookback_hours}h")]
    OutOfRange { offset_hours: u32, lookback_hours: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryWindow {
    since: NaiveDateTime,
    until: NaiveDateTime,
}

impl QueryWindow {
    #[cfg(test)]
    pub fn since(&self) -> NaiveDateTime {
        self.since
    }

    #[cfg(test)]
    pub fn until(&self) -> NaiveDateTime {
        self.until
    }

    pub fn format_since(&self) -> String {
        self.since.format(QUERY_DATETIME_FORMAT).to_string()
    }

    pub fn format_until(&self) -> String {
        self.until.format(QUERY_DATETIME_FORMAT).to_string()
    }
}

pub fn build_window<Tz: TimeZone>(
    now: DateTime<Tz>,
    offset_hours: u32,
    lookback_hours: u32,
) -> Result<QueryWindow, WindowError> {
    if lookback_hours == 0 {
        return Err(WindowError::EmptyLookback);
    }

    let out_of_range = || WindowError::OutOfRange {
        offset_hours,
        lookback_hours,
    };

    let now = now.with_nanosecond(0).ok_or_else(out_of_range)?;
    let offset = Duration::hours(i64::from(offset_hours));
    let lookback = Duration::hours(i64::from(lookback_hours));

    let until = now
        .clone()
        .checked_sub_signed(offset + Duration::seconds(SETTLE_SECONDS))
        .ok_or_else(out_of_range)?;
    let since = now
        .checked_sub_signed(offset + lookback - Duration::seconds(1))
        .ok_or_else(out_of_range)?;

    Ok(QueryWindow {
        since: since.naive_local(),
        until: until.naive_local(),
    })
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, NaiveDate, TimeZone, Utc};

    use super::{QueryWindow, WindowError, build_window};

    fn at(h: u32, m: u32, s: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 10)
            .and_then(|d| d.and_hms_opt(h, m, s))
            .expect("valid datetime")
    }

    #[test]
    fn one_hour_lookback_without_offset() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 30, 0).unwrap();
        let window = build_window(now, 0, 1).expect("window should build");

        assert_eq!(window.until(), at(12, 29, 0));
        assert_eq!(window.since(), at(11, 30, 1));
        assert!(window.since() < window.until());
    }

    #[test]
    fn offset_shifts_both_bounds() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 30, 0).unwrap();
        let window = build_window(now, 2, 18).expect("window should build");

        assert_eq!(window.until(), at(10, 29, 0));
        assert_eq!(
            window.since(),
            NaiveDate::from_ymd_opt(2024, 3, 9)
                .and_then(|d| d.and_hms_opt(16, 30, 1))
                .unwrap()
        );
    }

    #[test]
    fn formats_in_the_zone_of_now() {
        let zone = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = Utc
            .with_ymd_and_hms(2024, 3, 10, 10, 30, 0)
            .unwrap()
            .with_timezone(&zone);
        let window: QueryWindow = build_window(now, 0, 1).expect("window should build");

        assert_eq!(window.format_until(), "2024-03-10 12:29:00");
        assert_eq!(window.format_since(), "2024-03-10 11:30:01");
    }

    #[test]
    fn drops_sub_second_precision() {
        let now = Utc.timestamp_opt(1_710_073_800, 750_000_000).unwrap();
        let window = build_window(now, 0, 1).expect("window should build");

        assert_eq!(window.format_until(), "2024-03-10 12:29:00");
    }

    #[test]
    fn rejects_zero_lookback() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 30, 0).unwrap();
        assert_eq!(build_window(now, 0, 0), Err(WindowError::EmptyLookback));
    }

    #[test]
    fn since_is_always_before_until() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 30, 0).unwrap();
        for offset in [0, 1, 5, 48] {
            for lookback in [1, 2, 18, 72] {
                let window = build_window(now, offset, lookback).expect("window should build");
                assert!(window.since() < window.until(), "offset {offset} lookback {lookback}");
            }
        }
    }
}
