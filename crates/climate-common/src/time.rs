//! Date and time handling for requests and dataset time axes.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ExplorerError, ExplorerResult};

/// Canonical date representation used in cache keys and the catalog.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Canonical timestamp representation used in artifacts.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Parse a calendar date.
///
/// Accepts `YYYY-MM-DD` as well as full timestamps (ISO 8601 with or
/// without offset), keeping only the date part. The date is the one
/// written in the string: an offset never moves it to another day.
/// Impossible calendar dates such as `2020-02-30` are rejected.
pub fn parse_date(s: &str) -> ExplorerResult<NaiveDate> {
    let s = s.trim();

    if let Ok(date) = NaiveDate::parse_from_str(s, DATE_FORMAT) {
        return Ok(date);
    }

    if s.len() > 10 {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(dt.date_naive());
        }

        if let Ok(ts) = parse_timestamp(s) {
            return Ok(ts.date());
        }
    }

    Err(ExplorerError::InvalidRequest(format!(
        "'{}' is not a valid calendar date (expected YYYY-MM-DD)",
        s
    )))
}

/// Parse an ISO 8601 timestamp into a naive (UTC) datetime.
pub fn parse_timestamp(s: &str) -> ExplorerResult<NaiveDateTime> {
    let s = s.trim();

    // Full datetime with timezone
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_utc());
    }

    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(ndt);
        }
    }

    // Date only
    if let Ok(date) = NaiveDate::parse_from_str(s, DATE_FORMAT) {
        return Ok(date.and_time(chrono::NaiveTime::MIN));
    }

    Err(ExplorerError::InvalidRequest(format!(
        "invalid timestamp: {}",
        s
    )))
}

/// Format a timestamp in the canonical artifact representation.
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Format a date in the canonical `YYYY-MM-DD` representation.
pub fn format_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Serde helper accepting any representation understood by [`parse_date`].
pub fn deserialize_date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_date(&raw).map_err(serde::de::Error::custom)
}

/// An inclusive range of calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(deserialize_with = "deserialize_date")]
    pub start: NaiveDate,
    #[serde(deserialize_with = "deserialize_date")]
    pub end: NaiveDate,
}

impl DateRange {
    /// Create a range, failing with `InvalidRange` when `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> ExplorerResult<Self> {
        if start > end {
            return Err(ExplorerError::InvalidRange {
                start: format_date(&start),
                end: format_date(&end),
            });
        }
        Ok(Self { start, end })
    }

    /// A range covering a single day.
    pub fn single(day: NaiveDate) -> Self {
        Self { start: day, end: day }
    }

    /// Whether a timestamp falls on a day within the range.
    pub fn contains(&self, ts: &NaiveDateTime) -> bool {
        let day = ts.date();
        day >= self.start && day <= self.end
    }

    pub fn num_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

/// CF-convention time units (`<unit> since <reference>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfTimeUnits {
    pub seconds_per_unit: i64,
    pub reference: NaiveDateTime,
}

impl CfTimeUnits {
    /// Parse strings such as `hours since 1900-01-01 00:00:00.0`.
    pub fn parse(units: &str) -> ExplorerResult<Self> {
        let (unit, reference) = units.trim().split_once(" since ").ok_or_else(|| {
            ExplorerError::invalid_source(format!("unsupported time units '{}'", units))
        })?;

        let seconds_per_unit = match unit.trim().to_lowercase().as_str() {
            "seconds" | "second" | "secs" | "s" => 1,
            "minutes" | "minute" | "mins" => 60,
            "hours" | "hour" | "hrs" | "h" => 3_600,
            "days" | "day" | "d" => 86_400,
            other => {
                return Err(ExplorerError::invalid_source(format!(
                    "unsupported time unit '{}'",
                    other
                )))
            }
        };

        let reference = parse_timestamp(reference.trim().trim_end_matches('Z'))
            .map_err(|_| ExplorerError::invalid_source(format!("invalid time reference in '{}'", units)))?;

        Ok(Self {
            seconds_per_unit,
            reference,
        })
    }

    /// Convert an offset in these units to a timestamp.
    pub fn to_timestamp(&self, offset: f64) -> ExplorerResult<NaiveDateTime> {
        if !offset.is_finite() {
            return Err(ExplorerError::invalid_source("non-finite time coordinate"));
        }
        let millis = (offset * self.seconds_per_unit as f64 * 1000.0).round();
        if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
            return Err(ExplorerError::invalid_source("time coordinate out of range"));
        }
        Duration::try_milliseconds(millis as i64)
            .and_then(|d| self.reference.checked_add_signed(d))
            .ok_or_else(|| ExplorerError::invalid_source("time coordinate out of range"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_date_representations() {
        let expected = NaiveDate::from_ymd_opt(2020, 1, 15).unwrap();
        assert_eq!(parse_date("2020-01-15").unwrap(), expected);
        assert_eq!(parse_date("2020-01-15T12:30:00").unwrap(), expected);
        assert_eq!(parse_date("2020-01-15T00:00:00Z").unwrap(), expected);
        assert_eq!(parse_date(" 2020-01-15 ").unwrap(), expected);
    }

    #[test]
    fn test_parse_date_rejects_impossible_dates() {
        assert!(matches!(
            parse_date("2020-02-30"),
            Err(ExplorerError::InvalidRequest(_))
        ));
        assert!(parse_date("2021-02-29").is_err());
        assert!(parse_date("not a date").is_err());
        assert!(parse_date("2020-02-29").is_ok());
    }

    #[test]
    fn test_parse_date_keeps_written_day_with_offset() {
        let expected = NaiveDate::from_ymd_opt(2020, 1, 31).unwrap();
        assert_eq!(parse_date("2020-01-31T23:00:00-05:00").unwrap(), expected);
        assert_eq!(parse_date("2020-01-31T01:00:00+09:00").unwrap(), expected);
    }

    #[test]
    fn test_date_range_validation() {
        let a = NaiveDate::from_ymd_opt(2020, 1, 31).unwrap();
        let b = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        assert!(matches!(
            DateRange::new(a, b),
            Err(ExplorerError::InvalidRange { .. })
        ));

        let range = DateRange::new(b, a).unwrap();
        assert_eq!(range.num_days(), 31);
        assert!(range.contains(&a.and_hms_opt(23, 0, 0).unwrap()));
        assert!(!range.contains(&NaiveDate::from_ymd_opt(2020, 2, 1).unwrap().and_hms_opt(0, 0, 0).unwrap()));
    }

    #[test]
    fn test_cf_time_units() {
        let units = CfTimeUnits::parse("hours since 1900-01-01 00:00:00.0").unwrap();
        assert_eq!(units.seconds_per_unit, 3600);

        let ts = units.to_timestamp(1_051_896.0).unwrap();
        assert_eq!(ts.year(), 2020);
        assert_eq!(ts.month(), 1);
        assert_eq!(ts.day(), 1);
        assert_eq!(ts.hour(), 0);

        let days = CfTimeUnits::parse("days since 2000-01-01").unwrap();
        let ts = days.to_timestamp(1.5).unwrap();
        assert_eq!(ts, NaiveDate::from_ymd_opt(2000, 1, 2).unwrap().and_hms_opt(12, 0, 0).unwrap());

        assert!(CfTimeUnits::parse("fortnights since 2000-01-01").is_err());
        assert!(CfTimeUnits::parse("hours").is_err());
    }

    #[test]
    fn test_cf_offsets_out_of_range_are_invalid_source() {
        let units = CfTimeUnits::parse("hours since 1900-01-01").unwrap();
        for offset in [1e30, -1e30, 1e15, f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(
                matches!(units.to_timestamp(offset), Err(ExplorerError::InvalidSource(_))),
                "offset {} should be rejected",
                offset
            );
        }
    }
}
