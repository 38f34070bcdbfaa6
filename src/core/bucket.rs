//! Daily UTC partitioning of metric timestamps.
//!
//! Every row is written to, and every range read is bounded by, the calendar
//! day (UTC) its timestamp falls on. The bucket is always derived from the
//! timestamp and never supplied by a caller, so two rows with the same
//! timestamp are guaranteed to live in the same partition.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::{PulseError, Result};

const BUCKET_FORMAT: &str = "%Y-%m-%d";

/// A daily partition, rendered as `YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeBucket(NaiveDate);

impl TimeBucket {
    /// The calendar date of this bucket.
    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// Inclusive lower bound of the bucket.
    pub fn start(&self) -> DateTime<Utc> {
        self.0.and_time(chrono::NaiveTime::MIN).and_utc()
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(BUCKET_FORMAT))
    }
}

impl FromStr for TimeBucket {
    type Err = PulseError;

    fn from_str(s: &str) -> Result<Self> {
        NaiveDate::parse_from_str(s, BUCKET_FORMAT)
            .map(TimeBucket)
            .map_err(|e| PulseError::validation(format!("Invalid time bucket '{}': {}", s, e)))
    }
}

impl TryFrom<String> for TimeBucket {
    type Error = PulseError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TimeBucket> for String {
    fn from(bucket: TimeBucket) -> Self {
        bucket.to_string()
    }
}

/// Map an instant to the daily partition it belongs to.
pub fn bucket(timestamp: DateTime<Utc>) -> TimeBucket {
    TimeBucket(timestamp.date_naive())
}

/// Number of calendar-day boundaries crossed between two instants.
pub fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to.date_naive() - from.date_naive()).num_days()
}

/// Every daily bucket touched by `[from, to]`, oldest first.
///
/// An inverted range yields no buckets.
pub fn enumerate_buckets(from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<TimeBucket> {
    if from > to {
        return Vec::new();
    }

    let last = to.date_naive();
    from.date_naive()
        .iter_days()
        .take_while(|day| *day <= last)
        .map(TimeBucket)
        .collect()
}

/// Convert a millisecond epoch value into an instant.
pub fn timestamp_from_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

/// Convert an OTLP `time_unix_nano` into a millisecond-precision instant.
///
/// Sub-millisecond precision is truncated by integer division.
pub fn timestamp_from_unix_nanos(nanos: u64) -> Option<DateTime<Utc>> {
    let millis = i64::try_from(nanos / 1_000_000).ok()?;
    timestamp_from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(millis: i64) -> DateTime<Utc> {
        timestamp_from_millis(millis).unwrap()
    }

    #[test]
    fn test_bucket_is_utc_calendar_day() {
        // 2023-11-14T22:13:20Z
        assert_eq!(bucket(at(1_700_000_000_000)).to_string(), "2023-11-14");
        // Last and first millisecond of a day
        assert_eq!(bucket(at(1_700_006_399_999)).to_string(), "2023-11-14");
        assert_eq!(bucket(at(1_700_006_400_000)).to_string(), "2023-11-15");
    }

    #[test]
    fn test_same_day_same_bucket() {
        let midnight = at(1_699_920_000_000); // 2023-11-14T00:00:00Z
        for offset in [0, 1, 3_600_000, 43_200_000, 86_399_999] {
            assert_eq!(bucket(midnight), bucket(at(1_699_920_000_000 + offset)));
        }
        assert_ne!(bucket(midnight), bucket(at(1_699_920_000_000 + 86_400_000)));
    }

    #[test]
    fn test_enumerate_single_day() {
        let t = at(1_700_000_000_000);
        let buckets = enumerate_buckets(t, t);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].to_string(), "2023-11-14");
    }

    #[test]
    fn test_enumerate_spans_month_boundary() {
        let from = "2023-10-30T23:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let to = "2023-11-02T01:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let buckets: Vec<String> = enumerate_buckets(from, to).iter().map(ToString::to_string).collect();
        assert_eq!(buckets, vec!["2023-10-30", "2023-10-31", "2023-11-01", "2023-11-02"]);
        assert_eq!(buckets.len() as i64, days_between(from, to) + 1);
    }

    #[test]
    fn test_enumerate_inverted_range_is_empty() {
        assert!(enumerate_buckets(at(1_700_000_000_001), at(1_700_000_000_000)).is_empty());
    }

    #[test]
    fn test_enumerate_length_matches_days_between() {
        let from = at(1_690_000_000_000);
        for days in [0_i64, 1, 2, 30, 365] {
            let to = at(1_690_000_000_000 + days * 86_400_000);
            assert_eq!(enumerate_buckets(from, to).len() as i64, days_between(from, to) + 1);
        }
    }

    #[test]
    fn test_nanos_truncate_to_millis() {
        let ts = timestamp_from_unix_nanos(1_700_000_000_123_999_999).unwrap();
        assert_eq!(ts.timestamp_millis(), 1_700_000_000_123);
    }

    #[test]
    fn test_parse_round_trip() {
        let b: TimeBucket = "2024-02-29".parse().unwrap();
        assert_eq!(b.to_string(), "2024-02-29");
        assert_eq!(b.start().timestamp_millis(), 1_709_164_800_000);
        assert!("2024-13-01".parse::<TimeBucket>().is_err());
    }
}
