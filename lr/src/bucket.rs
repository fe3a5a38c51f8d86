//! Stream buckets
//!
//! A bucket is one minute of the upstream stream, named by its UTC start time
//! in `YYYYMMDDHHMM` form (e.g. `201001010000`).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeDelta, TimeZone, Timelike, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Textual bucket format
pub const BUCKET_FORMAT: &str = "%Y%m%d%H%M";

/// A bucket identifier could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid bucket '{0}': expected YYYYMMDDHHMM")]
pub struct ParseBucketError(pub String);

/// One minute-granularity unit of the source stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bucket(NaiveDateTime);

impl Bucket {
    /// Width of one bucket
    pub fn interval() -> TimeDelta {
        TimeDelta::minutes(1)
    }

    /// Bucket containing `dt`; seconds are truncated
    pub fn from_datetime(dt: NaiveDateTime) -> Self {
        let truncated = dt.with_second(0).and_then(|d| d.with_nanosecond(0)).unwrap_or(dt);
        Self(truncated)
    }

    pub fn next(self) -> Self {
        Self(self.0 + Self::interval())
    }

    pub fn prev(self) -> Self {
        Self(self.0 - Self::interval())
    }

    /// Whole intervals from `self` to `later` (negative if `later` is earlier)
    pub fn intervals_until(self, later: Bucket) -> i64 {
        (later.0 - self.0).num_minutes()
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.0)
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(BUCKET_FORMAT))
    }
}

impl FromStr for Bucket {
    type Err = ParseBucketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != 12 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseBucketError(s.to_string()));
        }
        NaiveDateTime::parse_from_str(s, BUCKET_FORMAT)
            .map(Self)
            .map_err(|_| ParseBucketError(s.to_string()))
    }
}

impl Serialize for Bucket {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Bucket {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(BucketVisitor)
    }
}

// Hand-edited YAML often leaves the timestamp unquoted, which parses as an integer.
struct BucketVisitor;

impl Visitor<'_> for BucketVisitor {
    type Value = Bucket;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a YYYYMMDDHHMM bucket timestamp")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Bucket, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Bucket, E> {
        self.visit_str(&v.to_string())
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Bucket, E> {
        self.visit_str(&v.to_string())
    }
}
