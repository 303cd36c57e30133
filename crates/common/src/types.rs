//! The one internal sample representation. Upstream duck-typed JSON (mixed
//! camelCase/snake_case, ms timestamps, `point_name` vs `point`) is
//! normalized into this shape exactly once, at `upstream_client`'s response
//! boundary. Nothing downstream of that boundary -- hot store, cold store,
//! query router -- ever looks at the upstream wire format again.

use std::{
    fmt,
    ops::Deref,
};

use errors::ErrorMetadata;
use serde::{
    Deserialize,
    Serialize,
};

/// An opaque building/site identifier. Never parsed, never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SiteId(String);

impl SiteId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for SiteId {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SiteId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SiteId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An opaque upstream point (channel) name. Preserved byte-exact from
/// upstream through to query responses -- invariant 4 of the data model.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PointName(String);

impl PointName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Deref for PointName {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PointName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PointName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Seconds since the Unix epoch. All internal storage and comparisons use
/// second precision; millisecond timestamps from the wire are floored to
/// seconds at the upstream boundary.
pub type TimestampSecs = i64;

/// A finite real value. Rejects NaN and +/-infinity at construction, per
/// the sample data model invariant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleValue(f64);

impl SampleValue {
    pub fn new(v: f64) -> anyhow::Result<Self> {
        if !v.is_finite() {
            anyhow::bail!(ErrorMetadata::bad_request(
                "NonFiniteSampleValue",
                format!("sample value must be finite, got {v}"),
            ));
        }
        Ok(Self(v))
    }

    pub fn get(self) -> f64 {
        self.0
    }
}

/// The atomic unit: `(site, point, timestamp, value)`. `site` is carried by
/// context (hot/cold store APIs are always scoped to one site) rather than
/// embedded in every `Sample`, since nearly every operation in this system
/// is site-scoped; the wire/storage layers that need it alongside the
/// sample tuple it explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub point: PointName,
    pub timestamp: TimestampSecs,
    pub value: SampleValue,
}

impl Sample {
    pub fn new(point: impl Into<PointName>, timestamp: TimestampSecs, value: f64) -> anyhow::Result<Self> {
        Ok(Self { point: point.into(), timestamp, value: SampleValue::new(value)? })
    }

    /// Dedup key within a hot-tier site or a cold-tier chunk.
    pub fn dedup_key(&self) -> (&str, TimestampSecs) {
        (self.point.as_str(), self.timestamp)
    }
}

/// An inclusive-exclusive `[start, end)` range in seconds since epoch.
/// Queries and fetch windows are expressed in this type so that boundary
/// semantics (does `t_end` fall in HOT or COLD) are decided in one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: TimestampSecs,
    pub end: TimestampSecs,
}

impl TimeRange {
    pub fn new(start: TimestampSecs, end: TimestampSecs) -> anyhow::Result<Self> {
        if start > end {
            anyhow::bail!(ErrorMetadata::bad_request(
                "InvalidRange",
                format!("t_start ({start}) must be <= t_end ({end})"),
            ));
        }
        Ok(Self { start, end })
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn duration_days(&self) -> f64 {
        (self.end - self.start) as f64 / 86_400.0
    }

    pub fn contains(&self, ts: TimestampSecs) -> bool {
        ts >= self.start && ts < self.end
    }

    /// Split at `boundary`, returning `(pre, post)` sub-ranges clipped to
    /// this range. Either half is `None` if it would be empty.
    pub fn split_at(&self, boundary: TimestampSecs) -> (Option<TimeRange>, Option<TimeRange>) {
        if boundary <= self.start {
            (None, Some(*self))
        } else if boundary >= self.end {
            (Some(*self), None)
        } else {
            (Some(TimeRange { start: self.start, end: boundary }), Some(TimeRange { start: boundary, end: self.end }))
        }
    }
}

/// Which tier(s) a query result was drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataSource {
    Hot,
    Cold,
    Both,
    Cache,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataSource::Hot => "HOT",
            DataSource::Cold => "COLD",
            DataSource::Both => "BOTH",
            DataSource::Cache => "CACHE",
        };
        f.write_str(s)
    }
}

/// One entry in a bounded, TTL-expiring operator diagnostics log -- shared
/// shape for ETL sync's `error_log[]` and backfill's `errors[]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub at: TimestampSecs,
    pub message: String,
}

impl ErrorLogEntry {
    pub fn new(at: TimestampSecs, message: impl Into<String>) -> Self {
        Self { at, message: message.into() }
    }
}

/// Push `entry` onto `log`, then enforce both a max length (keeping the
/// most recent entries) and a TTL relative to `now`. Shared by every
/// bounded error log in the system so the retention policy can't drift
/// between components.
pub fn push_bounded_log(log: &mut Vec<ErrorLogEntry>, entry: ErrorLogEntry, max_len: usize, ttl_seconds: i64, now: TimestampSecs) {
    log.push(entry);
    log.retain(|e| now - e.at <= ttl_seconds);
    if log.len() > max_len {
        let excess = log.len() - max_len;
        log.drain(0..excess);
    }
}

/// How the query router decided to plan a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryStrategy {
    HotOnly,
    ColdOnly,
    Split,
    Legacy,
}

impl fmt::Display for QueryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueryStrategy::HotOnly => "HOT_ONLY",
            QueryStrategy::ColdOnly => "COLD_ONLY",
            QueryStrategy::Split => "SPLIT",
            QueryStrategy::Legacy => "LEGACY",
        };
        f.write_str(s)
    }
}
