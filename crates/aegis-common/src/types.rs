//! Aegis Types - Core Data Types
//!
//! Fundamental data types shared by the storage engine and the historian
//! stores. Provides scoped identifiers, time sentinels, validity extents,
//! query time ranges and a generic value type for descriptive payloads.
//!
//! Key Features:
//! - Scoped identifiers (BigId) with a 63-bit local id
//! - Time sentinels for timeless versions and "latest" lookups
//! - Half-open validity extents and closed query ranges
//! - Serialization support via serde
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// =============================================================================
// Time Sentinels
// =============================================================================

/// Earliest representable instant.
pub const TIME_MIN: DateTime<Utc> = DateTime::<Utc>::MIN_UTC;

/// Latest representable instant. Reserved for "latest version" lookups.
pub const TIME_MAX: DateTime<Utc> = DateTime::<Utc>::MAX_UTC;

/// Valid start assigned to entities that do not declare a valid time.
pub const TIMELESS: DateTime<Utc> = TIME_MIN;

// =============================================================================
// Identifier Types
// =============================================================================

/// Largest local id that fits the 63-bit identifier space.
pub const MAX_LOCAL_ID: u64 = i64::MAX as u64;

/// Scoped identifier: the scope names the owning store instance, the local
/// id is unique within that scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BigId {
    pub scope: u32,
    pub id: u64,
}

impl BigId {
    pub const fn new(scope: u32, id: u64) -> Self {
        Self { scope, id }
    }

    /// Placeholder used where a reference is optional, e.g. "no parent".
    pub const NONE: BigId = BigId { scope: 0, id: 0 };

    pub fn is_none(&self) -> bool {
        self.id == 0
    }
}

impl fmt::Display for BigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.id)
    }
}

// =============================================================================
// Value Types
// =============================================================================

/// Generic value used for descriptive properties and record results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    #[serde(with = "serde_bytes")]
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    Array(Vec<Value>),
    Object(HashMap<String, Value>),
}

impl Value {
    /// Returns the type name of this value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Timestamp(_) => "timestamp",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

// =============================================================================
// Validity Extent
// =============================================================================

/// Validity interval `[begin, end)` of one entity version.
///
/// `end == None` means the interval is still open. An extent whose end
/// equals its begin denotes a single instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeExtent {
    pub begin: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeExtent {
    pub fn new(begin: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { begin, end: Some(end) }
    }

    /// Open-ended extent starting at `begin`.
    pub fn open(begin: DateTime<Utc>) -> Self {
        Self { begin, end: None }
    }

    pub fn instant(t: DateTime<Utc>) -> Self {
        Self { begin: t, end: Some(t) }
    }

    /// Extent covering all of time.
    pub fn always() -> Self {
        Self::open(TIME_MIN)
    }

    pub fn is_open_ended(&self) -> bool {
        self.end.is_none()
    }

    pub fn is_instant(&self) -> bool {
        self.end == Some(self.begin)
    }

    pub fn contains(&self, t: &DateTime<Utc>) -> bool {
        match self.end {
            None => *t >= self.begin,
            Some(end) if end == self.begin => *t == self.begin,
            Some(end) => *t >= self.begin && *t < end,
        }
    }

    /// True if the extent shares at least one instant with the closed
    /// range `range`.
    pub fn intersects(&self, range: &TimeRange) -> bool {
        if self.begin > range.end {
            return false;
        }
        match self.end {
            None => true,
            Some(end) if end == self.begin => end >= range.start,
            Some(end) => end > range.start,
        }
    }
}

impl fmt::Display for TimeExtent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "{}/{}", self.begin.to_rfc3339(), end.to_rfc3339()),
            None => write!(f, "{}/..", self.begin.to_rfc3339()),
        }
    }
}

// =============================================================================
// Time Range
// =============================================================================

/// Closed time range `[start, end]` used by query filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Range covering all representable instants.
    pub fn all() -> Self {
        Self::new(TIME_MIN, TIME_MAX)
    }

    pub fn at(t: DateTime<Utc>) -> Self {
        Self::new(t, t)
    }

    pub fn contains(&self, timestamp: &DateTime<Utc>) -> bool {
        timestamp >= &self.start && timestamp <= &self.end
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }

    /// Smallest range covering both `self` and `other`.
    pub fn union(&self, other: &TimeRange) -> TimeRange {
        TimeRange::new(self.start.min(other.start), self.end.max(other.end))
    }

    /// Instants in both ranges, or `None` if they do not overlap.
    pub fn intersection(&self, other: &TimeRange) -> Option<TimeRange> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start <= end).then(|| TimeRange::new(start, end))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_open_extent_contains_future() {
        let extent = TimeExtent::open(ts(100));
        assert!(extent.contains(&ts(100)));
        assert!(extent.contains(&ts(1_000_000)));
        assert!(!extent.contains(&ts(99)));
    }

    #[test]
    fn test_closed_extent_is_half_open() {
        let extent = TimeExtent::new(ts(100), ts(200));
        assert!(extent.contains(&ts(199)));
        assert!(!extent.contains(&ts(200)));
        assert!(extent.intersects(&TimeRange::new(ts(150), ts(300))));
        assert!(!extent.intersects(&TimeRange::new(ts(200), ts(300))));
    }

    #[test]
    fn test_instant_extent() {
        let extent = TimeExtent::instant(ts(50));
        assert!(extent.is_instant());
        assert!(extent.contains(&ts(50)));
        assert!(extent.intersects(&TimeRange::at(ts(50))));
        assert!(!extent.intersects(&TimeRange::new(ts(51), ts(60))));
    }

    #[test]
    fn test_range_intersection() {
        let data = TimeRange::new(ts(10), ts(50));
        assert_eq!(TimeRange::all().intersection(&data), Some(data));
        assert_eq!(
            data.intersection(&TimeRange::new(ts(40), ts(90))),
            Some(TimeRange::new(ts(40), ts(50)))
        );
        assert_eq!(data.intersection(&TimeRange::at(ts(50))), Some(TimeRange::at(ts(50))));
        assert!(data.intersection(&TimeRange::new(ts(51), ts(60))).is_none());
    }

    #[test]
    fn test_big_id_display() {
        assert_eq!(BigId::new(3, 42).to_string(), "3:42");
        assert!(BigId::NONE.is_none());
    }
}
