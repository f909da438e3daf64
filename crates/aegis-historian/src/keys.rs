//! Aegis Keys - Composite Key Schemes
//!
//! One key type per store family, decoded once at the store boundary.
//! Every key implements `MapKey` with a byte encoding whose order matches
//! the derived (or hand-written) `Ord`:
//!
//! - `EntityKey`: parent id, local id, valid start ascending
//! - `ChannelKey`: owner id, channel name, valid start descending, local id
//! - `SeriesKey`: stream id, sub-entity id, result time
//! - `SubSeriesKey`: sub-entity id, stream id, result time
//! - `RecordKey`: series id, timestamp
//! - `CommandStatusKey`: command record key, report time
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use aegis_common::{AegisError, BigId, Result, TIMELESS, TIME_MAX, TIME_MIN};
use aegis_storage::encoding::{
    get_str, get_timestamp, get_timestamp_desc, get_varint, put_str, put_timestamp, put_timestamp_desc,
    put_varint,
};
use aegis_storage::MapKey;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::fmt;

/// Largest local id usable as an exclusive scan bound.
pub(crate) const MAX_ID: u64 = u64::MAX;

// =============================================================================
// Entity Keys
// =============================================================================

/// Public key of one entity version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeatureKey {
    pub internal_id: BigId,
    pub valid_start: DateTime<Utc>,
}

impl FeatureKey {
    pub fn new(internal_id: BigId, valid_start: DateTime<Utc>) -> Self {
        Self { internal_id, valid_start }
    }

    /// Key of a version that does not declare a valid time.
    pub fn timeless(internal_id: BigId) -> Self {
        Self::new(internal_id, TIMELESS)
    }

    pub fn is_timeless(&self) -> bool {
        self.valid_start == TIMELESS
    }
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_timeless() {
            write!(f, "{}", self.internal_id)
        } else {
            write!(f, "{}@{}", self.internal_id, self.valid_start.to_rfc3339())
        }
    }
}

/// Storage key of one entity version. Parent 0 means "no parent".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub parent_id: u64,
    pub internal_id: u64,
    pub valid_start: DateTime<Utc>,
}

impl EntityKey {
    pub fn new(parent_id: u64, internal_id: u64, valid_start: DateTime<Utc>) -> Self {
        Self { parent_id, internal_id, valid_start }
    }

    pub fn same_entity(&self, other: &EntityKey) -> bool {
        self.parent_id == other.parent_id && self.internal_id == other.internal_id
    }

    /// First and last possible key of every version of one entity.
    pub fn entity_bounds(parent_id: u64, internal_id: u64) -> (EntityKey, EntityKey) {
        (
            EntityKey::new(parent_id, internal_id, TIME_MIN),
            EntityKey::new(parent_id, internal_id, TIME_MAX),
        )
    }
}

impl MapKey for EntityKey {
    fn encode_key(&self, buf: &mut Vec<u8>) {
        put_varint(buf, self.parent_id);
        put_varint(buf, self.internal_id);
        put_timestamp(buf, &self.valid_start);
    }

    fn decode_key(buf: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            parent_id: get_varint(buf)?,
            internal_id: get_varint(buf)?,
            valid_start: get_timestamp(buf)?,
        })
    }
}

// =============================================================================
// Channel Directory Keys
// =============================================================================

/// By-owner directory key of one channel version (datastream or command
/// stream). Newer versions of the same channel sort first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub owner_id: u64,
    pub name: String,
    pub valid_start: DateTime<Utc>,
    pub internal_id: u64,
}

impl ChannelKey {
    pub fn new(owner_id: u64, name: impl Into<String>, valid_start: DateTime<Utc>, internal_id: u64) -> Self {
        Self {
            owner_id,
            name: name.into(),
            valid_start,
            internal_id,
        }
    }

    pub fn same_channel(&self, other: &ChannelKey) -> bool {
        self.owner_id == other.owner_id && self.name == other.name
    }

    /// Smallest key of any channel belonging to `owner_id`.
    pub fn owner_start(owner_id: u64) -> ChannelKey {
        ChannelKey::new(owner_id, "", TIME_MAX, 0)
    }

    /// Smallest key of any version of the channel `name`: its newest version.
    pub fn channel_start(owner_id: u64, name: &str) -> ChannelKey {
        ChannelKey::new(owner_id, name, TIME_MAX, 0)
    }
}

impl Ord for ChannelKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.owner_id
            .cmp(&other.owner_id)
            .then_with(|| self.name.cmp(&other.name))
            .then_with(|| other.valid_start.cmp(&self.valid_start))
            .then_with(|| self.internal_id.cmp(&other.internal_id))
    }
}

impl PartialOrd for ChannelKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl MapKey for ChannelKey {
    fn encode_key(&self, buf: &mut Vec<u8>) {
        put_varint(buf, self.owner_id);
        put_str(buf, &self.name);
        put_timestamp_desc(buf, &self.valid_start);
        put_varint(buf, self.internal_id);
    }

    fn decode_key(buf: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            owner_id: get_varint(buf)?,
            name: get_str(buf)?,
            valid_start: get_timestamp_desc(buf)?,
            internal_id: get_varint(buf)?,
        })
    }
}

// =============================================================================
// Series Directory Keys
// =============================================================================

/// Result time marking a continuous series.
pub const CONTINUOUS: DateTime<Utc> = TIME_MIN;

/// Series directory key. `result_time == CONTINUOUS` means every record's
/// result time equals its own timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey {
    pub stream_id: u64,
    pub sub_id: u64,
    pub result_time: DateTime<Utc>,
}

impl SeriesKey {
    pub fn new(stream_id: u64, sub_id: u64, result_time: DateTime<Utc>) -> Self {
        Self { stream_id, sub_id, result_time }
    }

    /// Series key of a record: a result time equal to the timestamp (or
    /// absent) collapses into the continuous series.
    pub fn for_record(stream_id: u64, sub_id: u64, timestamp: DateTime<Utc>, result_time: Option<DateTime<Utc>>) -> Self {
        let result_time = match result_time {
            Some(rt) if rt != timestamp => rt,
            _ => CONTINUOUS,
        };
        Self::new(stream_id, sub_id, result_time)
    }

    pub fn is_continuous(&self) -> bool {
        self.result_time == CONTINUOUS
    }

    pub fn stream_bounds(stream_id: u64) -> (SeriesKey, SeriesKey) {
        (
            SeriesKey::new(stream_id, 0, TIME_MIN),
            SeriesKey::new(stream_id, MAX_ID, TIME_MAX),
        )
    }

    pub fn sub_key(&self) -> SubSeriesKey {
        SubSeriesKey::new(self.sub_id, self.stream_id, self.result_time)
    }
}

impl MapKey for SeriesKey {
    fn encode_key(&self, buf: &mut Vec<u8>) {
        put_varint(buf, self.stream_id);
        put_varint(buf, self.sub_id);
        put_timestamp(buf, &self.result_time);
    }

    fn decode_key(buf: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            stream_id: get_varint(buf)?,
            sub_id: get_varint(buf)?,
            result_time: get_timestamp(buf)?,
        })
    }
}

/// Series directory key ordered by sub-entity first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubSeriesKey {
    pub sub_id: u64,
    pub stream_id: u64,
    pub result_time: DateTime<Utc>,
}

impl SubSeriesKey {
    pub fn new(sub_id: u64, stream_id: u64, result_time: DateTime<Utc>) -> Self {
        Self { sub_id, stream_id, result_time }
    }

    pub fn sub_bounds(sub_id: u64) -> (SubSeriesKey, SubSeriesKey) {
        (
            SubSeriesKey::new(sub_id, 0, TIME_MIN),
            SubSeriesKey::new(sub_id, MAX_ID, TIME_MAX),
        )
    }

    pub fn series_key(&self) -> SeriesKey {
        SeriesKey::new(self.stream_id, self.sub_id, self.result_time)
    }
}

impl MapKey for SubSeriesKey {
    fn encode_key(&self, buf: &mut Vec<u8>) {
        put_varint(buf, self.sub_id);
        put_varint(buf, self.stream_id);
        put_timestamp(buf, &self.result_time);
    }

    fn decode_key(buf: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            sub_id: get_varint(buf)?,
            stream_id: get_varint(buf)?,
            result_time: get_timestamp(buf)?,
        })
    }
}

// =============================================================================
// Record Keys
// =============================================================================

/// Key of one time-series record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct RecordKey {
    pub series_id: u64,
    pub timestamp: DateTime<Utc>,
}

impl RecordKey {
    pub fn new(series_id: u64, timestamp: DateTime<Utc>) -> Self {
        Self { series_id, timestamp }
    }

    pub fn series_bounds(series_id: u64) -> (RecordKey, RecordKey) {
        (RecordKey::new(series_id, TIME_MIN), RecordKey::new(series_id, TIME_MAX))
    }

    /// Opaque identifier handed to callers.
    pub fn to_public_id(&self) -> Vec<u8> {
        self.to_key_bytes()
    }

    /// Parse an identifier produced by `to_public_id`.
    pub fn from_public_id(id: &[u8]) -> Result<RecordKey> {
        RecordKey::from_key_bytes(id)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.series_id, self.timestamp.to_rfc3339())
    }
}

impl MapKey for RecordKey {
    fn encode_key(&self, buf: &mut Vec<u8>) {
        put_varint(buf, self.series_id);
        put_timestamp(buf, &self.timestamp);
    }

    fn decode_key(buf: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            series_id: get_varint(buf)?,
            timestamp: get_timestamp(buf)?,
        })
    }
}

/// Public key of a command status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandStatusKey {
    pub command: RecordKey,
    pub report_time: DateTime<Utc>,
}

impl CommandStatusKey {
    pub fn new(command: RecordKey, report_time: DateTime<Utc>) -> Self {
        Self { command, report_time }
    }

    /// Command key bytes followed by the report time.
    pub fn to_public_id(&self) -> Bytes {
        let mut time = Vec::with_capacity(12);
        put_timestamp(&mut time, &self.report_time);
        let command = self.command.to_public_id();

        let mut buf = BytesMut::with_capacity(command.len() + time.len());
        buf.put_slice(&command);
        buf.put_slice(&time);
        buf.freeze()
    }

    pub fn from_public_id(id: &[u8]) -> Result<CommandStatusKey> {
        let mut input = id;
        let command = RecordKey::decode_key(&mut input)?;
        let report_time = get_timestamp(&mut input)?;
        if !input.is_empty() {
            return Err(AegisError::InvalidKey(format!(
                "{} trailing bytes after command status key",
                input.len()
            )));
        }
        Ok(Self::new(command, report_time))
    }
}

impl fmt::Display for CommandStatusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.command, self.report_time.to_rfc3339())
    }
}

// =============================================================================
// Tests
// =============================================================================
