//! Aegis Filter - Store Query Filters
//!
//! Filters for entity, channel and record selection. Each filter is a
//! plain struct of optional components built with chained `with_*` calls;
//! the planner decides which component drives the scan and which become
//! in-stream predicates.
//!
//! Channel and record filters may nest a filter on a linked store (the
//! owners of a channel, the channel or feature of a record). The store
//! resolves a nested filter into local ids before planning.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::geom::Bbox;
use crate::keys::RecordKey;
use crate::model::{Channel, TimeSeriesRecord};
use aegis_common::{BigId, TimeRange};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// In-stream predicate over a decoded payload.
pub type ValuePredicate<V> = Arc<dyn Fn(&V) -> bool + Send + Sync>;

// =============================================================================
// Filter Components
// =============================================================================

/// Temporal selection applied to valid time, phenomenon time or result time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalFilter {
    /// Everything intersecting the closed range.
    Range(TimeRange),
    /// Newest version or record only.
    Latest,
    /// Version or record valid at the time of the query.
    Current,
}

impl TemporalFilter {
    pub fn range(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        TemporalFilter::Range(TimeRange::new(start, end))
    }

    pub fn at(time: DateTime<Utc>) -> Self {
        TemporalFilter::Range(TimeRange::at(time))
    }

    /// Range covered by this filter when evaluated at `now`.
    pub fn as_range(&self, now: DateTime<Utc>) -> TimeRange {
        match self {
            TemporalFilter::Range(range) => *range,
            TemporalFilter::Latest => TimeRange::all(),
            TemporalFilter::Current => TimeRange::at(now),
        }
    }
}

/// Unique-name selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UidFilter {
    Exact(BTreeSet<String>),
    /// All names starting with the prefix.
    Prefix(String),
}

impl UidFilter {
    /// Parses `"urn:foo:*"` as a prefix and anything else as an exact name.
    pub fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix('*') {
            Some(prefix) => UidFilter::Prefix(prefix.to_string()),
            None => UidFilter::Exact(std::iter::once(pattern.to_string()).collect()),
        }
    }

    pub fn matches(&self, uid: &str) -> bool {
        match self {
            UidFilter::Exact(uids) => uids.contains(uid),
            UidFilter::Prefix(prefix) => uid.starts_with(prefix.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullTextFilter {
    pub keywords: Vec<String>,
}

impl FullTextFilter {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialFilter {
    pub region: Bbox,
}

// =============================================================================
// Entity Filter
// =============================================================================

pub struct EntityFilter<V> {
    pub internal_ids: Option<BTreeSet<u64>>,
    pub unique_ids: Option<UidFilter>,
    pub parent_ids: Option<BTreeSet<u64>>,
    pub spatial: Option<SpatialFilter>,
    pub full_text: Option<FullTextFilter>,
    /// `None` selects every version.
    pub valid_time: Option<TemporalFilter>,
    pub value_predicate: Option<ValuePredicate<V>>,
    pub limit: Option<u64>,
}

impl<V> Default for EntityFilter<V> {
    fn default() -> Self {
        Self {
            internal_ids: None,
            unique_ids: None,
            parent_ids: None,
            spatial: None,
            full_text: None,
            valid_time: None,
            value_predicate: None,
            limit: None,
        }
    }
}

impl<V> Clone for EntityFilter<V> {
    fn clone(&self) -> Self {
        Self {
            internal_ids: self.internal_ids.clone(),
            unique_ids: self.unique_ids.clone(),
            parent_ids: self.parent_ids.clone(),
            spatial: self.spatial,
            full_text: self.full_text.clone(),
            valid_time: self.valid_time,
            value_predicate: self.value_predicate.clone(),
            limit: self.limit,
        }
    }
}

impl<V> EntityFilter<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_internal_ids<I: IntoIterator<Item = BigId>>(mut self, ids: I) -> Self {
        self.internal_ids = Some(ids.into_iter().map(|id| id.id).collect());
        self
    }

    pub fn with_unique_ids<I, S>(mut self, uids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique_ids = Some(UidFilter::Exact(uids.into_iter().map(Into::into).collect()));
        self
    }

    pub fn with_uid_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.unique_ids = Some(UidFilter::Prefix(prefix.into()));
        self
    }

    pub fn with_parents<I: IntoIterator<Item = BigId>>(mut self, ids: I) -> Self {
        self.parent_ids = Some(ids.into_iter().map(|id| id.id).collect());
        self
    }

    pub fn with_region(mut self, region: Bbox) -> Self {
        self.spatial = Some(SpatialFilter { region });
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.full_text = Some(FullTextFilter::new(keywords));
        self
    }

    pub fn with_valid_time(mut self, valid_time: TemporalFilter) -> Self {
        self.valid_time = Some(valid_time);
        self
    }

    pub fn with_predicate(mut self, predicate: impl Fn(&V) -> bool + Send + Sync + 'static) -> Self {
        self.value_predicate = Some(Arc::new(predicate));
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl<V> fmt::Debug for EntityFilter<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityFilter")
            .field("internal_ids", &self.internal_ids)
            .field("unique_ids", &self.unique_ids)
            .field("parent_ids", &self.parent_ids)
            .field("spatial", &self.spatial)
            .field("full_text", &self.full_text)
            .field("valid_time", &self.valid_time)
            .field("value_predicate", &self.value_predicate.is_some())
            .field("limit", &self.limit)
            .finish()
    }
}

// =============================================================================
// Channel Filter
// =============================================================================

pub struct ChannelFilter<V: Channel> {
    pub internal_ids: Option<BTreeSet<u64>>,
    pub owner_ids: Option<BTreeSet<u64>>,
    /// Owners must match this filter on the owner store.
    pub owner_filter: Option<Box<EntityFilter<V::Owner>>>,
    pub channel_names: Option<BTreeSet<String>>,
    pub full_text: Option<FullTextFilter>,
    pub valid_time: Option<TemporalFilter>,
    /// Channels must hold at least one record matching this filter.
    pub record_filter: Option<Box<RecordFilter<V::Record>>>,
    pub value_predicate: Option<ValuePredicate<V>>,
    pub limit: Option<u64>,
}

impl<V: Channel> Default for ChannelFilter<V> {
    fn default() -> Self {
        Self {
            internal_ids: None,
            owner_ids: None,
            owner_filter: None,
            channel_names: None,
            full_text: None,
            valid_time: None,
            record_filter: None,
            value_predicate: None,
            limit: None,
        }
    }
}

impl<V: Channel> Clone for ChannelFilter<V> {
    fn clone(&self) -> Self {
        Self {
            internal_ids: self.internal_ids.clone(),
            owner_ids: self.owner_ids.clone(),
            owner_filter: self.owner_filter.clone(),
            channel_names: self.channel_names.clone(),
            full_text: self.full_text.clone(),
            valid_time: self.valid_time,
            record_filter: self.record_filter.clone(),
            value_predicate: self.value_predicate.clone(),
            limit: self.limit,
        }
    }
}

impl<V: Channel> ChannelFilter<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_internal_ids<I: IntoIterator<Item = BigId>>(mut self, ids: I) -> Self {
        self.internal_ids = Some(ids.into_iter().map(|id| id.id).collect());
        self
    }

    pub fn with_owners<I: IntoIterator<Item = BigId>>(mut self, ids: I) -> Self {
        self.owner_ids = Some(ids.into_iter().map(|id| id.id).collect());
        self
    }

    pub fn with_owner_filter(mut self, filter: EntityFilter<V::Owner>) -> Self {
        self.owner_filter = Some(Box::new(filter));
        self
    }

    pub fn with_record_filter(mut self, filter: RecordFilter<V::Record>) -> Self {
        self.record_filter = Some(Box::new(filter));
        self
    }

    /// True if a nested filter must be resolved against another store.
    pub fn has_joins(&self) -> bool {
        self.owner_filter.is_some() || self.record_filter.is_some()
    }

    pub fn with_channel_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channel_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.full_text = Some(FullTextFilter::new(keywords));
        self
    }

    pub fn with_valid_time(mut self, valid_time: TemporalFilter) -> Self {
        self.valid_time = Some(valid_time);
        self
    }

    pub fn with_predicate(mut self, predicate: impl Fn(&V) -> bool + Send + Sync + 'static) -> Self {
        self.value_predicate = Some(Arc::new(predicate));
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl<V: Channel> fmt::Debug for ChannelFilter<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelFilter")
            .field("internal_ids", &self.internal_ids)
            .field("owner_ids", &self.owner_ids)
            .field("owner_filter", &self.owner_filter)
            .field("channel_names", &self.channel_names)
            .field("full_text", &self.full_text)
            .field("valid_time", &self.valid_time)
            .field("record_filter", &self.record_filter)
            .field("value_predicate", &self.value_predicate.is_some())
            .field("limit", &self.limit)
            .finish()
    }
}

// =============================================================================
// Record Filter
// =============================================================================

pub struct RecordFilter<R: TimeSeriesRecord> {
    pub internal_ids: Option<BTreeSet<RecordKey>>,
    pub stream_ids: Option<BTreeSet<u64>>,
    /// Streams must match this filter on the channel store.
    pub stream_filter: Option<Box<ChannelFilter<R::Stream>>>,
    pub sub_entity_ids: Option<BTreeSet<u64>>,
    /// Sub-entities must match this filter on the feature store.
    pub sub_entity_filter: Option<Box<EntityFilter<R::SubEntity>>>,
    /// Filter on record timestamps. `None` selects all.
    pub phenomenon_time: Option<TemporalFilter>,
    /// Filter on series result times. `None` selects all.
    pub result_time: Option<TemporalFilter>,
    pub value_predicate: Option<ValuePredicate<R>>,
    pub limit: Option<u64>,
}

impl<R: TimeSeriesRecord> Default for RecordFilter<R> {
    fn default() -> Self {
        Self {
            internal_ids: None,
            stream_ids: None,
            stream_filter: None,
            sub_entity_ids: None,
            sub_entity_filter: None,
            phenomenon_time: None,
            result_time: None,
            value_predicate: None,
            limit: None,
        }
    }
}

impl<R: TimeSeriesRecord> Clone for RecordFilter<R> {
    fn clone(&self) -> Self {
        Self {
            internal_ids: self.internal_ids.clone(),
            stream_ids: self.stream_ids.clone(),
            stream_filter: self.stream_filter.clone(),
            sub_entity_ids: self.sub_entity_ids.clone(),
            sub_entity_filter: self.sub_entity_filter.clone(),
            phenomenon_time: self.phenomenon_time,
            result_time: self.result_time,
            value_predicate: self.value_predicate.clone(),
            limit: self.limit,
        }
    }
}

impl<R: TimeSeriesRecord> RecordFilter<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keys<I: IntoIterator<Item = RecordKey>>(mut self, keys: I) -> Self {
        self.internal_ids = Some(keys.into_iter().collect());
        self
    }

    pub fn with_streams<I: IntoIterator<Item = BigId>>(mut self, ids: I) -> Self {
        self.stream_ids = Some(ids.into_iter().map(|id| id.id).collect());
        self
    }

    pub fn with_sub_entities<I: IntoIterator<Item = BigId>>(mut self, ids: I) -> Self {
        self.sub_entity_ids = Some(ids.into_iter().map(|id| id.id).collect());
        self
    }

    pub fn with_stream_filter(mut self, filter: ChannelFilter<R::Stream>) -> Self {
        self.stream_filter = Some(Box::new(filter));
        self
    }

    pub fn with_sub_entity_filter(mut self, filter: EntityFilter<R::SubEntity>) -> Self {
        self.sub_entity_filter = Some(Box::new(filter));
        self
    }

    /// True if a nested filter must be resolved against another store.
    pub fn has_joins(&self) -> bool {
        self.stream_filter.is_some() || self.sub_entity_filter.is_some()
    }

    pub fn with_phenomenon_time(mut self, time: TemporalFilter) -> Self {
        self.phenomenon_time = Some(time);
        self
    }

    pub fn with_time_range(self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.with_phenomenon_time(TemporalFilter::range(start, end))
    }

    pub fn with_result_time(mut self, time: TemporalFilter) -> Self {
        self.result_time = Some(time);
        self
    }

    pub fn with_predicate(mut self, predicate: impl Fn(&R) -> bool + Send + Sync + 'static) -> Self {
        self.value_predicate = Some(Arc::new(predicate));
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl<R: TimeSeriesRecord> fmt::Debug for RecordFilter<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordFilter")
            .field("internal_ids", &self.internal_ids)
            .field("stream_ids", &self.stream_ids)
            .field("stream_filter", &self.stream_filter)
            .field("sub_entity_ids", &self.sub_entity_ids)
            .field("sub_entity_filter", &self.sub_entity_filter)
            .field("phenomenon_time", &self.phenomenon_time)
            .field("result_time", &self.result_time)
            .field("value_predicate", &self.value_predicate.is_some())
            .field("limit", &self.limit)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
