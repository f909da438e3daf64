//! Aegis Time-Series Store - Observations, Commands and Status Reports
//!
//! Records are grouped into series by `(stream, sub-entity, result time)`
//! and keyed by `(series id, timestamp)`. Records whose result time equals
//! their own timestamp share one continuous series per stream and
//! sub-entity; records with a distinct result time form one batch series
//! per result time.
//!
//! Key Features:
//! - Lazy series creation with a persistent series id counter
//! - Per-series range cursors with a floor lookup for covering records
//! - Time-ordered k-way merge across series, round-robin above a threshold
//! - Rank-based record counts and histograms
//! - Stream and sub-entity filters joined through the linked stores
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::filter::{ChannelFilter, EntityFilter, RecordFilter, TemporalFilter};
use crate::keys::{RecordKey, SeriesKey, SubSeriesKey};
use crate::link::{narrow_ids, EntityLookup, IdResolver, StreamRecords};
use crate::merge::{BoxedIter, MergeSortIter, QueryStream, RoundRobinIter};
use crate::model::TimeSeriesRecord;
use crate::planner::{PrimaryIndex, Residual, ScanPlan};
use crate::stats::{self, SeriesStats};
use crate::store::{StoreCore, StoreKind};
use aegis_common::{AegisError, BigId, HistorianConfig, Result, TimeRange};
use aegis_storage::{BincodeCodec, MapStore, SortedMap, ValueCodec};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};
use std::ops::Bound;
use std::sync::Arc;

pub const OBSERVATIONS_PREFIX: &str = "@obs";
pub const COMMANDS_PREFIX: &str = "@cmd";
pub const STATUS_PREFIX: &str = "@status";

const NEXT_SERIES_ID: &str = "next_series_id";

/// One stored record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordEntry<R> {
    pub key: RecordKey,
    pub value: R,
}

// =============================================================================
// Time-Series Store
// =============================================================================

pub struct TimeSeriesStore<R: TimeSeriesRecord> {
    core: StoreCore,
    records: SortedMap<RecordKey, R>,
    series: SortedMap<SeriesKey, u64>,
    series_by_sub: SortedMap<SubSeriesKey, u64>,
    meta: SortedMap<String, u64>,
    streams: RwLock<Option<Arc<dyn EntityLookup>>>,
    stream_query: RwLock<Option<Arc<dyn IdResolver<ChannelFilter<R::Stream>>>>>,
    sub_entities: RwLock<Option<Arc<dyn EntityLookup>>>,
    sub_entity_query: RwLock<Option<Arc<dyn IdResolver<EntityFilter<R::SubEntity>>>>>,
}

impl<R: TimeSeriesRecord + Serialize + DeserializeOwned> TimeSeriesStore<R> {
    pub fn open(engine: &Arc<MapStore>, name: &str, prefix: &str, config: &HistorianConfig) -> Result<Self> {
        Self::open_with_codec(engine, name, prefix, config, Arc::new(BincodeCodec))
    }
}

impl<R: TimeSeriesRecord> TimeSeriesStore<R> {
    pub fn open_with_codec(
        engine: &Arc<MapStore>,
        name: &str,
        prefix: &str,
        config: &HistorianConfig,
        codec: Arc<dyn ValueCodec<R>>,
    ) -> Result<Self> {
        let core = StoreCore::open(engine, name, prefix, StoreKind::Records, config)?;
        Ok(Self {
            records: core.open_map_with("_records", codec),
            series: core.open_map("_series"),
            series_by_sub: core.open_map("_series_by_sub"),
            meta: core.open_map("_meta"),
            streams: RwLock::new(None),
            stream_query: RwLock::new(None),
            sub_entities: RwLock::new(None),
            sub_entity_query: RwLock::new(None),
            core,
        })
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn core(&self) -> &StoreCore {
        &self.core
    }

    /// Validate stream ids against `streams` on insert and resolve stream
    /// filters through it.
    pub fn link_to<S>(&self, streams: Arc<S>)
    where
        S: EntityLookup + IdResolver<ChannelFilter<R::Stream>> + 'static,
    {
        *self.stream_query.write() = Some(streams.clone());
        *self.streams.write() = Some(streams);
    }

    /// Validate sub-entity ids (features of interest) against `entities`.
    pub fn link_sub_entities<S>(&self, entities: Arc<S>)
    where
        S: EntityLookup + IdResolver<EntityFilter<R::SubEntity>> + 'static,
    {
        *self.sub_entity_query.write() = Some(entities.clone());
        *self.sub_entities.write() = Some(entities);
    }

    // -------------------------------------------------------------------------
    // Series Directory
    // -------------------------------------------------------------------------

    /// Id of the series `key`, creating the series on first use.
    fn resolve_series(&self, key: &SeriesKey) -> Result<u64> {
        if let Some(id) = self.series.get(key)? {
            return Ok(id);
        }
        let meta_key = NEXT_SERIES_ID.to_string();
        let id = self.meta.get(&meta_key)?.unwrap_or(1);
        self.meta.put(&meta_key, &(id + 1))?;
        self.series.put(key, &id)?;
        self.series_by_sub.put(&key.sub_key(), &id)?;
        tracing::trace!("{}: created series {} for stream {} sub {}", self.name(), id, key.stream_id, key.sub_id);
        Ok(id)
    }

    fn stream_series(&self, stream_id: u64) -> Result<Vec<(SeriesKey, u64)>> {
        let (lo, hi) = SeriesKey::stream_bounds(stream_id);
        self.series.range_inclusive(&lo, &hi).collect()
    }

    fn drop_series(&self, key: &SeriesKey) -> Result<()> {
        self.series.delete(key)?;
        self.series_by_sub.delete(&key.sub_key())?;
        Ok(())
    }

    fn series_is_empty(&self, series_id: u64) -> Result<bool> {
        let (lo, hi) = RecordKey::series_bounds(series_id);
        Ok(self.records.key_range(Bound::Included(&lo), Bound::Included(&hi)).next().is_none())
    }

    /// Number of series, empty ones included until compaction.
    pub fn num_series(&self) -> u64 {
        self.series.len()
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Add a record to the series of its stream, sub-entity and result time.
    pub fn add(&self, record: R) -> Result<RecordKey> {
        self.core.atomically("add", || {
            let stream = record.stream_id();
            let streams = self.streams.read().clone();
            if let Some(streams) = streams {
                if !streams.contains_internal_id(stream.id)? {
                    return Err(AegisError::UnknownReference(format!(
                        "{}: unknown stream {}",
                        self.name(),
                        stream
                    )));
                }
            }
            let sub = record.sub_entity_id();
            let sub_entities = self.sub_entities.read().clone();
            if let (false, Some(entities)) = (sub.is_none(), sub_entities) {
                if !entities.contains_internal_id(sub.id)? {
                    return Err(AegisError::UnknownReference(format!(
                        "{}: unknown sub-entity {}",
                        self.name(),
                        sub
                    )));
                }
            }

            let timestamp = record.timestamp();
            let series_key = SeriesKey::for_record(stream.id, sub.id, timestamp, record.result_time());
            let series_id = self.resolve_series(&series_key)?;
            let key = RecordKey::new(series_id, timestamp);

            if self.core.settings().allow_record_overwrite {
                self.records.put(&key, &record)?;
            } else if self.records.put_if_absent(&key, &record)?.is_some() {
                return Err(AegisError::AlreadyExists(format!("{}: record {} already exists", self.name(), key)));
            }
            Ok(key)
        })
    }

    /// Replace an existing record. The timestamp cannot change.
    pub fn put(&self, key: &RecordKey, record: R) -> Result<R> {
        self.core.atomically("put", || {
            if record.timestamp() != key.timestamp {
                return Err(AegisError::InvalidArgument(format!(
                    "{}: record {} cannot move to {}",
                    self.name(),
                    key,
                    record.timestamp().to_rfc3339()
                )));
            }
            if !self.records.contains_key(key) {
                return Err(AegisError::InvalidArgument(format!("{}: no record {}", self.name(), key)));
            }
            self.records
                .put(key, &record)?
                .ok_or_else(|| AegisError::Internal(format!("{}: record {} vanished", self.name(), key)))
        })
    }

    /// Remove one record. An emptied series stays until [`Self::compact`].
    pub fn remove(&self, key: &RecordKey) -> Result<Option<R>> {
        self.core.atomically("remove", || self.records.remove(key))
    }

    pub fn remove_entries(&self, filter: &RecordFilter<R>) -> Result<u64> {
        let keys: Vec<RecordKey> = self.select_keys(filter).try_collect()?;
        self.core.atomically("remove_entries", || {
            let mut removed = 0;
            for key in &keys {
                if self.records.delete(key)? {
                    removed += 1;
                }
            }
            Ok(removed)
        })
    }

    fn remove_stream_series(&self, stream_id: u64) -> Result<u64> {
        let mut removed = 0;
        for (series_key, series_id) in self.stream_series(stream_id)? {
            let (lo, hi) = RecordKey::series_bounds(series_id);
            let keys: Vec<RecordKey> = self
                .records
                .key_range(Bound::Included(&lo), Bound::Included(&hi))
                .collect::<Result<_>>()?;
            for key in keys {
                self.records.delete(&key)?;
                removed += 1;
            }
            self.drop_series(&series_key)?;
        }
        Ok(removed)
    }

    /// Drop every series without records. Returns the number dropped.
    pub fn compact(&self) -> Result<u64> {
        self.core.atomically("compact", || {
            let all: Vec<(SeriesKey, u64)> = self.series.iter().collect::<Result<_>>()?;
            let mut dropped = 0;
            for (series_key, series_id) in all {
                if self.series_is_empty(series_id)? {
                    self.drop_series(&series_key)?;
                    dropped += 1;
                }
            }
            if dropped > 0 {
                tracing::info!("{}: compaction dropped {} empty series", self.name(), dropped);
            }
            Ok(dropped)
        })
    }

    pub fn clear(&self) -> Result<()> {
        self.core.atomically("clear", || {
            self.records.clear()?;
            self.series.clear()?;
            self.series_by_sub.clear()
        })
    }

    // -------------------------------------------------------------------------
    // Point Reads
    // -------------------------------------------------------------------------

    pub fn get(&self, key: &RecordKey) -> Result<Option<R>> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.records.contains_key(key)
    }

    pub fn len(&self) -> u64 {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    // -------------------------------------------------------------------------
    // Selection
    // -------------------------------------------------------------------------

    /// Records matching `filter`.
    ///
    /// The stream is in timestamp order unless more series are selected
    /// than `max_series_for_time_ordering`; `is_time_ordered()` reports which.
    pub fn select(&self, filter: &RecordFilter<R>) -> QueryStream<'_, RecordEntry<R>> {
        let filter = match self.resolve_joins(filter) {
            Ok(filter) => filter,
            Err(e) => return QueryStream::new(std::iter::once(Err(e)), true),
        };
        let filter: &RecordFilter<R> = &filter;
        let plan = ScanPlan::for_records(filter);
        let now = Utc::now();

        if plan.primary == PrimaryIndex::InternalIds {
            return match self.select_by_keys(&plan, filter, now) {
                Ok(entries) => QueryStream::new(entries.into_iter().map(Ok), true).limit(plan.limit),
                Err(e) => QueryStream::new(std::iter::once(Err(e)), true),
            };
        }

        let series = match self.candidate_series(&plan, filter, now) {
            Ok(series) => series,
            Err(e) => return QueryStream::new(std::iter::once(Err(e)), true),
        };

        let streams: Vec<BoxedIter<'_, RecordEntry<R>>> = series
            .iter()
            .map(|(_, series_id)| self.series_stream(*series_id, filter, now))
            .collect();

        let threshold = self.core.settings().max_series_for_time_ordering;
        let stream = if streams.len() > threshold {
            tracing::warn!(
                "{}: {} series selected, above {}; results are not time ordered",
                self.name(),
                streams.len(),
                threshold
            );
            QueryStream::new(RoundRobinIter::new(streams), false)
        } else {
            QueryStream::new(MergeSortIter::new(streams, |entry: &RecordEntry<R>| entry.key.timestamp), true)
        };
        stream.limit(plan.limit)
    }

    pub fn select_keys(&self, filter: &RecordFilter<R>) -> QueryStream<'_, RecordKey> {
        self.select(filter).map_ok(|entry| entry.key)
    }

    pub fn count(&self, filter: &RecordFilter<R>) -> Result<u64> {
        let filter = self.resolve_joins(filter)?;
        let plan = ScanPlan::for_records(&filter);
        if plan.primary == PrimaryIndex::FullScan && plan.residuals.is_empty() {
            let total = self.records.len();
            return Ok(filter.limit.map_or(total, |limit| total.min(limit)));
        }
        self.select(&filter).try_count()
    }

    /// `filter` with its stream and sub-entity filters replaced by the ids
    /// they select.
    fn resolve_joins<'f>(&self, filter: &'f RecordFilter<R>) -> Result<Cow<'f, RecordFilter<R>>> {
        if !filter.has_joins() {
            return Ok(Cow::Borrowed(filter));
        }
        let mut resolved = filter.clone();
        if let Some(stream_filter) = resolved.stream_filter.take() {
            let Some(streams) = self.stream_query.read().clone() else {
                return Err(AegisError::Unsupported(format!("{}: no stream store linked", self.name())));
            };
            narrow_ids(&mut resolved.stream_ids, streams.resolve_ids(&stream_filter)?);
        }
        if let Some(sub_filter) = resolved.sub_entity_filter.take() {
            let Some(entities) = self.sub_entity_query.read().clone() else {
                return Err(AegisError::Unsupported(format!("{}: no sub-entity store linked", self.name())));
            };
            narrow_ids(&mut resolved.sub_entity_ids, entities.resolve_ids(&sub_filter)?);
        }
        Ok(Cow::Owned(resolved))
    }

    /// Series selected by the stream, sub-entity and result-time parts of
    /// `filter`.
    fn candidate_series(
        &self,
        plan: &ScanPlan,
        filter: &RecordFilter<R>,
        now: DateTime<Utc>,
    ) -> Result<Vec<(SeriesKey, u64)>> {
        let mut found: Vec<(SeriesKey, u64)> = match plan.primary {
            PrimaryIndex::Owner => {
                let mut found = Vec::new();
                for stream_id in filter.stream_ids.iter().flatten() {
                    found.extend(self.stream_series(*stream_id)?);
                }
                found
            }
            PrimaryIndex::SubEntity => {
                let mut found = Vec::new();
                for sub_id in filter.sub_entity_ids.iter().flatten() {
                    let (lo, hi) = SubSeriesKey::sub_bounds(*sub_id);
                    for entry in self.series_by_sub.range_inclusive(&lo, &hi) {
                        let (key, id) = entry?;
                        found.push((key.series_key(), id));
                    }
                }
                found
            }
            _ => self.series.iter().collect::<Result<_>>()?,
        };

        if plan.applies(Residual::Owner) {
            if let Some(streams) = &filter.stream_ids {
                found.retain(|(key, _)| streams.contains(&key.stream_id));
            }
        }
        if plan.applies(Residual::SubEntity) {
            if let Some(subs) = &filter.sub_entity_ids {
                found.retain(|(key, _)| subs.contains(&key.sub_id));
            }
        }
        match filter.result_time {
            Some(TemporalFilter::Latest) => {
                let mut newest: BTreeMap<(u64, u64), DateTime<Utc>> = BTreeMap::new();
                for (key, _) in found.iter().filter(|(key, _)| !key.is_continuous()) {
                    let slot = newest.entry((key.stream_id, key.sub_id)).or_insert(key.result_time);
                    if key.result_time > *slot {
                        *slot = key.result_time;
                    }
                }
                found.retain(|(key, _)| {
                    key.is_continuous() || newest.get(&(key.stream_id, key.sub_id)) == Some(&key.result_time)
                });
            }
            Some(result_time) => {
                let range = result_time.as_range(now);
                found.retain(|(key, _)| key.is_continuous() || range.contains(&key.result_time));
            }
            None => {}
        }
        Ok(found)
    }

    /// Records of one series selected by the phenomenon-time filter, with
    /// the value predicate applied.
    fn series_stream(&self, series_id: u64, filter: &RecordFilter<R>, now: DateTime<Utc>) -> BoxedIter<'_, RecordEntry<R>> {
        let (lo, hi) = RecordKey::series_bounds(series_id);
        let raw: BoxedIter<'_, (RecordKey, R)> = match filter.phenomenon_time {
            None => Box::new(self.records.range_inclusive(&lo, &hi)),
            Some(TemporalFilter::Latest) => single(self.records.floor_entry(&hi), series_id),
            Some(TemporalFilter::Current) => {
                single(self.records.floor_entry(&RecordKey::new(series_id, now)), series_id)
            }
            Some(TemporalFilter::Range(range)) => {
                let start = RecordKey::new(series_id, range.start);
                let end = RecordKey::new(series_id, range.end);
                let covering = match self.records.lower_entry(&start) {
                    Ok(Some((key, value)))
                        if key.series_id == series_id
                            && value.coverage_end().is_some_and(|end| end >= range.start) =>
                    {
                        Some(Ok((key, value)))
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(e)),
                };
                Box::new(covering.into_iter().chain(self.records.range_inclusive(&start, &end)))
            }
        };

        let entries = raw.map(|item| item.map(|(key, value)| RecordEntry { key, value }));
        match filter.value_predicate.clone() {
            Some(predicate) => Box::new(entries.filter(move |item| match item {
                Ok(entry) => predicate(&entry.value),
                Err(_) => true,
            })),
            None => Box::new(entries),
        }
    }

    /// Records looked up by key, in timestamp order.
    fn select_by_keys(&self, plan: &ScanPlan, filter: &RecordFilter<R>, now: DateTime<Utc>) -> Result<Vec<RecordEntry<R>>> {
        let mut entries = Vec::new();
        for key in filter.internal_ids.iter().flatten() {
            if let Some(value) = self.records.get(key)? {
                if self.record_matches(key, &value, plan, filter, now)? {
                    entries.push(RecordEntry { key: *key, value });
                }
            }
        }
        entries.sort_by_key(|entry| (entry.key.timestamp, entry.key));
        Ok(entries)
    }

    fn record_matches(
        &self,
        key: &RecordKey,
        value: &R,
        plan: &ScanPlan,
        filter: &RecordFilter<R>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        for residual in &plan.residuals {
            let keep = match residual {
                Residual::Owner => filter
                    .stream_ids
                    .as_ref()
                    .map_or(true, |streams| streams.contains(&value.stream_id().id)),
                Residual::SubEntity => filter
                    .sub_entity_ids
                    .as_ref()
                    .map_or(true, |subs| subs.contains(&value.sub_entity_id().id)),
                Residual::ResultTime => match filter.result_time {
                    Some(TemporalFilter::Latest) | None => true,
                    Some(result_time) => match value.result_time() {
                        Some(rt) if rt != value.timestamp() => result_time.as_range(now).contains(&rt),
                        _ => true,
                    },
                },
                Residual::ValidTime => match filter.phenomenon_time {
                    Some(TemporalFilter::Range(range)) => {
                        range.contains(&key.timestamp)
                            || (key.timestamp < range.start
                                && value.coverage_end().is_some_and(|end| end >= range.start))
                    }
                    Some(TemporalFilter::Latest) => {
                        self.records.floor_key(&RecordKey::series_bounds(key.series_id).1)? == Some(*key)
                    }
                    Some(TemporalFilter::Current) => {
                        self.records.floor_key(&RecordKey::new(key.series_id, now))? == Some(*key)
                    }
                    None => true,
                },
                Residual::ValuePredicate => filter
                    .value_predicate
                    .as_ref()
                    .map_or(true, |predicate| predicate(value)),
                _ => true,
            };
            if !keep {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Statistics
    // -------------------------------------------------------------------------

    /// Per-series statistics for the series selected by `filter`, with a
    /// histogram when `bin_size` is given.
    pub fn statistics(&self, filter: &RecordFilter<R>, bin_size: Option<Duration>) -> Result<Vec<SeriesStats>> {
        let filter = self.resolve_joins(filter)?;
        let plan = ScanPlan::for_records(&filter);
        let now = Utc::now();
        let scope = self.core.id_scope();
        let mut result = Vec::new();

        for (series_key, series_id) in self.candidate_series(&plan, &filter, now)? {
            let Some(phenomenon_time) = self.series_time_range(series_id)? else {
                continue;
            };
            let Some(counted) = self.counted_range(series_id, phenomenon_time, filter.phenomenon_time, now)? else {
                continue;
            };
            let histogram = match bin_size {
                Some(bin) => Some(stats::histogram(&self.records, series_id, &counted, bin)?),
                None => None,
            };
            let result_time_range = if series_key.is_continuous() {
                phenomenon_time
            } else {
                TimeRange::at(series_key.result_time)
            };

            result.push(SeriesStats {
                stream_id: BigId::new(scope, series_key.stream_id),
                sub_entity_id: if series_key.sub_id == 0 {
                    BigId::NONE
                } else {
                    BigId::new(scope, series_key.sub_id)
                },
                result_time: (!series_key.is_continuous()).then_some(series_key.result_time),
                phenomenon_time,
                result_time_range,
                total_count: stats::count_in_range(&self.records, series_id, &counted)?,
                histogram,
            });
        }
        Ok(result)
    }

    /// Part of a series the phenomenon-time filter counts, clipped to the
    /// records the series holds. `None` if the filter selects nothing.
    fn counted_range(
        &self,
        series_id: u64,
        extent: TimeRange,
        time: Option<TemporalFilter>,
        now: DateTime<Utc>,
    ) -> Result<Option<TimeRange>> {
        Ok(match time {
            None => Some(extent),
            Some(TemporalFilter::Range(range)) => range.intersection(&extent),
            Some(TemporalFilter::Latest) => Some(TimeRange::at(extent.end)),
            Some(TemporalFilter::Current) => self
                .records
                .floor_key(&RecordKey::new(series_id, now))?
                .filter(|key| key.series_id == series_id)
                .map(|key| TimeRange::at(key.timestamp)),
        })
    }

    /// Timestamps of the first and last record of a series.
    fn series_time_range(&self, series_id: u64) -> Result<Option<TimeRange>> {
        let (lo, hi) = RecordKey::series_bounds(series_id);
        let first = self.records.ceiling_key(&lo)?.filter(|k| k.series_id == series_id);
        let last = self.records.floor_key(&hi)?.filter(|k| k.series_id == series_id);
        Ok(match (first, last) {
            (Some(first), Some(last)) => Some(TimeRange::new(first.timestamp, last.timestamp)),
            _ => None,
        })
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    pub fn commit(&self) -> Result<()> {
        self.core.commit()
    }

    pub fn backup(&self, writer: &mut dyn Write) -> Result<u64> {
        self.core.backup(writer)
    }

    pub fn restore(&self, reader: &mut dyn Read) -> Result<()> {
        self.core.restore(reader)
    }
}

fn single<'a, R: 'a>(found: Result<Option<(RecordKey, R)>>, series_id: u64) -> BoxedIter<'a, (RecordKey, R)> {
    let item = found.map(|entry| entry.filter(|(key, _)| key.series_id == series_id)).transpose();
    Box::new(item.into_iter())
}

impl<R: TimeSeriesRecord> IdResolver<RecordFilter<R>> for TimeSeriesStore<R> {
    /// Ids of the streams holding at least one record matching `filter`.
    fn resolve_ids(&self, filter: &RecordFilter<R>) -> Result<BTreeSet<u64>> {
        let filter = self.resolve_joins(filter)?;
        let plan = ScanPlan::for_records(&filter);
        let now = Utc::now();
        let mut ids = BTreeSet::new();

        if plan.primary == PrimaryIndex::InternalIds {
            for entry in self.select_by_keys(&plan, &filter, now)? {
                ids.insert(entry.value.stream_id().id);
            }
            return Ok(ids);
        }
        for (series_key, series_id) in self.candidate_series(&plan, &filter, now)? {
            if ids.contains(&series_key.stream_id) {
                continue;
            }
            if let Some(first) = self.series_stream(series_id, &filter, now).next() {
                first?;
                ids.insert(series_key.stream_id);
            }
        }
        Ok(ids)
    }
}

impl<R: TimeSeriesRecord> StreamRecords for TimeSeriesStore<R> {
    fn remove_series(&self, stream_id: u64) -> Result<u64> {
        self.core.atomically("remove_series", || self.remove_stream_series(stream_id))
    }

    fn time_ranges(&self, stream_id: u64) -> Result<Option<(TimeRange, TimeRange)>> {
        let mut ranges: Option<(TimeRange, TimeRange)> = None;
        for (series_key, series_id) in self.stream_series(stream_id)? {
            let Some(phenomenon) = self.series_time_range(series_id)? else {
                continue;
            };
            let result = if series_key.is_continuous() {
                phenomenon
            } else {
                TimeRange::at(series_key.result_time)
            };
            ranges = Some(match ranges {
                Some((p, r)) => (p.union(&phenomenon), r.union(&result)),
                None => (phenomenon, result),
            });
        }
        Ok(ranges)
    }
}

// =============================================================================
// Tests
// =============================================================================
