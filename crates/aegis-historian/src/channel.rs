//! Aegis Channel Store - Datastreams and Command Streams
//!
//! Channels are the named outputs (datastreams) and inputs (command
//! streams) of a system. Each version of a channel gets its own local id;
//! versions of the same `(owner, name)` pair sit next to each other in the
//! by-owner directory, newest first, so the version in force is found by a
//! forward scan.
//!
//! Filters may nest an owner filter or a record filter; both are resolved
//! into id sets through the linked stores before the scan is planned.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::entity::effective_valid_time;
use crate::filter::{ChannelFilter, EntityFilter, RecordFilter, TemporalFilter};
use crate::ids::{provider_for, IdProvider};
use crate::index::{FullTextIndex, SecondaryIndex};
use crate::keys::ChannelKey;
use crate::link::{narrow_ids, EntityLookup, IdResolver, OwnerCascade, StreamRecords};
use crate::merge::{BoxedIter, QueryStream};
use crate::model::Channel;
use crate::planner::{PrimaryIndex, Residual, ScanPlan};
use crate::store::{StoreCore, StoreKind};
use aegis_common::{AegisError, BigId, HistorianConfig, Result, TimeExtent, TimeRange, TIMELESS};
use aegis_storage::{BincodeCodec, MapKey, MapStore, SortedMap, ValueCodec};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::ops::Bound;
use std::sync::Arc;

pub const DATASTREAMS_PREFIX: &str = "@dstreams";
pub const COMMAND_STREAMS_PREFIX: &str = "@cmdstreams";

/// One channel version with its effective validity.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEntry<V> {
    pub id: BigId,
    pub value: V,
    pub valid_time: TimeExtent,
}

// =============================================================================
// Channel Store
// =============================================================================

pub struct ChannelStore<V: Channel> {
    core: StoreCore,
    records: SortedMap<u64, V>,
    by_owner: SortedMap<ChannelKey, ()>,
    text: Arc<FullTextIndex>,
    indexes: RwLock<Vec<Arc<dyn SecondaryIndex<V>>>>,
    id_provider: Arc<dyn IdProvider>,
    owners: RwLock<Option<Arc<dyn EntityLookup>>>,
    owner_query: RwLock<Option<Arc<dyn IdResolver<EntityFilter<V::Owner>>>>>,
    record_stores: RwLock<Vec<Arc<dyn StreamRecords>>>,
    record_query: RwLock<Option<Arc<dyn IdResolver<RecordFilter<V::Record>>>>>,
}

impl<V: Channel + Serialize + DeserializeOwned> ChannelStore<V> {
    pub fn open(engine: &Arc<MapStore>, name: &str, prefix: &str, config: &HistorianConfig) -> Result<Self> {
        Self::open_with_codec(engine, name, prefix, config, Arc::new(BincodeCodec))
    }
}

impl<V: Channel> ChannelStore<V> {
    pub fn open_with_codec(
        engine: &Arc<MapStore>,
        name: &str,
        prefix: &str,
        config: &HistorianConfig,
        codec: Arc<dyn ValueCodec<V>>,
    ) -> Result<Self> {
        let core = StoreCore::open(engine, name, prefix, StoreKind::Channels, config)?;
        let text = Arc::new(FullTextIndex::open(&core, "_text"));
        let indexes: Vec<Arc<dyn SecondaryIndex<V>>> = vec![text.clone()];

        Ok(Self {
            records: core.open_map_with("", codec),
            by_owner: core.open_map("_proc"),
            text,
            indexes: RwLock::new(indexes),
            id_provider: provider_for(config.datastore.id_provider),
            owners: RwLock::new(None),
            owner_query: RwLock::new(None),
            record_stores: RwLock::new(Vec::new()),
            record_query: RwLock::new(None),
            core,
        })
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn core(&self) -> &StoreCore {
        &self.core
    }

    fn big_id(&self, id: u64) -> BigId {
        BigId::new(self.core.id_scope(), id)
    }

    // -------------------------------------------------------------------------
    // Links
    // -------------------------------------------------------------------------

    /// Validate owners against `owners` on insert and resolve owner
    /// filters through it.
    pub fn link_to<S>(&self, owners: Arc<S>)
    where
        S: EntityLookup + IdResolver<EntityFilter<V::Owner>> + 'static,
    {
        *self.owner_query.write() = Some(owners.clone());
        *self.owners.write() = Some(owners);
    }

    /// Register a record store holding the records of these channels.
    pub fn add_record_store(&self, records: Arc<dyn StreamRecords>) {
        self.record_stores.write().push(records);
    }

    /// Resolve record filters through `records`.
    pub fn link_record_query(&self, records: Arc<dyn IdResolver<RecordFilter<V::Record>>>) {
        *self.record_query.write() = Some(records);
    }

    pub fn add_index(&self, index: Arc<dyn SecondaryIndex<V>>) {
        self.indexes.write().push(index);
    }

    fn index_list(&self) -> Vec<Arc<dyn SecondaryIndex<V>>> {
        self.indexes.read().clone()
    }

    fn owner_lookup(&self) -> Option<Arc<dyn EntityLookup>> {
        self.owners.read().clone()
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Add a new channel version and return its id.
    ///
    /// A channel without a declared valid time starts with the owner's
    /// current version, or now if the owner is timeless.
    pub fn add(&self, value: V) -> Result<BigId> {
        self.core.atomically("add", || {
            let owner = value.owner_id();
            let owners = self.owner_lookup();
            if let Some(owners) = &owners {
                if !owners.contains_internal_id(owner.id)? {
                    return Err(AegisError::UnknownReference(format!(
                        "{}: unknown owner {}",
                        self.name(),
                        owner
                    )));
                }
            }

            let value = match value.valid_time() {
                Some(_) => value,
                None => {
                    let owner_start = match &owners {
                        Some(owners) => owners.current_valid_start(owner.id)?,
                        None => None,
                    };
                    let start = owner_start.filter(|t| *t != TIMELESS).unwrap_or_else(Utc::now);
                    value.with_valid_time(TimeExtent::open(start))
                }
            };
            let valid_start = start_of(&value);
            let channel_name = value.channel_name().to_string();

            let target = ChannelKey::new(owner.id, channel_name.as_str(), valid_start, 0);
            if let Some(existing) = self.by_owner.ceiling_key(&target)? {
                if existing.same_channel(&target) && existing.valid_start == valid_start {
                    return Err(AegisError::DuplicateVersion(format!(
                        "{}: {}/{} already has a version starting at {}",
                        self.name(),
                        owner,
                        channel_name,
                        valid_start.to_rfc3339()
                    )));
                }
            }

            let uid = format!("{}/{}", owner, channel_name);
            let last_id = self.records.last_key()?;
            let id = self
                .id_provider
                .new_id(&uid, &valid_start, last_id, &|candidate| self.records.contains_key(&candidate))?;

            if self.records.put_if_absent(&id, &value)?.is_some() {
                return Err(AegisError::AlreadyExists(format!("{}: channel {} already exists", self.name(), id)));
            }
            self.by_owner
                .put(&ChannelKey::new(owner.id, channel_name, valid_start, id), &())?;
            let primary_key = id.to_key_bytes();
            for index in self.index_list() {
                index.add(&primary_key, &value)?;
            }
            Ok(self.big_id(id))
        })
    }

    /// Replace a channel version. Owner, name and valid start cannot change.
    pub fn put(&self, id: BigId, value: V) -> Result<V> {
        self.core.atomically("put", || {
            let Some(old) = self.records.get(&id.id)? else {
                return Err(AegisError::InvalidArgument(format!("{}: no channel {}", self.name(), id)));
            };
            if old.owner_id() != value.owner_id()
                || old.channel_name() != value.channel_name()
                || start_of(&old) != value.valid_time().map_or(start_of(&old), |t| t.begin)
            {
                return Err(AegisError::InvalidArgument(format!(
                    "{}: channel {} cannot change owner, name or valid start",
                    self.name(),
                    id
                )));
            }

            let value = match value.valid_time() {
                Some(_) => value,
                None => value.with_valid_time(old.valid_time().unwrap_or_else(|| TimeExtent::open(TIMELESS))),
            };
            self.records.put(&id.id, &value)?;
            let primary_key = id.id.to_key_bytes();
            for index in self.index_list() {
                index.update(&primary_key, &old, &value)?;
            }
            Ok(old)
        })
    }

    /// Remove a channel version together with all of its records.
    pub fn remove(&self, id: BigId) -> Result<Option<V>> {
        self.core.atomically("remove", || self.remove_channel(id.id))
    }

    fn remove_channel(&self, id: u64) -> Result<Option<V>> {
        let Some(old) = self.records.remove(&id)? else {
            return Ok(None);
        };
        self.by_owner.delete(&directory_key(id, &old))?;
        let primary_key = id.to_key_bytes();
        for index in self.index_list() {
            index.remove(&primary_key, &old)?;
        }

        let record_stores = self.record_stores.read().clone();
        for records in record_stores {
            let removed = records.remove_series(id)?;
            if removed > 0 {
                tracing::debug!("{}: removed {} records of channel {}", self.name(), removed, self.big_id(id));
            }
        }
        Ok(Some(old))
    }

    pub fn clear(&self) -> Result<()> {
        self.core.atomically("clear", || {
            let ids: Vec<u64> = self.records.keys().collect::<Result<_>>()?;
            for id in ids {
                self.remove_channel(id)?;
            }
            Ok(())
        })
    }

    // -------------------------------------------------------------------------
    // Point Reads
    // -------------------------------------------------------------------------

    pub fn get(&self, id: BigId) -> Result<Option<V>> {
        self.records.get(&id.id)
    }

    pub fn contains(&self, id: BigId) -> bool {
        self.records.contains_key(&id.id)
    }

    pub fn get_entry(&self, id: BigId) -> Result<Option<ChannelEntry<V>>> {
        match self.records.get(&id.id)? {
            Some(value) => Ok(Some(self.entry_for(id.id, value)?)),
            None => Ok(None),
        }
    }

    /// Newest version of the channel `name` of `owner`.
    pub fn get_latest(&self, owner: BigId, name: &str) -> Result<Option<ChannelEntry<V>>> {
        let start = ChannelKey::channel_start(owner.id, name);
        match self.by_owner.ceiling_key(&start)? {
            Some(key) if key.same_channel(&start) => self.get_entry(self.big_id(key.internal_id)),
            _ => Ok(None),
        }
    }

    /// Version of the channel `name` of `owner` valid at `at`.
    pub fn get_at(&self, owner: BigId, name: &str, at: DateTime<Utc>) -> Result<Option<ChannelEntry<V>>> {
        let target = ChannelKey::new(owner.id, name, at, 0);
        let Some(key) = self.by_owner.ceiling_key(&target)? else {
            return Ok(None);
        };
        if !key.same_channel(&target) {
            return Ok(None);
        }
        let Some(entry) = self.get_entry(self.big_id(key.internal_id))? else {
            return Ok(None);
        };
        Ok(entry.valid_time.contains(&at).then_some(entry))
    }

    pub fn get_current(&self, owner: BigId, name: &str) -> Result<Option<ChannelEntry<V>>> {
        self.get_at(owner, name, Utc::now())
    }

    /// Number of stored channel versions.
    pub fn len(&self) -> u64 {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Start of the next newer version of the same channel.
    fn newer_version_start(&self, key: &ChannelKey) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .by_owner
            .lower_key(key)?
            .filter(|newer| newer.same_channel(key))
            .map(|newer| newer.valid_start))
    }

    fn entry_for(&self, id: u64, value: V) -> Result<ChannelEntry<V>> {
        let key = directory_key(id, &value);
        let next_start = self.newer_version_start(&key)?;
        Ok(ChannelEntry {
            id: self.big_id(id),
            valid_time: effective_valid_time(key.valid_start, value.valid_time(), next_start),
            value,
        })
    }

    /// Phenomenon and result time ranges of the records of channel `id`.
    pub fn time_ranges(&self, id: BigId) -> Result<Option<(TimeRange, TimeRange)>> {
        let record_stores = self.record_stores.read().clone();
        for records in record_stores {
            if let Some(ranges) = records.time_ranges(id.id)? {
                return Ok(Some(ranges));
            }
        }
        Ok(None)
    }

    // -------------------------------------------------------------------------
    // Selection
    // -------------------------------------------------------------------------

    pub fn select(&self, filter: &ChannelFilter<V>) -> QueryStream<'_, ChannelEntry<V>> {
        let filter = match self.resolve_joins(filter) {
            Ok(filter) => filter.into_owned(),
            Err(e) => return QueryStream::new(std::iter::once(Err(e)), true),
        };
        let plan = ScanPlan::for_channels(&filter);
        let candidates = self.candidates(plan.primary, &filter);
        let limit = plan.limit;
        let now = Utc::now();

        let stream = candidates.filter_map(move |item| {
            item.and_then(|(id, value)| self.resolve(id, value, &plan, &filter, now))
                .transpose()
        });
        QueryStream::new(stream, true).limit(limit)
    }

    pub fn select_keys(&self, filter: &ChannelFilter<V>) -> QueryStream<'_, BigId> {
        self.select(filter).map_ok(|entry| entry.id)
    }

    pub fn count(&self, filter: &ChannelFilter<V>) -> Result<u64> {
        let filter = self.resolve_joins(filter)?;
        let plan = ScanPlan::for_channels(&filter);
        if plan.primary == PrimaryIndex::FullScan && plan.residuals.is_empty() {
            let total = self.records.len();
            return Ok(filter.limit.map_or(total, |limit| total.min(limit)));
        }
        self.select(&filter).try_count()
    }

    /// `filter` with its owner and record filters replaced by the ids they
    /// select.
    fn resolve_joins<'f>(&self, filter: &'f ChannelFilter<V>) -> Result<Cow<'f, ChannelFilter<V>>> {
        if !filter.has_joins() {
            return Ok(Cow::Borrowed(filter));
        }
        let mut resolved = filter.clone();
        if let Some(owner_filter) = resolved.owner_filter.take() {
            let Some(owners) = self.owner_query.read().clone() else {
                return Err(AegisError::Unsupported(format!("{}: no owner store linked", self.name())));
            };
            narrow_ids(&mut resolved.owner_ids, owners.resolve_ids(&owner_filter)?);
        }
        if let Some(record_filter) = resolved.record_filter.take() {
            let Some(records) = self.record_query.read().clone() else {
                return Err(AegisError::Unsupported(format!("{}: no record store linked", self.name())));
            };
            narrow_ids(&mut resolved.internal_ids, records.resolve_ids(&record_filter)?);
        }
        Ok(Cow::Owned(resolved))
    }

    fn candidates(&self, primary: PrimaryIndex, filter: &ChannelFilter<V>) -> BoxedIter<'_, (u64, V)> {
        match primary {
            PrimaryIndex::InternalIds => {
                let ids: Vec<u64> = filter.internal_ids.iter().flatten().copied().collect();
                self.channels_by_id(ids)
            }
            PrimaryIndex::Owner => {
                let owners: Vec<u64> = filter.owner_ids.iter().flatten().copied().collect();
                Box::new(owners.into_iter().flat_map(move |owner| {
                    let lo = ChannelKey::owner_start(owner);
                    let hi = ChannelKey::owner_start(owner.saturating_add(1));
                    self.by_owner
                        .key_range(Bound::Included(&lo), Bound::Excluded(&hi))
                        .filter_map(move |key| {
                            key.and_then(|key| Ok(self.records.get(&key.internal_id)?.map(|v| (key.internal_id, v))))
                                .transpose()
                        })
                }))
            }
            PrimaryIndex::FullText => match &filter.full_text {
                Some(text) => match self.text.select_keys(&text.keywords) {
                    Ok(keys) => {
                        let ids: Result<Vec<u64>> = keys.iter().map(|bytes| u64::from_key_bytes(bytes)).collect();
                        match ids {
                            Ok(ids) => self.channels_by_id(ids),
                            Err(e) => Box::new(std::iter::once(Err(e))),
                        }
                    }
                    Err(e) => Box::new(std::iter::once(Err(e))),
                },
                None => Box::new(std::iter::empty()),
            },
            _ => Box::new(self.records.iter()),
        }
    }

    fn channels_by_id(&self, ids: Vec<u64>) -> BoxedIter<'_, (u64, V)> {
        let ids: BTreeSet<u64> = ids.into_iter().collect();
        Box::new(ids.into_iter().filter_map(move |id| {
            self.records.get(&id).map(|found| found.map(|value| (id, value))).transpose()
        }))
    }

    fn resolve(
        &self,
        id: u64,
        value: V,
        plan: &ScanPlan,
        filter: &ChannelFilter<V>,
        now: DateTime<Utc>,
    ) -> Result<Option<ChannelEntry<V>>> {
        let key = directory_key(id, &value);
        let entry = self.entry_for(id, value)?;

        for residual in &plan.residuals {
            let keep = match residual {
                Residual::Owner => filter
                    .owner_ids
                    .as_ref()
                    .map_or(true, |owners| owners.contains(&key.owner_id)),
                Residual::ChannelNames => filter
                    .channel_names
                    .as_ref()
                    .map_or(true, |names| names.contains(&key.name)),
                Residual::FullText => filter
                    .full_text
                    .as_ref()
                    .map_or(true, |text| self.text.contains_any(&id.to_key_bytes(), &text.keywords)),
                Residual::ValidTime => match &filter.valid_time {
                    Some(TemporalFilter::Range(range)) => entry.valid_time.intersects(range),
                    Some(TemporalFilter::Current) => entry.valid_time.contains(&now),
                    Some(TemporalFilter::Latest) => self.newer_version_start(&key)?.is_none(),
                    None => true,
                },
                Residual::ValuePredicate => filter
                    .value_predicate
                    .as_ref()
                    .map_or(true, |predicate| predicate(&entry.value)),
                _ => true,
            };
            if !keep {
                return Ok(None);
            }
        }
        Ok(Some(entry))
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

fn start_of<V: Channel>(value: &V) -> DateTime<Utc> {
    value.valid_time().map_or(TIMELESS, |t| t.begin)
}

fn directory_key<V: Channel>(id: u64, value: &V) -> ChannelKey {
    ChannelKey::new(value.owner_id().id, value.channel_name(), start_of(value), id)
}

impl<V: Channel> EntityLookup for ChannelStore<V> {
    fn contains_internal_id(&self, id: u64) -> Result<bool> {
        Ok(self.records.contains_key(&id))
    }

    fn current_valid_start(&self, id: u64) -> Result<Option<DateTime<Utc>>> {
        Ok(self.records.get(&id)?.map(|value| start_of(&value)))
    }
}

impl<V: Channel> IdResolver<ChannelFilter<V>> for ChannelStore<V> {
    fn resolve_ids(&self, filter: &ChannelFilter<V>) -> Result<BTreeSet<u64>> {
        let mut ids = BTreeSet::new();
        for id in self.select_keys(filter) {
            ids.insert(id?.id);
        }
        Ok(ids)
    }
}

impl<V: Channel> OwnerCascade for ChannelStore<V> {
    fn remove_by_owner(&self, owner_id: u64) -> Result<u64> {
        self.core.atomically("remove_by_owner", || {
            let lo = ChannelKey::owner_start(owner_id);
            let hi = ChannelKey::owner_start(owner_id.saturating_add(1));
            let keys: Vec<ChannelKey> = self
                .by_owner
                .key_range(Bound::Included(&lo), Bound::Excluded(&hi))
                .collect::<Result<_>>()?;
            let mut removed = 0;
            for key in keys {
                if self.remove_channel(key.internal_id)?.is_some() {
                    removed += 1;
                }
            }
            Ok(removed)
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
