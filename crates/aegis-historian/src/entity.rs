//! Aegis Entity Store - Versioned Entities
//!
//! Generic store for entities that keep several valid-time versions:
//! systems, procedures, deployments and features of interest. Versions are
//! keyed by `(parent id, local id, valid start)`; the end of a version's
//! validity is never stored but derived at read time from the start of the
//! next version of the same entity.
//!
//! Key Features:
//! - Parent/child hierarchy with parent existence checks
//! - Unique-name directory and pluggable id providers
//! - Spatial and full-text secondary indexes plus caller-supplied ones
//! - Current, latest and point-in-time version resolution
//! - Removal cascading into owned channels
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::filter::{EntityFilter, TemporalFilter};
use crate::geom::Bbox;
use crate::ids::{provider_for, IdProvider};
use crate::index::{FullTextIndex, SecondaryIndex, SpatialIndex};
use crate::keys::{EntityKey, FeatureKey, MAX_ID};
use crate::link::{EntityLookup, IdResolver, OwnerCascade};
use crate::merge::{BoxedIter, QueryStream};
use crate::model::VersionedEntity;
use crate::planner::{PrimaryIndex, Residual, ScanPlan};
use crate::store::{StoreCore, StoreKind};
use aegis_common::{AegisError, BigId, HistorianConfig, Result, TimeExtent, TIMELESS, TIME_MAX, TIME_MIN};
use aegis_storage::{BincodeCodec, MapKey, MapStore, SortedMap, ValueCodec};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::ops::Bound;
use std::sync::Arc;

const PREFIX: &str = "@feature";

// =============================================================================
// Entries
// =============================================================================

/// One stored version with its effective validity.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedEntry<V> {
    pub key: FeatureKey,
    /// `BigId::NONE` for top-level entities.
    pub parent_id: BigId,
    pub value: V,
    pub valid_time: TimeExtent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct IdEntry {
    parent_id: u64,
    uid: String,
}

/// Validity of the version starting at `valid_start`, clipped to the start
/// of the next version if there is one.
pub fn effective_valid_time(
    valid_start: DateTime<Utc>,
    declared: Option<TimeExtent>,
    next_start: Option<DateTime<Utc>>,
) -> TimeExtent {
    let end = match (declared.and_then(|d| d.end), next_start) {
        (Some(end), Some(next)) => Some(end.min(next)),
        (Some(end), None) => Some(end),
        (None, next) => next,
    };
    TimeExtent { begin: valid_start, end }
}

// =============================================================================
// Entity Store
// =============================================================================

pub struct EntityStore<V: VersionedEntity> {
    core: StoreCore,
    records: SortedMap<EntityKey, V>,
    ids: SortedMap<u64, IdEntry>,
    uids: SortedMap<String, u64>,
    spatial: Arc<SpatialIndex>,
    text: Arc<FullTextIndex>,
    indexes: RwLock<Vec<Arc<dyn SecondaryIndex<V>>>>,
    id_provider: Arc<dyn IdProvider>,
    parent_store: RwLock<Option<Arc<dyn EntityLookup>>>,
    dependents: RwLock<Vec<Arc<dyn OwnerCascade>>>,
}

impl<V: VersionedEntity + Serialize + DeserializeOwned> EntityStore<V> {
    /// Open the entity store `name` with the default payload codec.
    pub fn open(engine: &Arc<MapStore>, name: &str, config: &HistorianConfig) -> Result<Self> {
        Self::open_with_codec(engine, name, config, Arc::new(BincodeCodec))
    }
}

impl<V: VersionedEntity> EntityStore<V> {
    pub fn open_with_codec(
        engine: &Arc<MapStore>,
        name: &str,
        config: &HistorianConfig,
        codec: Arc<dyn ValueCodec<V>>,
    ) -> Result<Self> {
        let core = StoreCore::open(engine, name, PREFIX, StoreKind::Entities, config)?;
        let spatial = Arc::new(SpatialIndex::open(&core, "_spatial"));
        let text = Arc::new(FullTextIndex::open(&core, "_text"));
        let indexes: Vec<Arc<dyn SecondaryIndex<V>>> = vec![spatial.clone(), text.clone()];

        Ok(Self {
            records: core.open_map_with("_records", codec),
            ids: core.open_map("_ids"),
            uids: core.open_map("_uids"),
            spatial,
            text,
            indexes: RwLock::new(indexes),
            id_provider: provider_for(config.datastore.id_provider),
            parent_store: RwLock::new(None),
            dependents: RwLock::new(Vec::new()),
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

    fn parent_ref(&self, parent_id: u64) -> BigId {
        if parent_id == 0 {
            BigId::NONE
        } else {
            self.big_id(parent_id)
        }
    }

    // -------------------------------------------------------------------------
    // Links
    // -------------------------------------------------------------------------

    /// Validate parent ids against `parents` instead of this store.
    pub fn link_parent_store(&self, parents: Arc<dyn EntityLookup>) {
        *self.parent_store.write() = Some(parents);
    }

    /// Register a store whose resources are removed with their owner.
    pub fn add_dependent(&self, dependent: Arc<dyn OwnerCascade>) {
        self.dependents.write().push(dependent);
    }

    /// Register an extra secondary index. It only sees entries written
    /// after registration.
    pub fn add_index(&self, index: Arc<dyn SecondaryIndex<V>>) {
        self.indexes.write().push(index);
    }

    fn index_list(&self) -> Vec<Arc<dyn SecondaryIndex<V>>> {
        self.indexes.read().clone()
    }

    fn parent_exists(&self, parent_id: u64) -> Result<bool> {
        let linked = self.parent_store.read().clone();
        match linked {
            Some(parents) => parents.contains_internal_id(parent_id),
            None => Ok(self.ids.contains_key(&parent_id)),
        }
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Add a new top-level entity.
    pub fn add(&self, value: V) -> Result<FeatureKey> {
        self.add_with_parent(0, value)
    }

    /// Add a new entity under `parent`.
    pub fn add_child(&self, parent: BigId, value: V) -> Result<FeatureKey> {
        self.add_with_parent(parent.id, value)
    }

    fn add_with_parent(&self, parent_id: u64, value: V) -> Result<FeatureKey> {
        self.core.atomically("add", || {
            let uid = value.unique_id().to_string();
            if self.uids.contains_key(&uid) {
                return Err(AegisError::UniqueViolation(format!(
                    "{}: unique id {} already exists",
                    self.name(),
                    uid
                )));
            }
            if parent_id != 0 && !self.parent_exists(parent_id)? {
                return Err(AegisError::UnknownReference(format!(
                    "{}: unknown parent {}",
                    self.name(),
                    self.big_id(parent_id)
                )));
            }

            let valid_start = value.valid_time().map(|t| t.begin).unwrap_or(TIMELESS);
            let last_id = self.ids.last_key()?;
            let id = self
                .id_provider
                .new_id(&uid, &valid_start, last_id, &|candidate| self.ids.contains_key(&candidate))?;

            let key = EntityKey::new(parent_id, id, valid_start);
            self.insert_version(&key, &value)?;
            self.ids.put(&id, &IdEntry { parent_id, uid: uid.clone() })?;
            self.uids.put(&uid, &id)?;
            Ok(FeatureKey::new(self.big_id(id), valid_start))
        })
    }

    /// Append a new valid-time version to the entity with the same unique id.
    ///
    /// Without a declared valid time the version starts now. The new start
    /// must be later than every existing version's.
    pub fn add_version(&self, value: V) -> Result<FeatureKey> {
        self.core.atomically("add_version", || {
            let uid = value.unique_id();
            let Some(id) = self.uids.get(&uid.to_string())? else {
                return Err(AegisError::Unsupported(format!(
                    "{}: cannot add a version to unknown entity {}",
                    self.name(),
                    uid
                )));
            };
            let entry = self.id_entry(id)?;
            let valid_start = value.valid_time().map(|t| t.begin).unwrap_or_else(Utc::now);

            if let Some(latest) = self.version_key_at(entry.parent_id, id, TIME_MAX)? {
                if valid_start == latest.valid_start {
                    return Err(AegisError::DuplicateVersion(format!(
                        "{}: {} already has a version starting at {}",
                        self.name(),
                        uid,
                        valid_start.to_rfc3339()
                    )));
                }
                if valid_start < latest.valid_start {
                    return Err(AegisError::InvalidArgument(format!(
                        "{}: version of {} starting at {} predates the latest version",
                        self.name(),
                        uid,
                        valid_start.to_rfc3339()
                    )));
                }
            }

            let key = EntityKey::new(entry.parent_id, id, valid_start);
            self.insert_version(&key, &value)?;
            Ok(FeatureKey::new(self.big_id(id), valid_start))
        })
    }

    /// Replace an existing version. The unique id cannot change.
    pub fn put(&self, key: &FeatureKey, value: V) -> Result<V> {
        self.core.atomically("put", || {
            let entry = self.id_entry_opt(key.internal_id.id)?.ok_or_else(|| {
                AegisError::InvalidArgument(format!("{}: no entity {}", self.name(), key))
            })?;
            if entry.uid != value.unique_id() {
                return Err(AegisError::InvalidArgument(format!(
                    "{}: cannot change unique id {} to {}",
                    self.name(),
                    entry.uid,
                    value.unique_id()
                )));
            }

            let storage_key = EntityKey::new(entry.parent_id, key.internal_id.id, key.valid_start);
            if !self.records.contains_key(&storage_key) {
                return Err(AegisError::InvalidArgument(format!("{}: no version {}", self.name(), key)));
            }
            let Some(old) = self.records.put(&storage_key, &value)? else {
                return Err(AegisError::Internal(format!("{}: version {} vanished", self.name(), key)));
            };
            let primary_key = storage_key.to_key_bytes();
            for index in self.index_list() {
                index.update(&primary_key, &old, &value)?;
            }
            Ok(old)
        })
    }

    fn insert_version(&self, key: &EntityKey, value: &V) -> Result<()> {
        if self.records.put_if_absent(key, value)?.is_some() {
            return Err(AegisError::AlreadyExists(format!(
                "{}: version {}@{} already exists",
                self.name(),
                key.internal_id,
                key.valid_start.to_rfc3339()
            )));
        }
        let primary_key = key.to_key_bytes();
        for index in self.index_list() {
            index.add(&primary_key, value)?;
        }
        Ok(())
    }

    /// Remove one version. Removing the last version of an entity removes
    /// the entity and everything its dependents hold for it.
    pub fn remove(&self, key: &FeatureKey) -> Result<Option<V>> {
        self.core.atomically("remove", || self.remove_version(key.internal_id.id, key.valid_start))
    }

    /// Remove every version of an entity. Returns the number removed.
    pub fn remove_entity(&self, id: BigId) -> Result<u64> {
        self.core.atomically("remove_entity", || {
            let Some(entry) = self.id_entry_opt(id.id)? else {
                return Ok(0);
            };
            let (lo, hi) = EntityKey::entity_bounds(entry.parent_id, id.id);
            let keys: Vec<EntityKey> = self.records.key_range(Bound::Included(&lo), Bound::Included(&hi)).collect::<Result<_>>()?;
            let mut removed = 0;
            for key in keys {
                if self.remove_version(key.internal_id, key.valid_start)?.is_some() {
                    removed += 1;
                }
            }
            Ok(removed)
        })
    }

    /// Remove every version matched by `filter`.
    pub fn remove_entries(&self, filter: &EntityFilter<V>) -> Result<u64> {
        let keys: Vec<FeatureKey> = self.select_keys(filter).try_collect()?;
        self.core.atomically("remove_entries", || {
            let mut removed = 0;
            for key in &keys {
                if self.remove_version(key.internal_id.id, key.valid_start)?.is_some() {
                    removed += 1;
                }
            }
            Ok(removed)
        })
    }

    fn remove_version(&self, id: u64, valid_start: DateTime<Utc>) -> Result<Option<V>> {
        let Some(entry) = self.id_entry_opt(id)? else {
            return Ok(None);
        };
        let key = EntityKey::new(entry.parent_id, id, valid_start);
        let Some(old) = self.records.remove(&key)? else {
            return Ok(None);
        };

        let primary_key = key.to_key_bytes();
        for index in self.index_list() {
            index.remove(&primary_key, &old)?;
        }

        let (lo, hi) = EntityKey::entity_bounds(entry.parent_id, id);
        let has_versions = self.records.key_range(Bound::Included(&lo), Bound::Included(&hi)).next().is_some();
        if !has_versions {
            self.ids.delete(&id)?;
            self.uids.delete(&entry.uid)?;
            self.cascade_removal(id)?;
        }
        Ok(Some(old))
    }

    fn cascade_removal(&self, id: u64) -> Result<()> {
        let dependents = self.dependents.read().clone();
        for dependent in dependents {
            let removed = dependent.remove_by_owner(id)?;
            if removed > 0 {
                tracing::info!("{}: removing {} cascaded to {} dependent resources", self.name(), self.big_id(id), removed);
            }
        }
        Ok(())
    }

    /// Remove every entity.
    pub fn clear(&self) -> Result<()> {
        self.core.atomically("clear", || {
            let ids: Vec<u64> = self.ids.keys().collect::<Result<_>>()?;
            self.records.clear()?;
            self.ids.clear()?;
            self.uids.clear()?;
            for index in self.index_list() {
                index.clear()?;
            }
            for id in ids {
                self.cascade_removal(id)?;
            }
            Ok(())
        })
    }

    // -------------------------------------------------------------------------
    // Point Reads
    // -------------------------------------------------------------------------

    fn id_entry_opt(&self, id: u64) -> Result<Option<IdEntry>> {
        self.ids.get(&id)
    }

    fn id_entry(&self, id: u64) -> Result<IdEntry> {
        self.id_entry_opt(id)?
            .ok_or_else(|| AegisError::Corruption(format!("{}: unique id maps to missing entity {}", self.name(), id)))
    }

    /// Key of the version of `id` in force at `at`, by floor lookup.
    fn version_key_at(&self, parent_id: u64, id: u64, at: DateTime<Utc>) -> Result<Option<EntityKey>> {
        Ok(self
            .records
            .floor_key(&EntityKey::new(parent_id, id, at))?
            .filter(|key| key.parent_id == parent_id && key.internal_id == id))
    }

    fn next_version_start(&self, key: &EntityKey) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .records
            .higher_key(key)?
            .filter(|next| next.same_entity(key))
            .map(|next| next.valid_start))
    }

    fn entry_for(&self, key: EntityKey, value: V) -> Result<VersionedEntry<V>> {
        let next_start = self.next_version_start(&key)?;
        let valid_time = effective_valid_time(key.valid_start, value.valid_time(), next_start);
        Ok(VersionedEntry {
            key: FeatureKey::new(self.big_id(key.internal_id), key.valid_start),
            parent_id: self.parent_ref(key.parent_id),
            value,
            valid_time,
        })
    }

    fn entry_at(&self, id: u64, at: DateTime<Utc>) -> Result<Option<VersionedEntry<V>>> {
        let Some(entry) = self.id_entry_opt(id)? else {
            return Ok(None);
        };
        let Some(key) = self.version_key_at(entry.parent_id, id, at)? else {
            return Ok(None);
        };
        let Some(value) = self.records.get(&key)? else {
            return Ok(None);
        };
        let resolved = self.entry_for(key, value)?;
        Ok(resolved.valid_time.contains(&at).then_some(resolved))
    }

    pub fn get(&self, key: &FeatureKey) -> Result<Option<V>> {
        match self.id_entry_opt(key.internal_id.id)? {
            Some(entry) => self
                .records
                .get(&EntityKey::new(entry.parent_id, key.internal_id.id, key.valid_start)),
            None => Ok(None),
        }
    }

    /// Version with its effective validity.
    pub fn get_entry(&self, key: &FeatureKey) -> Result<Option<VersionedEntry<V>>> {
        let Some(entry) = self.id_entry_opt(key.internal_id.id)? else {
            return Ok(None);
        };
        let storage_key = EntityKey::new(entry.parent_id, key.internal_id.id, key.valid_start);
        match self.records.get(&storage_key)? {
            Some(value) => Ok(Some(self.entry_for(storage_key, value)?)),
            None => Ok(None),
        }
    }

    /// Version valid now.
    pub fn get_current(&self, id: BigId) -> Result<Option<VersionedEntry<V>>> {
        self.entry_at(id.id, Utc::now())
    }

    /// Version valid at `at`.
    pub fn get_at(&self, id: BigId, at: DateTime<Utc>) -> Result<Option<VersionedEntry<V>>> {
        self.entry_at(id.id, at)
    }

    /// Newest version, whether or not it is in force yet.
    pub fn get_latest(&self, id: BigId) -> Result<Option<VersionedEntry<V>>> {
        let Some(entry) = self.id_entry_opt(id.id)? else {
            return Ok(None);
        };
        let Some(key) = self.version_key_at(entry.parent_id, id.id, TIME_MAX)? else {
            return Ok(None);
        };
        match self.records.get(&key)? {
            Some(value) => Ok(Some(self.entry_for(key, value)?)),
            None => Ok(None),
        }
    }

    pub fn get_current_by_uid(&self, uid: &str) -> Result<Option<VersionedEntry<V>>> {
        match self.internal_id(uid)? {
            Some(id) => self.get_current(id),
            None => Ok(None),
        }
    }

    pub fn get_latest_by_uid(&self, uid: &str) -> Result<Option<VersionedEntry<V>>> {
        match self.internal_id(uid)? {
            Some(id) => self.get_latest(id),
            None => Ok(None),
        }
    }

    pub fn internal_id(&self, uid: &str) -> Result<Option<BigId>> {
        Ok(self.uids.get(&uid.to_string())?.map(|id| self.big_id(id)))
    }

    pub fn contains_key(&self, key: &FeatureKey) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    pub fn contains_uid(&self, uid: &str) -> bool {
        self.uids.contains_key(&uid.to_string())
    }

    pub fn contains_id(&self, id: BigId) -> bool {
        self.ids.contains_key(&id.id)
    }

    /// Number of stored versions.
    pub fn len(&self) -> u64 {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of distinct entities.
    pub fn num_entities(&self) -> u64 {
        self.ids.len()
    }

    /// Envelope of every indexed geometry.
    pub fn features_bbox(&self) -> Result<Option<Bbox>> {
        self.spatial.extent()
    }

    // -------------------------------------------------------------------------
    // Selection
    // -------------------------------------------------------------------------

    /// Versions matching `filter`, in key order.
    pub fn select(&self, filter: &EntityFilter<V>) -> QueryStream<'_, VersionedEntry<V>> {
        let plan = ScanPlan::for_entities(filter);
        let candidates = self.candidates(plan.primary, filter);
        let filter = filter.clone();
        let limit = plan.limit;
        let now = Utc::now();

        let stream = candidates.filter_map(move |item| {
            let resolved = item.and_then(|(key, value)| self.resolve(key, value, &plan, &filter, now));
            resolved.transpose()
        });
        QueryStream::new(stream, true).limit(limit)
    }

    pub fn select_keys(&self, filter: &EntityFilter<V>) -> QueryStream<'_, FeatureKey> {
        self.select(filter).map_ok(|entry| entry.key)
    }

    pub fn count(&self, filter: &EntityFilter<V>) -> Result<u64> {
        let plan = ScanPlan::for_entities(filter);
        if plan.primary == PrimaryIndex::FullScan && plan.residuals.is_empty() {
            let total = self.records.len();
            return Ok(filter.limit.map_or(total, |limit| total.min(limit)));
        }
        self.select(filter).try_count()
    }

    fn candidates(&self, primary: PrimaryIndex, filter: &EntityFilter<V>) -> BoxedIter<'_, (EntityKey, V)> {
        match primary {
            PrimaryIndex::InternalIds => {
                let ids: Vec<u64> = filter.internal_ids.iter().flatten().copied().collect();
                Box::new(ids.into_iter().flat_map(move |id| self.versions_of(id)))
            }
            PrimaryIndex::UniqueIds => match &filter.unique_ids {
                Some(crate::filter::UidFilter::Exact(uids)) => {
                    let uids: Vec<String> = uids.iter().cloned().collect();
                    Box::new(uids.into_iter().flat_map(move |uid| match self.uids.get(&uid) {
                        Ok(Some(id)) => self.versions_of(id),
                        Ok(None) => Box::new(std::iter::empty()),
                        Err(e) => failed(e),
                    }))
                }
                Some(crate::filter::UidFilter::Prefix(prefix)) => {
                    let bound = prefix.clone();
                    let prefix = prefix.clone();
                    let directory = self.uids.range(Bound::Included(&bound), Bound::Unbounded);
                    Box::new(
                        directory
                            .take_while(move |item| match item {
                                Ok((uid, _)) => uid.starts_with(prefix.as_str()),
                                Err(_) => true,
                            })
                            .flat_map(move |item| match item {
                                Ok((_, id)) => self.versions_of(id),
                                Err(e) => failed(e),
                            }),
                    )
                }
                None => Box::new(std::iter::empty()),
            },
            PrimaryIndex::Spatial => match &filter.spatial {
                Some(spatial) => match self.spatial.query(&spatial.region) {
                    Ok(keys) => self.keyed_entries(keys),
                    Err(e) => failed(e),
                },
                None => Box::new(std::iter::empty()),
            },
            PrimaryIndex::FullText => match &filter.full_text {
                Some(text) => match self.text.select_keys(&text.keywords) {
                    Ok(keys) => self.keyed_entries(keys),
                    Err(e) => failed(e),
                },
                None => Box::new(std::iter::empty()),
            },
            PrimaryIndex::Owner => {
                let parents: Vec<u64> = filter.parent_ids.iter().flatten().copied().collect();
                Box::new(parents.into_iter().flat_map(move |parent| {
                    let lo = EntityKey::new(parent, 0, TIME_MIN);
                    let hi = EntityKey::new(parent, MAX_ID, TIME_MAX);
                    self.records.range_inclusive(&lo, &hi)
                }))
            }
            PrimaryIndex::SubEntity | PrimaryIndex::FullScan => Box::new(self.records.iter()),
        }
    }

    fn versions_of(&self, id: u64) -> BoxedIter<'_, (EntityKey, V)> {
        match self.id_entry_opt(id) {
            Ok(Some(entry)) => {
                let (lo, hi) = EntityKey::entity_bounds(entry.parent_id, id);
                Box::new(self.records.range_inclusive(&lo, &hi))
            }
            Ok(None) => Box::new(std::iter::empty()),
            Err(e) => failed(e),
        }
    }

    fn keyed_entries(&self, keys: BTreeSet<Vec<u8>>) -> BoxedIter<'_, (EntityKey, V)> {
        Box::new(keys.into_iter().filter_map(move |bytes| {
            let lookup = EntityKey::from_key_bytes(&bytes)
                .and_then(|key| Ok(self.records.get(&key)?.map(|value| (key, value))));
            lookup.transpose()
        }))
    }

    fn resolve(
        &self,
        key: EntityKey,
        value: V,
        plan: &ScanPlan,
        filter: &EntityFilter<V>,
        now: DateTime<Utc>,
    ) -> Result<Option<VersionedEntry<V>>> {
        let primary_key = key.to_key_bytes();
        let entry = self.entry_for(key, value)?;

        for residual in &plan.residuals {
            let keep = match residual {
                Residual::Owner => filter
                    .parent_ids
                    .as_ref()
                    .map_or(true, |parents| parents.contains(&key.parent_id)),
                Residual::UniqueIds => filter
                    .unique_ids
                    .as_ref()
                    .map_or(true, |uids| uids.matches(entry.value.unique_id())),
                Residual::ValidTime => match &filter.valid_time {
                    Some(TemporalFilter::Range(range)) => entry.valid_time.intersects(range),
                    Some(TemporalFilter::Current) => entry.valid_time.contains(&now),
                    Some(TemporalFilter::Latest) => self.next_version_start(&key)?.is_none(),
                    None => true,
                },
                Residual::FullText => filter
                    .full_text
                    .as_ref()
                    .map_or(true, |text| self.text.contains_any(&primary_key, &text.keywords)),
                Residual::Spatial => filter
                    .spatial
                    .as_ref()
                    .map_or(true, |spatial| SpatialIndex::value_matches(&entry.value, &spatial.region)),
                Residual::ValuePredicate => filter
                    .value_predicate
                    .as_ref()
                    .map_or(true, |predicate| predicate(&entry.value)),
                Residual::ChannelNames | Residual::SubEntity | Residual::ResultTime => true,
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

fn failed<'a, T: 'a>(e: AegisError) -> BoxedIter<'a, T> {
    Box::new(std::iter::once(Err(e)))
}

impl<V: VersionedEntity> EntityLookup for EntityStore<V> {
    fn contains_internal_id(&self, id: u64) -> Result<bool> {
        Ok(self.ids.contains_key(&id))
    }

    fn current_valid_start(&self, id: u64) -> Result<Option<DateTime<Utc>>> {
        Ok(self.entry_at(id, Utc::now())?.map(|entry| entry.key.valid_start))
    }
}

impl<V: VersionedEntity> IdResolver<EntityFilter<V>> for EntityStore<V> {
    /// Local ids of the entities with at least one version matching `filter`.
    fn resolve_ids(&self, filter: &EntityFilter<V>) -> Result<BTreeSet<u64>> {
        let mut ids = BTreeSet::new();
        for key in self.select_keys(filter) {
            ids.insert(key?.internal_id.id);
        }
        Ok(ids)
    }
}

// =============================================================================
// Tests
// =============================================================================
