//! Aegis Store Core - Shared Store Plumbing
//!
//! State every historian store carries: its name, the shared map engine
//! and the datastore settings. All public mutations run through
//! [`StoreCore::atomically`], which takes the engine write lock, opens an
//! envelope on the engine journal and rolls back on failure. Stores on one
//! engine share that journal, so a cascade from one store into another
//! rolls back as a unit.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use aegis_common::{AegisError, DatastoreConfig, HistorianConfig, Result};
use aegis_storage::{BincodeCodec, MapKey, MapStore, SortedMap, ValueCodec};
use aegis_storage::JournalStats;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::cell::Cell;
use std::io::{Read, Write};
use std::sync::Arc;

/// Map listing every store opened on an engine.
pub const REGISTRY_MAP: &str = "@datastores";

thread_local! {
    /// Number of write envelopes open on this thread, across all stores.
    static WRITE_DEPTH: Cell<usize> = const { Cell::new(0) };
}

// =============================================================================
// Datastore Registry
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreKind {
    Entities,
    Channels,
    Records,
}

/// Registry entry of one opened store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreInfo {
    pub name: String,
    pub kind: StoreKind,
    pub id_scope: u32,
    pub created: DateTime<Utc>,
}

// =============================================================================
// Store Core
// =============================================================================

pub struct StoreCore {
    name: String,
    prefix: String,
    /// `"<name>:<prefix>"`, the registry key.
    store_id: String,
    engine: Arc<MapStore>,
    settings: DatastoreConfig,
    autocommit: bool,
}

impl StoreCore {
    /// Open the store `name`, whose maps are named `"<name>:<prefix><role>"`.
    ///
    /// The store is recorded in the engine registry on first open; opening
    /// it again with a different kind fails.
    pub fn open(
        engine: &Arc<MapStore>,
        name: &str,
        prefix: &str,
        kind: StoreKind,
        config: &HistorianConfig,
    ) -> Result<Self> {
        config.validate()?;
        let core = Self {
            name: name.to_string(),
            prefix: prefix.to_string(),
            store_id: format!("{}:{}", name, prefix),
            engine: Arc::clone(engine),
            settings: config.datastore.clone(),
            autocommit: config.storage.autocommit,
        };
        core.register(kind)?;
        tracing::debug!("Opened {:?} store {}:{}", kind, name, prefix);
        Ok(core)
    }

    fn register(&self, kind: StoreKind) -> Result<()> {
        let registry: SortedMap<String, StoreInfo> =
            self.engine.open_map(REGISTRY_MAP, self.engine.journal(), Arc::new(BincodeCodec));
        let key = self.store_id.clone();

        if let Some(info) = registry.get(&key)? {
            if info.kind != kind {
                return Err(AegisError::Configuration(format!(
                    "store {} is registered as {:?}, not {:?}",
                    key, info.kind, kind
                )));
            }
            return Ok(());
        }
        if self.engine.is_read_only() {
            return Ok(());
        }

        let _writes = self.engine.lock_writes();
        let envelope = self.engine.begin(self.engine.journal())?;
        registry.put(
            &key,
            &StoreInfo {
                name: key.clone(),
                kind,
                id_scope: self.settings.id_scope,
                created: Utc::now(),
            },
        )?;
        envelope.complete();
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn engine(&self) -> &Arc<MapStore> {
        &self.engine
    }

    pub fn settings(&self) -> &DatastoreConfig {
        &self.settings
    }

    pub fn id_scope(&self) -> u32 {
        self.settings.id_scope
    }

    pub fn is_read_only(&self) -> bool {
        self.engine.is_read_only()
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    /// Stats of the engine journal this store writes through.
    pub fn journal_stats(&self) -> JournalStats {
        self.engine.journal().stats()
    }

    pub fn map_name(&self, role: &str) -> String {
        format!("{}:{}{}", self.name, self.prefix, role)
    }

    pub fn open_map_with<K: MapKey, V>(&self, role: &str, codec: Arc<dyn ValueCodec<V>>) -> SortedMap<K, V> {
        self.engine.open_map(&self.map_name(role), self.engine.journal(), codec)
    }

    pub fn open_map<K: MapKey, V: Serialize + DeserializeOwned + 'static>(&self, role: &str) -> SortedMap<K, V> {
        self.open_map_with(role, Arc::new(BincodeCodec))
    }

    // -------------------------------------------------------------------------
    // Write Path
    // -------------------------------------------------------------------------

    /// Run `f` inside a write envelope under the engine write lock.
    ///
    /// If `f` fails, every map written since the envelope opened is rolled
    /// back, including maps of other stores written by a nested call, and
    /// the error is returned unchanged.
    pub fn atomically<T>(&self, op: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let result = {
            let _guard = self.engine.lock_writes();
            let envelope = self.engine.begin(self.engine.journal())?;
            let depth = DepthGuard::enter();
            let result = f();
            drop(depth);

            match result {
                Ok(value) => {
                    envelope.complete();
                    Ok(value)
                }
                Err(e) => {
                    match envelope.rollback() {
                        Ok(undone) => {
                            tracing::warn!("{} on {} failed, rolled back {} writes: {}", op, self.store_id, undone, e)
                        }
                        Err(rollback_err) => {
                            tracing::error!("{} on {} failed and rollback failed: {}", op, self.store_id, rollback_err)
                        }
                    }
                    Err(e)
                }
            }
        };

        if result.is_ok() && self.autocommit && DepthGuard::current() == 0 {
            self.engine.commit()?;
        }
        result
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    pub fn commit(&self) -> Result<()> {
        self.engine.commit()
    }

    pub fn backup(&self, writer: &mut dyn Write) -> Result<u64> {
        self.engine.backup(writer)
    }

    pub fn restore(&self, reader: &mut dyn Read) -> Result<()> {
        self.engine.restore(reader)
    }
}

struct DepthGuard;

impl DepthGuard {
    fn enter() -> Self {
        WRITE_DEPTH.with(|d| d.set(d.get() + 1));
        DepthGuard
    }

    fn current() -> usize {
        WRITE_DEPTH.with(|d| d.get())
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        WRITE_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

// =============================================================================
// Tests
// =============================================================================
