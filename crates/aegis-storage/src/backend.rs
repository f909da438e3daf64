//! Aegis Backend - Map Store Engine
//!
//! The ordered key-value engine the historian stores are built on. A
//! `MapStore` owns a set of named byte-level sorted maps that live in one
//! storage file. Stores open typed views onto those maps, bind them to
//! the engine undo journal, and mutate them inside envelopes.
//!
//! Key Features:
//! - Named sorted maps shared by name within one storage file
//! - One undo journal and one reentrant write lock per engine, so a write
//!   spanning several stores rolls back as a unit
//! - Write envelopes with rollback, gated against concurrent commits
//! - Commit to a checksummed image with write-then-rename
//! - Backup and restore through arbitrary writers and readers
//! - Read-only mode that rejects writes before any map is touched
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::codec::{MapKey, ValueCodec};
use crate::image::{MapImage, StoreImage};
use crate::map::{RawMap, SortedMap};
use crate::transaction::{Envelope, Journal};
use aegis_common::utils::format_size;
use aegis_common::{AegisError, Result, StorageConfig};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard, RwLock};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// =============================================================================
// Storage Statistics
// =============================================================================

/// Statistics about the maps held by a store.
#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    pub map_count: usize,
    pub total_entries: u64,
    pub total_bytes: u64,
    pub commits: u64,
}

// =============================================================================
// Map Store
// =============================================================================

/// A set of named sorted maps persisted together in one file.
pub struct MapStore {
    path: Option<PathBuf>,
    read_only: bool,
    batch_size: usize,
    maps: RwLock<BTreeMap<String, Arc<RawMap>>>,
    /// Held shared by every open envelope and exclusively by commit/restore.
    gate: RwLock<()>,
    /// Undo log of every store opened on this engine.
    journal: Arc<Journal>,
    writes: ReentrantMutex<()>,
    commits: AtomicU64,
}

impl MapStore {
    /// Volatile store that keeps every map in memory.
    pub fn in_memory() -> Arc<Self> {
        Arc::new(Self::empty(None, false, StorageConfig::default().cursor_batch_size))
    }

    fn empty(path: Option<PathBuf>, read_only: bool, batch_size: usize) -> Self {
        Self {
            path,
            read_only,
            batch_size,
            maps: RwLock::new(BTreeMap::new()),
            gate: RwLock::new(()),
            journal: Arc::new(Journal::new("engine")),
            writes: ReentrantMutex::new(()),
            commits: AtomicU64::new(0),
        }
    }

    /// Open the store described by `config`, loading its file if present.
    pub fn open(config: &StorageConfig) -> Result<Arc<Self>> {
        let store = Self::empty(config.path.clone(), config.read_only, config.cursor_batch_size);

        if let Some(path) = &config.path {
            if path.exists() {
                let image = read_image(path)?;
                tracing::info!(
                    "Opened store {} with {} maps, {} entries",
                    path.display(),
                    image.maps.len(),
                    image.entry_count()
                );
                store.load_image(image);
            } else if config.read_only {
                return Err(AegisError::Storage(format!(
                    "cannot open missing store {} read-only",
                    path.display()
                )));
            } else {
                tracing::debug!("Creating new store at {}", path.display());
            }
        }

        Ok(Arc::new(store))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn ensure_writable(&self, context: &str) -> Result<()> {
        if self.read_only {
            return Err(AegisError::ReadOnly(context.to_string()));
        }
        Ok(())
    }

    pub fn cursor_batch_size(&self) -> usize {
        self.batch_size
    }

    // -------------------------------------------------------------------------
    // Maps
    // -------------------------------------------------------------------------

    fn raw_map(&self, name: &str) -> Arc<RawMap> {
        if let Some(map) = self.maps.read().get(name) {
            return Arc::clone(map);
        }
        let mut maps = self.maps.write();
        Arc::clone(maps.entry(name.to_string()).or_insert_with(|| {
            tracing::debug!("Created map {}", name);
            Arc::new(RawMap::new(name))
        }))
    }

    /// Open (or create) the map `name` as a typed view journaled by `journal`.
    pub fn open_map<K: MapKey, V>(
        &self,
        name: &str,
        journal: &Arc<Journal>,
        codec: Arc<dyn ValueCodec<V>>,
    ) -> SortedMap<K, V> {
        SortedMap::new(
            self.raw_map(name),
            Arc::clone(journal),
            codec,
            self.batch_size,
            self.read_only,
        )
    }

    pub fn has_map(&self, name: &str) -> bool {
        self.maps.read().contains_key(name)
    }

    pub fn map_names(&self) -> Vec<String> {
        self.maps.read().keys().cloned().collect()
    }

    // -------------------------------------------------------------------------
    // Envelopes
    // -------------------------------------------------------------------------

    /// Journal shared by every store on this engine.
    pub fn journal(&self) -> &Arc<Journal> {
        &self.journal
    }

    /// Serialize writers. Reentrant, so a write on one store may call into
    /// another store on the same thread.
    pub fn lock_writes(&self) -> ReentrantMutexGuard<'_, ()> {
        self.writes.lock()
    }

    /// Open a write envelope on `journal`.
    ///
    /// Fails with `ReadOnly` on a read-only store. Envelopes may nest on one
    /// thread; a commit waits until no envelope is open.
    pub fn begin<'a>(&'a self, journal: &'a Journal) -> Result<Envelope<'a>> {
        self.ensure_writable(journal.name())?;
        Ok(Envelope::open(journal, self.gate.read_recursive()))
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    fn image(&self) -> StoreImage {
        let maps = self.maps.read();
        StoreImage {
            maps: maps
                .values()
                .map(|map| MapImage {
                    name: map.name().to_string(),
                    entries: map.snapshot(),
                })
                .collect(),
        }
    }

    fn load_image(&self, image: StoreImage) {
        let mut maps = self.maps.write();
        for map_image in image.maps {
            let entries: BTreeMap<Vec<u8>, Vec<u8>> = map_image.entries.into_iter().collect();
            match maps.get(&map_image.name) {
                // keep existing handles valid
                Some(existing) => existing.restore_contents(entries),
                None => {
                    let raw = RawMap::with_entries(map_image.name.clone(), entries);
                    maps.insert(map_image.name, Arc::new(raw));
                }
            }
        }
    }

    /// Persist every map. A no-op for in-memory stores apart from the
    /// commit counter.
    pub fn commit(&self) -> Result<()> {
        self.ensure_writable("commit")?;
        let _gate = self.gate.write();
        self.commits.fetch_add(1, Ordering::Relaxed);

        let Some(path) = &self.path else {
            return Ok(());
        };

        let image = self.image();
        let tmp_path = path.with_extension("tmp");
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let written = {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            let written = image.write_to(&mut writer)?;
            let file = writer.into_inner().map_err(|e| AegisError::Io(e.into_error()))?;
            file.sync_all()?;
            written
        };
        fs::rename(&tmp_path, path)?;

        tracing::info!(
            "Committed {} maps ({}) to {}",
            image.maps.len(),
            format_size(written),
            path.display()
        );
        Ok(())
    }

    /// Write a consistent image of every map to `writer`.
    pub fn backup(&self, writer: &mut dyn Write) -> Result<u64> {
        let _gate = self.gate.write();
        let image = self.image();
        let written = image.write_to(writer)?;
        tracing::info!("Backed up {} maps ({})", image.maps.len(), format_size(written));
        Ok(written)
    }

    /// Replace the contents of every map with the image read from `reader`.
    ///
    /// Maps absent from the image are cleared. Open typed views stay valid.
    pub fn restore(&self, reader: &mut dyn Read) -> Result<()> {
        self.ensure_writable("restore")?;
        let image = StoreImage::read_from(reader)?;
        let _gate = self.gate.write();

        let restored: Vec<String> = image.maps.iter().map(|m| m.name.clone()).collect();
        for (name, map) in self.maps.read().iter() {
            if !restored.contains(name) {
                map.restore_contents(BTreeMap::new());
            }
        }
        tracing::info!("Restoring {} maps, {} entries", image.maps.len(), image.entry_count());
        self.load_image(image);
        Ok(())
    }

    pub fn stats(&self) -> StorageStats {
        let maps = self.maps.read();
        StorageStats {
            map_count: maps.len(),
            total_entries: maps.values().map(|m| m.len() as u64).sum(),
            total_bytes: maps.values().map(|m| m.approximate_bytes()).sum(),
            commits: self.commits.load(Ordering::Relaxed),
        }
    }
}

fn read_image(path: &Path) -> Result<StoreImage> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    StoreImage::read_from(&mut reader)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BincodeCodec;

    fn string_map(store: &MapStore, journal: &Arc<Journal>, name: &str) -> SortedMap<u64, String> {
        store.open_map(name, journal, Arc::new(BincodeCodec))
    }

    #[test]
    fn test_maps_are_shared_by_name() {
        let store = MapStore::in_memory();
        let journal = Arc::new(Journal::new("a"));
        let first = string_map(&store, &journal, "a:main");
        let second = string_map(&store, &journal, "a:main");

        first.put(&1, &"one".to_string()).expect("put");
        assert_eq!(second.get(&1).expect("get").as_deref(), Some("one"));
        assert_eq!(store.map_names(), vec!["a:main".to_string()]);
    }

    #[test]
    fn test_envelope_rollback_across_maps() {
        let store = MapStore::in_memory();
        let journal = Arc::new(Journal::new("a"));
        let main = string_map(&store, &journal, "a:main");
        let index = string_map(&store, &journal, "a:index");

        let envelope = store.begin(&journal).expect("begin");
        main.put(&1, &"one".to_string()).unwrap();
        index.put(&7, &"seven".to_string()).unwrap();
        envelope.rollback().expect("rollback");

        assert!(main.is_empty());
        assert!(index.is_empty());
    }

    #[test]
    fn test_nested_envelopes_share_engine_journal() {
        let store = MapStore::in_memory();
        let journal = store.journal();
        let owners = string_map(&store, journal, "sys:main");
        let streams = string_map(&store, journal, "obs:main");
        owners.put(&1, &"station".to_string()).unwrap();
        streams.put(&10, &"temp".to_string()).unwrap();

        let _writes = store.lock_writes();
        let outer = store.begin(journal).expect("begin");
        owners.delete(&1).unwrap();
        {
            let _nested = store.lock_writes();
            let inner = store.begin(journal).expect("begin");
            streams.delete(&10).unwrap();
            inner.complete();
        }
        assert_eq!(journal.stats().pending_entries, 2);
        outer.rollback().expect("rollback");

        assert_eq!(owners.get(&1).unwrap().as_deref(), Some("station"));
        assert_eq!(streams.get(&10).unwrap().as_deref(), Some("temp"));
        assert_eq!(journal.stats().depth, 0);
    }

    #[test]
    fn test_commit_and_reopen() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = StorageConfig {
            path: Some(dir.path().join("historian.db")),
            ..Default::default()
        };

        {
            let store = MapStore::open(&config).expect("open");
            let journal = Arc::new(Journal::new("a"));
            let map = string_map(&store, &journal, "a:main");
            map.put(&42, &"answer".to_string()).unwrap();
            store.commit().expect("commit");
        }

        let store = MapStore::open(&config).expect("reopen");
        let journal = Arc::new(Journal::new("a"));
        let map = string_map(&store, &journal, "a:main");
        assert_eq!(map.get(&42).unwrap().as_deref(), Some("answer"));
        assert_eq!(store.stats().map_count, 1);
    }

    #[test]
    fn test_read_only_store() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("ro.db");
        let config = StorageConfig {
            path: Some(path.clone()),
            read_only: true,
            ..Default::default()
        };
        assert!(MapStore::open(&config).is_err());

        let writable = MapStore::open(&StorageConfig {
            path: Some(path),
            ..Default::default()
        })
        .expect("open");
        writable.commit().expect("commit");

        let store = MapStore::open(&config).expect("open read-only");
        let journal = Journal::new("a");
        assert!(matches!(store.begin(&journal), Err(AegisError::ReadOnly(_))));
        assert!(matches!(store.commit(), Err(AegisError::ReadOnly(_))));
    }

    #[test]
    fn test_backup_restore_keeps_handles() {
        let store = MapStore::in_memory();
        let journal = Arc::new(Journal::new("a"));
        let map = string_map(&store, &journal, "a:main");
        map.put(&1, &"before".to_string()).unwrap();

        let mut backup = Vec::new();
        store.backup(&mut backup).expect("backup");

        map.put(&1, &"after".to_string()).unwrap();
        map.put(&2, &"extra".to_string()).unwrap();
        store.restore(&mut &backup[..]).expect("restore");

        assert_eq!(map.get(&1).unwrap().as_deref(), Some("before"));
        assert!(!map.contains_key(&2));
    }
}
