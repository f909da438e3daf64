//! Aegis Transaction - Version Markers and Rollback
//!
//! Undo journals that give an engine a version marker it can roll back
//! to. A store opens an envelope before a multi-map write; every map
//! mutation made while the envelope is open records the previous state of
//! the touched key, and a failed write rolls all of them back in reverse
//! order. Once the outermost envelope completes, the undo entries are
//! discarded.
//!
//! Key Features:
//! - Monotonic version markers per journal
//! - Nested envelopes with rollback to any open marker
//! - Automatic rollback when an envelope is dropped unfinished (panics)
//! - Commit gate that keeps persistence out of in-flight writes
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::map::RawMap;
use aegis_common::{AegisError, Result};
use parking_lot::{Mutex, RwLockReadGuard};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Undo Entries
// =============================================================================

pub(crate) enum UndoEntry {
    /// Restore one key to its previous value, or remove it if it was absent.
    Key {
        map: Arc<RawMap>,
        key: Vec<u8>,
        previous: Option<Vec<u8>>,
    },
    /// Restore the full contents of a cleared map.
    Contents {
        map: Arc<RawMap>,
        previous: BTreeMap<Vec<u8>, Vec<u8>>,
    },
}

impl UndoEntry {
    fn apply(self) {
        match self {
            UndoEntry::Key { map, key, previous } => map.restore_key(key, previous),
            UndoEntry::Contents { map, previous } => map.restore_contents(previous),
        }
    }
}

// =============================================================================
// Journal
// =============================================================================

/// Statistics about journal activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JournalStats {
    pub version: u64,
    pub pending_entries: usize,
    pub depth: usize,
    pub rollbacks: u64,
}

struct JournalState {
    entries: Vec<UndoEntry>,
    base_version: u64,
    depth: usize,
    rollbacks: u64,
}

/// Undo log shared by every map bound to it, normally all maps of one
/// engine.
pub struct Journal {
    name: String,
    state: Mutex<JournalState>,
}

impl Journal {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(JournalState {
                entries: Vec::new(),
                base_version: 0,
                depth: 0,
                rollbacks: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current version marker. Increases with every journaled mutation.
    pub fn current_version(&self) -> u64 {
        let state = self.state.lock();
        state.base_version + state.entries.len() as u64
    }

    /// True while at least one envelope is open.
    pub fn is_active(&self) -> bool {
        self.state.lock().depth > 0
    }

    pub(crate) fn record(&self, entry: UndoEntry) {
        let mut state = self.state.lock();
        if state.depth > 0 {
            state.entries.push(entry);
        }
    }

    /// Undo every mutation recorded after `version`.
    ///
    /// Returns the number of mutations undone. Fails if `version` predates
    /// the outermost open envelope.
    pub fn rollback_to(&self, version: u64) -> Result<usize> {
        let undone = {
            let mut state = self.state.lock();
            if version < state.base_version {
                return Err(AegisError::Storage(format!(
                    "journal {}: version {} is no longer retained (oldest {})",
                    self.name, version, state.base_version
                )));
            }
            let keep = (version - state.base_version) as usize;
            if keep >= state.entries.len() {
                return Ok(0);
            }
            state.rollbacks += 1;
            state.entries.split_off(keep)
        };

        let count = undone.len();
        for entry in undone.into_iter().rev() {
            entry.apply();
        }
        Ok(count)
    }

    fn enter(&self) -> u64 {
        let mut state = self.state.lock();
        state.depth += 1;
        state.base_version + state.entries.len() as u64
    }

    fn exit(&self) {
        let mut state = self.state.lock();
        state.depth = state.depth.saturating_sub(1);
        if state.depth == 0 {
            state.base_version += state.entries.len() as u64;
            state.entries.clear();
        }
    }

    pub fn stats(&self) -> JournalStats {
        let state = self.state.lock();
        JournalStats {
            version: state.base_version + state.entries.len() as u64,
            pending_entries: state.entries.len(),
            depth: state.depth,
            rollbacks: state.rollbacks,
        }
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// An open write envelope on a journal.
///
/// Call [`Envelope::complete`] to keep the writes, or [`Envelope::rollback`]
/// to revert them. Dropping an envelope without either reverts.
pub struct Envelope<'a> {
    journal: &'a Journal,
    version: u64,
    finished: bool,
    _gate: RwLockReadGuard<'a, ()>,
}

impl<'a> Envelope<'a> {
    pub(crate) fn open(journal: &'a Journal, gate: RwLockReadGuard<'a, ()>) -> Self {
        let version = journal.enter();
        Self {
            journal,
            version,
            finished: false,
            _gate: gate,
        }
    }

    /// Version marker captured when the envelope opened.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn complete(mut self) {
        self.finished = true;
        self.journal.exit();
    }

    /// Revert everything written through this envelope.
    pub fn rollback(mut self) -> Result<usize> {
        self.finished = true;
        let result = self.journal.rollback_to(self.version);
        self.journal.exit();
        result
    }
}

impl Drop for Envelope<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.journal.rollback_to(self.version) {
                tracing::error!("journal {}: rollback on drop failed: {}", self.journal.name(), e);
            }
            self.journal.exit();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;

    fn entry(map: &Arc<RawMap>, key: &[u8], previous: Option<&[u8]>) -> UndoEntry {
        UndoEntry::Key {
            map: Arc::clone(map),
            key: key.to_vec(),
            previous: previous.map(|p| p.to_vec()),
        }
    }

    #[test]
    fn test_rollback_restores_previous_values() {
        let gate = RwLock::new(());
        let journal = Journal::new("test");
        let map = Arc::new(RawMap::new("test:main"));
        map.restore_key(b"a".to_vec(), Some(b"1".to_vec()));

        let envelope = Envelope::open(&journal, gate.read());
        map.restore_key(b"a".to_vec(), Some(b"2".to_vec()));
        journal.record(entry(&map, b"a", Some(b"1")));
        map.restore_key(b"b".to_vec(), Some(b"3".to_vec()));
        journal.record(entry(&map, b"b", None));

        assert_eq!(envelope.rollback().expect("rollback"), 2);
        assert_eq!(map.get_raw(b"a"), Some(b"1".to_vec()));
        assert_eq!(map.get_raw(b"b"), None);
        assert_eq!(journal.stats().rollbacks, 1);
    }

    #[test]
    fn test_complete_discards_entries() {
        let gate = RwLock::new(());
        let journal = Journal::new("test");
        let map = Arc::new(RawMap::new("test:main"));

        let envelope = Envelope::open(&journal, gate.read());
        journal.record(entry(&map, b"a", None));
        envelope.complete();

        let stats = journal.stats();
        assert_eq!(stats.pending_entries, 0);
        assert_eq!(stats.version, 1);
        assert!(journal.rollback_to(0).is_err());
    }

    #[test]
    fn test_nested_envelope_rolls_back_inner_only() {
        let gate = RwLock::new(());
        let journal = Journal::new("test");
        let map = Arc::new(RawMap::new("test:main"));

        let outer = Envelope::open(&journal, gate.read_recursive());
        map.restore_key(b"a".to_vec(), Some(b"1".to_vec()));
        journal.record(entry(&map, b"a", None));

        let inner = Envelope::open(&journal, gate.read_recursive());
        map.restore_key(b"b".to_vec(), Some(b"2".to_vec()));
        journal.record(entry(&map, b"b", None));
        inner.rollback().expect("inner rollback");

        assert_eq!(map.get_raw(b"a"), Some(b"1".to_vec()));
        assert_eq!(map.get_raw(b"b"), None);
        outer.complete();
        assert_eq!(map.get_raw(b"a"), Some(b"1".to_vec()));
    }

    #[test]
    fn test_drop_without_complete_rolls_back() {
        let gate = RwLock::new(());
        let journal = Journal::new("test");
        let map = Arc::new(RawMap::new("test:main"));
        {
            let _envelope = Envelope::open(&journal, gate.read());
            map.restore_key(b"a".to_vec(), Some(b"1".to_vec()));
            journal.record(entry(&map, b"a", None));
        }
        assert_eq!(map.get_raw(b"a"), None);
        assert!(!journal.is_active());
    }
}
