//! Aegis Map - Typed Sorted Maps
//!
//! Named sorted maps over encoded byte keys. A `RawMap` holds the bytes;
//! a `SortedMap<K, V>` is a typed view that encodes keys with `MapKey`,
//! values with an injected `ValueCodec`, and journals every mutation so
//! that an enclosing envelope can roll it back.
//!
//! Range cursors are lazy and batched: each batch takes the map's read
//! lock briefly, copies up to `batch_size` entries, then re-seeks after
//! the last key it returned. A long scan therefore never blocks writers.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::codec::{MapKey, ValueCodec};
use crate::transaction::{Journal, UndoEntry};
use aegis_common::{AegisError, Result};
use parking_lot::RwLock;
use std::collections::{BTreeMap, VecDeque};
use std::marker::PhantomData;
use std::ops::Bound;
use std::sync::Arc;

type Entries = BTreeMap<Vec<u8>, Vec<u8>>;

// =============================================================================
// Raw Map
// =============================================================================

/// Byte-level sorted map owned by the engine.
pub struct RawMap {
    name: String,
    entries: RwLock<Entries>,
}

impl RawMap {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub(crate) fn with_entries(name: impl Into<String>, entries: Entries) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(entries),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub(crate) fn get_raw(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.entries.read().get(key).cloned()
    }

    pub(crate) fn restore_key(&self, key: Vec<u8>, previous: Option<Vec<u8>>) {
        let mut entries = self.entries.write();
        match previous {
            Some(value) => {
                entries.insert(key, value);
            }
            None => {
                entries.remove(&key);
            }
        }
    }

    pub(crate) fn restore_contents(&self, previous: Entries) {
        *self.entries.write() = previous;
    }

    pub(crate) fn snapshot(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub(crate) fn approximate_bytes(&self) -> u64 {
        self.entries
            .read()
            .iter()
            .map(|(k, v)| (k.len() + v.len()) as u64)
            .sum()
    }

    /// First or last entry within the bounds.
    fn navigate(&self, lower: Bound<Vec<u8>>, upper: Bound<Vec<u8>>, last: bool) -> Option<(Vec<u8>, Vec<u8>)> {
        if !bounds_valid(&lower, &upper) {
            return None;
        }
        let entries = self.entries.read();
        let mut range = entries.range::<Vec<u8>, _>((lower, upper));
        let found = if last { range.next_back() } else { range.next() };
        found.map(|(k, v)| (k.clone(), v.clone()))
    }

    fn fetch_batch(&self, lower: &Bound<Vec<u8>>, upper: &Bound<Vec<u8>>, limit: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
        if !bounds_valid(lower, upper) {
            return Vec::new();
        }
        let entries = self.entries.read();
        entries
            .range::<Vec<u8>, _>((lower.clone(), upper.clone()))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn count_below(&self, key: &[u8]) -> u64 {
        let entries = self.entries.read();
        entries
            .range::<Vec<u8>, _>((Bound::Unbounded, Bound::Excluded(key.to_vec())))
            .count() as u64
    }
}

/// BTreeMap::range panics on inverted or empty-excluded bounds.
fn bounds_valid(lower: &Bound<Vec<u8>>, upper: &Bound<Vec<u8>>) -> bool {
    match (lower, upper) {
        (Bound::Included(a), Bound::Included(b)) => a <= b,
        (Bound::Included(a), Bound::Excluded(b))
        | (Bound::Excluded(a), Bound::Included(b))
        | (Bound::Excluded(a), Bound::Excluded(b)) => a < b,
        _ => true,
    }
}

fn encode_bound<K: MapKey>(bound: Bound<&K>) -> Bound<Vec<u8>> {
    match bound {
        Bound::Included(k) => Bound::Included(k.to_key_bytes()),
        Bound::Excluded(k) => Bound::Excluded(k.to_key_bytes()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

// =============================================================================
// Sorted Map
// =============================================================================

/// Typed view over a named raw map.
pub struct SortedMap<K, V> {
    raw: Arc<RawMap>,
    journal: Arc<Journal>,
    codec: Arc<dyn ValueCodec<V>>,
    batch_size: usize,
    read_only: bool,
    _key: PhantomData<fn() -> K>,
}

impl<K, V> Clone for SortedMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            raw: Arc::clone(&self.raw),
            journal: Arc::clone(&self.journal),
            codec: Arc::clone(&self.codec),
            batch_size: self.batch_size,
            read_only: self.read_only,
            _key: PhantomData,
        }
    }
}

impl<K: MapKey, V> SortedMap<K, V> {
    pub(crate) fn new(
        raw: Arc<RawMap>,
        journal: Arc<Journal>,
        codec: Arc<dyn ValueCodec<V>>,
        batch_size: usize,
        read_only: bool,
    ) -> Self {
        Self {
            raw,
            journal,
            codec,
            batch_size: batch_size.max(1),
            read_only,
            _key: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        self.raw.name()
    }

    pub fn len(&self) -> u64 {
        self.raw.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(AegisError::ReadOnly(self.raw.name().to_string()));
        }
        Ok(())
    }

    fn decode_value(&self, bytes: &[u8]) -> Result<V> {
        self.codec.decode(bytes)
    }

    fn decode_entry(&self, (k, v): (Vec<u8>, Vec<u8>)) -> Result<(K, V)> {
        Ok((K::from_key_bytes(&k)?, self.decode_value(&v)?))
    }

    // -------------------------------------------------------------------------
    // Point Access
    // -------------------------------------------------------------------------

    pub fn get(&self, key: &K) -> Result<Option<V>> {
        match self.raw.get_raw(&key.to_key_bytes()) {
            Some(bytes) => Ok(Some(self.decode_value(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.raw.entries.read().contains_key(&key.to_key_bytes())
    }

    /// Insert or replace. Returns the previous value.
    pub fn put(&self, key: &K, value: &V) -> Result<Option<V>> {
        self.ensure_writable()?;
        let key_bytes = key.to_key_bytes();
        let value_bytes = self.codec.encode(value)?;
        let previous = self.raw.entries.write().insert(key_bytes.clone(), value_bytes);
        self.journal.record(UndoEntry::Key {
            map: Arc::clone(&self.raw),
            key: key_bytes,
            previous: previous.clone(),
        });
        previous.map(|p| self.decode_value(&p)).transpose()
    }

    /// Insert only if the key is absent. Returns the existing value otherwise.
    pub fn put_if_absent(&self, key: &K, value: &V) -> Result<Option<V>> {
        self.ensure_writable()?;
        let key_bytes = key.to_key_bytes();
        let value_bytes = self.codec.encode(value)?;
        let existing = {
            let mut entries = self.raw.entries.write();
            match entries.get(&key_bytes).cloned() {
                Some(existing) => Some(existing),
                None => {
                    entries.insert(key_bytes.clone(), value_bytes);
                    None
                }
            }
        };
        if let Some(existing) = existing {
            return Ok(Some(self.decode_value(&existing)?));
        }
        self.journal.record(UndoEntry::Key {
            map: Arc::clone(&self.raw),
            key: key_bytes,
            previous: None,
        });
        Ok(None)
    }

    pub fn remove(&self, key: &K) -> Result<Option<V>> {
        self.ensure_writable()?;
        let key_bytes = key.to_key_bytes();
        let previous = self.raw.entries.write().remove(&key_bytes);
        match previous {
            Some(bytes) => {
                let value = self.decode_value(&bytes);
                self.journal.record(UndoEntry::Key {
                    map: Arc::clone(&self.raw),
                    key: key_bytes,
                    previous: Some(bytes),
                });
                value.map(Some)
            }
            None => Ok(None),
        }
    }

    /// Remove a key without decoding the old value.
    pub fn delete(&self, key: &K) -> Result<bool> {
        self.ensure_writable()?;
        let key_bytes = key.to_key_bytes();
        let previous = self.raw.entries.write().remove(&key_bytes);
        let existed = previous.is_some();
        if existed {
            self.journal.record(UndoEntry::Key {
                map: Arc::clone(&self.raw),
                key: key_bytes,
                previous,
            });
        }
        Ok(existed)
    }

    pub fn clear(&self) -> Result<()> {
        self.ensure_writable()?;
        let previous = std::mem::take(&mut *self.raw.entries.write());
        self.journal.record(UndoEntry::Contents {
            map: Arc::clone(&self.raw),
            previous,
        });
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Navigation
    // -------------------------------------------------------------------------

    fn nav_key(&self, lower: Bound<Vec<u8>>, upper: Bound<Vec<u8>>, last: bool) -> Result<Option<K>> {
        self.raw
            .navigate(lower, upper, last)
            .map(|(k, _)| K::from_key_bytes(&k))
            .transpose()
    }

    fn nav_entry(&self, lower: Bound<Vec<u8>>, upper: Bound<Vec<u8>>, last: bool) -> Result<Option<(K, V)>> {
        self.raw
            .navigate(lower, upper, last)
            .map(|entry| self.decode_entry(entry))
            .transpose()
    }

    pub fn first_key(&self) -> Result<Option<K>> {
        self.nav_key(Bound::Unbounded, Bound::Unbounded, false)
    }

    pub fn last_key(&self) -> Result<Option<K>> {
        self.nav_key(Bound::Unbounded, Bound::Unbounded, true)
    }

    /// Greatest key less than or equal to `key`.
    pub fn floor_key(&self, key: &K) -> Result<Option<K>> {
        self.nav_key(Bound::Unbounded, Bound::Included(key.to_key_bytes()), true)
    }

    /// Least key greater than or equal to `key`.
    pub fn ceiling_key(&self, key: &K) -> Result<Option<K>> {
        self.nav_key(Bound::Included(key.to_key_bytes()), Bound::Unbounded, false)
    }

    /// Least key strictly greater than `key`.
    pub fn higher_key(&self, key: &K) -> Result<Option<K>> {
        self.nav_key(Bound::Excluded(key.to_key_bytes()), Bound::Unbounded, false)
    }

    /// Greatest key strictly less than `key`.
    pub fn lower_key(&self, key: &K) -> Result<Option<K>> {
        self.nav_key(Bound::Unbounded, Bound::Excluded(key.to_key_bytes()), true)
    }

    pub fn first_entry(&self) -> Result<Option<(K, V)>> {
        self.nav_entry(Bound::Unbounded, Bound::Unbounded, false)
    }

    pub fn last_entry(&self) -> Result<Option<(K, V)>> {
        self.nav_entry(Bound::Unbounded, Bound::Unbounded, true)
    }

    pub fn floor_entry(&self, key: &K) -> Result<Option<(K, V)>> {
        self.nav_entry(Bound::Unbounded, Bound::Included(key.to_key_bytes()), true)
    }

    pub fn ceiling_entry(&self, key: &K) -> Result<Option<(K, V)>> {
        self.nav_entry(Bound::Included(key.to_key_bytes()), Bound::Unbounded, false)
    }

    pub fn higher_entry(&self, key: &K) -> Result<Option<(K, V)>> {
        self.nav_entry(Bound::Excluded(key.to_key_bytes()), Bound::Unbounded, false)
    }

    pub fn lower_entry(&self, key: &K) -> Result<Option<(K, V)>> {
        self.nav_entry(Bound::Unbounded, Bound::Excluded(key.to_key_bytes()), true)
    }

    // -------------------------------------------------------------------------
    // Rank
    // -------------------------------------------------------------------------

    /// Number of keys strictly less than `key`.
    ///
    /// Linear in this in-memory engine; paged engines answer it in
    /// logarithmic time from per-page counts.
    pub fn rank(&self, key: &K) -> u64 {
        self.raw.count_below(&key.to_key_bytes())
    }

    /// Zero-based position of `key` if it is present.
    pub fn key_index(&self, key: &K) -> Option<u64> {
        if self.contains_key(key) {
            Some(self.rank(key))
        } else {
            None
        }
    }

    // -------------------------------------------------------------------------
    // Cursors
    // -------------------------------------------------------------------------

    pub fn range(&self, lower: Bound<&K>, upper: Bound<&K>) -> Cursor<K, V> {
        Cursor {
            raw: RawCursor::new(Arc::clone(&self.raw), encode_bound(lower), encode_bound(upper), self.batch_size),
            codec: Arc::clone(&self.codec),
            _key: PhantomData,
        }
    }

    /// Entries with `from <= key <= to`.
    pub fn range_inclusive(&self, from: &K, to: &K) -> Cursor<K, V> {
        self.range(Bound::Included(from), Bound::Included(to))
    }

    pub fn iter(&self) -> Cursor<K, V> {
        self.range(Bound::Unbounded, Bound::Unbounded)
    }

    /// Keys only; values are never decoded.
    pub fn key_range(&self, lower: Bound<&K>, upper: Bound<&K>) -> KeyCursor<K> {
        KeyCursor {
            raw: RawCursor::new(Arc::clone(&self.raw), encode_bound(lower), encode_bound(upper), self.batch_size),
            _key: PhantomData,
        }
    }

    pub fn keys(&self) -> KeyCursor<K> {
        self.key_range(Bound::Unbounded, Bound::Unbounded)
    }
}

// =============================================================================
// Range Cursors
// =============================================================================

struct RawCursor {
    map: Arc<RawMap>,
    lower: Bound<Vec<u8>>,
    upper: Bound<Vec<u8>>,
    buffer: VecDeque<(Vec<u8>, Vec<u8>)>,
    batch_size: usize,
    exhausted: bool,
}

impl RawCursor {
    fn new(map: Arc<RawMap>, lower: Bound<Vec<u8>>, upper: Bound<Vec<u8>>, batch_size: usize) -> Self {
        Self {
            map,
            lower,
            upper,
            buffer: VecDeque::new(),
            batch_size,
            exhausted: false,
        }
    }

    fn next_raw(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        if self.buffer.is_empty() && !self.exhausted {
            let batch = self.map.fetch_batch(&self.lower, &self.upper, self.batch_size);
            if batch.len() < self.batch_size {
                self.exhausted = true;
            }
            if let Some((last, _)) = batch.last() {
                self.lower = Bound::Excluded(last.clone());
            }
            self.buffer.extend(batch);
        }
        self.buffer.pop_front()
    }
}

/// Lazy cursor over decoded entries.
pub struct Cursor<K, V> {
    raw: RawCursor,
    codec: Arc<dyn ValueCodec<V>>,
    _key: PhantomData<fn() -> K>,
}

impl<K: MapKey, V> Iterator for Cursor<K, V> {
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        let (k, v) = self.raw.next_raw()?;
        Some(K::from_key_bytes(&k).and_then(|key| Ok((key, self.codec.decode(&v)?))))
    }
}

/// Lazy cursor over decoded keys.
pub struct KeyCursor<K> {
    raw: RawCursor,
    _key: PhantomData<fn() -> K>,
}

impl<K: MapKey> Iterator for KeyCursor<K> {
    type Item = Result<K>;

    fn next(&mut self) -> Option<Self::Item> {
        let (k, _) = self.raw.next_raw()?;
        Some(K::from_key_bytes(&k))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BincodeCodec;
    use parking_lot::RwLock as GateLock;

    fn test_map(batch_size: usize) -> (SortedMap<u64, String>, Arc<Journal>) {
        let journal = Arc::new(Journal::new("test"));
        let map = SortedMap::new(
            Arc::new(RawMap::new("test:main")),
            Arc::clone(&journal),
            Arc::new(BincodeCodec),
            batch_size,
            false,
        );
        (map, journal)
    }

    fn filled(batch_size: usize) -> SortedMap<u64, String> {
        let (map, _) = test_map(batch_size);
        for k in [10u64, 20, 30, 40, 50] {
            map.put(&k, &format!("v{}", k)).expect("put should succeed");
        }
        map
    }

    #[test]
    fn test_navigation() {
        let map = filled(2);
        assert_eq!(map.floor_key(&25).unwrap(), Some(20));
        assert_eq!(map.floor_key(&20).unwrap(), Some(20));
        assert_eq!(map.ceiling_key(&25).unwrap(), Some(30));
        assert_eq!(map.higher_key(&30).unwrap(), Some(40));
        assert_eq!(map.lower_key(&10).unwrap(), None);
        assert_eq!(map.last_key().unwrap(), Some(50));
        assert_eq!(map.floor_entry(&5).unwrap(), None);
    }

    #[test]
    fn test_batched_range_sees_all_entries() {
        let map = filled(2);
        let keys: Vec<u64> = map
            .range_inclusive(&15, &50)
            .map(|e| e.expect("entry").0)
            .collect();
        assert_eq!(keys, vec![20, 30, 40, 50]);

        let empty: Vec<_> = map.range(Bound::Excluded(&30), Bound::Excluded(&30)).collect();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_rank() {
        let map = filled(8);
        assert_eq!(map.key_index(&10), Some(0));
        assert_eq!(map.key_index(&40), Some(3));
        assert_eq!(map.key_index(&41), None);
        assert_eq!(map.rank(&41), 4);
    }

    #[test]
    fn test_put_if_absent_keeps_existing() {
        let map = filled(8);
        let existing = map.put_if_absent(&10, &"other".to_string()).expect("put");
        assert_eq!(existing.as_deref(), Some("v10"));
        assert_eq!(map.get(&10).unwrap().as_deref(), Some("v10"));
    }

    #[test]
    fn test_clear_rolls_back() {
        let (map, journal) = test_map(8);
        map.put(&1, &"a".to_string()).unwrap();

        let gate = GateLock::new(());
        let envelope = crate::transaction::Envelope::open(&journal, gate.read());
        map.clear().expect("clear");
        map.put(&2, &"b".to_string()).unwrap();
        assert_eq!(map.len(), 1);
        envelope.rollback().expect("rollback");

        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&1).unwrap().as_deref(), Some("a"));
        assert!(!map.contains_key(&2));
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let map: SortedMap<u64, String> = SortedMap::new(
            Arc::new(RawMap::new("ro")),
            Arc::new(Journal::new("ro")),
            Arc::new(BincodeCodec),
            8,
            true,
        );
        assert!(matches!(map.put(&1, &"x".to_string()), Err(AegisError::ReadOnly(_))));
    }
}
