//! The persistent map contract the core consumes but does not implement
//! (C2, §4.2) — plus an in-memory reference implementation sufficient to
//! exercise every layer above it.
//!
//! The real backing store (an mmap B+tree, an LRU-cached page cache, etc.)
//! is explicitly out of scope (spec.md §1); [`InMemoryStoreMap`] stands in
//! for it in tests and for the RAM-only mode (`location == "/"`).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::value::Value;

/// The payload stored per key: "a list of typed atoms" (§2, C3 row).
pub type ValueList = Vec<Value>;

/// Operations expected from the underlying persistent map (§4.2).
///
/// Implementations must serve reads concurrently once opened read-only,
/// and may assume writes are single-threaded (§5).
pub trait StoreMap: Send + Sync {
    fn get(&self, key: &str) -> Option<ValueList>;
    fn put(&self, key: &str, values: ValueList) -> StoreResult<()>;
    fn remove(&self, key: &str) -> Option<ValueList>;
    fn size(&self) -> usize;
    /// Full key iteration. Order is stable within one generation.
    fn keys(&self) -> Vec<String>;
    fn is_read_only(&self) -> bool;
    fn set_read_only(&self, read_only: bool);
    fn flush(&self, sync: bool) -> StoreResult<()>;

    /// Bumped on every mutating call. Consumers use this to invalidate
    /// long-lived iterator tokens (§4.3: "constructing a new [primitive
    /// entity] iterator invalidates older ones").
    fn generation(&self) -> u64;
}

/// A RAM-backed [`StoreMap`], also used for the on-disk stand-in location
/// `"/"` (no persistence, identical semantics otherwise per §4.2).
pub struct InMemoryStoreMap {
    location: String,
    read_only: AtomicBool,
    generation: AtomicU64,
    map: RwLock<IndexMap<String, ValueList>>,
    access_hint: RwLock<Option<String>>,
}

impl InMemoryStoreMap {
    /// Opens (creates, if new) a map at `location`. `location == "/"` means
    /// pure RAM mode; any other string is still RAM-backed here (the real
    /// persistence engine is out of scope) but is tagged with that name so
    /// `copy`/`logStats` diagnostics can refer to it.
    pub fn open(location: impl Into<String>, read_only: bool) -> StoreResult<Self> {
        Ok(Self {
            location: location.into(),
            read_only: AtomicBool::new(read_only),
            generation: AtomicU64::new(0),
            map: RwLock::new(IndexMap::new()),
            access_hint: RwLock::new(None),
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn is_ram(&self) -> bool {
        self.location == "/"
    }

    pub fn close(&self) -> StoreResult<()> {
        self.flush(true)
    }

    /// Snapshots the current contents into a fresh map at `new_location`
    /// (§6 L0 entry points: `copy`).
    pub fn copy(&self, new_location: impl Into<String>) -> StoreResult<Self> {
        let snapshot = self.map.read().clone();

        Ok(Self {
            location: new_location.into(),
            read_only: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            map: RwLock::new(snapshot),
            access_hint: RwLock::new(None),
        })
    }

    /// No-op compaction hook; a real page-based store would reclaim space
    /// here (§6 L0 entry points: `optimize`).
    pub fn optimize(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Records (and otherwise ignores) a caller's hint that a large batch
    /// of accesses under `prefix` is imminent (§6: `giveLargeAccessHint`).
    pub fn give_large_access_hint(&self, prefix: impl Into<String>) {
        *self.access_hint.write() = Some(prefix.into());
    }

    /// Emits the map's size as a `tracing` event (§6: `logStats`).
    pub fn log_stats(&self) {
        let guard = self.map.read();
        let entries: usize = guard.values().map(Vec::len).sum();

        tracing::info!(
            location = %self.location,
            keys = guard.len(),
            entries,
            "store map stats",
        );
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, AtomicOrdering::SeqCst);
    }
}

impl StoreMap for InMemoryStoreMap {
    fn get(&self, key: &str) -> Option<ValueList> {
        self.map.read().get(key).cloned()
    }

    fn put(&self, key: &str, values: ValueList) -> StoreResult<()> {
        if self.is_read_only() {
            return Err(StoreError::read_only("StoreMap::put"));
        }

        // Boundary behavior (§8): empty lists are never stored.
        if values.is_empty() {
            self.map.write().shift_remove(key);
        } else {
            self.map.write().insert(key.to_string(), values);
        }

        self.bump_generation();
        Ok(())
    }

    fn remove(&self, key: &str) -> Option<ValueList> {
        if self.is_read_only() {
            return None;
        }

        let removed = self.map.write().shift_remove(key);

        if removed.is_some() {
            self.bump_generation();
        }

        removed
    }

    fn size(&self) -> usize {
        self.map.read().len()
    }

    fn keys(&self) -> Vec<String> {
        self.map.read().keys().cloned().collect()
    }

    fn is_read_only(&self) -> bool {
        self.read_only.load(AtomicOrdering::SeqCst)
    }

    fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, AtomicOrdering::SeqCst);
    }

    fn flush(&self, _sync: bool) -> StoreResult<()> {
        // Nothing to flush for the RAM map; a real backing store would
        // fsync its pages here.
        Ok(())
    }

    fn generation(&self) -> u64 {
        self.generation.load(AtomicOrdering::SeqCst)
    }
}

/// Lets every layer above hold its backing map as `Arc<M>` so the same map
/// can be shared between an [`EncodedStore`](crate::encoded_store::EncodedStore)
/// and the opened-again instance used to check persistence across a
/// reopen, without requiring `M` itself to be cheaply cloneable.
impl<T: StoreMap> StoreMap for Arc<T> {
    fn get(&self, key: &str) -> Option<ValueList> {
        (**self).get(key)
    }

    fn put(&self, key: &str, values: ValueList) -> StoreResult<()> {
        (**self).put(key, values)
    }

    fn remove(&self, key: &str) -> Option<ValueList> {
        (**self).remove(key)
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn keys(&self) -> Vec<String> {
        (**self).keys()
    }

    fn is_read_only(&self) -> bool {
        (**self).is_read_only()
    }

    fn set_read_only(&self, read_only: bool) {
        (**self).set_read_only(read_only)
    }

    fn flush(&self, sync: bool) -> StoreResult<()> {
        (**self).flush(sync)
    }

    fn generation(&self) -> u64 {
        (**self).generation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ram_mode_round_trips_values() {
        let map = InMemoryStoreMap::open("/", false).unwrap();
        assert!(map.is_ram());

        map.put("bob generalizations", vec![Value::Int(1)]).unwrap();
        assert_eq!(map.get("bob generalizations"), Some(vec![Value::Int(1)]));
        assert_eq!(map.size(), 1);
    }

    #[test]
    fn putting_empty_list_removes_key() {
        let map = InMemoryStoreMap::open("/", false).unwrap();
        map.put("k", vec![Value::Int(1)]).unwrap();
        map.put("k", vec![]).unwrap();
        assert_eq!(map.get("k"), None);
        assert_eq!(map.size(), 0);
    }

    #[test]
    fn read_only_rejects_writes() {
        let map = InMemoryStoreMap::open("/", true).unwrap();
        let result = map.put("k", vec![Value::Int(1)]);
        assert!(matches!(result, Err(StoreError::ReadOnly { .. })));
    }

    #[test]
    fn generation_bumps_on_mutation_only() {
        let map = InMemoryStoreMap::open("/", false).unwrap();
        let g0 = map.generation();
        let _ = map.get("missing");
        assert_eq!(map.generation(), g0);

        map.put("k", vec![Value::Int(1)]).unwrap();
        assert_eq!(map.generation(), g0 + 1);
    }

    #[test]
    fn copy_snapshots_independently() {
        let map = InMemoryStoreMap::open("/", false).unwrap();
        map.put("k", vec![Value::Int(1)]).unwrap();

        let copy = map.copy("/copy").unwrap();
        map.put("k", vec![Value::Int(2)]).unwrap();

        assert_eq!(copy.get("k"), Some(vec![Value::Int(1)]));
        assert_eq!(map.get("k"), Some(vec![Value::Int(2)]));
    }
}
