//! Sharded Concurrent Key-Value Store
//!
//! `ShardedStore` partitions the key space into a power-of-two number of
//! shards. Every shard owns its own `HashMap` behind its own `RwLock`, so
//! commands touching different shards never contend with each other.
//!
//! ## Routing
//!
//! ```text
//!   key ──fnv32──> hash ──& (shard_count - 1)──> shard index
//!
//!  ┌─────────┐ ┌─────────┐ ┌─────────┐       ┌─────────┐
//!  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │  ...  │ Shard N │
//!  │ RwLock  │ │ RwLock  │ │ RwLock  │       │ RwLock  │
//!  │ HashMap │ │ HashMap │ │ HashMap │       │ HashMap │
//!  └─────────┘ └─────────┘ └─────────┘       └─────────┘
//! ```
//!
//! The shard count is fixed at construction, so a key is routed to the same
//! shard for the lifetime of the store.
//!
//! ## Locked and lock-free access
//!
//! The methods on `ShardedStore` take the owning shard's lock for the duration
//! of one call. Commands that need several keys at once go through the
//! [`LockSet`](crate::storage::LockSet) coordinator instead, which returns a
//! [`ShardLocks`](crate::storage::ShardLocks) guard set exposing the same
//! operations without taking any further lock.
//!
//! ## Key count
//!
//! The live-key counter is a separate atomic updated next to (not together
//! with) each map mutation, so `count()` is an approximation under concurrent
//! inserts and removes.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Upper bound for the number of shards in a single store.
pub const MAX_SHARDS: usize = 1 << 16;

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

pub(crate) type ShardMap<V> = HashMap<Bytes, V>;

/// 32-bit FNV-1a hash used to route keys to shards.
#[inline]
pub fn fnv32(key: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in key {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Rounds a requested shard count up to the next power of two.
///
/// Smears the highest set bit of `hint - 1` into every lower position and
/// adds one. A hint of 0 or 1 yields a single shard; hints above
/// [`MAX_SHARDS`] are clamped.
pub fn compute_capacity(hint: usize) -> usize {
    if hint <= 1 {
        return 1;
    }
    let mut n = hint.min(MAX_SHARDS) - 1;
    n |= n >> 1;
    n |= n >> 2;
    n |= n >> 4;
    n |= n >> 8;
    n |= n >> 16;
    n + 1
}

/// A single partition of the key space.
#[derive(Debug)]
pub(crate) struct Shard<V> {
    map: RwLock<ShardMap<V>>,
}

impl<V> Shard<V> {
    fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }

    // A panic while a guard was held leaves the map itself intact, so a
    // poisoned lock is taken over rather than propagated.
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, ShardMap<V>> {
        self.map.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, ShardMap<V>> {
        self.map.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A thread-safe map from binary keys to `V`, split into independently
/// locked shards.
///
/// # Example
///
/// ```
/// use quartzkv::storage::ShardedStore;
/// use bytes::Bytes;
///
/// let store: ShardedStore<u64> = ShardedStore::new(10);
/// assert_eq!(store.shard_count(), 16);
///
/// assert_eq!(store.put(Bytes::from("a"), 1), 1);
/// assert_eq!(store.put(Bytes::from("a"), 2), 0);
/// assert_eq!(store.get(b"a"), Some(2));
/// assert_eq!(store.count(), 1);
/// ```
pub struct ShardedStore<V> {
    shards: Vec<Shard<V>>,
    mask: usize,
    count: AtomicUsize,
}

impl<V> std::fmt::Debug for ShardedStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedStore")
            .field("shards", &self.shards.len())
            .field("count", &self.count.load(Ordering::Relaxed))
            .finish()
    }
}

impl<V> ShardedStore<V> {
    /// Creates a store with `compute_capacity(shard_hint)` empty shards.
    pub fn new(shard_hint: usize) -> Self {
        let shard_count = compute_capacity(shard_hint);
        let shards = (0..shard_count).map(|_| Shard::new()).collect();

        Self {
            shards,
            mask: shard_count - 1,
            count: AtomicUsize::new(0),
        }
    }

    /// Number of shards (always a power of two).
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// The shard a key is routed to.
    #[inline]
    pub fn shard_index(&self, key: &[u8]) -> usize {
        fnv32(key) as usize & self.mask
    }

    #[inline]
    pub(crate) fn shard(&self, index: usize) -> &Shard<V> {
        &self.shards[index]
    }

    #[inline]
    fn shard_for(&self, key: &[u8]) -> &Shard<V> {
        self.shard(self.shard_index(key))
    }

    pub(crate) fn record_insert(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_remove(&self, removed: usize) {
        if removed > 0 {
            self.count.fetch_sub(removed, Ordering::Relaxed);
        }
    }

    /// Returns a clone of the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> Option<V>
    where
        V: Clone,
    {
        self.shard_for(key).read().get(key).cloned()
    }

    /// Returns `true` if `key` is present.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.shard_for(key).read().contains_key(key)
    }

    /// Inserts or overwrites `key`.
    ///
    /// Returns 1 if the key was newly inserted, 0 if an existing value was
    /// replaced.
    pub fn put(&self, key: Bytes, value: V) -> usize {
        let mut map = self.shard_for(&key).write();
        put_into(&mut map, self, key, value)
    }

    /// Inserts `key` only when it is absent. Returns 1 on insert, 0 otherwise.
    pub fn put_if_absent(&self, key: Bytes, value: V) -> usize {
        let mut map = self.shard_for(&key).write();
        put_if_absent_into(&mut map, self, key, value)
    }

    /// Overwrites `key` only when it is present. Returns 1 on overwrite,
    /// 0 otherwise.
    pub fn put_if_present(&self, key: Bytes, value: V) -> usize {
        let mut map = self.shard_for(&key).write();
        put_if_present_into(&mut map, key, value)
    }

    /// Removes `key`, returning the old value if it was present.
    pub fn delete(&self, key: &[u8]) -> Option<V> {
        let mut map = self.shard_for(key).write();
        delete_from(&mut map, self, key)
    }

    /// Inserts `init` when `key` is absent, otherwise applies `update` to
    /// the stored value, all under one write lock.
    ///
    /// Returns the resulting value and whether the key already existed.
    pub fn upsert(&self, key: Bytes, init: V, update: impl FnOnce(&mut V)) -> (V, bool)
    where
        V: Clone,
    {
        let mut map = self.shard_for(&key).write();
        match map.get_mut(&key) {
            Some(value) => {
                update(value);
                (value.clone(), true)
            }
            None => {
                map.insert(key, init.clone());
                self.record_insert();
                (init, false)
            }
        }
    }

    /// Visits every entry, one shard at a time under that shard's read lock.
    ///
    /// Shard order and key order within a shard are unspecified. Returning
    /// `false` from the visitor stops the traversal immediately; no further
    /// shard is visited.
    pub fn for_each(&self, mut visitor: impl FnMut(&Bytes, &V) -> bool) {
        for shard in &self.shards {
            let map = shard.read();
            for (key, value) in map.iter() {
                if !visitor(key, value) {
                    return;
                }
            }
        }
    }

    /// Approximate number of live keys.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

// The map-level helpers below are shared by the locking methods above and by
// `ShardLocks`, which runs them against guards it already holds.

pub(crate) fn put_into<V>(
    map: &mut ShardMap<V>,
    store: &ShardedStore<V>,
    key: Bytes,
    value: V,
) -> usize {
    if map.insert(key, value).is_some() {
        0
    } else {
        store.record_insert();
        1
    }
}

pub(crate) fn put_if_absent_into<V>(
    map: &mut ShardMap<V>,
    store: &ShardedStore<V>,
    key: Bytes,
    value: V,
) -> usize {
    if map.contains_key(&key) {
        return 0;
    }
    map.insert(key, value);
    store.record_insert();
    1
}

pub(crate) fn put_if_present_into<V>(map: &mut ShardMap<V>, key: Bytes, value: V) -> usize {
    match map.get_mut(&key) {
        Some(slot) => {
            *slot = value;
            1
        }
        None => 0,
    }
}

pub(crate) fn delete_from<V>(
    map: &mut ShardMap<V>,
    store: &ShardedStore<V>,
    key: &[u8],
) -> Option<V> {
    let old = map.remove(key);
    if old.is_some() {
        store.record_remove(1);
    }
    old
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_capacity_rounding() {
        assert_eq!(compute_capacity(0), 1);
        assert_eq!(compute_capacity(1), 1);
        assert_eq!(compute_capacity(2), 2);
        assert_eq!(compute_capacity(3), 4);
        assert_eq!(compute_capacity(10), 16);
        assert_eq!(compute_capacity(16), 16);
        assert_eq!(compute_capacity(17), 32);
        assert_eq!(compute_capacity(usize::MAX), MAX_SHARDS);

        let store: ShardedStore<()> = ShardedStore::new(10);
        assert_eq!(store.shard_count(), 16);
    }

    #[test]
    fn test_fnv32_known_values() {
        assert_eq!(fnv32(b""), 0x811c_9dc5);
        assert_eq!(fnv32(b"a"), 0xe40c_292c);
        assert_eq!(fnv32(b"foobar"), 0xbf9c_f968);
    }

    #[test]
    fn test_routing_is_stable() {
        let store: ShardedStore<()> = ShardedStore::new(64);
        for i in 0..100 {
            let key = format!("key:{}", i);
            let first = store.shard_index(key.as_bytes());
            assert!(first < 64);
            assert_eq!(store.shard_index(key.as_bytes()), first);
        }
    }

    #[test]
    fn test_put_get_delete() {
        let store = ShardedStore::new(16);

        assert_eq!(store.put(Bytes::from("k"), "v"), 1);
        assert_eq!(store.get(b"k"), Some("v"));
        assert!(store.contains(b"k"));

        assert_eq!(store.delete(b"k"), Some("v"));
        assert_eq!(store.get(b"k"), None);
        assert_eq!(store.delete(b"k"), None);
    }

    #[test]
    fn test_count_tracks_distinct_keys() {
        let store = ShardedStore::new(8);

        for i in 0..100 {
            store.put(Bytes::from(format!("key-{}", i)), i);
        }
        assert_eq!(store.count(), 100);

        // Overwrites don't change the count
        assert_eq!(store.put(Bytes::from("key-5"), 500), 0);
        assert_eq!(store.count(), 100);

        store.delete(b"key-5");
        store.delete(b"missing");
        assert_eq!(store.count(), 99);
    }

    #[test]
    fn test_put_if_absent() {
        let store = ShardedStore::new(4);

        assert_eq!(store.put_if_absent(Bytes::from("k"), 1), 1);
        assert_eq!(store.put_if_absent(Bytes::from("k"), 2), 0);
        assert_eq!(store.get(b"k"), Some(1));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_put_if_present() {
        let store = ShardedStore::new(4);

        assert_eq!(store.put_if_present(Bytes::from("k"), 1), 0);
        assert_eq!(store.get(b"k"), None);

        store.put(Bytes::from("k"), 1);
        assert_eq!(store.put_if_present(Bytes::from("k"), 2), 1);
        assert_eq!(store.get(b"k"), Some(2));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_upsert() {
        let store = ShardedStore::new(4);

        assert_eq!(store.upsert(Bytes::from("n"), 5u64, |v| *v += 5), (5, false));
        assert_eq!(store.upsert(Bytes::from("n"), 5u64, |v| *v += 5), (10, true));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_for_each_visits_everything() {
        let store = ShardedStore::new(8);
        for i in 0..50 {
            store.put(Bytes::from(format!("k{}", i)), i);
        }

        let mut sum = 0;
        let mut visited = 0;
        store.for_each(|_, v| {
            sum += *v;
            visited += 1;
            true
        });
        assert_eq!(visited, 50);
        assert_eq!(sum, (0..50).sum::<i32>());
    }

    #[test]
    fn test_for_each_stops_early() {
        let store = ShardedStore::new(8);
        for i in 0..50 {
            store.put(Bytes::from(format!("k{}", i)), i);
        }

        let mut visited = 0;
        store.for_each(|_, _| {
            visited += 1;
            false
        });
        assert_eq!(visited, 1);
    }

    #[test]
    fn test_concurrent_access() {
        let store = Arc::new(ShardedStore::new(16));
        let mut handles = vec![];

        for i in 0..10 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    let key = Bytes::from(format!("key-{}-{}", i, j));
                    store.put(key.clone(), j);
                    assert_eq!(store.get(&key), Some(j));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.count(), 1000);
    }
}
