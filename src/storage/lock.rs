//! Multi-Key Lock Coordination
//!
//! A command declares the keys it reads and the keys it writes. `LockSet`
//! turns those declarations into a lock plan and `ShardLocks` holds the
//! resulting guards.
//!
//! ## Deadlock freedom
//!
//! Every plan locks shards in strictly ascending index order and a shard
//! appears at most once per plan. Two commands that need overlapping shards
//! therefore always request them in the same relative order, which rules out
//! the circular wait a deadlock needs.
//!
//! ```text
//!   read  = [b, d]        shard(b) = 7   shard(d) = 2
//!   write = [a]           shard(a) = 7
//!
//!   plan  = [(2, Shared), (7, Exclusive)]
//! ```
//!
//! Guards are released in the same ascending order when the `ShardLocks`
//! value is dropped.
//!
//! ## Holding locks
//!
//! Code running inside a held scope only gets `ShardLocks`, whose accessors
//! never take a lock. Asking for a key whose shard is not in the plan, or
//! writing to a shard that was only locked for reading, is reported as a
//! `LockError` rather than silently racing.

use super::shard::{
    delete_from, put_if_absent_into, put_if_present_into, put_into, ShardMap, ShardedStore,
};
use bytes::Bytes;
use std::sync::{RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

/// How a shard is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Misuse of a held lock scope.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("shard {0} is not held by the current lock scope")]
    NotHeld(usize),

    #[error("shard {0} is held shared and cannot be written")]
    NotExclusive(usize),
}

/// The ordered list of shards (and modes) a command must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockSet {
    entries: Vec<(usize, LockMode)>,
}

impl LockSet {
    /// Plans the locks for the given read and write keys.
    ///
    /// A shard is locked exclusively when at least one write key maps to it,
    /// shared otherwise.
    pub fn new<V>(store: &ShardedStore<V>, read: &[Bytes], write: &[Bytes]) -> Self {
        let mut indices: Vec<usize> = read
            .iter()
            .chain(write)
            .map(|key| store.shard_index(key))
            .collect();
        indices.sort_unstable();
        indices.dedup();

        let write_indices: Vec<usize> = write.iter().map(|key| store.shard_index(key)).collect();

        let entries = indices
            .into_iter()
            .map(|index| {
                let mode = if write_indices.contains(&index) {
                    LockMode::Exclusive
                } else {
                    LockMode::Shared
                };
                (index, mode)
            })
            .collect();

        Self { entries }
    }

    /// Plans a lock on every shard of the store, for keyspace-wide commands.
    pub fn all<V>(store: &ShardedStore<V>, mode: LockMode) -> Self {
        Self {
            entries: (0..store.shard_count()).map(|index| (index, mode)).collect(),
        }
    }

    /// Folds another plan into this one. Exclusive wins over shared.
    pub fn merge(&mut self, other: &LockSet) {
        let mut merged = Vec::with_capacity(self.entries.len() + other.entries.len());
        let (mut left, mut right) = (self.entries.iter().peekable(), other.entries.iter().peekable());

        loop {
            let next = match (left.peek(), right.peek()) {
                (Some(&&(a, ma)), Some(&&(b, mb))) if a == b => {
                    left.next();
                    right.next();
                    let mode = if ma == LockMode::Exclusive || mb == LockMode::Exclusive {
                        LockMode::Exclusive
                    } else {
                        LockMode::Shared
                    };
                    (a, mode)
                }
                (Some(&&a), Some(&&b)) => {
                    if a.0 < b.0 {
                        left.next();
                        a
                    } else {
                        right.next();
                        b
                    }
                }
                (Some(&&a), None) => {
                    left.next();
                    a
                }
                (None, Some(&&b)) => {
                    right.next();
                    b
                }
                (None, None) => break,
            };
            merged.push(next);
        }

        self.entries = merged;
    }

    /// The planned `(shard index, mode)` pairs in acquisition order.
    pub fn entries(&self) -> &[(usize, LockMode)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Acquires every planned lock in ascending shard order.
    ///
    /// Blocks the calling thread until all guards are held.
    pub fn acquire<'a, V>(&self, store: &'a ShardedStore<V>) -> ShardLocks<'a, V> {
        let held = self
            .entries
            .iter()
            .map(|&(index, mode)| {
                let shard = store.shard(index);
                let guard = match mode {
                    LockMode::Shared => Guard::Shared(shard.read()),
                    LockMode::Exclusive => Guard::Exclusive(shard.write()),
                };
                (index, guard)
            })
            .collect();

        ShardLocks { store, held }
    }
}

enum Guard<'a, V> {
    Shared(RwLockReadGuard<'a, ShardMap<V>>),
    Exclusive(RwLockWriteGuard<'a, ShardMap<V>>),
}

impl<V> Guard<'_, V> {
    fn map(&self) -> &ShardMap<V> {
        match self {
            Guard::Shared(guard) => guard,
            Guard::Exclusive(guard) => guard,
        }
    }

    fn mode(&self) -> LockMode {
        match self {
            Guard::Shared(_) => LockMode::Shared,
            Guard::Exclusive(_) => LockMode::Exclusive,
        }
    }
}

/// A set of held shard guards plus lock-free access to the keys they cover.
pub struct ShardLocks<'a, V> {
    store: &'a ShardedStore<V>,
    held: Vec<(usize, Guard<'a, V>)>,
}

impl<V> std::fmt::Debug for ShardLocks<'_, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let held: Vec<(usize, LockMode)> = self
            .held
            .iter()
            .map(|(index, guard)| (*index, guard.mode()))
            .collect();
        f.debug_struct("ShardLocks").field("held", &held).finish()
    }
}

impl<'a, V> ShardLocks<'a, V> {
    fn position(&self, key: &[u8]) -> Result<usize, LockError> {
        let index = self.store.shard_index(key);
        self.held
            .binary_search_by_key(&index, |(held, _)| *held)
            .map_err(|_| LockError::NotHeld(index))
    }

    fn map(&self, key: &[u8]) -> Result<&ShardMap<V>, LockError> {
        let pos = self.position(key)?;
        Ok(self.held[pos].1.map())
    }

    fn map_mut(&mut self, key: &[u8]) -> Result<&mut ShardMap<V>, LockError> {
        let pos = self.position(key)?;
        match &mut self.held[pos] {
            (_, Guard::Exclusive(guard)) => Ok(&mut **guard),
            (index, Guard::Shared(_)) => Err(LockError::NotExclusive(*index)),
        }
    }

    /// The store the guards belong to.
    pub fn store(&self) -> &'a ShardedStore<V> {
        self.store
    }

    /// The mode the key's shard is held in, if it is held at all.
    pub fn mode(&self, key: &[u8]) -> Option<LockMode> {
        self.position(key).ok().map(|pos| self.held[pos].1.mode())
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<&V>, LockError> {
        Ok(self.map(key)?.get(key))
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Result<Option<&mut V>, LockError> {
        Ok(self.map_mut(key)?.get_mut(key))
    }

    pub fn contains(&self, key: &[u8]) -> Result<bool, LockError> {
        Ok(self.map(key)?.contains_key(key))
    }

    pub fn put(&mut self, key: Bytes, value: V) -> Result<usize, LockError> {
        let store = self.store;
        let map = self.map_mut(&key)?;
        Ok(put_into(map, store, key, value))
    }

    pub fn put_if_absent(&mut self, key: Bytes, value: V) -> Result<usize, LockError> {
        let store = self.store;
        let map = self.map_mut(&key)?;
        Ok(put_if_absent_into(map, store, key, value))
    }

    pub fn put_if_present(&mut self, key: Bytes, value: V) -> Result<usize, LockError> {
        let map = self.map_mut(&key)?;
        Ok(put_if_present_into(map, key, value))
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<Option<V>, LockError> {
        let store = self.store;
        let map = self.map_mut(key)?;
        Ok(delete_from(map, store, key))
    }

    /// Visits the entries of every held shard in ascending shard order.
    /// Returning `false` stops the traversal.
    pub fn for_each(&self, mut visitor: impl FnMut(&Bytes, &V) -> bool) {
        for (_, guard) in &self.held {
            for (key, value) in guard.map() {
                if !visitor(key, value) {
                    return;
                }
            }
        }
    }

    /// Empties every held shard and returns the removed keys.
    ///
    /// Fails without touching anything if one of the shards is held shared.
    pub fn clear(&mut self) -> Result<Vec<Bytes>, LockError> {
        if let Some((index, _)) = self
            .held
            .iter()
            .find(|(_, guard)| guard.mode() == LockMode::Shared)
        {
            return Err(LockError::NotExclusive(*index));
        }

        let mut removed = Vec::new();
        for (_, guard) in &mut self.held {
            if let Guard::Exclusive(map) = guard {
                removed.extend(map.drain().map(|(key, _)| key));
            }
        }
        self.store.record_remove(removed.len());
        Ok(removed)
    }
}

impl<V> Drop for ShardLocks<'_, V> {
    fn drop(&mut self) {
        // Vec's own drop order is front to back too, but release order is
        // part of the locking contract so it is spelled out.
        for (_, guard) in self.held.drain(..) {
            drop(guard);
        }
    }
}
