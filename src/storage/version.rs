//! Per-key version counters for optimistic transactions.
//!
//! Every command bumps the version of each key it declares as written. WATCH
//! records the version it saw, and EXEC compares the recorded version with
//! the current one before running anything.

use super::shard::ShardedStore;
use bytes::Bytes;

/// Monotonic write counters keyed like the data store.
#[derive(Debug)]
pub struct VersionTracker {
    versions: ShardedStore<u64>,
}

impl VersionTracker {
    pub fn new(shard_hint: usize) -> Self {
        Self {
            versions: ShardedStore::new(shard_hint),
        }
    }

    /// Adds `delta` to the key's version.
    ///
    /// An unseen key starts at `delta` and reports `false`; an existing one
    /// reports the new total and `true`.
    pub fn add_version(&self, key: &Bytes, delta: u64) -> (u64, bool) {
        self.versions
            .upsert(key.clone(), delta, |version| *version = version.saturating_add(delta))
    }

    /// The key's current version, 0 if it was never written.
    pub fn get_version(&self, key: &[u8]) -> u64 {
        self.versions.get(key).unwrap_or(0)
    }

    /// Number of keys that have a version record.
    pub fn tracked(&self) -> usize {
        self.versions.count()
    }
}
