//! Logical Database
//!
//! A `Database` bundles everything one numbered keyspace needs:
//!
//! - the data store (`ShardedStore<Value>`)
//! - the TTL index (`ShardedStore<SystemTime>`), keyed like the data
//! - the per-key version tracker used by WATCH
//! - a handle to the engine-wide expiration wheel
//!
//! ## Expiry
//!
//! Keys expire two ways. Setting a TTL schedules a wheel task that deletes
//! the key once its deadline passes. Independently, every read through a
//! [`LockedDb`] checks the TTL index and treats an expired key as absent,
//! removing it on the spot when the caller holds the key's shard exclusively.
//!
//! All TTL index reads and writes happen while the key's data shard is held,
//! so data and TTL never disagree for a caller inside a lock scope.

use super::expiry::ExpirationWheel;
use super::lock::{LockError, LockMode, LockSet, ShardLocks};
use super::shard::ShardedStore;
use super::value::Value;
use super::version::VersionTracker;
use bytes::Bytes;
use std::sync::{Arc, Weak};
use std::time::SystemTime;
use tracing::debug;

/// The keys a command reads and writes, as declared to the lock coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySpec {
    pub read: Vec<Bytes>,
    pub write: Vec<Bytes>,
    /// Set for commands that touch the whole keyspace.
    pub keyspace: Option<LockMode>,
}

/// One numbered database.
pub struct Database {
    index: usize,
    data: ShardedStore<Value>,
    ttl: ShardedStore<SystemTime>,
    versions: VersionTracker,
    wheel: ExpirationWheel,
    this: Weak<Database>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("index", &self.index)
            .field("keys", &self.data.count())
            .finish()
    }
}

impl Database {
    pub fn new(index: usize, shard_hint: usize, wheel: ExpirationWheel) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            index,
            data: ShardedStore::new(shard_hint),
            ttl: ShardedStore::new(shard_hint),
            versions: VersionTracker::new(shard_hint),
            wheel,
            this: this.clone(),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Approximate number of keys, including expired ones not yet removed.
    pub fn len(&self) -> usize {
        self.data.count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn versions(&self) -> &VersionTracker {
        &self.versions
    }

    pub fn data(&self) -> &ShardedStore<Value> {
        &self.data
    }

    /// Plans the locks for a declared key set.
    pub fn plan(&self, keys: &KeySpec) -> LockSet {
        match keys.keyspace {
            Some(mode) => LockSet::all(&self.data, mode),
            None => LockSet::new(&self.data, &keys.read, &keys.write),
        }
    }

    /// Locks the shards of the given keys and returns the held scope.
    pub fn lock(&self, read: &[Bytes], write: &[Bytes]) -> LockedDb<'_> {
        self.lock_with(&LockSet::new(&self.data, read, write))
    }

    pub fn lock_with(&self, plan: &LockSet) -> LockedDb<'_> {
        LockedDb {
            db: self,
            locks: plan.acquire(&self.data),
        }
    }

    /// Visits every live key with its value and deadline.
    ///
    /// Runs shard by shard under shared locks; returning `false` stops the walk.
    pub fn for_each(&self, mut visitor: impl FnMut(&Bytes, &Value, Option<SystemTime>) -> bool) {
        let now = SystemTime::now();
        self.data.for_each(|key, value| {
            let deadline = self.ttl.get(key);
            if matches!(deadline, Some(at) if at <= now) {
                return true;
            }
            visitor(key, value, deadline)
        });
    }

    fn task_key(&self, key: &[u8]) -> String {
        format!("expire:{}:{}", self.index, key.escape_ascii())
    }

    fn schedule_expiry(&self, key: Bytes, at: SystemTime) {
        let db = self.this.clone();
        let task_key = self.task_key(&key);
        self.wheel.add_at(at, task_key, move || {
            if let Some(db) = db.upgrade() {
                db.expire_now(&key);
            }
        });
    }

    /// Wheel callback: removes the key if its deadline has really passed.
    fn expire_now(&self, key: &Bytes) {
        let mut locked = self.lock(&[], std::slice::from_ref(key));
        let Some(at) = self.ttl.get(key) else {
            return;
        };

        if at > SystemTime::now() {
            // Fired within the last tick before the deadline
            self.schedule_expiry(key.clone(), at);
            return;
        }

        if let Ok(Some(_)) = locked.remove(key) {
            self.versions.add_version(key, 1);
            debug!(db = self.index, key = %key.escape_ascii(), "Key expired");
        }
    }
}

/// A database together with a set of held shard locks.
///
/// Everything a command body does to the keyspace goes through this type.
/// None of its methods take a lock.
#[derive(Debug)]
pub struct LockedDb<'a> {
    db: &'a Database,
    locks: ShardLocks<'a, Value>,
}

impl<'a> LockedDb<'a> {
    pub fn database(&self) -> &'a Database {
        self.db
    }

    /// True when `key` has a deadline that has already passed.
    fn is_expired(&self, key: &[u8]) -> bool {
        matches!(self.db.ttl.get(key), Some(at) if at <= SystemTime::now())
    }

    /// Applies lazy expiry. Returns `true` if the key must be treated as absent.
    fn purge_if_expired(&mut self, key: &[u8]) -> Result<bool, LockError> {
        let mode = self
            .locks
            .mode(key)
            .ok_or_else(|| LockError::NotHeld(self.db.data.shard_index(key)))?;

        if !self.is_expired(key) {
            return Ok(false);
        }
        if mode == LockMode::Exclusive && self.remove(key)?.is_some() {
            self.db.versions.add_version(&Bytes::copy_from_slice(key), 1);
            debug!(db = self.db.index, key = %key.escape_ascii(), "Expired key removed on access");
        }
        Ok(true)
    }

    pub fn get(&mut self, key: &[u8]) -> Result<Option<&Value>, LockError> {
        if self.purge_if_expired(key)? {
            return Ok(None);
        }
        self.locks.get(key)
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Result<Option<&mut Value>, LockError> {
        if self.purge_if_expired(key)? {
            return Ok(None);
        }
        self.locks.get_mut(key)
    }

    pub fn exists(&mut self, key: &[u8]) -> Result<bool, LockError> {
        Ok(self.get(key)?.is_some())
    }

    /// Stores a value and clears any TTL the key had.
    pub fn set(&mut self, key: Bytes, value: Value) -> Result<usize, LockError> {
        self.purge_if_expired(&key)?;
        let inserted = self.locks.put(key.clone(), value)?;
        self.persist(&key)?;
        Ok(inserted)
    }

    /// Stores a value, keeping the key's TTL.
    pub fn replace(&mut self, key: Bytes, value: Value) -> Result<usize, LockError> {
        self.purge_if_expired(&key)?;
        self.locks.put(key, value)
    }

    /// Stores a value only if the key is absent (or expired).
    pub fn set_if_absent(&mut self, key: Bytes, value: Value) -> Result<bool, LockError> {
        self.purge_if_expired(&key)?;
        Ok(self.locks.put_if_absent(key, value)? == 1)
    }

    /// Removes the key together with its TTL.
    pub fn remove(&mut self, key: &[u8]) -> Result<Option<Value>, LockError> {
        let old = self.locks.delete(key)?;
        if self.db.ttl.delete(key).is_some() {
            self.db.wheel.cancel(self.db.task_key(key));
        }
        Ok(old)
    }

    /// Removes a container key once its last element is gone.
    pub fn remove_if_empty(&mut self, key: &[u8]) -> Result<(), LockError> {
        let empty = matches!(self.locks.get(key)?, Some(value) if value.is_empty_container());
        if empty {
            self.remove(key)?;
        }
        Ok(())
    }

    /// Sets the key's deadline. The key must exist.
    pub fn expire_at(&mut self, key: &Bytes, at: SystemTime) -> Result<(), LockError> {
        if self.locks.mode(key) != Some(LockMode::Exclusive) {
            return Err(LockError::NotExclusive(self.db.data.shard_index(key)));
        }
        self.db.ttl.put(key.clone(), at);
        self.db.schedule_expiry(key.clone(), at);
        Ok(())
    }

    /// Drops the key's deadline. Returns `true` if it had one.
    pub fn persist(&mut self, key: &[u8]) -> Result<bool, LockError> {
        if self.locks.mode(key) != Some(LockMode::Exclusive) {
            return Err(LockError::NotExclusive(self.db.data.shard_index(key)));
        }
        if self.db.ttl.delete(key).is_some() {
            self.db.wheel.cancel(self.db.task_key(key));
            return Ok(true);
        }
        Ok(false)
    }

    /// The key's deadline, if it is live and has one.
    pub fn deadline(&mut self, key: &[u8]) -> Result<Option<SystemTime>, LockError> {
        if self.purge_if_expired(key)? {
            return Ok(None);
        }
        Ok(self.db.ttl.get(key))
    }

    /// Bumps the version of each key by one.
    pub fn touch(&self, keys: &[Bytes]) {
        for key in keys {
            self.db.versions.add_version(key, 1);
        }
    }

    /// Visits the live keys of every held shard.
    pub fn for_each(&self, mut visitor: impl FnMut(&Bytes, &Value) -> bool) {
        let now = SystemTime::now();
        self.locks.for_each(|key, value| {
            if matches!(self.db.ttl.get(key), Some(at) if at <= now) {
                return true;
            }
            visitor(key, value)
        });
    }

    /// Removes every key in the held shards. Requires exclusive locks on all
    /// of them. Returns the number of keys removed.
    pub fn clear(&mut self) -> Result<usize, LockError> {
        let removed = self.locks.clear()?;
        for key in &removed {
            if self.db.ttl.delete(key).is_some() {
                self.db.wheel.cancel(self.db.task_key(key));
            }
            self.db.versions.add_version(key, 1);
        }
        Ok(removed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::WheelConfig;
    use std::time::Duration;

    fn database() -> Arc<Database> {
        let wheel = ExpirationWheel::start(WheelConfig {
            interval: Duration::from_millis(10),
            slots: 64,
        });
        Database::new(0, 16, wheel)
    }

    fn key(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    fn string(s: &str) -> Value {
        Value::String(key(s))
    }

    #[tokio::test]
    async fn test_set_get_remove() {
        let db = database();
        let k = key("name");

        let mut locked = db.lock(&[], &[k.clone()]);
        assert_eq!(locked.set(k.clone(), string("quartz")), Ok(1));
        assert_eq!(locked.get(&k), Ok(Some(&string("quartz"))));
        assert_eq!(locked.remove(&k), Ok(Some(string("quartz"))));
        assert_eq!(locked.get(&k), Ok(None));
        drop(locked);

        assert!(db.is_empty());
    }

    #[tokio::test]
    async fn test_lazy_expiry_under_exclusive_lock() {
        let db = database();
        let k = key("gone");

        let mut locked = db.lock(&[], &[k.clone()]);
        locked.set(k.clone(), string("v")).unwrap();
        locked
            .expire_at(&k, SystemTime::now() - Duration::from_secs(1))
            .unwrap();
        assert_eq!(locked.get(&k), Ok(None));
        drop(locked);

        assert_eq!(db.len(), 0);
        assert_eq!(db.versions().get_version(&k), 1);
    }

    #[tokio::test]
    async fn test_lazy_expiry_under_shared_lock_hides_key() {
        let db = database();
        let k = key("hidden");

        {
            let mut locked = db.lock(&[], &[k.clone()]);
            locked.set(k.clone(), string("v")).unwrap();
            locked
                .expire_at(&k, SystemTime::now() - Duration::from_secs(1))
                .unwrap();
        }

        let mut locked = db.lock(&[k.clone()], &[]);
        assert_eq!(locked.get(&k), Ok(None));
        drop(locked);

        // Still physically present until a writer or the wheel removes it
        assert_eq!(db.len(), 1);
    }

    #[tokio::test]
    async fn test_wheel_removes_expired_key() {
        let db = database();
        let k = key("session");

        {
            let mut locked = db.lock(&[], &[k.clone()]);
            locked.set(k.clone(), string("token")).unwrap();
            locked
                .expire_at(&k, SystemTime::now() + Duration::from_millis(30))
                .unwrap();
        }
        assert_eq!(db.len(), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(db.len(), 0);
        assert_eq!(db.versions().get_version(&k), 1);
    }

    #[tokio::test]
    async fn test_set_clears_ttl() {
        let db = database();
        let k = key("k");

        let mut locked = db.lock(&[], &[k.clone()]);
        locked.set(k.clone(), string("a")).unwrap();
        locked
            .expire_at(&k, SystemTime::now() + Duration::from_millis(30))
            .unwrap();
        assert!(locked.deadline(&k).unwrap().is_some());

        locked.set(k.clone(), string("b")).unwrap();
        assert_eq!(locked.deadline(&k), Ok(None));
        drop(locked);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(db.len(), 1);
    }

    #[tokio::test]
    async fn test_write_through_shared_scope_is_rejected() {
        let db = database();
        let k = key("k");

        let mut locked = db.lock(&[k.clone()], &[]);
        assert_eq!(
            locked.set(k.clone(), string("v")),
            Err(LockError::NotExclusive(db.data().shard_index(&k)))
        );
        assert!(locked.persist(&k).is_err());
    }

    #[tokio::test]
    async fn test_for_each_skips_expired() {
        let db = database();
        let keys: Vec<Bytes> = (0..10).map(|i| key(&format!("k{}", i))).collect();

        {
            let mut locked = db.lock(&[], &keys);
            for k in &keys {
                locked.set(k.clone(), string("v")).unwrap();
            }
            locked
                .expire_at(&keys[0], SystemTime::now() - Duration::from_secs(1))
                .unwrap();
            locked
                .expire_at(&keys[1], SystemTime::now() + Duration::from_secs(60))
                .unwrap();
        }

        let mut seen = 0;
        let mut with_deadline = 0;
        db.for_each(|_, _, deadline| {
            seen += 1;
            if deadline.is_some() {
                with_deadline += 1;
            }
            true
        });
        assert_eq!(seen, 9);
        assert_eq!(with_deadline, 1);
    }

    #[tokio::test]
    async fn test_clear_bumps_versions() {
        let db = database();
        let keys: Vec<Bytes> = (0..5).map(|i| key(&format!("k{}", i))).collect();

        {
            let mut locked = db.lock(&[], &keys);
            for k in &keys {
                locked.set(k.clone(), string("v")).unwrap();
            }
        }

        let plan = db.plan(&KeySpec {
            keyspace: Some(LockMode::Exclusive),
            ..Default::default()
        });
        let mut locked = db.lock_with(&plan);
        assert_eq!(locked.clear(), Ok(5));
        drop(locked);

        assert!(db.is_empty());
        for k in &keys {
            assert_eq!(db.versions().get_version(k), 1);
        }
    }
}
