//! Storage Module
//!
//! Everything below the command layer: the sharded store, the lock
//! coordinator, version counters, the expiration wheel and the logical
//! database that ties them together.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────── Database ─────────────────────────────┐
//! │                                                                   │
//! │   data: ShardedStore<Value>      ttl: ShardedStore<SystemTime>    │
//! │  ┌─────────┐ ┌─────────┐        ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │  ...   │ Shard 0 │ │ Shard 1 │  ...      │
//! │  └─────────┘ └─────────┘        └─────────┘ └─────────┘           │
//! │        ▲                                                          │
//! │        │ LockSet::acquire (ascending shard order)                 │
//! │        │                                                          │
//! │   LockedDb ── versions: VersionTracker                            │
//! └───────────────────────────────┬───────────────────────────────────┘
//!                                 │ add_at / cancel
//!                    ┌────────────▼────────────┐
//!                    │     ExpirationWheel     │
//!                    │  (Background Tokio Task)│
//!                    └─────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use quartzkv::storage::{LockSet, ShardedStore};
//! use bytes::Bytes;
//!
//! let store: ShardedStore<i64> = ShardedStore::new(64);
//! let keys = [Bytes::from("a"), Bytes::from("b")];
//!
//! let mut locks = LockSet::new(&store, &[], &keys).acquire(&store);
//! locks.put(keys[0].clone(), 1).unwrap();
//! locks.put(keys[1].clone(), 2).unwrap();
//! drop(locks);
//!
//! assert_eq!(store.count(), 2);
//! ```

pub mod database;
pub mod expiry;
pub mod lock;
pub mod shard;
pub mod value;
pub mod version;

// Re-export commonly used types
pub use database::{Database, KeySpec, LockedDb};
pub use expiry::{Callback, ExpirationWheel, TimingWheel, WheelConfig};
pub use lock::{LockError, LockMode, LockSet, ShardLocks};
pub use shard::{compute_capacity, fnv32, ShardedStore};
pub use value::{SortedSet, Value};
pub use version::VersionTracker;
