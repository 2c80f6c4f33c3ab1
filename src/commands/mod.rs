//! Commands
//!
//! Every data command is a plain function over a held lock scope
//! ([`LockedDb`](crate::storage::LockedDb)) plus a declaration of the keys
//! it reads and writes. The [`CommandRegistry`] ties the two together and
//! [`dispatch`] runs a command: lock, bump versions, execute, release.
//!
//! ```text
//!   tokens ──> CommandRegistry::resolve ──> CommandSpec
//!                                             │ keys()
//!                                             ▼
//!                                   Database::plan ──> LockSet
//!                                             │ acquire
//!                                             ▼
//!                                   spec.exec(&mut LockedDb, args)
//! ```
//!
//! ## Command Groups
//!
//! - strings: `GET`, `SET`, `SETNX`, `SETEX`, `PSETEX`, `GETSET`, `GETDEL`,
//!   `INCR`, `INCRBY`, `DECR`, `DECRBY`, `APPEND`, `STRLEN`, `MGET`, `MSET`
//! - keys: `DEL`, `EXISTS`, `TYPE`, `EXPIRE`, `PEXPIRE`, `EXPIREAT`,
//!   `PEXPIREAT`, `TTL`, `PTTL`, `PERSIST`, `KEYS`, `RENAME`, `RENAMENX`,
//!   `DBSIZE`, `FLUSHDB`, `ECHO`
//! - lists: `LPUSH`, `RPUSH`, `LPOP`, `RPOP`, `LLEN`, `LRANGE`, `LINDEX`
//! - hashes: `HSET`, `HGET`, `HDEL`, `HEXISTS`, `HLEN`, `HGETALL`
//! - sets: `SADD`, `SREM`, `SISMEMBER`, `SMEMBERS`, `SCARD`
//! - sorted sets: `ZADD`, `ZSCORE`, `ZREM`, `ZCARD`, `ZRANGE`
//!
//! Connection commands (`AUTH`, `SELECT`, `MULTI`, `WATCH`, ...) live in the
//! [`engine`](crate::engine), which owns the session logic.

pub(crate) mod args;
pub mod dispatch;
pub mod error;
mod hashes;
pub mod keys;
mod lists;
pub mod registry;
mod sets;
mod strings;
mod zsets;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatch::{exec_with_lock, execute};
pub use error::CommandError;
pub use keys::glob_match;
pub use registry::{validate_arity, CommandRegistry, CommandResult, CommandSpec, ExecFn, KeysFn};
