//! Command dispatch: resolve, lock, bump versions, run, release.
//!
//! ```text
//!   tokens ──resolve──> CommandSpec ──keys()──> KeySpec
//!                                                  │
//!                        LockSet::acquire <────────┘
//!                              │
//!                   bump write-key versions
//!                              │
//!                        spec.exec(...)
//!                              │
//!                    guards dropped, reply
//! ```

use super::registry::{CommandRegistry, CommandSpec};
use crate::protocol::RespValue;
use crate::storage::{Database, LockedDb};
use bytes::Bytes;

/// Runs one command against `db`, taking and releasing its locks.
pub fn execute(registry: &CommandRegistry, db: &Database, args: &[Bytes]) -> RespValue {
    let spec = match registry.resolve(args) {
        Ok(spec) => spec,
        Err(err) => return err.into_reply(),
    };

    let keys = (spec.keys)(&args[1..]);
    let mut locked = db.lock_with(&db.plan(&keys));
    run(spec, &mut locked, &args[1..], &keys.write)
}

/// Runs one command inside a lock scope the caller already holds.
///
/// No lock is taken. If the command touches a key whose shard the scope does
/// not cover, it fails with an internal error instead of blocking.
pub fn exec_with_lock(registry: &CommandRegistry, locked: &mut LockedDb<'_>, args: &[Bytes]) -> RespValue {
    match registry.resolve(args) {
        Ok(spec) => {
            let keys = (spec.keys)(&args[1..]);
            run(spec, locked, &args[1..], &keys.write)
        }
        Err(err) => err.into_reply(),
    }
}

fn run(spec: &CommandSpec, locked: &mut LockedDb<'_>, args: &[Bytes], writes: &[Bytes]) -> RespValue {
    // Versions move before the body runs, under the same exclusive locks.
    locked.touch(writes);
    (spec.exec)(locked, args).unwrap_or_else(|err| err.into_reply())
}
