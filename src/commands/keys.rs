//! Key Commands
//!
//! Key lifecycle and keyspace commands: `DEL`, `EXISTS`, `TYPE`, the
//! `EXPIRE`/`TTL` families, `PERSIST`, `KEYS`, `RENAME`, `RENAMENX`,
//! `DBSIZE`, `FLUSHDB` and `ECHO`.
//!
//! `KEYS` and `FLUSHDB` lock every shard of the database (shared and
//! exclusive respectively) so their bodies never need another lock.

use super::args::{absolute_deadline, is_keyword, parse_int, relative_deadline};
use super::registry::{
    keyspace_read, keyspace_write, no_keys, read_all, read_first, write_all, write_first,
    write_first_two, CommandRegistry, CommandResult,
};
use super::CommandError;
use crate::protocol::RespValue;
use crate::storage::LockedDb;
use bytes::Bytes;
use std::time::{Duration, SystemTime};

pub(crate) fn register(registry: &mut CommandRegistry) {
    registry
        .register("del", -2, write_all, del)
        .register("exists", -2, read_all, exists)
        .register("type", 2, read_first, key_type)
        .register("expire", 3, write_first, expire)
        .register("pexpire", 3, write_first, pexpire)
        .register("expireat", 3, write_first, expireat)
        .register("pexpireat", 3, write_first, pexpireat)
        .register("ttl", 2, read_first, ttl)
        .register("pttl", 2, read_first, pttl)
        .register("persist", 2, write_first, persist)
        .register("keys", 2, keyspace_read, keys)
        .register("rename", 3, write_first_two, rename)
        .register("renamenx", 3, write_first_two, renamenx)
        .register("dbsize", 1, no_keys, dbsize)
        .register("flushdb", -1, keyspace_write, flushdb)
        .register("echo", 2, no_keys, echo);
}

fn del(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let mut removed = 0;
    for key in args {
        if db.exists(key)? {
            db.remove(key)?;
            removed += 1;
        }
    }
    Ok(RespValue::integer(removed))
}

fn exists(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let mut count = 0;
    for key in args {
        if db.exists(key)? {
            count += 1;
        }
    }
    Ok(RespValue::integer(count))
}

fn key_type(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let name = db.get(&args[0])?.map_or("none", |value| value.type_name());
    Ok(RespValue::simple_string(name))
}

/// Applies a deadline to an existing key. A deadline in the past deletes it.
fn set_deadline(db: &mut LockedDb<'_>, key: &Bytes, at: SystemTime) -> CommandResult {
    if !db.exists(key)? {
        return Ok(RespValue::integer(0));
    }
    if at <= SystemTime::now() {
        db.remove(key)?;
    } else {
        db.expire_at(key, at)?;
    }
    Ok(RespValue::integer(1))
}

fn expire(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let at = relative_deadline(parse_int(&args[1])?, 1000, "expire")?;
    set_deadline(db, &args[0], at)
}

fn pexpire(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let at = relative_deadline(parse_int(&args[1])?, 1, "pexpire")?;
    set_deadline(db, &args[0], at)
}

fn expireat(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let at = absolute_deadline(parse_int(&args[1])?, 1000, "expireat")?;
    set_deadline(db, &args[0], at)
}

fn pexpireat(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let at = absolute_deadline(parse_int(&args[1])?, 1, "pexpireat")?;
    set_deadline(db, &args[0], at)
}

/// -2 for a missing key, -1 for no deadline, otherwise the time left.
fn remaining(db: &mut LockedDb<'_>, key: &[u8]) -> Result<Result<Duration, i64>, CommandError> {
    if !db.exists(key)? {
        return Ok(Err(-2));
    }
    Ok(match db.deadline(key)? {
        None => Err(-1),
        Some(at) => Ok(at
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO)),
    })
}

fn ttl(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let reply = match remaining(db, &args[0])? {
        Ok(left) => ((left.as_millis() + 500) / 1000) as i64,
        Err(code) => code,
    };
    Ok(RespValue::integer(reply))
}

fn pttl(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let reply = match remaining(db, &args[0])? {
        Ok(left) => left.as_millis() as i64,
        Err(code) => code,
    };
    Ok(RespValue::integer(reply))
}

fn persist(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let key = &args[0];
    if !db.exists(key)? {
        return Ok(RespValue::integer(0));
    }
    Ok(RespValue::integer(db.persist(key)? as i64))
}

fn keys(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let pattern = &args[0];
    let mut matched = Vec::new();
    db.for_each(|key, _| {
        if glob_match(pattern, key) {
            matched.push(key.clone());
        }
        true
    });
    Ok(RespValue::bulk_array(matched))
}

fn move_key(db: &mut LockedDb<'_>, from: &Bytes, to: &Bytes) -> Result<(), CommandError> {
    let deadline = db.deadline(from)?;
    let value = db.remove(from)?.ok_or(CommandError::NoSuchKey)?;
    db.set(to.clone(), value)?;
    if let Some(at) = deadline {
        db.expire_at(to, at)?;
    }
    Ok(())
}

fn rename(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let (from, to) = (&args[0], &args[1]);
    if !db.exists(from)? {
        return Err(CommandError::NoSuchKey);
    }
    if from != to {
        move_key(db, from, to)?;
    }
    Ok(RespValue::ok())
}

fn renamenx(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let (from, to) = (&args[0], &args[1]);
    if !db.exists(from)? {
        return Err(CommandError::NoSuchKey);
    }
    if db.exists(to)? {
        return Ok(RespValue::integer(0));
    }
    move_key(db, from, to)?;
    Ok(RespValue::integer(1))
}

fn dbsize(db: &mut LockedDb<'_>, _args: &[Bytes]) -> CommandResult {
    Ok(RespValue::integer(db.database().len() as i64))
}

fn flushdb(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    match args {
        [] => {}
        [mode] if is_keyword(mode, "ASYNC") || is_keyword(mode, "SYNC") => {}
        _ => return Err(CommandError::Syntax),
    }
    db.clear()?;
    Ok(RespValue::ok())
}

fn echo(_db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    Ok(RespValue::bulk_string(args[0].clone()))
}

/// Glob-style matching over raw bytes.
///
/// Supports `*`, `?`, character classes (`[abc]`, `[^abc]`, `[a-z]`) and
/// backslash escapes. Runs iteratively: on a mismatch only the most recent
/// `*` is widened, so matching takes O(pattern × text) time and constant
/// stack whatever the input.
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    // Pattern position after the last `*`, and how much text it has absorbed
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        let next = match pattern.get(p) {
            Some(b'*') => {
                p += 1;
                star = Some((p, t));
                continue;
            }
            Some(b'?') => Some(p + 1),
            Some(b'[') => match match_class(&pattern[p + 1..], text[t]) {
                Some((true, after)) => Some(pattern.len() - after.len()),
                _ => None,
            },
            Some(b'\\') if p + 1 < pattern.len() => (pattern[p + 1] == text[t]).then_some(p + 2),
            Some(&literal) => (literal == text[t]).then_some(p + 1),
            None => None,
        };

        match (next, star) {
            (Some(next), _) => {
                p = next;
                t += 1;
            }
            (None, Some((after_star, absorbed))) => {
                p = after_star;
                t = absorbed + 1;
                star = Some((after_star, t));
            }
            (None, None) => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}

/// Matches `c` against a class body (after `[`). Returns whether it matched
/// and the pattern after the closing `]`, or `None` if the class is unclosed.
fn match_class(class: &[u8], c: u8) -> Option<(bool, &[u8])> {
    let (negate, mut i) = match class.first() {
        Some(b'^') => (true, 1),
        _ => (false, 0),
    };
    let mut matched = false;

    while i < class.len() && class[i] != b']' {
        if class[i] == b'\\' && i + 1 < class.len() {
            matched |= class[i + 1] == c;
            i += 2;
            continue;
        }
        if i + 2 < class.len() && class[i + 1] == b'-' && class[i + 2] != b']' {
            let (lo, hi) = (class[i].min(class[i + 2]), class[i].max(class[i + 2]));
            matched |= (lo..=hi).contains(&c);
            i += 3;
            continue;
        }
        matched |= class[i] == c;
        i += 1;
    }

    if i >= class.len() {
        return None;
    }
    Some((matched != negate, &class[i + 1..]))
}
