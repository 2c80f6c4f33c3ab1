//! String Commands
//!
//! - `GET key`, `SET key value [NX|XX] [EX s|PX ms|KEEPTTL] [GET]`
//! - `SETNX`, `SETEX`, `PSETEX`, `GETSET`, `GETDEL`
//! - `INCR`, `INCRBY`, `DECR`, `DECRBY`
//! - `APPEND`, `STRLEN`, `MGET`, `MSET`
//!
//! Integers written by INCR and friends are kept as `Value::Int` and read
//! back as their decimal string.

use super::args::{is_keyword, parse_int, positive_ttl};
use super::registry::{
    read_all, read_first, write_first, write_pairs, CommandRegistry, CommandResult,
};
use super::CommandError;
use crate::protocol::RespValue;
use crate::storage::{LockedDb, Value};
use bytes::{Bytes, BytesMut};
use std::time::{Duration, SystemTime};

pub(crate) fn register(registry: &mut CommandRegistry) {
    registry
        .register("get", 2, read_first, get)
        .register("set", -3, write_first, set)
        .register("setnx", 3, write_first, setnx)
        .register("setex", 4, write_first, setex)
        .register("psetex", 4, write_first, psetex)
        .register("getset", 3, write_first, getset)
        .register("getdel", 2, write_first, getdel)
        .register("incr", 2, write_first, incr)
        .register("incrby", 3, write_first, incrby)
        .register("decr", 2, write_first, decr)
        .register("decrby", 3, write_first, decrby)
        .register("append", 3, write_first, append)
        .register("strlen", 2, read_first, strlen)
        .register("mget", -2, read_all, mget)
        .register("mset", -3, write_pairs, mset);
}

/// Reads a string-like value, failing with WRONGTYPE for containers.
pub(crate) fn read_string(db: &mut LockedDb<'_>, key: &[u8]) -> Result<Option<Bytes>, CommandError> {
    match db.get(key)? {
        None => Ok(None),
        Some(value) => value.as_bytes().map(Some).ok_or(CommandError::WrongType),
    }
}

fn get(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    Ok(RespValue::optional(read_string(db, &args[0])?))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Condition {
    Always,
    IfAbsent,
    IfPresent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expiry {
    Clear,
    Keep,
    After(Duration),
}

fn set(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let (key, value) = (&args[0], &args[1]);

    let mut condition = Condition::Always;
    let mut expiry = Expiry::Clear;
    let mut return_old = false;

    let mut options = args[2..].iter();
    while let Some(option) = options.next() {
        if is_keyword(option, "NX") && condition == Condition::Always {
            condition = Condition::IfAbsent;
        } else if is_keyword(option, "XX") && condition == Condition::Always {
            condition = Condition::IfPresent;
        } else if is_keyword(option, "GET") {
            return_old = true;
        } else if is_keyword(option, "KEEPTTL") && expiry == Expiry::Clear {
            expiry = Expiry::Keep;
        } else if (is_keyword(option, "EX") || is_keyword(option, "PX")) && expiry == Expiry::Clear {
            let amount = parse_int(options.next().ok_or(CommandError::Syntax)?)?;
            let unit = if is_keyword(option, "EX") { 1000 } else { 1 };
            expiry = Expiry::After(positive_ttl(amount, unit, "set")?);
        } else {
            return Err(CommandError::Syntax);
        }
    }

    let old = if return_old {
        read_string(db, key)?
    } else {
        None
    };

    let exists = db.exists(key)?;
    let proceed = match condition {
        Condition::Always => true,
        Condition::IfAbsent => !exists,
        Condition::IfPresent => exists,
    };
    if !proceed {
        return Ok(if return_old {
            RespValue::optional(old)
        } else {
            RespValue::null()
        });
    }

    let value = Value::String(value.clone());
    match expiry {
        Expiry::Keep => {
            db.replace(key.clone(), value)?;
        }
        Expiry::Clear => {
            db.set(key.clone(), value)?;
        }
        Expiry::After(ttl) => {
            db.set(key.clone(), value)?;
            db.expire_at(key, SystemTime::now() + ttl)?;
        }
    }

    Ok(if return_old {
        RespValue::optional(old)
    } else {
        RespValue::ok()
    })
}

fn setnx(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let inserted = db.set_if_absent(args[0].clone(), Value::String(args[1].clone()))?;
    Ok(RespValue::integer(inserted as i64))
}

fn set_with_ttl(db: &mut LockedDb<'_>, args: &[Bytes], unit_ms: i64, command: &str) -> CommandResult {
    let ttl = positive_ttl(parse_int(&args[1])?, unit_ms, command)?;
    let key = &args[0];
    db.set(key.clone(), Value::String(args[2].clone()))?;
    db.expire_at(key, SystemTime::now() + ttl)?;
    Ok(RespValue::ok())
}

fn setex(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    set_with_ttl(db, args, 1000, "setex")
}

fn psetex(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    set_with_ttl(db, args, 1, "psetex")
}

fn getset(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let old = read_string(db, &args[0])?;
    db.set(args[0].clone(), Value::String(args[1].clone()))?;
    Ok(RespValue::optional(old))
}

fn getdel(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let old = read_string(db, &args[0])?;
    if old.is_some() {
        db.remove(&args[0])?;
    }
    Ok(RespValue::optional(old))
}

fn incr_by(db: &mut LockedDb<'_>, key: &Bytes, delta: i64) -> CommandResult {
    let current = match db.get(key)? {
        None => 0,
        Some(Value::Int(n)) => *n,
        Some(Value::String(s)) => parse_int(s)?,
        Some(_) => return Err(CommandError::WrongType),
    };
    let next = current.checked_add(delta).ok_or(CommandError::Overflow)?;
    db.replace(key.clone(), Value::Int(next))?;
    Ok(RespValue::integer(next))
}

fn incr(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    incr_by(db, &args[0], 1)
}

fn incrby(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let delta = parse_int(&args[1])?;
    incr_by(db, &args[0], delta)
}

fn decr(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    incr_by(db, &args[0], -1)
}

fn decrby(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let delta = parse_int(&args[1])?
        .checked_neg()
        .ok_or(CommandError::Overflow)?;
    incr_by(db, &args[0], delta)
}

fn append(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let (key, suffix) = (&args[0], &args[1]);
    let combined = match read_string(db, key)? {
        None => suffix.clone(),
        Some(current) => {
            let mut buf = BytesMut::with_capacity(current.len() + suffix.len());
            buf.extend_from_slice(&current);
            buf.extend_from_slice(suffix);
            buf.freeze()
        }
    };
    let len = combined.len() as i64;
    db.replace(key.clone(), Value::String(combined))?;
    Ok(RespValue::integer(len))
}

fn strlen(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let len = read_string(db, &args[0])?.map_or(0, |s| s.len());
    Ok(RespValue::integer(len as i64))
}

fn mget(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let mut values = Vec::with_capacity(args.len());
    for key in args {
        // Non-string values read as nil rather than failing the whole reply
        let value = db.get(key)?.and_then(Value::as_bytes);
        values.push(RespValue::optional(value));
    }
    Ok(RespValue::array(values))
}

fn mset(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    if args.len() % 2 != 0 {
        return Err(CommandError::wrong_arity(b"mset"));
    }
    for pair in args.chunks_exact(2) {
        db.set(pair[0].clone(), Value::String(pair[1].clone()))?;
    }
    Ok(RespValue::ok())
}
