//! Hash commands: `HSET`, `HGET`, `HDEL`, `HEXISTS`, `HLEN`, `HGETALL`.

use super::registry::{read_first, write_first, CommandRegistry, CommandResult};
use super::CommandError;
use crate::protocol::RespValue;
use crate::storage::{LockedDb, Value};
use bytes::Bytes;
use std::collections::HashMap;

pub(crate) fn register(registry: &mut CommandRegistry) {
    registry
        .register("hset", -4, write_first, hset)
        .register("hget", 3, read_first, hget)
        .register("hdel", -3, write_first, hdel)
        .register("hexists", 3, read_first, hexists)
        .register("hlen", 2, read_first, hlen)
        .register("hgetall", 2, read_first, hgetall);
}

type Hash = HashMap<Bytes, Bytes>;

fn read_hash<'d>(db: &'d mut LockedDb<'_>, key: &[u8]) -> Result<Option<&'d Hash>, CommandError> {
    match db.get(key)? {
        None => Ok(None),
        Some(Value::Hash(hash)) => Ok(Some(hash)),
        Some(_) => Err(CommandError::WrongType),
    }
}

fn write_hash<'d>(db: &'d mut LockedDb<'_>, key: &Bytes, create: bool) -> Result<Option<&'d mut Hash>, CommandError> {
    if create && !db.exists(key)? {
        db.set(key.clone(), Value::Hash(HashMap::new()))?;
    }
    match db.get_mut(key)? {
        None => Ok(None),
        Some(Value::Hash(hash)) => Ok(Some(hash)),
        Some(_) => Err(CommandError::WrongType),
    }
}

fn hset(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let pairs = &args[1..];
    if pairs.len() % 2 != 0 {
        return Err(CommandError::wrong_arity(b"hset"));
    }
    let Some(hash) = write_hash(db, &args[0], true)? else {
        return Err(CommandError::NoSuchKey);
    };
    let mut added = 0;
    for pair in pairs.chunks_exact(2) {
        if hash.insert(pair[0].clone(), pair[1].clone()).is_none() {
            added += 1;
        }
    }
    Ok(RespValue::integer(added))
}

fn hget(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let value = read_hash(db, &args[0])?.and_then(|hash| hash.get(&args[1]).cloned());
    Ok(RespValue::optional(value))
}

fn hdel(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let key = &args[0];
    let removed = match write_hash(db, key, false)? {
        None => 0,
        Some(hash) => args[1..]
            .iter()
            .filter(|field| hash.remove(*field).is_some())
            .count(),
    };
    db.remove_if_empty(key)?;
    Ok(RespValue::integer(removed as i64))
}

fn hexists(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let found = read_hash(db, &args[0])?.is_some_and(|hash| hash.contains_key(&args[1]));
    Ok(RespValue::integer(found as i64))
}

fn hlen(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let len = read_hash(db, &args[0])?.map_or(0, HashMap::len);
    Ok(RespValue::integer(len as i64))
}

fn hgetall(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let items = read_hash(db, &args[0])?
        .map(|hash| {
            hash.iter()
                .flat_map(|(field, value)| [field.clone(), value.clone()])
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    Ok(RespValue::bulk_array(items))
}
