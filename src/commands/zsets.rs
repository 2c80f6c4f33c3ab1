//! Sorted set commands: `ZADD`, `ZSCORE`, `ZREM`, `ZCARD`, `ZRANGE`.
//!
//! Scores are rendered the way Redis prints doubles: integral values without
//! a fractional part, infinities as `inf` and `-inf`.

use super::args::{is_keyword, normalize_range, parse_float, parse_int};
use super::registry::{read_first, write_first, CommandRegistry, CommandResult};
use super::CommandError;
use crate::protocol::RespValue;
use crate::storage::{LockedDb, SortedSet, Value};
use bytes::Bytes;

pub(crate) fn register(registry: &mut CommandRegistry) {
    registry
        .register("zadd", -4, write_first, zadd)
        .register("zscore", 3, read_first, zscore)
        .register("zrem", -3, write_first, zrem)
        .register("zcard", 2, read_first, zcard)
        .register("zrange", -4, read_first, zrange);
}

pub(crate) fn format_score(score: f64) -> Bytes {
    let text = if score == f64::INFINITY {
        "inf".to_string()
    } else if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else if score.fract() == 0.0 && score.abs() < 1e17 {
        format!("{}", score as i64)
    } else {
        score.to_string()
    };
    Bytes::from(text)
}

fn read_zset<'d>(db: &'d mut LockedDb<'_>, key: &[u8]) -> Result<Option<&'d SortedSet>, CommandError> {
    match db.get(key)? {
        None => Ok(None),
        Some(Value::SortedSet(zset)) => Ok(Some(zset)),
        Some(_) => Err(CommandError::WrongType),
    }
}

fn write_zset<'d>(
    db: &'d mut LockedDb<'_>,
    key: &Bytes,
    create: bool,
) -> Result<Option<&'d mut SortedSet>, CommandError> {
    if create && !db.exists(key)? {
        db.set(key.clone(), Value::SortedSet(SortedSet::new()))?;
    }
    match db.get_mut(key)? {
        None => Ok(None),
        Some(Value::SortedSet(zset)) => Ok(Some(zset)),
        Some(_) => Err(CommandError::WrongType),
    }
}

fn zadd(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let pairs = &args[1..];
    if pairs.len() % 2 != 0 {
        return Err(CommandError::Syntax);
    }
    // Reject the whole command before touching the key if any score is bad
    let entries = pairs
        .chunks_exact(2)
        .map(|pair| Ok((parse_float(&pair[0])?, pair[1].clone())))
        .collect::<Result<Vec<_>, CommandError>>()?;

    let Some(zset) = write_zset(db, &args[0], true)? else {
        return Err(CommandError::NoSuchKey);
    };
    let added = entries
        .into_iter()
        .filter(|(score, member)| zset.insert(member.clone(), *score))
        .count();
    Ok(RespValue::integer(added as i64))
}

fn zscore(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let score = read_zset(db, &args[0])?.and_then(|zset| zset.score(&args[1]));
    Ok(RespValue::optional(score.map(format_score)))
}

fn zrem(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let key = &args[0];
    let removed = match write_zset(db, key, false)? {
        None => 0,
        Some(zset) => args[1..].iter().filter(|member| zset.remove(member)).count(),
    };
    db.remove_if_empty(key)?;
    Ok(RespValue::integer(removed as i64))
}

fn zcard(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let len = read_zset(db, &args[0])?.map_or(0, SortedSet::len);
    Ok(RespValue::integer(len as i64))
}

fn zrange(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let start = parse_int(&args[1])?;
    let stop = parse_int(&args[2])?;
    let with_scores = match &args[3..] {
        [] => false,
        [flag] if is_keyword(flag, "WITHSCORES") => true,
        _ => return Err(CommandError::Syntax),
    };

    let Some(zset) = read_zset(db, &args[0])? else {
        return Ok(RespValue::array(Vec::new()));
    };
    let Some((from, to)) = normalize_range(start, stop, zset.len()) else {
        return Ok(RespValue::array(Vec::new()));
    };

    let mut items = Vec::new();
    for (member, score) in zset.range(from, to) {
        items.push(member);
        if with_scores {
            items.push(format_score(score));
        }
    }
    Ok(RespValue::bulk_array(items))
}
