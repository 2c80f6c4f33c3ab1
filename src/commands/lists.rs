//! List Commands
//!
//! `LPUSH`, `RPUSH`, `LPOP`, `RPOP`, `LLEN`, `LRANGE` and `LINDEX`. A list
//! whose last element is popped is removed from the keyspace.

use super::args::{normalize_range, parse_int};
use super::registry::{read_first, write_first, CommandRegistry, CommandResult};
use super::CommandError;
use crate::protocol::RespValue;
use crate::storage::{LockedDb, Value};
use bytes::Bytes;
use std::collections::VecDeque;

pub(crate) fn register(registry: &mut CommandRegistry) {
    registry
        .register("lpush", -3, write_first, lpush)
        .register("rpush", -3, write_first, rpush)
        .register("lpop", 2, write_first, lpop)
        .register("rpop", 2, write_first, rpop)
        .register("llen", 2, read_first, llen)
        .register("lrange", 4, read_first, lrange)
        .register("lindex", 3, read_first, lindex);
}

fn read_list<'d>(db: &'d mut LockedDb<'_>, key: &[u8]) -> Result<Option<&'d VecDeque<Bytes>>, CommandError> {
    match db.get(key)? {
        None => Ok(None),
        Some(Value::List(list)) => Ok(Some(list)),
        Some(_) => Err(CommandError::WrongType),
    }
}

fn write_list<'d>(
    db: &'d mut LockedDb<'_>,
    key: &Bytes,
    create: bool,
) -> Result<Option<&'d mut VecDeque<Bytes>>, CommandError> {
    if create && !db.exists(key)? {
        db.set(key.clone(), Value::List(VecDeque::new()))?;
    }
    match db.get_mut(key)? {
        None => Ok(None),
        Some(Value::List(list)) => Ok(Some(list)),
        Some(_) => Err(CommandError::WrongType),
    }
}

#[derive(Clone, Copy)]
enum End {
    Left,
    Right,
}

fn push(db: &mut LockedDb<'_>, args: &[Bytes], end: End) -> CommandResult {
    let Some(list) = write_list(db, &args[0], true)? else {
        return Err(CommandError::NoSuchKey);
    };
    for item in &args[1..] {
        match end {
            End::Left => list.push_front(item.clone()),
            End::Right => list.push_back(item.clone()),
        }
    }
    Ok(RespValue::integer(list.len() as i64))
}

fn pop(db: &mut LockedDb<'_>, args: &[Bytes], end: End) -> CommandResult {
    let key = &args[0];
    let popped = match write_list(db, key, false)? {
        None => None,
        Some(list) => match end {
            End::Left => list.pop_front(),
            End::Right => list.pop_back(),
        },
    };
    db.remove_if_empty(key)?;
    Ok(RespValue::optional(popped))
}

fn lpush(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    push(db, args, End::Left)
}

fn rpush(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    push(db, args, End::Right)
}

fn lpop(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    pop(db, args, End::Left)
}

fn rpop(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    pop(db, args, End::Right)
}

fn llen(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let len = read_list(db, &args[0])?.map_or(0, VecDeque::len);
    Ok(RespValue::integer(len as i64))
}

fn lrange(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let start = parse_int(&args[1])?;
    let stop = parse_int(&args[2])?;
    let Some(list) = read_list(db, &args[0])? else {
        return Ok(RespValue::array(Vec::new()));
    };
    let items: Vec<Bytes> = match normalize_range(start, stop, list.len()) {
        Some((from, to)) => list.range(from..=to).cloned().collect(),
        None => Vec::new(),
    };
    Ok(RespValue::bulk_array(items))
}

fn lindex(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let index = parse_int(&args[1])?;
    let Some(list) = read_list(db, &args[0])? else {
        return Ok(RespValue::null());
    };
    let len = list.len() as i64;
    let index = if index < 0 { len + index } else { index };
    if index < 0 || index >= len {
        return Ok(RespValue::null());
    }
    Ok(RespValue::optional(list.get(index as usize).cloned()))
}

#[cfg(test)]
mod tests {
    use crate::commands::testing::{bulk, TestClient};
    use crate::protocol::RespValue;

    #[tokio::test]
    async fn test_push_and_range() {
        let mut client = TestClient::new();

        assert_eq!(client.run(&["RPUSH", "l", "a", "b"]), RespValue::integer(2));
        assert_eq!(client.run(&["LPUSH", "l", "x", "y"]), RespValue::integer(4));
        assert_eq!(
            client.run(&["LRANGE", "l", "0", "-1"]),
            RespValue::array(vec![bulk("y"), bulk("x"), bulk("a"), bulk("b")])
        );
        assert_eq!(
            client.run(&["LRANGE", "l", "-2", "10"]),
            RespValue::array(vec![bulk("a"), bulk("b")])
        );
        assert_eq!(client.run(&["LRANGE", "l", "3", "1"]), RespValue::array(vec![]));
        assert_eq!(client.run(&["LRANGE", "none", "0", "-1"]), RespValue::array(vec![]));
        assert_eq!(client.run(&["LLEN", "l"]), RespValue::integer(4));
        assert_eq!(client.run(&["LLEN", "none"]), RespValue::integer(0));
    }

    #[tokio::test]
    async fn test_pop_removes_empty_list() {
        let mut client = TestClient::new();

        client.run(&["RPUSH", "l", "a", "b"]);
        assert_eq!(client.run(&["LPOP", "l"]), bulk("a"));
        assert_eq!(client.run(&["RPOP", "l"]), bulk("b"));
        assert_eq!(client.run(&["EXISTS", "l"]), RespValue::integer(0));
        assert_eq!(client.run(&["LPOP", "l"]), RespValue::null());
    }

    #[tokio::test]
    async fn test_lindex() {
        let mut client = TestClient::new();

        client.run(&["RPUSH", "l", "a", "b", "c"]);
        assert_eq!(client.run(&["LINDEX", "l", "0"]), bulk("a"));
        assert_eq!(client.run(&["LINDEX", "l", "-1"]), bulk("c"));
        assert_eq!(client.run(&["LINDEX", "l", "3"]), RespValue::null());
        assert_eq!(client.run(&["LINDEX", "l", "-4"]), RespValue::null());
        assert!(client.run(&["LINDEX", "l", "one"]).is_error());
    }

    #[tokio::test]
    async fn test_list_wrong_type() {
        let mut client = TestClient::new();

        client.run(&["SET", "s", "v"]);
        assert!(client.run(&["LPUSH", "s", "a"]).is_error());
        assert!(client.run(&["LRANGE", "s", "0", "-1"]).is_error());
        assert_eq!(client.run(&["GET", "s"]), bulk("v"));
    }
}
