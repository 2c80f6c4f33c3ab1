//! Set commands: `SADD`, `SREM`, `SISMEMBER`, `SMEMBERS`, `SCARD`.

use super::registry::{read_first, write_first, CommandRegistry, CommandResult};
use super::CommandError;
use crate::protocol::RespValue;
use crate::storage::{LockedDb, Value};
use bytes::Bytes;
use std::collections::HashSet;

pub(crate) fn register(registry: &mut CommandRegistry) {
    registry
        .register("sadd", -3, write_first, sadd)
        .register("srem", -3, write_first, srem)
        .register("sismember", 3, read_first, sismember)
        .register("smembers", 2, read_first, smembers)
        .register("scard", 2, read_first, scard);
}

fn read_set<'d>(db: &'d mut LockedDb<'_>, key: &[u8]) -> Result<Option<&'d HashSet<Bytes>>, CommandError> {
    match db.get(key)? {
        None => Ok(None),
        Some(Value::Set(set)) => Ok(Some(set)),
        Some(_) => Err(CommandError::WrongType),
    }
}

fn write_set<'d>(
    db: &'d mut LockedDb<'_>,
    key: &Bytes,
    create: bool,
) -> Result<Option<&'d mut HashSet<Bytes>>, CommandError> {
    if create && !db.exists(key)? {
        db.set(key.clone(), Value::Set(HashSet::new()))?;
    }
    match db.get_mut(key)? {
        None => Ok(None),
        Some(Value::Set(set)) => Ok(Some(set)),
        Some(_) => Err(CommandError::WrongType),
    }
}

fn sadd(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let Some(set) = write_set(db, &args[0], true)? else {
        return Err(CommandError::NoSuchKey);
    };
    let added = args[1..]
        .iter()
        .filter(|member| set.insert((*member).clone()))
        .count();
    Ok(RespValue::integer(added as i64))
}

fn srem(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let key = &args[0];
    let removed = match write_set(db, key, false)? {
        None => 0,
        Some(set) => args[1..].iter().filter(|member| set.remove(*member)).count(),
    };
    db.remove_if_empty(key)?;
    Ok(RespValue::integer(removed as i64))
}

fn sismember(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let found = read_set(db, &args[0])?.is_some_and(|set| set.contains(&args[1]));
    Ok(RespValue::integer(found as i64))
}

fn smembers(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let members: Vec<Bytes> = read_set(db, &args[0])?
        .map(|set| set.iter().cloned().collect())
        .unwrap_or_default();
    Ok(RespValue::bulk_array(members))
}

fn scard(db: &mut LockedDb<'_>, args: &[Bytes]) -> CommandResult {
    let len = read_set(db, &args[0])?.map_or(0, HashSet::len);
    Ok(RespValue::integer(len as i64))
}

#[cfg(test)]
mod tests {
    use crate::commands::testing::{bulk, TestClient};
    use crate::protocol::RespValue;

    #[tokio::test]
    async fn test_sadd_srem() {
        let mut client = TestClient::new();

        assert_eq!(client.run(&["SADD", "s", "a", "b", "a"]), RespValue::integer(2));
        assert_eq!(client.run(&["SADD", "s", "b", "c"]), RespValue::integer(1));
        assert_eq!(client.run(&["SCARD", "s"]), RespValue::integer(3));
        assert_eq!(client.run(&["SISMEMBER", "s", "c"]), RespValue::integer(1));
        assert_eq!(client.run(&["SISMEMBER", "s", "z"]), RespValue::integer(0));
        assert_eq!(client.run(&["SREM", "s", "a", "z"]), RespValue::integer(1));
        assert_eq!(client.run(&["SREM", "s", "b", "c"]), RespValue::integer(2));
        assert_eq!(client.run(&["EXISTS", "s"]), RespValue::integer(0));
        assert_eq!(client.run(&["SCARD", "s"]), RespValue::integer(0));
    }

    #[tokio::test]
    async fn test_smembers() {
        let mut client = TestClient::new();

        client.run(&["SADD", "s", "x"]);
        assert_eq!(client.run(&["SMEMBERS", "s"]), RespValue::array(vec![bulk("x")]));
        assert_eq!(client.run(&["SMEMBERS", "none"]), RespValue::array(vec![]));

        client.run(&["SET", "str", "v"]);
        assert!(client.run(&["SADD", "str", "x"]).is_error());
    }
}
