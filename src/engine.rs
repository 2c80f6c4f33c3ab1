//! Engine
//!
//! The engine owns the numbered databases, the expiration wheel they share
//! and the command registry. Clients talk to it through [`Engine::exec`],
//! passing their own session state as a [`Connection`].
//!
//! ## Command Flow
//!
//! ```text
//!   exec(conn, tokens)
//!     │
//!     ├── PING / AUTH / QUIT            answered directly
//!     ├── not authenticated             NOAUTH
//!     ├── SELECT / SUBSCRIBE / ...      session bookkeeping
//!     ├── MULTI / EXEC / DISCARD
//!     │   WATCH / UNWATCH               transaction control
//!     ├── inside MULTI                  validate, queue, +QUEUED
//!     └── everything else               dispatch::execute on the selected db
//! ```
//!
//! ## Transactions
//!
//! `WATCH` records each key's version, and the database it lives in, under a
//! shared lock. `EXEC` takes one lock scope covering the watched keys and
//! every key of every queued command, compares versions, and either aborts
//! with a null array or runs the queue inside that scope. No other client can
//! interleave.
//!
//! Keys watched before a `SELECT` are checked in their own database. When an
//! `EXEC` spans several databases it locks them in ascending index order,
//! each one in ascending shard order, so two transactions never wait on each
//! other.

use crate::commands::args::parse_index;
use crate::commands::{dispatch, CommandError, CommandRegistry, CommandResult};
use crate::connection::Connection;
use crate::protocol::RespValue;
use crate::storage::{Database, ExpirationWheel, LockSet, LockedDb, Value, WheelConfig};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info};

/// Default number of databases.
pub const DEFAULT_DATABASES: usize = 16;

/// Default shard hint for each database's stores.
pub const DEFAULT_SHARDS: usize = 1024;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub databases: usize,
    pub shards: usize,
    pub wheel: WheelConfig,
    /// Clients must AUTH with this password before running commands.
    pub requirepass: Option<Bytes>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            databases: DEFAULT_DATABASES,
            shards: DEFAULT_SHARDS,
            wheel: WheelConfig::default(),
            requirepass: None,
        }
    }
}

/// The keyspace engine. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct Engine {
    databases: Vec<Arc<Database>>,
    registry: Arc<CommandRegistry>,
    wheel: ExpirationWheel,
    requirepass: Option<Bytes>,
}

impl Engine {
    /// Creates an engine with every builtin command registered.
    ///
    /// Must be called inside a tokio runtime: it starts the expiration wheel.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_registry(config, CommandRegistry::with_builtins())
    }

    pub fn with_registry(config: EngineConfig, registry: CommandRegistry) -> Self {
        let wheel = ExpirationWheel::start(config.wheel.clone());
        let count = config.databases.max(1);
        let databases = (0..count)
            .map(|index| Database::new(index, config.shards, wheel.clone()))
            .collect();

        info!(
            databases = count,
            shards = config.shards,
            commands = registry.len(),
            "Engine started"
        );

        Self {
            databases,
            registry: Arc::new(registry),
            wheel,
            requirepass: config.requirepass,
        }
    }

    pub fn database(&self, index: usize) -> Result<&Arc<Database>, CommandError> {
        self.databases.get(index).ok_or(CommandError::InvalidDbIndex)
    }

    pub fn database_count(&self) -> usize {
        self.databases.len()
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Runs one command for a client and returns the reply.
    pub fn exec(&self, conn: &mut dyn Connection, args: &[Bytes]) -> RespValue {
        self.try_exec(conn, args)
            .unwrap_or_else(|err| err.into_reply())
    }

    /// Locks the shards of `read` and `write` in database `db`.
    ///
    /// The returned scope can run any number of commands through
    /// [`Engine::exec_with_lock`] as long as they only touch those keys.
    pub fn lock_keys(&self, db: usize, read: &[Bytes], write: &[Bytes]) -> Result<LockedDb<'_>, CommandError> {
        Ok(self.database(db)?.lock(read, write))
    }

    /// Runs a command inside a held lock scope without taking any lock.
    pub fn exec_with_lock(&self, locked: &mut LockedDb<'_>, args: &[Bytes]) -> RespValue {
        dispatch::exec_with_lock(&self.registry, locked, args)
    }

    /// Visits the live keys of database `db`. Returning `false` stops the walk.
    pub fn for_each(
        &self,
        db: usize,
        visitor: impl FnMut(&Bytes, &Value, Option<SystemTime>) -> bool,
    ) -> Result<(), CommandError> {
        self.database(db)?.for_each(visitor);
        Ok(())
    }

    /// Stops the expiration wheel. Keys with a deadline still expire lazily.
    pub fn close(&self) {
        self.wheel.stop();
        info!("Engine closed");
    }

    fn try_exec(&self, conn: &mut dyn Connection, args: &[Bytes]) -> CommandResult {
        let Some(first) = args.first() else {
            return Err(CommandError::UnknownCommand(String::new()));
        };
        let name = first.to_ascii_lowercase();

        match name.as_slice() {
            b"ping" => return ping(args),
            b"auth" => return self.auth(conn, args),
            b"quit" => return Ok(RespValue::ok()),
            _ => {}
        }

        if !self.authenticated(conn) {
            return Err(CommandError::AuthRequired);
        }

        match name.as_slice() {
            b"select" => self.select(conn, args),
            b"subscribe" => subscribe(conn, args),
            b"unsubscribe" => Ok(unsubscribe(conn, args)),
            b"multi" => multi(conn, args),
            b"discard" => discard(conn, args),
            b"exec" => self.exec_transaction(conn, args),
            b"watch" => self.watch(conn, args),
            b"unwatch" => unwatch(conn, args),
            _ if conn.in_transaction() => self.enqueue(conn, args),
            _ => {
                let db = self.database(conn.db_index())?;
                Ok(dispatch::execute(&self.registry, db, args))
            }
        }
    }

    fn authenticated(&self, conn: &dyn Connection) -> bool {
        match &self.requirepass {
            None => true,
            Some(required) => conn.password() == Some(&required[..]),
        }
    }

    fn auth(&self, conn: &mut dyn Connection, args: &[Bytes]) -> CommandResult {
        if args.len() != 2 {
            return Err(CommandError::wrong_arity(&args[0]));
        }
        let Some(required) = &self.requirepass else {
            return Err(CommandError::NoPasswordSet);
        };
        if args[1] != *required {
            return Err(CommandError::AuthFailed);
        }
        conn.set_password(args[1].clone());
        Ok(RespValue::ok())
    }

    fn select(&self, conn: &mut dyn Connection, args: &[Bytes]) -> CommandResult {
        if args.len() != 2 {
            return Err(CommandError::wrong_arity(&args[0]));
        }
        if conn.in_transaction() {
            conn.flag_tx_error();
            return Err(CommandError::NotAllowedInMulti("SELECT".into()));
        }
        let index = parse_index(&args[1])?;
        self.database(index)?;
        conn.set_db_index(index);
        Ok(RespValue::ok())
    }

    /// Validates and queues a command inside MULTI.
    fn enqueue(&self, conn: &mut dyn Connection, args: &[Bytes]) -> CommandResult {
        if let Err(err) = self.registry.resolve(args) {
            conn.flag_tx_error();
            return Err(err);
        }
        conn.enqueue(args.to_vec());
        Ok(RespValue::queued())
    }

    fn watch(&self, conn: &mut dyn Connection, args: &[Bytes]) -> CommandResult {
        if args.len() < 2 {
            return Err(CommandError::wrong_arity(&args[0]));
        }
        if conn.in_transaction() {
            return Err(CommandError::WatchInsideMulti);
        }

        let db = self.database(conn.db_index())?;
        let keys = &args[1..];
        let _locked = db.lock(keys, &[]);
        for key in keys {
            conn.watch(db.index(), key.clone(), db.versions().get_version(key));
        }
        Ok(RespValue::ok())
    }

    fn exec_transaction(&self, conn: &mut dyn Connection, args: &[Bytes]) -> CommandResult {
        if args.len() != 1 {
            return Err(CommandError::wrong_arity(&args[0]));
        }
        if !conn.in_transaction() {
            return Err(CommandError::ExecWithoutMulti);
        }
        if conn.has_tx_error() {
            conn.set_transaction(false);
            return Err(CommandError::ExecAbort);
        }

        let queued = conn.take_queued();
        let watched: Vec<(usize, Bytes, u64)> = conn
            .watched()
            .iter()
            .map(|((index, key), version)| (*index, key.clone(), *version))
            .collect();
        let current = conn.db_index();
        conn.set_transaction(false);

        // One plan per database involved, keyed so they lock in index order
        let mut plans: BTreeMap<usize, LockSet> = BTreeMap::new();
        let db = self.database(current)?;
        let plan = plans.entry(current).or_default();
        for command in &queued {
            let spec = self.registry.resolve(command)?;
            plan.merge(&db.plan(&(spec.keys)(&command[1..])));
        }
        for (index, key, _) in &watched {
            let watched_db = self.database(*index)?;
            let key_plan = LockSet::new(watched_db.data(), std::slice::from_ref(key), &[]);
            plans.entry(*index).or_default().merge(&key_plan);
        }

        let mut scopes = Vec::with_capacity(plans.len());
        for (index, plan) in &plans {
            scopes.push(self.database(*index)?.lock_with(plan));
        }

        for (index, key, version) in &watched {
            if self.database(*index)?.versions().get_version(key) != *version {
                debug!(
                    db = *index,
                    key = %key.escape_ascii(),
                    "Watched key changed, transaction aborted"
                );
                return Err(CommandError::TransactionAborted);
            }
        }

        let locked = &mut scopes[plans.range(..current).count()];
        let replies = queued
            .iter()
            .map(|command| dispatch::exec_with_lock(&self.registry, &mut *locked, command))
            .collect();
        Ok(RespValue::array(replies))
    }
}

fn ping(args: &[Bytes]) -> CommandResult {
    match args {
        [_] => Ok(RespValue::pong()),
        [_, message] => Ok(RespValue::bulk_string(message.clone())),
        _ => Err(CommandError::wrong_arity(&args[0])),
    }
}

fn multi(conn: &mut dyn Connection, args: &[Bytes]) -> CommandResult {
    if args.len() != 1 {
        return Err(CommandError::wrong_arity(&args[0]));
    }
    if conn.in_transaction() {
        return Err(CommandError::NestedMulti);
    }
    conn.set_transaction(true);
    Ok(RespValue::ok())
}

fn discard(conn: &mut dyn Connection, args: &[Bytes]) -> CommandResult {
    if args.len() != 1 {
        return Err(CommandError::wrong_arity(&args[0]));
    }
    if !conn.in_transaction() {
        return Err(CommandError::DiscardWithoutMulti);
    }
    conn.set_transaction(false);
    Ok(RespValue::ok())
}

fn unwatch(conn: &mut dyn Connection, args: &[Bytes]) -> CommandResult {
    if args.len() != 1 {
        return Err(CommandError::wrong_arity(&args[0]));
    }
    conn.clear_watched();
    Ok(RespValue::ok())
}

fn subscription_reply(kind: &'static str, channel: Option<Bytes>, count: usize) -> RespValue {
    RespValue::array(vec![
        RespValue::bulk_string(kind),
        RespValue::optional(channel),
        RespValue::integer(count as i64),
    ])
}

/// Records channel membership. One reply per channel, sent back to back.
fn subscribe(conn: &mut dyn Connection, args: &[Bytes]) -> CommandResult {
    if args.len() < 2 {
        return Err(CommandError::wrong_arity(&args[0]));
    }
    let replies = args[1..]
        .iter()
        .map(|channel| {
            conn.subscribe(channel.clone());
            subscription_reply("subscribe", Some(channel.clone()), conn.subscription_count())
        })
        .collect();
    Ok(RespValue::Pipeline(replies))
}

/// Without arguments, leaves every channel.
fn unsubscribe(conn: &mut dyn Connection, args: &[Bytes]) -> RespValue {
    let channels = match &args[1..] {
        [] => conn.channels(),
        named => named.to_vec(),
    };
    if channels.is_empty() {
        return subscription_reply("unsubscribe", None, 0);
    }
    let replies = channels
        .into_iter()
        .map(|channel| {
            conn.unsubscribe(&channel);
            subscription_reply("unsubscribe", Some(channel), conn.subscription_count())
        })
        .collect();
    RespValue::Pipeline(replies)
}
