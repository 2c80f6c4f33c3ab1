//! Command Registry
//!
//! The registry maps a lowercase command name to a [`CommandSpec`]: its
//! arity, a function that extracts the keys it reads and writes, and the
//! function that runs it. The engine receives a registry value at
//! construction; nothing registers itself globally.
//!
//! ## Arity
//!
//! Arity counts the command name itself. A positive arity `N` means exactly
//! `N` tokens, a negative arity `-N` means at least `N` tokens.
//!
//! This is the Redis reading of a negative arity. A stricter engine could
//! require exactly `N` tokens for both signs, but then variadic commands
//! (`DEL`, `MSET`, `SADD`, ...) would need one registration per argument
//! count, so the lower bound is kept.
//!
//! ```text
//!   GET key            arity  2   (exactly 2)
//!   DEL key [key ...]  arity -2   (2 or more)
//! ```

use super::CommandError;
use crate::protocol::RespValue;
use crate::storage::{KeySpec, LockMode, LockedDb};
use bytes::Bytes;
use std::collections::HashMap;

pub type CommandResult = Result<RespValue, CommandError>;

/// Runs a command inside an already held lock scope. Receives the
/// arguments after the command name.
pub type ExecFn = fn(&mut LockedDb<'_>, &[Bytes]) -> CommandResult;

/// Declares the keys a command reads and writes. Receives the arguments
/// after the command name.
pub type KeysFn = fn(&[Bytes]) -> KeySpec;

#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    pub arity: i32,
    pub keys: KeysFn,
    pub exec: ExecFn,
}

impl CommandSpec {
    /// Checks a token count (command name included) against the arity.
    pub fn accepts(&self, argc: usize) -> bool {
        validate_arity(self.arity, argc)
    }
}

/// Exactly `arity` tokens when positive, at least `-arity` when negative.
pub fn validate_arity(arity: i32, argc: usize) -> bool {
    let argc = argc as i64;
    let arity = i64::from(arity);
    if arity >= 0 {
        argc == arity
    } else {
        argc >= -arity
    }
}

/// Name → spec table.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    commands: HashMap<String, CommandSpec>,
}

impl CommandRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding every data command this crate implements.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        super::strings::register(&mut registry);
        super::keys::register(&mut registry);
        super::lists::register(&mut registry);
        super::hashes::register(&mut registry);
        super::sets::register(&mut registry);
        super::zsets::register(&mut registry);
        registry
    }

    /// Adds or replaces a command. Names are matched case-insensitively.
    pub fn register(
        &mut self,
        name: &'static str,
        arity: i32,
        keys: KeysFn,
        exec: ExecFn,
    ) -> &mut Self {
        let spec = CommandSpec {
            name,
            arity,
            keys,
            exec,
        };
        self.commands.insert(name.to_ascii_lowercase(), spec);
        self
    }

    pub fn lookup(&self, name: &[u8]) -> Option<&CommandSpec> {
        let name = std::str::from_utf8(name).ok()?;
        self.commands.get(&name.to_ascii_lowercase())
    }

    /// Looks up the command named by `args[0]` and checks its arity.
    pub fn resolve(&self, args: &[Bytes]) -> Result<&CommandSpec, CommandError> {
        let name = args
            .first()
            .ok_or_else(|| CommandError::UnknownCommand(String::new()))?;
        let spec = self.lookup(name).ok_or_else(|| {
            CommandError::UnknownCommand(String::from_utf8_lossy(name).into_owned())
        })?;
        if !spec.accepts(args.len()) {
            return Err(CommandError::wrong_arity(name));
        }
        Ok(spec)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Registered command names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

// Key extraction helpers used by the command tables.

pub fn no_keys(_: &[Bytes]) -> KeySpec {
    KeySpec::default()
}

pub fn read_first(args: &[Bytes]) -> KeySpec {
    KeySpec {
        read: args.iter().take(1).cloned().collect(),
        ..Default::default()
    }
}

pub fn write_first(args: &[Bytes]) -> KeySpec {
    KeySpec {
        write: args.iter().take(1).cloned().collect(),
        ..Default::default()
    }
}

pub fn read_all(args: &[Bytes]) -> KeySpec {
    KeySpec {
        read: args.to_vec(),
        ..Default::default()
    }
}

pub fn write_all(args: &[Bytes]) -> KeySpec {
    KeySpec {
        write: args.to_vec(),
        ..Default::default()
    }
}

pub fn write_first_two(args: &[Bytes]) -> KeySpec {
    KeySpec {
        write: args.iter().take(2).cloned().collect(),
        ..Default::default()
    }
}

/// Keys at even positions of a `key value [key value ...]` list.
pub fn write_pairs(args: &[Bytes]) -> KeySpec {
    KeySpec {
        write: args.iter().step_by(2).cloned().collect(),
        ..Default::default()
    }
}

pub fn keyspace_read(_: &[Bytes]) -> KeySpec {
    KeySpec {
        keyspace: Some(LockMode::Shared),
        ..Default::default()
    }
}

pub fn keyspace_write(_: &[Bytes]) -> KeySpec {
    KeySpec {
        keyspace: Some(LockMode::Exclusive),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<Bytes> {
        items.iter().map(|s| Bytes::from(s.to_string())).collect()
    }

    fn noop(_: &mut LockedDb<'_>, _: &[Bytes]) -> CommandResult {
        Ok(RespValue::ok())
    }

    #[test]
    fn test_positive_arity_is_exact() {
        assert!(validate_arity(2, 2));
        assert!(!validate_arity(2, 1));
        assert!(!validate_arity(2, 3));
    }

    #[test]
    fn test_negative_arity_is_minimum() {
        assert!(!validate_arity(-2, 1));
        assert!(validate_arity(-2, 2));
        assert!(validate_arity(-2, 10));
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut registry = CommandRegistry::new();
        registry.register("get", 2, read_first, noop);

        assert!(registry.lookup(b"GET").is_some());
        assert!(registry.lookup(b"gEt").is_some());
        assert!(registry.lookup(b"set").is_none());
        assert!(registry.lookup(b"\xff").is_none());
    }

    #[test]
    fn test_resolve_errors() {
        let mut registry = CommandRegistry::new();
        registry.register("get", 2, read_first, noop);

        assert!(registry.resolve(&args(&["GET", "k"])).is_ok());
        assert_eq!(
            registry.resolve(&args(&["GET"])).unwrap_err(),
            CommandError::WrongArity("get".into())
        );
        assert_eq!(
            registry.resolve(&args(&["NOPE"])).unwrap_err(),
            CommandError::UnknownCommand("NOPE".into())
        );
    }

    #[test]
    fn test_key_extraction() {
        let a = args(&["k1", "v1", "k2", "v2"]);
        assert_eq!(write_pairs(&a).write, args(&["k1", "k2"]));
        assert_eq!(read_first(&a).read, args(&["k1"]));
        assert_eq!(write_first_two(&a).write, args(&["k1", "v1"]));
        assert!(read_all(&a).write.is_empty());
        assert_eq!(keyspace_write(&a).keyspace, Some(LockMode::Exclusive));
        assert_eq!(no_keys(&a), KeySpec::default());
    }

    #[test]
    fn test_builtins_are_registered() {
        let registry = CommandRegistry::with_builtins();
        for name in ["get", "set", "del", "expire", "lpush", "hset", "sadd", "zadd", "keys"] {
            assert!(registry.lookup(name.as_bytes()).is_some(), "{} missing", name);
        }
        // Connection commands are handled by the engine, not the registry
        assert!(registry.lookup(b"multi").is_none());
    }
}
