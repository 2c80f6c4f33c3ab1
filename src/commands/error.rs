//! Command errors and their wire representation.

use crate::protocol::RespValue;
use crate::storage::LockError;
use thiserror::Error;

/// Everything that can go wrong while running a command.
///
/// The `Display` text is exactly what is sent to the client after the `-`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    #[error("ERR value is not a valid float")]
    NotFloat,

    #[error("ERR increment or decrement would overflow")]
    Overflow,

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR no such key")]
    NoSuchKey,

    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpire(String),

    #[error("NOAUTH Authentication required.")]
    AuthRequired,

    #[error("ERR invalid password")]
    AuthFailed,

    #[error("ERR Client sent AUTH, but no password is set")]
    NoPasswordSet,

    #[error("ERR DB index is out of range")]
    InvalidDbIndex,

    #[error("ERR MULTI calls can not be nested")]
    NestedMulti,

    #[error("ERR EXEC without MULTI")]
    ExecWithoutMulti,

    #[error("ERR DISCARD without MULTI")]
    DiscardWithoutMulti,

    #[error("ERR WATCH inside MULTI is not allowed")]
    WatchInsideMulti,

    #[error("ERR {0} is not allowed in a transaction")]
    NotAllowedInMulti(String),

    #[error("EXECABORT Transaction discarded because of previous errors.")]
    ExecAbort,

    /// A watched key changed between WATCH and EXEC.
    #[error("transaction aborted, a watched key was modified")]
    TransactionAborted,

    #[error("ERR internal error: {0}")]
    Internal(#[from] LockError),
}

impl CommandError {
    pub(crate) fn wrong_arity(name: &[u8]) -> Self {
        CommandError::WrongArity(String::from_utf8_lossy(name).to_lowercase())
    }

    /// The reply sent to the client for this error.
    pub fn into_reply(self) -> RespValue {
        match self {
            CommandError::TransactionAborted => RespValue::NullArray,
            other => RespValue::Error(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_replies() {
        assert_eq!(
            CommandError::UnknownCommand("foo".into()).into_reply(),
            RespValue::error("ERR unknown command 'foo'")
        );
        assert_eq!(
            CommandError::wrong_arity(b"GET").into_reply(),
            RespValue::error("ERR wrong number of arguments for 'get' command")
        );
        assert_eq!(CommandError::TransactionAborted.into_reply(), RespValue::NullArray);
    }

    #[test]
    fn test_lock_errors_become_internal() {
        let err: CommandError = LockError::NotHeld(3).into();
        assert!(err.into_reply().is_error());
    }
}
