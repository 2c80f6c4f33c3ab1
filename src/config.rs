//! Server Configuration
//!
//! Settings come from three layers, later ones winning:
//!
//! 1. built-in defaults ([`ServerConfig::default`])
//! 2. a redis.conf-style file: one `key value` pair per line, `#` comments
//! 3. command-line flags, applied by the binary
//!
//! ```text
//! # quartzkv.conf
//! bind 0.0.0.0
//! port 6380
//! databases 4
//! requirepass hunter2
//! wheel-interval-ms 100
//! ```
//!
//! Unknown keys are logged and ignored so a config written for a newer
//! version still loads.

use crate::engine::{EngineConfig, DEFAULT_DATABASES, DEFAULT_SHARDS};
use crate::storage::WheelConfig;
use crate::{DEFAULT_HOST, DEFAULT_PORT};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("line {line}: expected `key value`")]
    MissingValue { line: usize },

    #[error("line {line}: invalid value '{value}' for '{key}'")]
    InvalidValue {
        line: usize,
        key: String,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub databases: usize,
    pub requirepass: Option<String>,
    /// Shard hint for each database's stores.
    pub shards: usize,
    pub wheel_interval_ms: u64,
    pub wheel_slots: usize,
    /// Default tracing filter, overridden by `RUST_LOG`.
    pub loglevel: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let wheel = WheelConfig::default();
        Self {
            bind: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            databases: DEFAULT_DATABASES,
            requirepass: None,
            shards: DEFAULT_SHARDS,
            wheel_interval_ms: wheel.interval.as_millis() as u64,
            wheel_slots: wheel.slots,
            loglevel: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Parses config file contents on top of the defaults.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let (key, value) = trimmed
                .split_once(char::is_whitespace)
                .map(|(k, v)| (k, unquote(v.trim())))
                .ok_or(ConfigError::MissingValue { line })?;

            match key.to_ascii_lowercase().as_str() {
                "bind" => config.bind = value.to_string(),
                "port" => config.port = parse_value(line, key, value)?,
                "databases" => config.databases = parse_value(line, key, value)?,
                "requirepass" => {
                    config.requirepass = (!value.is_empty()).then(|| value.to_string())
                }
                "shards" => config.shards = parse_value(line, key, value)?,
                "wheel-interval-ms" => config.wheel_interval_ms = parse_value(line, key, value)?,
                "wheel-slots" => config.wheel_slots = parse_value(line, key, value)?,
                "loglevel" => config.loglevel = value.to_string(),
                other => warn!(line, key = other, "Unknown config key ignored"),
            }
        }

        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Loads `path` if given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            databases: self.databases,
            shards: self.shards,
            wheel: WheelConfig {
                interval: Duration::from_millis(self.wheel_interval_ms),
                slots: self.wheel_slots,
            },
            requirepass: self.requirepass.clone().map(Bytes::from),
        }
    }
}

fn parse_value<T: FromStr>(line: usize, key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        line,
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}
