//! # QuartzKV - An In-Memory, Redis-Compatible Key-Value Engine
//!
//! QuartzKV serves a Redis-compatible command set over RESP. Its core is
//! the concurrency machinery underneath the commands:
//!
//! - **Sharded store**: keys spread over a power-of-two number of
//!   independently locked shards
//! - **Lock coordinator**: every command locks exactly the shards of the keys
//!   it declares, always in ascending shard order, so multi-key commands
//!   never deadlock
//! - **Expiration wheel**: one timing wheel per engine schedules key expiry;
//!   reads also expire keys lazily
//! - **Version tracker**: per-key counters behind `WATCH`/`MULTI`/`EXEC`
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                               QuartzKV                               │
//! │                                                                      │
//! │  ┌─────────────┐   ┌──────────────┐   ┌────────────────────────────┐ │
//! │  │ TCP Server  │──>│ Connection   │──>│ Engine                     │ │
//! │  │ (main.rs)   │   │ FrameDecoder │   │  connection commands       │ │
//! │  └─────────────┘   │ Session      │   │  CommandRegistry/dispatch  │ │
//! │                    └──────────────┘   └─────────────┬──────────────┘ │
//! │                                                     │ LockSet        │
//! │                                                     ▼                │
//! │   ┌───────────────────────────────────────────────────────────────┐  │
//! │   │ Database 0..N                                                 │  │
//! │   │  data: ShardedStore<Value>   ttl: ShardedStore<SystemTime>    │  │
//! │   │  versions: VersionTracker                                     │  │
//! │   └───────────────────────────────────▲───────────────────────────┘  │
//! │                                       │ expire callbacks             │
//! │                           ┌───────────┴───────────┐                  │
//! │                           │ ExpirationWheel actor │                  │
//! │                           └───────────────────────┘                  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use quartzkv::connection::{handle_connection, ConnectionStats};
//! use quartzkv::engine::{Engine, EngineConfig};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = Arc::new(Engine::new(EngineConfig::default()));
//!     let stats = Arc::new(ConnectionStats::new());
//!     let listener = TcpListener::bind("127.0.0.1:6379").await?;
//!
//!     loop {
//!         let (stream, addr) = listener.accept().await?;
//!         tokio::spawn(handle_connection(stream, addr, Arc::clone(&engine), Arc::clone(&stats)));
//!     }
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP frame decoder and reply types
//! - [`storage`]: shards, locks, the expiration wheel, versions, databases
//! - [`commands`]: the command registry, dispatch and every data command
//! - [`engine`]: databases plus connection-level commands and transactions
//! - [`connection`]: client sessions and the per-connection task
//! - [`config`]: server configuration file

pub mod commands;
pub mod config;
pub mod connection;
pub mod engine;
pub mod protocol;
pub mod storage;

pub use commands::{CommandError, CommandRegistry};
pub use config::{ConfigError, ServerConfig};
pub use connection::{handle_connection, Connection, ConnectionStats, Session};
pub use engine::{Engine, EngineConfig};
pub use protocol::{FrameDecoder, ParseError, RespValue};
pub use storage::{Database, ExpirationWheel, LockSet, ShardedStore, Value, VersionTracker};

/// The default port QuartzKV listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host QuartzKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of QuartzKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
