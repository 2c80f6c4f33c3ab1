//! Client connections.
//!
//! - [`session`]: per-client state (selected database, authentication,
//!   transaction queue, watch set, subscriptions) behind the [`Connection`]
//!   trait the engine works against.
//! - [`handler`]: the tokio task that decodes frames from a socket, runs
//!   them through the engine and writes the replies back.
//!
//! ```ignore
//! use quartzkv::connection::{handle_connection, ConnectionStats};
//! use quartzkv::engine::{Engine, EngineConfig};
//! use std::sync::Arc;
//!
//! let engine = Arc::new(Engine::new(EngineConfig::default()));
//! let stats = Arc::new(ConnectionStats::new());
//!
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(stream, addr, Arc::clone(&engine), Arc::clone(&stats)));
//! ```

pub mod handler;
pub mod session;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
pub use session::{Connection, Session};
