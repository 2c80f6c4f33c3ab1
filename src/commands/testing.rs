//! Test helpers: a client session bound to a fresh engine.

use crate::connection::Session;
use crate::engine::{Engine, EngineConfig};
use crate::protocol::RespValue;
use crate::storage::WheelConfig;
use bytes::Bytes;
use std::time::Duration;

pub(crate) struct TestClient {
    pub(crate) engine: Engine,
    pub(crate) session: Session,
}

impl TestClient {
    /// Needs a tokio runtime for the expiration wheel.
    pub(crate) fn new() -> Self {
        let engine = Engine::new(EngineConfig {
            databases: 2,
            shards: 16,
            wheel: WheelConfig {
                interval: Duration::from_millis(10),
                slots: 128,
            },
            requirepass: None,
        });
        Self {
            engine,
            session: Session::new(),
        }
    }

    pub(crate) fn run(&mut self, args: &[&str]) -> RespValue {
        let args: Vec<Bytes> = args.iter().map(|s| Bytes::from(s.to_string())).collect();
        self.engine.exec(&mut self.session, &args)
    }
}

pub(crate) fn bulk(s: &str) -> RespValue {
    RespValue::bulk_string(Bytes::from(s.to_string()))
}
