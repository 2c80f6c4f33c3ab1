//! Per-client session state.
//!
//! The engine never owns client state. It reads and updates it through the
//! [`Connection`] trait, which [`Session`] implements for TCP clients and
//! tests.

use bytes::Bytes;
use std::collections::{BTreeSet, HashMap};

/// What the engine needs to know about, and change on, a client.
pub trait Connection: Send {
    fn db_index(&self) -> usize;
    fn set_db_index(&mut self, index: usize);

    /// The password the client authenticated with, if any.
    fn password(&self) -> Option<&[u8]>;
    fn set_password(&mut self, password: Bytes);

    fn in_transaction(&self) -> bool;
    /// Opens or closes a transaction. Closing drops the queue, the watch set
    /// and the error flag.
    fn set_transaction(&mut self, open: bool);

    fn enqueue(&mut self, args: Vec<Bytes>);
    fn queued(&self) -> &[Vec<Bytes>];
    fn take_queued(&mut self) -> Vec<Vec<Bytes>>;

    /// Marks the open transaction as failed at queue time.
    fn flag_tx_error(&mut self);
    fn has_tx_error(&self) -> bool;

    /// Watched `(database, key)` pairs and the version each had when it was
    /// watched. A key stays bound to the database it was watched in, even
    /// after a SELECT.
    fn watched(&self) -> &HashMap<(usize, Bytes), u64>;
    fn watch(&mut self, db: usize, key: Bytes, version: u64);
    fn clear_watched(&mut self);

    /// Returns `true` if the channel was not already subscribed.
    fn subscribe(&mut self, channel: Bytes) -> bool;
    fn unsubscribe(&mut self, channel: &[u8]) -> bool;
    fn channels(&self) -> Vec<Bytes>;
    fn subscription_count(&self) -> usize;
}

/// Session state of one client.
#[derive(Debug, Default)]
pub struct Session {
    db_index: usize,
    password: Option<Bytes>,
    in_transaction: bool,
    queue: Vec<Vec<Bytes>>,
    tx_error: bool,
    watched: HashMap<(usize, Bytes), u64>,
    channels: BTreeSet<Bytes>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Connection for Session {
    fn db_index(&self) -> usize {
        self.db_index
    }

    fn set_db_index(&mut self, index: usize) {
        self.db_index = index;
    }

    fn password(&self) -> Option<&[u8]> {
        self.password.as_deref()
    }

    fn set_password(&mut self, password: Bytes) {
        self.password = Some(password);
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn set_transaction(&mut self, open: bool) {
        self.in_transaction = open;
        if !open {
            self.queue.clear();
            self.watched.clear();
            self.tx_error = false;
        }
    }

    fn enqueue(&mut self, args: Vec<Bytes>) {
        self.queue.push(args);
    }

    fn queued(&self) -> &[Vec<Bytes>] {
        &self.queue
    }

    fn take_queued(&mut self) -> Vec<Vec<Bytes>> {
        std::mem::take(&mut self.queue)
    }

    fn flag_tx_error(&mut self) {
        self.tx_error = true;
    }

    fn has_tx_error(&self) -> bool {
        self.tx_error
    }

    fn watched(&self) -> &HashMap<(usize, Bytes), u64> {
        &self.watched
    }

    fn watch(&mut self, db: usize, key: Bytes, version: u64) {
        // The first WATCH of a key wins; a later one must not hide a change
        self.watched.entry((db, key)).or_insert(version);
    }

    fn clear_watched(&mut self) {
        self.watched.clear();
    }

    fn subscribe(&mut self, channel: Bytes) -> bool {
        self.channels.insert(channel)
    }

    fn unsubscribe(&mut self, channel: &[u8]) -> bool {
        self.channels.remove(channel)
    }

    fn channels(&self) -> Vec<Bytes> {
        self.channels.iter().cloned().collect()
    }

    fn subscription_count(&self) -> usize {
        self.channels.len()
    }
}
