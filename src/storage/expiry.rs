//! Expiration Timing Wheel
//!
//! Key expiry is driven by a single rotating timing wheel instead of a
//! periodic scan of the key space.
//!
//! ## Layout
//!
//! ```text
//!              cursor
//!                │
//!    ┌───┬───┬───▼───┬───┬───┬───┐
//!    │ 0 │ 1 │   2   │ 3 │...│N-1│   one slot per tick
//!    └───┴───┴───┬───┴───┴───┴───┘
//!                │
//!            task(laps=0) ⇄ task(laps=2) ⇄ ...
//! ```
//!
//! A task due in `t` ticks goes into slot `(cursor + t) mod N` with
//! `t / N` remaining laps. Every tick scans the slot under the cursor once:
//! tasks with laps left lose one, tasks with none fire. The cursor then moves
//! on.
//!
//! Tasks live in an arena and each slot is a doubly linked list of arena
//! indices, so cancelling through the key index is O(1).
//!
//! ## Runtime
//!
//! All wheel state is owned by one tokio task. [`ExpirationWheel`] is a
//! cheap cloneable handle that talks to it over an unbounded channel.
//! Callbacks run on the blocking pool so a slow or panicking callback never
//! stalls or kills the wheel.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, trace};

/// A one-shot expiration callback.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Configuration for the expiration wheel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WheelConfig {
    /// Time covered by one slot (default: 1s)
    pub interval: Duration,

    /// Number of slots in the ring (default: 3600)
    pub slots: usize,
}

impl Default for WheelConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            slots: 3600,
        }
    }
}

struct Task {
    key: String,
    slot: usize,
    laps: u64,
    callback: Callback,
    prev: Option<usize>,
    next: Option<usize>,
}

/// The wheel itself, without any runtime attached.
///
/// Time only moves when [`TimingWheel::tick`] is called, which makes the
/// scheduling arithmetic testable without sleeping.
pub struct TimingWheel {
    interval: Duration,
    cursor: usize,
    heads: Vec<Option<usize>>,
    tasks: Vec<Option<Task>>,
    free: Vec<usize>,
    index: HashMap<String, usize>,
}

impl std::fmt::Debug for TimingWheel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimingWheel")
            .field("interval", &self.interval)
            .field("slots", &self.heads.len())
            .field("cursor", &self.cursor)
            .field("pending", &self.len())
            .finish()
    }
}

impl TimingWheel {
    pub fn new(config: &WheelConfig) -> Self {
        let slots = config.slots.max(1);
        let interval = config.interval.max(Duration::from_millis(1));

        Self {
            interval,
            cursor: 0,
            heads: vec![None; slots],
            tasks: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of scheduled tasks.
    pub fn len(&self) -> usize {
        self.tasks.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_scheduled(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Slot and remaining laps for a task added now with `delay`.
    pub fn position(&self, delay: Duration) -> (usize, u64) {
        let slots = self.heads.len() as u128;
        let ticks = delay.as_nanos() / self.interval.as_nanos();
        let slot = (self.cursor as u128 + ticks) % slots;
        let laps = ticks / slots;
        (slot as usize, u64::try_from(laps).unwrap_or(u64::MAX))
    }

    /// Schedules `callback` to run after `delay`.
    ///
    /// A non-empty key replaces any task already scheduled under it. Empty
    /// keys are anonymous and can't be cancelled.
    pub fn add(&mut self, delay: Duration, key: String, callback: Callback) {
        if !key.is_empty() {
            self.cancel(&key);
        }

        let (slot, laps) = self.position(delay);
        let task = Task {
            key,
            slot,
            laps,
            callback,
            prev: None,
            next: self.heads[slot],
        };

        let id = match self.free.pop() {
            Some(id) => {
                self.tasks[id] = Some(task);
                id
            }
            None => {
                self.tasks.push(Some(task));
                self.tasks.len() - 1
            }
        };

        if let Some(next) = self.heads[slot] {
            if let Some(head) = self.tasks[next].as_mut() {
                head.prev = Some(id);
            }
        }
        self.heads[slot] = Some(id);

        if let Some(task) = &self.tasks[id] {
            if !task.key.is_empty() {
                self.index.insert(task.key.clone(), id);
            }
        }
    }

    /// Removes the task scheduled under `key`. Returns `false` if there was none.
    pub fn cancel(&mut self, key: &str) -> bool {
        match self.index.get(key).copied() {
            Some(id) => {
                self.remove(id);
                true
            }
            None => false,
        }
    }

    /// Processes the slot under the cursor and advances the cursor.
    ///
    /// Returns the callbacks that became due, in slot order.
    pub fn tick(&mut self) -> Vec<Callback> {
        let mut due = Vec::new();
        let mut cursor = self.heads[self.cursor];

        while let Some(id) = cursor {
            let Some(task) = self.tasks[id].as_mut() else {
                break;
            };
            cursor = task.next;

            if task.laps > 0 {
                task.laps -= 1;
                continue;
            }
            if let Some(task) = self.remove(id) {
                due.push(task.callback);
            }
        }

        self.cursor = (self.cursor + 1) % self.heads.len();
        due
    }

    fn remove(&mut self, id: usize) -> Option<Task> {
        let task = self.tasks.get_mut(id)?.take()?;

        match task.prev {
            Some(prev) => {
                if let Some(p) = self.tasks[prev].as_mut() {
                    p.next = task.next;
                }
            }
            None => self.heads[task.slot] = task.next,
        }
        if let Some(next) = task.next {
            if let Some(n) = self.tasks[next].as_mut() {
                n.prev = task.prev;
            }
        }

        if !task.key.is_empty() && self.index.get(&task.key) == Some(&id) {
            self.index.remove(&task.key);
        }
        self.free.push(id);
        Some(task)
    }
}

enum WheelCommand {
    Add {
        delay: Duration,
        key: String,
        callback: Callback,
    },
    Cancel(String),
    Stop,
}

/// Handle to a running expiration wheel.
///
/// Cloning the handle is cheap; all clones talk to the same wheel.
#[derive(Debug, Clone)]
pub struct ExpirationWheel {
    tx: mpsc::UnboundedSender<WheelCommand>,
}

impl ExpirationWheel {
    /// Starts the wheel as a background task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: WheelConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let wheel = TimingWheel::new(&config);

        info!(
            interval_ms = wheel.interval().as_millis() as u64,
            slots = config.slots,
            "Expiration wheel started"
        );
        tokio::spawn(wheel_loop(wheel, rx));

        Self { tx }
    }

    /// Schedules `callback` to run after `delay`, replacing any task with
    /// the same non-empty key.
    pub fn add(
        &self,
        delay: Duration,
        key: impl Into<String>,
        callback: impl FnOnce() + Send + 'static,
    ) {
        let command = WheelCommand::Add {
            delay,
            key: key.into(),
            callback: Box::new(callback),
        };
        if self.tx.send(command).is_err() {
            trace!("Expiration wheel is stopped, task dropped");
        }
    }

    /// Schedules `callback` for a wall-clock deadline. A deadline that has
    /// already passed is ignored.
    pub fn add_at(
        &self,
        at: SystemTime,
        key: impl Into<String>,
        callback: impl FnOnce() + Send + 'static,
    ) {
        match at.duration_since(SystemTime::now()) {
            Ok(delay) => self.add(delay, key, callback),
            Err(_) => trace!("Deadline already passed, task not scheduled"),
        }
    }

    pub fn cancel(&self, key: impl Into<String>) {
        let _ = self.tx.send(WheelCommand::Cancel(key.into()));
    }

    /// Stops the wheel. Pending tasks are dropped without running.
    pub fn stop(&self) {
        if self.tx.send(WheelCommand::Stop).is_ok() {
            info!("Expiration wheel stopping");
        }
    }
}

async fn wheel_loop(mut wheel: TimingWheel, mut rx: mpsc::UnboundedReceiver<WheelCommand>) {
    let interval = wheel.interval();
    let mut ticker = interval_at(Instant::now() + interval, interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let due = wheel.tick();
                if !due.is_empty() {
                    debug!(fired = due.len(), pending = wheel.len(), "Expiration wheel tick");
                }
                for callback in due {
                    run_callback(callback);
                }
            }
            command = rx.recv() => {
                match command {
                    Some(WheelCommand::Add { delay, key, callback }) => {
                        trace!(key = %key, delay_ms = delay.as_millis() as u64, "Task scheduled");
                        wheel.add(delay, key, callback);
                    }
                    Some(WheelCommand::Cancel(key)) => {
                        if wheel.cancel(&key) {
                            trace!(key = %key, "Task cancelled");
                        }
                    }
                    Some(WheelCommand::Stop) | None => {
                        debug!(dropped = wheel.len(), "Expiration wheel stopped");
                        return;
                    }
                }
            }
        }
    }
}

fn run_callback(callback: Callback) {
    let handle = tokio::task::spawn_blocking(callback);
    tokio::spawn(async move {
        if let Err(err) = handle.await {
            if err.is_panic() {
                error!("Expiration callback panicked");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Callback) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&count);
        let make = move || -> Callback {
            let count = Arc::clone(&handle);
            Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        (count, make)
    }

    fn run(due: Vec<Callback>) -> usize {
        let n = due.len();
        for callback in due {
            callback();
        }
        n
    }

    fn wheel(interval: Duration, slots: usize) -> TimingWheel {
        TimingWheel::new(&WheelConfig { interval, slots })
    }

    #[test]
    fn test_position_arithmetic() {
        let w = wheel(Duration::from_secs(1), 3600);
        assert_eq!(w.position(Duration::ZERO), (0, 0));
        assert_eq!(w.position(Duration::from_millis(1500)), (1, 0));
        assert_eq!(w.position(Duration::from_secs(3600)), (0, 1));
        assert_eq!(w.position(Duration::from_secs(7200)), (0, 2));
        assert_eq!(w.position(Duration::from_secs(7205)), (5, 2));
    }

    #[test]
    fn test_zero_delay_fires_on_next_tick() {
        let mut w = wheel(Duration::from_secs(1), 8);
        let (count, make) = counter();

        w.add(Duration::ZERO, "k".into(), make());
        assert!(w.is_scheduled("k"));
        assert_eq!(run(w.tick()), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!w.is_scheduled("k"));
        assert!(w.is_empty());
    }

    #[test]
    fn test_two_hour_delay_uses_laps() {
        let mut w = wheel(Duration::from_secs(1), 3600);
        let (count, make) = counter();

        w.add(Duration::from_secs(7200), "long".into(), make());
        for _ in 0..7200 {
            run(w.tick());
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);

        run(w.tick());
        assert_eq!(count.load(Ordering::SeqCst), 1);

        for _ in 0..7200 {
            run(w.tick());
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_before_fire() {
        let mut w = wheel(Duration::from_secs(1), 8);
        let (count, make) = counter();

        w.add(Duration::from_secs(2), "k".into(), make());
        assert!(w.cancel("k"));
        assert!(!w.cancel("k"));
        assert!(!w.cancel("never-added"));

        for _ in 0..16 {
            run(w.tick());
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_readd_replaces_task() {
        let mut w = wheel(Duration::from_secs(1), 8);
        let (count, make) = counter();

        w.add(Duration::ZERO, "k".into(), make());
        w.add(Duration::from_secs(3), "k".into(), make());
        assert_eq!(w.len(), 1);

        assert_eq!(run(w.tick()), 0);
        run(w.tick());
        run(w.tick());
        assert_eq!(run(w.tick()), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_anonymous_tasks_all_fire() {
        let mut w = wheel(Duration::from_secs(1), 4);
        let (count, make) = counter();

        for _ in 0..5 {
            w.add(Duration::ZERO, String::new(), make());
        }
        assert_eq!(run(w.tick()), 5);
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_unlink_from_middle_of_slot() {
        let mut w = wheel(Duration::from_secs(1), 4);
        let (count, make) = counter();

        w.add(Duration::ZERO, "a".into(), make());
        w.add(Duration::ZERO, "b".into(), make());
        w.add(Duration::ZERO, "c".into(), make());
        assert!(w.cancel("b"));

        assert_eq!(run(w.tick()), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(w.is_empty());
    }

    #[test]
    fn test_arena_slots_are_reused() {
        let mut w = wheel(Duration::from_secs(1), 4);
        let (_, make) = counter();

        for round in 0..10 {
            w.add(Duration::ZERO, format!("k{}", round), make());
            run(w.tick());
        }
        assert!(w.tasks.len() <= 1);
    }

    #[tokio::test]
    async fn test_wheel_fires_once() {
        let wheel = ExpirationWheel::start(WheelConfig {
            interval: Duration::from_millis(20),
            slots: 16,
        });
        let (count, make) = counter();

        wheel.add(Duration::ZERO, "k", make());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        wheel.stop();
    }

    #[tokio::test]
    async fn test_wheel_cancel() {
        let wheel = ExpirationWheel::start(WheelConfig {
            interval: Duration::from_millis(200),
            slots: 16,
        });
        let (count, make) = counter();

        wheel.add(Duration::ZERO, "k", make());
        wheel.cancel("k");
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        wheel.stop();
    }

    #[tokio::test]
    async fn test_past_deadline_is_ignored() {
        let wheel = ExpirationWheel::start(WheelConfig {
            interval: Duration::from_millis(10),
            slots: 16,
        });
        let (count, make) = counter();

        wheel.add_at(SystemTime::now() - Duration::from_secs(5), "k", make());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        wheel.stop();
    }

    #[tokio::test]
    async fn test_panicking_callback_does_not_stop_wheel() {
        let wheel = ExpirationWheel::start(WheelConfig {
            interval: Duration::from_millis(10),
            slots: 16,
        });
        let (count, make) = counter();

        wheel.add(Duration::ZERO, "boom", || panic!("callback failure"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        wheel.add(Duration::ZERO, "after", make());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        wheel.stop();
    }

    #[tokio::test]
    async fn test_stopped_wheel_drops_tasks() {
        let wheel = ExpirationWheel::start(WheelConfig {
            interval: Duration::from_millis(10),
            slots: 16,
        });
        let (count, make) = counter();

        wheel.stop();
        wheel.add(Duration::ZERO, "k", make());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
