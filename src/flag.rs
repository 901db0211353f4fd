//! # Blocking flag: a boolean with awaitable edges.
//!
//! [`BlockingFlag`] is the primitive workers use instead of bare sleeps so a
//! stop request takes effect immediately: a thread-safe boolean plus
//! `wait_for_set` / `wait_for_reset` that complete as soon as the flag
//! reaches the target state.
//!
//! ## Rules
//! - `wait_for_set(t)` returns `true` immediately if the flag is already set.
//! - Otherwise it blocks until the flag is set or `t` elapses (`false`).
//! - Spurious wakeups never surface: the wait re-checks the value.
//! - `None` as timeout means wait indefinitely.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;

/// Thread-safe boolean with awaitable state changes.
///
/// Clones share the same underlying flag. Each [`WorkerContext`]
/// (see [`crate::WorkerContext`]) carries the worker's stop flag.
#[derive(Clone)]
pub struct BlockingFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl BlockingFlag {
    /// Creates a new flag in the reset (false) state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Sets the flag, waking all pending `wait_for_set` calls.
    pub fn set(&self) {
        self.tx.send_replace(true);
    }

    /// Resets the flag, waking all pending `wait_for_reset` calls.
    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    /// Returns the current value.
    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Waits until the flag is set.
    ///
    /// Returns `true` if the flag is (or became) set, `false` on timeout.
    pub async fn wait_for_set(&self, timeout: Option<Duration>) -> bool {
        self.wait_for(true, timeout).await
    }

    /// Waits until the flag is reset.
    ///
    /// Returns `true` if the flag is (or became) reset, `false` on timeout.
    pub async fn wait_for_reset(&self, timeout: Option<Duration>) -> bool {
        self.wait_for(false, timeout).await
    }

    async fn wait_for(&self, target: bool, timeout: Option<Duration>) -> bool {
        let mut rx = self.tx.subscribe();
        if *rx.borrow() == target {
            return true;
        }
        let reached = rx.wait_for(|v| *v == target);
        match timeout {
            Some(d) => matches!(time::timeout(d, reached).await, Ok(Ok(_))),
            None => reached.await.is_ok(),
        }
    }
}

impl Default for BlockingFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BlockingFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingFlag")
            .field("set", &self.is_set())
            .finish()
    }
}
