//! # Runtime events emitted by the supervisor, server and worker monitors.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Server generations**: started, stopped, restart scheduled, detach flow
//! - **Pool control**: shutdown, reload accepted/rejected, dump written
//! - **Worker lifecycle**: starting, running, stopped, crashed, stalled
//! - **Termination stages**: stage entered, stop signal sent
//!
//! The [`Event`] struct carries metadata such as timestamps, the worker slot,
//! incarnation counters, delays and error messages.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically. This guarantees that events can be ordered correctly even
//! when delivered out-of-order through async channels.
//!
//! ## Event flow examples
//!
//! ### Worker respawn after a crash
//! ```text
//! WorkerStarting → WorkerCrashed → WorkerRestartScheduled → WorkerStarting
//! ```
//!
//! ### Staged termination of a stubborn process worker
//! ```text
//! StopStageEntered(graceful) → StopSignalSent(graceful) × n
//!   → StopStageEntered(immediate) → StopSignalSent(immediate) × n
//!   → StopStageEntered(forced) → WorkerStopped
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering. Starts at 1 so a zeroed
/// "last seen" always accepts the first event.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(1);

/// The three escalating worker-termination stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum KillStage {
    /// Cooperative stop: TERM / user `stop` hook.
    Graceful,
    /// OS termination signal: QUIT.
    Immediate,
    /// Unblockable kill: KILL.
    Forced,
}

impl KillStage {
    /// Returns a short stable label (snake_case).
    pub fn as_label(&self) -> &'static str {
        match self {
            KillStage::Graceful => "graceful",
            KillStage::Immediate => "immediate",
            KillStage::Forced => "forced",
        }
    }

    /// Stage index: 0 for graceful, 1 for immediate, 2 for forced.
    pub fn index(&self) -> usize {
        match self {
            KillStage::Graceful => 0,
            KillStage::Immediate => 1,
            KillStage::Forced => 2,
        }
    }
}

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Server generations ===
    /// A server generation was launched.
    ServerStarted,
    /// A server generation exited and was reaped.
    ServerStopped,
    /// The next server generation was scheduled after a delay.
    ServerRestartScheduled,
    /// Live restart requested: the running server was told to drain.
    DetachRequested,
    /// The detach deadline fired with the old server still running.
    DetachTimedOut,

    // === Pool control ===
    /// Graceful shutdown requested for the pool.
    ShutdownRequested,
    /// A fresh configuration snapshot was installed.
    ReloadApplied,
    /// A reload failed validation; the previous snapshot was retained.
    ReloadRejected,
    /// A status dump was written.
    DumpWritten,

    // === Worker lifecycle ===
    /// Worker slot is launching its runtime handle.
    WorkerStarting,
    /// Worker is live (first heartbeat observed, or immediately for
    /// in-process backends).
    WorkerRunning,
    /// Worker finished and was reaped.
    WorkerStopped,
    /// Worker exited abnormally; it will be respawned subject to pacing.
    WorkerCrashed,
    /// Worker missed its heartbeat deadline and is considered stalled.
    WorkerStalled,
    /// Worker slot scheduled its next start.
    WorkerRestartScheduled,

    // === Termination stages ===
    /// Worker entered a termination stage.
    StopStageEntered,
    /// A stage-appropriate stop signal was delivered to the worker.
    StopSignalSent,
}

/// Runtime event with optional metadata.
///
/// ## Fields
/// - `seq`: unique sequence number for ordering (monotonically increasing)
/// - `at`: wall-clock timestamp (may go backwards due to NTP, logging only)
/// - `kind`: event classification
/// - `worker`, `attempt`, `delay`, `stage`, `error`: optional metadata
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    /// Used to determine event ordering across async boundaries.
    pub seq: u64,
    /// Wall-clock timestamp (may go backwards, use for logging only).
    pub at: SystemTime,
    /// The kind of event.
    pub kind: EventKind,
    /// Worker slot the event concerns, if applicable.
    pub worker: Option<usize>,
    /// Incarnation count for the slot (starting from 1), or the server
    /// generation count for server events.
    pub attempt: Option<u64>,
    /// Scheduling delay (restart pacing, server restart wait).
    pub delay: Option<Duration>,
    /// Termination stage, for stage-related events.
    pub stage: Option<KillStage>,
    /// Error message, if the event represents a failure.
    pub error: Option<String>,
}

impl Event {
    /// Creates a new event of the given kind with the current timestamp and
    /// the next sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            worker: None,
            attempt: None,
            delay: None,
            stage: None,
            error: None,
        }
    }

    /// Attaches a worker slot id.
    pub fn with_worker(mut self, worker_id: usize) -> Self {
        self.worker = Some(worker_id);
        self
    }

    /// Attaches an incarnation or generation count.
    pub fn with_attempt(mut self, n: u64) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a scheduling delay.
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay = Some(d);
        self
    }

    /// Attaches a termination stage.
    pub fn with_stage(mut self, stage: KillStage) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Attaches an error message.
    pub fn with_error(mut self, msg: impl Into<String>) -> Self {
        self.error = Some(msg.into());
        self
    }
}
