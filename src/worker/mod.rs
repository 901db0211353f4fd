//! Worker slots: backends, per-slot monitors, and the child-side entry.
//!
//! ## Contents
//! - [`WorkerState`] the observable per-slot state machine
//! - [`backend`] one interface over the embedded / thread / process runtimes
//! - [`monitor`] the per-slot supervisor driving spawn, heartbeat, staged
//!   termination and respawn pacing
//! - [`child`] the entry point worker child processes run (Unix)

pub(crate) mod backend;
#[cfg(unix)]
pub(crate) mod child;
mod embedded;
pub(crate) mod monitor;
#[cfg(unix)]
mod process;
mod thread;

/// Observable state of one worker slot.
///
/// Within a single stop sequence the stage only moves forward
/// (graceful → immediate → forced); it resets when the slot returns to
/// `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// No runtime handle; waiting for the next allowed start.
    Idle,
    /// Handle launched, first heartbeat not yet observed.
    Starting,
    /// Worker is live.
    Running,
    /// Cooperative stop in progress.
    StoppingGraceful,
    /// OS-level termination in progress.
    StoppingImmediate,
    /// Unblockable kill delivered; waiting for the reap.
    StoppingForced,
    /// Runtime handle exited and was reaped.
    Finished,
}

impl WorkerState {
    /// Returns a short stable label (snake_case).
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Starting => "starting",
            WorkerState::Running => "running",
            WorkerState::StoppingGraceful => "stopping_graceful",
            WorkerState::StoppingImmediate => "stopping_immediate",
            WorkerState::StoppingForced => "stopping_forced",
            WorkerState::Finished => "finished",
        }
    }

    /// True for the three termination stages.
    pub fn is_stopping(&self) -> bool {
        matches!(
            self,
            WorkerState::StoppingGraceful
                | WorkerState::StoppingImmediate
                | WorkerState::StoppingForced
        )
    }
}

/// How a stop request enters the termination ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopMode {
    /// Enter at the graceful stage.
    Graceful,
    /// Enter at the immediate stage directly.
    Immediate,
}
