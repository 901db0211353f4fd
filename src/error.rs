//! # Error types used by the workvisor runtime and workers.
//!
//! Two main error enums:
//!
//! - [`RuntimeError`] errors raised by the supervision runtime itself.
//! - [`WorkerError`] errors raised by individual worker executions and hooks.
//!
//! Both types provide `as_label` for logs and metrics.

use std::path::PathBuf;

use thiserror::Error;

/// # Errors produced by the workvisor runtime.
///
/// These represent failures of the supervision machinery, not of user worker
/// code. Startup-time variants (`InvalidConfig`, `PidFileTaken`) are fatal;
/// the same variants raised during a reload are logged and the previous
/// configuration snapshot is retained.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// A configuration value is outside its accepted range, or a backend is
    /// unavailable on this platform.
    #[error("invalid configuration: {key}: {reason}")]
    InvalidConfig {
        /// The offending option name.
        key: &'static str,
        /// Human-readable rejection reason.
        reason: String,
    },

    /// The user-supplied configuration loader failed.
    #[error("configuration loader failed: {reason}")]
    LoaderFailed {
        /// Loader-reported reason.
        reason: String,
    },

    /// Launching a worker runtime handle failed.
    #[error("spawning worker {worker_id} failed: {source}")]
    SpawnFailed {
        /// Slot that failed to start.
        worker_id: usize,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The pid file already exists, presumably owned by another daemon.
    #[error("pid file {path:?} already exists")]
    PidFileTaken {
        /// Path that collided.
        path: PathBuf,
    },

    /// Reading or writing the pid file failed.
    #[error("pid file {path:?}: {source}")]
    PidFile {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// Installing OS signal listeners failed.
    #[error("signal listener setup failed: {source}")]
    SignalSetup {
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::InvalidConfig { .. } => "runtime_invalid_config",
            RuntimeError::LoaderFailed { .. } => "runtime_loader_failed",
            RuntimeError::SpawnFailed { .. } => "runtime_spawn_failed",
            RuntimeError::PidFileTaken { .. } => "runtime_pid_file_taken",
            RuntimeError::PidFile { .. } => "runtime_pid_file",
            RuntimeError::SignalSetup { .. } => "runtime_signal_setup",
        }
    }
}

/// # Errors produced by worker executions and user hooks.
///
/// A `run` routine returning `Failed` is treated as a worker crash: the slot
/// is respawned subject to start pacing. Errors from optional hooks are
/// logged and never propagate.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Worker execution failed; the slot will be respawned.
    #[error("worker failed: {reason}")]
    Failed {
        /// Failure description, recorded in the crash event.
        reason: String,
    },

    /// Worker observed a stop request and exited on purpose.
    ///
    /// This is **not an error** in the traditional sense, but signals
    /// intentional termination.
    #[error("stop requested")]
    Canceled,
}

impl WorkerError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerError::Failed { .. } => "worker_failed",
            WorkerError::Canceled => "worker_canceled",
        }
    }

    /// Convenience constructor for `Failed`.
    pub fn failed(reason: impl Into<String>) -> Self {
        WorkerError::Failed {
            reason: reason.into(),
        }
    }

    /// True when the worker exited because a stop was requested.
    pub fn is_canceled(&self) -> bool {
        matches!(self, WorkerError::Canceled)
    }
}
