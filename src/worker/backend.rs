//! # Worker backends: one interface over embedded, thread and process.
//!
//! A [`WorkerBackend`] wraps one live runtime handle. The monitor drives it
//! through the same interface regardless of backend:
//!
//! | Operation        | embedded / thread                   | process              |
//! |------------------|-------------------------------------|----------------------|
//! | `wait`           | join the task / thread              | reap the child       |
//! | `signal(Term)`   | set stop flag, invoke user `stop`   | deliver SIGTERM      |
//! | `signal(Quit)`   | unsupported (`false`)               | deliver SIGQUIT      |
//! | `force_kill`     | unsupported (`false`)               | deliver SIGKILL      |
//! | `notify_reload`  | invoke user `reload`                | deliver SIGUSR2      |
//!
//! Unsupported operations return `false`; the monitor logs them at warn and
//! drops the request.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{RuntimeError, WorkerError};
use crate::hooks::{Worker, WorkerContext};

use super::embedded::EmbeddedWorker;
use super::thread::ThreadWorker;

/// Stage-appropriate termination signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopSignal {
    /// Graceful stage: cooperative stop.
    Term,
    /// Immediate stage: OS termination.
    Quit,
}

impl StopSignal {
    pub(crate) fn as_label(&self) -> &'static str {
        match self {
            StopSignal::Term => "term",
            StopSignal::Quit => "quit",
        }
    }
}

/// How one worker incarnation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum JoinOutcome {
    /// Exited normally (including a cooperative stop).
    Clean,
    /// Exited abnormally; the message goes into the crash event.
    Crashed(String),
}

impl JoinOutcome {
    pub(crate) fn from_result(result: Result<(), WorkerError>) -> Self {
        match result {
            Ok(()) | Err(WorkerError::Canceled) => JoinOutcome::Clean,
            Err(e) => JoinOutcome::Crashed(e.to_string()),
        }
    }
}

/// One live worker runtime handle.
///
/// `wait` is terminal: after it returns, the handle is reaped and further
/// calls return the cached outcome.
#[async_trait]
pub(crate) trait WorkerBackend: Send {
    /// Waits for the handle to exit and reaps it.
    async fn wait(&mut self) -> JoinOutcome;

    /// Delivers a stage signal. Returns `false` when the backend cannot.
    fn signal(&mut self, sig: StopSignal) -> bool;

    /// Delivers the unblockable kill. Returns `false` when the backend
    /// cannot.
    fn force_kill(&mut self) -> bool;

    /// Propagates a reload to the worker side.
    fn notify_reload(&mut self);
}

/// Monitor-side heartbeat read end; a stand-in on platforms without the
/// process backend.
#[cfg(unix)]
pub(crate) type HeartbeatReader = crate::heartbeat::PipeReader;
#[cfg(not(unix))]
pub(crate) struct HeartbeatReader;

/// Everything `launch` hands back to the monitor.
pub(crate) struct Launched {
    pub backend: Box<dyn WorkerBackend>,
    /// Read end of the heartbeat pipe; `None` for in-process backends.
    pub heartbeat: Option<HeartbeatReader>,
    /// True when the worker starts in the `Starting` state and becomes
    /// `Running` on its first heartbeat.
    pub starts_cold: bool,
}

/// Spawns one runtime handle for the slot per the configured backend.
pub(crate) fn launch(
    config: &Config,
    worker: &Arc<dyn Worker>,
    ctx: &WorkerContext,
) -> Result<Launched, RuntimeError> {
    match config.worker_type {
        crate::config::WorkerType::Embedded => Ok(Launched {
            backend: Box::new(EmbeddedWorker::spawn(Arc::clone(worker), ctx.clone())),
            heartbeat: None,
            starts_cold: false,
        }),
        crate::config::WorkerType::Thread => Ok(Launched {
            backend: Box::new(ThreadWorker::spawn(Arc::clone(worker), ctx.clone())?),
            heartbeat: None,
            starts_cold: false,
        }),
        #[cfg(unix)]
        crate::config::WorkerType::Process => {
            let (backend, reader) = super::process::ProcessWorker::spawn(config, ctx.worker_id())?;
            Ok(Launched {
                backend: Box::new(backend),
                heartbeat: Some(reader),
                starts_cold: true,
            })
        }
        #[cfg(not(unix))]
        crate::config::WorkerType::Process => Err(RuntimeError::InvalidConfig {
            key: "worker_type",
            reason: "the process backend requires a Unix platform".to_string(),
        }),
    }
}
