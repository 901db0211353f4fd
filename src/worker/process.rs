//! # Process backend: the worker runs in a child OS process.
//!
//! The child is launched from `worker_spawn_cmdline` when configured, or by
//! re-executing the current binary; in the latter case the embedding
//! application calls [`maybe_run_worker`](crate::maybe_run_worker) at the
//! top of `main` to take the worker role when the marker environment
//! variables are present.
//!
//! The full termination ladder is available: SIGTERM (graceful), SIGQUIT
//! (immediate), SIGKILL (forced). Liveness comes through the heartbeat pipe
//! whose write end the child inherits.

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::os::fd::AsRawFd;
use tokio::process::{Child, Command};

use crate::config::Config;
use crate::error::RuntimeError;
use crate::heartbeat::{heartbeat_pair, PipeReader, HEARTBEAT_FD_ENV, WORKER_ID_ENV};

use super::backend::{JoinOutcome, StopSignal, WorkerBackend};

pub(crate) struct ProcessWorker {
    child: Child,
    pid: Option<Pid>,
    outcome: Option<JoinOutcome>,
}

impl ProcessWorker {
    /// Creates the heartbeat pipe, launches the child, and closes the
    /// parent's copy of the write end.
    pub(crate) fn spawn(
        config: &Config,
        worker_id: usize,
    ) -> Result<(Self, PipeReader), RuntimeError> {
        let io_err = |source| RuntimeError::SpawnFailed { worker_id, source };

        let (reader, write_end) = heartbeat_pair().map_err(io_err)?;

        let cmdline = match &config.worker_spawn_cmdline {
            Some(args) => args.clone(),
            None => {
                let exe = std::env::current_exe().map_err(io_err)?;
                vec![exe.to_string_lossy().into_owned()]
            }
        };

        let mut command = Command::new(&cmdline[0]);
        command
            .args(&cmdline[1..])
            .env(WORKER_ID_ENV, worker_id.to_string())
            .env(HEARTBEAT_FD_ENV, write_end.as_raw_fd().to_string())
            // If the server is torn down without reaping, do not leak
            // orphaned workers.
            .kill_on_drop(true);

        let child = command.spawn().map_err(io_err)?;
        drop(write_end);

        let pid = child.id().map(|id| Pid::from_raw(id as i32));
        Ok((
            Self {
                child,
                pid,
                outcome: None,
            },
            reader,
        ))
    }

    fn deliver(&self, signal: Signal) -> bool {
        match self.pid {
            Some(pid) => match kill(pid, signal) {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(%pid, signal = %signal, error = %e, "signal delivery failed");
                    false
                }
            },
            None => false,
        }
    }
}

#[async_trait]
impl WorkerBackend for ProcessWorker {
    async fn wait(&mut self) -> JoinOutcome {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }
        let outcome = match self.child.wait().await {
            Ok(status) if status.success() => JoinOutcome::Clean,
            Ok(status) => JoinOutcome::Crashed(status.to_string()),
            Err(e) => JoinOutcome::Crashed(format!("wait failed: {e}")),
        };
        // The pid is recycled once reaped; never signal it again.
        self.pid = None;
        self.outcome = Some(outcome.clone());
        outcome
    }

    fn signal(&mut self, sig: StopSignal) -> bool {
        match sig {
            StopSignal::Term => self.deliver(Signal::SIGTERM),
            StopSignal::Quit => self.deliver(Signal::SIGQUIT),
        }
    }

    fn force_kill(&mut self) -> bool {
        self.deliver(Signal::SIGKILL)
    }

    fn notify_reload(&mut self) {
        self.deliver(Signal::SIGUSR2);
    }
}
