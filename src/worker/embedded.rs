//! # Embedded backend: the worker runs on the server's own scheduler.
//!
//! The worker future is spawned onto the same runtime that drives the server
//! loop, so a single-threaded daemon stays truly single-threaded. Stop is
//! cooperative only: the stop flag is set and the user `stop` hook invoked;
//! OS-level termination and forced kill are unavailable (a worker that never
//! checks its flag cannot be reclaimed).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::error::WorkerError;
use crate::hooks::{run_hook, Worker, WorkerContext};

use super::backend::{JoinOutcome, StopSignal, WorkerBackend};

pub(crate) struct EmbeddedWorker {
    handle: Option<JoinHandle<Result<(), WorkerError>>>,
    worker: Arc<dyn Worker>,
    ctx: WorkerContext,
    stop_invoked: bool,
    outcome: Option<JoinOutcome>,
}

impl EmbeddedWorker {
    pub(crate) fn spawn(worker: Arc<dyn Worker>, ctx: WorkerContext) -> Self {
        let handle = {
            let worker = Arc::clone(&worker);
            let ctx = ctx.clone();
            tokio::spawn(async move { worker.run(ctx).await })
        };
        Self {
            handle: Some(handle),
            worker,
            ctx,
            stop_invoked: false,
            outcome: None,
        }
    }
}

#[async_trait]
impl WorkerBackend for EmbeddedWorker {
    async fn wait(&mut self) -> JoinOutcome {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }
        // Await in place so a canceled `wait` leaves the handle reusable.
        let outcome = match self.handle.as_mut() {
            Some(handle) => match handle.await {
                Ok(result) => JoinOutcome::from_result(result),
                Err(e) if e.is_panic() => JoinOutcome::Crashed("worker panicked".to_string()),
                Err(_) => JoinOutcome::Crashed("worker task aborted".to_string()),
            },
            None => JoinOutcome::Crashed("worker task missing".to_string()),
        };
        self.handle = None;
        self.outcome = Some(outcome.clone());
        outcome
    }

    fn signal(&mut self, sig: StopSignal) -> bool {
        match sig {
            StopSignal::Term => {
                if !self.stop_invoked {
                    self.stop_invoked = true;
                    self.ctx.request_stop();
                    let worker = Arc::clone(&self.worker);
                    let ctx = self.ctx.clone();
                    tokio::spawn(async move {
                        run_hook("worker.stop", worker.stop(&ctx)).await;
                    });
                }
                true
            }
            StopSignal::Quit => false,
        }
    }

    fn force_kill(&mut self) -> bool {
        false
    }

    fn notify_reload(&mut self) {
        let worker = Arc::clone(&self.worker);
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            run_hook("worker.reload", worker.reload(&ctx)).await;
        });
    }
}
