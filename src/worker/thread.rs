//! # Thread backend: the worker runs on a dedicated OS thread.
//!
//! Each incarnation spawns one thread driving the worker future on its own
//! single-threaded runtime. Panics are contained in the thread and surface
//! as a crash outcome. Stop semantics match the embedded backend: `Term`
//! requests a cooperative stop, `Quit` and forced kill are unavailable.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::RuntimeError;
use crate::hooks::{run_hook, Worker, WorkerContext};

use super::backend::{JoinOutcome, StopSignal, WorkerBackend};

pub(crate) struct ThreadWorker {
    done: Option<oneshot::Receiver<JoinOutcome>>,
    worker: Arc<dyn Worker>,
    ctx: WorkerContext,
    stop_invoked: bool,
    outcome: Option<JoinOutcome>,
}

impl ThreadWorker {
    pub(crate) fn spawn(worker: Arc<dyn Worker>, ctx: WorkerContext) -> Result<Self, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        let thread_worker = Arc::clone(&worker);
        let thread_ctx = ctx.clone();
        let worker_id = ctx.worker_id();

        std::thread::Builder::new()
            .name(format!("workvisor-worker-{worker_id}"))
            .spawn(move || {
                let outcome = run_on_thread(thread_worker, thread_ctx);
                let _ = tx.send(outcome);
            })
            .map_err(|source| RuntimeError::SpawnFailed { worker_id, source })?;

        Ok(Self {
            done: Some(rx),
            worker,
            ctx,
            stop_invoked: false,
            outcome: None,
        })
    }
}

/// Thread body: a current-thread runtime drives the worker future, with
/// panics contained.
fn run_on_thread(worker: Arc<dyn Worker>, ctx: WorkerContext) -> JoinOutcome {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => return JoinOutcome::Crashed(format!("worker runtime: {e}")),
    };
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
        runtime.block_on(worker.run(ctx))
    }));
    match result {
        Ok(run_result) => JoinOutcome::from_result(run_result),
        Err(_) => JoinOutcome::Crashed("worker panicked".to_string()),
    }
}

#[async_trait]
impl WorkerBackend for ThreadWorker {
    async fn wait(&mut self) -> JoinOutcome {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }
        // Await in place so a canceled `wait` leaves the channel reusable.
        let outcome = match self.done.as_mut() {
            Some(rx) => match rx.await {
                Ok(outcome) => outcome,
                Err(_) => JoinOutcome::Crashed("worker thread vanished".to_string()),
            },
            None => JoinOutcome::Crashed("worker thread missing".to_string()),
        };
        self.done = None;
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
