//! # Worker-child entry point for the process backend.
//!
//! When the server spawns a worker by re-executing the current binary, the
//! child finds marker variables in its environment: the slot id and the
//! heartbeat write fd. The embedding application calls [`maybe_run_worker`]
//! at the top of `main`; when the markers are present the call never builds
//! a daemon — it runs the worker role to completion and returns the exit
//! code for the process.
//!
//! ## Child-side behavior
//! - Heartbeats are written on `worker_heartbeat_interval` by a background
//!   task for the whole lifetime of `run`.
//! - SIGTERM requests a cooperative stop (flag + token + user `stop`).
//! - SIGUSR2 re-runs the loader and invokes the user `reload` hook.
//! - SIGQUIT is left at its default disposition: immediate termination.

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::{Config, ConfigLoader};
use crate::error::WorkerError;
use crate::heartbeat::{BeatStamp, HeartbeatHandle, HeartbeatWriter, WORKER_ID_ENV};
use crate::hooks::{run_hook, ServerHandle, Worker, WorkerContext};

/// Runs the worker role when this process was spawned as a worker child.
///
/// Returns `None` when the marker environment is absent (the caller should
/// proceed to build the daemon) and `Some(exit_code)` after the worker role
/// completed (the caller should exit the process with it).
///
/// ```no_run
/// use std::sync::Arc;
/// use workvisor::{Config, Worker};
/// # struct MyWorker;
/// # #[async_trait::async_trait]
/// # impl Worker for MyWorker {
/// #     async fn run(&self, _ctx: workvisor::WorkerContext) -> Result<(), workvisor::WorkerError> { Ok(()) }
/// # }
///
/// fn main() {
///     let worker = Arc::new(MyWorker) as Arc<dyn Worker>;
///     let loader = || Ok::<_, workvisor::RuntimeError>(Config::default());
///     if let Some(code) = workvisor::maybe_run_worker(Arc::clone(&worker), loader) {
///         std::process::exit(code);
///     }
///     // ... build and run the daemon ...
/// }
/// ```
pub fn maybe_run_worker<L: ConfigLoader>(worker: Arc<dyn Worker>, loader: L) -> Option<i32> {
    let worker_id: usize = std::env::var(WORKER_ID_ENV).ok()?.parse().ok()?;
    Some(run_child(worker, Arc::new(loader), worker_id))
}

fn run_child(worker: Arc<dyn Worker>, loader: Arc<dyn ConfigLoader>, worker_id: usize) -> i32 {
    let config = match load_validated(&*loader) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("workvisor worker {worker_id}: configuration failed: {e}");
            return 1;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("workvisor worker {worker_id}: runtime setup failed: {e}");
            return 1;
        }
    };

    runtime.block_on(worker_role(worker, loader, worker_id, config))
}

fn load_validated(loader: &dyn ConfigLoader) -> Result<Config, crate::error::RuntimeError> {
    let config = loader.load()?;
    config.validate()?;
    Ok(config)
}

async fn worker_role(
    worker: Arc<dyn Worker>,
    loader: Arc<dyn ConfigLoader>,
    worker_id: usize,
    config: Config,
) -> i32 {
    let beat_interval = config.worker_heartbeat_interval;
    let (config_tx, config_rx) = watch::channel(Arc::new(config));

    let heartbeat = match HeartbeatWriter::from_env() {
        Some(writer) => HeartbeatHandle::Pipe(Arc::new(writer)),
        None => HeartbeatHandle::Local(BeatStamp::new()),
    };
    let ctx = WorkerContext::new(
        worker_id,
        config_rx,
        heartbeat.clone(),
        ServerHandle::to_parent(),
    );

    // Liveness runs beside the worker body so a busy `run` still beats.
    let beater = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(beat_interval);
        loop {
            ticker.tick().await;
            heartbeat.beat();
        }
    });

    let signals = spawn_signal_tasks(&worker, &loader, &ctx, config_tx);

    let code = match worker.run(ctx.clone()).await {
        Ok(()) | Err(WorkerError::Canceled) => 0,
        Err(e) => {
            tracing::warn!(worker_id, error = %e, "worker run failed");
            1
        }
    };

    beater.abort();
    for task in signals {
        task.abort();
    }
    code
}

/// TERM → cooperative stop; USR2 → reload. QUIT stays at its default.
fn spawn_signal_tasks(
    worker: &Arc<dyn Worker>,
    loader: &Arc<dyn ConfigLoader>,
    ctx: &WorkerContext,
    config_tx: watch::Sender<Arc<Config>>,
) -> Vec<tokio::task::JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut tasks = Vec::with_capacity(2);

    let stop_worker = Arc::clone(worker);
    let stop_ctx = ctx.clone();
    tasks.push(tokio::spawn(async move {
        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "installing TERM handler failed");
                return;
            }
        };
        if term.recv().await.is_some() {
            stop_ctx.request_stop();
            run_hook("worker.stop", stop_worker.stop(&stop_ctx)).await;
        }
    }));

    let reload_worker = Arc::clone(worker);
    let reload_loader = Arc::clone(loader);
    let reload_ctx = ctx.clone();
    tasks.push(tokio::spawn(async move {
        let mut usr2 = match signal(SignalKind::user_defined2()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "installing USR2 handler failed");
                return;
            }
        };
        while usr2.recv().await.is_some() {
            match load_validated(&*reload_loader) {
                Ok(fresh) => {
                    let merged = config_tx.borrow().apply_reload(&fresh);
                    let _ = config_tx.send(Arc::new(merged));
                    run_hook("worker.reload", reload_worker.reload(&reload_ctx)).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "reload rejected, keeping previous configuration")
                }
            }
        }
    }));

    tasks
}
