//! # User contract: worker logic and lifecycle hooks.
//!
//! The embedding application supplies a [`Worker`] (required) and optionally
//! a set of [`ServerHooks`]. The runtime hands user code a [`WorkerContext`]
//! exposing the configuration snapshot, the slot id, the stop flag, the
//! heartbeat handle, and a [`ServerHandle`] for talking back to the owning
//! server.
//!
//! ## Where hooks run
//!
//! | Hook                      | Runs in                    | Called on                      |
//! |---------------------------|----------------------------|--------------------------------|
//! | `ServerHooks::initialize` | launcher's process         | daemon construction            |
//! | `ServerHooks::before_run` | server                     | once before starting workers   |
//! | `ServerHooks::after_run`  | server                     | once after all workers finish  |
//! | `ServerHooks::reload_config` | server                  | on each accepted reload        |
//! | `ServerHooks::before_fork`| server                     | right before a process spawn   |
//! | `ServerHooks::after_start`| server                     | after a spawn                  |
//! | `Worker::initialize`      | server                     | before each spawn              |
//! | `Worker::run`             | worker                     | main body                      |
//! | `Worker::stop`            | worker side                | on graceful stop               |
//! | `Worker::reload`          | worker side                | on reload                      |
//!
//! ## Rules
//! - Errors returned from optional hooks are logged and never propagate.
//! - An error from `run` marks the worker crashed; it is respawned subject
//!   to start pacing.
//! - Hooks run on the owning loop's thread and must not block indefinitely;
//!   long work belongs in `run`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::WorkerError;
use crate::flag::BlockingFlag;
use crate::heartbeat::HeartbeatHandle;
use crate::signals::ControlEvent;

/// One unit of user work, spawned once per slot incarnation.
///
/// `run` must check [`WorkerContext::stop_requested`] (or await
/// [`WorkerContext::wait_for_stop`]) periodically and return promptly when a
/// stop is requested; failure to do so eventually escalates to OS-level
/// termination on the `process` backend and hangs the slot on in-process
/// backends.
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    /// Main body. Runs until completion, failure, or cooperative stop.
    async fn run(&self, ctx: WorkerContext) -> Result<(), WorkerError>;

    /// Invoked once when a graceful stop is requested, alongside the stop
    /// flag being set. Use it to interrupt blocking work `run` is doing.
    async fn stop(&self, ctx: &WorkerContext) -> Result<(), WorkerError> {
        let _ = ctx;
        Ok(())
    }

    /// Invoked after a fresh configuration snapshot was installed.
    async fn reload(&self, ctx: &WorkerContext) -> Result<(), WorkerError> {
        let _ = ctx;
        Ok(())
    }

    /// Invoked in the server before each spawn of this slot.
    async fn initialize(&self, ctx: &WorkerContext) -> Result<(), WorkerError> {
        let _ = ctx;
        Ok(())
    }
}

/// Optional server-level lifecycle hooks.
#[async_trait]
pub trait ServerHooks: Send + Sync + 'static {
    /// Invoked once when the daemon is constructed.
    async fn initialize(&self) -> Result<(), WorkerError> {
        Ok(())
    }

    /// Invoked once per server generation, before any worker starts.
    async fn before_run(&self) -> Result<(), WorkerError> {
        Ok(())
    }

    /// Invoked once per server generation, after all workers finished.
    async fn after_run(&self) -> Result<(), WorkerError> {
        Ok(())
    }

    /// Invoked after a fresh configuration snapshot was installed.
    async fn reload_config(&self, config: &Config) -> Result<(), WorkerError> {
        let _ = config;
        Ok(())
    }

    /// Invoked right before a `process` worker spawn.
    async fn before_fork(&self, worker_id: usize) -> Result<(), WorkerError> {
        let _ = worker_id;
        Ok(())
    }

    /// Invoked after a worker spawn.
    async fn after_start(&self, worker_id: usize) -> Result<(), WorkerError> {
        let _ = worker_id;
        Ok(())
    }
}

/// Default hook set: every hook is a no-op.
pub(crate) struct NoServerHooks;

#[async_trait]
impl ServerHooks for NoServerHooks {}

/// Runs an optional hook, logging failures without propagating them.
pub(crate) async fn run_hook<F>(name: &'static str, fut: F)
where
    F: std::future::Future<Output = Result<(), WorkerError>>,
{
    if let Err(e) = fut.await {
        tracing::error!(hook = name, error = %e, "hook failed");
    }
}

/// Server-facing capability handed to workers through their context.
///
/// Inside the server process it feeds the server's own command channel; in
/// a worker child process it signals the parent server. Either way the
/// request lands on the server loop and goes through the same dispatch as
/// an OS signal.
#[derive(Clone)]
pub struct ServerHandle {
    link: ServerLink,
}

#[derive(Clone)]
enum ServerLink {
    Channel(mpsc::UnboundedSender<ControlEvent>),
    #[cfg(unix)]
    Parent(nix::unistd::Pid),
}

impl ServerHandle {
    pub(crate) fn channel(tx: mpsc::UnboundedSender<ControlEvent>) -> Self {
        Self {
            link: ServerLink::Channel(tx),
        }
    }

    /// Handle for a worker child: control events become signals to the
    /// parent server process.
    #[cfg(unix)]
    pub(crate) fn to_parent() -> Self {
        Self {
            link: ServerLink::Parent(nix::unistd::getppid()),
        }
    }

    /// Sends a control event to the owning server.
    pub fn send(&self, ev: ControlEvent) {
        match &self.link {
            ServerLink::Channel(tx) => {
                let _ = tx.send(ev);
            }
            #[cfg(unix)]
            ServerLink::Parent(pid) => {
                if let Err(e) = nix::sys::signal::kill(*pid, crate::signals::os_signal_for(ev)) {
                    tracing::debug!(%pid, event = ev.as_label(), error = %e, "control delivery failed");
                }
            }
        }
    }

    /// Requests a graceful stop of the whole server.
    pub fn request_stop(&self) {
        self.send(ControlEvent::GracefulStop);
    }

    /// Requests a cooperative restart of the pool.
    pub fn request_restart(&self) {
        self.send(ControlEvent::GracefulRestart);
    }

    /// Requests a configuration reload.
    pub fn request_reload(&self) {
        self.send(ControlEvent::Reload);
    }
}

/// Capabilities handed to worker code and worker-side hooks.
///
/// Cheap to clone; clones observe the same stop flag and configuration
/// stream.
#[derive(Clone)]
pub struct WorkerContext {
    worker_id: usize,
    config_rx: watch::Receiver<Arc<Config>>,
    server: ServerHandle,
    stop_flag: BlockingFlag,
    cancel: CancellationToken,
    heartbeat: HeartbeatHandle,
}

impl WorkerContext {
    pub(crate) fn new(
        worker_id: usize,
        config_rx: watch::Receiver<Arc<Config>>,
        heartbeat: HeartbeatHandle,
        server: ServerHandle,
    ) -> Self {
        Self {
            worker_id,
            config_rx,
            server,
            stop_flag: BlockingFlag::new(),
            cancel: CancellationToken::new(),
            heartbeat,
        }
    }

    /// Dense slot id in `[0, workers)`.
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Current configuration snapshot. Reload replaces the snapshot; hold
    /// the returned `Arc` for a consistent view across one work cycle.
    pub fn config(&self) -> Arc<Config> {
        self.config_rx.borrow().clone()
    }

    /// True once a graceful stop was requested.
    pub fn stop_requested(&self) -> bool {
        self.stop_flag.is_set()
    }

    /// Waits until a stop is requested. Returns `true` if a stop is (or
    /// became) requested, `false` on timeout. Use this instead of sleeping
    /// so stops take effect immediately.
    pub async fn wait_for_stop(&self, timeout: Option<std::time::Duration>) -> bool {
        self.stop_flag.wait_for_set(timeout).await
    }

    /// The owning server, for workers that steer it (stop, restart,
    /// reload).
    pub fn server(&self) -> &ServerHandle {
        &self.server
    }

    /// The stop flag itself, for code that wants to share it.
    pub fn stop_flag(&self) -> &BlockingFlag {
        &self.stop_flag
    }

    /// Cancellation token mirroring the stop flag, for `select!`-style code.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Records one liveness beat. Call once per work cycle.
    pub fn heartbeat(&self) {
        self.heartbeat.beat();
    }

    /// Requests a cooperative stop: sets the flag and cancels the token.
    pub(crate) fn request_stop(&self) {
        self.stop_flag.set();
        self.cancel.cancel();
    }
}
