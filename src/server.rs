//! # Server: owns the worker pool.
//!
//! One server generation drives `before_run → running → after_run`. While
//! running it:
//! - sizes the pool to the configured worker count (dense slot ids,
//!   lowest ids survive a shrink),
//! - consumes control events from its command channel and translates them
//!   into per-slot transitions,
//! - re-runs the loader on reload and installs the merged snapshot,
//! - restarts monitors that died abnormally.
//!
//! ## Rules
//! - Control events are handled one at a time between transitions.
//! - A graceful stop closes the start gate first: no slot respawns once the
//!   pool is draining.
//! - Immediate stop/restart requires the process backend; elsewhere the
//!   request is logged at warn and dropped.
//! - A rejected reload keeps the previous snapshot in effect.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use crate::config::{Config, ConfigLoader};
use crate::dump::{render_report, DumpSink};
use crate::events::{Bus, Event, EventKind};
use crate::hooks::{run_hook, ServerHandle, ServerHooks, Worker};
use crate::signals::ControlEvent;
use crate::tracker::PoolTracker;
use crate::worker::monitor::{MonitorCommand, MonitorHandle, WorkerMonitor};
use crate::worker::StopMode;

/// How a server generation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ServerOutcome {
    /// Clean shutdown; the daemon exits with this status.
    Stop(i32),
    /// Self-exit so the supervisor respawns a fresh generation.
    Restart,
}

/// What one `select!` round resolved to.
enum Round {
    Ctrl(Option<ControlEvent>),
    Joined(Option<Result<usize, tokio::task::JoinError>>),
}

pub(crate) struct Server {
    worker: Arc<dyn Worker>,
    hooks: Arc<dyn ServerHooks>,
    loader: Arc<dyn ConfigLoader>,
    bus: Bus,
    tracker: Arc<PoolTracker>,
    dump: Arc<dyn DumpSink>,
    config_tx: watch::Sender<Arc<Config>>,
    ctrl: mpsc::UnboundedReceiver<ControlEvent>,
    handle: ServerHandle,
    monitors: Vec<MonitorHandle>,
    joins: JoinSet<usize>,
    stopping: bool,
    ctrl_closed: bool,
    outcome: Option<ServerOutcome>,
}

impl Server {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        worker: Arc<dyn Worker>,
        hooks: Arc<dyn ServerHooks>,
        loader: Arc<dyn ConfigLoader>,
        bus: Bus,
        tracker: Arc<PoolTracker>,
        dump: Arc<dyn DumpSink>,
        config: Arc<Config>,
        ctrl_tx: mpsc::UnboundedSender<ControlEvent>,
        ctrl: mpsc::UnboundedReceiver<ControlEvent>,
    ) -> Self {
        let (config_tx, _rx) = watch::channel(config);
        Self {
            worker,
            hooks,
            loader,
            bus,
            tracker,
            dump,
            config_tx,
            ctrl,
            handle: ServerHandle::channel(ctrl_tx),
            monitors: Vec::new(),
            joins: JoinSet::new(),
            stopping: false,
            ctrl_closed: false,
            outcome: None,
        }
    }

    fn config(&self) -> Arc<Config> {
        self.config_tx.borrow().clone()
    }

    /// Runs one generation to completion.
    pub(crate) async fn run(mut self) -> ServerOutcome {
        run_hook("server.before_run", self.hooks.before_run()).await;

        let workers = self.config().workers;
        self.scale_to(workers);

        loop {
            if self.joins.is_empty() {
                break;
            }

            let round = tokio::select! {
                ev = ctrl_or_pending(&mut self.ctrl, self.ctrl_closed) => Round::Ctrl(ev),
                joined = self.joins.join_next() => Round::Joined(joined),
            };

            match round {
                // A closed command channel means the owner is gone; drain.
                Round::Ctrl(None) => {
                    self.ctrl_closed = true;
                    self.begin_stop(StopMode::Graceful, ServerOutcome::Stop(0));
                }
                Round::Ctrl(Some(ev)) => self.dispatch(ev).await,
                Round::Joined(Some(Ok(worker_id))) => self.reap_monitor(worker_id),
                Round::Joined(Some(Err(e))) => self.reconcile_after_panic(e),
                Round::Joined(None) => {}
            }
        }

        run_hook("server.after_run", self.hooks.after_run()).await;
        self.outcome.unwrap_or(ServerOutcome::Stop(0))
    }

    /// Translates one control event into pool transitions.
    async fn dispatch(&mut self, ev: ControlEvent) {
        let config = self.config();
        match ev {
            ControlEvent::GracefulStop | ControlEvent::Detach => {
                self.publish_shutdown_once();
                self.begin_stop(StopMode::Graceful, ServerOutcome::Stop(0));
            }
            ControlEvent::ImmediateStop => {
                if !config.worker_type.is_process() {
                    self.drop_unsupported(ev, &config);
                    return;
                }
                self.publish_shutdown_once();
                self.begin_stop(StopMode::Immediate, ServerOutcome::Stop(0));
            }
            ControlEvent::GracefulRestart => {
                if config.restart_server_process {
                    self.begin_stop(StopMode::Graceful, ServerOutcome::Restart);
                } else {
                    self.broadcast(MonitorCommand::Restart(StopMode::Graceful));
                }
            }
            ControlEvent::ImmediateRestart => {
                if !config.worker_type.is_process() {
                    self.drop_unsupported(ev, &config);
                } else if config.restart_server_process {
                    self.begin_stop(StopMode::Immediate, ServerOutcome::Restart);
                } else {
                    self.broadcast(MonitorCommand::Restart(StopMode::Immediate));
                }
            }
            ControlEvent::Reload => {
                if config.disable_reload {
                    tracing::warn!("reload disabled by configuration, request dropped");
                } else {
                    self.reload(&config).await;
                }
            }
            ControlEvent::Dump => self.write_dump().await,
        }
    }

    fn publish_shutdown_once(&self) {
        if !self.stopping {
            self.bus.publish(Event::now(EventKind::ShutdownRequested));
        }
    }

    fn drop_unsupported(&self, ev: ControlEvent, config: &Config) {
        tracing::warn!(
            event = ev.as_label(),
            backend = config.worker_type.as_label(),
            "unsupported on this backend, request dropped"
        );
    }

    /// Closes the start gate and drives every slot into the given stage.
    ///
    /// Idempotent: repeating the same stop changes nothing; a stronger stop
    /// escalates the slots that are still alive.
    fn begin_stop(&mut self, mode: StopMode, outcome: ServerOutcome) {
        if self.outcome.is_none() {
            self.outcome = Some(outcome);
        }
        self.stopping = true;
        self.broadcast(MonitorCommand::Stop(mode));
    }

    fn broadcast(&self, cmd: MonitorCommand) {
        for m in &self.monitors {
            m.send(cmd);
        }
    }

    /// Re-runs the loader and installs the merged snapshot.
    async fn reload(&mut self, running: &Config) {
        let fresh = match self.loader.load().and_then(|c| {
            c.validate()?;
            Ok(c)
        }) {
            Ok(fresh) => fresh,
            Err(e) => {
                tracing::warn!(error = %e, "reload rejected, keeping previous configuration");
                self.bus
                    .publish(Event::now(EventKind::ReloadRejected).with_error(e.to_string()));
                return;
            }
        };

        let merged = Arc::new(running.apply_reload(&fresh));
        let workers = merged.workers;
        self.config_tx.send_replace(Arc::clone(&merged));
        run_hook("server.reload_config", self.hooks.reload_config(&merged)).await;
        self.broadcast(MonitorCommand::Reload);
        self.bus.publish(Event::now(EventKind::ReloadApplied));
        self.scale_to(workers);
    }

    /// Grows and shrinks the pool toward the desired count.
    ///
    /// Slots keep their dense ids: a shrink stops the highest ids and keeps
    /// the lowest running untouched.
    fn scale_to(&mut self, desired: usize) {
        if self.stopping {
            return;
        }
        for m in &self.monitors {
            if m.worker_id >= desired {
                m.send(MonitorCommand::Stop(StopMode::Graceful));
            }
        }
        let have: HashSet<usize> = self.monitors.iter().map(|m| m.worker_id).collect();
        for worker_id in 0..desired {
            if !have.contains(&worker_id) {
                self.spawn_monitor(worker_id);
            }
        }
    }

    fn spawn_monitor(&mut self, worker_id: usize) {
        let (monitor, handle) = WorkerMonitor::new(
            worker_id,
            Arc::clone(&self.worker),
            Arc::clone(&self.hooks),
            self.bus.clone(),
            self.config_tx.subscribe(),
            self.handle.clone(),
        );
        self.joins.spawn(async move {
            monitor.run().await;
            worker_id
        });
        self.monitors.push(handle);
    }

    fn reap_monitor(&mut self, worker_id: usize) {
        self.monitors.retain(|m| m.worker_id != worker_id);
    }

    /// A monitor task died abnormally. Drop every handle whose task is gone
    /// and re-grow the pool; the slot's worker handle was reaped with its
    /// monitor.
    fn reconcile_after_panic(&mut self, e: tokio::task::JoinError) {
        tracing::error!(error = %e, "worker monitor died, rebuilding pool");
        self.monitors.retain(|m| !m.tx.is_closed());
        if !self.stopping {
            let workers = self.config().workers;
            self.scale_to(workers);
        }
    }

    async fn write_dump(&self) {
        let snapshot = self.tracker.snapshot().await;
        let report = render_report(&snapshot);
        match self.dump.write_dump(&report) {
            Ok(path) => {
                tracing::info!(path = %path.display(), "status dump written");
                self.bus.publish(Event::now(EventKind::DumpWritten));
            }
            Err(e) => tracing::warn!(error = %e, "writing status dump failed"),
        }
    }
}

async fn ctrl_or_pending(
    ctrl: &mut mpsc::UnboundedReceiver<ControlEvent>,
    closed: bool,
) -> Option<ControlEvent> {
    if closed {
        std::future::pending().await
    } else {
        ctrl.recv().await
    }
}
