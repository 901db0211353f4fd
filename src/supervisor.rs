//! # Supervisor: keeps exactly one server generation alive.
//!
//! The supervisor owns the signal queue, forwards control events to the
//! current server generation over its command channel, and reacts to the
//! generation ending:
//!
//! - **Crash or self-exit** → respawn, no earlier than
//!   `last_start + server_restart_wait`.
//! - **Restart outcome** → same respawn path (the server drained its pool
//!   first).
//! - **Stop while shutting down** → propagate the exit status.
//!
//! ## Live restart (detach)
//! ```text
//! Detach ──► forward graceful stop to old generation
//!        ──► deadline = now + server_detach_wait
//!
//! old exits before deadline ──► spawn replacement immediately
//!                               (or exit, when exit_on_detach)
//! deadline fires first      ──► spawn replacement; generations coexist
//!                               until the old one drains and is reaped
//! ```
//! Further detach requests while one is in flight are ignored.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time;

use crate::config::{Config, ConfigLoader};
use crate::dump::{render_report, DumpSink};
use crate::events::{Bus, Event, EventKind};
use crate::hooks::{ServerHooks, Worker};
use crate::server::{Server, ServerOutcome};
use crate::signals::{ControlEvent, SignalQueue};
use crate::tracker::PoolTracker;

/// One spawned server generation.
struct Generation {
    id: u64,
    ctrl: mpsc::UnboundedSender<ControlEvent>,
    handle: JoinHandle<ServerOutcome>,
}

impl Generation {
    fn send(&self, ev: ControlEvent) {
        let _ = self.ctrl.send(ev);
    }
}

/// What one `select!` round resolved to.
enum Round {
    Sig(ControlEvent),
    Current(Result<ServerOutcome, JoinError>),
    Old(usize, Result<ServerOutcome, JoinError>),
    Spawn,
    DetachDeadline,
}

pub(crate) struct Supervisor {
    worker: Arc<dyn Worker>,
    hooks: Arc<dyn ServerHooks>,
    loader: Arc<dyn ConfigLoader>,
    bus: Bus,
    tracker: Arc<PoolTracker>,
    dump: Arc<dyn DumpSink>,
    queue: Arc<SignalQueue>,
    config: Arc<Config>,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        worker: Arc<dyn Worker>,
        hooks: Arc<dyn ServerHooks>,
        loader: Arc<dyn ConfigLoader>,
        bus: Bus,
        tracker: Arc<PoolTracker>,
        dump: Arc<dyn DumpSink>,
        queue: Arc<SignalQueue>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            worker,
            hooks,
            loader,
            bus,
            tracker,
            dump,
            queue,
            config,
        }
    }

    /// Runs until a stop is honored; returns the daemon exit code.
    pub(crate) async fn run(mut self) -> i32 {
        let mut generation_id: u64 = 0;
        let mut current: Option<Generation> = None;
        let mut olds: Vec<Generation> = Vec::new();
        let mut shutting_down = false;
        let mut detach_deadline: Option<Instant> = None;
        let mut last_start: Option<Instant> = None;
        let mut next_start_at = Instant::now();
        let mut exit_code: i32 = 0;

        loop {
            if shutting_down && current.is_none() && olds.is_empty() {
                return exit_code;
            }

            let spawn_at = if current.is_none() && !shutting_down && detach_deadline.is_none() {
                Some(next_start_at)
            } else {
                None
            };
            let deadline_at = if current.is_some() { detach_deadline } else { None };

            let round = tokio::select! {
                ev = self.queue.recv() => Round::Sig(ev),
                res = join_current(&mut current) => Round::Current(res),
                (idx, res) = join_olds(&mut olds) => Round::Old(idx, res),
                _ = sleep_or_pending(spawn_at) => Round::Spawn,
                _ = sleep_or_pending(deadline_at) => Round::DetachDeadline,
            };

            match round {
                Round::Sig(ev) => {
                    let ev = match ev {
                        ControlEvent::Detach if !self.config.enable_detach => {
                            ControlEvent::GracefulStop
                        }
                        other => other,
                    };
                    match ev {
                        ControlEvent::GracefulStop | ControlEvent::ImmediateStop => {
                            shutting_down = true;
                            if let Some(cur) = &current {
                                cur.send(ev);
                            }
                            for old in &olds {
                                old.send(ev);
                            }
                        }
                        ControlEvent::Detach => {
                            if detach_deadline.is_some() {
                                tracing::debug!("already detaching, request ignored");
                            } else if let Some(cur) = &current {
                                self.bus.publish(Event::now(EventKind::DetachRequested));
                                cur.send(ControlEvent::Detach);
                                detach_deadline =
                                    Some(Instant::now() + self.config.server_detach_wait);
                            }
                        }
                        ControlEvent::Reload => {
                            if self.config.disable_reload {
                                tracing::warn!("reload disabled by configuration, request dropped");
                            } else {
                                self.reload_own_config();
                                if let Some(cur) = &current {
                                    cur.send(ev);
                                }
                            }
                        }
                        ControlEvent::Dump => self.write_dump().await,
                        ControlEvent::GracefulRestart | ControlEvent::ImmediateRestart => {
                            if let Some(cur) = &current {
                                cur.send(ev);
                            }
                        }
                    }
                }
                Round::Current(result) => {
                    let Some(gen) = current.take() else { continue };
                    let code = self.reap(gen.id, &result);

                    if shutting_down {
                        detach_deadline = None;
                        exit_code = code;
                    } else if detach_deadline.is_some() {
                        // The old generation drained before the deadline.
                        detach_deadline = None;
                        if self.config.exit_on_detach {
                            shutting_down = true;
                            exit_code = code;
                        } else {
                            next_start_at = Instant::now();
                        }
                    } else {
                        next_start_at = self.schedule_restart(last_start);
                    }
                }
                Round::Old(idx, result) => {
                    let gen = olds.swap_remove(idx);
                    self.reap(gen.id, &result);
                }
                Round::Spawn => {
                    generation_id += 1;
                    last_start = Some(Instant::now());
                    current = Some(self.spawn_generation(generation_id));
                }
                Round::DetachDeadline => {
                    // The replacement always starts once the deadline fires;
                    // `exit_on_detach` only applies when the old generation
                    // drains before the deadline.
                    self.bus.publish(Event::now(EventKind::DetachTimedOut));
                    detach_deadline = None;
                    if let Some(old) = current.take() {
                        olds.push(old);
                    }
                    next_start_at = Instant::now();
                }
            }
        }
    }

    /// Publishes the stop event and maps the result to an exit code.
    fn reap(&self, generation: u64, result: &Result<ServerOutcome, JoinError>) -> i32 {
        match result {
            Ok(ServerOutcome::Stop(code)) => {
                self.bus
                    .publish(Event::now(EventKind::ServerStopped).with_attempt(generation));
                *code
            }
            Ok(ServerOutcome::Restart) => {
                self.bus
                    .publish(Event::now(EventKind::ServerStopped).with_attempt(generation));
                0
            }
            Err(e) => {
                tracing::warn!(generation, error = %e, "server crashed");
                self.bus.publish(
                    Event::now(EventKind::ServerStopped)
                        .with_attempt(generation)
                        .with_error(e.to_string()),
                );
                1
            }
        }
    }

    /// Restart pacing: never earlier than `last_start + server_restart_wait`.
    fn schedule_restart(&self, last_start: Option<Instant>) -> Instant {
        let now = Instant::now();
        let earliest = last_start
            .map(|at| at + self.config.server_restart_wait)
            .unwrap_or(now);
        let at = earliest.max(now);
        self.bus.publish(
            Event::now(EventKind::ServerRestartScheduled)
                .with_delay(at.saturating_duration_since(now)),
        );
        at
    }

    fn spawn_generation(&mut self, generation_id: u64) -> Generation {
        // A new generation re-reads the configuration source wholesale, the
        // way a freshly started process would.
        if generation_id > 1 {
            match self.loader.load().and_then(|c| {
                c.validate()?;
                Ok(c)
            }) {
                Ok(fresh) => self.config = Arc::new(fresh),
                Err(e) => {
                    tracing::warn!(error = %e, "configuration re-read failed, reusing previous");
                }
            }
        }

        let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();
        let server = Server::new(
            Arc::clone(&self.worker),
            Arc::clone(&self.hooks),
            Arc::clone(&self.loader),
            self.bus.clone(),
            Arc::clone(&self.tracker),
            Arc::clone(&self.dump),
            Arc::clone(&self.config),
            ctrl_tx.clone(),
            ctrl_rx,
        );
        let handle = tokio::spawn(server.run());
        self.bus
            .publish(Event::now(EventKind::ServerStarted).with_attempt(generation_id));

        Generation {
            id: generation_id,
            ctrl: ctrl_tx,
            handle,
        }
    }

    /// Refreshes the supervisor-level dynamic options on reload.
    fn reload_own_config(&mut self) {
        match self.loader.load().and_then(|c| {
            c.validate()?;
            Ok(c)
        }) {
            Ok(fresh) => {
                self.config = Arc::new(self.config.apply_reload(&fresh));
            }
            Err(e) => {
                tracing::warn!(error = %e, "reload rejected, keeping previous configuration");
            }
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

async fn join_current(current: &mut Option<Generation>) -> Result<ServerOutcome, JoinError> {
    match current {
        Some(gen) => (&mut gen.handle).await,
        None => std::future::pending().await,
    }
}

async fn join_olds(olds: &mut [Generation]) -> (usize, Result<ServerOutcome, JoinError>) {
    if olds.is_empty() {
        return std::future::pending().await;
    }
    let (res, idx, _remaining) =
        futures::future::select_all(olds.iter_mut().map(|g| &mut g.handle)).await;
    (idx, res)
}

async fn sleep_or_pending(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at.into()).await,
        None => std::future::pending().await,
    }
}
