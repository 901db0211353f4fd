//! # WorkerMonitor: per-slot supervisor.
//!
//! One monitor owns one worker slot and drives it through the state machine:
//!
//! ```text
//! Idle ──► Starting ──► Running ──► StoppingGraceful ──► StoppingImmediate
//!   ▲         (process: first        │        ▲                  │
//!   │          heartbeat flips       │        │ stage timeout /  ▼
//!   │          to Running)           │        │ heartbeat stall  StoppingForced
//!   │                                ▼        │                  │
//!   └──────── pacing ◄──────────── Finished ◄─┴──────────────────┘
//! ```
//!
//! ## Rules
//! - Transitions for one slot are serialized: everything happens on this
//!   monitor's loop.
//! - The stage only moves forward within one stop sequence; it resets when
//!   the slot returns to `Idle`.
//! - While a stopping stage is active the stage signal is re-sent on a
//!   growing schedule: the n-th gap is `base_interval + increment × (n-1)`.
//! - A stop arriving while the slot is `Starting` is deferred until the
//!   first heartbeat; a heartbeat stall overrides the deferral since it
//!   kills the handle rather than cancelling user work.
//! - Respawn never happens before the pacing deadline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::time;

use crate::config::Config;
use crate::events::{Bus, Event, EventKind, KillStage};
use crate::heartbeat::{BeatStamp, HeartbeatHandle};
use crate::hooks::{run_hook, ServerHandle, ServerHooks, Worker, WorkerContext};

use super::backend::{launch, JoinOutcome, Launched, StopSignal, WorkerBackend};
use super::{StopMode, WorkerState};

/// Commands the server sends to one monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MonitorCommand {
    /// Stop the slot and exit the monitor (no respawn).
    Stop(StopMode),
    /// Stop the current incarnation; respawn subject to pacing.
    Restart(StopMode),
    /// Propagate a reload to the worker side.
    Reload,
}

/// Server-side handle to one monitor.
pub(crate) struct MonitorHandle {
    pub worker_id: usize,
    pub tx: mpsc::UnboundedSender<MonitorCommand>,
}

impl MonitorHandle {
    pub(crate) fn send(&self, cmd: MonitorCommand) {
        let _ = self.tx.send(cmd);
    }
}

/// Bookkeeping for one active stopping stage.
struct StageState {
    stage: KillStage,
    entered_at: Instant,
    /// Next scheduled signal emission; `None` for in-process backends and
    /// for the forced stage.
    next_signal_at: Option<Instant>,
    /// Signals sent in this stage so far.
    sent: u32,
}

/// How one incarnation ended, from the monitor loop's point of view.
enum IncarnationEnd {
    /// A stop command was honored: the monitor exits.
    Exit,
    /// The slot goes back to `Idle` and respawns per pacing.
    Respawn,
}

/// What one `select!` round resolved to.
enum Tick {
    Reaped(JoinOutcome),
    Command(Option<MonitorCommand>),
    Beats(std::io::Result<bool>),
    Deadline,
}

pub(crate) struct WorkerMonitor {
    worker_id: usize,
    worker: Arc<dyn Worker>,
    hooks: Arc<dyn ServerHooks>,
    bus: Bus,
    config_rx: watch::Receiver<Arc<Config>>,
    server: ServerHandle,
    rx: mpsc::UnboundedReceiver<MonitorCommand>,
}

impl WorkerMonitor {
    pub(crate) fn new(
        worker_id: usize,
        worker: Arc<dyn Worker>,
        hooks: Arc<dyn ServerHooks>,
        bus: Bus,
        config_rx: watch::Receiver<Arc<Config>>,
        server: ServerHandle,
    ) -> (Self, MonitorHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                worker_id,
                worker,
                hooks,
                bus,
                config_rx,
                server,
                rx,
            },
            MonitorHandle { worker_id, tx },
        )
    }

    fn config(&self) -> Arc<Config> {
        self.config_rx.borrow().clone()
    }

    fn publish(&self, kind: EventKind) -> EventSink<'_> {
        EventSink {
            bus: &self.bus,
            event: Event::now(kind).with_worker(self.worker_id),
        }
    }

    /// Runs the slot until a stop command is honored.
    pub(crate) async fn run(mut self) {
        let mut attempt: u64 = 0;
        let mut next_start_at = Instant::now();

        loop {
            if !self.idle_until(next_start_at).await {
                return;
            }
            attempt += 1;

            match self.run_incarnation(attempt).await {
                IncarnationEnd::Exit => return,
                IncarnationEnd::Respawn => {
                    let delay = self.config().pacing().next_delay();
                    next_start_at = Instant::now() + delay;
                    self.publish(EventKind::WorkerRestartScheduled)
                        .attempt(attempt)
                        .delay(delay)
                        .send();
                }
            }
        }
    }

    /// Idle state: waits out the pacing deadline while answering commands.
    ///
    /// Returns `false` when the monitor should exit instead of starting.
    async fn idle_until(&mut self, next_start_at: Instant) -> bool {
        loop {
            tokio::select! {
                _ = time::sleep_until(next_start_at.into()) => return true,
                cmd = self.rx.recv() => match cmd {
                    // A closed channel means the server is gone.
                    None | Some(MonitorCommand::Stop(_)) => return false,
                    // Nothing is running yet; restarts and reloads are moot.
                    Some(MonitorCommand::Restart(_)) | Some(MonitorCommand::Reload) => {}
                },
            }
        }
    }

    /// One incarnation: spawn, monitor, reap.
    async fn run_incarnation(&mut self, attempt: u64) -> IncarnationEnd {
        let config = self.config();
        let ctx = WorkerContext::new(
            self.worker_id,
            self.config_rx.clone(),
            HeartbeatHandle::Local(BeatStamp::new()),
            self.server.clone(),
        );

        run_hook("worker.initialize", self.worker.initialize(&ctx)).await;
        if config.worker_type.is_process() {
            run_hook("server.before_fork", self.hooks.before_fork(self.worker_id)).await;
        }

        self.publish(EventKind::WorkerStarting).attempt(attempt).send();
        let launched = match launch(&config, &self.worker, &ctx) {
            Ok(launched) => launched,
            Err(e) => {
                tracing::warn!(worker_id = self.worker_id, error = %e, "worker launch failed");
                self.publish(EventKind::WorkerCrashed)
                    .attempt(attempt)
                    .error(e.to_string())
                    .send();
                return IncarnationEnd::Respawn;
            }
        };
        run_hook("server.after_start", self.hooks.after_start(self.worker_id)).await;

        let Launched {
            mut backend,
            mut heartbeat,
            starts_cold,
        } = launched;

        let mut state = if starts_cold {
            WorkerState::Starting
        } else {
            self.publish(EventKind::WorkerRunning).attempt(attempt).send();
            WorkerState::Running
        };
        let mut stage: Option<StageState> = None;
        let mut pending_stop: Option<StopMode> = None;
        let mut exit_after = false;
        let mut last_heartbeat_at = Instant::now();
        let mut pipe_open = heartbeat.is_some();
        let mut rx_closed = false;

        loop {
            let config = self.config();
            let deadline = next_deadline(&config, &stage, last_heartbeat_at, starts_cold);

            let tick = tokio::select! {
                outcome = backend.wait() => Tick::Reaped(outcome),
                cmd = recv_or_pending(&mut self.rx, rx_closed) => Tick::Command(cmd),
                beats = beats_or_pending(&mut heartbeat, pipe_open) => Tick::Beats(beats),
                _ = sleep_or_pending(deadline) => Tick::Deadline,
            };

            match tick {
                Tick::Reaped(outcome) => {
                    self.finish(attempt, &stage, outcome);
                    return if exit_after {
                        IncarnationEnd::Exit
                    } else {
                        IncarnationEnd::Respawn
                    };
                }
                Tick::Command(cmd) => match cmd {
                    None => {
                        rx_closed = true;
                        exit_after = true;
                        self.request_stop(
                            StopMode::Graceful,
                            &mut state,
                            &mut stage,
                            &mut pending_stop,
                            &mut backend,
                            &config,
                        );
                    }
                    Some(MonitorCommand::Stop(mode)) => {
                        exit_after = true;
                        self.request_stop(
                            mode,
                            &mut state,
                            &mut stage,
                            &mut pending_stop,
                            &mut backend,
                            &config,
                        );
                    }
                    Some(MonitorCommand::Restart(mode)) => {
                        self.request_stop(
                            mode,
                            &mut state,
                            &mut stage,
                            &mut pending_stop,
                            &mut backend,
                            &config,
                        );
                    }
                    Some(MonitorCommand::Reload) => backend.notify_reload(),
                },
                Tick::Beats(result) => match result {
                    Ok(any) => {
                        if any {
                            last_heartbeat_at = Instant::now();
                            if state == WorkerState::Starting {
                                state = WorkerState::Running;
                                self.publish(EventKind::WorkerRunning).attempt(attempt).send();
                                if let Some(mode) = pending_stop.take() {
                                    self.request_stop(
                                        mode,
                                        &mut state,
                                        &mut stage,
                                        &mut pending_stop,
                                        &mut backend,
                                        &config,
                                    );
                                }
                            }
                        }
                    }
                    Err(e) => {
                        // EOF: the child closed its write end, usually on
                        // the way out. Reaping takes it from here.
                        tracing::trace!(worker_id = self.worker_id, error = %e, "heartbeat pipe closed");
                        pipe_open = false;
                    }
                },
                Tick::Deadline => {
                    let now = Instant::now();
                    self.on_deadline(
                        now,
                        attempt,
                        &config,
                        &mut state,
                        &mut stage,
                        &mut backend,
                        last_heartbeat_at,
                        starts_cold,
                    );
                }
            }
        }
    }

    /// Applies a stop request, honoring the deferral while `Starting`.
    #[allow(clippy::too_many_arguments)]
    fn request_stop(
        &self,
        mode: StopMode,
        state: &mut WorkerState,
        stage: &mut Option<StageState>,
        pending_stop: &mut Option<StopMode>,
        backend: &mut Box<dyn WorkerBackend>,
        config: &Config,
    ) {
        if *state == WorkerState::Starting {
            let upgraded = match (*pending_stop, mode) {
                (Some(StopMode::Immediate), _) | (_, StopMode::Immediate) => StopMode::Immediate,
                _ => StopMode::Graceful,
            };
            *pending_stop = Some(upgraded);
            return;
        }
        let target = match mode {
            StopMode::Graceful => KillStage::Graceful,
            StopMode::Immediate => KillStage::Immediate,
        };
        self.enter_stage(target, state, stage, backend, config);
    }

    /// Moves the slot into a stopping stage. The stage never goes backwards.
    fn enter_stage(
        &self,
        target: KillStage,
        state: &mut WorkerState,
        stage: &mut Option<StageState>,
        backend: &mut Box<dyn WorkerBackend>,
        config: &Config,
    ) {
        if let Some(current) = stage {
            if current.stage >= target {
                return;
            }
        }
        *state = match target {
            KillStage::Graceful => WorkerState::StoppingGraceful,
            KillStage::Immediate => WorkerState::StoppingImmediate,
            KillStage::Forced => WorkerState::StoppingForced,
        };
        self.publish(EventKind::StopStageEntered).stage(target).send();

        let mut st = StageState {
            stage: target,
            entered_at: Instant::now(),
            next_signal_at: None,
            sent: 0,
        };
        match target {
            KillStage::Forced => {
                if !backend.force_kill() {
                    tracing::warn!(
                        worker_id = self.worker_id,
                        backend = config.worker_type.as_label(),
                        "forced kill unsupported by backend, request dropped"
                    );
                }
            }
            KillStage::Graceful | KillStage::Immediate => {
                self.send_stage_signal(&mut st, backend, config);
            }
        }
        *stage = Some(st);
    }

    /// Delivers the stage-appropriate signal and schedules the next one.
    fn send_stage_signal(
        &self,
        st: &mut StageState,
        backend: &mut Box<dyn WorkerBackend>,
        config: &Config,
    ) {
        let sig = match st.stage {
            KillStage::Graceful => StopSignal::Term,
            KillStage::Immediate => StopSignal::Quit,
            KillStage::Forced => return,
        };
        let delivered = backend.signal(sig);
        st.sent += 1;
        if delivered {
            self.publish(EventKind::StopSignalSent).stage(st.stage).send();
        } else {
            tracing::warn!(
                worker_id = self.worker_id,
                signal = sig.as_label(),
                backend = config.worker_type.as_label(),
                "stop signal unsupported by backend, request dropped"
            );
        }
        // Only a real OS process gets a resend schedule; in-process stop is
        // delivered exactly once.
        st.next_signal_at = if config.worker_type.is_process() {
            let (base, increment) = match st.stage {
                KillStage::Graceful => (
                    config.worker_graceful_kill_interval,
                    config.worker_graceful_kill_interval_increment,
                ),
                KillStage::Immediate => (
                    config.worker_immediate_kill_interval,
                    config.worker_immediate_kill_interval_increment,
                ),
                KillStage::Forced => unreachable!(),
            };
            Some(Instant::now() + base + increment * (st.sent - 1))
        } else {
            None
        };
    }

    /// Time-driven transitions: stage timeouts, signal resends, stalls.
    #[allow(clippy::too_many_arguments)]
    fn on_deadline(
        &self,
        now: Instant,
        attempt: u64,
        config: &Config,
        state: &mut WorkerState,
        stage: &mut Option<StageState>,
        backend: &mut Box<dyn WorkerBackend>,
        last_heartbeat_at: Instant,
        starts_cold: bool,
    ) {
        // Stage timeout escalation.
        let escalate_to = stage.as_ref().and_then(|st| {
            let timeout = match st.stage {
                KillStage::Graceful => config.worker_graceful_kill_timeout,
                KillStage::Immediate => config.worker_immediate_kill_timeout,
                KillStage::Forced => None,
            };
            let elapsed = timeout.is_some_and(|t| now.duration_since(st.entered_at) >= t);
            elapsed.then(|| match st.stage {
                KillStage::Graceful => KillStage::Immediate,
                _ => KillStage::Forced,
            })
        });
        if let Some(next) = escalate_to {
            self.enter_stage(next, state, stage, backend, config);
            return;
        }

        // Scheduled signal resend.
        if let Some(st) = stage.as_mut() {
            if st.next_signal_at.is_some_and(|at| now >= at) {
                self.send_stage_signal(st, backend, config);
                return;
            }
        }

        // Heartbeat stall: silence beyond the timeout ends in OS-level
        // termination, regardless of any deferral.
        let stalled_applies = starts_cold
            && stage.as_ref().is_none_or(|st| st.stage < KillStage::Immediate)
            && now.duration_since(last_heartbeat_at) >= config.worker_heartbeat_timeout;
        if stalled_applies {
            tracing::warn!(
                worker_id = self.worker_id,
                timeout = ?config.worker_heartbeat_timeout,
                "worker heartbeat stalled"
            );
            self.publish(EventKind::WorkerStalled).attempt(attempt).send();
            self.enter_stage(KillStage::Immediate, state, stage, backend, config);
        }
    }

    /// Publishes the terminal event for a reaped incarnation.
    fn finish(&self, attempt: u64, stage: &Option<StageState>, outcome: JoinOutcome) {
        match outcome {
            JoinOutcome::Clean => {
                self.publish(EventKind::WorkerStopped).attempt(attempt).send();
            }
            JoinOutcome::Crashed(reason) if stage.is_some() => {
                // Expected while a termination stage is active: the OS
                // signal takes the handle down.
                self.publish(EventKind::WorkerStopped)
                    .attempt(attempt)
                    .error(reason)
                    .send();
            }
            JoinOutcome::Crashed(reason) => {
                tracing::warn!(
                    worker_id = self.worker_id,
                    attempt,
                    reason = %reason,
                    "worker crashed"
                );
                self.publish(EventKind::WorkerCrashed)
                    .attempt(attempt)
                    .error(reason)
                    .send();
            }
        }
    }
}

/// Earliest of: stage timeout, next signal emission, heartbeat check.
fn next_deadline(
    config: &Config,
    stage: &Option<StageState>,
    last_heartbeat_at: Instant,
    starts_cold: bool,
) -> Option<Instant> {
    let mut deadline: Option<Instant> = None;
    let mut consider = |at: Instant| {
        deadline = Some(match deadline {
            Some(d) if d <= at => d,
            _ => at,
        });
    };

    if let Some(st) = stage {
        let timeout = match st.stage {
            KillStage::Graceful => config.worker_graceful_kill_timeout,
            KillStage::Immediate => config.worker_immediate_kill_timeout,
            KillStage::Forced => None,
        };
        if let Some(t) = timeout {
            consider(st.entered_at + t);
        }
        if let Some(at) = st.next_signal_at {
            consider(at);
        }
    }

    if starts_cold && stage.as_ref().is_none_or(|st| st.stage < KillStage::Immediate) {
        consider(last_heartbeat_at + config.worker_heartbeat_timeout);
    }

    deadline
}

async fn recv_or_pending(
    rx: &mut mpsc::UnboundedReceiver<MonitorCommand>,
    closed: bool,
) -> Option<MonitorCommand> {
    if closed {
        std::future::pending().await
    } else {
        rx.recv().await
    }
}

async fn beats_or_pending(
    reader: &mut Option<super::backend::HeartbeatReader>,
    open: bool,
) -> std::io::Result<bool> {
    #[cfg(unix)]
    if open {
        if let Some(r) = reader {
            return r.recv_beats().await;
        }
    }
    let _ = (reader, open);
    std::future::pending().await
}

async fn sleep_or_pending(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at.into()).await,
        None => std::future::pending().await,
    }
}

/// Small builder so event publishing stays on one line at call sites.
struct EventSink<'a> {
    bus: &'a Bus,
    event: Event,
}

impl EventSink<'_> {
    fn attempt(mut self, n: u64) -> Self {
        self.event = self.event.with_attempt(n);
        self
    }

    fn delay(mut self, d: Duration) -> Self {
        self.event = self.event.with_delay(d);
        self
    }

    fn stage(mut self, stage: KillStage) -> Self {
        self.event = self.event.with_stage(stage);
        self
    }

    fn error(mut self, msg: impl Into<String>) -> Self {
        self.event = self.event.with_error(msg);
        self
    }

    fn send(self) {
        self.bus.publish(self.event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_picks_the_earliest_candidate() {
        let mut config = Config::default();
        config.worker_heartbeat_timeout = Duration::from_secs(5);
        config.worker_graceful_kill_timeout = Some(Duration::from_secs(60));

        let now = Instant::now();
        let stage = Some(StageState {
            stage: KillStage::Graceful,
            entered_at: now,
            next_signal_at: Some(now + Duration::from_secs(15)),
            sent: 1,
        });

        let deadline = next_deadline(&config, &stage, now, true).unwrap();
        assert_eq!(deadline, now + Duration::from_secs(5));
    }

    #[test]
    fn deadline_absent_when_nothing_is_scheduled() {
        let config = Config::default();
        assert!(next_deadline(&config, &None, Instant::now(), false).is_none());
    }

    #[test]
    fn heartbeat_check_stops_at_immediate_stage() {
        let mut config = Config::default();
        config.worker_heartbeat_timeout = Duration::from_secs(5);
        config.worker_immediate_kill_timeout = None;

        let now = Instant::now();
        let stage = Some(StageState {
            stage: KillStage::Immediate,
            entered_at: now,
            next_signal_at: None,
            sent: 1,
        });
        assert!(next_deadline(&config, &stage, now, true).is_none());
    }
}
