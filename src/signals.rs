//! # Signal queue: turns asynchronous OS signals into ordered control events.
//!
//! Process signals are asynchronous and unsafe to act on deeply; this module
//! translates them into normal messages. The OS listener only enqueues a
//! symbolic [`ControlEvent`]; the owning loop (supervisor or server) dequeues
//! at well-defined points between state transitions.
//!
//! ## Rules
//! - The queue **coalesces** identical pending events: at most one of each
//!   kind is pending at a time.
//! - Events are totally ordered by first-enqueue time.
//! - Signal → event mapping:
//!
//! | Signal | Event                                     |
//! |--------|-------------------------------------------|
//! | TERM   | `GracefulStop`                            |
//! | QUIT   | `ImmediateStop`                           |
//! | USR1   | `GracefulRestart`                         |
//! | HUP    | `ImmediateRestart`                        |
//! | USR2   | `Reload`                                  |
//! | INT    | `Detach` when detach is enabled, else `GracefulStop` |
//! | CONT   | `Dump`                                    |
//!
//! On non-Unix platforms only ctrl-c is handled (→ `GracefulStop`).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Symbolic control events consumed by the supervisor and server loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Stop the pool cooperatively and exit.
    GracefulStop,
    /// Stop the pool with OS termination signals and exit.
    ImmediateStop,
    /// Restart workers cooperatively (or the whole server, per configuration).
    GracefulRestart,
    /// Restart workers with OS termination signals.
    ImmediateRestart,
    /// Re-run the configuration loader and install a fresh snapshot.
    Reload,
    /// Live restart: spawn a replacement server while the old one drains.
    Detach,
    /// Write a status dump.
    Dump,
}

impl ControlEvent {
    /// Returns a short stable label (snake_case).
    pub fn as_label(&self) -> &'static str {
        match self {
            ControlEvent::GracefulStop => "graceful_stop",
            ControlEvent::ImmediateStop => "immediate_stop",
            ControlEvent::GracefulRestart => "graceful_restart",
            ControlEvent::ImmediateRestart => "immediate_restart",
            ControlEvent::Reload => "reload",
            ControlEvent::Detach => "detach",
            ControlEvent::Dump => "dump",
        }
    }
}

/// Reverse of the listener map: the OS signal that carries `ev` to a
/// sibling process of this daemon family.
#[cfg(unix)]
pub(crate) fn os_signal_for(ev: ControlEvent) -> nix::sys::signal::Signal {
    use nix::sys::signal::Signal;
    match ev {
        ControlEvent::GracefulStop => Signal::SIGTERM,
        ControlEvent::ImmediateStop => Signal::SIGQUIT,
        ControlEvent::GracefulRestart => Signal::SIGUSR1,
        ControlEvent::ImmediateRestart => Signal::SIGHUP,
        ControlEvent::Reload => Signal::SIGUSR2,
        ControlEvent::Detach => Signal::SIGINT,
        ControlEvent::Dump => Signal::SIGCONT,
    }
}

/// Ordered, coalescing queue of [`ControlEvent`]s.
///
/// `push` is cheap and non-blocking (callable from signal listener tasks);
/// `recv` is awaited by the owning loop between transitions.
pub(crate) struct SignalQueue {
    pending: Mutex<VecDeque<ControlEvent>>,
    notify: Notify,
}

impl SignalQueue {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        })
    }

    /// Enqueues an event unless one of the same kind is already pending.
    pub(crate) fn push(&self, ev: ControlEvent) {
        {
            let mut q = self.pending.lock().expect("signal queue poisoned");
            if q.contains(&ev) {
                return;
            }
            q.push_back(ev);
        }
        self.notify.notify_one();
    }

    /// Pops the oldest pending event without waiting.
    pub(crate) fn try_recv(&self) -> Option<ControlEvent> {
        self.pending.lock().expect("signal queue poisoned").pop_front()
    }

    /// Waits for and pops the oldest pending event.
    pub(crate) async fn recv(&self) -> ControlEvent {
        loop {
            if let Some(ev) = self.try_recv() {
                return ev;
            }
            self.notify.notified().await;
        }
    }
}

/// Cloneable handle for injecting control events programmatically.
///
/// This is the same channel OS signals feed into, so programmatic control and
/// signal-driven control compose: events coalesce and are consumed in order.
#[derive(Clone)]
pub struct Control {
    queue: Arc<SignalQueue>,
}

impl Control {
    pub(crate) fn new(queue: Arc<SignalQueue>) -> Self {
        Self { queue }
    }

    /// Enqueues a control event, coalescing with any pending event of the
    /// same kind.
    pub fn send(&self, ev: ControlEvent) {
        self.queue.push(ev);
    }
}

/// Listener options derived from the configuration.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SignalOptions {
    /// Map INT to `Detach` instead of `GracefulStop`.
    pub enable_detach: bool,
}

/// Spawns the OS signal listener feeding `queue`.
///
/// The listener task runs until the process exits; handlers do nothing but
/// enqueue. Installation failures are reported once at error level and leave
/// the process without OS signal control (programmatic [`Control`] still
/// works).
pub(crate) fn spawn_os_listener(queue: Arc<SignalQueue>, opts: SignalOptions) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = listen(queue, opts).await {
            tracing::error!(error = %e, "installing signal listeners failed");
        }
    })
}

#[cfg(unix)]
async fn listen(queue: Arc<SignalQueue>, opts: SignalOptions) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;
    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut usr2 = signal(SignalKind::user_defined2())?;
    let mut hup = signal(SignalKind::hangup())?;
    let mut int = signal(SignalKind::interrupt())?;
    let mut cont = signal(SignalKind::from_raw(nix::libc::SIGCONT))?;

    loop {
        let ev = tokio::select! {
            _ = term.recv() => ControlEvent::GracefulStop,
            _ = quit.recv() => ControlEvent::ImmediateStop,
            _ = usr1.recv() => ControlEvent::GracefulRestart,
            _ = hup.recv() => ControlEvent::ImmediateRestart,
            _ = usr2.recv() => ControlEvent::Reload,
            _ = int.recv() => {
                if opts.enable_detach {
                    ControlEvent::Detach
                } else {
                    ControlEvent::GracefulStop
                }
            }
            _ = cont.recv() => ControlEvent::Dump,
        };
        tracing::debug!(event = ev.as_label(), "signal received");
        queue.push(ev);
    }
}

#[cfg(not(unix))]
async fn listen(queue: Arc<SignalQueue>, _opts: SignalOptions) -> std::io::Result<()> {
    loop {
        tokio::signal::ctrl_c().await?;
        queue.push(ControlEvent::GracefulStop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn coalesces_identical_pending_events() {
        let queue = SignalQueue::new();
        queue.push(ControlEvent::Reload);
        queue.push(ControlEvent::Reload);
        queue.push(ControlEvent::GracefulStop);

        assert_eq!(queue.try_recv(), Some(ControlEvent::Reload));
        assert_eq!(queue.try_recv(), Some(ControlEvent::GracefulStop));
        assert_eq!(queue.try_recv(), None);
    }

    #[tokio::test]
    async fn preserves_first_enqueue_order() {
        let queue = SignalQueue::new();
        queue.push(ControlEvent::GracefulRestart);
        queue.push(ControlEvent::Dump);
        queue.push(ControlEvent::GracefulRestart);

        assert_eq!(queue.recv().await, ControlEvent::GracefulRestart);
        assert_eq!(queue.recv().await, ControlEvent::Dump);
    }

    #[tokio::test]
    async fn recv_wakes_on_push() {
        let queue = SignalQueue::new();
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.recv().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        queue.push(ControlEvent::Dump);
        assert_eq!(waiter.await.unwrap(), ControlEvent::Dump);
    }
}
