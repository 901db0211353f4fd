//! # Daemon: the front door.
//!
//! [`Daemon`] wires the pieces together: it runs the loader, validates the
//! snapshot, acquires the process environment (pid file), installs the OS
//! signal listener, starts the subscriber fan-out, and then runs either the
//! supervisor (when `supervisor = true`) or a bare server.
//!
//! `run` resolves to the process exit code: `0` on clean shutdown,
//! `daemonize_error_exit_code` when the startup environment could not be
//! established, the server's last exit status otherwise. The pid file is
//! removed on the clean path only.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::{Config, ConfigLoader, FixedConfig};
use crate::dump::{DumpSink, SigdumpFile};
use crate::events::Bus;
use crate::hooks::{run_hook, NoServerHooks, ServerHooks, Worker};
use crate::process_env::ProcessEnv;
use crate::server::{Server, ServerOutcome};
use crate::signals::{spawn_os_listener, Control, SignalOptions, SignalQueue};
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::supervisor::Supervisor;
use crate::tracker::PoolTracker;

/// Fluent construction for [`Daemon`].
pub struct DaemonBuilder {
    loader: Arc<dyn ConfigLoader>,
    worker: Option<Arc<dyn Worker>>,
    hooks: Arc<dyn ServerHooks>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    dump: Arc<dyn DumpSink>,
    bus_capacity: usize,
}

impl DaemonBuilder {
    fn new() -> Self {
        Self {
            loader: Arc::new(FixedConfig(Config::default())),
            worker: None,
            hooks: Arc::new(NoServerHooks),
            subscribers: Vec::new(),
            dump: Arc::new(SigdumpFile),
            bus_capacity: 1024,
        }
    }

    /// Uses a fixed configuration snapshot; reload re-installs the same
    /// values.
    pub fn with_config(mut self, config: Config) -> Self {
        self.loader = Arc::new(FixedConfig(config));
        self
    }

    /// Uses a loader invoked at startup and on every reload.
    pub fn with_loader<L: ConfigLoader>(mut self, loader: L) -> Self {
        self.loader = Arc::new(loader);
        self
    }

    /// The worker logic (required).
    pub fn with_worker(mut self, worker: Arc<dyn Worker>) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Optional server-level hooks.
    pub fn with_server_hooks(mut self, hooks: Arc<dyn ServerHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Adds one event subscriber.
    pub fn with_subscriber(mut self, subscriber: Arc<dyn Subscribe>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    /// Overrides the status-dump destination.
    pub fn with_dump_sink(mut self, dump: Arc<dyn DumpSink>) -> Self {
        self.dump = dump;
        self
    }

    /// Event bus ring-buffer capacity (clamped to ≥ 1).
    pub fn with_bus_capacity(mut self, capacity: usize) -> Self {
        self.bus_capacity = capacity;
        self
    }

    pub fn build(self) -> Daemon {
        Daemon {
            loader: self.loader,
            worker: self.worker,
            hooks: self.hooks,
            subscribers: self.subscribers,
            dump: self.dump,
            queue: SignalQueue::new(),
            bus: Bus::new(self.bus_capacity),
            tracker: Arc::new(PoolTracker::new()),
        }
    }
}

/// A configured daemon, ready to run.
pub struct Daemon {
    loader: Arc<dyn ConfigLoader>,
    worker: Option<Arc<dyn Worker>>,
    hooks: Arc<dyn ServerHooks>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    dump: Arc<dyn DumpSink>,
    queue: Arc<SignalQueue>,
    bus: Bus,
    tracker: Arc<PoolTracker>,
}

impl Daemon {
    pub fn builder() -> DaemonBuilder {
        DaemonBuilder::new()
    }

    /// Handle for injecting control events programmatically; composes with
    /// OS signals.
    pub fn control(&self) -> Control {
        Control::new(Arc::clone(&self.queue))
    }

    /// The state mirror backing status dumps; handy for health endpoints
    /// and tests.
    pub fn tracker(&self) -> Arc<PoolTracker> {
        Arc::clone(&self.tracker)
    }

    /// Runs the daemon to completion and returns the process exit code.
    pub async fn run(self) -> i32 {
        let Daemon {
            loader,
            worker,
            hooks,
            subscribers,
            dump,
            queue,
            bus,
            tracker,
        } = self;

        let worker = match worker {
            Some(worker) => worker,
            None => {
                tracing::error!("no worker configured");
                return 1;
            }
        };

        run_hook("server.initialize", hooks.initialize()).await;

        let config = match loader.load().and_then(|c| {
            c.validate()?;
            Ok(c)
        }) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "configuration failed");
                return 1;
            }
        };
        if config.daemonize {
            // Fork-detach-setsid belongs to the embedding environment (an
            // init system or an external wrapper).
            tracing::info!("daemonize requested; detaching is delegated to the embedder");
        }

        let env = match ProcessEnv::acquire(&config) {
            Ok(env) => env,
            Err(e) => {
                tracing::error!(error = %e, "startup environment failed");
                return config.daemonize_error_exit_code;
            }
        };

        let listener = spawn_subscriber_listener(&bus, subscribers, Arc::clone(&tracker));
        spawn_os_listener(
            Arc::clone(&queue),
            SignalOptions {
                enable_detach: config.supervisor && config.enable_detach,
            },
        );

        let config = Arc::new(config);
        let code = if config.supervisor {
            Supervisor::new(
                worker,
                hooks,
                loader,
                bus.clone(),
                Arc::clone(&tracker),
                dump,
                Arc::clone(&queue),
                Arc::clone(&config),
            )
            .run()
            .await
        } else {
            run_standalone(
                worker, hooks, loader, &bus, tracker, dump, queue, config,
            )
            .await
        };

        if code == 0 {
            env.release();
        } else {
            env.abandon();
        }

        // Close our bus handle so the listener drains and the subscribers
        // observe every event before the exit code is returned.
        drop(bus);
        let _ = listener.await;
        code
    }
}

/// Standalone loop for `supervisor = false`: one server at a time,
/// restarted only when it asks for it.
#[allow(clippy::too_many_arguments)]
async fn run_standalone(
    worker: Arc<dyn Worker>,
    hooks: Arc<dyn ServerHooks>,
    loader: Arc<dyn ConfigLoader>,
    bus: &Bus,
    tracker: Arc<PoolTracker>,
    dump: Arc<dyn DumpSink>,
    queue: Arc<SignalQueue>,
    mut config: Arc<Config>,
) -> i32 {
    let mut last_start: Option<tokio::time::Instant> = None;

    loop {
        if let Some(at) = last_start {
            tokio::time::sleep_until(at + config.server_restart_wait).await;
        }
        last_start = Some(tokio::time::Instant::now());

        let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();
        let pump = {
            let queue = Arc::clone(&queue);
            let ctrl_tx = ctrl_tx.clone();
            tokio::spawn(async move {
                loop {
                    let ev = queue.recv().await;
                    if ctrl_tx.send(ev).is_err() {
                        break;
                    }
                }
            })
        };

        let server = Server::new(
            Arc::clone(&worker),
            Arc::clone(&hooks),
            Arc::clone(&loader),
            bus.clone(),
            Arc::clone(&tracker),
            Arc::clone(&dump),
            Arc::clone(&config),
            ctrl_tx,
            ctrl_rx,
        );
        let outcome = server.run().await;
        pump.abort();

        match outcome {
            ServerOutcome::Stop(code) => return code,
            ServerOutcome::Restart => {
                // The next generation re-reads the source wholesale.
                match loader.load().and_then(|c| {
                    c.validate()?;
                    Ok(c)
                }) {
                    Ok(fresh) => config = Arc::new(fresh),
                    Err(e) => {
                        tracing::warn!(error = %e, "configuration re-read failed, reusing previous");
                    }
                }
            }
        }
    }
}

/// One listener per daemon: folds events into the tracker, then fans out
/// to the subscribers.
fn spawn_subscriber_listener(
    bus: &Bus,
    subscribers: Vec<Arc<dyn Subscribe>>,
    tracker: Arc<PoolTracker>,
) -> tokio::task::JoinHandle<()> {
    let mut rx = bus.subscribe();
    let set = SubscriberSet::new(subscribers);

    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ev) => {
                    let ev = Arc::new(ev);
                    tracker.update(&ev).await;
                    set.emit_arc(ev);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            }
        }
        set.shutdown().await;
    })
}
