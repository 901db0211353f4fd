//! # workvisor
//!
//! **Workvisor** is a supervision core for long-running daemons whose work is
//! carried out by a pool of workers.
//!
//! User code supplies the worker logic (a `run` routine plus a cooperative
//! `stop`); the crate supplies everything that turns it into a production
//! daemon: restart on crash, heartbeat-based stall detection, staged
//! graceful → immediate → forced termination, live restart without downtime,
//! and dynamic reconfiguration.
//!
//! ## Features
//!
//! | Area            | Description                                                   | Key types / traits                  |
//! |-----------------|---------------------------------------------------------------|-------------------------------------|
//! | **Worker API**  | Define worker logic with optional lifecycle hooks.            | [`Worker`], [`WorkerContext`]       |
//! | **Pool**        | Per-slot monitors: spawn, heartbeat, staged kill, respawn.    | [`WorkerState`], [`StartPacing`]    |
//! | **Server**      | Owns the pool, multiplexes signals into worker transitions.   | [`ServerHooks`]                     |
//! | **Supervisor**  | Keeps one server alive; restart and live-restart (detach).    | [`Daemon`], [`Config`]              |
//! | **Control**     | Signal queue and programmatic control channel.                | [`Control`], [`ControlEvent`]       |
//! | **Observer API**| Hook into lifecycle events (logging, metrics, custom).        | [`Subscribe`], [`Event`]            |
//! | **Errors**      | Typed errors for the runtime and for worker executions.       | [`RuntimeError`], [`WorkerError`]   |
//!
//! ## Architecture
//! ```text
//! Daemon ──► Supervisor ──► Server (generation) ──► WorkerMonitor × N
//!    │            │              │                       │
//!    │            │              │                       ├──► worker backend
//!    │            │              │                       │    (embedded / thread / process)
//!    │            │              │                       └──► heartbeat channel
//!    │            │              └──► publishes events to Bus
//!    │            └──► command channel, restart pacing, detach protocol
//!    └──► signal queue, pid file, subscriber fan-out
//! ```
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use workvisor::{Config, Daemon, Worker, WorkerContext, WorkerError};
//!
//! struct Ticker;
//!
//! #[async_trait::async_trait]
//! impl Worker for Ticker {
//!     async fn run(&self, ctx: WorkerContext) -> Result<(), WorkerError> {
//!         while !ctx.stop_requested() {
//!             ctx.heartbeat();
//!             // one unit of work, then nap until the next round or until a
//!             // stop is requested, whichever comes first.
//!             ctx.wait_for_stop(Some(std::time::Duration::from_millis(250))).await;
//!         }
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let mut config = Config::default();
//!     config.workers = 4;
//!
//!     let daemon = Daemon::builder()
//!         .with_config(config)
//!         .with_worker(Arc::new(Ticker))
//!         .build();
//!
//!     std::process::exit(daemon.run().await);
//! }
//! ```
//!
//! ---

mod config;
mod daemon;
mod dump;
mod error;
mod events;
mod flag;
mod heartbeat;
mod hooks;
mod pacing;
mod process_env;
mod server;
mod signals;
mod subscribers;
mod supervisor;
mod tracker;
mod worker;

// ---- Public re-exports ----

pub use config::{Config, ConfigLoader, LogLevel, WorkerType};
pub use daemon::{Daemon, DaemonBuilder};
pub use dump::{DumpSink, SigdumpFile};
pub use error::{RuntimeError, WorkerError};
pub use events::{Bus, Event, EventKind, KillStage};
pub use flag::BlockingFlag;
pub use hooks::{ServerHandle, ServerHooks, Worker, WorkerContext};
pub use pacing::StartPacing;
pub use signals::{Control, ControlEvent};
pub use subscribers::{LogWriter, Subscribe};
pub use tracker::PoolTracker;
pub use worker::WorkerState;

#[cfg(unix)]
pub use worker::child::maybe_run_worker;
