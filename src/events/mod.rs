//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to lifecycle events emitted by the supervisor, the
//! server, the worker monitors and the subscriber workers.
//!
//! ## Contents
//! - [`EventKind`], [`Event`], [`KillStage`] event classification and payload
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Supervisor`, `Server`, `WorkerMonitor`.
//! - **Consumers**: the daemon's subscriber listener (fans out to
//!   `SubscriberSet` and updates `PoolTracker`).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind, KillStage};
