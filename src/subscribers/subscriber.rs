//! # Event subscriber trait.
//!
//! [`Subscribe`] is the extension point for plugging custom event handlers
//! into the daemon: logging, metrics, alerting, state mirrors.
//!
//! Each subscriber gets:
//! - **Dedicated worker task** (runs independently)
//! - **Bounded queue** (capacity via [`Subscribe::queue_capacity`])
//! - **Panic isolation** (panics caught, reported as `SubscriberPanicked`)
//!
//! ## Rules
//! - Slow subscribers only affect themselves (queue overflow → event drop)
//! - Panics do not crash the daemon or other subscribers
//! - Subscribers never block publishers

use async_trait::async_trait;

use crate::events::Event;

/// Event subscriber for daemon observability.
///
/// ### Implementation notes
/// - Use async I/O; handle errors internally, do not panic.
/// - Events arrive in per-subscriber FIFO order.
/// - Processing happens on a dedicated worker task, never in the
///   supervision loops.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Processes a single event.
    async fn on_event(&self, event: &Event);

    /// Returns the subscriber name for diagnostics.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Returns the preferred queue capacity for this subscriber.
    ///
    /// When the queue is full, new events are dropped for this subscriber
    /// only and a warning is logged.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
