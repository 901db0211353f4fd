//! # Event subscribers: the observability extension point.
//!
//! Lifecycle events published on the [`Bus`](crate::events::Bus) are fanned
//! out to user-pluggable [`Subscribe`] implementations through a
//! [`SubscriberSet`]: one bounded queue and one worker task per subscriber,
//! so a slow observer never stalls the supervision loops.
//!
//! ```text
//! Monitors / Server / Supervisor ── publish ──► Bus
//!                                                │
//!                                 subscriber listener (one per daemon)
//!                                                │
//!                  ┌────────────┬────────────────┤
//!                  ▼            ▼                ▼
//!              [queue A]    [queue B]       PoolTracker
//!                  │            │          (internal state)
//!              LogWriter     custom
//! ```

mod log;
mod set;
mod subscriber;

pub use log::LogWriter;
pub(crate) use set::SubscriberSet;
pub use subscriber::Subscribe;
