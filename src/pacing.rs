//! # Start pacing for worker respawns.
//!
//! [`StartPacing`] controls how quickly finished worker slots may be started
//! again. It is parameterized by:
//! - [`StartPacing::delay`] the base delay between a slot finishing and its
//!   next start;
//! - [`StartPacing::rand`] the relative jitter spread applied to the base
//!   delay to prevent whole-pool restart stampedes.
//!
//! The delay for one respawn is `delay × (1 ± r)` with `r` drawn uniformly
//! from `[0, rand]`.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use workvisor::StartPacing;
//!
//! let pacing = StartPacing {
//!     delay: Duration::from_secs(2),
//!     rand: 0.0,
//! };
//!
//! // With no jitter the schedule is deterministic.
//! assert_eq!(pacing.next_delay(), Duration::from_secs(2));
//! ```

use std::time::Duration;

use rand::Rng;

/// Respawn pacing policy.
///
/// A zero [`delay`](Self::delay) disables pacing entirely: slots restart as
/// soon as they are reaped.
#[derive(Clone, Copy, Debug)]
pub struct StartPacing {
    /// Base delay before a finished slot is started again.
    pub delay: Duration,
    /// Relative jitter spread in `[0.0, 1.0]` applied to `delay`.
    pub rand: f64,
}

impl Default for StartPacing {
    /// Returns a policy with:
    /// - `delay = 0` (immediate respawn);
    /// - `rand = 0.2`.
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            rand: 0.2,
        }
    }
}

impl StartPacing {
    /// Computes the delay to apply before the next start.
    ///
    /// - `delay == 0` always yields zero, regardless of jitter.
    /// - `rand == 0` yields exactly `delay` (deterministic schedule).
    /// - Otherwise the result is `delay × (1 ± r)` with `r` uniform in
    ///   `[0, rand]`, clamped so the factor never goes negative.
    pub fn next_delay(&self) -> Duration {
        if self.delay.is_zero() {
            return Duration::ZERO;
        }
        let spread = self.rand.clamp(0.0, 1.0);
        if spread == 0.0 {
            return self.delay;
        }
        let mut rng = rand::rng();
        let factor = 1.0 + rng.random_range(-spread..=spread);
        self.delay.mul_f64(factor.max(0.0))
    }
}
