//! Reconnect delay with multiplicative jitter.
//!
//! Every failure multiplies the delay by a random factor in
//! `[1.5, 2.0)` and clamps it to the configured maximum. A successful
//! login resets it to the initial value.

// ============================================================================
// Imports
// ============================================================================

use std::ops::Range;
use std::time::Duration;

use rand::Rng;

// ============================================================================
// Constants
// ============================================================================

/// Delay before the first growth step.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(1000);

/// Upper bound on the reconnect delay.
pub const MAX_BACKOFF: Duration = Duration::from_millis(10_000);

/// Range the per-failure growth factor is drawn from.
pub const GROWTH_FACTOR: Range<f64> = 1.5..2.0;

// ============================================================================
// Backoff
// ============================================================================

/// Reconnect delay state of one transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    current: Duration,
    initial: Duration,
    max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(INITIAL_BACKOFF, MAX_BACKOFF)
    }
}

impl Backoff {
    /// Creates a backoff starting at `initial`, never exceeding `max`.
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial,
            initial,
            max: max.max(initial),
        }
    }

    /// Returns the current delay.
    #[inline]
    #[must_use]
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Grows the delay by a random factor and returns it.
    pub fn advance(&mut self) -> Duration {
        let factor = rand::rng().random_range(GROWTH_FACTOR);
        self.advance_by(factor)
    }

    /// Grows the delay by `factor` and returns it.
    pub fn advance_by(&mut self, factor: f64) -> Duration {
        self.current = self.current.mul_f64(factor).min(self.max);
        self.current
    }

    /// Returns to the initial delay.
    #[inline]
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

// ============================================================================
// Tests
// ============================================================================
