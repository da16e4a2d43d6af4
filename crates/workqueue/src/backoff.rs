//! # Exponential Backoff
//!
//! Provides the exponential backoff used when a work item is re-queued after a
//! failed reconciliation.
//!
//! Each consecutive failure doubles the delay until the cap is reached.
//! Controller defaults: 5ms, 10ms, 20ms, 40ms, ... 1000s (max).

use std::time::Duration;

/// Base delay for the first retry of a failed item.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);

/// Upper bound for the delay between retries of a failed item.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);

/// Exponential backoff calculator
///
/// Maps a number of consecutive failures to a retry delay:
/// `base * 2^failures`, capped at `max`. The calculator itself is stateless;
/// failure counts are tracked by the caller (see
/// [`ItemExponentialFailureRateLimiter`](crate::ItemExponentialFailureRateLimiter)).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    /// Delay returned for the first failure
    base: Duration,
    /// Maximum delay
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with the given base and maximum delay
    ///
    /// A `base` larger than `max` is clamped to `max`.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base: base.min(max),
            max,
        }
    }

    /// Delay returned for the first failure
    #[must_use]
    pub fn base(&self) -> Duration {
        self.base
    }

    /// Maximum delay
    #[must_use]
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Calculate the delay for a given number of previous failures
    ///
    /// `failures` is 0-indexed: the first retry uses `failures == 0` and gets
    /// `base`. The result never decreases as `failures` grows and never
    /// exceeds `max`.
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Duration {
        // 2^32 and beyond saturates long before the cap matters
        let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}
