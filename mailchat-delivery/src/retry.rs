//! Retry policy for queued items.
//!
//! Delays grow exponentially from `initial_retry`, doubling after every
//! failed attempt, until they reach `max_retry`:
//!
//! ```text
//! delay(n) = min(initial_retry * 2^(n - 1) * (1 + jitter), max_retry)
//! ```
//!
//! Jitter is only ever added, never subtracted, so successive delays keep
//! growing until the cap.

use std::time::{Duration, SystemTime};

use rand::Rng;

/// Retry configuration of a queue.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts made before an item is bounced, the first one included.
    pub max_tries: u32,

    /// Delay after the first failed attempt.
    pub initial_retry: Duration,

    /// Upper bound for any delay.
    pub max_retry: Duration,

    /// Fraction in `[0, 1)` of the delay added at random.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: defaults::max_tries(),
            initial_retry: defaults::initial_retry(),
            max_retry: defaults::max_retry(),
            jitter: defaults::jitter(),
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt may follow `attempts` failed ones.
    #[must_use]
    pub const fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_tries
    }

    #[must_use]
    pub const fn remaining_attempts(&self, attempts: u32) -> u32 {
        self.max_tries.saturating_sub(attempts)
    }

    /// Delay before the attempt following the `attempt`-th failure
    /// (1-indexed), without jitter.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        if exponent >= 32 {
            return self.max_retry;
        }

        self.initial_retry
            .saturating_mul(1u32 << exponent)
            .min(self.max_retry)
    }

    /// Delay before the attempt following the `attempt`-th failure, jitter
    /// included.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.backoff(attempt);
        if self.jitter <= 0.0 {
            return base;
        }

        let factor = rand::rng().random_range(0.0..self.jitter);
        base.mul_f64(1.0 + factor).min(self.max_retry)
    }

    /// When to retry an item whose `attempt`-th attempt failed at `now`.
    #[must_use]
    pub fn next_attempt_at(&self, now: SystemTime, attempt: u32) -> SystemTime {
        now + self.delay(attempt)
    }
}

pub(crate) mod defaults {
    use std::time::Duration;

    pub const fn max_tries() -> u32 {
        20
    }

    pub const fn initial_retry() -> Duration {
        Duration::from_secs(15 * 60)
    }

    pub const fn max_retry() -> Duration {
        Duration::from_secs(24 * 60 * 60)
    }

    pub const fn jitter() -> f64 {
        0.0
    }
}
