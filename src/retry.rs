//! Shared retry policy for external call sites.
//!
//! One policy value is injected into both the AI completion loop and the
//! orchestrator's fetch retry, so backoff behavior is uniform and testable
//! in one place.
//!
//! The delay between attempts follows:
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
//! ```

use std::time::Duration;

use rand::{rng, Rng};

const JITTER_MAX_MS: u64 = 250;

/// Exponential backoff parameters shared by all external call sites.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles with each retry.
    pub base_delay: Duration,
    /// Cap applied before jitter.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Self::default()
        }
    }

    /// Deterministic part of the delay after the given failed attempt
    /// (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1 << shift);
        delay.min(self.max_delay)
    }

    /// Backoff delay plus jitter, ready to sleep on.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter = Duration::from_millis(rng().random_range(0..=JITTER_MAX_MS));
        self.backoff_delay(attempt) + jitter
    }
}
