//! Retry backoff policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Exponential backoff with a ceiling and uniform jitter.
///
/// The deterministic part (`delay_for_retry`) is separate from the jittered
/// part (`next_delay`) so it can be unit-tested against fixed retry counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Operation is abandoned once `retry_count >= max_retries`.
    pub max_retries: u32,
    /// Delay before the first retry (and the initial `next_retry_at` offset).
    pub initial_delay: Duration,
    /// Ceiling for the exponential growth.
    pub max_delay: Duration,
    /// Growth factor per retry.
    pub multiplier: f64,
    /// Upper bound of the uniform random jitter added to every delay.
    ///
    /// Jitter spreads out retries of operations that all failed at the same
    /// moment (e.g. a downstream outage) so they do not stampede back in
    /// lockstep.
    pub jitter_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
            jitter_max: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Policy with jitter disabled, for deterministic tests.
    pub fn without_jitter(mut self) -> Self {
        self.jitter_max = Duration::ZERO;
        self
    }

    /// Deterministic delay for a given retry count (1-indexed: the first
    /// retry is `retry_count = 1`).
    ///
    /// `min(max_delay, initial_delay * multiplier^(retry_count - 1))`,
    /// with `retry_count = 0` treated as the initial scheduling delay.
    pub fn delay_for_retry(&self, retry_count: u32) -> Duration {
        if retry_count <= 1 {
            return self.initial_delay.min(self.max_delay);
        }

        let base_ms = self.initial_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let delay_ms = (base_ms * self.multiplier.powi((retry_count - 1) as i32)).min(max_ms);

        Duration::from_millis(delay_ms as u64)
    }

    /// Jittered delay: `delay_for_retry + uniform(0, jitter_max)`.
    pub fn next_delay(&self, retry_count: u32) -> Duration {
        let base = self.delay_for_retry(retry_count);
        let jitter_ms = self.jitter_max.as_millis() as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }

    /// Absolute next-eligible time for a given retry count.
    pub fn next_retry_at(&self, retry_count: u32) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::from_std(self.next_delay(retry_count)).unwrap_or_default()
    }

    /// Whether another attempt is allowed after `retry_count` failures.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }
}
