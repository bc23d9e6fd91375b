use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

/// Exponential backoff schedule for webhook redelivery.
///
/// After `n` failed deliveries the next attempt waits `base_delay × 2^(n-1)`, capped at `max_delay`, plus a random
/// jitter in `[0, max_jitter]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_jitter: Duration,
    /// Total deliveries (including the first, immediate one) before an attempt is `Exhausted`
    pub max_attempts: i64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(3600),
            max_jitter: Duration::from_millis(500),
            max_attempts: 10,
        }
    }
}

impl BackoffPolicy {
    /// The delay without jitter after `failures` failed deliveries.
    pub fn delay_for(&self, failures: i64) -> Duration {
        let exponent = failures.saturating_sub(1).clamp(0, 31) as u32;
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }

    pub fn jittered_delay_for(&self, failures: i64) -> Duration {
        let delay = self.delay_for(failures);
        let max_jitter = self.max_jitter.as_millis() as u64;
        if max_jitter == 0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(0..=max_jitter);
        delay + Duration::from_millis(jitter)
    }

    pub fn next_retry_time(&self, now: DateTime<Utc>, failures: i64) -> DateTime<Utc> {
        let delay = self.jittered_delay_for(failures);
        now + chrono::Duration::milliseconds(delay.as_millis() as i64)
    }

    /// True if an attempt that has now failed `failures` times must not be retried again.
    pub fn is_exhausted(&self, failures: i64) -> bool {
        failures >= self.max_attempts
    }
}
