//! Per-key exponential failure backoff

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

/// Exponential backoff keyed by consecutive failures: `base * 2^failures`,
/// capped at `max`.
#[derive(Debug)]
pub struct ExponentialFailureRateLimiter {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<String, u32>>,
}

impl ExponentialFailureRateLimiter {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Delay before the next retry of `key`; records one more failure.
    pub fn when(&self, key: &str) -> Duration {
        let mut failures = self.failures.lock();
        let count = failures.entry(key.to_string()).or_insert(0);
        let exp = *count;
        *count = count.saturating_add(1);

        // 2^31 * base already overflows any sane cap
        if exp >= 31 {
            return self.max;
        }
        self.base
            .checked_mul(1u32 << exp)
            .map(|d| d.min(self.max))
            .unwrap_or(self.max)
    }

    /// Number of failures recorded for `key`
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.failures.lock().get(key).copied().unwrap_or(0)
    }

    /// Clear retry history for `key`
    pub fn forget(&self, key: &str) {
        self.failures.lock().remove(key);
    }
}
