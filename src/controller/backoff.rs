//! Retry backoff for failed reconciliations

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::BackoffConfig;

use super::store_api::ObjectKey;

/// Largest exponent applied to the base delay
const MAX_DOUBLINGS: u32 = 6;

/// Exponential backoff: `base * 2^attempt`, capped at `max`
pub fn calculate_backoff(attempt: u32, config: &BackoffConfig) -> Duration {
    let delay_secs = config
        .base_secs
        .saturating_mul(2_u64.saturating_pow(attempt.min(MAX_DOUBLINGS)));
    Duration::from_secs(delay_secs.min(config.max_secs))
}

/// Consecutive failure counts per Store
///
/// Kept in memory only: after a restart every Store starts again from the
/// base delay, which is harmless.
#[derive(Debug, Default)]
pub struct RetryTracker {
    attempts: Mutex<HashMap<ObjectKey, u32>>,
}

impl RetryTracker {
    /// Record a failure and return the number of failures before it
    pub fn record_failure(&self, key: &ObjectKey) -> u32 {
        let mut attempts = self
            .attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let count = attempts.entry(key.clone()).or_insert(0);
        let previous = *count;
        *count = count.saturating_add(1);
        previous
    }

    pub fn reset(&self, key: &ObjectKey) {
        self.attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key);
    }

    pub fn attempts(&self, key: &ObjectKey) -> u32 {
        self.attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}
