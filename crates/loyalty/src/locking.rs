//! Bounded lock acquisition for the ledger and campaign critical sections.

use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use rewards_core::config::EngineConfig;
use rewards_core::{RewardsError, RewardsResult};
use tracing::debug;

/// How long to wait for a row lock and how often to retry before giving up
/// with a transient `Contention` error.
#[derive(Debug, Clone)]
pub struct LockPolicy {
    timeout: Duration,
    max_retries: u32,
    backoff: Duration,
}

impl LockPolicy {
    pub fn new(timeout: Duration, max_retries: u32, backoff: Duration) -> Self {
        Self {
            timeout,
            max_retries,
            backoff,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            Duration::from_millis(config.lock_timeout_ms),
            config.max_lock_retries,
            Duration::from_millis(config.retry_backoff_ms),
        )
    }

    pub fn acquire<'a, T>(
        &self,
        mutex: &'a Mutex<T>,
        resource: &str,
    ) -> RewardsResult<MutexGuard<'a, T>> {
        let attempts = self.max_retries + 1;
        for attempt in 1..=attempts {
            if let Some(guard) = mutex.try_lock_for(self.timeout) {
                return Ok(guard);
            }
            metrics::counter!("rewards.lock_contention").increment(1);
            debug!(resource = resource, attempt = attempt, "Lock contention");
            if attempt < attempts {
                std::thread::sleep(self.backoff * attempt);
            }
        }
        Err(RewardsError::Contention {
            resource: resource.to_string(),
            attempts,
        })
    }
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}
