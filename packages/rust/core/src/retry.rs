//! Bounded retry with exponential backoff for capability calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use pencraft_shared::{Capability, PencraftError, Result, RetryConfig};

/// One policy object applied uniformly to every capability port.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random delay added to each backoff.
    pub jitter: Duration,
    /// Deadline for a single attempt.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// No waiting between attempts. Used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: Duration::ZERO,
            timeout: Duration::from_secs(30),
        }
    }

    /// Deterministic part of the delay before retry number `retries_used + 1`.
    pub fn backoff(&self, retries_used: u32) -> Duration {
        let base_ms = self.base_delay.as_millis();
        if base_ms == 0 {
            return Duration::ZERO;
        }
        let max_ms = self.max_delay.as_millis().max(base_ms);
        let multiplier = 1u128 << retries_used.min(20);
        let backoff_ms = base_ms.saturating_mul(multiplier).min(max_ms);
        Duration::from_millis(u64::try_from(backoff_ms).unwrap_or(u64::MAX))
    }

    fn jittered(&self, retries_used: u32) -> Duration {
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.backoff(retries_used) + Duration::from_millis(extra)
    }

    /// Run `op` under the per-attempt timeout, retrying retryable failures.
    ///
    /// A timeout is reported as [`PencraftError::Timeout`] for `capability`.
    /// Non-retryable errors are returned immediately.
    pub async fn run<T, F, Fut>(&self, capability: Capability, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries_used: u32 = 0;
        loop {
            let outcome = match tokio::time::timeout(self.timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(PencraftError::Timeout {
                    capability,
                    after: self.timeout,
                }),
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let attempts = retries_used.saturating_add(1);
            if !err.is_retryable() || attempts >= self.max_attempts {
                debug!(%capability, attempts, error = %err, "giving up");
                return Err(err);
            }

            let delay = self.jittered(retries_used);
            warn!(
                %capability,
                attempt = attempts,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "capability call failed, retrying"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            retries_used = attempts;
        }
    }
}
