//! Retry with fixed or exponential backoff

use crate::error::Result;
use crate::resilience::metrics::ResilienceMetrics;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff strategy variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Constant delay between attempts
    Fixed,
    /// `base_delay × 2^retry`, capped at `max_delay`
    ExponentialBackoff,
}

/// Retry policy. At most `max_retries + 1` attempts are made.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    pub strategy: RetryStrategy,
    /// Scale each delay by a random factor in [0.5, 1.5)
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            strategy: RetryStrategy::ExponentialBackoff,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Fixed-delay policy without jitter
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay: delay,
            max_delay: delay,
            strategy: RetryStrategy::Fixed,
            jitter: false,
        }
    }

    /// Exponential policy without jitter
    pub fn exponential(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            strategy: RetryStrategy::ExponentialBackoff,
            jitter: false,
            ..Default::default()
        }
    }

    /// Delay to wait before retry number `retry` (0-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = match self.strategy {
            RetryStrategy::Fixed => self.base_delay,
            RetryStrategy::ExponentialBackoff => {
                let factor = 2u32.saturating_pow(retry);
                self.base_delay.saturating_mul(factor)
            }
        };
        let capped = base.min(self.max_delay.max(self.base_delay));

        if self.jitter {
            capped.mul_f64(0.5 + rand::random::<f64>())
        } else {
            capped
        }
    }
}

/// Executes operations under a [`RetryPolicy`]
pub struct RetryHandler {
    policy: RetryPolicy,
    metrics: Arc<ResilienceMetrics>,
}

impl RetryHandler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_metrics(policy, Arc::new(ResilienceMetrics::new()))
    }

    pub fn with_metrics(policy: RetryPolicy, metrics: Arc<ResilienceMetrics>) -> Self {
        Self { policy, metrics }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invoke `op`, retrying retryable errors per policy.
    ///
    /// Non-retryable errors return immediately; after the last retry the
    /// final error is returned unchanged.
    pub async fn execute<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retry_count = 0;

        loop {
            match op().await {
                Ok(value) => {
                    if retry_count > 0 {
                        debug!("Operation succeeded after {} retries", retry_count);
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if retry_count >= self.policy.max_retries => {
                    warn!(
                        "Operation failed after {} attempts: {}",
                        retry_count + 1,
                        e
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.policy.delay_for(retry_count);
                    retry_count += 1;
                    self.metrics.record_retry();
                    warn!(
                        "Operation failed (attempt {}/{}), retrying after {:?}: {}",
                        retry_count,
                        self.policy.max_retries + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
