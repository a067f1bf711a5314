use crate::error::{CacheError, Result};
use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::resilience::health::HealthCheckConfig;
use crate::resilience::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the resilience layer wrapping every store call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryPolicy,
    pub health: HealthCheckConfig,

    /// Timeout applied to each attempt of a guarded call
    pub operation_timeout: Duration,

    /// Reject calls without I/O while the health probe reports the store unhealthy
    pub fail_fast_when_unhealthy: bool,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
            health: HealthCheckConfig::default(),
            operation_timeout: Duration::from_secs(5),
            fail_fast_when_unhealthy: true,
        }
    }
}

impl ResilienceConfig {
    /// Tight settings for tests and latency-sensitive callers
    pub fn fast_fail() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 3,
                recovery_timeout: Duration::from_secs(5),
                failure_window: Duration::from_secs(30),
            },
            retry: RetryPolicy::exponential(1, Duration::from_millis(20)),
            operation_timeout: Duration::from_millis(500),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.circuit_breaker.validate().map_err(CacheError::Config)?;

        if self.retry.base_delay > self.retry.max_delay {
            return Err(CacheError::Config(
                "retry base_delay must not exceed max_delay".to_string(),
            ));
        }

        if self.health.enabled {
            if self.health.interval.is_zero() {
                return Err(CacheError::Config(
                    "health check interval must be greater than 0".to_string(),
                ));
            }
            if self.health.unhealthy_threshold == 0 {
                return Err(CacheError::Config(
                    "unhealthy_threshold must be greater than 0".to_string(),
                ));
            }
        }

        if self.operation_timeout.is_zero() {
            return Err(CacheError::Config(
                "operation_timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
