//! Fault tolerance for store calls
//!
//! This module provides:
//! - A circuit breaker with a rolling failure window and single-trial half-open state
//! - Retry with fixed or exponential backoff
//! - A cancellable background health probe
//! - Shared success/latency/retry/trip metrics
//! - [`ResilienceGuard`], which composes the above, and [`ResilientStore`],
//!   which applies the guard to every [`Store`](crate::store::Store) call

pub mod circuit_breaker;
pub mod config;
pub mod guard;
pub mod health;
pub mod metrics;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use config::ResilienceConfig;
pub use guard::{GuardStats, ResilienceGuard, ResilientStore};
pub use health::{HealthCheckConfig, HealthChecker, HealthLevel, HealthStatus, ProbeResult};
pub use metrics::{MetricsSnapshot, ResilienceMetrics};
pub use retry::{RetryHandler, RetryPolicy, RetryStrategy};
