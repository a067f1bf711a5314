//! Latency and success counters for guarded store calls

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Point-in-time copy of the resilience counters.
///
/// Only raw counts are stored; rates and averages are derived on read so
/// they can never drift from the counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Logical operations executed through the guard
    pub total_operations: u64,

    /// Operations that returned success
    pub successful_operations: u64,

    /// Operations that returned an error (including fail-fast rejections)
    pub failed_operations: u64,

    /// Cumulative latency of successful operations, in milliseconds
    pub total_latency_ms: f64,

    /// Closed/HalfOpen → Open transitions
    pub circuit_breaker_trips: u64,

    /// Retries issued (attempts beyond the first)
    pub total_retries: u64,
}

impl MetricsSnapshot {
    /// successful / total, 0.0 when nothing has run
    pub fn success_rate(&self) -> f64 {
        if self.total_operations == 0 {
            0.0
        } else {
            self.successful_operations as f64 / self.total_operations as f64
        }
    }

    /// total latency / successful, 0.0 when nothing succeeded
    pub fn avg_latency_ms(&self) -> f64 {
        if self.successful_operations == 0 {
            0.0
        } else {
            self.total_latency_ms / self.successful_operations as f64
        }
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Metrics {{ total: {}, ok: {}, failed: {}, success_rate: {:.2}%, avg_latency: {:.2}ms, trips: {}, retries: {} }}",
            self.total_operations,
            self.successful_operations,
            self.failed_operations,
            self.success_rate() * 100.0,
            self.avg_latency_ms(),
            self.circuit_breaker_trips,
            self.total_retries
        )
    }
}

/// Shared counters for the circuit breaker, retry handler and guard.
///
/// All counters sit behind one lock, so `reset()` is atomic with respect to
/// concurrent recorders and a snapshot is always internally consistent.
#[derive(Debug, Default)]
pub struct ResilienceMetrics {
    counters: Mutex<MetricsSnapshot>,
}

impl ResilienceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self) -> MutexGuard<'_, MetricsSnapshot> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_success(&self, latency: Duration) {
        let mut c = self.counters();
        c.total_operations += 1;
        c.successful_operations += 1;
        c.total_latency_ms += latency.as_secs_f64() * 1000.0;
    }

    pub fn record_failure(&self) {
        let mut c = self.counters();
        c.total_operations += 1;
        c.failed_operations += 1;
    }

    pub fn record_retry(&self) {
        self.counters().total_retries += 1;
    }

    pub fn record_trip(&self) {
        self.counters().circuit_breaker_trips += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.counters().clone()
    }

    /// Zero every counter in one step
    pub fn reset(&self) {
        *self.counters() = MetricsSnapshot::default();
    }
}
