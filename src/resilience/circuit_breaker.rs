//! Circuit breaker guarding store calls
//!
//! Closed: calls pass through and failures inside a rolling window are
//! counted. Open: calls fail immediately until the recovery timeout elapses.
//! HalfOpen: a single trial call is admitted; its success closes the
//! circuit, its failure reopens it.

use crate::error::{CacheError, Result};
use crate::resilience::metrics::ResilienceMetrics;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failures inside `failure_window` that open the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting a trial call
    pub recovery_timeout: Duration,
    /// Rolling window in which failures are counted while closed
    pub failure_window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            failure_window: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }
        if self.failure_window.is_zero() {
            return Err("failure_window must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through
    Closed,
    /// Calls fail fast
    Open,
    /// One trial call is allowed through
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "circuit_open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq<&str> for CircuitState {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

/// Observable circuit breaker state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    /// Failures currently counted toward the threshold
    pub failure_count: u32,
    pub failure_threshold: u32,
    /// Milliseconds until a trial call is admitted (0 unless open)
    pub retry_after_ms: u64,
}

struct BreakerState {
    state: CircuitState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            opened_at: None,
            trial_in_flight: false,
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.failures.front() {
            if now.duration_since(*oldest) > window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

/// Releases the half-open trial slot if the trial future is dropped
/// before it reports an outcome.
struct TrialSlot<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        if self.admission == Admission::Trial && !self.settled {
            let mut inner = self.breaker.inner();
            if inner.state == CircuitState::HalfOpen {
                inner.trial_in_flight = false;
            }
        }
    }
}

/// Circuit breaker for the backing store
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    metrics: Arc<ResilienceMetrics>,
}

impl CircuitBreaker {
    /// Create a breaker with its own metrics
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_metrics(config, Arc::new(ResilienceMetrics::new()))
    }

    /// Create a breaker that records trips into shared metrics
    pub fn with_metrics(config: CircuitBreakerConfig, metrics: Arc<ResilienceMetrics>) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerState::closed()),
            metrics,
        }
    }

    fn inner(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `op` under the breaker.
    ///
    /// Fails with [`CacheError::CircuitOpen`] without calling `op` while the
    /// circuit is open, or while another half-open trial is in flight.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let admission = self.admit()?;
        let mut slot = TrialSlot {
            breaker: self,
            admission,
            settled: false,
        };

        let result = op().await;
        match &result {
            Ok(_) => self.on_success(admission),
            Err(e) => self.on_failure(admission, e),
        }
        slot.settled = true;
        drop(slot);

        result
    }

    fn admit(&self) -> Result<Admission> {
        let mut inner = self.inner();
        match inner.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(self.config.recovery_timeout);
                if elapsed >= self.config.recovery_timeout {
                    info!("Circuit breaker half-open, admitting trial call");
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    Ok(Admission::Trial)
                } else {
                    let retry_after = self.config.recovery_timeout - elapsed;
                    Err(CacheError::CircuitOpen {
                        retry_after_ms: retry_after.as_millis() as u64,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    debug!("Circuit breaker trial in flight, rejecting call");
                    Err(CacheError::CircuitOpen { retry_after_ms: 0 })
                } else {
                    inner.trial_in_flight = true;
                    Ok(Admission::Trial)
                }
            }
        }
    }

    fn on_success(&self, admission: Admission) {
        let mut inner = self.inner();
        match (inner.state, admission) {
            (CircuitState::HalfOpen, Admission::Trial) => {
                info!("Circuit breaker trial succeeded, closing circuit");
                *inner = BreakerState::closed();
            }
            (CircuitState::Closed, _) => inner.failures.clear(),
            _ => {}
        }
    }

    fn on_failure(&self, admission: Admission, error: &CacheError) {
        let mut inner = self.inner();
        let now = Instant::now();
        match (inner.state, admission) {
            (CircuitState::HalfOpen, Admission::Trial) => {
                warn!("Circuit breaker trial failed, reopening circuit: {}", error);
                self.open(&mut inner, now);
            }
            (CircuitState::Closed, _) => {
                inner.prune(now, self.config.failure_window);
                inner.failures.push_back(now);
                let count = inner.failures.len() as u32;
                debug!(
                    "Circuit breaker failure {}/{}: {}",
                    count, self.config.failure_threshold, error
                );
                if count >= self.config.failure_threshold {
                    warn!(
                        "Circuit breaker opened after {} failures (recovery in {:?})",
                        count, self.config.recovery_timeout
                    );
                    self.open(&mut inner, now);
                }
            }
            _ => {}
        }
    }

    fn open(&self, inner: &mut BreakerState, now: Instant) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(now);
        inner.trial_in_flight = false;
        inner.failures.clear();
        self.metrics.record_trip();
    }

    /// Current state
    pub fn state(&self) -> CircuitState {
        self.inner().state
    }

    /// Failures currently counted toward the threshold
    pub fn failure_count(&self) -> u32 {
        let mut inner = self.inner();
        let window = self.config.failure_window;
        inner.prune(Instant::now(), window);
        inner.failures.len() as u32
    }

    /// Total number of trips recorded in the attached metrics
    pub fn trips(&self) -> u64 {
        self.metrics.snapshot().circuit_breaker_trips
    }

    /// Force the circuit closed and clear the failure counter
    pub fn reset(&self) {
        info!("Circuit breaker manually reset");
        *self.inner() = BreakerState::closed();
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner();
        let retry_after_ms = match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(at)) => self
                .config
                .recovery_timeout
                .saturating_sub(at.elapsed())
                .as_millis() as u64,
            _ => 0,
        };
        CircuitBreakerStats {
            state: inner.state,
            failure_count: inner.failures.len() as u32,
            failure_threshold: self.config.failure_threshold,
            retry_after_ms,
        }
    }
}
