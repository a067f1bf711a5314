//! The guard every store call goes through, and a [`Store`] wrapper using it

use crate::error::{CacheError, Result};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerStats, CircuitState};
use crate::resilience::config::ResilienceConfig;
use crate::resilience::health::{HealthChecker, HealthStatus};
use crate::resilience::metrics::{MetricsSnapshot, ResilienceMetrics};
use crate::resilience::retry::RetryHandler;
use crate::store::{Store, VectorFilter, VectorMatch};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Observable state of a [`ResilienceGuard`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardStats {
    pub circuit: CircuitBreakerStats,
    /// None when no health checker is attached
    pub health: Option<HealthStatus>,
    pub metrics: MetricsSnapshot,
}

/// Circuit breaker, retry, timeout and health short-circuit around a call.
///
/// Order of application: health short-circuit, then circuit breaker, then
/// retry, then a timeout on each attempt. The breaker sees one outcome per
/// logical call, after retries.
pub struct ResilienceGuard {
    config: ResilienceConfig,
    metrics: Arc<ResilienceMetrics>,
    breaker: CircuitBreaker,
    retry: RetryHandler,
    health: Option<HealthChecker>,
}

impl ResilienceGuard {
    /// Guard without background health probing
    pub fn new(config: ResilienceConfig) -> Self {
        let metrics = Arc::new(ResilienceMetrics::new());
        Self {
            breaker: CircuitBreaker::with_metrics(config.circuit_breaker.clone(), metrics.clone()),
            retry: RetryHandler::with_metrics(config.retry.clone(), metrics.clone()),
            metrics,
            health: None,
            config,
        }
    }

    /// Guard with a health checker probing `store`. Call [`start`](Self::start)
    /// to launch the probe loop.
    pub fn with_health(config: ResilienceConfig, store: Arc<dyn Store>) -> Self {
        let checker = HealthChecker::new(store, config.health.clone());
        Self {
            health: Some(checker),
            ..Self::new(config)
        }
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<ResilienceMetrics> {
        &self.metrics
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn health_checker(&self) -> Option<&HealthChecker> {
        self.health.as_ref()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Start the background health probe, if one is attached
    pub fn start(&self) -> bool {
        match &self.health {
            Some(checker) => checker.start(),
            None => false,
        }
    }

    /// Stop the background health probe
    pub async fn stop(&self) {
        if let Some(checker) = &self.health {
            checker.stop().await;
        }
    }

    /// Run `op` under the configured operation timeout
    pub async fn execute<T, F, Fut>(&self, op_name: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_timeout(op_name, self.config.operation_timeout, op)
            .await
    }

    /// Run `op` with a caller-supplied per-attempt timeout
    pub async fn execute_with_timeout<T, F, Fut>(
        &self,
        op_name: &str,
        timeout: Duration,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Err(e) = self.check_health() {
            self.metrics.record_failure();
            return Err(e);
        }

        let start = Instant::now();
        let attempts = AtomicU32::new(0);
        let result = {
            let op = &mut op;
            let attempts = &attempts;
            let retry = &self.retry;
            self.breaker
                .execute(move || {
                    retry.execute(move || {
                        attempts.fetch_add(1, Ordering::Relaxed);
                        let attempt = op();
                        async move {
                            match tokio::time::timeout(timeout, attempt).await {
                                Ok(result) => result,
                                Err(_) => Err(CacheError::Timeout {
                                    timeout_ms: timeout.as_millis() as u64,
                                    context: op_name.to_string(),
                                }),
                            }
                        }
                    })
                })
                .await
        };

        match result {
            Ok(value) => {
                self.metrics.record_success(start.elapsed());
                Ok(value)
            }
            Err(e) => {
                self.metrics.record_failure();
                let attempts = attempts.into_inner();
                if e.is_retryable() {
                    warn!("Store call '{}' failed after {} attempts: {}", op_name, attempts, e);
                    Err(CacheError::RetriesExhausted {
                        attempts,
                        source: Box::new(e),
                    })
                } else {
                    debug!("Store call '{}' failed: {}", op_name, e);
                    Err(e)
                }
            }
        }
    }

    fn check_health(&self) -> Result<()> {
        if !self.config.fail_fast_when_unhealthy {
            return Ok(());
        }
        match &self.health {
            Some(checker) => {
                let status = checker.status();
                if status.healthy {
                    Ok(())
                } else {
                    Err(CacheError::StoreUnhealthy {
                        consecutive_failures: status.consecutive_failures,
                    })
                }
            }
            None => Ok(()),
        }
    }

    pub fn stats(&self) -> GuardStats {
        GuardStats {
            circuit: self.breaker.stats(),
            health: self.health.as_ref().map(|h| h.status()),
            metrics: self.metrics.snapshot(),
        }
    }
}

/// A [`Store`] whose every call runs through a shared [`ResilienceGuard`].
///
/// This is the handle the cache engine, optimizer, invalidator and
/// compaction write-back use.
#[derive(Clone)]
pub struct ResilientStore {
    inner: Arc<dyn Store>,
    guard: Arc<ResilienceGuard>,
}

impl ResilientStore {
    /// Wrap `inner` with a fresh guard whose health checker probes `inner`
    pub fn new(inner: Arc<dyn Store>, config: ResilienceConfig) -> Self {
        info!(
            "Initializing resilient store (timeout: {:?}, failure threshold: {})",
            config.operation_timeout, config.circuit_breaker.failure_threshold
        );
        let guard = Arc::new(ResilienceGuard::with_health(config, inner.clone()));
        Self { inner, guard }
    }

    /// Wrap `inner` with an existing guard
    pub fn with_guard(inner: Arc<dyn Store>, guard: Arc<ResilienceGuard>) -> Self {
        Self { inner, guard }
    }

    pub fn guard(&self) -> &Arc<ResilienceGuard> {
        &self.guard
    }

    /// The unguarded store
    pub fn inner(&self) -> &Arc<dyn Store> {
        &self.inner
    }
}

#[async_trait]
impl Store for ResilientStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let store = &self.inner;
        self.guard.execute("get", move || store.get(key)).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let store = &self.inner;
        self.guard
            .execute("set", move || store.set(key, value, ttl))
            .await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let store = &self.inner;
        self.guard.execute("delete", move || store.delete(key)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let store = &self.inner;
        self.guard
            .execute("expire", move || store.expire(key, ttl))
            .await
    }

    async fn incr_counter(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let store = &self.inner;
        self.guard
            .execute("incr_counter", move || store.incr_counter(key, field, delta))
            .await
    }

    async fn upsert_vector(
        &self,
        index: &str,
        key: &str,
        vector: &[f32],
        fields: &HashMap<String, String>,
    ) -> Result<()> {
        let store = &self.inner;
        self.guard
            .execute("upsert_vector", move || {
                store.upsert_vector(index, key, vector, fields)
            })
            .await
    }

    async fn vector_search(
        &self,
        index: &str,
        vector: &[f32],
        top_k: usize,
        filters: &[VectorFilter],
    ) -> Result<Vec<VectorMatch>> {
        let store = &self.inner;
        self.guard
            .execute("vector_search", move || {
                store.vector_search(index, vector, top_k, filters)
            })
            .await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let store = &self.inner;
        self.guard
            .execute("scan_prefix", move || store.scan_prefix(prefix))
            .await
    }

    async fn ping(&self) -> Result<()> {
        let store = &self.inner;
        self.guard.execute("ping", move || store.ping()).await
    }
}
