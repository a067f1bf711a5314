//! Background health probing of the backing store
//!
//! A [`HealthChecker`] owns a periodic task, independent of request traffic,
//! that pings the store and maintains a [`HealthStatus`]. The guard reads the
//! status to short-circuit calls while the store is known to be down.

use crate::error::CacheError;
use crate::store::Store;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Configuration for health check behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Whether the background probe runs at all
    pub enabled: bool,
    /// Delay between probes
    pub interval: Duration,
    /// Timeout for a single probe
    pub timeout: Duration,
    /// Response time threshold for degraded state (in milliseconds)
    pub degraded_threshold_ms: u64,
    /// Consecutive failed probes before the store is marked unhealthy
    pub unhealthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            degraded_threshold_ms: 1000,
            unhealthy_threshold: 3,
        }
    }
}

/// Health level of the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthLevel {
    /// Store is healthy and responsive
    Healthy,
    /// Store is responsive but slow, or has missed fewer probes than the threshold
    Degraded,
    /// Store is not responsive or erroring
    Unhealthy,
}

/// Store health as last observed by the probe loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub level: HealthLevel,
    /// When the last probe completed (None before the first probe)
    pub last_check: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_response_time_ms: u64,
    pub last_error: Option<String>,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            healthy: true,
            level: HealthLevel::Healthy,
            last_check: None,
            consecutive_failures: 0,
            last_response_time_ms: 0,
            last_error: None,
        }
    }
}

/// Outcome of a single probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub level: HealthLevel,
    /// Response time in milliseconds
    pub response_time_ms: u64,
    pub timestamp: DateTime<Utc>,
    /// Error message (if unhealthy)
    pub error: Option<String>,
}

impl ProbeResult {
    fn healthy(response_time: Duration, degraded_threshold_ms: u64) -> Self {
        let response_time_ms = response_time.as_millis() as u64;
        let level = if response_time_ms > degraded_threshold_ms {
            HealthLevel::Degraded
        } else {
            HealthLevel::Healthy
        };

        Self {
            level,
            response_time_ms,
            timestamp: Utc::now(),
            error: None,
        }
    }

    fn unhealthy(response_time: Duration, error: &str) -> Self {
        Self {
            level: HealthLevel::Unhealthy,
            response_time_ms: response_time.as_millis() as u64,
            timestamp: Utc::now(),
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

async fn probe(store: &dyn Store, config: &HealthCheckConfig) -> ProbeResult {
    let start = Instant::now();
    match tokio::time::timeout(config.timeout, store.ping()).await {
        Ok(Ok(())) => ProbeResult::healthy(start.elapsed(), config.degraded_threshold_ms),
        Ok(Err(e)) => ProbeResult::unhealthy(start.elapsed(), &e.to_string()),
        Err(_) => {
            let timeout = CacheError::Timeout {
                timeout_ms: config.timeout.as_millis() as u64,
                context: "health probe".to_string(),
            };
            ProbeResult::unhealthy(start.elapsed(), &timeout.to_string())
        }
    }
}

fn apply_probe(status: &RwLock<HealthStatus>, result: &ProbeResult, config: &HealthCheckConfig) {
    let mut status = status.write().unwrap_or_else(PoisonError::into_inner);
    status.last_check = Some(result.timestamp);
    status.last_response_time_ms = result.response_time_ms;

    if result.is_success() {
        if !status.healthy {
            info!("Store recovered after {} failed probes", status.consecutive_failures);
        }
        status.consecutive_failures = 0;
        status.healthy = true;
        status.level = result.level;
        status.last_error = None;
    } else {
        status.consecutive_failures += 1;
        status.last_error = result.error.clone();
        let was_healthy = status.healthy;
        status.healthy = status.consecutive_failures < config.unhealthy_threshold;
        status.level = if status.healthy {
            HealthLevel::Degraded
        } else {
            HealthLevel::Unhealthy
        };

        if was_healthy && !status.healthy {
            error!(
                "Store marked unhealthy after {} consecutive failed probes",
                status.consecutive_failures
            );
        } else {
            warn!(
                "Health probe failed ({}/{}): {}",
                status.consecutive_failures,
                config.unhealthy_threshold,
                result.error.as_deref().unwrap_or("unknown")
            );
        }
    }
}

struct ProbeTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Periodic store health probe
pub struct HealthChecker {
    store: Arc<dyn Store>,
    config: HealthCheckConfig,
    status: Arc<RwLock<HealthStatus>>,
    task: Mutex<Option<ProbeTask>>,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn Store>, config: HealthCheckConfig) -> Self {
        Self {
            store,
            config,
            status: Arc::new(RwLock::new(HealthStatus::default())),
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    /// Latest health status
    pub fn status(&self) -> HealthStatus {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the background loop is currently running
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|t| !t.handle.is_finished())
            .unwrap_or(false)
    }

    /// Start the background probe loop.
    ///
    /// Returns false if probing is disabled or the loop is already running.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        if !self.config.enabled {
            debug!("Health checks disabled, not starting probe loop");
            return false;
        }

        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = task.as_ref() {
            if !existing.handle.is_finished() {
                return false;
            }
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let store = self.store.clone();
        let status = self.status.clone();
        let config = self.config.clone();

        info!("Starting store health probe (interval: {:?})", config.interval);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        // an in-flight probe is abandoned on shutdown
                        tokio::select! {
                            biased;
                            changed = shutdown_rx.changed() => {
                                if changed.is_err() || *shutdown_rx.borrow() {
                                    break;
                                }
                            }
                            result = probe(store.as_ref(), &config) => {
                                apply_probe(&status, &result, &config);
                            }
                        }
                    }
                }
            }
            debug!("Health probe loop shutting down");
        });

        *task = Some(ProbeTask { shutdown, handle });
        true
    }

    /// Stop the probe loop and wait for it to exit. Idempotent.
    pub async fn stop(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(task) = task {
            let _ = task.shutdown.send(true);
            if let Err(e) = task.handle.await {
                if !e.is_cancelled() {
                    warn!("Health probe task ended abnormally: {}", e);
                }
            }
            info!("Stopped store health probe");
        }
    }

    /// Run a single probe now and fold it into the status
    pub async fn probe_once(&self) -> ProbeResult {
        let result = probe(self.store.as_ref(), &self.config).await;
        apply_probe(&self.status, &result, &self.config);
        result
    }
}

impl Drop for HealthChecker {
    fn drop(&mut self) {
        let task = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.shutdown.send(true);
            task.handle.abort();
        }
    }
}
