//! Access-pattern driven cache recommendations
//!
//! The optimizer keeps a bounded, time-windowed access history per store key
//! and turns it into advisory [`OptimizationRecommendation`]s. Nothing is
//! changed in the store until [`CacheOptimizer::apply`] is called.

use crate::embedding::{cosine_similarity, Embedder};
use crate::error::Result;
use crate::store::Store;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Optimizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Accesses older than this no longer count toward frequency
    pub window: Duration,

    /// Timestamps kept per key
    pub max_history_per_key: usize,

    /// Keys tracked at once; the least recently seen key is dropped beyond this
    pub max_tracked_keys: usize,

    /// Accesses per hour at or above which a key is hot
    pub high_frequency: f64,

    /// Accesses per hour at or below which a key is cold
    pub low_frequency: f64,

    /// TTL granted to promoted keys
    pub promote_ttl: Duration,

    /// How far ahead a predicted access triggers a prefetch
    pub prefetch_horizon: Duration,

    /// Timestamps needed before the next access is predicted
    pub min_accesses_for_prediction: usize,

    /// Query similarity at which hot keys are grouped
    pub cluster_similarity: f32,

    /// Recommendations applied per `apply` call
    pub max_apply_per_cycle: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(3600),
            max_history_per_key: 100,
            max_tracked_keys: 10_000,
            high_frequency: 10.0,
            low_frequency: 1.0,
            promote_ttl: Duration::from_secs(4 * 3600),
            prefetch_horizon: Duration::from_secs(300),
            min_accesses_for_prediction: 3,
            cluster_similarity: 0.85,
            max_apply_per_cycle: 10,
        }
    }
}

impl OptimizerConfig {
    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.window.is_zero() {
            return Err("window must be greater than 0".to_string());
        }
        if self.max_history_per_key == 0 || self.max_tracked_keys == 0 {
            return Err("history bounds must be greater than 0".to_string());
        }
        if self.low_frequency >= self.high_frequency {
            return Err("low_frequency must be below high_frequency".to_string());
        }
        if !(0.0..=1.0).contains(&self.cluster_similarity) {
            return Err("cluster_similarity must be between 0.0 and 1.0".to_string());
        }
        Ok(())
    }

    /// TTL bucket for an access frequency
    pub fn ttl_for_frequency(&self, frequency: f64) -> Duration {
        if frequency >= self.high_frequency {
            Duration::from_secs(2 * 3600)
        } else if frequency > self.low_frequency {
            Duration::from_secs(3600)
        } else {
            Duration::from_secs(30 * 60)
        }
    }
}

/// What a recommendation proposes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecommendationAction {
    /// Keep a hot key around longer
    Promote { ttl: Duration },

    /// Drop a cold key
    Evict,

    /// Keep a key alive until its predicted next access
    Prefetch { predicted_at: DateTime<Utc>, ttl: Duration },

    /// Set the key's TTL to its frequency bucket
    AdjustTtl { ttl: Duration },

    /// Hot keys with similar queries; advisory only
    Cluster { members: Vec<String>, similarity: f32 },
}

impl RecommendationAction {
    pub fn name(&self) -> &'static str {
        match self {
            RecommendationAction::Promote { .. } => "promote",
            RecommendationAction::Evict => "evict",
            RecommendationAction::Prefetch { .. } => "prefetch",
            RecommendationAction::AdjustTtl { .. } => "adjust_ttl",
            RecommendationAction::Cluster { .. } => "cluster",
        }
    }

    fn default_priority(&self) -> u8 {
        match self {
            RecommendationAction::Promote { .. } => 90,
            RecommendationAction::Evict => 80,
            RecommendationAction::Prefetch { .. } => 60,
            RecommendationAction::AdjustTtl { .. } => 40,
            RecommendationAction::Cluster { .. } => 20,
        }
    }
}

/// An advisory change for one key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRecommendation {
    pub key: String,
    pub action: RecommendationAction,
    /// Higher is applied first
    pub priority: u8,
    /// Accesses per hour when the recommendation was made
    pub frequency: f64,
    pub reason: String,
}

impl OptimizationRecommendation {
    fn new(key: &str, action: RecommendationAction, frequency: f64, reason: String) -> Self {
        Self {
            key: key.to_string(),
            priority: action.default_priority(),
            action,
            frequency,
            reason,
        }
    }
}

impl fmt::Display for OptimizationRecommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} ({})",
            self.priority,
            self.action.name(),
            self.key,
            self.reason
        )
    }
}

/// Result of one `apply` call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub applied: usize,
    /// Advisory items and keys that no longer exist
    pub skipped: usize,
    pub failed: usize,
    /// Items beyond the per-cycle cap
    pub deferred: usize,
}

/// Optimizer statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptimizerStats {
    pub tracked_keys: usize,
    pub total_accesses: u64,
    pub recommendations_generated: u64,
    pub applied: u64,
    pub failed: u64,
}

#[derive(Debug, Clone)]
struct AccessHistory {
    timestamps: VecDeque<DateTime<Utc>>,
    query: Option<String>,
    last_seen: DateTime<Utc>,
}

impl AccessHistory {
    fn recent(&self, since: DateTime<Utc>) -> usize {
        self.timestamps.iter().filter(|t| **t >= since).count()
    }

    fn latest(&self) -> Option<DateTime<Utc>> {
        self.timestamps.iter().max().copied()
    }

    /// Mean gap between recorded accesses; timestamps may arrive out of order
    fn mean_interval(&self) -> Option<chrono::Duration> {
        let first = self.timestamps.iter().min()?;
        let last = self.timestamps.iter().max()?;
        let gaps = self.timestamps.len().checked_sub(1).filter(|n| *n > 0)?;
        Some((*last - *first) / gaps as i32)
    }
}

/// Tracks access patterns and recommends TTL and eviction changes
pub struct CacheOptimizer {
    store: Arc<dyn Store>,
    embedder: Option<Arc<dyn Embedder>>,
    config: OptimizerConfig,
    history: Mutex<HashMap<String, AccessHistory>>,
    total_accesses: AtomicU64,
    generated: AtomicU64,
    applied: AtomicU64,
    failed: AtomicU64,
}

impl CacheOptimizer {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Option<Arc<dyn Embedder>>,
        config: OptimizerConfig,
    ) -> Self {
        info!(
            "Initializing cache optimizer (window: {:?}, clustering: {})",
            config.window,
            embedder.is_some()
        );
        Self {
            store,
            embedder,
            config,
            history: Mutex::new(HashMap::new()),
            total_accesses: AtomicU64::new(0),
            generated: AtomicU64::new(0),
            applied: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    fn history(&self) -> MutexGuard<'_, HashMap<String, AccessHistory>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an access to `key` now
    pub fn record_access(&self, key: &str, query: Option<&str>) {
        self.record_access_at(key, query, Utc::now());
    }

    /// Record an access to `key` at a given time
    pub fn record_access_at(&self, key: &str, query: Option<&str>, at: DateTime<Utc>) {
        self.total_accesses.fetch_add(1, Ordering::Relaxed);
        let mut history = self.history();

        if !history.contains_key(key) && history.len() >= self.config.max_tracked_keys {
            let stalest = history
                .iter()
                .min_by_key(|(_, h)| h.last_seen)
                .map(|(k, _)| k.clone());
            if let Some(stalest) = stalest {
                debug!("Optimizer dropping history for {}", stalest);
                history.remove(&stalest);
            }
        }

        let entry = history.entry(key.to_string()).or_insert_with(|| AccessHistory {
            timestamps: VecDeque::new(),
            query: None,
            last_seen: at,
        });
        entry.timestamps.push_back(at);
        while entry.timestamps.len() > self.config.max_history_per_key {
            entry.timestamps.pop_front();
        }
        entry.last_seen = entry.last_seen.max(at);
        if let Some(query) = query {
            entry.query = Some(query.to_string());
        }
    }

    /// Stop tracking `key`
    pub fn forget(&self, key: &str) {
        self.history().remove(key);
    }

    pub fn history_len(&self, key: &str) -> usize {
        self.history()
            .get(key)
            .map(|h| h.timestamps.len())
            .unwrap_or(0)
    }

    /// Accesses per hour of `key` within the window ending at `now`
    pub fn frequency(&self, key: &str, now: DateTime<Utc>) -> f64 {
        self.history()
            .get(key)
            .map(|h| self.frequency_of(h, now))
            .unwrap_or(0.0)
    }

    fn frequency_of(&self, history: &AccessHistory, now: DateTime<Utc>) -> f64 {
        let since = now - chrono::Duration::milliseconds(self.config.window.as_millis() as i64);
        let hours = self.config.window.as_secs_f64() / 3600.0;
        history.recent(since) as f64 / hours
    }

    pub async fn get_recommendations(&self) -> Vec<OptimizationRecommendation> {
        self.get_recommendations_at(Utc::now()).await
    }

    /// Recommendations as of `now`, highest priority first
    pub async fn get_recommendations_at(
        &self,
        now: DateTime<Utc>,
    ) -> Vec<OptimizationRecommendation> {
        let snapshot: Vec<(String, AccessHistory)> = self
            .history()
            .iter()
            .map(|(k, h)| (k.clone(), h.clone()))
            .collect();

        let mut recommendations = Vec::new();
        let mut hot = Vec::new();

        for (key, history) in &snapshot {
            let frequency = self.frequency_of(history, now);

            if frequency >= self.config.high_frequency {
                hot.push((key.clone(), history.query.clone()));
                recommendations.push(OptimizationRecommendation::new(
                    key,
                    RecommendationAction::Promote {
                        ttl: self.config.promote_ttl,
                    },
                    frequency,
                    format!("{:.1} accesses/hour", frequency),
                ));
            } else if frequency <= self.config.low_frequency {
                recommendations.push(OptimizationRecommendation::new(
                    key,
                    RecommendationAction::Evict,
                    frequency,
                    format!("only {:.1} accesses/hour", frequency),
                ));
            }

            if frequency > 0.0 {
                let ttl = self.config.ttl_for_frequency(frequency);
                recommendations.push(OptimizationRecommendation::new(
                    key,
                    RecommendationAction::AdjustTtl { ttl },
                    frequency,
                    format!("frequency bucket {:?}", ttl),
                ));
            }

            if let Some(prefetch) = self.predict(key, history, frequency, now) {
                recommendations.push(prefetch);
            }
        }

        recommendations.extend(self.cluster(hot, now).await);

        recommendations.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.key.cmp(&b.key))
        });

        self.generated
            .fetch_add(recommendations.len() as u64, Ordering::Relaxed);
        debug!("Optimizer produced {} recommendations", recommendations.len());
        recommendations
    }

    fn predict(
        &self,
        key: &str,
        history: &AccessHistory,
        frequency: f64,
        now: DateTime<Utc>,
    ) -> Option<OptimizationRecommendation> {
        if history.timestamps.len() < self.config.min_accesses_for_prediction {
            return None;
        }
        let interval = history.mean_interval()?;
        let predicted_at = history.latest()? + interval;
        let until = predicted_at - now;
        let horizon = chrono::Duration::milliseconds(self.config.prefetch_horizon.as_millis() as i64);

        if until < chrono::Duration::zero() || until > horizon {
            return None;
        }

        let ttl = (until + horizon).to_std().ok()?;
        Some(OptimizationRecommendation::new(
            key,
            RecommendationAction::Prefetch { predicted_at, ttl },
            frequency,
            format!("next access expected in {}s", until.num_seconds()),
        ))
    }

    /// Group hot keys whose queries embed close together
    async fn cluster(
        &self,
        hot: Vec<(String, Option<String>)>,
        now: DateTime<Utc>,
    ) -> Vec<OptimizationRecommendation> {
        let Some(embedder) = &self.embedder else {
            return Vec::new();
        };

        let mut embedded = Vec::new();
        for (key, query) in hot {
            let Some(query) = query else { continue };
            match embedder.embed(&query).await {
                Ok(vector) => embedded.push((key, vector)),
                Err(e) => debug!("Optimizer skipping {} for clustering: {}", key, e),
            }
        }
        embedded.sort_by(|a, b| a.0.cmp(&b.0));

        let mut assigned = vec![false; embedded.len()];
        let mut clusters = Vec::new();
        for i in 0..embedded.len() {
            if assigned[i] {
                continue;
            }
            let mut members = vec![embedded[i].0.clone()];
            let mut weakest = 1.0f32;
            for j in (i + 1)..embedded.len() {
                if assigned[j] {
                    continue;
                }
                let similarity = cosine_similarity(&embedded[i].1, &embedded[j].1);
                if similarity >= self.config.cluster_similarity {
                    assigned[j] = true;
                    members.push(embedded[j].0.clone());
                    weakest = weakest.min(similarity);
                }
            }
            if members.len() > 1 {
                let seed = &embedded[i].0;
                let frequency = self.frequency(seed, now);
                clusters.push(OptimizationRecommendation::new(
                    seed,
                    RecommendationAction::Cluster {
                        members: members.clone(),
                        similarity: weakest,
                    },
                    frequency,
                    format!("{} hot keys with similar queries", members.len()),
                ));
            }
        }
        clusters
    }

    /// Apply recommendations by descending priority, up to the per-cycle cap.
    ///
    /// Only the first store action on a key runs; later ones for the same key
    /// count as skipped.
    pub async fn apply(&self, recommendations: &[OptimizationRecommendation]) -> ApplyOutcome {
        let mut ordered: Vec<&OptimizationRecommendation> = recommendations.iter().collect();
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority));

        let cap = self.config.max_apply_per_cycle;
        let mut outcome = ApplyOutcome {
            deferred: ordered.len().saturating_sub(cap),
            ..Default::default()
        };

        // the highest-priority action on a key wins for this cycle
        let mut settled: HashSet<&str> = HashSet::new();
        for recommendation in ordered.into_iter().take(cap) {
            let touches_store = !matches!(recommendation.action, RecommendationAction::Cluster { .. });
            if touches_store && !settled.insert(recommendation.key.as_str()) {
                debug!("Skipping {}: key already handled this cycle", recommendation);
                outcome.skipped += 1;
                continue;
            }
            match self.apply_one(recommendation).await {
                Ok(true) => outcome.applied += 1,
                Ok(false) => outcome.skipped += 1,
                Err(e) => {
                    outcome.failed += 1;
                    warn!("Failed to apply {}: {}", recommendation, e);
                }
            }
        }

        self.applied
            .fetch_add(outcome.applied as u64, Ordering::Relaxed);
        self.failed.fetch_add(outcome.failed as u64, Ordering::Relaxed);
        info!(
            "Applied {} recommendations ({} skipped, {} failed, {} deferred)",
            outcome.applied, outcome.skipped, outcome.failed, outcome.deferred
        );
        outcome
    }

    async fn apply_one(&self, recommendation: &OptimizationRecommendation) -> Result<bool> {
        let key = recommendation.key.as_str();
        match &recommendation.action {
            RecommendationAction::Promote { ttl }
            | RecommendationAction::AdjustTtl { ttl }
            | RecommendationAction::Prefetch { ttl, .. } => self.store.expire(key, *ttl).await,
            RecommendationAction::Evict => {
                let existed = self.store.delete(key).await?;
                self.forget(key);
                Ok(existed)
            }
            RecommendationAction::Cluster { .. } => Ok(false),
        }
    }

    pub fn stats(&self) -> OptimizerStats {
        OptimizerStats {
            tracked_keys: self.history().len(),
            total_accesses: self.total_accesses.load(Ordering::Relaxed),
            recommendations_generated: self.generated.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::store::MemoryStore;

    fn optimizer(store: &MemoryStore, embedder: bool) -> CacheOptimizer {
        let embedder: Option<Arc<dyn Embedder>> = if embedder {
            Some(Arc::new(HashingEmbedder::default()))
        } else {
            None
        };
        CacheOptimizer::new(Arc::new(store.clone()), embedder, OptimizerConfig::default())
    }

    fn minutes_ago(now: DateTime<Utc>, m: i64) -> DateTime<Utc> {
        now - chrono::Duration::minutes(m)
    }

    fn actions_for<'a>(
        recs: &'a [OptimizationRecommendation],
        key: &str,
    ) -> Vec<&'a RecommendationAction> {
        recs.iter().filter(|r| r.key == key).map(|r| &r.action).collect()
    }

    #[test]
    fn test_config_validation() {
        assert!(OptimizerConfig::default().validate().is_ok());
        let bad = OptimizerConfig {
            low_frequency: 20.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_ttl_buckets() {
        let config = OptimizerConfig::default();
        assert_eq!(config.ttl_for_frequency(12.0), Duration::from_secs(7200));
        assert_eq!(config.ttl_for_frequency(5.0), Duration::from_secs(3600));
        assert_eq!(config.ttl_for_frequency(1.0), Duration::from_secs(1800));
    }

    #[test]
    fn test_history_is_bounded() {
        let optimizer = optimizer(&MemoryStore::new(), false);
        for _ in 0..150 {
            optimizer.record_access("k", None);
        }
        assert_eq!(optimizer.history_len("k"), 100);
        assert_eq!(optimizer.stats().total_accesses, 150);
    }

    #[test]
    fn test_tracked_keys_bounded() {
        let optimizer = CacheOptimizer::new(
            Arc::new(MemoryStore::new()),
            None,
            OptimizerConfig {
                max_tracked_keys: 2,
                ..Default::default()
            },
        );
        let now = Utc::now();
        optimizer.record_access_at("old", None, minutes_ago(now, 30));
        optimizer.record_access_at("mid", None, minutes_ago(now, 20));
        optimizer.record_access_at("new", None, now);

        assert_eq!(optimizer.stats().tracked_keys, 2);
        assert_eq!(optimizer.history_len("old"), 0);
    }

    #[tokio::test]
    async fn test_frequency_tiers() {
        let optimizer = optimizer(&MemoryStore::new(), false);
        let now = Utc::now();
        for m in 0..20 {
            optimizer.record_access_at("hot", None, minutes_ago(now, m * 2 + 1));
        }
        for m in 0..5 {
            optimizer.record_access_at("warm", None, minutes_ago(now, m * 11 + 1));
        }
        optimizer.record_access_at("cold", None, minutes_ago(now, 90));

        let recs = optimizer.get_recommendations_at(now).await;

        let hot = actions_for(&recs, "hot");
        assert!(hot.iter().any(|a| matches!(a, RecommendationAction::Promote { .. })));
        assert!(hot.contains(&&RecommendationAction::AdjustTtl {
            ttl: Duration::from_secs(7200)
        }));

        assert_eq!(
            actions_for(&recs, "warm"),
            vec![&RecommendationAction::AdjustTtl {
                ttl: Duration::from_secs(3600)
            }]
        );

        assert_eq!(actions_for(&recs, "cold"), vec![&RecommendationAction::Evict]);
        assert!(recs.windows(2).all(|w| w[0].priority >= w[1].priority));
    }

    #[tokio::test]
    async fn test_prefetch_prediction() {
        let optimizer = optimizer(&MemoryStore::new(), false);
        let now = Utc::now();
        for m in [28, 18, 8] {
            optimizer.record_access_at("periodic", None, minutes_ago(now, m));
        }
        // every ten minutes, so the next access is due in two
        let recs = optimizer.get_recommendations_at(now).await;
        let prefetch = recs
            .iter()
            .find(|r| matches!(r.action, RecommendationAction::Prefetch { .. }))
            .expect("prefetch recommendation");
        assert_eq!(prefetch.key, "periodic");

        // a key that was due long ago is not prefetched
        let later = now + chrono::Duration::minutes(30);
        let recs = optimizer.get_recommendations_at(later).await;
        assert!(!recs
            .iter()
            .any(|r| matches!(r.action, RecommendationAction::Prefetch { .. })));
    }

    #[tokio::test]
    async fn test_cluster_requires_embedder() {
        let now = Utc::now();
        let store = MemoryStore::new();
        let with = optimizer(&store, true);
        let without = optimizer(&store, false);

        for optimizer in [&with, &without] {
            for m in 0..12 {
                let at = minutes_ago(now, m * 3 + 1);
                optimizer.record_access_at("a", Some("how do i reset my password"), at);
                optimizer.record_access_at("b", Some("how do i reset my password?"), at);
                optimizer.record_access_at("c", Some("weather in paris today"), at);
            }
        }

        let clusters: Vec<_> = with
            .get_recommendations_at(now)
            .await
            .into_iter()
            .filter_map(|r| match r.action {
                RecommendationAction::Cluster { members, .. } => Some(members),
                _ => None,
            })
            .collect();
        assert_eq!(clusters, vec![vec!["a".to_string(), "b".to_string()]]);

        assert!(!without
            .get_recommendations_at(now)
            .await
            .iter()
            .any(|r| matches!(r.action, RecommendationAction::Cluster { .. })));
    }

    #[tokio::test]
    async fn test_apply_is_capped_and_ordered() {
        let store = MemoryStore::new();
        store.set("keep", b"v", Some(Duration::from_secs(60))).await.unwrap();
        store.set("drop", b"v", None).await.unwrap();

        let optimizer = CacheOptimizer::new(
            Arc::new(store.clone()),
            None,
            OptimizerConfig {
                max_apply_per_cycle: 3,
                ..Default::default()
            },
        );

        let recs = vec![
            OptimizationRecommendation::new(
                "keep",
                RecommendationAction::AdjustTtl {
                    ttl: Duration::from_secs(7200),
                },
                5.0,
                "test".into(),
            ),
            OptimizationRecommendation::new("drop", RecommendationAction::Evict, 0.0, "test".into()),
            OptimizationRecommendation::new("gone", RecommendationAction::Evict, 0.0, "test".into()),
            OptimizationRecommendation::new(
                "keep",
                RecommendationAction::Cluster {
                    members: vec!["keep".into()],
                    similarity: 1.0,
                },
                5.0,
                "test".into(),
            ),
        ];

        let outcome = optimizer.apply(&recs).await;
        assert_eq!(
            outcome,
            ApplyOutcome {
                applied: 2,
                skipped: 1,
                failed: 0,
                deferred: 1,
            }
        );
        assert!(store.get("drop").await.unwrap().is_none());
        assert!(store.ttl("keep").await.unwrap() > Duration::from_secs(3600));
    }
}
