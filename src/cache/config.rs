//! Configuration for the semantic cache

use crate::cache::types::{EvictionPolicy, LookupStrategy};
use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the semantic cache engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticCacheConfig {
    /// TTL applied when `set` is not given one
    pub default_ttl: Duration,

    /// Ceiling for adaptive TTL extension
    pub max_ttl: Duration,

    /// TTL jitter factor (0.0 - 1.0) applied to the default TTL
    pub ttl_jitter: f64,

    /// Minimum cosine similarity for a semantic hit (0.0 - 1.0)
    pub similarity_threshold: f32,

    /// Live entry count above which eviction runs
    pub max_entries: usize,

    pub eviction_policy: EvictionPolicy,

    /// Eviction shrinks the cache to `max_entries × eviction_hysteresis`
    pub eviction_hysteresis: f64,

    /// Run the capacity check after every `set`
    pub evict_on_set: bool,

    /// Extend an entry's TTL on every hit
    pub adaptive_ttl: bool,

    /// Factor applied to the current TTL on each hit
    pub ttl_multiplier: f64,

    /// Lowercase queries during normalization
    pub lowercase_queries: bool,

    /// Strategy used by `get_or_compute`
    pub default_strategy: LookupStrategy,

    /// Neighbors fetched per semantic lookup
    pub semantic_top_k: usize,

    /// Namespace for every key the engine writes
    pub key_prefix: String,

    /// Vector index holding query embeddings
    pub index_name: String,
}

impl Default for SemanticCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            max_ttl: Duration::from_secs(24 * 3600),
            ttl_jitter: 0.0,
            similarity_threshold: 0.90,
            max_entries: 10_000,
            eviction_policy: EvictionPolicy::Adaptive,
            eviction_hysteresis: 0.9,
            evict_on_set: true,
            adaptive_ttl: true,
            ttl_multiplier: 1.5,
            lowercase_queries: true,
            default_strategy: LookupStrategy::Hybrid,
            semantic_top_k: 5,
            key_prefix: "semcache:".to_string(),
            index_name: "semcache_idx".to_string(),
        }
    }
}

impl SemanticCacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> SemanticCacheConfigBuilder {
        SemanticCacheConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_entries == 0 {
            return Err("max_entries must be greater than 0".to_string());
        }

        if self.default_ttl.is_zero() {
            return Err("default_ttl must be greater than 0".to_string());
        }

        if self.max_ttl < self.default_ttl {
            return Err("max_ttl must be at least default_ttl".to_string());
        }

        if !(0.0..=1.0).contains(&self.ttl_jitter) {
            return Err("ttl_jitter must be between 0.0 and 1.0".to_string());
        }

        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err("similarity_threshold must be between 0.0 and 1.0".to_string());
        }

        if self.eviction_hysteresis <= 0.0 || self.eviction_hysteresis > 1.0 {
            return Err("eviction_hysteresis must be in (0.0, 1.0]".to_string());
        }

        if self.ttl_multiplier < 1.0 {
            return Err("ttl_multiplier must be at least 1.0".to_string());
        }

        if self.semantic_top_k == 0 {
            return Err("semantic_top_k must be greater than 0".to_string());
        }

        if self.key_prefix.is_empty() {
            return Err("key_prefix must not be empty".to_string());
        }

        Ok(())
    }

    /// Calculate actual TTL with jitter applied
    pub fn ttl_with_jitter(&self) -> Duration {
        if self.ttl_jitter == 0.0 {
            return self.default_ttl;
        }

        let base_secs = self.default_ttl.as_secs_f64();
        let jitter_range = base_secs * self.ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_secs = (base_secs + jitter).max(1.0);

        Duration::from_secs_f64(final_secs)
    }

    /// Live count the eviction sweep shrinks the cache to
    pub fn eviction_target(&self) -> usize {
        ((self.max_entries as f64) * self.eviction_hysteresis).floor() as usize
    }

    /// TTL after one adaptive extension of `current`
    pub fn extended_ttl(&self, current: Duration) -> Duration {
        current.mul_f64(self.ttl_multiplier).min(self.max_ttl)
    }

    /// Load overrides from `SEMCACHE_*` environment variables.
    ///
    /// A `.env` file in the working directory is loaded first if present.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let mut config = Self::default();

        if let Some(secs) = env_parse::<u64>("SEMCACHE_DEFAULT_TTL_SECS")? {
            config.default_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("SEMCACHE_MAX_TTL_SECS")? {
            config.max_ttl = Duration::from_secs(secs);
        }
        if let Some(threshold) = env_parse::<f32>("SEMCACHE_SIMILARITY_THRESHOLD")? {
            config.similarity_threshold = threshold;
        }
        if let Some(max) = env_parse::<usize>("SEMCACHE_MAX_ENTRIES")? {
            config.max_entries = max;
        }
        if let Some(policy) = env_parse::<EvictionPolicy>("SEMCACHE_EVICTION_POLICY")? {
            config.eviction_policy = policy;
        }
        if let Some(multiplier) = env_parse::<f64>("SEMCACHE_TTL_MULTIPLIER")? {
            config.ttl_multiplier = multiplier;
        }
        if let Some(hysteresis) = env_parse::<f64>("SEMCACHE_EVICTION_HYSTERESIS")? {
            config.eviction_hysteresis = hysteresis;
        }
        if let Ok(prefix) = std::env::var("SEMCACHE_KEY_PREFIX") {
            config.key_prefix = prefix;
        }

        config.validate().map_err(CacheError::Config)?;
        Ok(config)
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| CacheError::Config(format!("invalid {}: {}", name, e))),
        Err(_) => Ok(None),
    }
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct SemanticCacheConfigBuilder {
    default_ttl: Option<Duration>,
    max_ttl: Option<Duration>,
    ttl_jitter: Option<f64>,
    similarity_threshold: Option<f32>,
    max_entries: Option<usize>,
    eviction_policy: Option<EvictionPolicy>,
    eviction_hysteresis: Option<f64>,
    evict_on_set: Option<bool>,
    adaptive_ttl: Option<bool>,
    ttl_multiplier: Option<f64>,
    lowercase_queries: Option<bool>,
    default_strategy: Option<LookupStrategy>,
    key_prefix: Option<String>,
}

impl SemanticCacheConfigBuilder {
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    pub fn max_ttl(mut self, ttl: Duration) -> Self {
        self.max_ttl = Some(ttl);
        self
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = Some(threshold);
        self
    }

    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    pub fn eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = Some(policy);
        self
    }

    pub fn eviction_hysteresis(mut self, factor: f64) -> Self {
        self.eviction_hysteresis = Some(factor);
        self
    }

    pub fn evict_on_set(mut self, enable: bool) -> Self {
        self.evict_on_set = Some(enable);
        self
    }

    pub fn adaptive_ttl(mut self, enable: bool) -> Self {
        self.adaptive_ttl = Some(enable);
        self
    }

    pub fn ttl_multiplier(mut self, multiplier: f64) -> Self {
        self.ttl_multiplier = Some(multiplier);
        self
    }

    pub fn lowercase_queries(mut self, enable: bool) -> Self {
        self.lowercase_queries = Some(enable);
        self
    }

    pub fn default_strategy(mut self, strategy: LookupStrategy) -> Self {
        self.default_strategy = Some(strategy);
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> SemanticCacheConfig {
        let defaults = SemanticCacheConfig::default();

        SemanticCacheConfig {
            default_ttl: self.default_ttl.unwrap_or(defaults.default_ttl),
            max_ttl: self.max_ttl.unwrap_or(defaults.max_ttl),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            similarity_threshold: self
                .similarity_threshold
                .unwrap_or(defaults.similarity_threshold),
            max_entries: self.max_entries.unwrap_or(defaults.max_entries),
            eviction_policy: self.eviction_policy.unwrap_or(defaults.eviction_policy),
            eviction_hysteresis: self
                .eviction_hysteresis
                .unwrap_or(defaults.eviction_hysteresis),
            evict_on_set: self.evict_on_set.unwrap_or(defaults.evict_on_set),
            adaptive_ttl: self.adaptive_ttl.unwrap_or(defaults.adaptive_ttl),
            ttl_multiplier: self.ttl_multiplier.unwrap_or(defaults.ttl_multiplier),
            lowercase_queries: self.lowercase_queries.unwrap_or(defaults.lowercase_queries),
            default_strategy: self.default_strategy.unwrap_or(defaults.default_strategy),
            key_prefix: self.key_prefix.unwrap_or(defaults.key_prefix),
            ..defaults
        }
    }
}

/// Preset configurations for common use cases
impl SemanticCacheConfig {
    /// Short-lived answers to rapidly changing questions
    pub fn realtime() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            max_ttl: Duration::from_secs(1800),
            max_entries: 5_000,
            ttl_jitter: 0.15,
            similarity_threshold: 0.95,
            ..Default::default()
        }
    }

    /// Memory-constrained deployments
    pub fn small() -> Self {
        Self {
            default_ttl: Duration::from_secs(1800),
            max_entries: 1_000,
            ttl_jitter: 0.15,
            ..Default::default()
        }
    }

    /// Large deployments with long-lived answers
    pub fn large() -> Self {
        Self {
            default_ttl: Duration::from_secs(7200),
            max_ttl: Duration::from_secs(72 * 3600),
            max_entries: 1_000_000,
            ttl_jitter: 0.10,
            similarity_threshold: 0.88,
            semantic_top_k: 10,
            ..Default::default()
        }
    }
}
