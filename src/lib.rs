//! # Ouroboros Cache (ouroboros-cache)
//!
//! A resilient, semantically-aware response and memory cache for LLM agents,
//! sitting in front of a remote vector-capable key-value store.
//!
//! ## Features
//!
//! - Circuit breaking, retry with backoff and a background health probe
//!   around every store call
//! - Exact and nearest-neighbor lookup of cached responses
//! - Adaptive TTL and scored eviction (LRU, LFU, TTL, Adaptive)
//! - Trigger-gated memory compaction with six strategies
//! - Access-pattern recommendations and rule-driven invalidation
//!
//! ## Resilient Store
//!
//! Every component talks to the store through a [`ResilientStore`], which
//! routes each call through a shared [`ResilienceGuard`].
//!
//! ```no_run
//! use ouroboros_cache::{MemoryStore, ResilienceConfig, ResilientStore, Store};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = ResilientStore::new(Arc::new(MemoryStore::new()), ResilienceConfig::default());
//!     store.guard().start();
//!
//!     store.set("greeting", b"hello", None).await?;
//!     println!("Circuit: {}", store.guard().circuit_state());
//!
//!     store.guard().stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Semantic Cache
//!
//! ```no_run
//! use ouroboros_cache::{
//!     GetOptions, HashingEmbedder, MemoryStore, ResilienceConfig, ResilientStore,
//!     SemanticCacheConfig, SemanticCacheEngine, SetOptions,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = ResilientStore::new(Arc::new(MemoryStore::new()), ResilienceConfig::default());
//!     let cache = SemanticCacheEngine::new(
//!         store,
//!         Some(Arc::new(HashingEmbedder::default())),
//!         SemanticCacheConfig::default(),
//!     )?;
//!
//!     cache
//!         .set("How do I reset my password?", "Use the settings page.", "gpt-4", SetOptions::new().tokens_used(120))
//!         .await?;
//!
//!     if let Some(hit) = cache.get("how do i reset my password", &GetOptions::new().model("gpt-4")).await? {
//!         println!("{} (similarity {:.2})", hit.response(), hit.similarity);
//!     }
//!
//!     println!("{}", cache.stats().await);
//!     Ok(())
//! }
//! ```
//!
//! ## Invalidation
//!
//! ```no_run
//! use ouroboros_cache::{CacheInvalidator, InvalidationRule, InvalidatorConfig, MemoryStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let invalidator = CacheInvalidator::new(Arc::new(MemoryStore::new()), None, InvalidatorConfig::default());
//!     invalidator.add_rule(InvalidationRule::pattern("docs", "semcache:entry:*").priority(10));
//!
//!     let report = invalidator.apply_rules("doc-42", &serde_json::json!({})).await?;
//!     println!("Invalidated {} keys", report.sweep.invalidated);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod compaction;
pub mod embedding;
pub mod error;
pub mod invalidation;
pub mod optimizer;
pub mod resilience;
pub mod store;

// Re-export main types for convenience
pub use cache::{
    CacheEntry, CacheHit, CacheStats, EvictionPolicy, GetOptions, LookupStrategy, MatchKind,
    SemanticCacheConfig, SemanticCacheEngine, SetOptions,
};
pub use compaction::{
    CompactionConfig, CompactionLevel, CompactionOutcome, CompactionReport, CompactionStrategy,
    MemoryCompactionEngine, MemoryEntry, MemorySnapshot,
};
pub use embedding::{Embedder, HashingEmbedder, Summarizer};
pub use error::{CacheError, Result};
pub use invalidation::{
    CacheInvalidator, InvalidationEvent, InvalidationReason, InvalidationRule,
    InvalidationStrategy, InvalidatorConfig,
};
pub use optimizer::{CacheOptimizer, OptimizationRecommendation, OptimizerConfig};
pub use resilience::{
    CircuitBreaker, CircuitState, HealthStatus, ResilienceConfig, ResilienceGuard, ResilientStore,
};
pub use store::{MemoryStore, Store};
