//! # Semantic Response Cache
//!
//! Caches generated responses keyed by normalized query, so equivalent
//! questions are answered without another generation.
//!
//! ## Features
//!
//! - **Exact matching**: SHA-256 of the normalized query (trimmed, whitespace
//!   collapsed, optionally lowercased)
//! - **Semantic matching**: nearest-neighbor search over query embeddings with
//!   a hard similarity threshold
//! - **Adaptive TTL**: each hit multiplies the entry's TTL, up to `max_ttl`
//! - **Scored eviction**: LRU, LFU, TTL or Adaptive, with hysteresis
//! - **Cache-aside helpers**: `get_or_compute` and a streaming variant
//!
//! ## Example
//!
//! ```rust,no_run
//! use ouroboros_cache::cache::{SemanticCacheConfig, SemanticCacheEngine, SetOptions};
//! use ouroboros_cache::embedding::HashingEmbedder;
//! use ouroboros_cache::resilience::{ResilienceConfig, ResilientStore};
//! use ouroboros_cache::store::MemoryStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = ResilientStore::new(Arc::new(MemoryStore::new()), ResilienceConfig::default());
//! let cache = SemanticCacheEngine::new(
//!     store,
//!     Some(Arc::new(HashingEmbedder::default())),
//!     SemanticCacheConfig::default(),
//! )?;
//!
//! cache.set("What is Rust?", "A systems language", "gpt-4", SetOptions::new()).await?;
//!
//! let (answer, cached) = cache
//!     .get_or_compute("what is rust?", "gpt-4", || async { Ok("unused".to_string()) })
//!     .await?;
//! assert!(cached);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod entry;
pub mod eviction;
pub mod keys;
pub mod types;

pub use config::{SemanticCacheConfig, SemanticCacheConfigBuilder};
pub use engine::SemanticCacheEngine;
pub use entry::{CacheEntry, CacheHit, GetOptions, SetOptions};
pub use eviction::EvictionCandidate;
pub use keys::CacheKeys;
pub use types::{CacheStats, EvictionPolicy, EvictionReport, LookupStrategy, MatchKind};
