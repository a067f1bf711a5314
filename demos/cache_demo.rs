//! Semantic Cache Demo Application
//!
//! Walks through the cache, the optimizer, invalidation and memory
//! compaction against the in-process store.
//!
//! Usage:
//!   cargo run --example cache_demo
//!
//! Environment variables (a `.env` file is honored):
//!   RUST_LOG                         - log filter (default: info)
//!   SEMCACHE_MAX_ENTRIES             - capacity before eviction
//!   SEMCACHE_SIMILARITY_THRESHOLD    - minimum cosine similarity for a hit

use ouroboros_cache::compaction::{CompactionConfig, CompactionStrategy, MemoryEntry, MemorySnapshot};
use ouroboros_cache::{
    CacheInvalidator, CacheOptimizer, Embedder, GetOptions, HashingEmbedder, InvalidationRule,
    InvalidatorConfig, MemoryCompactionEngine, MemoryStore, OptimizerConfig, ResilienceConfig,
    ResilientStore, SemanticCacheConfig, SemanticCacheEngine, SetOptions, Store,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("=== Semantic Cache Demo ===");

    let backend = MemoryStore::new();
    let store = ResilientStore::new(Arc::new(backend.clone()), ResilienceConfig::default());
    store.guard().start();

    let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::default());
    let optimizer = Arc::new(CacheOptimizer::new(
        Arc::new(store.clone()),
        Some(embedder.clone()),
        OptimizerConfig::default(),
    ));
    let invalidator = Arc::new(CacheInvalidator::new(
        Arc::new(store.clone()),
        Some(embedder.clone()),
        InvalidatorConfig::default(),
    ));

    let config = SemanticCacheConfig::from_env()?;
    let cache = SemanticCacheEngine::new(store.clone(), Some(embedder.clone()), config)?
        .with_optimizer(optimizer.clone())
        .with_invalidator(invalidator.clone());

    info!("\n--- Populate ---");
    let faq = [
        ("How do I reset my password?", "Open Settings > Security > Reset.", "account"),
        ("What are your support hours?", "Weekdays, 9am to 5pm UTC.", "support"),
        ("How much does the pro plan cost?", "$20 per seat per month.", "pricing"),
    ];
    for (query, answer, tag) in faq {
        let id = cache
            .set(query, answer, "gpt-4", SetOptions::new().tokens_used(150).tag(tag))
            .await?;
        info!("Cached {} as {}", query, id);
    }

    info!("\n--- Lookups ---");
    for query in [
        "how do i reset my password",
        "password reset, how do I",
        "what is the refund policy",
    ] {
        match cache.get(query, &GetOptions::new().model("gpt-4")).await? {
            Some(hit) => info!(
                "✓ {:?} hit for '{}' (similarity {:.2}): {}",
                hit.kind,
                query,
                hit.similarity,
                hit.response()
            ),
            None => info!("✗ Miss for '{}'", query),
        }
    }

    let (answer, cached) = cache
        .get_or_compute("What is the refund policy?", "gpt-4", || async {
            Ok("Full refund within 30 days.".to_string())
        })
        .await?;
    info!("get_or_compute -> '{}' (cached: {})", answer, cached);

    info!("\n--- Optimizer ---");
    for rec in optimizer.get_recommendations().await.iter().take(5) {
        info!("  {}", rec);
    }

    info!("\n--- Invalidation ---");
    invalidator.add_rule(InvalidationRule::tag("price-change", "pricing").priority(10));
    let report = invalidator
        .apply_rules("pro-plan", &serde_json::json!({ "event": "price_update" }))
        .await?;
    info!(
        "Rules fired: {}, keys invalidated: {}",
        report.rules_fired, report.sweep.invalidated
    );

    info!("\n--- Memory Compaction ---");
    let memories: Vec<MemoryEntry> = (0..120)
        .map(|i| {
            MemoryEntry::new(format!("mem-{}", i), format!("conversation note {} on topic {}", i, i % 8))
                .with_importance((i % 10) as f64 / 10.0)
                .with_session(format!("session-{}", i % 3))
        })
        .collect();
    for memory in &memories {
        backend
            .set(&format!("memory:{}", memory.id), &serde_json::to_vec(memory)?, None)
            .await?;
    }

    let compactor = MemoryCompactionEngine::new(CompactionConfig::aggressive())?
        .with_embedder(embedder.clone());
    let snapshot = MemorySnapshot::load(&backend, "memory:").await?;
    let outcome = compactor
        .compact_with(&snapshot, CompactionStrategy::Hybrid)
        .await?;
    let purge = compactor
        .purge_superseded(&outcome, &backend, "memory:")
        .await;
    info!("{}", outcome.report);
    info!("Purged {} superseded memories", purge.deleted);

    info!("\n--- Stats ---");
    info!("{}", cache.stats().await);
    info!("Invalidator: {:?}", invalidator.stats());

    store.guard().stop().await;
    info!("=== Demo complete ===");
    Ok(())
}
