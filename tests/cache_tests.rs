//! Integration tests for the semantic cache engine
//!
//! These tests cover eviction under capacity pressure, degraded operation
//! when the embedder or store fails, concurrent access bookkeeping, and the
//! optimizer/invalidator hooks.

mod common;

use common::{FlakyStore, SwitchableEmbedder};
use futures::future::join_all;
use ouroboros_cache::cache::{
    EvictionPolicy, GetOptions, LookupStrategy, MatchKind, SemanticCacheConfig,
    SemanticCacheEngine, SetOptions,
};
use ouroboros_cache::embedding::{Embedder, HashingEmbedder};
use ouroboros_cache::invalidation::{CacheInvalidator, InvalidatorConfig};
use ouroboros_cache::optimizer::{CacheOptimizer, OptimizerConfig, RecommendationAction};
use ouroboros_cache::resilience::{HealthCheckConfig, ResilienceConfig, ResilientStore, RetryPolicy};
use ouroboros_cache::store::{MemoryStore, Store};
use std::sync::Arc;
use std::time::Duration;

fn resilience() -> ResilienceConfig {
    ResilienceConfig {
        retry: RetryPolicy::fixed(1, Duration::from_millis(1)),
        health: HealthCheckConfig {
            enabled: false,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn engine_over(
    store: Arc<dyn Store>,
    embedder: Option<Arc<dyn Embedder>>,
    config: SemanticCacheConfig,
) -> SemanticCacheEngine {
    SemanticCacheEngine::new(ResilientStore::new(store, resilience()), embedder, config)
        .expect("valid config")
}

async fn is_live(store: &MemoryStore, engine: &SemanticCacheEngine, id: &str) -> bool {
    store
        .get(&engine.keys().for_id(id))
        .await
        .unwrap()
        .is_some()
}

#[tokio::test]
async fn test_adaptive_eviction_150_to_90() {
    let store = MemoryStore::new();
    let config = SemanticCacheConfig::builder()
        .max_entries(100)
        .eviction_policy(EvictionPolicy::Adaptive)
        .evict_on_set(false)
        .build();
    let engine = engine_over(
        Arc::new(store.clone()),
        Some(Arc::new(HashingEmbedder::default())),
        config,
    );

    let mut ids = Vec::new();
    for i in 0..150 {
        let id = engine
            .set(
                &format!("question number {}", i),
                &format!("answer {}", i),
                "gpt-4",
                SetOptions::new().importance(i as f64 / 150.0),
            )
            .await
            .unwrap();
        ids.push(id);
    }

    let report = engine.enforce_capacity().await.unwrap();
    assert_eq!(report.scanned, 150);
    assert_eq!(report.evicted, 60);
    assert_eq!(report.live_after, 90);
    assert_eq!(store.len().await, 90);

    // the 60 lowest-scored (least important) entries are the ones removed
    for (i, id) in ids.iter().enumerate() {
        assert_eq!(is_live(&store, &engine, id).await, i >= 60, "entry {}", i);
    }
    assert_eq!(engine.stats().await.evictions, 60);
}

#[tokio::test]
async fn test_lru_eviction_removes_exactly_k_least_recent() {
    let store = MemoryStore::new();
    let config = SemanticCacheConfig::builder()
        .max_entries(10)
        .eviction_policy(EvictionPolicy::Lru)
        .eviction_hysteresis(1.0)
        .evict_on_set(false)
        .build();
    let engine = engine_over(Arc::new(store.clone()), None, config);

    let mut ids = Vec::new();
    for i in 0..13 {
        ids.push(
            engine
                .set(&format!("q{}", i), "r", "m", SetOptions::new())
                .await
                .unwrap(),
        );
        tokio::time::sleep(Duration::from_millis(3)).await;
    }

    // refresh the three oldest so entries 3, 4 and 5 become least recent
    for i in 0..3 {
        let hit = engine
            .get(&format!("q{}", i), &GetOptions::new().model("m"))
            .await
            .unwrap();
        assert!(hit.is_some());
        tokio::time::sleep(Duration::from_millis(3)).await;
    }

    let report = engine.enforce_capacity().await.unwrap();
    assert_eq!(report.evicted, 3);
    assert_eq!(store.len().await, 10);

    for (i, id) in ids.iter().enumerate() {
        let expected = !(3..6).contains(&i);
        assert_eq!(is_live(&store, &engine, id).await, expected, "entry {}", i);
    }
}

#[tokio::test]
async fn test_live_count_never_exceeds_max() {
    let store = MemoryStore::new();
    let config = SemanticCacheConfig::builder()
        .max_entries(20)
        .build();
    let engine = engine_over(Arc::new(store.clone()), None, config);

    for i in 0..35 {
        engine
            .set(&format!("query {}", i), "r", "m", SetOptions::new())
            .await
            .unwrap();
        assert!(store.len().await <= 20);
    }
}

#[tokio::test]
async fn test_embedder_outage_degrades_to_exact() {
    let embedder = SwitchableEmbedder::default();
    let engine = engine_over(
        Arc::new(MemoryStore::new()),
        Some(Arc::new(embedder.clone())),
        SemanticCacheConfig::default(),
    );

    embedder.set_down(true);
    engine
        .set("what is the capital of france", "Paris", "m", SetOptions::new())
        .await
        .unwrap();

    let exact = engine
        .get("What is the capital of France", &GetOptions::new())
        .await
        .unwrap()
        .expect("exact hit");
    assert_eq!(exact.kind, MatchKind::Exact);

    let semantic = engine
        .get(
            "capital of france",
            &GetOptions::new().strategy(LookupStrategy::SemanticOnly),
        )
        .await
        .unwrap();
    assert!(semantic.is_none());
    assert_eq!(engine.stats().await.embedding_failures, 2);

    // entries stored while the embedder is back are found semantically
    embedder.set_down(false);
    engine
        .set("how tall is the eiffel tower", "330m", "m", SetOptions::new())
        .await
        .unwrap();
    let hit = engine
        .get(
            "How tall is the Eiffel tower?",
            &GetOptions::new().strategy(LookupStrategy::SemanticOnly),
        )
        .await
        .unwrap()
        .expect("semantic hit");
    assert_eq!(hit.response(), "330m");
}

#[tokio::test]
async fn test_store_outage_falls_back_to_compute() {
    let flaky = FlakyStore::new();
    let engine = engine_over(
        Arc::new(flaky.clone()),
        None,
        SemanticCacheConfig::default(),
    );

    flaky.fail_next(100);
    let (answer, cached) = engine
        .get_or_compute("status?", "m", || async { Ok("computed".to_string()) })
        .await
        .unwrap();
    assert_eq!(answer, "computed");
    assert!(!cached);

    // once the store recovers the next call caches normally
    flaky.fail_next(0);
    engine
        .get_or_compute("status?", "m", || async { Ok("computed".to_string()) })
        .await
        .unwrap();
    let (_, cached) = engine
        .get_or_compute("status?", "m", || async { Ok("fresh".to_string()) })
        .await
        .unwrap();
    assert!(cached);
}

#[tokio::test]
async fn test_store_outage_surfaces_on_plain_get() {
    let flaky = FlakyStore::new();
    let engine = engine_over(
        Arc::new(flaky.clone()),
        None,
        SemanticCacheConfig::default(),
    );

    flaky.fail_next(100);
    let err = engine
        .get("anything", &GetOptions::new().model("m"))
        .await
        .unwrap_err();
    assert!(err.is_unavailable());
}

#[tokio::test]
async fn test_concurrent_hits_are_all_counted() {
    let store = MemoryStore::new();
    let engine = engine_over(
        Arc::new(store.clone()),
        None,
        SemanticCacheConfig::default(),
    );
    let id = engine
        .set("popular", "r", "m", SetOptions::new().tokens_used(10))
        .await
        .unwrap();

    let options = GetOptions::new().model("m");
    let hits = join_all((0..16).map(|_| engine.get("popular", &options))).await;
    assert!(hits.iter().all(|h| matches!(h, Ok(Some(_)))));

    let key = engine.keys().for_id(&id);
    assert_eq!(store.incr_counter(&key, "access_count", 0).await.unwrap(), 16);
    assert_eq!(store.incr_counter(&key, "tokens_saved", 0).await.unwrap(), 160);

    let last = engine.get("popular", &options).await.unwrap().unwrap();
    assert_eq!(last.entry.access_count, 17);

    let stats = engine.stats().await;
    assert_eq!(stats.exact_hits, 17);
    assert_eq!(stats.tokens_saved, 170);
}

#[tokio::test]
async fn test_hits_feed_the_optimizer() {
    let store = MemoryStore::new();
    let optimizer = Arc::new(CacheOptimizer::new(
        Arc::new(store.clone()),
        None,
        OptimizerConfig::default(),
    ));
    let engine = engine_over(
        Arc::new(store.clone()),
        None,
        SemanticCacheConfig::default(),
    )
    .with_optimizer(optimizer.clone());

    let id = engine
        .set("hot question", "r", "m", SetOptions::new())
        .await
        .unwrap();
    for _ in 0..12 {
        engine
            .get("hot question", &GetOptions::new().model("m"))
            .await
            .unwrap();
    }

    let key = engine.keys().for_id(&id);
    assert_eq!(optimizer.history_len(&key), 12);

    let recommendations = optimizer.get_recommendations().await;
    let top = recommendations.first().expect("recommendation");
    assert_eq!(top.key, key);
    assert!(matches!(top.action, RecommendationAction::Promote { .. }));
}

#[tokio::test]
async fn test_tag_invalidation_through_engine() {
    let store = MemoryStore::new();
    let invalidator = Arc::new(CacheInvalidator::new(
        Arc::new(store.clone()),
        Some(Arc::new(HashingEmbedder::default())),
        InvalidatorConfig::default(),
    ));
    let engine = engine_over(
        Arc::new(store.clone()),
        None,
        SemanticCacheConfig::default(),
    )
    .with_invalidator(invalidator.clone());

    engine
        .set("pricing for plan a", "$10", "m", SetOptions::new().tag("pricing"))
        .await
        .unwrap();
    engine
        .set("pricing for plan b", "$20", "m", SetOptions::new().tag("pricing"))
        .await
        .unwrap();
    engine
        .set("office hours", "9-5", "m", SetOptions::new().tag("support"))
        .await
        .unwrap();

    let report = invalidator.invalidate_tag("pricing").await.unwrap();
    assert_eq!(report.invalidated, 2);
    assert!(engine
        .get("pricing for plan a", &GetOptions::new().model("m"))
        .await
        .unwrap()
        .is_none());
    assert!(engine
        .get("office hours", &GetOptions::new().model("m"))
        .await
        .unwrap()
        .is_some());

    // engine-side invalidation keeps the tag index consistent
    engine.invalidate(Some("office hours"), None, None).await.unwrap();
    assert!(invalidator.keys_with_tag("support").is_empty());
}

#[tokio::test]
async fn test_semantic_invalidation_of_entries_written_before_tracking() {
    let store = MemoryStore::new();
    let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::default());
    let engine = engine_over(
        Arc::new(store.clone()),
        Some(embedder.clone()),
        SemanticCacheConfig::default(),
    );
    let capital = engine
        .set("what is the capital of france", "Paris", "m", SetOptions::new())
        .await
        .unwrap();
    let other = engine
        .set("best pizza toppings", "basil", "m", SetOptions::new())
        .await
        .unwrap();

    // attached after the writes, so nothing was tracked
    let invalidator = CacheInvalidator::new(
        Arc::new(store.clone()),
        Some(embedder),
        InvalidatorConfig::default(),
    );
    let report = invalidator
        .invalidate_semantic("what is the capital of france", Some(0.8))
        .await
        .unwrap();

    assert_eq!(report.scanned, 2);
    assert_eq!(report.invalidated, 1);
    assert_eq!(report.skipped, 0);
    assert!(!is_live(&store, &engine, &capital).await);
    assert!(is_live(&store, &engine, &other).await);
}

#[tokio::test]
async fn test_access_stats_survive_a_new_engine() {
    let store = MemoryStore::new();
    let config = SemanticCacheConfig::builder()
        .max_entries(10)
        .eviction_policy(EvictionPolicy::Lfu)
        .eviction_hysteresis(1.0)
        .evict_on_set(false)
        .build();
    let first = engine_over(Arc::new(store.clone()), None, config.clone());

    let mut ids = Vec::new();
    for i in 0..11 {
        let id = first
            .set(&format!("q{}", i), "r", "m", SetOptions::new().tokens_used(5))
            .await
            .unwrap();
        ids.push(id);
    }
    let options = GetOptions::new().model("m");
    for _ in 0..5 {
        assert!(first.get("q0", &options).await.unwrap().is_some());
    }

    // a fresh process over the same store
    let second = engine_over(Arc::new(store.clone()), None, config);
    let report = second.enforce_capacity().await.unwrap();
    assert_eq!(report.evicted, 1);
    assert!(is_live(&store, &second, &ids[0]).await);

    let hit = second.get("q0", &options).await.unwrap().unwrap();
    assert_eq!(hit.entry.access_count, 6);
    assert_eq!(hit.entry.tokens_saved, 30);
}

#[tokio::test]
async fn test_rewriting_an_entry_resets_persisted_stats() {
    let store = MemoryStore::new();
    let engine = engine_over(Arc::new(store.clone()), None, SemanticCacheConfig::default());
    let id = engine
        .set("status page", "all green", "m", SetOptions::new())
        .await
        .unwrap();
    let options = GetOptions::new().model("m");
    for _ in 0..3 {
        engine.get("status page", &options).await.unwrap();
    }

    engine
        .set("status page", "degraded", "m", SetOptions::new())
        .await
        .unwrap();
    let key = engine.keys().for_id(&id);
    assert_eq!(store.incr_counter(&key, "access_count", 0).await.unwrap(), 0);
}
