//! Benchmarks for the cache hot paths
//!
//! Run with:
//! - `cargo bench --bench cache_bench`
//! - `cargo bench --bench cache_bench eviction -- --noplot`

use chrono::{Duration as ChronoDuration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ouroboros_cache::cache::eviction::{select_victims, EvictionCandidate};
use ouroboros_cache::compaction::{strategies, CompactionConfig, MemoryEntry};
use ouroboros_cache::embedding::cosine_similarity;
use ouroboros_cache::resilience::{HealthCheckConfig, ResilienceConfig, ResilientStore};
use ouroboros_cache::{
    EvictionPolicy, GetOptions, HashingEmbedder, MemoryStore, SemanticCacheConfig,
    SemanticCacheEngine, SetOptions,
};
use std::sync::Arc;

/// Deterministic candidates with spread-out ages and access counts
fn candidates(count: usize) -> Vec<EvictionCandidate> {
    let now = Utc::now();
    (0..count)
        .map(|i| EvictionCandidate {
            key: format!("semcache:entry:{:08x}:m", i),
            created_at: now - ChronoDuration::minutes((i * 7 % 1440) as i64),
            last_accessed: now - ChronoDuration::seconds((i * 13 % 3600) as i64),
            access_count: (i % 50) as u64,
            tokens_saved: (i % 17) as u64 * 100,
            importance: (i % 10) as f64 / 10.0,
            ttl_secs: 3600,
        })
        .collect()
}

fn embedding(dim: usize, seed: u64) -> Vec<f32> {
    (0..dim)
        .map(|i| ((i as f64 + seed as f64) * 0.1).sin() as f32)
        .collect()
}

fn bench_eviction(c: &mut Criterion) {
    let now = Utc::now();
    let mut group = c.benchmark_group("eviction");

    for size in [1_000usize, 10_000] {
        let pool = candidates(size);
        group.throughput(Throughput::Elements(size as u64));
        for policy in [EvictionPolicy::Lru, EvictionPolicy::Adaptive] {
            group.bench_with_input(
                BenchmarkId::new(policy.to_string(), size),
                &pool,
                |b, pool| b.iter(|| select_victims(policy, black_box(pool), size / 10, now)),
            );
        }
    }
    group.finish();
}

fn bench_cosine(c: &mut Criterion) {
    let a = embedding(1536, 1);
    let b = embedding(1536, 2);
    c.bench_function("cosine_similarity_1536d", |bench| {
        bench.iter(|| cosine_similarity(black_box(&a), black_box(&b)))
    });
}

fn bench_compaction(c: &mut Criterion) {
    let now = Utc::now();
    let config = CompactionConfig::default();
    let entries: Vec<MemoryEntry> = (0..2_000)
        .map(|i| {
            MemoryEntry::new(format!("m{}", i), format!("memory number {} about topic {}", i, i % 40))
                .with_importance((i % 10) as f64 / 10.0)
                .with_created_at(now - ChronoDuration::hours(i as i64 % 500))
                .with_access_count((i % 9) as u64)
        })
        .collect();

    let mut group = c.benchmark_group("compaction_2000");
    group.bench_function("statistical", |b| {
        b.iter(|| strategies::statistical(black_box(&entries), &config, now))
    });
    group.bench_function("hybrid", |b| {
        b.iter(|| strategies::hybrid(black_box(&entries), &config, now))
    });
    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    let resilience = ResilienceConfig {
        health: HealthCheckConfig {
            enabled: false,
            ..Default::default()
        },
        ..Default::default()
    };
    let engine = SemanticCacheEngine::new(
        ResilientStore::new(Arc::new(MemoryStore::new()), resilience),
        Some(Arc::new(HashingEmbedder::default())),
        SemanticCacheConfig::default(),
    )
    .expect("engine");

    rt.block_on(async {
        for i in 0..500 {
            engine
                .set(
                    &format!("how do I configure feature {}", i),
                    "see the docs",
                    "m",
                    SetOptions::new(),
                )
                .await
                .expect("seed entry");
        }
    });

    let exact = GetOptions::new().model("m");
    let any_model = GetOptions::new();
    let mut group = c.benchmark_group("lookup_500");
    group.bench_function("exact_hit", |b| {
        b.to_async(&rt)
            .iter(|| engine.get(black_box("how do I configure feature 42"), &exact))
    });
    group.bench_function("semantic_hit", |b| {
        b.to_async(&rt)
            .iter(|| engine.get(black_box("configure feature 42, how do I"), &any_model))
    });
    group.finish();
}

criterion_group!(benches, bench_eviction, bench_cosine, bench_compaction, bench_lookup);
criterion_main!(benches);
