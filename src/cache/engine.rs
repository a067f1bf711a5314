//! Semantic cache engine
//!
//! Lookups go exact-hash first, then nearest-neighbor over query embeddings.
//! Every store call goes through a [`ResilientStore`]; embedding failures
//! degrade the semantic path and are counted, never raised.

use crate::cache::config::SemanticCacheConfig;
use crate::cache::entry::{AccessRecord, CacheEntry, CacheHit, GetOptions, SetOptions};
use crate::cache::eviction::{self, EvictionCandidate};
use crate::cache::keys::{self, CacheKeys};
use crate::cache::types::{CacheStats, EvictionReport, LookupStrategy, MatchKind};
use crate::embedding::Embedder;
use crate::error::{CacheError, Result};
use crate::invalidation::CacheInvalidator;
use crate::optimizer::CacheOptimizer;
use crate::resilience::ResilientStore;
use crate::store::{Store, VectorFilter};
use chrono::Utc;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Per-entry counter fields kept next to each entry in the store
const ACCESS_COUNT_FIELD: &str = "access_count";
const TOKENS_SAVED_FIELD: &str = "tokens_saved";
const TTL_EXTENSION_FIELD: &str = "ttl_extension_secs";
const STAT_FIELDS: [&str; 3] = [ACCESS_COUNT_FIELD, TOKENS_SAVED_FIELD, TTL_EXTENSION_FIELD];

#[derive(Default)]
struct Counters {
    total_requests: AtomicU64,
    exact_hits: AtomicU64,
    semantic_hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions: AtomicU64,
    eviction_failures: AtomicU64,
    invalidations: AtomicU64,
    embedding_failures: AtomicU64,
    tokens_saved: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn load(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

struct EngineInner {
    store: ResilientStore,
    embedder: Option<Arc<dyn Embedder>>,
    config: SemanticCacheConfig,
    keys: CacheKeys,
    counters: Counters,
    access: Mutex<HashMap<String, Arc<AccessRecord>>>,
    eviction_lock: tokio::sync::Mutex<()>,
}

/// Semantic response cache over a [`ResilientStore`].
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SemanticCacheEngine {
    inner: Arc<EngineInner>,
    optimizer: Option<Arc<CacheOptimizer>>,
    invalidator: Option<Arc<CacheInvalidator>>,
}

impl SemanticCacheEngine {
    /// Create an engine. Without an embedder only exact matching is available.
    pub fn new(
        store: ResilientStore,
        embedder: Option<Arc<dyn Embedder>>,
        config: SemanticCacheConfig,
    ) -> Result<Self> {
        config.validate().map_err(CacheError::Config)?;

        info!(
            "Initializing semantic cache (max_entries: {}, policy: {}, threshold: {:.2}, semantic: {})",
            config.max_entries,
            config.eviction_policy,
            config.similarity_threshold,
            embedder.is_some()
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                keys: CacheKeys::new(config.key_prefix.clone()),
                store,
                embedder,
                config,
                counters: Counters::default(),
                access: Mutex::new(HashMap::new()),
                eviction_lock: tokio::sync::Mutex::new(()),
            }),
            optimizer: None,
            invalidator: None,
        })
    }

    /// Report every hit to `optimizer`
    pub fn with_optimizer(mut self, optimizer: Arc<CacheOptimizer>) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    /// Register every stored entry's tags and query text with `invalidator`
    pub fn with_invalidator(mut self, invalidator: Arc<CacheInvalidator>) -> Self {
        self.invalidator = Some(invalidator);
        self
    }

    pub fn config(&self) -> &SemanticCacheConfig {
        &self.inner.config
    }

    pub fn keys(&self) -> &CacheKeys {
        &self.inner.keys
    }

    pub fn store(&self) -> &ResilientStore {
        &self.inner.store
    }

    fn access(&self) -> MutexGuard<'_, HashMap<String, Arc<AccessRecord>>> {
        self.inner
            .access
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn normalize(&self, query: &str) -> String {
        keys::normalize_query(query, self.inner.config.lowercase_queries)
    }

    /// Look up a cached response for `query`
    pub async fn get(&self, query: &str, options: &GetOptions) -> Result<Option<CacheHit>> {
        let start = Instant::now();
        Counters::bump(&self.inner.counters.total_requests);

        let normalized = self.normalize(query);
        if normalized.is_empty() {
            Counters::bump(&self.inner.counters.misses);
            return Ok(None);
        }
        let query_hash = keys::query_hash(&normalized);

        if options.strategy.uses_exact() {
            let found = degrade(self.exact_lookup(&query_hash, options).await, "exact lookup")?;
            if let Some((key, entry)) = found {
                Counters::bump(&self.inner.counters.exact_hits);
                let entry = self.record_hit(&key, entry).await;
                debug!("Exact cache hit: {}", entry.id);
                return Ok(Some(CacheHit {
                    entry,
                    similarity: 1.0,
                    kind: MatchKind::Exact,
                    latency: start.elapsed(),
                }));
            }
        }

        if options.strategy.uses_semantic() {
            let found = degrade(
                self.semantic_lookup(&normalized, options).await,
                "semantic lookup",
            )?;
            if let Some((key, entry, similarity)) = found {
                Counters::bump(&self.inner.counters.semantic_hits);
                let entry = self.record_hit(&key, entry).await;
                debug!(
                    "Semantic cache hit: {} (similarity: {:.3})",
                    entry.id, similarity
                );
                return Ok(Some(CacheHit {
                    entry,
                    similarity,
                    kind: MatchKind::Semantic,
                    latency: start.elapsed(),
                }));
            }
        }

        Counters::bump(&self.inner.counters.misses);
        debug!("Cache miss: {}", query_hash);
        Ok(None)
    }

    async fn exact_lookup(
        &self,
        query_hash: &str,
        options: &GetOptions,
    ) -> Result<Option<(String, CacheEntry)>> {
        let candidates = match &options.model {
            Some(model) => vec![self.inner.keys.entry(query_hash, model)],
            None => {
                self.inner
                    .store
                    .scan_prefix(&self.inner.keys.query(query_hash))
                    .await?
            }
        };

        for key in candidates {
            if let Some(entry) = self.load_entry(&key).await? {
                if entry.query_hash == query_hash && entry.matches_metadata(&options.metadata_filter)
                {
                    return Ok(Some((key, entry)));
                }
            }
        }
        Ok(None)
    }

    async fn semantic_lookup(
        &self,
        normalized: &str,
        options: &GetOptions,
    ) -> Result<Option<(String, CacheEntry, f32)>> {
        let embedder = match &self.inner.embedder {
            Some(embedder) => embedder,
            None => return Ok(None),
        };

        let vector = match embedder.embed(normalized).await {
            Ok(vector) => vector,
            Err(e) => {
                Counters::bump(&self.inner.counters.embedding_failures);
                warn!("Embedding failed, falling back to exact matching: {}", e);
                return Ok(None);
            }
        };

        let mut filters = Vec::new();
        if let Some(model) = &options.model {
            filters.push(VectorFilter::new("model", model.clone()));
        }
        for (k, v) in &options.metadata_filter {
            filters.push(VectorFilter::new(
                crate::cache::entry::metadata_field(k),
                v.clone(),
            ));
        }

        let matches = self
            .inner
            .store
            .vector_search(
                &self.inner.config.index_name,
                &vector,
                self.inner.config.semantic_top_k,
                &filters,
            )
            .await?;

        let threshold = self.inner.config.similarity_threshold;
        for candidate in matches {
            if candidate.score < threshold {
                // results are ordered best first
                break;
            }
            if let Some(entry) = self.load_entry(&candidate.key).await? {
                return Ok(Some((candidate.key, entry, candidate.score)));
            }
        }
        Ok(None)
    }

    async fn load_entry(&self, key: &str) -> Result<Option<CacheEntry>> {
        match self.inner.store.get(key).await? {
            Some(bytes) => match serde_json::from_slice::<CacheEntry>(&bytes) {
                Ok(entry) => Ok(Some(entry)),
                Err(e) => {
                    warn!("Skipping unreadable cache entry {}: {}", key, e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Access stats for `key`. A key this process has not seen yet is seeded
    /// from the counters persisted by earlier hits.
    async fn access_record(&self, key: &str, entry: &CacheEntry) -> Arc<AccessRecord> {
        let known = self.access().get(key).cloned();
        if let Some(record) = known {
            return record;
        }
        let seeded = self.with_persisted_stats(key, entry).await;
        self.access()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AccessRecord::from_entry(&seeded)))
            .clone()
    }

    async fn with_persisted_stats(&self, key: &str, entry: &CacheEntry) -> CacheEntry {
        let mut entry = entry.clone();
        for field in STAT_FIELDS {
            let value = match self.inner.store.incr_counter(key, field, 0).await {
                Ok(value) => value.max(0) as u64,
                Err(e) => {
                    debug!("Could not read {} for {}: {}", field, key, e);
                    continue;
                }
            };
            match field {
                ACCESS_COUNT_FIELD => entry.access_count = entry.access_count.max(value),
                TOKENS_SAVED_FIELD => entry.tokens_saved = entry.tokens_saved.max(value),
                _ => {
                    entry.ttl_secs = entry
                        .ttl_secs
                        .saturating_add(value)
                        .min(self.inner.config.max_ttl.as_secs().max(entry.ttl_secs))
                }
            }
        }
        entry
    }

    /// Zero the persisted counters of a freshly written entry
    async fn reset_persisted_stats(&self, key: &str) {
        for field in STAT_FIELDS {
            let result = match self.inner.store.incr_counter(key, field, 0).await {
                Ok(0) => Ok(0),
                Ok(value) => self.inner.store.incr_counter(key, field, -value).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!("Failed to reset {} for {}: {}", field, key, e);
            }
        }
    }

    /// Access bookkeeping for a hit; returns the entry with updated stats.
    ///
    /// Store-side bookkeeping failures are logged and never fail the hit.
    async fn record_hit(&self, key: &str, mut entry: CacheEntry) -> CacheEntry {
        let record = self.access_record(key, &entry).await;
        let stats = record.touch(Utc::now(), entry.tokens_used);
        self.inner
            .counters
            .tokens_saved
            .fetch_add(entry.tokens_used, Ordering::Relaxed);

        entry.access_count = stats.access_count;
        entry.last_accessed = stats.last_accessed;
        entry.tokens_saved = stats.tokens_saved;
        entry.ttl_secs = stats.ttl_secs;

        let store = &self.inner.store;
        if let Err(e) = store.incr_counter(key, ACCESS_COUNT_FIELD, 1).await {
            warn!("Failed to bump access counter for {}: {}", key, e);
        }
        if entry.tokens_used > 0 {
            if let Err(e) = store
                .incr_counter(key, TOKENS_SAVED_FIELD, entry.tokens_used as i64)
                .await
            {
                warn!("Failed to credit saved tokens for {}: {}", key, e);
            }
        }

        if self.inner.config.adaptive_ttl {
            let config = &self.inner.config;
            let (previous, ttl) = record.extend_ttl(|current| config.extended_ttl(current));
            match store.expire(key, ttl).await {
                Ok(true) => {
                    entry.ttl_secs = ttl.as_secs();
                    let delta = ttl.as_secs().saturating_sub(previous.as_secs()) as i64;
                    if delta > 0 {
                        if let Err(e) = store.incr_counter(key, TTL_EXTENSION_FIELD, delta).await {
                            warn!("Failed to persist TTL extension for {}: {}", key, e);
                        }
                    }
                }
                Ok(false) => debug!("Entry {} expired before its TTL could be extended", key),
                Err(e) => warn!("Failed to extend TTL for {}: {}", key, e),
            }
        }

        if let Some(optimizer) = &self.optimizer {
            optimizer.record_access(key, Some(&entry.query));
        }

        entry
    }

    /// Store a response and return its entry id
    pub async fn set(
        &self,
        query: &str,
        response: &str,
        model: &str,
        options: SetOptions,
    ) -> Result<String> {
        let normalized = self.normalize(query);
        if normalized.is_empty() {
            return Err(CacheError::Other("cannot cache an empty query".to_string()));
        }
        let query_hash = keys::query_hash(&normalized);
        let id = keys::entry_id(&query_hash, model);
        let key = self.inner.keys.entry(&query_hash, model);

        let embedding = match &self.inner.embedder {
            Some(embedder) => match embedder.embed(&normalized).await {
                Ok(vector) => Some(vector),
                Err(e) => {
                    Counters::bump(&self.inner.counters.embedding_failures);
                    warn!("Embedding failed for {}, entry will be exact-only: {}", id, e);
                    None
                }
            },
            None => None,
        };

        let ttl = options
            .ttl
            .unwrap_or_else(|| self.inner.config.ttl_with_jitter());
        let now = Utc::now();
        let entry = CacheEntry {
            id: id.clone(),
            query: normalized.clone(),
            query_hash,
            response: response.to_string(),
            embedding,
            model: model.to_string(),
            metadata: options.metadata,
            tags: options.tags,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            ttl_secs: ttl.as_secs().max(1),
            importance: options.importance,
            tokens_used: options.tokens_used,
            tokens_saved: 0,
        };

        let payload = serde_json::to_vec(&entry)?;
        self.inner
            .store
            .set(&key, &payload, Some(entry.ttl()))
            .await?;

        if let Some(vector) = &entry.embedding {
            if let Err(e) = self
                .inner
                .store
                .upsert_vector(
                    &self.inner.config.index_name,
                    &key,
                    vector,
                    &entry.index_fields(),
                )
                .await
            {
                warn!("Failed to index embedding for {}: {}", id, e);
            }
        }

        self.reset_persisted_stats(&key).await;
        self.access()
            .insert(key.clone(), Arc::new(AccessRecord::from_entry(&entry)));
        Counters::bump(&self.inner.counters.sets);
        debug!("Cached response {} (ttl: {}s)", id, entry.ttl_secs);

        if let Some(invalidator) = &self.invalidator {
            invalidator.track(&key, Some(&entry.query), &entry.tags).await;
        }

        if self.inner.config.evict_on_set {
            if let Err(e) = self.enforce_capacity().await {
                warn!("Capacity check after set failed: {}", e);
            }
        }

        Ok(id)
    }

    /// Evict down to the hysteresis target if the live count exceeds `max_entries`
    pub async fn enforce_capacity(&self) -> Result<EvictionReport> {
        let _guard = self.inner.eviction_lock.lock().await;
        let config = &self.inner.config;

        let keys = self
            .inner
            .store
            .scan_prefix(&self.inner.keys.entries())
            .await?;
        let mut report = EvictionReport {
            scanned: keys.len(),
            live_after: keys.len(),
            ..Default::default()
        };

        let live: HashSet<&String> = keys.iter().collect();
        self.access().retain(|k, _| live.contains(k));

        if keys.len() <= config.max_entries {
            return Ok(report);
        }

        let mut candidates = Vec::with_capacity(keys.len());
        for key in &keys {
            match self.load_entry(key).await {
                Ok(Some(entry)) => candidates.push(self.candidate(key, &entry).await),
                Ok(None) => report.live_after -= 1,
                Err(e) if e.is_unavailable() => return Err(e),
                Err(e) => warn!("Could not load {} for eviction scoring: {}", key, e),
            }
        }

        let target = config.eviction_target();
        let surplus = report.live_after.saturating_sub(target);
        let now = Utc::now();
        let victims = eviction::select_victims(config.eviction_policy, &candidates, surplus, now);

        info!(
            "Evicting {} of {} entries ({} policy, target {})",
            victims.len(),
            report.live_after,
            config.eviction_policy,
            target
        );

        for key in victims {
            match self.inner.store.delete(&key).await {
                Ok(_) => {
                    report.evicted += 1;
                    report.live_after -= 1;
                    self.forget(&key);
                }
                Err(e) => {
                    report.failed += 1;
                    warn!("Failed to evict {}: {}", key, e);
                }
            }
        }

        self.inner
            .counters
            .evictions
            .fetch_add(report.evicted as u64, Ordering::Relaxed);
        self.inner
            .counters
            .eviction_failures
            .fetch_add(report.failed as u64, Ordering::Relaxed);

        Ok(report)
    }

    async fn candidate(&self, key: &str, entry: &CacheEntry) -> EvictionCandidate {
        let stats = self.access_record(key, entry).await.stats();
        let mut candidate = EvictionCandidate::from_entry(key, entry);
        candidate.access_count = stats.access_count;
        candidate.last_accessed = stats.last_accessed;
        candidate.tokens_saved = stats.tokens_saved;
        candidate.ttl_secs = stats.ttl_secs;
        candidate
    }

    fn forget(&self, key: &str) {
        self.access().remove(key);
        if let Some(invalidator) = &self.invalidator {
            invalidator.untrack(key);
        }
    }

    /// Delete entries by id, by query (optionally narrowed to a model), or
    /// by model alone. Returns the number removed; no match is not an error.
    pub async fn invalidate(
        &self,
        query: Option<&str>,
        id: Option<&str>,
        model: Option<&str>,
    ) -> Result<usize> {
        let store = &self.inner.store;
        let layout = &self.inner.keys;

        let targets: Vec<String> = match (id, query, model) {
            (Some(id), _, _) => vec![layout.for_id(id)],
            (None, Some(query), model) => {
                let query_hash = keys::query_hash(&self.normalize(query));
                match model {
                    Some(model) => vec![layout.entry(&query_hash, model)],
                    None => store.scan_prefix(&layout.query(&query_hash)).await?,
                }
            }
            (None, None, Some(model)) => store
                .scan_prefix(&layout.entries())
                .await?
                .into_iter()
                .filter(|key| layout.model_of(key) == Some(model))
                .collect(),
            (None, None, None) => return Ok(0),
        };

        let mut removed = 0;
        for key in targets {
            if store.delete(&key).await? {
                removed += 1;
            }
            self.forget(&key);
        }

        if removed > 0 {
            self.inner
                .counters
                .invalidations
                .fetch_add(removed as u64, Ordering::Relaxed);
            info!("Invalidated {} cache entries", removed);
        }
        Ok(removed)
    }

    /// Delete every entry in this engine's namespace
    pub async fn clear(&self) -> Result<usize> {
        let keys = self
            .inner
            .store
            .scan_prefix(&self.inner.keys.entries())
            .await?;
        let mut removed = 0;
        for key in keys {
            if self.inner.store.delete(&key).await? {
                removed += 1;
            }
            self.forget(&key);
        }
        info!("Cleared {} cache entries", removed);
        Ok(removed)
    }

    /// Cache-aside lookup: return the cached response or compute, store and
    /// return a fresh one. The flag is true for cached responses.
    pub async fn get_or_compute<F, Fut>(
        &self,
        query: &str,
        model: &str,
        compute: F,
    ) -> Result<(String, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<String>>,
    {
        let options = GetOptions::new()
            .model(model)
            .strategy(self.inner.config.default_strategy);
        match self.get(query, &options).await {
            Ok(Some(hit)) => return Ok((hit.entry.response, true)),
            Ok(None) => {}
            Err(e) => warn!("Cache lookup failed, computing directly: {}", e),
        }

        let response = compute().await?;
        if let Err(e) = self.set(query, &response, model, SetOptions::default()).await {
            warn!("Failed to cache computed response: {}", e);
        }
        Ok((response, false))
    }

    /// Streaming cache-aside lookup.
    ///
    /// On a hit the cached response is yielded as one chunk. On a miss the
    /// chunks of `stream_fn` are passed through as they arrive and the
    /// concatenated text is stored once the stream ends without error.
    pub async fn get_or_compute_stream<F, S>(
        &self,
        query: &str,
        model: &str,
        stream_fn: F,
    ) -> Result<(BoxStream<'static, Result<String>>, bool)>
    where
        F: FnOnce() -> S,
        S: Stream<Item = anyhow::Result<String>> + Send + 'static,
    {
        let options = GetOptions::new()
            .model(model)
            .strategy(self.inner.config.default_strategy);
        match self.get(query, &options).await {
            Ok(Some(hit)) => {
                let response = hit.entry.response;
                return Ok((stream::once(async move { Ok(response) }).boxed(), true));
            }
            Ok(None) => {}
            Err(e) => warn!("Cache lookup failed, streaming directly: {}", e),
        }

        let state = StreamState {
            upstream: stream_fn().boxed(),
            buffer: String::new(),
            failed: false,
            pending_set: Some(PendingSet {
                engine: self.clone(),
                query: query.to_string(),
                model: model.to_string(),
            }),
        };

        let chunks = stream::unfold(state, |mut state| async move {
            match state.upstream.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.push_str(&chunk);
                    Some((Ok(chunk), state))
                }
                Some(Err(e)) => {
                    state.failed = true;
                    Some((Err(CacheError::Compute(e)), state))
                }
                None => {
                    if let Some(pending) = state.pending_set.take() {
                        if !state.failed {
                            pending.store(&state.buffer).await;
                        }
                    }
                    None
                }
            }
        });

        Ok((chunks.boxed(), false))
    }

    pub async fn stats(&self) -> CacheStats {
        let c = &self.inner.counters;
        let entries = self
            .inner
            .store
            .scan_prefix(&self.inner.keys.entries())
            .await
            .map(|found| found.len())
            .ok();

        CacheStats {
            total_requests: Counters::load(&c.total_requests),
            exact_hits: Counters::load(&c.exact_hits),
            semantic_hits: Counters::load(&c.semantic_hits),
            misses: Counters::load(&c.misses),
            sets: Counters::load(&c.sets),
            evictions: Counters::load(&c.evictions),
            eviction_failures: Counters::load(&c.eviction_failures),
            invalidations: Counters::load(&c.invalidations),
            embedding_failures: Counters::load(&c.embedding_failures),
            tokens_saved: Counters::load(&c.tokens_saved),
            entries,
            resilience: self.inner.store.guard().stats(),
        }
    }

    /// Strategy configured for cache-aside calls
    pub fn default_strategy(&self) -> LookupStrategy {
        self.inner.config.default_strategy
    }
}

struct PendingSet {
    engine: SemanticCacheEngine,
    query: String,
    model: String,
}

impl PendingSet {
    async fn store(self, response: &str) {
        if let Err(e) = self
            .engine
            .set(&self.query, response, &self.model, SetOptions::default())
            .await
        {
            warn!("Failed to cache streamed response: {}", e);
        }
    }
}

struct StreamState {
    upstream: BoxStream<'static, anyhow::Result<String>>,
    buffer: String,
    failed: bool,
    pending_set: Option<PendingSet>,
}

/// Swallow everything but store-unavailable errors, logging what was dropped
fn degrade<T>(result: Result<Option<T>>, context: &str) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(value),
        Err(e) if e.is_unavailable() => Err(e),
        Err(e) => {
            warn!("Cache {} degraded: {}", context, e);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::resilience::{HealthCheckConfig, ResilienceConfig};
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn resilient(store: &MemoryStore) -> ResilientStore {
        ResilientStore::new(
            Arc::new(store.clone()),
            ResilienceConfig {
                health: HealthCheckConfig {
                    enabled: false,
                    ..Default::default()
                },
                ..Default::default()
            },
        )
    }

    fn engine(config: SemanticCacheConfig) -> (SemanticCacheEngine, MemoryStore) {
        let store = MemoryStore::new();
        let engine = SemanticCacheEngine::new(
            resilient(&store),
            Some(Arc::new(HashingEmbedder::default())),
            config,
        )
        .unwrap();
        (engine, store)
    }

    #[tokio::test]
    async fn test_set_then_get_is_exact_hit() {
        let (engine, _) = engine(SemanticCacheConfig::default());
        let id = engine
            .set("What is Rust?", "A language", "gpt-4", SetOptions::new())
            .await
            .unwrap();

        let hit = engine
            .get("  what   is rust? ", &GetOptions::new())
            .await
            .unwrap()
            .expect("hit");

        assert_eq!(hit.entry.id, id);
        assert_eq!(hit.similarity, 1.0);
        assert!(hit.is_exact());
        assert_eq!(hit.entry.access_count, 1);
    }

    #[tokio::test]
    async fn test_total_requests_counted_once() {
        let (engine, _) = engine(SemanticCacheConfig::default());
        engine
            .set("alpha beta", "x", "m", SetOptions::new())
            .await
            .unwrap();

        engine.get("alpha beta", &GetOptions::new()).await.unwrap();
        engine.get("gamma delta", &GetOptions::new()).await.unwrap();

        let stats = engine.stats().await;
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.exact_hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, Some(1));
    }

    #[tokio::test]
    async fn test_semantic_hit_and_threshold() {
        let config = SemanticCacheConfig::builder()
            .similarity_threshold(0.8)
            .build();
        let (engine, _) = engine(config);
        engine
            .set(
                "how do i bake sourdough bread at home",
                "Use a starter",
                "m",
                SetOptions::new(),
            )
            .await
            .unwrap();

        let hit = engine
            .get(
                "how do i bake sourdough bread at home today",
                &GetOptions::new().strategy(LookupStrategy::SemanticOnly),
            )
            .await
            .unwrap()
            .expect("semantic hit");
        assert_eq!(hit.kind, MatchKind::Semantic);
        assert!(hit.similarity >= 0.8 && hit.similarity < 1.0);

        let miss = engine
            .get(
                "kubernetes pod scheduling",
                &GetOptions::new().strategy(LookupStrategy::SemanticOnly),
            )
            .await
            .unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn test_exact_only_skips_semantic() {
        let (engine, _) = engine(SemanticCacheConfig::default());
        engine
            .set("one two three four", "x", "m", SetOptions::new())
            .await
            .unwrap();

        let result = engine
            .get(
                "one two three four five",
                &GetOptions::new().strategy(LookupStrategy::ExactOnly),
            )
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_model_and_metadata_filters() {
        let (engine, _) = engine(SemanticCacheConfig::default());
        engine
            .set(
                "shared question",
                "from a",
                "model-a",
                SetOptions::new().metadata("tenant", "acme"),
            )
            .await
            .unwrap();

        let wrong_model = engine
            .get("shared question", &GetOptions::new().model("model-b"))
            .await
            .unwrap();
        assert!(wrong_model.is_none());

        let wrong_tenant = engine
            .get("shared question", &GetOptions::new().filter("tenant", "other"))
            .await
            .unwrap();
        assert!(wrong_tenant.is_none());

        let hit = engine
            .get(
                "shared question",
                &GetOptions::new().model("model-a").filter("tenant", "acme"),
            )
            .await
            .unwrap();
        assert_eq!(hit.unwrap().response(), "from a");
    }

    #[tokio::test]
    async fn test_adaptive_ttl_extension_capped() {
        let config = SemanticCacheConfig::builder()
            .default_ttl(Duration::from_secs(100))
            .max_ttl(Duration::from_secs(200))
            .build();
        let (engine, store) = engine(config);
        engine.set("ttl query", "x", "m", SetOptions::new()).await.unwrap();
        let key = engine.keys().entry(&keys::query_hash("ttl query"), "m");

        engine.get("ttl query", &GetOptions::new()).await.unwrap();
        let ttl = store.ttl(&key).await.unwrap();
        assert!(ttl > Duration::from_secs(140) && ttl <= Duration::from_secs(150));

        engine.get("ttl query", &GetOptions::new()).await.unwrap();
        engine.get("ttl query", &GetOptions::new()).await.unwrap();
        let ttl = store.ttl(&key).await.unwrap();
        assert!(ttl <= Duration::from_secs(200));
        assert!(ttl > Duration::from_secs(190));
    }

    #[tokio::test]
    async fn test_tokens_saved_credited_per_hit() {
        let (engine, _) = engine(SemanticCacheConfig::default());
        engine
            .set("tokens", "x", "m", SetOptions::new().tokens_used(120))
            .await
            .unwrap();

        engine.get("tokens", &GetOptions::new()).await.unwrap();
        let hit = engine.get("tokens", &GetOptions::new()).await.unwrap().unwrap();

        assert_eq!(hit.entry.tokens_saved, 240);
        assert_eq!(engine.stats().await.tokens_saved, 240);
    }

    #[tokio::test]
    async fn test_invalidate_variants() {
        let (engine, _) = engine(SemanticCacheConfig::default());
        let id = engine.set("q1", "a", "m1", SetOptions::new()).await.unwrap();
        engine.set("q1", "b", "m2", SetOptions::new()).await.unwrap();
        engine.set("q2", "c", "m2", SetOptions::new()).await.unwrap();

        assert_eq!(engine.invalidate(None, Some(&id), None).await.unwrap(), 1);
        assert_eq!(engine.invalidate(None, Some(&id), None).await.unwrap(), 0);
        assert_eq!(engine.invalidate(None, None, Some("m2")).await.unwrap(), 2);
        assert_eq!(engine.invalidate(None, None, None).await.unwrap(), 0);
        assert_eq!(engine.stats().await.entries, Some(0));
    }

    #[tokio::test]
    async fn test_invalidate_by_query_all_models() {
        let (engine, _) = engine(SemanticCacheConfig::default());
        engine.set("Same Q", "a", "m1", SetOptions::new()).await.unwrap();
        engine.set("same q", "b", "m2", SetOptions::new()).await.unwrap();

        assert_eq!(engine.invalidate(Some("SAME Q"), None, None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_get_or_compute() {
        let (engine, _) = engine(SemanticCacheConfig::default());

        let (first, cached) = engine
            .get_or_compute("compute me", "m", || async { Ok("fresh".to_string()) })
            .await
            .unwrap();
        assert_eq!(first, "fresh");
        assert!(!cached);

        let (second, cached) = engine
            .get_or_compute("compute me", "m", || async {
                Err::<String, _>(anyhow::anyhow!("should not be called"))
            })
            .await
            .unwrap();
        assert_eq!(second, "fresh");
        assert!(cached);
    }

    #[tokio::test]
    async fn test_compute_error_propagates() {
        let (engine, _) = engine(SemanticCacheConfig::default());
        let result = engine
            .get_or_compute("failing", "m", || async {
                Err::<String, _>(anyhow::anyhow!("llm down"))
            })
            .await;
        assert!(matches!(result, Err(CacheError::Compute(_))));
    }

    #[tokio::test]
    async fn test_stream_buffers_and_sets_once() {
        let (engine, _) = engine(SemanticCacheConfig::default());

        let (chunks, cached) = engine
            .get_or_compute_stream("stream me", "m", || {
                stream::iter(vec![
                    Ok::<_, anyhow::Error>("Hel".to_string()),
                    Ok("lo".to_string()),
                ])
            })
            .await
            .unwrap();
        assert!(!cached);
        let collected: Vec<String> = chunks.map(|c| c.unwrap()).collect().await;
        assert_eq!(collected, vec!["Hel", "lo"]);
        assert_eq!(engine.stats().await.sets, 1);

        let (chunks, cached) = engine
            .get_or_compute_stream("stream me", "m", || {
                stream::iter(Vec::<anyhow::Result<String>>::new())
            })
            .await
            .unwrap();
        assert!(cached);
        let collected: Vec<String> = chunks.map(|c| c.unwrap()).collect().await;
        assert_eq!(collected, vec!["Hello"]);
    }

    #[tokio::test]
    async fn test_failed_stream_is_not_cached() {
        let (engine, _) = engine(SemanticCacheConfig::default());

        let (chunks, _) = engine
            .get_or_compute_stream("broken stream", "m", || {
                stream::iter(vec![
                    Ok::<_, anyhow::Error>("partial".to_string()),
                    Err(anyhow::anyhow!("connection dropped")),
                ])
            })
            .await
            .unwrap();
        let results: Vec<Result<String>> = chunks.collect().await;
        assert!(results[1].is_err());
        assert_eq!(engine.stats().await.sets, 0);
    }

    #[tokio::test]
    async fn test_eviction_on_set() {
        let config = SemanticCacheConfig::builder()
            .max_entries(10)
            .eviction_policy(crate::cache::types::EvictionPolicy::Lru)
            .build();
        let (engine, _) = engine(config);

        for i in 0..11 {
            engine
                .set(&format!("question {}", i), "x", "m", SetOptions::new())
                .await
                .unwrap();
        }

        let stats = engine.stats().await;
        assert_eq!(stats.entries, Some(9));
        assert_eq!(stats.evictions, 2);
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades_to_exact() {
        let store = MemoryStore::new();
        let engine = SemanticCacheEngine::new(
            resilient(&store),
            Some(Arc::new(HashingEmbedder::default())),
            SemanticCacheConfig::default(),
        )
        .unwrap();

        // punctuation-only text has no words to embed
        engine.set("???", "x", "m", SetOptions::new()).await.unwrap();
        let hit = engine.get("???", &GetOptions::new()).await.unwrap();

        assert!(hit.is_some());
        assert_eq!(engine.stats().await.embedding_failures, 1);
    }
}
