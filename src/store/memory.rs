//! In-process store backend with TTL expiry and brute-force vector search

use crate::embedding::cosine_similarity;
use crate::error::{CacheError, Result};
use crate::store::{Store, VectorFilter, VectorMatch};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// In-memory implementation of [`Store`].
///
/// This implementation provides:
/// - Thread-safe async access via RwLock
/// - Lazy TTL expiration (expired keys vanish on the next read or scan)
/// - Hash-style counters that live and die with their key
/// - Exhaustive cosine-similarity vector search
///
/// It backs the test-suite and the demo, and is usable wherever the cache
/// only needs to live inside one process.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryInner>>,
}

#[derive(Default)]
struct MemoryInner {
    /// Main storage: key -> value
    values: HashMap<String, StoredValue>,

    /// Counter fields per key
    counters: HashMap<String, HashMap<String, i64>>,

    /// Vector indexes: index name -> key -> vector
    indexes: HashMap<String, HashMap<String, IndexedVector>>,
}

struct StoredValue {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

struct IndexedVector {
    vector: Vec<f32>,
    fields: HashMap<String, String>,
}

impl MemoryInner {
    fn is_live(&self, key: &str, now: Instant) -> bool {
        self.values
            .get(key)
            .map(|v| !v.is_expired(now))
            .unwrap_or(false)
    }

    fn purge(&mut self, key: &str) -> bool {
        let removed = self.values.remove(key).is_some();
        self.counters.remove(key);
        for index in self.indexes.values_mut() {
            index.remove(key);
        }
        removed
    }

    fn purge_if_expired(&mut self, key: &str, now: Instant) {
        let expired = self
            .values
            .get(key)
            .map(|v| v.is_expired(now))
            .unwrap_or(false);
        if expired {
            debug!("Expiring key: {}", key);
            self.purge(key);
        }
    }
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        info!("Initializing in-memory store");
        Self::default()
    }

    /// Number of live keys
    pub async fn len(&self) -> usize {
        let inner = self.inner.read().await;
        let now = Instant::now();
        inner.values.values().filter(|v| !v.is_expired(now)).count()
    }

    /// Check if the store holds no live keys
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remaining time-to-live of `key`, if it exists and has an expiry
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let inner = self.inner.read().await;
        let now = Instant::now();
        inner
            .values
            .get(key)
            .filter(|v| !v.is_expired(now))
            .and_then(|v| v.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut inner = self.inner.write().await;
        inner.purge_if_expired(key, Instant::now());
        Ok(inner.values.get(key).map(|v| v.data.clone()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let mut inner = self.inner.write().await;
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        inner.values.insert(
            key.to_string(),
            StoredValue {
                data: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        let live = inner.is_live(key, now);
        inner.purge(key);
        Ok(live)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        inner.purge_if_expired(key, now);
        match inner.values.get_mut(key) {
            Some(value) => {
                value.expires_at = Some(now + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn incr_counter(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut inner = self.inner.write().await;
        inner.purge_if_expired(key, Instant::now());
        let counter = inner
            .counters
            .entry(key.to_string())
            .or_default()
            .entry(field.to_string())
            .or_insert(0);
        *counter += delta;
        Ok(*counter)
    }

    async fn upsert_vector(
        &self,
        index: &str,
        key: &str,
        vector: &[f32],
        fields: &HashMap<String, String>,
    ) -> Result<()> {
        if vector.is_empty() {
            return Err(CacheError::PermanentStore(format!(
                "refusing to index empty vector for {}",
                key
            )));
        }

        let mut inner = self.inner.write().await;
        inner.indexes.entry(index.to_string()).or_default().insert(
            key.to_string(),
            IndexedVector {
                vector: vector.to_vec(),
                fields: fields.clone(),
            },
        );
        Ok(())
    }

    async fn vector_search(
        &self,
        index: &str,
        vector: &[f32],
        top_k: usize,
        filters: &[VectorFilter],
    ) -> Result<Vec<VectorMatch>> {
        let mut inner = self.inner.write().await;
        let now = Instant::now();

        let stale: Vec<String> = match inner.indexes.get(index) {
            Some(entries) => entries
                .keys()
                .filter(|key| !inner.is_live(key, now))
                .cloned()
                .collect(),
            None => return Ok(Vec::new()),
        };
        for key in &stale {
            inner.purge(key);
        }

        let mut matches: Vec<VectorMatch> = inner
            .indexes
            .get(index)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(_, indexed)| filters.iter().all(|f| f.matches(&indexed.fields)))
                    .filter(|(_, indexed)| indexed.vector.len() == vector.len())
                    .map(|(key, indexed)| VectorMatch {
                        key: key.clone(),
                        score: cosine_similarity(vector, &indexed.vector),
                        fields: indexed.fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.key.cmp(&b.key))
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut inner = self.inner.write().await;
        let now = Instant::now();

        let expired: Vec<String> = inner
            .values
            .iter()
            .filter(|(key, value)| key.starts_with(prefix) && value.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.purge(key);
        }

        let mut keys: Vec<String> = inner
            .values
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_set_and_get() {
        let store = MemoryStore::new();
        store.set("key1", b"value1", None).await.unwrap();

        let value = store.get("key1").await.unwrap();
        assert_eq!(value, Some(b"value1".to_vec()));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_ttl_expiration() {
        let store = MemoryStore::new();
        store
            .set("key1", b"value1", Some(Duration::from_millis(50)))
            .await
            .unwrap();

        assert!(store.get("key1").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(store.get("key1").await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_expire_extends_ttl() {
        let store = MemoryStore::new();
        store
            .set("key1", b"v", Some(Duration::from_secs(10)))
            .await
            .unwrap();

        assert!(store.expire("key1", Duration::from_secs(100)).await.unwrap());
        assert!(store.ttl("key1").await.unwrap() > Duration::from_secs(50));
        assert!(!store.expire("missing", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_reports_presence() {
        let store = MemoryStore::new();
        store.set("key1", b"v", None).await.unwrap();

        assert!(store.delete("key1").await.unwrap());
        assert!(!store.delete("key1").await.unwrap());
    }

    #[tokio::test]
    async fn test_counters_die_with_key() {
        let store = MemoryStore::new();
        store.set("key1", b"v", None).await.unwrap();

        assert_eq!(store.incr_counter("key1", "hits", 1).await.unwrap(), 1);
        assert_eq!(store.incr_counter("key1", "hits", 2).await.unwrap(), 3);

        store.delete("key1").await.unwrap();
        assert_eq!(store.incr_counter("key1", "hits", 1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_vector_search_orders_and_filters() {
        let store = MemoryStore::new();
        let mut gpt = HashMap::new();
        gpt.insert("model".to_string(), "gpt-4".to_string());
        let mut claude = HashMap::new();
        claude.insert("model".to_string(), "claude".to_string());

        for (key, vector, fields) in [
            ("a", vec![1.0, 0.0], &gpt),
            ("b", vec![0.7, 0.7], &gpt),
            ("c", vec![1.0, 0.0], &claude),
        ] {
            store.set(key, b"v", None).await.unwrap();
            store.upsert_vector("idx", key, &vector, fields).await.unwrap();
        }

        let hits = store
            .vector_search("idx", &[1.0, 0.0], 10, &[VectorFilter::new("model", "gpt-4")])
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].key, "a");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].key, "b");
    }

    #[tokio::test]
    async fn test_vector_vanishes_with_key() {
        let store = MemoryStore::new();
        store.set("a", b"v", None).await.unwrap();
        store
            .upsert_vector("idx", "a", &[1.0, 0.0], &HashMap::new())
            .await
            .unwrap();

        store.delete("a").await.unwrap();
        let hits = store.vector_search("idx", &[1.0, 0.0], 5, &[]).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_scan_prefix() {
        let store = MemoryStore::new();
        store.set("ns:entry:1", b"v", None).await.unwrap();
        store.set("ns:entry:2", b"v", None).await.unwrap();
        store.set("other:1", b"v", None).await.unwrap();
        store
            .set("ns:entry:3", b"v", Some(Duration::from_millis(1)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let keys = store.scan_prefix("ns:entry:").await.unwrap();
        assert_eq!(keys, vec!["ns:entry:1".to_string(), "ns:entry:2".to_string()]);
    }
}
