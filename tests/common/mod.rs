//! Fault-injecting store and embedder shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use ouroboros_cache::embedding::{Embedder, HashingEmbedder, Summarizer};
use ouroboros_cache::store::{MemoryStore, Store, VectorFilter, VectorMatch};
use ouroboros_cache::{CacheError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A [`MemoryStore`] that can be told to fail
#[derive(Clone, Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    transient_failures: Arc<AtomicU32>,
    permanent: Arc<AtomicBool>,
    ping_down: Arc<AtomicBool>,
    ping_delay_ms: Arc<AtomicU64>,
    calls: Arc<AtomicU32>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` data calls with a transient error
    pub fn fail_next(&self, n: u32) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    pub fn set_permanent_failure(&self, on: bool) {
        self.permanent.store(on, Ordering::SeqCst);
    }

    pub fn set_ping_down(&self, down: bool) {
        self.ping_down.store(down, Ordering::SeqCst);
    }

    /// Make every ping sleep before answering
    pub fn set_ping_delay(&self, delay: Duration) {
        self.ping_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Data calls that reached this store
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn fault(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.permanent.load(Ordering::SeqCst) {
            return Err(CacheError::PermanentStore("index missing".into()));
        }
        let injected = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(CacheError::TransientStore("connection reset".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.fault()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.fault()?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.fault()?;
        self.inner.delete(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.fault()?;
        self.inner.expire(key, ttl).await
    }

    async fn incr_counter(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        self.fault()?;
        self.inner.incr_counter(key, field, delta).await
    }

    async fn upsert_vector(
        &self,
        index: &str,
        key: &str,
        vector: &[f32],
        fields: &HashMap<String, String>,
    ) -> Result<()> {
        self.fault()?;
        self.inner.upsert_vector(index, key, vector, fields).await
    }

    async fn vector_search(
        &self,
        index: &str,
        vector: &[f32],
        top_k: usize,
        filters: &[VectorFilter],
    ) -> Result<Vec<VectorMatch>> {
        self.fault()?;
        self.inner.vector_search(index, vector, top_k, filters).await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.fault()?;
        self.inner.scan_prefix(prefix).await
    }

    async fn ping(&self) -> Result<()> {
        let delay = self.ping_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.ping_down.load(Ordering::SeqCst) {
            return Err(CacheError::TransientStore("ping refused".into()));
        }
        Ok(())
    }
}

/// A [`HashingEmbedder`] that can be switched off
#[derive(Clone, Default)]
pub struct SwitchableEmbedder {
    inner: HashingEmbedder,
    down: Arc<AtomicBool>,
}

impl SwitchableEmbedder {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl Embedder for SwitchableEmbedder {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.down.load(Ordering::SeqCst) {
            return Err(CacheError::EmbeddingUnavailable("model offline".into()));
        }
        self.inner.embed(text).await
    }
}

/// Summarizer that keeps the first few words of each text
#[derive(Clone, Default)]
pub struct TruncatingSummarizer {
    down: Arc<AtomicBool>,
    calls: Arc<AtomicU32>,
}

impl TruncatingSummarizer {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarizer for TruncatingSummarizer {
    async fn summarize(&self, texts: &[String]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(CacheError::SummarizerUnavailable("rate limited".into()));
        }
        let heads: Vec<String> = texts
            .iter()
            .map(|t| t.split_whitespace().take(2).collect::<Vec<_>>().join(" "))
            .collect();
        Ok(heads.join("; "))
    }
}
