//! Cache entries, hits and per-entry access bookkeeping

use crate::cache::types::{LookupStrategy, MatchKind};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// A cached response, persisted as JSON under its entry key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// `{query_hash}:{model}`
    pub id: String,

    /// Normalized query text
    pub query: String,

    pub query_hash: String,

    pub response: String,

    /// Query embedding, absent if the embedder was unavailable at set time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    pub model: String,

    #[serde(default)]
    pub metadata: HashMap<String, Value>,

    #[serde(default)]
    pub tags: Vec<String>,

    pub created_at: DateTime<Utc>,

    /// Last access time (for LRU tracking)
    pub last_accessed: DateTime<Utc>,

    /// Number of times this entry has been served
    #[serde(default)]
    pub access_count: u64,

    pub ttl_secs: u64,

    /// Caller-assigned value of the entry (0.0 - 1.0)
    #[serde(default)]
    pub importance: f64,

    /// Tokens credited to the cache on each hit
    #[serde(default)]
    pub tokens_used: u64,

    /// Cumulative tokens saved by hits on this entry
    #[serde(default)]
    pub tokens_saved: u64,
}

impl CacheEntry {
    /// Age in fractional hours at `now`
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        ((now - self.created_at).num_milliseconds().max(0) as f64) / 3_600_000.0
    }

    /// When the entry expires under its original TTL
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + chrono::Duration::seconds(self.ttl_secs as i64)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Check every filter pair against the metadata, comparing string forms
    pub fn matches_metadata(&self, filter: &HashMap<String, String>) -> bool {
        filter.iter().all(|(k, v)| {
            self.metadata
                .get(k)
                .map(|value| metadata_string(value) == *v)
                .unwrap_or(false)
        })
    }

    /// Fields indexed next to the embedding for filtered vector search
    pub fn index_fields(&self) -> HashMap<String, String> {
        let mut fields = HashMap::new();
        fields.insert("model".to_string(), self.model.clone());
        for (k, v) in &self.metadata {
            if !v.is_object() && !v.is_array() {
                fields.insert(metadata_field(k), metadata_string(v));
            }
        }
        fields
    }

    /// Check if entry has a specific tag
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Indexed field name for a metadata key
pub(crate) fn metadata_field(key: &str) -> String {
    format!("meta.{}", key)
}

fn metadata_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A successful lookup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheHit {
    /// The matched entry, with access stats as of this hit
    pub entry: CacheEntry,
    /// 1.0 for exact matches
    pub similarity: f32,
    pub kind: MatchKind,
    pub latency: Duration,
}

impl CacheHit {
    pub fn is_exact(&self) -> bool {
        self.kind == MatchKind::Exact
    }

    pub fn response(&self) -> &str {
        &self.entry.response
    }
}

/// Options for a lookup
#[derive(Debug, Clone)]
pub struct GetOptions {
    pub model: Option<String>,
    pub strategy: LookupStrategy,
    pub metadata_filter: HashMap<String, String>,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            model: None,
            strategy: LookupStrategy::Hybrid,
            metadata_filter: HashMap::new(),
        }
    }
}

impl GetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn strategy(mut self, strategy: LookupStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata_filter.insert(key.into(), value.into());
        self
    }
}

/// Options for storing a response
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    pub metadata: HashMap<String, Value>,
    /// Explicit TTL; the configured default applies otherwise
    pub ttl: Option<Duration>,
    pub tokens_used: u64,
    pub importance: f64,
    pub tags: Vec<String>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn tokens_used(mut self, tokens: u64) -> Self {
        self.tokens_used = tokens;
        self
    }

    pub fn importance(mut self, importance: f64) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// In-process access stats for one entry key.
///
/// Concurrent hits update these with atomic increments; `last_accessed_ms`
/// only ever moves forward.
#[derive(Debug)]
pub(crate) struct AccessRecord {
    access_count: AtomicU64,
    last_accessed_ms: AtomicI64,
    tokens_saved: AtomicU64,
    ttl_secs: AtomicU64,
}

/// Snapshot of an [`AccessRecord`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct AccessStats {
    pub access_count: u64,
    pub last_accessed: DateTime<Utc>,
    pub tokens_saved: u64,
    pub ttl_secs: u64,
}

impl AccessRecord {
    pub fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            access_count: AtomicU64::new(entry.access_count),
            last_accessed_ms: AtomicI64::new(entry.last_accessed.timestamp_millis()),
            tokens_saved: AtomicU64::new(entry.tokens_saved),
            ttl_secs: AtomicU64::new(entry.ttl_secs),
        }
    }

    /// Record one hit at `now`, returning the stats after it
    pub fn touch(&self, now: DateTime<Utc>, tokens: u64) -> AccessStats {
        let access_count = self.access_count.fetch_add(1, Ordering::AcqRel) + 1;
        let previous = self
            .last_accessed_ms
            .fetch_max(now.timestamp_millis(), Ordering::AcqRel);
        let tokens_saved = self.tokens_saved.fetch_add(tokens, Ordering::AcqRel) + tokens;

        AccessStats {
            access_count,
            last_accessed: millis_to_datetime(previous.max(now.timestamp_millis())),
            tokens_saved,
            ttl_secs: self.ttl_secs.load(Ordering::Acquire),
        }
    }

    /// Apply `extend` to the tracked TTL atomically, returning the TTL before
    /// and after this update
    pub fn extend_ttl(&self, extend: impl Fn(Duration) -> Duration) -> (Duration, Duration) {
        let previous = self
            .ttl_secs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |secs| {
                Some(extend(Duration::from_secs(secs)).as_secs())
            })
            .unwrap_or_else(|secs| secs);
        let extended = extend(Duration::from_secs(previous)).as_secs();
        (Duration::from_secs(previous), Duration::from_secs(extended))
    }

    pub fn stats(&self) -> AccessStats {
        AccessStats {
            access_count: self.access_count.load(Ordering::Acquire),
            last_accessed: millis_to_datetime(self.last_accessed_ms.load(Ordering::Acquire)),
            tokens_saved: self.tokens_saved.load(Ordering::Acquire),
            ttl_secs: self.ttl_secs.load(Ordering::Acquire),
        }
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}
