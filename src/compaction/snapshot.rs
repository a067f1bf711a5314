//! Memory entries and immutable snapshots of them

use crate::error::Result;
use crate::store::Store;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Rough token count: four characters per token, rounded up
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() + 3) / 4
}

/// One unit of agent memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,

    pub content: String,

    /// 0.0 - 1.0
    #[serde(default = "default_importance")]
    pub importance: f64,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub access_count: u64,

    /// Estimated from `content` when absent
    #[serde(default)]
    pub tokens: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default)]
    pub metadata: HashMap<String, Value>,

    /// Ids of the entries this summary replaces; empty for originals
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub summarizes: Vec<String>,
}

fn default_importance() -> f64 {
    0.5
}

impl MemoryEntry {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            id: id.into(),
            tokens: estimate_tokens(&content),
            content,
            importance: default_importance(),
            created_at: Utc::now(),
            access_count: 0,
            session_id: None,
            category: None,
            metadata: HashMap::new(),
            summarizes: Vec::new(),
        }
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_access_count(mut self, access_count: u64) -> Self {
        self.access_count = access_count;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        ((now - self.created_at).num_milliseconds().max(0) as f64) / 3_600_000.0
    }

    /// Hex SHA-256 of the trimmed content
    pub fn content_hash(&self) -> String {
        hex::encode(Sha256::digest(self.content.trim().as_bytes()))
    }

    pub fn is_summary(&self) -> bool {
        !self.summarizes.is_empty()
    }

    /// Session, then category, then a shared bucket
    pub fn group_key(&self) -> &str {
        self.session_id
            .as_deref()
            .or(self.category.as_deref())
            .unwrap_or("general")
    }
}

/// An immutable set of entries with aggregates computed once
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySnapshot {
    entries: Vec<MemoryEntry>,
    total_tokens: usize,
    oldest: Option<DateTime<Utc>>,
    newest: Option<DateTime<Utc>>,
    taken_at: DateTime<Utc>,
}

impl MemorySnapshot {
    pub fn new(entries: Vec<MemoryEntry>) -> Self {
        let total_tokens = entries.iter().map(|e| e.tokens).sum();
        let oldest = entries.iter().map(|e| e.created_at).min();
        let newest = entries.iter().map(|e| e.created_at).max();
        Self {
            entries,
            total_tokens,
            oldest,
            newest,
            taken_at: Utc::now(),
        }
    }

    /// Read every JSON entry stored under `prefix`.
    ///
    /// Keys that vanish between scan and read, or that do not hold a
    /// [`MemoryEntry`], are skipped.
    pub async fn load(store: &dyn Store, prefix: &str) -> Result<Self> {
        let keys = store.scan_prefix(prefix).await?;
        let mut entries = Vec::with_capacity(keys.len());

        for key in keys {
            let Some(bytes) = store.get(&key).await? else {
                debug!("Memory entry {} expired before it was read", key);
                continue;
            };
            match serde_json::from_slice::<MemoryEntry>(&bytes) {
                Ok(mut entry) => {
                    if entry.tokens == 0 {
                        entry.tokens = estimate_tokens(&entry.content);
                    }
                    entries.push(entry);
                }
                Err(e) => warn!("Skipping malformed memory entry {}: {}", key, e),
            }
        }

        Ok(Self::new(entries))
    }

    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<MemoryEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    pub fn oldest(&self) -> Option<DateTime<Utc>> {
        self.oldest
    }

    pub fn newest(&self) -> Option<DateTime<Utc>> {
        self.newest
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }
}
