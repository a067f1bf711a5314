//! Abstract key-value/vector store
//!
//! Every component in this crate talks to its backing store through the
//! [`Store`] trait. The trait models the small command surface the cache
//! needs from a remote, vector-capable key-value server:
//!
//! - plain key/value `get` / `set` / `delete` / `expire`
//! - per-key atomic counters (`incr_counter`)
//! - a vector index attached to keys (`upsert_vector` / `vector_search`)
//! - prefix scans and a liveness `ping`
//!
//! Implementations must classify failures as [`CacheError::TransientStore`]
//! (retryable) or [`CacheError::PermanentStore`] so the resilience layer
//! can decide retry eligibility.
//!
//! [`CacheError::TransientStore`]: crate::error::CacheError::TransientStore
//! [`CacheError::PermanentStore`]: crate::error::CacheError::PermanentStore

pub mod memory;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use memory::MemoryStore;

/// Equality filter applied to the indexed fields of a vector entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorFilter {
    /// Indexed field name
    pub field: String,
    /// Required value
    pub value: String,
}

impl VectorFilter {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Check the filter against a set of indexed fields
    pub fn matches(&self, fields: &HashMap<String, String>) -> bool {
        fields.get(&self.field).map(|v| v == &self.value).unwrap_or(false)
    }
}

/// A single nearest-neighbor hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMatch {
    /// Key the vector is attached to
    pub key: String,
    /// Cosine similarity to the query vector (higher is closer)
    pub score: f32,
    /// Indexed fields stored with the vector
    pub fields: HashMap<String, String>,
}

/// Capability contract of the backing store.
///
/// Vectors are attached to a key: once the key is deleted or expires, its
/// vector no longer appears in search results.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch the raw value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, optionally expiring after `ttl`
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    /// Delete `key`; returns whether anything was removed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Reset the expiry of `key`; returns false if the key does not exist
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Atomically add `delta` to a counter field of `key`, returning the new value
    async fn incr_counter(&self, key: &str, field: &str, delta: i64) -> Result<i64>;

    /// Attach (or replace) a vector and its filterable fields to `key` in `index`
    async fn upsert_vector(
        &self,
        index: &str,
        key: &str,
        vector: &[f32],
        fields: &HashMap<String, String>,
    ) -> Result<()>;

    /// K-nearest-neighbor search, best match first
    async fn vector_search(
        &self,
        index: &str,
        vector: &[f32],
        top_k: usize,
        filters: &[VectorFilter],
    ) -> Result<Vec<VectorMatch>>;

    /// List live keys starting with `prefix`
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Liveness probe
    async fn ping(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_filter_matches() {
        let mut fields = HashMap::new();
        fields.insert("model".to_string(), "gpt-4".to_string());

        assert!(VectorFilter::new("model", "gpt-4").matches(&fields));
        assert!(!VectorFilter::new("model", "claude").matches(&fields));
        assert!(!VectorFilter::new("tenant", "a").matches(&fields));
    }
}
