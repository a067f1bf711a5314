//! Error types for cache operations
//!
//! This module defines the error taxonomy shared by every component of the
//! crate. The resilience layer relies on [`CacheError::is_retryable`] to
//! decide which store failures are worth another attempt.

use thiserror::Error;

/// Main error type for cache, store and compaction operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// Transient store failure (network blip, busy server) - retryable
    #[error("Transient store error: {0}")]
    TransientStore(String),

    /// Permanent store failure (bad request, missing index) - never retried
    #[error("Permanent store error: {0}")]
    PermanentStore(String),

    /// Circuit breaker is open; no attempt was made
    #[error("Circuit breaker is open, retry after {retry_after_ms}ms")]
    CircuitOpen { retry_after_ms: u64 },

    /// Background health probe has marked the store unhealthy
    #[error("Store is unhealthy after {consecutive_failures} consecutive failed probes")]
    StoreUnhealthy { consecutive_failures: u32 },

    /// Operation timeout
    #[error("Operation timed out after {timeout_ms}ms: {context}")]
    Timeout { timeout_ms: u64, context: String },

    /// Retry budget exhausted on a transient failure
    #[error("Store unreachable after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<CacheError>,
    },

    /// Embedding provider failed or is not configured
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Summarizer failed or is not configured
    #[error("Summarizer unavailable: {0}")]
    SummarizerUnavailable(String),

    /// A compaction trigger rule could not be evaluated
    #[error("Compaction rule '{rule}' failed: {reason}")]
    CompactionRule { rule: String, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failure inside a caller-supplied compute function
    #[error(transparent)]
    Compute(#[from] anyhow::Error),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

impl CacheError {
    /// Whether the retry handler may attempt the operation again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CacheError::TransientStore(_) | CacheError::Timeout { .. }
        )
    }

    /// Whether this error means the store could not be reached at all.
    ///
    /// These are the only conditions the cache engine raises to its caller;
    /// everything else degrades silently.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            CacheError::CircuitOpen { .. }
                | CacheError::StoreUnhealthy { .. }
                | CacheError::RetriesExhausted { .. }
        )
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl From<String> for CacheError {
    fn from(s: String) -> Self {
        CacheError::Other(s)
    }
}

impl From<&str> for CacheError {
    fn from(s: &str) -> Self {
        CacheError::Other(s.to_string())
    }
}
