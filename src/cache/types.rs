//! Core type definitions for the semantic cache

use crate::resilience::GuardStats;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a lookup matches cached entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupStrategy {
    /// Literal hash equality of the normalized query
    ExactOnly,
    /// Nearest-neighbor search over query embeddings
    SemanticOnly,
    /// Exact first, semantic on an exact miss
    Hybrid,
}

impl LookupStrategy {
    pub fn uses_exact(&self) -> bool {
        matches!(self, LookupStrategy::ExactOnly | LookupStrategy::Hybrid)
    }

    pub fn uses_semantic(&self) -> bool {
        matches!(self, LookupStrategy::SemanticOnly | LookupStrategy::Hybrid)
    }
}

impl fmt::Display for LookupStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupStrategy::ExactOnly => write!(f, "exact_only"),
            LookupStrategy::SemanticOnly => write!(f, "semantic_only"),
            LookupStrategy::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Which entries are evicted first under capacity pressure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Least recently accessed first
    Lru,
    /// Least frequently accessed first
    Lfu,
    /// Soonest to expire first
    Ttl,
    /// Lowest value-per-age score first
    Adaptive,
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionPolicy::Lru => write!(f, "lru"),
            EvictionPolicy::Lfu => write!(f, "lfu"),
            EvictionPolicy::Ttl => write!(f, "ttl"),
            EvictionPolicy::Adaptive => write!(f, "adaptive"),
        }
    }
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            "ttl" => Ok(EvictionPolicy::Ttl),
            "adaptive" => Ok(EvictionPolicy::Adaptive),
            other => Err(format!("unknown eviction policy: {}", other)),
        }
    }
}

/// Whether a hit came from the exact or the semantic path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Semantic,
}

/// Outcome of one capacity sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionReport {
    /// Live entries seen when the sweep started
    pub scanned: usize,
    pub evicted: usize,
    /// Deletes that failed and were skipped
    pub failed: usize,
    /// Live entries after the sweep
    pub live_after: usize,
}

/// Statistics and metrics for cache performance monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    /// Every call to get, counted once
    pub total_requests: u64,
    pub exact_hits: u64,
    pub semantic_hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    pub eviction_failures: u64,
    pub invalidations: u64,
    /// Embedding calls that failed and fell back to exact matching
    pub embedding_failures: u64,
    pub tokens_saved: u64,

    /// Live entries in the store, if the count could be read
    pub entries: Option<usize>,

    /// Circuit, health and latency state of the store guard
    pub resilience: GuardStats,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.exact_hits + self.semantic_hits
    }

    /// Cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.hits() as f64 / self.total_requests as f64) * 100.0
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ requests: {}, hits: {} ({} exact, {} semantic), hit_rate: {:.2}%, evictions: {}, tokens_saved: {}, circuit: {} }}",
            self.total_requests,
            self.hits(),
            self.exact_hits,
            self.semantic_hits,
            self.hit_rate(),
            self.evictions,
            self.tokens_saved,
            self.resilience.circuit.state
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_paths() {
        assert!(LookupStrategy::Hybrid.uses_exact());
        assert!(LookupStrategy::Hybrid.uses_semantic());
        assert!(!LookupStrategy::ExactOnly.uses_semantic());
        assert!(!LookupStrategy::SemanticOnly.uses_exact());
    }

    #[test]
    fn test_eviction_policy_parse() {
        assert_eq!("LRU".parse::<EvictionPolicy>(), Ok(EvictionPolicy::Lru));
        assert_eq!("adaptive".parse::<EvictionPolicy>(), Ok(EvictionPolicy::Adaptive));
        assert!("random".parse::<EvictionPolicy>().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", EvictionPolicy::Ttl), "ttl");
        assert_eq!(format!("{}", LookupStrategy::SemanticOnly), "semantic_only");
    }
}
