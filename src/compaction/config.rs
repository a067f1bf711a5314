//! Configuration for memory compaction

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How hard a ratio-driven strategy shrinks the snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionLevel {
    Light,
    Moderate,
    Aggressive,
    Extreme,
}

impl CompactionLevel {
    /// Fraction of entries kept
    pub fn ratio(&self) -> f64 {
        match self {
            CompactionLevel::Light => 0.75,
            CompactionLevel::Moderate => 0.50,
            CompactionLevel::Aggressive => 0.25,
            CompactionLevel::Extreme => 0.10,
        }
    }
}

impl fmt::Display for CompactionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompactionLevel::Light => write!(f, "light"),
            CompactionLevel::Moderate => write!(f, "moderate"),
            CompactionLevel::Aggressive => write!(f, "aggressive"),
            CompactionLevel::Extreme => write!(f, "extreme"),
        }
    }
}

impl FromStr for CompactionLevel {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "light" => Ok(CompactionLevel::Light),
            "moderate" => Ok(CompactionLevel::Moderate),
            "aggressive" => Ok(CompactionLevel::Aggressive),
            "extreme" => Ok(CompactionLevel::Extreme),
            other => Err(CacheError::Config(format!("unknown compaction level: {}", other))),
        }
    }
}

/// Compaction algorithm
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionStrategy {
    /// Keep the top entries by importance, recency and use
    Statistical,
    /// Keep recent entries plus old important ones
    TemporalWindowing,
    /// Statistical scoring with exponential importance decay
    ImportancePriority,
    /// Collapse clusters of similar entries
    SemanticClustering,
    /// Replace groups of entries with a generated summary
    LlmSummarization,
    /// Dedup, temporal window, priority, then top-up
    #[default]
    Hybrid,
}

impl CompactionStrategy {
    pub const ALL: [CompactionStrategy; 6] = [
        CompactionStrategy::Statistical,
        CompactionStrategy::TemporalWindowing,
        CompactionStrategy::ImportancePriority,
        CompactionStrategy::SemanticClustering,
        CompactionStrategy::LlmSummarization,
        CompactionStrategy::Hybrid,
    ];
}

impl fmt::Display for CompactionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompactionStrategy::Statistical => "statistical",
            CompactionStrategy::TemporalWindowing => "temporal_windowing",
            CompactionStrategy::ImportancePriority => "importance_priority",
            CompactionStrategy::SemanticClustering => "semantic_clustering",
            CompactionStrategy::LlmSummarization => "llm_summarization",
            CompactionStrategy::Hybrid => "hybrid",
        };
        write!(f, "{}", name)
    }
}

/// Configuration for the compaction engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    pub strategy: CompactionStrategy,

    pub level: CompactionLevel,

    /// Snapshot token count that triggers compaction
    pub token_threshold: usize,

    /// Snapshot entry count that triggers compaction
    pub entry_threshold: usize,

    /// Time since the last compaction that triggers another
    pub compaction_interval: Duration,

    /// Floor on the number of entries ratio-driven strategies keep
    pub retain_top_n: usize,

    /// Entries younger than this always survive temporal windowing
    pub keep_recent_hours: f64,

    /// Older entries need this importance to survive temporal windowing
    pub min_importance: f64,

    /// Important entries older than this are dropped anyway
    pub keep_important_days: f64,

    /// Half-life of importance for importance-priority scoring
    pub importance_decay_hours: f64,

    /// Cosine similarity that puts two entries in one cluster
    pub cluster_similarity_threshold: f32,

    /// Clusters smaller than this are kept whole
    pub cluster_min_size: usize,

    /// Copies of the same content needed before dedup collapses them
    pub min_duplicates: usize,

    /// Reports kept for `stats()`
    pub max_history: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            strategy: CompactionStrategy::Hybrid,
            level: CompactionLevel::Moderate,
            token_threshold: 100_000,
            entry_threshold: 1_000,
            compaction_interval: Duration::from_secs(24 * 3600),
            retain_top_n: 50,
            keep_recent_hours: 24.0,
            min_importance: 0.7,
            keep_important_days: 30.0,
            importance_decay_hours: 168.0,
            cluster_similarity_threshold: 0.85,
            cluster_min_size: 3,
            min_duplicates: 2,
            max_history: 100,
        }
    }
}

impl CompactionConfig {
    /// Compact early and hard
    pub fn aggressive() -> Self {
        Self {
            level: CompactionLevel::Aggressive,
            token_threshold: 50_000,
            entry_threshold: 500,
            compaction_interval: Duration::from_secs(6 * 3600),
            retain_top_n: 20,
            keep_recent_hours: 6.0,
            min_importance: 0.8,
            ..Default::default()
        }
    }

    /// Compact rarely and lightly
    pub fn conservative() -> Self {
        Self {
            level: CompactionLevel::Light,
            token_threshold: 200_000,
            entry_threshold: 5_000,
            compaction_interval: Duration::from_secs(7 * 24 * 3600),
            retain_top_n: 200,
            keep_recent_hours: 72.0,
            min_importance: 0.5,
            ..Default::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.token_threshold == 0 || self.entry_threshold == 0 {
            return Err("compaction thresholds must be greater than 0".to_string());
        }

        if !(0.0..=1.0).contains(&self.min_importance) {
            return Err("min_importance must be between 0.0 and 1.0".to_string());
        }

        if self.keep_recent_hours < 0.0 || self.keep_important_days < 0.0 {
            return Err("retention windows must not be negative".to_string());
        }

        if self.importance_decay_hours <= 0.0 {
            return Err("importance_decay_hours must be greater than 0".to_string());
        }

        if !(0.0..=1.0).contains(&self.cluster_similarity_threshold) {
            return Err("cluster_similarity_threshold must be between 0.0 and 1.0".to_string());
        }

        if self.cluster_min_size < 2 {
            return Err("cluster_min_size must be at least 2".to_string());
        }

        if self.min_duplicates < 2 {
            return Err("min_duplicates must be at least 2".to_string());
        }

        Ok(())
    }

    /// Entries a ratio-driven strategy keeps out of `original`
    pub fn target_count(&self, original: usize) -> usize {
        let by_ratio = (original as f64 * self.level.ratio()) as usize;
        by_ratio.max(self.retain_top_n).min(original)
    }
}
