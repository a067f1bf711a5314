//! # Memory Compaction
//!
//! Shrinks an oversized memory snapshot while keeping its most valuable
//! entries.
//!
//! Compaction is gated by trigger rules (token count, entry count, time since
//! the last run) and dispatched to one of six strategies:
//!
//! - **Statistical**: top entries by importance, recency and use
//! - **TemporalWindowing**: recent entries plus old important ones
//! - **ImportancePriority**: statistical scoring with exponential decay
//! - **SemanticClustering**: collapse clusters of similar entries
//! - **LlmSummarization**: replace groups with a generated summary
//! - **Hybrid** (default): dedup → windowing → priority → top-up
//!
//! ## Example
//!
//! ```rust,no_run
//! use ouroboros_cache::compaction::{
//!     CompactionConfig, CompactionStrategy, MemoryCompactionEngine, MemoryEntry, MemorySnapshot,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let engine = MemoryCompactionEngine::new(CompactionConfig::default())?;
//! let snapshot = MemorySnapshot::new(vec![
//!     MemoryEntry::new("m1", "user prefers dark mode").with_importance(0.9),
//!     MemoryEntry::new("m2", "user asked about the weather"),
//! ]);
//!
//! if engine.should_compact(&snapshot) {
//!     let outcome = engine.compact(&snapshot).await?;
//!     println!("{}", outcome.report);
//! }
//!
//! let forced = engine
//!     .compact_with(&snapshot, CompactionStrategy::TemporalWindowing)
//!     .await?;
//! assert!(forced.report.compacted_entries <= snapshot.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod rules;
pub mod snapshot;
pub mod strategies;

pub use config::{CompactionConfig, CompactionLevel, CompactionStrategy};
pub use engine::{
    CompactionOutcome, CompactionReport, CompactionStats, MemoryCompactionEngine, PurgeReport,
};
pub use rules::{
    CompactionRule, EntryCountRule, FnRule, RuleContext, TimeSinceLastRule, TokenThresholdRule,
};
pub use snapshot::{estimate_tokens, MemoryEntry, MemorySnapshot};
