//! Compaction trigger rules
//!
//! Rules are evaluated in registration order and the first one that fires
//! names the trigger. A rule that errors is skipped.

use crate::compaction::snapshot::MemorySnapshot;
use crate::error::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// What a rule can see besides the snapshot
#[derive(Debug, Clone, Copy)]
pub struct RuleContext {
    pub now: DateTime<Utc>,
    /// Last compaction, or engine creation before the first one
    pub last_compaction: DateTime<Utc>,
}

/// Decides whether a snapshot needs compacting
pub trait CompactionRule: Send + Sync {
    fn name(&self) -> &str;

    fn should_trigger(&self, snapshot: &MemorySnapshot, ctx: &RuleContext) -> Result<bool>;
}

/// Fires when the snapshot holds at least `threshold` tokens
#[derive(Debug, Clone)]
pub struct TokenThresholdRule {
    pub threshold: usize,
}

impl CompactionRule for TokenThresholdRule {
    fn name(&self) -> &str {
        "token_threshold"
    }

    fn should_trigger(&self, snapshot: &MemorySnapshot, _ctx: &RuleContext) -> Result<bool> {
        Ok(snapshot.total_tokens() >= self.threshold)
    }
}

/// Fires when the snapshot holds at least `threshold` entries
#[derive(Debug, Clone)]
pub struct EntryCountRule {
    pub threshold: usize,
}

impl CompactionRule for EntryCountRule {
    fn name(&self) -> &str {
        "entry_count"
    }

    fn should_trigger(&self, snapshot: &MemorySnapshot, _ctx: &RuleContext) -> Result<bool> {
        Ok(snapshot.len() >= self.threshold)
    }
}

/// Fires once `interval` has passed since the last compaction
#[derive(Debug, Clone)]
pub struct TimeSinceLastRule {
    pub interval: Duration,
}

impl CompactionRule for TimeSinceLastRule {
    fn name(&self) -> &str {
        "time_since_last"
    }

    fn should_trigger(&self, _snapshot: &MemorySnapshot, ctx: &RuleContext) -> Result<bool> {
        let elapsed = (ctx.now - ctx.last_compaction).to_std().unwrap_or(Duration::ZERO);
        Ok(elapsed >= self.interval)
    }
}

/// A rule backed by a closure
pub struct FnRule<F> {
    name: String,
    predicate: F,
}

impl<F> FnRule<F>
where
    F: Fn(&MemorySnapshot, &RuleContext) -> Result<bool> + Send + Sync,
{
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }
}

impl<F> CompactionRule for FnRule<F>
where
    F: Fn(&MemorySnapshot, &RuleContext) -> Result<bool> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn should_trigger(&self, snapshot: &MemorySnapshot, ctx: &RuleContext) -> Result<bool> {
        (self.predicate)(snapshot, ctx)
    }
}
