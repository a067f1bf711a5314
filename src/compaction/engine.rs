//! Memory compaction engine
//!
//! `compact` is gated by the trigger rules; `compact_with` forces a strategy.
//! The engine never writes the compacted set back. Callers persist it and
//! may remove superseded entries with [`MemoryCompactionEngine::purge_superseded`].

use crate::compaction::config::{CompactionConfig, CompactionLevel, CompactionStrategy};
use crate::compaction::rules::{
    CompactionRule, EntryCountRule, RuleContext, TimeSinceLastRule, TokenThresholdRule,
};
use crate::compaction::snapshot::{MemoryEntry, MemorySnapshot};
use crate::compaction::strategies;
use crate::embedding::{Embedder, Summarizer};
use crate::error::{CacheError, Result};
use crate::store::Store;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

/// Before/after figures for one compaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionReport {
    pub original_entries: usize,
    pub compacted_entries: usize,
    pub original_tokens: usize,
    pub compacted_tokens: usize,
    pub tokens_saved: usize,
    /// `1 - compacted/original`, 0 for an empty snapshot
    pub reduction_ratio: f64,
    /// Strategy that actually ran; `None` when nothing triggered
    pub strategy: Option<CompactionStrategy>,
    pub level: CompactionLevel,
    /// Rule that fired, or `"manual"` for `compact_with`
    pub trigger: Option<String>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl CompactionReport {
    fn noop(snapshot: &MemorySnapshot, level: CompactionLevel) -> Self {
        Self {
            original_entries: snapshot.len(),
            compacted_entries: snapshot.len(),
            original_tokens: snapshot.total_tokens(),
            compacted_tokens: snapshot.total_tokens(),
            tokens_saved: 0,
            reduction_ratio: 0.0,
            strategy: None,
            level,
            trigger: None,
            started_at: Utc::now(),
            elapsed_ms: 0,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.strategy.is_none()
    }
}

impl fmt::Display for CompactionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Compaction {{ entries: {} -> {}, tokens: {} -> {} (saved {}), ratio: {:.2}, strategy: {} }}",
            self.original_entries,
            self.compacted_entries,
            self.original_tokens,
            self.compacted_tokens,
            self.tokens_saved,
            self.reduction_ratio,
            self.strategy
                .map(|s| s.to_string())
                .unwrap_or_else(|| "none".to_string())
        )
    }
}

/// A report plus the compacted entries
#[derive(Debug, Clone)]
pub struct CompactionOutcome {
    pub report: CompactionReport,
    pub entries: Vec<MemoryEntry>,
    /// Original ids absent from `entries`
    pub removed_ids: Vec<String>,
}

/// Result of deleting superseded entries from a store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
    pub deleted: usize,
    pub missing: usize,
    pub failed: usize,
}

/// Compaction statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompactionStats {
    pub total_compactions: usize,
    pub total_tokens_saved: usize,
    pub total_entries_removed: usize,
    pub average_reduction_ratio: f64,
    pub last_compaction: Option<DateTime<Utc>>,
    pub history: Vec<CompactionReport>,
}

/// Shrinks memory snapshots that grow past the configured triggers
pub struct MemoryCompactionEngine {
    config: CompactionConfig,
    rules: RwLock<Vec<Arc<dyn CompactionRule>>>,
    embedder: Option<Arc<dyn Embedder>>,
    summarizer: Option<Arc<dyn Summarizer>>,
    last_compaction: Mutex<DateTime<Utc>>,
    history: Mutex<VecDeque<CompactionReport>>,
    run_lock: AsyncMutex<()>,
}

impl MemoryCompactionEngine {
    /// Create an engine with the token, entry-count and interval rules
    pub fn new(config: CompactionConfig) -> Result<Self> {
        config.validate().map_err(CacheError::Config)?;

        let rules: Vec<Arc<dyn CompactionRule>> = vec![
            Arc::new(TokenThresholdRule {
                threshold: config.token_threshold,
            }),
            Arc::new(EntryCountRule {
                threshold: config.entry_threshold,
            }),
            Arc::new(TimeSinceLastRule {
                interval: config.compaction_interval,
            }),
        ];

        info!(
            "Initializing compaction engine (strategy: {}, level: {})",
            config.strategy, config.level
        );

        Ok(Self {
            config,
            rules: RwLock::new(rules),
            embedder: None,
            summarizer: None,
            last_compaction: Mutex::new(Utc::now()),
            history: Mutex::new(VecDeque::new()),
            run_lock: AsyncMutex::new(()),
        })
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Append a rule; it is evaluated after the existing ones
    pub fn add_rule(&self, rule: Arc<dyn CompactionRule>) {
        self.rules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(rule);
    }

    pub fn last_compaction(&self) -> DateTime<Utc> {
        *self
            .last_compaction
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Name of the first rule that fires, if any
    pub fn should_compact_reason(&self, snapshot: &MemorySnapshot) -> Option<String> {
        let ctx = RuleContext {
            now: Utc::now(),
            last_compaction: self.last_compaction(),
        };
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);

        for rule in rules.iter() {
            match rule.should_trigger(snapshot, &ctx) {
                Ok(true) => {
                    debug!("Compaction triggered by {}", rule.name());
                    return Some(rule.name().to_string());
                }
                Ok(false) => {}
                Err(e) => {
                    let err = CacheError::CompactionRule {
                        rule: rule.name().to_string(),
                        reason: e.to_string(),
                    };
                    warn!("Skipping compaction rule: {}", err);
                }
            }
        }
        None
    }

    pub fn should_compact(&self, snapshot: &MemorySnapshot) -> bool {
        self.should_compact_reason(snapshot).is_some()
    }

    /// Compact with the configured strategy if a rule fires; otherwise a
    /// no-op outcome with ratio 0
    pub async fn compact(&self, snapshot: &MemorySnapshot) -> Result<CompactionOutcome> {
        let _guard = self.run_lock.lock().await;

        match self.should_compact_reason(snapshot) {
            Some(trigger) => self.run(snapshot, self.config.strategy, trigger).await,
            None => {
                debug!("No compaction rule fired for {} entries", snapshot.len());
                Ok(CompactionOutcome {
                    report: CompactionReport::noop(snapshot, self.config.level),
                    entries: snapshot.entries().to_vec(),
                    removed_ids: Vec::new(),
                })
            }
        }
    }

    /// Compact with `strategy` regardless of the trigger rules
    pub async fn compact_with(
        &self,
        snapshot: &MemorySnapshot,
        strategy: CompactionStrategy,
    ) -> Result<CompactionOutcome> {
        let _guard = self.run_lock.lock().await;
        self.run(snapshot, strategy, "manual".to_string()).await
    }

    async fn run(
        &self,
        snapshot: &MemorySnapshot,
        strategy: CompactionStrategy,
        trigger: String,
    ) -> Result<CompactionOutcome> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let entries = snapshot.entries();

        let (compacted, used) = self.dispatch(entries, strategy, started_at).await?;

        let kept: HashSet<&str> = compacted.iter().map(|e| e.id.as_str()).collect();
        let removed_ids: Vec<String> = entries
            .iter()
            .filter(|e| !kept.contains(e.id.as_str()))
            .map(|e| e.id.clone())
            .collect();

        let compacted_tokens: usize = compacted.iter().map(|e| e.tokens).sum();
        let reduction_ratio = if entries.is_empty() {
            0.0
        } else {
            1.0 - compacted.len() as f64 / entries.len() as f64
        };

        let report = CompactionReport {
            original_entries: entries.len(),
            compacted_entries: compacted.len(),
            original_tokens: snapshot.total_tokens(),
            compacted_tokens,
            tokens_saved: snapshot.total_tokens().saturating_sub(compacted_tokens),
            reduction_ratio,
            strategy: Some(used),
            level: self.config.level,
            trigger: Some(trigger),
            started_at,
            elapsed_ms: timer.elapsed().as_millis() as u64,
        };

        info!("{}", report);
        self.record(report.clone());

        Ok(CompactionOutcome {
            report,
            entries: compacted,
            removed_ids,
        })
    }

    /// Run `strategy`, falling back to Statistical when its collaborator is
    /// missing or unavailable. Returns the strategy that actually ran.
    async fn dispatch(
        &self,
        entries: &[MemoryEntry],
        strategy: CompactionStrategy,
        now: DateTime<Utc>,
    ) -> Result<(Vec<MemoryEntry>, CompactionStrategy)> {
        let config = &self.config;
        let result = match strategy {
            CompactionStrategy::Statistical => strategies::statistical(entries, config, now),
            CompactionStrategy::TemporalWindowing => {
                strategies::temporal_windowing(entries, config, now)
            }
            CompactionStrategy::ImportancePriority => {
                strategies::importance_priority(entries, config, now)
            }
            CompactionStrategy::Hybrid => strategies::hybrid(entries, config, now),
            CompactionStrategy::SemanticClustering => {
                let outcome = match &self.embedder {
                    Some(embedder) => {
                        strategies::semantic_clustering(entries, config, embedder.as_ref()).await
                    }
                    None => Err(CacheError::EmbeddingUnavailable(
                        "no embedder configured".to_string(),
                    )),
                };
                return self.or_statistical(outcome, strategy, entries, now);
            }
            CompactionStrategy::LlmSummarization => {
                let outcome = match &self.summarizer {
                    Some(summarizer) => {
                        strategies::llm_summarization(entries, summarizer.as_ref()).await
                    }
                    None => Err(CacheError::SummarizerUnavailable(
                        "no summarizer configured".to_string(),
                    )),
                };
                return self.or_statistical(outcome, strategy, entries, now);
            }
        };
        Ok((result, strategy))
    }

    fn or_statistical(
        &self,
        outcome: Result<Vec<MemoryEntry>>,
        strategy: CompactionStrategy,
        entries: &[MemoryEntry],
        now: DateTime<Utc>,
    ) -> Result<(Vec<MemoryEntry>, CompactionStrategy)> {
        match outcome {
            Ok(compacted) => Ok((compacted, strategy)),
            Err(e @ (CacheError::EmbeddingUnavailable(_) | CacheError::SummarizerUnavailable(_))) => {
                warn!("{} unavailable, falling back to statistical: {}", strategy, e);
                Ok((
                    strategies::statistical(entries, &self.config, now),
                    CompactionStrategy::Statistical,
                ))
            }
            Err(e) => Err(e),
        }
    }

    fn record(&self, report: CompactionReport) {
        *self
            .last_compaction
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = report.started_at;

        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.push_back(report);
        while history.len() > self.config.max_history {
            history.pop_front();
        }
    }

    /// Delete `{prefix}{id}` for every removed id
    pub async fn purge_superseded(
        &self,
        outcome: &CompactionOutcome,
        store: &dyn Store,
        prefix: &str,
    ) -> PurgeReport {
        let mut report = PurgeReport::default();
        for id in &outcome.removed_ids {
            let key = format!("{}{}", prefix, id);
            match store.delete(&key).await {
                Ok(true) => report.deleted += 1,
                Ok(false) => report.missing += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!("Failed to purge superseded memory {}: {}", key, e);
                }
            }
        }
        info!(
            "Purged {} superseded memories ({} missing, {} failed)",
            report.deleted, report.missing, report.failed
        );
        report
    }

    pub fn stats(&self) -> CompactionStats {
        let history: Vec<CompactionReport> = self
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();

        let total_compactions = history.len();
        let average_reduction_ratio = if total_compactions == 0 {
            0.0
        } else {
            history.iter().map(|r| r.reduction_ratio).sum::<f64>() / total_compactions as f64
        };

        CompactionStats {
            total_compactions,
            total_tokens_saved: history.iter().map(|r| r.tokens_saved).sum(),
            total_entries_removed: history
                .iter()
                .map(|r| r.original_entries - r.compacted_entries)
                .sum(),
            average_reduction_ratio,
            last_compaction: history.last().map(|r| r.started_at),
            history,
        }
    }
}
