//! Rule-driven cache invalidation
//!
//! Supports four ways of choosing what to drop:
//! - Exact: a single key
//! - Pattern: glob over keys (`*`, `?`), with a `{key}` placeholder for the trigger key
//! - Tag: every key carrying a tag, through a bidirectional key↔tag index
//! - Semantic: every key whose text embedding is close to a trigger text
//!
//! Sweeps never abort on a single key; they report aggregate counts.

use crate::embedding::{cosine_similarity, Embedder};
use crate::error::{CacheError, Result};
use crate::store::Store;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Reason for cache invalidation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// Manual invalidation by key
    Manual,

    /// Keys matched a glob pattern
    PatternMatch { pattern: String },

    /// Invalidated by tag match
    TagMatch { tag: String },

    /// Keys semantically close to a trigger text
    SemanticMatch { threshold: f32 },

    /// A registered rule fired
    Rule { rule_id: String },
}

impl fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidationReason::Manual => write!(f, "manual invalidation"),
            InvalidationReason::PatternMatch { pattern } => write!(f, "pattern match: {}", pattern),
            InvalidationReason::TagMatch { tag } => write!(f, "tag match: {}", tag),
            InvalidationReason::SemanticMatch { threshold } => {
                write!(f, "semantic match (threshold {:.2})", threshold)
            }
            InvalidationReason::Rule { rule_id } => write!(f, "rule: {}", rule_id),
        }
    }
}

/// How a rule selects keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationStrategy {
    Exact,
    Pattern,
    Tag,
    Semantic,
}

/// Event for cache invalidation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationEvent {
    /// Reason for invalidation
    pub reason: InvalidationReason,

    /// When the invalidation occurred
    pub timestamp: DateTime<Utc>,

    /// Keys that were invalidated
    pub keys: Vec<String>,

    /// Additional context
    pub context: Option<String>,
}

impl InvalidationEvent {
    /// Create a new invalidation event
    pub fn new(reason: InvalidationReason, keys: Vec<String>) -> Self {
        Self {
            reason,
            timestamp: Utc::now(),
            keys,
            context: None,
        }
    }

    /// Add context to the event
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Guard evaluated against `(trigger_key, data)` before a rule fires
pub type RuleCondition = Arc<dyn Fn(&str, &Value) -> bool + Send + Sync>;

/// Side effect run with the event a rule produced
pub type RuleAction = Arc<dyn Fn(&InvalidationEvent) + Send + Sync>;

/// A condition→invalidation pair.
///
/// `target` is a key, glob, tag or text depending on the strategy. The
/// literal `{key}` inside it is replaced by the trigger key; an empty target
/// means the trigger key itself.
#[derive(Clone)]
pub struct InvalidationRule {
    pub id: String,
    pub strategy: InvalidationStrategy,
    pub target: String,
    /// Higher runs first
    pub priority: i32,
    /// Semantic threshold override
    pub threshold: Option<f32>,
    condition: Option<RuleCondition>,
    action: Option<RuleAction>,
}

impl fmt::Debug for InvalidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationRule")
            .field("id", &self.id)
            .field("strategy", &self.strategy)
            .field("target", &self.target)
            .field("priority", &self.priority)
            .field("threshold", &self.threshold)
            .field("has_condition", &self.condition.is_some())
            .field("has_action", &self.action.is_some())
            .finish()
    }
}

impl InvalidationRule {
    pub fn new(
        id: impl Into<String>,
        strategy: InvalidationStrategy,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            strategy,
            target: target.into(),
            priority: 0,
            threshold: None,
            condition: None,
            action: None,
        }
    }

    pub fn exact(id: impl Into<String>, key: impl Into<String>) -> Self {
        Self::new(id, InvalidationStrategy::Exact, key)
    }

    pub fn pattern(id: impl Into<String>, glob: impl Into<String>) -> Self {
        Self::new(id, InvalidationStrategy::Pattern, glob)
    }

    pub fn tag(id: impl Into<String>, tag: impl Into<String>) -> Self {
        Self::new(id, InvalidationStrategy::Tag, tag)
    }

    pub fn semantic(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, InvalidationStrategy::Semantic, text)
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Only fire when `condition(trigger_key, data)` holds
    pub fn when<F>(mut self, condition: F) -> Self
    where
        F: Fn(&str, &Value) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    /// Run `action` after the rule fires
    pub fn then<F>(mut self, action: F) -> Self
    where
        F: Fn(&InvalidationEvent) + Send + Sync + 'static,
    {
        self.action = Some(Arc::new(action));
        self
    }

    fn applies_to(&self, trigger_key: &str, data: &Value) -> bool {
        self.condition
            .as_ref()
            .map(|condition| condition(trigger_key, data))
            .unwrap_or(true)
    }

    fn resolve_target(&self, trigger_key: &str) -> String {
        if self.target.is_empty() {
            trigger_key.to_string()
        } else {
            self.target.replace("{key}", trigger_key)
        }
    }
}

/// Configuration for the invalidator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidatorConfig {
    /// Keys considered by semantic sweeps
    pub scan_prefix: String,
    /// Default similarity above which a semantic sweep drops a key
    pub semantic_threshold: f32,
    /// Size of the event log
    pub max_events: usize,
}

impl Default for InvalidatorConfig {
    fn default() -> Self {
        Self {
            scan_prefix: "semcache:entry:".to_string(),
            semantic_threshold: 0.85,
            max_events: 1000,
        }
    }
}

/// Aggregate outcome of a multi-key invalidation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Keys examined
    pub scanned: usize,
    /// Keys selected for deletion
    pub matched: usize,
    /// Keys actually deleted
    pub invalidated: usize,
    /// Deletes that failed
    pub failed: usize,
    /// Keys that could not be evaluated (e.g. missing embedding)
    pub skipped: usize,
}

impl SweepReport {
    fn merge(&mut self, other: &SweepReport) {
        self.scanned += other.scanned;
        self.matched += other.matched;
        self.invalidated += other.invalidated;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

/// Outcome of [`CacheInvalidator::apply_rules`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub rules_evaluated: usize,
    pub rules_fired: usize,
    /// Rules whose sweep failed outright
    pub rules_failed: usize,
    pub sweep: SweepReport,
}

/// Invalidator statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvalidatorStats {
    pub rules: usize,
    pub tracked_keys: usize,
    pub tags: usize,
    pub total_invalidated: u64,
    pub failed_deletes: u64,
    pub embedding_failures: u64,
    pub events_logged: usize,
}

/// Per-key back-references. Never owns cache data.
#[derive(Default)]
struct KeyIndex {
    key_tags: HashMap<String, HashSet<String>>,
    tag_keys: HashMap<String, HashSet<String>>,
    texts: HashMap<String, String>,
    embeddings: HashMap<String, Vec<f32>>,
}

impl KeyIndex {
    fn add_tags(&mut self, key: &str, tags: &[String]) {
        for tag in tags {
            self.key_tags
                .entry(key.to_string())
                .or_default()
                .insert(tag.clone());
            self.tag_keys
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
    }

    fn remove_key(&mut self, key: &str) {
        if let Some(tags) = self.key_tags.remove(key) {
            for tag in tags {
                if let Some(keys) = self.tag_keys.get_mut(&tag) {
                    keys.remove(key);
                    if keys.is_empty() {
                        self.tag_keys.remove(&tag);
                    }
                }
            }
        }
        self.texts.remove(key);
        self.embeddings.remove(key);
    }

    /// Keys currently carrying `tag`, sorted. Memberships are cleared only
    /// when a key is actually removed.
    fn keys_for_tag(&self, tag: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .tag_keys
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

/// The parts of a persisted cache entry a semantic sweep can compare against
#[derive(Deserialize)]
struct StoredRecord {
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    query: Option<String>,
}

enum StoredText {
    Vector(Vec<f32>),
    Text(String),
    Missing,
}

/// Rule-driven invalidation over a [`Store`]
pub struct CacheInvalidator {
    store: Arc<dyn Store>,
    embedder: Option<Arc<dyn Embedder>>,
    config: InvalidatorConfig,
    rules: RwLock<Vec<InvalidationRule>>,
    index: Mutex<KeyIndex>,
    events: Mutex<VecDeque<InvalidationEvent>>,
    total_invalidated: AtomicU64,
    failed_deletes: AtomicU64,
    embedding_failures: AtomicU64,
}

impl CacheInvalidator {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Option<Arc<dyn Embedder>>,
        config: InvalidatorConfig,
    ) -> Self {
        info!(
            "Initializing cache invalidator (prefix: {}, semantic: {})",
            config.scan_prefix,
            embedder.is_some()
        );
        Self {
            store,
            embedder,
            config,
            rules: RwLock::new(Vec::new()),
            index: Mutex::new(KeyIndex::default()),
            events: Mutex::new(VecDeque::new()),
            total_invalidated: AtomicU64::new(0),
            failed_deletes: AtomicU64::new(0),
            embedding_failures: AtomicU64::new(0),
        }
    }

    fn index(&self) -> MutexGuard<'_, KeyIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a rule, replacing any rule with the same id
    pub fn add_rule(&self, rule: InvalidationRule) {
        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        rules.retain(|r| r.id != rule.id);
        debug!("Registered invalidation rule {} ({:?})", rule.id, rule.strategy);
        rules.push(rule);
        // stable sort keeps registration order among equal priorities
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Remove a rule; returns whether it existed
    pub fn remove_rule(&self, id: &str) -> bool {
        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        let before = rules.len();
        rules.retain(|r| r.id != id);
        rules.len() != before
    }

    pub fn rules(&self) -> Vec<InvalidationRule> {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record a key's tags and text for later tag and semantic invalidation
    pub async fn track(&self, key: &str, text: Option<&str>, tags: &[String]) {
        let embedding = match (&self.embedder, text) {
            (Some(embedder), Some(text)) => match embedder.embed(text).await {
                Ok(vector) => Some(vector),
                Err(e) => {
                    self.embedding_failures.fetch_add(1, Ordering::Relaxed);
                    debug!("No embedding for tracked key {}: {}", key, e);
                    None
                }
            },
            _ => None,
        };

        let mut index = self.index();
        index.add_tags(key, tags);
        if let Some(text) = text {
            index.texts.insert(key.to_string(), text.to_string());
        }
        if let Some(vector) = embedding {
            index.embeddings.insert(key.to_string(), vector);
        }
    }

    /// Drop every back-reference to `key`
    pub fn untrack(&self, key: &str) {
        self.index().remove_key(key);
    }

    /// Tags currently attached to `key`
    pub fn tags_of(&self, key: &str) -> HashSet<String> {
        self.index().key_tags.get(key).cloned().unwrap_or_default()
    }

    /// Keys currently carrying `tag`
    pub fn keys_with_tag(&self, tag: &str) -> HashSet<String> {
        self.index().tag_keys.get(tag).cloned().unwrap_or_default()
    }

    /// Evaluate every rule against a trigger, highest priority first
    pub async fn apply_rules(&self, trigger_key: &str, data: &Value) -> Result<ApplyReport> {
        let rules = self.rules();
        let mut report = ApplyReport {
            rules_evaluated: rules.len(),
            ..Default::default()
        };

        for rule in rules {
            if !rule.applies_to(trigger_key, data) {
                continue;
            }

            let target = rule.resolve_target(trigger_key);
            let outcome = match rule.strategy {
                InvalidationStrategy::Exact => self.delete_keys(vec![target.clone()]).await,
                InvalidationStrategy::Pattern => self.sweep_pattern(&target).await,
                InvalidationStrategy::Tag => self.sweep_tag(&target).await,
                InvalidationStrategy::Semantic => {
                    let threshold = rule.threshold.unwrap_or(self.config.semantic_threshold);
                    self.sweep_semantic(&target, threshold).await
                }
            };

            match outcome {
                Ok((sweep, keys)) => {
                    report.rules_fired += 1;
                    report.sweep.merge(&sweep);
                    let event = InvalidationEvent::new(
                        InvalidationReason::Rule {
                            rule_id: rule.id.clone(),
                        },
                        keys,
                    )
                    .with_context(format!("trigger: {}", trigger_key));
                    if let Some(action) = &rule.action {
                        action(&event);
                    }
                    self.log_event(event);
                }
                Err(e) if e.is_unavailable() => return Err(e),
                Err(e) => {
                    report.rules_failed += 1;
                    warn!("Invalidation rule {} failed: {}", rule.id, e);
                }
            }
        }

        Ok(report)
    }

    /// Delete a single key; returns 1 if it existed
    pub async fn invalidate_key(&self, key: &str) -> Result<usize> {
        let (sweep, keys) = self.delete_keys(vec![key.to_string()]).await?;
        if !keys.is_empty() {
            self.log_event(InvalidationEvent::new(InvalidationReason::Manual, keys));
        }
        Ok(sweep.invalidated)
    }

    /// Delete every key matching a glob (`*` any run, `?` one character)
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<SweepReport> {
        let (sweep, keys) = self.sweep_pattern(pattern).await?;
        self.log_event(InvalidationEvent::new(
            InvalidationReason::PatternMatch {
                pattern: pattern.to_string(),
            },
            keys,
        ));
        Ok(sweep)
    }

    /// Delete every key carrying `tag` and clear its memberships
    pub async fn invalidate_tag(&self, tag: &str) -> Result<SweepReport> {
        let (sweep, keys) = self.sweep_tag(tag).await?;
        self.log_event(InvalidationEvent::new(
            InvalidationReason::TagMatch {
                tag: tag.to_string(),
            },
            keys,
        ));
        Ok(sweep)
    }

    /// Delete every key under the scan prefix whose text is similar to `text`
    pub async fn invalidate_semantic(
        &self,
        text: &str,
        threshold: Option<f32>,
    ) -> Result<SweepReport> {
        let threshold = threshold.unwrap_or(self.config.semantic_threshold);
        let (sweep, keys) = self.sweep_semantic(text, threshold).await?;
        self.log_event(InvalidationEvent::new(
            InvalidationReason::SemanticMatch { threshold },
            keys,
        ));
        Ok(sweep)
    }

    async fn sweep_pattern(&self, pattern: &str) -> Result<(SweepReport, Vec<String>)> {
        let matcher = glob_to_regex(pattern)?;
        let candidates = self.store.scan_prefix(literal_prefix(pattern)).await?;
        let scanned = candidates.len();
        let matched: Vec<String> = candidates
            .into_iter()
            .filter(|key| matcher.is_match(key))
            .collect();

        let (mut sweep, keys) = self.delete_keys(matched).await?;
        sweep.scanned = scanned;
        Ok((sweep, keys))
    }

    async fn sweep_tag(&self, tag: &str) -> Result<(SweepReport, Vec<String>)> {
        let keys = self.index().keys_for_tag(tag);
        debug!("Tag {} covers {} keys", tag, keys.len());
        self.delete_keys(keys).await
    }

    async fn sweep_semantic(&self, text: &str, threshold: f32) -> Result<(SweepReport, Vec<String>)> {
        let embedder = self.embedder.as_ref().ok_or_else(|| {
            CacheError::EmbeddingUnavailable("no embedder configured".to_string())
        })?;
        let probe = embedder.embed(text).await?;

        let candidates = self.store.scan_prefix(&self.config.scan_prefix).await?;
        let mut report = SweepReport {
            scanned: candidates.len(),
            ..Default::default()
        };

        let mut matched = Vec::new();
        for key in candidates {
            let known = self.index().embeddings.get(&key).cloned();
            let vector = match known {
                Some(vector) => vector,
                None => {
                    let tracked = self.index().texts.get(&key).cloned();
                    let source = match tracked {
                        Some(text) => StoredText::Text(text),
                        None => self.stored_text(&key).await?,
                    };
                    let embedded = match source {
                        StoredText::Vector(vector) => Ok(vector),
                        StoredText::Text(text) => embedder.embed(&text).await,
                        StoredText::Missing => {
                            debug!("Skipping {} in semantic sweep: no stored text", key);
                            report.skipped += 1;
                            continue;
                        }
                    };
                    match embedded {
                        Ok(vector) => {
                            self.index().embeddings.insert(key.clone(), vector.clone());
                            vector
                        }
                        Err(e) => {
                            self.embedding_failures.fetch_add(1, Ordering::Relaxed);
                            debug!("Skipping {} in semantic sweep: {}", key, e);
                            report.skipped += 1;
                            continue;
                        }
                    }
                }
            };

            if cosine_similarity(&probe, &vector) >= threshold {
                matched.push(key);
            }
        }

        let (deleted, keys) = self.delete_keys(matched).await?;
        report.matched = deleted.matched;
        report.invalidated = deleted.invalidated;
        report.failed = deleted.failed;

        info!(
            "Semantic sweep: {} scanned, {} invalidated, {} skipped",
            report.scanned, report.invalidated, report.skipped
        );
        Ok((report, keys))
    }

    /// Embedding or query text persisted with an entry the index never saw
    async fn stored_text(&self, key: &str) -> Result<StoredText> {
        let bytes = match self.store.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(StoredText::Missing),
            Err(e) if e.is_unavailable() => return Err(e),
            Err(e) => {
                warn!("Could not read {} for semantic sweep: {}", key, e);
                return Ok(StoredText::Missing);
            }
        };
        let record: StoredRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(_) => return Ok(StoredText::Missing),
        };
        Ok(match (record.embedding, record.query) {
            (Some(vector), _) if !vector.is_empty() => StoredText::Vector(vector),
            (_, Some(query)) if !query.trim().is_empty() => StoredText::Text(query),
            _ => StoredText::Missing,
        })
    }

    /// Delete `keys`, continuing past individual failures
    async fn delete_keys(&self, keys: Vec<String>) -> Result<(SweepReport, Vec<String>)> {
        let mut report = SweepReport {
            scanned: keys.len(),
            matched: keys.len(),
            ..Default::default()
        };
        let mut deleted = Vec::new();

        for key in keys {
            match self.store.delete(&key).await {
                Ok(existed) => {
                    self.untrack(&key);
                    if existed {
                        report.invalidated += 1;
                        deleted.push(key);
                    }
                }
                Err(e) if e.is_unavailable() => return Err(e),
                Err(e) => {
                    report.failed += 1;
                    warn!("Failed to invalidate {}: {}", key, e);
                }
            }
        }

        self.total_invalidated
            .fetch_add(report.invalidated as u64, Ordering::Relaxed);
        self.failed_deletes
            .fetch_add(report.failed as u64, Ordering::Relaxed);
        Ok((report, deleted))
    }

    fn log_event(&self, event: InvalidationEvent) {
        if event.keys.is_empty() {
            return;
        }
        info!("Invalidated {} keys ({})", event.keys.len(), event.reason);
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.push_back(event);
        while events.len() > self.config.max_events {
            events.pop_front();
        }
    }

    /// Most recent events, newest last
    pub fn recent_events(&self, limit: usize) -> Vec<InvalidationEvent> {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn stats(&self) -> InvalidatorStats {
        let (tracked_keys, tags) = {
            let index = self.index();
            let mut tracked: HashSet<&String> = index.key_tags.keys().collect();
            tracked.extend(index.texts.keys());
            (tracked.len(), index.tag_keys.len())
        };
        InvalidatorStats {
            rules: self.rules.read().unwrap_or_else(PoisonError::into_inner).len(),
            tracked_keys,
            tags,
            total_invalidated: self.total_invalidated.load(Ordering::Relaxed),
            failed_deletes: self.failed_deletes.load(Ordering::Relaxed),
            embedding_failures: self.embedding_failures.load(Ordering::Relaxed),
            events_logged: self
                .events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
        }
    }
}

/// Anchored regex equivalent of a glob
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::from("^");
    let mut literal = String::new();
    for c in pattern.chars() {
        match c {
            '*' | '?' => {
                expr.push_str(&regex::escape(&literal));
                literal.clear();
                expr.push_str(if c == '*' { ".*" } else { "." });
            }
            _ => literal.push(c),
        }
    }
    expr.push_str(&regex::escape(&literal));
    expr.push('$');

    Regex::new(&expr).map_err(|e| CacheError::Config(format!("invalid pattern {}: {}", pattern, e)))
}

/// Longest wildcard-free prefix of a glob
fn literal_prefix(pattern: &str) -> &str {
    match pattern.find(|c: char| c == '*' || c == '?') {
        Some(i) => &pattern[..i],
        None => pattern,
    }
}
