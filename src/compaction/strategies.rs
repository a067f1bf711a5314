//! Compaction algorithms
//!
//! Every strategy returns a subset of its input (plus, for summarization,
//! synthetic summary entries that replace larger groups). Retained entries
//! keep their original relative order.

use crate::compaction::config::CompactionConfig;
use crate::compaction::snapshot::{estimate_tokens, MemoryEntry};
use crate::embedding::{cosine_similarity, Embedder, Summarizer};
use crate::error::Result;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};
use uuid::Uuid;

/// `importance × 1/(1 + age_days) × (1 + 0.1 × access_count)`
pub fn statistical_score(entry: &MemoryEntry, now: DateTime<Utc>) -> f64 {
    let recency = 1.0 / (1.0 + entry.age_hours(now) / 24.0);
    entry.importance * recency * (1.0 + 0.1 * entry.access_count as f64)
}

/// `importance × 0.5^(age / decay_hours) × (1 + 0.1 × access_count)`
pub fn priority_score(entry: &MemoryEntry, now: DateTime<Utc>, decay_hours: f64) -> f64 {
    let decay = 0.5f64.powf(entry.age_hours(now) / decay_hours);
    entry.importance * decay * (1.0 + 0.1 * entry.access_count as f64)
}

/// Keep the `count` best-scored entries, preserving input order
fn keep_top<F>(entries: &[MemoryEntry], count: usize, score: F) -> Vec<MemoryEntry>
where
    F: Fn(&MemoryEntry) -> f64,
{
    let mut ranked: Vec<(usize, f64)> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| (i, score(e)))
        .collect();

    ranked.sort_by(|(ia, sa), (ib, sb)| {
        sb.partial_cmp(sa)
            .unwrap_or(Ordering::Equal)
            .then_with(|| entries[*ib].created_at.cmp(&entries[*ia].created_at))
            .then_with(|| entries[*ia].id.cmp(&entries[*ib].id))
    });

    let mut kept: Vec<usize> = ranked.into_iter().take(count).map(|(i, _)| i).collect();
    kept.sort_unstable();
    kept.into_iter().map(|i| entries[i].clone()).collect()
}

pub fn statistical(
    entries: &[MemoryEntry],
    config: &CompactionConfig,
    now: DateTime<Utc>,
) -> Vec<MemoryEntry> {
    let target = config.target_count(entries.len());
    keep_top(entries, target, |e| statistical_score(e, now))
}

pub fn temporal_windowing(
    entries: &[MemoryEntry],
    config: &CompactionConfig,
    now: DateTime<Utc>,
) -> Vec<MemoryEntry> {
    entries
        .iter()
        .filter(|e| {
            let age = e.age_hours(now);
            age < config.keep_recent_hours
                || (e.importance >= config.min_importance
                    && age < config.keep_important_days * 24.0)
        })
        .cloned()
        .collect()
}

pub fn importance_priority(
    entries: &[MemoryEntry],
    config: &CompactionConfig,
    now: DateTime<Utc>,
) -> Vec<MemoryEntry> {
    let target = config.target_count(entries.len());
    keep_top(entries, target, |e| {
        priority_score(e, now, config.importance_decay_hours)
    })
}

/// Index of the most important entry; earliest wins ties
fn most_important(entries: &[MemoryEntry], members: &[usize]) -> Option<usize> {
    members.iter().copied().reduce(|best, i| {
        let (a, b) = (&entries[best], &entries[i]);
        let better = b.importance > a.importance
            || (b.importance == a.importance && b.access_count > a.access_count);
        if better {
            i
        } else {
            best
        }
    })
}

/// Collapse every group of `min_duplicates`+ identical contents to its most
/// important member
pub fn deduplicate(entries: &[MemoryEntry], min_duplicates: usize) -> Vec<MemoryEntry> {
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, entry) in entries.iter().enumerate() {
        groups.entry(entry.content_hash()).or_default().push(i);
    }

    let mut dropped = HashSet::new();
    for members in groups.values() {
        if members.len() < min_duplicates {
            continue;
        }
        if let Some(keep) = most_important(entries, members) {
            dropped.extend(members.iter().copied().filter(|i| *i != keep));
        }
    }

    entries
        .iter()
        .enumerate()
        .filter(|(i, _)| !dropped.contains(i))
        .map(|(_, e)| e.clone())
        .collect()
}

/// Greedy clustering by cosine similarity to each cluster's seed.
///
/// Entries whose embedding fails stay as singletons.
pub async fn semantic_clustering(
    entries: &[MemoryEntry],
    config: &CompactionConfig,
    embedder: &dyn Embedder,
) -> Result<Vec<MemoryEntry>> {
    let mut vectors: Vec<Option<Vec<f32>>> = Vec::with_capacity(entries.len());
    let mut failures = 0usize;
    for entry in entries {
        match embedder.embed(&entry.content).await {
            Ok(vector) => vectors.push(Some(vector)),
            Err(e) => {
                failures += 1;
                debug!("No embedding for memory {}: {}", entry.id, e);
                vectors.push(None);
            }
        }
    }
    if failures > 0 {
        warn!("{} of {} memories could not be embedded", failures, entries.len());
    }

    let mut assigned = vec![false; entries.len()];
    let mut dropped = HashSet::new();
    for seed in 0..entries.len() {
        if assigned[seed] {
            continue;
        }
        assigned[seed] = true;
        let Some(seed_vector) = &vectors[seed] else {
            continue;
        };

        let mut members = vec![seed];
        for other in (seed + 1)..entries.len() {
            if assigned[other] {
                continue;
            }
            if let Some(vector) = &vectors[other] {
                if cosine_similarity(seed_vector, vector) >= config.cluster_similarity_threshold {
                    assigned[other] = true;
                    members.push(other);
                }
            }
        }

        if members.len() >= config.cluster_min_size {
            if let Some(keep) = most_important(entries, &members) {
                dropped.extend(members.into_iter().filter(|i| *i != keep));
            }
        }
    }

    Ok(entries
        .iter()
        .enumerate()
        .filter(|(i, _)| !dropped.contains(i))
        .map(|(_, e)| e.clone())
        .collect())
}

/// Replace each group of two or more entries with one summary entry.
///
/// A group keeps its originals when the summarizer fails for it or when the
/// summary would not be smaller than what it replaces.
pub async fn llm_summarization(
    entries: &[MemoryEntry],
    summarizer: &dyn Summarizer,
) -> Result<Vec<MemoryEntry>> {
    // BTreeMap keeps group output deterministic
    let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, entry) in entries.iter().enumerate() {
        groups.entry(entry.group_key()).or_default().push(i);
    }

    let mut result = Vec::with_capacity(entries.len());
    for (group, members) in groups {
        let originals: Vec<&MemoryEntry> = members.iter().map(|i| &entries[*i]).collect();
        if originals.len() < 2 {
            result.extend(originals.into_iter().cloned());
            continue;
        }

        let texts: Vec<String> = originals.iter().map(|e| e.content.clone()).collect();
        let summary = match summarizer.summarize(&texts).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!("Summarizer failed for group {}, keeping originals: {}", group, e);
                result.extend(originals.into_iter().cloned());
                continue;
            }
        };

        let original_tokens: usize = originals.iter().map(|e| e.tokens).sum();
        let summary_tokens = estimate_tokens(&summary);
        if summary_tokens >= original_tokens {
            debug!(
                "Summary for group {} saves nothing ({} >= {} tokens)",
                group, summary_tokens, original_tokens
            );
            result.extend(originals.into_iter().cloned());
            continue;
        }

        result.push(summary_entry(group, &originals, summary, summary_tokens));
    }

    Ok(result)
}

fn summary_entry(
    group: &str,
    originals: &[&MemoryEntry],
    content: String,
    tokens: usize,
) -> MemoryEntry {
    let first = originals[0];
    let mut entry = MemoryEntry::new(format!("summary-{}", Uuid::new_v4()), content);
    entry.tokens = tokens;
    entry.importance = originals.iter().map(|e| e.importance).fold(0.0, f64::max);
    entry.created_at = originals
        .iter()
        .map(|e| e.created_at)
        .max()
        .unwrap_or(first.created_at);
    entry.access_count = originals.iter().map(|e| e.access_count).sum();
    entry.session_id = first.session_id.clone();
    entry.category = first.category.clone();
    entry.summarizes = originals.iter().map(|e| e.id.clone()).collect();
    entry
        .metadata
        .insert("summary_group".to_string(), group.into());
    entry
}

/// Dedup, then temporal windowing, then importance priority, then top up to
/// `retain_top_n` from the original set
pub fn hybrid(
    entries: &[MemoryEntry],
    config: &CompactionConfig,
    now: DateTime<Utc>,
) -> Vec<MemoryEntry> {
    let deduped = deduplicate(entries, config.min_duplicates);
    let windowed = temporal_windowing(&deduped, config, now);
    let prioritized = importance_priority(&windowed, config, now);

    let floor = config.retain_top_n.min(entries.len());
    if prioritized.len() >= floor {
        return prioritized;
    }

    let kept: HashSet<&str> = prioritized.iter().map(|e| e.id.as_str()).collect();
    let spare: Vec<MemoryEntry> = entries
        .iter()
        .filter(|e| !kept.contains(e.id.as_str()))
        .cloned()
        .collect();
    let top_up = keep_top(&spare, floor - prioritized.len(), |e| {
        statistical_score(e, now)
    });

    let chosen: HashSet<String> = prioritized
        .iter()
        .chain(top_up.iter())
        .map(|e| e.id.clone())
        .collect();
    entries
        .iter()
        .filter(|e| chosen.contains(&e.id))
        .cloned()
        .collect()
}
