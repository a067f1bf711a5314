//! Eviction scoring and victim selection
//!
//! Scoring is synchronous and works on [`EvictionCandidate`] values loaded
//! by the engine; lower scores are evicted first.

use crate::cache::entry::CacheEntry;
use crate::cache::types::EvictionPolicy;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;

/// Everything the policies need to know about one live entry
#[derive(Debug, Clone, PartialEq)]
pub struct EvictionCandidate {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub tokens_saved: u64,
    pub importance: f64,
    pub ttl_secs: u64,
}

impl EvictionCandidate {
    pub fn from_entry(key: impl Into<String>, entry: &CacheEntry) -> Self {
        Self {
            key: key.into(),
            created_at: entry.created_at,
            last_accessed: entry.last_accessed,
            access_count: entry.access_count,
            tokens_saved: entry.tokens_saved,
            importance: entry.importance,
            ttl_secs: entry.ttl_secs,
        }
    }

    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        ((now - self.created_at).num_milliseconds().max(0) as f64) / 3_600_000.0
    }
}

/// `(access_count×10 + tokens_saved×0.01 + importance×5) / (1 + age_hours)`
pub fn adaptive_score(candidate: &EvictionCandidate, now: DateTime<Utc>) -> f64 {
    let value = candidate.access_count as f64 * 10.0
        + candidate.tokens_saved as f64 * 0.01
        + candidate.importance * 5.0;
    value / (1.0 + candidate.age_hours(now))
}

/// Eviction score of `candidate` under `policy`; lower is evicted first
pub fn score(policy: EvictionPolicy, candidate: &EvictionCandidate, now: DateTime<Utc>) -> f64 {
    match policy {
        EvictionPolicy::Lru => candidate.last_accessed.timestamp_millis() as f64,
        EvictionPolicy::Lfu => candidate.access_count as f64,
        EvictionPolicy::Ttl => {
            (candidate.created_at.timestamp_millis() + candidate.ttl_secs as i64 * 1000) as f64
        }
        EvictionPolicy::Adaptive => adaptive_score(candidate, now),
    }
}

/// Keys of the `count` lowest-scored candidates, lowest first.
///
/// Ties are broken by older creation time, then by key, so selection is
/// deterministic.
pub fn select_victims(
    policy: EvictionPolicy,
    candidates: &[EvictionCandidate],
    count: usize,
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut scored: Vec<(f64, &EvictionCandidate)> = candidates
        .iter()
        .map(|c| (score(policy, c, now), c))
        .collect();

    scored.sort_by(|(sa, a), (sb, b)| {
        sa.partial_cmp(sb)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.key.cmp(&b.key))
    });

    scored
        .into_iter()
        .take(count)
        .map(|(_, c)| c.key.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn candidate(key: &str, hours_old: i64, accessed_mins_ago: i64, count: u64) -> EvictionCandidate {
        let now = Utc::now();
        EvictionCandidate {
            key: key.to_string(),
            created_at: now - Duration::hours(hours_old),
            last_accessed: now - Duration::minutes(accessed_mins_ago),
            access_count: count,
            tokens_saved: 0,
            importance: 0.0,
            ttl_secs: 3600,
        }
    }

    #[test]
    fn test_adaptive_score_formula() {
        let now = Utc::now();
        let c = EvictionCandidate {
            key: "k".into(),
            created_at: now - Duration::hours(1),
            last_accessed: now,
            access_count: 2,
            tokens_saved: 500,
            importance: 0.4,
            ttl_secs: 60,
        };
        // (20 + 5 + 2) / (1 + 1)
        assert!((adaptive_score(&c, now) - 13.5).abs() < 1e-6);
    }

    #[test]
    fn test_lru_selects_least_recent() {
        let now = Utc::now();
        let candidates = vec![
            candidate("a", 1, 5, 0),
            candidate("b", 1, 50, 0),
            candidate("c", 1, 20, 0),
        ];
        assert_eq!(
            select_victims(EvictionPolicy::Lru, &candidates, 2, now),
            vec!["b".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn test_lfu_selects_least_frequent() {
        let now = Utc::now();
        let candidates = vec![candidate("a", 1, 1, 9), candidate("b", 1, 1, 1)];
        assert_eq!(
            select_victims(EvictionPolicy::Lfu, &candidates, 1, now),
            vec!["b".to_string()]
        );
    }

    #[test]
    fn test_ttl_selects_soonest_expiry() {
        let now = Utc::now();
        let mut short = candidate("short", 0, 0, 0);
        short.ttl_secs = 10;
        let long = candidate("long", 0, 0, 0);
        assert_eq!(
            select_victims(EvictionPolicy::Ttl, &[long, short], 1, now),
            vec!["short".to_string()]
        );
    }

    #[test]
    fn test_adaptive_penalizes_age() {
        let now = Utc::now();
        let fresh = candidate("fresh", 0, 0, 3);
        let stale = candidate("stale", 48, 0, 3);
        assert_eq!(
            select_victims(EvictionPolicy::Adaptive, &[fresh, stale], 1, now),
            vec!["stale".to_string()]
        );
    }

    #[test]
    fn test_count_larger_than_candidates() {
        let now = Utc::now();
        let candidates = vec![candidate("a", 1, 1, 1)];
        assert_eq!(select_victims(EvictionPolicy::Lru, &candidates, 10, now).len(), 1);
    }
}
