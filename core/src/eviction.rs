//! Eviction candidate selection for the main store.
//!
//! Collect candidates, sort by policy, evict from the front until the budget is satisfied or
//! candidates run out.

use crate::config::EvictionPolicy;
use crate::key::Key;
use chrono::{DateTime, Utc};

/// The metadata an eviction policy needs about one entry, independent of its value type.
#[derive(Debug, Clone)]
pub struct EvictionCandidate {
    pub key: Key,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
    pub reference_count: u32,
    pub size_bytes: u64,
}

/// Sort `candidates` in the order the given policy would evict them (front = evict first).
/// Entries with `reference_count > 0` are filtered out entirely — they are never evicted by
/// size pressure (data model invariant 3).
pub fn order_candidates(
    policy: EvictionPolicy,
    mut candidates: Vec<EvictionCandidate>,
) -> Vec<EvictionCandidate> {
    candidates.retain(|c| c.reference_count == 0);
    match policy {
        EvictionPolicy::Lru => {
            candidates.sort_by_key(|c| c.last_accessed_at);
        }
        EvictionPolicy::Lfu => {
            candidates.sort_by(|a, b| {
                a.access_count
                    .cmp(&b.access_count)
                    .then_with(|| a.last_accessed_at.cmp(&b.last_accessed_at))
            });
        }
        EvictionPolicy::Fifo => {
            candidates.sort_by_key(|c| c.created_at);
        }
    }
    candidates
}

/// Given ordered candidates, pick a prefix whose cumulative size reaches `bytes_to_free`
/// (or exhausts the candidate list). Returns the keys to evict, in eviction order.
#[must_use]
pub fn select_for_budget(candidates: &[EvictionCandidate], bytes_to_free: u64) -> Vec<Key> {
    let mut freed = 0u64;
    let mut selected = Vec::new();
    for candidate in candidates {
        if freed >= bytes_to_free {
            break;
        }
        freed += candidate.size_bytes;
        selected.push(candidate.key.clone());
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn candidate(key: &str, age_secs: i64, access_count: u64, refcount: u32) -> EvictionCandidate {
        let now = Utc::now();
        EvictionCandidate {
            key: Key::new(key).unwrap(),
            created_at: now - ChronoDuration::seconds(age_secs),
            last_accessed_at: now - ChronoDuration::seconds(age_secs),
            access_count,
            reference_count: refcount,
            size_bytes: 100,
        }
    }

    #[test]
    fn lru_orders_oldest_access_first() {
        let candidates = vec![candidate("a", 10, 5, 0), candidate("b", 60, 5, 0)];
        let ordered = order_candidates(EvictionPolicy::Lru, candidates);
        assert_eq!(ordered[0].key.as_str(), "b");
    }

    #[test]
    fn lfu_orders_by_access_count_then_recency() {
        let candidates = vec![candidate("a", 5, 10, 0), candidate("b", 5, 2, 0)];
        let ordered = order_candidates(EvictionPolicy::Lfu, candidates);
        assert_eq!(ordered[0].key.as_str(), "b");
    }

    #[test]
    fn fifo_orders_by_creation_time() {
        let candidates = vec![candidate("a", 10, 0, 0), candidate("b", 100, 0, 0)];
        let ordered = order_candidates(EvictionPolicy::Fifo, candidates);
        assert_eq!(ordered[0].key.as_str(), "b");
    }

    #[test]
    fn referenced_entries_are_never_candidates() {
        let candidates = vec![candidate("a", 100, 0, 1), candidate("b", 10, 0, 0)];
        let ordered = order_candidates(EvictionPolicy::Lru, candidates);
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].key.as_str(), "b");
    }

    #[test]
    fn select_for_budget_stops_once_satisfied() {
        let candidates = order_candidates(
            EvictionPolicy::Fifo,
            vec![candidate("a", 10, 0, 0), candidate("b", 20, 0, 0), candidate("c", 30, 0, 0)],
        );
        let selected = select_for_budget(&candidates, 150);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn select_for_budget_takes_all_when_budget_exceeds_total_size() {
        let candidates = order_candidates(EvictionPolicy::Fifo, vec![candidate("a", 10, 0, 0)]);
        let selected = select_for_budget(&candidates, 10_000);
        assert_eq!(selected.len(), 1);
    }
}
