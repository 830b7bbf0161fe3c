use std::collections::{HashSet, VecDeque};

use tokio::sync::Mutex;

/// Bounded set of recently seen webhook delivery keys, shared by all
/// providers. Insertion-order FIFO eviction at capacity; per-process only,
/// so duplicates across restarts (or across instances) are not caught.
pub struct DedupCache {
    inner: Mutex<DedupInner>,
    capacity: usize,
}

#[derive(Default)]
struct DedupInner {
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl DedupCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(DedupInner::default()),
            capacity: capacity.max(1),
        }
    }

    /// Returns true when the key was already present; otherwise records it,
    /// evicting the oldest entry at capacity.
    pub async fn check_and_insert(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.seen.contains(key) {
            return true;
        }
        if inner.order.len() >= self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.seen.remove(&oldest);
            }
        }
        inner.seen.insert(key.to_string());
        inner.order.push_back(key.to_string());
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn detects_duplicate_keys() {
        let cache = DedupCache::new(10);
        assert!(!cache.check_and_insert("evt-1").await);
        assert!(cache.check_and_insert("evt-1").await);
        assert!(!cache.check_and_insert("evt-2").await);
    }

    #[tokio::test]
    async fn evicts_oldest_key_at_capacity() {
        let cache = DedupCache::new(3);
        for key in ["a", "b", "c"] {
            assert!(!cache.check_and_insert(key).await);
        }
        // "d" pushes out "a", the oldest insertion.
        assert!(!cache.check_and_insert("d").await);
        assert!(!cache.check_and_insert("a").await);
        assert!(cache.check_and_insert("c").await);
        assert!(cache.check_and_insert("d").await);
    }
}
