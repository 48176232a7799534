use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Bounded best-effort dedupe cache for RUM `metric_id`s, so a client retry
/// (sendBeacon fallback, pagehide/visibilitychange double-flush) doesn't
/// double-count a Web Vitals sample. Not a correctness guarantee: under
/// memory pressure the oldest entries are evicted before their TTL expires.
pub struct DedupeCache {
    capacity: usize,
    ttl: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl DedupeCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if `key` was already seen within the TTL window, and
    /// records it as seen either way.
    pub fn seen(&self, key: &str, now: Instant) -> bool {
        let mut guard = self.seen.lock();
        guard.retain(|_, seen_at| now.duration_since(*seen_at) < self.ttl);

        if let Some(seen_at) = guard.get(key) {
            if now.duration_since(*seen_at) < self.ttl {
                return true;
            }
        }

        if guard.len() >= self.capacity {
            if let Some(oldest_key) = guard.iter().min_by_key(|(_, t)| **t).map(|(k, _)| k.clone()) {
                guard.remove(&oldest_key);
            }
        }
        guard.insert(key.to_string(), now);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_is_not_seen() {
        let cache = DedupeCache::new(10, Duration::from_secs(60));
        assert!(!cache.seen("a", Instant::now()));
    }

    #[test]
    fn repeat_within_ttl_is_seen() {
        let cache = DedupeCache::new(10, Duration::from_secs(60));
        let now = Instant::now();
        assert!(!cache.seen("a", now));
        assert!(cache.seen("a", now));
    }

    #[test]
    fn repeat_after_ttl_is_not_seen() {
        let cache = DedupeCache::new(10, Duration::from_millis(10));
        let now = Instant::now();
        assert!(!cache.seen("a", now));
        assert!(!cache.seen("a", now + Duration::from_millis(50)));
    }

    #[test]
    fn capacity_overflow_evicts_oldest() {
        let cache = DedupeCache::new(2, Duration::from_secs(60));
        let t0 = Instant::now();
        assert!(!cache.seen("a", t0));
        assert!(!cache.seen("b", t0 + Duration::from_millis(1)));
        assert!(!cache.seen("c", t0 + Duration::from_millis(2)));
        // "a" should have been evicted to make room for "c".
        assert!(!cache.seen("a", t0 + Duration::from_millis(3)));
    }
}
