//! LRU + TTL cache shared by every intel client (spec §4.2).

use std::time::Duration;

use moka::sync::Cache;

/// Bounded, TTL-evicting cache keyed by IP string.
///
/// A hit returns in O(1) and does not consume rate-limit budget -- callers
/// must check the cache before touching the rate limiter, not after.
#[derive(Clone)]
pub struct IntelCache<V: Clone + Send + Sync + 'static> {
    inner: Cache<String, V>,
}

impl<V: Clone + Send + Sync + 'static> IntelCache<V> {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn get(&self, ip: &str) -> Option<V> {
        self.inner.get(ip)
    }

    pub fn insert(&self, ip: String, value: V) {
        self.inner.insert(ip, value);
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_returns_cached_value() {
        let cache: IntelCache<u32> = IntelCache::new(10, Duration::from_secs(60));
        cache.insert("8.8.8.8".into(), 42);
        assert_eq!(cache.get("8.8.8.8"), Some(42));
        assert_eq!(cache.get("1.1.1.1"), None);
    }

    #[test]
    fn expires_after_ttl() {
        let cache: IntelCache<u32> = IntelCache::new(10, Duration::from_millis(20));
        cache.insert("8.8.8.8".into(), 42);
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.get("8.8.8.8"), None);
    }
}
