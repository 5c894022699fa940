//! TTL cache with lazy expiration.
//!
//! A bounded-purpose key → (value, expiry) store: reads past the expiry
//! instant delete the entry and report a miss. Internally synchronized,
//! so it behaves as a concurrent map. Hit/miss statistics are kept for
//! the stats surface.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Accumulated cache statistics plus current size.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

struct CacheInner<T> {
    entries: HashMap<String, (T, Instant)>,
    hits: u64,
    misses: u64,
}

/// String-keyed cache with per-entry expiry and a configurable default
/// TTL.
pub struct TtlCache<T> {
    inner: Mutex<CacheInner<T>>,
    default_ttl: Duration,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
            }),
            default_ttl,
        }
    }

    /// Insert with the default TTL.
    pub fn set(&self, key: &str, value: T) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Insert with an explicit TTL, replacing any previous entry.
    pub fn set_with_ttl(&self, key: &str, value: T, ttl: Duration) {
        let mut inner = self.inner.lock().expect("cache lock");
        inner
            .entries
            .insert(key.to_string(), (value, Instant::now() + ttl));
    }

    /// Read an entry, lazily expiring it.
    ///
    /// An expired entry is removed and counted as a miss.
    pub fn get(&self, key: &str) -> Option<T> {
        let mut inner = self.inner.lock().expect("cache lock");
        match inner.entries.get(key) {
            Some((_, expiry)) if *expiry <= Instant::now() => {
                inner.entries.remove(key);
                inner.misses += 1;
                None
            }
            Some((value, _)) => {
                let value = value.clone();
                inner.hits += 1;
                Some(value)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Remove an entry; returns whether one existed.
    pub fn remove(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().expect("cache lock");
        inner.entries.remove(key).is_some()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("cache lock");
        inner.entries.clear();
    }

    /// Purge expired entries eagerly; returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let mut inner = self.inner.lock().expect("cache lock");
        let now = Instant::now();
        let before = inner.entries.len();
        inner.entries.retain(|_, (_, expiry)| *expiry > now);
        before - inner.entries.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().expect("cache lock");
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            size: inner.entries.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn set_and_get_within_ttl() {
        let cache = TtlCache::new(Duration::from_secs(5));
        cache.set("k", 7usize);
        assert_eq!(cache.get("k"), Some(7));
    }

    #[test]
    fn read_past_expiry_deletes_and_misses() {
        let cache = TtlCache::new(Duration::from_millis(30));
        cache.set("k", 1usize);
        thread::sleep(Duration::from_millis(60));

        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.len(), 0);

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn explicit_ttl_overrides_default() {
        let cache = TtlCache::new(Duration::from_millis(10));
        cache.set_with_ttl("k", 1usize, Duration::from_secs(5));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get("k"), Some(1));
    }

    #[test]
    fn remove_reports_presence() {
        let cache = TtlCache::new(Duration::from_secs(5));
        cache.set("k", 1usize);
        assert!(cache.remove("k"));
        assert!(!cache.remove("k"));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn clear_empties_the_cache() {
        let cache = TtlCache::new(Duration::from_secs(5));
        cache.set("a", 1usize);
        cache.set("b", 2usize);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn cleanup_purges_only_expired() {
        let cache = TtlCache::new(Duration::from_secs(5));
        cache.set_with_ttl("old", 1usize, Duration::from_millis(20));
        cache.set("fresh", 2usize);
        thread::sleep(Duration::from_millis(50));

        assert_eq!(cache.cleanup(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("fresh"), Some(2));
    }

    #[test]
    fn stats_track_hits_and_misses() {
        let cache = TtlCache::new(Duration::from_secs(5));
        cache.set("k", 1usize);
        cache.get("k");
        cache.get("k");
        cache.get("absent");

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn replacing_resets_expiry() {
        let cache = TtlCache::new(Duration::from_millis(40));
        cache.set("k", 1usize);
        thread::sleep(Duration::from_millis(25));
        cache.set("k", 2usize);
        thread::sleep(Duration::from_millis(25));
        // Original expiry has passed; the replacement's has not.
        assert_eq!(cache.get("k"), Some(2));
    }
}
