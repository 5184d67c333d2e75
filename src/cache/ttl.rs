//! Cache-aside store with a fixed time-to-live

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct Entries<V> {
    map: HashMap<String, (V, Instant)>,
    /// Bumped by every `clear`; fills started before it are refused
    generation: u64,
    last_sweep: Instant,
}

impl<V> Entries<V> {
    fn drop_expired(&mut self, ttl: Duration, now: Instant) {
        self.map
            .retain(|_, (_, stored_at)| now.saturating_duration_since(*stored_at) < ttl);
        self.last_sweep = now;
    }

    /// Drop expired entries at most once per `ttl`
    fn sweep(&mut self, ttl: Duration, now: Instant) {
        if now.saturating_duration_since(self.last_sweep) >= ttl {
            self.drop_expired(ttl, now);
        }
    }
}

/// String-keyed TTL cache. Clones share the same entries.
#[derive(Clone)]
pub struct TtlCache<V> {
    entries: Arc<Mutex<Entries<V>>>,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Entries {
                map: HashMap::new(),
                generation: 0,
                last_sweep: Instant::now(),
            })),
            ttl,
        }
    }

    /// Fresh value for `key`, evicting it if it has expired
    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub(crate) fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let mut entries = self.entries.lock();
        match entries.map.get(key) {
            Some((value, stored_at)) if now.saturating_duration_since(*stored_at) < self.ttl => {
                Some(value.clone())
            }
            Some(_) => {
                entries.map.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_at(key, value, Instant::now());
    }

    pub(crate) fn set_at(&self, key: impl Into<String>, value: V, now: Instant) {
        let mut entries = self.entries.lock();
        entries.sweep(self.ttl, now);
        entries.map.insert(key.into(), (value, now));
    }

    /// Current write generation, to pair with [`TtlCache::set_if_current`]
    pub fn generation(&self) -> u64 {
        self.entries.lock().generation
    }

    /// Store only if no `clear` ran since `generation` was read.
    /// Returns whether the value was stored.
    pub fn set_if_current(&self, key: impl Into<String>, value: V, generation: u64) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if entries.generation != generation {
            return false;
        }
        entries.sweep(self.ttl, now);
        entries.map.insert(key.into(), (value, now));
        true
    }

    /// Remove every key containing `pattern`, or everything when `None`.
    /// Returns how many entries were dropped.
    pub fn clear(&self, pattern: Option<&str>) -> usize {
        let mut entries = self.entries.lock();
        entries.generation += 1;
        let before = entries.map.len();
        match pattern {
            Some(pattern) => entries.map.retain(|key, _| !key.contains(pattern)),
            None => entries.map.clear(),
        }
        before - entries.map.len()
    }

    /// Drop expired entries; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.map.len();
        entries.drop_expired(self.ttl, now);
        before - entries.map.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_returns_value() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.set("customers:list:{}", 42);
        assert_eq!(cache.get("customers:list:{}"), Some(42));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn expired_entries_miss_and_are_evicted() {
        let cache = TtlCache::new(Duration::from_millis(100));
        cache.set("k", "v".to_string());

        let later = Instant::now() + Duration::from_millis(150);
        assert_eq!(cache.get_at("k", later), None);
        assert!(cache.is_empty(), "expired entry is evicted on read");
    }

    #[test]
    fn writes_sweep_entries_nobody_reads_again() {
        let ttl = Duration::from_millis(100);
        let cache = TtlCache::new(ttl);
        let start = Instant::now();

        cache.set_at("customers:get:1", 1, start);
        cache.set_at("customers:get:2", 2, start);
        assert_eq!(cache.len(), 2);

        cache.set_at("customers:get:3", 3, start + ttl + Duration::from_millis(1));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("customers:get:3"), Some(3));
    }

    #[test]
    fn clear_by_substring_or_everything() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.set("customers:list", 1);
        cache.set("customers:get:1", 2);
        cache.set("products:list", 3);

        assert_eq!(cache.clear(Some("customers")), 2);
        assert_eq!(cache.get("products:list"), Some(3));

        assert_eq!(cache.clear(None), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn fill_started_before_clear_is_refused() {
        let cache = TtlCache::new(Duration::from_secs(60));
        let generation = cache.generation();

        cache.clear(Some("customers:"));
        assert!(!cache.set_if_current("customers:get:1", "old", generation));
        assert!(cache.get("customers:get:1").is_none());

        assert!(cache.set_if_current("customers:get:1", "new", cache.generation()));
        assert_eq!(cache.get("customers:get:1"), Some("new"));
    }

    #[test]
    fn clones_share_entries() {
        let cache = TtlCache::new(Duration::from_secs(60));
        let other = cache.clone();
        other.set("k", 1);
        assert_eq!(cache.get("k"), Some(1));
    }
}
