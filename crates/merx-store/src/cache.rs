//! Process-local L1 cache fronting the aggregate stores.
//!
//! The cache is a passive side-map: the store is the sole reader and
//! writer, handlers never touch it. Entries live for a short TTL so
//! cross-node staleness is bounded; a successful save invalidates the key.
//! Negative lookups are never cached.

use std::hash::Hash;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Tuning knobs for the L1 cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Master switch; a disabled cache stores nothing and hits nothing.
    pub enabled: bool,
    /// How long an entry may be served after insertion.
    pub ttl: Duration,
    /// Upper bound on resident entries.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(10),
            max_entries: 4096,
        }
    }
}

impl CacheConfig {
    /// A configuration that turns the cache off entirely.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// Concurrent TTL cache keyed by aggregate id.
///
/// `DashMap` shards internally, so reads and writes from concurrent
/// handlers do not serialize on one lock. Eviction removes expired
/// entries first, then the oldest entry, keeping residency under
/// `max_entries`.
pub struct AggregateCache<K, V> {
    entries: DashMap<K, CacheEntry<V>>,
    config: CacheConfig,
}

impl<K, V> std::fmt::Debug for AggregateCache<K, V>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateCache")
            .field("config", &self.config)
            .field("len", &self.entries.len())
            .finish()
    }
}

impl<K, V> AggregateCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache with the given configuration.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
        }
    }

    /// Fetch a live entry, removing it when expired.
    pub fn get(&self, key: &K) -> Option<V> {
        if !self.config.enabled {
            return None;
        }
        let expired = match self.entries.get(key) {
            Some(entry) => {
                if entry.inserted_at.elapsed() < self.config.ttl {
                    return Some(entry.value.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    /// Insert or refresh an entry, evicting as needed.
    pub fn insert(&self, key: K, value: V) {
        if !self.config.enabled {
            return;
        }
        if self.entries.len() >= self.config.max_entries && !self.entries.contains_key(&key) {
            self.evict_one();
        }
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop an entry. Called on every successful save.
    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    /// Resident entry count.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_one(&self) {
        // Expired entries go first.
        let mut victim: Option<(K, Instant)> = None;
        for entry in self.entries.iter() {
            if entry.inserted_at.elapsed() >= self.config.ttl {
                victim = Some((entry.key().clone(), entry.inserted_at));
                break;
            }
            match &victim {
                Some((_, oldest)) if entry.inserted_at >= *oldest => {}
                _ => victim = Some((entry.key().clone(), entry.inserted_at)),
            }
        }
        if let Some((key, _)) = victim {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_cache(ttl: Duration) -> AggregateCache<u32, String> {
        AggregateCache::new(CacheConfig {
            enabled: true,
            ttl,
            max_entries: 2,
        })
    }

    #[test]
    fn hit_then_invalidate() {
        let cache = small_cache(Duration::from_secs(60));
        cache.insert(1, "a".to_string());
        assert_eq!(cache.get(&1), Some("a".to_string()));

        cache.invalidate(&1);
        assert_eq!(cache.get(&1), None);
    }

    #[test]
    fn expired_entries_are_not_served() {
        let cache = small_cache(Duration::ZERO);
        cache.insert(1, "a".to_string());
        assert_eq!(cache.get(&1), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn residency_stays_bounded() {
        let cache = small_cache(Duration::from_secs(60));
        cache.insert(1, "a".to_string());
        cache.insert(2, "b".to_string());
        cache.insert(3, "c".to_string());
        assert!(cache.len() <= 2);
        assert_eq!(cache.get(&3), Some("c".to_string()));
    }

    #[test]
    fn disabled_cache_stores_nothing() {
        let cache: AggregateCache<u32, String> = AggregateCache::new(CacheConfig::disabled());
        cache.insert(1, "a".to_string());
        assert_eq!(cache.get(&1), None);
        assert!(cache.is_empty());
    }
}
