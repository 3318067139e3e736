//! Bounded read-through cache with per-entry TTL
//!
//! Shared by the group membership cache, the experiment id lookup of the SQL
//! role store and the in-memory session store. Entries expire lazily: an
//! expired entry is dropped the next time it is looked up, and the LRU order
//! bounds the total size.

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries in the cache
    pub capacity: usize,

    /// Time-to-live for cached values
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            ttl: Duration::from_secs(600),
        }
    }
}

/// Cached value with its insertion time
#[derive(Clone)]
struct CachedEntry<V> {
    value: V,
    cached_at: Instant,
}

impl<V> CachedEntry<V> {
    fn new(value: V) -> Self {
        Self {
            value,
            cached_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() > ttl
    }
}

/// Thread-safe LRU cache with TTL expiry.
///
/// Cloning is cheap and clones share the same storage.
#[derive(Clone)]
pub struct TtlCache<K, V>
where
    K: Hash + Eq,
{
    entries: Arc<Mutex<LruCache<K, CachedEntry<V>>>>,
    ttl: Duration,
    capacity: usize,
    stats: Arc<DashMap<&'static str, usize>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a new cache; a zero capacity is raised to one entry
    pub fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);

        Self {
            entries: Arc::new(Mutex::new(LruCache::new(capacity))),
            ttl: config.ttl,
            capacity: capacity.get(),
            stats: Arc::new(DashMap::new()),
        }
    }

    /// Get a live value
    pub fn get(&self, key: &K) -> Option<V> {
        let lookup = {
            let mut entries = self.entries.lock();
            let lookup = entries
                .get(key)
                .map(|entry| (entry.is_expired(self.ttl), entry.value.clone()));
            if let Some((true, _)) = lookup {
                entries.pop(key);
            }
            lookup
        };

        match lookup {
            Some((false, value)) => {
                self.increment_stat("hits");
                Some(value)
            }
            Some((true, _)) => {
                self.increment_stat("expirations");
                self.increment_stat("misses");
                None
            }
            None => {
                self.increment_stat("misses");
                None
            }
        }
    }

    /// Store a value, evicting the least recently used entry when full
    pub fn insert(&self, key: K, value: V) {
        let evicted = {
            let mut entries = self.entries.lock();
            let full = entries.len() >= self.capacity && !entries.contains(&key);
            entries.put(key, CachedEntry::new(value));
            full
        };

        if evicted {
            self.increment_stat("evictions");
        }
    }

    /// Return the cached value or run `load`, caching its successful result.
    ///
    /// The lock is not held while `load` runs, so two concurrent misses for
    /// the same key may both load; the later insert wins.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: K, load: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let value = load().await?;
        self.insert(key, value.clone());
        Ok(value)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.lock().pop(key).map(|entry| entry.value)
    }

    /// Drop every entry and reset statistics
    pub fn clear(&self) {
        self.entries.lock().clear();
        self.stats.clear();
    }

    /// Remove expired entries eagerly
    pub fn cleanup_expired(&self) {
        let mut entries = self.entries.lock();
        let expired: Vec<K> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(self.ttl))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            entries.pop(key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.get_stat("hits"),
            misses: self.get_stat("misses"),
            expirations: self.get_stat("expirations"),
            evictions: self.get_stat("evictions"),
            entries: self.len(),
            max_entries: self.capacity,
        }
    }

    fn increment_stat(&self, key: &'static str) {
        self.stats
            .entry(key)
            .and_modify(|count| *count += 1)
            .or_insert(1);
    }

    fn get_stat(&self, key: &'static str) -> usize {
        self.stats.get(key).map(|v| *v).unwrap_or(0)
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub expirations: usize,
    pub evictions: usize,
    pub entries: usize,
    pub max_entries: usize,
}

impl CacheStats {
    /// Calculate cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
