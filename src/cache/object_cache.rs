//! Thread-Safe Object Cache with Expiry Support
//!
//! A concurrent map from identities to model instances, fronting every
//! storage service. It runs in one of two modes chosen at construction:
//!
//! - **Eternal** (TTL zero): entries stay until removed.
//! - **Expiring**: each `put` stamps the entry with `now + ttl`. Expired
//!   entries are evicted when a read finds them, or by a
//!   [`CacheSweeper`](crate::cache::CacheSweeper) if one is running.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ObjectCache<K, V>                       │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │Shard 15 │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Keys are distributed across shards by hash, so operations on different
//! keys rarely contend. Each operation is atomic for its key; `values()`
//! visits shards one at a time and is not a snapshot of the whole cache.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Number of shards.
const NUM_SHARDS: usize = 16;

/// A cached value with its optional expiry.
#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    #[inline]
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }
}

#[derive(Debug)]
struct Shard<K, V> {
    data: RwLock<HashMap<K, Entry<V>>>,
}

impl<K, V> Shard<K, V> {
    fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<K, Entry<V>>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<K, Entry<V>>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cache counters since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub removals: u64,
    pub expirations: u64,
}

/// A sharded, internally synchronized cache with optional TTL.
///
/// # Example
///
/// ```
/// use modelstore::cache::ObjectCache;
/// use std::time::Duration;
///
/// let cache: ObjectCache<i64, String> = ObjectCache::expiring(Duration::from_secs(60));
/// cache.put(1, "ada".to_string());
/// assert_eq!(cache.get(&1), Some("ada".to_string()));
///
/// cache.remove(&1);
/// assert_eq!(cache.get(&1), None);
/// ```
pub struct ObjectCache<K, V> {
    shards: Vec<Shard<K, V>>,
    ttl: Option<Duration>,

    entry_count: AtomicU64,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    put_count: AtomicU64,
    remove_count: AtomicU64,
    expired_count: AtomicU64,
}

impl<K, V> std::fmt::Debug for ObjectCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCache")
            .field("shards", &self.shards.len())
            .field("ttl", &self.ttl)
            .field("entries", &self.entry_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl<K: Hash + Eq + Clone, V: Clone> Default for ObjectCache<K, V> {
    fn default() -> Self {
        Self::eternal()
    }
}

impl<K: Hash + Eq + Clone, V: Clone> ObjectCache<K, V> {
    /// Creates a cache; a zero `ttl` means entries never expire.
    pub fn new(ttl: Duration) -> Self {
        Self {
            shards: (0..NUM_SHARDS).map(|_| Shard::new()).collect(),
            ttl: (!ttl.is_zero()).then_some(ttl),
            entry_count: AtomicU64::new(0),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
            put_count: AtomicU64::new(0),
            remove_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    /// Creates a cache whose entries never expire.
    pub fn eternal() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Creates a cache whose entries expire `ttl` after they were put.
    pub fn expiring(ttl: Duration) -> Self {
        Self::new(ttl)
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    #[inline]
    pub fn is_eternal(&self) -> bool {
        self.ttl.is_none()
    }

    #[inline]
    fn shard(&self, key: &K) -> &Shard<K, V> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    fn record_lookup(&self, found: bool) {
        let counter = if found {
            &self.hit_count
        } else {
            &self.miss_count
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the cached value for a key.
    ///
    /// In expiring mode an expired entry is evicted and reported absent.
    pub fn get(&self, key: &K) -> Option<V> {
        let shard = self.shard(key);

        // Fast path under the read lock
        {
            let data = shard.read();
            match data.get(key) {
                Some(entry) if !entry.is_expired(Instant::now()) => {
                    self.record_lookup(true);
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => {
                    self.record_lookup(false);
                    return None;
                }
            }
        }

        // Expired: re-check under the write lock, another thread may have
        // replaced the entry in between
        let mut data = shard.write();
        if let Some(entry) = data.get(key) {
            if !entry.is_expired(Instant::now()) {
                self.record_lookup(true);
                return Some(entry.value.clone());
            }
            data.remove(key);
            self.entry_count.fetch_sub(1, Ordering::Relaxed);
            self.expired_count.fetch_add(1, Ordering::Relaxed);
        }
        self.record_lookup(false);
        None
    }

    /// Whether a live entry exists, without counting a hit or a miss.
    pub fn contains(&self, key: &K) -> bool {
        self.shard(key)
            .read()
            .get(key)
            .map(|e| !e.is_expired(Instant::now()))
            .unwrap_or(false)
    }

    /// Stores a value, replacing any existing entry and its expiry.
    pub fn put(&self, key: K, value: V) {
        self.put_count.fetch_add(1, Ordering::Relaxed);
        let entry = Entry {
            value,
            expires_at: self.ttl.map(|ttl| Instant::now() + ttl),
        };
        let mut data = self.shard(&key).write();
        if data.insert(key, entry).is_none() {
            self.entry_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Removes an entry. Returns whether one was present.
    pub fn remove(&self, key: &K) -> bool {
        let mut data = self.shard(key).write();
        if data.remove(key).is_some() {
            self.entry_count.fetch_sub(1, Ordering::Relaxed);
            self.remove_count.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Removes every entry.
    pub fn clear(&self) {
        for shard in &self.shards {
            let mut data = shard.write();
            let removed = data.len() as u64;
            data.clear();
            self.entry_count.fetch_sub(removed, Ordering::Relaxed);
            self.remove_count.fetch_add(removed, Ordering::Relaxed);
        }
    }

    /// Returns every live value, evicting the expired entries it passes.
    pub fn values(&self) -> Vec<V> {
        let mut values = Vec::new();
        for shard in &self.shards {
            if self.is_eternal() {
                values.extend(shard.read().values().map(|e| e.value.clone()));
                continue;
            }
            let now = Instant::now();
            let mut data = shard.write();
            let before = data.len();
            data.retain(|_, entry| !entry.is_expired(now));
            self.count_expired((before - data.len()) as u64);
            values.extend(data.values().map(|e| e.value.clone()));
        }
        values
    }

    /// Evicts every expired entry and returns how many were removed.
    ///
    /// Called by the background sweeper.
    pub fn cleanup_expired(&self) -> u64 {
        if self.is_eternal() {
            return 0;
        }
        let mut cleaned = 0u64;
        for shard in &self.shards {
            let now = Instant::now();
            let mut data = shard.write();
            let before = data.len();
            data.retain(|_, entry| !entry.is_expired(now));
            cleaned += (before - data.len()) as u64;
        }
        self.count_expired(cleaned);
        cleaned
    }

    fn count_expired(&self, expired: u64) {
        if expired > 0 {
            self.entry_count.fetch_sub(expired, Ordering::Relaxed);
            self.expired_count.fetch_add(expired, Ordering::Relaxed);
        }
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> u64 {
        self.entry_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entry_count.load(Ordering::Relaxed),
            hits: self.hit_count.load(Ordering::Relaxed),
            misses: self.miss_count.load(Ordering::Relaxed),
            puts: self.put_count.load(Ordering::Relaxed),
            removals: self.remove_count.load(Ordering::Relaxed),
            expirations: self.expired_count.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_put_and_get() {
        let cache = ObjectCache::eternal();
        cache.put(1, "ada");
        assert_eq!(cache.get(&1), Some("ada"));
        assert_eq!(cache.get(&2), None);
    }

    #[test]
    fn test_put_replaces() {
        let cache = ObjectCache::eternal();
        cache.put(1, "ada");
        cache.put(1, "grace");
        assert_eq!(cache.get(&1), Some("grace"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = ObjectCache::eternal();
        cache.put(1, "a");
        cache.put(2, "b");

        assert!(cache.remove(&1));
        assert!(!cache.remove(&1));
        assert_eq!(cache.get(&1), None);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get(&2), None);
    }

    #[test]
    fn test_eternal_cache_never_evicts() {
        let cache = ObjectCache::new(Duration::ZERO);
        assert!(cache.is_eternal());
        cache.put("k", 1);

        thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.get(&"k"), Some(1));
        assert_eq!(cache.cleanup_expired(), 0);
        assert_eq!(cache.values(), vec![1]);
    }

    #[test]
    fn test_expiry() {
        let cache = ObjectCache::expiring(Duration::from_millis(50));
        cache.put("k", 1);

        // Present immediately
        assert!(cache.contains(&"k"));
        assert_eq!(cache.get(&"k"), Some(1));

        thread::sleep(Duration::from_millis(60));

        assert!(!cache.contains(&"k"));
        assert_eq!(cache.get(&"k"), None);
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_put_refreshes_expiry() {
        let cache = ObjectCache::expiring(Duration::from_millis(80));
        cache.put("k", 1);
        thread::sleep(Duration::from_millis(50));
        cache.put("k", 2);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(cache.get(&"k"), Some(2));
    }

    #[test]
    fn test_values_evicts_expired() {
        let cache = ObjectCache::expiring(Duration::from_millis(20));
        for i in 0..10 {
            cache.put(i, i);
        }
        thread::sleep(Duration::from_millis(40));
        cache.put(100, 100);

        assert_eq!(cache.values(), vec![100]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().expirations, 10);
    }

    #[test]
    fn test_cleanup_expired() {
        let cache = ObjectCache::expiring(Duration::from_millis(10));
        cache.put("a", 1);
        cache.put("b", 2);

        thread::sleep(Duration::from_millis(50));
        cache.put("c", 3);

        assert_eq!(cache.cleanup_expired(), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&"c"));
    }

    #[test]
    fn test_stats() {
        let cache = ObjectCache::eternal();
        cache.put(1, 'a');
        cache.get(&1);
        cache.get(&2);
        cache.remove(&1);

        let stats = cache.stats();
        assert_eq!(stats.puts, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.removals, 1);
        assert_eq!(stats.entries, 0);
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(ObjectCache::expiring(Duration::from_secs(60)));
        let mut handles = vec![];

        for i in 0..10 {
            let cache = Arc::clone(&cache);
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    let key = format!("key-{}-{}", i, j);
                    cache.put(key.clone(), j);
                    assert_eq!(cache.get(&key), Some(j));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 1000);
        assert_eq!(cache.values().len(), 1000);
    }
}
