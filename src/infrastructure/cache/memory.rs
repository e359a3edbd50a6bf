//! # In-Memory Cache
//!
//! TTL + LRU cache over lock-striped [`LruArena`] shards.
//!
//! Each shard holds `ceil(max_size / shards)` entries behind its own
//! `parking_lot::Mutex`; keys hash to a shard. With one shard (the default)
//! LRU order is exact across the whole cache.
//!
//! Expired entries are never returned: `get` drops them on access and
//! [`MemoryCache::sweep_expired`] (or the task started by
//! [`MemoryCache::spawn_sweeper`]) removes the rest.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ship_quote::application::clock::ManualClock;
//! use ship_quote::infrastructure::cache::{CacheConfig, MemoryCache};
//!
//! let clock = Arc::new(ManualClock::new(0));
//! let cache = MemoryCache::new(CacheConfig::default(), clock.clone());
//!
//! cache.set("quotes:shippo:abc", 42u32, Some(Duration::from_millis(100)));
//! assert_eq!(cache.get("quotes:shippo:abc"), Some(42));
//!
//! clock.advance_ms(101);
//! assert_eq!(cache.get("quotes:shippo:abc"), None);
//! ```

use super::glob::glob_match;
use super::lru::{CacheEntry, LruArena};
use crate::application::clock::Clock;
use crate::application::maintenance::MaintenanceHandle;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Cache sizing and expiry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries.
    pub max_size: usize,
    /// TTL applied when `set` is called without one; 0 never expires.
    pub default_ttl_ms: u64,
    /// Interval of the background sweeper.
    pub cleanup_interval_ms: u64,
    /// Number of independently locked shards.
    pub shards: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1_000,
            default_ttl_ms: 300_000,
            cleanup_interval_ms: 60_000,
            shards: 1,
        }
    }
}

impl CacheConfig {
    /// Sets the maximum size.
    #[must_use]
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Sets the default TTL.
    #[must_use]
    pub fn with_default_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.default_ttl_ms = ttl_ms;
        self
    }

    /// Sets the shard count.
    #[must_use]
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }
}

/// Counters and size of a cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups that found a live entry.
    pub hits: u64,
    /// Lookups that found nothing or an expired entry.
    pub misses: u64,
    /// Writes.
    pub sets: u64,
    /// Explicit deletions that removed an entry.
    pub deletes: u64,
    /// Entries dropped to make room.
    pub evictions: u64,
    /// Entries dropped because their TTL elapsed.
    pub expirations: u64,
    /// Entries currently stored.
    pub size: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

/// Sharded TTL + LRU cache.
#[derive(Debug)]
pub struct MemoryCache<V> {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    shards: Vec<Mutex<LruArena<V>>>,
    counters: Counters,
}

impl<V: Clone + Send + Sync + 'static> MemoryCache<V> {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let shard_count = config.shards.max(1);
        let per_shard = config.max_size.max(1).div_ceil(shard_count);
        let shards = (0..shard_count)
            .map(|_| Mutex::new(LruArena::new(per_shard)))
            .collect();
        Self {
            config,
            clock,
            shards,
            counters: Counters::default(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns a live value and marks it most recently used.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now_ms();
        let mut shard = self.shard(key).lock();

        let expired = shard.peek(key).map(|e| e.is_expired(now));
        match expired {
            None => {
                Counters::bump(&self.counters.misses, 1);
                None
            }
            Some(true) => {
                shard.remove(key);
                Counters::bump(&self.counters.expirations, 1);
                Counters::bump(&self.counters.misses, 1);
                None
            }
            Some(false) => {
                Counters::bump(&self.counters.hits, 1);
                shard.get(key).map(|e| e.value.clone())
            }
        }
    }

    /// Stores a value.
    ///
    /// `ttl` of `None` applies the configured default; a zero duration never
    /// expires.
    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        let ttl_ms = match ttl {
            Some(ttl) => u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            None => self.config.default_ttl_ms,
        };
        let entry = CacheEntry {
            key: key.to_owned(),
            value,
            created_at_ms: self.clock.now_ms(),
            ttl_ms: (ttl_ms > 0).then_some(ttl_ms),
        };

        let evicted = self.shard(key).lock().insert(entry);
        Counters::bump(&self.counters.sets, 1);
        if let Some(evicted) = evicted {
            Counters::bump(&self.counters.evictions, 1);
            tracing::trace!(key = %evicted.key, "evicted least recently used entry");
        }
    }

    /// Removes a key. Returns true if an entry was present.
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.shard(key).lock().remove(key).is_some();
        if removed {
            Counters::bump(&self.counters.deletes, 1);
        }
        removed
    }

    /// Lists live keys, optionally filtered by a glob pattern.
    #[must_use]
    pub fn keys(&self, pattern: Option<&str>) -> Vec<String> {
        let now = self.clock.now_ms();
        self.shards
            .iter()
            .flat_map(|shard| {
                shard
                    .lock()
                    .iter()
                    .filter(|e| !e.is_expired(now))
                    .filter(|e| pattern.is_none_or(|p| glob_match(p, &e.key)))
                    .map(|e| e.key.clone())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Removes every expired entry. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let removed: usize = self
            .shards
            .iter()
            .map(|shard| shard.lock().remove_where(|e| e.is_expired(now)))
            .sum();
        if removed > 0 {
            Counters::bump(&self.counters.expirations, removed as u64);
            tracing::debug!(removed, "swept expired cache entries");
        }
        removed
    }

    /// Drops every entry.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }

    /// Number of stored entries, including expired ones not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns counters and current size.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CacheStats {
            hits: load(&self.counters.hits),
            misses: load(&self.counters.misses),
            sets: load(&self.counters.sets),
            deletes: load(&self.counters.deletes),
            evictions: load(&self.counters.evictions),
            expirations: load(&self.counters.expirations),
            size: self.len(),
        }
    }

    /// Runs [`sweep_expired`](Self::sweep_expired) every
    /// `cleanup_interval_ms` until the handle is dropped or the cache is gone.
    #[must_use]
    pub fn spawn_sweeper(self: &Arc<Self>) -> MaintenanceHandle {
        let period = Duration::from_millis(self.config.cleanup_interval_ms.max(1));
        let cache: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match cache.upgrade() {
                    Some(cache) => {
                        cache.sweep_expired();
                    }
                    None => break,
                }
            }
        });
        MaintenanceHandle::new("cache_sweeper", handle)
    }

    #[allow(clippy::indexing_slicing)] // index is reduced modulo the non-empty shard count
    fn shard(&self, key: &str) -> &Mutex<LruArena<V>> {
        if self.shards.len() == 1 {
            return &self.shards[0];
        }
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() % self.shards.len() as u64) as usize;
        &self.shards[idx]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::application::clock::ManualClock;

    fn cache(max_size: usize) -> (MemoryCache<String>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let config = CacheConfig::default()
            .with_max_size(max_size)
            .with_default_ttl_ms(1_000);
        (MemoryCache::new(config, clock.clone()), clock)
    }

    #[test]
    fn set_then_get() {
        let (cache, _) = cache(10);
        cache.set("k", "v".to_string(), None);
        assert_eq!(cache.get("k").as_deref(), Some("v"));
        assert_eq!(cache.get("missing"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn default_ttl_expires_entry() {
        let (cache, clock) = cache(10);
        cache.set("k", "v".to_string(), None);
        clock.advance_ms(1_000);
        assert!(cache.get("k").is_some());
        clock.advance_ms(1);
        assert!(cache.get("k").is_none());
        assert_eq!(cache.stats().expirations, 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_ttl_never_expires() {
        let (cache, clock) = cache(10);
        cache.set("k", "v".to_string(), Some(Duration::ZERO));
        clock.advance_ms(10_000_000);
        assert!(cache.get("k").is_some());
    }

    #[test]
    fn evicts_exact_lru_on_overflow() {
        let (cache, _) = cache(3);
        for k in ["a", "b", "c", "d"] {
            cache.set(k, k.to_string(), None);
        }
        assert_eq!(cache.len(), 3);
        assert!(cache.get("a").is_none());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn get_promotes_entry() {
        let (cache, _) = cache(3);
        for k in ["a", "b", "c"] {
            cache.set(k, k.to_string(), None);
        }
        assert!(cache.get("a").is_some());
        cache.set("d", "d".to_string(), None);

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
    }

    #[test]
    fn delete_absent_key_is_false_twice() {
        let (cache, _) = cache(3);
        cache.set("k", "v".to_string(), None);
        assert!(cache.delete("k"));
        assert!(!cache.delete("k"));
        assert!(!cache.delete("k"));
        assert_eq!(cache.stats().deletes, 1);
    }

    #[test]
    fn keys_filter_by_pattern_and_skip_expired() {
        let (cache, clock) = cache(10);
        cache.set("quotes:shippo:1", "a".to_string(), None);
        cache.set("quotes:easypost:1", "b".to_string(), Some(Duration::from_millis(10)));
        cache.set("labels:1", "c".to_string(), None);
        clock.advance_ms(11);

        let mut keys = cache.keys(Some("quotes:*"));
        keys.sort();
        assert_eq!(keys, vec!["quotes:shippo:1"]);
        assert_eq!(cache.keys(None).len(), 2);
    }

    #[test]
    fn sweep_removes_expired() {
        let (cache, clock) = cache(10);
        cache.set("short", "a".to_string(), Some(Duration::from_millis(5)));
        cache.set("long", "b".to_string(), None);
        clock.advance_ms(6);
        assert_eq!(cache.sweep_expired(), 1);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn sharded_cache_spreads_keys() {
        let clock = Arc::new(ManualClock::new(0));
        let cache: MemoryCache<u32> =
            MemoryCache::new(CacheConfig::default().with_max_size(400).with_shards(4), clock);
        for i in 0..32 {
            cache.set(&format!("k{i}"), i, None);
        }
        assert_eq!(cache.len(), 32);
        assert_eq!(cache.get("k7"), Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_periodically() {
        let clock = Arc::new(ManualClock::new(0));
        let config = CacheConfig {
            cleanup_interval_ms: 100,
            ..CacheConfig::default()
        };
        let cache = Arc::new(MemoryCache::new(config, clock.clone()));
        cache.set("k", 1u8, Some(Duration::from_millis(5)));
        clock.advance_ms(10);

        let handle = cache.spawn_sweeper();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cache.is_empty());
        drop(handle);
    }
}
