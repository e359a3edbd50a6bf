//! Cache store trait.

use super::error::CacheResult;
use super::memory::MemoryCache;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Debug;
use std::time::Duration;

/// Byte-oriented key/value store with per-entry TTL.
///
/// Implementations must be safe to share across tasks. A `ttl` of `None`
/// applies the store's default expiry.
#[async_trait]
pub trait CacheStore: Send + Sync + Debug {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Fetches a value.
    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>>;

    /// Stores a value.
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> CacheResult<()>;

    /// Deletes a key; returns true if it existed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Lists keys matching a glob pattern (`*`, `?`).
    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>>;
}

#[async_trait]
impl CacheStore for MemoryCache<Bytes> {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        Ok(MemoryCache::get(self, key))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> CacheResult<()> {
        MemoryCache::set(self, key, value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(MemoryCache::delete(self, key))
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        Ok(MemoryCache::keys(self, Some(pattern)))
    }
}
