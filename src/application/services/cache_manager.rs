//! # Cache Manager
//!
//! Typed JSON caching over any [`CacheStore`].
//!
//! # Responsibilities
//!
//! - **Serialization**: values are stored as `serde_json` bytes
//! - **Framing**: every payload starts with a one-byte codec tag; payloads at
//!   or above `compression_threshold_bytes` go through the configured
//!   [`PayloadCodec`]
//! - **Retry**: store calls run under a [`RetryPolicy`]; only transient
//!   backend errors are retried
//! - **Statistics**: hits, misses, errors and writes, with a derived hit rate
//! - **Invalidation**: [`CacheManager::invalidate`] deletes every key
//!   matching a glob pattern
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use ship_quote::application::clock::ManualClock;
//! use ship_quote::application::services::cache_manager::{CacheManager, CacheManagerConfig};
//! use ship_quote::infrastructure::cache::{CacheConfig, MemoryCache};
//!
//! # tokio_test::block_on(async {
//! let store = Arc::new(MemoryCache::<Bytes>::new(
//!     CacheConfig::default(),
//!     Arc::new(ManualClock::new(0)),
//! ));
//! let manager = CacheManager::new(store, CacheManagerConfig::default());
//!
//! manager.set("answer", &42u32, None).await.unwrap();
//! let cached: Option<u32> = manager.get("answer").await.unwrap();
//! assert_eq!(cached, Some(42));
//! assert_eq!(manager.stats().hits, 1);
//! # });
//! ```

use crate::application::services::retry::{RetryPolicy, execute_with_retry};
use crate::infrastructure::cache::{CacheError, CacheResult, CacheStore};
use bytes::{BufMut, Bytes, BytesMut};
use futures::future::try_join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Frame tag for payloads stored without a codec.
const RAW_TAG: u8 = 0;

/// Transforms payload bytes before they reach the store.
pub trait PayloadCodec: Send + Sync + Debug {
    /// Frame tag identifying this codec; must not be 0.
    fn tag(&self) -> u8;

    /// Encodes a payload.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Codec`] if the payload cannot be encoded.
    fn encode(&self, payload: &[u8]) -> CacheResult<Vec<u8>>;

    /// Decodes a payload produced by [`encode`](Self::encode).
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Codec`] if the payload is malformed.
    fn decode(&self, payload: &[u8]) -> CacheResult<Vec<u8>>;
}

/// Pass-through codec. Payloads framed with it are stored raw.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCodec;

impl PayloadCodec for IdentityCodec {
    fn tag(&self) -> u8 {
        RAW_TAG
    }

    fn encode(&self, payload: &[u8]) -> CacheResult<Vec<u8>> {
        Ok(payload.to_vec())
    }

    fn decode(&self, payload: &[u8]) -> CacheResult<Vec<u8>> {
        Ok(payload.to_vec())
    }
}

/// Cache manager settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheManagerConfig {
    /// Payloads this large or larger are passed through the codec.
    pub compression_threshold_bytes: usize,
    /// Retry policy for store calls.
    pub retry: RetryPolicy,
}

impl Default for CacheManagerConfig {
    fn default() -> Self {
        Self {
            compression_threshold_bytes: 1_024,
            retry: RetryPolicy::default(),
        }
    }
}

/// Cache manager counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheManagerStats {
    /// Reads that returned a value.
    pub hits: u64,
    /// Reads that found nothing.
    pub misses: u64,
    /// Operations that failed after retries.
    pub errors: u64,
    /// Successful writes.
    pub writes: u64,
    /// Reads that completed, hit or miss.
    pub total_requests: u64,
    /// `hits / total_requests`, or 0 with no requests.
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    writes: AtomicU64,
}

/// Typed cache facade with retry, framing and statistics.
#[derive(Debug)]
pub struct CacheManager {
    store: Arc<dyn CacheStore>,
    codec: Arc<dyn PayloadCodec>,
    config: CacheManagerConfig,
    counters: Counters,
}

impl CacheManager {
    /// Creates a manager using the pass-through codec.
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>, config: CacheManagerConfig) -> Self {
        Self::with_codec(store, Arc::new(IdentityCodec), config)
    }

    /// Creates a manager with a payload codec.
    #[must_use]
    pub fn with_codec(
        store: Arc<dyn CacheStore>,
        codec: Arc<dyn PayloadCodec>,
        config: CacheManagerConfig,
    ) -> Self {
        Self {
            store,
            codec,
            config,
            counters: Counters::default(),
        }
    }

    /// Name of the underlying store.
    #[must_use]
    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    /// Reads and deserializes a value.
    ///
    /// # Errors
    ///
    /// Returns the store error once retries are exhausted, or a
    /// serialization/codec error for a corrupt payload.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let fetched = execute_with_retry(&self.config.retry, || self.store.get(key))
            .await
            .map_err(|e| self.record_error(key, e.into_inner()))?;

        let Some(payload) = fetched else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        let value = self
            .unframe(&payload)
            .and_then(|bytes| serde_json::from_slice(&bytes).map_err(CacheError::from))
            .map_err(|e| self.record_error(key, e))?;
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        Ok(Some(value))
    }

    /// Serializes and stores a value.
    ///
    /// # Errors
    ///
    /// Returns a serialization error, or the store error once retries are
    /// exhausted.
    pub async fn set<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> CacheResult<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let payload = serde_json::to_vec(value)
            .map_err(CacheError::from)
            .and_then(|json| self.frame(&json))
            .map_err(|e| self.record_error(key, e))?;

        execute_with_retry(&self.config.retry, || {
            self.store.set(key, payload.clone(), ttl)
        })
        .await
        .map_err(|e| self.record_error(key, e.into_inner()))?;

        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Deletes a key; returns true if it existed.
    ///
    /// # Errors
    ///
    /// Returns the store error once retries are exhausted.
    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        execute_with_retry(&self.config.retry, || self.store.delete(key))
            .await
            .map_err(|e| self.record_error(key, e.into_inner()))
    }

    /// Deletes every key matching a glob pattern. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Deletes run concurrently; the first store error (after retries) is
    /// returned.
    pub async fn invalidate(&self, pattern: &str) -> CacheResult<usize> {
        let keys = execute_with_retry(&self.config.retry, || self.store.keys(pattern))
            .await
            .map_err(|e| self.record_error(pattern, e.into_inner()))?;

        let deleted = try_join_all(keys.iter().map(|key| self.delete(key))).await?;
        let removed = deleted.into_iter().filter(|existed| *existed).count();
        tracing::debug!(pattern, removed, "invalidated cache keys");
        Ok(removed)
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> CacheManagerStats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let total_requests = hits + misses;
        CacheManagerStats {
            hits,
            misses,
            errors: self.counters.errors.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            total_requests,
            hit_rate: if total_requests == 0 {
                0.0
            } else {
                hits as f64 / total_requests as f64
            },
        }
    }

    /// Zeroes every counter.
    pub fn reset_stats(&self) {
        for counter in [
            &self.counters.hits,
            &self.counters.misses,
            &self.counters.errors,
            &self.counters.writes,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn record_error(&self, key: &str, error: CacheError) -> CacheError {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(store = self.store.name(), key, error = %error, "cache operation failed");
        error
    }

    fn frame(&self, json: &[u8]) -> CacheResult<Bytes> {
        let tag = self.codec.tag();
        let use_codec = tag != RAW_TAG && json.len() >= self.config.compression_threshold_bytes;
        let body = if use_codec {
            self.codec.encode(json)?
        } else {
            json.to_vec()
        };

        let mut framed = BytesMut::with_capacity(body.len() + 1);
        framed.put_u8(if use_codec { tag } else { RAW_TAG });
        framed.put_slice(&body);
        Ok(framed.freeze())
    }

    fn unframe(&self, payload: &[u8]) -> CacheResult<Vec<u8>> {
        match payload.split_first() {
            Some((&RAW_TAG, body)) => Ok(body.to_vec()),
            Some((&tag, body)) if tag == self.codec.tag() => self.codec.decode(body),
            Some((&tag, _)) => Err(CacheError::codec(format!("unknown payload tag {tag}"))),
            None => Err(CacheError::codec("empty payload")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::application::clock::ManualClock;
    use crate::infrastructure::cache::{CacheConfig, MemoryCache};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    /// Reverses payload bytes so framing is observable.
    #[derive(Debug)]
    struct ReverseCodec;

    impl PayloadCodec for ReverseCodec {
        fn tag(&self) -> u8 {
            7
        }

        fn encode(&self, payload: &[u8]) -> CacheResult<Vec<u8>> {
            Ok(payload.iter().rev().copied().collect())
        }

        fn decode(&self, payload: &[u8]) -> CacheResult<Vec<u8>> {
            Ok(payload.iter().rev().copied().collect())
        }
    }

    /// Fails the first `failures` reads with a transient error.
    #[derive(Debug)]
    struct FlakyStore {
        inner: MemoryCache<Bytes>,
        failures: AtomicU32,
        permanent: bool,
    }

    #[async_trait]
    impl CacheStore for FlakyStore {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(if self.permanent {
                    CacheError::backend_permanent("WRONGTYPE")
                } else {
                    CacheError::backend("connection reset")
                });
            }
            Ok(self.inner.get(key))
        }

        async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> CacheResult<()> {
            self.inner.set(key, value, ttl);
            Ok(())
        }

        async fn delete(&self, key: &str) -> CacheResult<bool> {
            Ok(self.inner.delete(key))
        }

        async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
            Ok(self.inner.keys(Some(pattern)))
        }
    }

    fn memory() -> Arc<MemoryCache<Bytes>> {
        Arc::new(MemoryCache::new(CacheConfig::default(), Arc::new(ManualClock::new(0))))
    }

    fn fast_config() -> CacheManagerConfig {
        CacheManagerConfig {
            compression_threshold_bytes: 16,
            retry: RetryPolicy::new(3).with_initial_delay_ms(0).with_jitter(false),
        }
    }

    fn flaky(failures: u32, permanent: bool) -> Arc<FlakyStore> {
        Arc::new(FlakyStore {
            inner: MemoryCache::new(CacheConfig::default(), Arc::new(ManualClock::new(0))),
            failures: AtomicU32::new(failures),
            permanent,
        })
    }

    #[tokio::test]
    async fn round_trip_and_stats() {
        let manager = CacheManager::new(memory(), fast_config());
        manager.set("k", &vec![1, 2, 3], None).await.unwrap();

        let hit: Option<Vec<u32>> = manager.get("k").await.unwrap();
        let miss: Option<Vec<u32>> = manager.get("missing").await.unwrap();
        assert_eq!(hit, Some(vec![1, 2, 3]));
        assert_eq!(miss, None);

        let stats = manager.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.total_requests, 2);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);

        manager.reset_stats();
        assert_eq!(manager.stats(), CacheManagerStats::default());
    }

    #[tokio::test]
    async fn large_payloads_use_codec() {
        let store = memory();
        let manager = CacheManager::with_codec(store.clone(), Arc::new(ReverseCodec), fast_config());

        manager.set("small", "hi", None).await.unwrap();
        manager.set("large", "a fairly long string value", None).await.unwrap();

        assert_eq!(store.get("small").unwrap().first(), Some(&RAW_TAG));
        assert_eq!(store.get("large").unwrap().first(), Some(&7));

        let large: Option<String> = manager.get("large").await.unwrap();
        assert_eq!(large.as_deref(), Some("a fairly long string value"));
    }

    #[tokio::test]
    async fn unknown_tag_is_codec_error() {
        let store = memory();
        store.set("bad", Bytes::from_static(&[9, b'1']), None);
        let manager = CacheManager::new(store, fast_config());

        let result: CacheResult<Option<u32>> = manager.get("bad").await;
        assert!(matches!(result, Err(CacheError::Codec { .. })));
        assert_eq!(manager.stats().errors, 1);
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let store = flaky(2, false);
        store.inner.set("k", Bytes::from_static(b"\x005"), None);
        let manager = CacheManager::new(store, fast_config());

        let value: Option<u32> = manager.get("k").await.unwrap();
        assert_eq!(value, Some(5));
        assert_eq!(manager.stats().errors, 0);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let store = flaky(1, true);
        store.inner.set("k", Bytes::from_static(b"\x005"), None);
        let manager = CacheManager::new(store.clone(), fast_config());

        let result: CacheResult<Option<u32>> = manager.get("k").await;
        assert!(matches!(result, Err(CacheError::Backend { retryable: false, .. })));
        assert_eq!(store.failures.load(Ordering::SeqCst), 0);
        assert_eq!(manager.stats().errors, 1);
    }

    #[tokio::test]
    async fn invalidate_by_pattern() {
        let manager = CacheManager::new(memory(), fast_config());
        manager.set("quotes:shippo:1", &1, None).await.unwrap();
        manager.set("quotes:easypost:1", &2, None).await.unwrap();
        manager.set("labels:1", &3, None).await.unwrap();

        assert_eq!(manager.invalidate("quotes:*").await.unwrap(), 2);
        let remaining: Option<u32> = manager.get("labels:1").await.unwrap();
        assert_eq!(remaining, Some(3));
        assert!(!manager.delete("quotes:shippo:1").await.unwrap());
    }
}
