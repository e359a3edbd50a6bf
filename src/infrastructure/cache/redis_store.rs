//! # Redis Cache Store
//!
//! [`CacheStore`] over a shared Redis `ConnectionManager`.
//!
//! Keys are namespaced with a configurable prefix. Pattern listing uses
//! `SCAN` with `MATCH`, never `KEYS`.

use super::error::CacheResult;
use super::traits::CacheStore;
use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Redis connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisCacheConfig {
    /// Connection URL.
    pub url: String,
    /// Prefix prepended to every key.
    pub key_prefix: String,
    /// TTL applied when none is given; 0 never expires.
    pub default_ttl_ms: u64,
    /// `COUNT` hint for each `SCAN` round trip.
    pub scan_count: usize,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "ship-quote:".to_string(),
            default_ttl_ms: 300_000,
            scan_count: 100,
        }
    }
}

/// Redis-backed cache store.
#[derive(Clone)]
pub struct RedisCacheStore {
    config: RedisCacheConfig,
    connection: ConnectionManager,
}

impl fmt::Debug for RedisCacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCacheStore")
            .field("key_prefix", &self.config.key_prefix)
            .finish_non_exhaustive()
    }
}

impl RedisCacheStore {
    /// Connects to Redis.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the URL is invalid or the initial
    /// connection fails.
    pub async fn connect(config: RedisCacheConfig) -> CacheResult<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let connection = ConnectionManager::new(client).await?;
        tracing::info!(key_prefix = %config.key_prefix, "connected redis cache store");
        Ok(Self { config, connection })
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    fn strip_prefix(&self, key: String) -> String {
        match key.strip_prefix(self.config.key_prefix.as_str()) {
            Some(stripped) => stripped.to_string(),
            None => key,
        }
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        let mut conn = self.connection.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(self.namespaced(key))
            .query_async(&mut conn)
            .await?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> CacheResult<()> {
        let ttl_ms = match ttl {
            Some(ttl) => u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            None => self.config.default_ttl_ms,
        };
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.namespaced(key)).arg(value.as_ref());
        if ttl_ms > 0 {
            cmd.arg("PX").arg(ttl_ms);
        }
        let mut conn = self.connection.clone();
        let () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.connection.clone();
        let removed: u64 = redis::cmd("DEL")
            .arg(self.namespaced(key))
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.connection.clone();
        let pattern = self.namespaced(pattern);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(self.config.scan_count)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch.into_iter().map(|k| self.strip_prefix(k)));
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = RedisCacheConfig::default();
        assert_eq!(config.key_prefix, "ship-quote:");
        assert_eq!(config.scan_count, 100);
    }

    #[tokio::test]
    async fn invalid_url_is_rejected() {
        let config = RedisCacheConfig {
            url: "not a url".to_string(),
            ..RedisCacheConfig::default()
        };
        assert!(RedisCacheStore::connect(config).await.is_err());
    }
}
