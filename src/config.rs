//! # Configuration
//!
//! Static settings for the engine, loaded once at startup.
//!
//! Sources, lowest precedence first:
//! 1. built-in defaults
//! 2. an optional file (TOML, YAML or JSON, by extension)
//! 3. `SHIP_QUOTE__*` environment variables, `__` separating nested keys
//!    (`SHIP_QUOTE__RATE_LIMIT__MAX_REQUESTS=50`)
//!
//! A `.env` file in the working directory is loaded into the environment
//! first, if present.

use crate::application::clock::{Clock, SystemClock};
use crate::application::services::cache_manager::{CacheManager, CacheManagerConfig};
use crate::application::services::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use crate::application::services::quote_aggregation::{AggregationConfig, QuoteAggregationEngine};
use crate::application::services::rate_limiter::{RateLimitConfig, SlidingWindowRateLimiter};
use crate::domain::entities::RequestField;
use crate::infrastructure::cache::{
    CacheConfig, CacheError, CacheStore, MemoryCache, RedisCacheConfig, RedisCacheStore,
};
use crate::infrastructure::providers::{AdapterError, ProviderRegistry, ProviderSettings};
use crate::telemetry::LoggingConfig;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Prefix of environment variables read by [`AppConfig::load`].
pub const ENV_PREFIX: &str = "SHIP_QUOTE";

/// Configuration failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// The `.env` file exists but is malformed.
    #[error("failed to read .env: {0}")]
    Dotenv(String),

    /// A value is out of range.
    #[error("invalid configuration: {field}: {message}")]
    Invalid {
        /// Dotted path of the offending key.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// A provider adapter could not be built.
    #[error("provider setup failed: {0}")]
    Provider(#[from] AdapterError),

    /// The cache backend could not be reached.
    #[error("cache setup failed: {0}")]
    Cache(#[from] CacheError),
}

impl ConfigError {
    /// Creates an invalid-value error.
    #[must_use]
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result alias for configuration.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Fan-out deadlines and quote cache TTL.
    pub aggregation: AggregationConfig,
    /// Settings shared by every provider's breaker.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Per-provider request budget.
    pub rate_limit: RateLimitConfig,
    /// In-memory cache sizing; ignored when `redis` is set.
    pub cache: CacheConfig,
    /// Cache manager framing and retry.
    pub cache_manager: CacheManagerConfig,
    /// Use Redis for quote caching instead of memory.
    pub redis: Option<RedisCacheConfig>,
    /// Providers in query order.
    pub providers: Vec<ProviderSettings>,
    /// Log level and format.
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Loads configuration from `.env`, an optional file and the environment,
    /// then validates it.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a source is unreadable or a value is invalid.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        if let Err(e) = dotenvy::dotenv()
            && !e.not_found()
        {
            return Err(ConfigError::Dotenv(e.to_string()));
        }

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        tracing::debug!(
            providers = config.providers.len(),
            redis = config.redis.is_some(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Checks ranges and cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first offending key.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.aggregation.timeout_ms == 0 {
            return Err(ConfigError::invalid("aggregation.timeout_ms", "must be > 0"));
        }
        if self.aggregation.per_provider_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "aggregation.per_provider_timeout_ms",
                "must be > 0",
            ));
        }
        self.circuit_breaker
            .validate()
            .map_err(|e| ConfigError::invalid("circuit_breaker", e.to_string()))?;
        if self.rate_limit.window_ms == 0 {
            return Err(ConfigError::invalid("rate_limit.window_ms", "must be > 0"));
        }
        if self.rate_limit.max_requests == 0 {
            return Err(ConfigError::invalid("rate_limit.max_requests", "must be > 0"));
        }
        if self.cache.max_size == 0 {
            return Err(ConfigError::invalid("cache.max_size", "must be > 0"));
        }
        if self.cache.shards == 0 {
            return Err(ConfigError::invalid("cache.shards", "must be > 0"));
        }
        if let Some(redis) = &self.redis
            && redis.url.trim().is_empty()
        {
            return Err(ConfigError::invalid("redis.url", "must not be empty"));
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if provider.id.as_str().trim().is_empty() {
                return Err(ConfigError::invalid("providers.id", "must not be empty"));
            }
            if !seen.insert(provider.id.clone()) {
                return Err(ConfigError::invalid(
                    format!("providers.{}", provider.id),
                    "duplicate provider id",
                ));
            }
            if provider.enabled && !provider.optional && provider.base_url.is_none() {
                return Err(ConfigError::invalid(
                    format!("providers.{}.base_url", provider.id),
                    "required for enabled providers",
                ));
            }
            if provider.quote_requires.contains(&RequestField::ShipmentId) {
                return Err(ConfigError::invalid(
                    format!("providers.{}.quote_requires", provider.id),
                    "shipment_id is only known at purchase time",
                ));
            }
            if provider.timeout_ms == Some(0) {
                return Err(ConfigError::invalid(
                    format!("providers.{}.timeout_ms", provider.id),
                    "must be > 0",
                ));
            }
        }
        Ok(())
    }

    /// Builds an engine with HTTP adapters for every configured provider.
    ///
    /// Connects to Redis when configured; otherwise quotes are cached in
    /// memory.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an adapter cannot be built or Redis is
    /// unreachable.
    pub async fn build_engine(&self) -> ConfigResult<QuoteAggregationEngine> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let providers = ProviderRegistry::from_settings(
            self.providers.iter().cloned(),
            self.aggregation.per_provider_timeout_ms,
        )?;

        let store: Arc<dyn CacheStore> = match &self.redis {
            Some(redis) => Arc::new(RedisCacheStore::connect(redis.clone()).await?),
            None => Arc::new(MemoryCache::<Bytes>::new(self.cache.clone(), Arc::clone(&clock))),
        };
        tracing::info!(
            providers = providers.len(),
            cache = store.name(),
            "engine configured"
        );

        Ok(QuoteAggregationEngine::new(
            providers,
            CircuitBreakerRegistry::new(self.circuit_breaker.clone(), Arc::clone(&clock)),
            Arc::new(SlidingWindowRateLimiter::new(self.rate_limit, clock)),
            Arc::new(CacheManager::new(store, self.cache_manager.clone())),
            self.aggregation.clone(),
        ))
    }
}
