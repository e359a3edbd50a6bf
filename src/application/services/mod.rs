//! # Application Services
//!
//! Services that orchestrate domain logic and infrastructure.
//!
//! This module provides application-level services including:
//! - [`QuoteAggregationEngine`]: concurrent quote collection and label purchase
//! - [`CircuitBreaker`]: per-provider failure isolation
//! - [`SlidingWindowRateLimiter`]: local request admission
//! - [`CacheManager`]: typed cache access with retry and statistics
//! - [`retry`]: exponential backoff for transient failures

pub mod cache_manager;
pub mod circuit_breaker;
pub mod quote_aggregation;
pub mod rate_limiter;
pub mod retry;

pub use cache_manager::{CacheManager, CacheManagerConfig, CacheManagerStats, IdentityCodec, PayloadCodec};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerStats, CircuitState,
};
pub use quote_aggregation::{
    AggregationConfig, AggregationResult, EngineHealth, ProviderHealth, ProviderOutcome,
    ProviderReport, QuoteAggregationEngine, SkipReason,
};
pub use rate_limiter::{RateLimitConfig, RateLimitInfo, RateLimitKey, SlidingWindowRateLimiter};
pub use retry::{RetryError, RetryPolicy, Retryable};
