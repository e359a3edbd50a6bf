//! # Quote Aggregation Engine
//!
//! Fans a quote request out to every eligible provider and merges the results.
//!
//! # Per-Provider Pipeline
//!
//! ```text
//! cache get ──hit──▶ cached quotes
//!     │ miss
//!     ▼
//! rate limiter ──deny──▶ empty
//!     │ allow
//!     ▼
//! circuit breaker ──open──▶ empty (CircuitOpen)
//!     │ closed / half-open trial
//!     ▼
//! adapter.quote under per-provider timeout
//!     ├── ok, non-empty ──▶ write-through to cache
//!     └── error ──▶ classified, logged, empty
//! ```
//!
//! Every pipeline runs in its own spawned task. The engine awaits all of them
//! under one overall deadline; tasks still running at the deadline are
//! abandoned (detached, not aborted) so their breaker bookkeeping still lands.
//! Surviving quotes are flattened in provider registration order and stably
//! sorted by amount, so equal prices keep provider order.
//!
//! `purchase` routes to exactly one provider through the rate limiter and
//! circuit breaker. It never touches the cache and propagates every error.

use crate::application::clock::{Clock, SystemClock};
use crate::application::context::{CallContext, Operation, RequestContext};
use crate::application::error::{ProviderError, ProviderResult};
use crate::application::maintenance::MaintenanceHandle;
use crate::application::services::cache_manager::{CacheManager, CacheManagerConfig, CacheManagerStats};
use crate::application::services::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerStats,
};
use crate::application::services::rate_limiter::{
    RateLimitConfig, RateLimitInfo, RateLimitKey, SlidingWindowRateLimiter,
};
use crate::domain::entities::{
    NormalizedShipment, PurchaseChoice, PurchaseResult, RateQuote, RequestField, ShipmentInput,
};
use crate::domain::value_objects::{CorrelationId, ProviderId, Timestamp};
use crate::infrastructure::cache::{CacheConfig, CacheResult, MemoryCache};
use crate::infrastructure::providers::registry::{ProviderRegistry, RegisteredProvider};
use crate::infrastructure::providers::traits::ProviderAdapter;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, timeout, timeout_at};

/// Configuration for quote aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Overall deadline for one `quote_all` call in milliseconds.
    pub timeout_ms: u64,
    /// Default per-provider call timeout in milliseconds.
    pub per_provider_timeout_ms: u64,
    /// How long successful quotes stay cached in milliseconds.
    pub quote_cache_ttl_ms: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            per_provider_timeout_ms: 5_000,
            quote_cache_ttl_ms: 300_000,
        }
    }
}

impl AggregationConfig {
    /// Creates a new configuration with the specified overall timeout.
    #[must_use]
    pub fn with_timeout(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            ..Default::default()
        }
    }

    /// Sets the per-provider timeout.
    #[must_use]
    pub fn with_per_provider_timeout(mut self, timeout_ms: u64) -> Self {
        self.per_provider_timeout_ms = timeout_ms;
        self
    }

    /// Sets the quote cache TTL.
    #[must_use]
    pub fn with_quote_cache_ttl(mut self, ttl_ms: u64) -> Self {
        self.quote_cache_ttl_ms = ttl_ms;
        self
    }
}

/// Why a provider was not queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "field", rename_all = "snake_case")]
pub enum SkipReason {
    /// The provider is disabled.
    Disabled,
    /// The provider is optional and has no credentials.
    MissingCredentials,
    /// The request lacks an identifier the provider needs.
    MissingField(RequestField),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::MissingCredentials => write!(f, "missing credentials"),
            Self::MissingField(field) => write!(f, "missing {field}"),
        }
    }
}

/// What happened to one provider during aggregation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProviderOutcome {
    /// The provider produced quotes (possibly none).
    Quoted {
        /// Number of quotes contributed.
        count: usize,
        /// The quotes came from the cache.
        cached: bool,
    },
    /// The local rate limiter denied the call.
    RateLimited {
        /// Seconds until the limiter admits again.
        retry_after_secs: Option<u64>,
    },
    /// The call failed; the error is already classified.
    Failed {
        /// The classified failure.
        error: ProviderError,
    },
    /// The call was still running at the overall deadline.
    Abandoned,
    /// The provider was not eligible.
    Skipped {
        /// Why it was skipped.
        reason: SkipReason,
    },
}

impl ProviderOutcome {
    /// Returns true if the provider answered.
    #[must_use]
    pub fn is_quoted(&self) -> bool {
        matches!(self, Self::Quoted { .. })
    }
}

/// Outcome for a single provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderReport {
    /// The provider.
    pub provider: ProviderId,
    /// What happened.
    pub outcome: ProviderOutcome,
}

/// Result of quote aggregation.
#[derive(Debug, Clone, Serialize)]
pub struct AggregationResult {
    /// Correlation id shared by every provider call.
    pub correlation_id: CorrelationId,
    /// Quotes sorted ascending by amount.
    pub quotes: Vec<RateQuote>,
    /// Number of providers queried.
    pub providers_queried: usize,
    /// Number of providers that answered.
    pub providers_responded: usize,
    /// Per-provider outcomes in registration order.
    pub outcomes: Vec<ProviderReport>,
}

impl AggregationResult {
    /// Returns the cheapest quote, if any.
    #[must_use]
    pub fn best_quote(&self) -> Option<&RateQuote> {
        self.quotes.first()
    }

    /// Returns the outcome recorded for a provider.
    #[must_use]
    pub fn outcome(&self, provider: &ProviderId) -> Option<&ProviderOutcome> {
        self.outcomes
            .iter()
            .find(|r| &r.provider == provider)
            .map(|r| &r.outcome)
    }

    /// Iterates providers whose calls failed.
    pub fn failures(&self) -> impl Iterator<Item = (&ProviderId, &ProviderError)> {
        self.outcomes.iter().filter_map(|r| match &r.outcome {
            ProviderOutcome::Failed { error } => Some((&r.provider, error)),
            _ => None,
        })
    }
}

/// Health of one provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    /// The provider.
    pub provider: ProviderId,
    /// Whether it is enabled.
    pub enabled: bool,
    /// Circuit breaker snapshot.
    pub circuit: CircuitBreakerStats,
    /// Rate limit window snapshot.
    pub rate_limit: RateLimitInfo,
}

/// Snapshot of the whole engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineHealth {
    /// When the snapshot was taken.
    pub checked_at: Timestamp,
    /// Per-provider health in registration order.
    pub providers: Vec<ProviderHealth>,
    /// Quote cache counters.
    pub cache: CacheManagerStats,
}

/// Everything one provider task needs, owned so the task can outlive the call.
struct QuoteJob {
    adapter: Arc<dyn ProviderAdapter>,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<SlidingWindowRateLimiter>,
    cache: Arc<CacheManager>,
    shipment: Arc<NormalizedShipment>,
    ctx: CallContext,
    cache_key: String,
    cache_ttl: Duration,
}

/// Engine for collecting quotes from and buying labels through providers.
#[derive(Debug)]
pub struct QuoteAggregationEngine {
    providers: ProviderRegistry,
    breakers: CircuitBreakerRegistry,
    rate_limiter: Arc<SlidingWindowRateLimiter>,
    cache: Arc<CacheManager>,
    config: AggregationConfig,
}

impl QuoteAggregationEngine {
    /// Creates a new engine.
    #[must_use]
    pub fn new(
        providers: ProviderRegistry,
        breakers: CircuitBreakerRegistry,
        rate_limiter: Arc<SlidingWindowRateLimiter>,
        cache: Arc<CacheManager>,
        config: AggregationConfig,
    ) -> Self {
        Self {
            providers,
            breakers,
            rate_limiter,
            cache,
            config,
        }
    }

    /// Creates an engine with default resilience settings and an in-memory
    /// quote cache.
    #[must_use]
    pub fn with_defaults(providers: ProviderRegistry) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = Arc::new(MemoryCache::<Bytes>::new(CacheConfig::default(), Arc::clone(&clock)));
        Self::new(
            providers,
            CircuitBreakerRegistry::new(CircuitBreakerConfig::default(), Arc::clone(&clock)),
            Arc::new(SlidingWindowRateLimiter::new(RateLimitConfig::default(), clock)),
            Arc::new(CacheManager::new(store, CacheManagerConfig::default())),
            AggregationConfig::default(),
        )
    }

    /// Returns the current configuration.
    #[must_use]
    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Returns the provider registry.
    #[must_use]
    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Returns the circuit breakers.
    #[must_use]
    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    /// Quotes every eligible provider and returns all quotes, cheapest first.
    ///
    /// Provider failures never fail the call; an empty list is a valid
    /// answer.
    ///
    /// # Errors
    ///
    /// Returns a `Validation` error if the shipment is malformed.
    pub async fn quote_all(
        &self,
        shipment: &ShipmentInput,
        request: &RequestContext,
    ) -> ProviderResult<Vec<RateQuote>> {
        self.collect_quotes(shipment, request)
            .await
            .map(|result| result.quotes)
    }

    /// Like [`quote_all`](Self::quote_all), with a per-provider report.
    ///
    /// # Errors
    ///
    /// Returns a `Validation` error if the shipment is malformed.
    pub async fn collect_quotes(
        &self,
        shipment: &ShipmentInput,
        request: &RequestContext,
    ) -> ProviderResult<AggregationResult> {
        let normalized = shipment.normalize().map_err(|e| {
            let ctx = request.call(ProviderId::aggregate(), Operation::Quote);
            ProviderError::from_validation(&ctx, &e)
        })?;
        let fingerprint = normalized.fingerprint();
        let normalized = Arc::new(normalized);

        let mut outcomes: Vec<ProviderReport> = Vec::with_capacity(self.providers.len());
        let mut handles = Vec::new();

        for provider in self.providers.iter() {
            if let Some(reason) = self.skip_reason(provider, &normalized) {
                tracing::debug!(
                    provider = %provider.id(),
                    correlation_id = %request.correlation_id(),
                    %reason,
                    "provider skipped"
                );
                outcomes.push(ProviderReport {
                    provider: provider.id().clone(),
                    outcome: ProviderOutcome::Skipped { reason },
                });
                continue;
            }

            let ctx = request
                .call(provider.id().clone(), Operation::Quote)
                .with_timeout_ms(self.provider_timeout_ms(provider));
            let job = QuoteJob {
                adapter: Arc::clone(provider.adapter()),
                breaker: self.breakers.breaker(provider.id()),
                limiter: Arc::clone(&self.rate_limiter),
                cache: Arc::clone(&self.cache),
                shipment: Arc::clone(&normalized),
                ctx: ctx.clone(),
                cache_key: quote_cache_key(provider.id(), &fingerprint),
                cache_ttl: Duration::from_millis(self.config.quote_cache_ttl_ms),
            };

            handles.push((outcomes.len(), ctx, tokio::spawn(run_quote(job))));
            outcomes.push(ProviderReport {
                provider: provider.id().clone(),
                outcome: ProviderOutcome::Abandoned,
            });
        }

        let providers_queried = handles.len();
        let deadline = Instant::now() + Duration::from_millis(self.config.timeout_ms);
        let mut per_provider: Vec<Vec<RateQuote>> = Vec::with_capacity(handles.len());

        for (slot, ctx, handle) in handles {
            let outcome = match timeout_at(deadline, handle).await {
                Ok(Ok((quotes, outcome))) => {
                    per_provider.push(quotes);
                    outcome
                }
                Ok(Err(join_error)) => {
                    let error = ProviderError::network(
                        &ctx,
                        format!("provider task failed: {join_error}"),
                        None,
                        true,
                    );
                    ProviderOutcome::Failed { error }
                }
                Err(_) => {
                    tracing::warn!(
                        provider = %ctx.provider(),
                        correlation_id = %ctx.correlation_id(),
                        timeout_ms = self.config.timeout_ms,
                        "provider abandoned at aggregation deadline"
                    );
                    ProviderOutcome::Abandoned
                }
            };
            if let Some(report) = outcomes.get_mut(slot) {
                report.outcome = outcome;
            }
        }

        let mut quotes: Vec<RateQuote> = per_provider.into_iter().flatten().collect();
        quotes.sort_by_key(RateQuote::amount);

        let providers_responded = outcomes.iter().filter(|r| r.outcome.is_quoted()).count();
        tracing::info!(
            correlation_id = %request.correlation_id(),
            providers_queried,
            providers_responded,
            quotes = quotes.len(),
            "quote aggregation complete"
        );

        Ok(AggregationResult {
            correlation_id: request.correlation_id().clone(),
            quotes,
            providers_queried,
            providers_responded,
            outcomes,
        })
    }

    /// Buys a label from the provider named in the choice.
    ///
    /// # Errors
    ///
    /// - `Configuration` for an unknown, disabled or uncredentialed provider
    /// - `Validation` when the choice lacks an identifier the provider needs;
    ///   the adapter is not called
    /// - `RateLimit` when the local limiter denies the call
    /// - `CircuitOpen` when the provider's breaker rejects the call
    /// - the classified adapter failure otherwise
    pub async fn purchase(
        &self,
        choice: &PurchaseChoice,
        request: &RequestContext,
    ) -> ProviderResult<PurchaseResult> {
        let base_ctx = request.call(choice.provider.clone(), Operation::Purchase);

        let Some(provider) = self.providers.get(&choice.provider) else {
            return Err(ProviderError::configuration(
                &base_ctx,
                format!("unknown provider {}", choice.provider),
            ));
        };
        if !provider.settings().enabled {
            return Err(ProviderError::configuration(
                &base_ctx,
                format!("provider {} is disabled", choice.provider),
            ));
        }
        if provider.settings().optional && !provider.settings().has_credentials() {
            return Err(ProviderError::configuration(
                &base_ctx,
                format!("provider {} has no credentials", choice.provider),
            ));
        }
        if choice.rate_id.trim().is_empty() {
            return Err(ProviderError::validation(
                &base_ctx,
                Some("rate_id".to_string()),
                "rate_id is required",
            ));
        }
        if let Some(field) = provider.adapter().requirements().missing_for_purchase(choice) {
            return Err(ProviderError::validation(
                &base_ctx,
                Some(field.name().to_string()),
                format!("{field} is required to purchase from {}", choice.provider),
            ));
        }

        let limit = self.rate_limiter.is_allowed(&RateLimitKey::provider(provider.id()));
        if !limit.allowed {
            tracing::warn!(
                provider = %provider.id(),
                correlation_id = %request.correlation_id(),
                retry_after_secs = ?limit.retry_after_secs,
                "purchase rate limited"
            );
            return Err(ProviderError::rate_limit(
                &base_ctx,
                format!("rate limit exceeded for provider {}", provider.id()),
                limit.retry_after_ms(),
            ));
        }

        let timeout_ms = self.provider_timeout_ms(provider);
        let ctx = base_ctx.with_timeout_ms(timeout_ms);
        let adapter = provider.adapter();
        let breaker = self.breakers.breaker(provider.id());

        let result = breaker
            .execute(&ctx, || async {
                match timeout(Duration::from_millis(timeout_ms), adapter.buy(choice, &ctx)).await {
                    Ok(Ok(label)) => Ok(label),
                    Ok(Err(e)) => Err(ProviderError::classify(e, &ctx)),
                    Err(_) => Err(ProviderError::timeout(&ctx, "purchase request timed out")),
                }
            })
            .await;

        match &result {
            Ok(label) => tracing::info!(
                provider = %provider.id(),
                correlation_id = %ctx.correlation_id(),
                shipment_id = %label.shipment_id,
                "label purchased"
            ),
            Err(error) => tracing::warn!(
                provider = %provider.id(),
                correlation_id = %ctx.correlation_id(),
                kind = %error.kind(),
                error = %error,
                "purchase failed"
            ),
        }
        result
    }

    /// Drops every cached quote for a provider.
    ///
    /// # Errors
    ///
    /// Returns the cache error if the store cannot be reached.
    pub async fn invalidate_quotes(&self, provider: &ProviderId) -> CacheResult<usize> {
        self.cache.invalidate(&format!("quotes:{provider}:*")).await
    }

    /// Returns circuit, rate limit and cache snapshots.
    #[must_use]
    pub fn health(&self) -> EngineHealth {
        let providers = self
            .providers
            .iter()
            .map(|provider| ProviderHealth {
                provider: provider.id().clone(),
                enabled: provider.settings().enabled,
                circuit: self.breakers.breaker(provider.id()).stats(),
                rate_limit: self.rate_limiter.info(&RateLimitKey::provider(provider.id())),
            })
            .collect();
        EngineHealth {
            checked_at: Timestamp::now(),
            providers,
            cache: self.cache.stats(),
        }
    }

    /// Starts periodic rate limit compaction.
    ///
    /// Must be called within a tokio runtime. Compaction stops when the
    /// handle is dropped.
    #[must_use]
    pub fn start_maintenance(&self) -> MaintenanceHandle {
        self.rate_limiter.spawn_compaction()
    }

    fn skip_reason(
        &self,
        provider: &RegisteredProvider,
        shipment: &NormalizedShipment,
    ) -> Option<SkipReason> {
        let settings = provider.settings();
        if !settings.enabled {
            return Some(SkipReason::Disabled);
        }
        if settings.optional && !settings.has_credentials() {
            return Some(SkipReason::MissingCredentials);
        }
        provider
            .adapter()
            .requirements()
            .missing_for_quote(shipment)
            .map(SkipReason::MissingField)
    }

    fn provider_timeout_ms(&self, provider: &RegisteredProvider) -> u64 {
        provider
            .settings()
            .timeout_ms
            .unwrap_or(self.config.per_provider_timeout_ms)
    }
}

/// Cache key for a provider's quotes for one normalized request.
#[must_use]
pub fn quote_cache_key(provider: &ProviderId, fingerprint: &str) -> String {
    format!("quotes:{provider}:{fingerprint}")
}

/// Runs one provider's pipeline. Never fails; failures become outcomes.
async fn run_quote(job: QuoteJob) -> (Vec<RateQuote>, ProviderOutcome) {
    let QuoteJob {
        adapter,
        breaker,
        limiter,
        cache,
        shipment,
        ctx,
        cache_key,
        cache_ttl,
    } = job;
    let provider = ctx.provider();
    let correlation_id = ctx.correlation_id();

    match cache.get::<Vec<RateQuote>>(&cache_key).await {
        Ok(Some(quotes)) => {
            tracing::debug!(%provider, %correlation_id, key = %cache_key, "quote cache hit");
            let count = quotes.len();
            return (quotes, ProviderOutcome::Quoted { count, cached: true });
        }
        Ok(None) => tracing::debug!(%provider, %correlation_id, key = %cache_key, "quote cache miss"),
        Err(error) => tracing::warn!(
            %provider,
            %correlation_id,
            error = %error,
            "quote cache read failed, querying provider"
        ),
    }

    let limit = limiter.is_allowed(&RateLimitKey::provider(provider));
    if !limit.allowed {
        tracing::warn!(
            %provider,
            %correlation_id,
            retry_after_secs = ?limit.retry_after_secs,
            "provider rate limited"
        );
        return (
            Vec::new(),
            ProviderOutcome::RateLimited {
                retry_after_secs: limit.retry_after_secs,
            },
        );
    }

    let call_timeout = Duration::from_millis(ctx.timeout_ms().unwrap_or_default());
    let result = breaker
        .execute(&ctx, || async {
            match timeout(call_timeout, adapter.quote(&shipment, &ctx)).await {
                Ok(Ok(quotes)) => Ok(quotes),
                Ok(Err(e)) => Err(ProviderError::classify(e, &ctx)),
                Err(_) => Err(ProviderError::timeout(&ctx, "quote request timed out")),
            }
        })
        .await;

    match result {
        Ok(quotes) => {
            if !quotes.is_empty()
                && let Err(error) = cache.set(&cache_key, &quotes, Some(cache_ttl)).await
            {
                tracing::warn!(%provider, %correlation_id, error = %error, "quote cache write failed");
            }
            let count = quotes.len();
            (quotes, ProviderOutcome::Quoted { count, cached: false })
        }
        Err(error) => {
            tracing::warn!(
                %provider,
                %correlation_id,
                kind = %error.kind(),
                retryable = error.is_retryable(),
                error = %error,
                "provider quote failed"
            );
            (Vec::new(), ProviderOutcome::Failed { error })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::application::clock::ManualClock;
    use crate::application::error::ErrorKind;
    use crate::application::services::circuit_breaker::CircuitState;
    use crate::application::services::retry::RetryPolicy;
    use crate::domain::entities::{Address, Parcel};
    use crate::domain::value_objects::Money;
    use crate::infrastructure::providers::error::{AdapterError, AdapterResult};
    use crate::infrastructure::providers::registry::ProviderSettings;
    use crate::infrastructure::providers::traits::ProviderRequirements;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct MockAdapter {
        id: ProviderId,
        amounts: Vec<i64>,
        failure: Option<AdapterError>,
        delay_ms: u64,
        requirements: ProviderRequirements,
        quote_calls: AtomicUsize,
        buy_calls: AtomicUsize,
    }

    impl MockAdapter {
        fn quoting(id: &str, amounts: &[i64]) -> Self {
            Self {
                id: ProviderId::new(id),
                amounts: amounts.to_vec(),
                failure: None,
                delay_ms: 0,
                requirements: ProviderRequirements::none(),
                quote_calls: AtomicUsize::new(0),
                buy_calls: AtomicUsize::new(0),
            }
        }

        fn failing(id: &str, error: AdapterError) -> Self {
            Self {
                failure: Some(error),
                ..Self::quoting(id, &[])
            }
        }

        fn slow(id: &str, amounts: &[i64], delay_ms: u64) -> Self {
            Self {
                delay_ms,
                ..Self::quoting(id, amounts)
            }
        }

        fn with_requirements(mut self, requirements: ProviderRequirements) -> Self {
            self.requirements = requirements;
            self
        }
    }

    #[async_trait]
    impl ProviderAdapter for MockAdapter {
        fn provider_id(&self) -> &ProviderId {
            &self.id
        }

        fn requirements(&self) -> ProviderRequirements {
            self.requirements.clone()
        }

        async fn quote(
            &self,
            _shipment: &NormalizedShipment,
            _ctx: &CallContext,
        ) -> AdapterResult<Vec<RateQuote>> {
            self.quote_calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if let Some(error) = &self.failure {
                return Err(error.clone());
            }
            Ok(self
                .amounts
                .iter()
                .enumerate()
                .map(|(i, amount)| {
                    RateQuote::builder(
                        self.id.clone(),
                        format!("{}-rate-{i}", self.id),
                        format!("{}-shp", self.id),
                        Money::new(*amount, "USD").unwrap(),
                    )
                    .carrier("UPS")
                    .service("Ground")
                    .build()
                })
                .collect())
        }

        async fn buy(&self, choice: &PurchaseChoice, _ctx: &CallContext) -> AdapterResult<PurchaseResult> {
            self.buy_calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if let Some(error) = &self.failure {
                return Err(error.clone());
            }
            Ok(PurchaseResult {
                provider: self.id.clone(),
                shipment_id: format!("{}-shp", self.id),
                label_url: format!("https://labels.example.com/{}", choice.rate_id),
                tracking_code: Some("1Z999".to_string()),
                tracking_url: None,
            })
        }
    }

    struct Harness {
        engine: QuoteAggregationEngine,
        clock: Arc<ManualClock>,
    }

    fn harness(
        adapters: Vec<(ProviderSettings, Arc<MockAdapter>)>,
        breaker: CircuitBreakerConfig,
        limit: RateLimitConfig,
        config: AggregationConfig,
    ) -> Harness {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let mut providers = ProviderRegistry::new();
        for (settings, adapter) in adapters {
            providers.register(settings, adapter);
        }
        let store = Arc::new(MemoryCache::<Bytes>::new(CacheConfig::default(), clock.clone()));
        let cache = CacheManager::new(
            store,
            CacheManagerConfig {
                retry: RetryPolicy::no_retry(),
                ..CacheManagerConfig::default()
            },
        );
        let engine = QuoteAggregationEngine::new(
            providers,
            CircuitBreakerRegistry::new(breaker, clock.clone()),
            Arc::new(SlidingWindowRateLimiter::new(limit, clock.clone())),
            Arc::new(cache),
            config,
        );
        Harness { engine, clock }
    }

    fn simple(adapters: Vec<Arc<MockAdapter>>) -> Harness {
        harness(
            adapters
                .into_iter()
                .map(|a| (ProviderSettings::new(a.id.clone()), a))
                .collect(),
            CircuitBreakerConfig::default(),
            RateLimitConfig::default(),
            AggregationConfig::default(),
        )
    }

    fn shipment(postal_code: &str) -> ShipmentInput {
        ShipmentInput::new(
            Address::new("1 Main St", "Austin", postal_code, "US").with_state("TX"),
            Address::new("9 Elm St", "Denver", "80202", "US").with_state("CO"),
            Parcel::new(20.0, 15.0, 10.0, 1_200.0),
        )
    }

    fn amounts(quotes: &[RateQuote]) -> Vec<i64> {
        quotes.iter().map(RateQuote::amount).collect()
    }

    #[tokio::test]
    async fn merges_and_sorts_by_amount() {
        let h = simple(vec![
            Arc::new(MockAdapter::quoting("shippo", &[1200])),
            Arc::new(MockAdapter::quoting("easypost", &[500])),
            Arc::new(MockAdapter::quoting("veeqo", &[800])),
        ]);

        let quotes = h.engine.quote_all(&shipment("78701"), &RequestContext::generate()).await.unwrap();
        assert_eq!(amounts(&quotes), vec![500, 800, 1200]);
    }

    #[tokio::test]
    async fn equal_amounts_keep_provider_order() {
        let h = simple(vec![
            Arc::new(MockAdapter::quoting("b", &[700])),
            Arc::new(MockAdapter::quoting("a", &[700, 300])),
        ]);

        let quotes = h.engine.quote_all(&shipment("78701"), &RequestContext::generate()).await.unwrap();
        let providers: Vec<_> = quotes.iter().map(|q| q.provider().as_str()).collect();
        assert_eq!(providers, vec!["a", "b", "a"]);
    }

    #[tokio::test]
    async fn all_failing_returns_empty() {
        let h = simple(vec![
            Arc::new(MockAdapter::failing("a", AdapterError::status(503, "down"))),
            Arc::new(MockAdapter::failing("b", AdapterError::connect_failed("ECONNREFUSED"))),
        ]);

        let result = h
            .engine
            .collect_quotes(&shipment("78701"), &RequestContext::generate())
            .await
            .unwrap();
        assert!(result.quotes.is_empty());
        assert_eq!(result.providers_queried, 2);
        assert_eq!(result.providers_responded, 0);
        assert_eq!(result.failures().count(), 2);
    }

    #[tokio::test]
    async fn partial_failure_keeps_successful_quotes() {
        let h = simple(vec![
            Arc::new(MockAdapter::failing("a", AdapterError::status(401, "bad key"))),
            Arc::new(MockAdapter::quoting("b", &[950])),
        ]);
        let request = RequestContext::generate();

        let result = h.engine.collect_quotes(&shipment("78701"), &request).await.unwrap();
        assert_eq!(amounts(&result.quotes), vec![950]);
        let (provider, error) = result.failures().next().unwrap();
        assert_eq!(provider.as_str(), "a");
        assert!(matches!(error.kind(), ErrorKind::Authentication { .. }));
        assert_eq!(error.correlation_id(), request.correlation_id());
    }

    #[tokio::test]
    async fn failed_provider_between_multi_quote_providers() {
        let h = simple(vec![
            Arc::new(MockAdapter::quoting("a", &[500, 1200])),
            Arc::new(MockAdapter::failing("b", AdapterError::status(500, "boom"))),
            Arc::new(MockAdapter::quoting("c", &[800])),
        ]);

        let result = h
            .engine
            .collect_quotes(&shipment("78701"), &RequestContext::generate())
            .await
            .unwrap();
        assert_eq!(amounts(&result.quotes), vec![500, 800, 1200]);
        let providers: Vec<_> = result.quotes.iter().map(|q| q.provider().as_str()).collect();
        assert_eq!(providers, vec!["a", "c", "a"]);
        assert_eq!(result.providers_queried, 3);
        assert_eq!(result.providers_responded, 2);

        assert_eq!(result.failures().count(), 1);
        let (provider, error) = result.failures().next().unwrap();
        assert_eq!(provider.as_str(), "b");
        assert_eq!(error.status_code(), Some(500));
    }

    #[tokio::test]
    async fn invalid_shipment_is_validation_error() {
        let h = simple(vec![Arc::new(MockAdapter::quoting("a", &[1]))]);
        let mut input = shipment("78701");
        input.parcel.weight_g = 0.0;

        let error = h.engine.quote_all(&input, &RequestContext::generate()).await.unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::Validation { .. }));
        assert_eq!(error.field(), Some("parcel.weight_g"));
    }

    #[tokio::test]
    async fn second_identical_request_is_served_from_cache() {
        let adapter = Arc::new(MockAdapter::quoting("shippo", &[640]));
        let h = simple(vec![adapter.clone()]);

        h.engine.quote_all(&shipment("78701"), &RequestContext::generate()).await.unwrap();
        let result = h
            .engine
            .collect_quotes(&shipment(" 78701 "), &RequestContext::generate())
            .await
            .unwrap();

        assert_eq!(amounts(&result.quotes), vec![640]);
        assert_eq!(adapter.quote_calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result.outcome(&ProviderId::new("shippo")),
            Some(ProviderOutcome::Quoted { count: 1, cached: true })
        ));

        assert_eq!(h.engine.invalidate_quotes(&ProviderId::new("shippo")).await.unwrap(), 1);
        h.engine.quote_all(&shipment("78701"), &RequestContext::generate()).await.unwrap();
        assert_eq!(adapter.quote_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_success_is_not_cached() {
        let adapter = Arc::new(MockAdapter::quoting("shippo", &[]));
        let h = simple(vec![adapter.clone()]);

        for _ in 0..2 {
            h.engine.quote_all(&shipment("78701"), &RequestContext::generate()).await.unwrap();
        }
        assert_eq!(adapter.quote_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rate_limited_provider_contributes_nothing() {
        let adapter = Arc::new(MockAdapter::quoting("shippo", &[100]));
        let h = harness(
            vec![(ProviderSettings::new("shippo"), adapter.clone())],
            CircuitBreakerConfig::default(),
            RateLimitConfig::new(60_000, 1),
            AggregationConfig::default(),
        );

        h.engine.quote_all(&shipment("78701"), &RequestContext::generate()).await.unwrap();
        let result = h
            .engine
            .collect_quotes(&shipment("10001"), &RequestContext::generate())
            .await
            .unwrap();

        assert!(result.quotes.is_empty());
        assert!(matches!(
            result.outcome(&ProviderId::new("shippo")),
            Some(ProviderOutcome::RateLimited { retry_after_secs: Some(60) })
        ));
        assert_eq!(adapter.quote_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn open_circuit_skips_adapter_until_recovery() {
        let adapter = Arc::new(MockAdapter::failing("shippo", AdapterError::status(500, "boom")));
        let h = harness(
            vec![(ProviderSettings::new("shippo"), adapter.clone())],
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_recovery_timeout_ms(30_000)
                .with_half_open_max_calls(1),
            RateLimitConfig::default(),
            AggregationConfig::default(),
        );

        h.engine.quote_all(&shipment("78701"), &RequestContext::generate()).await.unwrap();
        let result = h
            .engine
            .collect_quotes(&shipment("10001"), &RequestContext::generate())
            .await
            .unwrap();
        let (_, error) = result.failures().next().unwrap();
        assert!(error.is_circuit_open());
        assert_eq!(adapter.quote_calls.load(Ordering::SeqCst), 1);

        h.clock.advance_ms(30_000);
        h.engine.quote_all(&shipment("94105"), &RequestContext::generate()).await.unwrap();
        assert_eq!(adapter.quote_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn per_provider_timeout_is_classified() {
        let h = harness(
            vec![(
                ProviderSettings::new("slow").with_timeout_ms(100),
                Arc::new(MockAdapter::slow("slow", &[1], 1_000)),
            )],
            CircuitBreakerConfig::default(),
            RateLimitConfig::default(),
            AggregationConfig::default(),
        );

        let result = h
            .engine
            .collect_quotes(&shipment("78701"), &RequestContext::generate())
            .await
            .unwrap();
        let (_, error) = result.failures().next().unwrap();
        assert!(matches!(error.kind(), ErrorKind::Timeout { timeout_ms: Some(100) }));
        assert!(error.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn overall_deadline_abandons_slow_providers() {
        let slow = Arc::new(MockAdapter::slow("slow", &[1], 5_000));
        let h = harness(
            vec![
                (ProviderSettings::new("slow"), slow.clone()),
                (ProviderSettings::new("fast"), Arc::new(MockAdapter::quoting("fast", &[300]))),
            ],
            CircuitBreakerConfig::default(),
            RateLimitConfig::default(),
            AggregationConfig::with_timeout(200).with_per_provider_timeout(10_000),
        );

        let result = h
            .engine
            .collect_quotes(&shipment("78701"), &RequestContext::generate())
            .await
            .unwrap();
        assert_eq!(amounts(&result.quotes), vec![300]);
        assert!(matches!(
            result.outcome(&ProviderId::new("slow")),
            Some(ProviderOutcome::Abandoned)
        ));

        // The detached task still finishes and records its success.
        tokio::time::sleep(Duration::from_millis(6_000)).await;
        let stats = h.engine.breakers().get(&ProviderId::new("slow")).unwrap().stats();
        assert_eq!(stats.total_calls, 1);
        assert_eq!(stats.total_failures, 0);
    }

    #[tokio::test]
    async fn ineligible_providers_are_skipped() {
        let optional = Arc::new(MockAdapter::quoting("optional", &[1]));
        let disabled = Arc::new(MockAdapter::quoting("disabled", &[2]));
        let needs_allocation = Arc::new(
            MockAdapter::quoting("warehouse", &[3])
                .with_requirements(ProviderRequirements::none().with_quote([RequestField::AllocationId])),
        );
        let h = harness(
            vec![
                (ProviderSettings::new("optional").with_optional(true), optional.clone()),
                (ProviderSettings::new("disabled").with_enabled(false), disabled.clone()),
                (ProviderSettings::new("warehouse"), needs_allocation.clone()),
            ],
            CircuitBreakerConfig::default(),
            RateLimitConfig::default(),
            AggregationConfig::default(),
        );

        let result = h
            .engine
            .collect_quotes(&shipment("78701"), &RequestContext::generate())
            .await
            .unwrap();
        assert!(result.quotes.is_empty());
        assert_eq!(result.providers_queried, 0);
        assert!(matches!(
            result.outcome(&ProviderId::new("warehouse")),
            Some(ProviderOutcome::Skipped {
                reason: SkipReason::MissingField(RequestField::AllocationId)
            })
        ));

        let with_allocation = shipment("78701").with_allocation_id("alloc-9");
        let quotes = h.engine.quote_all(&with_allocation, &RequestContext::generate()).await.unwrap();
        assert_eq!(amounts(&quotes), vec![3]);
        assert_eq!(optional.quote_calls.load(Ordering::SeqCst), 0);
        assert_eq!(disabled.quote_calls.load(Ordering::SeqCst), 0);
    }

    fn veeqo() -> Arc<MockAdapter> {
        Arc::new(MockAdapter::quoting("veeqo", &[100]).with_requirements(
            ProviderRequirements::none()
                .with_purchase([RequestField::AllocationId, RequestField::ServiceType]),
        ))
    }

    #[tokio::test]
    async fn veeqo_purchase_requires_allocation_and_service() {
        let adapter = veeqo();
        let h = simple(vec![adapter.clone()]);

        let choice = PurchaseChoice::new(ProviderId::new("veeqo"), "rate-1");
        let error = h.engine.purchase(&choice, &RequestContext::generate()).await.unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::Validation { .. }));
        assert_eq!(error.field(), Some("allocation_id"));

        let choice = choice.with_allocation_id("alloc-1");
        let error = h.engine.purchase(&choice, &RequestContext::generate()).await.unwrap_err();
        assert_eq!(error.field(), Some("service_type"));
        assert_eq!(adapter.buy_calls.load(Ordering::SeqCst), 0);

        let choice = choice.with_service_type("standard");
        let label = h.engine.purchase(&choice, &RequestContext::generate()).await.unwrap();
        assert_eq!(label.label_url, "https://labels.example.com/rate-1");
        assert_eq!(adapter.buy_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn purchase_unknown_or_disabled_provider_is_configuration_error() {
        let adapter = Arc::new(MockAdapter::quoting("off", &[1]));
        let h = harness(
            vec![(ProviderSettings::new("off").with_enabled(false), adapter)],
            CircuitBreakerConfig::default(),
            RateLimitConfig::default(),
            AggregationConfig::default(),
        );

        for provider in ["missing", "off"] {
            let choice = PurchaseChoice::new(ProviderId::new(provider), "r");
            let error = h.engine.purchase(&choice, &RequestContext::generate()).await.unwrap_err();
            assert_eq!(error.kind(), &ErrorKind::Configuration);
            assert!(!error.is_retryable());
        }
    }

    #[tokio::test]
    async fn purchase_rate_limit_carries_retry_after() {
        let adapter = Arc::new(MockAdapter::quoting("shippo", &[1]));
        let h = harness(
            vec![(ProviderSettings::new("shippo"), adapter.clone())],
            CircuitBreakerConfig::default(),
            RateLimitConfig::new(10_000, 1),
            AggregationConfig::default(),
        );
        let choice = PurchaseChoice::new(ProviderId::new("shippo"), "r");

        h.engine.purchase(&choice, &RequestContext::generate()).await.unwrap();
        let error = h.engine.purchase(&choice, &RequestContext::generate()).await.unwrap_err();
        assert_eq!(error.retry_after_ms(), Some(10_000));
        assert!(error.is_retryable());
        assert_eq!(adapter.buy_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_purchase_does_not_hold_half_open_slot() {
        let adapter = Arc::new(MockAdapter::slow("shippo", &[], 60_000));
        let h = harness(
            vec![(ProviderSettings::new("shippo"), adapter.clone())],
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_recovery_timeout_ms(30_000)
                .with_half_open_max_calls(1),
            RateLimitConfig::default(),
            AggregationConfig::default(),
        );
        let breaker = h.engine.breakers().breaker(&ProviderId::new("shippo"));
        breaker.on_failure();
        h.clock.advance_ms(30_000);

        let choice = PurchaseChoice::new(ProviderId::new("shippo"), "r");
        let request = RequestContext::generate();
        let cancelled = timeout(Duration::from_millis(50), h.engine.purchase(&choice, &request)).await;
        assert!(cancelled.is_err());
        assert_eq!(adapter.buy_calls.load(Ordering::SeqCst), 1);

        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::HalfOpen);
        assert_eq!(stats.half_open_call_count, 0);
        assert!(breaker.can_execute());
    }

    #[tokio::test]
    async fn purchase_errors_are_classified_and_propagated() {
        let adapter = Arc::new(MockAdapter::failing(
            "shippo",
            AdapterError::status_with_retry(429, "slow down", 2_000),
        ));
        let h = simple(vec![adapter]);
        let request = RequestContext::new(Some(CorrelationId::new("req-7")));

        let error = h
            .engine
            .purchase(&PurchaseChoice::new(ProviderId::new("shippo"), "r"), &request)
            .await
            .unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::RateLimit { retry_after_ms: Some(2_000) }));
        assert_eq!(error.correlation_id().as_str(), "req-7");
        assert_eq!(error.operation(), Operation::Purchase);
    }

    #[tokio::test]
    async fn health_reports_every_provider() {
        let h = simple(vec![
            Arc::new(MockAdapter::quoting("a", &[1])),
            Arc::new(MockAdapter::quoting("b", &[2])),
        ]);
        h.engine.quote_all(&shipment("78701"), &RequestContext::generate()).await.unwrap();

        let health = h.engine.health();
        assert_eq!(health.providers.len(), 2);
        assert!(health.providers.iter().all(|p| p.rate_limit.remaining == 99));
        assert_eq!(health.cache.misses, 2);
        assert_eq!(health.cache.writes, 2);
    }

    #[test]
    fn cache_key_format() {
        assert_eq!(quote_cache_key(&ProviderId::new("shippo"), "abc"), "quotes:shippo:abc");
    }
}
