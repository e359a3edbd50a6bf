//! # Circuit Breaker
//!
//! Per-provider failure tracking that stops calling a provider which keeps
//! failing.
//!
//! # States
//!
//! ```text
//!            failures >= failure_threshold
//!   CLOSED ─────────────────────────────────▶ OPEN
//!     ▲                                        │
//!     │ success_threshold successes            │ can_execute() after
//!     │                                        │ recovery_timeout_ms
//!     │            any failure                 ▼
//!     └──────────── HALF_OPEN ◀────────────────┘
//!                      │
//!                      └──────── any failure ──▶ OPEN
//! ```
//!
//! The OPEN → HALF_OPEN transition is lazy: it happens inside the next
//! [`CircuitBreaker::can_execute`] call once the recovery timeout elapsed,
//! never on a timer. HALF_OPEN admits at most `half_open_max_calls` trial
//! calls; `success_threshold` of them (default: `half_open_max_calls`) must
//! succeed to close the circuit.
//!
//! Failures in CLOSED are counted within `monitoring_period_ms`: a failure
//! arriving later than that after the previous one restarts the count. A
//! period of zero counts cumulatively until the next reset.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use ship_quote::application::clock::ManualClock;
//! use ship_quote::application::services::circuit_breaker::{
//!     CircuitBreaker, CircuitBreakerConfig, CircuitState,
//! };
//! use ship_quote::domain::value_objects::ProviderId;
//!
//! let clock = Arc::new(ManualClock::new(0));
//! let config = CircuitBreakerConfig::default().with_failure_threshold(2);
//! let breaker = CircuitBreaker::new(ProviderId::new("shippo"), config, clock.clone());
//!
//! breaker.on_failure();
//! breaker.on_failure();
//! assert_eq!(breaker.state(), CircuitState::Open);
//! assert!(!breaker.can_execute());
//! ```

use crate::application::clock::Clock;
use crate::application::context::CallContext;
use crate::application::error::{ProviderError, ProviderResult};
use crate::domain::value_objects::{ProviderId, Timestamp};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected without being attempted.
    Open,
    /// A limited number of trial calls are admitted.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Error type for circuit breaker setup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CircuitBreakerError {
    /// Configuration values are inconsistent.
    #[error("invalid circuit breaker configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for circuit breaker setup.
pub type CircuitBreakerResult<T> = Result<T, CircuitBreakerError>;

/// Circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting trial calls.
    pub recovery_timeout_ms: u64,
    /// Trial calls admitted while half-open.
    pub half_open_max_calls: u32,
    /// Half-open successes needed to close; defaults to `half_open_max_calls`.
    pub success_threshold: Option<u32>,
    /// Window over which closed-state failures accumulate; 0 = cumulative.
    pub monitoring_period_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
            half_open_max_calls: 3,
            success_threshold: None,
            monitoring_period_ms: 60_000,
        }
    }
}

impl CircuitBreakerConfig {
    /// Sets the failure threshold.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the recovery timeout.
    #[must_use]
    pub fn with_recovery_timeout_ms(mut self, ms: u64) -> Self {
        self.recovery_timeout_ms = ms;
        self
    }

    /// Sets the number of half-open trial calls.
    #[must_use]
    pub fn with_half_open_max_calls(mut self, calls: u32) -> Self {
        self.half_open_max_calls = calls;
        self
    }

    /// Sets the half-open success threshold.
    #[must_use]
    pub fn with_success_threshold(mut self, successes: u32) -> Self {
        self.success_threshold = Some(successes);
        self
    }

    /// Sets the failure monitoring period.
    #[must_use]
    pub fn with_monitoring_period_ms(mut self, ms: u64) -> Self {
        self.monitoring_period_ms = ms;
        self
    }

    /// Returns the number of half-open successes that close the circuit.
    #[must_use]
    pub fn effective_success_threshold(&self) -> u32 {
        self.success_threshold
            .unwrap_or(self.half_open_max_calls)
            .max(1)
    }

    /// Checks the configuration for values that would wedge the breaker.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitBreakerError::InvalidConfig`] for zero thresholds or a
    /// success threshold that exceeds the half-open call budget.
    pub fn validate(&self) -> CircuitBreakerResult<()> {
        if self.failure_threshold == 0 {
            return Err(CircuitBreakerError::InvalidConfig(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.half_open_max_calls == 0 {
            return Err(CircuitBreakerError::InvalidConfig(
                "half_open_max_calls must be at least 1".to_string(),
            ));
        }
        if self.effective_success_threshold() > self.half_open_max_calls {
            return Err(CircuitBreakerError::InvalidConfig(format!(
                "success_threshold {} exceeds half_open_max_calls {}",
                self.effective_success_threshold(),
                self.half_open_max_calls
            )));
        }
        Ok(())
    }
}

/// Read-only snapshot of a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerStats {
    /// Provider the breaker guards.
    pub name: ProviderId,
    /// Current state.
    pub state: CircuitState,
    /// Failures counted toward opening.
    pub failure_count: u32,
    /// Trial calls admitted in the current half-open period.
    pub half_open_call_count: u32,
    /// Trial calls that succeeded in the current half-open period.
    pub half_open_success_count: u32,
    /// Most recent failure.
    pub last_failure_time: Option<Timestamp>,
    /// Most recent state transition.
    pub last_state_change_time: Timestamp,
    /// Calls that ran through [`CircuitBreaker::execute`].
    pub total_calls: u64,
    /// Calls that failed.
    pub total_failures: u64,
    /// Calls rejected without being attempted.
    pub total_rejections: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_ms: Option<u64>,
    last_state_change_ms: u64,
    half_open_call_count: u32,
    half_open_success_count: u32,
    total_calls: u64,
    total_failures: u64,
    total_rejections: u64,
    epoch: u64,
}

/// Failure-tracking gate for one provider.
///
/// All state lives behind a single mutex, so `can_execute` and the
/// transition it may trigger are one atomic step.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: ProviderId,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(name: ProviderId, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_ms();
        Self {
            name,
            config,
            clock,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_ms: None,
                last_state_change_ms: now,
                half_open_call_count: 0,
                half_open_success_count: 0,
                total_calls: 0,
                total_failures: 0,
                total_rejections: 0,
                epoch: 0,
            }),
        }
    }

    /// Returns the provider this breaker guards.
    #[must_use]
    pub fn name(&self) -> &ProviderId {
        &self.name
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Decides whether a call may proceed.
    ///
    /// May move OPEN to HALF_OPEN once the recovery timeout elapsed, and
    /// reserves a trial slot when half-open. Does not consume anything in
    /// CLOSED.
    pub fn can_execute(&self) -> bool {
        self.admit().is_some()
    }

    /// Admits a call and returns the state epoch it was admitted under.
    fn admit(&self) -> Option<u64> {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Some(inner.epoch),
            CircuitState::Open => {
                let reopen_at = inner
                    .last_state_change_ms
                    .saturating_add(self.config.recovery_timeout_ms);
                if now >= reopen_at {
                    self.transition(&mut inner, CircuitState::HalfOpen, now);
                    inner.half_open_call_count = 1;
                    Some(inner.epoch)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_call_count < self.config.half_open_max_calls {
                    inner.half_open_call_count += 1;
                    Some(inner.epoch)
                } else {
                    None
                }
            }
        }
    }

    /// Records a successful call.
    pub fn on_success(&self) {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.half_open_success_count += 1;
                if inner.half_open_success_count >= self.config.effective_success_threshold() {
                    self.transition(&mut inner, CircuitState::Closed, now);
                }
            }
            // A late success from a call admitted before the circuit opened.
            CircuitState::Open => {}
        }
    }

    /// Records a failed call.
    pub fn on_failure(&self) {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        let previous_failure = inner.last_failure_ms.replace(now);
        match inner.state {
            CircuitState::Closed => {
                let period = self.config.monitoring_period_ms;
                let stale = period > 0
                    && previous_failure.is_some_and(|prev| now.saturating_sub(prev) > period);
                inner.failure_count = if stale { 1 } else { inner.failure_count + 1 };
                if inner.failure_count >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => {
                inner.failure_count += 1;
                self.transition(&mut inner, CircuitState::Open, now);
            }
            CircuitState::Open => inner.failure_count += 1,
        }
    }

    /// Runs `operation` if the circuit admits it, recording the outcome.
    ///
    /// If the returned future is dropped while `operation` is still pending,
    /// the call records no outcome and its half-open trial slot is handed
    /// back, so a cancelled caller never leaves the circuit stuck half-open.
    ///
    /// # Errors
    ///
    /// Returns a `CircuitOpen` [`ProviderError`] without invoking `operation`
    /// when the circuit rejects the call; otherwise propagates the
    /// operation's own error after recording the failure.
    pub async fn execute<T, F, Fut>(&self, ctx: &CallContext, operation: F) -> ProviderResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let Some(epoch) = self.admit() else {
            self.inner.lock().total_rejections += 1;
            tracing::debug!(
                provider = %self.name,
                correlation_id = %ctx.correlation_id(),
                "circuit open, call rejected"
            );
            return Err(ProviderError::circuit_open(ctx));
        };

        self.inner.lock().total_calls += 1;
        let mut admission = Admission {
            breaker: self,
            epoch,
            settled: false,
        };
        let result = operation().await;
        admission.settled = true;

        match result {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(error) => {
                self.inner.lock().total_failures += 1;
                self.on_failure();
                Err(error)
            }
        }
    }

    /// Forces the circuit closed with zeroed counters.
    pub fn reset(&self) {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed, now);
        }
        inner.failure_count = 0;
        inner.last_failure_ms = None;
        inner.half_open_call_count = 0;
        inner.half_open_success_count = 0;
    }

    /// Returns the current state without triggering transitions.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Returns a snapshot without triggering transitions.
    #[must_use]
    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            half_open_call_count: inner.half_open_call_count,
            half_open_success_count: inner.half_open_success_count,
            last_failure_time: inner.last_failure_ms.map(Timestamp::from_clock_millis),
            last_state_change_time: Timestamp::from_clock_millis(inner.last_state_change_ms),
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            total_rejections: inner.total_rejections,
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState, now: u64) {
        let from = inner.state;
        inner.state = to;
        inner.last_state_change_ms = now;
        inner.half_open_call_count = 0;
        inner.half_open_success_count = 0;
        inner.epoch = inner.epoch.wrapping_add(1);
        if to == CircuitState::Closed {
            inner.failure_count = 0;
        }

        match to {
            CircuitState::Open => tracing::warn!(
                provider = %self.name,
                %from,
                failures = inner.failure_count,
                "circuit opened"
            ),
            _ => tracing::info!(provider = %self.name, %from, %to, "circuit state changed"),
        }
    }
}

/// An in-flight call admitted by [`CircuitBreaker::execute`].
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    epoch: u64,
    settled: bool,
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut inner = self.breaker.inner.lock();
        // Only the half-open round that handed out the slot may take it back.
        if inner.state == CircuitState::HalfOpen && inner.epoch == self.epoch {
            inner.half_open_call_count = inner.half_open_call_count.saturating_sub(1);
        }
        tracing::debug!(
            provider = %self.breaker.name,
            state = %inner.state,
            "call abandoned before completion"
        );
    }
}

/// One breaker per provider, created on first use.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    breakers: DashMap<ProviderId, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    /// Creates an empty registry sharing one configuration.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            breakers: DashMap::new(),
        }
    }

    /// Returns the provider's breaker, creating it if needed.
    #[must_use]
    pub fn breaker(&self, provider: &ProviderId) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(provider) {
            return Arc::clone(existing.value());
        }
        let created = self
            .breakers
            .entry(provider.clone())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    provider.clone(),
                    self.config.clone(),
                    Arc::clone(&self.clock),
                ))
            });
        Arc::clone(created.value())
    }

    /// Returns the provider's breaker if one exists.
    #[must_use]
    pub fn get(&self, provider: &ProviderId) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(provider).map(|b| Arc::clone(b.value()))
    }

    /// Returns snapshots of every breaker, sorted by provider.
    #[must_use]
    pub fn stats(&self) -> Vec<CircuitBreakerStats> {
        let mut stats: Vec<_> = self.breakers.iter().map(|b| b.value().stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Resets every breaker.
    pub fn reset_all(&self) {
        for breaker in self.breakers.iter() {
            breaker.value().reset();
        }
    }
}
