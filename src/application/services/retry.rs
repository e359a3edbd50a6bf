//! # Retry Policy
//!
//! Bounded retry with exponential backoff and jitter.
//!
//! Used by the cache manager to absorb transient backing-store errors. The
//! aggregator never retries provider calls itself; that policy belongs to
//! callers.
//!
//! # Examples
//!
//! ```
//! use std::fmt;
//! use ship_quote::application::services::retry::{execute_with_retry, RetryPolicy, Retryable};
//!
//! #[derive(Debug)]
//! struct Unavailable;
//!
//! impl fmt::Display for Unavailable {
//!     fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
//!         f.write_str("backend unavailable")
//!     }
//! }
//!
//! impl Retryable for Unavailable {
//!     fn is_retryable(&self) -> bool {
//!         true
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let policy = RetryPolicy::new(3).with_initial_delay_ms(0);
//! let mut calls = 0;
//! let value = execute_with_retry(&policy, || {
//!     calls += 1;
//!     let attempt = calls;
//!     async move { if attempt < 2 { Err(Unavailable) } else { Ok(attempt) } }
//! })
//! .await;
//! assert_eq!(value.unwrap(), 2);
//! # });
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Errors that know whether retrying could help.
pub trait Retryable {
    /// Returns true if the failed operation may succeed when retried.
    fn is_retryable(&self) -> bool;
}

/// Backoff configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay.
    pub max_delay_ms: u64,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
    /// Adds up to 50% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 50,
            max_delay_ms: 1_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given attempt budget and default delays.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::new(1)
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay_ms(mut self, ms: u64) -> Self {
        self.initial_delay_ms = ms;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Returns the delay to wait after the given failed attempt (1-based),
    /// without jitter.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let raw = (self.initial_delay_ms as f64) * self.multiplier.max(1.0).powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let extra = rand::rng().random_range(0..=base.as_millis() as u64 / 2);
        base + Duration::from_millis(extra)
    }
}

/// Failure after the retry budget was spent or a permanent error occurred.
#[derive(Debug, Error)]
pub enum RetryError<E: fmt::Debug + fmt::Display> {
    /// Every attempt failed with a retryable error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// The last error observed.
        last: E,
    },

    /// A non-retryable error stopped the loop.
    #[error("permanent failure: {0}")]
    Permanent(E),
}

impl<E: fmt::Debug + fmt::Display> RetryError<E> {
    /// Returns the underlying error.
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { last, .. } => last,
            Self::Permanent(e) => e,
        }
    }
}

/// Result type for retried operations.
pub type RetryResult<T, E> = Result<T, RetryError<E>>;

/// Runs `operation` until it succeeds, fails permanently, or the policy's
/// attempt budget is spent.
///
/// # Errors
///
/// Returns [`RetryError::Permanent`] on the first non-retryable error and
/// [`RetryError::Exhausted`] when every attempt failed.
pub async fn execute_with_retry<T, E, F, Fut>(policy: &RetryPolicy, mut operation: F) -> RetryResult<T, E>
where
    E: Retryable + fmt::Debug + fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(RetryError::Permanent(e)),
            Err(e) if attempt >= max_attempts => {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: e,
                });
            }
            Err(e) => {
                let delay = policy.delay(attempt);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
    #[error("retryable failure")]
    struct AlwaysRetryable;

    impl Retryable for AlwaysRetryable {
        fn is_retryable(&self) -> bool {
            true
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
    #[error("permanent failure")]
    struct NeverRetryable;

    impl Retryable for NeverRetryable {
        fn is_retryable(&self) -> bool {
            false
        }
    }

    fn fast() -> RetryPolicy {
        RetryPolicy::new(3).with_initial_delay_ms(0).with_jitter(false)
    }

    #[test]
    fn base_delay_grows_and_caps() {
        let policy = RetryPolicy::new(5)
            .with_initial_delay_ms(100)
            .with_max_delay_ms(300)
            .with_jitter(false);
        assert_eq!(policy.base_delay(1), Duration::from_millis(100));
        assert_eq!(policy.base_delay(2), Duration::from_millis(200));
        assert_eq!(policy.base_delay(3), Duration::from_millis(300));
        assert_eq!(policy.base_delay(9), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = execute_with_retry(&fast(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n < 2 { Err(AlwaysRetryable) } else { Ok(n) } }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_budget() {
        let calls = AtomicU32::new(0);
        let result: RetryResult<(), _> = execute_with_retry(&fast(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AlwaysRetryable) }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 3, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: RetryResult<(), _> = execute_with_retry(&fast(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(NeverRetryable) }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Permanent(NeverRetryable))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
