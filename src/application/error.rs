//! # Provider Errors
//!
//! The typed failure taxonomy every provider boundary speaks.
//!
//! # Error Kinds
//!
//! ```text
//! ProviderError { kind, provider, operation, retryable, correlation_id, timestamp }
//! ├── Configuration              - unknown/disabled provider, missing credentials
//! ├── Network { status_code? }   - connectivity, 5xx, unexpected 4xx, unclassified
//! ├── RateLimit { retry_after? } - provider 429 or local limiter denial
//! ├── Authentication { status? } - 401 / 403
//! ├── Timeout { timeout_ms? }    - call exceeded its deadline
//! ├── CircuitOpen                - synthesized locally, call never attempted
//! └── Validation { field? }      - malformed caller input
//! ```
//!
//! Errors are created at the point of failure and never mutated afterwards;
//! all fields are private with getters.
//!
//! # Examples
//!
//! ```
//! use ship_quote::application::context::{Operation, RequestContext};
//! use ship_quote::application::error::{ErrorKind, ProviderError};
//! use ship_quote::domain::value_objects::ProviderId;
//! use ship_quote::infrastructure::providers::error::AdapterError;
//!
//! let ctx = RequestContext::generate().call(ProviderId::new("shippo"), Operation::Quote);
//! let error = ProviderError::classify(AdapterError::status(401, "bad key"), &ctx);
//!
//! assert!(matches!(error.kind(), ErrorKind::Authentication { .. }));
//! assert!(!error.is_retryable());
//! assert_eq!(error.correlation_id(), ctx.correlation_id());
//! ```

use crate::application::context::{CallContext, Operation};
use crate::domain::errors::ValidationError;
use crate::domain::value_objects::{CorrelationId, ProviderId, Timestamp};
use crate::infrastructure::providers::error::AdapterError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Message fragments that indicate a connectivity failure.
const NETWORK_MARKERS: &[&str] = &[
    "econnrefused",
    "enotfound",
    "econnreset",
    "ehostunreach",
    "connection refused",
    "connection reset",
    "dns error",
    "network",
];

/// Message fragments that indicate a timeout.
const TIMEOUT_MARKERS: &[&str] = &["etimedout", "timed out", "timeout"];

/// Classification of a provider failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorKind {
    /// Provider is unknown, disabled or misconfigured.
    Configuration,
    /// Connectivity failure or server-side error.
    Network {
        /// HTTP status, when the provider responded.
        status_code: Option<u16>,
    },
    /// Too many requests.
    RateLimit {
        /// How long to wait before retrying, in milliseconds.
        retry_after_ms: Option<u64>,
    },
    /// Credentials rejected.
    Authentication {
        /// HTTP status, when the provider responded.
        status_code: Option<u16>,
    },
    /// Call exceeded its deadline.
    Timeout {
        /// The deadline that was attempted, in milliseconds.
        timeout_ms: Option<u64>,
    },
    /// The provider's circuit breaker rejected the call.
    CircuitOpen,
    /// Caller input is malformed.
    Validation {
        /// The offending field, if known.
        field: Option<String>,
    },
}

impl ErrorKind {
    /// Returns the kind name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Network { .. } => "network",
            Self::RateLimit { .. } => "rate_limit",
            Self::Authentication { .. } => "authentication",
            Self::Timeout { .. } => "timeout",
            Self::CircuitOpen => "circuit_open",
            Self::Validation { .. } => "validation",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A classified failure crossing a provider boundary.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{kind} error from {provider} during {operation}: {message} (correlation_id={correlation_id})")]
pub struct ProviderError {
    kind: ErrorKind,
    provider: ProviderId,
    operation: Operation,
    message: String,
    retryable: bool,
    correlation_id: CorrelationId,
    timestamp: Timestamp,
}

impl ProviderError {
    fn new(ctx: &CallContext, kind: ErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            provider: ctx.provider().clone(),
            operation: ctx.operation(),
            message: message.into(),
            retryable,
            correlation_id: ctx.correlation_id().clone(),
            timestamp: Timestamp::now(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(ctx: &CallContext, message: impl Into<String>) -> Self {
        Self::new(ctx, ErrorKind::Configuration, message, false)
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(
        ctx: &CallContext,
        message: impl Into<String>,
        status_code: Option<u16>,
        retryable: bool,
    ) -> Self {
        Self::new(ctx, ErrorKind::Network { status_code }, message, retryable)
    }

    /// Creates a rate limit error.
    #[must_use]
    pub fn rate_limit(
        ctx: &CallContext,
        message: impl Into<String>,
        retry_after_ms: Option<u64>,
    ) -> Self {
        Self::new(ctx, ErrorKind::RateLimit { retry_after_ms }, message, true)
    }

    /// Creates an authentication error.
    #[must_use]
    pub fn authentication(
        ctx: &CallContext,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self::new(ctx, ErrorKind::Authentication { status_code }, message, false)
    }

    /// Creates a timeout error carrying the context's deadline.
    #[must_use]
    pub fn timeout(ctx: &CallContext, message: impl Into<String>) -> Self {
        let timeout_ms = ctx.timeout_ms();
        Self::new(ctx, ErrorKind::Timeout { timeout_ms }, message, true)
    }

    /// Creates a circuit-open error.
    ///
    /// Not retryable immediately; the caller may try again after the
    /// breaker's recovery timeout.
    #[must_use]
    pub fn circuit_open(ctx: &CallContext) -> Self {
        let message = format!("circuit open for provider {}", ctx.provider());
        Self::new(ctx, ErrorKind::CircuitOpen, message, false)
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(
        ctx: &CallContext,
        field: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(ctx, ErrorKind::Validation { field }, message, false)
    }

    /// Converts a domain validation failure.
    #[must_use]
    pub fn from_validation(ctx: &CallContext, error: &ValidationError) -> Self {
        Self::validation(ctx, Some(error.field().to_string()), error.to_string())
    }

    /// Classifies a raw adapter failure.
    ///
    /// Priority order:
    /// 1. already-classified errors pass through unchanged
    /// 2. connectivity failures become retryable `Network`
    /// 3. timeouts become retryable `Timeout` with the attempted deadline
    /// 4. HTTP statuses: `>= 500` retryable `Network`, `429` `RateLimit`,
    ///    `401`/`403` `Authentication`, other `4xx` non-retryable `Network`
    /// 5. everything else is retryable `Network`
    #[must_use]
    pub fn classify(error: AdapterError, ctx: &CallContext) -> Self {
        match error {
            AdapterError::Classified(inner) => *inner,
            AdapterError::Transport {
                message,
                connect,
                timeout,
            } => {
                if connect || mentions(&message, NETWORK_MARKERS) {
                    Self::network(ctx, message, None, true)
                } else if timeout || mentions(&message, TIMEOUT_MARKERS) {
                    Self::timeout(ctx, message)
                } else {
                    Self::network(ctx, message, None, true)
                }
            }
            AdapterError::Status {
                status,
                message,
                retry_after_ms,
            } => Self::from_status(ctx, status, message, retry_after_ms),
            AdapterError::Decode { message } | AdapterError::Other { message } => {
                if mentions(&message, TIMEOUT_MARKERS) && !mentions(&message, NETWORK_MARKERS) {
                    Self::timeout(ctx, message)
                } else {
                    Self::network(ctx, message, None, true)
                }
            }
        }
    }

    fn from_status(
        ctx: &CallContext,
        status: u16,
        message: String,
        retry_after_ms: Option<u64>,
    ) -> Self {
        match status {
            s if s >= 500 => Self::network(ctx, message, Some(s), true),
            429 => Self::rate_limit(ctx, message, retry_after_ms),
            401 | 403 => Self::authentication(ctx, message, Some(status)),
            s if (400..500).contains(&s) => Self::network(ctx, message, Some(s), false),
            s => Self::network(ctx, message, Some(s), true),
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Returns the provider the error is attributed to.
    #[must_use]
    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    /// Returns the operation that failed.
    #[must_use]
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Returns the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns true if the same call may succeed if retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Returns the correlation id of the request that failed.
    #[must_use]
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Returns when the error was created.
    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Returns the HTTP status code, if any.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match &self.kind {
            ErrorKind::Network { status_code } | ErrorKind::Authentication { status_code } => {
                *status_code
            }
            _ => None,
        }
    }

    /// Returns the retry hint in milliseconds, if any.
    #[must_use]
    pub fn retry_after_ms(&self) -> Option<u64> {
        match &self.kind {
            ErrorKind::RateLimit { retry_after_ms } => *retry_after_ms,
            _ => None,
        }
    }

    /// Returns the invalid field, if any.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match &self.kind {
            ErrorKind::Validation { field } => field.as_deref(),
            _ => None,
        }
    }

    /// Returns true for locally synthesized circuit-open errors.
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self.kind, ErrorKind::CircuitOpen)
    }
}

fn mentions(message: &str, markers: &[&str]) -> bool {
    let lower = message.to_ascii_lowercase();
    markers.iter().any(|marker| lower.contains(marker))
}

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::context::RequestContext;

    fn ctx() -> CallContext {
        RequestContext::new(Some(CorrelationId::new("corr-1")))
            .call(ProviderId::new("easypost"), Operation::Quote)
            .with_timeout_ms(2_500)
    }

    #[test]
    fn classified_passes_through_unchanged() {
        let original = ProviderError::authentication(&ctx(), "nope", Some(401));
        let classified = ProviderError::classify(AdapterError::from(original.clone()), &ctx());
        assert_eq!(classified.kind(), original.kind());
        assert_eq!(classified.timestamp(), original.timestamp());
    }

    #[test]
    fn connect_failure_is_retryable_network() {
        let error = ProviderError::classify(AdapterError::connect_failed("refused"), &ctx());
        assert_eq!(error.kind(), &ErrorKind::Network { status_code: None });
        assert!(error.is_retryable());
    }

    #[test]
    fn network_message_wins_over_timeout_message() {
        let error = ProviderError::classify(
            AdapterError::other("ECONNRESET after request timeout"),
            &ctx(),
        );
        assert_eq!(error.kind().name(), "network");
    }

    #[test]
    fn timeout_carries_attempted_deadline() {
        let error = ProviderError::classify(AdapterError::timed_out("deadline"), &ctx());
        assert_eq!(
            error.kind(),
            &ErrorKind::Timeout {
                timeout_ms: Some(2_500)
            }
        );
        assert!(error.is_retryable());

        let from_message = ProviderError::classify(AdapterError::other("ETIMEDOUT"), &ctx());
        assert_eq!(from_message.kind().name(), "timeout");
    }

    #[test]
    fn status_mapping() {
        let server = ProviderError::classify(AdapterError::status(502, "bad gateway"), &ctx());
        assert_eq!(server.status_code(), Some(502));
        assert!(server.is_retryable());

        let limited =
            ProviderError::classify(AdapterError::status_with_retry(429, "slow", 3_000), &ctx());
        assert_eq!(limited.retry_after_ms(), Some(3_000));
        assert!(limited.is_retryable());

        for status in [401, 403] {
            let auth = ProviderError::classify(AdapterError::status(status, "denied"), &ctx());
            assert!(matches!(auth.kind(), ErrorKind::Authentication { .. }));
            assert!(!auth.is_retryable());
        }

        let client = ProviderError::classify(AdapterError::status(422, "bad parcel"), &ctx());
        assert_eq!(
            client.kind(),
            &ErrorKind::Network {
                status_code: Some(422)
            }
        );
        assert!(!client.is_retryable());
    }

    #[test]
    fn unclassified_defaults_to_retryable_network() {
        let error = ProviderError::classify(AdapterError::decode("unexpected token"), &ctx());
        assert_eq!(error.kind().name(), "network");
        assert!(error.is_retryable());
    }

    #[test]
    fn circuit_open_is_not_immediately_retryable() {
        let error = ProviderError::circuit_open(&ctx());
        assert!(error.is_circuit_open());
        assert!(!error.is_retryable());
        assert_eq!(error.correlation_id().as_str(), "corr-1");
    }

    #[test]
    fn validation_names_field() {
        let domain = ValidationError::new("to.country", "must be an ISO-3166 alpha-2 code");
        let error = ProviderError::from_validation(&ctx(), &domain);
        assert_eq!(error.field(), Some("to.country"));
        assert!(error.to_string().contains("correlation_id=corr-1"));
    }
}
