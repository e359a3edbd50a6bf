//! # Call Context
//!
//! Explicit correlation context threaded through every call boundary.
//!
//! A [`RequestContext`] is built once per inbound request by the route layer.
//! The aggregator derives a [`CallContext`] per provider call from it, so the
//! cache lookup, rate-limit check, breaker decision and adapter call for one
//! request all log the same `correlation_id`.

use crate::domain::value_objects::{CorrelationId, ProviderId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Provider operation being performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Rate quoting.
    Quote,
    /// Label purchase.
    Purchase,
}

impl Operation {
    /// Returns the operation name used in logs and errors.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::Purchase => "purchase",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request context supplied by the caller-facing boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    correlation_id: CorrelationId,
}

impl RequestContext {
    /// Creates a context, generating a correlation id only if none was supplied.
    #[must_use]
    pub fn new(correlation_id: Option<CorrelationId>) -> Self {
        Self {
            correlation_id: CorrelationId::or_generate(correlation_id),
        }
    }

    /// Creates a context with a freshly generated correlation id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(None)
    }

    /// Returns the correlation id.
    #[must_use]
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Derives the context for one provider call.
    #[must_use]
    pub fn call(&self, provider: ProviderId, operation: Operation) -> CallContext {
        CallContext {
            correlation_id: self.correlation_id.clone(),
            provider,
            operation,
            timeout_ms: None,
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::generate()
    }
}

/// Context for a single provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    correlation_id: CorrelationId,
    provider: ProviderId,
    operation: Operation,
    timeout_ms: Option<u64>,
}

impl CallContext {
    /// Sets the timeout applied to the call.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Returns the correlation id.
    #[must_use]
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Returns the provider being called.
    #[must_use]
    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    /// Returns the operation.
    #[must_use]
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Returns the timeout applied to the call, if any.
    #[must_use]
    pub fn timeout_ms(&self) -> Option<u64> {
        self.timeout_ms
    }
}
