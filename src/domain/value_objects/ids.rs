//! # Identifiers
//!
//! String-backed identifier newtypes.
//!
//! - [`ProviderId`]: a configured carrier integration (`"easypost"`, `"veeqo"`)
//! - [`CorrelationId`]: threads one inbound request through every cache lookup,
//!   rate-limit check, breaker decision and adapter call
//!
//! # Examples
//!
//! ```
//! use ship_quote::domain::value_objects::ids::{CorrelationId, ProviderId};
//!
//! let provider = ProviderId::new("easypost");
//! assert_eq!(provider.as_str(), "easypost");
//!
//! let supplied = CorrelationId::or_generate(Some(CorrelationId::new("req-42")));
//! assert_eq!(supplied.as_str(), "req-42");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a configured shipping provider.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    /// Pseudo-provider used for failures that are not attributable to a
    /// single provider, such as request validation in the aggregator.
    pub const AGGREGATE: &'static str = "*";

    /// Creates a provider identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the pseudo-provider identifier for aggregate-level errors.
    #[must_use]
    pub fn aggregate() -> Self {
        Self(Self::AGGREGATE.to_string())
    }

    /// Returns the identifier as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Opaque identifier correlating all work done for one inbound request.
///
/// Normally supplied by the caller-facing boundary. When none is supplied
/// the core generates one once and reuses it for the rest of the call graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Wraps an existing correlation identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random correlation identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the supplied identifier, or a freshly generated one when
    /// absent or blank.
    #[must_use]
    pub fn or_generate(supplied: Option<Self>) -> Self {
        match supplied {
            Some(id) if !id.0.trim().is_empty() => id,
            _ => Self::generate(),
        }
    }

    /// Returns the identifier as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
