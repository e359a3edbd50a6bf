//! # Adapter Errors
//!
//! Raw failures reported by provider adapters.
//!
//! Adapters describe *what happened* (the transport failed, the provider
//! answered 429, the body did not parse). Turning that into the typed
//! [`ProviderError`] taxonomy with correlation metadata is the job of
//! [`ProviderError::classify`], so adapters never have to know about
//! correlation ids or retry policy.
//!
//! # Examples
//!
//! ```
//! use ship_quote::infrastructure::providers::error::AdapterError;
//!
//! let error = AdapterError::status_with_retry(429, "slow down", 2_000);
//! assert_eq!(error.status_code(), Some(429));
//! assert_eq!(error.retry_after_ms(), Some(2_000));
//! ```

use crate::application::error::ProviderError;
use thiserror::Error;

/// Failure reported by a provider adapter before classification.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// The request never produced an HTTP response.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// The connection could not be established.
        connect: bool,
        /// The request timed out.
        timeout: bool,
    },

    /// The provider answered with a non-success status.
    #[error("provider responded with status {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
        /// Parsed `Retry-After`, in milliseconds.
        retry_after_ms: Option<u64>,
    },

    /// The response could not be decoded into the normalized shape.
    #[error("failed to decode provider response: {message}")]
    Decode {
        /// Error message.
        message: String,
    },

    /// The adapter already produced a classified error.
    #[error(transparent)]
    Classified(Box<ProviderError>),

    /// Anything else.
    #[error("{message}")]
    Other {
        /// Error message.
        message: String,
    },
}

impl AdapterError {
    /// Creates a generic transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            connect: false,
            timeout: false,
        }
    }

    /// Creates a connection failure.
    #[must_use]
    pub fn connect_failed(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            connect: true,
            timeout: false,
        }
    }

    /// Creates a transport timeout.
    #[must_use]
    pub fn timed_out(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            connect: false,
            timeout: true,
        }
    }

    /// Creates a status error.
    #[must_use]
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Creates a status error carrying a retry hint.
    #[must_use]
    pub fn status_with_retry(status: u16, message: impl Into<String>, retry_after_ms: u64) -> Self {
        Self::Status {
            status,
            message: message.into(),
            retry_after_ms: Some(retry_after_ms),
        }
    }

    /// Creates a decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates an unclassified error.
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Returns the HTTP status, if the provider responded.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the retry hint in milliseconds, if any.
    #[must_use]
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::Status { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }
}

impl From<ProviderError> for AdapterError {
    fn from(error: ProviderError) -> Self {
        Self::Classified(Box::new(error))
    }
}

/// Result type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_flags() {
        assert!(matches!(
            AdapterError::connect_failed("refused"),
            AdapterError::Transport { connect: true, timeout: false, .. }
        ));
        assert!(matches!(
            AdapterError::timed_out("slow"),
            AdapterError::Transport { connect: false, timeout: true, .. }
        ));
    }

    #[test]
    fn status_accessors() {
        let error = AdapterError::status(503, "unavailable");
        assert_eq!(error.status_code(), Some(503));
        assert!(error.retry_after_ms().is_none());
        assert!(AdapterError::decode("bad json").status_code().is_none());
    }

    #[test]
    fn display_format() {
        let error = AdapterError::status(401, "bad key");
        assert_eq!(
            error.to_string(),
            "provider responded with status 401: bad key"
        );
    }
}
