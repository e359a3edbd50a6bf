//! Cache error types.

use crate::application::services::retry::Retryable;
use thiserror::Error;

/// Failure of a cache operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The backing store failed.
    #[error("cache backend failure: {message}")]
    Backend {
        /// Error message.
        message: String,
        /// The failure is transient.
        retryable: bool,
    },

    /// A value could not be serialized or deserialized.
    #[error("cache serialization failed: {message}")]
    Serialization {
        /// Error message.
        message: String,
    },

    /// A payload frame could not be encoded or decoded.
    #[error("cache payload codec failed: {message}")]
    Codec {
        /// Error message.
        message: String,
    },
}

impl CacheError {
    /// Creates a transient backend error.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a permanent backend error.
    #[must_use]
    pub fn backend_permanent(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    #[must_use]
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }
}

impl Retryable for CacheError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend { retryable: true, .. })
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(error: serde_json::Error) -> Self {
        Self::serialization(error.to_string())
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(error: redis::RedisError) -> Self {
        let retryable = error.is_io_error() || error.is_timeout() || error.is_connection_dropped();
        Self::Backend {
            message: error.to_string(),
            retryable,
        }
    }
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_backend_errors_retry() {
        assert!(CacheError::backend("reset").is_retryable());
        assert!(!CacheError::backend_permanent("WRONGTYPE").is_retryable());
        assert!(!CacheError::serialization("eof").is_retryable());
        assert!(!CacheError::codec("bad frame").is_retryable());
    }
}
