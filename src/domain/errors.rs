//! # Domain Errors
//!
//! Validation failures raised while normalizing caller input.

use thiserror::Error;

/// A single invalid field in caller-supplied input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {message}")]
pub struct ValidationError {
    field: String,
    message: String,
}

impl ValidationError {
    /// Creates a validation error for the given field path (`"to.postal_code"`).
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns the offending field path.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Returns the human-readable reason.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Result type for input validation.
pub type ValidationResult<T> = Result<T, ValidationError>;
