//! Error types for pym-storage

use thiserror::Error;

/// Result type alias for pym-storage operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in pym-storage
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Error from pym-core
    #[error("Core error: {0}")]
    Core(#[from] pym_core::Error),

    /// A referenced record does not exist.
    #[error("{entity} not found: {key}")]
    NotFound {
        /// Kind of record ("user", "group", ...)
        entity: &'static str,
        /// Id or name that was looked up
        key: String,
    },

    /// A uniqueness constraint would be violated.
    #[error("Duplicate {entity}: {key}")]
    Duplicate {
        /// Kind of record
        entity: &'static str,
        /// Conflicting key
        key: String,
    },

    /// The record violates a structural invariant (cycle, malformed field).
    #[error("Invalid {entity}: {message}")]
    Invalid {
        /// Kind of record
        entity: &'static str,
        /// What is wrong
        message: String,
    },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Creates a new not-found error.
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Error::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Creates a new duplicate error.
    pub fn duplicate(entity: &'static str, key: impl ToString) -> Self {
        Error::Duplicate {
            entity,
            key: key.to_string(),
        }
    }

    /// Creates a new invalid-record error.
    pub fn invalid(entity: &'static str, message: impl Into<String>) -> Self {
        Error::Invalid {
            entity,
            message: message.into(),
        }
    }

    /// Whether the caller supplied bad input, as opposed to a backend failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::NotFound { .. } | Error::Duplicate { .. } | Error::Invalid { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = Error::not_found("group", 7);
        assert_eq!(err.to_string(), "group not found: 7");
        assert!(err.is_client_error());
    }

    #[test]
    fn test_duplicate_display() {
        let err = Error::duplicate("user", "alice");
        assert_eq!(err.to_string(), "Duplicate user: alice");
    }

    #[test]
    fn test_core_error_is_not_client_error() {
        let err: Error = pym_core::Error::cache("down").into();
        assert!(!err.is_client_error());
    }
}
