//! Error types for pym-cli

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for pym-cli operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in pym-cli
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Error from pym-core
    #[error(transparent)]
    Core(#[from] pym_core::Error),

    /// Error from the record store
    #[error(transparent)]
    Storage(#[from] pym_storage::Error),

    /// Error from permission, group, or ACL handling
    #[error(transparent)]
    Acl(#[from] pym_acl::Error),

    /// Error from the Redis cache backend
    #[error(transparent)]
    Redis(#[from] pym_redis::Error),

    /// Malformed command input
    #[error("Invalid {what}: {message}")]
    InvalidArgument {
        /// Which argument
        what: &'static str,
        /// What is wrong with it
        message: String,
    },

    /// The data file has not been created yet
    #[error("No data file at {}. Run `pym init` first.", .0.display())]
    MissingData(PathBuf),

    /// Reading from or writing to the terminal failed
    #[error("Terminal I/O failed: {0}")]
    Terminal(#[from] std::io::Error),

    /// Rendering output failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The user declined a confirmation prompt
    #[error("Aborted")]
    Aborted,
}

impl Error {
    /// Creates an invalid argument error.
    pub fn invalid<S: Into<String>>(what: &'static str, message: S) -> Self {
        Error::InvalidArgument {
            what,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = Error::invalid("principal", "expected 'u:<user>'");
        assert_eq!(err.to_string(), "Invalid principal: expected 'u:<user>'");
        let err = Error::MissingData(PathBuf::from("/tmp/d.json"));
        assert!(err.to_string().contains("pym init"));
    }

    #[test]
    fn test_transparent_wraps() {
        let err: Error = pym_core::Error::config("bad").into();
        assert_eq!(err.to_string(), "Configuration error: bad");
    }
}
