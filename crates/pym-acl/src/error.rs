//! Error types for pym-acl

use thiserror::Error;

/// Result type alias for pym-acl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in pym-acl
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Error from pym-core (cache, config)
    #[error("Core error: {0}")]
    Core(#[from] pym_core::Error),

    /// Error from the record store
    #[error("Storage error: {0}")]
    Storage(#[from] pym_storage::Error),

    /// A permission name that is not in the permission tree.
    #[error("Unknown permission: {0}")]
    UnknownPermission(String),
}

impl Error {
    /// Creates a new unknown-permission error.
    pub fn unknown_permission(name: impl Into<String>) -> Self {
        Error::UnknownPermission(name.into())
    }

    /// Whether the caller supplied bad input, as opposed to a backend failure.
    pub fn is_client_error(&self) -> bool {
        match self {
            Error::UnknownPermission(_) => true,
            Error::Storage(e) => e.is_client_error(),
            Error::Core(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_permission() {
        let err = Error::unknown_permission("fly");
        assert_eq!(err.to_string(), "Unknown permission: fly");
        assert!(err.is_client_error());
    }

    #[test]
    fn test_storage_classification_passes_through() {
        let err: Error = pym_storage::Error::not_found("group", 1).into();
        assert!(err.is_client_error());
        let err: Error = pym_core::Error::cache("down").into();
        assert!(!err.is_client_error());
    }
}
