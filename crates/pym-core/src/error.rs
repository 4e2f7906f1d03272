//! Error types for pym-core

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias for pym-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in pym-core
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Cache backend failure (connection lost, command rejected, ...).
    #[error("Cache error: {message}")]
    Cache {
        /// What went wrong
        message: String,
        /// Source error if available
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// What configuration is problematic
        message: String,
    },

    /// A path failed the safety check.
    #[error("Unsafe path '{path}': {reason}")]
    UnsafePath {
        /// Offending path
        path: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// I/O error with the path it happened on.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// Path of the failed operation
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Creates a new cache error.
    pub fn cache<S: Into<String>>(message: S) -> Self {
        Error::Cache {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new cache error with a source error.
    pub fn cache_with_source<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Cache {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new configuration error.
    pub fn config<S: Into<String>>(message: S) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    /// Creates a new unsafe path error.
    pub fn unsafe_path<S: Into<String>>(path: S, reason: &'static str) -> Self {
        Error::UnsafePath {
            path: path.into(),
            reason,
        }
    }

    /// Wraps an I/O error together with the path it occurred on.
    pub fn io_with_path(source: std::io::Error, path: &Path) -> Self {
        Error::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
