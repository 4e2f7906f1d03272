//! Error types for pym-fs.
//!
//! Two layers: [`Error`] is returned by tree and cache operations, and
//! [`UploadError`] is the per-file outcome recorded by the upload pipeline.
//! An upload batch never fails as a whole because of one file.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias for pym-fs operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in pym-fs.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Error from pym-core (unsafe paths, configuration).
    #[error("Core error: {0}")]
    Core(#[from] pym_core::Error),

    /// I/O error with the path it happened on.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// Path of the failed operation
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A cache file with this name already exists.
    #[error("Cache file exists: {}", .0.display())]
    Exists(PathBuf),

    /// Cache file names must be bare base names.
    #[error("Invalid cache file name '{0}'")]
    InvalidCacheName(String),

    /// No upload with this key was added.
    #[error("Unknown upload key '{0}'")]
    UnknownFile(String),

    /// No node with this id in the tree.
    #[error("Unknown node {0}")]
    UnknownNode(usize),

    /// A sibling with this name exists already.
    #[error("Node '{name}' already exists below node {parent}")]
    DuplicateNode {
        /// Parent node
        parent: usize,
        /// Conflicting name
        name: String,
    },

    /// Files cannot have children.
    #[error("Node {0} is not a directory")]
    NotADirectory(usize),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Wraps an I/O error together with the path it occurred on.
    pub fn io(source: std::io::Error, path: &Path) -> Self {
        Error::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Why a single uploaded file was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum UploadError {
    /// Malformed input, e.g. an unsafe file name.
    #[error("{0}")]
    Validation(String),

    /// Denied by ACL, quota, or mime-type rules.
    #[error("{0}")]
    Permission(String),

    /// A quota setting is not defined on the node or any ancestor.
    #[error("No quota setting '{0}' found")]
    Configuration(String),

    /// Writing to the staging cache failed.
    #[error("Cache error: {0}")]
    Storage(String),
}

impl UploadError {
    /// Creates a validation error.
    pub fn validation<S: Into<String>>(message: S) -> Self {
        UploadError::Validation(message.into())
    }

    /// Creates a permission error.
    pub fn permission<S: Into<String>>(message: S) -> Self {
        UploadError::Permission(message.into())
    }

    /// Creates a configuration error for a missing quota key.
    pub fn configuration<S: Into<String>>(key: S) -> Self {
        UploadError::Configuration(key.into())
    }

    /// Whether an operator has to fix something, as opposed to the end user.
    pub fn is_operator_error(&self) -> bool {
        matches!(self, UploadError::Configuration(_) | UploadError::Storage(_))
    }
}

impl From<Error> for UploadError {
    fn from(err: Error) -> Self {
        match err {
            Error::Core(e @ pym_core::Error::UnsafePath { .. }) => {
                UploadError::Validation(e.to_string())
            }
            Error::InvalidCacheName(_) => UploadError::Validation(err.to_string()),
            other => UploadError::Storage(other.to_string()),
        }
    }
}
