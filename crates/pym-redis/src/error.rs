//! Error types for pym-redis.

use thiserror::Error;

/// Result type alias for pym-redis operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in pym-redis.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Error from the Redis client.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Error from pym-core.
    #[error("Core error: {0}")]
    Core(#[from] pym_core::Error),
}

impl From<Error> for pym_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Redis(e) => pym_core::Error::cache_with_source("redis command failed", e),
            Error::Core(e) => e,
        }
    }
}
