//! # pym-redis
//!
//! Redis implementation of [`pym_core::CacheBackend`], so the permission
//! snapshot and group closures can be shared by several processes.
//!
//! ```no_run
//! # async fn demo() -> pym_redis::Result<()> {
//! use std::sync::Arc;
//! use pym_core::CacheRegion;
//! use pym_redis::RedisCache;
//!
//! let backend = RedisCache::connect("redis://127.0.0.1/").await?;
//! let region = CacheRegion::new(Arc::new(backend), "permission");
//! # let _ = region;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![forbid(unsafe_code)]

pub mod backend;
pub mod error;

pub use backend::{RedisCache, backend_from_config};
pub use error::{Error, Result};
