//! Cache service shared by the permission and group resolvers.
//!
//! The cache is an explicitly constructed object, handed to every component
//! that needs it. Components never reach for ambient global state.
//!
//! - [`CacheBackend`]: byte-oriented storage (process memory, Redis, ...)
//! - [`CacheRegion`]: a namespaced, typed, read-through view over a backend
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use pym_core::cache::{CacheRegion, MemoryCache};
//!
//! # tokio_test::block_on(async {
//! let region = CacheRegion::new(Arc::new(MemoryCache::new()), "auth");
//! let v: u32 = region
//!     .get_or_create("answer", || async { Ok::<_, pym_core::Error>(42) })
//!     .await
//!     .unwrap();
//! assert_eq!(v, 42);
//! # });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;

use crate::{Error, Result};

// ============================================================================
// CacheBackend
// ============================================================================

/// Storage behind a cache region.
///
/// Values are opaque bytes; encoding is the region's concern. Implementations
/// must be safe to share across request handlers.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch a value, `None` on a miss.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a value, replacing any previous one.
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove a value. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Short name of the backend, used in log lines.
    fn name(&self) -> &str;
}

/// Process-local cache backend.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ============================================================================
// CacheRegion
// ============================================================================

/// Namespaced, typed view over a [`CacheBackend`].
///
/// Keys are stored as `<namespace>:<key>`. Values are JSON encoded.
#[derive(Clone)]
pub struct CacheRegion {
    backend: Arc<dyn CacheBackend>,
    namespace: String,
}

impl CacheRegion {
    /// Create a region over the given backend.
    pub fn new(backend: Arc<dyn CacheBackend>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
        }
    }

    /// The region's namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Full backend key for a region-local key.
    pub fn full_key(&self, key: &str) -> String {
        format!("{}:{key}", self.namespace)
    }

    /// Read a value. A corrupt entry is logged and reported as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let full_key = self.full_key(key);
        let Some(bytes) = self.backend.get(&full_key).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                log::warn!(
                    "Discarding corrupt {} cache entry '{full_key}': {e}",
                    self.backend.name()
                );
                Ok(None)
            }
        }
    }

    /// Store a value.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.backend.set(&self.full_key(key), bytes).await
    }

    /// Remove a value.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let full_key = self.full_key(key);
        log::debug!("Invalidating cache entry '{full_key}'");
        self.backend.delete(&full_key).await
    }

    /// Read-through lookup: return the cached value, or call `creator` once,
    /// store its result, and return it.
    ///
    /// Concurrent misses may each run `creator`; the last write wins. The
    /// creator's error is returned as-is and nothing is cached.
    pub async fn get_or_create<T, E, F, Fut>(
        &self,
        key: &str,
        creator: F,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<Error>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }
        log::debug!("Cache miss for '{}'", self.full_key(key));
        let value = creator().await?;
        self.set(key, &value).await?;
        Ok(value)
    }
}

impl std::fmt::Debug for CacheRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegion")
            .field("backend", &self.backend.name())
            .field("namespace", &self.namespace)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
