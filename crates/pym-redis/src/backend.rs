//! [`CacheBackend`] on Redis.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pym_core::config::{CacheBackendKind, CacheConfig};
use pym_core::{CacheBackend, MemoryCache};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::error::Result;

/// Cache backend that stores entries in Redis.
///
/// The connection manager reconnects on its own; a failed command surfaces
/// as a [`pym_core::Error::Cache`].
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
    prefix: String,
    ttl: Option<Duration>,
}

impl RedisCache {
    /// Connect to `url` (`redis://host:port/db`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        log::info!("Connected to Redis cache at {url}");
        Ok(Self {
            manager,
            prefix: String::new(),
            ttl: None,
        })
    }

    /// Prefix every key, e.g. to share one database between deployments.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Let entries expire; `None` or zero keeps them until deleted.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl.filter(|t| !t.is_zero());
        self
    }

    fn key(&self, key: &str) -> String {
        prefixed(&self.prefix, key)
    }
}

fn prefixed(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}:{key}")
    }
}

/// Whole seconds for `SETEX`, at least one.
fn expiry_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> pym_core::Result<Option<Vec<u8>>> {
        let mut conn = self.manager.clone();
        let value: Option<Vec<u8>> = conn
            .get(self.key(key))
            .await
            .map_err(crate::Error::from)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> pym_core::Result<()> {
        let mut conn = self.manager.clone();
        let key = self.key(key);
        match self.ttl {
            Some(ttl) => conn.set_ex::<_, _, ()>(key, value, expiry_secs(ttl)).await,
            None => conn.set::<_, _, ()>(key, value).await,
        }
        .map_err(crate::Error::from)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> pym_core::Result<()> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(self.key(key))
            .await
            .map_err(crate::Error::from)?;
        Ok(())
    }

    fn name(&self) -> &str {
        "redis"
    }
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("prefix", &self.prefix)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// Build the backend selected by the `[cache]` section.
pub async fn backend_from_config(config: &CacheConfig) -> Result<Arc<dyn CacheBackend>> {
    match config.backend {
        CacheBackendKind::Memory => Ok(Arc::new(MemoryCache::new())),
        CacheBackendKind::Redis => {
            let ttl = Duration::from_secs(config.ttl_secs);
            let cache = RedisCache::connect(&config.redis_url)
                .await?
                .with_ttl(Some(ttl));
            Ok(Arc::new(cache))
        }
    }
}
