//! Stores, caches, and managers behind one CLI invocation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pym_acl::{
    AclManager, AclResolver, GroupManager, GroupResolver, PermissionLoader, PermissionManager,
};
use pym_core::{CacheRegion, PymConfig};
use pym_storage::MemoryStore;

use crate::{Error, Result};

/// Everything a command needs: configuration, the directory data, and the
/// managers wired to a shared cache backend.
pub struct App {
    config: PymConfig,
    data_path: PathBuf,
    store: Arc<MemoryStore>,
    permissions: PermissionManager,
    groups: GroupManager,
    acl: AclManager,
}

impl App {
    /// `<data dir>/pym/directory.json`.
    pub fn default_data_path() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("pym").join("directory.json"))
    }

    /// Open an existing data file.
    pub async fn open(config: PymConfig, data_path: PathBuf) -> Result<Self> {
        if !data_path.exists() {
            return Err(Error::MissingData(data_path));
        }
        let store = MemoryStore::load_json(&data_path)?;
        Self::build(config, data_path, store).await
    }

    /// Start with an empty store that will be written to `data_path`.
    pub async fn empty(config: PymConfig, data_path: PathBuf) -> Result<Self> {
        Self::build(config, data_path, MemoryStore::new()).await
    }

    async fn build(config: PymConfig, data_path: PathBuf, store: MemoryStore) -> Result<Self> {
        let store = Arc::new(store);
        let backend = pym_redis::backend_from_config(&config.cache).await?;
        log::debug!("Using cache backend '{}'", backend.name());

        let loader = PermissionLoader::new(
            store.clone(),
            CacheRegion::new(backend.clone(), PermissionLoader::NAMESPACE),
        );
        let group_resolver = GroupResolver::new(
            store.clone(),
            CacheRegion::new(backend, GroupResolver::NAMESPACE),
        );
        let permissions = PermissionManager::new(store.clone(), loader.clone());
        let groups = GroupManager::new(store.clone(), store.clone(), group_resolver);
        let acl = AclManager::new(store.clone(), AclResolver::new(store.clone(), loader))
            .with_default_sortix(config.acl.default_sortix);

        Ok(Self {
            config,
            data_path,
            store,
            permissions,
            groups,
            acl,
        })
    }

    /// Write the store back to the data file.
    pub async fn save(&self) -> Result<()> {
        if let Some(parent) = self.data_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| pym_core::Error::io_with_path(e, parent))?;
        }
        self.store.save_json(&self.data_path).await?;
        log::debug!("Saved {}", self.data_path.display());
        Ok(())
    }

    /// Loaded configuration.
    pub fn config(&self) -> &PymConfig {
        &self.config
    }

    /// Data file location.
    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Record store.
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Permission tree edits.
    pub fn permissions(&self) -> &PermissionManager {
        &self.permissions
    }

    /// Group and membership edits.
    pub fn groups(&self) -> &GroupManager {
        &self.groups
    }

    /// ACE edits and checks.
    pub fn acl(&self) -> &AclManager {
        &self.acl
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("data_path", &self.data_path)
            .field("acl", &self.acl)
            .finish_non_exhaustive()
    }
}
