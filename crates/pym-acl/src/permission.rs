//! Permission tree snapshot.
//!
//! Granting a permission implies granting all of its ancestors; denying a
//! permission implies denying all of its descendants. With `read` the parent
//! of `write`, granting `write` grants `read`, and denying `read` denies
//! `write`.
//!
//! The tree is materialized once into a [`PermissionSnapshot`] and cached
//! under `permission:load_all` by a [`PermissionLoader`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use pym_core::{CacheRegion, PermissionId};
use pym_storage::{AncestorRow, DescendantRow, PermissionStore};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Name of the permission that stands for every permission.
pub const ALL_PERMISSIONS: &str = "*";

/// Permissions the application relies on.
///
/// ```text
/// *
/// visit
/// +-- read
/// |   +-- write
/// +-- delete
/// +-- admin
///     +-- admin_auth
///     +-- admin_res
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuiltinPermission {
    /// `*`
    All,
    /// `visit`
    Visit,
    /// `read`
    Read,
    /// `write`
    Write,
    /// `delete`
    Delete,
    /// `admin`
    Admin,
    /// `admin_auth`
    AdminAuth,
    /// `admin_res`
    AdminRes,
}

impl BuiltinPermission {
    /// Every builtin, parents before children.
    pub const ALL: [BuiltinPermission; 8] = [
        Self::All,
        Self::Visit,
        Self::Read,
        Self::Write,
        Self::Delete,
        Self::Admin,
        Self::AdminAuth,
        Self::AdminRes,
    ];

    /// Permission name.
    pub fn name(self) -> &'static str {
        match self {
            Self::All => ALL_PERMISSIONS,
            Self::Visit => "visit",
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::Admin => "admin",
            Self::AdminAuth => "admin_auth",
            Self::AdminRes => "admin_res",
        }
    }

    /// Parent in the default tree.
    pub fn parent(self) -> Option<BuiltinPermission> {
        match self {
            Self::All | Self::Visit => None,
            Self::Read | Self::Delete | Self::Admin => Some(Self::Visit),
            Self::Write => Some(Self::Read),
            Self::AdminAuth | Self::AdminRes => Some(Self::Admin),
        }
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// One permission with its relatives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionEntry {
    /// Permission id.
    pub id: PermissionId,
    /// Permission name.
    pub name: String,
    /// Ancestors from immediate parent to root; empty for a topmost
    /// permission.
    pub parents: Vec<(PermissionId, String)>,
    /// The entire descendant subtree, without duplicates, in no particular
    /// order; empty for a leaf.
    pub children: Vec<(PermissionId, String)>,
}

impl PermissionEntry {
    /// Immediate parent.
    pub fn parent(&self) -> Option<PermissionId> {
        self.parents.first().map(|(id, _)| *id)
    }

    /// Whether this permission has no parent.
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// Whether this permission has no children.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// The whole permission tree, addressable by name and by id.
///
/// Entries live in an arena; the two lookup maps hold arena indices.
/// Serializes as the plain list of entries.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(from = "Vec<PermissionEntry>", into = "Vec<PermissionEntry>")]
pub struct PermissionSnapshot {
    entries: Vec<PermissionEntry>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<PermissionId, usize>,
}

impl From<Vec<PermissionEntry>> for PermissionSnapshot {
    fn from(entries: Vec<PermissionEntry>) -> Self {
        let by_name = entries
            .iter()
            .enumerate()
            .map(|(ix, e)| (e.name.clone(), ix))
            .collect();
        let by_id = entries.iter().enumerate().map(|(ix, e)| (e.id, ix)).collect();
        Self {
            entries,
            by_name,
            by_id,
        }
    }
}

impl From<PermissionSnapshot> for Vec<PermissionEntry> {
    fn from(snapshot: PermissionSnapshot) -> Self {
        snapshot.entries
    }
}

impl PermissionSnapshot {
    /// Merge the ancestor rows and descendant rows of a store.
    ///
    /// Permissions missing from `children` are leaves. Descendant lists are
    /// de-duplicated, since a permission may appear in several rows.
    pub fn from_rows(parents: Vec<AncestorRow>, children: Vec<DescendantRow>) -> Self {
        let mut snapshot: Self = parents
            .into_iter()
            .map(|row| PermissionEntry {
                id: row.id,
                name: row.name,
                parents: row.parents,
                children: Vec::new(),
            })
            .collect::<Vec<_>>()
            .into();

        let mut seen: HashMap<usize, HashSet<PermissionId>> = HashMap::new();
        for row in children {
            let Some(&ix) = snapshot.by_id.get(&row.id) else {
                log::warn!("Descendant row for unknown permission {} ignored", row.id);
                continue;
            };
            let ids = seen.entry(ix).or_default();
            let entry = &mut snapshot.entries[ix];
            for child in row.children {
                if ids.insert(child.0) {
                    entry.children.push(child);
                }
            }
        }
        snapshot
    }

    /// Number of permissions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the tree is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up by id.
    pub fn get(&self, id: PermissionId) -> Option<&PermissionEntry> {
        self.by_id.get(&id).map(|&ix| &self.entries[ix])
    }

    /// Look up by name.
    pub fn by_name(&self, name: &str) -> Option<&PermissionEntry> {
        self.by_name.get(name).map(|&ix| &self.entries[ix])
    }

    /// Look up by name, failing for an unknown name.
    pub fn require(&self, name: &str) -> Result<&PermissionEntry> {
        self.by_name(name)
            .ok_or_else(|| Error::unknown_permission(name))
    }

    /// All entries, in store order.
    pub fn iter(&self) -> impl Iterator<Item = &PermissionEntry> {
        self.entries.iter()
    }

    /// Topmost permissions.
    pub fn roots(&self) -> impl Iterator<Item = &PermissionEntry> {
        self.entries.iter().filter(|e| e.is_root())
    }

    /// Permissions whose immediate parent is `id`.
    pub fn direct_children(&self, id: PermissionId) -> impl Iterator<Item = &PermissionEntry> {
        self.entries.iter().filter(move |e| e.parent() == Some(id))
    }

    fn is_all(&self, id: PermissionId) -> bool {
        self.get(id).is_some_and(|e| e.name == ALL_PERMISSIONS)
    }

    /// Whether granting `granted` grants `requested`: the same permission,
    /// one of its ancestors, or anything if `granted` is `*`.
    pub fn grant_covers(&self, granted: PermissionId, requested: PermissionId) -> bool {
        granted == requested
            || self.is_all(granted)
            || self
                .get(granted)
                .is_some_and(|e| e.parents.iter().any(|(id, _)| *id == requested))
    }

    /// Whether denying `denied` denies `requested`: the same permission, one
    /// of its descendants, or anything if `denied` is `*`.
    pub fn deny_covers(&self, denied: PermissionId, requested: PermissionId) -> bool {
        denied == requested
            || self.is_all(denied)
            || self
                .get(denied)
                .is_some_and(|e| e.children.iter().any(|(id, _)| *id == requested))
    }
}

// ============================================================================
// Loader
// ============================================================================

const LOAD_ALL_KEY: &str = "load_all";

/// Read-through cache of the permission snapshot.
///
/// Every mutation of the permission tree must be followed by
/// [`invalidate`](Self::invalidate).
#[derive(Clone)]
pub struct PermissionLoader {
    store: Arc<dyn PermissionStore>,
    cache: CacheRegion,
}

impl PermissionLoader {
    /// Cache namespace.
    pub const NAMESPACE: &'static str = "permission";

    /// Create a loader. `cache` must use [`Self::NAMESPACE`] unless several
    /// permission trees share a backend.
    pub fn new(store: Arc<dyn PermissionStore>, cache: CacheRegion) -> Self {
        Self { store, cache }
    }

    /// The complete snapshot, from cache or freshly merged from the store.
    pub async fn load_all(&self) -> Result<PermissionSnapshot> {
        self.cache
            .get_or_create(LOAD_ALL_KEY, move || async move {
                let parents = self.store.permissions_with_parents().await?;
                let children = self.store.permissions_with_children().await?;
                let snapshot = PermissionSnapshot::from_rows(parents, children);
                log::debug!("Loaded permission tree with {} entries", snapshot.len());
                Ok::<_, Error>(snapshot)
            })
            .await
    }

    /// Drop the cached snapshot.
    pub async fn invalidate(&self) -> Result<()> {
        self.cache.delete(LOAD_ALL_KEY).await?;
        Ok(())
    }
}

impl std::fmt::Debug for PermissionLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionLoader")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
