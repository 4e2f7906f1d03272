//! Filesystem node tree with inherited quota settings.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. Each node maps to
//! an ACL resource, so a node's lineage (itself, then its ancestors) is what
//! the upload sentry hands to the permission checker.

use std::collections::BTreeMap;
use std::fmt;

use pym_core::ResourceId;
use pym_core::paths::is_path_safe;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, UploadError};

/// Index of a node in an [`FsTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    /// Position in the arena.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Directory or file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// May have children.
    Directory,
    /// Leaf with content.
    File,
}

/// Quota settings of a node. Unset keys are inherited from the nearest
/// ancestor that sets them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaRc {
    /// Existing content may only be revised, never updated in place.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_revision: Option<bool>,
    /// Largest single file in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
    /// Largest total size of the filesystem in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_total_size: Option<u64>,
    /// Most items in the filesystem; negative means unlimited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_total_items: Option<i64>,
    /// Mime-type patterns a file must match one of.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_mimes: Option<Vec<String>>,
    /// Mime-type patterns a file must match none of.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denied_mimes: Option<Vec<String>>,
}

/// A directory or file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsNode {
    /// ACL resource of this node.
    pub resource_id: ResourceId,
    /// Name within the parent.
    pub name: String,
    /// Containing directory; `None` for the root.
    pub parent: Option<NodeId>,
    /// Directory or file.
    pub kind: NodeKind,
    /// Content size in bytes; 0 for directories.
    pub size: u64,
    /// Quota settings defined on this node.
    pub rc: Option<QuotaRc>,
    children: BTreeMap<String, NodeId>,
}

impl FsNode {
    /// Child ids ordered by name.
    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.values().copied()
    }
}

/// Arena of [`FsNode`]s with a single root directory.
#[derive(Debug, Clone)]
pub struct FsTree {
    nodes: Vec<FsNode>,
}

impl FsTree {
    /// Create a tree whose root directory carries `rc`.
    pub fn new(resource_id: ResourceId, name: impl Into<String>, rc: QuotaRc) -> Self {
        Self {
            nodes: vec![FsNode {
                resource_id,
                name: name.into(),
                parent: None,
                kind: NodeKind::Directory,
                size: 0,
                rc: Some(rc),
                children: BTreeMap::new(),
            }],
        }
    }

    /// The root directory.
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Number of nodes including the root.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false; the root exists.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node by id.
    pub fn get(&self, id: NodeId) -> Option<&FsNode> {
        self.nodes.get(id.0)
    }

    /// Node by id, or an error.
    pub fn node(&self, id: NodeId) -> Result<&FsNode> {
        self.get(id).ok_or(Error::UnknownNode(id.0))
    }

    /// Child of `parent` named `name`.
    pub fn child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.get(parent)?.children.get(name).copied()
    }

    /// Add a directory below `parent`.
    pub fn add_directory(
        &mut self,
        parent: NodeId,
        resource_id: ResourceId,
        name: &str,
        rc: Option<QuotaRc>,
    ) -> Result<NodeId> {
        self.insert(parent, resource_id, name, NodeKind::Directory, 0, rc)
    }

    /// Add a file of `size` bytes below `parent`.
    pub fn add_file(
        &mut self,
        parent: NodeId,
        resource_id: ResourceId,
        name: &str,
        size: u64,
    ) -> Result<NodeId> {
        self.insert(parent, resource_id, name, NodeKind::File, size, None)
    }

    fn insert(
        &mut self,
        parent: NodeId,
        resource_id: ResourceId,
        name: &str,
        kind: NodeKind,
        size: u64,
        rc: Option<QuotaRc>,
    ) -> Result<NodeId> {
        if name.contains('/') {
            return Err(pym_core::Error::unsafe_path(name, "node name contains a separator").into());
        }
        is_path_safe(name)?;
        let id = NodeId(self.nodes.len());
        let parent_node = self
            .nodes
            .get_mut(parent.0)
            .ok_or(Error::UnknownNode(parent.0))?;
        if parent_node.kind != NodeKind::Directory {
            return Err(Error::NotADirectory(parent.0));
        }
        if parent_node.children.contains_key(name) {
            return Err(Error::DuplicateNode {
                parent: parent.0,
                name: name.to_string(),
            });
        }
        parent_node.children.insert(name.to_string(), id);
        self.nodes.push(FsNode {
            resource_id,
            name: name.to_string(),
            parent: Some(parent),
            kind,
            size,
            rc,
            children: BTreeMap::new(),
        });
        Ok(id)
    }

    /// Replace the quota settings of a node.
    pub fn set_rc(&mut self, id: NodeId, rc: Option<QuotaRc>) -> Result<()> {
        let node = self.nodes.get_mut(id.0).ok_or(Error::UnknownNode(id.0))?;
        node.rc = rc;
        Ok(())
    }

    /// `id` followed by its ancestors up to the root.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.get(id).map(|_| id), move |n| {
            self.get(*n).and_then(|node| node.parent)
        })
    }

    /// ACL resources of `id` and its ancestors, nearest first.
    pub fn lineage(&self, id: NodeId) -> Vec<ResourceId> {
        self.ancestors(id)
            .filter_map(|n| self.get(n))
            .map(|n| n.resource_id)
            .collect()
    }

    /// Root of the filesystem containing `id`.
    pub fn fs_root(&self, id: NodeId) -> NodeId {
        self.ancestors(id).last().unwrap_or(id)
    }

    /// Nodes below `id`, depth first.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = match self.get(id) {
            Some(node) => node.children().collect(),
            None => return out,
        };
        while let Some(n) = stack.pop() {
            out.push(n);
            if let Some(node) = self.get(n) {
                stack.extend(node.children());
            }
        }
        out
    }

    /// Total content size of the filesystem containing `id`, computed now.
    pub fn fs_total_size(&self, id: NodeId) -> u64 {
        self.descendants(self.fs_root(id))
            .into_iter()
            .filter_map(|n| self.get(n))
            .map(|n| n.size)
            .sum()
    }

    /// Number of nodes in the filesystem containing `id`, root excluded,
    /// computed now.
    pub fn fs_total_items(&self, id: NodeId) -> usize {
        self.descendants(self.fs_root(id)).len()
    }

    /// First value of a quota setting found walking from `id` to the root.
    ///
    /// Absence anywhere in the chain is a configuration error.
    pub fn quota<T>(
        &self,
        id: NodeId,
        key: &str,
        pick: impl Fn(&QuotaRc) -> Option<T>,
    ) -> std::result::Result<T, UploadError> {
        self.ancestors(id)
            .filter_map(|n| self.get(n)?.rc.as_ref())
            .find_map(&pick)
            .ok_or_else(|| UploadError::configuration(key))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn tree() -> (FsTree, NodeId, NodeId) {
        let mut tree = FsTree::new(
            ResourceId(100),
            "fs",
            QuotaRc {
                max_size: Some(1000),
                force_revision: Some(false),
                ..Default::default()
            },
        );
        let docs = tree
            .add_directory(
                tree.root(),
                ResourceId(101),
                "docs",
                Some(QuotaRc {
                    max_size: Some(10),
                    ..Default::default()
                }),
            )
            .unwrap();
        let deep = tree.add_directory(docs, ResourceId(102), "deep", None).unwrap();
        tree.add_file(deep, ResourceId(103), "a.txt", 7).unwrap();
        tree.add_file(tree.root(), ResourceId(104), "b.txt", 5).unwrap();
        (tree, docs, deep)
    }

    #[test]
    fn test_quota_nearest_ancestor_wins() {
        let (tree, docs, deep) = tree();
        assert_eq!(tree.quota(deep, "max_size", |rc| rc.max_size), Ok(10));
        assert_eq!(tree.quota(docs, "max_size", |rc| rc.max_size), Ok(10));
        assert_eq!(tree.quota(tree.root(), "max_size", |rc| rc.max_size), Ok(1000));
        assert_eq!(
            tree.quota(deep, "force_revision", |rc| rc.force_revision),
            Ok(false)
        );
    }

    #[test]
    fn test_quota_undefined_is_configuration_error() {
        let (tree, _, deep) = tree();
        let err = tree
            .quota(deep, "max_total_size", |rc| rc.max_total_size)
            .unwrap_err();
        assert_eq!(err, UploadError::configuration("max_total_size"));
        assert!(err.is_operator_error());
    }

    #[test]
    fn test_lineage_and_totals() {
        let (tree, _, deep) = tree();
        assert_eq!(
            tree.lineage(deep),
            vec![ResourceId(102), ResourceId(101), ResourceId(100)]
        );
        assert_eq!(tree.fs_root(deep), tree.root());
        assert_eq!(tree.fs_total_size(deep), 12);
        assert_eq!(tree.fs_total_items(deep), 4);
    }

    #[test]
    fn test_child_lookup_and_duplicates() {
        let (mut tree, docs, deep) = tree();
        assert_eq!(tree.child(tree.root(), "docs"), Some(docs));
        assert_eq!(tree.child(docs, "deep"), Some(deep));
        assert!(tree.child(docs, "nope").is_none());

        let err = tree.add_directory(docs, ResourceId(200), "deep", None).unwrap_err();
        assert!(matches!(err, Error::DuplicateNode { .. }));
    }

    #[test]
    fn test_invalid_inserts() {
        let (mut tree, _, deep) = tree();
        let file = tree.child(deep, "a.txt").unwrap();
        assert!(matches!(
            tree.add_file(file, ResourceId(300), "x", 1),
            Err(Error::NotADirectory(_))
        ));
        assert!(tree.add_file(deep, ResourceId(301), "..", 1).is_err());
        assert!(tree.add_file(deep, ResourceId(302), "a/b", 1).is_err());
    }
}
