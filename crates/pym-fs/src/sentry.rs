//! The quota, permission, and mime-type gate of a destination node.
//!
//! If the file to save does not exist yet, the destination is the directory
//! that will hold it. Otherwise it is the existing file node. Quota and ACL
//! are inherited, so asking the destination is enough in every case.

use pym_acl::{BuiltinPermission, PermissionChecker};
use pym_core::paths::is_path_safe;
use serde::{Deserialize, Serialize};

use crate::error::UploadError;
use crate::mime::MimeFilter;
use crate::tree::{FsTree, NodeId};

/// What saving a file does to its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Add a new child.
    Create,
    /// Overwrite the existing content.
    Update,
    /// Store a new revision of the existing content.
    Revise,
}

impl WriteMode {
    /// Lower-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            WriteMode::Create => "create",
            WriteMode::Update => "update",
            WriteMode::Revise => "revise",
        }
    }
}

impl std::fmt::Display for WriteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata of a file as claimed by the client or derived from the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    /// File name.
    pub filename: String,
    /// Size in bytes.
    pub size: u64,
    /// Mime-type.
    pub mime_type: String,
    /// Content encoding, if known.
    pub encoding: Option<String>,
}

/// Checks uploads against one destination node.
#[derive(Debug, Clone, Copy)]
pub struct Sentry<'t> {
    tree: &'t FsTree,
    dst: NodeId,
}

impl<'t> Sentry<'t> {
    /// Guard `dst`.
    pub fn new(tree: &'t FsTree, dst: NodeId) -> Self {
        Self { tree, dst }
    }

    /// The guarded node.
    pub fn dst(&self) -> NodeId {
        self.dst
    }

    // ------------------------------------------------------------------------
    // Inherited quota
    // ------------------------------------------------------------------------

    /// Whether updates are refused in favour of revisions.
    pub fn force_revision(&self) -> Result<bool, UploadError> {
        self.tree
            .quota(self.dst, "force_revision", |rc| rc.force_revision)
    }

    /// Largest single file in bytes.
    pub fn max_size(&self) -> Result<u64, UploadError> {
        self.tree.quota(self.dst, "max_size", |rc| rc.max_size)
    }

    /// Largest filesystem size in bytes.
    pub fn max_total_size(&self) -> Result<u64, UploadError> {
        self.tree
            .quota(self.dst, "max_total_size", |rc| rc.max_total_size)
    }

    /// Most items in the filesystem, `None` if unlimited.
    pub fn max_total_items(&self) -> Result<Option<u64>, UploadError> {
        let v = self
            .tree
            .quota(self.dst, "max_total_items", |rc| rc.max_total_items)?;
        Ok(u64::try_from(v).ok())
    }

    /// Compiled mime-type allow and deny lists.
    pub fn mime_filter(&self) -> Result<MimeFilter, UploadError> {
        let allowed = self
            .tree
            .quota(self.dst, "allowed_mimes", |rc| rc.allowed_mimes.clone())?;
        let denied = self
            .tree
            .quota(self.dst, "denied_mimes", |rc| rc.denied_mimes.clone())?;
        MimeFilter::new(allowed.as_slice(), denied.as_slice())
    }

    // ------------------------------------------------------------------------
    // Checks
    // ------------------------------------------------------------------------

    /// The file name cannot escape its directory.
    pub fn check_filename(&self, filename: &str) -> Result<(), UploadError> {
        is_path_safe(filename).map_err(|e| UploadError::validation(e.to_string()))
    }

    /// Single-file and filesystem size limits. Totals are computed now.
    pub fn check_size(&self, size: u64) -> Result<(), UploadError> {
        if size > self.max_size()? {
            return Err(UploadError::permission("File is too large"));
        }
        let total = size.saturating_add(self.tree.fs_total_size(self.dst));
        if total > self.max_total_size()? {
            return Err(UploadError::permission("File exceeds capacity of filesystem"));
        }
        Ok(())
    }

    /// Room for one more item.
    pub fn check_total_items(&self) -> Result<(), UploadError> {
        let Some(max) = self.max_total_items()? else {
            return Ok(());
        };
        let count = self.tree.fs_total_items(self.dst) as u64;
        if count + 1 > max {
            return Err(UploadError::permission("Filesystem is full"));
        }
        Ok(())
    }

    /// Allowed and not denied.
    pub fn check_mime_type(&self, mime_type: &str) -> Result<(), UploadError> {
        self.mime_filter()?.check(mime_type)
    }

    /// Name, sizes, and item count; the claimed mime-type is not trusted
    /// here.
    pub fn check_client_meta(&self, meta: &FileMeta) -> Result<(), UploadError> {
        self.check_filename(&meta.filename)?;
        self.check_size(meta.size)?;
        self.check_total_items()
    }

    /// Every check including the mime-type.
    pub fn check_file_meta(&self, meta: &FileMeta) -> Result<(), UploadError> {
        self.check_client_meta(meta)?;
        self.check_mime_type(&meta.mime_type)
    }

    /// Whether `mode` is permitted on the destination.
    ///
    /// All modes need `write` on the node or the nearest ancestor with a
    /// matching entry; `update` is also refused under `force_revision`.
    pub fn check_permission(
        &self,
        checker: &dyn PermissionChecker,
        mode: WriteMode,
    ) -> Result<(), UploadError> {
        let lineage = self.tree.lineage(self.dst);
        let write = BuiltinPermission::Write.name();
        if !checker.has_permission(&lineage, write) {
            return Err(UploadError::permission(format!(
                "Permission denied to {mode}"
            )));
        }
        if mode == WriteMode::Update && self.force_revision()? {
            return Err(UploadError::permission(
                "Permission denied to update, content must be revised",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::tree::QuotaRc;
    use pym_core::ResourceId;
    use std::collections::HashSet;

    struct Grants(HashSet<ResourceId>);

    impl PermissionChecker for Grants {
        fn has_permission(&self, lineage: &[ResourceId], permission: &str) -> bool {
            permission == "write" && lineage.iter().any(|r| self.0.contains(r))
        }
    }

    fn root_rc() -> QuotaRc {
        QuotaRc {
            force_revision: Some(false),
            max_size: Some(10_000_000),
            max_total_size: Some(50_000_000),
            max_total_items: Some(-1),
            allowed_mimes: Some(vec!["*/*".into()]),
            denied_mimes: Some(vec!["application/x-executable".into()]),
        }
    }

    fn tree() -> (FsTree, NodeId, NodeId) {
        let mut tree = FsTree::new(ResourceId(1), "fs", root_rc());
        let locked = tree
            .add_directory(
                tree.root(),
                ResourceId(2),
                "locked",
                Some(QuotaRc {
                    force_revision: Some(true),
                    ..Default::default()
                }),
            )
            .unwrap();
        let file = tree.add_file(locked, ResourceId(3), "a.txt", 100).unwrap();
        (tree, locked, file)
    }

    fn meta(name: &str, size: u64, mime: &str) -> FileMeta {
        FileMeta {
            filename: name.into(),
            size,
            mime_type: mime.into(),
            encoding: None,
        }
    }

    #[test]
    fn test_traversal_is_validation_error() {
        let (tree, _, _) = tree();
        let err = Sentry::new(&tree, tree.root())
            .check_client_meta(&meta("../../etc/passwd", 1, "text/plain"))
            .unwrap_err();
        assert!(matches!(err, UploadError::Validation(_)));
    }

    #[test]
    fn test_too_large_is_permission_error() {
        let (tree, _, _) = tree();
        let err = Sentry::new(&tree, tree.root())
            .check_file_meta(&meta("big.bin", 11_000_000, "text/plain"))
            .unwrap_err();
        assert_eq!(err, UploadError::permission("File is too large"));
    }

    #[test]
    fn test_total_size_counts_existing_files() {
        let (mut tree, _, _) = tree();
        tree.add_file(tree.root(), ResourceId(9), "huge", 45_000_000).unwrap();
        let sentry = Sentry::new(&tree, tree.root());
        assert!(sentry.check_size(4_000_000).is_ok());
        assert_eq!(
            sentry.check_size(6_000_000).unwrap_err(),
            UploadError::permission("File exceeds capacity of filesystem")
        );
    }

    #[test]
    fn test_item_limit() {
        let (mut tree, _, _) = tree();
        let mut rc = root_rc();
        rc.max_total_items = Some(2);
        tree.set_rc(tree.root(), Some(rc)).unwrap();
        let sentry = Sentry::new(&tree, tree.root());
        assert_eq!(
            sentry.check_total_items().unwrap_err(),
            UploadError::permission("Filesystem is full")
        );
    }

    #[test]
    fn test_client_meta_ignores_mime_but_file_meta_does_not() {
        let (tree, _, _) = tree();
        let sentry = Sentry::new(&tree, tree.root());
        let m = meta("a.out", 10, "application/x-executable");
        assert!(sentry.check_client_meta(&m).is_ok());
        assert_eq!(
            sentry.check_file_meta(&m).unwrap_err(),
            UploadError::permission("Mime-type not allowed")
        );
    }

    #[test]
    fn test_missing_quota_is_configuration_error() {
        let mut tree = FsTree::new(ResourceId(1), "fs", QuotaRc::default());
        let dir = tree.add_directory(tree.root(), ResourceId(2), "d", None).unwrap();
        let err = Sentry::new(&tree, dir).check_size(1).unwrap_err();
        assert_eq!(err, UploadError::configuration("max_size"));
    }

    #[test]
    fn test_permission_inherited_through_lineage() {
        let (tree, locked, file) = tree();
        let grants = Grants(HashSet::from([ResourceId(1)]));
        let sentry = Sentry::new(&tree, locked);
        assert!(sentry.check_permission(&grants, WriteMode::Create).is_ok());

        let nobody = Grants(HashSet::new());
        assert!(sentry.check_permission(&nobody, WriteMode::Create).is_err());

        let sentry = Sentry::new(&tree, file);
        assert!(sentry.check_permission(&grants, WriteMode::Revise).is_ok());
    }

    #[test]
    fn test_force_revision_blocks_update() {
        let (tree, _, file) = tree();
        let grants = Grants(HashSet::from([ResourceId(1)]));
        let sentry = Sentry::new(&tree, file);
        assert!(sentry.check_permission(&grants, WriteMode::Update).is_err());
        assert!(sentry.check_permission(&grants, WriteMode::Revise).is_ok());
    }
}
