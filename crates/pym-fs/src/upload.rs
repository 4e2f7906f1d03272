//! The upload pipeline.
//!
//! Files pass five stages, each a filter: a file rejected by one stage is
//! skipped by all later stages but stays in the batch with its reason.
//!
//! 1. [`Uploader::check_client_meta`]: the client's name and sizes
//! 2. [`Uploader::check_permissions`]: create, or update and revise
//! 3. [`Uploader::attach_buffer`]: sizes again, against the real content
//! 4. [`Uploader::save_to_cache`]: content and sidecar to the staging cache
//! 5. [`Uploader::check_cache_meta`]: everything again, against metadata
//!    derived from the cached bytes
//!
//! Saving accepted files for good is up to the caller.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Seek, SeekFrom};

use pym_acl::PermissionChecker;
use serde::{Deserialize, Serialize};

use crate::cache::UploadCache;
use crate::error::{Error, Result, UploadError};
use crate::mime::MIME_TYPE_UNKNOWN;
use crate::sentry::{FileMeta, Sentry, WriteMode};
use crate::tree::{FsTree, NodeId};

/// A file announced by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadCandidate {
    /// Client's identifier of the file within the batch.
    pub key: String,
    /// File name.
    pub filename: String,
    /// Claimed size in bytes.
    pub size: u64,
    /// Claimed mime-type.
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Claimed encoding.
    #[serde(default)]
    pub encoding: Option<String>,
}

/// Which write modes passed the permission stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WritePermissions {
    /// May be added as a new child.
    pub create: bool,
    /// May overwrite the existing node.
    pub update: bool,
    /// May add a revision to the existing node.
    pub revise: bool,
}

impl WritePermissions {
    fn set(&mut self, mode: WriteMode, allowed: bool) {
        match mode {
            WriteMode::Create => self.create = allowed,
            WriteMode::Update => self.update = allowed,
            WriteMode::Revise => self.revise = allowed,
        }
    }
}

/// Reported state of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileState {
    /// Passed every stage so far.
    pub ok: bool,
    /// A node with this name exists at the destination.
    pub exists: bool,
    /// Outcome of the permission stage.
    pub permissions: WritePermissions,
    /// Why the file was rejected.
    pub validation_msg: Option<String>,
}

/// One file moving through the pipeline.
pub struct UploadedFile {
    key: String,
    client_meta: FileMeta,
    exists: bool,
    dst: NodeId,
    permissions: WritePermissions,
    buffer: Option<Box<dyn Read + Send>>,
    buffer_size: Option<u64>,
    cache_filename: Option<String>,
    cache_meta: Option<FileMeta>,
    error: Option<UploadError>,
}

impl UploadedFile {
    /// Client's key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Metadata as claimed, with the size replaced by the buffer size once
    /// one is attached.
    pub fn client_meta(&self) -> &FileMeta {
        &self.client_meta
    }

    /// Metadata derived from the cached file.
    pub fn cache_meta(&self) -> Option<&FileMeta> {
        self.cache_meta.as_ref()
    }

    /// Name in the staging cache.
    pub fn cache_filename(&self) -> Option<&str> {
        self.cache_filename.as_deref()
    }

    /// Size of the attached buffer.
    pub fn buffer_size(&self) -> Option<u64> {
        self.buffer_size
    }

    /// A node with this name exists at the destination.
    pub fn exists(&self) -> bool {
        self.exists
    }

    /// The existing node, or the directory that will hold a new one.
    pub fn dst(&self) -> NodeId {
        self.dst
    }

    /// Passed every stage so far.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Why the file was rejected.
    pub fn error(&self) -> Option<&UploadError> {
        self.error.as_ref()
    }

    /// User-facing rejection message.
    pub fn validation_msg(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }

    /// May be created as a new node.
    pub fn can_create(&self) -> bool {
        self.permissions.create
    }

    /// May overwrite the existing node.
    pub fn can_update(&self) -> bool {
        self.permissions.update
    }

    /// May be saved as a revision of the existing node.
    pub fn can_revise(&self) -> bool {
        self.permissions.revise
    }

    /// All three permission flags.
    pub fn permissions(&self) -> WritePermissions {
        self.permissions
    }

    /// Current state for reporting.
    pub fn state(&self) -> FileState {
        FileState {
            ok: self.is_ok(),
            exists: self.exists,
            permissions: self.permissions,
            validation_msg: self.validation_msg(),
        }
    }

    fn reject(&mut self, err: UploadError) {
        if err.is_operator_error() {
            log::error!("Upload '{}' ({}) rejected: {err}", self.key, self.client_meta.filename);
        } else {
            log::debug!("Upload '{}' ({}) rejected: {err}", self.key, self.client_meta.filename);
        }
        self.error = Some(err);
    }
}

impl fmt::Debug for UploadedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedFile")
            .field("key", &self.key)
            .field("client_meta", &self.client_meta)
            .field("exists", &self.exists)
            .field("dst", &self.dst)
            .field("permissions", &self.permissions)
            .field("buffer_size", &self.buffer_size)
            .field("cache_filename", &self.cache_filename)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// Coordinates a batch of uploads into one directory.
#[derive(Debug)]
pub struct Uploader<'t> {
    tree: &'t FsTree,
    path_node: NodeId,
    files: BTreeMap<String, UploadedFile>,
}

impl<'t> Uploader<'t> {
    /// Upload into the directory `path_node`.
    pub fn new(tree: &'t FsTree, path_node: NodeId) -> Self {
        Self {
            tree,
            path_node,
            files: BTreeMap::new(),
        }
    }

    /// Register candidates and resolve their destinations.
    ///
    /// A file whose name exists below the directory targets that node;
    /// otherwise it targets the directory itself.
    pub fn add_files(&mut self, candidates: impl IntoIterator<Item = UploadCandidate>) {
        for c in candidates {
            let existing = self.tree.child(self.path_node, &c.filename);
            let file = UploadedFile {
                key: c.key.clone(),
                client_meta: FileMeta {
                    filename: c.filename,
                    size: c.size,
                    mime_type: c
                        .mime_type
                        .filter(|m| !m.is_empty())
                        .unwrap_or_else(|| MIME_TYPE_UNKNOWN.to_string()),
                    encoding: c.encoding,
                },
                exists: existing.is_some(),
                dst: existing.unwrap_or(self.path_node),
                permissions: WritePermissions::default(),
                buffer: None,
                buffer_size: None,
                cache_filename: None,
                cache_meta: None,
                error: None,
            };
            if self.files.insert(c.key.clone(), file).is_some() {
                log::warn!("Upload key '{}' given twice, keeping the last", c.key);
            }
        }
    }

    /// Stage 1: check name, size, and item count as claimed by the client.
    pub fn check_client_meta(&mut self) {
        let tree = self.tree;
        for uf in self.files.values_mut().filter(|f| f.is_ok()) {
            if let Err(e) = Sentry::new(tree, uf.dst).check_client_meta(&uf.client_meta) {
                uf.reject(e);
            }
        }
    }

    /// Stage 2: check write permission.
    ///
    /// A new file needs "create". An existing one needs "update" or
    /// "revise"; both are tried and either suffices.
    pub fn check_permissions(&mut self, checker: &dyn PermissionChecker) {
        let tree = self.tree;
        for uf in self.files.values_mut().filter(|f| f.is_ok()) {
            let sentry = Sentry::new(tree, uf.dst);
            if !uf.exists {
                match sentry.check_permission(checker, WriteMode::Create) {
                    Ok(()) => uf.permissions.set(WriteMode::Create, true),
                    Err(e) => uf.reject(e),
                }
                continue;
            }
            let mut failures = Vec::new();
            for mode in [WriteMode::Update, WriteMode::Revise] {
                match sentry.check_permission(checker, mode) {
                    Ok(()) => uf.permissions.set(mode, true),
                    Err(e) => failures.push(e),
                }
            }
            if failures.len() == 2 {
                let err = failures
                    .into_iter()
                    .find(UploadError::is_operator_error)
                    .unwrap_or_else(|| {
                        UploadError::permission(
                            "Destination exists. Permission denied to update or revise.",
                        )
                    });
                uf.reject(err);
            } else if let Some(e) = failures.iter().find(|e| e.is_operator_error()) {
                log::error!("Upload '{}': {e}", uf.key);
            }
        }
    }

    /// Stage 3: attach the received content of `key` and check its real
    /// size.
    ///
    /// The buffer is attached even to a rejected file, but then not checked.
    pub fn attach_buffer<R>(&mut self, key: &str, mut buffer: R) -> Result<()>
    where
        R: Read + Seek + Send + 'static,
    {
        let tree = self.tree;
        let uf = self
            .files
            .get_mut(key)
            .ok_or_else(|| Error::UnknownFile(key.to_string()))?;
        let size = buffer
            .seek(SeekFrom::End(0))
            .and_then(|size| buffer.rewind().map(|()| size));
        let size = match size {
            Ok(size) => size,
            Err(e) => {
                if uf.is_ok() {
                    uf.reject(UploadError::Storage(format!("unreadable upload buffer: {e}")));
                }
                return Ok(());
            }
        };
        uf.buffer = Some(Box::new(buffer));
        uf.buffer_size = Some(size);
        uf.client_meta.size = size;
        if uf.is_ok()
            && let Err(e) = Sentry::new(tree, uf.dst).check_size(size)
        {
            uf.reject(e);
        }
        Ok(())
    }

    /// Stage 4: write every accepted file to `cache`.
    ///
    /// A failure is logged and recorded on its file; the other files are
    /// still written.
    pub fn save_to_cache(&mut self, cache: &UploadCache, overwrite: bool) {
        for uf in self.files.values_mut().filter(|f| f.is_ok()) {
            let Some(mut buffer) = uf.buffer.take() else {
                uf.reject(UploadError::validation("No content received"));
                continue;
            };
            let name = UploadCache::new_cache_filename();
            match cache.store(&name, &mut buffer, &uf.client_meta, overwrite) {
                Ok(meta) => {
                    uf.cache_filename = Some(name);
                    uf.cache_meta = Some(meta);
                }
                Err(e) => {
                    log::error!(
                        "Failed to cache upload '{}' ({}) in {}: {e}",
                        uf.key,
                        uf.client_meta.filename,
                        cache.root_dir().display()
                    );
                    uf.reject(e.into());
                }
            }
        }
    }

    /// Stage 5: check everything again, against the cached file.
    pub fn check_cache_meta(&mut self) {
        let tree = self.tree;
        for uf in self.files.values_mut().filter(|f| f.is_ok()) {
            let Some(meta) = uf.cache_meta.as_ref() else {
                uf.reject(UploadError::validation("File was not cached"));
                continue;
            };
            if let Err(e) = Sentry::new(tree, uf.dst).check_file_meta(meta) {
                uf.reject(e);
            }
        }
    }

    /// The file with client key `key`.
    pub fn file(&self, key: &str) -> Option<&UploadedFile> {
        self.files.get(key)
    }

    /// All files, ordered by key.
    pub fn files(&self) -> impl Iterator<Item = &UploadedFile> {
        self.files.values()
    }

    /// Files that passed every stage so far.
    pub fn accepted(&self) -> impl Iterator<Item = &UploadedFile> {
        self.files.values().filter(|f| f.is_ok())
    }

    /// State of every file by key.
    pub fn file_states(&self) -> BTreeMap<String, FileState> {
        self.files
            .iter()
            .map(|(k, f)| (k.clone(), f.state()))
            .collect()
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
    use std::io::Cursor;

    struct AllowAll;

    impl PermissionChecker for AllowAll {
        fn has_permission(&self, _lineage: &[ResourceId], _permission: &str) -> bool {
            true
        }
    }

    struct DenyAll;

    impl PermissionChecker for DenyAll {
        fn has_permission(&self, _lineage: &[ResourceId], _permission: &str) -> bool {
            false
        }
    }

    fn tree(force_revision: bool) -> FsTree {
        let mut tree = FsTree::new(
            ResourceId(1),
            "fs",
            QuotaRc {
                force_revision: Some(force_revision),
                max_size: Some(10_000_000),
                max_total_size: Some(100_000_000),
                max_total_items: Some(-1),
                allowed_mimes: Some(vec!["*/*".into()]),
                denied_mimes: Some(vec![]),
            },
        );
        tree.add_file(tree.root(), ResourceId(2), "existing.txt", 3).unwrap();
        tree
    }

    fn candidate(key: &str, filename: &str, size: u64) -> UploadCandidate {
        UploadCandidate {
            key: key.into(),
            filename: filename.into(),
            size,
            mime_type: Some("text/plain".into()),
            encoding: None,
        }
    }

    #[test]
    fn test_destination_resolution() {
        let tree = tree(false);
        let mut up = Uploader::new(&tree, tree.root());
        up.add_files([candidate("a", "new.txt", 1), candidate("b", "existing.txt", 1)]);
        let a = up.file("a").unwrap();
        assert!(!a.exists());
        assert_eq!(a.dst(), tree.root());
        let b = up.file("b").unwrap();
        assert!(b.exists());
        assert_eq!(b.dst(), tree.child(tree.root(), "existing.txt").unwrap());
    }

    #[test]
    fn test_missing_mime_type_recorded_as_unknown() {
        let tree = tree(false);
        let mut up = Uploader::new(&tree, tree.root());
        let mut c = candidate("a", "x", 1);
        c.mime_type = Some(String::new());
        up.add_files([c]);
        assert_eq!(up.file("a").unwrap().client_meta().mime_type, MIME_TYPE_UNKNOWN);
    }

    #[test]
    fn test_rejected_file_skips_later_stages() {
        let tree = tree(false);
        let mut up = Uploader::new(&tree, tree.root());
        up.add_files([candidate("bad", "../../etc/passwd", 1)]);
        up.check_client_meta();
        up.check_permissions(&DenyAll);
        let f = up.file("bad").unwrap();
        assert!(matches!(f.error(), Some(UploadError::Validation(_))));
        assert!(!f.can_create());
        assert!(f.validation_msg().unwrap().contains("parent directory"));
    }

    #[test]
    fn test_update_and_revise_independent() {
        let tree = tree(true);
        let mut up = Uploader::new(&tree, tree.root());
        up.add_files([candidate("b", "existing.txt", 1)]);
        up.check_permissions(&AllowAll);
        let f = up.file("b").unwrap();
        assert!(f.is_ok());
        assert!(!f.can_update());
        assert!(f.can_revise());
        assert!(!f.can_create());
    }

    #[test]
    fn test_existing_denied_both() {
        let tree = tree(false);
        let mut up = Uploader::new(&tree, tree.root());
        up.add_files([candidate("b", "existing.txt", 1)]);
        up.check_permissions(&DenyAll);
        let states = up.file_states();
        let state = &states["b"];
        assert!(!state.ok);
        assert!(state.exists);
        assert_eq!(
            state.validation_msg.as_deref(),
            Some("Destination exists. Permission denied to update or revise.")
        );
    }

    #[test]
    fn test_buffer_size_rechecked() {
        let tree = tree(false);
        let mut up = Uploader::new(&tree, tree.root());
        up.add_files([candidate("a", "liar.bin", 10)]);
        up.check_client_meta();
        assert!(up.file("a").unwrap().is_ok());
        up.attach_buffer("a", Cursor::new(vec![0u8; 10_000_001])).unwrap();
        let f = up.file("a").unwrap();
        assert_eq!(f.buffer_size(), Some(10_000_001));
        assert_eq!(f.error(), Some(&UploadError::permission("File is too large")));
        assert!(matches!(
            up.attach_buffer("nope", Cursor::new(Vec::<u8>::new())),
            Err(Error::UnknownFile(_))
        ));
    }

    #[test]
    fn test_missing_buffer_rejected_at_save() {
        let tree = tree(false);
        let dir = tempfile::Builder::new().tempdir_in("/tmp").unwrap();
        let cache = UploadCache::new(dir.path()).unwrap();
        let mut up = Uploader::new(&tree, tree.root());
        up.add_files([candidate("a", "a.txt", 1)]);
        up.save_to_cache(&cache, false);
        assert_eq!(
            up.file("a").unwrap().error(),
            Some(&UploadError::validation("No content received"))
        );
    }
}
