//! # pym-fs
//!
//! Upload validation for Parenchym filesystems:
//!
//! - [`tree`]: filesystem nodes with inherited quota settings
//! - [`sentry`]: quota, permission, and mime-type checks for one destination
//! - [`mime`]: mime-type patterns and content sniffing
//! - [`cache`]: staging cache with locked writes and JSON sidecars
//! - [`upload`]: the five-stage pipeline over a batch of files
//!
//! Permission checks go through [`pym_acl::PermissionChecker`] with the
//! destination's lineage.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![forbid(unsafe_code)]

pub mod cache;
pub mod error;
pub mod mime;
pub mod sentry;
pub mod tree;
pub mod upload;

pub use cache::{CachedMeta, UploadCache};
pub use error::{Error, Result, UploadError};
pub use mime::{MIME_TYPE_UNKNOWN, MimeFilter, MimePattern, sniff};
pub use sentry::{FileMeta, Sentry, WriteMode};
pub use tree::{FsNode, FsTree, NodeId, NodeKind, QuotaRc};
pub use upload::{FileState, UploadCandidate, UploadedFile, Uploader, WritePermissions};
