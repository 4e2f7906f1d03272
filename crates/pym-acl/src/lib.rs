//! # pym-acl
//!
//! Authorization for Parenchym:
//!
//! - [`permission`]: the permission tree, materialized and cached
//! - [`group`]: transitive group membership, cached per user
//! - [`ace`]: first-match evaluation of access control entries
//! - [`manager`]: admin mutations that keep the caches consistent
//!
//! Everything that caches takes an explicit [`pym_core::CacheRegion`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![forbid(unsafe_code)]

pub mod ace;
pub mod error;
pub mod group;
pub mod manager;
pub mod permission;

pub use ace::{
    AclChecker, AclDecision, AclResolver, EffectivePrincipals, PermissionChecker, evaluate,
    sort_aces,
};
pub use error::{Error, Result};
pub use group::{GroupRef, GroupResolver};
pub use manager::{AclManager, GroupManager, PermissionManager};
pub use permission::{
    ALL_PERMISSIONS, BuiltinPermission, PermissionEntry, PermissionLoader, PermissionSnapshot,
};
