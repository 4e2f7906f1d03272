//! Parenchym core: shared ids, errors, cache service, configuration, and
//! path utilities.
//!
//! This crate has no internal Parenchym dependencies (dependency level 0).
//!
//! # Modules
//!
//! - [`error`]: Error types and Result alias
//! - [`ids`]: Typed record identifiers
//! - [`cache`]: Injected cache service (backends and namespaced regions)
//! - [`config`]: Configuration document and loader
//! - [`paths`]: Path safety checks

pub mod cache;
pub mod config;
pub mod error;
pub mod ids;
pub mod paths;

// Re-export key types at crate root for convenience
pub use cache::{CacheBackend, CacheRegion, MemoryCache};
pub use config::{ConfigManager, PymConfig};
pub use error::{Error, Result};
pub use ids::{AceId, GroupId, MembershipId, PermissionId, ResourceId, TenantId, UserId};
