//! Parenchym authorization core: umbrella crate.
//!
//! This crate re-exports the Parenchym components for convenience.
//! Use feature flags to enable specific functionality.

#![doc = include_str!("../README.md")]

pub use pym_acl as acl;
pub use pym_core as core;
pub use pym_storage as storage;

#[cfg(feature = "auth")]
pub use pym_auth as auth;

#[cfg(feature = "fs")]
pub use pym_fs as fs;

#[cfg(feature = "redis")]
pub use pym_redis as redis;
