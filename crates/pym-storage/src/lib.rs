//! # pym-storage
//!
//! Data model and storage traits for Parenchym's authorization core.
//!
//! - [`models`]: permissions, groups, memberships, users, and ACEs
//! - [`traits`]: async storage traits, one per record family
//! - [`memory`]: in-memory store implementing every trait
//!
//! Relational backends implement the same traits; the resolvers in
//! `pym-acl` and `pym-auth` only ever see the traits.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![forbid(unsafe_code)]

pub mod error;
pub mod memory;
pub mod models;
pub mod traits;

pub use error::{Error, Result};
pub use memory::{Directory, MemoryStore};
pub use models::{
    Ace, AncestorRow, DEFAULT_SORTIX, DescendantRow, Gender, GplusProfile, Group, GroupMember,
    LoginDenial, NewAce, NewGroup, NewPermission, NewUser, Permission, Principal, User,
    UserProfile, UserRc,
};
pub use traits::{AceStore, AuthStore, GroupStore, PermissionStore, UserStore};
