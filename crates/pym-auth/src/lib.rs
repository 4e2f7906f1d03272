//! # pym-auth
//!
//! The current user of a request and how it changes:
//!
//! - [`CurrentUser`]: login, impersonation, logout, and the identity's
//!   resolved groups
//! - [`AuthProvider`]: account lookup and credential checks, with
//!   [`StoreAuthProvider`] over a `pym-storage` user store
//! - [`Session`]: the framework session, with [`MemorySession`]
//! - [`AuditSink`]: where failed logins are reported
//! - [`AuthError`]: why authentication was refused

#![warn(missing_docs)]
#![warn(clippy::all)]
#![forbid(unsafe_code)]

pub mod audit;
pub mod credential;
pub mod current_user;
pub mod error;
pub mod provider;
pub mod session;

pub use audit::{AuditEvent, AuditSink, LogAuditSink, MemoryAuditSink};
pub use credential::{hash_password, verify_password};
pub use current_user::{CurrentUser, PREV_USER_KEY, UserMetadata};
pub use error::{AuthError, Error, Result};
pub use provider::{AuthProvider, StoreAuthProvider};
pub use session::{MemorySession, Session};
