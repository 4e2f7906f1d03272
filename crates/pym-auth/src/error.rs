//! Auth-specific error types.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type alias for pym-auth operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why an authentication attempt or identity switch was refused.
///
/// No variant carries the submitted credential.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// No account with this principal.
    #[error("unknown principal '{0}'")]
    UnknownPrincipal(String),

    /// No account with this email address.
    #[error("unknown email '{0}'")]
    UnknownEmail(String),

    /// Credential does not match, or the account has none.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// An administrator disabled the account.
    #[error("account is disabled{}", reason_suffix(.0))]
    AccountDisabled(Option<String>),

    /// The account is blocked, possibly until a given time.
    #[error("account is blocked{}", reason_suffix(.reason))]
    AccountBlocked {
        /// Reason given for the block.
        reason: Option<String>,
        /// When the block lifts.
        until: Option<DateTime<Utc>>,
    },

    /// The password has expired.
    #[error("password has expired")]
    PasswordExpired,

    /// The operation needs an authenticated user.
    #[error("not authenticated")]
    NotAuthenticated,
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason
        .as_deref()
        .map(|r| format!(": {r}"))
        .unwrap_or_default()
}

impl AuthError {
    /// Whether the identifier or credential was wrong, as opposed to the
    /// account being unusable.
    pub fn is_credential_failure(&self) -> bool {
        matches!(
            self,
            AuthError::UnknownPrincipal(_)
                | AuthError::UnknownEmail(_)
                | AuthError::InvalidCredentials
        )
    }
}

/// Errors that can occur in pym-auth.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Authentication failed.
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Error from group or ACL resolution.
    #[error("ACL error: {0}")]
    Acl(#[from] pym_acl::Error),

    /// Error from the record store.
    #[error("Storage error: {0}")]
    Storage(#[from] pym_storage::Error),

    /// Error from pym-core.
    #[error("Core error: {0}")]
    Core(#[from] pym_core::Error),
}

impl Error {
    /// The authentication failure, if this is one.
    pub fn as_auth(&self) -> Option<&AuthError> {
        match self {
            Error::Auth(e) => Some(e),
            _ => None,
        }
    }
}
