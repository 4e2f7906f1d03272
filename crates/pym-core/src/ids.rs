//! Typed record identifiers.
//!
//! Every persistent record is keyed by a 64-bit integer. Wrapping each kind
//! in its own newtype keeps a group id from being passed where a user id is
//! expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Returns the raw integer value.
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Ok(Self(s.trim().parse()?))
            }
        }
    };
}

define_id!(
    /// Identifier of a user account.
    UserId
);
define_id!(
    /// Identifier of a group.
    GroupId
);
define_id!(
    /// Identifier of a group membership edge.
    MembershipId
);
define_id!(
    /// Identifier of a node in the permission tree.
    PermissionId
);
define_id!(
    /// Identifier of a protected resource (e.g. a filesystem node).
    ResourceId
);
define_id!(
    /// Identifier of an access control entry.
    AceId
);
define_id!(
    /// Identifier of a tenant.
    TenantId
);

/// Normalize a principal, email, or display name for case-insensitive
/// comparison.
///
/// # Examples
///
/// ```
/// use pym_core::ids::normalize_principal;
///
/// assert_eq!(normalize_principal("  Alice "), "alice");
/// assert_eq!(normalize_principal("BOB@Example.COM"), "bob@example.com");
/// ```
pub fn normalize_principal(s: &str) -> String {
    s.trim().to_lowercase()
}
