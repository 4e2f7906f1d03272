//! Persistent records.
//!
//! Ownership follows the relational schema: a permission owns its children,
//! a group owns its memberships, and users are only referenced.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use pym_core::{AceId, GroupId, MembershipId, PermissionId, ResourceId, TenantId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Sort index given to an ACE when none is specified.
///
/// Sits in the middle of the expected range so entries can be moved in
/// front of or behind it.
pub const DEFAULT_SORTIX: i32 = 5000;

// ============================================================================
// Principal
// ============================================================================

/// A user or a group.
///
/// Used both as the member of a group and as the subject of an ACE, which
/// makes "exactly one of user or group" unrepresentable any other way.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Principal {
    /// A user account.
    User(UserId),
    /// A group.
    Group(GroupId),
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "u:{id}"),
            Self::Group(id) => write!(f, "g:{id}"),
        }
    }
}

impl FromStr for Principal {
    type Err = Error;

    /// Parses `u:<id>` or `g:<id>`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || {
            Error::invalid(
                "principal",
                format!("expected 'u:<id>' or 'g:<id>', got '{s}'"),
            )
        };
        let (prefix, id) = s.split_once(':').ok_or_else(invalid)?;
        let id: i64 = id.trim().parse().map_err(|_| invalid())?;
        match prefix {
            "u" => Ok(Self::User(UserId(id))),
            "g" => Ok(Self::Group(GroupId(id))),
            _ => Err(invalid()),
        }
    }
}

// ============================================================================
// Permission
// ============================================================================

/// A named permission in a single-parent tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Record id.
    pub id: PermissionId,
    /// Unique name as used in code, e.g. `write`.
    pub name: String,
    /// Parent permission; `None` for a topmost permission.
    pub parent_id: Option<PermissionId>,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descr: Option<String>,
}

/// Fields of a permission to create.
#[derive(Clone, Debug, Default)]
pub struct NewPermission {
    /// Unique name.
    pub name: String,
    /// Parent permission.
    pub parent_id: Option<PermissionId>,
    /// Optional description.
    pub descr: Option<String>,
}

/// A permission with its ancestor chain, immediate parent first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AncestorRow {
    /// Permission id.
    pub id: PermissionId,
    /// Permission name.
    pub name: String,
    /// Ancestors from immediate parent to root; empty for a root.
    pub parents: Vec<(PermissionId, String)>,
}

/// A permission with (part of) its descendant set.
///
/// A permission may be reported in several rows; leaves are not reported.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescendantRow {
    /// Permission id.
    pub id: PermissionId,
    /// Permission name.
    pub name: String,
    /// Descendants, in no particular order, possibly repeated.
    pub children: Vec<(PermissionId, String)>,
}

// ============================================================================
// Group
// ============================================================================

/// A group of users and other groups.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Record id.
    pub id: GroupId,
    /// Owning tenant; `None` for a global group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
    /// Name, unique within the tenant (or globally).
    pub name: String,
    /// Optional classifier bundling groups together.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descr: Option<String>,
}

/// Fields of a group to create.
#[derive(Clone, Debug, Default)]
pub struct NewGroup {
    /// Owning tenant.
    pub tenant_id: Option<TenantId>,
    /// Name.
    pub name: String,
    /// Classifier.
    pub kind: Option<String>,
    /// Description.
    pub descr: Option<String>,
}

/// A membership edge: `member` belongs to `group_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    /// Record id.
    pub id: MembershipId,
    /// The containing group.
    pub group_id: GroupId,
    /// The member, a user or another group.
    pub member: Principal,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descr: Option<String>,
}

// ============================================================================
// User
// ============================================================================

/// Gender as stored in a profile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    /// Male.
    #[serde(rename = "m")]
    Male,
    /// Female.
    #[serde(rename = "f")]
    Female,
    /// Trans.
    #[serde(rename = "t")]
    Trans,
}

impl FromStr for Gender {
    type Err = Error;

    /// Accepts the stored code (`m`) or the name (`male`).
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "m" | "male" => Ok(Self::Male),
            "f" | "female" => Ok(Self::Female),
            "t" | "trans" => Ok(Self::Trans),
            _ => Err(Error::invalid("profile", format!("Invalid gender: '{s}'"))),
        }
    }
}

/// Google+ profile links.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GplusProfile {
    /// Avatar URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture_url: Option<String>,
    /// Public profile URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_url: Option<String>,
}

/// "About me" data. Unknown keys are preserved in `extra`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Preferred locale, e.g. `de_DE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale_name: Option<String>,
    /// Gender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    /// Google+ links.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gplus: Option<GplusProfile>,
    /// Keys without a typed field.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// User preferences. Unknown keys are preserved in `extra`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserRc {
    /// IANA time zone name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Keys without a typed field.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Why a user may not log in right now.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoginDenial {
    /// An administrator disabled the account.
    Disabled(Option<String>),
    /// An automated process blocked the account.
    Blocked {
        /// Reason given for the block.
        reason: Option<String>,
        /// When the block lifts; `None` means never.
        until: Option<DateTime<Utc>>,
    },
    /// The account has no password (system accounts).
    NoPassword,
    /// The password has expired.
    PasswordExpired,
}

/// A user account.
///
/// `principal`, `email`, and `display_name` are stored as given but
/// compared case-insensitively. Email is always lower-cased.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Record id.
    pub id: UserId,
    /// Login name.
    pub principal: String,
    /// Email address, lower-cased.
    pub email: String,
    /// Name shown in the UI.
    pub display_name: String,
    /// First name.
    #[serde(default)]
    pub first_name: Option<String>,
    /// Last name.
    #[serde(default)]
    pub last_name: Option<String>,
    /// Credential hash; `None` blocks password login.
    #[serde(default)]
    pub pwd: Option<String>,
    /// When the password expires; `None` means never.
    #[serde(default)]
    pub pwd_expires: Option<DateTime<Utc>>,
    /// OpenID identity URL.
    #[serde(default)]
    pub identity_url: Option<String>,
    /// Google+ id.
    #[serde(default)]
    pub gplus_id: Option<String>,
    /// Set by an administrator.
    #[serde(default)]
    pub is_enabled: bool,
    /// Why the account was disabled.
    #[serde(default)]
    pub disable_reason: Option<String>,
    /// Set by automated processes.
    #[serde(default)]
    pub is_blocked: bool,
    /// When the block was established.
    #[serde(default)]
    pub blocked_since: Option<DateTime<Utc>>,
    /// When the block lifts; `None` means never.
    #[serde(default)]
    pub blocked_until: Option<DateTime<Utc>>,
    /// Why the account was blocked.
    #[serde(default)]
    pub block_reason: Option<String>,
    /// Current login time.
    #[serde(default)]
    pub login_time: Option<DateTime<Utc>>,
    /// Address of the logged in client.
    #[serde(default)]
    pub login_ip: Option<String>,
    /// Last access, used to expire sessions.
    #[serde(default)]
    pub access_time: Option<DateTime<Utc>>,
    /// Last logout time.
    #[serde(default)]
    pub logout_time: Option<DateTime<Utc>>,
    /// Terminate the session on next access.
    #[serde(default)]
    pub kick_session: bool,
    /// Message shown to a kicked user.
    #[serde(default)]
    pub kick_reason: Option<String>,
    /// Optional description.
    #[serde(default)]
    pub descr: Option<String>,
    /// Profile data.
    #[serde(default)]
    pub profile: UserProfile,
    /// Preferences.
    #[serde(default)]
    pub rc: UserRc,
}

impl User {
    /// Check whether the account may log in at `now`.
    pub fn is_login_allowed(&self, now: DateTime<Utc>) -> std::result::Result<(), LoginDenial> {
        if !self.is_enabled {
            return Err(LoginDenial::Disabled(self.disable_reason.clone()));
        }
        if self.is_blocked && self.blocked_until.is_none_or(|until| now < until) {
            return Err(LoginDenial::Blocked {
                reason: self.block_reason.clone(),
                until: self.blocked_until,
            });
        }
        if self.pwd.is_none() {
            return Err(LoginDenial::NoPassword);
        }
        if self.pwd_expires.is_some_and(|exp| exp <= now) {
            return Err(LoginDenial::PasswordExpired);
        }
        Ok(())
    }
}

/// Fields of a user to create.
#[derive(Clone, Debug, Default)]
pub struct NewUser {
    /// Login name.
    pub principal: String,
    /// Email address.
    pub email: String,
    /// Display name; defaults to the principal when empty.
    pub display_name: String,
    /// First name.
    pub first_name: Option<String>,
    /// Last name.
    pub last_name: Option<String>,
    /// Credential hash.
    pub pwd: Option<String>,
    /// Enabled flag.
    pub is_enabled: bool,
    /// Description.
    pub descr: Option<String>,
    /// Profile data.
    pub profile: UserProfile,
}

// ============================================================================
// Ace
// ============================================================================

/// Access control entry: allow or deny `principal` a permission on a
/// resource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ace {
    /// Record id; breaks ties between equal sort indices.
    pub id: AceId,
    /// Protected resource.
    pub resource_id: ResourceId,
    /// User or group the entry applies to.
    pub principal: Principal,
    /// Granted or denied permission.
    pub permission_id: PermissionId,
    /// Allow if true, deny if false.
    pub allow: bool,
    /// Sort index; the first matching entry wins.
    #[serde(default = "default_sortix")]
    pub sortix: i32,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descr: Option<String>,
}

fn default_sortix() -> i32 {
    DEFAULT_SORTIX
}

/// Fields of an ACE to create.
#[derive(Clone, Debug)]
pub struct NewAce {
    /// Protected resource.
    pub resource_id: ResourceId,
    /// Subject.
    pub principal: Principal,
    /// Permission.
    pub permission_id: PermissionId,
    /// Allow or deny.
    pub allow: bool,
    /// Sort index; [`DEFAULT_SORTIX`] when `None`.
    pub sortix: Option<i32>,
    /// Description.
    pub descr: Option<String>,
}
