//! Storage traits.
//!
//! One trait per record family. Resolvers depend on the narrowest trait they
//! need; administrative code takes an [`AuthStore`], which bundles all four.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pym_core::{AceId, GroupId, MembershipId, PermissionId, ResourceId, TenantId, UserId};

use crate::Result;
use crate::models::{
    Ace, AncestorRow, DescendantRow, Group, GroupMember, NewAce, NewGroup, NewPermission, NewUser,
    Permission, Principal, User,
};

/// Permission tree storage.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Every permission with its ancestor chain.
    async fn permissions_with_parents(&self) -> Result<Vec<AncestorRow>>;

    /// Every non-leaf permission with its descendants.
    async fn permissions_with_children(&self) -> Result<Vec<DescendantRow>>;

    /// All permissions, ordered by id.
    async fn list_permissions(&self) -> Result<Vec<Permission>>;

    /// Look up a permission by name.
    async fn permission_by_name(&self, name: &str) -> Result<Option<Permission>>;

    /// Create a permission. Fails if the name is taken or the parent is
    /// unknown.
    async fn create_permission(&self, new: NewPermission) -> Result<Permission>;

    /// Move a permission under a new parent. Fails if this would create a
    /// cycle.
    async fn set_permission_parent(
        &self,
        id: PermissionId,
        parent_id: Option<PermissionId>,
    ) -> Result<Permission>;

    /// Delete a permission, its descendants, and the ACEs referring to any of
    /// them. Returns the deleted ids.
    async fn delete_permission(&self, id: PermissionId) -> Result<Vec<PermissionId>>;
}

/// Group and membership storage.
#[async_trait]
pub trait GroupStore: Send + Sync {
    /// Look up a group.
    async fn group(&self, id: GroupId) -> Result<Option<Group>>;

    /// Look up a group by tenant and name (case-insensitive).
    async fn group_by_name(&self, tenant_id: Option<TenantId>, name: &str)
    -> Result<Option<Group>>;

    /// All groups, ordered by id.
    async fn list_groups(&self) -> Result<Vec<Group>>;

    /// Create a group. Fails if `(tenant, name)` is taken.
    async fn create_group(&self, new: NewGroup) -> Result<Group>;

    /// Delete a group, its memberships, memberships of it in other groups,
    /// and ACEs naming it.
    async fn delete_group(&self, id: GroupId) -> Result<()>;

    /// Groups `user_id` is a direct member of.
    async fn direct_groups_of_user(&self, user_id: UserId) -> Result<Vec<Group>>;

    /// Groups that are direct members of `group_id`.
    async fn member_groups_of(&self, group_id: GroupId) -> Result<Vec<Group>>;

    /// Groups that directly contain `group_id` as a member.
    async fn groups_containing_group(&self, group_id: GroupId) -> Result<Vec<GroupId>>;

    /// Users that are direct members of `group_id`.
    async fn user_members_of(&self, group_id: GroupId) -> Result<Vec<UserId>>;

    /// Add a member. Fails if the membership exists.
    async fn add_member(
        &self,
        group_id: GroupId,
        member: Principal,
        descr: Option<String>,
    ) -> Result<GroupMember>;

    /// Remove a membership.
    async fn remove_member(&self, id: MembershipId) -> Result<GroupMember>;

    /// All memberships, ordered by id.
    async fn list_members(&self) -> Result<Vec<GroupMember>>;
}

/// User account storage.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Look up a user.
    async fn user(&self, id: UserId) -> Result<Option<User>>;

    /// Look up a user by principal (case-insensitive).
    async fn user_by_principal(&self, principal: &str) -> Result<Option<User>>;

    /// Look up a user by email (case-insensitive).
    async fn user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// All users, ordered by id.
    async fn list_users(&self) -> Result<Vec<User>>;

    /// Create a user. Fails if principal, email, or display name is taken.
    async fn create_user(&self, new: NewUser) -> Result<User>;

    /// Replace a user record. Uniqueness is checked against other users.
    async fn update_user(&self, user: User) -> Result<User>;

    /// Delete a user, their memberships, and ACEs naming them.
    async fn delete_user(&self, id: UserId) -> Result<()>;

    /// Stamp a successful login.
    async fn record_login(&self, id: UserId, at: DateTime<Utc>, ip: Option<String>) -> Result<()>;

    /// Stamp a logout.
    async fn record_logout(&self, id: UserId, at: DateTime<Utc>) -> Result<()>;
}

/// Access control entry storage.
#[async_trait]
pub trait AceStore: Send + Sync {
    /// Entries attached to a resource, in no particular order.
    async fn aces_for_resource(&self, resource_id: ResourceId) -> Result<Vec<Ace>>;

    /// All entries, ordered by id.
    async fn list_aces(&self) -> Result<Vec<Ace>>;

    /// Create an entry. Fails if `(resource, principal, permission)` exists
    /// or the principal or permission is unknown.
    async fn create_ace(&self, new: NewAce) -> Result<Ace>;

    /// Change an entry's sort index.
    async fn set_sortix(&self, id: AceId, sortix: i32) -> Result<Ace>;

    /// Delete an entry.
    async fn delete_ace(&self, id: AceId) -> Result<Ace>;
}

/// All storage traits at once.
pub trait AuthStore: PermissionStore + GroupStore + UserStore + AceStore {}

impl<T: PermissionStore + GroupStore + UserStore + AceStore> AuthStore for T {}
