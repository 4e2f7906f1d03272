//! Administrative mutations.
//!
//! The managers wrap the stores and keep the caches honest: every change to
//! the permission tree drops the cached snapshot, and every membership
//! change drops the cached group closure of each user it may affect.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use pym_core::{AceId, GroupId, MembershipId, ResourceId, UserId};
use pym_storage::{
    Ace, AceStore, DEFAULT_SORTIX, Group, GroupMember, GroupStore, NewAce, NewGroup,
    NewPermission, Permission, PermissionStore, Principal, UserStore,
};

use crate::Result;
use crate::ace::{AclDecision, AclResolver, EffectivePrincipals, sort_aces};
use crate::group::GroupResolver;
use crate::permission::{BuiltinPermission, PermissionLoader, PermissionSnapshot};

// ============================================================================
// PermissionManager
// ============================================================================

/// Edits the permission tree.
#[derive(Clone)]
pub struct PermissionManager {
    loader: PermissionLoader,
    store: Arc<dyn PermissionStore>,
}

impl PermissionManager {
    /// Create a manager.
    pub fn new(store: Arc<dyn PermissionStore>, loader: PermissionLoader) -> Self {
        Self { loader, store }
    }

    /// Current snapshot.
    pub async fn load_all(&self) -> Result<PermissionSnapshot> {
        self.loader.load_all().await
    }

    async fn resolve(&self, name: &str) -> Result<Permission> {
        self.store
            .permission_by_name(name)
            .await?
            .ok_or_else(|| crate::Error::unknown_permission(name))
    }

    /// Create a permission below `parent` (by name).
    pub async fn create(
        &self,
        name: &str,
        parent: Option<&str>,
        descr: Option<String>,
    ) -> Result<Permission> {
        let parent_id = match parent {
            Some(p) => Some(self.resolve(p).await?.id),
            None => None,
        };
        let permission = self
            .store
            .create_permission(NewPermission {
                name: name.to_string(),
                parent_id,
                descr,
            })
            .await?;
        self.loader.invalidate().await?;
        log::info!("Created permission '{}' ({})", permission.name, permission.id);
        Ok(permission)
    }

    /// Move a permission below another one, or to the top with `None`.
    pub async fn set_parent(&self, name: &str, parent: Option<&str>) -> Result<Permission> {
        let permission = self.resolve(name).await?;
        let parent_id = match parent {
            Some(p) => Some(self.resolve(p).await?.id),
            None => None,
        };
        let permission = self
            .store
            .set_permission_parent(permission.id, parent_id)
            .await?;
        self.loader.invalidate().await?;
        log::info!("Moved permission '{}' below {:?}", permission.name, parent);
        Ok(permission)
    }

    /// Delete a permission with its subtree.
    pub async fn delete(&self, name: &str) -> Result<usize> {
        let permission = self.resolve(name).await?;
        let deleted = self.store.delete_permission(permission.id).await?;
        self.loader.invalidate().await?;
        log::info!(
            "Deleted permission '{}' and {} descendants",
            permission.name,
            deleted.len().saturating_sub(1)
        );
        Ok(deleted.len())
    }

    /// Create whichever builtin permissions are missing.
    pub async fn seed_builtin(&self) -> Result<Vec<Permission>> {
        let mut created = Vec::new();
        for builtin in BuiltinPermission::ALL {
            if self.store.permission_by_name(builtin.name()).await?.is_some() {
                continue;
            }
            let parent_id = match builtin.parent() {
                Some(p) => Some(self.resolve(p.name()).await?.id),
                None => None,
            };
            created.push(
                self.store
                    .create_permission(NewPermission {
                        name: builtin.name().to_string(),
                        parent_id,
                        descr: None,
                    })
                    .await?,
            );
        }
        if !created.is_empty() {
            self.loader.invalidate().await?;
            log::info!("Seeded {} builtin permissions", created.len());
        }
        Ok(created)
    }
}

impl std::fmt::Debug for PermissionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionManager")
            .field("loader", &self.loader)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// GroupManager
// ============================================================================

/// Edits groups and memberships.
#[derive(Clone)]
pub struct GroupManager {
    groups: Arc<dyn GroupStore>,
    users: Arc<dyn UserStore>,
    resolver: GroupResolver,
}

impl GroupManager {
    /// Create a manager.
    pub fn new(
        groups: Arc<dyn GroupStore>,
        users: Arc<dyn UserStore>,
        resolver: GroupResolver,
    ) -> Self {
        Self {
            groups,
            users,
            resolver,
        }
    }

    /// The resolver whose cache this manager maintains.
    pub fn resolver(&self) -> &GroupResolver {
        &self.resolver
    }

    /// Create a group. No closure changes, so no cache is touched.
    pub async fn create_group(&self, new: NewGroup) -> Result<Group> {
        let group = self.groups.create_group(new).await?;
        log::info!("Created group '{}' ({})", group.name, group.id);
        Ok(group)
    }

    /// Delete a group with its memberships.
    pub async fn delete_group(&self, id: GroupId) -> Result<()> {
        let affected = self.affected_users(id).await?;
        self.groups.delete_group(id).await?;
        log::info!("Deleted group {id}");
        self.clear_caches(affected).await
    }

    /// Add a user or group to a group.
    pub async fn add_member(
        &self,
        group_id: GroupId,
        member: Principal,
        descr: Option<String>,
    ) -> Result<GroupMember> {
        let membership = self.groups.add_member(group_id, member, descr).await?;
        log::info!("Added {member} to g:{group_id}");
        let affected = self.affected_users(group_id).await?;
        self.clear_caches(affected).await?;
        Ok(membership)
    }

    /// Remove a membership.
    pub async fn remove_member(&self, id: MembershipId) -> Result<GroupMember> {
        let affected_before = self.affected_users_of_membership(id).await?;
        let membership = self.groups.remove_member(id).await?;
        log::info!("Removed {} from g:{}", membership.member, membership.group_id);
        self.clear_caches(affected_before).await?;
        Ok(membership)
    }

    async fn affected_users_of_membership(&self, id: MembershipId) -> Result<HashSet<UserId>> {
        let Some(m) = self
            .groups
            .list_members()
            .await?
            .into_iter()
            .find(|m| m.id == id)
        else {
            return Ok(HashSet::new());
        };
        self.affected_users(m.group_id).await
    }

    /// Users whose closure contains `group_id`: direct user members of the
    /// group and of every group that reaches it.
    pub async fn affected_users(&self, group_id: GroupId) -> Result<HashSet<UserId>> {
        let mut users = HashSet::new();
        let mut visited = HashSet::from([group_id]);
        let mut queue = VecDeque::from([group_id]);
        while let Some(gid) = queue.pop_front() {
            users.extend(self.groups.user_members_of(gid).await?);
            for container in self.groups.groups_containing_group(gid).await? {
                if visited.insert(container) {
                    queue.push_back(container);
                }
            }
        }
        Ok(users)
    }

    async fn clear_caches(&self, users: HashSet<UserId>) -> Result<()> {
        for id in users {
            if let Some(user) = self.users.user(id).await? {
                self.resolver.clear_group_cache(&user.principal).await?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for GroupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupManager")
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// AclManager
// ============================================================================

/// Edits and checks access control entries.
#[derive(Clone)]
pub struct AclManager {
    aces: Arc<dyn AceStore>,
    resolver: AclResolver,
    default_sortix: i32,
}

impl AclManager {
    /// Create a manager using [`DEFAULT_SORTIX`] for new entries.
    pub fn new(aces: Arc<dyn AceStore>, resolver: AclResolver) -> Self {
        Self {
            aces,
            resolver,
            default_sortix: DEFAULT_SORTIX,
        }
    }

    /// Use a different sort index for entries created without one.
    pub fn with_default_sortix(mut self, sortix: i32) -> Self {
        self.default_sortix = sortix;
        self
    }

    /// The resolver used by [`check`](Self::check).
    pub fn resolver(&self) -> &AclResolver {
        &self.resolver
    }

    /// Grant `permission` on a resource.
    pub async fn allow(
        &self,
        resource_id: ResourceId,
        principal: Principal,
        permission: &str,
        sortix: Option<i32>,
    ) -> Result<Ace> {
        self.add(resource_id, principal, permission, true, sortix).await
    }

    /// Deny `permission` on a resource.
    pub async fn deny(
        &self,
        resource_id: ResourceId,
        principal: Principal,
        permission: &str,
        sortix: Option<i32>,
    ) -> Result<Ace> {
        self.add(resource_id, principal, permission, false, sortix).await
    }

    async fn add(
        &self,
        resource_id: ResourceId,
        principal: Principal,
        permission: &str,
        allow: bool,
        sortix: Option<i32>,
    ) -> Result<Ace> {
        let snapshot = self.resolver.permissions().load_all().await?;
        let permission_id = snapshot.require(permission)?.id;
        let ace = self
            .aces
            .create_ace(NewAce {
                resource_id,
                principal,
                permission_id,
                allow,
                sortix: Some(sortix.unwrap_or(self.default_sortix)),
                descr: None,
            })
            .await?;
        log::info!(
            "{} '{permission}' to {principal} on resource {resource_id} (ACE {}, sortix {})",
            if allow { "Allowed" } else { "Denied" },
            ace.id,
            ace.sortix
        );
        Ok(ace)
    }

    /// Move an entry within the evaluation order.
    pub async fn set_sortix(&self, id: AceId, sortix: i32) -> Result<Ace> {
        let ace = self.aces.set_sortix(id, sortix).await?;
        log::info!("ACE {id} now has sortix {sortix}");
        Ok(ace)
    }

    /// Delete an entry.
    pub async fn delete_ace(&self, id: AceId) -> Result<Ace> {
        let ace = self.aces.delete_ace(id).await?;
        log::info!("Deleted ACE {id}");
        Ok(ace)
    }

    /// Entries of a resource in evaluation order.
    pub async fn list(&self, resource_id: ResourceId) -> Result<Vec<Ace>> {
        let mut aces = self.aces.aces_for_resource(resource_id).await?;
        sort_aces(&mut aces);
        Ok(aces)
    }

    /// Check a permission.
    pub async fn check(
        &self,
        resource_id: ResourceId,
        permission: &str,
        principals: &EffectivePrincipals,
    ) -> Result<AclDecision> {
        self.resolver.check(resource_id, permission, principals).await
    }
}

impl std::fmt::Debug for AclManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AclManager")
            .field("resolver", &self.resolver)
            .field("default_sortix", &self.default_sortix)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pym_core::{CacheRegion, MemoryCache};
    use pym_storage::{MemoryStore, NewUser, User};

    struct Fixture {
        store: Arc<MemoryStore>,
        permissions: PermissionManager,
        groups: GroupManager,
        acl: AclManager,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        let loader = PermissionLoader::new(
            store.clone(),
            CacheRegion::new(cache.clone(), PermissionLoader::NAMESPACE),
        );
        let resolver = GroupResolver::new(
            store.clone(),
            CacheRegion::new(cache, GroupResolver::NAMESPACE),
        );
        Fixture {
            permissions: PermissionManager::new(store.clone(), loader.clone()),
            groups: GroupManager::new(store.clone(), store.clone(), resolver),
            acl: AclManager::new(store.clone(), AclResolver::new(store.clone(), loader)),
            store,
        }
    }

    async fn user(store: &MemoryStore, principal: &str) -> User {
        store
            .create_user(NewUser {
                principal: principal.into(),
                email: format!("{principal}@example.com"),
                is_enabled: true,
                ..Default::default()
            })
            .await
            .unwrap()
    }

    async fn group(f: &Fixture, name: &str) -> GroupId {
        f.groups
            .create_group(NewGroup {
                name: name.into(),
                ..Default::default()
            })
            .await
            .unwrap()
            .id
    }

    // ------------------------------------------------------------------------
    // Permissions
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_seed_builtin_is_idempotent() {
        let f = fixture();
        assert_eq!(f.permissions.seed_builtin().await.unwrap().len(), 8);
        assert!(f.permissions.seed_builtin().await.unwrap().is_empty());

        let snap = f.permissions.load_all().await.unwrap();
        let write = snap.by_name("write").unwrap();
        let parents: Vec<_> = write.parents.iter().map(|(_, n)| n.as_str()).collect();
        assert_eq!(parents, vec!["read", "visit"]);
        assert_eq!(snap.by_name("visit").unwrap().children.len(), 6);
    }

    #[tokio::test]
    async fn test_mutations_invalidate_snapshot() {
        let f = fixture();
        f.permissions.create("visit", None, None).await.unwrap();
        assert_eq!(f.permissions.load_all().await.unwrap().len(), 1);

        f.permissions.create("read", Some("visit"), None).await.unwrap();
        assert_eq!(f.permissions.load_all().await.unwrap().len(), 2);

        f.permissions.set_parent("read", None).await.unwrap();
        let snap = f.permissions.load_all().await.unwrap();
        assert!(snap.by_name("read").unwrap().is_root());

        assert_eq!(f.permissions.delete("visit").await.unwrap(), 1);
        assert_eq!(f.permissions.load_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_with_unknown_parent() {
        let f = fixture();
        let err = f.permissions.create("read", Some("nope"), None).await.unwrap_err();
        assert!(err.is_client_error());
    }

    // ------------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_membership_changes_refresh_closure() {
        let f = fixture();
        let alice = user(&f.store, "alice").await;
        let outer = group(&f, "outer").await;
        let inner = group(&f, "inner").await;
        let extra = group(&f, "extra").await;

        f.groups
            .add_member(inner, Principal::User(alice.id), None)
            .await
            .unwrap();
        let resolver = f.groups.resolver();
        assert_eq!(resolver.group_ids(&alice).await.unwrap(), HashSet::from([inner]));

        // Adding to a group alice reaches indirectly must refresh her closure.
        f.groups
            .add_member(outer, Principal::Group(inner), None)
            .await
            .unwrap();
        assert_eq!(
            resolver.group_ids(&alice).await.unwrap(),
            HashSet::from([inner, outer])
        );
        let m = f
            .groups
            .add_member(inner, Principal::Group(extra), None)
            .await
            .unwrap();
        assert_eq!(resolver.group_ids(&alice).await.unwrap().len(), 3);

        f.groups.remove_member(m.id).await.unwrap();
        assert_eq!(
            resolver.group_ids(&alice).await.unwrap(),
            HashSet::from([inner, outer])
        );

        f.groups.delete_group(inner).await.unwrap();
        assert!(resolver.group_ids(&alice).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_removing_user_refreshes_their_closure() {
        let f = fixture();
        let alice = user(&f.store, "alice").await;
        let g = group(&f, "g").await;
        let m = f
            .groups
            .add_member(g, Principal::User(alice.id), None)
            .await
            .unwrap();
        assert_eq!(f.groups.resolver().group_ids(&alice).await.unwrap().len(), 1);
        f.groups.remove_member(m.id).await.unwrap();
        assert!(f.groups.resolver().group_ids(&alice).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_affected_users_walks_up() {
        let f = fixture();
        let alice = user(&f.store, "alice").await;
        let bob = user(&f.store, "bob").await;
        let top = group(&f, "top").await;
        let mid = group(&f, "mid").await;
        let leaf = group(&f, "leaf").await;
        f.groups.add_member(top, Principal::Group(mid), None).await.unwrap();
        f.groups.add_member(mid, Principal::Group(leaf), None).await.unwrap();
        f.groups.add_member(top, Principal::User(alice.id), None).await.unwrap();
        f.groups.add_member(leaf, Principal::User(bob.id), None).await.unwrap();

        // alice reaches leaf through top -> mid -> leaf; bob is a direct member
        assert_eq!(
            f.groups.affected_users(leaf).await.unwrap(),
            HashSet::from([alice.id, bob.id])
        );
        assert_eq!(f.groups.affected_users(top).await.unwrap(), HashSet::from([alice.id]));
    }

    // ------------------------------------------------------------------------
    // ACL
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_allow_deny_and_check() {
        let f = fixture();
        f.permissions.seed_builtin().await.unwrap();
        let alice = user(&f.store, "alice").await;
        let staff = group(&f, "staff").await;
        f.groups
            .add_member(staff, Principal::User(alice.id), None)
            .await
            .unwrap();
        let principals = EffectivePrincipals::new(
            alice.id,
            f.groups.resolver().group_ids(&alice).await.unwrap(),
        );
        let res = ResourceId(1);

        assert!(!f.acl.check(res, "read", &principals).await.unwrap().allowed);

        let grant = f
            .acl
            .allow(res, Principal::Group(staff), "write", None)
            .await
            .unwrap();
        assert_eq!(grant.sortix, DEFAULT_SORTIX);
        assert!(f.acl.check(res, "read", &principals).await.unwrap().allowed);
        assert!(f.acl.check(res, "visit", &principals).await.unwrap().allowed);
        assert!(!f.acl.check(res, "delete", &principals).await.unwrap().allowed);

        let deny = f
            .acl
            .deny(res, Principal::User(alice.id), "read", Some(100))
            .await
            .unwrap();
        let d = f.acl.check(res, "write", &principals).await.unwrap();
        assert_eq!(
            d,
            AclDecision {
                allowed: false,
                ace: Some(deny.id),
            }
        );

        // Move the deny behind the grant.
        f.acl.set_sortix(deny.id, 9000).await.unwrap();
        let d = f.acl.check(res, "write", &principals).await.unwrap();
        assert_eq!(
            d,
            AclDecision {
                allowed: true,
                ace: Some(grant.id),
            }
        );
        let order: Vec<_> = f.acl.list(res).await.unwrap().iter().map(|a| a.id).collect();
        assert_eq!(order, vec![grant.id, deny.id]);

        f.acl.delete_ace(grant.id).await.unwrap();
        assert!(!f.acl.check(res, "write", &principals).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_configured_default_sortix() {
        let f = fixture();
        f.permissions.seed_builtin().await.unwrap();
        let alice = user(&f.store, "alice").await;
        let acl = f.acl.clone().with_default_sortix(42);
        let ace = acl
            .allow(ResourceId(1), Principal::User(alice.id), "read", None)
            .await
            .unwrap();
        assert_eq!(ace.sortix, 42);
    }

    #[tokio::test]
    async fn test_unknown_permission_is_error() {
        let f = fixture();
        let alice = user(&f.store, "alice").await;
        let principals = EffectivePrincipals::new(alice.id, std::iter::empty());
        assert!(f.acl.check(ResourceId(1), "fly", &principals).await.is_err());
        assert!(
            f.acl
                .allow(ResourceId(1), Principal::User(alice.id), "fly", None)
                .await
                .is_err()
        );
    }
}
