//! In-memory implementation of every storage trait.
//!
//! Suitable for tests, demos, and the CLI, which loads and saves the whole
//! store as a JSON [`Directory`] document.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pym_core::{AceId, GroupId, MembershipId, PermissionId, ResourceId, TenantId, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::models::{
    Ace, AncestorRow, DEFAULT_SORTIX, DescendantRow, Group, GroupMember, NewAce, NewGroup,
    NewPermission, NewUser, Permission, Principal, User,
};
use crate::traits::{AceStore, GroupStore, PermissionStore, UserStore};
use crate::{Error, Result};

/// Serializable snapshot of a whole store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Directory {
    /// Permission tree.
    #[serde(default)]
    pub permissions: Vec<Permission>,
    /// Groups.
    #[serde(default)]
    pub groups: Vec<Group>,
    /// Group memberships.
    #[serde(default)]
    pub members: Vec<GroupMember>,
    /// User accounts.
    #[serde(default)]
    pub users: Vec<User>,
    /// Access control entries.
    #[serde(default)]
    pub aces: Vec<Ace>,
}

#[derive(Debug, Default)]
struct Inner {
    permissions: BTreeMap<PermissionId, Permission>,
    groups: BTreeMap<GroupId, Group>,
    members: BTreeMap<MembershipId, GroupMember>,
    users: BTreeMap<UserId, User>,
    aces: BTreeMap<AceId, Ace>,
    next_id: i64,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn permission_name_taken(&self, name: &str, except: Option<PermissionId>) -> bool {
        self.permissions
            .values()
            .any(|p| p.name == name && Some(p.id) != except)
    }

    /// Ancestors of `id`, immediate parent first.
    fn ancestors(&self, id: PermissionId) -> Vec<&Permission> {
        let mut out = Vec::new();
        let mut seen = HashSet::from([id]);
        let mut cursor = self.permissions.get(&id).and_then(|p| p.parent_id);
        while let Some(pid) = cursor {
            if !seen.insert(pid) {
                break;
            }
            let Some(parent) = self.permissions.get(&pid) else {
                break;
            };
            out.push(parent);
            cursor = parent.parent_id;
        }
        out
    }

    /// Descendants of `id`, breadth first.
    fn descendants(&self, id: PermissionId) -> Vec<&Permission> {
        let mut out = Vec::new();
        let mut seen = HashSet::from([id]);
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            for child in self
                .permissions
                .values()
                .filter(|p| p.parent_id == Some(current))
            {
                if seen.insert(child.id) {
                    out.push(child);
                    queue.push_back(child.id);
                }
            }
        }
        out
    }

    fn check_parent(
        &self,
        id: Option<PermissionId>,
        parent_id: Option<PermissionId>,
    ) -> Result<()> {
        let Some(pid) = parent_id else {
            return Ok(());
        };
        if !self.permissions.contains_key(&pid) {
            return Err(Error::not_found("permission", pid));
        }
        if let Some(id) = id {
            if pid == id || self.ancestors(pid).iter().any(|p| p.id == id) {
                return Err(Error::invalid(
                    "permission",
                    format!("parent {pid} would make permission {id} its own ancestor"),
                ));
            }
        }
        Ok(())
    }

    fn group_name_taken(&self, tenant_id: Option<TenantId>, name: &str) -> bool {
        self.groups
            .values()
            .any(|g| g.tenant_id == tenant_id && g.name.eq_ignore_ascii_case(name))
    }

    fn principal_exists(&self, principal: Principal) -> bool {
        match principal {
            Principal::User(id) => self.users.contains_key(&id),
            Principal::Group(id) => self.groups.contains_key(&id),
        }
    }

    fn check_user_unique(&self, user: &User) -> Result<()> {
        for other in self.users.values().filter(|u| u.id != user.id) {
            if other.principal.eq_ignore_ascii_case(&user.principal) {
                return Err(Error::duplicate("user principal", &user.principal));
            }
            if other.email.eq_ignore_ascii_case(&user.email) {
                return Err(Error::duplicate("user email", &user.email));
            }
            if other.display_name.eq_ignore_ascii_case(&user.display_name) {
                return Err(Error::duplicate("user display name", &user.display_name));
            }
        }
        Ok(())
    }

    fn user_mut(&mut self, id: UserId) -> Result<&mut User> {
        self.users
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("user", id))
    }

    fn remove_principal_refs(&mut self, principal: Principal) {
        self.members
            .retain(|_, m| m.member != principal && Principal::Group(m.group_id) != principal);
        self.aces.retain(|_, a| a.principal != principal);
    }

    fn to_directory(&self) -> Directory {
        Directory {
            permissions: self.permissions.values().cloned().collect(),
            groups: self.groups.values().cloned().collect(),
            members: self.members.values().cloned().collect(),
            users: self.users.values().cloned().collect(),
            aces: self.aces.values().cloned().collect(),
        }
    }

    /// Build from a directory, enforcing the same constraints as the
    /// individual create operations.
    fn from_directory(dir: Directory) -> Result<Self> {
        let mut inner = Inner::default();
        let mut max_id = 0;

        for p in &dir.permissions {
            if inner.permission_name_taken(&p.name, None) {
                return Err(Error::duplicate("permission", &p.name));
            }
            if inner.permissions.insert(p.id, p.clone()).is_some() {
                return Err(Error::duplicate("permission id", p.id));
            }
            max_id = max_id.max(p.id.get());
        }
        for p in &dir.permissions {
            if let Some(pid) = p.parent_id {
                if !inner.permissions.contains_key(&pid) {
                    return Err(Error::not_found("permission", pid));
                }
                if inner.ancestors(pid).iter().any(|a| a.id == p.id) || pid == p.id {
                    return Err(Error::invalid(
                        "permission",
                        format!("cycle through permission '{}'", p.name),
                    ));
                }
            }
        }

        for g in &dir.groups {
            if inner.group_name_taken(g.tenant_id, &g.name) {
                return Err(Error::duplicate("group", &g.name));
            }
            if inner.groups.insert(g.id, g.clone()).is_some() {
                return Err(Error::duplicate("group id", g.id));
            }
            max_id = max_id.max(g.id.get());
        }

        for u in &dir.users {
            inner.check_user_unique(u)?;
            if inner.users.insert(u.id, u.clone()).is_some() {
                return Err(Error::duplicate("user id", u.id));
            }
            max_id = max_id.max(u.id.get());
        }

        for m in &dir.members {
            if !inner.groups.contains_key(&m.group_id) {
                return Err(Error::not_found("group", m.group_id));
            }
            if !inner.principal_exists(m.member) {
                return Err(Error::not_found("member", m.member));
            }
            if inner
                .members
                .values()
                .any(|o| o.group_id == m.group_id && o.member == m.member)
            {
                return Err(Error::duplicate(
                    "membership",
                    format!("{} in g:{}", m.member, m.group_id),
                ));
            }
            inner.members.insert(m.id, m.clone());
            max_id = max_id.max(m.id.get());
        }

        for a in &dir.aces {
            if !inner.permissions.contains_key(&a.permission_id) {
                return Err(Error::not_found("permission", a.permission_id));
            }
            if !inner.principal_exists(a.principal) {
                return Err(Error::not_found("principal", a.principal));
            }
            if inner.aces.values().any(|o| {
                o.resource_id == a.resource_id
                    && o.principal == a.principal
                    && o.permission_id == a.permission_id
            }) {
                return Err(Error::duplicate("ace", a.id));
            }
            inner.aces.insert(a.id, a.clone());
            max_id = max_id.max(a.id.get());
        }

        inner.next_id = max_id;
        Ok(inner)
    }
}

/// Thread-safe in-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store from a directory document.
    pub fn from_directory(dir: Directory) -> Result<Self> {
        Ok(Self {
            inner: RwLock::new(Inner::from_directory(dir)?),
        })
    }

    /// Snapshot the store as a directory document.
    pub async fn to_directory(&self) -> Directory {
        self.inner.read().await.to_directory()
    }

    /// Load a store from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| pym_core::Error::io_with_path(e, path))?;
        let dir: Directory = serde_json::from_str(&content)?;
        log::debug!(
            "Loaded directory from {}: {} permissions, {} groups, {} users, {} aces",
            path.display(),
            dir.permissions.len(),
            dir.groups.len(),
            dir.users.len(),
            dir.aces.len()
        );
        Self::from_directory(dir)
    }

    /// Save the store as pretty JSON.
    pub async fn save_json(&self, path: &Path) -> Result<()> {
        let dir = self.to_directory().await;
        let content = serde_json::to_string_pretty(&dir)?;
        std::fs::write(path, content).map_err(|e| pym_core::Error::io_with_path(e, path))?;
        Ok(())
    }
}

// ============================================================================
// PermissionStore
// ============================================================================

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn permissions_with_parents(&self) -> Result<Vec<AncestorRow>> {
        let inner = self.inner.read().await;
        Ok(inner
            .permissions
            .values()
            .map(|p| AncestorRow {
                id: p.id,
                name: p.name.clone(),
                parents: inner
                    .ancestors(p.id)
                    .into_iter()
                    .map(|a| (a.id, a.name.clone()))
                    .collect(),
            })
            .collect())
    }

    async fn permissions_with_children(&self) -> Result<Vec<DescendantRow>> {
        let inner = self.inner.read().await;
        Ok(inner
            .permissions
            .values()
            .filter_map(|p| {
                let children: Vec<_> = inner
                    .descendants(p.id)
                    .into_iter()
                    .map(|c| (c.id, c.name.clone()))
                    .collect();
                (!children.is_empty()).then(|| DescendantRow {
                    id: p.id,
                    name: p.name.clone(),
                    children,
                })
            })
            .collect())
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>> {
        Ok(self.inner.read().await.permissions.values().cloned().collect())
    }

    async fn permission_by_name(&self, name: &str) -> Result<Option<Permission>> {
        Ok(self
            .inner
            .read()
            .await
            .permissions
            .values()
            .find(|p| p.name == name)
            .cloned())
    }

    async fn create_permission(&self, new: NewPermission) -> Result<Permission> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(Error::invalid("permission", "name must not be empty"));
        }
        let mut inner = self.inner.write().await;
        if inner.permission_name_taken(name, None) {
            return Err(Error::duplicate("permission", name));
        }
        inner.check_parent(None, new.parent_id)?;
        let permission = Permission {
            id: PermissionId(inner.next_id()),
            name: name.to_string(),
            parent_id: new.parent_id,
            descr: new.descr,
        };
        inner.permissions.insert(permission.id, permission.clone());
        log::debug!("Created permission {} '{}'", permission.id, permission.name);
        Ok(permission)
    }

    async fn set_permission_parent(
        &self,
        id: PermissionId,
        parent_id: Option<PermissionId>,
    ) -> Result<Permission> {
        let mut inner = self.inner.write().await;
        if !inner.permissions.contains_key(&id) {
            return Err(Error::not_found("permission", id));
        }
        inner.check_parent(Some(id), parent_id)?;
        let permission = inner
            .permissions
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("permission", id))?;
        permission.parent_id = parent_id;
        Ok(permission.clone())
    }

    async fn delete_permission(&self, id: PermissionId) -> Result<Vec<PermissionId>> {
        let mut inner = self.inner.write().await;
        if !inner.permissions.contains_key(&id) {
            return Err(Error::not_found("permission", id));
        }
        let mut doomed: Vec<PermissionId> = vec![id];
        doomed.extend(inner.descendants(id).into_iter().map(|p| p.id));
        let set: HashSet<_> = doomed.iter().copied().collect();
        inner.permissions.retain(|pid, _| !set.contains(pid));
        inner.aces.retain(|_, a| !set.contains(&a.permission_id));
        log::debug!("Deleted permission {id} and {} descendants", doomed.len() - 1);
        Ok(doomed)
    }
}

// ============================================================================
// GroupStore
// ============================================================================

#[async_trait]
impl GroupStore for MemoryStore {
    async fn group(&self, id: GroupId) -> Result<Option<Group>> {
        Ok(self.inner.read().await.groups.get(&id).cloned())
    }

    async fn group_by_name(
        &self,
        tenant_id: Option<TenantId>,
        name: &str,
    ) -> Result<Option<Group>> {
        Ok(self
            .inner
            .read()
            .await
            .groups
            .values()
            .find(|g| g.tenant_id == tenant_id && g.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn list_groups(&self) -> Result<Vec<Group>> {
        Ok(self.inner.read().await.groups.values().cloned().collect())
    }

    async fn create_group(&self, new: NewGroup) -> Result<Group> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(Error::invalid("group", "name must not be empty"));
        }
        let mut inner = self.inner.write().await;
        if inner.group_name_taken(new.tenant_id, name) {
            return Err(Error::duplicate("group", name));
        }
        let group = Group {
            id: GroupId(inner.next_id()),
            tenant_id: new.tenant_id,
            name: name.to_string(),
            kind: new.kind,
            descr: new.descr,
        };
        inner.groups.insert(group.id, group.clone());
        Ok(group)
    }

    async fn delete_group(&self, id: GroupId) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.groups.remove(&id).is_none() {
            return Err(Error::not_found("group", id));
        }
        inner.remove_principal_refs(Principal::Group(id));
        Ok(())
    }

    async fn direct_groups_of_user(&self, user_id: UserId) -> Result<Vec<Group>> {
        let inner = self.inner.read().await;
        Ok(inner
            .members
            .values()
            .filter(|m| m.member == Principal::User(user_id))
            .filter_map(|m| inner.groups.get(&m.group_id).cloned())
            .collect())
    }

    async fn member_groups_of(&self, group_id: GroupId) -> Result<Vec<Group>> {
        let inner = self.inner.read().await;
        Ok(inner
            .members
            .values()
            .filter(|m| m.group_id == group_id)
            .filter_map(|m| match m.member {
                Principal::Group(gid) => inner.groups.get(&gid).cloned(),
                Principal::User(_) => None,
            })
            .collect())
    }

    async fn groups_containing_group(&self, group_id: GroupId) -> Result<Vec<GroupId>> {
        Ok(self
            .inner
            .read()
            .await
            .members
            .values()
            .filter(|m| m.member == Principal::Group(group_id))
            .map(|m| m.group_id)
            .collect())
    }

    async fn user_members_of(&self, group_id: GroupId) -> Result<Vec<UserId>> {
        Ok(self
            .inner
            .read()
            .await
            .members
            .values()
            .filter(|m| m.group_id == group_id)
            .filter_map(|m| match m.member {
                Principal::User(uid) => Some(uid),
                Principal::Group(_) => None,
            })
            .collect())
    }

    async fn add_member(
        &self,
        group_id: GroupId,
        member: Principal,
        descr: Option<String>,
    ) -> Result<GroupMember> {
        let mut inner = self.inner.write().await;
        if !inner.groups.contains_key(&group_id) {
            return Err(Error::not_found("group", group_id));
        }
        if !inner.principal_exists(member) {
            return Err(Error::not_found("member", member));
        }
        if inner
            .members
            .values()
            .any(|m| m.group_id == group_id && m.member == member)
        {
            return Err(Error::duplicate("membership", format!("{member} in g:{group_id}")));
        }
        let membership = GroupMember {
            id: MembershipId(inner.next_id()),
            group_id,
            member,
            descr,
        };
        inner.members.insert(membership.id, membership.clone());
        Ok(membership)
    }

    async fn remove_member(&self, id: MembershipId) -> Result<GroupMember> {
        self.inner
            .write()
            .await
            .members
            .remove(&id)
            .ok_or_else(|| Error::not_found("membership", id))
    }

    async fn list_members(&self) -> Result<Vec<GroupMember>> {
        Ok(self.inner.read().await.members.values().cloned().collect())
    }
}

// ============================================================================
// UserStore
// ============================================================================

#[async_trait]
impl UserStore for MemoryStore {
    async fn user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn user_by_principal(&self, principal: &str) -> Result<Option<User>> {
        let principal = principal.trim();
        Ok(self
            .inner
            .read()
            .await
            .users
            .values()
            .find(|u| u.principal.eq_ignore_ascii_case(principal))
            .cloned())
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = email.trim();
        Ok(self
            .inner
            .read()
            .await
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        Ok(self.inner.read().await.users.values().cloned().collect())
    }

    async fn create_user(&self, new: NewUser) -> Result<User> {
        let principal = new.principal.trim().to_string();
        if principal.is_empty() {
            return Err(Error::invalid("user", "principal must not be empty"));
        }
        let display_name = match new.display_name.trim() {
            "" => principal.clone(),
            name => name.to_string(),
        };
        let mut inner = self.inner.write().await;
        let user = User {
            id: UserId(inner.next_id()),
            principal,
            email: new.email.trim().to_lowercase(),
            display_name,
            first_name: new.first_name,
            last_name: new.last_name,
            pwd: new.pwd,
            pwd_expires: None,
            identity_url: None,
            gplus_id: None,
            is_enabled: new.is_enabled,
            disable_reason: None,
            is_blocked: false,
            blocked_since: None,
            blocked_until: None,
            block_reason: None,
            login_time: None,
            login_ip: None,
            access_time: None,
            logout_time: None,
            kick_session: false,
            kick_reason: None,
            descr: new.descr,
            profile: new.profile,
            rc: Default::default(),
        };
        inner.check_user_unique(&user)?;
        inner.users.insert(user.id, user.clone());
        log::debug!("Created user {} '{}'", user.id, user.principal);
        Ok(user)
    }

    async fn update_user(&self, mut user: User) -> Result<User> {
        user.email = user.email.trim().to_lowercase();
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&user.id) {
            return Err(Error::not_found("user", user.id));
        }
        inner.check_user_unique(&user)?;
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn delete_user(&self, id: UserId) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.users.remove(&id).is_none() {
            return Err(Error::not_found("user", id));
        }
        inner.remove_principal_refs(Principal::User(id));
        Ok(())
    }

    async fn record_login(&self, id: UserId, at: DateTime<Utc>, ip: Option<String>) -> Result<()> {
        let mut inner = self.inner.write().await;
        let user = inner.user_mut(id)?;
        user.login_time = Some(at);
        user.access_time = Some(at);
        user.login_ip = ip;
        user.kick_session = false;
        user.kick_reason = None;
        Ok(())
    }

    async fn record_logout(&self, id: UserId, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.write().await;
        let user = inner.user_mut(id)?;
        user.logout_time = Some(at);
        user.login_time = None;
        user.login_ip = None;
        Ok(())
    }
}

// ============================================================================
// AceStore
// ============================================================================

#[async_trait]
impl AceStore for MemoryStore {
    async fn aces_for_resource(&self, resource_id: ResourceId) -> Result<Vec<Ace>> {
        Ok(self
            .inner
            .read()
            .await
            .aces
            .values()
            .filter(|a| a.resource_id == resource_id)
            .cloned()
            .collect())
    }

    async fn list_aces(&self) -> Result<Vec<Ace>> {
        Ok(self.inner.read().await.aces.values().cloned().collect())
    }

    async fn create_ace(&self, new: NewAce) -> Result<Ace> {
        let mut inner = self.inner.write().await;
        if !inner.permissions.contains_key(&new.permission_id) {
            return Err(Error::not_found("permission", new.permission_id));
        }
        if !inner.principal_exists(new.principal) {
            return Err(Error::not_found("principal", new.principal));
        }
        if inner.aces.values().any(|a| {
            a.resource_id == new.resource_id
                && a.principal == new.principal
                && a.permission_id == new.permission_id
        }) {
            return Err(Error::duplicate(
                "ace",
                format!(
                    "resource {} / {} / permission {}",
                    new.resource_id, new.principal, new.permission_id
                ),
            ));
        }
        let ace = Ace {
            id: AceId(inner.next_id()),
            resource_id: new.resource_id,
            principal: new.principal,
            permission_id: new.permission_id,
            allow: new.allow,
            sortix: new.sortix.unwrap_or(DEFAULT_SORTIX),
            descr: new.descr,
        };
        inner.aces.insert(ace.id, ace.clone());
        Ok(ace)
    }

    async fn set_sortix(&self, id: AceId, sortix: i32) -> Result<Ace> {
        let mut inner = self.inner.write().await;
        let ace = inner
            .aces
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("ace", id))?;
        ace.sortix = sortix;
        Ok(ace.clone())
    }

    async fn delete_ace(&self, id: AceId) -> Result<Ace> {
        self.inner
            .write()
            .await
            .aces
            .remove(&id)
            .ok_or_else(|| Error::not_found("ace", id))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn perm(store: &MemoryStore, name: &str, parent: Option<PermissionId>) -> PermissionId {
        store
            .create_permission(NewPermission {
                name: name.into(),
                parent_id: parent,
                descr: None,
            })
            .await
            .unwrap()
            .id
    }

    async fn user(store: &MemoryStore, principal: &str) -> UserId {
        store
            .create_user(NewUser {
                principal: principal.into(),
                email: format!("{principal}@Example.com"),
                is_enabled: true,
                ..Default::default()
            })
            .await
            .unwrap()
            .id
    }

    async fn group(store: &MemoryStore, name: &str) -> GroupId {
        store
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
    async fn test_permission_rows() {
        let store = MemoryStore::new();
        let visit = perm(&store, "visit", None).await;
        let read = perm(&store, "read", Some(visit)).await;
        let write = perm(&store, "write", Some(read)).await;

        let parents = store.permissions_with_parents().await.unwrap();
        let write_row = parents.iter().find(|r| r.id == write).unwrap();
        assert_eq!(
            write_row.parents,
            vec![(read, "read".to_string()), (visit, "visit".to_string())]
        );

        let children = store.permissions_with_children().await.unwrap();
        assert_eq!(children.len(), 2);
        let visit_row = children.iter().find(|r| r.id == visit).unwrap();
        assert_eq!(visit_row.children.len(), 2);
    }

    #[tokio::test]
    async fn test_permission_name_unique() {
        let store = MemoryStore::new();
        perm(&store, "read", None).await;
        let err = store
            .create_permission(NewPermission {
                name: "read".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Duplicate { .. }));
    }

    #[tokio::test]
    async fn test_permission_cycle_rejected() {
        let store = MemoryStore::new();
        let a = perm(&store, "a", None).await;
        let b = perm(&store, "b", Some(a)).await;
        let c = perm(&store, "c", Some(b)).await;

        let err = store.set_permission_parent(a, Some(c)).await.unwrap_err();
        assert!(matches!(err, Error::Invalid { .. }));
        let err = store.set_permission_parent(a, Some(a)).await.unwrap_err();
        assert!(matches!(err, Error::Invalid { .. }));
        assert!(store.set_permission_parent(c, Some(a)).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_permission_cascades() {
        let store = MemoryStore::new();
        let visit = perm(&store, "visit", None).await;
        let read = perm(&store, "read", Some(visit)).await;
        perm(&store, "write", Some(read)).await;
        let other = perm(&store, "other", None).await;
        let u = user(&store, "alice").await;
        store
            .create_ace(NewAce {
                resource_id: ResourceId(1),
                principal: Principal::User(u),
                permission_id: read,
                allow: true,
                sortix: None,
                descr: None,
            })
            .await
            .unwrap();

        let deleted = store.delete_permission(read).await.unwrap();
        assert_eq!(deleted.len(), 2);
        let left: Vec<_> = store
            .list_permissions()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(left, vec![visit, other]);
        assert!(store.list_aces().await.unwrap().is_empty());
    }

    // ------------------------------------------------------------------------
    // Groups and users
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_group_name_unique_per_tenant() {
        let store = MemoryStore::new();
        group(&store, "Staff").await;
        let err = store
            .create_group(NewGroup {
                name: "staff".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Duplicate { .. }));
        assert!(
            store
                .create_group(NewGroup {
                    tenant_id: Some(TenantId(7)),
                    name: "staff".into(),
                    ..Default::default()
                })
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_membership_unique_and_queries() {
        let store = MemoryStore::new();
        let u = user(&store, "alice").await;
        let a = group(&store, "a").await;
        let b = group(&store, "b").await;
        store.add_member(a, Principal::User(u), None).await.unwrap();
        store.add_member(a, Principal::Group(b), None).await.unwrap();
        assert!(store.add_member(a, Principal::User(u), None).await.is_err());

        let direct = store.direct_groups_of_user(u).await.unwrap();
        assert_eq!(direct.iter().map(|g| g.id).collect::<Vec<_>>(), vec![a]);
        let members = store.member_groups_of(a).await.unwrap();
        assert_eq!(members.iter().map(|g| g.id).collect::<Vec<_>>(), vec![b]);
        assert_eq!(store.groups_containing_group(b).await.unwrap(), vec![a]);
        assert_eq!(store.user_members_of(a).await.unwrap(), vec![u]);
    }

    #[tokio::test]
    async fn test_user_lookup_case_insensitive() {
        let store = MemoryStore::new();
        let id = user(&store, "Alice").await;
        let by_principal = store.user_by_principal("ALICE").await.unwrap().unwrap();
        assert_eq!(by_principal.id, id);
        assert_eq!(by_principal.email, "alice@example.com");
        let by_email = store.user_by_email("Alice@EXAMPLE.com").await.unwrap().unwrap();
        assert_eq!(by_email.id, id);
        assert_eq!(by_email.display_name, "Alice");
    }

    #[tokio::test]
    async fn test_user_uniqueness() {
        let store = MemoryStore::new();
        user(&store, "alice").await;
        let err = store
            .create_user(NewUser {
                principal: "ALICE".into(),
                email: "other@example.com".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Duplicate { .. }));
    }

    #[tokio::test]
    async fn test_delete_group_cascades() {
        let store = MemoryStore::new();
        let u = user(&store, "alice").await;
        let a = group(&store, "a").await;
        let b = group(&store, "b").await;
        store.add_member(a, Principal::Group(b), None).await.unwrap();
        store.add_member(b, Principal::User(u), None).await.unwrap();
        let read = perm(&store, "read", None).await;
        store
            .create_ace(NewAce {
                resource_id: ResourceId(1),
                principal: Principal::Group(b),
                permission_id: read,
                allow: true,
                sortix: Some(10),
                descr: None,
            })
            .await
            .unwrap();

        store.delete_group(b).await.unwrap();
        assert!(store.list_members().await.unwrap().is_empty());
        assert!(store.list_aces().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_login_and_logout() {
        let store = MemoryStore::new();
        let u = user(&store, "alice").await;
        let now = Utc::now();
        store
            .record_login(u, now, Some("10.0.0.1".into()))
            .await
            .unwrap();
        let rec = store.user(u).await.unwrap().unwrap();
        assert_eq!(rec.login_time, Some(now));
        assert_eq!(rec.login_ip.as_deref(), Some("10.0.0.1"));
        store.record_logout(u, now).await.unwrap();
        let rec = store.user(u).await.unwrap().unwrap();
        assert_eq!(rec.logout_time, Some(now));
        assert!(rec.login_time.is_none());
    }

    // ------------------------------------------------------------------------
    // Aces
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_ace_unique_and_default_sortix() {
        let store = MemoryStore::new();
        let u = user(&store, "alice").await;
        let read = perm(&store, "read", None).await;
        let new = NewAce {
            resource_id: ResourceId(3),
            principal: Principal::User(u),
            permission_id: read,
            allow: true,
            sortix: None,
            descr: None,
        };
        let ace = store.create_ace(new.clone()).await.unwrap();
        assert_eq!(ace.sortix, DEFAULT_SORTIX);
        assert!(matches!(
            store.create_ace(new).await.unwrap_err(),
            Error::Duplicate { .. }
        ));
        let ace = store.set_sortix(ace.id, 1).await.unwrap();
        assert_eq!(ace.sortix, 1);
        assert_eq!(store.aces_for_resource(ResourceId(3)).await.unwrap().len(), 1);
        assert!(store.aces_for_resource(ResourceId(4)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ace_unknown_principal() {
        let store = MemoryStore::new();
        let read = perm(&store, "read", None).await;
        let err = store
            .create_ace(NewAce {
                resource_id: ResourceId(3),
                principal: Principal::User(UserId(999)),
                permission_id: read,
                allow: true,
                sortix: None,
                descr: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    // ------------------------------------------------------------------------
    // Directory
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_directory_json_file() {
        let store = MemoryStore::new();
        let visit = perm(&store, "visit", None).await;
        perm(&store, "read", Some(visit)).await;
        user(&store, "alice").await;

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("directory.json");
        store.save_json(&path).await.unwrap();

        let loaded = MemoryStore::load_json(&path).unwrap();
        assert_eq!(loaded.to_directory().await, store.to_directory().await);
        let next = perm(&loaded, "write", None).await;
        assert!(next.get() > visit.get());
    }

    #[test]
    fn test_directory_with_cycle_rejected() {
        let dir: Directory = serde_json::from_value(serde_json::json!({
            "permissions": [
                {"id": 1, "name": "a", "parent_id": 2},
                {"id": 2, "name": "b", "parent_id": 1}
            ]
        }))
        .unwrap();
        assert!(MemoryStore::from_directory(dir).is_err());
    }

    #[test]
    fn test_directory_dangling_member_rejected() {
        let dir: Directory = serde_json::from_value(serde_json::json!({
            "groups": [{"id": 1, "name": "a"}],
            "members": [{"id": 2, "group_id": 1, "member": {"type": "user", "id": 9}}]
        }))
        .unwrap();
        let err = MemoryStore::from_directory(dir).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
