//! ACL evaluation.
//!
//! The entries of a resource are sorted by `(sortix, id)` and scanned; the
//! first entry whose principal is one of the caller's and whose permission
//! covers the requested one decides. No match means deny.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use pym_core::{AceId, GroupId, PermissionId, ResourceId, UserId};
use pym_storage::{Ace, AceStore, Principal};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::permission::{PermissionLoader, PermissionSnapshot};

/// The user and every group they resolve to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectivePrincipals {
    /// The user.
    pub user_id: UserId,
    /// Transitive group closure of the user.
    pub group_ids: HashSet<GroupId>,
}

impl EffectivePrincipals {
    /// Create a principal set.
    pub fn new(user_id: UserId, group_ids: impl IntoIterator<Item = GroupId>) -> Self {
        Self {
            user_id,
            group_ids: group_ids.into_iter().collect(),
        }
    }

    /// Whether an entry naming `principal` applies.
    pub fn contains(&self, principal: &Principal) -> bool {
        match principal {
            Principal::User(id) => *id == self.user_id,
            Principal::Group(id) => self.group_ids.contains(id),
        }
    }

    /// `u:`/`g:` prefixed principal strings, user first, groups by id.
    pub fn to_strings(&self) -> Vec<String> {
        let mut groups: Vec<_> = self.group_ids.iter().copied().collect();
        groups.sort();
        std::iter::once(Principal::User(self.user_id))
            .chain(groups.into_iter().map(Principal::Group))
            .map(|p| p.to_string())
            .collect()
    }
}

/// Outcome of an ACL check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclDecision {
    /// Whether access is granted.
    pub allowed: bool,
    /// The deciding entry; `None` when nothing matched.
    pub ace: Option<AceId>,
}

impl AclDecision {
    /// The decision when no entry matches.
    pub const DEFAULT_DENY: AclDecision = AclDecision {
        allowed: false,
        ace: None,
    };
}

impl fmt::Display for AclDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.allowed { "allowed" } else { "denied" };
        match self.ace {
            Some(id) => write!(f, "{verdict} by ACE {id}"),
            None => write!(f, "{verdict} (no matching ACE)"),
        }
    }
}

/// Sort entries into evaluation order: sort index, then id.
pub fn sort_aces(aces: &mut [Ace]) {
    aces.sort_by_key(|a| (a.sortix, a.id));
}

/// Evaluate the entries of one resource.
///
/// `aces` may come in any order. An entry whose permission is missing from
/// the snapshot never matches.
pub fn evaluate(
    aces: &[Ace],
    requested: PermissionId,
    principals: &EffectivePrincipals,
    snapshot: &PermissionSnapshot,
) -> AclDecision {
    let mut ordered: Vec<&Ace> = aces.iter().collect();
    ordered.sort_by_key(|a| (a.sortix, a.id));

    for ace in ordered {
        if !principals.contains(&ace.principal) {
            continue;
        }
        if snapshot.get(ace.permission_id).is_none() {
            log::warn!(
                "ACE {} refers to unknown permission {}",
                ace.id,
                ace.permission_id
            );
            continue;
        }
        let covers = if ace.allow {
            snapshot.grant_covers(ace.permission_id, requested)
        } else {
            snapshot.deny_covers(ace.permission_id, requested)
        };
        if covers {
            return AclDecision {
                allowed: ace.allow,
                ace: Some(ace.id),
            };
        }
    }
    AclDecision::DEFAULT_DENY
}

// ============================================================================
// AclResolver
// ============================================================================

/// Store-backed ACL checks.
#[derive(Clone)]
pub struct AclResolver {
    aces: Arc<dyn AceStore>,
    permissions: PermissionLoader,
}

impl AclResolver {
    /// Create a resolver.
    pub fn new(aces: Arc<dyn AceStore>, permissions: PermissionLoader) -> Self {
        Self { aces, permissions }
    }

    /// The permission loader used for implication checks.
    pub fn permissions(&self) -> &PermissionLoader {
        &self.permissions
    }

    /// Check `permission` (by name) on a resource.
    ///
    /// Fails for a permission name that is not in the tree.
    pub async fn check(
        &self,
        resource_id: ResourceId,
        permission: &str,
        principals: &EffectivePrincipals,
    ) -> Result<AclDecision> {
        let snapshot = self.permissions.load_all().await?;
        let requested = snapshot.require(permission)?.id;
        let aces = self.aces.aces_for_resource(resource_id).await?;
        let decision = evaluate(&aces, requested, principals, &snapshot);
        log::debug!(
            "ACL check u:{} '{permission}' on resource {resource_id}: {decision}",
            principals.user_id
        );
        Ok(decision)
    }

    /// Preload the entries of the given resources into a synchronous
    /// [`AclChecker`].
    pub async fn checker(
        &self,
        resources: impl IntoIterator<Item = ResourceId>,
        principals: EffectivePrincipals,
    ) -> Result<AclChecker> {
        let snapshot = self.permissions.load_all().await?;
        let mut by_resource = HashMap::new();
        for resource_id in resources {
            if by_resource.contains_key(&resource_id) {
                continue;
            }
            let mut aces = self.aces.aces_for_resource(resource_id).await?;
            sort_aces(&mut aces);
            by_resource.insert(resource_id, aces);
        }
        Ok(AclChecker {
            snapshot,
            aces: by_resource,
            principals,
        })
    }
}

impl fmt::Debug for AclResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AclResolver")
            .field("permissions", &self.permissions)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// PermissionChecker
// ============================================================================

/// Synchronous permission check against a resource lineage.
///
/// `lineage` starts at the resource itself and continues through its
/// ancestors. The first resource with a matching entry decides; a lineage
/// without any match is denied.
pub trait PermissionChecker: Send + Sync {
    /// Whether `permission` is granted.
    fn has_permission(&self, lineage: &[ResourceId], permission: &str) -> bool;
}

/// [`PermissionChecker`] over preloaded entries.
#[derive(Clone, Debug)]
pub struct AclChecker {
    snapshot: PermissionSnapshot,
    aces: HashMap<ResourceId, Vec<Ace>>,
    principals: EffectivePrincipals,
}

impl AclChecker {
    /// Build from already loaded parts.
    pub fn new(
        snapshot: PermissionSnapshot,
        aces: impl IntoIterator<Item = Ace>,
        principals: EffectivePrincipals,
    ) -> Self {
        let mut by_resource: HashMap<ResourceId, Vec<Ace>> = HashMap::new();
        for ace in aces {
            by_resource.entry(ace.resource_id).or_default().push(ace);
        }
        for list in by_resource.values_mut() {
            sort_aces(list);
        }
        Self {
            snapshot,
            aces: by_resource,
            principals,
        }
    }

    /// Decision for a lineage.
    pub fn decide(&self, lineage: &[ResourceId], permission: &str) -> AclDecision {
        let Some(requested) = self.snapshot.by_name(permission).map(|e| e.id) else {
            log::warn!("Permission check for unknown permission '{permission}'");
            return AclDecision::DEFAULT_DENY;
        };
        for resource_id in lineage {
            let Some(aces) = self.aces.get(resource_id) else {
                continue;
            };
            let decision = evaluate(aces, requested, &self.principals, &self.snapshot);
            if decision.ace.is_some() {
                return decision;
            }
        }
        AclDecision::DEFAULT_DENY
    }
}

impl PermissionChecker for AclChecker {
    fn has_permission(&self, lineage: &[ResourceId], permission: &str) -> bool {
        self.decide(lineage, permission).allowed
    }
}

// ============================================================================
// Tests
// ============================================================================
