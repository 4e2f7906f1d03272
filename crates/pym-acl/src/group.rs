//! Transitive group membership.
//!
//! A user's groups are their direct groups plus every group nested inside
//! those, at any depth. Membership graphs may contain cycles; each group is
//! expanded at most once.

use std::collections::HashSet;
use std::sync::Arc;

use pym_core::ids::normalize_principal;
use pym_core::{CacheRegion, GroupId};
use pym_storage::{GroupStore, User};

use crate::{Error, Result};

/// A resolved group: id and name.
pub type GroupRef = (GroupId, String);

/// Computes and caches group closures.
///
/// Results are cached per user under `user:<principal>:groups` in the
/// resolver's cache region, with the principal lower-cased. Every mutation
/// of group membership must call [`clear_group_cache`](Self::clear_group_cache)
/// for each affected user.
#[derive(Clone)]
pub struct GroupResolver {
    store: Arc<dyn GroupStore>,
    cache: CacheRegion,
}

impl GroupResolver {
    /// Cache namespace.
    pub const NAMESPACE: &'static str = "auth";

    /// Create a resolver.
    pub fn new(store: Arc<dyn GroupStore>, cache: CacheRegion) -> Self {
        Self { store, cache }
    }

    fn cache_key(principal: &str) -> String {
        format!("user:{}:groups", normalize_principal(principal))
    }

    /// All groups `user` belongs to, directly or through nesting.
    ///
    /// Pairs come in depth-first discovery order, each group once. Callers
    /// should only rely on set membership.
    pub async fn load_all_groups(&self, user: &User) -> Result<Vec<GroupRef>> {
        let key = Self::cache_key(&user.principal);
        self.cache
            .get_or_create(&key, move || async move {
                let groups = self.expand(user).await?;
                log::debug!(
                    "Resolved {} groups for '{}': {:?}",
                    groups.len(),
                    user.principal,
                    groups.iter().map(|(id, _)| id.get()).collect::<Vec<_>>()
                );
                Ok::<_, Error>(groups)
            })
            .await
    }

    /// Group ids of [`load_all_groups`](Self::load_all_groups).
    pub async fn group_ids(&self, user: &User) -> Result<HashSet<GroupId>> {
        Ok(self
            .load_all_groups(user)
            .await?
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }

    /// Drop the cached closure of one user.
    pub async fn clear_group_cache(&self, principal: &str) -> Result<()> {
        self.cache.delete(&Self::cache_key(principal)).await?;
        Ok(())
    }

    /// Pre-order depth-first walk over an explicit stack.
    async fn expand(&self, user: &User) -> Result<Vec<GroupRef>> {
        let mut stack: Vec<GroupRef> = self
            .store
            .direct_groups_of_user(user.id)
            .await?
            .into_iter()
            .rev()
            .map(|g| (g.id, g.name))
            .collect();
        let mut visited = HashSet::new();
        let mut out = Vec::new();

        while let Some((id, name)) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            out.push((id, name));
            let nested = self.store.member_groups_of(id).await?;
            stack.extend(
                nested
                    .into_iter()
                    .rev()
                    .filter(|g| !visited.contains(&g.id))
                    .map(|g| (g.id, g.name)),
            );
        }
        Ok(out)
    }
}

impl std::fmt::Debug for GroupResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupResolver")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pym_core::{CacheBackend, MemoryCache};
    use pym_storage::{MemoryStore, NewGroup, NewUser, Principal, UserStore};
    use proptest::prelude::*;

    struct Fixture {
        store: Arc<MemoryStore>,
        cache: Arc<MemoryCache>,
        resolver: GroupResolver,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        let resolver = GroupResolver::new(
            store.clone(),
            CacheRegion::new(cache.clone(), GroupResolver::NAMESPACE),
        );
        Fixture {
            store,
            cache,
            resolver,
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

    fn ids(groups: &[GroupRef]) -> Vec<GroupId> {
        groups.iter().map(|(id, _)| *id).collect()
    }

    #[tokio::test]
    async fn test_nested_groups_depth_first() {
        let f = fixture();
        let alice = user(&f.store, "alice").await;
        let a = group(&f.store, "a").await;
        let b = group(&f.store, "b").await;
        let c = group(&f.store, "c").await;
        let d = group(&f.store, "d").await;
        // alice in a and d; b in a; c in b
        f.store.add_member(a, Principal::User(alice.id), None).await.unwrap();
        f.store.add_member(d, Principal::User(alice.id), None).await.unwrap();
        f.store.add_member(a, Principal::Group(b), None).await.unwrap();
        f.store.add_member(b, Principal::Group(c), None).await.unwrap();

        let groups = f.resolver.load_all_groups(&alice).await.unwrap();
        assert_eq!(ids(&groups), vec![a, b, c, d]);
        assert_eq!(groups[0].1, "a");
    }

    #[tokio::test]
    async fn test_cycle_terminates_each_group_once() {
        let f = fixture();
        let alice = user(&f.store, "alice").await;
        let a = group(&f.store, "A").await;
        let b = group(&f.store, "B").await;
        f.store.add_member(a, Principal::User(alice.id), None).await.unwrap();
        f.store.add_member(a, Principal::Group(b), None).await.unwrap();
        f.store.add_member(b, Principal::Group(a), None).await.unwrap();

        let groups = f.resolver.load_all_groups(&alice).await.unwrap();
        assert_eq!(ids(&groups), vec![a, b]);
    }

    #[tokio::test]
    async fn test_diamond_reports_shared_group_once() {
        let f = fixture();
        let alice = user(&f.store, "alice").await;
        let a = group(&f.store, "a").await;
        let b = group(&f.store, "b").await;
        let shared = group(&f.store, "shared").await;
        f.store.add_member(a, Principal::User(alice.id), None).await.unwrap();
        f.store.add_member(b, Principal::User(alice.id), None).await.unwrap();
        f.store.add_member(a, Principal::Group(shared), None).await.unwrap();
        f.store.add_member(b, Principal::Group(shared), None).await.unwrap();

        let groups = f.resolver.group_ids(&alice).await.unwrap();
        assert_eq!(groups, HashSet::from([a, b, shared]));
        assert_eq!(f.resolver.load_all_groups(&alice).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_user_without_groups() {
        let f = fixture();
        let bob = user(&f.store, "bob").await;
        assert!(f.resolver.load_all_groups(&bob).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cached_until_cleared() {
        let f = fixture();
        let alice = user(&f.store, "Alice").await;
        let a = group(&f.store, "a").await;
        let b = group(&f.store, "b").await;
        f.store.add_member(a, Principal::User(alice.id), None).await.unwrap();

        let first = f.resolver.load_all_groups(&alice).await.unwrap();
        assert!(f.cache.get("auth:user:alice:groups").await.unwrap().is_some());

        f.store.add_member(b, Principal::User(alice.id), None).await.unwrap();
        assert_eq!(f.resolver.load_all_groups(&alice).await.unwrap(), first);

        f.resolver.clear_group_cache("ALICE").await.unwrap();
        let groups = f.resolver.load_all_groups(&alice).await.unwrap();
        assert_eq!(ids(&groups), vec![a, b]);
    }

    // ------------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------------

    /// Reachability by plain recursion over an edge list, for comparison.
    fn reachable(edges: &[(usize, usize)], seeds: &[usize]) -> HashSet<usize> {
        let mut out = HashSet::new();
        let mut todo: Vec<usize> = seeds.to_vec();
        while let Some(g) = todo.pop() {
            if out.insert(g) {
                todo.extend(edges.iter().filter(|(from, _)| *from == g).map(|(_, to)| *to));
            }
        }
        out
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_closure_matches_reachability(
            edges in prop::collection::vec((0usize..8, 0usize..8), 0..20),
            seeds in prop::collection::hash_set(0usize..8, 0..4),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let f = fixture();
                let alice = user(&f.store, "alice").await;
                let mut groups = Vec::new();
                for i in 0..8 {
                    groups.push(group(&f.store, &format!("g{i}")).await);
                }
                for &(from, to) in &edges {
                    // Duplicate edges are rejected by the store; ignore them.
                    let _ = f
                        .store
                        .add_member(groups[from], Principal::Group(groups[to]), None)
                        .await;
                }
                for &s in &seeds {
                    f.store.add_member(groups[s], Principal::User(alice.id), None).await.unwrap();
                }

                let resolved = f.resolver.load_all_groups(&alice).await.unwrap();
                let again = f.resolver.load_all_groups(&alice).await.unwrap();
                assert_eq!(&resolved, &again);

                let unique: HashSet<GroupId> = resolved.iter().map(|(id, _)| *id).collect();
                assert_eq!(unique.len(), resolved.len());

                let seeds: Vec<usize> = seeds.iter().copied().collect();
                let expected: HashSet<GroupId> = reachable(&edges, &seeds)
                    .into_iter()
                    .map(|i| groups[i])
                    .collect();
                assert_eq!(unique, expected);
            });
        }
    }

    #[test]
    fn test_cache_key_is_lowercased() {
        assert_eq!(GroupResolver::cache_key(" Alice "), "user:alice:groups");
    }
}
