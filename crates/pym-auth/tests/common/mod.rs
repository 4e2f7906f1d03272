//! Shared fixtures for pym-auth integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::sync::Arc;

use pym_acl::GroupResolver;
use pym_auth::{CurrentUser, MemoryAuditSink, MemorySession, StoreAuthProvider, hash_password};
use pym_core::config::AuthConfig;
use pym_core::{CacheRegion, GroupId, MemoryCache};
use pym_storage::{GroupStore, MemoryStore, NewGroup, NewUser, Principal, User, UserStore};

/// Store with `nobody`, `alice` (password `alice-pw`, member of wheel),
/// and `bob` (password `bob-pw`, member of staff).
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub audit: Arc<MemoryAuditSink>,
    pub resolver: GroupResolver,
    pub config: AuthConfig,
    pub wheel: GroupId,
    pub staff: GroupId,
}

async fn add_user(store: &MemoryStore, principal: &str, pwd: Option<&str>) -> User {
    store
        .create_user(NewUser {
            principal: principal.into(),
            email: format!("{principal}@example.com"),
            pwd: pwd.map(hash_password),
            is_enabled: pwd.is_some(),
            ..Default::default()
        })
        .await
        .unwrap()
}

impl Harness {
    pub async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        add_user(&store, "nobody", None).await;
        let alice = add_user(&store, "alice", Some("alice-pw")).await;
        let bob = add_user(&store, "bob", Some("bob-pw")).await;

        let wheel = store
            .create_group(NewGroup { name: "wheel".into(), ..Default::default() })
            .await
            .unwrap()
            .id;
        let staff = store
            .create_group(NewGroup { name: "staff".into(), ..Default::default() })
            .await
            .unwrap()
            .id;
        store.add_member(wheel, Principal::User(alice.id), None).await.unwrap();
        store.add_member(staff, Principal::User(bob.id), None).await.unwrap();

        let resolver = GroupResolver::new(
            store.clone(),
            CacheRegion::new(Arc::new(MemoryCache::new()), GroupResolver::NAMESPACE),
        );
        let config = AuthConfig {
            wheel_group_id: wheel.0,
            ..Default::default()
        };
        Self {
            store,
            audit: Arc::new(MemoryAuditSink::new()),
            resolver,
            config,
            wheel,
            staff,
        }
    }

    pub async fn current_user(&self) -> CurrentUser {
        CurrentUser::new(
            Arc::new(StoreAuthProvider::new(self.store.clone())),
            self.resolver.clone(),
            self.audit.clone(),
            Box::new(MemorySession::new()),
            self.config.clone(),
        )
        .await
        .unwrap()
    }
}
