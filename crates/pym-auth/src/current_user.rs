//! The user bound to the current request.
//!
//! There is always a current user. Without a login it is the sentinel
//! account ("nobody"). Each identity change reloads the transitive group
//! closure and rotates the session's anti-forgery token.
//!
//! ```text
//! anonymous --login--> authenticated --impersonate--> impersonating
//!     ^                      |  ^                          |
//!     +-------logout---------+  +-------repersonate--------+
//! ```

use std::sync::Arc;

use pym_acl::{EffectivePrincipals, GroupRef, GroupResolver};
use pym_core::config::AuthConfig;
use pym_core::{GroupId, UserId};
use pym_storage::User;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audit::{AuditEvent, AuditSink};
use crate::error::{AuthError, Error, Result};
use crate::provider::AuthProvider;
use crate::session::Session;

/// Session key holding the principal to restore after impersonation.
pub const PREV_USER_KEY: &str = "auth:current_user/prev_user";

/// Profile fields copied from the account.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMetadata {
    /// Email address.
    pub email: String,
    /// First name.
    pub first_name: Option<String>,
    /// Last name.
    pub last_name: Option<String>,
    /// Name shown in the UI.
    pub display_name: String,
    /// Locale from the profile.
    pub preferred_locale: Option<String>,
}

impl From<&User> for UserMetadata {
    fn from(u: &User) -> Self {
        Self {
            email: u.email.clone(),
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
            display_name: u.display_name.clone(),
            preferred_locale: u.profile.locale_name.clone(),
        }
    }
}

/// Identity, groups, and profile of the current request's user.
pub struct CurrentUser {
    provider: Arc<dyn AuthProvider>,
    groups_resolver: GroupResolver,
    audit: Arc<dyn AuditSink>,
    session: Box<dyn Session>,
    config: AuthConfig,
    nobody_uid: UserId,
    uid: UserId,
    principal: String,
    groups: Vec<GroupRef>,
    metadata: UserMetadata,
}

impl CurrentUser {
    /// Bind a new current user to `session`, starting as the sentinel.
    ///
    /// Fails if the sentinel account does not exist.
    pub async fn new(
        provider: Arc<dyn AuthProvider>,
        groups_resolver: GroupResolver,
        audit: Arc<dyn AuditSink>,
        session: Box<dyn Session>,
        config: AuthConfig,
    ) -> Result<Self> {
        let nobody = provider.load_by_principal(&config.nobody_principal).await?;
        let groups = groups_resolver.load_all_groups(&nobody).await?;
        Ok(Self {
            provider,
            groups_resolver,
            audit,
            session,
            config,
            nobody_uid: nobody.id,
            uid: nobody.id,
            principal: nobody.principal.clone(),
            groups,
            metadata: UserMetadata::from(&nobody),
        })
    }

    async fn init_from_user(&mut self, user: &User) -> Result<()> {
        self.groups = self.groups_resolver.load_all_groups(user).await?;
        self.uid = user.id;
        self.principal = user.principal.clone();
        self.metadata = UserMetadata::from(user);
        Ok(())
    }

    async fn init_nobody(&mut self) -> Result<()> {
        let nobody = self
            .provider
            .load_by_principal(&self.config.nobody_principal)
            .await?;
        self.nobody_uid = nobody.id;
        self.init_from_user(&nobody).await
    }

    /// Bind the account with `principal` without checking credentials, e.g.
    /// for a principal remembered by the authentication policy.
    pub async fn load_by_principal(&mut self, principal: &str) -> Result<()> {
        let user = self.provider.load_by_principal(principal).await?;
        self.init_from_user(&user).await
    }

    /// Log in by principal, or by email when `identifier` contains `@`.
    ///
    /// An authentication failure is recorded with the audit sink and then
    /// returned.
    pub async fn login(
        &mut self,
        identifier: &str,
        credential: &str,
        origin_address: Option<&str>,
    ) -> Result<()> {
        let result = if identifier.contains('@') {
            self.provider
                .login_by_email(identifier, credential, origin_address)
                .await
        } else {
            self.provider
                .login_by_principal(identifier, credential, origin_address)
                .await
        };
        let user = match result {
            Ok(user) => user,
            Err(Error::Auth(cause)) => {
                self.audit
                    .record(AuditEvent::new(identifier, origin_address, cause.to_string()));
                return Err(cause.into());
            }
            Err(e) => return Err(e),
        };
        self.init_from_user(&user).await?;
        self.session.new_csrf_token();
        log::info!("User '{}' logged in", self.principal);
        Ok(())
    }

    /// Switch to another account, remembering the current principal.
    ///
    /// Only one principal is remembered: impersonating again overwrites it.
    /// Session data other than the identity is kept. Anonymous callers get
    /// [`AuthError::NotAuthenticated`].
    pub async fn impersonate(&mut self, principal: &str) -> Result<User> {
        if !self.is_authenticated() {
            return Err(AuthError::NotAuthenticated.into());
        }
        let user = self.provider.load_by_principal(principal).await?;
        self.session
            .insert(PREV_USER_KEY, Value::String(self.principal.clone()));
        let previous = self.principal.clone();
        self.init_from_user(&user).await?;
        self.session.new_csrf_token();
        log::info!("User '{previous}' impersonates '{}'", self.principal);
        Ok(user)
    }

    /// Switch back to the remembered principal.
    ///
    /// Returns `None` when nothing is remembered.
    pub async fn repersonate(&mut self) -> Result<Option<User>> {
        let Some(previous) = self.session.remove(PREV_USER_KEY) else {
            return Ok(None);
        };
        let Some(principal) = previous.as_str() else {
            log::warn!("Ignoring malformed '{PREV_USER_KEY}' session entry: {previous}");
            return Ok(None);
        };
        let user = self.provider.load_by_principal(principal).await?;
        let impersonated = self.principal.clone();
        self.init_from_user(&user).await?;
        self.session.new_csrf_token();
        log::info!("User '{}' stops impersonating '{impersonated}'", self.principal);
        Ok(Some(user))
    }

    /// Log out: end the account's session, drop all session data, and fall
    /// back to the sentinel.
    pub async fn logout(&mut self) -> Result<()> {
        if self.is_authenticated() {
            self.provider.logout(self.uid).await?;
            log::info!("User '{}' logged out", self.principal);
        }
        self.session.invalidate();
        self.init_nobody().await?;
        self.session.new_csrf_token();
        Ok(())
    }

    /// Whether a real account is bound.
    pub fn is_authenticated(&self) -> bool {
        self.uid != self.nobody_uid
    }

    /// Whether the user is in the superuser group.
    pub fn is_privileged(&self) -> bool {
        let wheel = GroupId(self.config.wheel_group_id);
        self.groups.iter().any(|(id, _)| *id == wheel)
    }

    /// Whether another principal is remembered for
    /// [`repersonate`](Self::repersonate).
    pub fn is_impersonated(&self) -> bool {
        self.session.contains(PREV_USER_KEY)
    }

    /// Principal set for ACL checks.
    pub fn effective_principals(&self) -> EffectivePrincipals {
        EffectivePrincipals::new(self.uid, self.groups.iter().map(|(id, _)| *id))
    }

    /// `u:`/`g:` prefixed principal strings.
    pub fn principals(&self) -> Vec<String> {
        self.effective_principals().to_strings()
    }

    /// Bound account id.
    pub fn uid(&self) -> UserId {
        self.uid
    }

    /// Bound principal.
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Transitive groups of the bound account.
    pub fn groups(&self) -> &[GroupRef] {
        &self.groups
    }

    /// Profile fields of the bound account.
    pub fn metadata(&self) -> &UserMetadata {
        &self.metadata
    }

    /// The underlying session.
    pub fn session(&self) -> &dyn Session {
        self.session.as_ref()
    }

    /// The underlying session, mutably.
    pub fn session_mut(&mut self) -> &mut dyn Session {
        self.session.as_mut()
    }
}

impl std::fmt::Debug for CurrentUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CurrentUser")
            .field("uid", &self.uid)
            .field("principal", &self.principal)
            .field("email", &self.metadata.email)
            .finish_non_exhaustive()
    }
}
