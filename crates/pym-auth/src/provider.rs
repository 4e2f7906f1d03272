//! Authentication provider contract and a store-backed implementation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use pym_core::UserId;
use pym_storage::{LoginDenial, User, UserStore};

use crate::credential::verify_password;
use crate::error::{AuthError, Result};

/// Loads accounts and verifies credentials.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Load an account by principal.
    async fn load_by_principal(&self, principal: &str) -> Result<User>;

    /// Authenticate by principal and credential.
    async fn login_by_principal(
        &self,
        principal: &str,
        credential: &str,
        origin_address: Option<&str>,
    ) -> Result<User>;

    /// Authenticate by email and credential.
    async fn login_by_email(
        &self,
        email: &str,
        credential: &str,
        origin_address: Option<&str>,
    ) -> Result<User>;

    /// End the session of an account.
    async fn logout(&self, user_id: UserId) -> Result<()>;
}

/// [`AuthProvider`] over a [`UserStore`].
#[derive(Clone)]
pub struct StoreAuthProvider {
    users: Arc<dyn UserStore>,
}

impl StoreAuthProvider {
    /// Create a provider.
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    /// Verify the credential, then the account state, then stamp the login.
    async fn authenticate(
        &self,
        user: User,
        credential: &str,
        origin_address: Option<&str>,
    ) -> Result<User> {
        let verified = user
            .pwd
            .as_deref()
            .is_some_and(|stored| verify_password(credential, stored));
        if !verified {
            return Err(AuthError::InvalidCredentials.into());
        }

        let now = Utc::now();
        user.is_login_allowed(now).map_err(|denial| match denial {
            LoginDenial::Disabled(reason) => AuthError::AccountDisabled(reason),
            LoginDenial::Blocked { reason, until } => AuthError::AccountBlocked { reason, until },
            LoginDenial::NoPassword => AuthError::InvalidCredentials,
            LoginDenial::PasswordExpired => AuthError::PasswordExpired,
        })?;

        self.users
            .record_login(user.id, now, origin_address.map(str::to_string))
            .await?;
        log::debug!("Verified credentials of '{}'", user.principal);
        Ok(self.users.user(user.id).await?.unwrap_or(user))
    }
}

#[async_trait]
impl AuthProvider for StoreAuthProvider {
    async fn load_by_principal(&self, principal: &str) -> Result<User> {
        self.users
            .user_by_principal(principal)
            .await?
            .ok_or_else(|| AuthError::UnknownPrincipal(principal.to_string()).into())
    }

    async fn login_by_principal(
        &self,
        principal: &str,
        credential: &str,
        origin_address: Option<&str>,
    ) -> Result<User> {
        let user = self.load_by_principal(principal).await?;
        self.authenticate(user, credential, origin_address).await
    }

    async fn login_by_email(
        &self,
        email: &str,
        credential: &str,
        origin_address: Option<&str>,
    ) -> Result<User> {
        let user = self
            .users
            .user_by_email(email)
            .await?
            .ok_or_else(|| AuthError::UnknownEmail(email.to_string()))?;
        self.authenticate(user, credential, origin_address).await
    }

    async fn logout(&self, user_id: UserId) -> Result<()> {
        self.users.record_logout(user_id, Utc::now()).await?;
        Ok(())
    }
}

impl std::fmt::Debug for StoreAuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreAuthProvider").finish_non_exhaustive()
    }
}
