//! Authentication service.
//!
//! Composes the credential hasher, the access-token codec and the refresh
//! token manager into the operations the HTTP layer calls. Nothing here knows
//! about requests, cookies or status codes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::auth::{AccessTokenCodec, CredentialHasher, RefreshTokenManager};
use crate::clock::Clock;
use crate::configuration::AuthSettings;
use crate::error::{AppError, AuthError, DatabaseError, ErrorContext, TokenError};
use crate::store::{bounded, NewUser, SecretStore, User, UserRepository};
use crate::validators::{is_valid_email, is_valid_name, is_valid_password, normalize_email};

/// Tokens handed back after a successful refresh
#[derive(Clone)]
pub struct RefreshedTokens {
    pub access_token: String,
    pub refresh_token: String,
}

impl fmt::Debug for RefreshedTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RefreshedTokens { .. }")
    }
}

/// Verified in place of a real hash when the email is unknown
const DECOY_PASSWORD: &str = "decoy-password-never-matches";

#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserRepository>,
    hasher: CredentialHasher,
    access: AccessTokenCodec,
    refresh: RefreshTokenManager,
    timeout: Duration,
    // Hashed once at the configured cost so unknown-email logins cost a full verify.
    decoy_hash: Arc<OnceCell<String>>,
}

impl AuthService {
    pub fn new<S>(store: Arc<S>, settings: &AuthSettings, clock: Arc<dyn Clock>) -> Self
    where
        S: UserRepository + SecretStore + 'static,
    {
        let hasher = CredentialHasher::new(settings.password_hash_cost);
        let timeout = settings.persistence_timeout();
        let secrets: Arc<dyn SecretStore> = store.clone();
        let users: Arc<dyn UserRepository> = store;

        Self {
            users,
            hasher,
            access: AccessTokenCodec::from_settings(settings, clock.clone()),
            refresh: RefreshTokenManager::new(
                secrets,
                hasher,
                clock,
                settings.refresh_token_expiry,
                timeout,
            ),
            timeout,
            decoy_hash: Arc::new(OnceCell::new()),
        }
    }

    /// Create a credential record
    ///
    /// # Errors
    /// - `AppError::Validation` for malformed input
    /// - `AppError::EmailTaken` if the email is registered, whether caught by
    ///   the pre-check or by the store's uniqueness constraint
    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<User, AppError> {
        let name = is_valid_name(name)?;
        let email = is_valid_email(email)?;
        is_valid_password(password)?;

        if bounded(self.timeout, self.users.find_by_email(&email)).await?.is_some() {
            return Err(AppError::EmailTaken);
        }

        let password_hash = self.hasher.hash(password).await?;
        let user = bounded(
            self.timeout,
            self.users.insert(NewUser { name, email, password_hash }),
        )
        .await
        .map_err(|e| match e {
            AppError::Database(DatabaseError::UniqueConstraintViolation(_)) => AppError::EmailTaken,
            other => other,
        })?;

        tracing::info!(user_id = %user.id, "User registered");
        Ok(user)
    }

    /// Check credentials and issue an access token
    ///
    /// Unknown email and wrong password both yield `AuthError::InvalidCredentials`.
    pub async fn login(&self, email: &str, password: &str) -> Result<(String, User), AppError> {
        let email = normalize_email(email);

        let user = match bounded(self.timeout, self.users.find_by_email(&email)).await? {
            Some(user) => user,
            None => {
                self.verify_decoy(password).await?;
                return Err(AuthError::InvalidCredentials.into());
            }
        };

        if !self.hasher.verify(&user.password_hash, password).await? {
            tracing::warn!(user_id = %user.id, "Login with wrong password");
            return Err(AuthError::InvalidCredentials.into());
        }

        let access_token = self.access.issue(user.id)?;
        tracing::info!(user_id = %user.id, "User logged in");
        Ok((access_token, user))
    }

    /// Spend one bcrypt verification so an unknown email takes as long as a wrong password
    async fn verify_decoy(&self, password: &str) -> Result<(), AppError> {
        let decoy = self
            .decoy_hash
            .get_or_try_init(|| self.hasher.hash(DECOY_PASSWORD))
            .await?;
        self.hasher.verify(decoy, password).await?;
        Ok(())
    }

    /// Start (or restart) the user's refresh session
    pub async fn issue_refresh(&self, user_id: Uuid) -> Result<String, AppError> {
        self.refresh.issue(user_id).await
    }

    /// Exchange a refresh token for a new access token and a rotated refresh token
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, AppError> {
        let (user_id, refresh_token) = self.refresh.redeem(refresh_token).await?;
        let access_token = self.access.issue(user_id)?;

        Ok(RefreshedTokens {
            access_token,
            refresh_token,
        })
    }

    /// End the user's refresh session. Idempotent.
    pub async fn logout(&self, user_id: Uuid) -> Result<(), AppError> {
        self.refresh.clear(user_id).await.map_err(|e| {
            ErrorContext::new("logout")
                .with_user_id(user_id.to_string())
                .log_error(&e);
            e
        })
    }

    /// End the session a refresh token belongs to, once its secret is verified
    ///
    /// Used when logout arrives without a valid access token.
    pub async fn logout_with_refresh(&self, refresh_token: &str) -> Result<Uuid, AppError> {
        self.refresh.revoke(refresh_token).await
    }

    /// Resolve the user asserted by an access token
    pub fn authenticate(&self, access_token: &str) -> Result<Uuid, TokenError> {
        self.access.validate(access_token)
    }

    pub async fn current_user(&self, user_id: Uuid) -> Result<User, AppError> {
        bounded(self.timeout, self.users.find_by_id(user_id))
            .await?
            .ok_or_else(|| TokenError::UnknownUser.into())
    }
}
