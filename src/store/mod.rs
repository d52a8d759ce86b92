//! Persistence contracts consumed by the authentication core.
//!
//! `UserRepository` covers the credential record; `SecretStore` is the narrow
//! read/write contract over the per-user refresh secret. Every call made by
//! the core goes through [`bounded`], so a slow store surfaces as
//! `DatabaseError::Timeout` instead of a hang.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AppError, DatabaseError};

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

/// Persisted user credential record
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(skip_serializing)]
    pub refresh_secret: Option<RefreshSecret>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied by the core when creating a user
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

/// One-way hash of the live refresh secret and the instant it stops being accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSecret {
    pub hash: String,
    pub expires_at: DateTime<Utc>,
}

/// What the store knows about a user's refresh session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretState {
    UnknownUser,
    NoSession,
    Active(RefreshSecret),
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError>;

    /// # Errors
    /// `DatabaseError::UniqueConstraintViolation` if the email is already taken
    async fn insert(&self, user: NewUser) -> Result<User, AppError>;
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn load_secret(&self, user_id: Uuid) -> Result<SecretState, AppError>;

    /// Unconditionally install `secret`. Returns `false` if the user does not exist.
    async fn store_secret(&self, user_id: Uuid, secret: RefreshSecret) -> Result<bool, AppError>;

    /// Install `secret` only if the stored hash still equals `expected_hash`.
    /// Returns `false` when another writer got there first.
    async fn swap_secret(
        &self,
        user_id: Uuid,
        expected_hash: &str,
        secret: RefreshSecret,
    ) -> Result<bool, AppError>;

    /// Remove any stored secret. Clearing an absent secret is not an error.
    async fn clear_secret(&self, user_id: Uuid) -> Result<(), AppError>;
}

/// Run a persistence call under a deadline. Dropping the timed-out future
/// cancels the in-flight query.
pub async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => {
            let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
            tracing::error!(timeout_ms = millis, "Persistence call timed out");
            Err(AppError::Database(DatabaseError::Timeout(millis)))
        }
    }
}
