//! Process-local store used by tests and local development.
//!
//! A single mutex guards all records, so the compare-and-swap in
//! `swap_secret` and the email uniqueness check in `insert` are atomic.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{NewUser, RefreshSecret, SecretState, SecretStore, User, UserRepository};
use crate::error::{AppError, DatabaseError};

#[derive(Debug, Default)]
pub struct InMemoryStore {
    users: Mutex<HashMap<Uuid, User>>,
    latency: Option<Duration>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call, to exercise persistence timeouts
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            latency: Some(latency),
        }
    }

    pub fn user_count(&self) -> usize {
        self.lock().map(|users| users.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, User>>, AppError> {
        self.users
            .lock()
            .map_err(|_| AppError::Database(DatabaseError::UnexpectedError("store lock poisoned".to_string())))
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        self.simulate_latency().await;
        let users = self.lock()?;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        self.simulate_latency().await;
        Ok(self.lock()?.get(&id).cloned())
    }

    async fn insert(&self, user: NewUser) -> Result<User, AppError> {
        self.simulate_latency().await;
        let mut users = self.lock()?;
        if users.values().any(|u| u.email == user.email) {
            return Err(AppError::Database(DatabaseError::UniqueConstraintViolation(
                "users_email_key".to_string(),
            )));
        }

        let now = Utc::now();
        let record = User {
            id: Uuid::new_v4(),
            name: user.name,
            email: user.email,
            password_hash: user.password_hash,
            refresh_secret: None,
            created_at: now,
            updated_at: now,
        };
        users.insert(record.id, record.clone());
        Ok(record)
    }
}

#[async_trait]
impl SecretStore for InMemoryStore {
    async fn load_secret(&self, user_id: Uuid) -> Result<SecretState, AppError> {
        self.simulate_latency().await;
        let users = self.lock()?;
        Ok(match users.get(&user_id) {
            None => SecretState::UnknownUser,
            Some(User { refresh_secret: None, .. }) => SecretState::NoSession,
            Some(User { refresh_secret: Some(secret), .. }) => SecretState::Active(secret.clone()),
        })
    }

    async fn store_secret(&self, user_id: Uuid, secret: RefreshSecret) -> Result<bool, AppError> {
        self.simulate_latency().await;
        let mut users = self.lock()?;
        match users.get_mut(&user_id) {
            Some(user) => {
                user.refresh_secret = Some(secret);
                user.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn swap_secret(
        &self,
        user_id: Uuid,
        expected_hash: &str,
        secret: RefreshSecret,
    ) -> Result<bool, AppError> {
        self.simulate_latency().await;
        let mut users = self.lock()?;
        match users.get_mut(&user_id) {
            Some(user) if user.refresh_secret.as_ref().map(|s| s.hash.as_str()) == Some(expected_hash) => {
                user.refresh_secret = Some(secret);
                user.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn clear_secret(&self, user_id: Uuid) -> Result<(), AppError> {
        self.simulate_latency().await;
        let mut users = self.lock()?;
        if let Some(user) = users.get_mut(&user_id) {
            if user.refresh_secret.take().is_some() {
                user.updated_at = Utc::now();
            }
        }
        Ok(())
    }
}
