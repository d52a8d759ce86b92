//! Postgres-backed store.
//!
//! Email uniqueness is enforced by the `users_email_key` constraint, and
//! rotation is a single conditional `UPDATE`, so concurrent redemptions of the
//! same refresh token cannot both succeed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{NewUser, RefreshSecret, SecretState, SecretStore, User, UserRepository};
use crate::error::AppError;

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
    password_hash: String,
    refresh_hash: Option<String>,
    refresh_expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        let refresh_secret = match (row.refresh_hash, row.refresh_expires_at) {
            (Some(hash), Some(expires_at)) if !hash.is_empty() => Some(RefreshSecret { hash, expires_at }),
            _ => None,
        };

        User {
            id: row.id,
            name: row.name,
            email: row.email,
            password_hash: row.password_hash,
            refresh_secret,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const USER_COLUMNS: &str =
    "id, name, email, password_hash, refresh_hash, refresh_expires_at, created_at, updated_at";

#[async_trait]
impl UserRepository for PostgresStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE email = $1",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(User::from))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(User::from))
    }

    async fn insert(&self, user: NewUser) -> Result<User, AppError> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, name, email, password_hash, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }
}

#[async_trait]
impl SecretStore for PostgresStore {
    async fn load_secret(&self, user_id: Uuid) -> Result<SecretState, AppError> {
        let row = sqlx::query_as::<_, (Option<String>, Option<DateTime<Utc>>)>(
            "SELECT refresh_hash, refresh_expires_at FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            None => SecretState::UnknownUser,
            Some((Some(hash), Some(expires_at))) if !hash.is_empty() => {
                SecretState::Active(RefreshSecret { hash, expires_at })
            }
            Some(_) => SecretState::NoSession,
        })
    }

    async fn store_secret(&self, user_id: Uuid, secret: RefreshSecret) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET refresh_hash = $2, refresh_expires_at = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(&secret.hash)
        .bind(secret.expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn swap_secret(
        &self,
        user_id: Uuid,
        expected_hash: &str,
        secret: RefreshSecret,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET refresh_hash = $3, refresh_expires_at = $4, updated_at = $5
            WHERE id = $1 AND refresh_hash = $2
            "#,
        )
        .bind(user_id)
        .bind(expected_hash)
        .bind(&secret.hash)
        .bind(secret.expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn clear_secret(&self, user_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE users
            SET refresh_hash = NULL, refresh_expires_at = NULL, updated_at = $2
            WHERE id = $1 AND refresh_hash IS NOT NULL
            "#,
        )
        .bind(user_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        tracing::debug!(user_id = %user_id, "Refresh secret cleared");
        Ok(())
    }
}
