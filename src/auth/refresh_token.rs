/// Refresh Token Management
///
/// Refresh tokens are:
/// - `user_id:secret`, where the secret is 32 bytes of OS randomness
/// - Stored only as a bcrypt hash of the secret, one per user
/// - Single-use: every successful redemption rotates the secret
/// - Bounded by a persisted expiry
/// - Revoked by clearing the stored hash

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use chrono::Duration as ChronoDuration;
use rand::rngs::OsRng;
use rand::RngCore;
use uuid::Uuid;

use crate::auth::password::CredentialHasher;
use crate::clock::Clock;
use crate::error::{AppError, TokenError};
use crate::store::{bounded, RefreshSecret, SecretState, SecretStore};

pub const SEPARATOR: char = ':';
const SECRET_BYTES: usize = 32;

/// Client-held refresh token
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshToken {
    user_id: Uuid,
    secret: String,
}

impl RefreshToken {
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }
}

impl fmt::Display for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.user_id, SEPARATOR, self.secret)
    }
}

// The secret never reaches logs through `{:?}`.
impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshToken")
            .field("user_id", &self.user_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl FromStr for RefreshToken {
    type Err = TokenError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (user_part, secret) = raw.split_once(SEPARATOR).ok_or(TokenError::Malformed)?;
        if secret.is_empty() || secret.contains(SEPARATOR) {
            return Err(TokenError::Malformed);
        }
        let user_id = Uuid::parse_str(user_part).map_err(|_| TokenError::Malformed)?;

        Ok(Self {
            user_id,
            secret: secret.to_string(),
        })
    }
}

/// Generate a secret from the OS RNG, encoded base64url without padding
fn generate_secret() -> Result<String, AppError> {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| AppError::Randomness(e.to_string()))?;
    Ok(general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

#[derive(Clone)]
pub struct RefreshTokenManager {
    store: Arc<dyn SecretStore>,
    hasher: CredentialHasher,
    clock: Arc<dyn Clock>,
    ttl: ChronoDuration,
    timeout: Duration,
}

impl RefreshTokenManager {
    /// # Arguments
    /// * `store` - where secret hashes live
    /// * `hasher` - one-way hash for secrets
    /// * `clock` - source of expiry instants
    /// * `ttl_seconds` - lifetime of an issued refresh token
    /// * `timeout` - ceiling on each store call
    pub fn new(
        store: Arc<dyn SecretStore>,
        hasher: CredentialHasher,
        clock: Arc<dyn Clock>,
        ttl_seconds: i64,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            hasher,
            clock,
            ttl: ChronoDuration::seconds(ttl_seconds),
            timeout,
        }
    }

    async fn mint(&self, user_id: Uuid) -> Result<(RefreshToken, RefreshSecret), AppError> {
        let secret = generate_secret()?;
        let stored = RefreshSecret {
            hash: self.hasher.hash(&secret).await?,
            expires_at: self.clock.now() + self.ttl,
        };
        Ok((RefreshToken { user_id, secret }, stored))
    }

    /// Issue a refresh token, replacing any secret previously stored for the user
    ///
    /// # Errors
    /// - `AppError::Randomness` if the OS RNG fails
    /// - `AppError::Database` if the store write fails or times out
    /// - `TokenError::UnknownUser` if the user does not exist
    pub async fn issue(&self, user_id: Uuid) -> Result<String, AppError> {
        let (token, stored) = self.mint(user_id).await?;

        if !bounded(self.timeout, self.store.store_secret(user_id, stored)).await? {
            return Err(TokenError::UnknownUser.into());
        }

        tracing::info!(user_id = %user_id, "Refresh token issued");
        Ok(token.to_string())
    }

    /// Redeem a refresh token exactly once
    ///
    /// Returns the user and a freshly rotated token. Nothing is written unless
    /// the presented secret matches the stored hash.
    pub async fn redeem(&self, raw: &str) -> Result<(Uuid, String), AppError> {
        let presented: RefreshToken = raw.parse()?;
        let user_id = presented.user_id();

        let current = match bounded(self.timeout, self.store.load_secret(user_id)).await? {
            SecretState::UnknownUser => return Err(TokenError::UnknownUser.into()),
            SecretState::NoSession => return Err(TokenError::NoActiveSession.into()),
            SecretState::Active(secret) => secret,
        };

        if self.clock.now() > current.expires_at {
            tracing::info!(user_id = %user_id, "Refresh token expired");
            return Err(TokenError::Expired.into());
        }

        if !self.hasher.verify(&current.hash, &presented.secret).await? {
            tracing::warn!(user_id = %user_id, "Refresh token mismatch");
            return Err(TokenError::Mismatch.into());
        }

        let (rotated, stored) = self.mint(user_id).await?;
        let swapped = bounded(
            self.timeout,
            self.store.swap_secret(user_id, &current.hash, stored),
        )
        .await?;
        if !swapped {
            tracing::warn!(user_id = %user_id, "Refresh token rotated concurrently");
            return Err(TokenError::Mismatch.into());
        }

        tracing::info!(user_id = %user_id, "Refresh token rotated");
        Ok((user_id, rotated.to_string()))
    }

    /// Revoke the user's refresh session. Idempotent.
    pub async fn clear(&self, user_id: Uuid) -> Result<(), AppError> {
        bounded(self.timeout, self.store.clear_secret(user_id)).await?;
        tracing::info!(user_id = %user_id, "Refresh session cleared");
        Ok(())
    }

    /// Revoke the session a refresh token belongs to
    ///
    /// The presented secret must match the stored hash; an expired but
    /// otherwise genuine token still ends its session. Returns the user whose
    /// session was cleared.
    pub async fn revoke(&self, raw: &str) -> Result<Uuid, AppError> {
        let presented: RefreshToken = raw.parse()?;
        let user_id = presented.user_id();

        let current = match bounded(self.timeout, self.store.load_secret(user_id)).await? {
            SecretState::UnknownUser => return Err(TokenError::UnknownUser.into()),
            SecretState::NoSession => return Err(TokenError::NoActiveSession.into()),
            SecretState::Active(secret) => secret,
        };

        if !self.hasher.verify(&current.hash, &presented.secret).await? {
            tracing::warn!(user_id = %user_id, "Revocation with mismatched refresh token");
            return Err(TokenError::Mismatch.into());
        }

        self.clear(user_id).await?;
        Ok(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::configuration::MIN_HASH_COST;
    use crate::store::{InMemoryStore, NewUser, UserRepository};
    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::Barrier;

    struct Fixture {
        manager: RefreshTokenManager,
        store: Arc<InMemoryStore>,
        clock: Arc<FixedClock>,
        user_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let user = store
            .insert(NewUser {
                name: "Alice".to_string(),
                email: "alice@x.com".to_string(),
                password_hash: "unused".to_string(),
            })
            .await
            .unwrap();
        let manager = RefreshTokenManager::new(
            store.clone(),
            CredentialHasher::new(MIN_HASH_COST),
            clock.clone(),
            604_800,
            Duration::from_secs(5),
        );

        Fixture { manager, store, clock, user_id: user.id }
    }

    fn unwrap_token_error(result: Result<(Uuid, String), AppError>) -> TokenError {
        match result {
            Err(AppError::Token(e)) => e,
            other => panic!("expected token error, got {:?}", other),
        }
    }

    #[test]
    fn test_generated_secret_has_full_entropy() {
        let secret = generate_secret().unwrap();
        let decoded = general_purpose::URL_SAFE_NO_PAD.decode(&secret).unwrap();

        assert_eq!(decoded.len(), SECRET_BYTES);
        assert!(!secret.contains(SEPARATOR));
        assert_ne!(secret, generate_secret().unwrap());
    }

    #[test]
    fn test_parse_rejects_malformed_tokens() {
        let user_id = Uuid::new_v4();
        let cases = vec![
            "no-separator".to_string(),
            format!("{}:", user_id),
            "not-a-uuid:secret".to_string(),
            format!("{}:sec:ret", user_id),
            format!(":{}", user_id),
        ];

        for raw in cases {
            assert_eq!(raw.parse::<RefreshToken>(), Err(TokenError::Malformed), "{}", raw);
        }
    }

    #[test]
    fn test_parse_and_display_agree() {
        let user_id = Uuid::new_v4();
        let raw = format!("{}:abc123", user_id);
        let token: RefreshToken = raw.parse().unwrap();

        assert_eq!(token.user_id(), user_id);
        assert_eq!(token.to_string(), raw);
        assert!(!format!("{:?}", token).contains("abc123"));
    }

    #[tokio::test]
    async fn test_issue_stores_only_a_hash() {
        let f = fixture().await;
        let token = f.manager.issue(f.user_id).await.unwrap();
        let secret = token.split_once(SEPARATOR).unwrap().1;

        match f.store.load_secret(f.user_id).await.unwrap() {
            SecretState::Active(stored) => {
                assert_ne!(stored.hash, secret);
                assert!(!stored.hash.contains(secret));
                assert_eq!(stored.expires_at, f.clock.now() + ChronoDuration::days(7));
            }
            other => panic!("expected active session, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_issue_for_unknown_user() {
        let f = fixture().await;
        let result = f.manager.issue(Uuid::new_v4()).await;
        assert!(matches!(result, Err(AppError::Token(TokenError::UnknownUser))));
    }

    #[tokio::test]
    async fn test_redeem_rotates_once() {
        let f = fixture().await;
        let first = f.manager.issue(f.user_id).await.unwrap();

        let (user_id, second) = f.manager.redeem(&first).await.unwrap();
        assert_eq!(user_id, f.user_id);
        assert_ne!(first, second);

        assert_eq!(unwrap_token_error(f.manager.redeem(&first).await), TokenError::Mismatch);
        assert!(f.manager.redeem(&second).await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_redeem_leaves_session_intact() {
        let f = fixture().await;
        let token = f.manager.issue(f.user_id).await.unwrap();
        let forged = format!("{}:{}", f.user_id, generate_secret().unwrap());

        assert_eq!(unwrap_token_error(f.manager.redeem(&forged).await), TokenError::Mismatch);
        assert!(f.manager.redeem(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_redeem_errors() {
        let f = fixture().await;

        assert_eq!(unwrap_token_error(f.manager.redeem("garbage").await), TokenError::Malformed);

        let stranger = format!("{}:{}", Uuid::new_v4(), generate_secret().unwrap());
        assert_eq!(unwrap_token_error(f.manager.redeem(&stranger).await), TokenError::UnknownUser);

        let no_session = format!("{}:{}", f.user_id, generate_secret().unwrap());
        assert_eq!(
            unwrap_token_error(f.manager.redeem(&no_session).await),
            TokenError::NoActiveSession
        );
    }

    #[tokio::test]
    async fn test_clear_revokes_session() {
        let f = fixture().await;
        let token = f.manager.issue(f.user_id).await.unwrap();

        f.manager.clear(f.user_id).await.unwrap();
        f.manager.clear(f.user_id).await.unwrap();

        assert_eq!(
            unwrap_token_error(f.manager.redeem(&token).await),
            TokenError::NoActiveSession
        );
    }

    #[tokio::test]
    async fn test_expired_refresh_token() {
        let f = fixture().await;
        let token = f.manager.issue(f.user_id).await.unwrap();

        f.clock.advance(ChronoDuration::days(7) + ChronoDuration::seconds(1));
        assert_eq!(unwrap_token_error(f.manager.redeem(&token).await), TokenError::Expired);
    }

    async fn stored_hash(store: &InMemoryStore, user_id: Uuid) -> String {
        match store.load_secret(user_id).await.unwrap() {
            SecretState::Active(secret) => secret.hash,
            other => panic!("expected active session, got {:?}", other),
        }
    }

    fn manager_over(store: Arc<dyn SecretStore>, clock: Arc<FixedClock>) -> RefreshTokenManager {
        RefreshTokenManager::new(
            store,
            CredentialHasher::new(MIN_HASH_COST),
            clock,
            604_800,
            Duration::from_secs(5),
        )
    }

    /// Releases `load_secret` callers only once all of them have read the secret
    struct LockstepStore {
        inner: Arc<InMemoryStore>,
        barrier: Barrier,
    }

    #[async_trait]
    impl SecretStore for LockstepStore {
        async fn load_secret(&self, user_id: Uuid) -> Result<SecretState, AppError> {
            let state = self.inner.load_secret(user_id).await?;
            self.barrier.wait().await;
            Ok(state)
        }

        async fn store_secret(&self, user_id: Uuid, secret: RefreshSecret) -> Result<bool, AppError> {
            self.inner.store_secret(user_id, secret).await
        }

        async fn swap_secret(
            &self,
            user_id: Uuid,
            expected_hash: &str,
            secret: RefreshSecret,
        ) -> Result<bool, AppError> {
            self.inner.swap_secret(user_id, expected_hash, secret).await
        }

        async fn clear_secret(&self, user_id: Uuid) -> Result<(), AppError> {
            self.inner.clear_secret(user_id).await
        }
    }

    /// Behaves as if another writer always rotates first
    struct LosingSwapStore(Arc<InMemoryStore>);

    #[async_trait]
    impl SecretStore for LosingSwapStore {
        async fn load_secret(&self, user_id: Uuid) -> Result<SecretState, AppError> {
            self.0.load_secret(user_id).await
        }

        async fn store_secret(&self, user_id: Uuid, secret: RefreshSecret) -> Result<bool, AppError> {
            self.0.store_secret(user_id, secret).await
        }

        async fn swap_secret(&self, _: Uuid, _: &str, _: RefreshSecret) -> Result<bool, AppError> {
            Ok(false)
        }

        async fn clear_secret(&self, user_id: Uuid) -> Result<(), AppError> {
            self.0.clear_secret(user_id).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_redeem_single_winner() {
        let f = fixture().await;
        let token = f.manager.issue(f.user_id).await.unwrap();
        let lockstep = manager_over(
            Arc::new(LockstepStore {
                inner: f.store.clone(),
                barrier: Barrier::new(2),
            }),
            f.clock.clone(),
        );

        // Both redemptions read the same stored hash before either swaps.
        let (a, b) = tokio::join!(lockstep.redeem(&token), lockstep.redeem(&token));
        let (winner, loser) = match (a, b) {
            (Ok(winner), Err(loser)) | (Err(loser), Ok(winner)) => (winner, loser),
            other => panic!("expected exactly one winner, got {:?}", other),
        };

        assert!(matches!(loser, AppError::Token(TokenError::Mismatch)));
        assert_eq!(winner.0, f.user_id);
        // The stored secret is the winner's rotation.
        assert!(f.manager.redeem(&winner.1).await.is_ok());
    }

    #[tokio::test]
    async fn test_lost_swap_is_a_mismatch_and_writes_nothing() {
        let f = fixture().await;
        let token = f.manager.issue(f.user_id).await.unwrap();
        let before = stored_hash(&f.store, f.user_id).await;

        let losing = manager_over(Arc::new(LosingSwapStore(f.store.clone())), f.clock.clone());
        assert_eq!(unwrap_token_error(losing.redeem(&token).await), TokenError::Mismatch);

        assert_eq!(stored_hash(&f.store, f.user_id).await, before);
        assert!(f.manager.redeem(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_revoke_requires_the_live_secret() {
        let f = fixture().await;
        let token = f.manager.issue(f.user_id).await.unwrap();
        let forged = format!("{}:{}", f.user_id, generate_secret().unwrap());

        assert!(matches!(
            f.manager.revoke(&forged).await,
            Err(AppError::Token(TokenError::Mismatch))
        ));
        assert!(matches!(
            f.manager.revoke("garbage").await,
            Err(AppError::Token(TokenError::Malformed))
        ));

        assert_eq!(f.manager.revoke(&token).await.unwrap(), f.user_id);
        assert_eq!(
            unwrap_token_error(f.manager.redeem(&token).await),
            TokenError::NoActiveSession
        );
        assert!(matches!(
            f.manager.revoke(&token).await,
            Err(AppError::Token(TokenError::NoActiveSession))
        ));
    }

    #[tokio::test]
    async fn test_revoke_accepts_expired_token() {
        let f = fixture().await;
        let token = f.manager.issue(f.user_id).await.unwrap();

        f.clock.advance(ChronoDuration::days(8));
        assert_eq!(f.manager.revoke(&token).await.unwrap(), f.user_id);
        assert_eq!(
            f.store.load_secret(f.user_id).await.unwrap(),
            SecretState::NoSession
        );
    }

    #[tokio::test]
    async fn test_store_timeout_surfaces_as_database_error() {
        let store = Arc::new(InMemoryStore::with_latency(Duration::from_millis(200)));
        let manager = RefreshTokenManager::new(
            store,
            CredentialHasher::new(MIN_HASH_COST),
            Arc::new(FixedClock::new(Utc::now())),
            604_800,
            Duration::from_millis(20),
        );

        let result = manager.issue(Uuid::new_v4()).await;
        assert!(matches!(
            result,
            Err(AppError::Database(crate::error::DatabaseError::Timeout(20)))
        ));
    }
}
