/// Password Hashing and Verification
///
/// One-way bcrypt hashing with a configurable work factor. The same hasher
/// protects refresh-token secrets at rest. bcrypt runs on the blocking pool
/// so a slow hash never stalls an async worker.

use bcrypt::{hash, verify};

use crate::error::AppError;

#[derive(Debug, Clone, Copy)]
pub struct CredentialHasher {
    cost: u32,
}

impl CredentialHasher {
    /// # Arguments
    /// * `cost` - bcrypt work factor (4..=31)
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    /// Hash a password with a fresh random salt
    ///
    /// # Errors
    /// Returns `AppError::Hashing` if bcrypt fails (bad cost, RNG failure) or
    /// the hashing task is lost
    pub async fn hash(&self, password: &str) -> Result<String, AppError> {
        let password = password.to_string();
        let cost = self.cost;

        tokio::task::spawn_blocking(move || hash(password, cost))
            .await
            .map_err(|e| AppError::Hashing(format!("spawn password hashing task: {}", e)))?
            .map_err(AppError::from)
    }

    /// Verify a candidate against a stored hash
    ///
    /// A malformed stored hash is treated as a mismatch.
    ///
    /// # Errors
    /// Returns `AppError::Hashing` only if the verification task is lost
    pub async fn verify(&self, hashed: &str, candidate: &str) -> Result<bool, AppError> {
        let hashed = hashed.to_string();
        let candidate = candidate.to_string();

        let outcome = tokio::task::spawn_blocking(move || verify(candidate, &hashed))
            .await
            .map_err(|e| AppError::Hashing(format!("spawn password verification task: {}", e)))?;

        match outcome {
            Ok(valid) => Ok(valid),
            Err(e) => {
                tracing::warn!(error = %e, "Stored hash could not be parsed");
                Ok(false)
            }
        }
    }
}
