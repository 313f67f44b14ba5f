/// Password Hashing and Verification
///
/// Salted adaptive hashing (bcrypt) for account passwords and password-reset
/// secrets. bcrypt is CPU-bound, so both operations run on tokio's blocking
/// pool and are awaited by the caller.

use crate::error::{AppError, ValidationError};

/// bcrypt reads at most this many bytes of its input.
pub const MAX_SECRET_BYTES: usize = 72;

#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl PasswordHasher {
    /// `cost` is the bcrypt work factor (4..=31).
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    /// Refuses secrets longer than `MAX_SECRET_BYTES` instead of letting
    /// bcrypt truncate them.
    pub async fn hash(&self, secret: &str) -> Result<String, AppError> {
        if secret.len() > MAX_SECRET_BYTES {
            return Err(ValidationError::TooLong("password".to_string(), MAX_SECRET_BYTES).into());
        }

        let cost = self.cost;
        let secret = secret.to_owned();
        tokio::task::spawn_blocking(move || bcrypt::hash(secret, cost))
            .await
            .map_err(|e| AppError::Internal(format!("Password hashing task failed: {}", e)))?
            .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
    }

    /// Returns `Ok(false)` on mismatch; an error only for a malformed hash.
    /// A secret over `MAX_SECRET_BYTES` can never have been hashed, so it
    /// never matches.
    pub async fn verify(&self, secret: &str, hashed: &str) -> Result<bool, AppError> {
        if secret.len() > MAX_SECRET_BYTES {
            return Ok(false);
        }

        let secret = secret.to_owned();
        let hashed = hashed.to_owned();
        tokio::task::spawn_blocking(move || bcrypt::verify(secret, &hashed))
            .await
            .map_err(|e| AppError::Internal(format!("Password verification task failed: {}", e)))?
            .map_err(|e| AppError::Internal(format!("Password verification failed: {}", e)))
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(bcrypt::DEFAULT_COST)
    }
}
