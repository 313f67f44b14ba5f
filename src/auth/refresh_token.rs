/// Refresh Token Management
///
/// Owns the lifecycle of server-side refresh-token records:
/// - each issued token is a JWT whose `jti` is the record's primary key
/// - only the SHA-256 digest of the raw token is persisted
/// - rotation replaces the old record with the new one in a single store call
/// - revocation deletes the record; a deleted record can never validate again

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::jwt::TokenSigner;
use crate::error::{AppError, AuthError};
use crate::store::{CredentialStore, RefreshTokenRecord};

/// A freshly minted refresh token. `raw` is handed to the client once and
/// never stored.
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub raw: String,
    pub record: RefreshTokenRecord,
}

/// Hash a raw refresh token with SHA-256 (hex encoded)
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Compares a raw token against a stored digest without short-circuiting on
/// the first differing byte.
pub fn digest_matches(token: &str, stored_hash: &str) -> bool {
    let candidate = hash_token(token);
    let (a, b) = (candidate.as_bytes(), stored_hash.as_bytes());
    if a.len() != b.len() {
        return false;
    }

    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[derive(Clone)]
pub struct RefreshTokenStore {
    store: Arc<dyn CredentialStore>,
    signer: TokenSigner,
}

impl RefreshTokenStore {
    pub fn new(store: Arc<dyn CredentialStore>, signer: TokenSigner) -> Self {
        Self { store, signer }
    }

    fn mint(&self, user_id: i64, now: DateTime<Utc>) -> Result<IssuedRefreshToken, AppError> {
        let token_id = Uuid::new_v4();
        let raw = self.signer.sign_refresh(user_id, token_id)?;
        let record = RefreshTokenRecord {
            id: token_id,
            user_id,
            token_hash: hash_token(&raw),
            expires_at: now + Duration::seconds(self.signer.refresh_expiry()),
            created_at: now,
        };
        Ok(IssuedRefreshToken { raw, record })
    }

    /// Mints and persists a new refresh token for the user.
    pub async fn create_refresh_token(&self, user_id: i64) -> Result<IssuedRefreshToken, AppError> {
        let issued = self.mint(user_id, Utc::now())?;
        self.store.insert_refresh_token(&issued.record).await?;

        tracing::debug!(user_id = user_id, token_id = %issued.record.id, "Refresh token issued");
        Ok(issued)
    }

    /// Deletes the record. Revoking an unknown id is not an error.
    pub async fn revoke_refresh_token(&self, token_id: Uuid) -> Result<(), AppError> {
        let removed = self.store.delete_refresh_token(token_id).await?;
        if removed {
            tracing::info!(token_id = %token_id, "Refresh token revoked");
        }
        Ok(())
    }

    /// Returns the number of records removed.
    pub async fn revoke_all_user_tokens(&self, user_id: i64) -> Result<u64, AppError> {
        let removed = self.store.delete_user_refresh_tokens(user_id).await?;
        tracing::info!(user_id = user_id, revoked = removed, "All refresh tokens revoked for user");
        Ok(removed)
    }

    /// Live records of the user, newest first
    pub async fn get_user_active_tokens(&self, user_id: i64) -> Result<Vec<RefreshTokenRecord>, AppError> {
        self.store.list_live_refresh_tokens(user_id, Utc::now()).await
    }

    /// Live record by id, or `None` when absent or expired
    pub async fn find_live_token(&self, token_id: Uuid) -> Result<Option<RefreshTokenRecord>, AppError> {
        let now = Utc::now();
        Ok(self
            .store
            .find_refresh_token(token_id)
            .await?
            .filter(|record| record.is_live(now)))
    }

    /// Exchanges the live record `old_token_id` for a new token, exactly once.
    ///
    /// # Errors
    /// `TokenInvalid` when the old record was already rotated away, revoked or
    /// has expired.
    pub async fn rotate_refresh_token(
        &self,
        old_token_id: Uuid,
        user_id: i64,
    ) -> Result<IssuedRefreshToken, AppError> {
        let now = Utc::now();
        let issued = self.mint(user_id, now)?;

        if !self
            .store
            .replace_refresh_token(old_token_id, &issued.record, now)
            .await?
        {
            tracing::warn!(
                user_id = user_id,
                token_id = %old_token_id,
                "Refresh token already consumed"
            );
            return Err(AuthError::TokenInvalid.into());
        }

        tracing::debug!(
            user_id = user_id,
            old_token_id = %old_token_id,
            token_id = %issued.record.id,
            "Refresh token rotated"
        );
        Ok(issued)
    }

    /// Deletes every expired record. Revoked records are already gone.
    pub async fn cleanup_expired_tokens(&self) -> Result<u64, AppError> {
        let removed = self.store.delete_expired_refresh_tokens(Utc::now()).await?;
        tracing::info!(removed = removed, "Expired refresh tokens cleaned up");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::JwtSettings;
    use crate::store::InMemoryCredentialStore;

    fn token_store(refresh_expiry: i64) -> (Arc<InMemoryCredentialStore>, RefreshTokenStore) {
        let store = Arc::new(InMemoryCredentialStore::new());
        let signer = TokenSigner::new(&JwtSettings {
            access_secret: "access-secret".to_string(),
            refresh_secret: "refresh-secret".to_string(),
            access_token_expiry: 900,
            refresh_token_expiry: refresh_expiry,
            issuer: "test".to_string(),
        })
        .unwrap();
        (store.clone(), RefreshTokenStore::new(store, signer))
    }

    #[test]
    fn test_token_hashing() {
        let hash1 = hash_token("some.raw.token");
        let hash2 = hash_token("some.raw.token");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, "some.raw.token");
        assert_eq!(hash1.len(), 64);
        assert_ne!(hash1, hash_token("other.raw.token"));
    }

    #[test]
    fn test_digest_matches() {
        let stored = hash_token("some.raw.token");

        assert!(digest_matches("some.raw.token", &stored));
        assert!(!digest_matches("other.raw.token", &stored));
        assert!(!digest_matches("some.raw.token", &stored[..63]));
        assert!(!digest_matches("some.raw.token", ""));
    }

    #[tokio::test]
    async fn test_created_token_stores_only_the_digest() {
        let (store, tokens) = token_store(3600);
        let issued = tokens.create_refresh_token(1).await.unwrap();

        let stored = store.find_refresh_token(issued.record.id).await.unwrap().unwrap();
        assert_eq!(stored.token_hash, hash_token(&issued.raw));
        assert_ne!(stored.token_hash, issued.raw);
        assert_eq!((stored.expires_at - stored.created_at).num_seconds(), 3600);
    }

    #[tokio::test]
    async fn test_rotation_succeeds_once() {
        let (_, tokens) = token_store(3600);
        let first = tokens.create_refresh_token(1).await.unwrap();

        let second = tokens.rotate_refresh_token(first.record.id, 1).await.unwrap();
        assert_ne!(second.record.id, first.record.id);

        let again = tokens.rotate_refresh_token(first.record.id, 1).await;
        assert!(again.unwrap_err().is_unauthorized());
        assert!(tokens.find_live_token(second.record.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let (store, tokens) = token_store(3600);
        let issued = tokens.create_refresh_token(1).await.unwrap();

        tokens.revoke_refresh_token(issued.record.id).await.unwrap();
        tokens.revoke_refresh_token(issued.record.id).await.unwrap();
        tokens.revoke_refresh_token(Uuid::new_v4()).await.unwrap();

        assert_eq!(store.refresh_token_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_active_tokens_newest_first_and_bulk_revoke() {
        let (_, tokens) = token_store(3600);
        let older = tokens.create_refresh_token(1).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let newer = tokens.create_refresh_token(1).await.unwrap();
        tokens.create_refresh_token(2).await.unwrap();

        let active = tokens.get_user_active_tokens(1).await.unwrap();
        let ids: Vec<Uuid> = active.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![newer.record.id, older.record.id]);

        assert_eq!(tokens.revoke_all_user_tokens(1).await.unwrap(), 2);
        assert!(tokens.get_user_active_tokens(1).await.unwrap().is_empty());
        assert_eq!(tokens.get_user_active_tokens(2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_record_at_expiry_instant_is_expired() {
        let (store, tokens) = token_store(3600);
        let now = Utc::now();
        let record = RefreshTokenRecord {
            id: Uuid::new_v4(),
            user_id: 1,
            token_hash: hash_token("raw"),
            expires_at: now,
            created_at: now - Duration::seconds(10),
        };
        store.insert_refresh_token(&record).await.unwrap();

        assert!(!record.is_live(now));
        assert!(record.is_live(now - Duration::milliseconds(1)));
        assert!(tokens.find_live_token(record.id).await.unwrap().is_none());
        assert!(tokens.rotate_refresh_token(record.id, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_expired() {
        let (store, tokens) = token_store(3600);
        let live = tokens.create_refresh_token(1).await.unwrap();
        let now = Utc::now();
        store
            .insert_refresh_token(&RefreshTokenRecord {
                id: Uuid::new_v4(),
                user_id: 1,
                token_hash: hash_token("old"),
                expires_at: now - Duration::seconds(1),
                created_at: now - Duration::days(8),
            })
            .await
            .unwrap();

        assert_eq!(tokens.cleanup_expired_tokens().await.unwrap(), 1);
        assert!(tokens.find_live_token(live.record.id).await.unwrap().is_some());
    }
}
