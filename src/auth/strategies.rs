/// Request-time credential validation
///
/// Three strategies resolve a caller identity:
/// - local: username and password from a login body
/// - access: bearer access token from the `Authorization` header
/// - refresh: refresh token from a request body
///
/// Identity is always reloaded from the store; claims are never trusted for
/// roles or account status.

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::jwt::TokenSigner;
use crate::auth::password::PasswordHasher;
use crate::auth::refresh_token::{digest_matches, RefreshTokenStore};
use crate::error::{AppError, AuthError};
use crate::store::{CredentialStore, UserRecord};

/// Identity attached to a request once a strategy accepts it. Never carries
/// the password hash.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedUser {
    pub id: i64,
    pub username: String,
    pub employee_id: Option<i64>,
    pub roles: Vec<String>,
    /// Refresh-token record the presented access token was issued with
    #[serde(skip)]
    pub session_id: Option<Uuid>,
}

/// A validated refresh token: who presented it and which record it matched
#[derive(Debug, Clone)]
pub struct RefreshSession {
    pub user: AuthenticatedUser,
    pub token_id: Uuid,
}

#[derive(Clone)]
pub struct Authenticator {
    store: Arc<dyn CredentialStore>,
    hasher: PasswordHasher,
    signer: TokenSigner,
    tokens: RefreshTokenStore,
}

impl Authenticator {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        hasher: PasswordHasher,
        signer: TokenSigner,
        tokens: RefreshTokenStore,
    ) -> Self {
        Self {
            store,
            hasher,
            signer,
            tokens,
        }
    }

    async fn resolve(&self, user: UserRecord, session_id: Option<Uuid>) -> Result<AuthenticatedUser, AppError> {
        if !user.is_active {
            tracing::warn!(user_id = user.id, "Inactive account refused");
            return Err(AuthError::AccountInactive.into());
        }
        let roles = self.store.find_role_names(user.id).await?;

        Ok(AuthenticatedUser {
            id: user.id,
            username: user.username,
            employee_id: user.employee_id,
            roles,
            session_id,
        })
    }

    /// # Errors
    /// - NotFound when the username does not exist
    /// - `InvalidCredentials` when the password does not match
    /// - `AccountInactive` for a deactivated account with the right password
    pub async fn validate_local(&self, username: &str, password: &str) -> Result<AuthenticatedUser, AppError> {
        let user = self
            .store
            .find_user_by_username(username)
            .await?
            .ok_or_else(|| AppError::not_found("User", username))?;

        if !self.hasher.verify(password, &user.password_hash).await? {
            tracing::warn!(user_id = user.id, "Password mismatch");
            return Err(AuthError::InvalidCredentials.into());
        }

        self.resolve(user, None).await
    }

    /// Validates an `Authorization` header value of the form `Bearer <token>`.
    pub async fn validate_access(&self, authorization: Option<&str>) -> Result<AuthenticatedUser, AppError> {
        let token = authorization
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;

        let claims = self.signer.verify_access(token)?;

        let user = self
            .store
            .find_user_by_id(claims.sub)
            .await?
            .ok_or_else(|| {
                tracing::warn!(user_id = claims.sub, "Access token for a user that no longer exists");
                AppError::Auth(AuthError::TokenInvalid)
            })?;

        self.resolve(user, Some(claims.sid)).await
    }

    /// Validates a raw refresh token taken from a request body.
    pub async fn validate_refresh(&self, raw_token: &str) -> Result<RefreshSession, AppError> {
        let raw_token = raw_token.trim();
        if raw_token.is_empty() {
            return Err(AuthError::MissingToken.into());
        }

        let claims = self.signer.verify_refresh(raw_token)?;

        let record = self
            .tokens
            .find_live_token(claims.jti)
            .await?
            .ok_or(AuthError::TokenInvalid)?;

        if record.user_id != claims.sub || !digest_matches(raw_token, &record.token_hash) {
            tracing::warn!(token_id = %claims.jti, "Refresh token does not match its record");
            return Err(AuthError::TokenInvalid.into());
        }

        let user = self
            .store
            .find_user_by_id(record.user_id)
            .await?
            .ok_or(AuthError::TokenInvalid)?;

        let user = self.resolve(user, Some(record.id)).await?;
        Ok(RefreshSession {
            user,
            token_id: record.id,
        })
    }
}
