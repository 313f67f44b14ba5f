/// JWT Token Generation and Validation
///
/// Access and refresh tokens are HS256 JWTs signed with separate secrets, so
/// one kind can never be presented as the other.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use crate::auth::claims::{AccessClaims, RefreshClaims};
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError, ConfigError};

#[derive(Clone)]
pub struct TokenSigner {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_expiry: i64,
    refresh_expiry: i64,
    issuer: String,
}

impl TokenSigner {
    /// # Errors
    /// Returns a configuration error when either secret is empty or an expiry
    /// is not positive.
    pub fn new(config: &JwtSettings) -> Result<Self, AppError> {
        if config.access_secret.is_empty() {
            return Err(ConfigError::MissingRequired("jwt.access_secret".to_string()).into());
        }
        if config.refresh_secret.is_empty() {
            return Err(ConfigError::MissingRequired("jwt.refresh_secret".to_string()).into());
        }
        if config.access_token_expiry <= 0 || config.refresh_token_expiry <= 0 {
            return Err(ConfigError::InvalidValue("token expiry must be positive".to_string()).into());
        }

        Ok(Self {
            access_encoding: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            access_expiry: config.access_token_expiry,
            refresh_expiry: config.refresh_token_expiry,
            issuer: config.issuer.clone(),
        })
    }

    /// Access token lifetime in seconds
    pub fn access_expiry(&self) -> i64 {
        self.access_expiry
    }

    /// Refresh token lifetime in seconds
    pub fn refresh_expiry(&self) -> i64 {
        self.refresh_expiry
    }

    pub fn sign_access(
        &self,
        user_id: i64,
        username: &str,
        roles: &[String],
        session_id: Uuid,
    ) -> Result<String, AppError> {
        let claims = AccessClaims::new(
            user_id,
            username.to_string(),
            roles.to_vec(),
            session_id,
            self.access_expiry,
            self.issuer.clone(),
        );
        sign(&claims, &self.access_encoding)
    }

    pub fn sign_refresh(&self, user_id: i64, token_id: Uuid) -> Result<String, AppError> {
        let claims = RefreshClaims::new(user_id, token_id, self.refresh_expiry, self.issuer.clone());
        sign(&claims, &self.refresh_encoding)
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, AppError> {
        verify(token, &self.access_decoding, &self.issuer)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, AppError> {
        verify(token, &self.refresh_decoding, &self.issuer)
    }
}

fn sign<T: Serialize>(claims: &T, key: &EncodingKey) -> Result<String, AppError> {
    encode(&Header::new(Algorithm::HS256), claims, key)
        .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
}

fn verify<T: DeserializeOwned>(token: &str, key: &DecodingKey, issuer: &str) -> Result<T, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[issuer]);
    validation.leeway = 0;

    decode::<T>(token, key, &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::warn!("JWT validation error: {}", e);
            match e.kind() {
                ErrorKind::ExpiredSignature => AppError::Auth(AuthError::TokenExpired),
                _ => AppError::Auth(AuthError::TokenInvalid),
            }
        })
}
