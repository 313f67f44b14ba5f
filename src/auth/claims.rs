/// JWT Claims structures
///
/// Payloads of the two bearer tokens: the short-lived access token and the
/// refresh token whose `jti` keys its server-side record.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claims carried by access tokens
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AccessClaims {
    /// Subject (user id)
    pub sub: i64,
    pub username: String,
    /// Role names at issue time. Request guards reload them from the store.
    pub roles: Vec<String>,
    /// Id of the refresh-token record issued alongside this token
    pub sid: Uuid,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

impl AccessClaims {
    pub fn new(
        user_id: i64,
        username: String,
        roles: Vec<String>,
        session_id: Uuid,
        expiry_seconds: i64,
        issuer: String,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: user_id,
            username,
            roles,
            sid: session_id,
            iat: now,
            exp: now + expiry_seconds,
            iss: issuer,
        }
    }
}

/// Claims carried by refresh tokens
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RefreshClaims {
    pub sub: i64,
    /// Primary key of the stored refresh-token record
    pub jti: Uuid,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

impl RefreshClaims {
    pub fn new(user_id: i64, token_id: Uuid, expiry_seconds: i64, issuer: String) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: user_id,
            jti: token_id,
            iat: now,
            exp: now + expiry_seconds,
            iss: issuer,
        }
    }
}
