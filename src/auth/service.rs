/// Authentication Service
///
/// Coordinates the credential lifecycle on top of the hasher, the token
/// signer and the refresh-token store. Callers pass the resolved identity
/// explicitly; nothing here reads request state.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::jwt::TokenSigner;
use crate::auth::password::PasswordHasher;
use crate::auth::refresh_token::{IssuedRefreshToken, RefreshTokenStore};
use crate::auth::reset_token::{
    format_reset_token, generate_reset_secret, parse_reset_token, ResetNotifier,
};
use crate::auth::strategies::{AuthenticatedUser, RefreshSession};
use crate::error::{AppError, AuthError, DatabaseError, ValidationError};
use crate::store::{CredentialStore, NewEmployee, NewUser, PasswordResetRecord, DEFAULT_ROLE};
use crate::validators::{
    is_valid_address, is_valid_email, is_valid_name, is_valid_password, is_valid_phone,
    is_valid_username, parse_iso_date,
};

pub const FORGOT_PASSWORD_MESSAGE: &str =
    "If the account exists, password reset instructions have been sent";

/// Access and refresh token handed to the client
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

/// One live refresh token, as shown to its owner
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: Uuid,
    pub created_at: chrono::DateTime<Utc>,
    pub expires_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: i64,
    pub username: String,
    pub employee_id: Option<i64>,
}

/// Registration body
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub full_name: Option<String>,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub date_of_birth: Option<String>,
    pub probation_start_date: Option<String>,
    pub official_start_date: Option<String>,
    #[serde(default)]
    pub role_ids: Vec<i64>,
    #[serde(default)]
    pub branch_ids: Vec<i64>,
}

fn optional_date(field: &str, value: &Option<String>) -> Result<Option<chrono::NaiveDate>, ValidationError> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .map(|v| parse_iso_date(field, v))
        .transpose()
}

impl RegisterRequest {
    /// Validated employee profile, when profile fields were sent
    fn employee_profile(&self) -> Result<Option<NewEmployee>, ValidationError> {
        let full_name = match self.full_name.as_deref() {
            Some(name) => is_valid_name(name)?,
            None if self.phone_number.is_some() => {
                return Err(ValidationError::EmptyField("fullName".to_string()))
            }
            None => return Ok(None),
        };
        let phone_number = is_valid_phone(self.phone_number.as_deref().unwrap_or_default())?;

        let email = match self.email.as_deref().filter(|e| !e.trim().is_empty()) {
            Some(email) => Some(is_valid_email(email)?),
            None => None,
        };
        let address = match self.address.as_deref() {
            Some(address) => Some(is_valid_address(address)?).filter(|a| !a.is_empty()),
            None => None,
        };

        Ok(Some(NewEmployee {
            full_name,
            phone_number,
            email,
            address,
            date_of_birth: optional_date("dateOfBirth", &self.date_of_birth)?,
            probation_start_date: optional_date("probationStartDate", &self.probation_start_date)?,
            official_start_date: optional_date("officialStartDate", &self.official_start_date)?,
        }))
    }
}

#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    hasher: PasswordHasher,
    signer: TokenSigner,
    tokens: RefreshTokenStore,
    notifier: Arc<dyn ResetNotifier>,
    reset_expiry: i64,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        hasher: PasswordHasher,
        signer: TokenSigner,
        tokens: RefreshTokenStore,
        notifier: Arc<dyn ResetNotifier>,
        reset_expiry: i64,
    ) -> Self {
        Self {
            store,
            hasher,
            signer,
            tokens,
            notifier,
            reset_expiry,
        }
    }

    fn token_pair(&self, user: &AuthenticatedUser, refresh: IssuedRefreshToken) -> Result<TokenPair, AppError> {
        let access_token =
            self.signer
                .sign_access(user.id, &user.username, &user.roles, refresh.record.id)?;

        Ok(TokenPair {
            access_token,
            refresh_token: refresh.raw,
            token_type: "Bearer".to_string(),
            expires_in: self.signer.access_expiry(),
        })
    }

    /// Issues a token pair for an identity already accepted by a strategy.
    pub async fn login(&self, user: &AuthenticatedUser) -> Result<TokenPair, AppError> {
        let refresh = self.tokens.create_refresh_token(user.id).await?;
        let session_id = refresh.record.id;
        let pair = self.token_pair(user, refresh)?;

        tracing::info!(user_id = user.id, session_id = %session_id, "User logged in successfully");
        Ok(pair)
    }

    /// Rotates the presented refresh token and issues a new pair.
    pub async fn refresh_token(&self, session: &RefreshSession) -> Result<TokenPair, AppError> {
        let refresh = self
            .tokens
            .rotate_refresh_token(session.token_id, session.user.id)
            .await?;
        let pair = self.token_pair(&session.user, refresh)?;

        tracing::info!(user_id = session.user.id, "Token refreshed successfully");
        Ok(pair)
    }

    /// Revokes one session of the user, or all of them when `token_id` is
    /// `None`. Unknown ids and ids owned by someone else are ignored.
    pub async fn logout(&self, user_id: i64, token_id: Option<Uuid>) -> Result<MessageResponse, AppError> {
        match token_id {
            Some(token_id) => {
                let owned = self
                    .store
                    .find_refresh_token(token_id)
                    .await?
                    .map_or(false, |record| record.user_id == user_id);
                if owned {
                    self.tokens.revoke_refresh_token(token_id).await?;
                }
                tracing::info!(user_id = user_id, session_id = %token_id, "User logged out");
                Ok(MessageResponse::new("Logged out successfully"))
            }
            None => {
                self.tokens.revoke_all_user_tokens(user_id).await?;
                Ok(MessageResponse::new("Logged out from all devices"))
            }
        }
    }

    pub async fn active_sessions(&self, user_id: i64) -> Result<Vec<SessionInfo>, AppError> {
        let sessions = self
            .tokens
            .get_user_active_tokens(user_id)
            .await?
            .into_iter()
            .map(|record| SessionInfo {
                id: record.id,
                created_at: record.created_at,
                expires_at: record.expires_at,
            })
            .collect();
        Ok(sessions)
    }

    /// Always answers with the same message, whether or not the username
    /// exists.
    pub async fn forgot_password(&self, username: &str) -> Result<MessageResponse, AppError> {
        let username = username.trim();

        if let Some(user) = self.store.find_user_by_username(username).await? {
            let secret = generate_reset_secret();
            let now = Utc::now();
            let record = PasswordResetRecord {
                id: Uuid::new_v4(),
                user_id: user.id,
                token_hash: self.hasher.hash(&secret).await?,
                expires_at: now + Duration::seconds(self.reset_expiry),
                created_at: now,
            };
            self.store.replace_password_reset_token(&record).await?;

            let token = format_reset_token(record.id, &secret);
            self.notifier
                .send_reset_token(user.id, &user.username, &token)
                .await;
        } else {
            // Same bcrypt work as the known-user path
            self.hasher.hash(&generate_reset_secret()).await?;
            tracing::info!("Password reset requested for unknown username");
        }

        Ok(MessageResponse::new(FORGOT_PASSWORD_MESSAGE))
    }

    /// # Errors
    /// `InvalidResetToken` for any malformed, unknown, expired, consumed or
    /// mismatching token.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<MessageResponse, AppError> {
        is_valid_password("newPassword", new_password)?;

        let (reset_id, secret) = parse_reset_token(token).ok_or(AuthError::InvalidResetToken)?;

        let record = self
            .store
            .find_password_reset_token(reset_id)
            .await?
            .filter(|record| record.is_live(Utc::now()))
            .ok_or(AuthError::InvalidResetToken)?;

        if !self.hasher.verify(secret, &record.token_hash).await? {
            tracing::warn!(user_id = record.user_id, "Password reset secret mismatch");
            return Err(AuthError::InvalidResetToken.into());
        }

        let password_hash = self.hasher.hash(new_password).await?;
        if !self
            .store
            .complete_password_reset(record.id, record.user_id, &password_hash)
            .await?
        {
            return Err(AuthError::InvalidResetToken.into());
        }

        tracing::info!(user_id = record.user_id, "Password reset completed; all sessions revoked");
        Ok(MessageResponse::new("Password has been reset successfully"))
    }

    /// Creates an account. `actor` is the id of the authenticated caller
    /// performing the registration, if any.
    pub async fn register(&self, request: RegisterRequest, actor: Option<i64>) -> Result<PublicUser, AppError> {
        let username = is_valid_username(&request.username)?;
        is_valid_password("password", &request.password)?;
        let employee = request.employee_profile()?;
        // Branch links hang off the employee profile
        if employee.is_none() && !request.branch_ids.is_empty() {
            return Err(ValidationError::EmptyField("fullName".to_string()).into());
        }

        if self.store.find_user_by_username(&username).await?.is_some() {
            return Err(
                DatabaseError::UniqueConstraintViolation("Username already exists".to_string()).into(),
            );
        }

        let role_ids = if request.role_ids.is_empty() {
            let role = self
                .store
                .find_role_by_name(DEFAULT_ROLE)
                .await?
                .ok_or_else(|| AppError::not_found("Role", DEFAULT_ROLE))?;
            vec![role.id]
        } else {
            request.role_ids
        };

        let user = self
            .store
            .create_user(NewUser {
                username,
                password_hash: self.hasher.hash(&request.password).await?,
                employee,
                role_ids,
                branch_ids: request.branch_ids,
                actor,
            })
            .await?;

        tracing::info!(user_id = user.id, "User registered successfully");
        Ok(PublicUser {
            id: user.id,
            username: user.username,
            employee_id: user.employee_id,
        })
    }

    pub async fn cleanup_expired_tokens(&self) -> Result<u64, AppError> {
        self.tokens.cleanup_expired_tokens().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::strategies::Authenticator;
    use crate::configuration::JwtSettings;
    use crate::store::InMemoryCredentialStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingNotifier {
        tokens: Mutex<Vec<String>>,
    }

    impl CapturingNotifier {
        fn last(&self) -> Option<String> {
            self.tokens.lock().unwrap().last().cloned()
        }
    }

    #[async_trait::async_trait]
    impl ResetNotifier for CapturingNotifier {
        async fn send_reset_token(&self, _user_id: i64, _username: &str, token: &str) {
            self.tokens.lock().unwrap().push(token.to_string());
        }
    }

    struct Fixture {
        store: Arc<InMemoryCredentialStore>,
        notifier: Arc<CapturingNotifier>,
        auth: Authenticator,
        service: AuthService,
    }

    async fn fixture() -> Fixture {
        fixture_with_cost(4).await
    }

    async fn fixture_with_cost(cost: u32) -> Fixture {
        let store = Arc::new(InMemoryCredentialStore::new());
        store.upsert_role(DEFAULT_ROLE, None, &[], 0).await.unwrap();

        let hasher = PasswordHasher::new(cost);
        let signer = TokenSigner::new(&JwtSettings {
            access_secret: "access-secret".to_string(),
            refresh_secret: "refresh-secret".to_string(),
            access_token_expiry: 900,
            refresh_token_expiry: 3600,
            issuer: "test".to_string(),
        })
        .unwrap();
        let tokens = RefreshTokenStore::new(store.clone(), signer.clone());
        let notifier = Arc::new(CapturingNotifier::default());

        Fixture {
            auth: Authenticator::new(store.clone(), hasher, signer.clone(), tokens.clone()),
            service: AuthService::new(store.clone(), hasher, signer, tokens, notifier.clone(), 600),
            store,
            notifier,
        }
    }

    fn alice() -> RegisterRequest {
        RegisterRequest {
            username: "alice".to_string(),
            password: "secret1".to_string(),
            ..Default::default()
        }
    }

    async fn login(f: &Fixture, password: &str) -> TokenPair {
        let user = f.auth.validate_local("alice", password).await.unwrap();
        f.service.login(&user).await.unwrap()
    }

    #[tokio::test]
    async fn test_register_assigns_default_role_and_rejects_duplicates() {
        let f = fixture().await;

        let user = f.service.register(alice(), None).await.unwrap();
        assert_eq!(f.store.find_role_names(user.id).await.unwrap(), vec!["Employee"]);

        let mut again = alice();
        again.password = "secret2".to_string();
        let err = f.service.register(again, None).await.unwrap_err();
        assert_eq!(err.to_string(), "Username already exists");
    }

    #[tokio::test]
    async fn test_register_with_employee_profile() {
        let f = fixture().await;
        f.store.add_branch(3).unwrap();

        let mut request = alice();
        request.full_name = Some("Alice Nguyen".to_string());
        request.phone_number = Some("+84901234567".to_string());
        request.date_of_birth = Some("1995-04-12".to_string());
        request.branch_ids = vec![3];

        let user = f.service.register(request, Some(1)).await.unwrap();
        assert!(user.employee_id.is_some());

        let (employee, branches) = f.store.employee_of(user.id).unwrap().unwrap();
        assert_eq!(employee.full_name, "Alice Nguyen");
        assert_eq!(branches, vec![3]);
    }

    #[tokio::test]
    async fn test_register_branches_without_profile_is_rejected() {
        let f = fixture().await;
        f.store.add_branch(3).unwrap();

        let mut request = alice();
        request.branch_ids = vec![3];

        let err = f.service.register(request, None).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(ValidationError::EmptyField(_))));
        assert!(f.store.find_user_by_username("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_long_passwords_cannot_collide() {
        let f = fixture().await;
        let prefix = "a".repeat(72);

        let mut too_long = alice();
        too_long.password = format!("{}correct-tail", prefix);
        let err = f.service.register(too_long, None).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(ValidationError::TooLong(_, 72))));

        let mut at_limit = alice();
        at_limit.password = prefix.clone();
        f.service.register(at_limit, None).await.unwrap();

        assert!(f.auth.validate_local("alice", &prefix).await.is_ok());
        let err = f
            .auth
            .validate_local("alice", &format!("{}WRONG", prefix))
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn test_register_unknown_role_is_not_found() {
        let f = fixture().await;
        let mut request = alice();
        request.role_ids = vec![99];

        let err = f.service.register(request, None).await.unwrap_err();
        assert_eq!(err.to_string(), "Role with ID 99 not found");
        assert!(f.store.find_user_by_username("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_login_claims_match_user() {
        let f = fixture().await;
        let user = f.service.register(alice(), None).await.unwrap();

        let pair = login(&f, "secret1").await;
        let header = format!("Bearer {}", pair.access_token);
        let me = f.auth.validate_access(Some(header.as_str())).await.unwrap();

        assert_eq!(me.id, user.id);
        assert_eq!(me.roles, vec!["Employee"]);
        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.expires_in, 900);
    }

    #[tokio::test]
    async fn test_refresh_rotates_exactly_once() {
        let f = fixture().await;
        f.service.register(alice(), None).await.unwrap();
        let first = login(&f, "secret1").await;

        let session = f.auth.validate_refresh(&first.refresh_token).await.unwrap();
        let second = f.service.refresh_token(&session).await.unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);

        // The same validated session cannot be exchanged twice.
        assert!(f.service.refresh_token(&session).await.unwrap_err().is_unauthorized());
        assert!(f.auth.validate_refresh(&first.refresh_token).await.is_err());
        assert!(f.auth.validate_refresh(&second.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_logout_current_session_and_all() {
        let f = fixture().await;
        let user = f.service.register(alice(), None).await.unwrap();
        let phone = login(&f, "secret1").await;
        let laptop = login(&f, "secret1").await;
        assert_eq!(f.service.active_sessions(user.id).await.unwrap().len(), 2);

        let header = format!("Bearer {}", phone.access_token);
        let me = f.auth.validate_access(Some(header.as_str())).await.unwrap();
        f.service.logout(me.id, me.session_id).await.unwrap();

        assert!(f.auth.validate_refresh(&phone.refresh_token).await.is_err());
        assert!(f.auth.validate_refresh(&laptop.refresh_token).await.is_ok());

        f.service.logout(user.id, None).await.unwrap();
        assert!(f.service.active_sessions(user.id).await.unwrap().is_empty());
        assert!(f.auth.validate_refresh(&laptop.refresh_token).await.is_err());
    }

    #[tokio::test]
    async fn test_logout_ignores_other_users_session() {
        let f = fixture().await;
        f.service.register(alice(), None).await.unwrap();
        let pair = login(&f, "secret1").await;
        let session = f.auth.validate_refresh(&pair.refresh_token).await.unwrap();

        f.service.logout(session.user.id + 100, Some(session.token_id)).await.unwrap();
        assert!(f.auth.validate_refresh(&pair.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_forgot_password_is_generic() {
        let f = fixture().await;
        f.service.register(alice(), None).await.unwrap();

        let known = f.service.forgot_password("alice").await.unwrap();
        let unknown = f.service.forgot_password("nobody").await.unwrap();

        assert_eq!(known, unknown);
        assert_eq!(f.store.reset_token_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_forgot_password_for_unknown_user_still_hashes() {
        // cost 12 takes well over 10ms on any machine; a lookup miss alone does not
        let f = fixture_with_cost(12).await;

        let started = std::time::Instant::now();
        f.service.forgot_password("nobody").await.unwrap();

        assert!(started.elapsed() >= std::time::Duration::from_millis(10));
        assert_eq!(f.store.reset_token_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_new_reset_token_replaces_previous() {
        let f = fixture().await;
        f.service.register(alice(), None).await.unwrap();

        f.service.forgot_password("alice").await.unwrap();
        let first = f.notifier.last().unwrap();
        f.service.forgot_password("alice").await.unwrap();

        assert_eq!(f.store.reset_token_count().unwrap(), 1);
        let err = f.service.reset_password(&first, "newsecret").await.unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthError::InvalidResetToken)));
    }

    #[tokio::test]
    async fn test_reset_password_flow() {
        let f = fixture().await;
        f.service.register(alice(), None).await.unwrap();
        let old = login(&f, "secret1").await;

        f.service.forgot_password("alice").await.unwrap();
        let token = f.notifier.last().unwrap();

        f.service.reset_password(&token, "newsecret").await.unwrap();

        assert!(f.auth.validate_local("alice", "secret1").await.is_err());
        assert!(f.auth.validate_local("alice", "newsecret").await.is_ok());
        assert!(f.auth.validate_refresh(&old.refresh_token).await.is_err());

        // Consumed
        let err = f.service.reset_password(&token, "othersecret").await.unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthError::InvalidResetToken)));
    }

    #[tokio::test]
    async fn test_reset_with_wrong_secret_fails_generically() {
        let f = fixture().await;
        f.service.register(alice(), None).await.unwrap();
        f.service.forgot_password("alice").await.unwrap();
        let token = f.notifier.last().unwrap();
        let (id, _) = parse_reset_token(&token).unwrap();

        let forged = format_reset_token(id, &generate_reset_secret());
        let wrong_secret = f.service.reset_password(&forged, "newsecret").await.unwrap_err();
        let garbage = f.service.reset_password("garbage", "newsecret").await.unwrap_err();

        assert_eq!(wrong_secret.to_string(), garbage.to_string());
        assert_eq!(wrong_secret.to_string(), "Invalid or expired token");
    }
}
