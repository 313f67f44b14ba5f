/// Credential store
///
/// The relational store holding users, roles, permissions, refresh-token and
/// password-reset records. The authentication code only talks to the
/// `CredentialStore` trait; `PgCredentialStore` backs it with Postgres and
/// `InMemoryCredentialStore` keeps everything in process (tests, local runs).

mod memory;
mod postgres;

pub use memory::InMemoryCredentialStore;
pub use postgres::PgCredentialStore;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::AppError;

/// Name of the role given to self-registered users that ask for none.
pub const DEFAULT_ROLE: &str = "Employee";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub employee_id: Option<i64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<i64>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RoleRecord {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PermissionRecord {
    pub id: i64,
    pub action: String,
    pub subject: String,
    pub description: Option<String>,
}

/// Server-side half of an issued refresh token. Only the digest of the raw
/// token is kept.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: i64,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    /// A record is live strictly before its expiry instant.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PasswordResetRecord {
    pub id: Uuid,
    pub user_id: i64,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl PasswordResetRecord {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Employee profile created alongside a user at registration
#[derive(Debug, Clone, Default)]
pub struct NewEmployee {
    pub full_name: String,
    pub phone_number: String,
    pub email: Option<String>,
    pub address: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub probation_start_date: Option<NaiveDate>,
    pub official_start_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub employee: Option<NewEmployee>,
    pub role_ids: Vec<i64>,
    pub branch_ids: Vec<i64>,
    /// Id of the account performing the creation, if any
    pub actor: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewPermission {
    pub action: String,
    pub subject: String,
    pub description: Option<String>,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    // --- users and roles ---

    async fn find_user_by_username(&self, username: &str) -> Result<Option<UserRecord>, AppError>;

    async fn find_user_by_id(&self, user_id: i64) -> Result<Option<UserRecord>, AppError>;

    /// Role names currently granted to the user, sorted.
    async fn find_role_names(&self, user_id: i64) -> Result<Vec<String>, AppError>;

    async fn find_role_by_name(&self, name: &str) -> Result<Option<RoleRecord>, AppError>;

    /// Creates the user together with its employee profile and role/branch
    /// links as one unit. Fails with `UniqueConstraintViolation` on a taken
    /// username and `NotFound` naming the first unknown role or branch.
    async fn create_user(&self, new_user: NewUser) -> Result<UserRecord, AppError>;

    // --- refresh tokens ---

    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), AppError>;

    async fn find_refresh_token(&self, token_id: Uuid) -> Result<Option<RefreshTokenRecord>, AppError>;

    /// Returns whether a record was removed.
    async fn delete_refresh_token(&self, token_id: Uuid) -> Result<bool, AppError>;

    async fn delete_user_refresh_tokens(&self, user_id: i64) -> Result<u64, AppError>;

    /// Live records of the user, newest first.
    async fn list_live_refresh_tokens(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefreshTokenRecord>, AppError>;

    /// Atomically removes the live record `old_id` and inserts `new_record`.
    /// Returns `false`, inserting nothing, when `old_id` is absent or expired.
    async fn replace_refresh_token(
        &self,
        old_id: Uuid,
        new_record: &RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    async fn delete_expired_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64, AppError>;

    // --- password reset ---

    /// Stores `record`, dropping any earlier reset record of the same user.
    async fn replace_password_reset_token(&self, record: &PasswordResetRecord) -> Result<(), AppError>;

    async fn find_password_reset_token(
        &self,
        reset_id: Uuid,
    ) -> Result<Option<PasswordResetRecord>, AppError>;

    /// Consumes the reset record, stores the new password hash and drops every
    /// refresh token of the user, as one unit. Returns `false` when the reset
    /// record was already consumed.
    async fn complete_password_reset(
        &self,
        reset_id: Uuid,
        user_id: i64,
        password_hash: &str,
    ) -> Result<bool, AppError>;

    // --- seed data ---

    /// Inserts the user if the username is free; an existing row is returned
    /// untouched.
    async fn ensure_user(&self, username: &str, password_hash: &str) -> Result<UserRecord, AppError>;

    /// Inserts missing `(action, subject)` pairs and returns every permission.
    async fn upsert_permissions(
        &self,
        permissions: &[NewPermission],
        actor: i64,
    ) -> Result<Vec<PermissionRecord>, AppError>;

    /// Creates or updates the role by name and sets its permissions to exactly
    /// `permission_ids`.
    async fn upsert_role(
        &self,
        name: &str,
        description: Option<&str>,
        permission_ids: &[i64],
        actor: i64,
    ) -> Result<RoleRecord, AppError>;

    async fn find_role_permissions(&self, role_id: i64) -> Result<Vec<PermissionRecord>, AppError>;

    /// Replaces the user's roles with exactly `role_ids`.
    async fn set_user_roles(&self, user_id: i64, role_ids: &[i64], actor: i64) -> Result<(), AppError>;
}
