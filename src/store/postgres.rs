use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{
    CredentialStore, NewPermission, NewUser, PasswordResetRecord, PermissionRecord,
    RefreshTokenRecord, RoleRecord, UserRecord,
};
use crate::error::{AppError, DatabaseError, ValidationError};

const USER_COLUMNS: &str = "id, username, password_hash, employee_id, is_active, \
                            created_at, created_by, updated_at, updated_by";

/// Postgres-backed credential store. Composite operations run in a single
/// transaction.
#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn ensure_ids_exist(
        tx: &mut Transaction<'_, Postgres>,
        table: &str,
        entity: &'static str,
        ids: &[i64],
    ) -> Result<(), AppError> {
        if ids.is_empty() {
            return Ok(());
        }
        let found: Vec<i64> = sqlx::query_scalar(&format!(
            "SELECT id FROM {} WHERE id = ANY($1)",
            table
        ))
        .bind(ids)
        .fetch_all(&mut *tx)
        .await?;

        match ids.iter().find(|id| !found.contains(id)) {
            Some(missing) => Err(AppError::not_found(entity, missing)),
            None => Ok(()),
        }
    }
}

fn username_conflict(err: sqlx::Error) -> AppError {
    match AppError::from(err) {
        AppError::Database(DatabaseError::UniqueConstraintViolation(_)) => {
            DatabaseError::UniqueConstraintViolation("Username already exists".to_string()).into()
        }
        other => other,
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<UserRecord>, AppError> {
        let user = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {} FROM users WHERE username = $1",
            USER_COLUMNS
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_user_by_id(&self, user_id: i64) -> Result<Option<UserRecord>, AppError> {
        let user = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_role_names(&self, user_id: i64) -> Result<Vec<String>, AppError> {
        let names = sqlx::query_scalar::<_, String>(
            r#"
            SELECT r.name
            FROM roles r
            JOIN user_roles ur ON ur.role_id = r.id
            WHERE ur.user_id = $1
            ORDER BY r.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<RoleRecord>, AppError> {
        let role = sqlx::query_as::<_, RoleRecord>(
            "SELECT id, name, description FROM roles WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(role)
    }

    async fn create_user(&self, new_user: NewUser) -> Result<UserRecord, AppError> {
        if new_user.employee.is_none() && !new_user.branch_ids.is_empty() {
            return Err(ValidationError::EmptyField("fullName".to_string()).into());
        }

        let mut tx = self.pool.begin().await?;

        Self::ensure_ids_exist(&mut tx, "roles", "Role", &new_user.role_ids).await?;
        Self::ensure_ids_exist(&mut tx, "branches", "Branch", &new_user.branch_ids).await?;

        let employee_id = match &new_user.employee {
            Some(employee) => {
                let id: i64 = sqlx::query_scalar(
                    r#"
                    INSERT INTO employees (name, phone, email, address, date_of_birth,
                                           probation_start_date, official_start_date,
                                           created_by, updated_by)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
                    RETURNING id
                    "#,
                )
                .bind(&employee.full_name)
                .bind(&employee.phone_number)
                .bind(&employee.email)
                .bind(&employee.address)
                .bind(employee.date_of_birth)
                .bind(employee.probation_start_date)
                .bind(employee.official_start_date)
                .bind(new_user.actor)
                .fetch_one(&mut tx)
                .await?;

                for branch_id in &new_user.branch_ids {
                    sqlx::query(
                        "INSERT INTO employee_branches (employee_id, branch_id) VALUES ($1, $2)",
                    )
                    .bind(id)
                    .bind(branch_id)
                    .execute(&mut tx)
                    .await?;
                }
                Some(id)
            }
            None => None,
        };

        let user = sqlx::query_as::<_, UserRecord>(&format!(
            r#"
            INSERT INTO users (username, password_hash, employee_id, created_by, updated_by)
            VALUES ($1, $2, $3, $4, $4)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(&new_user.username)
        .bind(&new_user.password_hash)
        .bind(employee_id)
        .bind(new_user.actor)
        .fetch_one(&mut tx)
        .await
        .map_err(username_conflict)?;

        for role_id in &new_user.role_ids {
            sqlx::query("INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2)")
                .bind(user.id)
                .bind(role_id)
                .execute(&mut tx)
                .await?;
        }

        tx.commit().await?;
        Ok(user)
    }

    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(&record.token_hash)
        .bind(record.expires_at)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_refresh_token(&self, token_id: Uuid) -> Result<Option<RefreshTokenRecord>, AppError> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(
            "SELECT id, user_id, token_hash, expires_at, created_at FROM refresh_tokens WHERE id = $1",
        )
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn delete_refresh_token(&self, token_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE id = $1")
            .bind(token_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_user_refresh_tokens(&self, user_id: i64) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list_live_refresh_tokens(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefreshTokenRecord>, AppError> {
        let records = sqlx::query_as::<_, RefreshTokenRecord>(
            r#"
            SELECT id, user_id, token_hash, expires_at, created_at
            FROM refresh_tokens
            WHERE user_id = $1 AND expires_at > $2
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn replace_refresh_token(
        &self,
        old_id: Uuid,
        new_record: &RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        // The DELETE takes the row lock; a concurrent exchange of the same
        // token blocks here and then finds nothing to delete.
        let removed = sqlx::query("DELETE FROM refresh_tokens WHERE id = $1 AND expires_at > $2")
            .bind(old_id)
            .bind(now)
            .execute(&mut tx)
            .await?
            .rows_affected();

        if removed == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(new_record.id)
        .bind(new_record.user_id)
        .bind(&new_record.token_hash)
        .bind(new_record.expires_at)
        .bind(new_record.created_at)
        .execute(&mut tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn delete_expired_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn replace_password_reset_token(&self, record: &PasswordResetRecord) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM password_reset_tokens WHERE user_id = $1")
            .bind(record.user_id)
            .execute(&mut tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO password_reset_tokens (id, user_id, token_hash, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(&record.token_hash)
        .bind(record.expires_at)
        .bind(record.created_at)
        .execute(&mut tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_password_reset_token(
        &self,
        reset_id: Uuid,
    ) -> Result<Option<PasswordResetRecord>, AppError> {
        let record = sqlx::query_as::<_, PasswordResetRecord>(
            r#"
            SELECT id, user_id, token_hash, expires_at, created_at
            FROM password_reset_tokens
            WHERE id = $1
            "#,
        )
        .bind(reset_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn complete_password_reset(
        &self,
        reset_id: Uuid,
        user_id: i64,
        password_hash: &str,
    ) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        let consumed = sqlx::query("DELETE FROM password_reset_tokens WHERE id = $1 AND user_id = $2")
            .bind(reset_id)
            .bind(user_id)
            .execute(&mut tx)
            .await?
            .rows_affected();

        if consumed == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $1, updated_at = $2, updated_by = $3
            WHERE id = $3
            "#,
        )
        .bind(password_hash)
        .bind(Utc::now())
        .bind(user_id)
        .execute(&mut tx)
        .await?;

        sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn ensure_user(&self, username: &str, password_hash: &str) -> Result<UserRecord, AppError> {
        sqlx::query(
            r#"
            INSERT INTO users (username, password_hash)
            VALUES ($1, $2)
            ON CONFLICT (username) DO NOTHING
            "#,
        )
        .bind(username)
        .bind(password_hash)
        .execute(&self.pool)
        .await?;

        self.find_user_by_username(username)
            .await?
            .ok_or_else(|| AppError::not_found("User", username))
    }

    async fn upsert_permissions(
        &self,
        permissions: &[NewPermission],
        actor: i64,
    ) -> Result<Vec<PermissionRecord>, AppError> {
        let mut tx = self.pool.begin().await?;

        for permission in permissions {
            sqlx::query(
                r#"
                INSERT INTO permissions (action, subject, description, created_by, updated_by)
                VALUES ($1, $2, $3, $4, $4)
                ON CONFLICT (action, subject) DO NOTHING
                "#,
            )
            .bind(&permission.action)
            .bind(&permission.subject)
            .bind(&permission.description)
            .bind(actor)
            .execute(&mut tx)
            .await?;
        }

        let all = sqlx::query_as::<_, PermissionRecord>(
            "SELECT id, action, subject, description FROM permissions ORDER BY id",
        )
        .fetch_all(&mut tx)
        .await?;

        tx.commit().await?;
        Ok(all)
    }

    async fn upsert_role(
        &self,
        name: &str,
        description: Option<&str>,
        permission_ids: &[i64],
        actor: i64,
    ) -> Result<RoleRecord, AppError> {
        let mut tx = self.pool.begin().await?;

        Self::ensure_ids_exist(&mut tx, "permissions", "Permission", permission_ids).await?;

        let role = sqlx::query_as::<_, RoleRecord>(
            r#"
            INSERT INTO roles (name, description, created_by, updated_by)
            VALUES ($1, $2, $3, $3)
            ON CONFLICT (name) DO UPDATE
            SET description = EXCLUDED.description,
                updated_by = EXCLUDED.updated_by,
                updated_at = now()
            RETURNING id, name, description
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(actor)
        .fetch_one(&mut tx)
        .await?;

        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(role.id)
            .execute(&mut tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO role_permissions (role_id, permission_id)
            SELECT $1, UNNEST($2::BIGINT[])
            "#,
        )
        .bind(role.id)
        .bind(permission_ids)
        .execute(&mut tx)
        .await?;

        tx.commit().await?;
        Ok(role)
    }

    async fn find_role_permissions(&self, role_id: i64) -> Result<Vec<PermissionRecord>, AppError> {
        let permissions = sqlx::query_as::<_, PermissionRecord>(
            r#"
            SELECT p.id, p.action, p.subject, p.description
            FROM permissions p
            JOIN role_permissions rp ON rp.permission_id = p.id
            WHERE rp.role_id = $1
            ORDER BY p.id
            "#,
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(permissions)
    }

    async fn set_user_roles(&self, user_id: i64, role_ids: &[i64], actor: i64) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        Self::ensure_ids_exist(&mut tx, "roles", "Role", role_ids).await?;

        sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO user_roles (user_id, role_id)
            SELECT $1, UNNEST($2::BIGINT[])
            "#,
        )
        .bind(user_id)
        .bind(role_ids)
        .execute(&mut tx)
        .await?;

        let updated = sqlx::query("UPDATE users SET updated_by = $1, updated_at = now() WHERE id = $2")
            .bind(actor)
            .bind(user_id)
            .execute(&mut tx)
            .await?
            .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Err(AppError::not_found("User", user_id));
        }

        tx.commit().await?;
        Ok(())
    }
}
