use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{
    CredentialStore, NewEmployee, NewPermission, NewUser, PasswordResetRecord, PermissionRecord,
    RefreshTokenRecord, RoleRecord, UserRecord,
};
use crate::error::{AppError, DatabaseError, ValidationError};

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    users: BTreeMap<i64, UserRecord>,
    employees: BTreeMap<i64, NewEmployee>,
    employee_branches: BTreeMap<i64, BTreeSet<i64>>,
    branches: BTreeSet<i64>,
    roles: BTreeMap<i64, RoleRecord>,
    permissions: BTreeMap<i64, PermissionRecord>,
    role_permissions: HashMap<i64, BTreeSet<i64>>,
    user_roles: HashMap<i64, BTreeSet<i64>>,
    refresh_tokens: HashMap<Uuid, RefreshTokenRecord>,
    reset_tokens: HashMap<Uuid, PasswordResetRecord>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Process-local credential store. Every operation runs under one mutex, so
/// composite operations are atomic with respect to each other.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    state: Mutex<MemoryState>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, AppError> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal("credential store lock poisoned".to_string()))
    }

    /// Registers a branch id that registrations may link employees to.
    pub fn add_branch(&self, branch_id: i64) -> Result<(), AppError> {
        self.state()?.branches.insert(branch_id);
        Ok(())
    }

    pub fn set_user_active(&self, user_id: i64, is_active: bool) -> Result<(), AppError> {
        let mut state = self.state()?;
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| AppError::not_found("User", user_id))?;
        user.is_active = is_active;
        user.updated_at = Utc::now();
        Ok(())
    }

    /// Hard-deletes a user; owned refresh and reset tokens go with it.
    pub fn delete_user(&self, user_id: i64) -> Result<bool, AppError> {
        let mut state = self.state()?;
        let removed = state.users.remove(&user_id).is_some();
        state.user_roles.remove(&user_id);
        state.refresh_tokens.retain(|_, t| t.user_id != user_id);
        state.reset_tokens.retain(|_, t| t.user_id != user_id);
        Ok(removed)
    }

    pub fn employee_of(&self, user_id: i64) -> Result<Option<(NewEmployee, Vec<i64>)>, AppError> {
        let state = self.state()?;
        let employee_id = match state.users.get(&user_id).and_then(|u| u.employee_id) {
            Some(id) => id,
            None => return Ok(None),
        };
        let branches = state
            .employee_branches
            .get(&employee_id)
            .map(|b| b.iter().copied().collect())
            .unwrap_or_default();
        Ok(state.employees.get(&employee_id).cloned().map(|e| (e, branches)))
    }

    pub fn refresh_token_count(&self) -> Result<usize, AppError> {
        Ok(self.state()?.refresh_tokens.len())
    }

    pub fn reset_token_count(&self) -> Result<usize, AppError> {
        Ok(self.state()?.reset_tokens.len())
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<UserRecord>, AppError> {
        let state = self.state()?;
        Ok(state.users.values().find(|u| u.username == username).cloned())
    }

    async fn find_user_by_id(&self, user_id: i64) -> Result<Option<UserRecord>, AppError> {
        Ok(self.state()?.users.get(&user_id).cloned())
    }

    async fn find_role_names(&self, user_id: i64) -> Result<Vec<String>, AppError> {
        let state = self.state()?;
        let mut names: Vec<String> = state
            .user_roles
            .get(&user_id)
            .into_iter()
            .flatten()
            .filter_map(|role_id| state.roles.get(role_id))
            .map(|role| role.name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<RoleRecord>, AppError> {
        let state = self.state()?;
        Ok(state.roles.values().find(|r| r.name == name).cloned())
    }

    async fn create_user(&self, new_user: NewUser) -> Result<UserRecord, AppError> {
        let mut state = self.state()?;

        if state.users.values().any(|u| u.username == new_user.username) {
            return Err(DatabaseError::UniqueConstraintViolation(
                "Username already exists".to_string(),
            )
            .into());
        }
        if let Some(missing) = new_user.role_ids.iter().find(|id| !state.roles.contains_key(*id)) {
            return Err(AppError::not_found("Role", missing));
        }
        if new_user.employee.is_none() && !new_user.branch_ids.is_empty() {
            return Err(ValidationError::EmptyField("fullName".to_string()).into());
        }
        if let Some(missing) = new_user.branch_ids.iter().find(|id| !state.branches.contains(*id)) {
            return Err(AppError::not_found("Branch", missing));
        }

        let employee_id = match new_user.employee {
            Some(employee) => {
                let id = state.next_id();
                state.employees.insert(id, employee);
                state
                    .employee_branches
                    .insert(id, new_user.branch_ids.iter().copied().collect());
                Some(id)
            }
            None => None,
        };

        let now = Utc::now();
        let id = state.next_id();
        let user = UserRecord {
            id,
            username: new_user.username,
            password_hash: new_user.password_hash,
            employee_id,
            is_active: true,
            created_at: now,
            created_by: new_user.actor,
            updated_at: now,
            updated_by: new_user.actor,
        };
        state.users.insert(id, user.clone());
        state
            .user_roles
            .insert(id, new_user.role_ids.into_iter().collect());

        Ok(user)
    }

    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), AppError> {
        let mut state = self.state()?;
        if !state.users.contains_key(&record.user_id) {
            return Err(AppError::not_found("User", record.user_id));
        }
        if state.refresh_tokens.contains_key(&record.id) {
            return Err(DatabaseError::UniqueConstraintViolation("Duplicate entry".to_string()).into());
        }
        state.refresh_tokens.insert(record.id, record.clone());
        Ok(())
    }

    async fn find_refresh_token(&self, token_id: Uuid) -> Result<Option<RefreshTokenRecord>, AppError> {
        Ok(self.state()?.refresh_tokens.get(&token_id).cloned())
    }

    async fn delete_refresh_token(&self, token_id: Uuid) -> Result<bool, AppError> {
        Ok(self.state()?.refresh_tokens.remove(&token_id).is_some())
    }

    async fn delete_user_refresh_tokens(&self, user_id: i64) -> Result<u64, AppError> {
        let mut state = self.state()?;
        let before = state.refresh_tokens.len();
        state.refresh_tokens.retain(|_, t| t.user_id != user_id);
        Ok((before - state.refresh_tokens.len()) as u64)
    }

    async fn list_live_refresh_tokens(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefreshTokenRecord>, AppError> {
        let state = self.state()?;
        let mut records: Vec<RefreshTokenRecord> = state
            .refresh_tokens
            .values()
            .filter(|t| t.user_id == user_id && t.is_live(now))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn replace_refresh_token(
        &self,
        old_id: Uuid,
        new_record: &RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut state = self.state()?;
        match state.refresh_tokens.get(&old_id) {
            Some(old) if old.is_live(now) => {}
            _ => return Ok(false),
        }
        state.refresh_tokens.remove(&old_id);
        state.refresh_tokens.insert(new_record.id, new_record.clone());
        Ok(true)
    }

    async fn delete_expired_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let mut state = self.state()?;
        let before = state.refresh_tokens.len();
        state.refresh_tokens.retain(|_, t| t.is_live(now));
        Ok((before - state.refresh_tokens.len()) as u64)
    }

    async fn replace_password_reset_token(&self, record: &PasswordResetRecord) -> Result<(), AppError> {
        let mut state = self.state()?;
        state.reset_tokens.retain(|_, t| t.user_id != record.user_id);
        state.reset_tokens.insert(record.id, record.clone());
        Ok(())
    }

    async fn find_password_reset_token(
        &self,
        reset_id: Uuid,
    ) -> Result<Option<PasswordResetRecord>, AppError> {
        Ok(self.state()?.reset_tokens.get(&reset_id).cloned())
    }

    async fn complete_password_reset(
        &self,
        reset_id: Uuid,
        user_id: i64,
        password_hash: &str,
    ) -> Result<bool, AppError> {
        let mut state = self.state()?;
        if state.reset_tokens.remove(&reset_id).is_none() {
            return Ok(false);
        }
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| AppError::not_found("User", user_id))?;
        user.password_hash = password_hash.to_string();
        user.updated_at = Utc::now();
        user.updated_by = Some(user_id);
        state.refresh_tokens.retain(|_, t| t.user_id != user_id);
        Ok(true)
    }

    async fn ensure_user(&self, username: &str, password_hash: &str) -> Result<UserRecord, AppError> {
        if let Some(existing) = self.find_user_by_username(username).await? {
            return Ok(existing);
        }
        self.create_user(NewUser {
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            ..NewUser::default()
        })
        .await
    }

    async fn upsert_permissions(
        &self,
        permissions: &[NewPermission],
        _actor: i64,
    ) -> Result<Vec<PermissionRecord>, AppError> {
        let mut state = self.state()?;
        for permission in permissions {
            let exists = state
                .permissions
                .values()
                .any(|p| p.action == permission.action && p.subject == permission.subject);
            if !exists {
                let id = state.next_id();
                state.permissions.insert(
                    id,
                    PermissionRecord {
                        id,
                        action: permission.action.clone(),
                        subject: permission.subject.clone(),
                        description: permission.description.clone(),
                    },
                );
            }
        }
        Ok(state.permissions.values().cloned().collect())
    }

    async fn upsert_role(
        &self,
        name: &str,
        description: Option<&str>,
        permission_ids: &[i64],
        _actor: i64,
    ) -> Result<RoleRecord, AppError> {
        let mut state = self.state()?;
        if let Some(missing) = permission_ids.iter().find(|id| !state.permissions.contains_key(*id)) {
            return Err(AppError::not_found("Permission", missing));
        }

        let existing = state.roles.values().find(|r| r.name == name).map(|r| r.id);
        let id = match existing {
            Some(id) => id,
            None => state.next_id(),
        };
        let role = RoleRecord {
            id,
            name: name.to_string(),
            description: description.map(str::to_string),
        };
        state.roles.insert(id, role.clone());
        state
            .role_permissions
            .insert(id, permission_ids.iter().copied().collect());
        Ok(role)
    }

    async fn find_role_permissions(&self, role_id: i64) -> Result<Vec<PermissionRecord>, AppError> {
        let state = self.state()?;
        Ok(state
            .role_permissions
            .get(&role_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.permissions.get(id).cloned())
            .collect())
    }

    async fn set_user_roles(&self, user_id: i64, role_ids: &[i64], actor: i64) -> Result<(), AppError> {
        let mut state = self.state()?;
        if let Some(missing) = role_ids.iter().find(|id| !state.roles.contains_key(*id)) {
            return Err(AppError::not_found("Role", missing));
        }
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| AppError::not_found("User", user_id))?;
        user.updated_by = Some(actor);
        user.updated_at = Utc::now();
        state.user_roles.insert(user_id, role_ids.iter().copied().collect());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token_for(user_id: i64, expires_at: DateTime<Utc>) -> RefreshTokenRecord {
        RefreshTokenRecord {
            id: Uuid::new_v4(),
            user_id,
            token_hash: "digest".to_string(),
            expires_at,
            created_at: Utc::now(),
        }
    }

    async fn store_with_user() -> (InMemoryCredentialStore, UserRecord) {
        let store = InMemoryCredentialStore::new();
        let user = store.ensure_user("alice", "hash").await.unwrap();
        (store, user)
    }

    #[tokio::test]
    async fn test_duplicate_username_is_rejected() {
        let (store, _) = store_with_user().await;
        let result = store
            .create_user(NewUser {
                username: "alice".to_string(),
                password_hash: "other".to_string(),
                ..NewUser::default()
            })
            .await;

        assert!(matches!(
            result,
            Err(AppError::Database(DatabaseError::UniqueConstraintViolation(_)))
        ));
    }

    #[tokio::test]
    async fn test_unknown_branch_is_not_found() {
        let store = InMemoryCredentialStore::new();
        store.add_branch(1).unwrap();
        let result = store
            .create_user(NewUser {
                username: "bob".to_string(),
                password_hash: "hash".to_string(),
                employee: Some(NewEmployee {
                    full_name: "Bob Tran".to_string(),
                    phone_number: "0901234567".to_string(),
                    ..NewEmployee::default()
                }),
                branch_ids: vec![1, 7],
                ..NewUser::default()
            })
            .await;

        match result {
            Err(e) => assert_eq!(e.to_string(), "Branch with ID 7 not found"),
            Ok(_) => panic!("Expected NotFound"),
        }
        assert!(store.find_user_by_username("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_branches_without_employee_are_rejected() {
        let store = InMemoryCredentialStore::new();
        store.add_branch(3).unwrap();
        let result = store
            .create_user(NewUser {
                username: "bob".to_string(),
                password_hash: "hash".to_string(),
                branch_ids: vec![3],
                ..NewUser::default()
            })
            .await;

        assert!(matches!(
            result,
            Err(AppError::Validation(ValidationError::EmptyField(_)))
        ));
        assert!(store.find_user_by_username("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_refuses_expired_or_missing_token() {
        let (store, user) = store_with_user().await;
        let now = Utc::now();
        let old = token_for(user.id, now);
        store.insert_refresh_token(&old).await.unwrap();

        let replacement = token_for(user.id, now + Duration::days(7));
        // Exactly at expiry the old record is no longer live.
        assert!(!store.replace_refresh_token(old.id, &replacement, now).await.unwrap());
        assert!(!store
            .replace_refresh_token(Uuid::new_v4(), &replacement, now)
            .await
            .unwrap());
        assert!(store.find_refresh_token(replacement.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_swaps_records() {
        let (store, user) = store_with_user().await;
        let now = Utc::now();
        let old = token_for(user.id, now + Duration::days(1));
        store.insert_refresh_token(&old).await.unwrap();

        let replacement = token_for(user.id, now + Duration::days(7));
        assert!(store.replace_refresh_token(old.id, &replacement, now).await.unwrap());
        assert!(store.find_refresh_token(old.id).await.unwrap().is_none());
        assert!(store.find_refresh_token(replacement.id).await.unwrap().is_some());

        // A second exchange of the same old token fails.
        let another = token_for(user.id, now + Duration::days(7));
        assert!(!store.replace_refresh_token(old.id, &another, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_deleting_user_cascades_to_tokens() {
        let (store, user) = store_with_user().await;
        store
            .insert_refresh_token(&token_for(user.id, Utc::now() + Duration::days(1)))
            .await
            .unwrap();

        assert!(store.delete_user(user.id).unwrap());
        assert_eq!(store.refresh_token_count().unwrap(), 0);
    }
}
