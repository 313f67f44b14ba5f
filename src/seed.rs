/// Setup data
///
/// Provisions the administrative settings account, the base permission set
/// and the Admin / Manager / Employee roles. Every step is an upsert, so the
/// routine can run any number of times.

use crate::auth::PasswordHasher;
use crate::configuration::SeedSettings;
use crate::error::AppError;
use crate::store::{CredentialStore, NewPermission, PermissionRecord, RoleRecord, DEFAULT_ROLE};

const ACTIONS: [&str; 4] = ["create", "read", "update", "delete"];
const SUBJECTS: [&str; 3] = ["users", "roles", "permissions"];

pub const ADMIN_ROLE: &str = "Admin";
pub const MANAGER_ROLE: &str = "Manager";

#[derive(Debug)]
pub struct SeedReport {
    pub settings_user_id: i64,
    pub permissions: usize,
    pub roles: Vec<RoleRecord>,
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn base_permissions() -> Vec<NewPermission> {
    SUBJECTS
        .iter()
        .flat_map(|subject| {
            ACTIONS.iter().map(move |action| NewPermission {
                action: action.to_string(),
                subject: subject.to_string(),
                description: Some(format!("{} {}", capitalize(action), subject)),
            })
        })
        .collect()
}

fn ids_for(permissions: &[PermissionRecord], actions: &[&str]) -> Vec<i64> {
    permissions
        .iter()
        .filter(|p| actions.contains(&p.action.as_str()))
        .map(|p| p.id)
        .collect()
}

pub async fn run_seed(
    store: &dyn CredentialStore,
    hasher: &PasswordHasher,
    settings: &SeedSettings,
) -> Result<SeedReport, AppError> {
    let password_hash = hasher.hash(&settings.settings_password).await?;
    let settings_user = store
        .ensure_user(settings.settings_username.trim(), &password_hash)
        .await?;
    let actor = settings_user.id;
    tracing::info!(user_id = actor, "Settings account ensured");

    let permissions = store.upsert_permissions(&base_permissions(), actor).await?;

    let all_ids: Vec<i64> = permissions.iter().map(|p| p.id).collect();
    let role_specs = [
        (ADMIN_ROLE, "System administrator with full access", all_ids),
        (
            MANAGER_ROLE,
            "Manager with read/update access",
            ids_for(&permissions, &["read", "update"]),
        ),
        (
            DEFAULT_ROLE,
            "Standard user with read-only access",
            ids_for(&permissions, &["read"]),
        ),
    ];

    let mut roles = Vec::with_capacity(role_specs.len());
    for (name, description, permission_ids) in role_specs.iter() {
        let role = store
            .upsert_role(name, Some(*description), permission_ids, actor)
            .await?;
        tracing::info!(role = %role.name, permissions = permission_ids.len(), "Role upserted");
        roles.push(role);
    }

    if let Some(admin) = roles.iter().find(|r| r.name == ADMIN_ROLE) {
        store.set_user_roles(actor, &[admin.id], actor).await?;
    }

    tracing::info!("Seed completed");
    Ok(SeedReport {
        settings_user_id: actor,
        permissions: permissions.len(),
        roles,
    })
}
