use sqlx::postgres::PgPoolOptions;

use shift_auth::auth::PasswordHasher;
use shift_auth::configuration::get_configuration;
use shift_auth::seed::run_seed;
use shift_auth::store::PgCredentialStore;
use shift_auth::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_telemetry();

    let configuration = get_configuration()?;
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&configuration.database.connection_string())
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let store = PgCredentialStore::new(pool);
    let hasher = PasswordHasher::new(configuration.security.hash_cost);

    let report = run_seed(&store, &hasher, &configuration.seed).await?;
    tracing::info!(
        settings_user_id = report.settings_user_id,
        permissions = report.permissions,
        roles = report.roles.len(),
        "Seed finished"
    );
    Ok(())
}
