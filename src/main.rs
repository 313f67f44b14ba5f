use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::sync::Arc;

use shift_auth::auth::LogNotifier;
use shift_auth::configuration::get_configuration;
use shift_auth::startup::{run, spawn_token_cleanup, AppState};
use shift_auth::store::PgCredentialStore;
use shift_auth::telemetry::init_telemetry;

fn startup_error(kind: std::io::ErrorKind, message: &str) -> std::io::Error {
    std::io::Error::new(kind, message.to_string())
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry();

    tracing::info!("Starting application");

    let configuration = match get_configuration() {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to read configuration: {}", e);
            return Err(startup_error(
                std::io::ErrorKind::InvalidInput,
                "Configuration error",
            ));
        }
    };

    tracing::info!("Attempting to connect to database");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&configuration.database.connection_string())
        .await
        .map_err(|e| {
            tracing::error!("Failed to create connection pool: {}", e);
            startup_error(std::io::ErrorKind::ConnectionRefused, "Database connection error")
        })?;

    sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
        tracing::error!("Failed to run migrations: {}", e);
        startup_error(std::io::ErrorKind::Other, "Migration error")
    })?;
    tracing::info!("Database schema is up to date");

    let state = AppState::build(
        Arc::new(PgCredentialStore::new(pool)),
        &configuration.jwt,
        &configuration.security,
        Arc::new(LogNotifier),
    )
    .map_err(|e| {
        tracing::error!("Failed to initialise authentication: {}", e);
        startup_error(std::io::ErrorKind::InvalidInput, "Configuration error")
    })?;

    if spawn_token_cleanup(
        state.service.clone(),
        configuration.application.token_cleanup_interval,
    )
    .is_some()
    {
        tracing::info!(
            interval_secs = configuration.application.token_cleanup_interval,
            "Expired token cleanup scheduled"
        );
    }

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    run(listener, state)?.await
}
