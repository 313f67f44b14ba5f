use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global JSON subscriber. `RUST_LOG` overrides the `info`
/// default. `log` records (actix, sqlx, the request logger) are forwarded
/// into the same pipeline.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_telemetry() -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let formatting_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .json()
        .with_current_span(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(formatting_layer)
        .try_init()
        .is_ok()
}
