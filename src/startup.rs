use actix_web::dev::Server;
use actix_web::{middleware::Logger, web, App, HttpServer};
use std::net::TcpListener;
use std::sync::Arc;

use crate::auth::{
    AuthService, Authenticator, PasswordHasher, RefreshTokenStore, ResetNotifier, TokenSigner,
};
use crate::configuration::{JwtSettings, SecuritySettings};
use crate::error::{json_error_handler, AppError};
use crate::logger::LoggerMiddleware;
use crate::middleware::AccessGuard;
use crate::routes::{
    active_sessions, forgot_password, get_current_user, health_check, login, logout, logout_all,
    logout_device, refresh, register, reset_password,
};
use crate::store::CredentialStore;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub service: AuthService,
    pub authenticator: Authenticator,
}

impl AppState {
    /// Wires the hasher, signer and refresh-token store over `store`.
    ///
    /// # Errors
    /// Returns a configuration error for missing JWT secrets.
    pub fn build(
        store: Arc<dyn CredentialStore>,
        jwt: &JwtSettings,
        security: &SecuritySettings,
        notifier: Arc<dyn ResetNotifier>,
    ) -> Result<Self, AppError> {
        let hasher = PasswordHasher::new(security.hash_cost);
        let signer = TokenSigner::new(jwt)?;
        let tokens = RefreshTokenStore::new(store.clone(), signer.clone());

        Ok(Self {
            authenticator: Authenticator::new(store.clone(), hasher, signer.clone(), tokens.clone()),
            service: AuthService::new(
                store,
                hasher,
                signer,
                tokens,
                notifier,
                security.password_reset_expiry,
            ),
        })
    }
}

pub fn run(listener: TcpListener, state: AppState) -> Result<Server, std::io::Error> {
    let state = web::Data::new(state);

    let server = HttpServer::new(move || {
        let guard = || AccessGuard::new(state.authenticator.clone());

        App::new()
            // Global middleware
            .wrap(Logger::default())
            .wrap(LoggerMiddleware)
            .app_data(state.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .route("/health_check", web::get().to(health_check))
            .service(
                web::scope("/auth")
                    // Public routes
                    .route("/register", web::post().to(register))
                    .route("/login", web::post().to(login))
                    .route("/refresh", web::post().to(refresh))
                    .route("/logout-device", web::post().to(logout_device))
                    .route("/forgot-password", web::post().to(forgot_password))
                    .route("/reset-password", web::post().to(reset_password))
                    // Access-token protected routes
                    .service(
                        web::resource("/logout")
                            .wrap(guard())
                            .route(web::post().to(logout)),
                    )
                    .service(
                        web::resource("/logout-all")
                            .wrap(guard())
                            .route(web::post().to(logout_all)),
                    )
                    .service(
                        web::resource("/active-sessions")
                            .wrap(guard())
                            .route(web::get().to(active_sessions))
                            .route(web::post().to(active_sessions)),
                    )
                    .service(
                        web::resource("/me")
                            .wrap(guard())
                            .route(web::get().to(get_current_user)),
                    ),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}

/// Spawns the periodic expired-token sweep. Returns `None` when
/// `interval_secs` is not positive.
pub fn spawn_token_cleanup(
    service: AuthService,
    interval_secs: i64,
) -> Option<tokio::task::JoinHandle<()>> {
    let period = u64::try_from(interval_secs).ok().filter(|s| *s > 0)?;

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(period));
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = service.cleanup_expired_tokens().await {
                tracing::error!(error = %e, "Expired token cleanup failed");
            }
        }
    }))
}
