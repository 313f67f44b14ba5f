/// Authentication Routes
///
/// Registration, login, token refresh, logout variants, session listing and
/// the password-reset flow. Handlers only extract input and hand it to the
/// strategies and the service.

use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::auth::{AuthenticatedUser, RegisterRequest};
use crate::error::{AppError, ValidationError};
use crate::startup::AppState;

/// User login request
#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Body carrying a refresh token
#[derive(Deserialize)]
pub struct RefreshRequest {
    #[serde(alias = "refreshToken")]
    pub refresh_token: String,
}

#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    pub username: String,
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    #[serde(rename = "newPassword", alias = "new_password")]
    pub new_password: String,
}

fn required<'a>(field: &str, value: &'a str) -> Result<&'a str, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField(field.to_string()));
    }
    Ok(trimmed)
}

/// POST /auth/register
///
/// # Errors
/// - 400: validation error or username already taken
/// - 404: unknown role or branch id
pub async fn register(
    form: web::Json<RegisterRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let user = state.service.register(form.into_inner(), None).await?;
    Ok(HttpResponse::Created().json(user))
}

/// POST /auth/login
///
/// # Errors
/// - 401: password does not match
/// - 403: account is inactive
/// - 404: no such username
pub async fn login(
    form: web::Json<LoginRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let username = required("username", &form.username)?;
    if form.password.is_empty() {
        return Err(ValidationError::EmptyField("password".to_string()).into());
    }

    let user = state
        .authenticator
        .validate_local(username, &form.password)
        .await?;
    let tokens = state.service.login(&user).await?;

    Ok(HttpResponse::Ok().json(tokens))
}

/// POST /auth/refresh
///
/// Exchanges a refresh token for a new pair. The presented token is consumed.
///
/// # Errors
/// - 401: invalid, expired, revoked or already rotated refresh token
pub async fn refresh(
    form: web::Json<RefreshRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let session = state
        .authenticator
        .validate_refresh(&form.refresh_token)
        .await?;
    let tokens = state.service.refresh_token(&session).await?;

    Ok(HttpResponse::Ok().json(tokens))
}

/// POST /auth/logout-device
///
/// Revokes the session of the refresh token in the body.
pub async fn logout_device(
    form: web::Json<RefreshRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let session = state
        .authenticator
        .validate_refresh(&form.refresh_token)
        .await?;
    let message = state
        .service
        .logout(session.user.id, Some(session.token_id))
        .await?;

    Ok(HttpResponse::Ok().json(message))
}

/// POST /auth/logout
///
/// Revokes the session the presented access token was issued with.
pub async fn logout(
    user: web::ReqData<AuthenticatedUser>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let message = match user.session_id {
        Some(session_id) => state.service.logout(user.id, Some(session_id)).await?,
        None => return Err(ValidationError::InvalidFormat("session".to_string()).into()),
    };
    Ok(HttpResponse::Ok().json(message))
}

/// POST /auth/logout-all
pub async fn logout_all(
    user: web::ReqData<AuthenticatedUser>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let message = state.service.logout(user.id, None).await?;
    Ok(HttpResponse::Ok().json(message))
}

/// GET|POST /auth/active-sessions
pub async fn active_sessions(
    user: web::ReqData<AuthenticatedUser>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let sessions = state.service.active_sessions(user.id).await?;
    Ok(HttpResponse::Ok().json(sessions))
}

/// GET /auth/me
pub async fn get_current_user(user: web::ReqData<AuthenticatedUser>) -> HttpResponse {
    HttpResponse::Ok().json(user.into_inner())
}

/// POST /auth/forgot-password
///
/// Always 200 with the same body.
pub async fn forgot_password(
    form: web::Json<ForgotPasswordRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let message = state.service.forgot_password(&form.username).await?;
    Ok(HttpResponse::Ok().json(message))
}

/// POST /auth/reset-password
///
/// # Errors
/// - 400: new password fails the length policy, or the token is invalid or
///   expired (one generic message)
pub async fn reset_password(
    form: web::Json<ResetPasswordRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let message = state
        .service
        .reset_password(&form.token, &form.new_password)
        .await?;
    Ok(HttpResponse::Ok().json(message))
}
