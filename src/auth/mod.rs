/// Authentication module
///
/// Password hashing, token signing, refresh-token lifecycle, request
/// strategies and the service tying them together.

mod claims;
mod jwt;
mod password;
mod refresh_token;
mod reset_token;
mod service;
mod strategies;

pub use claims::{AccessClaims, RefreshClaims};
pub use jwt::TokenSigner;
pub use password::{PasswordHasher, MAX_SECRET_BYTES};
pub use refresh_token::{digest_matches, hash_token, IssuedRefreshToken, RefreshTokenStore};
pub use reset_token::{
    format_reset_token, generate_reset_secret, parse_reset_token, LogNotifier, ResetNotifier,
};
pub use service::{
    AuthService, MessageResponse, PublicUser, RegisterRequest, SessionInfo, TokenPair,
    FORGOT_PASSWORD_MESSAGE,
};
pub use strategies::{AuthenticatedUser, Authenticator, RefreshSession};
