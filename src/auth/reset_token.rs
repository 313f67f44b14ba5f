/// Password-reset tokens
///
/// A reset token is `<record id>.<secret>`. The record id locates the stored
/// row; the secret is checked against its bcrypt hash.

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use uuid::Uuid;

const SECRET_LENGTH: usize = 64;

/// Random high-entropy secret (base62)
pub fn generate_reset_secret() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LENGTH)
        .map(char::from)
        .collect()
}

pub fn format_reset_token(reset_id: Uuid, secret: &str) -> String {
    format!("{}.{}", reset_id, secret)
}

/// Splits a presented token into record id and secret. `None` for anything
/// that is not in the issued shape.
pub fn parse_reset_token(token: &str) -> Option<(Uuid, &str)> {
    let (id, secret) = token.trim().split_once('.')?;
    if secret.is_empty() || secret.len() > SECRET_LENGTH {
        return None;
    }
    let reset_id = Uuid::parse_str(id).ok()?;
    Some((reset_id, secret))
}

/// Out-of-band delivery of reset tokens to the account owner
#[async_trait]
pub trait ResetNotifier: Send + Sync {
    async fn send_reset_token(&self, user_id: i64, username: &str, token: &str);
}

/// Default notifier: no mail transport is wired up, the token only goes to
/// the debug log.
pub struct LogNotifier;

#[async_trait]
impl ResetNotifier for LogNotifier {
    async fn send_reset_token(&self, user_id: i64, username: &str, token: &str) {
        tracing::info!(user_id = user_id, username = %username, "Password reset token issued");
        tracing::debug!(user_id = user_id, reset_token = %token, "Password reset token");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_reset_secret() {
        let secret = generate_reset_secret();

        assert_eq!(secret.len(), SECRET_LENGTH);
        assert!(secret.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(secret, generate_reset_secret());
    }

    #[test]
    fn test_parse_issued_token() {
        let id = Uuid::new_v4();
        let secret = generate_reset_secret();
        let token = format_reset_token(id, &secret);

        assert_eq!(parse_reset_token(&token), Some((id, secret.as_str())));
    }

    #[test]
    fn test_parse_rejects_malformed_tokens() {
        assert_eq!(parse_reset_token(""), None);
        assert_eq!(parse_reset_token("no-separator"), None);
        assert_eq!(parse_reset_token("not-a-uuid.secret"), None);
        assert_eq!(parse_reset_token(&format!("{}.", Uuid::new_v4())), None);
        assert_eq!(
            parse_reset_token(&format!("{}.{}", Uuid::new_v4(), "a".repeat(65))),
            None
        );
    }
}
