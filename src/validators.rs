/// Request input validators
///
/// Bodies are checked here before they reach the authentication service:
/// length limits, character classes, and the optional profile fields sent
/// with a registration.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ValidationError;

const MIN_USERNAME_LENGTH: usize = 3;
const MAX_USERNAME_LENGTH: usize = 64;
pub const MIN_PASSWORD_LENGTH: usize = 6;
pub const MAX_PASSWORD_LENGTH: usize = crate::auth::MAX_SECRET_BYTES; // bytes
const MAX_EMAIL_LENGTH: usize = 254; // RFC 5321
const MAX_NAME_LENGTH: usize = 256;
const MAX_ADDRESS_LENGTH: usize = 512;

lazy_static! {
    static ref USERNAME_REGEX: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap();

    // RFC 5322 simplified email regex (practical validation)
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$"
    ).unwrap();

    static ref PHONE_REGEX: Regex = Regex::new(r"^\+?[0-9][0-9 ().-]{5,24}$").unwrap();
}

/// Validates a login name and returns it trimmed.
pub fn is_valid_username(username: &str) -> Result<String, ValidationError> {
    let trimmed = username.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("username".to_string()));
    }
    if trimmed.len() < MIN_USERNAME_LENGTH {
        return Err(ValidationError::TooShort("username".to_string(), MIN_USERNAME_LENGTH));
    }
    if trimmed.len() > MAX_USERNAME_LENGTH {
        return Err(ValidationError::TooLong("username".to_string(), MAX_USERNAME_LENGTH));
    }
    if !USERNAME_REGEX.is_match(trimmed) {
        return Err(ValidationError::InvalidFormat("username".to_string()));
    }

    Ok(trimmed.to_string())
}

/// Password length policy. Passwords are never trimmed.
pub fn is_valid_password(field: &str, password: &str) -> Result<(), ValidationError> {
    if password.is_empty() {
        return Err(ValidationError::EmptyField(field.to_string()));
    }
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ValidationError::TooShort(field.to_string(), MIN_PASSWORD_LENGTH));
    }
    // bcrypt ignores everything past 72 bytes
    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(ValidationError::TooLong(field.to_string(), MAX_PASSWORD_LENGTH));
    }
    if password.contains('\0') {
        return Err(ValidationError::SuspiciousContent(field.to_string()));
    }

    Ok(())
}

/// Validates a person's full name
pub fn is_valid_name(name: &str) -> Result<String, ValidationError> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("fullName".to_string()));
    }
    if trimmed.len() > MAX_NAME_LENGTH {
        return Err(ValidationError::TooLong("fullName".to_string(), MAX_NAME_LENGTH));
    }
    if has_suspicious_name_patterns(trimmed) {
        return Err(ValidationError::SuspiciousContent("fullName".to_string()));
    }

    Ok(trimmed.to_string())
}

pub fn is_valid_phone(phone: &str) -> Result<String, ValidationError> {
    let trimmed = phone.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("phoneNumber".to_string()));
    }
    if !PHONE_REGEX.is_match(trimmed) {
        return Err(ValidationError::InvalidFormat("phoneNumber".to_string()));
    }

    Ok(trimmed.to_string())
}

pub fn is_valid_email(email: &str) -> Result<String, ValidationError> {
    let trimmed = email.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("email".to_string()));
    }
    if trimmed.len() > MAX_EMAIL_LENGTH {
        return Err(ValidationError::TooLong("email".to_string(), MAX_EMAIL_LENGTH));
    }
    if !EMAIL_REGEX.is_match(trimmed) || trimmed.matches('@').count() != 1 {
        return Err(ValidationError::InvalidFormat("email".to_string()));
    }

    Ok(trimmed.to_string())
}

pub fn is_valid_address(address: &str) -> Result<String, ValidationError> {
    let trimmed = address.trim();

    if trimmed.len() > MAX_ADDRESS_LENGTH {
        return Err(ValidationError::TooLong("address".to_string(), MAX_ADDRESS_LENGTH));
    }
    if trimmed.chars().any(|c| c.is_control() && c != '\n') {
        return Err(ValidationError::SuspiciousContent("address".to_string()));
    }

    Ok(trimmed.to_string())
}

/// Parses an ISO-8601 calendar date (`YYYY-MM-DD`)
pub fn parse_iso_date(field: &str, value: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| ValidationError::InvalidFormat(field.to_string()))
}

/// Detects suspicious patterns in names
fn has_suspicious_name_patterns(name: &str) -> bool {
    if name.chars().any(|c| c.is_control()) {
        return true;
    }

    let special_char_count = name
        .chars()
        .filter(|c| !c.is_alphanumeric() && !c.is_whitespace() && !matches!(c, '-' | '.' | '\''))
        .count();

    special_char_count > 5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_username() {
        assert_eq!(is_valid_username("  alice ").unwrap(), "alice");
        assert!(is_valid_username("john_doe").is_ok());
        assert!(is_valid_username("j.doe-2").is_ok());
    }

    #[test]
    fn test_invalid_username() {
        assert!(is_valid_username("").is_err());
        assert!(is_valid_username("ab").is_err());
        assert!(is_valid_username("has space").is_err());
        assert!(is_valid_username("_leading").is_err());
        assert!(is_valid_username(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_password_length_policy() {
        assert!(is_valid_password("password", "secret1").is_ok());
        assert!(is_valid_password("password", "short").is_err());
        assert!(is_valid_password("password", "").is_err());
        assert!(is_valid_password("password", &"a".repeat(MAX_PASSWORD_LENGTH + 1)).is_err());
        assert!(is_valid_password("password", &"a".repeat(72)).is_ok());
        // multi-byte characters count by encoded length
        assert!(is_valid_password("password", &"é".repeat(37)).is_err());
    }

    #[test]
    fn test_password_error_names_the_field() {
        let err = is_valid_password("newPassword", "abc").unwrap_err();
        assert_eq!(err.to_string(), "newPassword is too short (minimum 6 characters)");
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("John Doe").is_ok());
        assert!(is_valid_name("Nguyễn Văn A").is_ok());
        assert!(is_valid_name("O'Brien").is_ok());
        assert!(is_valid_name("").is_err());
        assert!(is_valid_name("Name\0with\0null").is_err());
        assert!(is_valid_name("!!!!!!@@@@").is_err());
    }

    #[test]
    fn test_phone() {
        assert!(is_valid_phone("+1234567890").is_ok());
        assert!(is_valid_phone("0901 234 567").is_ok());
        assert!(is_valid_phone("call me").is_err());
        assert!(is_valid_phone("").is_err());
    }

    #[test]
    fn test_email() {
        assert!(is_valid_email("user@example.com").is_ok());
        assert!(is_valid_email("user@").is_err());
        assert!(is_valid_email("@example.com").is_err());
        assert!(is_valid_email("user@@example.com").is_err());
    }

    #[test]
    fn test_iso_date() {
        assert!(parse_iso_date("dateOfBirth", "1990-01-01").is_ok());
        assert!(parse_iso_date("dateOfBirth", "01/01/1990").is_err());
        assert!(parse_iso_date("dateOfBirth", "1990-02-30").is_err());
    }
}
