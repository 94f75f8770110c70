use crate::error::{GatewayError, GatewayResult};

// =============================================================================
// Validation Constants
// =============================================================================

/// Maximum length for identity names (users and permissions).
///
/// Names become document ids in the credential store.
pub const MAX_USERNAME_LENGTH: usize = 255;

/// Minimum length for user passwords.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Maximum length for user passwords.
pub const MAX_PASSWORD_LENGTH: usize = 1024;

/// Validate an identity name.
///
/// Rules:
/// - Must be between 1 and 255 characters
/// - Must start and end with an alphanumeric character
/// - Can contain alphanumeric characters, dots, underscores, and hyphens
/// - Cannot contain consecutive dots, underscores, or hyphens
pub fn validate_username(name: &str) -> GatewayResult<()> {
    if name.is_empty() {
        return Err(GatewayError::BadRequest("username cannot be empty".into()));
    }

    if name.len() > MAX_USERNAME_LENGTH {
        return Err(GatewayError::BadRequest(format!(
            "username cannot exceed {MAX_USERNAME_LENGTH} characters"
        )));
    }

    let chars: Vec<char> = name.chars().collect();

    if !chars.first().is_some_and(|c| c.is_ascii_alphanumeric()) {
        return Err(GatewayError::BadRequest(
            "username must start with an alphanumeric character".into(),
        ));
    }

    if !chars.last().is_some_and(|c| c.is_ascii_alphanumeric()) {
        return Err(GatewayError::BadRequest(
            "username must end with an alphanumeric character".into(),
        ));
    }

    let mut prev_special = false;
    for (i, &c) in chars.iter().enumerate() {
        let is_special = c == '.' || c == '_' || c == '-';

        if !c.is_ascii_alphanumeric() && !is_special {
            return Err(GatewayError::BadRequest(format!(
                "username contains invalid character '{c}' at position {i}. \
                 Only alphanumeric characters, dots, underscores, and hyphens are allowed"
            )));
        }

        if is_special && prev_special {
            return Err(GatewayError::BadRequest(format!(
                "username cannot contain consecutive special characters at position {i}"
            )));
        }

        prev_special = is_special;
    }

    Ok(())
}

/// Validate a user password.
///
/// Must be 8..=1024 characters with no control characters.
pub fn validate_password(password: &str) -> GatewayResult<()> {
    let len = password.chars().count();
    if len < MIN_PASSWORD_LENGTH {
        return Err(GatewayError::BadRequest(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }

    if len > MAX_PASSWORD_LENGTH {
        return Err(GatewayError::BadRequest(format!(
            "password cannot exceed {MAX_PASSWORD_LENGTH} characters"
        )));
    }

    if let Some((i, c)) = password.chars().enumerate().find(|(_, c)| c.is_control()) {
        return Err(GatewayError::BadRequest(format!(
            "password contains control character {:?} at position {i}",
            c
        )));
    }

    Ok(())
}

/// Validate an email address. Only the overall shape is checked.
pub fn validate_email(email: &str) -> GatewayResult<()> {
    let valid = email.split_once('@').is_some_and(|(local, domain)| {
        !local.is_empty()
            && domain.contains('.')
            && !domain.starts_with('.')
            && !domain.ends_with('.')
    });

    if !valid || email.chars().any(char::is_whitespace) {
        return Err(GatewayError::BadRequest(format!("invalid email address '{email}'")));
    }
    Ok(())
}
