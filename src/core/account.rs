use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ValidationError;

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

/// Tokens issued by the backend for one signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp, when the backend reports one.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: User,
}

impl Session {
    /// Label for exports and status lines: the email if known, otherwise the user id.
    pub fn owner_label(&self) -> String {
        self.user
            .email
            .clone()
            .unwrap_or_else(|| self.user.id.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Result<Self, ValidationError> {
        let email = email.into().trim().to_string();
        let password = password.into();
        if email.is_empty() {
            return Err(ValidationError::EmptyEmail);
        }
        check_length(&password)?;
        Ok(Self { email, password })
    }
}

/// Validate a new password against its confirmation before calling the backend.
pub fn validate_password_change(new_password: &str, confirm: &str) -> Result<(), ValidationError> {
    if new_password != confirm {
        return Err(ValidationError::PasswordMismatch);
    }
    check_length(new_password)
}

fn check_length(password: &str) -> Result<(), ValidationError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::PasswordTooShort { min: MIN_PASSWORD_LEN });
    }
    Ok(())
}
