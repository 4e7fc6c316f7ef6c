//! Session and account types

use crate::{ItemSyncError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
}

/// Response of the login and register endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

/// Registration form as entered by the user
#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

/// Client-side checks run before a registration request is sent
pub fn validate_registration(form: &Registration) -> Result<()> {
    let username_len = form.username.trim().chars().count();
    if !(3..=50).contains(&username_len) {
        return Err(ItemSyncError::ValidationError(
            "Username must be between 3 and 50 characters".to_string(),
        ));
    }
    if !form.email.contains('@') {
        return Err(ItemSyncError::ValidationError(
            "Email address is invalid".to_string(),
        ));
    }
    if form.password != form.confirm_password {
        return Err(ItemSyncError::ValidationError(
            "Passwords do not match".to_string(),
        ));
    }
    if form.password.chars().count() < 6 {
        return Err(ItemSyncError::ValidationError(
            "Password must be at least 6 characters".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(password: &str, confirm: &str) -> Registration {
        Registration {
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password: password.to_string(),
            confirm_password: confirm.to_string(),
        }
    }

    #[test]
    fn test_registration_rules() {
        assert!(validate_registration(&form("secret1", "secret1")).is_ok());

        let mismatch = validate_registration(&form("secret1", "secret2")).unwrap_err();
        assert!(mismatch.to_string().contains("do not match"));

        let short = validate_registration(&form("abc", "abc")).unwrap_err();
        assert!(short.to_string().contains("at least 6"));

        let mut bad_name = form("secret1", "secret1");
        bad_name.username = "al".to_string();
        assert!(validate_registration(&bad_name).is_err());
    }
}
