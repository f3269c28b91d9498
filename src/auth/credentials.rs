//! Account credentials for sources that require a login
//!
//! Credentials are stored per module key by the state store and handed to the
//! module's authentication step. Passwords are read from the terminal without echo.

use std::fmt;
use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use crate::constants::auth;
use crate::errors::{AuthError, AuthResult};

/// Username and password for one module
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Validated credentials
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidUsername` for a malformed username or an empty
    /// password.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> AuthResult<Self> {
        let username = username.into().trim().to_string();
        let password = password.into();
        validate_username(&username)?;
        if password.is_empty() {
            return Err(AuthError::InvalidUsername {
                reason: "Password cannot be empty".to_string(),
            });
        }
        Ok(Self { username, password })
    }

    /// Form fields for a conventional login form
    pub fn form(&self) -> Vec<(String, String)> {
        vec![
            ("username".to_string(), self.username.clone()),
            ("password".to_string(), self.password.clone()),
        ]
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Check username length and characters
///
/// # Errors
///
/// Returns `AuthError::InvalidUsername` describing the first problem found.
pub fn validate_username(username: &str) -> AuthResult<()> {
    if username.is_empty() {
        return Err(AuthError::InvalidUsername {
            reason: "Username cannot be empty".to_string(),
        });
    }

    if username.len() < auth::MIN_USERNAME_LENGTH || username.len() > auth::MAX_USERNAME_LENGTH {
        return Err(AuthError::InvalidUsername {
            reason: format!(
                "Username must be between {} and {} characters",
                auth::MIN_USERNAME_LENGTH,
                auth::MAX_USERNAME_LENGTH
            ),
        });
    }

    // Email-style usernames are common, so '@' and '+' are allowed
    let valid = username
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | '@' | '+'));
    if !valid {
        return Err(AuthError::InvalidUsername {
            reason: "Username should be alphanumeric with optional . - _ @ +".to_string(),
        });
    }

    Ok(())
}

/// Prompt for a username on stdin
pub fn prompt_username(module_key: &str) -> AuthResult<String> {
    print!("{} username: ", module_key);
    io::stdout().flush()?;

    let mut username = String::new();
    io::stdin().read_line(&mut username)?;
    let username = username.trim().to_string();
    validate_username(&username)?;
    Ok(username)
}

/// Prompt for the password of `username` without echo
pub fn prompt_credentials(module_key: &str, username: Option<&str>) -> AuthResult<Credentials> {
    let username = match username {
        Some(name) => name.to_string(),
        None => prompt_username(module_key)?,
    };
    let password = rpassword::prompt_password(format!("{} password for {}: ", module_key, username))?;
    Credentials::new(username, password)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_username() {
        assert!(validate_username("user123").is_ok());
        assert!(validate_username("test.user").is_ok());
        assert!(validate_username("first.last@example.org").is_ok());
        assert!(validate_username("user_name-2").is_ok());

        assert!(validate_username("").is_err());
        assert!(validate_username("user name").is_err());
        assert!(validate_username("user#1").is_err());
        assert!(validate_username(&"a".repeat(auth::MAX_USERNAME_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_credentials_trim_and_reject_empty_password() {
        let creds = Credentials::new("  alice ", "pw").unwrap();
        assert_eq!(creds.username, "alice");

        let err = Credentials::new("alice", "").unwrap_err();
        assert!(matches!(err, AuthError::InvalidUsername { .. }));
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = Credentials::new("alice", "hunter2").unwrap();
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_login_form_fields() {
        let creds = Credentials::new("bob", "secret").unwrap();
        let form = creds.form();
        assert_eq!(form[0], ("username".to_string(), "bob".to_string()));
        assert_eq!(form[1], ("password".to_string(), "secret".to_string()));
    }
}
