//! Users, roles and email verification records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role names as they appear in tokens and policy subjects
pub const DEPOSITOR_ROLE: &str = "depositor";
pub const BANKER_ROLE: &str = "banker";

/// Supported user roles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Depositor,
    Banker,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Depositor => DEPOSITOR_ROLE,
            Role::Banker => BANKER_ROLE,
        }
    }
}

/// Role names double as policy subjects, so no user may be named after one
pub fn is_reserved_username(username: &str) -> bool {
    username.parse::<Role>().is_ok()
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            DEPOSITOR_ROLE => Ok(Role::Depositor),
            BANKER_ROLE => Ok(Role::Banker),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Stored user record
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct User {
    pub username: String,
    pub role: String,
    pub hashed_password: String,
    pub full_name: String,
    pub email: String,
    pub is_email_verified: bool,
    pub password_changed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Input for inserting a user
#[derive(Debug, Clone)]
pub struct CreateUserParams {
    pub username: String,
    pub role: Role,
    pub hashed_password: String,
    pub full_name: String,
    pub email: String,
}

/// Partial user update; `None` leaves the column untouched
#[derive(Debug, Clone, Default)]
pub struct UpdateUserParams {
    pub username: String,
    pub hashed_password: Option<String>,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub password_changed_at: Option<DateTime<Utc>>,
}

impl UpdateUserParams {
    pub fn is_empty(&self) -> bool {
        self.hashed_password.is_none() && self.full_name.is_none() && self.email.is_none()
    }
}

/// Verification link record sent to a user's email address
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct VerifyEmail {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub secret_code: String,
    pub is_used: bool,
    pub created_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        assert_eq!("banker".parse::<Role>(), Ok(Role::Banker));
        assert_eq!(Role::Depositor.to_string(), "depositor");
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn test_role_names_are_reserved() {
        assert!(is_reserved_username("banker"));
        assert!(is_reserved_username("depositor"));
        assert!(!is_reserved_username("bankers"));
    }

    #[test]
    fn test_update_params_empty() {
        let params = UpdateUserParams {
            username: "alice".to_string(),
            ..Default::default()
        };
        assert!(params.is_empty());

        let params = UpdateUserParams {
            full_name: Some("Alice".to_string()),
            ..params
        };
        assert!(!params.is_empty());
    }
}
