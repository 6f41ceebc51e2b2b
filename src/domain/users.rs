//! User accounts for both portals

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::validation::{is_valid_email, length_between, ValidationErrors};
use crate::auth::password::MIN_PASSWORD_LENGTH;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Customer,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Customer => "customer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "customer" => Some(Self::Customer),
            _ => None,
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub company: Option<String>,
    pub role: UserRole,
    pub active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub user: UserResponse,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    #[serde(default)]
    pub company: Option<String>,
}

impl RegisterRequest {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        errors.check(is_valid_email(&self.email), "email", "must be a valid email address");
        errors.check(
            self.password.chars().count() >= MIN_PASSWORD_LENGTH,
            "password",
            format!("must be at least {} characters", MIN_PASSWORD_LENGTH),
        );
        errors.check(length_between(&self.name, 1, 200), "name", "must be 1-200 characters");
        errors.into_result()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    #[serde(default)]
    pub company: Option<String>,
    pub role: UserRole,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl CreateUserRequest {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        RegisterRequest {
            email: self.email.clone(),
            password: self.password.clone(),
            name: self.name.clone(),
            company: None,
        }
        .validate()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub role: Option<UserRole>,
    #[serde(default)]
    pub active: Option<bool>,
}

impl UpdateUserRequest {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        if let Some(email) = &self.email {
            errors.check(is_valid_email(email), "email", "must be a valid email address");
        }
        if let Some(password) = &self.password {
            errors.check(
                password.chars().count() >= MIN_PASSWORD_LENGTH,
                "password",
                format!("must be at least {} characters", MIN_PASSWORD_LENGTH),
            );
        }
        if let Some(name) = &self.name {
            errors.check(length_between(name, 1, 200), "name", "must be 1-200 characters");
        }
        errors.into_result()
    }

    /// Admins may not lock themselves out.
    pub fn check_self_update(&self, actor_id: Uuid, target_id: Uuid) -> Result<(), &'static str> {
        if actor_id != target_id {
            return Ok(());
        }
        if self.active == Some(false) {
            return Err("You cannot deactivate your own account");
        }
        if matches!(self.role, Some(UserRole::Customer)) {
            return Err("You cannot remove your own admin role");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

impl ChangePasswordRequest {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        errors.check(
            self.new_password.chars().count() >= MIN_PASSWORD_LENGTH,
            "new_password",
            format!("must be at least {} characters", MIN_PASSWORD_LENGTH),
        );
        errors.check(
            self.new_password != self.current_password,
            "new_password",
            "must differ from the current password",
        );
        errors.into_result()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserListFilter {
    #[serde(default)]
    pub role: Option<UserRole>,
    #[serde(default)]
    pub active: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trip() {
        for role in [UserRole::Admin, UserRole::Customer] {
            assert_eq!(UserRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(UserRole::parse("root"), None);
    }

    #[test]
    fn register_validation_reports_each_field() {
        let req = RegisterRequest {
            email: "nope".into(),
            password: "short".into(),
            name: "".into(),
            company: None,
        };
        let fields: Vec<_> = req
            .validate()
            .unwrap_err()
            .into_inner()
            .into_iter()
            .map(|e| e.field)
            .collect();
        assert_eq!(fields, vec!["email", "password", "name"]);
    }

    #[test]
    fn admins_cannot_lock_themselves_out() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let deactivate = UpdateUserRequest {
            active: Some(false),
            ..Default::default()
        };
        assert!(deactivate.check_self_update(me, me).is_err());
        assert!(deactivate.check_self_update(me, other).is_ok());

        let demote = UpdateUserRequest {
            role: Some(UserRole::Customer),
            ..Default::default()
        };
        assert!(demote.check_self_update(me, me).is_err());

        let rename = UpdateUserRequest {
            name: Some("New Name".into()),
            ..Default::default()
        };
        assert!(rename.check_self_update(me, me).is_ok());
    }

    #[test]
    fn password_change_must_differ() {
        let req = ChangePasswordRequest {
            current_password: "same-password".into(),
            new_password: "same-password".into(),
        };
        assert!(req.validate().is_err());
    }
}
