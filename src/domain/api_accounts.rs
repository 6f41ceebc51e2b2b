//! Machine credentials owned by customers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::validation::{is_valid_ip, length_between, ValidationErrors};

pub const MAX_RATE_LIMIT: i32 = 10_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApiAccountStatus {
    Active,
    Suspended,
}

impl ApiAccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ApiAccount {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub customer_email: String,
    pub name: String,
    pub key_prefix: String,
    pub status: String,
    pub rate_limit_per_minute: i32,
    pub allowed_ips: Vec<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Returned once when a key is created or regenerated
#[derive(Debug, Clone, Serialize)]
pub struct ApiAccountWithKey {
    #[serde(flatten)]
    pub account: ApiAccount,
    pub api_key: String,
}

fn validate_limits(errors: &mut ValidationErrors, rate_limit: Option<i32>, ips: Option<&[String]>) {
    if let Some(limit) = rate_limit {
        errors.check(
            (1..=MAX_RATE_LIMIT).contains(&limit),
            "rate_limit_per_minute",
            format!("must be between 1 and {}", MAX_RATE_LIMIT),
        );
    }
    if let Some(ips) = ips {
        for ip in ips {
            if !is_valid_ip(ip) {
                errors.add("allowed_ips", format!("'{}' is not a valid IP address", ip));
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateApiAccountRequest {
    pub customer_id: Uuid,
    pub name: String,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: i32,
    #[serde(default)]
    pub allowed_ips: Vec<String>,
}

fn default_rate_limit() -> i32 {
    60
}

impl CreateApiAccountRequest {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        errors.check(length_between(&self.name, 1, 100), "name", "must be 1-100 characters");
        validate_limits(&mut errors, Some(self.rate_limit_per_minute), Some(&self.allowed_ips));
        errors.into_result()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateApiAccountRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<ApiAccountStatus>,
    #[serde(default)]
    pub rate_limit_per_minute: Option<i32>,
    #[serde(default)]
    pub allowed_ips: Option<Vec<String>>,
}

impl UpdateApiAccountRequest {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        if let Some(name) = &self.name {
            errors.check(length_between(name, 1, 100), "name", "must be 1-100 characters");
        }
        validate_limits(&mut errors, self.rate_limit_per_minute, self.allowed_ips.as_deref());
        errors.into_result()
    }
}

/// Whether a request from `client` passes the account's IP allowlist.
pub fn ip_allowed(allowed_ips: &[String], client: Option<std::net::IpAddr>) -> bool {
    if allowed_ips.is_empty() {
        return true;
    }
    match client {
        Some(ip) => allowed_ips
            .iter()
            .filter_map(|a| a.parse::<std::net::IpAddr>().ok())
            .any(|a| a == ip),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_and_ips_are_checked() {
        let req = CreateApiAccountRequest {
            customer_id: Uuid::new_v4(),
            name: "ERP sync".into(),
            rate_limit_per_minute: 0,
            allowed_ips: vec!["10.0.0.1".into(), "not-an-ip".into()],
        };
        let errs = req.validate().unwrap_err().into_inner();
        assert_eq!(errs.len(), 2);
        assert_eq!(errs[0].field, "rate_limit_per_minute");
        assert!(errs[1].message.contains("not-an-ip"));

        let update = UpdateApiAccountRequest {
            rate_limit_per_minute: Some(MAX_RATE_LIMIT),
            ..Default::default()
        };
        assert!(update.validate().is_ok());
    }

    #[test]
    fn allowlist() {
        let ip = "203.0.113.7".parse().ok();
        assert!(ip_allowed(&[], ip));
        assert!(ip_allowed(&[], None));
        assert!(ip_allowed(&["203.0.113.7".into()], ip));
        assert!(!ip_allowed(&["203.0.113.8".into()], ip));
        assert!(!ip_allowed(&["203.0.113.7".into()], None));
    }
}
