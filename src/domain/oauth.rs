//! OAuth clients and the client-credentials grant

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::validation::{is_valid_redirect_uri, length_between, ValidationErrors};

pub const GRANT_CLIENT_CREDENTIALS: &str = "client_credentials";

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct OauthClient {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OauthClientWithSecret {
    #[serde(flatten)]
    pub client: OauthClient,
    pub client_secret: String,
}

fn validate_redirects(errors: &mut ValidationErrors, uris: &[String]) {
    for uri in uris {
        if !is_valid_redirect_uri(uri) {
            errors.add("redirect_uris", format!("'{}' must be an absolute https URL", uri));
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOauthClientRequest {
    pub name: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

impl CreateOauthClientRequest {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        errors.check(length_between(&self.name, 1, 100), "name", "must be 1-100 characters");
        validate_redirects(&mut errors, &self.redirect_uris);
        errors.into_result()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateOauthClientRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub redirect_uris: Option<Vec<String>>,
}

impl UpdateOauthClientRequest {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        if let Some(name) = &self.name {
            errors.check(length_between(name, 1, 100), "name", "must be 1-100 characters");
        }
        if let Some(uris) = &self.redirect_uris {
            validate_redirects(&mut errors, uris);
        }
        errors.into_result()
    }
}

/// Token request body, accepted as form or JSON.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub grant_type: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
}

/// RFC 6749 error body
#[derive(Debug, Clone, Serialize)]
pub struct OauthErrorBody {
    pub error: &'static str,
    pub error_description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_uris_must_be_https() {
        let req = CreateOauthClientRequest {
            name: "Reporting".into(),
            redirect_uris: vec![
                "https://app.example.com/cb".into(),
                "http://localhost:8080/cb".into(),
                "http://example.com/cb".into(),
            ],
        };
        let errs = req.validate().unwrap_err().into_inner();
        assert_eq!(errs.len(), 1);
        assert!(errs[0].message.contains("http://example.com/cb"));
    }

    #[test]
    fn token_request_fields_are_optional() {
        let req: TokenRequest = serde_json::from_str(r#"{"grant_type":"client_credentials"}"#).unwrap();
        assert_eq!(req.grant_type.as_deref(), Some(GRANT_CLIENT_CREDENTIALS));
        assert!(req.client_id.is_none());
    }
}
