//! Access token issuing and verification (HS256)

use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;
use uuid::Uuid;

use super::Claims;
use crate::domain::users::UserRole;

#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
}

#[derive(Clone)]
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl_seconds: u64,
}

impl TokenSigner {
    pub fn new(secret: &str, issuer: String, audience: String, ttl_seconds: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer,
            audience,
            ttl_seconds,
        }
    }

    pub fn issue(
        &self,
        user_id: Uuid,
        role: UserRole,
        email: Option<&str>,
        client_id: Option<Uuid>,
    ) -> Result<IssuedToken> {
        self.issue_at(Utc::now().timestamp(), user_id, role, email, client_id)
    }

    fn issue_at(
        &self,
        now: i64,
        user_id: Uuid,
        role: UserRole,
        email: Option<&str>,
        client_id: Option<Uuid>,
    ) -> Result<IssuedToken> {
        let claims = Claims {
            sub: user_id.to_string(),
            aud: self.audience.clone(),
            iss: self.issuer.clone(),
            iat: now,
            exp: now + self.ttl_seconds as i64,
            nbf: Some(now),
            role: role.as_str().to_string(),
            email: email.map(str::to_string),
            client_id: client_id.map(|id| id.to_string()),
        };

        let access_token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .context("Failed to sign access token")?;

        Ok(IssuedToken {
            access_token,
            token_type: "Bearer",
            expires_in: self.ttl_seconds,
        })
    }

    /// Verify signature, issuer, audience, expiry and not-before.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.validate_exp = true;
        validation.validate_nbf = true;

        let token_data =
            decode::<Claims>(token, &self.decoding, &validation).context("JWT validation failed")?;

        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "unit-test-secret-with-enough-bytes-0123";

    fn signer() -> TokenSigner {
        TokenSigner::new(SECRET, "backoffice".into(), "portal".into(), 3600)
    }

    #[test]
    fn issued_token_verifies() {
        let user_id = Uuid::new_v4();
        let token = signer()
            .issue(user_id, UserRole::Admin, Some("ops@example.com"), None)
            .unwrap();
        assert_eq!(token.token_type, "Bearer");
        assert_eq!(token.expires_in, 3600);

        let claims = signer().verify(&token.access_token).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.role, "admin");
        assert_eq!(claims.email.as_deref(), Some("ops@example.com"));
        assert!(claims.client_id.is_none());
    }

    #[test]
    fn client_id_is_carried() {
        let client_id = Uuid::new_v4();
        let token = signer()
            .issue(Uuid::new_v4(), UserRole::Customer, None, Some(client_id))
            .unwrap();
        let claims = signer().verify(&token.access_token).unwrap();
        assert_eq!(claims.client_id, Some(client_id.to_string()));
    }

    #[test]
    fn rejects_wrong_audience_and_secret() {
        let token = signer()
            .issue(Uuid::new_v4(), UserRole::Customer, None, None)
            .unwrap();

        let other_audience = TokenSigner::new(SECRET, "backoffice".into(), "other".into(), 3600);
        assert!(other_audience.verify(&token.access_token).is_err());

        let other_secret = TokenSigner::new(
            "a-completely-different-secret-value-xyz",
            "backoffice".into(),
            "portal".into(),
            3600,
        );
        assert!(other_secret.verify(&token.access_token).is_err());
    }

    #[test]
    fn rejects_expired_token() {
        let issued_long_ago = Utc::now().timestamp() - 10 * 3600;
        let token = signer()
            .issue_at(issued_long_ago, Uuid::new_v4(), UserRole::Customer, None, None)
            .unwrap();
        assert!(signer().verify(&token.access_token).is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(signer().verify("not-a-jwt").is_err());
    }
}
