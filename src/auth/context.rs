use uuid::Uuid;

use super::Claims;
use crate::domain::users::UserRole;

/// Authenticated caller, built from verified token claims
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role: UserRole,
    /// OAuth client the token was issued to, if any
    pub client_id: Option<Uuid>,
}

impl AuthContext {
    pub fn from_claims(claims: &Claims) -> Result<Self, &'static str> {
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| "Invalid user ID in token")?;
        let role = UserRole::parse(&claims.role).ok_or("Unknown role in token")?;
        let client_id = claims
            .client_id
            .as_deref()
            .map(Uuid::parse_str)
            .transpose()
            .map_err(|_| "Invalid client ID in token")?;

        Ok(Self {
            user_id,
            role,
            client_id,
        })
    }

    pub fn is_client_token(&self) -> bool {
        self.client_id.is_some()
    }
}
