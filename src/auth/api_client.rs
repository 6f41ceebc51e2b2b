//! Machine API authentication: API keys and OAuth client tokens.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use std::sync::Arc;
use uuid::Uuid;

use super::middleware::{bearer_token, AuthError};
use super::AuthContext;
use crate::app::AppState;
use crate::crypto::{hash_api_key, API_KEY_PREFIX};
use crate::domain::api_accounts::ip_allowed;
use crate::domain::users::UserRole;
use crate::middleware::client_ip::forwarded_ip;

pub const X_API_KEY: &str = "x-api-key";

/// A machine caller acting on behalf of a customer
#[derive(Debug, Clone)]
pub struct ApiClient {
    pub customer_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct RequireApiClient(pub ApiClient);

impl std::ops::Deref for RequireApiClient {
    type Target = ApiClient;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// The raw API key, from `X-Api-Key` or a bearer value with the key prefix.
fn api_key(parts: &Parts) -> Option<&str> {
    if let Some(value) = parts.headers.get(X_API_KEY).and_then(|v| v.to_str().ok()) {
        let value = value.trim();
        if !value.is_empty() {
            return Some(value);
        }
    }
    bearer_token(parts)
        .ok()
        .filter(|token| token.starts_with(API_KEY_PREFIX))
}

#[derive(sqlx::FromRow)]
struct ApiAccountAuthRow {
    id: Uuid,
    customer_id: Uuid,
    status: String,
    rate_limit_per_minute: i32,
    allowed_ips: Vec<String>,
    customer_active: bool,
}

async fn authenticate_key(
    parts: &Parts,
    state: &AppState,
    key: &str,
) -> Result<ApiClient, AuthError> {
    let row = sqlx::query_as::<_, ApiAccountAuthRow>(
        r#"
        SELECT a.id, a.customer_id, a.status, a.rate_limit_per_minute, a.allowed_ips,
               u.active AS customer_active
        FROM api_accounts a
        JOIN users u ON u.id = a.customer_id
        WHERE a.key_hash = $1
        "#,
    )
    .bind(hash_api_key(key))
    .fetch_optional(&state.db)
    .await
    .map_err(AuthError::Database)?
    .ok_or(AuthError::InvalidToken)?;

    if row.status != "active" || !row.customer_active {
        tracing::warn!(api_account_id = %row.id, "Rejected request for suspended API account");
        return Err(AuthError::Inactive);
    }

    if !ip_allowed(&row.allowed_ips, forwarded_ip(&parts.headers)) {
        tracing::warn!(api_account_id = %row.id, "API request from address outside allow-list");
        return Err(AuthError::IpNotAllowed);
    }

    let limit = u32::try_from(row.rate_limit_per_minute).unwrap_or(0);
    let bucket = format!("api:{}", row.id);
    if !state.cache.hit_rate_limit(&bucket, limit).await {
        return Err(AuthError::RateLimited);
    }

    if let Err(e) = sqlx::query("UPDATE api_accounts SET last_used_at = NOW() WHERE id = $1")
        .bind(row.id)
        .execute(&state.db)
        .await
    {
        tracing::warn!(api_account_id = %row.id, error = %e, "Failed to record API key use");
    }

    Ok(ApiClient {
        customer_id: row.customer_id,
    })
}

async fn authenticate_client_token(
    state: &AppState,
    token: &str,
) -> Result<ApiClient, AuthError> {
    let claims = state.tokens.verify(token).map_err(|e| {
        tracing::warn!(error = %e, "JWT verification failed");
        AuthError::InvalidToken
    })?;
    let context = AuthContext::from_claims(&claims).map_err(|_| AuthError::InvalidToken)?;

    let (Some(client_id), UserRole::Customer) = (context.client_id, context.role) else {
        return Err(AuthError::WrongRole("Machine API requires an API key or client token"));
    };

    let row: Option<(bool, bool)> = sqlx::query_as(
        r#"
        SELECT c.revoked, u.active
        FROM oauth_clients c
        JOIN users u ON u.id = c.customer_id
        WHERE c.id = $1 AND c.customer_id = $2
        "#,
    )
    .bind(client_id)
    .bind(context.user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(AuthError::Database)?;

    match row {
        Some((false, true)) => Ok(ApiClient {
            customer_id: context.user_id,
        }),
        Some((false, false)) => Err(AuthError::Inactive),
        _ => Err(AuthError::InvalidToken),
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireApiClient {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let client = match api_key(parts) {
            Some(key) => authenticate_key(parts, state, key).await?,
            None => {
                let token = bearer_token(parts)?;
                authenticate_client_token(state, token).await?
            }
        };
        Ok(RequireApiClient(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/api/v1/invoices");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn key_from_header_or_bearer() {
        assert_eq!(api_key(&parts(&[(X_API_KEY, "ak_abc")])), Some("ak_abc"));
        assert_eq!(api_key(&parts(&[("authorization", "Bearer ak_abc")])), Some("ak_abc"));
        assert_eq!(api_key(&parts(&[("authorization", "Bearer eyJhbGciOi")])), None);
        assert_eq!(api_key(&parts(&[])), None);
    }
}
