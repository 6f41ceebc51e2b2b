use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use super::AuthContext;
use crate::app::AppState;
use crate::domain::users::UserRole;
use crate::error::ErrorResponse;

/// Extractor that requires a valid access token.
///
/// ```ignore
/// async fn protected_route(auth: RequireAuth) -> impl IntoResponse {
///     format!("Hello, user {}", auth.user_id)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RequireAuth(pub AuthContext);

impl std::ops::Deref for RequireAuth {
    type Target = AuthContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidFormat,
    InvalidToken,
    WrongRole(&'static str),
    ClientToken,
    Inactive,
    IpNotAllowed,
    RateLimited,
    Database(sqlx::Error),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "Missing authorization token"),
            AuthError::InvalidFormat => (StatusCode::UNAUTHORIZED, "Invalid authorization format"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid or expired token"),
            AuthError::WrongRole(msg) => (StatusCode::FORBIDDEN, *msg),
            AuthError::ClientToken => (
                StatusCode::FORBIDDEN,
                "Client tokens can only access the machine API",
            ),
            AuthError::Inactive => (StatusCode::FORBIDDEN, "Account is inactive"),
            AuthError::IpNotAllowed => (
                StatusCode::FORBIDDEN,
                "Requests from this address are not allowed",
            ),
            AuthError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded"),
            AuthError::Database(e) => {
                tracing::error!(error = ?e, "Database error during authorization");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let code = match status {
            StatusCode::FORBIDDEN => "FORBIDDEN",
            StatusCode::UNAUTHORIZED => "UNAUTHORIZED",
            StatusCode::TOO_MANY_REQUESTS => "RATE_LIMITED",
            _ => "INTERNAL_ERROR",
        };

        (status, Json(ErrorResponse::new(code, message))).into_response()
    }
}

/// Pull the bearer token out of the Authorization header.
pub fn bearer_token(parts: &Parts) -> Result<&str, AuthError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingToken)?
        .to_str()
        .map_err(|_| AuthError::InvalidFormat)?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidFormat)?
        .trim();

    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }
    Ok(token)
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireAuth {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;

        let claims = state.tokens.verify(token).map_err(|e| {
            tracing::warn!(error = %e, "JWT verification failed");
            AuthError::InvalidToken
        })?;

        let context = AuthContext::from_claims(&claims).map_err(|e| {
            tracing::warn!(error = %e, "Failed to build auth context");
            AuthError::InvalidToken
        })?;

        Ok(RequireAuth(context))
    }
}

/// Re-check role and active flag against the users table, so revoked access
/// takes effect before the token expires.
async fn ensure_active_role(
    state: &AppState,
    user_id: Uuid,
    role: UserRole,
) -> Result<(), AuthError> {
    let row: Option<(String, bool)> =
        sqlx::query_as("SELECT role, active FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&state.db)
            .await
            .map_err(AuthError::Database)?;

    match row {
        Some((db_role, true)) if db_role == role.as_str() => Ok(()),
        Some((_, false)) => Err(AuthError::Inactive),
        Some(_) | None => {
            tracing::warn!(user_id = %user_id, role = %role, "Token role no longer matches account");
            Err(AuthError::WrongRole("Account role changed"))
        }
    }
}

async fn require_role(
    parts: &mut Parts,
    state: &Arc<AppState>,
    role: UserRole,
    message: &'static str,
) -> Result<RequireAuth, AuthError> {
    let auth = RequireAuth::from_request_parts(parts, state).await?;

    if auth.role != role {
        tracing::warn!(user_id = %auth.user_id, required = %role, "Role check failed");
        return Err(AuthError::WrongRole(message));
    }
    if auth.is_client_token() {
        return Err(AuthError::ClientToken);
    }

    ensure_active_role(state, auth.user_id, role).await?;
    Ok(auth)
}

/// Admin portal access
#[derive(Debug, Clone)]
pub struct RequireAdmin(pub AuthContext);

impl RequireAdmin {
    pub fn admin_id(&self) -> Uuid {
        self.0.user_id
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireAdmin {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth = require_role(parts, state, UserRole::Admin, "Admin privileges required").await?;
        Ok(RequireAdmin(auth.0))
    }
}

/// Customer portal access
#[derive(Debug, Clone)]
pub struct RequireCustomer(pub AuthContext);

impl RequireCustomer {
    pub fn customer_id(&self) -> Uuid {
        self.0.user_id
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireCustomer {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth =
            require_role(parts, state, UserRole::Customer, "Customer account required").await?;
        Ok(RequireCustomer(auth.0))
    }
}
