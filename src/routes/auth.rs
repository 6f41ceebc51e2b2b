//! Authentication routes
//!
//! Passwords are verified locally and exchanged for a signed access token.

use axum::{extract::State, response::IntoResponse, Json};
use std::sync::Arc;
use uuid::Uuid;

use super::users::{fetch_user, normalize_email};
use crate::api::{Created, DataResponse};
use crate::app::AppState;
use crate::auth::password::{hash_password_blocking, verify_password_blocking};
use crate::domain::users::{LoginRequest, LoginResponse, RegisterRequest, UserRole};
use crate::error::ApiError;

const INVALID_CREDENTIALS: &str = "Invalid email or password";

#[derive(Debug, sqlx::FromRow)]
struct CredentialRow {
    id: Uuid,
    email: String,
    password_hash: String,
    role: String,
    active: bool,
}

/// POST /auth/login
///
/// Unknown email, wrong password and inactive accounts get the same answer.
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let row = sqlx::query_as::<_, CredentialRow>(
        "SELECT id, email, password_hash, role, active FROM users WHERE email = $1",
    )
    .bind(normalize_email(&req.email))
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::unauthorized(INVALID_CREDENTIALS))?;

    let valid = verify_password_blocking(req.password, row.password_hash).await?;
    if !valid || !row.active {
        tracing::warn!(user_id = %row.id, active = row.active, "Rejected login");
        return Err(ApiError::unauthorized(INVALID_CREDENTIALS));
    }

    let role = UserRole::parse(&row.role)
        .ok_or_else(|| ApiError::internal(format!("Unknown role '{}'", row.role)))?;

    sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = $1")
        .bind(row.id)
        .execute(&state.db)
        .await?;

    let issued = state.tokens.issue(row.id, role, Some(&row.email), None)?;
    let user = fetch_user(&state.db, row.id).await?;

    tracing::info!(user_id = %row.id, role = %role, "User logged in");

    Ok(Json(DataResponse::new(LoginResponse {
        access_token: issued.access_token,
        token_type: issued.token_type,
        expires_in: issued.expires_in,
        user,
    })))
}

/// POST /auth/register
///
/// Customer self-registration, only when enabled in settings.
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.settings.allow_registration {
        return Err(ApiError::forbidden("Registration is disabled"));
    }
    req.validate()?;

    let email = normalize_email(&req.email);
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
        .bind(&email)
        .fetch_one(&state.db)
        .await?;
    if exists {
        return Err(ApiError::conflict("An account with this email already exists"));
    }

    let password_hash = hash_password_blocking(req.password).await?;
    let id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO users (id, email, password_hash, name, company, role, active)
        VALUES ($1, $2, $3, $4, $5, 'customer', TRUE)
        "#,
    )
    .bind(id)
    .bind(&email)
    .bind(password_hash)
    .bind(req.name.trim())
    .bind(&req.company)
    .execute(&state.db)
    .await?;

    tracing::info!(user_id = %id, "Customer registered");

    Ok(Created(fetch_user(&state.db, id).await?))
}
