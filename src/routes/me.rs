use axum::{extract::State, response::IntoResponse, Json};
use std::sync::Arc;

use super::users::fetch_user;
use crate::api::{DataResponse, MessageResponse};
use crate::app::AppState;
use crate::auth::password::{hash_password_blocking, verify_password_blocking};
use crate::auth::RequireAuth;
use crate::domain::users::{ChangePasswordRequest, UpdateProfileRequest};
use crate::domain::validation::{length_between, FieldError, ValidationErrors};
use crate::error::ApiError;

/// GET /me
pub async fn get_me(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(DataResponse::new(fetch_user(&state.db, auth.user_id).await?)))
}

/// PUT /me
pub async fn update_me(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut errors = ValidationErrors::default();
    if let Some(name) = &req.name {
        errors.check(length_between(name, 1, 200), "name", "must be 1-200 characters");
    }
    errors.into_result()?;

    sqlx::query(
        r#"
        UPDATE users SET
            name = COALESCE($2, name),
            company = COALESCE($3, company),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(auth.user_id)
    .bind(req.name.as_deref().map(str::trim))
    .bind(&req.company)
    .execute(&state.db)
    .await?;

    Ok(Json(DataResponse::new(fetch_user(&state.db, auth.user_id).await?)))
}

/// PUT /me/password
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    auth: RequireAuth,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;

    let current_hash: String = sqlx::query_scalar("SELECT password_hash FROM users WHERE id = $1")
        .bind(auth.user_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if !verify_password_blocking(req.current_password, current_hash).await? {
        return Err(ApiError::Validation(vec![FieldError {
            field: "current_password".to_string(),
            message: "is incorrect".to_string(),
        }]));
    }

    let new_hash = hash_password_blocking(req.new_password).await?;
    sqlx::query("UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1")
        .bind(auth.user_id)
        .bind(new_hash)
        .execute(&state.db)
        .await?;

    tracing::info!(user_id = %auth.user_id, "Password changed");

    Ok(Json(MessageResponse::new("Password changed")))
}
