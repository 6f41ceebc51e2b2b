//! Admin user management
//!
//! Admins and customers share one table; the `role` column decides which
//! portal an account can use.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use super::admin::log_admin_action;
use crate::api::datatable::{DataTableQuery, Filter, FilterValue};
use crate::api::{Created, DataResponse, DataTableParams, MessageResponse};
use crate::app::AppState;
use crate::auth::password::hash_password_blocking;
use crate::auth::RequireAdmin;
use crate::domain::admin::{AdminAction, AuditTargetType};
use crate::domain::users::*;
use crate::error::ApiError;
use crate::middleware::ClientIp;

// ============================================================================
// Database Row Types
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub company: Option<String>,
    pub role: String,
    pub active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for UserResponse {
    type Error = ApiError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = UserRole::parse(&row.role)
            .ok_or_else(|| ApiError::internal(format!("Unknown role '{}'", row.role)))?;
        Ok(UserResponse {
            id: row.id,
            email: row.email,
            name: row.name,
            company: row.company,
            role,
            active: row.active,
            last_login_at: row.last_login_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub(crate) const USER_COLUMNS: &str =
    "id, email, name, company, role, active, last_login_at, created_at, updated_at";

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) async fn fetch_user(db: &PgPool, id: Uuid) -> Result<UserResponse, ApiError> {
    let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
    sqlx::query_as::<_, UserRow>(&sql)
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?
        .try_into()
}

// ============================================================================
// Admin Endpoints
// ============================================================================

/// GET /admin/users
pub async fn admin_list_users(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    Query(params): Query<DataTableParams>,
    Query(filter): Query<UserListFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let filters = Filter::collect(vec![
        ("role", filter.role.map(|r| FilterValue::Text(r.as_str().to_string()))),
        ("active", filter.active.map(FilterValue::Bool)),
    ]);
    let table = DataTableQuery {
        select: USER_COLUMNS,
        from: "FROM users",
        columns: &["name", "email", "company", "role", "active", "last_login_at", "created_at"],
        default_order: 6,
        searchable: &["name", "email", "company"],
    };
    let page = table.fetch::<UserRow>(&state.db, &params, &filters).await?;

    page.try_map(UserResponse::try_from)
}

/// POST /admin/users
pub async fn admin_create_user(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;

    let password_hash = hash_password_blocking(req.password.clone()).await?;
    let id = Uuid::new_v4();
    let email = normalize_email(&req.email);

    let mut tx = state.db.begin().await?;
    sqlx::query(
        r#"
        INSERT INTO users (id, email, password_hash, name, company, role, active)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(id)
    .bind(&email)
    .bind(password_hash)
    .bind(req.name.trim())
    .bind(&req.company)
    .bind(req.role.as_str())
    .bind(req.active)
    .execute(&mut *tx)
    .await?;

    log_admin_action(
        &mut *tx,
        admin.admin_id(),
        AdminAction::Create,
        AuditTargetType::User,
        Some(id),
        serde_json::json!({ "email": email, "role": req.role.as_str() }),
        ip.to_string_opt(),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(user_id = %id, role = %req.role, "User created");

    Ok(Created(fetch_user(&state.db, id).await?))
}

/// GET /admin/users/:id
pub async fn admin_get_user(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(DataResponse::new(fetch_user(&state.db, id).await?)))
}

/// PUT /admin/users/:id
pub async fn admin_update_user(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    req.check_self_update(admin.admin_id(), id)
        .map_err(ApiError::forbidden)?;

    let password_hash = match &req.password {
        Some(password) => Some(hash_password_blocking(password.clone()).await?),
        None => None,
    };

    let mut tx = state.db.begin().await?;
    let result = sqlx::query(
        r#"
        UPDATE users SET
            email = COALESCE($2, email),
            password_hash = COALESCE($3, password_hash),
            name = COALESCE($4, name),
            company = COALESCE($5, company),
            role = COALESCE($6, role),
            active = COALESCE($7, active),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(req.email.as_deref().map(normalize_email))
    .bind(password_hash)
    .bind(req.name.as_deref().map(str::trim))
    .bind(&req.company)
    .bind(req.role.map(|r| r.as_str()))
    .bind(req.active)
    .execute(&mut *tx)
    .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("User not found"));
    }

    log_admin_action(
        &mut *tx,
        admin.admin_id(),
        AdminAction::Update,
        AuditTargetType::User,
        Some(id),
        serde_json::json!({
            "email": req.email,
            "role": req.role.map(|r| r.as_str()),
            "active": req.active,
            "password_changed": req.password.is_some(),
        }),
        ip.to_string_opt(),
    )
    .await?;
    tx.commit().await?;

    Ok(Json(DataResponse::new(fetch_user(&state.db, id).await?)))
}

/// DELETE /admin/users/:id
pub async fn admin_delete_user(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    if id == admin.admin_id() {
        return Err(ApiError::forbidden("You cannot delete your own account"));
    }

    let mut tx = state.db.begin().await?;

    let has_invoices: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM invoices WHERE customer_id = $1)")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
    if has_invoices {
        return Err(ApiError::conflict(
            "Customer has invoices and cannot be deleted; deactivate the account instead",
        ));
    }

    let email: String = sqlx::query_scalar("DELETE FROM users WHERE id = $1 RETURNING email")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    log_admin_action(
        &mut *tx,
        admin.admin_id(),
        AdminAction::Delete,
        AuditTargetType::User,
        Some(id),
        serde_json::json!({ "email": email }),
        ip.to_string_opt(),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(user_id = %id, "User deleted");

    Ok(Json(MessageResponse::new("User deleted")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_are_stored_lowercase() {
        assert_eq!(normalize_email("  Jane.Doe@Example.COM "), "jane.doe@example.com");
    }

    #[test]
    fn unknown_role_is_an_internal_error() {
        let row = UserRow {
            id: Uuid::new_v4(),
            email: "a@example.com".into(),
            name: "A".into(),
            company: None,
            role: "root".into(),
            active: true,
            last_login_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(UserResponse::try_from(row).is_err());
    }
}
