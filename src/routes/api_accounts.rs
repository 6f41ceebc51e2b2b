//! API account routes
//!
//! Keys are generated server-side and shown once; only their hash is kept.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use super::admin::log_admin_action;
use super::invoices::ensure_customer;
use crate::api::datatable::DataTableQuery;
use crate::api::{Created, DataResponse, DataTableParams, MessageResponse};
use crate::app::AppState;
use crate::auth::{RequireAdmin, RequireCustomer};
use crate::crypto::{api_key_display_prefix, generate_api_key, hash_api_key};
use crate::domain::admin::{AdminAction, AuditTargetType};
use crate::domain::api_accounts::*;
use crate::error::ApiError;
use crate::middleware::ClientIp;

const ACCOUNT_SELECT: &str = "a.id, a.customer_id, u.email AS customer_email, a.name, a.key_prefix, \
    a.status, a.rate_limit_per_minute, a.allowed_ips, a.last_used_at, a.created_at, a.updated_at";

const ACCOUNT_FROM: &str = "FROM api_accounts a JOIN users u ON u.id = a.customer_id";

async fn find_account(state: &AppState, id: Uuid) -> Result<ApiAccount, ApiError> {
    let sql = format!("SELECT {} {} WHERE a.id = $1", ACCOUNT_SELECT, ACCOUNT_FROM);
    sqlx::query_as::<_, ApiAccount>(&sql)
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("API account not found"))
}

// ============================================================================
// Admin Endpoints
// ============================================================================

/// GET /admin/api/accounts
pub async fn admin_list_accounts(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    Query(params): Query<DataTableParams>,
) -> Result<impl IntoResponse, ApiError> {
    let table = DataTableQuery {
        select: ACCOUNT_SELECT,
        from: ACCOUNT_FROM,
        columns: &["a.name", "u.email", "a.status", "a.last_used_at", "a.created_at"],
        default_order: 4,
        searchable: &["a.name", "u.email", "a.key_prefix"],
    };

    Ok(table.fetch::<ApiAccount>(&state.db, &params, &[]).await?)
}

/// POST /admin/api/accounts
///
/// The response carries the plaintext key; it cannot be retrieved later.
pub async fn admin_create_account(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Json(req): Json<CreateApiAccountRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    ensure_customer(&state.db, req.customer_id).await?;

    let api_key = generate_api_key();
    let id = Uuid::new_v4();

    let mut tx = state.db.begin().await?;
    sqlx::query(
        r#"
        INSERT INTO api_accounts
            (id, customer_id, name, key_prefix, key_hash, status, rate_limit_per_minute, allowed_ips)
        VALUES ($1, $2, $3, $4, $5, 'active', $6, $7)
        "#,
    )
    .bind(id)
    .bind(req.customer_id)
    .bind(req.name.trim())
    .bind(api_key_display_prefix(&api_key))
    .bind(hash_api_key(&api_key))
    .bind(req.rate_limit_per_minute)
    .bind(&req.allowed_ips)
    .execute(&mut *tx)
    .await?;

    log_admin_action(
        &mut *tx,
        admin.admin_id(),
        AdminAction::Create,
        AuditTargetType::ApiAccount,
        Some(id),
        serde_json::json!({ "customer_id": req.customer_id, "name": req.name }),
        ip.to_string_opt(),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(account_id = %id, customer_id = %req.customer_id, "API account created");

    let account = find_account(&state, id).await?;
    Ok(Created(ApiAccountWithKey { account, api_key }))
}

/// GET /admin/api/accounts/:id
pub async fn admin_get_account(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(DataResponse::new(find_account(&state, id).await?)))
}

/// PUT /admin/api/accounts/:id
pub async fn admin_update_account(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateApiAccountRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;

    let mut tx = state.db.begin().await?;
    let result = sqlx::query(
        r#"
        UPDATE api_accounts SET
            name = COALESCE($2, name),
            status = COALESCE($3, status),
            rate_limit_per_minute = COALESCE($4, rate_limit_per_minute),
            allowed_ips = COALESCE($5, allowed_ips),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(req.name.as_deref().map(str::trim))
    .bind(req.status.map(|s| s.as_str()))
    .bind(req.rate_limit_per_minute)
    .bind(&req.allowed_ips)
    .execute(&mut *tx)
    .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("API account not found"));
    }

    log_admin_action(
        &mut *tx,
        admin.admin_id(),
        AdminAction::Update,
        AuditTargetType::ApiAccount,
        Some(id),
        serde_json::json!({
            "status": req.status.map(|s| s.as_str()),
            "rate_limit_per_minute": req.rate_limit_per_minute,
            "allowed_ips": req.allowed_ips,
        }),
        ip.to_string_opt(),
    )
    .await?;
    tx.commit().await?;

    Ok(Json(DataResponse::new(find_account(&state, id).await?)))
}

/// DELETE /admin/api/accounts/:id
pub async fn admin_delete_account(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let mut tx = state.db.begin().await?;
    let result = sqlx::query("DELETE FROM api_accounts WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("API account not found"));
    }

    log_admin_action(
        &mut *tx,
        admin.admin_id(),
        AdminAction::Delete,
        AuditTargetType::ApiAccount,
        Some(id),
        serde_json::json!({}),
        ip.to_string_opt(),
    )
    .await?;
    tx.commit().await?;

    Ok(Json(MessageResponse::new("API account deleted")))
}

/// POST /admin/api/accounts/:id/regenerate
///
/// The old key stops working immediately.
pub async fn admin_regenerate_key(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let api_key = generate_api_key();

    let mut tx = state.db.begin().await?;
    let result = sqlx::query(
        "UPDATE api_accounts SET key_prefix = $2, key_hash = $3, updated_at = NOW() WHERE id = $1",
    )
    .bind(id)
    .bind(api_key_display_prefix(&api_key))
    .bind(hash_api_key(&api_key))
    .execute(&mut *tx)
    .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("API account not found"));
    }

    log_admin_action(
        &mut *tx,
        admin.admin_id(),
        AdminAction::RegenerateKey,
        AuditTargetType::ApiAccount,
        Some(id),
        serde_json::json!({}),
        ip.to_string_opt(),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(account_id = %id, "API key regenerated");

    let account = find_account(&state, id).await?;
    Ok(Json(DataResponse::new(ApiAccountWithKey { account, api_key })))
}

// ============================================================================
// Customer Endpoints
// ============================================================================

/// GET /customer/api/accounts
pub async fn customer_list_accounts(
    State(state): State<Arc<AppState>>,
    customer: RequireCustomer,
) -> Result<impl IntoResponse, ApiError> {
    let sql = format!(
        "SELECT {} {} WHERE a.customer_id = $1 ORDER BY a.created_at DESC",
        ACCOUNT_SELECT, ACCOUNT_FROM
    );
    let accounts = sqlx::query_as::<_, ApiAccount>(&sql)
        .bind(customer.customer_id())
        .fetch_all(&state.db)
        .await?;

    Ok(Json(DataResponse::new(accounts)))
}
