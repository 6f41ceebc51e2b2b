//! Tenant administration routes
//!
//! Creating or retrying a tenant answers 202 and provisions its database in
//! the background; clients poll the tenant until it leaves `provisioning`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use super::admin::log_admin_action;
use crate::api::datatable::{DataTableQuery, Filter, FilterValue};
use crate::api::{DataResponse, DataTableParams, MessageResponse};
use crate::app::AppState;
use crate::auth::RequireAdmin;
use crate::domain::admin::{AdminAction, AuditTargetType};
use crate::domain::tenants::*;
use crate::error::ApiError;
use crate::middleware::ClientIp;
use crate::services::tenants::{new_encrypted_password, TenantTarget};

const TENANT_COLUMNS: &str = "id, name, slug, database_name, database_user, status, last_error, \
    provisioned_at, created_at, updated_at";

async fn find_tenant(state: &AppState, id: Uuid) -> Result<Tenant, ApiError> {
    let sql = format!("SELECT {} FROM tenants WHERE id = $1", TENANT_COLUMNS);
    sqlx::query_as::<_, Tenant>(&sql)
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Tenant not found"))
}

/// Apply a status transition or explain why the tenant cannot make it.
async fn transition(
    state: &AppState,
    id: Uuid,
    from: &[TenantStatus],
    to: TenantStatus,
    action: &str,
) -> Result<TenantTarget, ApiError> {
    if let Some(target) = state.tenants.transition(id, from, to).await? {
        return Ok(target);
    }
    let current = find_tenant(state, id).await?;
    Err(ApiError::conflict(format!(
        "Cannot {} a tenant that is {}",
        action, current.status
    )))
}

async fn find_target(state: &AppState, id: Uuid) -> Result<TenantTarget, ApiError> {
    sqlx::query_as::<_, TenantTarget>(
        "SELECT id, database_name, database_user, database_password FROM tenants WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Tenant not found"))
}

async fn audit(
    state: &AppState,
    admin: &RequireAdmin,
    ip: &ClientIp,
    action: AdminAction,
    id: Uuid,
    details: serde_json::Value,
) -> Result<(), ApiError> {
    log_admin_action(
        &state.db,
        admin.admin_id(),
        action,
        AuditTargetType::Tenant,
        Some(id),
        details,
        ip.to_string_opt(),
    )
    .await?;
    Ok(())
}

/// GET /admin/tenants
pub async fn admin_list_tenants(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    Query(params): Query<DataTableParams>,
    Query(filter): Query<TenantListFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let filters = Filter::collect(vec![(
        "status",
        filter.status.map(|s| FilterValue::Text(s.as_str().to_string())),
    )]);
    let table = DataTableQuery {
        select: TENANT_COLUMNS,
        from: "FROM tenants",
        columns: &["name", "slug", "status", "provisioned_at", "created_at"],
        default_order: 4,
        searchable: &["name", "slug", "database_name"],
    };

    Ok(table.fetch::<Tenant>(&state.db, &params, &filters).await?)
}

/// POST /admin/tenants
pub async fn admin_create_tenant(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Json(req): Json<CreateTenantRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;

    let identifier = tenant_identifier(&state.settings.tenant_database_prefix, &req.slug)?;
    let password = new_encrypted_password(&state.secrets)?;
    let id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO tenants (id, name, slug, database_name, database_user, database_password, status)
        VALUES ($1, $2, $3, $4, $4, $5, 'pending')
        "#,
    )
    .bind(id)
    .bind(req.name.trim())
    .bind(&req.slug)
    .bind(&identifier)
    .bind(password)
    .execute(&state.db)
    .await?;

    let target = transition(
        &state,
        id,
        &[TenantStatus::Pending],
        TenantStatus::Provisioning,
        "provision",
    )
    .await?;
    state.tenants.spawn(target);

    audit(
        &state,
        &admin,
        &ip,
        AdminAction::ProvisionTenant,
        id,
        serde_json::json!({ "slug": req.slug, "database": identifier }),
    )
    .await?;

    tracing::info!(tenant_id = %id, slug = %req.slug, "Tenant provisioning started");

    let tenant = find_tenant(&state, id).await?;
    Ok((StatusCode::ACCEPTED, Json(DataResponse::new(tenant))))
}

/// GET /admin/tenants/:id
pub async fn admin_get_tenant(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(DataResponse::new(find_tenant(&state, id).await?)))
}

/// POST /admin/tenants/:id/retry
pub async fn admin_retry_tenant(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let target = transition(
        &state,
        id,
        &[TenantStatus::Failed],
        TenantStatus::Provisioning,
        "retry",
    )
    .await?;
    state.tenants.spawn(target);

    audit(&state, &admin, &ip, AdminAction::RetryTenant, id, serde_json::json!({})).await?;

    let tenant = find_tenant(&state, id).await?;
    Ok((StatusCode::ACCEPTED, Json(DataResponse::new(tenant))))
}

/// POST /admin/tenants/:id/suspend
pub async fn admin_suspend_tenant(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    transition(
        &state,
        id,
        &[TenantStatus::Active],
        TenantStatus::Suspended,
        "suspend",
    )
    .await?;

    if let Some(pool) = state.tenants.registry().unregister(id) {
        pool.close().await;
    }

    audit(&state, &admin, &ip, AdminAction::SuspendTenant, id, serde_json::json!({})).await?;
    tracing::info!(tenant_id = %id, "Tenant suspended");

    Ok(Json(DataResponse::new(find_tenant(&state, id).await?)))
}

/// POST /admin/tenants/:id/resume
///
/// The pool is built before the status flips, so a tenant never ends up
/// `active` without one.
pub async fn admin_resume_tenant(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let target = find_target(&state, id).await?;
    let pool = state.tenants.lazy_pool(&target)?;

    transition(
        &state,
        id,
        &[TenantStatus::Suspended],
        TenantStatus::Active,
        "resume",
    )
    .await?;
    state.tenants.registry().register(id, pool);

    audit(&state, &admin, &ip, AdminAction::ResumeTenant, id, serde_json::json!({})).await?;
    tracing::info!(tenant_id = %id, "Tenant resumed");

    Ok(Json(DataResponse::new(find_tenant(&state, id).await?)))
}

#[derive(Debug, sqlx::FromRow)]
struct LockedTenant {
    slug: String,
    status: String,
    #[sqlx(flatten)]
    target: TenantTarget,
}

/// DELETE /admin/tenants/:id
///
/// The tenant row stays locked while its database and role are dropped, so a
/// concurrent retry cannot start provisioning underneath the teardown.
pub async fn admin_delete_tenant(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let mut tx = state.db.begin().await?;
    let tenant = sqlx::query_as::<_, LockedTenant>(
        r#"
        SELECT id, slug, status, database_name, database_user, database_password
        FROM tenants
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::not_found("Tenant not found"))?;

    let status = TenantStatus::parse(&tenant.status)
        .ok_or_else(|| ApiError::internal(format!("Unknown tenant status '{}'", tenant.status)))?;
    if !status.is_deletable() {
        return Err(ApiError::conflict(
            "Tenant is being provisioned and cannot be deleted yet",
        ));
    }

    state.tenants.teardown(&tenant.target).await?;

    sqlx::query("DELETE FROM tenants WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    log_admin_action(
        &mut *tx,
        admin.admin_id(),
        AdminAction::Delete,
        AuditTargetType::Tenant,
        Some(id),
        serde_json::json!({ "slug": tenant.slug, "database": tenant.target.database_name }),
        ip.to_string_opt(),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(tenant_id = %id, slug = %tenant.slug, "Tenant deleted");

    Ok(Json(MessageResponse::new("Tenant deleted")))
}
