//! Payment gateway routes
//!
//! Admins see settings with secrets masked; customers only see enabled
//! gateways and the fee for a given amount.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use super::admin::log_admin_action;
use crate::api::datatable::DataTableQuery;
use crate::api::{Created, DataResponse, DataTableParams, MessageResponse};
use crate::app::AppState;
use crate::auth::{RequireAdmin, RequireCustomer};
use crate::domain::admin::{AdminAction, AuditTargetType};
use crate::domain::gateways::*;
use crate::error::ApiError;
use crate::middleware::ClientIp;

// ============================================================================
// Database Row Types
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
struct GatewayRow {
    id: Uuid,
    name: String,
    driver: String,
    enabled: bool,
    sort_order: i32,
    fee_percent: Decimal,
    fee_fixed: Decimal,
    settings: sqlx::types::Json<Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl GatewayRow {
    fn driver(&self) -> Result<GatewayDriver, ApiError> {
        GatewayDriver::parse(&self.driver)
            .ok_or_else(|| ApiError::internal(format!("Unknown gateway driver '{}'", self.driver)))
    }

    /// Admin view with secret settings masked
    fn into_masked(self) -> Result<GatewayResponse, ApiError> {
        Ok(GatewayResponse {
            driver: self.driver()?,
            settings: mask_settings(&self.settings.0),
            id: self.id,
            name: self.name,
            enabled: self.enabled,
            sort_order: self.sort_order,
            fee_percent: self.fee_percent,
            fee_fixed: self.fee_fixed,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const GATEWAY_COLUMNS: &str = "id, name, driver, enabled, sort_order, fee_percent, fee_fixed, \
    settings, created_at, updated_at";

async fn find_gateway(state: &AppState, id: Uuid) -> Result<GatewayRow, ApiError> {
    let sql = format!("SELECT {} FROM payment_gateways WHERE id = $1", GATEWAY_COLUMNS);
    sqlx::query_as::<_, GatewayRow>(&sql)
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Payment gateway not found"))
}

// ============================================================================
// Admin Endpoints
// ============================================================================

/// GET /admin/gateways
pub async fn admin_list_gateways(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    Query(params): Query<DataTableParams>,
) -> Result<impl IntoResponse, ApiError> {
    let table = DataTableQuery {
        select: GATEWAY_COLUMNS,
        from: "FROM payment_gateways",
        columns: &["name", "driver", "enabled", "sort_order", "created_at"],
        default_order: 3,
        searchable: &["name", "driver"],
    };
    let page = table.fetch::<GatewayRow>(&state.db, &params, &[]).await?;

    page.try_map(GatewayRow::into_masked)
}

/// POST /admin/gateways
pub async fn admin_create_gateway(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Json(req): Json<CreateGatewayRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    let settings = req.settings.clone().unwrap_or_else(|| Value::Object(Default::default()));

    let mut tx = state.db.begin().await?;
    let sql = format!(
        r#"
        INSERT INTO payment_gateways
            (id, name, driver, enabled, sort_order, fee_percent, fee_fixed, settings)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING {}
        "#,
        GATEWAY_COLUMNS
    );
    let row = sqlx::query_as::<_, GatewayRow>(&sql)
        .bind(Uuid::new_v4())
        .bind(req.name.trim())
        .bind(req.driver.as_str())
        .bind(req.enabled)
        .bind(req.sort_order)
        .bind(req.fee_percent)
        .bind(req.fee_fixed)
        .bind(sqlx::types::Json(&settings))
        .fetch_one(&mut *tx)
        .await?;

    log_admin_action(
        &mut *tx,
        admin.admin_id(),
        AdminAction::Create,
        AuditTargetType::Gateway,
        Some(row.id),
        serde_json::json!({ "name": row.name, "driver": row.driver }),
        ip.to_string_opt(),
    )
    .await?;
    tx.commit().await?;

    Ok(Created(row.into_masked()?))
}

/// GET /admin/gateways/:id
pub async fn admin_get_gateway(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let gateway = find_gateway(&state, id).await?.into_masked()?;
    Ok(Json(DataResponse::new(gateway)))
}

/// PUT /admin/gateways/:id
///
/// Settings values sent back as the mask keep their stored value.
pub async fn admin_update_gateway(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateGatewayRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;

    let mut tx = state.db.begin().await?;
    let stored: sqlx::types::Json<Value> =
        sqlx::query_scalar("SELECT settings FROM payment_gateways WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ApiError::not_found("Payment gateway not found"))?;
    let settings = req
        .settings
        .as_ref()
        .map(|incoming| merge_settings(&stored.0, incoming));

    let sql = format!(
        r#"
        UPDATE payment_gateways SET
            name = COALESCE($2, name),
            driver = COALESCE($3, driver),
            enabled = COALESCE($4, enabled),
            sort_order = COALESCE($5, sort_order),
            fee_percent = COALESCE($6, fee_percent),
            fee_fixed = COALESCE($7, fee_fixed),
            settings = COALESCE($8, settings),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        GATEWAY_COLUMNS
    );
    let row = sqlx::query_as::<_, GatewayRow>(&sql)
        .bind(id)
        .bind(req.name.as_deref().map(str::trim))
        .bind(req.driver.map(|d| d.as_str()))
        .bind(req.enabled)
        .bind(req.sort_order)
        .bind(req.fee_percent)
        .bind(req.fee_fixed)
        .bind(settings.map(sqlx::types::Json))
        .fetch_one(&mut *tx)
        .await?;

    log_admin_action(
        &mut *tx,
        admin.admin_id(),
        AdminAction::Update,
        AuditTargetType::Gateway,
        Some(id),
        serde_json::json!({ "settings_changed": req.settings.is_some() }),
        ip.to_string_opt(),
    )
    .await?;
    tx.commit().await?;

    Ok(Json(DataResponse::new(row.into_masked()?)))
}

/// DELETE /admin/gateways/:id
pub async fn admin_delete_gateway(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let mut tx = state.db.begin().await?;

    let used_by_paid: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM invoices
            WHERE payment_gateway_id = $1 AND status IN ('paid', 'refunded')
        )
        "#,
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;
    if used_by_paid {
        return Err(ApiError::conflict(
            "Payment gateway was used for paid invoices and cannot be deleted",
        ));
    }

    let result = sqlx::query("DELETE FROM payment_gateways WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Payment gateway not found"));
    }

    log_admin_action(
        &mut *tx,
        admin.admin_id(),
        AdminAction::Delete,
        AuditTargetType::Gateway,
        Some(id),
        serde_json::json!({}),
        ip.to_string_opt(),
    )
    .await?;
    tx.commit().await?;

    Ok(Json(MessageResponse::new("Payment gateway deleted")))
}

// ============================================================================
// Customer Endpoints
// ============================================================================

/// GET /customer/gateways
pub async fn customer_list_gateways(
    State(state): State<Arc<AppState>>,
    _customer: RequireCustomer,
    Query(query): Query<GatewayFeeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if matches!(query.amount, Some(amount) if amount < Decimal::ZERO) {
        return Err(ApiError::bad_request("amount must not be negative"));
    }

    let sql = format!(
        "SELECT {} FROM payment_gateways WHERE enabled ORDER BY sort_order, name",
        GATEWAY_COLUMNS
    );
    let rows = sqlx::query_as::<_, GatewayRow>(&sql)
        .fetch_all(&state.db)
        .await?;

    let gateways = rows
        .into_iter()
        .map(|row| {
            Ok(PublicGateway {
                driver: row.driver()?,
                fee: query
                    .amount
                    .map(|amount| gateway_fee(amount, row.fee_percent, row.fee_fixed)),
                id: row.id,
                name: row.name,
                fee_percent: row.fee_percent,
                fee_fixed: row.fee_fixed,
            })
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    Ok(Json(DataResponse::new(gateways)))
}
