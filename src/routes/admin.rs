//! Admin routes
//!
//! Back-office statistics and the audit log. Also home of
//! [`log_admin_action`], which every admin mutation goes through.

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use rust_decimal::Decimal;
use sqlx::{PgExecutor, Postgres, QueryBuilder};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::{DataResponse, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::RequireAdmin;
use crate::domain::admin::*;
use crate::error::ApiError;

// ============================================================================
// Helper Functions
// ============================================================================

/// Log an admin action to the audit log
///
/// Pass the open transaction when there is one, so the entry commits or rolls
/// back together with the change it describes.
pub(crate) async fn log_admin_action<'e>(
    executor: impl PgExecutor<'e>,
    admin_id: Uuid,
    action: AdminAction,
    target_type: AuditTargetType,
    target_id: Option<Uuid>,
    details: serde_json::Value,
    ip_address: Option<String>,
) -> Result<(), sqlx::Error> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO admin_audit_log (id, admin_id, action, target_type, target_id, details, ip_address)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(id)
    .bind(admin_id)
    .bind(action.to_string())
    .bind(target_type.to_string())
    .bind(target_id)
    .bind(&details)
    .bind(ip_address)
    .execute(executor)
    .await?;

    tracing::info!(
        admin_id = %admin_id,
        action = %action,
        target_type = %target_type,
        target_id = ?target_id,
        "Admin action logged"
    );

    Ok(())
}

fn push_audit_filters(qb: &mut QueryBuilder<'static, Postgres>, filter: &AuditLogQuery) {
    qb.push(" WHERE TRUE");
    if let Some(admin_id) = filter.admin_id {
        qb.push(" AND l.admin_id = ").push_bind(admin_id);
    }
    if let Some(action) = &filter.action {
        qb.push(" AND l.action = ").push_bind(action.clone());
    }
    if let Some(target_type) = &filter.target_type {
        qb.push(" AND l.target_type = ").push_bind(target_type.clone());
    }
}

// ============================================================================
// Endpoints
// ============================================================================

/// GET /admin/audit-log
///
/// Newest entries first, optionally narrowed by admin, action or target type.
pub async fn list_audit_log(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<AuditLogQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM admin_audit_log l");
    push_audit_filters(&mut count, &filter);
    let total: i64 = count.build_query_scalar().fetch_one(&state.db).await?;

    let mut qb = QueryBuilder::new(
        r#"
        SELECT l.id, l.admin_id, u.name AS admin_name, l.action, l.target_type,
               l.target_id, l.details, l.ip_address, l.created_at
        FROM admin_audit_log l
        LEFT JOIN users u ON u.id = l.admin_id
        "#,
    );
    push_audit_filters(&mut qb, &filter);
    qb.push(" ORDER BY l.created_at DESC LIMIT ")
        .push_bind(pagination.limit())
        .push(" OFFSET ")
        .push_bind(pagination.offset());

    let entries = qb
        .build_query_as::<AuditLogEntry>()
        .fetch_all(&state.db)
        .await?;

    Ok(Paginated::new(entries, &pagination, total))
}

/// GET /admin/stats
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
) -> Result<Json<DataResponse<AdminStats>>, ApiError> {
    let (customers, open_tickets, (unpaid_invoices, unpaid_total), active_contracts, active_tenants) = tokio::try_join!(
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE role = 'customer'")
            .fetch_one(&state.db),
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM support_tickets WHERE status = 'open'")
            .fetch_one(&state.db),
        unpaid_summary(&state.db, None),
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM contracts WHERE cancellation_date IS NULL OR cancellation_date >= CURRENT_DATE",
        )
        .fetch_one(&state.db),
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM tenants WHERE status = 'active'")
            .fetch_one(&state.db),
    )?;

    Ok(Json(DataResponse::new(AdminStats {
        customers,
        open_tickets,
        unpaid_invoices,
        unpaid_total,
        active_contracts,
        active_tenants,
    })))
}

/// Count and gross sum of unpaid invoices, for one customer or everyone.
pub(crate) async fn unpaid_summary(
    db: &sqlx::PgPool,
    customer_id: Option<Uuid>,
) -> Result<(i64, Decimal), sqlx::Error> {
    sqlx::query_as::<_, (i64, Decimal)>(
        r#"
        SELECT COUNT(*), COALESCE(SUM(t.gross), 0)
        FROM invoices i
        CROSS JOIN LATERAL (
            SELECT COALESCE(SUM(g.net + ROUND(g.net * g.tax_rate / 100, 2)), 0) AS gross
            FROM (
                SELECT it.tax_rate, SUM(ROUND(it.quantity * it.unit_price, 2)) AS net
                FROM invoice_items it
                WHERE it.invoice_id = i.id
                GROUP BY it.tax_rate
            ) g
        ) t
        WHERE i.status = 'unpaid'
          AND ($1::uuid IS NULL OR i.customer_id = $1)
        "#,
    )
    .bind(customer_id)
    .fetch_one(db)
    .await
}
