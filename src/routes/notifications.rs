//! Notification routes
//!
//! In-app notifications and the customer dashboard summary.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use super::admin::unpaid_summary;
use crate::api::{DataResponse, MessageResponse, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::RequireCustomer;
use crate::domain::admin::CustomerDashboard;
use crate::domain::notifications::*;
use crate::error::ApiError;

// ============================================================================
// Notification Endpoints
// ============================================================================

/// GET /customer/notifications
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    customer: RequireCustomer,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<NotificationQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = customer.customer_id();
    let unread_only = filter.unread_only.unwrap_or(false);

    // Count total
    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM notifications
        WHERE user_id = $1
        AND ($2::bool = false OR read_at IS NULL)
        "#,
    )
    .bind(user_id)
    .bind(unread_only)
    .fetch_one(&state.db)
    .await?;

    let rows = sqlx::query_as::<_, Notification>(
        r#"
        SELECT id, user_id, type, title, message, data, read_at, created_at
        FROM notifications
        WHERE user_id = $1
        AND ($2::bool = false OR read_at IS NULL)
        ORDER BY created_at DESC
        LIMIT $3 OFFSET $4
        "#,
    )
    .bind(user_id)
    .bind(unread_only)
    .bind(pagination.limit())
    .bind(pagination.offset())
    .fetch_all(&state.db)
    .await?;

    Ok(Paginated::new(rows, &pagination, total))
}

/// POST /customer/notifications/:id/read
pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    customer: RequireCustomer,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let notification = sqlx::query_as::<_, Notification>(
        r#"
        UPDATE notifications
        SET read_at = COALESCE(read_at, NOW())
        WHERE id = $1 AND user_id = $2
        RETURNING id, user_id, type, title, message, data, read_at, created_at
        "#,
    )
    .bind(id)
    .bind(customer.customer_id())
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Notification not found"))?;

    Ok(Json(DataResponse::new(notification)))
}

/// POST /customer/notifications/read-all
pub async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    customer: RequireCustomer,
) -> Result<impl IntoResponse, ApiError> {
    let result = sqlx::query(
        "UPDATE notifications SET read_at = NOW() WHERE user_id = $1 AND read_at IS NULL",
    )
    .bind(customer.customer_id())
    .execute(&state.db)
    .await?;

    Ok(Json(MessageResponse::new(format!(
        "{} notifications marked as read",
        result.rows_affected()
    ))))
}

// ============================================================================
// Dashboard
// ============================================================================

/// GET /customer/dashboard
pub async fn customer_dashboard(
    State(state): State<Arc<AppState>>,
    customer: RequireCustomer,
) -> Result<impl IntoResponse, ApiError> {
    let customer_id = customer.customer_id();

    let ((unpaid_invoices, unpaid_total), open_tickets, active_contracts, unread_notifications) =
        tokio::try_join!(
            unpaid_summary(&state.db, Some(customer_id)),
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM support_tickets WHERE customer_id = $1 AND status = 'open'",
            )
            .bind(customer_id)
            .fetch_one(&state.db),
            sqlx::query_scalar::<_, i64>(
                r#"
                SELECT COUNT(*) FROM contracts
                WHERE customer_id = $1
                  AND (cancellation_date IS NULL OR cancellation_date >= CURRENT_DATE)
                "#,
            )
            .bind(customer_id)
            .fetch_one(&state.db),
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND read_at IS NULL",
            )
            .bind(customer_id)
            .fetch_one(&state.db),
        )?;

    Ok(Json(DataResponse::new(CustomerDashboard {
        unpaid_invoices,
        unpaid_total,
        open_tickets,
        active_contracts,
        unread_notifications,
    })))
}
