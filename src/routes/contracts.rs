//! Contract routes
//!
//! Customers see and cancel their own contracts; admins manage them, bill
//! the next period and can override the cancellation date.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::PgConnection;
use std::sync::Arc;
use uuid::Uuid;

use super::admin::log_admin_action;
use super::invoices::{ensure_customer, fetch_invoice, insert_template};
use crate::api::datatable::{DataTableQuery, Filter, FilterValue};
use crate::api::{
    Created, DataResponse, DataTableParams, MessageResponse, Paginated,
    PaginationParams,
};
use crate::app::AppState;
use crate::auth::{RequireAdmin, RequireCustomer};
use crate::domain::admin::{AdminAction, AuditTargetType};
use crate::domain::contracts::*;
use crate::domain::invoices::InvoiceItemInput;
use crate::domain::validation::FieldError;
use crate::error::ApiError;
use crate::middleware::ClientIp;
use crate::services::notifications;

// ============================================================================
// Database Row Types
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
struct ContractRow {
    id: Uuid,
    customer_id: Uuid,
    customer_name: String,
    product_name: String,
    description: Option<String>,
    price: Decimal,
    billing_period: String,
    start_date: NaiveDate,
    minimum_term_months: i32,
    notice_period_days: i32,
    billed_until: Option<NaiveDate>,
    cancelled_at: Option<DateTime<Utc>>,
    cancellation_date: Option<NaiveDate>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ContractRow {
    fn billing_period(&self) -> Result<BillingPeriod, ApiError> {
        BillingPeriod::parse(&self.billing_period).ok_or_else(|| {
            ApiError::internal(format!("Unknown billing period '{}'", self.billing_period))
        })
    }

    fn terms(&self) -> Result<ContractTerms, ApiError> {
        Ok(ContractTerms {
            start_date: self.start_date,
            billing_period: self.billing_period()?,
            minimum_term_months: self.minimum_term_months.max(0) as u32,
            notice_period_days: self.notice_period_days.max(0) as u32,
        })
    }

    fn into_contract(self, today: NaiveDate) -> Result<ContractResponse, ApiError> {
        Ok(ContractResponse {
            billing_period: self.billing_period()?,
            status: contract_status(self.cancellation_date, today),
            id: self.id,
            customer_id: self.customer_id,
            customer_name: self.customer_name,
            product_name: self.product_name,
            description: self.description,
            price: self.price,
            start_date: self.start_date,
            minimum_term_months: self.minimum_term_months,
            notice_period_days: self.notice_period_days,
            billed_until: self.billed_until,
            cancelled_at: self.cancelled_at,
            cancellation_date: self.cancellation_date,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const CONTRACT_COLUMNS: &str = "c.id, c.customer_id, u.name AS customer_name, c.product_name, \
    c.description, c.price, c.billing_period, c.start_date, c.minimum_term_months, \
    c.notice_period_days, c.billed_until, c.cancelled_at, c.cancellation_date, \
    c.created_at, c.updated_at";

const CONTRACT_FROM: &str = "FROM contracts c JOIN users u ON u.id = c.customer_id";

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

async fn find_contract(
    conn: &mut PgConnection,
    id: Uuid,
    customer_id: Option<Uuid>,
    for_update: bool,
) -> Result<ContractRow, ApiError> {
    let sql = format!(
        "SELECT {} {} WHERE c.id = $1 AND ($2::uuid IS NULL OR c.customer_id = $2){}",
        CONTRACT_COLUMNS,
        CONTRACT_FROM,
        if for_update { " FOR UPDATE OF c" } else { "" }
    );
    sqlx::query_as::<_, ContractRow>(&sql)
        .bind(id)
        .bind(customer_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ApiError::not_found("Contract not found"))
}

async fn fetch_contract(
    state: &AppState,
    id: Uuid,
    customer_id: Option<Uuid>,
) -> Result<ContractResponse, ApiError> {
    let mut conn = state.db.acquire().await?;
    find_contract(&mut conn, id, customer_id, false)
        .await?
        .into_contract(today())
}

/// Store a cancellation date on a locked contract that has none yet.
async fn set_cancellation(
    conn: &mut PgConnection,
    contract: &ContractRow,
    cancellation_date: NaiveDate,
) -> Result<(), ApiError> {
    if contract.cancellation_date.is_some() {
        return Err(ApiError::conflict("Contract is already cancelled"));
    }
    sqlx::query(
        r#"
        UPDATE contracts
        SET cancelled_at = NOW(), cancellation_date = $2, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(contract.id)
    .bind(cancellation_date)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn notify_cancelled(state: &AppState, contract: &ContractRow, date: NaiveDate) {
    if let Err(e) = notifications::notify_contract_cancelled(
        &state.db,
        contract.customer_id,
        contract.id,
        &contract.product_name,
        date,
    )
    .await
    {
        tracing::warn!(contract_id = %contract.id, error = %e, "Failed to create cancellation notification");
    }
}

// ============================================================================
// Customer Endpoints
// ============================================================================

/// GET /customer/contracts
pub async fn customer_list_contracts(
    State(state): State<Arc<AppState>>,
    customer: RequireCustomer,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let customer_id = customer.customer_id();

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM contracts WHERE customer_id = $1")
        .bind(customer_id)
        .fetch_one(&state.db)
        .await?;

    let sql = format!(
        "SELECT {} {} WHERE c.customer_id = $1 ORDER BY c.start_date DESC LIMIT $2 OFFSET $3",
        CONTRACT_COLUMNS, CONTRACT_FROM
    );
    let rows = sqlx::query_as::<_, ContractRow>(&sql)
        .bind(customer_id)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&state.db)
        .await?;

    let today = today();
    let data = rows
        .into_iter()
        .map(|r| r.into_contract(today))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Paginated::new(data, &pagination, total))
}

/// GET /customer/contracts/:id
pub async fn customer_get_contract(
    State(state): State<Arc<AppState>>,
    customer: RequireCustomer,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let contract = fetch_contract(&state, id, Some(customer.customer_id())).await?;
    Ok(Json(DataResponse::new(contract)))
}

/// GET /customer/contracts/:id/cancellation-preview
///
/// The date a cancellation requested today would take effect. Nothing is saved.
pub async fn customer_cancellation_preview(
    State(state): State<Arc<AppState>>,
    customer: RequireCustomer,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let mut conn = state.db.acquire().await?;
    let contract = find_contract(&mut conn, id, Some(customer.customer_id()), false).await?;
    let requested_on = today();

    Ok(Json(DataResponse::new(CancellationPreview {
        contract_id: contract.id,
        requested_on,
        cancellation_date: contract.terms()?.earliest_end_date(requested_on),
    })))
}

/// POST /customer/contracts/:id/cancel
pub async fn customer_cancel_contract(
    State(state): State<Arc<AppState>>,
    customer: RequireCustomer,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let mut tx = state.db.begin().await?;
    let contract = find_contract(&mut tx, id, Some(customer.customer_id()), true).await?;
    let date = contract.terms()?.earliest_end_date(today());
    set_cancellation(&mut tx, &contract, date).await?;
    tx.commit().await?;

    tracing::info!(contract_id = %id, cancellation_date = %date, "Contract cancelled by customer");
    notify_cancelled(&state, &contract, date).await;

    let contract = fetch_contract(&state, id, Some(customer.customer_id())).await?;
    Ok(Json(DataResponse::new(contract)))
}

// ============================================================================
// Admin Endpoints
// ============================================================================

/// GET /admin/contracts
pub async fn admin_list_contracts(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    Query(params): Query<DataTableParams>,
    Query(filter): Query<ContractListFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let filters = Filter::collect(vec![(
        "c.customer_id",
        filter.customer_id.map(FilterValue::Uuid),
    )]);
    let table = DataTableQuery {
        select: CONTRACT_COLUMNS,
        from: CONTRACT_FROM,
        columns: &[
            "c.product_name",
            "u.name",
            "c.price",
            "c.billing_period",
            "c.start_date",
            "c.cancellation_date",
            "c.created_at",
        ],
        default_order: 4,
        searchable: &["c.product_name", "u.name", "u.email"],
    };

    let page = table
        .fetch::<ContractRow>(&state.db, &params, &filters)
        .await?;

    let today = today();
    page.try_map(|r| r.into_contract(today))
}

/// POST /admin/contracts
pub async fn admin_create_contract(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Json(req): Json<CreateContractRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;

    ensure_customer(&state.db, req.customer_id).await?;

    let id = Uuid::new_v4();
    let mut tx = state.db.begin().await?;
    sqlx::query(
        r#"
        INSERT INTO contracts (id, customer_id, product_name, description, price, billing_period,
                               start_date, minimum_term_months, notice_period_days)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(id)
    .bind(req.customer_id)
    .bind(req.product_name.trim())
    .bind(&req.description)
    .bind(req.price)
    .bind(req.billing_period.as_str())
    .bind(req.start_date)
    .bind(req.minimum_term_months as i32)
    .bind(req.notice_period_days as i32)
    .execute(&mut *tx)
    .await?;

    log_admin_action(
        &mut *tx,
        admin.admin_id(),
        AdminAction::Create,
        AuditTargetType::Contract,
        Some(id),
        serde_json::json!({ "customer_id": req.customer_id, "product_name": req.product_name }),
        ip.to_string_opt(),
    )
    .await?;
    tx.commit().await?;

    Ok(Created(fetch_contract(&state, id, None).await?))
}

/// GET /admin/contracts/:id
pub async fn admin_get_contract(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(DataResponse::new(fetch_contract(&state, id, None).await?)))
}

/// PUT /admin/contracts/:id
pub async fn admin_update_contract(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateContractRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;

    let mut tx = state.db.begin().await?;
    find_contract(&mut tx, id, None, true).await?;
    sqlx::query(
        r#"
        UPDATE contracts SET
            product_name = COALESCE($2, product_name),
            description = COALESCE($3, description),
            price = COALESCE($4, price),
            billing_period = COALESCE($5, billing_period),
            minimum_term_months = COALESCE($6, minimum_term_months),
            notice_period_days = COALESCE($7, notice_period_days),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(req.product_name.as_deref().map(str::trim))
    .bind(&req.description)
    .bind(req.price)
    .bind(req.billing_period.map(|p| p.as_str()))
    .bind(req.minimum_term_months.map(|m| m as i32))
    .bind(req.notice_period_days.map(|d| d as i32))
    .execute(&mut *tx)
    .await?;

    log_admin_action(
        &mut *tx,
        admin.admin_id(),
        AdminAction::Update,
        AuditTargetType::Contract,
        Some(id),
        serde_json::json!({}),
        ip.to_string_opt(),
    )
    .await?;
    tx.commit().await?;

    Ok(Json(DataResponse::new(fetch_contract(&state, id, None).await?)))
}

/// DELETE /admin/contracts/:id
///
/// Invoices already created from the contract are kept and lose the link.
pub async fn admin_delete_contract(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let mut tx = state.db.begin().await?;
    let result = sqlx::query("DELETE FROM contracts WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Contract not found"));
    }
    log_admin_action(
        &mut *tx,
        admin.admin_id(),
        AdminAction::Delete,
        AuditTargetType::Contract,
        Some(id),
        serde_json::json!({}),
        ip.to_string_opt(),
    )
    .await?;
    tx.commit().await?;

    Ok(Json(MessageResponse::new("Contract deleted")))
}

/// POST /admin/contracts/:id/cancel
///
/// Uses the given `cancellation_date` when present, otherwise the earliest
/// date the terms allow.
pub async fn admin_cancel_contract(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(id): Path<Uuid>,
    body: Option<Json<AdminCancelRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let req = body.map(|Json(b)| b).unwrap_or_default();

    let mut tx = state.db.begin().await?;
    let contract = find_contract(&mut tx, id, None, true).await?;

    let date = match req.cancellation_date {
        Some(date) if date < contract.start_date => {
            return Err(ApiError::Validation(vec![FieldError {
                field: "cancellation_date".to_string(),
                message: "must not be before the contract start date".to_string(),
            }]));
        }
        Some(date) => date,
        None => contract.terms()?.earliest_end_date(today()),
    };

    set_cancellation(&mut tx, &contract, date).await?;
    log_admin_action(
        &mut *tx,
        admin.admin_id(),
        AdminAction::CancelContract,
        AuditTargetType::Contract,
        Some(id),
        serde_json::json!({
            "cancellation_date": date,
            "explicit": req.cancellation_date.is_some(),
        }),
        ip.to_string_opt(),
    )
    .await?;
    tx.commit().await?;

    notify_cancelled(&state, &contract, date).await;
    Ok(Json(DataResponse::new(fetch_contract(&state, id, None).await?)))
}

/// POST /admin/contracts/:id/uncancel
pub async fn admin_uncancel_contract(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let mut tx = state.db.begin().await?;
    let contract = find_contract(&mut tx, id, None, true).await?;

    match contract_status(contract.cancellation_date, today()) {
        ContractStatus::Active => return Err(ApiError::conflict("Contract is not cancelled")),
        ContractStatus::Ended => {
            return Err(ApiError::conflict("Contract has already ended and cannot be reinstated"))
        }
        ContractStatus::Cancelled => {}
    }

    sqlx::query(
        r#"
        UPDATE contracts
        SET cancelled_at = NULL, cancellation_date = NULL, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;

    log_admin_action(
        &mut *tx,
        admin.admin_id(),
        AdminAction::UncancelContract,
        AuditTargetType::Contract,
        Some(id),
        serde_json::json!({ "previous_cancellation_date": contract.cancellation_date }),
        ip.to_string_opt(),
    )
    .await?;
    tx.commit().await?;

    Ok(Json(DataResponse::new(fetch_contract(&state, id, None).await?)))
}

/// POST /admin/contracts/:id/invoice
///
/// Creates a template invoice for the next unbilled period and advances
/// `billed_until`.
pub async fn admin_bill_contract(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(id): Path<Uuid>,
    body: Option<Json<BillContractRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    if req.tax_rate < Decimal::ZERO || req.tax_rate > Decimal::ONE_HUNDRED {
        return Err(ApiError::Validation(vec![FieldError {
            field: "tax_rate".to_string(),
            message: "must be between 0 and 100".to_string(),
        }]));
    }

    let mut tx = state.db.begin().await?;
    let contract = find_contract(&mut tx, id, None, true).await?;
    let Some((from, to)) = contract
        .terms()?
        .next_billing_period(contract.billed_until, contract.cancellation_date)
    else {
        return Err(ApiError::conflict(match contract.cancellation_date {
            Some(end) => format!("Contract ends on {}; there is no period left to bill", end),
            None => "Contract has no period left to bill".to_string(),
        }));
    };

    let item = InvoiceItemInput {
        description: period_line(&contract.product_name, from, to),
        quantity: Decimal::ONE,
        unit_price: contract.price,
        tax_rate: req.tax_rate,
    };
    let invoice_id = insert_template(
        &mut tx,
        contract.customer_id,
        Some(contract.id),
        "EUR",
        None,
        std::slice::from_ref(&item),
    )
    .await?;

    sqlx::query("UPDATE contracts SET billed_until = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(to)
        .execute(&mut *tx)
        .await?;

    log_admin_action(
        &mut *tx,
        admin.admin_id(),
        AdminAction::BillContract,
        AuditTargetType::Contract,
        Some(id),
        serde_json::json!({ "invoice_id": invoice_id, "from": from, "to": to }),
        ip.to_string_opt(),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(contract_id = %id, invoice_id = %invoice_id, %from, %to, "Contract period billed");
    Ok(Created(fetch_invoice(&state.db, invoice_id).await?))
}
