//! Invoice routes
//!
//! Admin CRUD and lifecycle actions, the customer portal view, and the
//! machine API. Every lifecycle action locks the invoice row and runs in one
//! transaction together with its number allocation and audit entry.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use std::sync::Arc;
use uuid::Uuid;

use super::admin::log_admin_action;
use crate::api::datatable::{DataTableQuery, Filter, FilterValue};
use crate::api::{Created, DataResponse, DataTableParams, MessageResponse, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::{RequireAdmin, RequireApiClient, RequireCustomer};
use crate::domain::admin::{AdminAction, AuditTargetType};
use crate::domain::invoices::*;
use crate::domain::validation::FieldError;
use crate::error::ApiError;
use crate::middleware::ClientIp;
use crate::services::{notifications, WebhookEvent};

// ============================================================================
// Database Row Types
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
struct InvoiceRow {
    id: Uuid,
    number: Option<String>,
    customer_id: Uuid,
    customer_name: String,
    contract_id: Option<Uuid>,
    refund_of: Option<Uuid>,
    status: String,
    currency: String,
    notes: Option<String>,
    issued_at: Option<NaiveDate>,
    due_at: Option<NaiveDate>,
    paid_at: Option<DateTime<Utc>>,
    revoked_at: Option<DateTime<Utc>>,
    payment_gateway_id: Option<Uuid>,
    payment_reference: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct InvoiceItemRow {
    id: Uuid,
    position: i32,
    description: String,
    quantity: Decimal,
    unit_price: Decimal,
    tax_rate: Decimal,
}

/// The columns a lifecycle action needs, read under `FOR UPDATE`
#[derive(Debug, sqlx::FromRow)]
struct LockedInvoice {
    id: Uuid,
    customer_id: Uuid,
    contract_id: Option<Uuid>,
    number: Option<String>,
    status: String,
    currency: String,
}

const INVOICE_SELECT: &str = r#"
    SELECT i.id, i.number, i.customer_id, u.name AS customer_name, i.contract_id, i.refund_of,
           i.status, i.currency, i.notes, i.issued_at, i.due_at, i.paid_at, i.revoked_at,
           i.payment_gateway_id, i.payment_reference, i.created_at, i.updated_at
    FROM invoices i
    JOIN users u ON u.id = i.customer_id
"#;

const LIST_SELECT: &str = "i.id, i.number, i.customer_id, u.name AS customer_name, \
    u.email AS customer_email, i.status, i.currency, i.issued_at, i.due_at, i.paid_at, \
    t.net AS net_total, t.gross AS gross_total, i.created_at";

/// Per-rate tax on summed nets, matching `compute_totals`.
const LIST_FROM: &str = r#"
    FROM invoices i
    JOIN users u ON u.id = i.customer_id
    CROSS JOIN LATERAL (
        SELECT COALESCE(SUM(g.net), 0) AS net,
               COALESCE(SUM(g.net + ROUND(g.net * g.tax_rate / 100, 2)), 0) AS gross
        FROM (
            SELECT it.tax_rate, SUM(ROUND(it.quantity * it.unit_price, 2)) AS net
            FROM invoice_items it
            WHERE it.invoice_id = i.id
            GROUP BY it.tax_rate
        ) g
    ) t
"#;

const LIST_COLUMNS: &[&str] = &[
    "i.number",
    "u.name",
    "i.status",
    "i.issued_at",
    "i.due_at",
    "t.gross",
    "i.created_at",
];

// ============================================================================
// Shared helpers
// ============================================================================

fn parse_status(raw: &str) -> Result<InvoiceStatus, ApiError> {
    InvoiceStatus::parse(raw)
        .ok_or_else(|| ApiError::internal(format!("Unknown invoice status '{}'", raw)))
}

async fn load_invoice(
    conn: &mut PgConnection,
    invoice_id: Uuid,
) -> Result<Option<InvoiceResponse>, ApiError> {
    let sql = format!("{} WHERE i.id = $1", INVOICE_SELECT);
    let Some(row) = sqlx::query_as::<_, InvoiceRow>(&sql)
        .bind(invoice_id)
        .fetch_optional(&mut *conn)
        .await?
    else {
        return Ok(None);
    };

    let items = sqlx::query_as::<_, InvoiceItemRow>(
        r#"
        SELECT id, position, description, quantity, unit_price, tax_rate
        FROM invoice_items
        WHERE invoice_id = $1
        ORDER BY position
        "#,
    )
    .bind(invoice_id)
    .fetch_all(&mut *conn)
    .await?;

    let totals = compute_totals(items.iter().map(|i| (i.quantity, i.unit_price, i.tax_rate)));
    let items = items
        .into_iter()
        .map(|i| InvoiceItemResponse {
            id: i.id,
            position: i.position,
            net: line_net(i.quantity, i.unit_price),
            description: i.description,
            quantity: i.quantity,
            unit_price: i.unit_price,
            tax_rate: i.tax_rate,
        })
        .collect();

    Ok(Some(InvoiceResponse {
        id: row.id,
        number: row.number,
        customer_id: row.customer_id,
        customer_name: row.customer_name,
        contract_id: row.contract_id,
        refund_of: row.refund_of,
        status: parse_status(&row.status)?,
        currency: row.currency,
        notes: row.notes,
        issued_at: row.issued_at,
        due_at: row.due_at,
        paid_at: row.paid_at,
        revoked_at: row.revoked_at,
        payment_gateway_id: row.payment_gateway_id,
        payment_reference: row.payment_reference,
        items,
        totals,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }))
}

pub(crate) async fn fetch_invoice(db: &PgPool, invoice_id: Uuid) -> Result<InvoiceResponse, ApiError> {
    let mut conn = db.acquire().await?;
    load_invoice(&mut conn, invoice_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Invoice not found"))
}

async fn replace_items(
    conn: &mut PgConnection,
    invoice_id: Uuid,
    items: &[InvoiceItemInput],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM invoice_items WHERE invoice_id = $1")
        .bind(invoice_id)
        .execute(&mut *conn)
        .await?;

    if items.is_empty() {
        return Ok(());
    }

    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO invoice_items (id, invoice_id, position, description, quantity, unit_price, tax_rate) ",
    );
    qb.push_values(items.iter().enumerate(), |mut row, (position, item)| {
        row.push_bind(Uuid::new_v4())
            .push_bind(invoice_id)
            .push_bind(position as i32 + 1)
            .push_bind(item.description.trim().to_string())
            .push_bind(item.quantity)
            .push_bind(item.unit_price)
            .push_bind(item.tax_rate);
    });
    qb.build().execute(&mut *conn).await?;
    Ok(())
}

/// Insert a template invoice with its line items.
pub(crate) async fn insert_template(
    conn: &mut PgConnection,
    customer_id: Uuid,
    contract_id: Option<Uuid>,
    currency: &str,
    notes: Option<&str>,
    items: &[InvoiceItemInput],
) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO invoices (id, customer_id, contract_id, status, currency, notes)
        VALUES ($1, $2, $3, 'template', $4, $5)
        "#,
    )
    .bind(id)
    .bind(customer_id)
    .bind(contract_id)
    .bind(currency)
    .bind(notes)
    .execute(&mut *conn)
    .await?;

    replace_items(conn, id, items).await?;
    Ok(id)
}

/// Next number for `year`. The upsert holds the counter row lock until the
/// surrounding transaction ends, so concurrent issues serialise here.
async fn allocate_number(
    conn: &mut PgConnection,
    prefix: &str,
    year: i32,
) -> Result<String, sqlx::Error> {
    let sequence: i32 = sqlx::query_scalar(
        r#"
        INSERT INTO invoice_sequences (year, last_value)
        VALUES ($1, 1)
        ON CONFLICT (year) DO UPDATE SET last_value = invoice_sequences.last_value + 1
        RETURNING last_value
        "#,
    )
    .bind(year)
    .fetch_one(&mut *conn)
    .await?;

    Ok(format_invoice_number(prefix, year, sequence))
}

pub(crate) async fn ensure_customer(db: &PgPool, customer_id: Uuid) -> Result<(), ApiError> {
    let is_customer: Option<bool> =
        sqlx::query_scalar("SELECT role = 'customer' FROM users WHERE id = $1")
            .bind(customer_id)
            .fetch_optional(db)
            .await?;
    if is_customer != Some(true) {
        return Err(ApiError::Validation(vec![FieldError {
            field: "customer_id".to_string(),
            message: "must reference a customer account".to_string(),
        }]));
    }
    Ok(())
}

// ============================================================================
// Admin Endpoints
// ============================================================================

/// GET /admin/invoices
pub async fn admin_list_invoices(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    Query(params): Query<DataTableParams>,
    Query(filter): Query<InvoiceListFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let filters = Filter::collect(vec![
        ("i.status", filter.status.map(|s| FilterValue::Text(s.as_str().to_string()))),
        ("i.customer_id", filter.customer_id.map(FilterValue::Uuid)),
    ]);

    let table = DataTableQuery {
        select: LIST_SELECT,
        from: LIST_FROM,
        columns: LIST_COLUMNS,
        default_order: 6,
        searchable: &["i.number", "u.name", "u.email"],
    };

    Ok(table
        .fetch::<InvoiceListItem>(&state.db, &params, &filters)
        .await?)
}

/// POST /admin/invoices
///
/// Creates a template invoice.
pub async fn admin_create_invoice(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Json(req): Json<CreateInvoiceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    ensure_customer(&state.db, req.customer_id).await?;

    if let Some(contract_id) = req.contract_id {
        let owner: Option<Uuid> = sqlx::query_scalar("SELECT customer_id FROM contracts WHERE id = $1")
            .bind(contract_id)
            .fetch_optional(&state.db)
            .await?;
        if owner != Some(req.customer_id) {
            return Err(ApiError::bad_request("Contract does not belong to this customer"));
        }
    }

    let mut tx = state.db.begin().await?;
    let id = insert_template(
        &mut tx,
        req.customer_id,
        req.contract_id,
        req.currency.as_deref().unwrap_or("EUR"),
        req.notes.as_deref(),
        &req.items,
    )
    .await?;
    log_admin_action(
        &mut *tx,
        admin.admin_id(),
        AdminAction::Create,
        AuditTargetType::Invoice,
        Some(id),
        serde_json::json!({ "customer_id": req.customer_id, "items": req.items.len() }),
        ip.to_string_opt(),
    )
    .await?;
    tx.commit().await?;

    Ok(Created(fetch_invoice(&state.db, id).await?))
}

/// GET /admin/invoices/:id
pub async fn admin_get_invoice(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(DataResponse::new(fetch_invoice(&state.db, id).await?)))
}

async fn lock_invoice(conn: &mut PgConnection, id: Uuid) -> Result<LockedInvoice, ApiError> {
    sqlx::query_as::<_, LockedInvoice>(
        r#"
        SELECT id, customer_id, contract_id, number, status, currency
        FROM invoices
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| ApiError::not_found("Invoice not found"))
}

/// PUT /admin/invoices/:id
///
/// Only templates can be edited. `items`, when given, replaces every line.
pub async fn admin_update_invoice(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateInvoiceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    if let Some(customer_id) = req.customer_id {
        ensure_customer(&state.db, customer_id).await?;
    }

    let mut tx = state.db.begin().await?;
    let current = lock_invoice(&mut tx, id).await?;
    if !parse_status(&current.status)?.is_editable() {
        return Err(ApiError::conflict(format!(
            "Only template invoices can be edited; this one is '{}'",
            current.status
        )));
    }

    sqlx::query(
        r#"
        UPDATE invoices SET
            customer_id = COALESCE($2, customer_id),
            currency = COALESCE($3, currency),
            notes = COALESCE($4, notes),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(req.customer_id)
    .bind(&req.currency)
    .bind(&req.notes)
    .execute(&mut *tx)
    .await?;

    if let Some(items) = &req.items {
        replace_items(&mut tx, id, items).await?;
    }

    log_admin_action(
        &mut *tx,
        admin.admin_id(),
        AdminAction::Update,
        AuditTargetType::Invoice,
        Some(id),
        serde_json::json!({ "items_replaced": req.items.is_some() }),
        ip.to_string_opt(),
    )
    .await?;
    tx.commit().await?;

    Ok(Json(DataResponse::new(fetch_invoice(&state.db, id).await?)))
}

/// DELETE /admin/invoices/:id
pub async fn admin_delete_invoice(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let mut tx = state.db.begin().await?;
    let current = lock_invoice(&mut tx, id).await?;
    if parse_status(&current.status)? != InvoiceStatus::Template {
        return Err(ApiError::conflict("Only template invoices can be deleted"));
    }

    sqlx::query("DELETE FROM invoices WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    log_admin_action(
        &mut *tx,
        admin.admin_id(),
        AdminAction::Delete,
        AuditTargetType::Invoice,
        Some(id),
        serde_json::json!({}),
        ip.to_string_opt(),
    )
    .await?;
    tx.commit().await?;

    Ok(Json(MessageResponse::new("Invoice deleted")))
}

#[derive(Debug, Serialize)]
pub struct TransitionResponse {
    pub invoice: InvoiceResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credit_note: Option<InvoiceResponse>,
}

fn audit_action(action: InvoiceAction) -> AdminAction {
    match action {
        InvoiceAction::Issue => AdminAction::IssueInvoice,
        InvoiceAction::MarkPaid => AdminAction::MarkInvoicePaid,
        InvoiceAction::Refund => AdminAction::RefundInvoice,
        InvoiceAction::Revoke => AdminAction::RevokeInvoice,
        InvoiceAction::Restore => AdminAction::RestoreInvoice,
    }
}

/// Write the credit note for a refunded invoice: same lines, negated quantities.
async fn create_credit_note(
    conn: &mut PgConnection,
    original: &LockedInvoice,
    number: String,
    today: NaiveDate,
) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();
    let notes = original
        .number
        .as_deref()
        .map(|n| format!("Credit note for invoice {}", n));

    sqlx::query(
        r#"
        INSERT INTO invoices (id, number, customer_id, contract_id, refund_of, status, currency,
                              notes, issued_at, due_at)
        VALUES ($1, $2, $3, $4, $5, 'refund', $6, $7, $8, $8)
        "#,
    )
    .bind(id)
    .bind(&number)
    .bind(original.customer_id)
    .bind(original.contract_id)
    .bind(original.id)
    .bind(&original.currency)
    .bind(notes)
    .bind(today)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO invoice_items (id, invoice_id, position, description, quantity, unit_price, tax_rate)
        SELECT gen_random_uuid(), $1, position, description, -quantity, unit_price, tax_rate
        FROM invoice_items
        WHERE invoice_id = $2
        "#,
    )
    .bind(id)
    .bind(original.id)
    .execute(&mut *conn)
    .await?;

    Ok(id)
}

async fn apply_action(
    state: &AppState,
    admin: &RequireAdmin,
    ip: &ClientIp,
    id: Uuid,
    action: InvoiceAction,
    payment: MarkPaidRequest,
) -> Result<TransitionResponse, ApiError> {
    let mut tx = state.db.begin().await?;
    let current = lock_invoice(&mut tx, id).await?;
    let from = parse_status(&current.status)?;
    let to = transition(from, action).map_err(|e| ApiError::conflict(e.to_string()))?;

    let today = Utc::now().date_naive();
    let prefix = &state.settings.invoice_number_prefix;
    let mut number = current.number.clone();
    let mut credit_note_id = None;

    match action {
        InvoiceAction::Issue => {
            let items: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM invoice_items WHERE invoice_id = $1")
                    .bind(id)
                    .fetch_one(&mut *tx)
                    .await?;
            if items == 0 {
                return Err(ApiError::conflict(
                    "An invoice needs at least one line item before it can be issued",
                ));
            }

            let allocated = allocate_number(&mut tx, prefix, today.year()).await?;
            sqlx::query(
                r#"
                UPDATE invoices
                SET status = $2, number = $3, issued_at = $4, due_at = $5, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(to.as_str())
            .bind(&allocated)
            .bind(today)
            .bind(due_date(today, state.settings.invoice_payment_terms_days))
            .execute(&mut *tx)
            .await?;
            number = Some(allocated);
        }
        InvoiceAction::MarkPaid => {
            if let Some(gateway_id) = payment.payment_gateway_id {
                let exists: bool =
                    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM payment_gateways WHERE id = $1)")
                        .bind(gateway_id)
                        .fetch_one(&mut *tx)
                        .await?;
                if !exists {
                    return Err(ApiError::bad_request("Payment gateway not found"));
                }
            }
            sqlx::query(
                r#"
                UPDATE invoices
                SET status = $2, paid_at = COALESCE($3, NOW()), payment_gateway_id = $4,
                    payment_reference = $5, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(to.as_str())
            .bind(payment.paid_at)
            .bind(payment.payment_gateway_id)
            .bind(&payment.payment_reference)
            .execute(&mut *tx)
            .await?;
        }
        InvoiceAction::Refund => {
            sqlx::query("UPDATE invoices SET status = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(to.as_str())
                .execute(&mut *tx)
                .await?;
            let credit_number = allocate_number(&mut tx, prefix, today.year()).await?;
            credit_note_id = Some(create_credit_note(&mut tx, &current, credit_number, today).await?);
        }
        InvoiceAction::Revoke => {
            sqlx::query(
                "UPDATE invoices SET status = $2, revoked_at = NOW(), updated_at = NOW() WHERE id = $1",
            )
            .bind(id)
            .bind(to.as_str())
            .execute(&mut *tx)
            .await?;
        }
        InvoiceAction::Restore => {
            sqlx::query(
                r#"
                UPDATE invoices
                SET status = $2, number = NULL, issued_at = NULL, due_at = NULL,
                    revoked_at = NULL, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(to.as_str())
            .execute(&mut *tx)
            .await?;
            number = None;
        }
    }

    log_admin_action(
        &mut *tx,
        admin.admin_id(),
        audit_action(action),
        AuditTargetType::Invoice,
        Some(id),
        serde_json::json!({
            "from": from.as_str(),
            "to": to.as_str(),
            "number": number,
            "credit_note_id": credit_note_id,
        }),
        ip.to_string_opt(),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(invoice_id = %id, action = %action, from = %from, to = %to, "Invoice transitioned");

    let invoice = fetch_invoice(&state.db, id).await?;
    let credit_note = match credit_note_id {
        Some(note_id) => Some(fetch_invoice(&state.db, note_id).await?),
        None => None,
    };

    if action != InvoiceAction::Restore {
        let label = number.clone().unwrap_or_default();
        if let Err(e) =
            notifications::notify_invoice_event(&state.db, invoice.customer_id, id, &label, action).await
        {
            tracing::warn!(invoice_id = %id, error = %e, "Failed to create invoice notification");
        }
        state.webhooks.dispatch(WebhookEvent::new(
            action.event_name(),
            serde_json::json!({
                "invoice_id": id,
                "number": number,
                "customer_id": invoice.customer_id,
                "status": to.as_str(),
                "gross": invoice.totals.gross,
                "currency": invoice.currency,
                "credit_note_id": credit_note_id,
            }),
        ));
    }

    Ok(TransitionResponse {
        invoice,
        credit_note,
    })
}

/// POST /admin/invoices/:id/issue
pub async fn admin_issue_invoice(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let result = apply_action(&state, &admin, &ip, id, InvoiceAction::Issue, MarkPaidRequest::default()).await?;
    Ok(Json(DataResponse::new(result)))
}

/// POST /admin/invoices/:id/pay
///
/// Body is optional: gateway, reference and payment time.
pub async fn admin_pay_invoice(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(id): Path<Uuid>,
    body: Option<Json<MarkPaidRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let payment = body.map(|Json(b)| b).unwrap_or_default();
    let result = apply_action(&state, &admin, &ip, id, InvoiceAction::MarkPaid, payment).await?;
    Ok(Json(DataResponse::new(result)))
}

/// POST /admin/invoices/:id/refund
pub async fn admin_refund_invoice(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let result = apply_action(&state, &admin, &ip, id, InvoiceAction::Refund, MarkPaidRequest::default()).await?;
    Ok(Json(DataResponse::new(result)))
}

/// POST /admin/invoices/:id/revoke
pub async fn admin_revoke_invoice(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let result = apply_action(&state, &admin, &ip, id, InvoiceAction::Revoke, MarkPaidRequest::default()).await?;
    Ok(Json(DataResponse::new(result)))
}

/// POST /admin/invoices/:id/restore
pub async fn admin_restore_invoice(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let result = apply_action(&state, &admin, &ip, id, InvoiceAction::Restore, MarkPaidRequest::default()).await?;
    Ok(Json(DataResponse::new(result)))
}

// ============================================================================
// Customer-visible invoices (portal and machine API)
// ============================================================================

async fn customer_invoice_page(
    db: &PgPool,
    customer_id: Uuid,
    pagination: &PaginationParams,
    filter: &InvoiceListFilter,
) -> Result<Paginated<InvoiceListItem>, ApiError> {
    let status = filter.status.filter(InvoiceStatus::is_visible_to_customer);
    if filter.status.is_some() && status.is_none() {
        return Ok(Paginated::new(Vec::new(), pagination, 0));
    }

    let push_where = |qb: &mut QueryBuilder<'static, Postgres>| {
        qb.push(" WHERE i.customer_id = ")
            .push_bind(customer_id)
            .push(" AND i.status <> 'template'");
        if let Some(status) = status {
            qb.push(" AND i.status = ").push_bind(status.as_str());
        }
    };

    let mut count = QueryBuilder::new(format!("SELECT COUNT(*) {}", LIST_FROM));
    push_where(&mut count);
    let total: i64 = count.build_query_scalar().fetch_one(db).await?;

    let mut qb = QueryBuilder::new(format!("SELECT {} {}", LIST_SELECT, LIST_FROM));
    push_where(&mut qb);
    qb.push(" ORDER BY i.issued_at DESC NULLS LAST, i.created_at DESC LIMIT ")
        .push_bind(pagination.limit())
        .push(" OFFSET ")
        .push_bind(pagination.offset());
    let rows = qb.build_query_as::<InvoiceListItem>().fetch_all(db).await?;

    Ok(Paginated::new(rows, pagination, total))
}

async fn customer_invoice(
    db: &PgPool,
    customer_id: Uuid,
    id: Uuid,
) -> Result<InvoiceResponse, ApiError> {
    let invoice = fetch_invoice(db, id).await?;
    if invoice.customer_id != customer_id || !invoice.status.is_visible_to_customer() {
        return Err(ApiError::not_found("Invoice not found"));
    }
    Ok(invoice)
}

/// GET /customer/invoices
pub async fn customer_list_invoices(
    State(state): State<Arc<AppState>>,
    customer: RequireCustomer,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<InvoiceListFilter>,
) -> Result<impl IntoResponse, ApiError> {
    customer_invoice_page(&state.db, customer.customer_id(), &pagination, &filter).await
}

/// GET /customer/invoices/:id
pub async fn customer_get_invoice(
    State(state): State<Arc<AppState>>,
    customer: RequireCustomer,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let invoice = customer_invoice(&state.db, customer.customer_id(), id).await?;
    Ok(Json(DataResponse::new(invoice)))
}

/// GET /api/v1/invoices
pub async fn api_list_invoices(
    State(state): State<Arc<AppState>>,
    client: RequireApiClient,
    Query(pagination): Query<PaginationParams>,
    Query(filter): Query<InvoiceListFilter>,
) -> Result<impl IntoResponse, ApiError> {
    customer_invoice_page(&state.db, client.customer_id, &pagination, &filter).await
}

/// GET /api/v1/invoices/:id
pub async fn api_get_invoice(
    State(state): State<Arc<AppState>>,
    client: RequireApiClient,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let invoice = customer_invoice(&state.db, client.customer_id, id).await?;
    Ok(Json(DataResponse::new(invoice)))
}
