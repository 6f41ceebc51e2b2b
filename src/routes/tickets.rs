//! Support ticket routes
//!
//! Customers open tickets and reply; staff reply, assign and moderate.
//! Attachments are stored with their message and streamed back on download.

use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use std::sync::Arc;
use uuid::Uuid;

use super::admin::log_admin_action;
use crate::api::datatable::{DataTableQuery, Filter, FilterValue};
use crate::api::{Created, DataResponse, DataTableParams, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::{AuthContext, RequireAdmin, RequireCustomer};
use crate::domain::admin::{AdminAction, AuditTargetType};
use crate::domain::tickets::*;
use crate::domain::users::UserRole;
use crate::domain::validation::{sanitize_filename, FieldError};
use crate::error::ApiError;
use crate::middleware::ClientIp;
use crate::services::notifications;

// ============================================================================
// Database Row Types
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
struct TicketRow {
    id: Uuid,
    customer_id: Uuid,
    customer_name: String,
    subject: String,
    status: String,
    priority: String,
    assigned_to: Option<Uuid>,
    assignee_name: Option<String>,
    last_reply_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TicketRow {
    fn status(&self) -> Result<TicketStatus, ApiError> {
        TicketStatus::parse(&self.status)
            .ok_or_else(|| ApiError::internal(format!("Unknown ticket status '{}'", self.status)))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    author_id: Uuid,
    author_name: String,
    author_role: String,
    body: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct AttachmentDownload {
    filename: String,
    content_type: String,
    data: Vec<u8>,
}

const TICKET_SELECT: &str = r#"
    SELECT t.id, t.customer_id, c.name AS customer_name, t.subject, t.status, t.priority,
           t.assigned_to, a.name AS assignee_name, t.last_reply_at, t.created_at, t.updated_at
    FROM support_tickets t
    JOIN users c ON c.id = t.customer_id
    LEFT JOIN users a ON a.id = t.assigned_to
"#;

const LIST_SELECT: &str = "t.id, t.customer_id, c.name AS customer_name, t.subject, t.status, \
    t.priority, t.assigned_to, a.name AS assignee_name, t.last_reply_at, t.created_at";

const LIST_FROM: &str = "FROM support_tickets t \
    JOIN users c ON c.id = t.customer_id \
    LEFT JOIN users a ON a.id = t.assigned_to";

// ============================================================================
// Shared helpers
// ============================================================================

/// Load a ticket, optionally scoped to one customer and locked for update.
async fn find_ticket(
    conn: &mut PgConnection,
    id: Uuid,
    customer_id: Option<Uuid>,
    for_update: bool,
) -> Result<TicketRow, ApiError> {
    let sql = format!(
        "{} WHERE t.id = $1 AND ($2::uuid IS NULL OR t.customer_id = $2){}",
        TICKET_SELECT,
        if for_update { " FOR UPDATE OF t" } else { "" }
    );
    sqlx::query_as::<_, TicketRow>(&sql)
        .bind(id)
        .bind(customer_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ApiError::not_found("Ticket not found"))
}

async fn load_ticket(
    db: &PgPool,
    id: Uuid,
    customer_id: Option<Uuid>,
) -> Result<TicketResponse, ApiError> {
    let mut conn = db.acquire().await?;
    let ticket = find_ticket(&mut conn, id, customer_id, false).await?;

    let messages = sqlx::query_as::<_, MessageRow>(
        r#"
        SELECT m.id, m.author_id, u.name AS author_name, m.author_role, m.body, m.created_at
        FROM ticket_messages m
        JOIN users u ON u.id = m.author_id
        WHERE m.ticket_id = $1
        ORDER BY m.created_at
        "#,
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    let attachments = sqlx::query_as::<_, AttachmentMeta>(
        r#"
        SELECT a.id, a.message_id, a.filename, a.content_type, a.size_bytes, a.created_at
        FROM ticket_attachments a
        JOIN ticket_messages m ON m.id = a.message_id
        WHERE m.ticket_id = $1
        ORDER BY a.created_at
        "#,
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    let messages = messages
        .into_iter()
        .map(|m| TicketMessageResponse {
            attachments: attachments
                .iter()
                .filter(|a| a.message_id == m.id)
                .cloned()
                .collect(),
            author_role: UserRole::parse(&m.author_role).unwrap_or(UserRole::Customer),
            id: m.id,
            author_id: m.author_id,
            author_name: m.author_name,
            body: m.body,
            created_at: m.created_at,
        })
        .collect();

    Ok(TicketResponse {
        status: ticket.status()?,
        priority: TicketPriority::parse(&ticket.priority).unwrap_or_default(),
        id: ticket.id,
        customer_id: ticket.customer_id,
        customer_name: ticket.customer_name,
        subject: ticket.subject,
        assigned_to: ticket.assigned_to,
        assignee_name: ticket.assignee_name,
        messages,
        last_reply_at: ticket.last_reply_at,
        created_at: ticket.created_at,
        updated_at: ticket.updated_at,
    })
}

async fn insert_message(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    author: &AuthContext,
    body: &str,
) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO ticket_messages (id, ticket_id, author_id, author_role, body)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(id)
    .bind(ticket_id)
    .bind(author.user_id)
    .bind(author.role.as_str())
    .bind(body.trim())
    .execute(&mut *conn)
    .await?;
    Ok(id)
}

/// Append a reply and apply the status change it implies.
async fn reply(
    state: &AppState,
    ticket_id: Uuid,
    author: &AuthContext,
    customer_scope: Option<Uuid>,
    req: &ReplyRequest,
) -> Result<(TicketRow, Uuid), ApiError> {
    req.validate()?;

    let mut tx = state.db.begin().await?;
    let ticket = find_ticket(&mut tx, ticket_id, customer_scope, true).await?;
    let next = status_after_reply(ticket.status()?, author.role).map_err(ApiError::conflict)?;

    let message_id = insert_message(&mut tx, ticket_id, author, &req.message).await?;
    sqlx::query(
        r#"
        UPDATE support_tickets
        SET status = $2, last_reply_at = NOW(), updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(ticket_id)
    .bind(next.as_str())
    .execute(&mut *tx)
    .await?;

    if author.role == UserRole::Admin {
        log_admin_action(
            &mut *tx,
            author.user_id,
            AdminAction::ReplyTicket,
            AuditTargetType::Ticket,
            Some(ticket_id),
            serde_json::json!({ "message_id": message_id }),
            None,
        )
        .await?;
    }
    tx.commit().await?;

    Ok((ticket, message_id))
}

async fn change_status(
    state: &AppState,
    ticket_id: Uuid,
    actor: &AuthContext,
    customer_scope: Option<Uuid>,
    action: TicketAction,
    ip: Option<String>,
) -> Result<TicketRow, ApiError> {
    let mut tx = state.db.begin().await?;
    let ticket = find_ticket(&mut tx, ticket_id, customer_scope, true).await?;
    let next = ticket_transition(ticket.status()?, action, actor.role).map_err(ApiError::conflict)?;

    sqlx::query("UPDATE support_tickets SET status = $2, updated_at = NOW() WHERE id = $1")
        .bind(ticket_id)
        .bind(next.as_str())
        .execute(&mut *tx)
        .await?;

    if actor.role == UserRole::Admin {
        let audit = match action {
            TicketAction::Close => AdminAction::CloseTicket,
            TicketAction::Reopen => AdminAction::ReopenTicket,
            TicketAction::Lock => AdminAction::LockTicket,
            TicketAction::Unlock => AdminAction::UnlockTicket,
        };
        log_admin_action(
            &mut *tx,
            actor.user_id,
            audit,
            AuditTargetType::Ticket,
            Some(ticket_id),
            serde_json::json!({ "from": ticket.status, "to": next.as_str() }),
            ip,
        )
        .await?;
    }
    tx.commit().await?;

    tracing::info!(ticket_id = %ticket_id, action = action.as_str(), to = %next, "Ticket status changed");
    Ok(ticket)
}

/// Store the `file` part of an upload on a message the caller wrote.
async fn store_attachment(
    state: &AppState,
    ticket_id: Uuid,
    message_id: Uuid,
    author: &AuthContext,
    customer_scope: Option<Uuid>,
    mut multipart: Multipart,
) -> Result<AttachmentMeta, ApiError> {
    let mut conn = state.db.acquire().await?;
    let ticket = find_ticket(&mut conn, ticket_id, customer_scope, false).await?;
    if ticket.status()? == TicketStatus::Locked {
        return Err(ApiError::conflict("Ticket is locked and does not accept attachments"));
    }

    let message_author: Option<Uuid> = sqlx::query_scalar(
        "SELECT author_id FROM ticket_messages WHERE id = $1 AND ticket_id = $2",
    )
    .bind(message_id)
    .bind(ticket_id)
    .fetch_optional(&mut *conn)
    .await?;
    match message_author {
        None => return Err(ApiError::not_found("Message not found")),
        Some(author_id) if author_id != author.user_id => {
            return Err(ApiError::forbidden("Only the author of a message can attach files to it"))
        }
        Some(_) => {}
    }

    let max_bytes = state.settings.attachment_max_bytes;
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = sanitize_filename(field.file_name().unwrap_or_default());
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {}", e)))?;
        upload = Some((filename, content_type, data));
        break;
    }

    let Some((filename, content_type, data)) = upload else {
        return Err(ApiError::Validation(vec![FieldError {
            field: "file".to_string(),
            message: "is required".to_string(),
        }]));
    };
    if data.is_empty() || data.len() > max_bytes {
        return Err(ApiError::Validation(vec![FieldError {
            field: "file".to_string(),
            message: format!("must be between 1 and {} bytes", max_bytes),
        }]));
    }

    let meta = sqlx::query_as::<_, AttachmentMeta>(
        r#"
        INSERT INTO ticket_attachments (id, message_id, filename, content_type, size_bytes, data)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, message_id, filename, content_type, size_bytes, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(message_id)
    .bind(&filename)
    .bind(&content_type)
    .bind(data.len() as i64)
    .bind(data.as_ref())
    .fetch_one(&mut *conn)
    .await?;

    tracing::info!(
        ticket_id = %ticket_id,
        attachment_id = %meta.id,
        size_bytes = meta.size_bytes,
        "Attachment stored"
    );
    Ok(meta)
}

fn content_disposition(filename: &str) -> HeaderValue {
    let ascii: String = filename
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '_' })
        .filter(|c| *c != '"')
        .collect();
    HeaderValue::from_str(&format!("attachment; filename=\"{}\"", ascii))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

async fn download_attachment(
    db: &PgPool,
    ticket_id: Uuid,
    attachment_id: Uuid,
    customer_scope: Option<Uuid>,
) -> Result<Response, ApiError> {
    let file = sqlx::query_as::<_, AttachmentDownload>(
        r#"
        SELECT a.filename, a.content_type, a.data
        FROM ticket_attachments a
        JOIN ticket_messages m ON m.id = a.message_id
        JOIN support_tickets t ON t.id = m.ticket_id
        WHERE a.id = $1 AND t.id = $2 AND ($3::uuid IS NULL OR t.customer_id = $3)
        "#,
    )
    .bind(attachment_id)
    .bind(ticket_id)
    .bind(customer_scope)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| ApiError::not_found("Attachment not found"))?;

    let content_type = HeaderValue::from_str(&file.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, content_disposition(&file.filename)),
        ],
        Body::from(file.data),
    )
        .into_response())
}

// ============================================================================
// Customer Endpoints
// ============================================================================

/// GET /customer/tickets
pub async fn customer_list_tickets(
    State(state): State<Arc<AppState>>,
    customer: RequireCustomer,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let customer_id = customer.customer_id();

    let total: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM support_tickets WHERE customer_id = $1")
            .bind(customer_id)
            .fetch_one(&state.db)
            .await?;

    let sql = format!(
        "SELECT {} {} WHERE t.customer_id = $1 ORDER BY t.last_reply_at DESC LIMIT $2 OFFSET $3",
        LIST_SELECT, LIST_FROM
    );
    let rows = sqlx::query_as::<_, TicketListItem>(&sql)
        .bind(customer_id)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&state.db)
        .await?;

    Ok(Paginated::new(rows, &pagination, total))
}

/// POST /customer/tickets
pub async fn customer_create_ticket(
    State(state): State<Arc<AppState>>,
    customer: RequireCustomer,
    Json(req): Json<CreateTicketRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;

    let id = Uuid::new_v4();
    let mut tx = state.db.begin().await?;
    sqlx::query(
        r#"
        INSERT INTO support_tickets (id, customer_id, subject, status, priority)
        VALUES ($1, $2, $3, 'open', $4)
        "#,
    )
    .bind(id)
    .bind(customer.customer_id())
    .bind(req.subject.trim())
    .bind(req.priority.as_str())
    .execute(&mut *tx)
    .await?;
    insert_message(&mut tx, id, &customer.0, &req.message).await?;
    tx.commit().await?;

    tracing::info!(ticket_id = %id, customer_id = %customer.customer_id(), "Ticket opened");
    Ok(Created(load_ticket(&state.db, id, Some(customer.customer_id())).await?))
}

/// GET /customer/tickets/:id
pub async fn customer_get_ticket(
    State(state): State<Arc<AppState>>,
    customer: RequireCustomer,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let ticket = load_ticket(&state.db, id, Some(customer.customer_id())).await?;
    Ok(Json(DataResponse::new(ticket)))
}

/// POST /customer/tickets/:id/messages
///
/// Replying to a closed ticket reopens it.
pub async fn customer_reply(
    State(state): State<Arc<AppState>>,
    customer: RequireCustomer,
    Path(id): Path<Uuid>,
    Json(req): Json<ReplyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let scope = Some(customer.customer_id());
    reply(&state, id, &customer.0, scope, &req).await?;
    Ok(Created(load_ticket(&state.db, id, scope).await?))
}

/// POST /customer/tickets/:id/close
pub async fn customer_close_ticket(
    State(state): State<Arc<AppState>>,
    customer: RequireCustomer,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let scope = Some(customer.customer_id());
    change_status(&state, id, &customer.0, scope, TicketAction::Close, None).await?;
    Ok(Json(DataResponse::new(load_ticket(&state.db, id, scope).await?)))
}

/// POST /customer/tickets/:id/messages/:message_id/attachments
pub async fn customer_upload_attachment(
    State(state): State<Arc<AppState>>,
    customer: RequireCustomer,
    Path((id, message_id)): Path<(Uuid, Uuid)>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let scope = Some(customer.customer_id());
    let meta = store_attachment(&state, id, message_id, &customer.0, scope, multipart).await?;
    Ok(Created(meta))
}

/// GET /customer/tickets/:id/attachments/:attachment_id
pub async fn customer_download_attachment(
    State(state): State<Arc<AppState>>,
    customer: RequireCustomer,
    Path((id, attachment_id)): Path<(Uuid, Uuid)>,
) -> Result<Response, ApiError> {
    download_attachment(&state.db, id, attachment_id, Some(customer.customer_id())).await
}

// ============================================================================
// Admin Endpoints
// ============================================================================

/// GET /admin/tickets
pub async fn admin_list_tickets(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    Query(params): Query<DataTableParams>,
    Query(filter): Query<TicketListFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let filters = Filter::collect(vec![
        ("t.status", filter.status.map(|s| FilterValue::Text(s.as_str().to_string()))),
        ("t.assigned_to", filter.assigned_to.map(FilterValue::Uuid)),
    ]);
    let table = DataTableQuery {
        select: LIST_SELECT,
        from: LIST_FROM,
        columns: &[
            "t.subject",
            "c.name",
            "t.status",
            "t.priority",
            "a.name",
            "t.last_reply_at",
            "t.created_at",
        ],
        default_order: 5,
        searchable: &["t.subject", "c.name", "c.email"],
    };

    Ok(table
        .fetch::<TicketListItem>(&state.db, &params, &filters)
        .await?)
}

/// GET /admin/tickets/:id
pub async fn admin_get_ticket(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(DataResponse::new(load_ticket(&state.db, id, None).await?)))
}

/// POST /admin/tickets/:id/messages
///
/// The customer is notified of every staff reply.
pub async fn admin_reply(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Path(id): Path<Uuid>,
    Json(req): Json<ReplyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (ticket, _) = reply(&state, id, &admin.0, None, &req).await?;

    if let Err(e) =
        notifications::notify_ticket_reply(&state.db, ticket.customer_id, id, &ticket.subject).await
    {
        tracing::warn!(ticket_id = %id, error = %e, "Failed to create reply notification");
    }

    Ok(Created(load_ticket(&state.db, id, None).await?))
}

/// POST /admin/tickets/:id/messages/:message_id/attachments
pub async fn admin_upload_attachment(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    Path((id, message_id)): Path<(Uuid, Uuid)>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let meta = store_attachment(&state, id, message_id, &admin.0, None, multipart).await?;
    Ok(Created(meta))
}

/// POST /admin/tickets/:id/assign
///
/// `admin_id: null` clears the assignment.
pub async fn admin_assign_ticket(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(id): Path<Uuid>,
    Json(req): Json<AssignTicketRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(assignee) = req.admin_id {
        let is_active_admin: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM users WHERE id = $1 AND role = 'admin' AND active)",
        )
        .bind(assignee)
        .fetch_one(&state.db)
        .await?;
        if !is_active_admin {
            return Err(ApiError::Validation(vec![FieldError {
                field: "admin_id".to_string(),
                message: "must reference an active admin".to_string(),
            }]));
        }
    }

    let mut tx = state.db.begin().await?;
    let result = sqlx::query(
        "UPDATE support_tickets SET assigned_to = $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(id)
    .bind(req.admin_id)
    .execute(&mut *tx)
    .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Ticket not found"));
    }
    log_admin_action(
        &mut *tx,
        admin.admin_id(),
        AdminAction::AssignTicket,
        AuditTargetType::Ticket,
        Some(id),
        serde_json::json!({ "assigned_to": req.admin_id }),
        ip.to_string_opt(),
    )
    .await?;
    tx.commit().await?;

    Ok(Json(DataResponse::new(load_ticket(&state.db, id, None).await?)))
}

async fn admin_status_action(
    state: &AppState,
    admin: &RequireAdmin,
    ip: &ClientIp,
    id: Uuid,
    action: TicketAction,
) -> Result<Json<DataResponse<TicketResponse>>, ApiError> {
    let ticket = change_status(state, id, &admin.0, None, action, ip.to_string_opt()).await?;

    if action == TicketAction::Close {
        if let Err(e) =
            notifications::notify_ticket_closed(&state.db, ticket.customer_id, id, &ticket.subject).await
        {
            tracing::warn!(ticket_id = %id, error = %e, "Failed to create close notification");
        }
    }

    Ok(Json(DataResponse::new(load_ticket(&state.db, id, None).await?)))
}

/// POST /admin/tickets/:id/close
pub async fn admin_close_ticket(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    admin_status_action(&state, &admin, &ip, id, TicketAction::Close).await
}

/// POST /admin/tickets/:id/reopen
pub async fn admin_reopen_ticket(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    admin_status_action(&state, &admin, &ip, id, TicketAction::Reopen).await
}

/// POST /admin/tickets/:id/lock
pub async fn admin_lock_ticket(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    admin_status_action(&state, &admin, &ip, id, TicketAction::Lock).await
}

/// POST /admin/tickets/:id/unlock
pub async fn admin_unlock_ticket(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    admin_status_action(&state, &admin, &ip, id, TicketAction::Unlock).await
}

/// GET /admin/tickets/:id/attachments/:attachment_id
pub async fn admin_download_attachment(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    Path((id, attachment_id)): Path<(Uuid, Uuid)>,
) -> Result<Response, ApiError> {
    download_attachment(&state.db, id, attachment_id, None).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_header_is_quoted_ascii() {
        let value = content_disposition("report \"final\" ü.pdf");
        assert_eq!(value.to_str().unwrap(), "attachment; filename=\"report final _.pdf\"");
    }
}
