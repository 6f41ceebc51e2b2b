//! CMS page routes
//!
//! Published pages are served publicly and cached in Redis by slug.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use super::admin::log_admin_action;
use crate::api::datatable::DataTableQuery;
use crate::api::{Created, DataResponse, DataTableParams, MessageResponse};
use crate::app::AppState;
use crate::auth::RequireAdmin;
use crate::domain::admin::{AdminAction, AuditTargetType};
use crate::domain::pages::*;
use crate::error::ApiError;
use crate::middleware::ClientIp;
use crate::services::cache::keys;

const PAGE_COLUMNS: &str =
    "id, slug, title, content, meta_description, published, created_at, updated_at";

async fn invalidate(state: &AppState, slugs: &[&str]) {
    let keys: Vec<String> = slugs.iter().map(|slug| keys::page(slug)).collect();
    if let Err(e) = state.cache.delete(&keys).await {
        tracing::warn!(error = %e, "Failed to invalidate page cache");
    }
}

async fn find_page(state: &AppState, id: Uuid) -> Result<Page, ApiError> {
    let sql = format!("SELECT {} FROM pages WHERE id = $1", PAGE_COLUMNS);
    sqlx::query_as::<_, Page>(&sql)
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Page not found"))
}

// ============================================================================
// Public Endpoints
// ============================================================================

/// GET /pages/:slug
pub async fn get_public_page(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let cache_key = keys::page(&slug);
    if let Some(page) = state.cache.get::<PublicPage>(&cache_key).await {
        return Ok(Json(DataResponse::new(page)));
    }

    let sql = format!(
        "SELECT {} FROM pages WHERE slug = $1 AND published",
        PAGE_COLUMNS
    );
    let page: PublicPage = sqlx::query_as::<_, Page>(&sql)
        .bind(&slug)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Page not found"))?
        .into();

    if let Err(e) = state.cache.set(&cache_key, &page).await {
        tracing::warn!(slug = %slug, error = %e, "Failed to cache page");
    }

    Ok(Json(DataResponse::new(page)))
}

// ============================================================================
// Admin Endpoints
// ============================================================================

/// GET /admin/pages
pub async fn admin_list_pages(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    Query(params): Query<DataTableParams>,
) -> Result<impl IntoResponse, ApiError> {
    let table = DataTableQuery {
        select: PAGE_COLUMNS,
        from: "FROM pages",
        columns: &["title", "slug", "published", "updated_at"],
        default_order: 3,
        searchable: &["title", "slug"],
    };

    Ok(table.fetch::<Page>(&state.db, &params, &[]).await?)
}

/// POST /admin/pages
pub async fn admin_create_page(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Json(req): Json<CreatePageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;

    let mut tx = state.db.begin().await?;
    let sql = format!(
        r#"
        INSERT INTO pages (id, slug, title, content, meta_description, published)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {}
        "#,
        PAGE_COLUMNS
    );
    let page = sqlx::query_as::<_, Page>(&sql)
        .bind(Uuid::new_v4())
        .bind(&req.slug)
        .bind(req.title.trim())
        .bind(&req.content)
        .bind(&req.meta_description)
        .bind(req.published)
        .fetch_one(&mut *tx)
        .await?;

    log_admin_action(
        &mut *tx,
        admin.admin_id(),
        AdminAction::Create,
        AuditTargetType::Page,
        Some(page.id),
        serde_json::json!({ "slug": page.slug }),
        ip.to_string_opt(),
    )
    .await?;
    tx.commit().await?;

    invalidate(&state, &[&page.slug]).await;

    Ok(Created(page))
}

/// GET /admin/pages/:id
pub async fn admin_get_page(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(DataResponse::new(find_page(&state, id).await?)))
}

/// PUT /admin/pages/:id
pub async fn admin_update_page(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdatePageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    let previous = find_page(&state, id).await?;

    let mut tx = state.db.begin().await?;
    let sql = format!(
        r#"
        UPDATE pages SET
            slug = COALESCE($2, slug),
            title = COALESCE($3, title),
            content = COALESCE($4, content),
            meta_description = COALESCE($5, meta_description),
            published = COALESCE($6, published),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        PAGE_COLUMNS
    );
    let page = sqlx::query_as::<_, Page>(&sql)
        .bind(id)
        .bind(&req.slug)
        .bind(req.title.as_deref().map(str::trim))
        .bind(&req.content)
        .bind(&req.meta_description)
        .bind(req.published)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::not_found("Page not found"))?;

    log_admin_action(
        &mut *tx,
        admin.admin_id(),
        AdminAction::Update,
        AuditTargetType::Page,
        Some(id),
        serde_json::json!({ "slug": page.slug, "previous_slug": previous.slug }),
        ip.to_string_opt(),
    )
    .await?;
    tx.commit().await?;

    invalidate(&state, &[&previous.slug, &page.slug]).await;

    Ok(Json(DataResponse::new(page)))
}

/// DELETE /admin/pages/:id
pub async fn admin_delete_page(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let mut tx = state.db.begin().await?;
    let slug: String = sqlx::query_scalar("DELETE FROM pages WHERE id = $1 RETURNING slug")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::not_found("Page not found"))?;

    log_admin_action(
        &mut *tx,
        admin.admin_id(),
        AdminAction::Delete,
        AuditTargetType::Page,
        Some(id),
        serde_json::json!({ "slug": slug }),
        ip.to_string_opt(),
    )
    .await?;
    tx.commit().await?;

    invalidate(&state, &[&slug]).await;

    Ok(Json(MessageResponse::new("Page deleted")))
}
