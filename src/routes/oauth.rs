//! OAuth client management and the token endpoint
//!
//! Only the client-credentials grant is supported. Tokens are bound to the
//! customer owning the client and carry its `client_id`.

use axum::{
    extract::{FromRequest, Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use axum_extra::headers::{authorization::Basic, Authorization, HeaderMapExt};
use std::sync::Arc;
use uuid::Uuid;

use super::admin::log_admin_action;
use crate::api::datatable::DataTableQuery;
use crate::api::{Created, DataResponse, DataTableParams, MessageResponse};
use crate::app::AppState;
use crate::auth::password::{hash_password_blocking, verify_password_blocking};
use crate::auth::{RequireAdmin, RequireCustomer};
use crate::crypto::generate_client_secret;
use crate::domain::admin::{AdminAction, AuditTargetType};
use crate::domain::oauth::*;
use crate::domain::users::UserRole;
use crate::error::ApiError;
use crate::middleware::ClientIp;

const CLIENT_COLUMNS: &str = "id, customer_id, name, redirect_uris, revoked, created_at, updated_at";

// ============================================================================
// Token endpoint
// ============================================================================

/// Error in the token endpoint's own wire format
#[derive(Debug)]
pub struct OauthError {
    status: StatusCode,
    body: OauthErrorBody,
}

impl OauthError {
    fn new(status: StatusCode, error: &'static str, description: impl Into<String>) -> Self {
        Self {
            status,
            body: OauthErrorBody {
                error,
                error_description: description.into(),
            },
        }
    }

    fn invalid_request(description: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", description)
    }

    fn invalid_client() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "invalid_client",
            "Client authentication failed",
        )
    }

    fn server_error(err: impl std::fmt::Display) -> Self {
        tracing::error!(error = %err, "Token endpoint failure");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "server_error",
            "An internal error occurred",
        )
    }
}

impl IntoResponse for OauthError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.body)).into_response();
        if self.status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                header::HeaderValue::from_static("Basic realm=\"oauth\""),
            );
        }
        response
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ClientCredentialRow {
    secret_hash: String,
    revoked: bool,
    customer_id: Uuid,
    email: String,
    active: bool,
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/json"))
        .unwrap_or(false)
}

/// Body fields filled in from HTTP Basic credentials when present.
fn with_basic_credentials(mut req: TokenRequest, headers: &HeaderMap) -> TokenRequest {
    if let Some(Authorization(basic)) = headers.typed_get::<Authorization<Basic>>() {
        req.client_id = Some(basic.username().to_string());
        req.client_secret = Some(basic.password().to_string());
    }
    req
}

/// POST /oauth/token
pub async fn issue_token(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<TokenResponse>, OauthError> {
    let headers = request.headers().clone();
    let body = if is_json(&headers) {
        Json::<TokenRequest>::from_request(request, &state)
            .await
            .map(|Json(body)| body)
            .map_err(|e| OauthError::invalid_request(e.body_text()))?
    } else {
        Form::<TokenRequest>::from_request(request, &state)
            .await
            .map(|Form(body)| body)
            .map_err(|e| OauthError::invalid_request(e.body_text()))?
    };
    let req = with_basic_credentials(body, &headers);

    match req.grant_type.as_deref() {
        Some(GRANT_CLIENT_CREDENTIALS) => {}
        Some(_) => {
            return Err(OauthError::new(
                StatusCode::BAD_REQUEST,
                "unsupported_grant_type",
                "Only the client_credentials grant is supported",
            ))
        }
        None => return Err(OauthError::invalid_request("grant_type is required")),
    }

    let (Some(client_id), Some(client_secret)) = (req.client_id, req.client_secret) else {
        return Err(OauthError::invalid_client());
    };
    let client_id = Uuid::parse_str(&client_id).map_err(|_| OauthError::invalid_client())?;

    let row = sqlx::query_as::<_, ClientCredentialRow>(
        r#"
        SELECT c.secret_hash, c.revoked, c.customer_id, u.email, u.active
        FROM oauth_clients c
        JOIN users u ON u.id = c.customer_id
        WHERE c.id = $1
        "#,
    )
    .bind(client_id)
    .fetch_optional(&state.db)
    .await
    .map_err(OauthError::server_error)?
    .ok_or_else(OauthError::invalid_client)?;

    if row.revoked || !row.active {
        tracing::warn!(client_id = %client_id, "Token requested for revoked or inactive client");
        return Err(OauthError::invalid_client());
    }

    let valid = verify_password_blocking(client_secret, row.secret_hash)
        .await
        .map_err(OauthError::server_error)?;
    if !valid {
        tracing::warn!(client_id = %client_id, "Client secret mismatch");
        return Err(OauthError::invalid_client());
    }

    let issued = state
        .tokens
        .issue(row.customer_id, UserRole::Customer, Some(&row.email), Some(client_id))
        .map_err(OauthError::server_error)?;

    tracing::info!(client_id = %client_id, customer_id = %row.customer_id, "Client token issued");

    Ok(Json(TokenResponse {
        access_token: issued.access_token,
        token_type: issued.token_type,
        expires_in: issued.expires_in,
    }))
}

// ============================================================================
// Customer Endpoints
// ============================================================================

async fn find_own_client(
    state: &AppState,
    id: Uuid,
    customer_id: Uuid,
) -> Result<OauthClient, ApiError> {
    let sql = format!(
        "SELECT {} FROM oauth_clients WHERE id = $1 AND customer_id = $2",
        CLIENT_COLUMNS
    );
    sqlx::query_as::<_, OauthClient>(&sql)
        .bind(id)
        .bind(customer_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("OAuth client not found"))
}

async fn hash_secret(secret: &str) -> Result<String, ApiError> {
    Ok(hash_password_blocking(secret.to_string()).await?)
}

/// GET /customer/oauth/clients
pub async fn customer_list_clients(
    State(state): State<Arc<AppState>>,
    customer: RequireCustomer,
) -> Result<impl IntoResponse, ApiError> {
    let sql = format!(
        "SELECT {} FROM oauth_clients WHERE customer_id = $1 ORDER BY created_at DESC",
        CLIENT_COLUMNS
    );
    let clients = sqlx::query_as::<_, OauthClient>(&sql)
        .bind(customer.customer_id())
        .fetch_all(&state.db)
        .await?;

    Ok(Json(DataResponse::new(clients)))
}

/// POST /customer/oauth/clients
///
/// The plaintext secret is only part of this response.
pub async fn customer_create_client(
    State(state): State<Arc<AppState>>,
    customer: RequireCustomer,
    Json(req): Json<CreateOauthClientRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;

    let client_secret = generate_client_secret();
    let secret_hash = hash_secret(&client_secret).await?;

    let sql = format!(
        r#"
        INSERT INTO oauth_clients (id, customer_id, name, secret_hash, redirect_uris)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {}
        "#,
        CLIENT_COLUMNS
    );
    let client = sqlx::query_as::<_, OauthClient>(&sql)
        .bind(Uuid::new_v4())
        .bind(customer.customer_id())
        .bind(req.name.trim())
        .bind(secret_hash)
        .bind(&req.redirect_uris)
        .fetch_one(&state.db)
        .await?;

    tracing::info!(client_id = %client.id, customer_id = %client.customer_id, "OAuth client created");

    Ok(Created(OauthClientWithSecret {
        client,
        client_secret,
    }))
}

/// PUT /customer/oauth/clients/:id
pub async fn customer_update_client(
    State(state): State<Arc<AppState>>,
    customer: RequireCustomer,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateOauthClientRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    let existing = find_own_client(&state, id, customer.customer_id()).await?;
    if existing.revoked {
        return Err(ApiError::conflict("OAuth client is revoked"));
    }

    let sql = format!(
        r#"
        UPDATE oauth_clients SET
            name = COALESCE($2, name),
            redirect_uris = COALESCE($3, redirect_uris),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        CLIENT_COLUMNS
    );
    let client = sqlx::query_as::<_, OauthClient>(&sql)
        .bind(id)
        .bind(req.name.as_deref().map(str::trim))
        .bind(&req.redirect_uris)
        .fetch_one(&state.db)
        .await?;

    Ok(Json(DataResponse::new(client)))
}

/// POST /customer/oauth/clients/:id/secret
pub async fn customer_regenerate_secret(
    State(state): State<Arc<AppState>>,
    customer: RequireCustomer,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let existing = find_own_client(&state, id, customer.customer_id()).await?;
    if existing.revoked {
        return Err(ApiError::conflict("OAuth client is revoked"));
    }

    let client_secret = generate_client_secret();
    let secret_hash = hash_secret(&client_secret).await?;

    let sql = format!(
        "UPDATE oauth_clients SET secret_hash = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
        CLIENT_COLUMNS
    );
    let client = sqlx::query_as::<_, OauthClient>(&sql)
        .bind(id)
        .bind(secret_hash)
        .fetch_one(&state.db)
        .await?;

    tracing::info!(client_id = %id, "OAuth client secret regenerated");

    Ok(Json(DataResponse::new(OauthClientWithSecret {
        client,
        client_secret,
    })))
}

/// DELETE /customer/oauth/clients/:id
///
/// Revokes rather than deletes; issued tokens stop working on their next use.
pub async fn customer_revoke_client(
    State(state): State<Arc<AppState>>,
    customer: RequireCustomer,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let result = sqlx::query(
        r#"
        UPDATE oauth_clients SET revoked = TRUE, updated_at = NOW()
        WHERE id = $1 AND customer_id = $2
        "#,
    )
    .bind(id)
    .bind(customer.customer_id())
    .execute(&state.db)
    .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("OAuth client not found"));
    }

    Ok(Json(MessageResponse::new("OAuth client revoked")))
}

// ============================================================================
// Admin Endpoints
// ============================================================================

/// GET /admin/oauth/clients
pub async fn admin_list_clients(
    State(state): State<Arc<AppState>>,
    _admin: RequireAdmin,
    Query(params): Query<DataTableParams>,
) -> Result<impl IntoResponse, ApiError> {
    let table = DataTableQuery {
        select: CLIENT_COLUMNS,
        from: "FROM oauth_clients",
        columns: &["name", "revoked", "created_at"],
        default_order: 2,
        searchable: &["name", "id"],
    };

    Ok(table.fetch::<OauthClient>(&state.db, &params, &[]).await?)
}

/// POST /admin/oauth/clients/:id/revoke
pub async fn admin_revoke_client(
    State(state): State<Arc<AppState>>,
    admin: RequireAdmin,
    ip: ClientIp,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let mut tx = state.db.begin().await?;
    let result = sqlx::query(
        "UPDATE oauth_clients SET revoked = TRUE, updated_at = NOW() WHERE id = $1",
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("OAuth client not found"));
    }

    log_admin_action(
        &mut *tx,
        admin.admin_id(),
        AdminAction::RevokeClient,
        AuditTargetType::OauthClient,
        Some(id),
        serde_json::json!({}),
        ip.to_string_opt(),
    )
    .await?;
    tx.commit().await?;

    Ok(Json(MessageResponse::new("OAuth client revoked")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use base64::{engine::general_purpose, Engine as _};

    #[test]
    fn basic_credentials_override_body_fields() {
        let mut headers = HeaderMap::new();
        let encoded = general_purpose::STANDARD.encode("client-a:secret-a");
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {}", encoded)).unwrap(),
        );

        let req = with_basic_credentials(
            TokenRequest {
                grant_type: Some(GRANT_CLIENT_CREDENTIALS.to_string()),
                client_id: Some("body-id".into()),
                client_secret: None,
            },
            &headers,
        );
        assert_eq!(req.client_id.as_deref(), Some("client-a"));
        assert_eq!(req.client_secret.as_deref(), Some("secret-a"));
    }

    #[test]
    fn content_type_selects_json() {
        let mut headers = HeaderMap::new();
        assert!(!is_json(&headers));
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        assert!(is_json(&headers));
    }
}
