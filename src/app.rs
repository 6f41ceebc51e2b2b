use axum::{http::HeaderValue, Router};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::auth::api_client::X_API_KEY;
use crate::auth::TokenSigner;
use crate::config::Settings;
use crate::crypto::SecretBox;
use crate::middleware::request_id_layer;
use crate::routes;
use crate::services::{RedisCache, TenantProvisioner, WebhookDispatcher};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub settings: Settings,
    pub tokens: TokenSigner,
    pub cache: RedisCache,
    pub webhooks: WebhookDispatcher,
    pub secrets: SecretBox,
    pub tenants: TenantProvisioner,
}

impl AppState {
    pub fn new(
        db: PgPool,
        settings: Settings,
        cache: RedisCache,
        webhooks: WebhookDispatcher,
        secrets: SecretBox,
        tenants: TenantProvisioner,
    ) -> Arc<Self> {
        let tokens = TokenSigner::new(
            &settings.jwt_secret,
            settings.jwt_issuer.clone(),
            settings.jwt_audience.clone(),
            settings.jwt_ttl_seconds,
        );
        Arc::new(Self {
            db,
            settings,
            tokens,
            cache,
            webhooks,
            secrets,
            tenants,
        })
    }
}

/// Build the complete application with all middleware
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = build_cors_layer(&state.settings);

    // DEBUG spans keep INFO output to one line per request
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let (set_request_id, propagate_request_id) = request_id_layer();

    Router::new()
        .merge(routes::api_router(&state.settings))
        // Middleware stack (applied bottom-up)
        .layer(propagate_request_id)
        .layer(trace_layer)
        .layer(set_request_id)
        .layer(cors)
        .with_state(state)
}

fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<HeaderValue> = settings
        .cors_allow_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let max_age = if settings.env.is_dev() {
        std::time::Duration::from_secs(86400)
    } else {
        std::time::Duration::from_secs(3600)
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(AllowMethods::list([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::list([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::HeaderName::from_static("x-request-id"),
            axum::http::HeaderName::from_static(X_API_KEY),
        ]))
        .allow_credentials(true)
        .max_age(max_age)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::auth::tokens::IssuedToken;
    use crate::db::create_lazy_pool;
    use crate::domain::users::UserRole;
    use crate::services::TenantRegistry;
    use uuid::Uuid;

    /// State whose pool never connects unless a handler reaches the database.
    pub fn test_state() -> Arc<AppState> {
        let settings = Settings::for_tests();
        let db = create_lazy_pool(&settings.database_url, 1).unwrap();
        let secrets = SecretBox::from_base64_key(&settings.tenant_secret_key).unwrap();
        let tenants = TenantProvisioner::new(
            db.clone(),
            TenantRegistry::default(),
            secrets.clone(),
            settings.database_url.clone(),
        );
        AppState::new(
            db,
            settings,
            RedisCache::disabled(60),
            WebhookDispatcher::disabled(),
            secrets,
            tenants,
        )
    }

    pub fn token(state: &AppState, role: UserRole) -> IssuedToken {
        state
            .tokens
            .issue(Uuid::new_v4(), role, Some("someone@example.com"), None)
            .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::domain::users::UserRole;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    async fn send(request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let app = create_app(test_state());
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn admin_routes_require_a_token() {
        let (status, body) = send(
            Request::get("/admin/invoices")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn customer_token_is_forbidden_on_admin_routes() {
        let state = test_state();
        let token = token(&state, UserRole::Customer);
        let response = create_app(state)
            .oneshot(
                Request::get("/admin/users")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token.access_token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn admin_token_is_forbidden_on_customer_routes() {
        let state = test_state();
        let token = token(&state, UserRole::Admin);
        let response = create_app(state)
            .oneshot(
                Request::get("/customer/invoices")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token.access_token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn garbage_token_is_unauthorized() {
        let (status, _) = send(
            Request::get("/me")
                .header(header::AUTHORIZATION, "Bearer not-a-jwt")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn token_endpoint_rejects_unknown_grants() {
        let (status, body) = send(
            Request::post("/oauth/token")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("grant_type=password&client_id=x&client_secret=y"))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "unsupported_grant_type");
    }

    #[tokio::test]
    async fn token_endpoint_requires_client_credentials() {
        let (status, body) = send(
            Request::post("/oauth/token")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"grant_type":"client_credentials"}"#))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "invalid_client");
    }

    #[tokio::test]
    async fn registration_is_closed_by_default() {
        let (status, _) = send(
            Request::post("/auth/register")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    r#"{"email":"new@example.com","password":"long-enough","name":"New"}"#,
                ))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn machine_api_requires_credentials() {
        let (status, _) = send(
            Request::get("/api/v1/invoices")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn responses_carry_a_request_id() {
        let response = create_app(test_state())
            .oneshot(Request::get("/admin/pages").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.headers().contains_key("x-request-id"));
    }
}
