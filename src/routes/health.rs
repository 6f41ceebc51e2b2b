use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::app::AppState;
use crate::db;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub services: ServiceHealth,
    pub tenants_registered: usize,
}

#[derive(Serialize)]
pub struct ServiceHealth {
    pub database: String,
    pub redis: String,
}

/// Health check endpoint - public
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    // Check all services in parallel
    let (db_result, redis_result) = tokio::join!(
        db::health_check(&state.db),
        state.cache.health_check(),
    );

    let db_status = if db_result { "ok" } else { "error" };
    let redis_status = match &redis_result {
        None => "disabled",
        Some(Ok(())) => "ok",
        Some(Err(_)) => "error",
    };

    // Redis is optional; only the database is critical
    let status = match (db_result, redis_result) {
        (false, _) => "unhealthy",
        (true, Some(Err(_))) => "degraded",
        (true, _) => "healthy",
    };

    // Return 503 if unhealthy (critical service down)
    let status_code = if status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        status_code,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            services: ServiceHealth {
                database: db_status.to_string(),
                redis: redis_status.to_string(),
            },
            tenants_registered: state.tenants.registry().len(),
        }),
    )
}
