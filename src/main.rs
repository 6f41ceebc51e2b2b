mod api;
mod app;
mod auth;
mod config;
mod crypto;
mod db;
mod domain;
mod error;
mod logging;
mod middleware;
mod routes;
mod services;

use anyhow::{Context, Result};

use crypto::SecretBox;
use services::{RedisCache, TenantProvisioner, TenantRegistry, WebhookDispatcher};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = config::Settings::from_env()?;

    // Initialize logging
    logging::init_logging(&settings.env);

    tracing::info!(
        env = ?settings.env,
        server_addr = %settings.server_addr,
        "Starting billing back-office"
    );

    // Create database pool
    let pool = db::create_pool(&settings).await?;
    if settings.database_run_migrations {
        db::run_migrations(&pool).await?;
    }

    // Redis is optional; without it caching and rate limiting are off
    let cache = match &settings.redis_url {
        Some(url) => RedisCache::new(url, settings.redis_cache_ttl_seconds).await?,
        None => {
            tracing::warn!("REDIS_URL not set; caching and API rate limits are disabled");
            RedisCache::disabled(settings.redis_cache_ttl_seconds)
        }
    };

    let webhooks =
        WebhookDispatcher::new(settings.webhook_url.clone(), settings.webhook_timeout_seconds)?;

    let secrets = SecretBox::from_base64_key(&settings.tenant_secret_key)
        .context("TENANT_SECRET_KEY must be a base64-encoded 32 byte key")?;

    // Reconnect tenant databases from the previous run
    let tenants = TenantProvisioner::new(
        pool.clone(),
        TenantRegistry::default(),
        secrets.clone(),
        settings.database_url.clone(),
    );
    let interrupted = tenants.fail_interrupted().await?;
    if interrupted > 0 {
        tracing::warn!(count = interrupted, "Marked interrupted tenant provisioning as failed");
    }
    let registered = tenants.register_active().await?;
    tracing::info!(count = registered, "Tenant databases registered");

    // Create application state
    let state = app::AppState::new(pool, settings.clone(), cache, webhooks, secrets, tenants);

    // Build application
    let app = app::create_app(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&settings.server_addr).await?;
    tracing::info!("Listening on {}", settings.server_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
