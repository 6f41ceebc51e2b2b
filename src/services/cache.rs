//! Redis caching service.
//!
//! Provides a type-safe caching layer with:
//! - Automatic serialization/deserialization via serde
//! - Configurable TTL
//! - Fixed-window rate-limit counters
//!
//! Redis is optional. A disabled cache misses on every read and lets every
//! request through the rate limiter.

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Rate-limit counters outlive their window so late requests still see them
const RATE_LIMIT_KEY_TTL_SECS: i64 = 120;

/// Redis cache client with connection pooling.
#[derive(Clone)]
pub struct RedisCache {
    conn: Option<ConnectionManager>,
    default_ttl: Duration,
}

impl RedisCache {
    /// Create a new Redis cache connection.
    pub async fn new(redis_url: &str, default_ttl_seconds: u64) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        tracing::info!("Redis cache connected");

        Ok(Self {
            conn: Some(conn),
            default_ttl: Duration::from_secs(default_ttl_seconds),
        })
    }

    pub fn disabled(default_ttl_seconds: u64) -> Self {
        Self {
            conn: None,
            default_ttl: Duration::from_secs(default_ttl_seconds),
        }
    }

    /// Get a value from cache.
    #[instrument(skip(self), fields(cache_hit))]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = self.conn.clone()?;

        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(data)) => match serde_json::from_str(&data) {
                Ok(value) => {
                    debug!(key = key, "Cache hit");
                    tracing::Span::current().record("cache_hit", true);
                    Some(value)
                }
                Err(e) => {
                    warn!(key = key, error = %e, "Failed to deserialize cached value");
                    tracing::Span::current().record("cache_hit", false);
                    None
                }
            },
            Ok(None) => {
                debug!(key = key, "Cache miss");
                tracing::Span::current().record("cache_hit", false);
                None
            }
            Err(e) => {
                error!(key = key, error = %e, "Redis get error");
                tracing::Span::current().record("cache_hit", false);
                None
            }
        }
    }

    /// Set a value in cache with default TTL.
    #[instrument(skip(self, value))]
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let Some(mut conn) = self.conn.clone() else {
            return Ok(());
        };

        let data = serde_json::to_string(value).context("Failed to serialize value for cache")?;
        let ttl = self.default_ttl.as_secs();

        conn.set_ex::<_, _, ()>(key, data, ttl)
            .await
            .context("Failed to set cache value")?;

        debug!(key = key, ttl_secs = ttl, "Cached value");
        Ok(())
    }

    /// Delete keys from cache.
    #[instrument(skip(self))]
    pub async fn delete(&self, keys: &[String]) -> Result<usize> {
        let Some(mut conn) = self.conn.clone() else {
            return Ok(0);
        };
        if keys.is_empty() {
            return Ok(0);
        }

        let deleted: i64 = conn.del(keys).await.context("Failed to delete cache keys")?;

        debug!(deleted = deleted, "Cache delete");
        Ok(deleted as usize)
    }

    /// Count a request against a per-minute budget.
    ///
    /// Returns `false` once `limit` requests have been seen in the current
    /// minute. Redis errors let the request through.
    #[instrument(skip(self))]
    pub async fn hit_rate_limit(&self, bucket: &str, limit: u32) -> bool {
        let Some(mut conn) = self.conn.clone() else {
            return true;
        };
        let minute = chrono::Utc::now().timestamp() / 60;
        let key = keys::rate_limit(bucket, minute);

        let result: redis::RedisResult<(i64, bool)> = redis::pipe()
            .atomic()
            .incr(&key, 1)
            .expire(&key, RATE_LIMIT_KEY_TTL_SECS)
            .query_async(&mut conn)
            .await;

        match result {
            Ok((count, _)) => count <= i64::from(limit),
            Err(e) => {
                warn!(key = %key, error = %e, "Rate limit counter unavailable");
                true
            }
        }
    }

    /// `None` when caching is disabled.
    pub async fn health_check(&self) -> Option<Result<()>> {
        let mut conn = self.conn.clone()?;
        let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        Some(pong.map(|_| ()).context("Redis health check failed"))
    }
}

/// Cache key builders for consistent key formats.
pub mod keys {
    pub fn page(slug: &str) -> String {
        format!("page:{}", slug)
    }

    pub fn rate_limit(bucket: &str, unix_minute: i64) -> String {
        format!("ratelimit:{}:{}", bucket, unix_minute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_formats() {
        assert_eq!(keys::page("about-us"), "page:about-us");
        assert_eq!(keys::rate_limit("api:42", 28_000_000), "ratelimit:api:42:28000000");
    }

    #[tokio::test]
    async fn disabled_cache_is_transparent() {
        let cache = RedisCache::disabled(60);
        assert!(cache.conn.is_none());
        assert!(cache.get::<String>("page:x").await.is_none());
        assert!(cache.set("page:x", &"v").await.is_ok());
        assert_eq!(cache.delete(&[keys::page("x")]).await.unwrap(), 0);
        assert!(cache.hit_rate_limit("api:1", 1).await);
        assert!(cache.health_check().await.is_none());
    }
}
