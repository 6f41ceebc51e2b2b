//! Service layer: caching, notifications, webhooks and tenant databases.

pub mod cache;
pub mod notifications;
pub mod tenants;
pub mod webhooks;

pub use cache::RedisCache;
pub use tenants::{TenantProvisioner, TenantRegistry};
pub use webhooks::{WebhookDispatcher, WebhookEvent};
