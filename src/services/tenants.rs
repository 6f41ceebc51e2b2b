//! Tenant database lifecycle: provisioning, registration and teardown.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use sqlx::{Executor, PgPool};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::crypto::{generate_db_password, SecretBox};
use crate::db::create_lazy_pool;
use crate::domain::tenants::{
    provisioning_steps, teardown_statements, tenant_database_url, TenantStatus,
};

const TENANT_POOL_SIZE: u32 = 5;

/// Connection pools of active tenants, keyed by tenant id.
#[derive(Clone, Default)]
pub struct TenantRegistry {
    pools: Arc<RwLock<HashMap<Uuid, PgPool>>>,
}

impl TenantRegistry {
    pub fn register(&self, tenant_id: Uuid, pool: PgPool) {
        self.pools.write().insert(tenant_id, pool);
    }

    pub fn unregister(&self, tenant_id: Uuid) -> Option<PgPool> {
        self.pools.write().remove(&tenant_id)
    }

    pub fn get(&self, tenant_id: Uuid) -> Option<PgPool> {
        self.pools.read().get(&tenant_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.pools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.read().is_empty()
    }
}

/// Credentials needed to reach or remove one tenant database
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TenantTarget {
    pub id: Uuid,
    pub database_name: String,
    pub database_user: String,
    pub database_password: String,
}

/// Encrypted password for a new tenant row.
pub fn new_encrypted_password(secrets: &SecretBox) -> Result<String> {
    secrets.encrypt(&generate_db_password())
}

#[derive(Clone)]
pub struct TenantProvisioner {
    db: PgPool,
    registry: TenantRegistry,
    secrets: SecretBox,
    base_url: String,
}

impl TenantProvisioner {
    pub fn new(db: PgPool, registry: TenantRegistry, secrets: SecretBox, base_url: String) -> Self {
        Self {
            db,
            registry,
            secrets,
            base_url,
        }
    }

    pub fn registry(&self) -> &TenantRegistry {
        &self.registry
    }

    /// Move a tenant into `to` if it is currently in one of `from`.
    ///
    /// Returns `None` when the tenant does not exist or is in another state,
    /// so concurrent requests cannot both act on it.
    pub async fn transition(
        &self,
        tenant_id: Uuid,
        from: &[TenantStatus],
        to: TenantStatus,
    ) -> Result<Option<TenantTarget>, sqlx::Error> {
        let from: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
        sqlx::query_as::<_, TenantTarget>(
            r#"
            UPDATE tenants
            SET status = $3, last_error = NULL, updated_at = NOW()
            WHERE id = $1 AND status = ANY($2)
            RETURNING id, database_name, database_user, database_password
            "#,
        )
        .bind(tenant_id)
        .bind(&from)
        .bind(to.as_str())
        .fetch_optional(&self.db)
        .await
    }

    /// Run provisioning for a tenant already moved to `provisioning`.
    pub fn spawn(&self, target: TenantTarget) {
        let this = self.clone();
        tokio::spawn(async move {
            let tenant_id = target.id;
            if let Err(e) = this.provision(target).await {
                error!(tenant_id = %tenant_id, error = %e, "Tenant provisioning failed");
                let message = format!("{:#}", e);
                if let Err(db_err) = sqlx::query(
                    "UPDATE tenants SET status = 'failed', last_error = $2, updated_at = NOW() WHERE id = $1",
                )
                .bind(tenant_id)
                .bind(&message)
                .execute(&this.db)
                .await
                {
                    error!(tenant_id = %tenant_id, error = %db_err, "Failed to record provisioning failure");
                }
            }
        });
    }

    #[instrument(skip(self, target), fields(tenant_id = %target.id, database = %target.database_name))]
    async fn provision(&self, target: TenantTarget) -> Result<()> {
        let password = self.secrets.decrypt(&target.database_password)?;
        let steps = provisioning_steps(&target.database_name, &target.database_user, &password);

        let mut undo: Vec<String> = Vec::new();
        for step in &steps {
            if let Err(e) = self.db.execute(step.apply.as_str()).await {
                self.rollback(&undo).await;
                return Err(e).context("provisioning statement failed");
            }
            if let Some(rollback) = &step.rollback {
                undo.push(rollback.clone());
            }
        }

        let pool = match self.connect(&target, &password).await {
            Ok(pool) => pool,
            Err(e) => {
                self.rollback(&undo).await;
                return Err(e);
            }
        };

        self.registry.register(target.id, pool);

        sqlx::query(
            r#"
            UPDATE tenants
            SET status = 'active', provisioned_at = NOW(), last_error = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(target.id)
        .execute(&self.db)
        .await
        .context("failed to mark tenant active")?;

        info!("Tenant provisioned");
        Ok(())
    }

    async fn connect(&self, target: &TenantTarget, password: &str) -> Result<PgPool> {
        let url = tenant_database_url(
            &self.base_url,
            &target.database_name,
            &target.database_user,
            password,
        )?;
        let pool = create_lazy_pool(&url, TENANT_POOL_SIZE)?;
        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .context("tenant database is not reachable")?;
        Ok(pool)
    }

    async fn rollback(&self, undo: &[String]) {
        for statement in undo.iter().rev() {
            if let Err(e) = self.db.execute(statement.as_str()).await {
                warn!(statement = %statement, error = %e, "Rollback statement failed");
            }
        }
    }

    /// Register a lazily-connecting pool for an existing tenant database.
    /// Pool for an existing tenant database; nothing connects until first use.
    pub fn lazy_pool(&self, target: &TenantTarget) -> Result<PgPool> {
        let password = self.secrets.decrypt(&target.database_password)?;
        let url = tenant_database_url(
            &self.base_url,
            &target.database_name,
            &target.database_user,
            &password,
        )?;
        create_lazy_pool(&url, TENANT_POOL_SIZE)
    }

    pub fn register_lazy(&self, target: &TenantTarget) -> Result<()> {
        let pool = self.lazy_pool(target)?;
        self.registry.register(target.id, pool);
        Ok(())
    }

    /// Mark tenants left in `provisioning` by a previous process as failed.
    pub async fn fail_interrupted(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tenants
            SET status = 'failed', last_error = 'provisioning was interrupted', updated_at = NOW()
            WHERE status = 'provisioning'
            "#,
        )
        .execute(&self.db)
        .await
        .context("failed to reset interrupted tenants")?;
        Ok(result.rows_affected())
    }

    /// Register every active tenant. Used at startup.
    pub async fn register_active(&self) -> Result<usize> {
        let tenants = sqlx::query_as::<_, TenantTarget>(
            r#"
            SELECT id, database_name, database_user, database_password
            FROM tenants
            WHERE status = 'active'
            "#,
        )
        .fetch_all(&self.db)
        .await
        .context("failed to load active tenants")?;

        let mut registered = 0;
        for tenant in &tenants {
            match self.register_lazy(tenant) {
                Ok(()) => registered += 1,
                Err(e) => warn!(tenant_id = %tenant.id, error = %e, "Skipping tenant"),
            }
        }
        Ok(registered)
    }

    /// Drop the tenant's database and role and forget its pool.
    #[instrument(skip(self, target), fields(tenant_id = %target.id))]
    pub async fn teardown(&self, target: &TenantTarget) -> Result<()> {
        if let Some(pool) = self.registry.unregister(target.id) {
            pool.close().await;
        }
        for statement in teardown_statements(&target.database_name, &target.database_user) {
            self.db
                .execute(statement.as_str())
                .await
                .with_context(|| format!("teardown failed: {}", statement))?;
        }
        info!("Tenant database dropped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    #[tokio::test]
    async fn registry_tracks_pools() {
        let settings = Settings::for_tests();
        let registry = TenantRegistry::default();
        let id = Uuid::new_v4();
        assert!(registry.is_empty());

        let pool = create_lazy_pool(&settings.database_url, 1).unwrap();
        registry.register(id, pool);
        assert_eq!(registry.len(), 1);
        assert!(registry.clone().get(id).is_some());

        assert!(registry.unregister(id).is_some());
        assert!(registry.get(id).is_none());
    }

    #[tokio::test]
    async fn register_lazy_decrypts_credentials() {
        let settings = Settings::for_tests();
        let secrets = SecretBox::from_base64_key(&settings.tenant_secret_key).unwrap();
        let registry = TenantRegistry::default();
        let provisioner = TenantProvisioner::new(
            create_lazy_pool(&settings.database_url, 1).unwrap(),
            registry.clone(),
            secrets.clone(),
            settings.database_url.clone(),
        );

        let target = TenantTarget {
            id: Uuid::new_v4(),
            database_name: "tenant_acme".into(),
            database_user: "tenant_acme".into(),
            database_password: new_encrypted_password(&secrets).unwrap(),
        };
        provisioner.register_lazy(&target).unwrap();
        assert!(registry.get(target.id).is_some());

        let broken = TenantTarget {
            id: Uuid::new_v4(),
            database_password: "not-encrypted".into(),
            ..target
        };
        assert!(provisioner.lazy_pool(&broken).is_err());
        assert!(provisioner.register_lazy(&broken).is_err());
        assert!(registry.get(broken.id).is_none());
        assert_eq!(registry.len(), 1);
    }
}
