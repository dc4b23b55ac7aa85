//! Shared-database strategy: one database, tenants isolated by predicates.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{RouterConfig, TENANT_COLUMN};
use crate::driver::{tenant_registry, Driver, DriverClient};
use crate::handle::ScopedDb;
use crate::ident::{OrgId, ScopeKey, TenantId};
use crate::query::Filter;
use crate::rewrite::ScopeRewriter;
use crate::{Error, Result};

pub struct SharedStrategy {
    config: Arc<RouterConfig>,
    driver: Arc<dyn Driver>,
}

impl SharedStrategy {
    #[must_use]
    pub fn new(config: Arc<RouterConfig>, driver: Arc<dyn Driver>) -> Self {
        Self { config, driver }
    }

    async fn client(&self) -> Result<Arc<dyn DriverClient>> {
        self.driver.client(self.config.base_url()).await
    }

    /// Tables that participate in tenant scoping. Models without the tenant
    /// column never contribute to scans.
    async fn tenant_capable_tables(&self, client: &Arc<dyn DriverClient>) -> Result<Vec<String>> {
        let mut capable = Vec::new();
        for table in client.list_tables().await? {
            if client.has_column(&table, TENANT_COLUMN).await? {
                capable.push(table);
            }
        }
        Ok(capable)
    }

    fn org_ops_unavailable() -> Error {
        Error::ApiUsage(
            "organization scoping is not enabled; set VOILA_DB_ORGS=true to manage organizations"
                .to_owned(),
        )
    }
}

#[async_trait]
impl super::IsolationStrategy for SharedStrategy {
    async fn connect(&self, scope: &ScopeKey) -> Result<ScopedDb> {
        let client = self.client().await?;
        let rewriter = scope
            .tenant
            .clone()
            .map(|tenant| Arc::new(ScopeRewriter::new(tenant, scope.app.clone())));
        Ok(ScopedDb::intercept(
            client,
            rewriter,
            scope.clone(),
            self.config.vectors_enabled(),
        ))
    }

    async fn create_tenant(&self, tenant: &TenantId) -> Result<()> {
        if self.tenant_exists(tenant).await? {
            return Err(Error::Conflict {
                kind: "tenant",
                id: tenant.as_str().to_owned(),
            });
        }
        let client = self.client().await?;
        if let Some(registry) = tenant_registry(&client).await {
            // Best-effort: the registry is advisory, rows are the truth.
            if let Err(err) = registry.create_entry(tenant).await {
                tracing::warn!(tenant = %tenant, error = %err, "registry write failed");
            }
        }
        Ok(())
    }

    async fn delete_tenant(&self, tenant: &TenantId, confirm: bool) -> Result<u64> {
        if !confirm {
            return Err(Error::ApiUsage(format!(
                "deleting tenant '{tenant}' removes every row it owns; \
                 pass confirm = true to proceed"
            )));
        }
        if !self.tenant_exists(tenant).await? {
            return Err(Error::NotFound {
                kind: "tenant",
                id: tenant.as_str().to_owned(),
            });
        }
        let client = self.client().await?;
        let tables = self.tenant_capable_tables(&client).await?;
        let affected = client
            .purge_rows(&tables, &Filter::eq(TENANT_COLUMN, tenant.as_str()))
            .await?;
        if let Some(registry) = tenant_registry(&client).await
            && let Err(err) = registry.delete_entry(tenant).await
        {
            tracing::warn!(tenant = %tenant, error = %err, "registry delete failed");
        }
        tracing::info!(tenant = %tenant, rows = affected, "tenant data deleted");
        Ok(affected)
    }

    async fn tenant_exists(&self, tenant: &TenantId) -> Result<bool> {
        let client = self.client().await?;
        if let Some(registry) = tenant_registry(&client).await {
            return registry.exists(tenant).await;
        }
        for table in self.tenant_capable_tables(&client).await? {
            if client
                .distinct_values(&table, TENANT_COLUMN)
                .await?
                .iter()
                .any(|t| t == tenant.as_str())
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn list_tenants(&self) -> Result<Vec<TenantId>> {
        let client = self.client().await?;
        if let Some(registry) = tenant_registry(&client).await {
            let mut tenants = registry.list().await?;
            tenants.sort();
            return Ok(tenants);
        }
        let mut tenants: Vec<TenantId> = Vec::new();
        for table in self.tenant_capable_tables(&client).await? {
            for raw in client.distinct_values(&table, TENANT_COLUMN).await? {
                if let Ok(tenant) = TenantId::parse(&raw)
                    && !tenants.contains(&tenant)
                {
                    tenants.push(tenant);
                }
            }
        }
        tenants.sort();
        Ok(tenants)
    }

    async fn create_org(&self, _org: &OrgId) -> Result<()> {
        Err(Self::org_ops_unavailable())
    }

    async fn delete_org(&self, _org: &OrgId) -> Result<()> {
        Err(Self::org_ops_unavailable())
    }

    async fn list_orgs(&self) -> Result<Vec<OrgId>> {
        Err(Self::org_ops_unavailable())
    }
}

impl std::fmt::Debug for SharedStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStrategy").finish_non_exhaustive()
    }
}

// ===================== tests =====================
