//! Per-organization strategy: one database per org, URL via the resolver.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::RouterConfig;
use crate::driver::Driver;
use crate::handle::ScopedDb;
use crate::ident::{OrgId, ScopeKey, TenantId};
use crate::resolver::OrgUrlResolver;
use crate::rewrite::ScopeRewriter;
use crate::{Error, Result};

pub struct PerOrgStrategy {
    config: Arc<RouterConfig>,
    driver: Arc<dyn Driver>,
    resolver: Arc<OrgUrlResolver>,
}

impl PerOrgStrategy {
    #[must_use]
    pub fn new(
        config: Arc<RouterConfig>,
        driver: Arc<dyn Driver>,
        resolver: Arc<OrgUrlResolver>,
    ) -> Self {
        Self {
            config,
            driver,
            resolver,
        }
    }

    fn tenant_ops_unavailable() -> Error {
        Error::ApiUsage(
            "tenant administration on per-organization deployments goes through \
             handles scoped with org(<id>).tenant(<id>)"
                .to_owned(),
        )
    }
}

#[async_trait]
impl super::IsolationStrategy for PerOrgStrategy {
    async fn connect(&self, scope: &ScopeKey) -> Result<ScopedDb> {
        let Some(org) = &scope.org else {
            return Err(Error::ApiUsage(
                "organization scoping is enabled; obtain handles via org(<id>)".to_owned(),
            ));
        };
        let resolved = self.resolver.resolve_org(org).await;
        let client = self.driver.client(&resolved.url).await?;
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

    async fn create_tenant(&self, _tenant: &TenantId) -> Result<()> {
        Err(Self::tenant_ops_unavailable())
    }

    async fn delete_tenant(&self, _tenant: &TenantId, _confirm: bool) -> Result<u64> {
        Err(Self::tenant_ops_unavailable())
    }

    async fn tenant_exists(&self, _tenant: &TenantId) -> Result<bool> {
        Err(Self::tenant_ops_unavailable())
    }

    async fn list_tenants(&self) -> Result<Vec<TenantId>> {
        Err(Self::tenant_ops_unavailable())
    }

    async fn create_org(&self, org: &OrgId) -> Result<()> {
        // Creating a database is not this layer's job: an org exists once
        // its URL resolves, which the resolver guarantees via fallbacks.
        let resolved = self.resolver.resolve_org(org).await;
        tracing::info!(
            org = %org,
            url = crate::urls::redact_credentials(&resolved.url),
            source = ?resolved.source,
            "organization prepared"
        );
        Ok(())
    }

    async fn delete_org(&self, org: &OrgId) -> Result<()> {
        let resolved = self.resolver.resolve_org(org).await;
        self.resolver.invalidate(org);
        self.driver.release(&resolved.url).await;
        tracing::info!(org = %org, "organization connection released");
        Ok(())
    }

    async fn list_orgs(&self) -> Result<Vec<OrgId>> {
        Ok(self.resolver.list_orgs().await)
    }
}

impl std::fmt::Debug for PerOrgStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerOrgStrategy").finish_non_exhaustive()
    }
}

// ===================== tests =====================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolverOptions;
    use crate::strategy::IsolationStrategy;
    use crate::testutil::MockDriver;

    fn strategy(driver: Arc<MockDriver>) -> PerOrgStrategy {
        let config = Arc::new(
            RouterConfig::builder()
                .base_url("postgresql://h/{org}")
                .orgs(true)
                .build()
                .unwrap(),
        );
        let resolver = Arc::new(OrgUrlResolver::new(
            ResolverOptions {
                base_url: config.base_url().to_owned(),
                cache_ttl: config.org_cache_ttl(),
                emergency_url_template: config.emergency_url_template().to_owned(),
            },
            None,
        ));
        PerOrgStrategy::new(config, driver, resolver)
    }

    fn org(s: &str) -> OrgId {
        OrgId::parse(s).unwrap()
    }

    #[tokio::test]
    async fn orgs_route_to_distinct_urls() {
        let driver = Arc::new(MockDriver::new());
        let strategy = strategy(driver);

        let acme = strategy
            .connect(&ScopeKey::for_org(org("acme"), None, None))
            .await
            .unwrap();
        let zen = strategy
            .connect(&ScopeKey::for_org(org("zen"), None, None))
            .await
            .unwrap();
        assert_eq!(acme.url(), "postgresql://h/acme");
        assert_eq!(zen.url(), "postgresql://h/zen");
        assert!(!Arc::ptr_eq(acme.client(), zen.client()));
    }

    #[tokio::test]
    async fn orgless_scope_is_rejected() {
        let driver = Arc::new(MockDriver::new());
        let strategy = strategy(driver);
        let err = strategy.connect(&ScopeKey::unscoped()).await.unwrap_err();
        assert!(matches!(err, Error::ApiUsage(_)));
    }

    #[tokio::test]
    async fn delete_org_releases_the_client() {
        let driver = Arc::new(MockDriver::new());
        let strategy = strategy(driver.clone());
        let o = org("acme");
        let _ = strategy
            .connect(&ScopeKey::for_org(o.clone(), None, None))
            .await
            .unwrap();
        let mock = driver.mock("postgresql://h/acme").unwrap();

        strategy.delete_org(&o).await.unwrap();
        assert!(mock.closed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn list_orgs_reflects_resolver_cache() {
        let driver = Arc::new(MockDriver::new());
        let strategy = strategy(driver);
        let _ = strategy
            .connect(&ScopeKey::for_org(org("acme"), None, None))
            .await
            .unwrap();
        let orgs = strategy.list_orgs().await.unwrap();
        assert_eq!(orgs, vec![org("acme")]);
    }
}
