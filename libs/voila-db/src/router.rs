//! The router facade.
//!
//! Three entry points — [`DbRouter::get`], [`DbRouter::tenant`] and
//! [`DbRouter::org`] — validate identifiers, enforce the configuration's
//! legality matrix, and resolve scoped handles through the connection cache.
//! Repeated calls with the same arguments return handles backed by the same
//! client.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::cache::ConnectionCache;
use crate::config::RouterConfig;
use crate::driver::{driver_for, Driver};
use crate::handle::ScopedDb;
use crate::ident::{AppId, OrgId, ScopeKey, TenantId};
use crate::resolver::{OrgUrlHook, OrgUrlResolver, ResolverMetricsSnapshot, ResolverOptions};
use crate::strategy::{self, IsolationStrategy};
use crate::{Error, Result};

/// Multi-tenant, multi-organization database router.
///
/// Construction is instance-based and fully testable; [`DbRouter::global`]
/// offers an optional process-wide instance for applications that want
/// handle stability without threading a router around.
pub struct DbRouter {
    config: Arc<RouterConfig>,
    driver: Arc<dyn Driver>,
    resolver: Arc<OrgUrlResolver>,
    strategy: Arc<dyn IsolationStrategy>,
    cache: ConnectionCache,
}

impl DbRouter {
    /// Build a router from explicit configuration with the default driver
    /// for the configured backend.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] when the backend's feature is off.
    pub fn new(config: RouterConfig) -> Result<Self> {
        RouterBuilder::new().config(config).build()
    }

    /// Build a router from the process environment.
    ///
    /// # Errors
    /// As [`RouterConfig::from_env`] plus driver construction errors.
    pub fn from_env() -> Result<Self> {
        RouterBuilder::new().build()
    }

    /// Process-wide router, built from the environment on first use.
    ///
    /// # Errors
    /// As [`DbRouter::from_env`].
    pub fn global() -> Result<&'static DbRouter> {
        static GLOBAL: OnceLock<DbRouter> = OnceLock::new();
        if let Some(router) = GLOBAL.get() {
            return Ok(router);
        }
        let router = DbRouter::from_env()?;
        Ok(GLOBAL.get_or_init(|| router))
    }

    #[must_use]
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Handle scoped to the ambient configuration.
    ///
    /// # Errors
    /// [`Error::ApiUsage`] whenever the flags require a narrower scope; the
    /// message names the correct call form.
    pub async fn get(&self) -> Result<ScopedDb> {
        match (self.config.tenants_enabled(), self.config.orgs_enabled()) {
            (true, true) => Err(Error::ApiUsage(
                "both organization and tenant scoping are enabled; \
                 scope handles with org(<id>).tenant(<id>)"
                    .to_owned(),
            )),
            (true, false) => Err(Error::ApiUsage(
                "row-level tenant scoping is enabled; obtain handles with tenant(<id>)".to_owned(),
            )),
            (false, true) => Err(Error::ApiUsage(
                "organization scoping is enabled; obtain handles with org(<id>).get()".to_owned(),
            )),
            (false, false) => self.connect(ScopeKey::unscoped()).await,
        }
    }

    /// Handle scoped to one tenant. Legal only on shared deployments with
    /// tenant scoping on.
    ///
    /// # Errors
    /// [`Error::InvalidId`] for a bad id, [`Error::ApiUsage`] when the
    /// flags forbid this form.
    pub async fn tenant(&self, id: &str) -> Result<ScopedDb> {
        if self.config.orgs_enabled() {
            return Err(Error::ApiUsage(
                "organization scoping is enabled; scope handles with org(<id>).tenant(<id>)"
                    .to_owned(),
            ));
        }
        if !self.config.tenants_enabled() {
            return Err(Error::ApiUsage(
                "row-level tenant scoping is not enabled; \
                 set VOILA_DB_TENANTS=true or obtain handles with get()"
                    .to_owned(),
            ));
        }
        let tenant = TenantId::parse(id)?;
        self.connect(ScopeKey::for_tenant(tenant, self.ambient_app()))
            .await
    }

    /// Scope builder for one organization. Legal only when organization
    /// scoping is on.
    ///
    /// # Errors
    /// [`Error::InvalidId`] for a bad id, [`Error::ApiUsage`] when
    /// organization scoping is off.
    pub fn org(&self, id: &str) -> Result<OrgScope<'_>> {
        if !self.config.orgs_enabled() {
            return Err(Error::ApiUsage(
                "organization scoping is not enabled; \
                 set VOILA_DB_ORGS=true or obtain handles with get()/tenant(<id>)"
                    .to_owned(),
            ));
        }
        Ok(OrgScope {
            router: self,
            org: OrgId::parse(id)?,
        })
    }

    fn ambient_app(&self) -> Option<AppId> {
        self.config.app_id().cloned()
    }

    async fn connect(&self, scope: ScopeKey) -> Result<ScopedDb> {
        let strategy = Arc::clone(&self.strategy);
        let build_scope = scope.clone();
        self.cache
            .get_or_create(&scope, move || async move {
                strategy.connect(&build_scope).await
            })
            .await
    }

    // --- management operations (delegated to the active strategy) ---

    /// Register a tenant explicitly.
    ///
    /// # Errors
    /// [`Error::Conflict`] when it exists; [`Error::ApiUsage`] on per-org
    /// deployments.
    pub async fn create_tenant(&self, id: &str) -> Result<()> {
        self.strategy.create_tenant(&TenantId::parse(id)?).await
    }

    /// Delete every row a tenant owns across tenant-capable models.
    /// Refuses to act unless `confirm` is set.
    ///
    /// # Errors
    /// [`Error::ApiUsage`] without confirmation; backend errors unchanged.
    pub async fn delete_tenant(&self, id: &str, confirm: bool) -> Result<u64> {
        let tenant = TenantId::parse(id)?;
        let affected = self.strategy.delete_tenant(&tenant, confirm).await?;
        // The scoped handle (if cached) now points at empty data; drop it.
        self.cache
            .evict(&ScopeKey::for_tenant(tenant, self.ambient_app()))
            .await;
        Ok(affected)
    }

    /// Whether a tenant exists.
    ///
    /// # Errors
    /// Backend errors propagate unchanged.
    pub async fn tenant_exists(&self, id: &str) -> Result<bool> {
        self.strategy.tenant_exists(&TenantId::parse(id)?).await
    }

    /// Known tenants.
    ///
    /// # Errors
    /// Backend errors propagate unchanged.
    pub async fn list_tenants(&self) -> Result<Vec<TenantId>> {
        self.strategy.list_tenants().await
    }

    /// Prepare an organization (no-op when its URL already resolves).
    ///
    /// # Errors
    /// [`Error::ApiUsage`] on shared deployments.
    pub async fn create_org(&self, id: &str) -> Result<()> {
        self.strategy.create_org(&OrgId::parse(id)?).await
    }

    /// Release an organization's cached URL and connection.
    ///
    /// # Errors
    /// [`Error::ApiUsage`] on shared deployments.
    pub async fn delete_org(&self, id: &str) -> Result<()> {
        let org = OrgId::parse(id)?;
        self.strategy.delete_org(&org).await?;
        self.cache
            .evict(&ScopeKey::for_org(org, None, self.ambient_app()))
            .await;
        Ok(())
    }

    /// Best-effort organization enumeration.
    ///
    /// # Errors
    /// [`Error::ApiUsage`] on shared deployments.
    pub async fn list_orgs(&self) -> Result<Vec<OrgId>> {
        self.strategy.list_orgs().await
    }

    // --- observability & lifecycle ---

    /// Resolver metrics snapshot (top five orgs).
    #[must_use]
    pub fn resolver_metrics(&self) -> ResolverMetricsSnapshot {
        self.resolver.metrics_snapshot(5)
    }

    /// The org URL resolver, for manual circuit control in tests and
    /// operational tooling.
    #[must_use]
    pub fn resolver(&self) -> &Arc<OrgUrlResolver> {
        &self.resolver
    }

    /// Start the periodic sweeper for stale resolver failure records.
    #[must_use]
    pub fn start_failure_sweeper(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        self.resolver.spawn_sweeper(every)
    }

    /// Drop every cached handle without closing clients (test entry point).
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Number of live cached scopes.
    #[must_use]
    pub fn cached_scopes(&self) -> usize {
        self.cache.len()
    }

    /// Close every handle and client, concurrently, under a bounded
    /// timeout.
    pub async fn shutdown(&self) {
        self.cache.shutdown().await;
        self.driver.release_all().await;
    }
}

impl std::fmt::Debug for DbRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbRouter")
            .field("strategy", &self.config.strategy())
            .field("cached_scopes", &self.cache.len())
            .finish_non_exhaustive()
    }
}

/// Builder binding one organization, exposing `.get()` and `.tenant(id)`.
#[derive(Debug)]
pub struct OrgScope<'a> {
    router: &'a DbRouter,
    org: OrgId,
}

impl OrgScope<'_> {
    /// Handle scoped to the whole organization.
    ///
    /// # Errors
    /// [`Error::ApiUsage`] when tenant scoping is also enabled (the only
    /// legal form is then `org(<id>).tenant(<id>)`).
    pub async fn get(&self) -> Result<ScopedDb> {
        if self.router.config.tenants_enabled() {
            return Err(Error::ApiUsage(
                "tenant scoping is enabled; scope handles with org(<id>).tenant(<id>)".to_owned(),
            ));
        }
        self.router
            .connect(ScopeKey::for_org(
                self.org.clone(),
                None,
                self.router.ambient_app(),
            ))
            .await
    }

    /// Handle scoped to one tenant inside this organization.
    ///
    /// # Errors
    /// [`Error::InvalidId`] for a bad id; [`Error::ApiUsage`] when tenant
    /// scoping is off.
    pub async fn tenant(&self, id: &str) -> Result<ScopedDb> {
        if !self.router.config.tenants_enabled() {
            return Err(Error::ApiUsage(
                "row-level tenant scoping is not enabled; \
                 set VOILA_DB_TENANTS=true or obtain handles with org(<id>).get()"
                    .to_owned(),
            ));
        }
        let tenant = TenantId::parse(id)?;
        self.router
            .connect(ScopeKey::for_org(
                self.org.clone(),
                Some(tenant),
                self.router.ambient_app(),
            ))
            .await
    }

    #[must_use]
    pub fn org_id(&self) -> &OrgId {
        &self.org
    }
}

/// Router construction with optional hook and driver injection.
#[derive(Default)]
pub struct RouterBuilder {
    config: Option<RouterConfig>,
    hook: Option<Arc<dyn OrgUrlHook>>,
    driver: Option<Arc<dyn Driver>>,
}

impl RouterBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Install a user hook mapping org ids to URLs.
    #[must_use]
    pub fn org_resolver(mut self, hook: Arc<dyn OrgUrlHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Inject a driver (tests; embedders with custom backends).
    #[must_use]
    pub fn driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Build the router.
    ///
    /// # Errors
    /// Configuration errors from [`RouterConfig::from_env`] (when no config
    /// was supplied) or driver construction.
    pub fn build(self) -> Result<DbRouter> {
        let config = Arc::new(match self.config {
            Some(config) => config,
            None => RouterConfig::from_env()?,
        });
        let driver = match self.driver {
            Some(driver) => driver,
            None => driver_for(config.driver_kind())?,
        };
        let resolver = Arc::new(OrgUrlResolver::new(
            ResolverOptions {
                base_url: config.base_url().to_owned(),
                cache_ttl: config.org_cache_ttl(),
                emergency_url_template: config.emergency_url_template().to_owned(),
            },
            self.hook,
        ));
        let strategy = strategy::build(Arc::clone(&config), Arc::clone(&driver), Arc::clone(&resolver));
        Ok(DbRouter {
            config,
            driver,
            resolver,
            strategy,
            cache: ConnectionCache::new(),
        })
    }
}

// ===================== tests =====================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockDriver;

    fn router(base: &str, orgs: bool, tenants: bool) -> (DbRouter, Arc<MockDriver>) {
        let config = RouterConfig::builder()
            .base_url(base)
            .orgs(orgs)
            .tenants(tenants)
            .build()
            .unwrap();
        let driver = Arc::new(MockDriver::new());
        let router = DbRouter::builder()
            .config(config)
            .driver(driver.clone())
            .build()
            .unwrap();
        (router, driver)
    }

    #[tokio::test]
    async fn unscoped_get_on_plain_config() {
        let (router, _) = router("postgresql://h/db", false, false);
        let db = router.get().await.unwrap();
        assert_eq!(db.url(), "postgresql://h/db");
    }

    #[tokio::test]
    async fn get_requires_tenant_when_tenants_enabled() {
        let (router, _) = router("postgresql://h/db", false, true);
        let err = router.get().await.unwrap_err();
        assert!(matches!(err, Error::ApiUsage(_)));
        assert!(err.to_string().contains("tenant(<id>)"));
    }

    #[tokio::test]
    async fn tenant_call_is_rejected_when_orgs_enabled() {
        // Spec scenario: ORGS=true and TENANTS=true makes tenant() illegal
        // and the error names the correct call form.
        let (router, _) = router("postgresql://h/{org}", true, true);
        let err = router.tenant("t1").await.unwrap_err();
        assert!(matches!(err, Error::ApiUsage(_)));
        assert!(err.to_string().contains("org(<id>).tenant(<id>)"));
        assert_eq!(err.status_code(), 400);

        // get() is equally illegal in this configuration.
        let err = router.get().await.unwrap_err();
        assert!(err.to_string().contains("org(<id>).tenant(<id>)"));

        // org(...).get() without a tenant is illegal too.
        let err = router.org("acme").unwrap().get().await.unwrap_err();
        assert!(err.to_string().contains("org(<id>).tenant(<id>)"));

        // The only legal form works.
        let db = router.org("acme").unwrap().tenant("t1").await.unwrap();
        assert_eq!(db.url(), "postgresql://h/acme");
    }

    #[tokio::test]
    async fn org_call_is_rejected_when_orgs_disabled() {
        let (router, _) = router("postgresql://h/db", false, true);
        let err = router.org("acme").unwrap_err();
        assert!(matches!(err, Error::ApiUsage(_)));
    }

    #[tokio::test]
    async fn invalid_identifiers_are_rejected_at_the_surface() {
        let (db_router, _) = router("postgresql://h/db", false, true);
        assert!(matches!(
            db_router.tenant("bad id!").await.unwrap_err(),
            Error::InvalidId { .. }
        ));

        let (org_router, _) = router("postgresql://h/{org}", true, false);
        assert!(matches!(
            org_router.org("bad id!").unwrap_err(),
            Error::InvalidId { .. }
        ));
        // Reserved names are tenant-only restrictions.
        assert!(org_router.org("admin").is_ok());
    }

    #[tokio::test]
    async fn same_scope_returns_the_same_client() {
        let (router, driver) = router("postgresql://h/db", false, true);
        let a1 = router.tenant("a").await.unwrap();
        let a2 = router.tenant("a").await.unwrap();
        let b = router.tenant("b").await.unwrap();

        assert!(Arc::ptr_eq(a1.client(), a2.client()));
        // Shared deployment: one URL, one client for everyone.
        assert!(Arc::ptr_eq(a1.client(), b.client()));
        assert_eq!(driver.connects.load(std::sync::atomic::Ordering::SeqCst), 1);
        // ...but two distinct cached scopes.
        assert_eq!(router.cached_scopes(), 2);
    }

    #[tokio::test]
    async fn orgs_route_to_distinct_clients() {
        let (router, driver) = router("postgresql://h/{org}", true, false);
        let acme = router.org("acme").unwrap().get().await.unwrap();
        let zen = router.org("zen").unwrap().get().await.unwrap();
        assert_eq!(acme.url(), "postgresql://h/acme");
        assert_eq!(zen.url(), "postgresql://h/zen");
        assert!(!Arc::ptr_eq(acme.client(), zen.client()));
        assert_eq!(driver.connects.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn clear_cache_forces_reconstruction() {
        let (router, driver) = router("postgresql://h/db", false, true);
        let _ = router.tenant("a").await.unwrap();
        router.clear_cache();
        assert_eq!(router.cached_scopes(), 0);
        let _ = router.tenant("a").await.unwrap();
        // The driver-level client cache still holds the URL's client.
        assert_eq!(driver.connects.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(router.cached_scopes(), 1);
    }

    #[tokio::test]
    async fn resolver_metrics_are_reachable() {
        let (router, _) = router("postgresql://h/{org}", true, false);
        let _ = router.org("acme").unwrap().get().await.unwrap();
        let metrics = router.resolver_metrics();
        assert_eq!(metrics.total_resolves, 1);
        assert_eq!(metrics.cache_size, 1);
    }

    #[tokio::test]
    async fn app_identity_is_part_of_the_scope() {
        let config = RouterConfig::builder()
            .base_url("postgresql://h/db")
            .tenants(true)
            .app_id("crm")
            .build()
            .unwrap();
        let driver = Arc::new(MockDriver::new());
        let router = DbRouter::builder()
            .config(config)
            .driver(driver)
            .build()
            .unwrap();
        let db = router.tenant("a").await.unwrap();
        assert_eq!(db.scope().app.as_ref().map(AppId::as_str), Some("crm"));
    }
}
