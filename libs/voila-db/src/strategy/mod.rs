//! Isolation strategies.
//!
//! A strategy combines a URL, a driver and (optionally) a rewriter into a
//! scoped handle, and carries the management operations whose meaning
//! depends on the deployment shape:
//!
//! - [`SharedStrategy`]: one database, many tenants via injected predicates;
//! - [`PerOrgStrategy`]: one database per organization, resolved through the
//!   org URL resolver, optionally with in-database tenant predicates.

mod per_org;
mod shared;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{RouterConfig, Strategy};
use crate::driver::Driver;
use crate::handle::ScopedDb;
use crate::ident::{OrgId, ScopeKey, TenantId};
use crate::resolver::OrgUrlResolver;
use crate::Result;

pub use per_org::PerOrgStrategy;
pub use shared::SharedStrategy;

/// Strategy seam between the router and the drivers.
#[async_trait]
pub trait IsolationStrategy: Send + Sync {
    /// Open (or reuse) the client behind `scope` and wrap it accordingly.
    ///
    /// # Errors
    /// Connect errors propagate; [`crate::Error::ApiUsage`] for scopes the
    /// strategy cannot serve.
    async fn connect(&self, scope: &ScopeKey) -> Result<ScopedDb>;

    /// Register a tenant explicitly.
    ///
    /// # Errors
    /// [`crate::Error::Conflict`] when the tenant already exists.
    async fn create_tenant(&self, tenant: &TenantId) -> Result<()>;

    /// Remove every row belonging to a tenant, across all tenant-capable
    /// models, transactionally where the backend supports it.
    ///
    /// # Errors
    /// [`crate::Error::ApiUsage`] without `confirm`; backend errors
    /// propagate unchanged.
    async fn delete_tenant(&self, tenant: &TenantId, confirm: bool) -> Result<u64>;

    /// Whether the tenant exists (registry, else row scan).
    ///
    /// # Errors
    /// Backend errors propagate unchanged.
    async fn tenant_exists(&self, tenant: &TenantId) -> Result<bool>;

    /// Known tenants (registry, else distinct scan over tenant-capable
    /// models only).
    ///
    /// # Errors
    /// Backend errors propagate unchanged.
    async fn list_tenants(&self) -> Result<Vec<TenantId>>;

    /// Prepare an organization. A no-op when its URL already resolves.
    ///
    /// # Errors
    /// [`crate::Error::ApiUsage`] when organization scoping is off.
    async fn create_org(&self, org: &OrgId) -> Result<()>;

    /// Forget an organization: drop its resolver cache entry and close its
    /// client. Does not drop the database.
    ///
    /// # Errors
    /// [`crate::Error::ApiUsage`] when organization scoping is off.
    async fn delete_org(&self, org: &OrgId) -> Result<()>;

    /// Best-effort organization enumeration.
    ///
    /// # Errors
    /// [`crate::Error::ApiUsage`] when organization scoping is off.
    async fn list_orgs(&self) -> Result<Vec<OrgId>>;
}

/// Build the strategy selected by the configuration.
#[must_use]
pub fn build(
    config: Arc<RouterConfig>,
    driver: Arc<dyn Driver>,
    resolver: Arc<OrgUrlResolver>,
) -> Arc<dyn IsolationStrategy> {
    match config.strategy() {
        Strategy::Shared => Arc::new(SharedStrategy::new(config, driver)),
        Strategy::PerOrg => Arc::new(PerOrgStrategy::new(config, driver, resolver)),
    }
}
