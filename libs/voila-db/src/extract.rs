//! Framework-agnostic request scope extraction.
//!
//! Web adapters reduce an incoming request to a [`RequestParts`] descriptor;
//! this module extracts organization/tenant identity from it (in strict
//! priority order), validates, resolves the scoped handle through a router,
//! and hands back a [`RequestScope`] for the request to carry.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::handle::ScopedDb;
use crate::ident::{Ident, IdentKind, OrgId, TenantId};
use crate::router::DbRouter;
use crate::{Error, Result};

/// Subdomains never treated as tenant/org identity.
pub const RESERVED_SUBDOMAINS: &[&str] = &["www", "api", "admin", "app", "mail", "ftp"];

/// Abstract request descriptor. Adapters populate whatever their framework
/// can cheaply provide; absent fields simply never match.
#[derive(Clone, Debug, Default)]
pub struct RequestParts {
    /// Header name → value, lower-cased names.
    pub headers: HashMap<String, String>,
    pub path_params: HashMap<String, String>,
    pub query_params: HashMap<String, String>,
    /// Parsed JSON body, when the adapter chose to buffer one.
    pub body: Option<Value>,
    /// Authenticated user context (e.g. token claims).
    pub user_context: Option<Value>,
    /// Host, possibly with port.
    pub host: Option<String>,
}

impl RequestParts {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    fn subdomain(&self, reserved: &[String]) -> Option<&str> {
        let host = self.host.as_deref()?;
        let host = host.split(':').next().unwrap_or(host);
        let mut labels = host.split('.');
        let first = labels.next()?;
        // A subdomain needs at least two more labels behind it.
        if labels.count() < 2 {
            return None;
        }
        if reserved.iter().any(|r| r == first) {
            return None;
        }
        Some(first)
    }
}

/// Custom extraction hook, consulted before every built-in source.
pub trait ScopeExtractorHook: Send + Sync {
    /// Return raw (unvalidated) identifiers, or `None` to fall through.
    fn extract(&self, parts: &RequestParts) -> Option<ExtractedIds>;
}

/// Raw identifiers as found in the request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtractedIds {
    pub org: Option<String>,
    pub tenant: Option<String>,
}

/// Extraction configuration. Defaults recognize the documented sources.
#[derive(Clone)]
pub struct ExtractorConfig {
    pub org_header: String,
    pub tenant_header: String,
    pub org_param: String,
    pub tenant_param: String,
    pub reserved_subdomains: Vec<String>,
    pub hook: Option<Arc<dyn ScopeExtractorHook>>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            org_header: "x-org-id".to_owned(),
            tenant_header: "x-tenant-id".to_owned(),
            org_param: "orgId".to_owned(),
            tenant_param: "tenantId".to_owned(),
            reserved_subdomains: RESERVED_SUBDOMAINS.iter().map(|s| (*s).to_owned()).collect(),
            hook: None,
        }
    }
}

impl std::fmt::Debug for ExtractorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorConfig")
            .field("org_header", &self.org_header)
            .field("tenant_header", &self.tenant_header)
            .field("has_hook", &self.hook.is_some())
            .finish_non_exhaustive()
    }
}

impl ExtractorConfig {
    /// Pull raw org/tenant identifiers out of a request, in priority order:
    /// custom hook, header, path parameter, query parameter, body field,
    /// user-context field, subdomain (skipping reserved names).
    #[must_use]
    pub fn extract(&self, parts: &RequestParts) -> ExtractedIds {
        let hooked = self
            .hook
            .as_ref()
            .and_then(|hook| hook.extract(parts))
            .unwrap_or_default();

        let org = hooked
            .org
            .or_else(|| self.from_sources(parts, &self.org_header, &self.org_param));
        let tenant = hooked
            .tenant
            .or_else(|| self.from_sources(parts, &self.tenant_header, &self.tenant_param));
        ExtractedIds { org, tenant }
    }

    fn from_sources(&self, parts: &RequestParts, header: &str, param: &str) -> Option<String> {
        if let Some(value) = parts.header(header) {
            return Some(value.to_owned());
        }
        if let Some(value) = parts.path_params.get(param) {
            return Some(value.clone());
        }
        if let Some(value) = parts.query_params.get(param) {
            return Some(value.clone());
        }
        if let Some(value) = parts.body.as_ref().and_then(|b| b.get(param)).and_then(Value::as_str)
        {
            return Some(value.to_owned());
        }
        if let Some(value) = parts
            .user_context
            .as_ref()
            .and_then(|c| c.get(param))
            .and_then(Value::as_str)
        {
            return Some(value.to_owned());
        }
        parts
            .subdomain(&self.reserved_subdomains)
            .map(str::to_owned)
    }

    fn missing(&self, kind: IdentKind) -> Error {
        let (header, param, ctx) = match kind {
            IdentKind::Tenant => (&self.tenant_header, &self.tenant_param, "tenantId"),
            _ => (&self.org_header, &self.org_param, "orgId"),
        };
        Error::ApiUsage(format!(
            "{kind} id not found in request; accepted sources: \
             {header} header, {param} path parameter, {param} query parameter, \
             {param} body field, userContext.{ctx}, or subdomain"
        ))
    }
}

/// A resolved per-request scope: the handle plus the identity it serves.
#[derive(Clone, Debug)]
pub struct RequestScope {
    db: ScopedDb,
    org_id: Option<OrgId>,
    tenant_id: Option<TenantId>,
    router: Arc<DbRouter>,
}

impl RequestScope {
    /// The request's scoped database handle.
    #[must_use]
    pub fn db(&self) -> &ScopedDb {
        &self.db
    }

    #[must_use]
    pub fn org_id(&self) -> Option<&OrgId> {
        self.org_id.as_ref()
    }

    #[must_use]
    pub fn tenant_id(&self) -> Option<&TenantId> {
        self.tenant_id.as_ref()
    }

    /// Re-resolve against another tenant within the same request (and same
    /// organization, when one is active).
    ///
    /// # Errors
    /// [`Error::InvalidId`] / [`Error::ApiUsage`] as for router calls.
    pub async fn switch_tenant(&self, id: &str) -> Result<RequestScope> {
        let db = match &self.org_id {
            Some(org) => self.router.org(org.as_str())?.tenant(id).await?,
            None => self.router.tenant(id).await?,
        };
        Ok(RequestScope {
            db,
            org_id: self.org_id.clone(),
            tenant_id: Some(TenantId::parse(id)?),
            router: Arc::clone(&self.router),
        })
    }

    /// Re-resolve against another organization within the same request,
    /// keeping the tenant when one is active.
    ///
    /// # Errors
    /// [`Error::InvalidId`] / [`Error::ApiUsage`] as for router calls.
    pub async fn switch_org(&self, id: &str) -> Result<RequestScope> {
        let scope = self.router.org(id)?;
        let db = match &self.tenant_id {
            Some(tenant) => scope.tenant(tenant.as_str()).await?,
            None => scope.get().await?,
        };
        Ok(RequestScope {
            db,
            org_id: Some(OrgId::parse(id)?),
            tenant_id: self.tenant_id.clone(),
            router: Arc::clone(&self.router),
        })
    }
}

/// Extract, validate, and resolve the scope for one request.
///
/// # Errors
/// - [`Error::InvalidId`] when an extracted identifier fails validation;
/// - [`Error::ApiUsage`] (400) when a required identifier is missing,
///   enumerating every accepted source;
/// - connect errors from the underlying strategy.
pub async fn resolve_scope(
    router: &Arc<DbRouter>,
    extractor: &ExtractorConfig,
    parts: &RequestParts,
) -> Result<RequestScope> {
    let want_org = router.config().orgs_enabled();
    let want_tenant = router.config().tenants_enabled();
    let ids = extractor.extract(parts);

    let org = if want_org {
        match ids.org {
            Some(raw) => {
                // Validate eagerly so the 400 carries the offending source
                // value rather than a downstream connect error.
                Ident::parse(&raw, IdentKind::Org)?;
                Some(raw)
            }
            None => return Err(extractor.missing(IdentKind::Org)),
        }
    } else {
        None
    };
    let tenant = if want_tenant {
        match ids.tenant {
            Some(raw) => {
                Ident::parse(&raw, IdentKind::Tenant)?;
                Some(raw)
            }
            None => return Err(extractor.missing(IdentKind::Tenant)),
        }
    } else {
        None
    };

    let db = match (&org, &tenant) {
        (Some(org), Some(tenant)) => router.org(org)?.tenant(tenant).await?,
        (Some(org), None) => router.org(org)?.get().await?,
        (None, Some(tenant)) => router.tenant(tenant).await?,
        (None, None) => router.get().await?,
    };

    Ok(RequestScope {
        db,
        org_id: org.as_deref().map(OrgId::parse).transpose()?,
        tenant_id: tenant.as_deref().map(TenantId::parse).transpose()?,
        router: Arc::clone(router),
    })
}

// ===================== tests =====================
