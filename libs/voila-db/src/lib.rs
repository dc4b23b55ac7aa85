//! Multi-tenant, multi-organization database routing and isolation.
//!
//! This crate sits between application code and a database backend and hands
//! out *scoped handles*: database clients that transparently confine every
//! read and write to one organization and/or one tenant. It provides three
//! services:
//!
//! - **Ownership-scoped client resolution** — the [`DbRouter`] facade maps an
//!   `(org, tenant)` pair to a cached [`ScopedDb`] handle.
//! - **Dynamic per-organization URL resolution** — the
//!   [`resolver::OrgUrlResolver`] maps an organization id to a database URL
//!   through a user hook, with caching, retries, circuit breaking and
//!   fallbacks for database-per-organization deployments.
//! - **Row-level tenant filter injection** — the [`rewrite::ScopeRewriter`]
//!   rewrites every operation so tenant identity is an implicit predicate on
//!   reads and an implicit column on writes in shared-database deployments.
//!
//! # Features
//! - `sqlite` (default), `pg`, `mysql`: relational backends via `sqlx`/`SeaORM`
//! - `mongodb`: document backend
//!
//! # Example
//! ```rust,no_run
//! use voila_db::{DbRouter, RouterConfig};
//!
//! # async fn example() -> voila_db::Result<()> {
//! let config = RouterConfig::builder()
//!     .base_url("sqlite::memory:")
//!     .tenants(true)
//!     .build()?;
//! let router = DbRouter::new(config)?;
//!
//! // Every operation through this handle carries `tenant_id = "acme"`.
//! let db = router.tenant("acme").await?;
//! let users = db.model("users").find_many().all().await?;
//! # let _ = users;
//! # Ok(())
//! # }
//! ```

// Core modules
pub mod cache;
pub mod config;
pub mod driver;
pub mod extract;
pub mod handle;
pub mod ident;
pub mod query;
pub mod resolver;
pub mod rewrite;
pub mod router;
pub mod strategy;
pub mod urls;

#[cfg(test)]
pub(crate) mod testutil;

use thiserror::Error;

// Re-export the types application code touches every day.
pub use config::{DriverKind, RouterConfig, RouterConfigBuilder, RunEnv, Strategy};
pub use extract::{ExtractorConfig, RequestParts, RequestScope};
pub use handle::ScopedDb;
pub use ident::{AppId, IdentKind, OrgId, ScopeKey, TenantId};
pub use query::{Filter, Operation, QueryOutput, Record};
pub use resolver::{OrgUrlHook, ResolverMetricsSnapshot, UrlSource};
pub use router::{DbRouter, OrgScope, RouterBuilder};

/// Library-local result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed error for the router and its subsystems.
///
/// Every variant maps to an HTTP status through [`Error::status_code`] so the
/// request middleware can surface failures without a translation table.
/// Resolver failures never appear here: they degrade to fallback URLs inside
/// the resolver (see [`resolver`]).
#[derive(Debug, Error)]
pub enum Error {
    /// Missing URL, unknown backend scheme, or incoherent flags.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The caller used the router surface in a way the active flags forbid.
    /// The message enumerates the correct call form.
    #[error("{0}")]
    ApiUsage(String),

    /// An organization/tenant/app identifier failed validation.
    #[error("invalid {kind} id {id:?}: {reason}")]
    InvalidId {
        kind: IdentKind,
        id: String,
        reason: &'static str,
    },

    /// A built or resolved URL has no recognized scheme.
    ///
    /// The stored URL is credential-redacted at construction.
    #[error("invalid database URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Tenant or organization does not exist and auto-create is off.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Tenant or organization already exists.
    #[error("{kind} already exists: {id}")]
    Conflict { kind: &'static str, id: String },

    /// Bubbled from the relational backend without modification.
    #[error(transparent)]
    Sea(#[from] sea_orm::DbErr),

    /// Bubbled from the connection pool layer without modification.
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    /// Bubbled from the document backend without modification.
    #[cfg(feature = "mongodb")]
    #[error(transparent)]
    Mongo(#[from] mongodb::error::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// HTTP status for direct mapping by the request middleware.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Error::ApiUsage(_) | Error::InvalidId { .. } | Error::InvalidUrl { .. } => 400,
            Error::NotFound { .. } => 404,
            Error::Conflict { .. } => 409,
            Error::Configuration(_) | Error::Sea(_) | Error::Sqlx(_) | Error::Other(_) => 500,
            #[cfg(feature = "mongodb")]
            Error::Mongo(_) => 500,
        }
    }
}
