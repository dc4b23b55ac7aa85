//! Effective configuration derived from the environment.
//!
//! Configuration is read once and immutable afterwards. Recognized
//! environment options:
//!
//! | Variable | Meaning |
//! |---|---|
//! | `DATABASE_URL` | base URL; may contain the literal `{org}` placeholder |
//! | `VOILA_DB_ORGS` | `"true"` enables organization scoping |
//! | `VOILA_DB_TENANTS` | `"true"` enables row-level tenant scoping |
//! | `VOILA_DB_VECTORS` | `"true"` exposes the vector-operations namespace |
//! | `VOILA_DB_APP_ID` | app identity for multi-app isolation |
//! | `VOILA_ORG_CACHE_TTL` | resolver cache TTL in milliseconds (default 300000) |
//! | `VOILA_ENV` | `development` or `production` |

use std::sync::OnceLock;
use std::time::Duration;

use figment::providers::{Env, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::ident::AppId;
use crate::urls::redact_credentials;
use crate::{Error, Result};

pub use crate::urls::DriverKind;

/// Column carrying tenant identity in shared databases.
pub const TENANT_COLUMN: &str = "tenant_id";

/// Column carrying app identity when multi-app isolation is enabled.
pub const APP_COLUMN: &str = "app_id";

/// Default resolver cache TTL (5 minutes).
pub const DEFAULT_ORG_CACHE_TTL_MS: u64 = 300_000;

/// Emergency fallback used when every resolved URL is unusable.
/// Configurable via [`RouterConfigBuilder::emergency_url_template`].
pub const DEFAULT_EMERGENCY_URL_TEMPLATE: &str = "postgresql://localhost:5432/{org}_database";

/// Isolation strategy, derived from the org flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// One database, many tenants via injected predicates.
    Shared,
    /// One database per organization, optionally with in-DB tenant predicates.
    PerOrg,
}

/// Runtime environment; development enables schema-shape warnings and
/// lenient defaults, production enforces required configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunEnv {
    Development,
    #[default]
    Production,
}

/// Raw deserialization target for figment; turned into a validated
/// [`RouterConfig`] by [`RouterConfig::from_figment`].
#[derive(Debug, Default, Serialize, Deserialize)]
struct RawConfig {
    base_url: Option<String>,
    orgs: bool,
    tenants: bool,
    vectors: bool,
    app_id: Option<String>,
    org_cache_ttl_ms: Option<u64>,
    env: Option<RunEnv>,
    emergency_url_template: Option<String>,
}

/// Process-wide router configuration, immutable after construction.
#[derive(Clone, Debug)]
pub struct RouterConfig {
    base_url: String,
    orgs: bool,
    tenants: bool,
    vectors: bool,
    app_id: Option<AppId>,
    org_cache_ttl: Duration,
    env: RunEnv,
    emergency_url_template: String,
    driver_kind: DriverKind,
}

impl RouterConfig {
    /// Read configuration from the process environment.
    ///
    /// Repeated calls return a clone of the same record for the lifetime of
    /// the process.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] for a missing URL (in production), an
    /// unknown backend scheme, or identifier-style violations in env values.
    pub fn from_env() -> Result<Self> {
        static CONFIG: OnceLock<RouterConfig> = OnceLock::new();
        if let Some(cfg) = CONFIG.get() {
            return Ok(cfg.clone());
        }
        let cfg = Self::from_figment(Self::env_figment())?;
        Ok(CONFIG.get_or_init(|| cfg).clone())
    }

    /// The figment used by [`RouterConfig::from_env`], exposed so embedders
    /// can layer additional providers before extraction.
    #[must_use]
    pub fn env_figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(RawConfig::default()))
            .merge(Env::prefixed("VOILA_DB_"))
            .merge(Env::raw().only(&["DATABASE_URL"]).map(|_| "base_url".into()))
            .merge(
                Env::raw()
                    .only(&["VOILA_ORG_CACHE_TTL"])
                    .map(|_| "org_cache_ttl_ms".into()),
            )
            .merge(Env::raw().only(&["VOILA_ENV"]).map(|_| "env".into()))
    }

    /// Extract and validate configuration from an arbitrary figment.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] when extraction or validation fails.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let raw: RawConfig = figment
            .extract()
            .map_err(|e| Error::Configuration(e.to_string()))?;

        let env = raw.env.unwrap_or_default();
        let base_url = match raw.base_url {
            Some(url) if !url.is_empty() => url,
            _ if env == RunEnv::Development => {
                tracing::warn!(
                    "DATABASE_URL is not set; falling back to an in-memory sqlite database"
                );
                "sqlite::memory:".to_owned()
            }
            _ => {
                return Err(Error::Configuration(
                    "DATABASE_URL is required in production".to_owned(),
                ));
            }
        };

        let app_id = raw
            .app_id
            .as_deref()
            .map(AppId::parse)
            .transpose()
            .map_err(|e| Error::Configuration(format!("VOILA_DB_APP_ID: {e}")))?;

        let driver_kind = crate::urls::detect_kind(&base_url).map_err(|_| {
            Error::Configuration(format!(
                "unknown backend scheme in DATABASE_URL '{}'",
                redact_credentials(&base_url)
            ))
        })?;

        let cfg = Self {
            base_url,
            orgs: raw.orgs,
            tenants: raw.tenants,
            vectors: raw.vectors,
            app_id,
            org_cache_ttl: Duration::from_millis(
                raw.org_cache_ttl_ms.unwrap_or(DEFAULT_ORG_CACHE_TTL_MS),
            ),
            env,
            emergency_url_template: raw
                .emergency_url_template
                .unwrap_or_else(|| DEFAULT_EMERGENCY_URL_TEMPLATE.to_owned()),
            driver_kind,
        };

        if cfg.env == RunEnv::Development {
            tracing::debug!(
                url = redact_credentials(&cfg.base_url),
                orgs = cfg.orgs,
                tenants = cfg.tenants,
                strategy = ?cfg.strategy(),
                "router configuration loaded"
            );
            if cfg.tenants && cfg.base_url.contains(crate::urls::ORG_PLACEHOLDER) && !cfg.orgs {
                tracing::warn!(
                    "DATABASE_URL contains '{{org}}' but VOILA_DB_ORGS is not enabled; \
                     the placeholder will never be substituted"
                );
            }
        }

        Ok(cfg)
    }

    /// Start building an explicit configuration (tests, embedders).
    #[must_use]
    pub fn builder() -> RouterConfigBuilder {
        RouterConfigBuilder::default()
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn orgs_enabled(&self) -> bool {
        self.orgs
    }

    #[must_use]
    pub fn tenants_enabled(&self) -> bool {
        self.tenants
    }

    #[must_use]
    pub fn vectors_enabled(&self) -> bool {
        self.vectors
    }

    #[must_use]
    pub fn app_id(&self) -> Option<&AppId> {
        self.app_id.as_ref()
    }

    /// Column name for app isolation, present only when an app id is set.
    #[must_use]
    pub fn app_column(&self) -> Option<&'static str> {
        self.app_id.as_ref().map(|_| APP_COLUMN)
    }

    #[must_use]
    pub fn org_cache_ttl(&self) -> Duration {
        self.org_cache_ttl
    }

    #[must_use]
    pub fn run_env(&self) -> RunEnv {
        self.env
    }

    #[must_use]
    pub fn emergency_url_template(&self) -> &str {
        &self.emergency_url_template
    }

    /// `PerOrg` iff organization scoping is enabled.
    #[must_use]
    pub fn strategy(&self) -> Strategy {
        if self.orgs {
            Strategy::PerOrg
        } else {
            Strategy::Shared
        }
    }

    #[must_use]
    pub fn driver_kind(&self) -> DriverKind {
        self.driver_kind
    }
}

/// Builder for explicit (non-environment) configuration.
#[derive(Debug, Default)]
pub struct RouterConfigBuilder {
    base_url: Option<String>,
    orgs: bool,
    tenants: bool,
    vectors: bool,
    app_id: Option<String>,
    org_cache_ttl_ms: Option<u64>,
    env: Option<RunEnv>,
    emergency_url_template: Option<String>,
}

impl RouterConfigBuilder {
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn orgs(mut self, enabled: bool) -> Self {
        self.orgs = enabled;
        self
    }

    #[must_use]
    pub fn tenants(mut self, enabled: bool) -> Self {
        self.tenants = enabled;
        self
    }

    #[must_use]
    pub fn vectors(mut self, enabled: bool) -> Self {
        self.vectors = enabled;
        self
    }

    #[must_use]
    pub fn app_id(mut self, app: impl Into<String>) -> Self {
        self.app_id = Some(app.into());
        self
    }

    #[must_use]
    pub fn org_cache_ttl(mut self, ttl: Duration) -> Self {
        self.org_cache_ttl_ms = Some(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX));
        self
    }

    #[must_use]
    pub fn run_env(mut self, env: RunEnv) -> Self {
        self.env = Some(env);
        self
    }

    #[must_use]
    pub fn emergency_url_template(mut self, template: impl Into<String>) -> Self {
        self.emergency_url_template = Some(template.into());
        self
    }

    /// Validate and freeze the configuration.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] under the same rules as
    /// [`RouterConfig::from_figment`].
    pub fn build(self) -> Result<RouterConfig> {
        let raw = RawConfig {
            base_url: self.base_url,
            orgs: self.orgs,
            tenants: self.tenants,
            vectors: self.vectors,
            app_id: self.app_id,
            org_cache_ttl_ms: self.org_cache_ttl_ms,
            env: self.env,
            emergency_url_template: self.emergency_url_template,
        };
        RouterConfig::from_figment(Figment::new().merge(Serialized::defaults(raw)))
    }
}

// ===================== tests =====================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_derives_strategy_and_driver_kind() {
        let cfg = RouterConfig::builder()
            .base_url("postgresql://h/db")
            .tenants(true)
            .build()
            .unwrap();
        assert_eq!(cfg.strategy(), Strategy::Shared);
        assert_eq!(cfg.driver_kind(), DriverKind::Relational);
        assert!(cfg.tenants_enabled());
        assert!(!cfg.orgs_enabled());

        let cfg = RouterConfig::builder()
            .base_url("postgresql://h/{org}")
            .orgs(true)
            .build()
            .unwrap();
        assert_eq!(cfg.strategy(), Strategy::PerOrg);
    }

    #[test]
    fn production_requires_base_url() {
        let err = RouterConfig::builder().build().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn development_falls_back_to_sqlite() {
        let cfg = RouterConfig::builder()
            .run_env(RunEnv::Development)
            .build()
            .unwrap();
        assert_eq!(cfg.base_url(), "sqlite::memory:");
    }

    #[test]
    fn unknown_scheme_is_a_configuration_error() {
        let err = RouterConfig::builder()
            .base_url("redis://h/0")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn invalid_app_id_is_a_configuration_error() {
        let err = RouterConfig::builder()
            .base_url("sqlite::memory:")
            .app_id("not valid!")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn app_column_follows_app_id() {
        let cfg = RouterConfig::builder()
            .base_url("sqlite::memory:")
            .app_id("crm")
            .build()
            .unwrap();
        assert_eq!(cfg.app_column(), Some("app_id"));

        let cfg = RouterConfig::builder()
            .base_url("sqlite::memory:")
            .build()
            .unwrap();
        assert_eq!(cfg.app_column(), None);
    }

    #[test]
    fn cache_ttl_defaults_to_five_minutes() {
        let cfg = RouterConfig::builder()
            .base_url("sqlite::memory:")
            .build()
            .unwrap();
        assert_eq!(cfg.org_cache_ttl(), Duration::from_millis(300_000));
    }
}
