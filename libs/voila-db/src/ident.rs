//! Organization/tenant/app identifier validation.
//!
//! Identifiers are opaque, case-sensitive strings and are never normalized.
//! Every public entry point (router, strategies, request extraction) runs its
//! inputs through [`Ident::parse`] before touching any cache or backend.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Maximum identifier length in code units.
pub const MAX_IDENT_LEN: usize = 63;

/// Names rejected for tenant identifiers to prevent subdomain collisions.
pub const RESERVED_TENANT_IDS: &[&str] = &[
    "www",
    "api",
    "admin",
    "app",
    "mail",
    "ftp",
    "null",
    "undefined",
];

/// Which kind of identifier is being validated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IdentKind {
    Org,
    Tenant,
    App,
}

impl fmt::Display for IdentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentKind::Org => write!(f, "organization"),
            IdentKind::Tenant => write!(f, "tenant"),
            IdentKind::App => write!(f, "app"),
        }
    }
}

/// A validated identifier (non-empty, `[A-Za-z0-9_-]+`, at most
/// [`MAX_IDENT_LEN`] code units).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ident(String);

impl Ident {
    /// Validate `raw` as an identifier of the given kind.
    ///
    /// # Errors
    /// Returns [`Error::InvalidId`] for empty, over-length, pattern-violating,
    /// or (for tenants) reserved identifiers.
    pub fn parse(raw: &str, kind: IdentKind) -> Result<Self> {
        if let Err(reason) = check(raw, kind) {
            return Err(Error::InvalidId {
                kind,
                id: raw.to_owned(),
                reason,
            });
        }
        Ok(Self(raw.to_owned()))
    }

    /// Validity check without allocation, for hot paths and the middleware.
    #[must_use]
    pub fn is_valid(raw: &str, kind: IdentKind) -> bool {
        check(raw, kind).is_ok()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn check(raw: &str, kind: IdentKind) -> std::result::Result<(), &'static str> {
    if raw.is_empty() {
        return Err("must not be empty");
    }
    if raw.len() > MAX_IDENT_LEN {
        return Err("exceeds 63 characters");
    }
    if !raw
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err("may only contain letters, digits, '_' and '-'");
    }
    if kind == IdentKind::Tenant && RESERVED_TENANT_IDS.contains(&raw) {
        return Err("is a reserved name");
    }
    Ok(())
}

macro_rules! ident_newtype {
    ($(#[$doc:meta])* $name:ident, $kind:expr) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ident);

        impl $name {
            /// Validate and wrap a raw identifier.
            ///
            /// # Errors
            /// Returns [`Error::InvalidId`] when validation fails.
            pub fn parse(raw: &str) -> Result<Self> {
                Ok(Self(Ident::parse(raw, $kind)?))
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Self::parse(s)
            }
        }
    };
}

ident_newtype!(
    /// An organization identifier.
    OrgId,
    IdentKind::Org
);
ident_newtype!(
    /// A tenant identifier.
    TenantId,
    IdentKind::Tenant
);
ident_newtype!(
    /// An application identifier for multi-app isolation.
    AppId,
    IdentKind::App
);

/// Canonical `(org?, tenant?, app?)` tuple identifying which scope a handle
/// serves. Used as the connection-cache key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct ScopeKey {
    pub org: Option<OrgId>,
    pub tenant: Option<TenantId>,
    pub app: Option<AppId>,
}

impl ScopeKey {
    #[must_use]
    pub fn unscoped() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn for_tenant(tenant: TenantId, app: Option<AppId>) -> Self {
        Self {
            org: None,
            tenant: Some(tenant),
            app,
        }
    }

    #[must_use]
    pub fn for_org(org: OrgId, tenant: Option<TenantId>, app: Option<AppId>) -> Self {
        Self {
            org: Some(org),
            tenant,
            app,
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let org = self.org.as_ref().map_or("-", OrgId::as_str);
        let tenant = self.tenant.as_ref().map_or("-", TenantId::as_str);
        let app = self.app.as_ref().map_or("-", AppId::as_str);
        write!(f, "{org}/{tenant}/{app}")
    }
}

// ===================== tests =====================
