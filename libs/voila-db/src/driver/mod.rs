//! Backend drivers.
//!
//! A [`Driver`] constructs raw clients for URLs (cached per URL, so repeated
//! lookups share one connection pool) and a [`DriverClient`] executes the
//! operation IR against one database. Query interception is first-class:
//! scoped handles pass every operation through the rewriter *before* it
//! reaches a client — there is no hook to monkey-patch and nothing to bypass.
//!
//! Two implementations exist: [`relational`] (`SQLx`/`SeaORM`; `sqlite`,
//! `pg`, `mysql` features) and [`document`] (`mongodb` feature).

pub mod relational;

#[cfg(feature = "mongodb")]
pub mod document;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::ident::TenantId;
use crate::query::{Filter, Operation, QueryOutput};
use crate::urls::DriverKind;
use crate::Result;

/// Table/collection consulted for the optional tenant registry.
pub const REGISTRY_TABLE: &str = "tenants";

/// Constructs and caches raw clients per URL.
#[async_trait]
pub trait Driver: Send + Sync {
    fn kind(&self) -> DriverKind;

    /// Return the client for `url`, connecting eagerly on first use.
    /// Concurrent first calls for one URL collapse to a single connect.
    ///
    /// # Errors
    /// Returns the backend's connect error.
    async fn client(&self, url: &str) -> Result<Arc<dyn DriverClient>>;

    /// Close and forget the client for `url`, if any.
    async fn release(&self, url: &str);

    /// Close every cached client.
    async fn release_all(&self);
}

/// One live database connection executing the operation IR.
#[async_trait]
pub trait DriverClient: Send + Sync {
    /// The URL this client was opened with.
    fn url(&self) -> &str;

    /// Execute one operation against a table/collection.
    ///
    /// # Errors
    /// Backend errors propagate unchanged.
    async fn execute(&self, table: &str, op: Operation) -> Result<QueryOutput>;

    /// Run a raw read-only query, bypassing the IR entirely.
    ///
    /// # Errors
    /// Backend errors propagate unchanged.
    async fn query_raw(&self, query: &str) -> Result<Vec<Value>>;

    /// Run a raw statement, returning affected rows.
    ///
    /// # Errors
    /// Backend errors propagate unchanged.
    async fn execute_raw(&self, query: &str) -> Result<u64>;

    /// Whether `table` carries `column`. Schemaless backends answer `true`.
    ///
    /// # Errors
    /// Backend errors propagate unchanged.
    async fn has_column(&self, table: &str, column: &str) -> Result<bool>;

    /// User tables/collections, excluding backend internals.
    ///
    /// # Errors
    /// Backend errors propagate unchanged.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Distinct string values of `column` in `table`.
    ///
    /// # Errors
    /// Backend errors propagate unchanged.
    async fn distinct_values(&self, table: &str, column: &str) -> Result<Vec<String>>;

    /// Delete all rows matching `filter` across `tables`, atomically where
    /// the backend supports multi-table transactions.
    ///
    /// # Errors
    /// Backend errors propagate unchanged; nothing is committed on failure
    /// for transactional backends.
    async fn purge_rows(&self, tables: &[String], filter: &Filter) -> Result<u64>;

    /// Close the underlying pool/connection.
    async fn close(&self);
}

/// Management hooks over a tenant registry, consulted by the strategies.
/// When no registry is available they fall back to scanning user tables.
#[async_trait]
pub trait TenantRegistry: Send + Sync {
    /// Record a tenant. Idempotent: an existing entry is not an error.
    ///
    /// # Errors
    /// Backend errors propagate unchanged.
    async fn create_entry(&self, tenant: &TenantId) -> Result<()>;

    /// Remove a tenant's entry.
    ///
    /// # Errors
    /// Backend errors propagate unchanged.
    async fn delete_entry(&self, tenant: &TenantId) -> Result<()>;

    /// Whether the registry knows this tenant.
    ///
    /// # Errors
    /// Backend errors propagate unchanged.
    async fn exists(&self, tenant: &TenantId) -> Result<bool>;

    /// All registered tenants.
    ///
    /// # Errors
    /// Backend errors propagate unchanged.
    async fn list(&self) -> Result<Vec<TenantId>>;
}

/// Probe for a registry on this client: present when the registry table
/// exists with an `id` column.
pub async fn tenant_registry(client: &Arc<dyn DriverClient>) -> Option<Arc<dyn TenantRegistry>> {
    let tables = client.list_tables().await.ok()?;
    if !tables.iter().any(|t| t == REGISTRY_TABLE) {
        return None;
    }
    match client.has_column(REGISTRY_TABLE, "id").await {
        Ok(true) => Some(Arc::new(TableRegistry {
            client: Arc::clone(client),
        })),
        _ => None,
    }
}

/// Registry stored as an ordinary table with an `id` column, driven through
/// the operation IR so it works on every backend.
struct TableRegistry {
    client: Arc<dyn DriverClient>,
}

#[async_trait]
impl TenantRegistry for TableRegistry {
    async fn create_entry(&self, tenant: &TenantId) -> Result<()> {
        if self.exists(tenant).await? {
            return Ok(());
        }
        let mut data = serde_json::Map::new();
        data.insert("id".to_owned(), Value::String(tenant.as_str().to_owned()));
        self.client
            .execute(REGISTRY_TABLE, Operation::Create { data })
            .await?;
        Ok(())
    }

    async fn delete_entry(&self, tenant: &TenantId) -> Result<()> {
        self.client
            .execute(
                REGISTRY_TABLE,
                Operation::DeleteMany {
                    filter: Some(Filter::eq("id", tenant.as_str())),
                },
            )
            .await?;
        Ok(())
    }

    async fn exists(&self, tenant: &TenantId) -> Result<bool> {
        let out = self
            .client
            .execute(
                REGISTRY_TABLE,
                Operation::Count {
                    filter: Some(Filter::eq("id", tenant.as_str())),
                },
            )
            .await?;
        Ok(out.count() > 0)
    }

    async fn list(&self) -> Result<Vec<TenantId>> {
        let ids = self.client.distinct_values(REGISTRY_TABLE, "id").await?;
        Ok(ids
            .iter()
            .filter_map(|raw| TenantId::parse(raw).ok())
            .collect())
    }
}

/// Build the driver for a backend family.
///
/// # Errors
/// Returns [`Error::Configuration`] when the family's feature is disabled.
pub fn driver_for(kind: DriverKind) -> Result<Arc<dyn Driver>> {
    match kind {
        DriverKind::Relational => Ok(Arc::new(relational::RelationalDriver::new())),
        #[cfg(feature = "mongodb")]
        DriverKind::Document => Ok(Arc::new(document::DocumentDriver::new())),
        #[cfg(not(feature = "mongodb"))]
        DriverKind::Document => Err(crate::Error::Configuration(
            "document backend requires the 'mongodb' feature".to_owned(),
        )),
    }
}
