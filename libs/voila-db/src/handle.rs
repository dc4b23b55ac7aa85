//! Scoped database handles.
//!
//! A [`ScopedDb`] is a driver client wrapped so that every operation honors
//! the scope it was opened with. The rewriter sits between the model surface
//! and the driver; raw queries bypass it only through the explicitly-named
//! `raw_*` methods.

use std::sync::Arc;

use serde_json::Value;

use crate::config::TENANT_COLUMN;
use crate::driver::DriverClient;
use crate::ident::ScopeKey;
use crate::query::{Filter, FindOptions, Operation, QueryOutput, Record, SortDir};
use crate::rewrite::ScopeRewriter;
use crate::{Error, Result};

/// A database handle confined to one scope.
///
/// Cloning is cheap and clones share the underlying client; the connection
/// cache owns the client's lifetime, so [`ScopedDb::close`] is a no-op.
#[derive(Clone)]
pub struct ScopedDb {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    client: Arc<dyn DriverClient>,
    rewriter: Option<Arc<ScopeRewriter>>,
    scope: ScopeKey,
    vectors_enabled: bool,
}

impl ScopedDb {
    /// Interpose `rewriter` (when present) between callers and `client`.
    /// This is the driver's interception hook: every model operation passes
    /// through the rewriter before it reaches the backend.
    pub(crate) fn intercept(
        client: Arc<dyn DriverClient>,
        rewriter: Option<Arc<ScopeRewriter>>,
        scope: ScopeKey,
        vectors_enabled: bool,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                client,
                rewriter,
                scope,
                vectors_enabled,
            }),
        }
    }

    /// The scope this handle serves.
    #[must_use]
    pub fn scope(&self) -> &ScopeKey {
        &self.inner.scope
    }

    /// URL of the underlying client (test and diagnostics support).
    #[must_use]
    pub fn url(&self) -> &str {
        self.inner.client.url()
    }

    /// Operations on one model (table or collection).
    #[must_use]
    pub fn model(&self, name: impl Into<String>) -> ModelOps {
        ModelOps {
            handle: self.clone(),
            model: name.into(),
        }
    }

    /// Raw read-only query. Bypasses scope rewriting by design; callers make
    /// this choice explicitly by reaching for the `raw_` name.
    ///
    /// # Errors
    /// Backend errors propagate unchanged.
    pub async fn raw_query(&self, query: &str) -> Result<Vec<Value>> {
        self.inner.client.query_raw(query).await
    }

    /// Raw statement execution. Bypasses scope rewriting by design.
    ///
    /// # Errors
    /// Backend errors propagate unchanged.
    pub async fn raw_execute(&self, query: &str) -> Result<u64> {
        self.inner.client.execute_raw(query).await
    }

    /// Vector operations namespace over the same backing client.
    ///
    /// # Errors
    /// Returns [`Error::ApiUsage`] unless `VOILA_DB_VECTORS` is enabled.
    pub fn vectors(&self) -> Result<VectorOps> {
        if !self.inner.vectors_enabled {
            return Err(Error::ApiUsage(
                "vector operations are disabled; set VOILA_DB_VECTORS=true to enable them"
                    .to_owned(),
            ));
        }
        Ok(VectorOps {
            handle: self.clone(),
        })
    }

    /// No-op: the connection cache owns the client lifetime. Present so
    /// application code holding a handle can be lifecycle-symmetric.
    pub fn close(&self) {}

    pub(crate) fn client(&self) -> &Arc<dyn DriverClient> {
        &self.inner.client
    }

    pub(crate) async fn execute(&self, model: &str, op: Operation) -> Result<QueryOutput> {
        let op = match &self.inner.rewriter {
            Some(rewriter) => {
                let capable = self.inner.client.has_column(model, TENANT_COLUMN).await?;
                rewriter.rewrite(model, op, capable)
            }
            None => op,
        };
        self.inner.client.execute(model, op).await
    }
}

impl std::fmt::Debug for ScopedDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedDb")
            .field("scope", &self.inner.scope.to_string())
            .field("scoped", &self.inner.rewriter.is_some())
            .finish_non_exhaustive()
    }
}

/// Model-level operation surface mirroring the underlying driver.
#[derive(Clone, Debug)]
pub struct ModelOps {
    handle: ScopedDb,
    model: String,
}

impl ModelOps {
    /// Insert one record; returns it as persisted (scope columns included).
    ///
    /// # Errors
    /// [`Error::ApiUsage`] for non-object payloads; backend errors unchanged.
    pub async fn create(&self, data: Value) -> Result<Value> {
        let out = self
            .handle
            .execute(&self.model, Operation::Create {
                data: to_record(data)?,
            })
            .await?;
        match out {
            QueryOutput::Row(Some(row)) => Ok(row),
            other => Ok(Value::from(other.count())),
        }
    }

    /// Insert many records; returns the inserted count.
    ///
    /// # Errors
    /// [`Error::ApiUsage`] for non-object payloads; backend errors unchanged.
    pub async fn create_many(&self, data: Vec<Value>) -> Result<u64> {
        let data = data.into_iter().map(to_record).collect::<Result<Vec<_>>>()?;
        let out = self
            .handle
            .execute(&self.model, Operation::CreateMany { data })
            .await?;
        Ok(out.count())
    }

    /// Start a find-many query.
    #[must_use]
    pub fn find_many(&self) -> FindQuery {
        FindQuery {
            ops: self.clone(),
            filter: None,
            options: FindOptions::default(),
        }
    }

    /// Find a single record by a (presumed unique) filter.
    ///
    /// # Errors
    /// Backend errors propagate unchanged.
    pub async fn find_unique(&self, filter: Filter) -> Result<Option<Value>> {
        let out = self
            .handle
            .execute(&self.model, Operation::FindUnique { filter })
            .await?;
        match out {
            QueryOutput::Row(row) => Ok(row),
            other => Ok(other.into_rows().into_iter().next()),
        }
    }

    /// Count records matching `filter`.
    ///
    /// # Errors
    /// Backend errors propagate unchanged.
    pub async fn count(&self, filter: Option<Filter>) -> Result<u64> {
        let out = self
            .handle
            .execute(&self.model, Operation::Count { filter })
            .await?;
        Ok(out.count())
    }

    /// Update the records matching `filter`.
    ///
    /// # Errors
    /// [`Error::ApiUsage`] for non-object payloads; backend errors unchanged.
    pub async fn update(&self, filter: Filter, data: Value) -> Result<u64> {
        let out = self
            .handle
            .execute(&self.model, Operation::Update {
                filter,
                data: to_record(data)?,
            })
            .await?;
        Ok(out.count())
    }

    /// Update all records matching an optional `filter`.
    ///
    /// # Errors
    /// [`Error::ApiUsage`] for non-object payloads; backend errors unchanged.
    pub async fn update_many(&self, filter: Option<Filter>, data: Value) -> Result<u64> {
        let out = self
            .handle
            .execute(&self.model, Operation::UpdateMany {
                filter,
                data: to_record(data)?,
            })
            .await?;
        Ok(out.count())
    }

    /// Update-or-insert against `filter`.
    ///
    /// # Errors
    /// [`Error::ApiUsage`] for non-object payloads; backend errors unchanged.
    pub async fn upsert(&self, filter: Filter, create: Value, update: Value) -> Result<u64> {
        let out = self
            .handle
            .execute(&self.model, Operation::Upsert {
                filter,
                create: to_record(create)?,
                update: to_record(update)?,
            })
            .await?;
        Ok(out.count())
    }

    /// Delete one record matching `filter`.
    ///
    /// # Errors
    /// Backend errors propagate unchanged.
    pub async fn delete(&self, filter: Filter) -> Result<u64> {
        let out = self
            .handle
            .execute(&self.model, Operation::Delete { filter })
            .await?;
        Ok(out.count())
    }

    /// Delete all records matching an optional `filter`.
    ///
    /// # Errors
    /// Backend errors propagate unchanged.
    pub async fn delete_many(&self, filter: Option<Filter>) -> Result<u64> {
        let out = self
            .handle
            .execute(&self.model, Operation::DeleteMany { filter })
            .await?;
        Ok(out.count())
    }
}

/// Builder for find queries.
#[derive(Clone, Debug)]
pub struct FindQuery {
    ops: ModelOps,
    filter: Option<Filter>,
    options: FindOptions,
}

impl FindQuery {
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>, dir: SortDir) -> Self {
        self.options.order_by = Some((field.into(), dir));
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.options.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.options.offset = Some(offset);
        self
    }

    /// Execute and return all matching rows.
    ///
    /// # Errors
    /// Backend errors propagate unchanged.
    pub async fn all(self) -> Result<Vec<Value>> {
        let out = self
            .ops
            .handle
            .execute(&self.ops.model, Operation::FindMany {
                filter: self.filter,
                options: self.options,
            })
            .await?;
        Ok(out.into_rows())
    }

    /// Execute and return the first matching row.
    ///
    /// # Errors
    /// Backend errors propagate unchanged.
    pub async fn first(self) -> Result<Option<Value>> {
        let out = self
            .ops
            .handle
            .execute(&self.ops.model, Operation::FindFirst {
                filter: self.filter,
                options: self.options,
            })
            .await?;
        match out {
            QueryOutput::Row(row) => Ok(row),
            other => Ok(other.into_rows().into_iter().next()),
        }
    }
}

/// Vector operations over the same backing client, exposed behind the
/// `VOILA_DB_VECTORS` gate. Raw passthrough only: similarity search syntax
/// is backend-specific.
#[derive(Clone, Debug)]
pub struct VectorOps {
    handle: ScopedDb,
}

impl VectorOps {
    /// Run a backend-native vector query.
    ///
    /// # Errors
    /// Backend errors propagate unchanged.
    pub async fn search_raw(&self, query: &str) -> Result<Vec<Value>> {
        self.handle.raw_query(query).await
    }
}

fn to_record(value: Value) -> Result<Record> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(Error::ApiUsage(format!(
            "record payload must be a JSON object, got {}",
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
