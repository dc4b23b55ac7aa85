//! Scope predicate/column injection.
//!
//! [`ScopeRewriter`] intercepts every operation flowing through a
//! tenant-scoped handle and makes tenant identity an implicit predicate on
//! reads and an implicit column on writes. Application-supplied `where`
//! structure cannot bypass it: disjunctions are wrapped, conjunctions are
//! extended, and write payloads are stamped.

use dashmap::DashSet;

use crate::config::{APP_COLUMN, TENANT_COLUMN};
use crate::ident::{AppId, TenantId};
use crate::query::{Filter, Operation, Record};

/// Rewrites operations so they are confined to one tenant (and optionally
/// one app).
///
/// One rewriter is bound per scoped handle. Models that lack the tenant
/// column are passed through untouched and warn-logged once per model; such
/// models are reached deliberately via a non-tenant-scoped handle.
#[derive(Debug)]
pub struct ScopeRewriter {
    tenant: TenantId,
    app: Option<AppId>,
    unscoped_models: DashSet<String>,
}

impl ScopeRewriter {
    #[must_use]
    pub fn new(tenant: TenantId, app: Option<AppId>) -> Self {
        Self {
            tenant,
            app,
            unscoped_models: DashSet::new(),
        }
    }

    #[must_use]
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// Rewrite one operation against `model`.
    ///
    /// `tenant_capable` reports whether the model carries the tenant column
    /// (the driver knows; collections in schemaless backends always do).
    #[must_use]
    pub fn rewrite(&self, model: &str, op: Operation, tenant_capable: bool) -> Operation {
        if !tenant_capable {
            if self.unscoped_models.insert(model.to_owned()) {
                tracing::warn!(
                    model,
                    tenant = %self.tenant,
                    "model has no tenant column; operations pass through unscoped"
                );
            }
            return op;
        }

        match op {
            Operation::Create { mut data } => {
                self.stamp(&mut data);
                Operation::Create { data }
            }
            Operation::CreateMany { mut data } => {
                for record in &mut data {
                    self.stamp(record);
                }
                Operation::CreateMany { data }
            }
            Operation::Upsert {
                filter,
                mut create,
                mut update,
            } => {
                self.stamp(&mut create);
                self.guard_write_payload(&mut update);
                Operation::Upsert {
                    filter: self.compose(Some(filter)),
                    create,
                    update,
                }
            }
            Operation::FindFirst { filter, options } => Operation::FindFirst {
                filter: Some(self.compose(filter)),
                options,
            },
            Operation::FindMany { filter, options } => Operation::FindMany {
                filter: Some(self.compose(filter)),
                options,
            },
            Operation::FindUnique { filter } => Operation::FindUnique {
                filter: self.compose(Some(filter)),
            },
            Operation::Count { filter } => Operation::Count {
                filter: Some(self.compose(filter)),
            },
            Operation::Update { filter, mut data } => {
                self.guard_write_payload(&mut data);
                Operation::Update {
                    filter: self.compose(Some(filter)),
                    data,
                }
            }
            Operation::UpdateMany { filter, mut data } => {
                self.guard_write_payload(&mut data);
                Operation::UpdateMany {
                    filter: Some(self.compose(filter)),
                    data,
                }
            }
            Operation::Delete { filter } => Operation::Delete {
                filter: self.compose(Some(filter)),
            },
            Operation::DeleteMany { filter } => Operation::DeleteMany {
                filter: Some(self.compose(filter)),
            },
        }
    }

    /// Compose the scope predicate into an optional `where` tree.
    ///
    /// Rules, in order:
    /// 1. an `And` list gets the tenant conjunct appended unless one of its
    ///    conjuncts already binds the tenant column;
    /// 2. an `Or` list is wrapped: `And [ tenant, Or(...) ]` — a disjunction
    ///    without an enveloping tenant constraint is the prime leakage path;
    /// 3. anything else becomes a top-level conjunct with the tenant
    ///    predicate, unless it already binds the column.
    fn compose(&self, filter: Option<Filter>) -> Filter {
        match filter {
            None => Filter::And(self.scope_conjuncts()),
            Some(Filter::And(mut parts)) => {
                for conjunct in self.scope_conjuncts() {
                    let col = conjunct_column(&conjunct);
                    if !parts.iter().any(|p| p.binds(col)) {
                        parts.push(conjunct);
                    }
                }
                Filter::And(parts)
            }
            Some(or @ Filter::Or(_)) => {
                let mut parts = self.scope_conjuncts();
                parts.push(or);
                Filter::And(parts)
            }
            Some(other) => {
                let mut parts: Vec<Filter> = self
                    .scope_conjuncts()
                    .into_iter()
                    .filter(|c| !other.binds(conjunct_column(c)))
                    .collect();
                if parts.is_empty() {
                    other
                } else {
                    parts.push(other);
                    Filter::And(parts)
                }
            }
        }
    }

    fn scope_conjuncts(&self) -> Vec<Filter> {
        let mut parts = vec![Filter::eq(TENANT_COLUMN, self.tenant.as_str())];
        if let Some(app) = &self.app {
            parts.push(Filter::eq(APP_COLUMN, app.as_str()));
        }
        parts
    }

    /// Stamp scope columns onto a create payload, overwriting whatever the
    /// application supplied, and inherit the scope into nested relation
    /// writes.
    fn stamp(&self, record: &mut Record) {
        record.insert(
            TENANT_COLUMN.to_owned(),
            serde_json::Value::String(self.tenant.as_str().to_owned()),
        );
        if let Some(app) = &self.app {
            record.insert(
                APP_COLUMN.to_owned(),
                serde_json::Value::String(app.as_str().to_owned()),
            );
        }
        self.stamp_nested(record);
    }

    /// Nested relation writes (`{ posts: { create: ... } }`,
    /// `{ posts: { create_many: { data: [...] } } }`) inherit the same
    /// tenant.
    fn stamp_nested(&self, record: &mut Record) {
        for value in record.values_mut() {
            let Some(relation) = value.as_object_mut() else {
                continue;
            };
            if let Some(nested) = relation.get_mut("create") {
                self.stamp_value(nested);
            }
            // `create_many` style carries a `data` array one level down.
            for key in ["createMany", "create_many"] {
                if let Some(serde_json::Value::Object(wrapper)) = relation.get_mut(key)
                    && let Some(data) = wrapper.get_mut("data")
                {
                    self.stamp_value(data);
                }
            }
        }
    }

    fn stamp_value(&self, value: &mut serde_json::Value) {
        match value {
            serde_json::Value::Object(record) => self.stamp(record),
            serde_json::Value::Array(items) => {
                for item in items {
                    if let serde_json::Value::Object(record) = item {
                        self.stamp(record);
                    }
                }
            }
            _ => {}
        }
    }

    /// Update payloads may not move rows across scopes: a supplied scope
    /// column is forced back to the handle's value, but nothing is added
    /// when absent (the predicate already confines the rows).
    fn guard_write_payload(&self, record: &mut Record) {
        if record.contains_key(TENANT_COLUMN) {
            record.insert(
                TENANT_COLUMN.to_owned(),
                serde_json::Value::String(self.tenant.as_str().to_owned()),
            );
        }
        if let Some(app) = &self.app
            && record.contains_key(APP_COLUMN)
        {
            record.insert(
                APP_COLUMN.to_owned(),
                serde_json::Value::String(app.as_str().to_owned()),
            );
        }
    }
}

fn conjunct_column(filter: &Filter) -> &str {
    match filter {
        Filter::Cmp { field, .. } => field,
        Filter::And(_) | Filter::Or(_) => TENANT_COLUMN,
    }
}

// ===================== tests =====================
