//! Driver-neutral operation representation.
//!
//! Handles express every database operation in this small IR; the rewriter
//! injects scope predicates into it and each driver lowers it to its native
//! statements. Filters form an AST with explicit `And`/`Or` nodes so the
//! rewriter can reason about conjunct structure instead of string-matching.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A record payload: a JSON object of column → value.
pub type Record = serde_json::Map<String, Value>;

/// Comparison operators supported by filters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Contains,
}

/// A filter tree over record fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Cmp {
        field: String,
        op: CmpOp,
        value: Value,
    },
}

impl Filter {
    /// `field = value` comparison.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Cmp {
            field: field.into(),
            op: CmpOp::Eq,
            value: value.into(),
        }
    }

    /// Arbitrary comparison.
    pub fn cmp(field: impl Into<String>, op: CmpOp, value: impl Into<Value>) -> Self {
        Filter::Cmp {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    #[must_use]
    pub fn and(parts: Vec<Filter>) -> Self {
        Filter::And(parts)
    }

    #[must_use]
    pub fn or(parts: Vec<Filter>) -> Self {
        Filter::Or(parts)
    }

    /// Whether this filter, treated as a conjunct, already constrains
    /// `field`.
    ///
    /// Only comparisons reachable through `And` nodes count: a disjunction
    /// constrains nothing on its own, which is exactly why the rewriter wraps
    /// `Or` trees instead of trusting them.
    #[must_use]
    pub fn binds(&self, field: &str) -> bool {
        match self {
            Filter::Cmp { field: f, .. } => f == field,
            Filter::And(parts) => parts.iter().any(|p| p.binds(field)),
            Filter::Or(_) => false,
        }
    }

    /// Count comparisons on `field` anywhere in the tree (test support for
    /// the exactly-one-binding invariant).
    #[must_use]
    pub fn bindings_of(&self, field: &str) -> usize {
        match self {
            Filter::Cmp { field: f, .. } => usize::from(f == field),
            Filter::And(parts) | Filter::Or(parts) => {
                parts.iter().map(|p| p.bindings_of(field)).sum()
            }
        }
    }
}

/// Sort direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDir {
    Asc,
    Desc,
}

/// Ordering, paging and projection options for find operations.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FindOptions {
    pub order_by: Option<(String, SortDir)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// One database operation, classified the way the rewriter needs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    Create {
        data: Record,
    },
    CreateMany {
        data: Vec<Record>,
    },
    Upsert {
        filter: Filter,
        create: Record,
        update: Record,
    },
    FindFirst {
        filter: Option<Filter>,
        options: FindOptions,
    },
    FindMany {
        filter: Option<Filter>,
        options: FindOptions,
    },
    FindUnique {
        filter: Filter,
    },
    Count {
        filter: Option<Filter>,
    },
    Update {
        filter: Filter,
        data: Record,
    },
    UpdateMany {
        filter: Option<Filter>,
        data: Record,
    },
    Delete {
        filter: Filter,
    },
    DeleteMany {
        filter: Option<Filter>,
    },
}

impl Operation {
    /// Stable operation name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Create { .. } => "create",
            Operation::CreateMany { .. } => "create_many",
            Operation::Upsert { .. } => "upsert",
            Operation::FindFirst { .. } => "find_first",
            Operation::FindMany { .. } => "find_many",
            Operation::FindUnique { .. } => "find_unique",
            Operation::Count { .. } => "count",
            Operation::Update { .. } => "update",
            Operation::UpdateMany { .. } => "update_many",
            Operation::Delete { .. } => "delete",
            Operation::DeleteMany { .. } => "delete_many",
        }
    }

    /// The operation's filter, if this class carries one.
    #[must_use]
    pub fn filter(&self) -> Option<&Filter> {
        match self {
            Operation::Upsert { filter, .. }
            | Operation::FindUnique { filter }
            | Operation::Update { filter, .. }
            | Operation::Delete { filter } => Some(filter),
            Operation::FindFirst { filter, .. }
            | Operation::FindMany { filter, .. }
            | Operation::Count { filter }
            | Operation::UpdateMany { filter, .. }
            | Operation::DeleteMany { filter } => filter.as_ref(),
            Operation::Create { .. } | Operation::CreateMany { .. } => None,
        }
    }
}

/// Result of executing an [`Operation`].
#[derive(Clone, Debug, PartialEq)]
pub enum QueryOutput {
    /// Rows from a find.
    Rows(Vec<Value>),
    /// A single optional row.
    Row(Option<Value>),
    /// A count.
    Count(u64),
    /// Rows affected by a write.
    Affected(u64),
}

impl QueryOutput {
    /// Rows, when this output carries them.
    #[must_use]
    pub fn into_rows(self) -> Vec<Value> {
        match self {
            QueryOutput::Rows(rows) => rows,
            QueryOutput::Row(Some(row)) => vec![row],
            QueryOutput::Row(None) => Vec::new(),
            QueryOutput::Count(_) | QueryOutput::Affected(_) => Vec::new(),
        }
    }

    /// Affected-row or count value, zero otherwise.
    #[must_use]
    pub fn count(&self) -> u64 {
        match self {
            QueryOutput::Count(n) | QueryOutput::Affected(n) => *n,
            QueryOutput::Rows(rows) => rows.len() as u64,
            QueryOutput::Row(row) => u64::from(row.is_some()),
        }
    }
}

// ===================== tests =====================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn binds_sees_through_and_but_not_or() {
        let direct = Filter::eq("tenant_id", "t1");
        assert!(direct.binds("tenant_id"));
        assert!(!direct.binds("status"));

        let conj = Filter::and(vec![
            Filter::eq("status", "A"),
            Filter::and(vec![Filter::eq("tenant_id", "t1")]),
        ]);
        assert!(conj.binds("tenant_id"));

        // A disjunction containing the field does not constrain it.
        let disj = Filter::or(vec![
            Filter::eq("tenant_id", "t1"),
            Filter::eq("status", "A"),
        ]);
        assert!(!disj.binds("tenant_id"));
    }

    #[test]
    fn bindings_are_counted_across_the_whole_tree() {
        let f = Filter::and(vec![
            Filter::eq("tenant_id", "t1"),
            Filter::or(vec![
                Filter::eq("tenant_id", "t2"),
                Filter::eq("status", "A"),
            ]),
        ]);
        assert_eq!(f.bindings_of("tenant_id"), 2);
        assert_eq!(f.bindings_of("status"), 1);
    }

    #[test]
    fn operation_filter_accessor() {
        let op = Operation::FindMany {
            filter: Some(Filter::eq("status", "A")),
            options: FindOptions::default(),
        };
        assert!(op.filter().is_some());
        assert_eq!(op.name(), "find_many");

        let op = Operation::Create {
            data: json!({"email": "x@e"}).as_object().cloned().unwrap_or_default(),
        };
        assert!(op.filter().is_none());
    }
}
