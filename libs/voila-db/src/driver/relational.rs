//! Relational driver over `SQLx`/`SeaORM`.
//!
//! Operations are lowered to dynamically-built `sea_query` statements, so the
//! driver works against arbitrary user tables without compiled entities.
//! Rows surface as JSON values. The raw `SQLx` pool is kept alongside the
//! `SeaORM` connection so eviction can close it by reference.

#![cfg_attr(
    not(any(feature = "pg", feature = "mysql", feature = "sqlite")),
    allow(unused_imports, unused_variables, dead_code, unreachable_code)
)]

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use sea_orm::sea_query::{Alias, Asterisk, Condition, Expr, Order, Query, SimpleExpr};
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DbBackend, FromQueryResult, JsonValue, Statement,
    TransactionTrait,
};
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::query::{CmpOp, Filter, FindOptions, Operation, QueryOutput, Record, SortDir};
use crate::urls::{redact_credentials, DriverKind};
use crate::{Error, Result};

#[cfg(feature = "mysql")]
use sea_orm::SqlxMySqlConnector;
#[cfg(feature = "pg")]
use sea_orm::SqlxPostgresConnector;
#[cfg(feature = "sqlite")]
use sea_orm::SqlxSqliteConnector;

#[cfg(feature = "mysql")]
use sqlx::mysql::MySqlPoolOptions;
#[cfg(feature = "pg")]
use sqlx::postgres::PgPoolOptions;
#[cfg(feature = "sqlite")]
use sqlx::sqlite::SqlitePoolOptions;
#[cfg(feature = "sqlite")]
use std::str::FromStr;

use std::time::Duration;

const DEFAULT_MAX_CONNS: u32 = 10;
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Supported engines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DbEngine {
    Postgres,
    MySql,
    Sqlite,
}

/// Detect engine by DSN scheme prefix.
///
/// # Errors
/// Returns [`Error::InvalidUrl`] for unrecognized schemes.
pub fn detect_engine(url: &str) -> Result<DbEngine> {
    let s = url.trim_start();
    if s.starts_with("postgres://") || s.starts_with("postgresql://") {
        Ok(DbEngine::Postgres)
    } else if s.starts_with("mysql://") {
        Ok(DbEngine::MySql)
    } else if s.starts_with("sqlite:") {
        Ok(DbEngine::Sqlite)
    } else {
        Err(Error::InvalidUrl {
            url: redact_credentials(url),
            reason: "not a relational scheme".to_owned(),
        })
    }
}

/// Pool handle kept alongside the `SeaORM` connection for by-ref close.
#[derive(Clone, Debug)]
enum DbPool {
    #[cfg(feature = "pg")]
    Postgres(sqlx::PgPool),
    #[cfg(feature = "mysql")]
    MySql(sqlx::MySqlPool),
    #[cfg(feature = "sqlite")]
    Sqlite(sqlx::SqlitePool),
}

impl DbPool {
    async fn close(&self) {
        #[cfg(any(feature = "pg", feature = "mysql", feature = "sqlite"))]
        match self {
            #[cfg(feature = "pg")]
            DbPool::Postgres(pool) => pool.close().await,
            #[cfg(feature = "mysql")]
            DbPool::MySql(pool) => pool.close().await,
            #[cfg(feature = "sqlite")]
            DbPool::Sqlite(pool) => pool.close().await,
        }
    }
}

/// Per-URL client cache with single-flight construction.
pub struct RelationalDriver {
    clients: DashMap<String, Arc<OnceCell<Arc<RelationalClient>>>>,
}

impl RelationalDriver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }
}

impl Default for RelationalDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl super::Driver for RelationalDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Relational
    }

    async fn client(&self, url: &str) -> Result<Arc<dyn super::DriverClient>> {
        let cell = self
            .clients
            .entry(url.to_owned())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        let client = cell
            .get_or_try_init(|| async {
                tracing::debug!(url = redact_credentials(url), "opening relational client");
                RelationalClient::connect(url).await.map(Arc::new)
            })
            .await?
            .clone();
        Ok(client)
    }

    async fn release(&self, url: &str) {
        if let Some((_, cell)) = self.clients.remove(url)
            && let Some(client) = cell.get()
        {
            client.close_pool().await;
        }
    }

    async fn release_all(&self) {
        let cells: Vec<_> = self.clients.iter().map(|e| e.value().clone()).collect();
        self.clients.clear();
        for cell in cells {
            if let Some(client) = cell.get() {
                client.close_pool().await;
            }
        }
    }
}

/// One connected relational database.
pub struct RelationalClient {
    engine: DbEngine,
    url: String,
    pool: DbPool,
    conn: DatabaseConnection,
    column_cache: DashMap<(String, String), bool>,
}

impl RelationalClient {
    /// Connect eagerly and build the client.
    ///
    /// # Errors
    /// Returns the pool's connect error, or a feature/scheme error.
    pub async fn connect(url: &str) -> Result<Self> {
        let engine = detect_engine(url)?;
        let (pool, conn) = match engine {
            #[cfg(feature = "pg")]
            DbEngine::Postgres => {
                let pool = PgPoolOptions::new()
                    .max_connections(DEFAULT_MAX_CONNS)
                    .acquire_timeout(DEFAULT_ACQUIRE_TIMEOUT)
                    .connect(url)
                    .await?;
                let conn = SqlxPostgresConnector::from_sqlx_postgres_pool(pool.clone());
                (DbPool::Postgres(pool), conn)
            }
            #[cfg(not(feature = "pg"))]
            DbEngine::Postgres => {
                return Err(Error::Configuration(
                    "PostgreSQL feature not enabled".to_owned(),
                ));
            }
            #[cfg(feature = "mysql")]
            DbEngine::MySql => {
                let pool = MySqlPoolOptions::new()
                    .max_connections(DEFAULT_MAX_CONNS)
                    .acquire_timeout(DEFAULT_ACQUIRE_TIMEOUT)
                    .connect(url)
                    .await?;
                let conn = SqlxMySqlConnector::from_sqlx_mysql_pool(pool.clone());
                (DbPool::MySql(pool), conn)
            }
            #[cfg(not(feature = "mysql"))]
            DbEngine::MySql => {
                return Err(Error::Configuration("MySQL feature not enabled".to_owned()));
            }
            #[cfg(feature = "sqlite")]
            DbEngine::Sqlite => {
                let opts = sqlx::sqlite::SqliteConnectOptions::from_str(url)?
                    .create_if_missing(true);
                // A pooled `:memory:` database would be one database per
                // connection; confine it to a single connection.
                let max_conns = if is_memory_url(url) {
                    1
                } else {
                    DEFAULT_MAX_CONNS
                };
                let pool = SqlitePoolOptions::new()
                    .max_connections(max_conns)
                    .acquire_timeout(DEFAULT_ACQUIRE_TIMEOUT)
                    .connect_with(opts)
                    .await?;
                let conn = SqlxSqliteConnector::from_sqlx_sqlite_pool(pool.clone());
                (DbPool::Sqlite(pool), conn)
            }
            #[cfg(not(feature = "sqlite"))]
            DbEngine::Sqlite => {
                return Err(Error::Configuration(
                    "SQLite feature not enabled".to_owned(),
                ));
            }
        };

        Ok(Self {
            engine,
            url: url.to_owned(),
            pool,
            conn,
            column_cache: DashMap::new(),
        })
    }

    #[must_use]
    pub fn engine(&self) -> DbEngine {
        self.engine
    }

    fn backend(&self) -> DbBackend {
        self.conn.get_database_backend()
    }

    async fn close_pool(&self) {
        self.pool.close().await;
    }

    async fn select(&self, stmt: Statement) -> Result<Vec<Value>> {
        Ok(JsonValue::find_by_statement(stmt).all(&self.conn).await?)
    }

    async fn run_select(
        &self,
        table: &str,
        filter: Option<&Filter>,
        options: &FindOptions,
    ) -> Result<Vec<Value>> {
        let mut query = Query::select();
        query.column(Asterisk).from(Alias::new(table));
        if let Some(filter) = filter {
            query.cond_where(lower_filter(filter));
        }
        if let Some((field, dir)) = &options.order_by {
            let order = match dir {
                SortDir::Asc => Order::Asc,
                SortDir::Desc => Order::Desc,
            };
            query.order_by(Alias::new(field), order);
        }
        if let Some(limit) = options.limit {
            query.limit(limit);
        }
        if let Some(offset) = options.offset {
            query.offset(offset);
        }
        self.select(self.backend().build(&query)).await
    }

    async fn run_count(&self, table: &str, filter: Option<&Filter>) -> Result<u64> {
        let mut query = Query::select();
        query
            .expr_as(Expr::cust("COUNT(*)"), Alias::new("cnt"))
            .from(Alias::new(table));
        if let Some(filter) = filter {
            query.cond_where(lower_filter(filter));
        }
        let rows = self.select(self.backend().build(&query)).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("cnt"))
            .and_then(Value::as_u64)
            .unwrap_or_default())
    }

    async fn run_insert<C>(&self, runner: &C, table: &str, record: &Record) -> Result<u64>
    where
        C: ConnectionTrait,
    {
        let mut query = Query::insert();
        query.into_table(Alias::new(table));
        let mut columns = Vec::with_capacity(record.len());
        let mut values: Vec<SimpleExpr> = Vec::with_capacity(record.len());
        for (column, value) in record {
            columns.push(Alias::new(column));
            values.push(sql_value(value).into());
        }
        query.columns(columns);
        query
            .values(values)
            .map_err(|e| Error::Other(anyhow::anyhow!("insert build failed: {e}")))?;
        let res = runner.execute(self.backend().build(&query)).await?;
        Ok(res.rows_affected())
    }

    async fn run_update<C>(
        &self,
        runner: &C,
        table: &str,
        filter: &Filter,
        record: &Record,
    ) -> Result<u64>
    where
        C: ConnectionTrait,
    {
        if record.is_empty() {
            return Ok(0);
        }
        let mut query = Query::update();
        query.table(Alias::new(table));
        for (column, value) in record {
            query.value(Alias::new(column), sql_value(value));
        }
        query.cond_where(lower_filter(filter));
        let res = runner.execute(self.backend().build(&query)).await?;
        Ok(res.rows_affected())
    }

    async fn run_delete<C>(&self, runner: &C, table: &str, filter: Option<&Filter>) -> Result<u64>
    where
        C: ConnectionTrait,
    {
        let mut query = Query::delete();
        query.from_table(Alias::new(table));
        if let Some(filter) = filter {
            query.cond_where(lower_filter(filter));
        }
        let res = runner.execute(self.backend().build(&query)).await?;
        Ok(res.rows_affected())
    }
}

#[async_trait]
impl super::DriverClient for RelationalClient {
    fn url(&self) -> &str {
        &self.url
    }

    async fn execute(&self, table: &str, op: Operation) -> Result<QueryOutput> {
        match op {
            Operation::Create { data } => {
                self.run_insert(&self.conn, table, &data).await?;
                Ok(QueryOutput::Row(Some(Value::Object(data))))
            }
            Operation::CreateMany { data } => {
                let txn = self.conn.begin().await?;
                let mut affected = 0;
                for record in &data {
                    affected += self.run_insert(&txn, table, record).await?;
                }
                txn.commit().await?;
                Ok(QueryOutput::Affected(affected))
            }
            Operation::Upsert {
                filter,
                create,
                update,
            } => {
                let txn = self.conn.begin().await?;
                let updated = self.run_update(&txn, table, &filter, &update).await?;
                let affected = if updated == 0 {
                    self.run_insert(&txn, table, &create).await?
                } else {
                    updated
                };
                txn.commit().await?;
                Ok(QueryOutput::Affected(affected))
            }
            Operation::FindFirst { filter, options } => {
                let options = FindOptions {
                    limit: Some(1),
                    ..options
                };
                let mut rows = self.run_select(table, filter.as_ref(), &options).await?;
                Ok(QueryOutput::Row(rows.drain(..).next()))
            }
            Operation::FindMany { filter, options } => {
                let rows = self.run_select(table, filter.as_ref(), &options).await?;
                Ok(QueryOutput::Rows(rows))
            }
            Operation::FindUnique { filter } => {
                let options = FindOptions {
                    limit: Some(1),
                    ..FindOptions::default()
                };
                let mut rows = self.run_select(table, Some(&filter), &options).await?;
                Ok(QueryOutput::Row(rows.drain(..).next()))
            }
            Operation::Count { filter } => {
                Ok(QueryOutput::Count(self.run_count(table, filter.as_ref()).await?))
            }
            Operation::Update { filter, data } => Ok(QueryOutput::Affected(
                self.run_update(&self.conn, table, &filter, &data).await?,
            )),
            Operation::UpdateMany { filter, data } => {
                let filter = filter.unwrap_or(Filter::And(Vec::new()));
                Ok(QueryOutput::Affected(
                    self.run_update(&self.conn, table, &filter, &data).await?,
                ))
            }
            Operation::Delete { filter } => Ok(QueryOutput::Affected(
                self.run_delete(&self.conn, table, Some(&filter)).await?,
            )),
            Operation::DeleteMany { filter } => Ok(QueryOutput::Affected(
                self.run_delete(&self.conn, table, filter.as_ref()).await?,
            )),
        }
    }

    async fn query_raw(&self, query: &str) -> Result<Vec<Value>> {
        let stmt = Statement::from_string(self.backend(), query.to_owned());
        self.select(stmt).await
    }

    async fn execute_raw(&self, query: &str) -> Result<u64> {
        let stmt = Statement::from_string(self.backend(), query.to_owned());
        let res = self.conn.execute(stmt).await?;
        Ok(res.rows_affected())
    }

    async fn has_column(&self, table: &str, column: &str) -> Result<bool> {
        let key = (table.to_owned(), column.to_owned());
        if let Some(known) = self.column_cache.get(&key) {
            return Ok(*known);
        }
        let sql = match self.engine {
            DbEngine::Sqlite => {
                "SELECT COUNT(*) AS cnt FROM pragma_table_info(?) WHERE name = ?"
            }
            DbEngine::Postgres => {
                "SELECT COUNT(*) AS cnt FROM information_schema.columns \
                 WHERE table_schema = 'public' AND table_name = $1 AND column_name = $2"
            }
            DbEngine::MySql => {
                "SELECT COUNT(*) AS cnt FROM information_schema.columns \
                 WHERE table_schema = DATABASE() AND table_name = ? AND column_name = ?"
            }
        };
        let stmt = Statement::from_sql_and_values(
            self.backend(),
            sql,
            [table.into(), column.into()],
        );
        let rows = self.select(stmt).await?;
        let present = rows
            .first()
            .and_then(|row| row.get("cnt"))
            .and_then(Value::as_u64)
            .unwrap_or_default()
            > 0;
        self.column_cache.insert(key, present);
        Ok(present)
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let sql = match self.engine {
            DbEngine::Sqlite => {
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%'"
            }
            DbEngine::Postgres => {
                "SELECT table_name AS name FROM information_schema.tables \
                 WHERE table_schema = 'public' AND table_type = 'BASE TABLE'"
            }
            DbEngine::MySql => {
                "SELECT table_name AS name FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE'"
            }
        };
        let rows = self
            .select(Statement::from_string(self.backend(), sql.to_owned()))
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("name").and_then(Value::as_str))
            .map(str::to_owned)
            .collect())
    }

    async fn distinct_values(&self, table: &str, column: &str) -> Result<Vec<String>> {
        let mut query = Query::select();
        query
            .column(Alias::new(column))
            .distinct()
            .from(Alias::new(table));
        let rows = self.select(self.backend().build(&query)).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get(column).and_then(Value::as_str))
            .map(str::to_owned)
            .collect())
    }

    async fn purge_rows(&self, tables: &[String], filter: &Filter) -> Result<u64> {
        let txn = self.conn.begin().await?;
        let mut affected = 0;
        for table in tables {
            affected += self.run_delete(&txn, table, Some(filter)).await?;
        }
        txn.commit().await?;
        Ok(affected)
    }

    async fn close(&self) {
        self.close_pool().await;
    }
}

impl std::fmt::Debug for RelationalClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationalClient")
            .field("engine", &self.engine)
            .field("url", &redact_credentials(&self.url))
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "sqlite")]
fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Lower the filter AST to a `sea_query` condition tree.
fn lower_filter(filter: &Filter) -> Condition {
    match filter {
        Filter::And(parts) => parts
            .iter()
            .fold(Condition::all(), |cond, part| cond.add(lower_filter(part))),
        Filter::Or(parts) => parts
            .iter()
            .fold(Condition::any(), |cond, part| cond.add(lower_filter(part))),
        Filter::Cmp { field, op, value } => Condition::all().add(lower_cmp(field, *op, value)),
    }
}

fn lower_cmp(field: &str, op: CmpOp, value: &Value) -> SimpleExpr {
    let col = Expr::col(Alias::new(field));
    match (op, value) {
        (CmpOp::Eq, Value::Null) => col.is_null(),
        (CmpOp::Ne, Value::Null) => col.is_not_null(),
        (CmpOp::Eq, v) => col.eq(sql_value(v)),
        (CmpOp::Ne, v) => col.ne(sql_value(v)),
        (CmpOp::Gt, v) => col.gt(sql_value(v)),
        (CmpOp::Gte, v) => col.gte(sql_value(v)),
        (CmpOp::Lt, v) => col.lt(sql_value(v)),
        (CmpOp::Lte, v) => col.lte(sql_value(v)),
        (CmpOp::In, Value::Array(items)) => col.is_in(items.iter().map(sql_value)),
        (CmpOp::In, v) => col.is_in([sql_value(v)]),
        (CmpOp::Contains, v) => {
            let needle = v.as_str().map_or_else(|| v.to_string(), str::to_owned);
            col.like(format!("%{needle}%"))
        }
    }
}

/// JSON value → SQL value. Arrays/objects are stored as their JSON text.
fn sql_value(value: &Value) -> sea_orm::sea_query::Value {
    match value {
        Value::Null => sea_orm::sea_query::Value::String(None),
        Value::Bool(b) => (*b).into(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.into()
            } else {
                n.as_f64().unwrap_or_default().into()
            }
        }
        Value::String(s) => s.clone().into(),
        other => other.to_string().into(),
    }
}

// ===================== tests =====================

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::driver::DriverClient;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap_or_default()
    }

    async fn client_with_users() -> RelationalClient {
        let client = RelationalClient::connect("sqlite::memory:").await.unwrap();
        client
            .execute_raw(
                "CREATE TABLE users (\
                   id INTEGER PRIMARY KEY AUTOINCREMENT, \
                   tenant_id TEXT, \
                   email TEXT, \
                   status TEXT)",
            )
            .await
            .unwrap();
        client
    }

    #[tokio::test]
    async fn connect_detects_engine() {
        let client = RelationalClient::connect("sqlite::memory:").await.unwrap();
        assert_eq!(client.engine(), DbEngine::Sqlite);
        assert!(detect_engine("postgres://h/db").is_ok());
        assert!(detect_engine("mongodb://h/db").is_err());
    }

    #[tokio::test]
    async fn insert_and_select_round_trip() {
        let client = client_with_users().await;
        let out = client
            .execute(
                "users",
                Operation::Create {
                    data: record(json!({"tenant_id": "a", "email": "x@e", "status": "A"})),
                },
            )
            .await
            .unwrap();
        assert!(matches!(out, QueryOutput::Row(Some(_))));

        let out = client
            .execute(
                "users",
                Operation::FindMany {
                    filter: Some(Filter::eq("tenant_id", "a")),
                    options: FindOptions::default(),
                },
            )
            .await
            .unwrap();
        let rows = out.into_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["email"], json!("x@e"));
    }

    #[tokio::test]
    async fn or_filters_lower_correctly() {
        let client = client_with_users().await;
        client
            .execute(
                "users",
                Operation::CreateMany {
                    data: vec![
                        record(json!({"tenant_id": "a", "status": "A"})),
                        record(json!({"tenant_id": "a", "status": "B"})),
                        record(json!({"tenant_id": "a", "status": "C"})),
                        record(json!({"tenant_id": "b", "status": "A"})),
                    ],
                },
            )
            .await
            .unwrap();

        // AND [tenant_id = a, OR [status = A, status = B]]
        let filter = Filter::and(vec![
            Filter::eq("tenant_id", "a"),
            Filter::or(vec![Filter::eq("status", "A"), Filter::eq("status", "B")]),
        ]);
        let out = client
            .execute(
                "users",
                Operation::Count {
                    filter: Some(filter),
                },
            )
            .await
            .unwrap();
        assert_eq!(out.count(), 2);
    }

    #[tokio::test]
    async fn update_delete_and_upsert() {
        let client = client_with_users().await;
        client
            .execute(
                "users",
                Operation::Create {
                    data: record(json!({"tenant_id": "a", "email": "x@e", "status": "A"})),
                },
            )
            .await
            .unwrap();

        let out = client
            .execute(
                "users",
                Operation::Update {
                    filter: Filter::eq("email", "x@e"),
                    data: record(json!({"status": "B"})),
                },
            )
            .await
            .unwrap();
        assert_eq!(out.count(), 1);

        // Upsert on a missing row inserts the create payload.
        let out = client
            .execute(
                "users",
                Operation::Upsert {
                    filter: Filter::eq("email", "new@e"),
                    create: record(json!({"tenant_id": "a", "email": "new@e", "status": "N"})),
                    update: record(json!({"status": "U"})),
                },
            )
            .await
            .unwrap();
        assert_eq!(out.count(), 1);

        // Upsert on an existing row updates it.
        client
            .execute(
                "users",
                Operation::Upsert {
                    filter: Filter::eq("email", "new@e"),
                    create: record(json!({"tenant_id": "a", "email": "new@e"})),
                    update: record(json!({"status": "U"})),
                },
            )
            .await
            .unwrap();
        let row = client
            .execute(
                "users",
                Operation::FindFirst {
                    filter: Some(Filter::eq("email", "new@e")),
                    options: FindOptions::default(),
                },
            )
            .await
            .unwrap();
        let QueryOutput::Row(Some(row)) = row else {
            panic!("row expected");
        };
        assert_eq!(row["status"], json!("U"));

        let out = client
            .execute(
                "users",
                Operation::DeleteMany {
                    filter: Some(Filter::eq("tenant_id", "a")),
                },
            )
            .await
            .unwrap();
        assert_eq!(out.count(), 2);
    }

    #[tokio::test]
    async fn introspection_helpers() {
        let client = client_with_users().await;
        client
            .execute_raw("CREATE TABLE settings (key TEXT, value TEXT)")
            .await
            .unwrap();

        assert!(client.has_column("users", "tenant_id").await.unwrap());
        assert!(!client.has_column("settings", "tenant_id").await.unwrap());
        // cached path
        assert!(client.has_column("users", "tenant_id").await.unwrap());

        let tables = client.list_tables().await.unwrap();
        assert!(tables.contains(&"users".to_owned()));
        assert!(tables.contains(&"settings".to_owned()));

        client
            .execute(
                "users",
                Operation::CreateMany {
                    data: vec![
                        record(json!({"tenant_id": "a"})),
                        record(json!({"tenant_id": "a"})),
                        record(json!({"tenant_id": "b"})),
                    ],
                },
            )
            .await
            .unwrap();
        let mut tenants = client.distinct_values("users", "tenant_id").await.unwrap();
        tenants.sort();
        assert_eq!(tenants, vec!["a".to_owned(), "b".to_owned()]);
    }

    #[tokio::test]
    async fn purge_rows_spans_tables_atomically() {
        let client = client_with_users().await;
        client
            .execute_raw(
                "CREATE TABLE posts (id INTEGER PRIMARY KEY, tenant_id TEXT, title TEXT)",
            )
            .await
            .unwrap();
        client
            .execute(
                "users",
                Operation::Create {
                    data: record(json!({"tenant_id": "a", "email": "x@e"})),
                },
            )
            .await
            .unwrap();
        client
            .execute(
                "posts",
                Operation::Create {
                    data: record(json!({"tenant_id": "a", "title": "t"})),
                },
            )
            .await
            .unwrap();

        let affected = client
            .purge_rows(
                &["users".to_owned(), "posts".to_owned()],
                &Filter::eq("tenant_id", "a"),
            )
            .await
            .unwrap();
        assert_eq!(affected, 2);
    }

    #[tokio::test]
    async fn driver_caches_clients_per_url() {
        use crate::driver::Driver;
        let driver = RelationalDriver::new();
        let a = driver
            .client("sqlite:file:reldrv1?mode=memory&cache=shared")
            .await
            .unwrap();
        let b = driver
            .client("sqlite:file:reldrv1?mode=memory&cache=shared")
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let c = driver
            .client("sqlite:file:reldrv2?mode=memory&cache=shared")
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        driver.release_all().await;
    }
}
