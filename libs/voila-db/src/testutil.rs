//! In-memory driver mock shared by unit tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::driver::{Driver, DriverClient};
use crate::query::{Filter, Operation, QueryOutput};
use crate::urls::DriverKind;
use crate::Result;

/// Records every executed operation; answers finds with canned rows.
pub(crate) struct MockClient {
    url: String,
    pub executed: Mutex<Vec<(String, Operation)>>,
    pub rows: Mutex<Vec<Value>>,
    /// Tables reported as lacking the tenant column.
    pub tenantless_tables: Vec<String>,
    pub closed: AtomicBool,
}

impl MockClient {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_owned(),
            executed: Mutex::new(Vec::new()),
            rows: Mutex::new(Vec::new()),
            tenantless_tables: Vec::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn last_op(&self) -> Option<(String, Operation)> {
        self.executed.lock().last().cloned()
    }
}

#[async_trait]
impl DriverClient for MockClient {
    fn url(&self) -> &str {
        &self.url
    }

    async fn execute(&self, table: &str, op: Operation) -> Result<QueryOutput> {
        let out = match &op {
            Operation::FindMany { .. } => QueryOutput::Rows(self.rows.lock().clone()),
            Operation::FindFirst { .. } | Operation::FindUnique { .. } => {
                QueryOutput::Row(self.rows.lock().first().cloned())
            }
            Operation::Count { .. } => QueryOutput::Count(self.rows.lock().len() as u64),
            Operation::Create { data } => QueryOutput::Row(Some(Value::Object(data.clone()))),
            _ => QueryOutput::Affected(1),
        };
        self.executed.lock().push((table.to_owned(), op));
        Ok(out)
    }

    async fn query_raw(&self, _query: &str) -> Result<Vec<Value>> {
        Ok(self.rows.lock().clone())
    }

    async fn execute_raw(&self, _query: &str) -> Result<u64> {
        Ok(0)
    }

    async fn has_column(&self, table: &str, _column: &str) -> Result<bool> {
        Ok(!self.tenantless_tables.iter().any(|t| t == table))
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        Ok(vec!["users".to_owned()])
    }

    async fn distinct_values(&self, _table: &str, _column: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn purge_rows(&self, _tables: &[String], _filter: &Filter) -> Result<u64> {
        Ok(0)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Driver that counts connects and optionally delays them, for cache and
/// single-flight tests.
pub(crate) struct MockDriver {
    pub connects: AtomicU32,
    pub connect_delay: Option<std::time::Duration>,
    clients: DashMap<String, Arc<OnceCell<Arc<MockClient>>>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            connects: AtomicU32::new(0),
            connect_delay: None,
            clients: DashMap::new(),
        }
    }

    pub fn with_delay(delay: std::time::Duration) -> Self {
        Self {
            connect_delay: Some(delay),
            ..Self::new()
        }
    }

    /// The concrete mock behind a URL, for assertions on recorded ops.
    pub fn mock(&self, url: &str) -> Option<Arc<MockClient>> {
        self.clients
            .get(url)
            .and_then(|cell| cell.get().cloned())
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Relational
    }

    async fn client(&self, url: &str) -> Result<Arc<dyn DriverClient>> {
        let cell = self
            .clients
            .entry(url.to_owned())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        let delay = self.connect_delay;
        let client = cell
            .get_or_try_init(|| async {
                self.connects.fetch_add(1, Ordering::SeqCst);
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok::<_, crate::Error>(Arc::new(MockClient::new(url)))
            })
            .await?
            .clone();
        Ok(client)
    }

    async fn release(&self, url: &str) {
        if let Some((_, cell)) = self.clients.remove(url)
            && let Some(client) = cell.get()
        {
            client.close().await;
        }
    }

    async fn release_all(&self) {
        let cells: Vec<_> = self.clients.iter().map(|e| e.value().clone()).collect();
        self.clients.clear();
        for cell in cells {
            if let Some(client) = cell.get() {
                client.close().await;
            }
        }
    }
}
