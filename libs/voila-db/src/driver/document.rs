//! Document driver over `mongodb`.
//!
//! Filters lower to `$and`/`$or` documents and writes go through `$set`
//! updates. Collections are schemaless, so every collection is treated as
//! tenant-capable and the rewriter always injects scope fields.
//!
//! `purge_rows` deletes per collection sequentially: multi-document
//! transactions require a replica set, which this layer cannot assume.

use std::sync::Arc;

use async_trait::async_trait;
use bson::{Bson, Document};
use dashmap::DashMap;
use futures::TryStreamExt;
use mongodb::{Client, Database};
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::query::{CmpOp, Filter, FindOptions, Operation, QueryOutput, Record, SortDir};
use crate::urls::{redact_credentials, DriverKind};
use crate::{Error, Result};

/// Per-URL client cache with single-flight construction.
pub struct DocumentDriver {
    clients: DashMap<String, Arc<OnceCell<Arc<DocumentClient>>>>,
}

impl DocumentDriver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }
}

impl Default for DocumentDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl super::Driver for DocumentDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Document
    }

    async fn client(&self, url: &str) -> Result<Arc<dyn super::DriverClient>> {
        let cell = self
            .clients
            .entry(url.to_owned())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        let client = cell
            .get_or_try_init(|| async {
                tracing::debug!(url = redact_credentials(url), "opening document client");
                DocumentClient::connect(url).await.map(Arc::new)
            })
            .await?
            .clone();
        Ok(client)
    }

    async fn release(&self, url: &str) {
        if let Some((_, cell)) = self.clients.remove(url)
            && let Some(client) = cell.get()
        {
            client.close_client().await;
        }
    }

    async fn release_all(&self) {
        let cells: Vec<_> = self.clients.iter().map(|e| e.value().clone()).collect();
        self.clients.clear();
        for cell in cells {
            if let Some(client) = cell.get() {
                client.close_client().await;
            }
        }
    }
}

/// One connected document database.
pub struct DocumentClient {
    url: String,
    client: Client,
    db: Database,
}

impl DocumentClient {
    /// Connect and select the database named in the URL path.
    ///
    /// # Errors
    /// Returns the backend's connect error, or [`Error::InvalidUrl`] when the
    /// URL names no database.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::with_uri_str(url).await?;
        let db = client.default_database().ok_or_else(|| Error::InvalidUrl {
            url: redact_credentials(url),
            reason: "document URL must name a database".to_owned(),
        })?;
        Ok(Self {
            url: url.to_owned(),
            client,
            db,
        })
    }

    fn collection(&self, name: &str) -> mongodb::Collection<Document> {
        self.db.collection::<Document>(name)
    }

    async fn close_client(&self) {
        self.client.clone().shutdown().await;
    }
}

#[async_trait]
impl super::DriverClient for DocumentClient {
    fn url(&self) -> &str {
        &self.url
    }

    async fn execute(&self, table: &str, op: Operation) -> Result<QueryOutput> {
        let coll = self.collection(table);
        match op {
            Operation::Create { data } => {
                let doc = to_document(&data)?;
                coll.insert_one(doc).await?;
                Ok(QueryOutput::Row(Some(Value::Object(data))))
            }
            Operation::CreateMany { data } => {
                let docs = data
                    .iter()
                    .map(to_document)
                    .collect::<Result<Vec<_>>>()?;
                let inserted = docs.len() as u64;
                if !docs.is_empty() {
                    coll.insert_many(docs).await?;
                }
                Ok(QueryOutput::Affected(inserted))
            }
            Operation::Upsert {
                filter,
                create,
                update,
            } => {
                // `$set` the update payload, `$setOnInsert` the remainder of
                // the create payload; one round trip, atomic per document.
                let set = to_document(&update)?;
                let mut on_insert = to_document(&create)?;
                for key in set.keys() {
                    on_insert.remove(key);
                }
                let mut change = Document::new();
                change.insert("$set", set);
                if !on_insert.is_empty() {
                    change.insert("$setOnInsert", on_insert);
                }
                let res = coll
                    .update_one(lower_filter(&filter)?, change)
                    .upsert(true)
                    .await?;
                let affected = res.modified_count + u64::from(res.upserted_id.is_some());
                Ok(QueryOutput::Affected(affected))
            }
            Operation::FindFirst { filter, options } => {
                let options = FindOptions {
                    limit: Some(1),
                    ..options
                };
                let mut rows = self.find(&coll, filter.as_ref(), &options).await?;
                Ok(QueryOutput::Row(rows.drain(..).next()))
            }
            Operation::FindMany { filter, options } => Ok(QueryOutput::Rows(
                self.find(&coll, filter.as_ref(), &options).await?,
            )),
            Operation::FindUnique { filter } => {
                let found = coll.find_one(lower_filter(&filter)?).await?;
                Ok(QueryOutput::Row(found.map(document_to_value)))
            }
            Operation::Count { filter } => {
                let filter = lower_optional(filter.as_ref())?;
                Ok(QueryOutput::Count(coll.count_documents(filter).await?))
            }
            Operation::Update { filter, data } => {
                let mut change = Document::new();
                change.insert("$set", to_document(&data)?);
                let res = coll.update_one(lower_filter(&filter)?, change).await?;
                Ok(QueryOutput::Affected(res.modified_count))
            }
            Operation::UpdateMany { filter, data } => {
                let mut change = Document::new();
                change.insert("$set", to_document(&data)?);
                let res = coll
                    .update_many(lower_optional(filter.as_ref())?, change)
                    .await?;
                Ok(QueryOutput::Affected(res.modified_count))
            }
            Operation::Delete { filter } => {
                let res = coll.delete_one(lower_filter(&filter)?).await?;
                Ok(QueryOutput::Affected(res.deleted_count))
            }
            Operation::DeleteMany { filter } => {
                let res = coll.delete_many(lower_optional(filter.as_ref())?).await?;
                Ok(QueryOutput::Affected(res.deleted_count))
            }
        }
    }

    async fn query_raw(&self, query: &str) -> Result<Vec<Value>> {
        let command = parse_command(query)?;
        let reply = self.db.run_command(command).await?;
        Ok(vec![document_to_value(reply)])
    }

    async fn execute_raw(&self, query: &str) -> Result<u64> {
        let command = parse_command(query)?;
        self.db.run_command(command).await?;
        Ok(0)
    }

    async fn has_column(&self, _table: &str, _column: &str) -> Result<bool> {
        // Schemaless: every collection can carry the scope fields.
        Ok(true)
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        Ok(self
            .db
            .list_collection_names()
            .await?
            .into_iter()
            .filter(|name| !name.starts_with("system."))
            .collect())
    }

    async fn distinct_values(&self, table: &str, column: &str) -> Result<Vec<String>> {
        let values = self
            .collection(table)
            .distinct(column, Document::new())
            .await?;
        Ok(values
            .iter()
            .filter_map(|v| v.as_str().map(str::to_owned))
            .collect())
    }

    async fn purge_rows(&self, tables: &[String], filter: &Filter) -> Result<u64> {
        let filter = lower_filter(filter)?;
        let mut affected = 0;
        for table in tables {
            let res = self.collection(table).delete_many(filter.clone()).await?;
            affected += res.deleted_count;
        }
        Ok(affected)
    }

    async fn close(&self) {
        self.close_client().await;
    }
}

impl DocumentClient {
    async fn find(
        &self,
        coll: &mongodb::Collection<Document>,
        filter: Option<&Filter>,
        options: &FindOptions,
    ) -> Result<Vec<Value>> {
        let mut action = coll.find(lower_optional(filter)?);
        if let Some((field, dir)) = &options.order_by {
            let mut sort = Document::new();
            sort.insert(
                field.clone(),
                match dir {
                    SortDir::Asc => 1,
                    SortDir::Desc => -1,
                },
            );
            action = action.sort(sort);
        }
        if let Some(limit) = options.limit {
            action = action.limit(i64::try_from(limit).unwrap_or(i64::MAX));
        }
        if let Some(offset) = options.offset {
            action = action.skip(offset);
        }
        let docs: Vec<Document> = action.await?.try_collect().await?;
        Ok(docs.into_iter().map(document_to_value).collect())
    }
}

impl std::fmt::Debug for DocumentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentClient")
            .field("url", &redact_credentials(&self.url))
            .field("database", &self.db.name())
            .finish_non_exhaustive()
    }
}

/// Lower the filter AST to a query document.
fn lower_filter(filter: &Filter) -> Result<Document> {
    let mut doc = Document::new();
    match filter {
        Filter::And(parts) => {
            let lowered = parts.iter().map(lower_filter).collect::<Result<Vec<_>>>()?;
            doc.insert("$and", lowered);
        }
        Filter::Or(parts) => {
            let lowered = parts.iter().map(lower_filter).collect::<Result<Vec<_>>>()?;
            doc.insert("$or", lowered);
        }
        Filter::Cmp { field, op, value } => {
            let v = json_to_bson(value)?;
            match op {
                CmpOp::Eq => {
                    doc.insert(field.clone(), v);
                }
                CmpOp::Ne => {
                    doc.insert(field.clone(), operator_doc("$ne", v));
                }
                CmpOp::Gt => {
                    doc.insert(field.clone(), operator_doc("$gt", v));
                }
                CmpOp::Gte => {
                    doc.insert(field.clone(), operator_doc("$gte", v));
                }
                CmpOp::Lt => {
                    doc.insert(field.clone(), operator_doc("$lt", v));
                }
                CmpOp::Lte => {
                    doc.insert(field.clone(), operator_doc("$lte", v));
                }
                CmpOp::In => {
                    let items = match v {
                        Bson::Array(items) => items,
                        other => vec![other],
                    };
                    doc.insert(field.clone(), operator_doc("$in", Bson::Array(items)));
                }
                CmpOp::Contains => {
                    let needle = value
                        .as_str()
                        .map_or_else(|| value.to_string(), str::to_owned);
                    doc.insert(
                        field.clone(),
                        operator_doc("$regex", Bson::String(regex_escape(&needle))),
                    );
                }
            }
        }
    }
    Ok(doc)
}

fn lower_optional(filter: Option<&Filter>) -> Result<Document> {
    filter.map_or_else(|| Ok(Document::new()), lower_filter)
}

fn operator_doc(op: &str, value: Bson) -> Document {
    let mut doc = Document::new();
    doc.insert(op, value);
    doc
}

fn regex_escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if "\\^$.|?*+()[]{}".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn json_to_bson(value: &Value) -> Result<Bson> {
    Bson::try_from(value.clone())
        .map_err(|e| Error::Other(anyhow::anyhow!("value not representable as BSON: {e}")))
}

fn to_document(record: &Record) -> Result<Document> {
    bson::to_document(record)
        .map_err(|e| Error::Other(anyhow::anyhow!("record not representable as BSON: {e}")))
}

fn document_to_value(doc: Document) -> Value {
    serde_json::to_value(&doc).unwrap_or(Value::Null)
}

fn parse_command(query: &str) -> Result<Document> {
    let value: Value = serde_json::from_str(query)
        .map_err(|e| Error::Other(anyhow::anyhow!("raw document command must be JSON: {e}")))?;
    match value {
        Value::Object(map) => to_document(&map),
        _ => Err(Error::Other(anyhow::anyhow!(
            "raw document command must be a JSON object"
        ))),
    }
}

// ===================== tests =====================
