//! # Document Store Adapter
//!
//! Runs translated queries against a [`DocumentCollection`]. The network
//! client sits behind that trait; this module owns translation, id mapping
//! (`_id` object ids exposed as hex strings) and per-call timeouts.

pub mod translate;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use self::translate::{
    document_to_record, id_to_json, parse_object_id, record_to_document, DocumentTranslator,
    OBJECT_ID_FIELD,
};
use super::{Adapter, DeleteSummary, DriverError};
use crate::errors::{DbError, DbResult};
use crate::query::Query;
use crate::record::Record;

pub use self::translate::{DocumentQuery, FindOptions};

/// Counts reported by an update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSummary {
    pub matched_count: u64,
    pub modified_count: u64,
}

/// One collection of a document store
#[async_trait]
pub trait DocumentCollection: Send + Sync {
    /// Check the server is reachable
    async fn ping(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn find(&self, filter: Document, options: FindOptions) -> Result<Vec<Document>, DriverError>;

    async fn count_documents(&self, filter: Document) -> Result<u64, DriverError>;

    /// Store a document and return the generated `_id`
    async fn insert_one(&self, doc: Document) -> Result<Bson, DriverError>;

    async fn update_one(&self, filter: Document, update: Document) -> Result<UpdateSummary, DriverError>;

    async fn delete_one(&self, filter: Document) -> Result<u64, DriverError>;

    async fn delete_many(&self, filter: Document) -> Result<u64, DriverError>;
}

/// Document adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentConfig {
    /// Collection name, for logs
    pub collection: String,

    /// Identifier field exposed to callers (default: "id")
    #[serde(default = "default_id_field")]
    pub id_field: String,

    /// Per-call timeout in milliseconds (default: 2000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_id_field() -> String {
    "id".to_string()
}

fn default_timeout_ms() -> u64 {
    2000
}

impl DocumentConfig {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id_field: default_id_field(),
            timeout_ms: default_timeout_ms(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Document store adapter
pub struct DocumentAdapter<C> {
    config: DocumentConfig,
    collection: C,
    connected: AtomicBool,
}

impl<C: DocumentCollection> DocumentAdapter<C> {
    pub fn new(config: DocumentConfig, collection: C) -> Self {
        Self {
            config,
            collection,
            connected: AtomicBool::new(false),
        }
    }

    pub fn collection(&self) -> &C {
        &self.collection
    }

    fn translator(&self) -> DocumentTranslator<'_> {
        DocumentTranslator::new(&self.config.id_field)
    }

    /// Run one driver call under the timeout, wrapping failures
    async fn call<T>(
        &self,
        operation: &'static str,
        id: Option<&str>,
        fut: impl Future<Output = Result<T, DriverError>>,
    ) -> DbResult<T> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(DbError::unavailable(format!(
                "document adapter for {} is not connected",
                self.config.collection
            )));
        }
        let limit = self.config.timeout();
        match tokio::time::timeout(limit, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(match id {
                Some(id) => DbError::backend_for_id(operation, id, e),
                None => DbError::backend(operation, e),
            }),
            Err(_) => Err(DbError::timed_out(operation, limit)),
        }
    }

    fn by_id(id: Bson) -> Document {
        let mut filter = Document::new();
        filter.insert(OBJECT_ID_FIELD, id);
        filter
    }

    async fn read_by_id(&self, operation: &'static str, id: Bson) -> DbResult<Option<Record>> {
        let label = id_label_bson(&id);
        let options = FindOptions {
            limit: Some(1),
            ..Default::default()
        };
        let docs = self
            .call(operation, Some(&label), self.collection.find(Self::by_id(id), options))
            .await?;
        Ok(docs
            .into_iter()
            .next()
            .map(|doc| document_to_record(doc, &self.config.id_field)))
    }
}

fn id_label_bson(id: &Bson) -> String {
    match id_to_json(id.clone()) {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[async_trait]
impl<C: DocumentCollection> Adapter for DocumentAdapter<C> {
    fn name(&self) -> &'static str {
        "document"
    }

    fn id_field(&self) -> &str {
        &self.config.id_field
    }

    async fn connect(&self) -> DbResult<()> {
        let limit = self.config.timeout();
        match tokio::time::timeout(limit, self.collection.ping()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(DbError::unavailable(e.to_string())),
            Err(_) => return Err(DbError::timed_out("connect", limit)),
        }
        self.connected.store(true, Ordering::Release);
        info!(collection = %self.config.collection, "document adapter connected");
        Ok(())
    }

    async fn disconnect(&self) -> DbResult<()> {
        if self.connected.swap(false, Ordering::AcqRel) {
            info!(collection = %self.config.collection, "document adapter disconnected");
        }
        Ok(())
    }

    async fn find(&self, query: &Query) -> DbResult<Vec<Record>> {
        let DocumentQuery { filter, options } = self.translator().translate(query)?;
        debug!(collection = %self.config.collection, filter = %filter, options = ?options, "document find");

        let docs = self.call("find", None, self.collection.find(filter, options)).await?;
        Ok(docs
            .into_iter()
            .map(|doc| document_to_record(doc, &self.config.id_field))
            .collect())
    }

    async fn find_by_id(&self, id: &Value) -> DbResult<Option<Record>> {
        let oid = parse_object_id(id)?;
        self.read_by_id("find_by_id", Bson::ObjectId(oid)).await
    }

    async fn find_by_ids(&self, ids: &[Value]) -> DbResult<Vec<Record>> {
        let oids = ids.iter().map(parse_object_id).collect::<DbResult<Vec<_>>>()?;
        let mut filter = Document::new();
        let mut members = Document::new();
        members.insert("$in", oids.iter().copied().map(Bson::ObjectId).collect::<Vec<_>>());
        filter.insert(OBJECT_ID_FIELD, members);

        let docs = self
            .call("find_by_ids", None, self.collection.find(filter, FindOptions::default()))
            .await?;
        let found: Vec<Record> = docs
            .into_iter()
            .map(|doc| document_to_record(doc, &self.config.id_field))
            .collect();

        let ordered = oids
            .iter()
            .filter_map(|oid| {
                let hex = Value::String(oid.to_hex());
                found
                    .iter()
                    .find(|record| record.get(&self.config.id_field) == Some(&hex))
                    .cloned()
            })
            .collect();
        Ok(ordered)
    }

    async fn count(&self, query: &Query) -> DbResult<u64> {
        let filter = self.translator().filter(query)?;
        debug!(collection = %self.config.collection, filter = %filter, "document count");
        self.call("count", None, self.collection.count_documents(filter)).await
    }

    async fn insert(&self, record: Record) -> DbResult<Record> {
        let doc = record_to_document(&record, &self.config.id_field)?;
        let id = self.call("insert", None, self.collection.insert_one(doc)).await?;
        let label = id_label_bson(&id);
        self.read_by_id("insert", id)
            .await?
            .ok_or_else(|| DbError::backend_for_id("insert", label, "inserted document not found"))
    }

    async fn update_by_id(&self, id: &Value, patch: Record) -> DbResult<Record> {
        let oid = parse_object_id(id)?;
        let label = oid.to_hex();
        let changes = record_to_document(&patch, &self.config.id_field)?;

        if !changes.is_empty() {
            let mut update = Document::new();
            update.insert("$set", changes);
            let summary = self
                .call(
                    "update_by_id",
                    Some(&label),
                    self.collection.update_one(Self::by_id(Bson::ObjectId(oid)), update),
                )
                .await?;
            if summary.matched_count == 0 {
                return Err(DbError::not_found(label));
            }
        }

        self.read_by_id("update_by_id", Bson::ObjectId(oid))
            .await?
            .ok_or_else(|| DbError::not_found(label))
    }

    async fn remove_by_id(&self, id: &Value) -> DbResult<DeleteSummary> {
        let oid = parse_object_id(id)?;
        let label = oid.to_hex();
        let deleted = self
            .call(
                "remove_by_id",
                Some(&label),
                self.collection.delete_one(Self::by_id(Bson::ObjectId(oid))),
            )
            .await?;
        Ok(DeleteSummary::new(deleted))
    }

    async fn remove_all(&self) -> DbResult<DeleteSummary> {
        let deleted = self
            .call("remove_all", None, self.collection.delete_many(Document::new()))
            .await?;
        Ok(DeleteSummary::new(deleted))
    }
}
