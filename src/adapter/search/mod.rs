//! # Search Index Adapter
//!
//! Runs translated query DSL bodies through a [`SearchTransport`]. The
//! HTTP client lives behind that trait. On connect the index is created
//! with the configured mappings, or its mappings are updated when it
//! already exists. Documents get uuid ids; `_id` is exposed as the record
//! id field.

pub mod translate;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use self::translate::SearchTranslator;
use super::{id_label, Adapter, DeleteSummary, DriverError};
use crate::errors::{DbError, DbResult};
use crate::query::Query;
use crate::record::{id_to_string, Record};

/// One search hit
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub source: Record,
}

/// Search response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchHits {
    /// Total matches ignoring the window
    pub total: u64,
    pub hits: Vec<SearchHit>,
}

/// Client for one search cluster
#[async_trait]
pub trait SearchTransport: Send + Sync {
    async fn index_exists(&self, index: &str) -> Result<bool, DriverError>;

    /// Create an index; `body` carries `{"mappings": ...}`
    async fn create_index(&self, index: &str, body: Value) -> Result<(), DriverError>;

    async fn put_mapping(&self, index: &str, mappings: Value) -> Result<(), DriverError>;

    async fn search(&self, index: &str, body: Value) -> Result<SearchHits, DriverError>;

    async fn count(&self, index: &str, body: Value) -> Result<u64, DriverError>;

    async fn index_document(
        &self,
        index: &str,
        id: &str,
        source: Record,
        refresh: bool,
    ) -> Result<(), DriverError>;

    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Record>, DriverError>;

    /// Partial update; `false` when the document does not exist
    async fn update_document(
        &self,
        index: &str,
        id: &str,
        patch: Record,
        refresh: bool,
    ) -> Result<bool, DriverError>;

    /// `false` when the document does not exist
    async fn delete_document(&self, index: &str, id: &str, refresh: bool) -> Result<bool, DriverError>;

    /// Number of deleted documents
    async fn delete_by_query(&self, index: &str, body: Value, refresh: bool) -> Result<u64, DriverError>;
}

/// Search adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchConfig {
    /// Index name
    pub index: String,

    /// Identifier field exposed to callers (default: "id")
    #[serde(default = "default_id_field")]
    pub id_field: String,

    /// Index mappings applied on connect
    #[serde(default)]
    pub mappings: Option<Value>,

    /// Per-call timeout in milliseconds (default: 2000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Refresh after every write (default: true)
    #[serde(default = "default_refresh")]
    pub refresh: bool,
}

fn default_id_field() -> String {
    "id".to_string()
}

fn default_timeout_ms() -> u64 {
    2000
}

fn default_refresh() -> bool {
    true
}

impl SearchConfig {
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            id_field: default_id_field(),
            mappings: None,
            timeout_ms: default_timeout_ms(),
            refresh: default_refresh(),
        }
    }

    pub fn with_mappings(mut self, mappings: Value) -> Self {
        self.mappings = Some(mappings);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Search index adapter
pub struct SearchAdapter<T> {
    config: SearchConfig,
    transport: T,
    connected: AtomicBool,
}

impl<T: SearchTransport> SearchAdapter<T> {
    pub fn new(config: SearchConfig, transport: T) -> Self {
        Self {
            config,
            transport,
            connected: AtomicBool::new(false),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn translator(&self) -> SearchTranslator<'_> {
        SearchTranslator::new(&self.config.id_field)
    }

    fn index(&self) -> &str {
        &self.config.index
    }

    async fn call<R>(
        &self,
        operation: &'static str,
        id: Option<&str>,
        fut: impl Future<Output = Result<R, DriverError>>,
    ) -> DbResult<R> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(DbError::unavailable(format!(
                "search adapter for {} is not connected",
                self.config.index
            )));
        }
        self.timed(operation, id, fut).await
    }

    async fn timed<R>(
        &self,
        operation: &'static str,
        id: Option<&str>,
        fut: impl Future<Output = Result<R, DriverError>>,
    ) -> DbResult<R> {
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

    fn document_id(&self, id: &Value) -> DbResult<String> {
        id_to_string(id)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| DbError::invalid_id(id_label(id)))
    }

    /// Stored source plus the id field
    fn to_record(&self, id: String, mut source: Record) -> Record {
        source.insert(self.config.id_field.clone(), Value::String(id));
        source
    }

    fn strip_id(&self, mut record: Record) -> Record {
        record.remove(&self.config.id_field);
        record.remove(translate::DOCUMENT_ID_FIELD);
        record
    }
}

#[async_trait]
impl<T: SearchTransport> Adapter for SearchAdapter<T> {
    fn name(&self) -> &'static str {
        "search"
    }

    fn id_field(&self) -> &str {
        &self.config.id_field
    }

    async fn connect(&self) -> DbResult<()> {
        let index = self.index();
        let exists = self
            .timed("connect", None, self.transport.index_exists(index))
            .await?;

        match (&self.config.mappings, exists) {
            (Some(mappings), true) => {
                self.timed("connect", None, self.transport.put_mapping(index, mappings.clone()))
                    .await?
            }
            (Some(mappings), false) => {
                self.timed(
                    "connect",
                    None,
                    self.transport.create_index(index, json!({ "mappings": mappings })),
                )
                .await?
            }
            (None, false) => {
                self.timed("connect", None, self.transport.create_index(index, json!({})))
                    .await?
            }
            (None, true) => {}
        }

        self.connected.store(true, Ordering::Release);
        info!(index = %index, "search adapter connected");
        Ok(())
    }

    async fn disconnect(&self) -> DbResult<()> {
        if self.connected.swap(false, Ordering::AcqRel) {
            info!(index = %self.config.index, "search adapter disconnected");
        }
        Ok(())
    }

    async fn find(&self, query: &Query) -> DbResult<Vec<Record>> {
        let body = self.translator().translate(query);
        debug!(index = %self.index(), body = %body, "search find");

        let response = self
            .call("find", None, self.transport.search(self.index(), body))
            .await?;
        Ok(response
            .hits
            .into_iter()
            .map(|hit| self.to_record(hit.id, hit.source))
            .collect())
    }

    async fn find_by_id(&self, id: &Value) -> DbResult<Option<Record>> {
        let id = self.document_id(id)?;
        let source = self
            .call("find_by_id", Some(&id), self.transport.get_document(self.index(), &id))
            .await?;
        Ok(source.map(|source| self.to_record(id, source)))
    }

    async fn count(&self, query: &Query) -> DbResult<u64> {
        let body = self.translator().count_body(query);
        debug!(index = %self.index(), body = %body, "search count");
        self.call("count", None, self.transport.count(self.index(), body))
            .await
    }

    async fn insert(&self, record: Record) -> DbResult<Record> {
        let id = Uuid::new_v4().simple().to_string();
        let source = self.strip_id(record);
        self.call(
            "insert",
            Some(&id),
            self.transport
                .index_document(self.index(), &id, source.clone(), self.config.refresh),
        )
        .await?;
        Ok(self.to_record(id, source))
    }

    async fn update_by_id(&self, id: &Value, patch: Record) -> DbResult<Record> {
        let id = self.document_id(id)?;
        let patch = self.strip_id(patch);

        if !patch.is_empty() {
            let found = self
                .call(
                    "update_by_id",
                    Some(&id),
                    self.transport
                        .update_document(self.index(), &id, patch, self.config.refresh),
                )
                .await?;
            if !found {
                return Err(DbError::not_found(id));
            }
        }

        self.find_by_id(&Value::String(id.clone()))
            .await?
            .ok_or_else(|| DbError::not_found(id))
    }

    async fn remove_by_id(&self, id: &Value) -> DbResult<DeleteSummary> {
        let id = self.document_id(id)?;
        let deleted = self
            .call(
                "remove_by_id",
                Some(&id),
                self.transport
                    .delete_document(self.index(), &id, self.config.refresh),
            )
            .await?;
        Ok(DeleteSummary::new(u64::from(deleted)))
    }

    async fn remove_all(&self) -> DbResult<DeleteSummary> {
        let deleted = self
            .call(
                "remove_all",
                None,
                self.transport.delete_by_query(
                    self.index(),
                    json!({ "query": { "match_all": {} } }),
                    self.config.refresh,
                ),
            )
            .await?;
        Ok(DeleteSummary::new(deleted))
    }
}
