//! # Storage Adapters
//!
//! One contract, four backends: the in-process indexed store, an embedded
//! relational engine, a document store and a search index. Every adapter
//! consumes the same [`Query`] and returns plain [`Record`]s so services
//! can swap backends without changing behavior.

pub mod document;
pub mod memory;
pub mod relational;
pub mod search;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{DbError, DbResult};
use crate::query::Query;
use crate::record::{id_to_string, Record};

pub use document::{DocumentAdapter, DocumentCollection, DocumentConfig, FindOptions, UpdateSummary};
pub use memory::{MemoryAdapter, MemoryConfig};
pub use relational::{Column, ColumnType, PoolManager, RelationalAdapter, RelationalConfig};
pub use search::{SearchAdapter, SearchConfig, SearchHit, SearchHits, SearchTransport};

/// Error raised by a driver behind one of the network seams
pub type DriverError = Box<dyn std::error::Error + Send + Sync>;

/// Delete summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSummary {
    pub deleted_count: u64,
}

impl DeleteSummary {
    pub fn new(deleted_count: u64) -> Self {
        Self { deleted_count }
    }
}

/// Uniform CRUD contract implemented by every backend
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Identifier field of stored records
    fn id_field(&self) -> &str;

    /// Open connections / create storage
    async fn connect(&self) -> DbResult<()>;

    /// Release connections
    async fn disconnect(&self) -> DbResult<()>;

    /// Records matching the query, ordered and windowed
    async fn find(&self, query: &Query) -> DbResult<Vec<Record>>;

    /// First record matching the query
    async fn find_one(&self, query: &Query) -> DbResult<Option<Record>> {
        let query = query.clone().with_limit(1);
        Ok(self.find(&query).await?.into_iter().next())
    }

    /// Record by identifier
    async fn find_by_id(&self, id: &Value) -> DbResult<Option<Record>>;

    /// Records by identifier, in the order of `ids`. Unknown ids are skipped.
    async fn find_by_ids(&self, ids: &[Value]) -> DbResult<Vec<Record>> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.find_by_id(id).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Number of records matching the query filter
    async fn count(&self, query: &Query) -> DbResult<u64>;

    /// Store a new record; the store assigns the identifier
    async fn insert(&self, record: Record) -> DbResult<Record>;

    /// Update the record named by its own identifier field
    async fn update(&self, mut record: Record) -> DbResult<Record> {
        let id = record
            .remove(self.id_field())
            .filter(|id| !id.is_null())
            .ok_or_else(|| DbError::validation("id field required!"))?;
        self.update_by_id(&id, record).await
    }

    /// Merge `patch` into the record and return the updated record
    async fn update_by_id(&self, id: &Value, patch: Record) -> DbResult<Record>;

    /// Delete one record
    async fn remove_by_id(&self, id: &Value) -> DbResult<DeleteSummary>;

    /// Delete every record
    async fn remove_all(&self) -> DbResult<DeleteSummary>;

    /// Apply `patch` to every match and return the updated records
    async fn find_and_update(&self, query: &Query, patch: &Record) -> DbResult<Vec<Record>> {
        let matches = self.find(query).await?;
        let mut updated = Vec::with_capacity(matches.len());
        for record in matches {
            let id = record
                .get(self.id_field())
                .cloned()
                .ok_or_else(|| DbError::backend("find_and_update", "matched record has no id"))?;
            updated.push(self.update_by_id(&id, patch.clone()).await?);
        }
        Ok(updated)
    }
}

/// String form of an id for error context
pub(crate) fn id_label(id: &Value) -> String {
    id_to_string(id).unwrap_or_else(|| id.to_string())
}
