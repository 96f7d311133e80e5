//! # In-Process Adapter
//!
//! Records live in insertion order behind a `RwLock`. Fields listed in
//! `indexes` get an ordered secondary index; equality conditions on those
//! fields (including the search shorthand) narrow the candidate rows before
//! the full filter tree is evaluated.

pub mod index;

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use self::index::{intersect, union, FieldIndex, RowSeq};
use super::{id_label, Adapter, DeleteSummary};
use crate::errors::{DbError, DbResult};
use crate::query::filter::{matches_all, FilterNode, FilterOperator};
use crate::query::{sort_records, Query};
use crate::record::{id_to_string, Record};

/// In-process adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryConfig {
    /// Identifier field (default: "id")
    #[serde(default = "default_id_field")]
    pub id_field: String,

    /// Fields with a secondary index
    #[serde(default)]
    pub indexes: Vec<String>,
}

fn default_id_field() -> String {
    "id".to_string()
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            id_field: default_id_field(),
            indexes: Vec::new(),
        }
    }
}

impl MemoryConfig {
    /// Config indexing the given fields
    pub fn with_indexes(indexes: Vec<String>) -> Self {
        Self {
            indexes,
            ..Default::default()
        }
    }
}

/// Rows, id lookup and secondary indexes
#[derive(Debug, Default)]
struct Table {
    rows: BTreeMap<RowSeq, Record>,
    ids: HashMap<String, RowSeq>,
    indexes: HashMap<String, FieldIndex>,
    next_seq: RowSeq,
}

impl Table {
    fn new(indexed: &[String]) -> Self {
        Self {
            indexes: indexed
                .iter()
                .map(|field| (field.clone(), FieldIndex::new()))
                .collect(),
            ..Default::default()
        }
    }

    fn index_row(&mut self, seq: RowSeq, record: &Record) {
        for (field, index) in self.indexes.iter_mut() {
            index.insert(record.get(field), seq);
        }
    }

    fn unindex_row(&mut self, seq: RowSeq, record: &Record) {
        for (field, index) in self.indexes.iter_mut() {
            index.remove(record.get(field), seq);
        }
    }

    /// Rows that may match, narrowed through indexes when possible
    fn candidates(&self, conditions: &[FilterNode]) -> Vec<RowSeq> {
        let narrowed: Vec<Vec<RowSeq>> = conditions
            .iter()
            .filter_map(|node| self.lookup(node))
            .collect();

        if narrowed.is_empty() {
            self.rows.keys().copied().collect()
        } else {
            intersect(narrowed)
        }
    }

    /// Index answer for one node: an indexed equality leaf, or an OR whose
    /// every branch is one
    fn lookup(&self, node: &FilterNode) -> Option<Vec<RowSeq>> {
        match node {
            FilterNode::Leaf(expr) if expr.operator == FilterOperator::Eq => {
                self.indexes.get(&expr.field)?.lookup_eq(&expr.value)
            }
            FilterNode::Leaf(_) => None,
            FilterNode::Or(groups) => {
                let branches = groups
                    .iter()
                    .map(|group| match group.as_slice() {
                        [single] => self.lookup(single),
                        _ => None,
                    })
                    .collect::<Option<Vec<_>>>()?;
                Some(union(branches))
            }
        }
    }

    fn find(&self, query: &Query) -> Vec<Record> {
        let conditions = query.conditions();
        let mut rows: Vec<Record> = self
            .candidates(&conditions)
            .into_iter()
            .filter_map(|seq| self.rows.get(&seq))
            .filter(|record| matches_all(&conditions, record))
            .cloned()
            .collect();

        sort_records(&mut rows, &query.sort);

        let offset = usize::try_from(query.offset.unwrap_or(0)).unwrap_or(usize::MAX);
        let limit = query
            .limit
            .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);
        rows.into_iter().skip(offset).take(limit).collect()
    }

    fn count(&self, query: &Query) -> u64 {
        let conditions = query.conditions();
        self.candidates(&conditions)
            .into_iter()
            .filter_map(|seq| self.rows.get(&seq))
            .filter(|record| matches_all(&conditions, record))
            .count() as u64
    }
}

/// In-process indexed store
pub struct MemoryAdapter {
    config: MemoryConfig,
    table: RwLock<Option<Table>>,
}

impl MemoryAdapter {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            table: RwLock::new(None),
        }
    }

    fn read(&self, operation: &'static str) -> DbResult<RwLockReadGuard<'_, Option<Table>>> {
        self.table
            .read()
            .map_err(|e| DbError::backend(operation, format!("store lock poisoned: {}", e)))
    }

    fn write(&self, operation: &'static str) -> DbResult<RwLockWriteGuard<'_, Option<Table>>> {
        self.table
            .write()
            .map_err(|e| DbError::backend(operation, format!("store lock poisoned: {}", e)))
    }

    fn with_table<T>(&self, operation: &'static str, f: impl FnOnce(&Table) -> DbResult<T>) -> DbResult<T> {
        let guard = self.read(operation)?;
        let table = guard.as_ref().ok_or_else(not_connected)?;
        f(table)
    }

    fn with_table_mut<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut Table) -> DbResult<T>,
    ) -> DbResult<T> {
        let mut guard = self.write(operation)?;
        let table = guard.as_mut().ok_or_else(not_connected)?;
        f(table)
    }

    fn id_key(&self, id: &Value) -> DbResult<String> {
        id_to_string(id).ok_or_else(|| DbError::invalid_id(id.to_string()))
    }
}

fn not_connected() -> DbError {
    DbError::unavailable("memory adapter is not connected")
}

#[async_trait]
impl Adapter for MemoryAdapter {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn id_field(&self) -> &str {
        &self.config.id_field
    }

    async fn connect(&self) -> DbResult<()> {
        let mut guard = self.write("connect")?;
        if guard.is_none() {
            *guard = Some(Table::new(&self.config.indexes));
            info!(indexes = ?self.config.indexes, "memory adapter connected");
        }
        Ok(())
    }

    async fn disconnect(&self) -> DbResult<()> {
        let mut guard = self.write("disconnect")?;
        if guard.take().is_some() {
            info!("memory adapter disconnected");
        }
        Ok(())
    }

    async fn find(&self, query: &Query) -> DbResult<Vec<Record>> {
        self.with_table("find", |table| Ok(table.find(query)))
    }

    async fn find_by_id(&self, id: &Value) -> DbResult<Option<Record>> {
        let key = self.id_key(id)?;
        self.with_table("find_by_id", |table| {
            Ok(table.ids.get(&key).and_then(|seq| table.rows.get(seq)).cloned())
        })
    }

    async fn count(&self, query: &Query) -> DbResult<u64> {
        self.with_table("count", |table| Ok(table.count(query)))
    }

    async fn insert(&self, mut record: Record) -> DbResult<Record> {
        let id = Uuid::new_v4().simple().to_string();
        record.insert(self.config.id_field.clone(), Value::String(id.clone()));

        self.with_table_mut("insert", |table| {
            let seq = table.next_seq;
            table.next_seq += 1;
            table.index_row(seq, &record);
            table.ids.insert(id.clone(), seq);
            table.rows.insert(seq, record.clone());
            debug!(id = %id, "memory insert");
            Ok(record)
        })
    }

    async fn update_by_id(&self, id: &Value, patch: Record) -> DbResult<Record> {
        let key = self.id_key(id)?;
        let id_field = self.config.id_field.clone();

        self.with_table_mut("update_by_id", |table| {
            let seq = *table
                .ids
                .get(&key)
                .ok_or_else(|| DbError::not_found(id_label(id)))?;
            let mut record = table
                .rows
                .remove(&seq)
                .ok_or_else(|| DbError::not_found(id_label(id)))?;

            table.unindex_row(seq, &record);
            for (field, value) in patch {
                if field != id_field {
                    record.insert(field, value);
                }
            }
            table.index_row(seq, &record);
            table.rows.insert(seq, record.clone());
            Ok(record)
        })
    }

    async fn remove_by_id(&self, id: &Value) -> DbResult<DeleteSummary> {
        let key = self.id_key(id)?;
        self.with_table_mut("remove_by_id", |table| {
            let Some(seq) = table.ids.remove(&key) else {
                return Ok(DeleteSummary::new(0));
            };
            if let Some(record) = table.rows.remove(&seq) {
                table.unindex_row(seq, &record);
            }
            Ok(DeleteSummary::new(1))
        })
    }

    async fn remove_all(&self) -> DbResult<DeleteSummary> {
        self.with_table_mut("remove_all", |table| {
            let deleted = table.rows.len() as u64;
            table.rows.clear();
            table.ids.clear();
            table.indexes.values_mut().for_each(FieldIndex::clear);
            Ok(DeleteSummary::new(deleted))
        })
    }
}
