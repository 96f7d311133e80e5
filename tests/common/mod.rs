//! Shared fixtures for integration tests
//!
//! In-process stand-ins for the two network seams (a document collection
//! and a search transport) plus a local action caller that routes
//! `service.action` names to registered services.

#![allow(dead_code)]

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document};
use regex::RegexBuilder;
use serde_json::{json, Value};

use polystore::adapter::document::UpdateSummary;
use polystore::adapter::relational::{Column, ColumnType, PoolManager, RelationalAdapter, RelationalConfig};
use polystore::adapter::{
    DocumentAdapter, DocumentCollection, DocumentConfig, DriverError, FindOptions, MemoryAdapter,
    MemoryConfig, SearchAdapter, SearchConfig, SearchHit, SearchHits, SearchTransport,
};
use polystore::{ActionCaller, Adapter, DbError, DbResult, Record, Service};

// =============================================================================
// FIXTURES
// =============================================================================

pub fn record(value: Value) -> Record {
    value.as_object().cloned().unwrap_or_default()
}

/// People used by the filter scenarios. Two have no email.
pub fn people() -> Vec<Record> {
    vec![
        record(json!({"age": 25, "email": "john@gmail.com", "letter": "J", "name": "John"})),
        record(json!({"age": 75, "email": "marie@ufc.com", "letter": "M", "name": "Marie"})),
        record(json!({"age": 65, "letter": "J", "name": "John"})),
        record(json!({"age": 46, "email": "julian@ufc.com", "letter": "B", "name": "Julian"})),
        record(json!({"age": 13, "email": "peter@gmail.com", "letter": "P", "name": "Peter"})),
        record(json!({"age": 13, "letter": "S", "name": "Stone"})),
    ]
}

pub fn people_columns() -> Vec<Column> {
    vec![
        Column::new("name", ColumnType::String),
        Column::new("age", ColumnType::Integer),
        Column::new("letter", ColumnType::String),
        Column::new("email", ColumnType::String),
    ]
}

pub fn sqlite_uri(dir: &Path, file: &str) -> String {
    format!("sqlite://{}", dir.join(file).display())
}

pub fn relational_adapter(dir: &Path, pools: Arc<PoolManager>) -> RelationalAdapter {
    let config = RelationalConfig::new(sqlite_uri(dir, "people.db"), "people", people_columns());
    RelationalAdapter::new(config, pools).unwrap()
}

/// One connected adapter per backend, each seeded with `records`
pub async fn all_backends(dir: &Path, records: &[Record]) -> Vec<Arc<dyn Adapter>> {
    let adapters: Vec<Arc<dyn Adapter>> = vec![
        Arc::new(MemoryAdapter::new(MemoryConfig::with_indexes(vec!["name".into()]))),
        Arc::new(relational_adapter(dir, Arc::new(PoolManager::new()))),
        Arc::new(DocumentAdapter::new(DocumentConfig::new("people"), FakeCollection::new())),
        Arc::new(SearchAdapter::new(SearchConfig::new("people"), FakeSearch::new())),
    ];

    for adapter in &adapters {
        adapter.connect().await.unwrap();
        for record in records {
            adapter.insert(record.clone()).await.unwrap();
        }
    }
    adapters
}

fn driver_error(msg: impl Into<String>) -> DriverError {
    let msg: String = msg.into();
    msg.into()
}

// =============================================================================
// VALUE HELPERS
// =============================================================================

fn bson_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(i) => Some(f64::from(*i)),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(f) => Some(*f),
        _ => None,
    }
}

fn bson_cmp(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (bson_number(a), bson_number(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn bson_eq(a: &Bson, b: &Bson) -> bool {
    match (a, b) {
        (Bson::Null, Bson::Null) => true,
        _ => bson_cmp(a, b) == Some(Ordering::Equal) || a == b,
    }
}

/// Sort rank: missing / null first, then numbers, then strings
fn bson_sort(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    let rank = |v: Option<&Bson>| match v {
        None | Some(Bson::Null) => 0,
        Some(v) if bson_number(v).is_some() => 1,
        Some(Bson::String(_)) => 2,
        Some(_) => 3,
    };
    match (a, b) {
        (Some(x), Some(y)) => bson_cmp(x, y).unwrap_or_else(|| rank(a).cmp(&rank(b))),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn json_number(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn json_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (json_number(a), json_number(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn json_eq(a: &Value, b: &Value) -> bool {
    json_cmp(a, b) == Some(Ordering::Equal) || a == b
}

fn json_sort(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let rank = |v: Option<&Value>| match v {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(_) => 3,
    };
    match (a, b) {
        (Some(x), Some(y)) => json_cmp(x, y).unwrap_or_else(|| rank(a).cmp(&rank(b))),
        _ => rank(a).cmp(&rank(b)),
    }
}

// =============================================================================
// FAKE DOCUMENT COLLECTION
// =============================================================================

/// Evaluates the match-document subset produced by the translator
#[derive(Default)]
pub struct FakeCollection {
    docs: Mutex<Vec<Document>>,
    pub fail_with: Mutex<Option<String>>,
}

impl FakeCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.lock().unwrap().len()
    }

    fn check_failure(&self) -> Result<(), DriverError> {
        match self.fail_with.lock().unwrap().clone() {
            Some(msg) => Err(driver_error(msg)),
            None => Ok(()),
        }
    }

    fn matches(doc: &Document, filter: &Document) -> Result<bool, DriverError> {
        for (key, condition) in filter {
            let ok = match key.as_str() {
                "$and" => all_docs(condition)?
                    .iter()
                    .map(|sub| Self::matches(doc, sub))
                    .collect::<Result<Vec<_>, _>>()?
                    .into_iter()
                    .all(|m| m),
                "$or" => all_docs(condition)?
                    .iter()
                    .map(|sub| Self::matches(doc, sub))
                    .collect::<Result<Vec<_>, _>>()?
                    .into_iter()
                    .any(|m| m),
                field => Self::matches_field(doc.get(field), condition)?,
            };
            if !ok {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn matches_field(value: Option<&Bson>, condition: &Bson) -> Result<bool, DriverError> {
        let ops = match condition {
            Bson::Document(ops) if ops.keys().all(|k| k.starts_with('$')) && !ops.is_empty() => ops,
            Bson::Null => return Ok(matches!(value, None | Some(Bson::Null))),
            expected => return Ok(value.is_some_and(|v| bson_eq(v, expected))),
        };

        let present = value.filter(|v| !matches!(v, Bson::Null));
        for (op, operand) in ops {
            let ok = match op.as_str() {
                "$gt" => present.and_then(|v| bson_cmp(v, operand)) == Some(Ordering::Greater),
                "$gte" => matches!(
                    present.and_then(|v| bson_cmp(v, operand)),
                    Some(Ordering::Greater | Ordering::Equal)
                ),
                "$lt" => present.and_then(|v| bson_cmp(v, operand)) == Some(Ordering::Less),
                "$lte" => matches!(
                    present.and_then(|v| bson_cmp(v, operand)),
                    Some(Ordering::Less | Ordering::Equal)
                ),
                "$ne" => !bson_eq(value.unwrap_or(&Bson::Null), operand),
                "$in" => list(operand)?
                    .iter()
                    .any(|item| bson_eq(value.unwrap_or(&Bson::Null), item)),
                "$nin" => !list(operand)?
                    .iter()
                    .any(|item| bson_eq(value.unwrap_or(&Bson::Null), item)),
                "$exists" => present.is_some() == operand.as_bool().unwrap_or(true),
                "$regex" => {
                    let pattern = operand.as_str().unwrap_or_default();
                    let insensitive = ops.get_str("$options").unwrap_or_default().contains('i');
                    let re = RegexBuilder::new(pattern)
                        .case_insensitive(insensitive)
                        .build()
                        .map_err(|e| driver_error(e.to_string()))?;
                    matches!(present, Some(Bson::String(s)) if re.is_match(s))
                }
                "$options" => true,
                other => return Err(driver_error(format!("unsupported operator {}", other))),
            };
            if !ok {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn all_docs(value: &Bson) -> Result<Vec<Document>, DriverError> {
    list(value)?
        .iter()
        .map(|item| match item {
            Bson::Document(doc) => Ok(doc.clone()),
            other => Err(driver_error(format!("expected a document, got {}", other))),
        })
        .collect()
}

fn list(value: &Bson) -> Result<&Vec<Bson>, DriverError> {
    value
        .as_array()
        .ok_or_else(|| driver_error(format!("expected an array, got {}", value)))
}

#[async_trait]
impl DocumentCollection for FakeCollection {
    async fn find(&self, filter: Document, options: FindOptions) -> Result<Vec<Document>, DriverError> {
        self.check_failure()?;
        let docs = self.docs.lock().unwrap();
        let mut matched = Vec::new();
        for doc in docs.iter() {
            if Self::matches(doc, &filter)? {
                matched.push(doc.clone());
            }
        }

        if let Some(sort) = &options.sort {
            matched.sort_by(|a, b| {
                for (field, direction) in sort {
                    let ord = bson_sort(a.get(field), b.get(field));
                    let ord = if bson_number(direction) == Some(-1.0) { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        let skip = options.skip.unwrap_or(0) as usize;
        let limit = options.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(matched.into_iter().skip(skip).take(limit).collect())
    }

    async fn count_documents(&self, filter: Document) -> Result<u64, DriverError> {
        self.check_failure()?;
        let docs = self.docs.lock().unwrap();
        let mut count = 0;
        for doc in docs.iter() {
            if Self::matches(doc, &filter)? {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn insert_one(&self, doc: Document) -> Result<Bson, DriverError> {
        self.check_failure()?;
        let id = ObjectId::new();
        let mut stored = Document::new();
        stored.insert("_id", id);
        for (key, value) in doc {
            stored.insert(key, value);
        }
        self.docs.lock().unwrap().push(stored);
        Ok(Bson::ObjectId(id))
    }

    async fn update_one(&self, filter: Document, update: Document) -> Result<UpdateSummary, DriverError> {
        self.check_failure()?;
        let changes = update
            .get_document("$set")
            .map_err(|e| driver_error(e.to_string()))?
            .clone();
        let mut docs = self.docs.lock().unwrap();
        for doc in docs.iter_mut() {
            if Self::matches(doc, &filter)? {
                for (key, value) in changes {
                    doc.insert(key, value);
                }
                return Ok(UpdateSummary {
                    matched_count: 1,
                    modified_count: 1,
                });
            }
        }
        Ok(UpdateSummary::default())
    }

    async fn delete_one(&self, filter: Document) -> Result<u64, DriverError> {
        self.check_failure()?;
        let mut docs = self.docs.lock().unwrap();
        for i in 0..docs.len() {
            if Self::matches(&docs[i], &filter)? {
                docs.remove(i);
                return Ok(1);
            }
        }
        Ok(0)
    }

    async fn delete_many(&self, filter: Document) -> Result<u64, DriverError> {
        self.check_failure()?;
        let mut docs = self.docs.lock().unwrap();
        let before = docs.len();
        let mut kept = Vec::with_capacity(before);
        for doc in docs.drain(..) {
            if !Self::matches(&doc, &filter)? {
                kept.push(doc);
            }
        }
        *docs = kept;
        Ok((before - docs.len()) as u64)
    }
}

// =============================================================================
// FAKE SEARCH TRANSPORT
// =============================================================================

#[derive(Default)]
struct FakeIndex {
    mappings: Value,
    docs: Vec<(String, Record)>,
}

/// Evaluates the query DSL subset produced by the translator
#[derive(Default)]
pub struct FakeSearch {
    indexes: Mutex<HashMap<String, FakeIndex>>,
    pub mapping_updates: Mutex<usize>,
}

impl FakeSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mappings(&self, index: &str) -> Option<Value> {
        self.indexes.lock().unwrap().get(index).map(|i| i.mappings.clone())
    }

    fn field<'a>(id: &'a Value, source: &'a Record, field: &str) -> Option<&'a Value> {
        if field == "_id" {
            Some(id)
        } else {
            source.get(field).filter(|v| !v.is_null())
        }
    }

    fn matches(id: &str, source: &Record, query: &Value) -> Result<bool, DriverError> {
        let id_value = Value::String(id.to_string());
        let (kind, body) = query
            .as_object()
            .and_then(|q| q.iter().next())
            .ok_or_else(|| driver_error(format!("malformed query {}", query)))?;

        let single = |body: &Value| -> Result<(String, Value), DriverError> {
            body.as_object()
                .and_then(|b| b.iter().next())
                .map(|(f, v)| (f.clone(), v.clone()))
                .ok_or_else(|| driver_error(format!("malformed clause {}", body)))
        };

        let matched = match kind.as_str() {
            "match_all" => true,
            "match_none" => false,
            "multi_match" => {
                let text = body["query"].as_str().unwrap_or_default().to_lowercase();
                let wanted: Vec<&str> = text.split_whitespace().collect();
                body["fields"].as_array().into_iter().flatten().any(|field| {
                    let field = field.as_str().unwrap_or_default();
                    match Self::field(&id_value, source, field).and_then(Value::as_str) {
                        Some(value) => {
                            let value = value.to_lowercase();
                            let tokens: Vec<&str> = value.split_whitespace().collect();
                            !wanted.is_empty() && wanted.iter().all(|w| tokens.contains(w))
                        }
                        None => false,
                    }
                })
            }
            "term" => {
                let (field, expected) = single(body)?;
                Self::field(&id_value, source, &field).is_some_and(|v| json_eq(v, &expected))
            }
            "terms" => {
                let (field, expected) = single(body)?;
                let options = expected.as_array().cloned().unwrap_or_default();
                Self::field(&id_value, source, &field)
                    .is_some_and(|v| options.iter().any(|o| json_eq(v, o)))
            }
            "range" => {
                let (field, bounds) = single(body)?;
                match Self::field(&id_value, source, &field) {
                    None => false,
                    Some(value) => bounds.as_object().into_iter().flatten().all(|(op, bound)| {
                        match (op.as_str(), json_cmp(value, bound)) {
                            ("gt", Some(o)) => o == Ordering::Greater,
                            ("gte", Some(o)) => o != Ordering::Less,
                            ("lt", Some(o)) => o == Ordering::Less,
                            ("lte", Some(o)) => o != Ordering::Greater,
                            _ => false,
                        }
                    }),
                }
            }
            "wildcard" => {
                let (field, spec) = single(body)?;
                let pattern = wildcard_to_regex(spec["value"].as_str().unwrap_or_default());
                let re = RegexBuilder::new(&pattern)
                    .case_insensitive(spec["case_insensitive"].as_bool().unwrap_or(false))
                    .build()
                    .map_err(|e| driver_error(e.to_string()))?;
                Self::field(&id_value, source, &field)
                    .and_then(Value::as_str)
                    .is_some_and(|v| re.is_match(v))
            }
            "exists" => {
                let field = body["field"].as_str().unwrap_or_default();
                Self::field(&id_value, source, field).is_some()
            }
            "bool" => {
                let clauses = |name: &str| -> Vec<Value> {
                    body.get(name).and_then(Value::as_array).cloned().unwrap_or_default()
                };
                let mut ok = true;
                for clause in clauses("must").iter().chain(clauses("filter").iter()) {
                    ok &= Self::matches(id, source, clause)?;
                }
                for clause in clauses("must_not") {
                    ok &= !Self::matches(id, source, &clause)?;
                }
                let should = clauses("should");
                if !should.is_empty() {
                    let minimum = body["minimum_should_match"].as_u64().unwrap_or(1) as usize;
                    let mut hits = 0;
                    for clause in &should {
                        if Self::matches(id, source, clause)? {
                            hits += 1;
                        }
                    }
                    ok &= hits >= minimum;
                }
                ok
            }
            other => return Err(driver_error(format!("unsupported query {}", other))),
        };
        Ok(matched)
    }

    fn matching(&self, index: &str, query: &Value) -> Result<Vec<(String, Record)>, DriverError> {
        let indexes = self.indexes.lock().unwrap();
        let index = indexes
            .get(index)
            .ok_or_else(|| driver_error(format!("no such index {}", index)))?;
        let mut hits = Vec::new();
        for (id, source) in &index.docs {
            if Self::matches(id, source, query)? {
                hits.push((id.clone(), source.clone()));
            }
        }
        Ok(hits)
    }
}

/// Hits returned when a search body carries no `size`
const DEFAULT_SIZE: u64 = 10;

/// One sort entry: `{field: "asc"}` or `{field: {order, missing}}`.
/// Missing values go last unless `missing` is `_first`.
struct SortKey {
    field: String,
    desc: bool,
    missing_first: bool,
}

impl SortKey {
    fn parse(field: &str, spec: &Value) -> Self {
        let (order, missing) = match spec {
            Value::Object(options) => (
                options.get("order").and_then(Value::as_str).unwrap_or("asc"),
                options.get("missing").and_then(Value::as_str).unwrap_or("_last"),
            ),
            other => (other.as_str().unwrap_or("asc"), "_last"),
        };
        Self {
            field: field.to_string(),
            desc: order == "desc",
            missing_first: missing == "_first",
        }
    }

    fn compare(&self, a: Option<&Value>, b: Option<&Value>) -> Ordering {
        let missing = if self.missing_first { Ordering::Less } else { Ordering::Greater };
        let (a, b) = (a.filter(|v| !v.is_null()), b.filter(|v| !v.is_null()));
        match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => missing,
            (Some(_), None) => missing.reverse(),
            (Some(_), Some(_)) => {
                let ord = json_sort(a, b);
                if self.desc {
                    ord.reverse()
                } else {
                    ord
                }
            }
        }
    }
}

fn wildcard_to_regex(pattern: &str) -> String {
    let mut out = String::from("^");
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push_str(&regex::escape(&next.to_string()));
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

#[async_trait]
impl SearchTransport for FakeSearch {
    async fn index_exists(&self, index: &str) -> Result<bool, DriverError> {
        Ok(self.indexes.lock().unwrap().contains_key(index))
    }

    async fn create_index(&self, index: &str, body: Value) -> Result<(), DriverError> {
        let mut indexes = self.indexes.lock().unwrap();
        if indexes.contains_key(index) {
            return Err(driver_error(format!("index {} already exists", index)));
        }
        indexes.insert(
            index.to_string(),
            FakeIndex {
                mappings: body.get("mappings").cloned().unwrap_or(Value::Null),
                docs: Vec::new(),
            },
        );
        Ok(())
    }

    async fn put_mapping(&self, index: &str, mappings: Value) -> Result<(), DriverError> {
        let mut indexes = self.indexes.lock().unwrap();
        let index = indexes
            .get_mut(index)
            .ok_or_else(|| driver_error(format!("no such index {}", index)))?;
        index.mappings = mappings;
        *self.mapping_updates.lock().unwrap() += 1;
        Ok(())
    }

    async fn search(&self, index: &str, body: Value) -> Result<SearchHits, DriverError> {
        let mut hits = self.matching(index, &body["query"])?;
        let total = hits.len() as u64;

        if let Some(sort) = body.get("sort").and_then(Value::as_array) {
            let keys: Vec<SortKey> = sort
                .iter()
                .filter_map(|entry| entry.as_object()?.iter().next())
                .map(|(field, spec)| SortKey::parse(field, spec))
                .collect();
            hits.sort_by(|(a_id, a), (b_id, b)| {
                let a_id = Value::String(a_id.clone());
                let b_id = Value::String(b_id.clone());
                for key in &keys {
                    let ord = key.compare(Self::field(&a_id, a, &key.field), Self::field(&b_id, b, &key.field));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        let from = body["from"].as_u64().unwrap_or(0) as usize;
        let size = body["size"].as_u64().unwrap_or(DEFAULT_SIZE) as usize;
        Ok(SearchHits {
            total,
            hits: hits
                .into_iter()
                .skip(from)
                .take(size)
                .map(|(id, source)| SearchHit { id, source })
                .collect(),
        })
    }

    async fn count(&self, index: &str, body: Value) -> Result<u64, DriverError> {
        Ok(self.matching(index, &body["query"])?.len() as u64)
    }

    async fn index_document(&self, index: &str, id: &str, source: Record, _refresh: bool) -> Result<(), DriverError> {
        let mut indexes = self.indexes.lock().unwrap();
        let index = indexes
            .get_mut(index)
            .ok_or_else(|| driver_error(format!("no such index {}", index)))?;
        index.docs.retain(|(existing, _)| existing != id);
        index.docs.push((id.to_string(), source));
        Ok(())
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Record>, DriverError> {
        let indexes = self.indexes.lock().unwrap();
        Ok(indexes
            .get(index)
            .and_then(|i| i.docs.iter().find(|(existing, _)| existing == id))
            .map(|(_, source)| source.clone()))
    }

    async fn update_document(&self, index: &str, id: &str, patch: Record, _refresh: bool) -> Result<bool, DriverError> {
        let mut indexes = self.indexes.lock().unwrap();
        let Some(doc) = indexes
            .get_mut(index)
            .and_then(|i| i.docs.iter_mut().find(|(existing, _)| existing == id))
        else {
            return Ok(false);
        };
        for (key, value) in patch {
            doc.1.insert(key, value);
        }
        Ok(true)
    }

    async fn delete_document(&self, index: &str, id: &str, _refresh: bool) -> Result<bool, DriverError> {
        let mut indexes = self.indexes.lock().unwrap();
        let Some(index) = indexes.get_mut(index) else {
            return Ok(false);
        };
        let before = index.docs.len();
        index.docs.retain(|(existing, _)| existing != id);
        Ok(index.docs.len() < before)
    }

    async fn delete_by_query(&self, index: &str, body: Value, _refresh: bool) -> Result<u64, DriverError> {
        let doomed: Vec<String> = self
            .matching(index, &body["query"])?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        let mut indexes = self.indexes.lock().unwrap();
        if let Some(index) = indexes.get_mut(index) {
            index.docs.retain(|(id, _)| !doomed.contains(id));
        }
        Ok(doomed.len() as u64)
    }
}

// =============================================================================
// LOCAL ACTION CALLER
// =============================================================================

/// Routes `service.action` to registered services in-process
#[derive(Default)]
pub struct LocalBroker {
    services: RwLock<HashMap<String, Arc<Service>>>,
    pub calls: Mutex<Vec<(String, Value)>>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, service: Arc<Service>) {
        self.services
            .write()
            .unwrap()
            .insert(service.name().to_string(), service);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ActionCaller for LocalBroker {
    async fn call(&self, action: &str, params: Value) -> DbResult<Value> {
        self.calls.lock().unwrap().push((action.to_string(), params.clone()));
        let (name, method) = action
            .split_once('.')
            .ok_or_else(|| DbError::validation(format!("malformed action {}", action)))?;
        let service = self
            .services
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::validation(format!("unknown service {}", name)))?;
        service.dispatch(method, params).await
    }
}
