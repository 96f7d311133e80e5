//! # Document Filter Translator
//!
//! Pure translation of a [`Query`] into a structural match document plus
//! find options. Null handling follows the relational engine: a missing or
//! null field fails every comparison except the null test, so `$ne` and
//! `$nin` also exclude nulls.

use bson::oid::ObjectId;
use bson::{Bson, Document};
use serde_json::Value;

use crate::errors::{DbError, DbResult};
use crate::query::filter::like_to_regex;
use crate::query::{FilterExpr, FilterNode, FilterOperator, Query, SortSpec};
use crate::record::Record;

/// Native identifier field
pub const OBJECT_ID_FIELD: &str = "_id";

/// Native find options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub limit: Option<u64>,
    pub skip: Option<u64>,
    /// Ordered `{field: 1 | -1}`
    pub sort: Option<Document>,
}

/// Translated find request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentQuery {
    pub filter: Document,
    pub options: FindOptions,
}

/// Translator bound to the record identifier field
pub struct DocumentTranslator<'a> {
    id_field: &'a str,
}

impl<'a> DocumentTranslator<'a> {
    pub fn new(id_field: &'a str) -> Self {
        Self { id_field }
    }

    pub fn translate(&self, query: &Query) -> DbResult<DocumentQuery> {
        Ok(DocumentQuery {
            filter: self.filter(query)?,
            options: FindOptions {
                limit: query.limit,
                skip: query.offset.filter(|o| *o > 0),
                sort: self.sort(&query.sort),
            },
        })
    }

    /// Match document for the filter tree and the search shorthand
    pub fn filter(&self, query: &Query) -> DbResult<Document> {
        self.conjunction(&query.conditions())
    }

    /// Ordered sort document, `None` when there is nothing to sort on
    pub fn sort(&self, sort: &[SortSpec]) -> Option<Document> {
        if sort.is_empty() {
            return None;
        }
        let mut doc = Document::new();
        for spec in sort {
            doc.insert(self.field_name(&spec.field), Bson::Int32(spec.direction.signum()));
        }
        Some(doc)
    }

    /// Native field name; the record id lives in `_id`
    pub fn field_name(&self, field: &str) -> String {
        if field == self.id_field {
            OBJECT_ID_FIELD.to_string()
        } else {
            field.to_string()
        }
    }

    /// Sibling nodes merged into one document. A clause whose key is
    /// already taken moves under `$and`.
    fn conjunction(&self, nodes: &[FilterNode]) -> DbResult<Document> {
        let mut merged = Document::new();
        let mut overflow = Vec::new();

        for node in nodes {
            let clause = self.node(node)?;
            if clause.keys().any(|key| merged.contains_key(key)) {
                overflow.push(Bson::Document(clause));
            } else {
                for (key, value) in clause {
                    merged.insert(key, value);
                }
            }
        }

        if !overflow.is_empty() {
            merged.insert("$and", overflow);
        }
        Ok(merged)
    }

    fn node(&self, node: &FilterNode) -> DbResult<Document> {
        match node {
            FilterNode::Leaf(expr) => self.leaf(expr),
            FilterNode::Or(groups) if groups.len() == 1 => self.conjunction(&groups[0]),
            FilterNode::Or(groups) => {
                let branches = groups
                    .iter()
                    .map(|group| self.conjunction(group).map(Bson::Document))
                    .collect::<DbResult<Vec<_>>>()?;
                let mut clause = Document::new();
                clause.insert("$or", branches);
                Ok(clause)
            }
        }
    }

    fn leaf(&self, expr: &FilterExpr) -> DbResult<Document> {
        let field = self.field_name(&expr.field);

        let condition = match expr.operator {
            FilterOperator::Eq => self.value(&expr.field, &expr.value)?,
            FilterOperator::Neq => {
                operator("$nin", Bson::Array(vec![self.value(&expr.field, &expr.value)?, Bson::Null]))
            }
            FilterOperator::Gt => operator("$gt", self.value(&expr.field, &expr.value)?),
            FilterOperator::Gte => operator("$gte", self.value(&expr.field, &expr.value)?),
            FilterOperator::Lt => operator("$lt", self.value(&expr.field, &expr.value)?),
            FilterOperator::Lte => operator("$lte", self.value(&expr.field, &expr.value)?),
            FilterOperator::In => operator("$in", Bson::Array(self.values(&expr.field, expr.list())?)),
            FilterOperator::NotIn => {
                let mut excluded = self.values(&expr.field, expr.list())?;
                excluded.push(Bson::Null);
                operator("$nin", Bson::Array(excluded))
            }
            FilterOperator::Between => {
                let (low, high) = self.bounds(expr)?;
                let mut range = Document::new();
                range.insert("$gte", low);
                range.insert("$lte", high);
                Bson::Document(range)
            }
            FilterOperator::NotBetween => {
                let (low, high) = self.bounds(expr)?;
                let mut below = Document::new();
                below.insert(field.clone(), operator("$lt", low));
                let mut above = Document::new();
                above.insert(field, operator("$gt", high));

                let mut clause = Document::new();
                clause.insert("$or", vec![Bson::Document(below), Bson::Document(above)]);
                return Ok(clause);
            }
            FilterOperator::Like => {
                let pattern = expr.value.as_str().unwrap_or_default();
                let mut regex = Document::new();
                regex.insert("$regex", like_to_regex(pattern));
                regex.insert("$options", "is");
                Bson::Document(regex)
            }
            FilterOperator::IsNull => Bson::Null,
            FilterOperator::IsNotNull => operator("$ne", Bson::Null),
        };

        let mut clause = Document::new();
        clause.insert(field, condition);
        Ok(clause)
    }

    fn bounds(&self, expr: &FilterExpr) -> DbResult<(Bson, Bson)> {
        let (low, high) = expr.bounds().ok_or_else(|| {
            DbError::validation(format!("{} requires a [low, high] pair", expr.operator.as_str()))
        })?;
        Ok((self.value(&expr.field, low)?, self.value(&expr.field, high)?))
    }

    fn values(&self, field: &str, items: &[Value]) -> DbResult<Vec<Bson>> {
        items.iter().map(|item| self.value(field, item)).collect()
    }

    /// Native value; hex strings compared against the id become object ids
    fn value(&self, field: &str, value: &Value) -> DbResult<Bson> {
        if field == self.id_field {
            if let Some(oid) = value.as_str().and_then(|s| ObjectId::parse_str(s).ok()) {
                return Ok(Bson::ObjectId(oid));
            }
        }
        json_to_bson(value)
    }
}

fn operator(name: &str, value: Bson) -> Bson {
    let mut doc = Document::new();
    doc.insert(name, value);
    Bson::Document(doc)
}

/// Convert a JSON value to its native form
pub fn json_to_bson(value: &Value) -> DbResult<Bson> {
    bson::to_bson(value).map_err(|e| DbError::validation(format!("Unsupported value {}: {}", value, e)))
}

/// Parse a record id into an object id
pub fn parse_object_id(id: &Value) -> DbResult<ObjectId> {
    id.as_str()
        .and_then(|s| ObjectId::parse_str(s.trim()).ok())
        .ok_or_else(|| DbError::invalid_id(crate::adapter::id_label(id)))
}

/// Stored document to record: `_id` becomes the id field, object ids as hex
pub fn document_to_record(mut doc: Document, id_field: &str) -> Record {
    let id = doc.remove(OBJECT_ID_FIELD);
    let mut record = match Bson::Document(doc).into_relaxed_extjson() {
        Value::Object(map) => map,
        _ => Record::new(),
    };
    if let Some(id) = id {
        record.insert(id_field.to_string(), id_to_json(id));
    }
    record
}

/// Record to storable document, without any identifier
pub fn record_to_document(record: &Record, id_field: &str) -> DbResult<Document> {
    let mut doc = bson::to_document(record)
        .map_err(|e| DbError::validation(format!("Record cannot be stored: {}", e)))?;
    doc.remove(id_field);
    doc.remove(OBJECT_ID_FIELD);
    Ok(doc)
}

/// Identifier as seen by callers
pub fn id_to_json(id: Bson) -> Value {
    match id {
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        other => other.into_relaxed_extjson(),
    }
}
