//! # Search Query Translator
//!
//! Translates a [`Query`] into a search-index query DSL body:
//!
//! ```text
//! {
//!   "query": {"bool": {"must": [multi_match | match_all], "filter": [...]}},
//!   "size": limit, "from": offset,
//!   "sort": [{"field": {"order": "asc" | "desc", "missing": "_first" | "_last"}}]
//! }
//! ```
//!
//! A call without a limit asks for the whole result window instead of the
//! index default of 10 hits. Missing values sort first ascending and last
//! descending, the same as NULL in the relational engine.
//!
//! Filter leaves become `term`, `terms`, `range`, `wildcard` and `exists`
//! clauses. Negations require the field to exist so that missing fields
//! never match, the same as the relational engine.

use serde_json::{json, Map, Value};

use crate::query::{FilterExpr, FilterNode, FilterOperator, Query, SortDirection, SortSpec};

/// Native identifier field
pub const DOCUMENT_ID_FIELD: &str = "_id";

/// Largest `from + size` the index answers
pub const MAX_RESULT_WINDOW: u64 = 10_000;

/// Translator bound to the record identifier field
pub struct SearchTranslator<'a> {
    id_field: &'a str,
}

impl<'a> SearchTranslator<'a> {
    pub fn new(id_field: &'a str) -> Self {
        Self { id_field }
    }

    /// Full search body: query, window and sort
    pub fn translate(&self, query: &Query) -> Value {
        let mut body = Map::new();
        body.insert("query".to_string(), self.query_clause(query));
        let offset = query.offset.unwrap_or(0);
        let size = query
            .limit
            .unwrap_or_else(|| MAX_RESULT_WINDOW.saturating_sub(offset));
        body.insert("size".to_string(), json!(size));
        if offset > 0 {
            body.insert("from".to_string(), json!(offset));
        }
        if !query.sort.is_empty() {
            body.insert("sort".to_string(), self.sort(&query.sort));
        }
        Value::Object(body)
    }

    /// Count body: the query clause alone
    pub fn count_body(&self, query: &Query) -> Value {
        json!({ "query": self.query_clause(query) })
    }

    /// `multi_match` over the search fields (or `match_all`) plus the filter tree
    pub fn query_clause(&self, query: &Query) -> Value {
        let must = match (&query.search, query.search_fields.is_empty()) {
            (Some(text), false) => json!({
                "multi_match": {
                    "query": text,
                    "fields": query
                        .search_fields
                        .iter()
                        .map(|f| self.field_name(f))
                        .collect::<Vec<_>>(),
                }
            }),
            _ => json!({ "match_all": {} }),
        };

        let filter = self.clauses(&query.filter);
        if filter.is_empty() {
            return must;
        }
        json!({ "bool": { "must": [must], "filter": filter } })
    }

    /// `[{field: {order, missing}}]`
    pub fn sort(&self, sort: &[SortSpec]) -> Value {
        Value::Array(
            sort.iter()
                .map(|spec| {
                    let missing = match spec.direction {
                        SortDirection::Asc => "_first",
                        SortDirection::Desc => "_last",
                    };
                    let mut entry = Map::new();
                    entry.insert(
                        self.field_name(&spec.field),
                        json!({ "order": spec.direction.as_str(), "missing": missing }),
                    );
                    Value::Object(entry)
                })
                .collect(),
        )
    }

    pub fn field_name(&self, field: &str) -> String {
        if field == self.id_field {
            DOCUMENT_ID_FIELD.to_string()
        } else {
            field.to_string()
        }
    }

    fn clauses(&self, nodes: &[FilterNode]) -> Vec<Value> {
        nodes.iter().map(|node| self.node(node)).collect()
    }

    fn node(&self, node: &FilterNode) -> Value {
        match node {
            FilterNode::Leaf(expr) => self.leaf(expr),
            FilterNode::Or(groups) => {
                let should: Vec<Value> = groups
                    .iter()
                    .map(|group| json!({ "bool": { "filter": self.clauses(group) } }))
                    .collect();
                json!({ "bool": { "should": should, "minimum_should_match": 1 } })
            }
        }
    }

    fn leaf(&self, expr: &FilterExpr) -> Value {
        let field = self.field_name(&expr.field);
        let exists = json!({ "exists": { "field": field } });

        match expr.operator {
            FilterOperator::Eq => term(&field, &expr.value),
            FilterOperator::Neq => json!({
                "bool": { "filter": [exists], "must_not": [term(&field, &expr.value)] }
            }),
            FilterOperator::Gt => range(&field, &[("gt", &expr.value)]),
            FilterOperator::Gte => range(&field, &[("gte", &expr.value)]),
            FilterOperator::Lt => range(&field, &[("lt", &expr.value)]),
            FilterOperator::Lte => range(&field, &[("lte", &expr.value)]),
            FilterOperator::In => terms(&field, expr.list()),
            FilterOperator::NotIn => json!({
                "bool": { "filter": [exists], "must_not": [terms(&field, expr.list())] }
            }),
            FilterOperator::Between => match expr.bounds() {
                Some((low, high)) => range(&field, &[("gte", low), ("lte", high)]),
                None => json!({ "match_none": {} }),
            },
            FilterOperator::NotBetween => match expr.bounds() {
                Some((low, high)) => json!({
                    "bool": {
                        "should": [range(&field, &[("lt", low)]), range(&field, &[("gt", high)])],
                        "minimum_should_match": 1
                    }
                }),
                None => json!({ "match_none": {} }),
            },
            FilterOperator::Like => {
                let pattern = like_to_wildcard(expr.value.as_str().unwrap_or_default());
                let mut clause = Map::new();
                clause.insert(field, json!({ "value": pattern, "case_insensitive": true }));
                json!({ "wildcard": clause })
            }
            FilterOperator::IsNull => json!({ "bool": { "must_not": [exists] } }),
            FilterOperator::IsNotNull => exists,
        }
    }
}

fn keyed(kind: &str, field: &str, value: Value) -> Value {
    let mut inner = Map::new();
    inner.insert(field.to_string(), value);
    let mut outer = Map::new();
    outer.insert(kind.to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn term(field: &str, value: &Value) -> Value {
    keyed("term", field, value.clone())
}

fn terms(field: &str, values: &[Value]) -> Value {
    keyed("terms", field, Value::Array(values.to_vec()))
}

fn range(field: &str, bounds: &[(&str, &Value)]) -> Value {
    let limits: Map<String, Value> = bounds
        .iter()
        .map(|(op, value)| (op.to_string(), (*value).clone()))
        .collect();
    keyed("range", field, Value::Object(limits))
}

/// LIKE pattern to a wildcard pattern: `%` is `*`, `_` is `?`
pub fn like_to_wildcard(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for ch in pattern.chars() {
        match ch {
            '%' => out.push('*'),
            '_' => out.push('?'),
            '*' | '?' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            other => out.push(other),
        }
    }
    out
}
