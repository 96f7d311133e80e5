//! # Filter Compiler
//!
//! Compiles a [`Query`] into WHERE, ORDER BY and LIMIT clauses for the
//! embedded engine. Literals are formatted by the declared column type:
//! text quoted (quotes doubled), integers raw, floats with six decimals,
//! dates in the stored timestamp form, bytes as blob literals.
//!
//! Fields that are not declared columns (or the id) are dropped from
//! filtering, ordering and projection.

use std::fmt::Write as _;

use serde_json::Value;
use tracing::debug;

use super::codec::{encode, ColumnValue, StoredValue};
use super::column::{Column, ColumnType};
use crate::config::ALL_FIELDS;
use crate::query::{FilterExpr, FilterNode, FilterOperator, Query};

/// Compiled clauses; each is empty when it does not apply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledQuery {
    pub where_clause: String,
    pub order_clause: String,
    pub limit_clause: String,
}

/// Compiler bound to a table's declared columns
pub struct FilterCompiler<'a> {
    id_field: &'a str,
    columns: &'a [Column],
}

impl<'a> FilterCompiler<'a> {
    pub fn new(id_field: &'a str, columns: &'a [Column]) -> Self {
        Self { id_field, columns }
    }

    /// Compile every clause
    pub fn compile(&self, query: &Query) -> CompiledQuery {
        CompiledQuery {
            where_clause: self.where_clause(query),
            order_clause: self.order_clause(query),
            limit_clause: limit_clause(query.limit, query.offset),
        }
    }

    /// `WHERE ...` over the filter tree plus the search shorthand
    pub fn where_clause(&self, query: &Query) -> String {
        let fragments = self.compile_nodes(&query.conditions());
        if fragments.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", fragments.join(" AND "))
        }
    }

    /// `ORDER BY ...` over declared sort fields
    pub fn order_clause(&self, query: &Query) -> String {
        let entries: Vec<String> = query
            .sort
            .iter()
            .filter(|spec| {
                let known = self.column_type(&spec.field).is_some();
                if !known {
                    debug!(field = %spec.field, "sort on undeclared field dropped");
                }
                known
            })
            .map(|spec| format!("{} {}", spec.field, spec.direction.keyword()))
            .collect();

        if entries.is_empty() {
            String::new()
        } else {
            format!("ORDER BY {}", entries.join(", "))
        }
    }

    /// Projected columns: declared names from `requested` (`**` = all),
    /// always including the id
    pub fn select_fields(&self, requested: &[String]) -> Vec<String> {
        let mut fields: Vec<String> = Vec::new();
        if requested.iter().any(|f| f == ALL_FIELDS) {
            fields.extend(self.columns.iter().map(|c| c.name.clone()));
        } else {
            for field in requested {
                if self.column_type(field).is_some() && !fields.contains(field) {
                    fields.push(field.clone());
                }
            }
        }

        if !fields.iter().any(|f| f == self.id_field) {
            fields.push(self.id_field.to_string());
        }
        fields
    }

    /// Declared type of a field; the id column is an integer
    pub fn column_type(&self, field: &str) -> Option<ColumnType> {
        if field == self.id_field {
            return Some(ColumnType::Integer);
        }
        self.columns
            .iter()
            .find(|c| c.name == field)
            .map(|c| c.column_type)
    }

    fn compile_nodes(&self, nodes: &[FilterNode]) -> Vec<String> {
        nodes.iter().filter_map(|node| self.compile_node(node)).collect()
    }

    fn compile_node(&self, node: &FilterNode) -> Option<String> {
        match node {
            FilterNode::Leaf(expr) => self.compile_leaf(expr),
            FilterNode::Or(groups) => {
                let branches: Vec<String> = groups
                    .iter()
                    .filter_map(|group| {
                        let fragments = self.compile_nodes(group);
                        match fragments.len() {
                            0 => None,
                            1 => fragments.into_iter().next(),
                            _ => Some(format!("({})", fragments.join(" AND "))),
                        }
                    })
                    .collect();

                if branches.is_empty() {
                    None
                } else {
                    Some(format!("({})", branches.join(" OR ")))
                }
            }
        }
    }

    fn compile_leaf(&self, expr: &FilterExpr) -> Option<String> {
        let Some(ty) = self.column_type(&expr.field) else {
            debug!(field = %expr.field, "filter on undeclared field dropped");
            return None;
        };
        let field = &expr.field;

        let fragment = match expr.operator {
            FilterOperator::IsNull => format!("{} IS NULL", field),
            FilterOperator::IsNotNull => format!("{} IS NOT NULL", field),
            FilterOperator::Like => format!("{} LIKE {}", field, quote(&text_of(&expr.value))),
            // `IN ()` matches nothing; `NOT IN ()` would also match NULL
            FilterOperator::In if expr.list().is_empty() => "0".to_string(),
            FilterOperator::NotIn if expr.list().is_empty() => format!("{} IS NOT NULL", field),
            FilterOperator::In | FilterOperator::NotIn => {
                let items: Vec<String> = expr.list().iter().map(|v| literal(ty, v)).collect();
                let keyword = if expr.operator == FilterOperator::In { "IN" } else { "NOT IN" };
                format!("{} {} ({})", field, keyword, items.join(", "))
            }
            FilterOperator::Between | FilterOperator::NotBetween => {
                let (low, high) = expr.bounds()?;
                let keyword = if expr.operator == FilterOperator::Between {
                    "BETWEEN"
                } else {
                    "NOT BETWEEN"
                };
                format!(
                    "{} {} {} AND {}",
                    field,
                    keyword,
                    literal(ty, low),
                    literal(ty, high)
                )
            }
            FilterOperator::Eq => format!("{} = {}", field, literal(ty, &expr.value)),
            FilterOperator::Neq => format!("{} <> {}", field, literal(ty, &expr.value)),
            FilterOperator::Lt => format!("{} < {}", field, literal(ty, &expr.value)),
            FilterOperator::Lte => format!("{} <= {}", field, literal(ty, &expr.value)),
            FilterOperator::Gt => format!("{} > {}", field, literal(ty, &expr.value)),
            FilterOperator::Gte => format!("{} >= {}", field, literal(ty, &expr.value)),
        };
        Some(fragment)
    }
}

/// `LIMIT n [OFFSET m]`; an offset alone uses `LIMIT -1`
pub fn limit_clause(limit: Option<u64>, offset: Option<u64>) -> String {
    match (limit, offset.filter(|o| *o > 0)) {
        (Some(limit), Some(offset)) => format!("LIMIT {} OFFSET {}", limit, offset),
        (Some(limit), None) => format!("LIMIT {}", limit),
        (None, Some(offset)) => format!("LIMIT -1 OFFSET {}", offset),
        (None, None) => String::new(),
    }
}

/// Render a JSON value as a literal for a column of type `ty`
pub fn literal(ty: ColumnType, value: &Value) -> String {
    if value.is_null() {
        return "NULL".to_string();
    }
    match ColumnValue::from_json(ty, value).map(|typed| encode(ty, &typed)) {
        Some(Ok(stored)) => stored_literal(&stored),
        _ => quote(&text_of(value)),
    }
}

fn stored_literal(stored: &StoredValue) -> String {
    match stored {
        StoredValue::Null => "NULL".to_string(),
        StoredValue::Text(s) => quote(s),
        StoredValue::Integer(i) => i.to_string(),
        StoredValue::Real(f) => format!("{:.6}", f),
        StoredValue::Blob(bytes) => {
            let mut out = String::with_capacity(bytes.len() * 2 + 3);
            out.push_str("X'");
            for byte in bytes {
                let _ = write!(out, "{:02X}", byte);
            }
            out.push('\'');
            out
        }
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Single-quoted SQL string literal
pub fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}
