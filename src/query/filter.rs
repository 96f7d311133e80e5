//! # Filter Tree
//!
//! Backend-agnostic WHERE-style conditions: leaf comparisons combined with
//! implicit AND, plus OR-groups whose children are themselves conjunctions.
//!
//! Evaluation follows SQL semantics so that the in-process store agrees with
//! the relational engine: a missing or null field never satisfies a
//! comparison, only the null tests.

use std::cmp::Ordering;
use std::str::FromStr;

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{DbError, DbResult};
use crate::record::Record;

/// Filter operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOperator {
    /// Equals
    #[serde(rename = "eq")]
    Eq,

    /// Not equals
    #[serde(rename = "neq")]
    Neq,

    /// Greater than
    #[serde(rename = "gt")]
    Gt,

    /// Greater than or equal
    #[serde(rename = "gte")]
    Gte,

    /// Less than
    #[serde(rename = "lt")]
    Lt,

    /// Less than or equal
    #[serde(rename = "lte")]
    Lte,

    /// Pattern match (`%` any run, `_` one char)
    #[serde(rename = "like")]
    Like,

    /// Value in list
    #[serde(rename = "in")]
    In,

    /// Value not in list
    #[serde(rename = "not-in")]
    NotIn,

    /// Inclusive range `[a, b]`
    #[serde(rename = "between")]
    Between,

    /// Outside inclusive range `[a, b]`
    #[serde(rename = "not-between")]
    NotBetween,

    /// Field is null or missing
    #[serde(rename = "is-null")]
    IsNull,

    /// Field is set and not null
    #[serde(rename = "is-not-null")]
    IsNotNull,
}

impl FilterOperator {
    /// Get the operator string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "eq",
            FilterOperator::Neq => "neq",
            FilterOperator::Gt => "gt",
            FilterOperator::Gte => "gte",
            FilterOperator::Lt => "lt",
            FilterOperator::Lte => "lte",
            FilterOperator::Like => "like",
            FilterOperator::In => "in",
            FilterOperator::NotIn => "not-in",
            FilterOperator::Between => "between",
            FilterOperator::NotBetween => "not-between",
            FilterOperator::IsNull => "is-null",
            FilterOperator::IsNotNull => "is-not-null",
        }
    }

    /// Null tests take no operand
    pub fn is_unary(&self) -> bool {
        matches!(self, FilterOperator::IsNull | FilterOperator::IsNotNull)
    }

    /// Operators whose operand is a list
    pub fn takes_list(&self) -> bool {
        matches!(
            self,
            FilterOperator::In
                | FilterOperator::NotIn
                | FilterOperator::Between
                | FilterOperator::NotBetween
        )
    }
}

impl FromStr for FilterOperator {
    type Err = DbError;

    /// Accepts symbolic (`<=`, `<>`) and named (`lte`, `not in`) spellings,
    /// case-insensitively, with `-`, `_` or spaces between words.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s
            .trim()
            .to_ascii_lowercase()
            .replace(['-', '_'], " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        let op = match normalized.as_str() {
            "=" | "==" | "eq" => FilterOperator::Eq,
            "<>" | "!=" | "neq" | "ne" => FilterOperator::Neq,
            ">" | "gt" => FilterOperator::Gt,
            ">=" | "gte" => FilterOperator::Gte,
            "<" | "lt" => FilterOperator::Lt,
            "<=" | "lte" => FilterOperator::Lte,
            "like" => FilterOperator::Like,
            "in" => FilterOperator::In,
            "not in" | "nin" | "notin" => FilterOperator::NotIn,
            "between" => FilterOperator::Between,
            "not between" | "notbetween" => FilterOperator::NotBetween,
            "is null" | "isnull" => FilterOperator::IsNull,
            "is not null" | "isnotnull" | "not null" => FilterOperator::IsNotNull,
            _ => return Err(DbError::validation(format!("Unknown filter operator: {}", s))),
        };
        Ok(op)
    }
}

/// A leaf comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterExpr {
    /// Field to filter on
    pub field: String,

    /// Comparison operator
    pub operator: FilterOperator,

    /// Value to compare against (a 2-element array for ranges, a list for
    /// set membership, ignored for null tests)
    pub value: Value,
}

impl FilterExpr {
    /// Create a filter expression, checking the operand shape
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: Value) -> DbResult<Self> {
        let field = field.into();
        if field.is_empty() {
            return Err(DbError::validation("Filter field name cannot be empty"));
        }

        match operator {
            FilterOperator::Between | FilterOperator::NotBetween => match value.as_array() {
                Some(bounds) if bounds.len() == 2 => {}
                _ => {
                    return Err(DbError::validation(format!(
                        "Operator {} on '{}' requires a [low, high] pair",
                        operator.as_str(),
                        field
                    )))
                }
            },
            FilterOperator::In | FilterOperator::NotIn => {
                if !value.is_array() {
                    return Err(DbError::validation(format!(
                        "Operator {} on '{}' requires a list",
                        operator.as_str(),
                        field
                    )));
                }
            }
            FilterOperator::Like => {
                if !value.is_string() {
                    return Err(DbError::validation(format!(
                        "Operator like on '{}' requires a string pattern",
                        field
                    )));
                }
            }
            _ => {}
        }

        let value = if operator.is_unary() { Value::Null } else { value };
        Ok(Self {
            field,
            operator,
            value,
        })
    }

    /// Create an equality filter
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            operator: FilterOperator::Eq,
            value,
        }
    }

    /// Range bounds for between / not-between
    pub fn bounds(&self) -> Option<(&Value, &Value)> {
        match self.value.as_array() {
            Some(pair) if pair.len() == 2 => Some((&pair[0], &pair[1])),
            _ => None,
        }
    }

    /// List operand for in / not-in
    pub fn list(&self) -> &[Value] {
        self.value.as_array().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Check if a record matches this filter
    pub fn matches(&self, record: &Record) -> bool {
        let field_value = match record.get(&self.field) {
            Some(Value::Null) | None => return self.operator == FilterOperator::IsNull,
            Some(v) => v,
        };

        match self.operator {
            FilterOperator::IsNull => false,
            FilterOperator::IsNotNull => true,
            FilterOperator::Eq => values_equal(field_value, &self.value),
            FilterOperator::Neq => !self.value.is_null() && !values_equal(field_value, &self.value),
            FilterOperator::Gt => compare_json_values(field_value, &self.value) == Some(Ordering::Greater),
            FilterOperator::Gte => matches!(
                compare_json_values(field_value, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOperator::Lt => compare_json_values(field_value, &self.value) == Some(Ordering::Less),
            FilterOperator::Lte => matches!(
                compare_json_values(field_value, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOperator::Like => match (field_value.as_str(), self.value.as_str()) {
                (Some(text), Some(pattern)) => matches_like_pattern(text, pattern),
                _ => false,
            },
            FilterOperator::In => self.list().iter().any(|v| values_equal(field_value, v)),
            FilterOperator::NotIn => !self.list().iter().any(|v| values_equal(field_value, v)),
            FilterOperator::Between => self.in_range(field_value) == Some(true),
            FilterOperator::NotBetween => self.in_range(field_value) == Some(false),
        }
    }

    fn in_range(&self, value: &Value) -> Option<bool> {
        let (low, high) = self.bounds()?;
        let above = compare_json_values(value, low)?;
        let below = compare_json_values(value, high)?;
        Some(above != Ordering::Less && below != Ordering::Greater)
    }
}

/// A node of the filter tree
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    /// Single comparison
    Leaf(FilterExpr),
    /// Disjunction of conjunctions: `(a AND b) OR (c)`
    Or(Vec<Vec<FilterNode>>),
}

impl FilterNode {
    /// Check if a record matches this node
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            FilterNode::Leaf(expr) => expr.matches(record),
            FilterNode::Or(groups) => groups.iter().any(|group| matches_all(group, record)),
        }
    }

    /// Visit every leaf in the subtree
    pub fn leaves(&self) -> Vec<&FilterExpr> {
        match self {
            FilterNode::Leaf(expr) => vec![expr],
            FilterNode::Or(groups) => groups
                .iter()
                .flat_map(|group| group.iter().flat_map(FilterNode::leaves))
                .collect(),
        }
    }
}

/// Check a record against sibling nodes (implicit AND)
pub fn matches_all(nodes: &[FilterNode], record: &Record) -> bool {
    nodes.iter().all(|node| node.matches(record))
}

/// Equality with numeric normalization (`25 == 25.0`)
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_json_values(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

/// Compare two JSON values of the same kind; mixed kinds are incomparable
fn compare_json_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => {
            let a_f = a.as_f64()?;
            let b_f = b.as_f64()?;
            a_f.partial_cmp(&b_f)
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// LIKE matching, ASCII case-insensitive like SQLite's default
pub fn matches_like_pattern(value: &str, pattern: &str) -> bool {
    let regex = like_to_regex(pattern);
    RegexBuilder::new(&regex)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .map(|re| re.is_match(value))
        .unwrap_or(false)
}

/// Translate a LIKE pattern into an anchored regular expression
pub fn like_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    for ch in pattern.chars() {
        match ch {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}
