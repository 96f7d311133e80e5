//! # Records
//!
//! Open-ended key/value records as returned by every adapter, plus the
//! single-vs-list shape the projector and populate engine must preserve.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A stored record: field name to JSON value
pub type Record = Map<String, Value>;

/// Result shape of an operation: one record or an ordered list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Records {
    /// Single record result (`get` by id, `findOne`)
    One(Record),
    /// Ordered list result
    Many(Vec<Record>),
}

impl Records {
    /// Number of records carried
    pub fn len(&self) -> usize {
        match self {
            Records::One(_) => 1,
            Records::Many(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate records in order
    pub fn iter(&self) -> Box<dyn Iterator<Item = &Record> + '_> {
        match self {
            Records::One(record) => Box::new(std::iter::once(record)),
            Records::Many(rows) => Box::new(rows.iter()),
        }
    }

    /// Apply `f` to every record in place, keeping shape and order
    pub fn for_each_mut(&mut self, mut f: impl FnMut(&mut Record)) {
        match self {
            Records::One(record) => f(record),
            Records::Many(rows) => rows.iter_mut().for_each(f),
        }
    }

    /// Unwrap into a list, wrapping a single record
    pub fn into_vec(self) -> Vec<Record> {
        match self {
            Records::One(record) => vec![record],
            Records::Many(rows) => rows,
        }
    }

    /// Render as JSON (object or array)
    pub fn into_value(self) -> Value {
        match self {
            Records::One(record) => Value::Object(record),
            Records::Many(rows) => Value::Array(rows.into_iter().map(Value::Object).collect()),
        }
    }
}

/// Render an identifier value as the string used in call keys and error context.
///
/// Strings are used verbatim, numbers and booleans by their JSON text.
/// Null, arrays and objects are not identifiers.
pub fn id_to_string(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Whether a field value counts as "set" for populate purposes
pub fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

/// Compares two optional JSON values for sorting.
///
/// Ordering rules:
/// - missing < null < bool < number < string
/// - For same types, natural ordering
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a_val), Some(b_val)) => {
            let type_order = |v: &Value| -> u8 {
                match v {
                    Value::Null => 0,
                    Value::Bool(_) => 1,
                    Value::Number(_) => 2,
                    Value::String(_) => 3,
                    Value::Array(_) => 4,
                    Value::Object(_) => 5,
                }
            };

            let a_type = type_order(a_val);
            let b_type = type_order(b_val);
            if a_type != b_type {
                return a_type.cmp(&b_type);
            }

            match (a_val, b_val) {
                (Value::Bool(a_b), Value::Bool(b_b)) => a_b.cmp(b_b),
                (Value::Number(a_n), Value::Number(b_n)) => {
                    let a_f = a_n.as_f64().unwrap_or(0.0);
                    let b_f = b_n.as_f64().unwrap_or(0.0);
                    a_f.partial_cmp(&b_f).unwrap_or(Ordering::Equal)
                }
                (Value::String(a_s), Value::String(b_s)) => a_s.cmp(b_s),
                _ => Ordering::Equal,
            }
        }
    }
}
