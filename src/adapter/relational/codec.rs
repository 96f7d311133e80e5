//! # Value Codec
//!
//! Converts typed column values to the primitive storage classes of the
//! embedded engine and back. `decode(t, encode(t, v)) == v` for every
//! declared type.
//!
//! | type            | stored as                                   |
//! |-----------------|---------------------------------------------|
//! | string          | TEXT                                        |
//! | integer         | INTEGER                                     |
//! | number          | REAL                                        |
//! | boolean         | INTEGER 0/1                                 |
//! | list-of-string  | TEXT, items joined by [`LIST_SEPARATOR`]    |
//! | list-of-int     | TEXT, items joined by [`LIST_SEPARATOR`]    |
//! | map             | TEXT, JSON object                           |
//! | bytes           | BLOB, raw (base64 text on the JSON side)    |
//! | date            | TEXT, [`DATE_FORMAT`] in UTC                |
//!
//! A NULL stored value decodes to "field absent". So does an empty TEXT
//! value for types whose encoding is never empty (integer, number,
//! boolean, map, date). For string and list types the empty text is the
//! encoding of the empty value and decodes back to it.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Map, Number, Value};

use super::column::ColumnType;
use crate::errors::{DbError, DbResult};

/// Separator between list items; a control character not expected in user data
pub const LIST_SEPARATOR: &str = "\u{1f}";

/// Fixed-width, lexically sortable timestamp form (nanosecond precision)
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Typed value of a declared column
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Text(String),
    Integer(i64),
    Number(f64),
    Boolean(bool),
    StringList(Vec<String>),
    IntList(Vec<i64>),
    Map(Map<String, Value>),
    Bytes(Vec<u8>),
    Date(DateTime<Utc>),
}

/// Primitive storage class
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
    Blob(Vec<u8>),
}

impl ColumnValue {
    /// The column type this value belongs to
    pub fn column_type(&self) -> ColumnType {
        match self {
            ColumnValue::Text(_) => ColumnType::String,
            ColumnValue::Integer(_) => ColumnType::Integer,
            ColumnValue::Number(_) => ColumnType::Number,
            ColumnValue::Boolean(_) => ColumnType::Boolean,
            ColumnValue::StringList(_) => ColumnType::StringList,
            ColumnValue::IntList(_) => ColumnType::IntList,
            ColumnValue::Map(_) => ColumnType::Map,
            ColumnValue::Bytes(_) => ColumnType::Bytes,
            ColumnValue::Date(_) => ColumnType::Date,
        }
    }

    /// Convert a JSON field value for a column. `None` when the value is
    /// null or cannot be read as the column's type.
    pub fn from_json(ty: ColumnType, value: &Value) -> Option<Self> {
        match ty {
            ColumnType::String => match value {
                Value::String(s) => Some(ColumnValue::Text(s.clone())),
                Value::Number(n) => Some(ColumnValue::Text(n.to_string())),
                Value::Bool(b) => Some(ColumnValue::Text(b.to_string())),
                _ => None,
            },
            ColumnType::Integer => json_to_i64(value).map(ColumnValue::Integer),
            ColumnType::Number => match value {
                Value::Number(n) => n.as_f64().map(ColumnValue::Number),
                Value::String(s) => s.trim().parse().ok().map(ColumnValue::Number),
                _ => None,
            },
            ColumnType::Boolean => match value {
                Value::Bool(b) => Some(ColumnValue::Boolean(*b)),
                Value::Number(n) => n.as_i64().map(|i| ColumnValue::Boolean(i != 0)),
                Value::String(s) => parse_bool(s).map(ColumnValue::Boolean),
                _ => None,
            },
            ColumnType::StringList => value.as_array().map(|items| {
                ColumnValue::StringList(
                    items
                        .iter()
                        .map(|item| match item {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect(),
                )
            }),
            ColumnType::IntList => {
                let items = value.as_array()?;
                items
                    .iter()
                    .map(json_to_i64)
                    .collect::<Option<Vec<_>>>()
                    .map(ColumnValue::IntList)
            }
            ColumnType::Map => value.as_object().cloned().map(ColumnValue::Map),
            ColumnType::Bytes => match value {
                Value::String(s) => STANDARD.decode(s).ok().map(ColumnValue::Bytes),
                Value::Array(items) => items
                    .iter()
                    .map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
                    .collect::<Option<Vec<u8>>>()
                    .map(ColumnValue::Bytes),
                _ => None,
            },
            ColumnType::Date => match value {
                Value::String(s) => parse_date(s).map(ColumnValue::Date),
                Value::Number(n) => n
                    .as_i64()
                    .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                    .map(ColumnValue::Date),
                _ => None,
            },
        }
    }

    /// Render as a JSON field value
    pub fn into_json(self) -> Value {
        match self {
            ColumnValue::Text(s) => Value::String(s),
            ColumnValue::Integer(i) => Value::from(i),
            ColumnValue::Number(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
            ColumnValue::Boolean(b) => Value::Bool(b),
            ColumnValue::StringList(items) => Value::Array(items.into_iter().map(Value::String).collect()),
            ColumnValue::IntList(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            ColumnValue::Map(map) => Value::Object(map),
            ColumnValue::Bytes(bytes) => Value::String(STANDARD.encode(bytes)),
            ColumnValue::Date(at) => Value::String(at.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        }
    }
}

/// Encode a typed value for storage
pub fn encode(ty: ColumnType, value: &ColumnValue) -> DbResult<StoredValue> {
    if value.column_type() != ty {
        return Err(DbError::validation(format!(
            "Cannot store a {} value in a {} column",
            value.column_type(),
            ty
        )));
    }

    let stored = match value {
        ColumnValue::Text(s) => StoredValue::Text(s.clone()),
        ColumnValue::Integer(i) => StoredValue::Integer(*i),
        ColumnValue::Number(f) => StoredValue::Real(*f),
        ColumnValue::Boolean(b) => StoredValue::Integer(i64::from(*b)),
        ColumnValue::StringList(items) => StoredValue::Text(items.join(LIST_SEPARATOR)),
        ColumnValue::IntList(items) => StoredValue::Text(
            items
                .iter()
                .map(i64::to_string)
                .collect::<Vec<_>>()
                .join(LIST_SEPARATOR),
        ),
        ColumnValue::Map(map) => StoredValue::Text(
            serde_json::to_string(map).map_err(|e| DbError::backend("encode", e))?,
        ),
        ColumnValue::Bytes(bytes) => StoredValue::Blob(bytes.clone()),
        ColumnValue::Date(at) => StoredValue::Text(format_date(at)),
    };
    Ok(stored)
}

/// Decode a stored value. `Ok(None)` means the field is absent.
pub fn decode(ty: ColumnType, stored: StoredValue) -> DbResult<Option<ColumnValue>> {
    let corrupt = |detail: String| DbError::backend("decode", format!("{} column: {}", ty, detail));

    let value = match (ty, stored) {
        (_, StoredValue::Null) => None,

        (ColumnType::String, StoredValue::Text(s)) => Some(ColumnValue::Text(s)),
        (ColumnType::String, StoredValue::Integer(i)) => Some(ColumnValue::Text(i.to_string())),
        (ColumnType::String, StoredValue::Real(f)) => Some(ColumnValue::Text(f.to_string())),
        (ColumnType::String, StoredValue::Blob(b)) => {
            Some(ColumnValue::Text(String::from_utf8_lossy(&b).into_owned()))
        }

        (ColumnType::StringList, StoredValue::Text(s)) => Some(ColumnValue::StringList(split_list(&s))),
        (ColumnType::IntList, StoredValue::Text(s)) => Some(ColumnValue::IntList(
            split_list(&s)
                .iter()
                .map(|item| item.parse::<i64>().map_err(|_| corrupt(format!("bad item '{}'", item))))
                .collect::<DbResult<Vec<_>>>()?,
        )),

        (ColumnType::Bytes, StoredValue::Blob(b)) => Some(ColumnValue::Bytes(b)),
        (ColumnType::Bytes, StoredValue::Text(s)) => Some(ColumnValue::Bytes(s.into_bytes())),

        (_, StoredValue::Text(s)) if s.is_empty() => None,

        (ColumnType::Integer, StoredValue::Integer(i)) => Some(ColumnValue::Integer(i)),
        (ColumnType::Integer, StoredValue::Real(f)) if f.fract() == 0.0 => Some(ColumnValue::Integer(f as i64)),
        (ColumnType::Integer, StoredValue::Text(s)) => Some(ColumnValue::Integer(
            s.trim().parse().map_err(|_| corrupt(format!("bad integer '{}'", s)))?,
        )),

        (ColumnType::Number, StoredValue::Real(f)) => Some(ColumnValue::Number(f)),
        (ColumnType::Number, StoredValue::Integer(i)) => Some(ColumnValue::Number(i as f64)),
        (ColumnType::Number, StoredValue::Text(s)) => Some(ColumnValue::Number(
            s.trim().parse().map_err(|_| corrupt(format!("bad number '{}'", s)))?,
        )),

        (ColumnType::Boolean, StoredValue::Integer(i)) => Some(ColumnValue::Boolean(i != 0)),
        (ColumnType::Boolean, StoredValue::Text(s)) => Some(ColumnValue::Boolean(
            parse_bool(&s).ok_or_else(|| corrupt(format!("bad boolean '{}'", s)))?,
        )),

        (ColumnType::Map, StoredValue::Text(s)) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Object(map)) => Some(ColumnValue::Map(map)),
            _ => return Err(corrupt("stored value is not a JSON object".to_string())),
        },

        (ColumnType::Date, StoredValue::Text(s)) => Some(ColumnValue::Date(
            parse_date(&s).ok_or_else(|| corrupt(format!("bad date '{}'", s)))?,
        )),

        (_, other) => return Err(corrupt(format!("unexpected storage class {:?}", other))),
    };
    Ok(value)
}

/// Format a timestamp in the stored form
pub fn format_date(at: &DateTime<Utc>) -> String {
    at.format(DATE_FORMAT).to_string()
}

/// Parse the stored form (any fraction width), RFC 3339, or a bare `YYYY-MM-DD` date
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, DATE_FORMAT) {
        return Some(naive.and_utc());
    }
    if let Ok(at) = DateTime::parse_from_rfc3339(s) {
        return Some(at.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn split_list(s: &str) -> Vec<String> {
    if s.is_empty() {
        return Vec::new();
    }
    s.split(LIST_SEPARATOR).map(str::to_string).collect()
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

fn json_to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
