//! Column declarations
//!
//! Columns are declared once at adapter construction. The declared type
//! drives both literal formatting in the filter compiler and the value codec.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DbError;

/// Declared column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ColumnType {
    String,
    Integer,
    Number,
    Boolean,
    StringList,
    IntList,
    Map,
    Bytes,
    Date,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Integer => "integer",
            ColumnType::Number => "number",
            ColumnType::Boolean => "boolean",
            ColumnType::StringList => "list-of-string",
            ColumnType::IntList => "list-of-int",
            ColumnType::Map => "map",
            ColumnType::Bytes => "bytes",
            ColumnType::Date => "date",
        }
    }

    /// Storage class used in `CREATE TABLE`
    pub fn storage_type(&self) -> &'static str {
        match self {
            ColumnType::Integer | ColumnType::Boolean => "INTEGER",
            ColumnType::Number => "REAL",
            ColumnType::Bytes => "BLOB",
            ColumnType::String
            | ColumnType::StringList
            | ColumnType::IntList
            | ColumnType::Map
            | ColumnType::Date => "TEXT",
        }
    }
}

impl FromStr for ColumnType {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ty = match s.trim().to_ascii_lowercase().as_str() {
            "string" | "text" => ColumnType::String,
            "integer" | "int" => ColumnType::Integer,
            "number" | "float" | "real" | "numeric" => ColumnType::Number,
            "boolean" | "bool" => ColumnType::Boolean,
            "list-of-string" | "[]string" | "string-list" => ColumnType::StringList,
            "list-of-int" | "[]int" | "[]integer" | "int-list" => ColumnType::IntList,
            "map" | "object" => ColumnType::Map,
            "bytes" | "[]byte" | "blob" => ColumnType::Bytes,
            "date" | "datetime" | "timestamp" => ColumnType::Date,
            other => return Err(DbError::validation(format!("Unknown column type: {}", other))),
        };
        Ok(ty)
    }
}

impl TryFrom<String> for ColumnType {
    type Error = DbError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ColumnType> for String {
    fn from(ty: ColumnType) -> Self {
        ty.as_str().to_string()
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Column names must be plain identifiers; they are spliced into SQL text
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
