//! Sort specification parsing
//!
//! Sort input is a space-separated string (`"-age name"`) or an array of
//! field names. A leading `-` flips the direction to descending. Entries
//! that do not name a field are logged and ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::{compare_values, Record};

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }

    /// SQL keyword
    pub fn keyword(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }

    /// Numeric form used by document stores (1 / -1)
    pub fn signum(&self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

/// Sort specification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    /// Field to sort by
    pub field: String,
    /// Sort direction
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }

    /// Parse one entry, `-field` meaning descending
    pub fn parse_entry(entry: &str) -> Option<Self> {
        let entry = entry.trim();
        match entry.strip_prefix('-') {
            Some(field) if !field.is_empty() => Some(Self::desc(field)),
            Some(_) => None,
            None if !entry.is_empty() => Some(Self::asc(entry)),
            None => None,
        }
    }
}

/// Parse the `sort` parameter. Never fails: invalid input yields no ordering.
pub fn parse_sort(value: &Value) -> Vec<SortSpec> {
    let entries: Vec<String> = match value {
        Value::Null => return Vec::new(),
        Value::String(s) => s.split_whitespace().map(str::to_string).collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item.as_str() {
                Some(s) => Some(s.to_string()),
                None => {
                    tracing::warn!(entry = %item, "invalid sort entry ignored");
                    None
                }
            })
            .collect(),
        other => {
            tracing::warn!(sort = %other, "invalid sort ignored");
            return Vec::new();
        }
    };

    if entries.is_empty() {
        tracing::warn!("invalid sort: no sort fields given");
    }

    entries
        .iter()
        .filter_map(|entry| {
            let spec = SortSpec::parse_entry(entry);
            if spec.is_none() {
                tracing::warn!(entry = %entry, "invalid sort entry ignored");
            }
            spec
        })
        .collect()
}

/// Stable in-place sort by every key in turn; missing fields sort first
pub fn sort_records(rows: &mut [Record], sort: &[SortSpec]) {
    if sort.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        sort.iter()
            .map(|spec| {
                let ordering = compare_values(a.get(&spec.field), b.get(&spec.field));
                match spec.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}
