//! # Result Projection
//!
//! Restricts returned fields to an allow-list. `**` lets every field through.

use crate::config::ALL_FIELDS;
use crate::record::{Record, Records};

/// Field allow-list for one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    fields: Vec<String>,
}

impl Projection {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    /// Call-level `fields` override the service default for that call only
    pub fn resolve(default: &[String], requested: Option<&Vec<String>>) -> Self {
        match requested {
            Some(fields) if !fields.is_empty() => Self::new(fields.clone()),
            _ => Self::new(default.to_vec()),
        }
    }

    /// Whether every field passes
    pub fn is_wildcard(&self) -> bool {
        self.fields.iter().any(|f| f == ALL_FIELDS)
    }

    /// Whether a field name passes
    pub fn allows(&self, field: &str) -> bool {
        self.is_wildcard() || self.fields.iter().any(|f| f == field)
    }

    /// Project one record
    pub fn apply(&self, record: Record) -> Record {
        if self.is_wildcard() {
            return record;
        }
        record.into_iter().filter(|(k, _)| self.allows(k)).collect()
    }

    /// Project every record, preserving shape and order
    pub fn project(&self, records: Records) -> Records {
        match records {
            Records::One(record) => Records::One(self.apply(record)),
            Records::Many(rows) => Records::Many(rows.into_iter().map(|r| self.apply(r)).collect()),
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}
