//! Service Configuration
//!
//! Settings shared by every operation of a service: identifier field,
//! default projection, declared relations and paging bounds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{DbError, DbResult};
use crate::populate::{RelationSpec, Relations};

/// Projection wildcard: every field passes
pub const ALL_FIELDS: &str = "**";

/// Service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSettings {
    /// Identifier field name (default: "id")
    #[serde(default = "default_id_field")]
    pub id_field: String,

    /// Default projection allow-list (default: ["**"])
    #[serde(default = "default_fields")]
    pub fields: Vec<String>,

    /// Declared relations
    #[serde(default)]
    pub populates: Relations,

    /// Default list page size (default: 10)
    #[serde(default = "default_page_size")]
    pub page_size: u64,

    /// Largest page size a caller may request (default: 100)
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u64,

    /// Largest `limit` a caller may request; -1 disables the cap
    #[serde(default = "default_max_limit")]
    pub max_limit: i64,

    /// Deadline for one populate batch in milliseconds
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,
}

fn default_id_field() -> String {
    "id".to_string()
}

fn default_fields() -> Vec<String> {
    vec![ALL_FIELDS.to_string()]
}

fn default_page_size() -> u64 {
    10
}

fn default_max_page_size() -> u64 {
    100
}

fn default_max_limit() -> i64 {
    -1
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            id_field: default_id_field(),
            fields: default_fields(),
            populates: Relations::new(),
            page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            max_limit: default_max_limit(),
            call_timeout_ms: None,
        }
    }
}

impl ServiceSettings {
    /// Settings with a custom identifier field
    pub fn with_id_field(id_field: impl Into<String>) -> Self {
        Self {
            id_field: id_field.into(),
            ..Default::default()
        }
    }

    /// Declare a relation
    pub fn with_relation(mut self, field: impl Into<String>, spec: RelationSpec) -> Self {
        self.populates.insert(field.into(), spec);
        self
    }

    /// Replace the default projection
    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }

    /// Set the default page size
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    /// Check invariants once, at service construction
    pub fn validate(&self) -> DbResult<()> {
        if self.id_field.trim().is_empty() {
            return Err(DbError::validation("idField cannot be empty"));
        }
        if self.page_size == 0 {
            return Err(DbError::validation("pageSize must be greater than 0"));
        }
        if self.max_page_size < self.page_size {
            return Err(DbError::validation(format!(
                "maxPageSize ({}) must be at least pageSize ({})",
                self.max_page_size, self.page_size
            )));
        }
        if self.max_limit == 0 || self.max_limit < -1 {
            return Err(DbError::validation("maxLimit must be -1 or positive"));
        }
        if let Some((field, _)) = self
            .populates
            .iter()
            .find(|(_, spec)| spec.action.trim().is_empty())
        {
            return Err(DbError::validation(format!(
                "Relation '{}' has no action",
                field
            )));
        }
        Ok(())
    }

    /// Cap on `limit`, if any
    pub fn limit_cap(&self) -> Option<u64> {
        u64::try_from(self.max_limit).ok()
    }

    /// Populate batch deadline
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}
