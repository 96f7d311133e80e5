//! # Query Representation
//!
//! The backend-agnostic query every adapter consumes: a filter tree, the
//! free-text search shorthand, sort order, a paging window and the
//! projection/populate requests that the service layer applies afterwards.

pub mod filter;
pub mod pagination;
pub mod parser;
pub mod sort;

use serde_json::Value;

use crate::errors::DbResult;

pub use filter::{FilterExpr, FilterNode, FilterOperator};
pub use pagination::{total_pages, ListPage, PageRequest};
pub use sort::{parse_sort, sort_records, SortDirection, SortSpec};

/// Parsed, validated query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Filter nodes, combined with AND
    pub filter: Vec<FilterNode>,

    /// Free-text search term
    pub search: Option<String>,

    /// Fields the search term is compared against
    pub search_fields: Vec<String>,

    /// Ordered sort keys
    pub sort: Vec<SortSpec>,

    /// Maximum rows to return
    pub limit: Option<u64>,

    /// Rows to skip
    pub offset: Option<u64>,

    /// 1-based page number (list only)
    pub page: Option<u64>,

    /// Page size (list only)
    pub page_size: Option<u64>,

    /// Projection allow-list for this call, overriding the service default
    pub fields: Option<Vec<String>>,

    /// Relation fields to populate
    pub populate: Vec<String>,
}

impl Query {
    /// Create an empty query (matches everything)
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse request parameters
    pub fn from_params(params: &Value) -> DbResult<Self> {
        parser::parse_params(params)
    }

    /// Add a filter node
    pub fn with_filter(mut self, node: FilterNode) -> Self {
        self.filter.push(node);
        self
    }

    /// Add an equality leaf
    pub fn with_eq(self, field: impl Into<String>, value: Value) -> Self {
        self.with_filter(FilterNode::Leaf(FilterExpr::eq(field, value)))
    }

    /// Set the search shorthand
    pub fn with_search(mut self, text: impl Into<String>, fields: Vec<String>) -> Self {
        self.search = Some(text.into());
        self.search_fields = fields;
        self
    }

    /// Append a sort key
    pub fn with_sort(mut self, spec: SortSpec) -> Self {
        self.sort.push(spec);
        self
    }

    /// Set the row limit
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the row offset
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Replace the fetch window with the one derived from a page request
    pub fn with_page(mut self, page: PageRequest) -> Self {
        self.page = Some(page.page());
        self.page_size = Some(page.page_size());
        self.limit = Some(page.limit());
        self.offset = Some(page.offset());
        self
    }

    /// Set the projection allow-list
    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = Some(fields);
        self
    }

    /// Copy without the fetch window or ordering, used for counting
    pub fn without_window(&self) -> Self {
        Self {
            sort: Vec::new(),
            limit: None,
            offset: None,
            page: None,
            page_size: None,
            ..self.clone()
        }
    }

    /// Search shorthand expanded to an OR of equality leaves, one per search field
    pub fn search_node(&self) -> Option<FilterNode> {
        let text = self.search.as_ref()?;
        if self.search_fields.is_empty() {
            return None;
        }
        Some(FilterNode::Or(
            self.search_fields
                .iter()
                .map(|field| {
                    vec![FilterNode::Leaf(FilterExpr::eq(
                        field.clone(),
                        Value::String(text.clone()),
                    ))]
                })
                .collect(),
        ))
    }

    /// Filter nodes with the search shorthand merged in
    pub fn conditions(&self) -> Vec<FilterNode> {
        let mut nodes = self.filter.clone();
        if let Some(search) = self.search_node() {
            nodes.push(search);
        }
        nodes
    }
}
