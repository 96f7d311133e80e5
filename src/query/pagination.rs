//! # Pagination
//!
//! Page arithmetic for the list operation. The fetch window keeps the
//! cumulative limit `page * pageSize` paired with `offset = (page - 1) * pageSize`.

use serde::{Deserialize, Serialize};

use crate::errors::{DbError, DbResult};
use crate::record::Record;

/// Validated 1-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u64,
    page_size: u64,
}

impl PageRequest {
    /// Create a page request. `page` is 1-based and `page_size` must be positive.
    pub fn new(page: u64, page_size: u64) -> DbResult<Self> {
        if page == 0 {
            return Err(DbError::validation("page is 1-based and must be at least 1"));
        }
        if page_size == 0 {
            return Err(DbError::validation("pageSize must be greater than 0"));
        }
        Ok(Self { page, page_size })
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Rows skipped before this page
    pub fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.page_size)
    }

    /// Row limit sent to the backend (cumulative)
    pub fn limit(&self) -> u64 {
        self.page.saturating_mul(self.page_size)
    }

    /// Build the list response from fetched rows and the total count
    pub fn into_page(self, rows: Vec<Record>, total: u64) -> ListPage {
        ListPage {
            rows,
            total,
            page: self.page,
            page_size: self.page_size,
            total_pages: total_pages(total, self.page_size),
        }
    }
}

/// `ceil(total / page_size)`; zero when `page_size` is zero
pub fn total_pages(total: u64, page_size: u64) -> u64 {
    if page_size == 0 {
        return 0;
    }
    total / page_size + u64::from(total % page_size != 0)
}

/// List operation response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPage {
    pub rows: Vec<Record>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
    pub total_pages: u64,
}
