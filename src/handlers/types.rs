//! # Common API Types
//!
//! Shared response envelopes and pagination parameters used across handlers.

use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};

use crate::error::{ApiError, validation_error};

const DEFAULT_LIMIT: u64 = 50;
const MAX_LIMIT: u64 = 200;

/// Success envelope wrapping every non-error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    /// Always `true` for this envelope
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Offset-paginated list
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PaginatedResponse<T> {
    /// Items on the current page
    pub data: Vec<T>,
    /// Total number of matching items
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
    /// Convenience field indicating if more pages exist
    pub has_more: bool,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, total: u64, page: Page) -> Self {
        let has_more = page.offset + (data.len() as u64) < total;
        Self {
            data,
            total,
            limit: page.limit,
            offset: page.offset,
            has_more,
        }
    }
}

/// Pagination query parameters
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct PageQuery {
    /// Maximum number of rows to return (default: 50, max: 200)
    pub limit: Option<u64>,
    /// Rows to skip (default: 0)
    pub offset: Option<u64>,
}

/// Validated pagination window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u64,
    pub offset: u64,
}

impl PageQuery {
    pub fn page(&self) -> Result<Page, ApiError> {
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(validation_error(
                "Invalid limit",
                json!({ "limit": format!("limit must be between 1 and {MAX_LIMIT}") }),
            ));
        }
        Ok(Page {
            limit,
            offset: self.offset.unwrap_or(0),
        })
    }
}
