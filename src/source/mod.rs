//! # Source Clients
//!
//! Abstractions over the remote catalog API. A [`SourceClient`] enumerates item identifiers
//! page by page through [`ItemIdPages`] and fetches full item detail by id. Clients are built
//! per store from [`StoreCredentials`] by a [`SourceClientFactory`], which is what the
//! orchestrator and batch workers receive.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

pub mod shopify;
pub mod timestamp;

pub use shopify::{ShopifyClient, ShopifyClientFactory, ShopifyConfig};

/// Credentials needed to talk to one store
#[derive(Clone, Serialize, Deserialize, ToSchema)]
pub struct StoreCredentials {
    /// Shop domain, e.g. `acme.myshopify.com`
    pub shop_domain: String,
    /// Admin API access token
    pub access_token: String,
}

impl fmt::Debug for StoreCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreCredentials")
            .field("shop_domain", &self.shop_domain)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// Filters applied to id enumeration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceFilters {
    /// Lower bound on upstream `updated_at`, already in the source's own timestamp format
    pub updated_at_min: Option<String>,
    /// Caller-supplied filters passed through verbatim
    pub extra: BTreeMap<String, String>,
}

/// Item detail as returned by a source
#[derive(Debug, Clone, PartialEq)]
pub struct SourceItem {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub handle: Option<String>,
    pub category: Option<String>,
    pub vendor: Option<String>,
    pub tags: Vec<String>,
    pub variants: Vec<SourceVariant>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceVariant {
    pub id: String,
    pub price: String,
    pub sku: Option<String>,
    pub compare_at_price: Option<String>,
    pub inventory_quantity: Option<i64>,
    pub inventory_item_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Item {item_id} not found upstream")]
    NotFound { item_id: String },

    #[error("Source rejected the credentials: {0}")]
    Unauthorized(String),

    #[error("Rate limited by source API. Retry after {retry_after} seconds")]
    RateLimited { retry_after: u64 },

    #[error("API request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unexpected payload: {0}")]
    Payload(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl SourceError {
    /// Whether a retry of the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::RateLimited { .. } | SourceError::Network(_) => true,
            SourceError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Payload(err.to_string())
    }
}

impl From<url::ParseError> for SourceError {
    fn from(err: url::ParseError) -> Self {
        SourceError::Config(err.to_string())
    }
}

/// A page of item ids
pub type IdPage = Vec<String>;

/// Lazy, finite, non-restartable sequence of id pages.
///
/// Each call to [`ItemIdPages::next_page`] pulls at most one page from the producer. Once the
/// producer ends, errors, or [`ItemIdPages::stop`] is called, the sequence is closed for good
/// and no further upstream request is made.
pub struct ItemIdPages {
    inner: Option<BoxStream<'static, Result<IdPage, SourceError>>>,
    pages_pulled: u64,
}

impl ItemIdPages {
    pub fn new(stream: BoxStream<'static, Result<IdPage, SourceError>>) -> Self {
        Self {
            inner: Some(stream),
            pages_pulled: 0,
        }
    }

    /// Pre-computed pages; mostly useful for tests and fixtures
    pub fn from_pages(pages: Vec<Result<IdPage, SourceError>>) -> Self {
        Self::new(futures::stream::iter(pages).boxed())
    }

    pub fn empty() -> Self {
        Self {
            inner: None,
            pages_pulled: 0,
        }
    }

    pub async fn next_page(&mut self) -> Option<Result<IdPage, SourceError>> {
        let stream = self.inner.as_mut()?;
        match stream.next().await {
            Some(Ok(page)) => {
                self.pages_pulled += 1;
                Some(Ok(page))
            }
            Some(Err(err)) => {
                self.inner = None;
                Some(Err(err))
            }
            None => {
                self.inner = None;
                None
            }
        }
    }

    /// Drop the producer without requesting further pages
    pub fn stop(&mut self) {
        self.inner = None;
    }

    pub fn is_exhausted(&self) -> bool {
        self.inner.is_none()
    }

    pub fn pages_pulled(&self) -> u64 {
        self.pages_pulled
    }
}

impl fmt::Debug for ItemIdPages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemIdPages")
            .field("open", &self.inner.is_some())
            .field("pages_pulled", &self.pages_pulled)
            .finish()
    }
}

/// Remote catalog API for a single store
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Enumerate matching item ids lazily
    fn stream_item_ids(&self, filters: &SourceFilters) -> ItemIdPages;

    /// Fetch one item's full detail; unknown ids yield [`SourceError::NotFound`]
    async fn fetch_item(&self, item_id: &str) -> Result<SourceItem, SourceError>;

    /// Expected number of matching items, if the source can tell cheaply
    async fn count_items(&self, _filters: &SourceFilters) -> Result<Option<u64>, SourceError> {
        Ok(None)
    }
}

/// Builds per-store clients
pub trait SourceClientFactory: Send + Sync {
    fn connect(&self, credentials: &StoreCredentials)
    -> Result<Arc<dyn SourceClient>, SourceError>;
}
