//! Shopify Admin REST client
//!
//! Enumerates product ids with cursor (`page_info`) pagination driven by the `Link` header,
//! fetches product detail, and maps HTTP failures onto [`SourceError`] so callers can tell
//! retryable conditions from permanent ones.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use futures::StreamExt;
use regex::Regex;
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, error, warn};
use url::Url;

use super::{
    IdPage, ItemIdPages, SourceClient, SourceClientFactory, SourceError, SourceFilters, SourceItem,
    SourceVariant, StoreCredentials,
};

const SHOP_DOMAIN_PATTERN: &str = r"^[a-z0-9][a-z0-9-]*\.myshopify\.com$";
const USER_AGENT: &str = concat!("catalog-sync/", env!("CARGO_PKG_VERSION"));
const MAX_BACKOFF_MS: u64 = 30_000;
const DEFAULT_RATE_LIMIT_RETRY_SECS: u64 = 2;

/// Shopify API client configuration
#[derive(Debug, Clone)]
pub struct ShopifyConfig {
    pub api_version: String,
    /// Ids requested per enumeration page (Shopify caps this at 250)
    pub page_size: u32,
    pub request_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    /// Replaces `https://{shop_domain}`; used against proxies and mock servers
    pub api_base: Option<String>,
}

impl Default for ShopifyConfig {
    fn default() -> Self {
        Self {
            api_version: "2024-01".to_string(),
            page_size: 250,
            request_timeout_ms: 30_000,
            max_retries: 3,
            retry_base_delay_ms: 500,
            api_base: None,
        }
    }
}

/// Client bound to one shop
#[derive(Clone)]
pub struct ShopifyClient {
    http: reqwest::Client,
    base_url: Url,
    access_token: String,
    config: ShopifyConfig,
}

impl std::fmt::Debug for ShopifyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShopifyClient")
            .field("base_url", &self.base_url.as_str())
            .field("api_version", &self.config.api_version)
            .finish()
    }
}

pub fn validate_shop_domain(domain: &str) -> Result<(), SourceError> {
    let pattern =
        Regex::new(SHOP_DOMAIN_PATTERN).map_err(|e| SourceError::Config(e.to_string()))?;
    if pattern.is_match(domain) {
        Ok(())
    } else {
        Err(SourceError::Config(format!(
            "invalid shop domain '{domain}', expected <shop>.myshopify.com"
        )))
    }
}

impl ShopifyClient {
    pub fn new(config: ShopifyConfig, credentials: &StoreCredentials) -> Result<Self, SourceError> {
        if credentials.access_token.trim().is_empty() {
            return Err(SourceError::Config("access token must not be empty".to_string()));
        }

        let base = match &config.api_base {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => {
                validate_shop_domain(&credentials.shop_domain)?;
                format!("https://{}", credentials.shop_domain)
            }
        };
        let base_url = Url::parse(&format!("{}/admin/api/{}/", base, config.api_version))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http,
            base_url,
            access_token: credentials.access_token.clone(),
            config,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, SourceError> {
        Ok(self.base_url.join(path)?)
    }

    fn apply_filters(url: &mut Url, filters: &SourceFilters) {
        let mut pairs = url.query_pairs_mut();
        if let Some(min) = &filters.updated_at_min {
            pairs.append_pair("updated_at_min", min);
        }
        for (key, value) in &filters.extra {
            pairs.append_pair(key, value);
        }
    }

    fn first_page_url(&self, filters: &SourceFilters) -> Result<Url, SourceError> {
        let mut url = self.endpoint("products.json")?;
        url.query_pairs_mut()
            .append_pair("fields", "id")
            .append_pair("limit", &self.config.page_size.to_string());
        Self::apply_filters(&mut url, filters);
        Ok(url)
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response, SourceError> {
        let response = self
            .http
            .get(url)
            .header("X-Shopify-Access-Token", &self.access_token)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                // Shopify sends fractional seconds, e.g. "2.0"
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|h| h.to_str().ok())
                    .and_then(|s| s.trim().parse::<f64>().ok())
                    .map(|secs| secs.ceil() as u64)
                    .unwrap_or(DEFAULT_RATE_LIMIT_RETRY_SECS);
                warn!(retry_after, "Rate limited by Shopify API");
                Err(SourceError::RateLimited { retry_after })
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                error!(status = status.as_u16(), "Shopify rejected access token");
                Err(SourceError::Unauthorized(format!(
                    "Shopify returned {status}"
                )))
            }
            _ => {
                let message = response.text().await.unwrap_or_default();
                if status.is_server_error() {
                    warn!(status = status.as_u16(), "Shopify API server error");
                }
                Err(SourceError::Api {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }

    async fn fetch_id_page(&self, url: Url) -> Result<(IdPage, Option<Url>), SourceError> {
        let response = self.get(url).await?;
        let next = response
            .headers()
            .get("Link")
            .and_then(|h| h.to_str().ok())
            .and_then(parse_next_link)
            .map(|link| Url::parse(&link))
            .transpose()?;

        let body: ProductIdList = response.json().await?;
        let ids = body.products.into_iter().map(|p| p.id).collect();
        Ok((ids, next))
    }

    /// Retry retryable failures with exponential backoff and jitter
    async fn retry_with_backoff<F, Fut, T>(&self, operation: F) -> Result<T, SourceError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let mut delay = Duration::from_millis(self.config.retry_base_delay_ms);
        let mut retries = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) if err.is_retryable() && retries < self.config.max_retries => {
                    retries += 1;
                    let wait = match &err {
                        SourceError::RateLimited { retry_after } => {
                            delay.max(Duration::from_secs(*retry_after))
                        }
                        _ => delay,
                    };
                    warn!(
                        "Attempt {} failed: {}. Retrying after {:?}...",
                        retries, err, wait
                    );
                    tokio::time::sleep(wait).await;

                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(MAX_BACKOFF_MS));
                    // ±25% jitter
                    let jitter_factor = 0.75 + (rand::random::<f64>() * 0.5);
                    delay = Duration::from_millis((delay.as_millis() as f64 * jitter_factor) as u64);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl SourceClient for ShopifyClient {
    fn stream_item_ids(&self, filters: &SourceFilters) -> ItemIdPages {
        let first = match self.first_page_url(filters) {
            Ok(url) => url,
            Err(err) => return ItemIdPages::from_pages(vec![Err(err)]),
        };
        let client = self.clone();

        let stream = async_stream::stream! {
            let mut next = Some(first);
            while let Some(url) = next.take() {
                match client.retry_with_backoff(|| client.fetch_id_page(url.clone())).await {
                    Ok((ids, following)) => {
                        debug!(count = ids.len(), has_next = following.is_some(), "Fetched id page");
                        next = following;
                        yield Ok::<IdPage, SourceError>(ids);
                    }
                    Err(err) => {
                        yield Err(err);
                        break;
                    }
                }
            }
        };

        ItemIdPages::new(stream.boxed())
    }

    async fn fetch_item(&self, item_id: &str) -> Result<SourceItem, SourceError> {
        let url = self.endpoint(&format!("products/{item_id}.json"))?;
        let result = self
            .retry_with_backoff(|| async {
                let response = self.get(url.clone()).await?;
                let body: ProductEnvelope = response.json().await?;
                Ok::<_, SourceError>(body.product)
            })
            .await;

        match result {
            Ok(product) => Ok(product.into()),
            Err(SourceError::Api { status: 404, .. }) => Err(SourceError::NotFound {
                item_id: item_id.to_string(),
            }),
            Err(err) => Err(err),
        }
    }

    async fn count_items(&self, filters: &SourceFilters) -> Result<Option<u64>, SourceError> {
        let mut url = self.endpoint("products/count.json")?;
        Self::apply_filters(&mut url, filters);
        let body: CountEnvelope = self
            .retry_with_backoff(|| async {
                let response = self.get(url.clone()).await?;
                Ok::<CountEnvelope, SourceError>(response.json().await?)
            })
            .await?;
        Ok(Some(body.count))
    }
}

/// Builds [`ShopifyClient`]s from store credentials
#[derive(Debug, Clone, Default)]
pub struct ShopifyClientFactory {
    config: ShopifyConfig,
}

impl ShopifyClientFactory {
    pub fn new(config: ShopifyConfig) -> Self {
        Self { config }
    }
}

impl SourceClientFactory for ShopifyClientFactory {
    fn connect(
        &self,
        credentials: &StoreCredentials,
    ) -> Result<Arc<dyn SourceClient>, SourceError> {
        Ok(Arc::new(ShopifyClient::new(self.config.clone(), credentials)?))
    }
}

/// Extract the `rel="next"` target from a Link header.
///
/// Format: `<https://shop/admin/api/2024-01/products.json?page_info=abc>; rel="next", <...>; rel="previous"`
pub fn parse_next_link(link_header: &str) -> Option<String> {
    link_header.split(',').find_map(|link| {
        let (url_part, params) = link.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|p| p.trim().replace(' ', "") == "rel=\"next\"");
        if !is_next {
            return None;
        }
        let url_part = url_part.trim();
        let start = url_part.find('<')?;
        let end = url_part.find('>')?;
        Some(url_part[start + 1..end].to_string())
    })
}

fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(s),
        other => Err(serde::de::Error::custom(format!("unexpected id {other}"))),
    }
}

fn optional_id_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(serde::de::Error::custom(format!("unexpected id {other}"))),
    }
}

#[derive(Debug, Deserialize)]
struct ProductIdList {
    #[serde(default)]
    products: Vec<ProductId>,
}

#[derive(Debug, Deserialize)]
struct ProductId {
    #[serde(deserialize_with = "id_string")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct CountEnvelope {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct ProductEnvelope {
    product: ShopifyProduct,
}

#[derive(Debug, Deserialize)]
struct ShopifyProduct {
    #[serde(deserialize_with = "id_string")]
    id: String,
    title: Option<String>,
    body_html: Option<String>,
    handle: Option<String>,
    product_type: Option<String>,
    vendor: Option<String>,
    /// Comma separated
    #[serde(default)]
    tags: Option<String>,
    #[serde(default)]
    variants: Vec<ShopifyVariant>,
    created_at: Option<DateTime<FixedOffset>>,
    updated_at: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Deserialize)]
struct ShopifyVariant {
    #[serde(deserialize_with = "id_string")]
    id: String,
    #[serde(default)]
    price: Option<String>,
    sku: Option<String>,
    compare_at_price: Option<String>,
    inventory_quantity: Option<i64>,
    #[serde(default, deserialize_with = "optional_id_string")]
    inventory_item_id: Option<String>,
}

impl From<ShopifyProduct> for SourceItem {
    fn from(product: ShopifyProduct) -> Self {
        let tags = product
            .tags
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();

        SourceItem {
            id: product.id,
            title: product.title,
            description: product.body_html,
            handle: product.handle,
            category: product.product_type.filter(|c| !c.is_empty()),
            vendor: product.vendor,
            tags,
            variants: product
                .variants
                .into_iter()
                .map(|v| SourceVariant {
                    id: v.id,
                    price: v.price.unwrap_or_else(|| "0.00".to_string()),
                    sku: v.sku,
                    compare_at_price: v.compare_at_price,
                    inventory_quantity: v.inventory_quantity,
                    inventory_item_id: v.inventory_item_id,
                })
                .collect(),
            created_at: product.created_at.map(|ts| ts.with_timezone(&Utc)),
            updated_at: product.updated_at.map(|ts| ts.with_timezone(&Utc)),
        }
    }
}
