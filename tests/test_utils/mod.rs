//! Test utilities shared by the integration suites.
//!
//! Provides an in-memory SQLite database with migrations applied, a scripted in-process
//! catalog source, and a harness wiring the orchestrator, queue and repositories together.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};

use catalog_sync::checkpoint::CheckpointManager;
use catalog_sync::config::{QueueConfig, RetryPolicyConfig, SyncConfig};
use catalog_sync::queue::{BATCH_QUEUE, JobQueue, QueueWorker};
use catalog_sync::repositories::{ItemRepository, SyncRunRepository, SyncStateRepository};
use catalog_sync::source::{
    ItemIdPages, SourceClient, SourceClientFactory, SourceError, SourceFilters, SourceItem,
    SourceVariant, StoreCredentials,
};
use catalog_sync::sync::{ExecutionTracker, SyncOptions, SyncOptionsInput, SyncOrchestrator};

pub const STORE: &str = "store-1";

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

pub fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
}

/// A product as the source would return it
pub fn product(id: &str, title: &str, updated_at: DateTime<Utc>) -> SourceItem {
    SourceItem {
        id: id.to_string(),
        title: Some(title.to_string()),
        description: Some(format!("<p>{title}</p>")),
        handle: Some(title.to_lowercase().replace(' ', "-")),
        category: Some("Widgets".to_string()),
        vendor: Some("Acme".to_string()),
        tags: vec!["sale".to_string(), "new".to_string()],
        variants: vec![SourceVariant {
            id: format!("{id}01"),
            price: "19.99".to_string(),
            sku: Some(format!("SKU-{id}")),
            compare_at_price: None,
            inventory_quantity: Some(5),
            inventory_item_id: None,
        }],
        created_at: Some(day(1)),
        updated_at: Some(updated_at),
    }
}

pub fn credentials() -> StoreCredentials {
    StoreCredentials {
        shop_domain: "acme.myshopify.com".to_string(),
        access_token: "shpat_test".to_string(),
    }
}

#[derive(Default)]
struct MockState {
    catalog: BTreeMap<String, SourceItem>,
    scripted_pages: Option<Vec<Vec<String>>>,
    page_size: usize,
    failing_ids: HashSet<String>,
    fail_page_at: Option<usize>,
    count: Option<u64>,
    filters_seen: Vec<SourceFilters>,
    fetched: Vec<String>,
}

/// Scripted catalog source.
///
/// Without scripted pages, enumeration returns the catalog ids in order, honouring the
/// `updated_at_min` filter, in pages of `page_size`.
#[derive(Clone)]
pub struct MockSource {
    state: Arc<Mutex<MockState>>,
    pages_served: Arc<AtomicUsize>,
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                page_size: 3,
                ..Default::default()
            })),
            pages_served: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn put(&self, item: SourceItem) {
        self.state
            .lock()
            .unwrap()
            .catalog
            .insert(item.id.clone(), item);
    }

    pub fn remove(&self, id: &str) {
        self.state.lock().unwrap().catalog.remove(id);
    }

    pub fn set_page_size(&self, size: usize) {
        self.state.lock().unwrap().page_size = size;
    }

    /// Serve these pages verbatim instead of deriving them from the catalog
    pub fn script_pages(&self, pages: Vec<Vec<&str>>) {
        self.state.lock().unwrap().scripted_pages = Some(
            pages
                .into_iter()
                .map(|page| page.into_iter().map(str::to_string).collect())
                .collect(),
        );
    }

    pub fn fail_fetch(&self, id: &str) {
        self.state.lock().unwrap().failing_ids.insert(id.to_string());
    }

    /// Make the page at `index` (0-based) an upstream error
    pub fn fail_page_at(&self, index: usize) {
        self.state.lock().unwrap().fail_page_at = Some(index);
    }

    pub fn set_count(&self, count: Option<u64>) {
        self.state.lock().unwrap().count = count;
    }

    pub fn pages_served(&self) -> usize {
        self.pages_served.load(Ordering::SeqCst)
    }

    pub fn fetched(&self) -> Vec<String> {
        self.state.lock().unwrap().fetched.clone()
    }

    pub fn clear_fetched(&self) {
        self.state.lock().unwrap().fetched.clear();
    }

    pub fn last_filters(&self) -> Option<SourceFilters> {
        self.state.lock().unwrap().filters_seen.last().cloned()
    }

    fn pages_for(&self, filters: &SourceFilters) -> Vec<Vec<String>> {
        let state = self.state.lock().unwrap();
        if let Some(pages) = &state.scripted_pages {
            return pages.clone();
        }

        let lower = filters
            .updated_at_min
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.to_utc());
        let ids: Vec<String> = state
            .catalog
            .values()
            .filter(|item| match (lower, item.updated_at) {
                (Some(lower), Some(updated)) => updated >= lower,
                (Some(_), None) => false,
                (None, _) => true,
            })
            .map(|item| item.id.clone())
            .collect();
        ids.chunks(state.page_size.max(1))
            .map(<[String]>::to_vec)
            .collect()
    }
}

#[async_trait]
impl SourceClient for MockSource {
    fn stream_item_ids(&self, filters: &SourceFilters) -> ItemIdPages {
        let pages = self.pages_for(filters);
        let fail_at = {
            let mut state = self.state.lock().unwrap();
            state.filters_seen.push(filters.clone());
            state.fail_page_at
        };
        let served = self.pages_served.clone();

        let stream = async_stream::stream! {
            for (index, page) in pages.into_iter().enumerate() {
                served.fetch_add(1, Ordering::SeqCst);
                if fail_at == Some(index) {
                    yield Err(SourceError::Api { status: 500, message: "page failed".to_string() });
                    break;
                }
                yield Ok(page);
            }
        };
        ItemIdPages::new(stream.boxed())
    }

    async fn fetch_item(&self, item_id: &str) -> Result<SourceItem, SourceError> {
        let mut state = self.state.lock().unwrap();
        state.fetched.push(item_id.to_string());
        if state.failing_ids.contains(item_id) {
            return Err(SourceError::Api {
                status: 500,
                message: format!("detail for {item_id} failed"),
            });
        }
        state
            .catalog
            .get(item_id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound {
                item_id: item_id.to_string(),
            })
    }

    async fn count_items(&self, _filters: &SourceFilters) -> Result<Option<u64>, SourceError> {
        Ok(self.state.lock().unwrap().count)
    }
}

/// Hands out the shared [`MockSource`]; can be told to reject connections after a number of
/// successful ones.
pub struct MockSourceFactory {
    source: MockSource,
    connects: AtomicUsize,
    allowed_connects: Mutex<Option<usize>>,
}

impl MockSourceFactory {
    pub fn new(source: MockSource) -> Self {
        Self {
            source,
            connects: AtomicUsize::new(0),
            allowed_connects: Mutex::new(None),
        }
    }

    /// Allow `n` more connections, then answer with `Unauthorized`
    pub fn allow_connects(&self, n: usize) {
        let used = self.connects.load(Ordering::SeqCst);
        *self.allowed_connects.lock().unwrap() = Some(used + n);
    }
}

impl SourceClientFactory for MockSourceFactory {
    fn connect(
        &self,
        _credentials: &StoreCredentials,
    ) -> Result<Arc<dyn SourceClient>, SourceError> {
        let attempt = self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = *self.allowed_connects.lock().unwrap()
            && attempt >= limit
        {
            return Err(SourceError::Unauthorized("token revoked".to_string()));
        }
        Ok(Arc::new(self.source.clone()))
    }
}

/// Orchestrator, queue and repositories over one in-memory database
pub struct Harness {
    pub db: DatabaseConnection,
    pub source: MockSource,
    pub factory: Arc<MockSourceFactory>,
    pub orchestrator: SyncOrchestrator,
    pub queue: JobQueue,
    pub states: SyncStateRepository,
    pub runs: SyncRunRepository,
    pub items: ItemRepository,
    pub checkpoints: CheckpointManager,
    pub sync_config: SyncConfig,
}

pub fn test_sync_config() -> SyncConfig {
    SyncConfig {
        batch_size: 4,
        detail_batch_size: 2,
        detail_concurrency: 2,
        ..SyncConfig::default()
    }
}

pub async fn harness() -> Result<Harness> {
    harness_with(test_sync_config()).await
}

pub async fn harness_with(sync_config: SyncConfig) -> Result<Harness> {
    let db = setup_test_db().await?;
    Ok(harness_on(db, sync_config))
}

/// A second process's view of the same database: fresh tracker, same tables
pub fn harness_on(db: DatabaseConnection, sync_config: SyncConfig) -> Harness {
    let source = MockSource::new();
    let factory = Arc::new(MockSourceFactory::new(source.clone()));
    let queue = JobQueue::new(db.clone(), BATCH_QUEUE, 1, RetryPolicyConfig::default());
    let orchestrator = SyncOrchestrator::new(
        db.clone(),
        queue.clone(),
        ExecutionTracker::new(),
        factory.clone(),
        sync_config.clone(),
    );

    Harness {
        states: SyncStateRepository::new(db.clone()),
        runs: SyncRunRepository::new(db.clone()),
        items: ItemRepository::new(db.clone()),
        checkpoints: CheckpointManager::new(db.clone()),
        db,
        source,
        factory,
        orchestrator,
        queue,
        sync_config,
    }
}

impl Harness {
    pub fn options(&self, input: SyncOptionsInput) -> SyncOptions {
        SyncOptions::resolve(input, &self.sync_config).expect("valid options")
    }

    pub fn default_options(&self) -> SyncOptions {
        self.options(SyncOptionsInput::default())
    }

    pub fn full_options(&self) -> SyncOptions {
        self.options(SyncOptionsInput {
            force_full_sync: Some(true),
            ..Default::default()
        })
    }

    pub fn worker(&self) -> QueueWorker {
        QueueWorker::new(
            self.queue.clone(),
            Arc::new(self.orchestrator.batch_worker()),
            QueueConfig {
                concurrency: 1,
                claim_batch: 1,
                ..QueueConfig::default()
            },
        )
    }

    /// Seed the catalog with `ids`, all last updated on `updated`
    pub fn seed(&self, ids: &[&str], updated: DateTime<Utc>) {
        for id in ids {
            self.source.put(product(id, &format!("Product {id}"), updated));
        }
    }
}
