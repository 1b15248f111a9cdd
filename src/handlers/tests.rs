//! # Tests for Handlers
//!
//! This module contains unit tests for API handlers.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::Json};
use migration::{Migrator, MigratorTrait};
use sea_orm::Database;
use utoipa::OpenApi;

use crate::config::AppConfig;
use crate::handlers::{healthz, root};
use crate::models::ServiceInfo;
use crate::queue::{BATCH_QUEUE, JobQueue};
use crate::server::{ApiDoc, AppState};
use crate::source::ShopifyClientFactory;
use crate::sync::{ExecutionTracker, SyncOrchestrator};

async fn memory_state() -> AppState {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("sqlite memory database");
    Migrator::up(&db, None).await.expect("migrations");

    let config = AppConfig::default();
    let queue = JobQueue::new(
        db.clone(),
        BATCH_QUEUE,
        config.queue.max_attempts,
        config.retry_policy.clone(),
    );
    let orchestrator = SyncOrchestrator::new(
        db.clone(),
        queue,
        ExecutionTracker::new(),
        Arc::new(ShopifyClientFactory::new(config.source.shopify())),
        config.sync.clone(),
    );
    AppState::new(Arc::new(config), db, orchestrator)
}

#[tokio::test]
async fn test_root_handler_returns_expected_service_info() {
    let Json(service_info) = root().await;

    assert_eq!(service_info.service, "catalog-sync");
    assert_eq!(service_info.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_service_info_default() {
    let service_info = ServiceInfo::default();
    let json_value = serde_json::to_value(&service_info).expect("Failed to serialize ServiceInfo");

    assert_eq!(json_value["service"], "catalog-sync");
    assert!(json_value.get("version").is_some());
}

#[tokio::test]
async fn test_healthz_reports_database_ok() {
    let state = memory_state().await;

    let Json(health) = healthz(State(state)).await.expect("healthy");
    assert_eq!(health.status, "ok");
    assert_eq!(health.database, "ok");
}

#[tokio::test]
async fn test_healthz_fails_on_closed_connection() {
    let mut state = memory_state().await;
    state.db = sea_orm::DatabaseConnection::default();

    let err = healthz(State(state)).await.unwrap_err();
    assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(&*err.code, "DATABASE_UNAVAILABLE");
}

#[test]
fn test_openapi_lists_management_routes() {
    let doc = ApiDoc::openapi();
    let paths: Vec<&String> = doc.paths.paths.keys().collect();

    for expected in [
        "/",
        "/healthz",
        "/stores/{store_id}/syncs",
        "/stores/{store_id}/syncs/status",
        "/executions/{run_id}/cancel",
        "/stores/{store_id}/items/{item_id}",
        "/queue/clear",
    ] {
        assert!(
            paths.iter().any(|path| path.as_str() == expected),
            "missing {expected}"
        );
    }
}
