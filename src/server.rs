//! # Server Configuration
//!
//! Router, shared state and OpenAPI document for the catalog sync management API.

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::handlers::{self, executions, items, queue, syncs};
use crate::queue::JobQueue;
use crate::repositories::{ItemRepository, SyncRunRepository, SyncStateRepository};
use crate::sync::SyncOrchestrator;
use crate::telemetry;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub orchestrator: SyncOrchestrator,
    pub queue: JobQueue,
    pub items: ItemRepository,
    pub runs: SyncRunRepository,
    pub states: SyncStateRepository,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, db: DatabaseConnection, orchestrator: SyncOrchestrator) -> Self {
        Self {
            config,
            queue: orchestrator.queue().clone(),
            items: ItemRepository::new(db.clone()),
            runs: SyncRunRepository::new(db.clone()),
            states: SyncStateRepository::new(db.clone()),
            db,
            orchestrator,
        }
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/stores/{store_id}/syncs", post(syncs::start_sync))
        .route("/stores/{store_id}/syncs/status", get(syncs::sync_status))
        .route("/stores/{store_id}/syncs/reset", post(syncs::reset_sync))
        .route("/stores/{store_id}/items", get(items::list_items))
        .route(
            "/stores/{store_id}/items/{item_id}",
            get(items::get_item).delete(items::delete_item),
        )
        .route("/stores/{store_id}/stats", get(items::store_stats))
        .route("/executions", get(executions::list_executions))
        .route("/executions/{run_id}", get(executions::get_execution))
        .route("/executions/{run_id}/cancel", post(executions::cancel_execution))
        .route("/queue/stats", get(queue::queue_stats))
        .route("/queue/pause", post(queue::pause_queue))
        .route("/queue/resume", post(queue::resume_queue))
        .route("/queue/clear", post(queue::clear_queue))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(telemetry::trace_context_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve until `shutdown` fires
pub async fn run_server(state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = state.config.bind_addr()?;
    let profile = state.config.profile.clone();
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, %profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Server stopped");
    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::syncs::start_sync,
        crate::handlers::syncs::sync_status,
        crate::handlers::syncs::reset_sync,
        crate::handlers::executions::list_executions,
        crate::handlers::executions::get_execution,
        crate::handlers::executions::cancel_execution,
        crate::handlers::items::list_items,
        crate::handlers::items::get_item,
        crate::handlers::items::delete_item,
        crate::handlers::items::store_stats,
        crate::handlers::queue::queue_stats,
        crate::handlers::queue::pause_queue,
        crate::handlers::queue::resume_queue,
        crate::handlers::queue::clear_queue,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::HealthStatus,
            crate::error::ApiError,
            crate::handlers::syncs::StartSyncRequest,
            crate::handlers::syncs::SyncAccepted,
            crate::handlers::executions::ExecutionDetail,
            crate::handlers::executions::CancelResponse,
            crate::handlers::items::DeletedItem,
            crate::handlers::items::StoreStats,
            crate::handlers::queue::QueueCleared,
            crate::models::item::ItemResponse,
            crate::models::sync_run::ExecutionInfo,
            crate::models::sync_state::SyncStateView,
            crate::source::StoreCredentials,
            crate::sync::SyncOptionsInput,
            crate::sync::RunSummary,
            crate::queue::QueueStats,
        )
    ),
    tags(
        (name = "root", description = "Service information and health"),
        (name = "syncs", description = "Start and inspect catalog syncs"),
        (name = "executions", description = "Sync execution history"),
        (name = "items", description = "Mirrored catalog items"),
        (name = "queue", description = "Batch queue controls"),
    ),
    info(
        title = "Catalog Sync API",
        description = "Mirror a remote store catalog into a local item store",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
