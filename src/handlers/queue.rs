//! # Queue API Handlers
//!
//! Operator controls for the batch queue.

use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::handlers::types::ApiResponse;
use crate::queue::QueueStats;
use crate::server::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct QueueCleared {
    /// Waiting tasks removed
    pub removed: u64,
}

#[utoipa::path(
    get,
    path = "/queue/stats",
    responses((status = 200, description = "Queue counters", body = ApiResponse<QueueStats>)),
    tag = "queue"
)]
pub async fn queue_stats(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<QueueStats>>, ApiError> {
    Ok(Json(ApiResponse::ok(state.queue.stats().await?)))
}

/// Stop claiming new tasks in this process; running tasks finish
#[utoipa::path(
    post,
    path = "/queue/pause",
    responses((status = 200, description = "Queue paused", body = ApiResponse<QueueStats>)),
    tag = "queue"
)]
pub async fn pause_queue(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<QueueStats>>, ApiError> {
    state.queue.pause();
    Ok(Json(ApiResponse::ok(state.queue.stats().await?)))
}

#[utoipa::path(
    post,
    path = "/queue/resume",
    responses((status = 200, description = "Queue resumed", body = ApiResponse<QueueStats>)),
    tag = "queue"
)]
pub async fn resume_queue(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<QueueStats>>, ApiError> {
    state.queue.resume();
    Ok(Json(ApiResponse::ok(state.queue.stats().await?)))
}

/// Delete every waiting task
#[utoipa::path(
    post,
    path = "/queue/clear",
    responses((status = 200, description = "Waiting tasks removed", body = ApiResponse<QueueCleared>)),
    tag = "queue"
)]
pub async fn clear_queue(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<QueueCleared>>, ApiError> {
    let removed = state.queue.clear().await?;
    Ok(Json(ApiResponse::ok(QueueCleared { removed })))
}
