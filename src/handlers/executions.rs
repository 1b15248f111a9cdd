//! # Execution API Handlers
//!
//! Execution history and cancellation of running syncs.

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::{ApiError, conflict, not_found};
use crate::handlers::types::{ApiResponse, PageQuery, PaginatedResponse};
use crate::models::sync_run::{ExecutionInfo, RunStatus};
use crate::models::sync_state::RunErrorEntry;
use crate::server::AppState;

const EXECUTION_ERROR_LIMIT: u64 = 500;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListExecutionsQuery {
    /// Only runs for this store
    pub store_id: Option<String>,
    /// Only runs with this status
    pub status: Option<RunStatus>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// One execution with the errors recorded against it
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ExecutionDetail {
    #[serde(flatten)]
    pub execution: ExecutionInfo,
    pub errors: Vec<RunErrorEntry>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CancelResponse {
    pub run_id: Uuid,
    pub cancel_requested: bool,
}

/// List sync executions, newest first
#[utoipa::path(
    get,
    path = "/executions",
    params(ListExecutionsQuery),
    responses(
        (status = 200, description = "Executions", body = ApiResponse<PaginatedResponse<ExecutionInfo>>),
        (status = 400, description = "Invalid query parameters", body = ApiError)
    ),
    tag = "executions"
)]
pub async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<ListExecutionsQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<ExecutionInfo>>>, ApiError> {
    let page = PageQuery {
        limit: query.limit,
        offset: query.offset,
    }
    .page()?;

    let (runs, total) = state
        .runs
        .list(query.store_id.as_deref(), query.status, page.limit, page.offset)
        .await?;
    let data = runs.into_iter().map(ExecutionInfo::from).collect();

    Ok(Json(ApiResponse::ok(PaginatedResponse::new(data, total, page))))
}

#[utoipa::path(
    get,
    path = "/executions/{run_id}",
    params(("run_id" = Uuid, Path, description = "Run identifier")),
    responses(
        (status = 200, description = "Execution detail", body = ApiResponse<ExecutionDetail>),
        (status = 404, description = "Unknown run", body = ApiError)
    ),
    tag = "executions"
)]
pub async fn get_execution(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<ApiResponse<ExecutionDetail>>, ApiError> {
    let run = state
        .runs
        .find(run_id)
        .await?
        .ok_or_else(|| not_found(&format!("Execution {run_id} not found")))?;
    let errors = state.runs.errors(run_id, EXECUTION_ERROR_LIMIT).await?;

    Ok(Json(ApiResponse::ok(ExecutionDetail {
        execution: run.into(),
        errors,
    })))
}

/// Request cancellation of a running execution
#[utoipa::path(
    post,
    path = "/executions/{run_id}/cancel",
    params(("run_id" = Uuid, Path, description = "Run identifier")),
    responses(
        (status = 200, description = "Cancellation requested", body = ApiResponse<CancelResponse>),
        (status = 404, description = "Unknown run", body = ApiError),
        (status = 409, description = "Run is not in progress", body = ApiError)
    ),
    tag = "executions"
)]
pub async fn cancel_execution(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<ApiResponse<CancelResponse>>, ApiError> {
    if state.orchestrator.cancel(run_id).await? {
        return Ok(Json(ApiResponse::ok(CancelResponse {
            run_id,
            cancel_requested: true,
        })));
    }

    match state.runs.find(run_id).await? {
        Some(run) => Err(conflict(&format!(
            "Execution {run_id} is not in progress (status: {})",
            run.status.as_str()
        ))),
        None => Err(not_found(&format!("Execution {run_id} not found"))),
    }
}
