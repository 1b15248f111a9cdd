//! # Sync API Handlers
//!
//! Starting a sync, reading its status and clearing a stuck run for one store.

use axum::{
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use tracing::{Instrument, error, info, info_span};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::{ApiError, not_found};
use crate::handlers::types::ApiResponse;
use crate::models::sync_run::DispatchMode;
use crate::models::sync_state::{RunMode, SyncStateView, SyncType};
use crate::server::AppState;
use crate::source::StoreCredentials;
use crate::sync::{SyncOptions, SyncOptionsInput};

/// Body of a sync request
#[derive(Debug, Deserialize, ToSchema)]
pub struct StartSyncRequest {
    /// Catalog entity to sync (default: `products`)
    #[serde(default)]
    pub sync_type: SyncType,
    pub credentials: StoreCredentials,
    #[serde(default)]
    pub options: SyncOptionsInput,
}

/// Returned when a run has been claimed and started
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SyncAccepted {
    pub run_id: Uuid,
    pub store_id: String,
    pub sync_type: SyncType,
    pub mode: RunMode,
    pub dispatch: DispatchMode,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct SyncTypeQuery {
    /// Catalog entity (default: `products`)
    pub sync_type: Option<SyncType>,
}

/// Start a sync run for a store.
///
/// The run is claimed before responding; enumeration and dispatch continue in the background.
#[utoipa::path(
    post,
    path = "/stores/{store_id}/syncs",
    params(("store_id" = String, Path, description = "Store identifier")),
    request_body = StartSyncRequest,
    responses(
        (status = 202, description = "Sync run started", body = ApiResponse<SyncAccepted>),
        (status = 400, description = "Invalid options", body = ApiError),
        (status = 409, description = "A sync is already running for this store", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "syncs"
)]
pub async fn start_sync(
    State(state): State<AppState>,
    Path(store_id): Path<String>,
    payload: Result<Json<StartSyncRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<SyncAccepted>>), ApiError> {
    let Json(request) = payload?;
    let orchestrator = state.orchestrator.clone();

    let options = SyncOptions::resolve(request.options, orchestrator.config())?;
    let dispatch = options.dispatch;
    let run = orchestrator
        .begin_run(&store_id, request.sync_type, request.credentials, options)
        .await?;

    let accepted = SyncAccepted {
        run_id: run.run_id,
        store_id: store_id.clone(),
        sync_type: run.sync_type,
        mode: run.mode,
        dispatch,
    };

    let span = info_span!("sync_run", run_id = %run.run_id, %store_id);
    tokio::spawn(
        async move {
            match orchestrator.execute(run).await {
                Ok(summary) => info!(status = summary.status.as_str(), "Background sync finished"),
                Err(err) => error!(error = %err, "Background sync could not be finalized"),
            }
        }
        .instrument(span),
    );

    Ok((StatusCode::ACCEPTED, Json(ApiResponse::ok(accepted))))
}

/// Current sync state for a store, including the running or most recent run
#[utoipa::path(
    get,
    path = "/stores/{store_id}/syncs/status",
    params(("store_id" = String, Path, description = "Store identifier"), SyncTypeQuery),
    responses(
        (status = 200, description = "Sync state", body = ApiResponse<SyncStateView>),
        (status = 404, description = "Store has never synced", body = ApiError)
    ),
    tag = "syncs"
)]
pub async fn sync_status(
    State(state): State<AppState>,
    Path(store_id): Path<String>,
    Query(query): Query<SyncTypeQuery>,
) -> Result<Json<ApiResponse<SyncStateView>>, ApiError> {
    let sync_type = query.sync_type.unwrap_or_default();
    let view = state
        .orchestrator
        .status(&store_id, sync_type)
        .await?
        .ok_or_else(|| not_found(&format!("No {sync_type} sync state for store {store_id}")))?;
    Ok(Json(ApiResponse::ok(view)))
}

/// Force-finalize a stuck run so the store can sync again
#[utoipa::path(
    post,
    path = "/stores/{store_id}/syncs/reset",
    params(("store_id" = String, Path, description = "Store identifier"), SyncTypeQuery),
    responses(
        (status = 200, description = "State after the reset", body = ApiResponse<SyncStateView>),
        (status = 404, description = "Store has never synced", body = ApiError)
    ),
    tag = "syncs"
)]
pub async fn reset_sync(
    State(state): State<AppState>,
    Path(store_id): Path<String>,
    Query(query): Query<SyncTypeQuery>,
) -> Result<Json<ApiResponse<SyncStateView>>, ApiError> {
    let sync_type = query.sync_type.unwrap_or_default();
    let view = state
        .orchestrator
        .force_reset(&store_id, sync_type)
        .await?
        .ok_or_else(|| not_found(&format!("No {sync_type} sync state for store {store_id}")))?;
    Ok(Json(ApiResponse::ok(view)))
}
