//! # Item API Handlers
//!
//! Read access to mirrored items, manual deletion and per-store statistics.

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::error::{ApiError, not_found};
use crate::handlers::types::{ApiResponse, PageQuery, PaginatedResponse};
use crate::models::item::ItemResponse;
use crate::models::sync_state::SyncStateView;
use crate::repositories::ItemStats;
use crate::server::AppState;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListItemsQuery {
    /// Include soft-deleted items (default: false)
    pub include_deleted: Option<bool>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct DeleteItemQuery {
    /// Remove the row instead of soft-deleting it
    pub hard: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeletedItem {
    pub store_id: String,
    pub item_id: String,
    pub hard: bool,
}

/// Item counts and sync totals for one store
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StoreStats {
    pub store_id: String,
    pub items: ItemStats,
    pub syncs: Vec<SyncStateView>,
}

#[utoipa::path(
    get,
    path = "/stores/{store_id}/items",
    params(("store_id" = String, Path, description = "Store identifier"), ListItemsQuery),
    responses(
        (status = 200, description = "Items ordered by item id", body = ApiResponse<PaginatedResponse<ItemResponse>>),
        (status = 400, description = "Invalid query parameters", body = ApiError)
    ),
    tag = "items"
)]
pub async fn list_items(
    State(state): State<AppState>,
    Path(store_id): Path<String>,
    Query(query): Query<ListItemsQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<ItemResponse>>>, ApiError> {
    let page = PageQuery {
        limit: query.limit,
        offset: query.offset,
    }
    .page()?;

    let (items, total) = state
        .items
        .list(
            &store_id,
            query.include_deleted.unwrap_or(false),
            page.limit,
            page.offset,
        )
        .await?;
    let data = items.into_iter().map(ItemResponse::from).collect();

    Ok(Json(ApiResponse::ok(PaginatedResponse::new(data, total, page))))
}

#[utoipa::path(
    get,
    path = "/stores/{store_id}/items/{item_id}",
    params(
        ("store_id" = String, Path, description = "Store identifier"),
        ("item_id" = String, Path, description = "Upstream item identifier")
    ),
    responses(
        (status = 200, description = "Item", body = ApiResponse<ItemResponse>),
        (status = 404, description = "Unknown item", body = ApiError)
    ),
    tag = "items"
)]
pub async fn get_item(
    State(state): State<AppState>,
    Path((store_id, item_id)): Path<(String, String)>,
) -> Result<Json<ApiResponse<ItemResponse>>, ApiError> {
    let item = state
        .items
        .find(&store_id, &item_id)
        .await?
        .ok_or_else(|| not_found(&format!("Item {item_id} not found in store {store_id}")))?;
    Ok(Json(ApiResponse::ok(item.into())))
}

/// Delete an item; soft by default, so the next full sync can revive it
#[utoipa::path(
    delete,
    path = "/stores/{store_id}/items/{item_id}",
    params(
        ("store_id" = String, Path, description = "Store identifier"),
        ("item_id" = String, Path, description = "Upstream item identifier"),
        DeleteItemQuery
    ),
    responses(
        (status = 200, description = "Item deleted", body = ApiResponse<DeletedItem>),
        (status = 404, description = "Unknown or already deleted item", body = ApiError)
    ),
    tag = "items"
)]
pub async fn delete_item(
    State(state): State<AppState>,
    Path((store_id, item_id)): Path<(String, String)>,
    Query(query): Query<DeleteItemQuery>,
) -> Result<Json<ApiResponse<DeletedItem>>, ApiError> {
    let hard = query.hard.unwrap_or(false);
    if !state.items.delete(&store_id, &item_id, hard).await? {
        return Err(not_found(&format!(
            "Item {item_id} not found in store {store_id}"
        )));
    }

    Ok(Json(ApiResponse::ok(DeletedItem {
        store_id,
        item_id,
        hard,
    })))
}

#[utoipa::path(
    get,
    path = "/stores/{store_id}/stats",
    params(("store_id" = String, Path, description = "Store identifier")),
    responses(
        (status = 200, description = "Store statistics", body = ApiResponse<StoreStats>)
    ),
    tag = "items"
)]
pub async fn store_stats(
    State(state): State<AppState>,
    Path(store_id): Path<String>,
) -> Result<Json<ApiResponse<StoreStats>>, ApiError> {
    let items = state.items.stats(&store_id).await?;
    let syncs = state
        .states
        .list(Some(&store_id))
        .await?
        .iter()
        .map(|sync_state| sync_state.view(Vec::new()))
        .collect();

    Ok(Json(ApiResponse::ok(StoreStats {
        store_id,
        items,
        syncs,
    })))
}
