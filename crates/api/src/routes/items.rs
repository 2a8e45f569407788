//! Item lookup and stock adjustment endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use inventory::{Availability, InventoryError};
use ledger::{Item, ItemId, StockLedger};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::{AppState, RequestDeadline, bounded};

#[derive(Debug, Serialize)]
pub struct ItemResponse {
    pub item_id: String,
    pub name: String,
    pub category: String,
    pub quantity: i32,
    pub price_cents: i64,
}

impl From<Item> for ItemResponse {
    fn from(item: Item) -> Self {
        Self {
            item_id: item.item_id.to_string(),
            name: item.name,
            category: item.category,
            quantity: item.quantity,
            price_cents: item.price_cents,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub requested_quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStockRequest {
    pub delta: i32,
}

#[derive(Debug, Serialize)]
pub struct UpdateStockResponse {
    pub success: bool,
    pub message: String,
    pub new_quantity: i32,
}

/// GET /items/{item_id}
#[tracing::instrument(skip(state, deadline))]
pub async fn get<L: StockLedger + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(item_id): Path<String>,
    deadline: RequestDeadline,
) -> Result<Json<ItemResponse>, ApiError> {
    let item_id = ItemId::new(item_id);
    let item = bounded(
        deadline.or(state.rpc_timeout),
        state.service.get_item(&item_id),
    )
    .await?;
    Ok(Json(item.into()))
}

/// GET /items
#[tracing::instrument(skip(state, deadline))]
pub async fn list<L: StockLedger + 'static>(
    State(state): State<Arc<AppState<L>>>,
    deadline: RequestDeadline,
) -> Result<Json<Vec<ItemResponse>>, ApiError> {
    let items = bounded(deadline.or(state.rpc_timeout), state.service.list_items()).await?;
    Ok(Json(items.into_iter().map(ItemResponse::from).collect()))
}

/// GET /items/{item_id}/availability?requested_quantity=N
#[tracing::instrument(skip(state, deadline))]
pub async fn availability<L: StockLedger + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(item_id): Path<String>,
    Query(query): Query<AvailabilityQuery>,
    deadline: RequestDeadline,
) -> Result<Json<Availability>, ApiError> {
    let item_id = ItemId::new(item_id);
    let availability = bounded(
        deadline.or(state.rpc_timeout),
        state
            .service
            .check_availability(&item_id, query.requested_quantity),
    )
    .await?;
    Ok(Json(availability))
}

/// POST /items/{item_id}/stock
///
/// A delta that would leave negative stock is reported with
/// `success: false` and the unchanged quantity.
#[tracing::instrument(skip(state, deadline))]
pub async fn update_stock<L: StockLedger + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(item_id): Path<String>,
    deadline: RequestDeadline,
    Json(req): Json<UpdateStockRequest>,
) -> Result<Json<UpdateStockResponse>, ApiError> {
    let item_id = ItemId::new(item_id);
    let result = state
        .service
        .update_stock(&item_id, req.delta, Some(deadline.or(state.rpc_timeout)))
        .await;

    match result {
        Ok(adjustment) => Ok(Json(UpdateStockResponse {
            success: true,
            message: "Stock updated successfully".to_string(),
            new_quantity: adjustment.current,
        })),
        Err(e @ InventoryError::NegativeStock { available, .. }) => Ok(Json(UpdateStockResponse {
            success: false,
            message: e.to_string(),
            new_quantity: available,
        })),
        Err(e) => Err(e.into()),
    }
}
