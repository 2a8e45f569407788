//! Order reservation and release endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use inventory::{ReleaseResult, ReservationOutcome};
use ledger::{OrderId, ReservationLine, Shortfall, ShortfallReason, StockLedger};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::{AppState, RequestDeadline};

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct StockRequest {
    pub order_id: String,
    pub items: Vec<LineRequest>,
}

#[derive(Debug, Deserialize)]
pub struct LineRequest {
    pub item_id: String,
    pub quantity: i32,
}

impl StockRequest {
    fn into_parts(self) -> (OrderId, Vec<ReservationLine>) {
        let lines = self
            .items
            .into_iter()
            .map(|line| ReservationLine::new(line.item_id, line.quantity))
            .collect();
        (OrderId::new(self.order_id), lines)
    }
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct FailedItem {
    pub item_id: String,
    pub requested_quantity: i32,
    pub available_quantity: i32,
    pub reason: ShortfallReason,
}

impl From<Shortfall> for FailedItem {
    fn from(shortfall: Shortfall) -> Self {
        Self {
            item_id: shortfall.item_id.to_string(),
            requested_quantity: shortfall.requested,
            available_quantity: shortfall.available,
            reason: shortfall.reason,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReserveResponse {
    pub success: bool,
    pub message: String,
    pub failed_items: Vec<FailedItem>,
}

#[derive(Debug, Serialize)]
pub struct ReleaseResponse {
    pub success: bool,
    pub message: String,
}

// -- Handlers --

/// POST /stock/reserve
///
/// Insufficient stock is a normal outcome: 200 with `success: false` and
/// the lines that blocked the order. An order that was already released
/// holds no stock and also answers `success: false`.
#[tracing::instrument(skip(state, deadline, req), fields(order_id = %req.order_id))]
pub async fn reserve<L: StockLedger + 'static>(
    State(state): State<Arc<AppState<L>>>,
    deadline: RequestDeadline,
    Json(req): Json<StockRequest>,
) -> Result<Json<ReserveResponse>, ApiError> {
    let (order_id, lines) = req.into_parts();
    let outcome = state
        .service
        .reserve_stock(order_id, lines, Some(deadline.or(state.rpc_timeout)))
        .await?;

    let response = match outcome {
        ReservationOutcome::Reserved => ReserveResponse {
            success: true,
            message: "Stock reserved successfully".to_string(),
            failed_items: Vec::new(),
        },
        ReservationOutcome::AlreadyReserved => ReserveResponse {
            success: true,
            message: "Stock already reserved for this order".to_string(),
            failed_items: Vec::new(),
        },
        ReservationOutcome::AlreadyReleased => ReserveResponse {
            success: false,
            message: "Order already released, no stock reserved".to_string(),
            failed_items: Vec::new(),
        },
        ReservationOutcome::Rejected { failed_items } => ReserveResponse {
            success: false,
            message: "Insufficient stock".to_string(),
            failed_items: failed_items.into_iter().map(FailedItem::from).collect(),
        },
    };
    Ok(Json(response))
}

/// POST /stock/release
#[tracing::instrument(skip(state, deadline, req), fields(order_id = %req.order_id))]
pub async fn release<L: StockLedger + 'static>(
    State(state): State<Arc<AppState<L>>>,
    deadline: RequestDeadline,
    Json(req): Json<StockRequest>,
) -> Result<Json<ReleaseResponse>, ApiError> {
    let (order_id, lines) = req.into_parts();
    let result = state
        .service
        .release_stock(order_id, lines, Some(deadline.or(state.rpc_timeout)))
        .await?;

    let message = match result {
        ReleaseResult::Released { .. } => "Stock released successfully",
        ReleaseResult::NotReserved => "No stock was reserved for this order",
        ReleaseResult::AlreadyReleased => "Stock already released for this order",
    };
    Ok(Json(ReleaseResponse {
        success: true,
        message: message.to_string(),
    }))
}
