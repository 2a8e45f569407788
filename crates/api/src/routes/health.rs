//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use ledger::StockLedger;
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: bool,
    pub broker: bool,
}

/// GET /health
///
/// 503 when the ledger does not answer within the RPC timeout or the
/// broker connection is closed.
pub async fn check<L: StockLedger + 'static>(
    State(state): State<Arc<AppState<L>>>,
) -> (StatusCode, Json<HealthResponse>) {
    let database = tokio::time::timeout(state.rpc_timeout, state.service.ledger_healthy())
        .await
        .unwrap_or(false);
    let broker = state.service.publisher_healthy();

    if database && broker {
        (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                database,
                broker,
            }),
        )
    } else {
        tracing::warn!(database, broker, "health check failed");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unhealthy",
                database,
                broker,
            }),
        )
    }
}
