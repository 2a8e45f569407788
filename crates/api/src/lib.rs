//! HTTP surface of the inventory service.
//!
//! Exposes the stock RPCs as JSON endpoints, plus health and Prometheus
//! metrics. Every RPC runs under a caller deadline taken from the
//! `x-request-timeout-ms` header, or the configured default.

pub mod config;
pub mod error;
pub mod routes;
pub mod seed;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::routing::{get, post};
use inventory::InventoryService;
use ledger::StockLedger;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ApiError;

/// Header carrying the caller's deadline in milliseconds.
pub const REQUEST_TIMEOUT_HEADER: &str = "x-request-timeout-ms";

/// Shared application state accessible from all handlers.
pub struct AppState<L: StockLedger> {
    pub service: InventoryService<L>,
    /// Deadline applied when the caller sends none.
    pub rpc_timeout: Duration,
}

impl<L: StockLedger> AppState<L> {
    pub fn new(service: InventoryService<L>, rpc_timeout: Duration) -> Self {
        Self {
            service,
            rpc_timeout,
        }
    }
}

/// Deadline requested through [`REQUEST_TIMEOUT_HEADER`], if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestDeadline(pub Option<Duration>);

impl RequestDeadline {
    pub fn or(self, default: Duration) -> Duration {
        self.0.unwrap_or(default)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RequestDeadline {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(REQUEST_TIMEOUT_HEADER) else {
            return Ok(Self(None));
        };

        value
            .to_str()
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|millis| *millis > 0)
            .map(|millis| Self(Some(Duration::from_millis(millis))))
            .ok_or_else(|| {
                ApiError::BadRequest(format!(
                    "{REQUEST_TIMEOUT_HEADER} must be a positive number of milliseconds"
                ))
            })
    }
}

/// Runs a read-only call under `deadline`.
pub(crate) async fn bounded<T, F>(deadline: Duration, call: F) -> Result<T, ApiError>
where
    F: Future<Output = inventory::Result<T>>,
{
    tokio::time::timeout(deadline, call)
        .await
        .map_err(|_| ApiError::DeadlineExceeded)?
        .map_err(ApiError::from)
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<L: StockLedger + 'static>(
    state: Arc<AppState<L>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<L>))
        .route("/items", get(routes::items::list::<L>))
        .route("/items/{item_id}", get(routes::items::get::<L>))
        .route(
            "/items/{item_id}/availability",
            get(routes::items::availability::<L>),
        )
        .route("/items/{item_id}/stock", post(routes::items::update_stock::<L>))
        .route("/stock/reserve", post(routes::stock::reserve::<L>))
        .route("/stock/release", post(routes::stock::release::<L>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
