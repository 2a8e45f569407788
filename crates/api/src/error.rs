//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use inventory::InventoryError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// The caller's deadline passed before the operation finished.
    DeadlineExceeded,
    /// A dependency is down. The detail is logged, never returned.
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::DeadlineExceeded => (
                StatusCode::GATEWAY_TIMEOUT,
                "Deadline exceeded".to_string(),
            ),
            ApiError::Unavailable(detail) => {
                tracing::error!(error = %detail, "dependency unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Service temporarily unavailable".to_string(),
                )
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<InventoryError> for ApiError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::NotFound(_) => ApiError::NotFound(err.to_string()),
            InventoryError::InvalidRequest(_) | InventoryError::NegativeStock { .. } => {
                ApiError::BadRequest(err.to_string())
            }
            InventoryError::DeadlineExceeded => ApiError::DeadlineExceeded,
            InventoryError::Unavailable(_) => ApiError::Unavailable(err.to_string()),
        }
    }
}
