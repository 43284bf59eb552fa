//! Error types and error handling for the HTTP surface
//!
//! Every handler error converts into a JSON response of the form
//! `{"error": "...", "status": 404}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level error types
#[derive(Error, Debug)]
pub enum AppError {
    /// No backend registered the operation
    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    /// The request body is not usable
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The backend did not answer in time
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The backend failed or reported an error
    #[error("Backend error: {0}")]
    Backend(String),

    /// Internal server error (catch-all for unexpected errors)
    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::OperationNotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Backend(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
