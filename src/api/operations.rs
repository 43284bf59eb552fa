//! Operation and backend handlers
//!
//! Thin wrappers over [`Dispatcher`]: discovery, invocation and the backend
//! overview. Call outcomes map onto status codes (404 unknown operation,
//! 504 timeout, 502 backend failure).

use crate::dispatcher::{BackendSummary, CallOutcome, Dispatcher, ExcludedBackend, ToolEntry};
use crate::error::AppError;
use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Shared handler state
pub type DispatcherState = Arc<Dispatcher>;

/// Response for `GET /api/operations`
#[derive(Debug, Serialize)]
pub struct OperationsListResponse {
    /// Registered operations sorted by name
    pub operations: Vec<ToolEntry>,
    /// Number of operations
    pub count: usize,
}

/// Response for a successful call
#[derive(Debug, Serialize)]
pub struct CallResponse {
    /// Operation that was called
    pub operation: String,
    /// Backend that served it
    pub backend_id: String,
    /// Result payload
    pub result: Value,
}

/// Response for `GET /api/backends`
#[derive(Debug, Serialize)]
pub struct BackendsResponse {
    /// Connected backends in acquisition order
    pub connected: Vec<BackendSummary>,
    /// Backends left out at startup
    pub excluded: Vec<ExcludedBackend>,
}

/// List every registered operation
pub async fn list_operations(State(dispatcher): State<DispatcherState>) -> Json<OperationsListResponse> {
    let operations = dispatcher.list_operations();
    Json(OperationsListResponse {
        count: operations.len(),
        operations,
    })
}

/// Call an operation; the request body is the arguments object
pub async fn call_operation(
    State(dispatcher): State<DispatcherState>,
    Path(name): Path<String>,
    Json(arguments): Json<Value>,
) -> Result<Json<CallResponse>, AppError> {
    if !arguments.is_object() {
        return Err(AppError::InvalidRequest(
            "arguments must be a JSON object".to_string(),
        ));
    }

    info!(operation = %name, "Operation call requested");

    match dispatcher.call(&name, arguments).await {
        CallOutcome::Success { backend_id, result } => Ok(Json(CallResponse {
            operation: name,
            backend_id,
            result,
        })),
        CallOutcome::NotFound { name } => Err(AppError::OperationNotFound(name)),
        CallOutcome::TimedOut {
            backend_id,
            timeout_secs,
        } => Err(AppError::Timeout(format!(
            "backend '{}' did not answer within {} seconds",
            backend_id, timeout_secs
        ))),
        CallOutcome::TransportError {
            backend_id,
            message,
        } => Err(AppError::Backend(format!("{}: {}", backend_id, message))),
    }
}

/// Connected and excluded backends
pub async fn list_backends(State(dispatcher): State<DispatcherState>) -> Json<BackendsResponse> {
    Json(BackendsResponse {
        connected: dispatcher.backends(),
        excluded: dispatcher.excluded_backends().to_vec(),
    })
}
