//! Backend wire protocol
//!
//! Process backends exchange one JSON object per line over stdin/stdout;
//! network backends receive the same request body at `POST {url}/rpc`.
//!
//! Request:  `{"id": 7, "method": "call", "params": {"name": "search", "arguments": {...}}}`
//! Response: `{"id": 7, "status": "success", "data": ...}` or
//!           `{"id": 7, "status": "error", "message": "..."}`

use crate::dispatcher::error::BackendError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Method name for operation discovery
pub const METHOD_LIST_OPERATIONS: &str = "list_operations";

/// Method name for operation invocation
pub const METHOD_CALL: &str = "call";

/// Request sent to a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendRequest {
    /// Correlation id echoed back by the backend
    pub id: u64,
    /// `list_operations` or `call`
    pub method: String,
    /// Method parameters
    #[serde(default)]
    pub params: Value,
}

impl BackendRequest {
    /// Discovery request
    pub fn list_operations(id: u64) -> Self {
        Self {
            id,
            method: METHOD_LIST_OPERATIONS.to_string(),
            params: json!({}),
        }
    }

    /// Invocation request
    pub fn call(id: u64, name: &str, arguments: Value) -> Self {
        Self {
            id,
            method: METHOD_CALL.to_string(),
            params: json!({ "name": name, "arguments": arguments }),
        }
    }
}

/// Response received from a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendResponse {
    /// Correlation id; backends that do not echo it are matched in order
    #[serde(default)]
    pub id: Option<u64>,
    /// `success` or `error`
    pub status: String,
    /// Response data (for success)
    #[serde(default)]
    pub data: Option<Value>,
    /// Error message (for error)
    #[serde(default)]
    pub message: Option<String>,
}

impl BackendResponse {
    /// Turn the envelope into the payload or a backend error
    pub fn into_result(self) -> Result<Value, BackendError> {
        match self.status.as_str() {
            "success" => Ok(self.data.unwrap_or(Value::Null)),
            "error" => Err(BackendError::Remote(
                self.message.unwrap_or_else(|| "Unknown error".to_string()),
            )),
            other => Err(BackendError::Protocol(format!(
                "Unexpected response status: {}",
                other
            ))),
        }
    }
}

/// An operation as advertised by a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationInfo {
    /// Operation name, unique across the dispatcher
    pub name: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the arguments
    #[serde(default)]
    pub input_schema: Value,
}

/// Parse the payload of a `list_operations` reply
///
/// Accepts either a bare array or `{"operations": [...]}`.
pub fn parse_operations(data: Value) -> Result<Vec<OperationInfo>, BackendError> {
    let list = match data {
        Value::Object(mut map) => map.remove("operations").unwrap_or(Value::Null),
        other => other,
    };
    if !list.is_array() {
        return Err(BackendError::Protocol(
            "list_operations reply is not an operation list".to_string(),
        ));
    }
    Ok(serde_json::from_value(list)?)
}

/// A registered operation and the backend that owns it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolEntry {
    /// Operation name
    pub name: String,
    /// Owning backend
    pub backend_id: String,
    /// JSON Schema for the arguments
    pub input_schema: Value,
    /// Description cached at discovery time
    pub description: String,
}

impl ToolEntry {
    /// Build an entry from a discovered operation
    pub fn from_operation(backend_id: &str, operation: OperationInfo) -> Self {
        Self {
            name: operation.name,
            backend_id: backend_id.to_string(),
            input_schema: operation.input_schema,
            description: operation.description,
        }
    }
}

/// Result of routing a call through the dispatcher
///
/// Every backend-side problem is a value here; nothing is raised across the
/// dispatcher boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallOutcome {
    /// The backend returned a result
    Success {
        /// Backend that served the call
        backend_id: String,
        /// Result payload
        result: Value,
    },
    /// No backend registered the operation
    NotFound {
        /// Requested operation name
        name: String,
    },
    /// The backend did not answer within its timeout
    TimedOut {
        /// Backend that timed out
        backend_id: String,
        /// Timeout that was exceeded
        timeout_secs: u64,
    },
    /// The call failed at the transport level or the backend reported an error
    TransportError {
        /// Backend the call was routed to
        backend_id: String,
        /// Failure description
        message: String,
    },
}

impl CallOutcome {
    /// Whether the call produced a result
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success { .. })
    }

    /// The result payload, if the call succeeded
    pub fn result(&self) -> Option<&Value> {
        match self {
            CallOutcome::Success { result, .. } => Some(result),
            _ => None,
        }
    }
}
