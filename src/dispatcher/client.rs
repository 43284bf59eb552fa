//! Backend capability interface
//!
//! Every backend, whatever its transport or lifecycle, is driven through the
//! same four calls. The dispatcher never needs to know which implementation
//! it is holding.

use crate::dispatcher::descriptor::{BackendDescriptor, Lifecycle, Transport};
use crate::dispatcher::ephemeral::EphemeralProcessClient;
use crate::dispatcher::error::BackendError;
use crate::dispatcher::http::HttpBackendClient;
use crate::dispatcher::process::PersistentProcessClient;
use crate::dispatcher::protocol::OperationInfo;
use async_trait::async_trait;
use serde_json::Value;

/// Connection to one backend
///
/// Timeouts are applied by the caller; implementations must leave no process
/// or connection behind when a future is dropped mid-flight.
#[async_trait]
pub trait BackendClient: Send {
    /// Establish the connection (spawn the process, reach the service)
    async fn connect(&mut self) -> Result<(), BackendError>;

    /// Ask the backend which operations it exposes
    async fn list_operations(&mut self) -> Result<Vec<OperationInfo>, BackendError>;

    /// Invoke an operation
    async fn call(&mut self, name: &str, args: Value) -> Result<Value, BackendError>;

    /// Release the connection; safe to call more than once
    async fn close(&mut self) -> Result<(), BackendError>;
}

/// Builds a client for a descriptor
///
/// Called once per connection attempt, so a failed attempt never leaks state
/// into the next one.
pub trait BackendConnector: Send + Sync {
    /// Create an unconnected client
    fn client_for(&self, descriptor: &BackendDescriptor) -> Box<dyn BackendClient>;
}

/// Default connector: picks the implementation from transport and lifecycle
#[derive(Debug, Clone, Default)]
pub struct TransportConnector {
    /// Shared HTTP client for network backends (connection pooling)
    http: reqwest::Client,
}

impl TransportConnector {
    /// Create a connector with a fresh HTTP client
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a connector that reuses an existing HTTP client
    pub fn with_http_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl BackendConnector for TransportConnector {
    fn client_for(&self, descriptor: &BackendDescriptor) -> Box<dyn BackendClient> {
        match (descriptor.transport, descriptor.lifecycle) {
            (Transport::Network, _) => Box::new(HttpBackendClient::new(
                self.http.clone(),
                descriptor.url.clone().unwrap_or_default(),
            )),
            (Transport::Process, Lifecycle::Persistent) => {
                Box::new(PersistentProcessClient::new(descriptor.clone()))
            }
            (Transport::Process, Lifecycle::Ephemeral) => {
                Box::new(EphemeralProcessClient::new(descriptor.clone()))
            }
        }
    }
}
