//! Network backend client
//!
//! Sends protocol requests as `POST {url}/rpc` and reads the response envelope
//! from the body.

use crate::dispatcher::client::BackendClient;
use crate::dispatcher::error::BackendError;
use crate::dispatcher::protocol::{parse_operations, BackendRequest, BackendResponse, OperationInfo};
use async_trait::async_trait;
use serde_json::Value;

/// Client for a backend reached over HTTP
pub struct HttpBackendClient {
    /// Shared HTTP client (connection pooling)
    client: reqwest::Client,
    /// Base URL without trailing slash
    base_url: String,
    /// Operations discovered by `connect`
    discovered: Option<Vec<OperationInfo>>,
    /// Next request id
    next_id: u64,
}

impl HttpBackendClient {
    /// Create an unconnected client
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            discovered: None,
            next_id: 1,
        }
    }

    async fn post(&mut self, request: BackendRequest) -> Result<Value, BackendError> {
        self.next_id += 1;
        let url = format!("{}/rpc", self.base_url);

        tracing::debug!(
            url = %url,
            method = %request.method,
            request_id = request.id,
            "Calling network backend"
        );

        let response = self.client.post(&url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error body".to_string());

            tracing::error!(
                status_code = status_code,
                error_body = %error_body,
                "Network backend returned error status"
            );

            return Err(BackendError::Http(format!(
                "backend returned status {}: {}",
                status_code, error_body
            )));
        }

        let body = response.text().await?;
        let parsed: BackendResponse = serde_json::from_str(&body).map_err(|e| {
            BackendError::Protocol(format!("{} - Response body: {}", e, body))
        })?;
        parsed.into_result()
    }
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    /// Reachability is proven by a discovery round trip
    async fn connect(&mut self) -> Result<(), BackendError> {
        let data = self.post(BackendRequest::list_operations(self.next_id)).await?;
        self.discovered = Some(parse_operations(data)?);
        Ok(())
    }

    async fn list_operations(&mut self) -> Result<Vec<OperationInfo>, BackendError> {
        if let Some(ops) = self.discovered.clone() {
            return Ok(ops);
        }
        let data = self.post(BackendRequest::list_operations(self.next_id)).await?;
        parse_operations(data)
    }

    async fn call(&mut self, name: &str, args: Value) -> Result<Value, BackendError> {
        self.post(BackendRequest::call(self.next_id, name, args)).await
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        self.discovered = None;
        Ok(())
    }
}
