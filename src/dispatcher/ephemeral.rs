//! Ephemeral process backend
//!
//! Spawns the backend command once per request: one JSON request line on
//! stdin, stdin closed, one JSON response line expected on stdout.

use crate::dispatcher::client::BackendClient;
use crate::dispatcher::descriptor::BackendDescriptor;
use crate::dispatcher::error::BackendError;
use crate::dispatcher::process::build_command;
use crate::dispatcher::protocol::{parse_operations, BackendRequest, BackendResponse, OperationInfo};
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};

/// Client that runs a fresh process for every request
pub struct EphemeralProcessClient {
    /// Launch configuration
    descriptor: BackendDescriptor,
    /// Operations discovered by `connect`
    discovered: Option<Vec<OperationInfo>>,
    /// Next request id
    next_id: u64,
}

impl EphemeralProcessClient {
    /// Create an unconnected client
    pub fn new(descriptor: BackendDescriptor) -> Self {
        Self {
            descriptor,
            discovered: None,
            next_id: 1,
        }
    }

    /// Run the command with a single request and return the response payload
    async fn execute(&mut self, request: BackendRequest) -> Result<Value, BackendError> {
        self.next_id += 1;

        debug!(
            backend_id = %self.descriptor.id,
            command = %self.descriptor.command,
            method = %request.method,
            "Spawning process for request"
        );

        let mut child = build_command(&self.descriptor)
            .spawn()
            .map_err(|e| BackendError::from_spawn(&self.descriptor.command, e))?;

        // Written from its own task so a backend that fills stdout before
        // reading stdin cannot stall on us
        let mut request_line = serde_json::to_vec(&request)?;
        request_line.push(b'\n');
        let stdin = child.stdin.take();
        let writer = tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&request_line).await?;
                stdin.flush().await?;
                // stdin dropped here: the process sees EOF
            }
            Ok::<(), std::io::Error>(())
        });

        let output = child.wait_with_output().await?;
        match writer.await {
            Ok(Ok(())) => {}
            // Usually a broken pipe from a process that never read its input
            Ok(Err(e)) => debug!(backend_id = %self.descriptor.id, error = %e, "Request write failed"),
            Err(e) => debug!(backend_id = %self.descriptor.id, error = %e, "Request writer task failed"),
        }
        let stdout = String::from_utf8_lossy(&output.stdout);

        let response = stdout
            .lines()
            .filter_map(|line| serde_json::from_str::<BackendResponse>(line.trim()).ok())
            .next();

        match response {
            Some(response) => {
                info!(
                    backend_id = %self.descriptor.id,
                    status = %response.status,
                    "Request executed"
                );
                response.into_result()
            }
            None => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let exit_code = output.status.code().unwrap_or(-1);

                error!(
                    backend_id = %self.descriptor.id,
                    exit_code = exit_code,
                    stderr = %stderr,
                    "Process produced no response"
                );

                if output.status.success() {
                    Err(BackendError::Protocol(
                        "process exited without a response line".to_string(),
                    ))
                } else {
                    Err(BackendError::Closed(format!(
                        "Process exited with code {}: {}",
                        exit_code, stderr
                    )))
                }
            }
        }
    }
}

#[async_trait]
impl BackendClient for EphemeralProcessClient {
    /// Probes the launcher by running one discovery request
    async fn connect(&mut self) -> Result<(), BackendError> {
        let data = self
            .execute(BackendRequest::list_operations(self.next_id))
            .await?;
        self.discovered = Some(parse_operations(data)?);
        Ok(())
    }

    async fn list_operations(&mut self) -> Result<Vec<OperationInfo>, BackendError> {
        if let Some(ops) = self.discovered.clone() {
            return Ok(ops);
        }
        let data = self
            .execute(BackendRequest::list_operations(self.next_id))
            .await?;
        parse_operations(data)
    }

    async fn call(&mut self, name: &str, args: Value) -> Result<Value, BackendError> {
        self.execute(BackendRequest::call(self.next_id, name, args))
            .await
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        self.discovered = None;
        Ok(())
    }
}
