//! Persistent process backend
//!
//! Keeps one child process alive for the dispatcher's lifetime and talks to it
//! with newline-delimited JSON over stdin/stdout.

use crate::dispatcher::client::BackendClient;
use crate::dispatcher::descriptor::BackendDescriptor;
use crate::dispatcher::error::BackendError;
use crate::dispatcher::protocol::{parse_operations, BackendRequest, BackendResponse, OperationInfo};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Number of stderr lines kept for error reports
const STDERR_TAIL_LINES: usize = 20;

/// Build the launch command for a process backend
///
/// Children are killed when their handle is dropped, so an abandoned
/// (timed-out) attempt cannot leave a stray process behind.
pub(crate) fn build_command(descriptor: &BackendDescriptor) -> Command {
    let mut cmd = Command::new(&descriptor.command);
    cmd.args(&descriptor.args);

    for (key, value) in &descriptor.env {
        cmd.env(key, value);
    }

    if let Some(work_dir) = &descriptor.working_dir {
        cmd.current_dir(work_dir);
    }

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Handle to a long-lived backend process
pub struct PersistentProcessClient {
    /// Launch configuration
    descriptor: BackendDescriptor,
    /// Child process handle (without stdin/stdout/stderr)
    child: Option<Child>,
    /// Stdin handle for sending requests
    stdin: Option<ChildStdin>,
    /// Stdout handle for receiving responses
    stdout: Option<BufReader<ChildStdout>>,
    /// Task draining stderr; yields the last lines when the process exits
    stderr: Option<JoinHandle<String>>,
    /// Next request id
    next_id: u64,
    /// Set while a request is on the wire; still set means it was abandoned
    in_flight: bool,
}

impl PersistentProcessClient {
    /// Create an unconnected client
    pub fn new(descriptor: BackendDescriptor) -> Self {
        Self {
            descriptor,
            child: None,
            stdin: None,
            stdout: None,
            stderr: None,
            next_id: 1,
            in_flight: false,
        }
    }

    /// Check if the backend process is still running
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Restart the process if the previous request was dropped mid-flight
    ///
    /// A cancelled round trip can leave its reply unread on stdout or half a
    /// request line on stdin. Id-less replies cannot be told apart, so the
    /// only safe state is a fresh process.
    async fn recover_abandoned(&mut self) -> Result<(), BackendError> {
        if !self.in_flight {
            return Ok(());
        }

        warn!(
            backend_id = %self.descriptor.id,
            "Previous request was abandoned, restarting backend process"
        );
        self.close().await?;
        self.in_flight = false;
        self.connect().await
    }

    /// Send one request and wait for the matching response
    ///
    /// Responses carrying a different id are discarded. `in_flight` stays set
    /// if this future is dropped before it completes.
    async fn round_trip(&mut self, request: BackendRequest) -> Result<Value, BackendError> {
        self.in_flight = true;
        let result = self.exchange(request).await;
        self.in_flight = false;
        result
    }

    async fn exchange(&mut self, request: BackendRequest) -> Result<Value, BackendError> {
        let request_json = serde_json::to_string(&request)?;

        debug!(
            backend_id = %self.descriptor.id,
            request_id = request.id,
            method = %request.method,
            "Sending request to backend"
        );

        {
            let stdin = self.stdin.as_mut().ok_or(BackendError::NotConnected)?;
            stdin.write_all(request_json.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await?;
        }

        loop {
            let mut line = String::new();
            let bytes_read = {
                let stdout = self.stdout.as_mut().ok_or(BackendError::NotConnected)?;
                stdout.read_line(&mut line).await?
            };

            if bytes_read == 0 {
                return Err(self.exited_error().await);
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let response: BackendResponse = match serde_json::from_str(trimmed) {
                Ok(response) => response,
                Err(e) => {
                    warn!(
                        backend_id = %self.descriptor.id,
                        error = %e,
                        line = %trimmed,
                        "Ignoring non-protocol line on backend stdout"
                    );
                    continue;
                }
            };

            match response.id {
                Some(id) if id != request.id => {
                    debug!(
                        backend_id = %self.descriptor.id,
                        expected = request.id,
                        received = id,
                        "Discarding stale response"
                    );
                }
                _ => return response.into_result(),
            }
        }
    }

    /// Build the error for an unexpected EOF, including the stderr tail
    async fn exited_error(&mut self) -> BackendError {
        let status = self.child.as_mut().and_then(|child| child.try_wait().ok().flatten());
        let stderr_output = match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };

        error!(
            backend_id = %self.descriptor.id,
            exit_status = ?status,
            stderr = %stderr_output,
            "Backend process exited"
        );

        if stderr_output.trim().is_empty() {
            BackendError::Closed(format!("process exited with status {:?}", status))
        } else {
            BackendError::Closed(format!(
                "process exited with status {:?}. Stderr: {}",
                status, stderr_output
            ))
        }
    }

    fn take_request_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

#[async_trait]
impl BackendClient for PersistentProcessClient {
    async fn connect(&mut self) -> Result<(), BackendError> {
        debug!(
            backend_id = %self.descriptor.id,
            command = %self.descriptor.command,
            args = ?self.descriptor.args,
            "Spawning backend process"
        );

        let mut child = build_command(&self.descriptor)
            .spawn()
            .map_err(|e| BackendError::from_spawn(&self.descriptor.command, e))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BackendError::Closed("failed to get stdin handle".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::Closed("failed to get stdout handle".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BackendError::Closed("failed to get stderr handle".to_string()))?;

        info!(
            backend_id = %self.descriptor.id,
            pid = child.id(),
            "Backend process spawned successfully"
        );

        let backend_id = self.descriptor.id.clone();
        let stderr_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(backend_id = %backend_id, line = %line, "Backend stderr");
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        });

        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stdout = Some(BufReader::new(stdout));
        self.stderr = Some(stderr_handle);
        Ok(())
    }

    async fn list_operations(&mut self) -> Result<Vec<OperationInfo>, BackendError> {
        self.recover_abandoned().await?;
        let id = self.take_request_id();
        let data = self.round_trip(BackendRequest::list_operations(id)).await?;
        parse_operations(data)
    }

    async fn call(&mut self, name: &str, args: Value) -> Result<Value, BackendError> {
        self.recover_abandoned().await?;
        if !self.is_running() {
            return Err(BackendError::Closed("backend process is not running".to_string()));
        }
        let id = self.take_request_id();
        self.round_trip(BackendRequest::call(id, name, args)).await
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        // Closing stdin lets well-behaved backends exit on EOF
        self.stdin.take();
        self.stdout.take();

        if let Some(handle) = self.stderr.take() {
            handle.abort();
        }

        if let Some(mut child) = self.child.take() {
            debug!(backend_id = %self.descriptor.id, "Killing backend process");
            if let Err(e) = child.kill().await {
                // Already exited and reaped
                debug!(backend_id = %self.descriptor.id, error = %e, "Kill skipped");
            }
            info!(backend_id = %self.descriptor.id, "Backend process stopped");
        }

        Ok(())
    }
}
