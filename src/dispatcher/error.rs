//! Backend transport error types
//!
//! Errors that can occur while connecting to or talking with a backend
//! (process spawning, pipe I/O, HTTP, malformed replies). The dispatcher
//! converts these into [`CallOutcome`](super::CallOutcome) values; they never
//! cross into the orchestrator as errors.

use thiserror::Error;

/// Errors raised by a [`BackendClient`](super::BackendClient)
#[derive(Error, Debug)]
pub enum BackendError {
    /// The launcher command could not be found (candidate for fallback)
    #[error("Launcher not available: {0}")]
    LauncherUnavailable(String),

    /// Failed to spawn the process for another reason (e.g. permission denied)
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    /// Reading from or writing to the backend failed
    #[error("Backend I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request to a network backend failed
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The backend replied with something that does not follow the protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The backend handled the request and reported an error
    #[error("Backend reported error: {0}")]
    Remote(String),

    /// The process exited or the connection is gone
    #[error("Backend connection closed: {0}")]
    Closed(String),

    /// A connection attempt did not finish within the backend's timeout
    #[error("Timed out after {0} seconds")]
    TimedOut(u64),

    /// The client was used before `connect` succeeded
    #[error("Backend not connected")]
    NotConnected,

    /// Installing the backend's source failed
    #[error("Install failed: {0}")]
    InstallFailed(String),
}

impl BackendError {
    /// Classify a spawn error: "not found" means the launcher is missing
    pub fn from_spawn(command: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            BackendError::LauncherUnavailable(command.to_string())
        } else {
            BackendError::SpawnFailed(err)
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Protocol(err.to_string())
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Http(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_not_found_is_launcher_unavailable() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        match BackendError::from_spawn("uv", err) {
            BackendError::LauncherUnavailable(cmd) => assert_eq!(cmd, "uv"),
            other => panic!("Expected LauncherUnavailable, got: {:?}", other),
        }
    }

    #[test]
    fn test_spawn_permission_denied_is_spawn_failed() {
        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(
            BackendError::from_spawn("./server", err),
            BackendError::SpawnFailed(_)
        ));
    }
}
