//! Backend descriptors and dispatcher configuration
//!
//! Descriptors are read once from a JSON configuration file at startup.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating dispatcher configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Failed to read config {path}: {source}")]
    Read {
        /// File that was being read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid JSON for this schema
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// Configuration is well-formed but unusable
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// How the dispatcher reaches a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Local child process speaking JSON lines over stdin/stdout
    #[default]
    Process,
    /// Remote service reached over HTTP
    Network,
}

/// How long a process backend lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    /// One child process kept alive for the dispatcher's lifetime
    #[default]
    Persistent,
    /// A fresh child process for every request
    Ephemeral,
}

/// Configuration for a single backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    /// Unique backend id
    pub id: String,
    /// Launcher command (process transport)
    #[serde(default)]
    pub command: String,
    /// Launcher arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Transport used to reach the backend
    #[serde(default)]
    pub transport: Transport,
    /// Base URL (network transport)
    #[serde(default)]
    pub url: Option<String>,
    /// Per-attempt and per-call timeout
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Disabled backends are skipped at startup
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Source to install from before the first launch (git URL or path)
    #[serde(default)]
    pub install_source: Option<String>,
    /// File inside the install directory whose presence marks it installed
    #[serde(default)]
    pub entry_point: Option<String>,
    /// Process lifecycle (process transport)
    #[serde(default)]
    pub lifecycle: Lifecycle,
    /// Extra environment variables for the process
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for the process
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Launcher to use instead of `command` when it is not available
    #[serde(default)]
    pub fallback_command: Option<String>,
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_enabled() -> bool {
    true
}

impl BackendDescriptor {
    /// Create an enabled process backend with default settings
    pub fn process(id: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            args,
            transport: Transport::Process,
            url: None,
            timeout_seconds: default_timeout_seconds(),
            enabled: true,
            install_source: None,
            entry_point: None,
            lifecycle: Lifecycle::Persistent,
            env: HashMap::new(),
            working_dir: None,
            fallback_command: None,
        }
    }

    /// Create an enabled network backend with default settings
    pub fn network(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            transport: Transport::Network,
            url: Some(url.into()),
            ..Self::process(id, "", Vec::new())
        }
    }

    /// Timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Validate the descriptor
    /// Returns Ok(()) if valid, Err with message if invalid
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("Backend id cannot be empty".to_string());
        }
        if self.timeout_seconds == 0 {
            return Err(format!("Backend '{}': timeout_seconds must be > 0", self.id));
        }
        match self.transport {
            Transport::Process if self.command.trim().is_empty() => Err(format!(
                "Backend '{}': process transport requires a command",
                self.id
            )),
            Transport::Network if self.url.as_deref().map_or(true, |u| u.trim().is_empty()) => {
                Err(format!("Backend '{}': network transport requires a url", self.id))
            }
            _ => Ok(()),
        }
    }
}

/// Dispatcher-wide configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Backends in registration order
    pub backends: Vec<BackendDescriptor>,
    /// Connection attempts per backend, the first one included
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the second attempt
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Growth factor for later delays
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Upper bound for any single delay
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Launcher substituted when a backend's command is missing
    #[serde(default = "default_fallback_launcher")]
    pub fallback_launcher: Option<String>,
    /// Connect to all backends concurrently instead of one by one
    #[serde(default)]
    pub parallel_startup: bool,
    /// Where the operation cache is persisted
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,
    /// Where installable backends are placed
    #[serde(default = "default_install_root")]
    pub install_root: PathBuf,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_fallback_launcher() -> Option<String> {
    Some("python3".to_string())
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("backend_cache.json")
}

fn default_install_root() -> PathBuf {
    PathBuf::from("backends")
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            backends: Vec::new(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
            fallback_launcher: default_fallback_launcher(),
            parallel_startup: false,
            cache_path: default_cache_path(),
            install_root: default_install_root(),
        }
    }
}

impl DispatcherConfig {
    /// Load and validate a configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: DispatcherConfig = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check retry settings and every backend descriptor
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid("max_retries must be > 0".to_string()));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "backoff_multiplier must be >= 1.0".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for backend in &self.backends {
            backend.validate().map_err(ConfigError::Invalid)?;
            if !seen.insert(backend.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "Duplicate backend id: {}",
                    backend.id
                )));
            }
        }
        Ok(())
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay_ms = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis((delay_ms as u64).min(self.max_backoff_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_descriptor_defaults() {
        let json = r#"{"id": "search", "command": "python3", "args": ["server.py"]}"#;
        let descriptor: BackendDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(descriptor.transport, Transport::Process);
        assert_eq!(descriptor.lifecycle, Lifecycle::Persistent);
        assert_eq!(descriptor.timeout_seconds, 30);
        assert!(descriptor.enabled);
        assert!(descriptor.validate().is_ok());
    }

    #[test]
    fn test_descriptor_validate() {
        let mut descriptor = BackendDescriptor::process("a", "", Vec::new());
        assert!(descriptor.validate().is_err());

        descriptor.command = "node".to_string();
        descriptor.timeout_seconds = 0;
        assert!(descriptor.validate().is_err());

        let network = BackendDescriptor {
            url: None,
            ..BackendDescriptor::network("remote", "http://localhost:1")
        };
        assert!(network.validate().is_err());
        assert!(BackendDescriptor::network("remote", "http://localhost:1")
            .validate()
            .is_ok());
    }

    #[test]
    fn test_config_rejects_duplicate_ids() {
        let config = DispatcherConfig {
            backends: vec![
                BackendDescriptor::process("dup", "a", Vec::new()),
                BackendDescriptor::process("dup", "b", Vec::new()),
            ],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_backoff_delay_grows_and_caps() {
        let config = DispatcherConfig {
            initial_backoff_ms: 100,
            backoff_multiplier: 2.0,
            max_backoff_ms: 300,
            ..Default::default()
        };
        assert_eq!(config.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(config.backoff_delay(3), Duration::from_millis(300));
        assert_eq!(config.backoff_delay(10), Duration::from_millis(300));
    }

    #[test]
    fn test_config_from_file() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            r#"{
                "backends": [
                    {"id": "math", "command": "python3", "args": ["math.py"], "lifecycle": "ephemeral"},
                    {"id": "web", "transport": "network", "url": "http://127.0.0.1:9000", "timeout_seconds": 5}
                ],
                "max_retries": 2,
                "parallel_startup": true
            }"#,
        )
        .unwrap();

        let config = DispatcherConfig::from_file(file.path()).unwrap();
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends[0].lifecycle, Lifecycle::Ephemeral);
        assert_eq!(config.backends[1].transport, Transport::Network);
        assert_eq!(config.max_retries, 2);
        assert!(config.parallel_startup);
        assert_eq!(config.fallback_launcher.as_deref(), Some("python3"));
    }

    #[test]
    fn test_config_from_missing_file() {
        let result = DispatcherConfig::from_file("/nonexistent/dispatch.json");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
