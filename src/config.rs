//! Application configuration
//!
//! Process-level settings come from environment variables with defaults.
//! Backend descriptors live in a separate JSON file pointed to by
//! `DISPATCH_CONFIG`.

use crate::dispatcher::{ConfigError, DispatcherConfig};
use std::env;
use std::path::PathBuf;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Dispatcher configuration sources
    pub dispatch: DispatchSettings,
    /// Conversation indexer configuration
    pub indexer: IndexerConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind the server to
    pub port: u16,
    /// Host address to bind to
    pub host: String,
}

/// Where the dispatcher's configuration comes from
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Path to the dispatcher JSON config; no backends when unset
    pub config_path: Option<PathBuf>,
    /// Overrides the cache path from the JSON config
    pub cache_path: Option<PathBuf>,
}

/// Conversation indexer configuration
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Directory holding past session records
    pub sessions_dir: PathBuf,
    /// Base URL of the embedding service
    pub embedding_url: String,
    /// Embedding model name
    pub embedding_model: String,
    /// Maximum matches per query
    pub top_k: usize,
    /// Matches scoring below this are dropped
    pub min_similarity: f32,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig {
                port: env::var("PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(8080),
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            },
            dispatch: DispatchSettings {
                config_path: env::var_os("DISPATCH_CONFIG").map(PathBuf::from),
                cache_path: env::var_os("DISPATCH_CACHE_PATH").map(PathBuf::from),
            },
            indexer: IndexerConfig {
                sessions_dir: env::var_os("SESSIONS_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("sessions")),
                embedding_url: env::var("EMBEDDING_URL")
                    .unwrap_or_else(|_| "http://localhost:11434".to_string()),
                embedding_model: env::var("EMBEDDING_MODEL")
                    .unwrap_or_else(|_| "nomic-embed-text".to_string()),
                top_k: env::var("INDEX_TOP_K")
                    .ok()
                    .and_then(|k| k.parse().ok())
                    .unwrap_or(3),
                min_similarity: env::var("INDEX_MIN_SIMILARITY")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0.5),
            },
        }
    }

    /// Get the server address as a string
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Load the dispatcher configuration, applying the cache path override
    pub fn load_dispatcher_config(&self) -> Result<DispatcherConfig, ConfigError> {
        let mut config = match &self.dispatch.config_path {
            Some(path) => DispatcherConfig::from_file(path)?,
            None => DispatcherConfig::default(),
        };
        if let Some(cache_path) = &self.dispatch.cache_path {
            config.cache_path = cache_path.clone();
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    const VARS: &[&str] = &[
        "PORT",
        "HOST",
        "DISPATCH_CONFIG",
        "DISPATCH_CACHE_PATH",
        "SESSIONS_DIR",
        "EMBEDDING_URL",
        "EMBEDDING_MODEL",
        "INDEX_TOP_K",
        "INDEX_MIN_SIMILARITY",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = Config::from_env();
        assert_eq!(config.server_addr(), "0.0.0.0:8080");
        assert!(config.dispatch.config_path.is_none());
        assert_eq!(config.indexer.top_k, 3);
        assert_eq!(config.indexer.min_similarity, 0.5);

        let dispatcher = config.load_dispatcher_config().unwrap();
        assert!(dispatcher.backends.is_empty());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        env::set_var("PORT", "9100");
        env::set_var("HOST", "127.0.0.1");
        env::set_var("INDEX_TOP_K", "7");
        env::set_var("INDEX_MIN_SIMILARITY", "0.25");
        env::set_var("EMBEDDING_MODEL", "all-minilm");

        let config = Config::from_env();
        assert_eq!(config.server_addr(), "127.0.0.1:9100");
        assert_eq!(config.indexer.top_k, 7);
        assert_eq!(config.indexer.min_similarity, 0.25);
        assert_eq!(config.indexer.embedding_model, "all-minilm");
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_port_falls_back() {
        clear_env();
        env::set_var("PORT", "not-a-port");
        assert_eq!(Config::from_env().server.port, 8080);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_dispatch_config_file_and_cache_override() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("dispatch.json");
        std::fs::write(
            &config_path,
            r#"{"backends": [{"id": "search", "command": "python3"}], "cache_path": "from_file.json"}"#,
        )
        .unwrap();
        env::set_var("DISPATCH_CONFIG", &config_path);
        env::set_var("DISPATCH_CACHE_PATH", dir.path().join("override.json"));

        let dispatcher = Config::from_env().load_dispatcher_config().unwrap();
        assert_eq!(dispatcher.backends[0].id, "search");
        assert_eq!(dispatcher.cache_path, dir.path().join("override.json"));
        clear_env();
    }
}
