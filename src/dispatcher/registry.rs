//! Backend registry and call dispatcher
//!
//! Connects to every configured backend at startup, builds the flat
//! operation-name routing table and forwards calls to the owning backend.
//! Backend failures never escape as errors: startup excludes the backend,
//! calls return a [`CallOutcome`].

use crate::dispatcher::cache::{CachedOperation, ToolCache};
use crate::dispatcher::client::{BackendClient, BackendConnector};
use crate::dispatcher::descriptor::{
    BackendDescriptor, ConfigError, DispatcherConfig, Lifecycle, Transport,
};
use crate::dispatcher::error::BackendError;
use crate::dispatcher::install::ensure_installed;
use crate::dispatcher::protocol::{CallOutcome, OperationInfo, ToolEntry};
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// A backend that connected successfully
struct ConnectedBackend {
    /// Descriptor actually used (after install and launcher fallback)
    descriptor: BackendDescriptor,
    /// Client guarded by a fair lock: one call at a time, in issue order
    client: Mutex<Box<dyn BackendClient>>,
    /// Names this backend advertised, in discovery order
    operations: Vec<String>,
}

/// Result of connecting to one backend
struct Acquired {
    descriptor: BackendDescriptor,
    client: Box<dyn BackendClient>,
    operations: Vec<OperationInfo>,
}

/// Public view of a connected backend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendSummary {
    /// Backend id
    pub id: String,
    /// Transport in use
    pub transport: Transport,
    /// Process lifecycle
    pub lifecycle: Lifecycle,
    /// Launcher actually used (empty for network backends)
    pub command: String,
    /// Operations currently routed to this backend
    pub operations: Vec<String>,
}

/// A backend left out at startup and why
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExcludedBackend {
    /// Backend id
    pub id: String,
    /// Last error seen while connecting
    pub reason: String,
}

/// Owns all backend connections and routes calls by operation name
pub struct Dispatcher {
    /// Connected backends in acquisition (configuration) order
    backends: Vec<ConnectedBackend>,
    /// Backend id -> index into `backends`
    backend_index: HashMap<String, usize>,
    /// Operation name -> registered entry
    tools: HashMap<String, ToolEntry>,
    /// Backends that could not be connected
    excluded: Vec<ExcludedBackend>,
    /// Operation cache, updated at startup
    cache: ToolCache,
    /// Where the cache is persisted
    cache_path: PathBuf,
}

impl Dispatcher {
    /// Connect to all enabled backends and build the routing table
    ///
    /// # Arguments
    /// * `config` - Dispatcher configuration (validated here)
    /// * `connector` - Builds a client for each connection attempt
    ///
    /// # Returns
    /// * `Result<Dispatcher, ConfigError>` - Only invalid configuration fails;
    ///   unreachable backends are excluded and logged
    pub async fn start(
        config: &DispatcherConfig,
        connector: &dyn BackendConnector,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let enabled: Vec<&BackendDescriptor> = config
            .backends
            .iter()
            .filter(|descriptor| {
                if !descriptor.enabled {
                    info!(backend_id = %descriptor.id, "Backend disabled, skipping");
                }
                descriptor.enabled
            })
            .collect();

        info!(
            backend_count = enabled.len(),
            parallel = config.parallel_startup,
            "Starting backends"
        );

        let results = if config.parallel_startup {
            join_all(
                enabled
                    .iter()
                    .map(|descriptor| acquire(config, descriptor, connector)),
            )
            .await
        } else {
            let mut results = Vec::with_capacity(enabled.len());
            for descriptor in &enabled {
                results.push(acquire(config, descriptor, connector).await);
            }
            results
        };

        let mut cache = match ToolCache::load_from_file(&config.cache_path) {
            Ok(cache) => cache,
            Err(e) => {
                warn!(
                    path = %config.cache_path.display(),
                    error = %e,
                    "Failed to load operation cache, starting empty"
                );
                ToolCache::new()
            }
        };

        let mut dispatcher = Self {
            backends: Vec::new(),
            backend_index: HashMap::new(),
            tools: HashMap::new(),
            excluded: Vec::new(),
            cache: ToolCache::new(),
            cache_path: config.cache_path.clone(),
        };

        // Registration follows configuration order whatever order the
        // attempts finished in, so later backends win collisions.
        for (descriptor, result) in enabled.iter().zip(results) {
            match result {
                Ok(acquired) => {
                    cache.record(
                        &descriptor.id,
                        acquired
                            .operations
                            .iter()
                            .map(|op| CachedOperation {
                                name: op.name.clone(),
                                description: op.description.clone(),
                            })
                            .collect(),
                    );
                    dispatcher.register(acquired);
                }
                Err(e) => {
                    error!(
                        backend_id = %descriptor.id,
                        error = %e,
                        "Backend excluded after failed startup"
                    );
                    dispatcher.excluded.push(ExcludedBackend {
                        id: descriptor.id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        dispatcher.cache = cache;
        dispatcher.persist_cache();

        info!(
            connected = dispatcher.backends.len(),
            excluded = dispatcher.excluded.len(),
            operations = dispatcher.tools.len(),
            "Dispatcher ready"
        );

        Ok(dispatcher)
    }

    /// Add a connected backend and take over its operation names
    fn register(&mut self, acquired: Acquired) {
        let backend_id = acquired.descriptor.id.clone();
        let mut names = Vec::with_capacity(acquired.operations.len());

        for operation in acquired.operations {
            if let Some(previous) = self.tools.get(&operation.name) {
                if previous.backend_id != backend_id {
                    warn!(
                        operation = %operation.name,
                        previous_backend = %previous.backend_id,
                        backend_id = %backend_id,
                        "Operation name collision, later backend takes over"
                    );
                    if let Some(&index) = self.backend_index.get(&previous.backend_id) {
                        self.backends[index].operations.retain(|n| n != &operation.name);
                    }
                }
            }
            if !names.contains(&operation.name) {
                names.push(operation.name.clone());
            }
            self.tools.insert(
                operation.name.clone(),
                ToolEntry::from_operation(&backend_id, operation),
            );
        }

        debug!(
            backend_id = %backend_id,
            operations = ?names,
            "Backend registered"
        );

        self.backend_index.insert(backend_id, self.backends.len());
        self.backends.push(ConnectedBackend {
            descriptor: acquired.descriptor,
            client: Mutex::new(acquired.client),
            operations: names,
        });
    }

    /// Every registered operation, sorted by name
    pub fn list_operations(&self) -> Vec<ToolEntry> {
        let mut entries: Vec<ToolEntry> = self.tools.values().cloned().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    /// Backend that owns an operation name
    pub fn route(&self, name: &str) -> Option<&str> {
        self.tools.get(name).map(|entry| entry.backend_id.as_str())
    }

    /// Forward a call to the backend that owns `name`
    ///
    /// Unknown names return `NotFound` without touching any backend. Calls to
    /// one backend are serialized in issue order; the timeout covers the
    /// backend round trip only. Calls are never retried.
    pub async fn call(&self, name: &str, args: Value) -> CallOutcome {
        let Some(entry) = self.tools.get(name) else {
            warn!(operation = %name, "Call to unknown operation");
            return CallOutcome::NotFound {
                name: name.to_string(),
            };
        };

        let Some(backend) = self
            .backend_index
            .get(&entry.backend_id)
            .map(|&index| &self.backends[index])
        else {
            return CallOutcome::TransportError {
                backend_id: entry.backend_id.clone(),
                message: "backend is not connected".to_string(),
            };
        };

        let backend_id = backend.descriptor.id.clone();
        let timeout_secs = backend.descriptor.timeout_seconds;

        debug!(backend_id = %backend_id, operation = %name, "Dispatching call");

        let mut client = backend.client.lock().await;
        match timeout(backend.descriptor.timeout(), client.call(name, args)).await {
            Ok(Ok(result)) => {
                debug!(backend_id = %backend_id, operation = %name, "Call succeeded");
                CallOutcome::Success { backend_id, result }
            }
            Ok(Err(e)) => {
                warn!(
                    backend_id = %backend_id,
                    operation = %name,
                    error = %e,
                    "Call failed"
                );
                let message = match e {
                    BackendError::Remote(message) => message,
                    other => other.to_string(),
                };
                CallOutcome::TransportError {
                    backend_id,
                    message,
                }
            }
            Err(_) => {
                warn!(
                    backend_id = %backend_id,
                    operation = %name,
                    timeout_secs = timeout_secs,
                    "Call timed out"
                );
                CallOutcome::TimedOut {
                    backend_id,
                    timeout_secs,
                }
            }
        }
    }

    /// Ids of connected backends in acquisition order
    pub fn backend_ids(&self) -> Vec<String> {
        self.backends
            .iter()
            .map(|backend| backend.descriptor.id.clone())
            .collect()
    }

    /// Summaries of connected backends in acquisition order
    pub fn backends(&self) -> Vec<BackendSummary> {
        self.backends
            .iter()
            .map(|backend| BackendSummary {
                id: backend.descriptor.id.clone(),
                transport: backend.descriptor.transport,
                lifecycle: backend.descriptor.lifecycle,
                command: backend.descriptor.command.clone(),
                operations: backend.operations.clone(),
            })
            .collect()
    }

    /// Backends left out at startup
    pub fn excluded_backends(&self) -> &[ExcludedBackend] {
        &self.excluded
    }

    /// Operation cache as of startup
    pub fn cache(&self) -> &ToolCache {
        &self.cache
    }

    fn persist_cache(&self) {
        match self.cache.save_to_file(&self.cache_path) {
            Ok(()) => debug!(path = %self.cache_path.display(), "Operation cache saved"),
            Err(e) => error!(
                path = %self.cache_path.display(),
                error = %e,
                "Failed to save operation cache"
            ),
        }
    }

    /// Persist the cache and close every backend, last acquired first
    ///
    /// Individual close failures are logged and do not stop the rest.
    pub async fn shutdown(&self) {
        info!(backend_count = self.backends.len(), "Shutting down dispatcher");
        self.persist_cache();

        for backend in self.backends.iter().rev() {
            let mut client = backend.client.lock().await;
            match client.close().await {
                Ok(()) => debug!(backend_id = %backend.descriptor.id, "Backend closed"),
                Err(e) => error!(
                    backend_id = %backend.descriptor.id,
                    error = %e,
                    "Failed to close backend during shutdown"
                ),
            }
        }

        info!("All backends closed");
    }
}

/// Install, connect and discover one backend, retrying with backoff
async fn acquire(
    config: &DispatcherConfig,
    descriptor: &BackendDescriptor,
    connector: &dyn BackendConnector,
) -> Result<Acquired, BackendError> {
    let mut current = ensure_installed(&config.install_root, descriptor).await?;
    let mut fallback_used = false;
    let mut last_error = BackendError::NotConnected;

    for attempt in 1..=config.max_retries {
        if attempt > 1 {
            let delay = config.backoff_delay(attempt - 1);
            debug!(
                backend_id = %current.id,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                "Waiting before next attempt"
            );
            sleep(delay).await;
        }

        info!(
            backend_id = %current.id,
            attempt = attempt,
            max_attempts = config.max_retries,
            "Connecting to backend"
        );

        let mut client = connector.client_for(&current);
        let result = timeout(current.timeout(), connect_and_discover(&mut *client)).await;

        let err = match result {
            Ok(Ok(operations)) => {
                info!(
                    backend_id = %current.id,
                    attempt = attempt,
                    operation_count = operations.len(),
                    "Backend connected"
                );
                return Ok(Acquired {
                    descriptor: current,
                    client,
                    operations,
                });
            }
            Ok(Err(e)) => e,
            Err(_) => BackendError::TimedOut(current.timeout_seconds),
        };

        warn!(
            backend_id = %current.id,
            attempt = attempt,
            error = %err,
            "Backend connection attempt failed"
        );

        if let Err(e) = client.close().await {
            debug!(backend_id = %current.id, error = %e, "Close after failed attempt");
        }

        if let BackendError::LauncherUnavailable(_) = &err {
            if !fallback_used && current.transport == Transport::Process {
                let fallback = current
                    .fallback_command
                    .clone()
                    .or_else(|| config.fallback_launcher.clone());
                if let Some(fallback) = fallback.filter(|f| *f != current.command) {
                    warn!(
                        backend_id = %current.id,
                        launcher = %current.command,
                        fallback = %fallback,
                        "Launcher unavailable, switching to fallback"
                    );
                    current.command = fallback;
                    fallback_used = true;
                }
            }
        }

        last_error = err;
    }

    Err(last_error)
}

async fn connect_and_discover(
    client: &mut dyn BackendClient,
) -> Result<Vec<OperationInfo>, BackendError> {
    client.connect().await?;
    client.list_operations().await
}
