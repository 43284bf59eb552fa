//! Backend registry and dispatcher
//!
//! Launches or reaches the configured tool backends, discovers the operations
//! they expose and routes calls by operation name.

pub mod cache;
pub mod client;
pub mod descriptor;
pub mod ephemeral;
pub mod error;
pub mod http;
pub mod install;
pub mod process;
pub mod protocol;
pub mod registry;

pub use cache::{BackendCacheRecord, CacheError, CachedOperation, ToolCache};
pub use client::{BackendClient, BackendConnector, TransportConnector};
pub use descriptor::{BackendDescriptor, ConfigError, DispatcherConfig, Lifecycle, Transport};
pub use error::BackendError;
pub use protocol::{CallOutcome, OperationInfo, ToolEntry};
pub use registry::{BackendSummary, Dispatcher, ExcludedBackend};
