//! Execution graph module
//!
//! Plan steps, lineage edges, versioned shared variables, and the snapshot
//! handed to external renderers.

pub mod error;
pub mod execution_graph;
pub mod types;

pub use error::GraphError;
pub use execution_graph::ExecutionGraph;
pub use types::{
    Edge, EdgeType, GraphSnapshot, MemoryNote, Perception, Step, StepId, StepStatus, StepType,
    ROOT_STEP_ID,
};
