//! Graph API misuse errors
//!
//! These indicate orchestrator bugs, not environmental conditions, so callers
//! are expected to propagate them rather than branch on them.

use thiserror::Error;

/// Errors raised by [`ExecutionGraph`](super::ExecutionGraph) mutators
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The referenced step does not exist
    #[error("Step not found: {0}")]
    StepNotFound(String),

    /// A step with this id was already added
    #[error("Duplicate step id: {0}")]
    DuplicateStep(String),

    /// The step cannot be added or changed (ROOT is fixed)
    #[error("Invalid step: {0}")]
    InvalidStep(String),

    /// A subtree rename request cannot be applied
    #[error("Invalid rename: {0}")]
    InvalidRename(String),
}
