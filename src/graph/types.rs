//! Step and edge types for the execution graph

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Unique identifier for a plan step (may be composite, e.g. "0A")
pub type StepId = String;

/// Id of the single root step every graph starts with
pub const ROOT_STEP_ID: &str = "ROOT";

/// Kind of work a step represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    /// The graph origin; exactly one per graph
    Root,
    /// A step that runs code or calls operations
    Code,
    /// A step producing the final answer
    Conclude,
    /// A step carrying perception metadata about progress
    Perception,
    /// A placeholder that does nothing
    Nop,
}

/// Lifecycle status of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Created, not started
    Pending,
    /// Currently executing
    Running,
    /// Finished with a result
    Completed,
    /// Finished with an error
    Failed,
}

/// Relationship an edge expresses between two steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeType {
    /// Regular plan progression
    #[default]
    Normal,
    /// Re-attempt of the source step
    Retry,
    /// Alternate path after the source failed
    Alternate,
}

/// Perception metadata attached to a step
///
/// Only `local_goal_achieved` is interpreted by the graph; everything else the
/// perception layer reports is kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Perception {
    /// Whether the step reached its own local goal
    pub local_goal_achieved: bool,
    /// Free-form explanation from the perception layer
    #[serde(default)]
    pub local_reasoning: String,
    /// Any additional fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Perception {
    /// Perception with the given verdict and reasoning and no extra fields
    pub fn new(local_goal_achieved: bool, local_reasoning: impl Into<String>) -> Self {
        Self {
            local_goal_achieved,
            local_reasoning: local_reasoning.into(),
            extra: Map::new(),
        }
    }
}

/// One node of the execution plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Unique step label
    pub id: StepId,
    /// What the step is meant to do
    pub description: String,
    /// Kind of step
    #[serde(rename = "type")]
    pub step_type: StepType,
    /// Current status
    pub status: StepStatus,
    /// Result payload, once completed
    pub result: Option<Value>,
    /// Error message, once failed
    pub error: Option<String>,
    /// Step this one was expanded from
    pub parent: Option<StepId>,
    /// Perception metadata, if any
    pub perception: Option<Perception>,
}

impl Step {
    /// Create a pending step
    pub fn new(
        id: impl Into<StepId>,
        description: impl Into<String>,
        step_type: StepType,
        parent: Option<StepId>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            step_type,
            status: StepStatus::Pending,
            result: None,
            error: None,
            parent,
            perception: None,
        }
    }

    /// The root step, created completed
    pub fn root() -> Self {
        let mut step = Self::new(ROOT_STEP_ID, "Initial Query", StepType::Root, None);
        step.status = StepStatus::Completed;
        step
    }
}

/// Directed link between two steps
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// Originating step
    pub source: StepId,
    /// Destination step
    pub target: StepId,
    /// Relationship kind
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
}

/// Compact note kept for later LLM context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryNote {
    /// Step the note is about
    pub step_id: StepId,
    /// Short human-readable note
    pub note: String,
    /// When the note was recorded
    pub recorded_at: DateTime<Utc>,
}

/// Serializable view of a graph for external rendering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// Always true; edges are directed
    pub directed: bool,
    /// Steps in insertion order
    pub nodes: Vec<SnapshotNode>,
    /// Edges in insertion order
    pub links: Vec<SnapshotLink>,
}

/// Node entry of a [`GraphSnapshot`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotNode {
    /// Step id
    pub id: StepId,
    /// Full step data
    pub data: Step,
}

/// Link entry of a [`GraphSnapshot`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotLink {
    /// Source step id
    pub source: StepId,
    /// Target step id
    pub target: StepId,
    /// Edge kind
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
}
