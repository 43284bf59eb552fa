//! Execution graph
//!
//! Tracks an agent's plan steps, their lineage edges, the shared variable store
//! populated by step results, and the list of failed steps. The graph is owned
//! by a single orchestrator (`&mut self` on every mutator).
//!
//! Step-level failures (`mark_step_failed`, negative perception) are recorded as
//! data so the orchestrator can keep branching. Misuse of the API (unknown or
//! duplicate ids) returns a [`GraphError`] that callers propagate.

use crate::graph::error::GraphError;
use crate::graph::types::{
    Edge, EdgeType, GraphSnapshot, MemoryNote, Perception, SnapshotLink, SnapshotNode, Step,
    StepId, StepStatus, StepType, ROOT_STEP_ID,
};
use chrono::Utc;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Maximum length of the error text kept in a session memory note
const MEMORY_NOTE_ERROR_CHARS: usize = 200;

/// Directed graph of plan steps plus the orchestrator's shared variables
#[derive(Debug, Clone)]
pub struct ExecutionGraph {
    /// Steps in insertion order (id -> Step)
    steps: IndexMap<StepId, Step>,
    /// Edges in insertion order
    edges: Vec<Edge>,
    /// Shared variable store, including step-qualified alias keys
    globals: IndexMap<String, Value>,
    /// Ids of steps that failed or missed their local goal
    failed_steps: Vec<StepId>,
    /// Compact notes for later LLM context
    session_memory: Vec<MemoryNote>,
}

impl Default for ExecutionGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionGraph {
    /// Create a graph containing only the completed ROOT step
    pub fn new() -> Self {
        let mut steps = IndexMap::new();
        steps.insert(ROOT_STEP_ID.to_string(), Step::root());
        Self {
            steps,
            edges: Vec::new(),
            globals: IndexMap::new(),
            failed_steps: Vec::new(),
            session_memory: Vec::new(),
        }
    }

    /// Add a step, linked from `parent` when one is given
    ///
    /// # Errors
    /// * `GraphError::DuplicateStep` - `id` already exists (a planning bug)
    /// * `GraphError::StepNotFound` - `parent` does not exist
    /// * `GraphError::InvalidStep` - `step_type` is ROOT; the graph has exactly one
    pub fn add_step(
        &mut self,
        id: impl Into<StepId>,
        description: impl Into<String>,
        step_type: StepType,
        parent: Option<&str>,
        edge_type: EdgeType,
    ) -> Result<StepId, GraphError> {
        let id = id.into();
        if step_type == StepType::Root {
            return Err(GraphError::InvalidStep(format!(
                "'{}' cannot be a second ROOT step",
                id
            )));
        }
        if self.steps.contains_key(&id) {
            return Err(GraphError::DuplicateStep(id));
        }
        if let Some(parent_id) = parent {
            if !self.steps.contains_key(parent_id) {
                return Err(GraphError::StepNotFound(parent_id.to_string()));
            }
        }

        let step = Step::new(id.clone(), description, step_type, parent.map(str::to_string));
        self.steps.insert(id.clone(), step);

        if let Some(parent_id) = parent {
            self.edges.push(Edge {
                source: parent_id.to_string(),
                target: id.clone(),
                edge_type,
            });
        }

        debug!(
            step_id = %id,
            step_type = ?step_type,
            parent = ?parent,
            "Step added"
        );

        Ok(id)
    }

    /// Mark a step as running
    pub fn mark_step_running(&mut self, id: &str) -> Result<(), GraphError> {
        let step = self.plan_step_mut(id)?;
        step.status = StepStatus::Running;
        info!(step_id = %id, "Step running");
        Ok(())
    }

    /// Store a step's result, complete it, and merge its fields into `globals`
    ///
    /// Object results have each top-level field written to `globals`. A key
    /// that already exists keeps its first value; the new value goes to the
    /// alias key `"{key}__{step_id}"`. Non-object results stay on the step.
    pub fn update_step_result(&mut self, id: &str, result: Value) -> Result<(), GraphError> {
        let step = self.plan_step_mut(id)?;
        step.result = Some(result.clone());
        step.status = StepStatus::Completed;
        step.error = None;

        if let Value::Object(fields) = result {
            for (key, value) in fields {
                self.write_global(id, key, value);
            }
        }

        info!(step_id = %id, "Step completed");
        Ok(())
    }

    /// Mark a step as failed, record the error, and leave a memory note
    pub fn mark_step_failed(&mut self, id: &str, error: impl Into<String>) -> Result<(), GraphError> {
        let error = error.into();
        let step = self.plan_step_mut(id)?;
        step.status = StepStatus::Failed;
        step.error = Some(error.clone());

        self.failed_steps.push(id.to_string());
        self.session_memory.push(MemoryNote {
            step_id: id.to_string(),
            note: format!("Step {} failed: {}", id, truncate_chars(&error, MEMORY_NOTE_ERROR_CHARS)),
            recorded_at: Utc::now(),
        });

        warn!(step_id = %id, error = %error, "Step failed");
        Ok(())
    }

    /// Attach perception metadata to a step
    ///
    /// Creates a placeholder PERCEPTION step when `id` is unknown. A perception
    /// whose local goal was not achieved puts the step on the failed list.
    /// ROOT takes no perception.
    pub fn attach_perception(&mut self, id: &str, perception: Perception) -> Result<(), GraphError> {
        if id == ROOT_STEP_ID {
            return Err(root_is_fixed());
        }
        if !self.steps.contains_key(id) {
            debug!(step_id = %id, "Creating placeholder perception step");
            self.steps.insert(
                id.to_string(),
                Step::new(id, "Perception placeholder", StepType::Perception, None),
            );
        }

        let achieved = perception.local_goal_achieved;
        if let Some(step) = self.steps.get_mut(id) {
            step.perception = Some(perception);
        }

        if !achieved {
            self.failed_steps.push(id.to_string());
            warn!(step_id = %id, "Perception reports local goal not achieved");
        }
        Ok(())
    }

    /// All step ids reachable from `root` via forward edges, excluding `root`
    ///
    /// Iterative with a visited set, so a stray cycle cannot make it loop.
    pub fn get_descendants(&self, root: &str) -> Result<HashSet<StepId>, GraphError> {
        if !self.steps.contains_key(root) {
            return Err(GraphError::StepNotFound(root.to_string()));
        }

        let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &self.edges {
            children
                .entry(edge.source.as_str())
                .or_default()
                .push(edge.target.as_str());
        }

        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(root);
        let mut stack = vec![root];

        while let Some(current) = stack.pop() {
            for &child in children.get(current).into_iter().flatten() {
                if visited.insert(child) {
                    stack.push(child);
                }
            }
        }

        visited.remove(root);
        Ok(visited.into_iter().map(str::to_string).collect())
    }

    /// Relabel `root` and all its descendants as `id + suffix`
    ///
    /// The renamed steps, edges and failed list are built aside and swapped in
    /// together; on error the graph is left untouched.
    ///
    /// # Errors
    /// * `GraphError::StepNotFound` - `root` does not exist
    /// * `GraphError::InvalidRename` - empty suffix, `root` is ROOT, or a new id
    ///   collides with a step outside the subtree
    pub fn rename_subtree_from(&mut self, root: &str, suffix: &str) -> Result<(), GraphError> {
        if suffix.is_empty() {
            return Err(GraphError::InvalidRename("suffix cannot be empty".to_string()));
        }
        if root == ROOT_STEP_ID {
            return Err(GraphError::InvalidRename("the ROOT step cannot be renamed".to_string()));
        }

        let mut affected = self.get_descendants(root)?;
        affected.insert(root.to_string());

        let id_map: HashMap<StepId, StepId> = affected
            .iter()
            .map(|id| (id.clone(), format!("{}{}", id, suffix)))
            .collect();

        for new_id in id_map.values() {
            if self.steps.contains_key(new_id) && !id_map.contains_key(new_id) {
                return Err(GraphError::InvalidRename(format!(
                    "renamed id '{}' collides with an existing step",
                    new_id
                )));
            }
        }

        let remap = |id: &str| -> StepId { id_map.get(id).cloned().unwrap_or_else(|| id.to_string()) };

        let steps: IndexMap<StepId, Step> = self
            .steps
            .values()
            .map(|step| {
                if !id_map.contains_key(&step.id) {
                    return (step.id.clone(), step.clone());
                }
                let mut renamed = step.clone();
                renamed.id = remap(&step.id);
                renamed.parent = step.parent.as_deref().map(remap);
                (renamed.id.clone(), renamed)
            })
            .collect();

        let edges: Vec<Edge> = self
            .edges
            .iter()
            .map(|edge| Edge {
                source: remap(&edge.source),
                target: remap(&edge.target),
                edge_type: edge.edge_type,
            })
            .filter(|edge| steps.contains_key(&edge.source) && steps.contains_key(&edge.target))
            .collect();

        let failed_steps: Vec<StepId> = self.failed_steps.iter().map(|id| remap(id)).collect();

        self.steps = steps;
        self.edges = edges;
        self.failed_steps = failed_steps;

        info!(
            root = %root,
            suffix = %suffix,
            renamed = id_map.len(),
            "Subtree renamed"
        );

        Ok(())
    }

    /// Serializable `{directed, nodes, links}` view for rendering
    pub fn get_context_snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            directed: true,
            nodes: self
                .steps
                .values()
                .map(|step| SnapshotNode {
                    id: step.id.clone(),
                    data: step.clone(),
                })
                .collect(),
            links: self
                .edges
                .iter()
                .map(|edge| SnapshotLink {
                    source: edge.source.clone(),
                    target: edge.target.clone(),
                    edge_type: edge.edge_type,
                })
                .collect(),
        }
    }

    /// Get a step by id
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.get(id)
    }

    /// All steps in insertion order
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.values()
    }

    /// All edges in insertion order
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// The shared variable store
    pub fn globals(&self) -> &IndexMap<String, Value> {
        &self.globals
    }

    /// Ids of steps that failed or missed their local goal
    pub fn failed_steps(&self) -> &[StepId] {
        &self.failed_steps
    }

    /// Notes recorded for later LLM context
    pub fn session_memory(&self) -> &[MemoryNote] {
        &self.session_memory
    }

    /// Number of steps, ROOT included
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Always false; the ROOT step is never removed
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Mutable access to any step except ROOT, which stays completed
    fn plan_step_mut(&mut self, id: &str) -> Result<&mut Step, GraphError> {
        if id == ROOT_STEP_ID {
            return Err(root_is_fixed());
        }
        self.steps
            .get_mut(id)
            .ok_or_else(|| GraphError::StepNotFound(id.to_string()))
    }

    /// Existing keys are never overwritten. A taken key goes to
    /// `"{key}__{step_id}"`, then `"{key}__{step_id}__2"`, `__3` and so on.
    fn write_global(&mut self, step_id: &str, key: String, value: Value) {
        if !self.globals.contains_key(&key) {
            self.globals.insert(key, value);
            return;
        }

        let base = format!("{}__{}", key, step_id);
        let mut alias = base.clone();
        let mut n = 2;
        while self.globals.contains_key(&alias) {
            alias = format!("{}__{}", base, n);
            n += 1;
        }
        debug!(key = %key, alias = %alias, "Global already set, writing alias");
        self.globals.insert(alias, value);
    }
}

fn root_is_fixed() -> GraphError {
    GraphError::InvalidStep(format!("the {} step is always completed", ROOT_STEP_ID))
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// ROOT -> A -> B -> C, A -> D
    fn create_test_graph() -> ExecutionGraph {
        let mut graph = ExecutionGraph::new();
        graph
            .add_step("A", "step a", StepType::Code, Some(ROOT_STEP_ID), EdgeType::Normal)
            .unwrap();
        graph
            .add_step("B", "step b", StepType::Code, Some("A"), EdgeType::Normal)
            .unwrap();
        graph
            .add_step("C", "step c", StepType::Code, Some("B"), EdgeType::Normal)
            .unwrap();
        graph
            .add_step("D", "step d", StepType::Conclude, Some("A"), EdgeType::Alternate)
            .unwrap();
        graph
    }

    fn ids(graph: &ExecutionGraph) -> HashSet<String> {
        graph.steps().map(|s| s.id.clone()).collect()
    }

    #[test]
    fn test_new_graph_has_completed_root() {
        let graph = ExecutionGraph::new();
        assert_eq!(graph.len(), 1);
        let root = graph.step(ROOT_STEP_ID).unwrap();
        assert_eq!(root.status, StepStatus::Completed);
        assert!(graph.edges().is_empty());
    }

    #[test]
    fn test_add_step_creates_edge_from_parent() {
        let graph = create_test_graph();
        assert_eq!(graph.len(), 5);
        assert!(graph.edges().contains(&Edge {
            source: "A".to_string(),
            target: "D".to_string(),
            edge_type: EdgeType::Alternate,
        }));
        assert_eq!(graph.step("B").unwrap().parent.as_deref(), Some("A"));
    }

    #[test]
    fn test_add_step_duplicate_id() {
        let mut graph = create_test_graph();
        let result = graph.add_step("B", "again", StepType::Code, Some("A"), EdgeType::Normal);
        assert_eq!(result, Err(GraphError::DuplicateStep("B".to_string())));
        assert_eq!(graph.len(), 5);
    }

    #[test]
    fn test_add_step_unknown_parent() {
        let mut graph = ExecutionGraph::new();
        let result = graph.add_step("X", "orphan", StepType::Code, Some("missing"), EdgeType::Normal);
        assert_eq!(result, Err(GraphError::StepNotFound("missing".to_string())));
        assert!(graph.step("X").is_none());
    }

    #[test]
    fn test_mutators_reject_unknown_step() {
        let mut graph = ExecutionGraph::new();
        assert!(matches!(
            graph.update_step_result("nope", json!({})),
            Err(GraphError::StepNotFound(_))
        ));
        assert!(matches!(
            graph.mark_step_failed("nope", "boom"),
            Err(GraphError::StepNotFound(_))
        ));
        assert!(matches!(graph.mark_step_running("nope"), Err(GraphError::StepNotFound(_))));
        assert!(matches!(graph.get_descendants("nope"), Err(GraphError::StepNotFound(_))));
    }

    #[test]
    fn test_root_stays_completed() {
        let mut graph = create_test_graph();

        for result in [
            graph.mark_step_running(ROOT_STEP_ID),
            graph.mark_step_failed(ROOT_STEP_ID, "boom"),
            graph.update_step_result(ROOT_STEP_ID, json!({"x": 1})),
            graph.attach_perception(ROOT_STEP_ID, Perception::new(false, "no")),
        ] {
            assert!(matches!(result, Err(GraphError::InvalidStep(_))));
        }

        let root = graph.step(ROOT_STEP_ID).unwrap();
        assert_eq!(root.status, StepStatus::Completed);
        assert!(root.result.is_none());
        assert!(root.perception.is_none());
        assert!(graph.failed_steps().is_empty());
        assert!(graph.session_memory().is_empty());
        assert!(graph.globals().is_empty());
    }

    #[test]
    fn test_add_step_rejects_second_root() {
        let mut graph = create_test_graph();
        let result = graph.add_step("R2", "another root", StepType::Root, None, EdgeType::Normal);
        assert!(matches!(result, Err(GraphError::InvalidStep(_))));
        assert!(graph.step("R2").is_none());

        let roots = graph
            .steps()
            .filter(|s| s.step_type == StepType::Root)
            .count();
        assert_eq!(roots, 1);
    }

    #[test]
    fn test_rewriting_same_step_keeps_every_value() {
        let mut graph = create_test_graph();
        graph.update_step_result("A", json!({"city": "Paris"})).unwrap();
        graph.update_step_result("B", json!({"city": "Berlin"})).unwrap();
        graph.update_step_result("B", json!({"city": "Bonn"})).unwrap();
        graph.update_step_result("B", json!({"city": "Bremen"})).unwrap();

        assert_eq!(graph.globals().get("city"), Some(&json!("Paris")));
        assert_eq!(graph.globals().get("city__B"), Some(&json!("Berlin")));
        assert_eq!(graph.globals().get("city__B__2"), Some(&json!("Bonn")));
        assert_eq!(graph.globals().get("city__B__3"), Some(&json!("Bremen")));
    }

    #[test]
    fn test_update_step_result_versions_globals() {
        let mut graph = create_test_graph();
        graph
            .update_step_result("A", json!({"city": "Paris", "count": 1}))
            .unwrap();
        graph
            .update_step_result("B", json!({"city": "Berlin"}))
            .unwrap();

        let step = graph.step("B").unwrap();
        assert_eq!(step.status, StepStatus::Completed);
        assert_eq!(graph.globals().get("city"), Some(&json!("Paris")));
        assert_eq!(graph.globals().get("city__B"), Some(&json!("Berlin")));
        assert_eq!(graph.globals().get("count"), Some(&json!(1)));
    }

    #[test]
    fn test_update_step_result_non_object_stays_on_step() {
        let mut graph = create_test_graph();
        graph.update_step_result("C", json!("plain text")).unwrap();
        assert!(graph.globals().is_empty());
        assert_eq!(graph.step("C").unwrap().result, Some(json!("plain text")));
    }

    #[test]
    fn test_mark_step_failed_records_failure() {
        let mut graph = create_test_graph();
        graph.mark_step_failed("C", "tool crashed").unwrap();

        let step = graph.step("C").unwrap();
        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(step.error.as_deref(), Some("tool crashed"));
        assert_eq!(graph.failed_steps(), ["C".to_string()]);
        assert_eq!(graph.session_memory().len(), 1);
        assert!(graph.session_memory()[0].note.contains("tool crashed"));
    }

    #[test]
    fn test_memory_note_truncates_long_errors() {
        let mut graph = create_test_graph();
        let long_error = "x".repeat(500);
        graph.mark_step_failed("B", long_error).unwrap();
        let note = &graph.session_memory()[0].note;
        assert!(note.len() < 300);
        assert!(note.ends_with("..."));
    }

    #[test]
    fn test_attach_perception_creates_placeholder() {
        let mut graph = ExecutionGraph::new();
        graph
            .attach_perception("P1", Perception::new(false, "nothing found"))
            .unwrap();

        let step = graph.step("P1").unwrap();
        assert_eq!(step.step_type, StepType::Perception);
        assert!(step.perception.is_some());
        assert_eq!(graph.failed_steps(), ["P1".to_string()]);
    }

    #[test]
    fn test_attach_perception_success_not_failed() {
        let mut graph = create_test_graph();
        graph.attach_perception("A", Perception::new(true, "done")).unwrap();
        assert!(graph.failed_steps().is_empty());
        assert!(graph.step("A").unwrap().perception.as_ref().unwrap().local_goal_achieved);
    }

    #[test]
    fn test_get_descendants() {
        let graph = create_test_graph();
        let expected: HashSet<String> = ["B", "C", "D"].iter().map(|s| s.to_string()).collect();
        assert_eq!(graph.get_descendants("A").unwrap(), expected);
        assert!(graph.get_descendants("C").unwrap().is_empty());
        assert_eq!(graph.get_descendants(ROOT_STEP_ID).unwrap().len(), 4);
    }

    #[test]
    fn test_get_descendants_survives_cycle() {
        let mut graph = create_test_graph();
        // Not reachable through the public API; simulates a corrupted graph
        graph.edges.push(Edge {
            source: "C".to_string(),
            target: "A".to_string(),
            edge_type: EdgeType::Retry,
        });
        let descendants = graph.get_descendants("A").unwrap();
        assert_eq!(descendants.len(), 3);
        assert!(!descendants.contains("A"));
    }

    #[test]
    fn test_rename_subtree_scenario() {
        let mut graph = create_test_graph();
        graph.rename_subtree_from("B", "x").unwrap();

        let expected: HashSet<String> = ["ROOT", "A", "D", "Bx", "Cx"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(ids(&graph), expected);

        let has_edge = |s: &str, t: &str| {
            graph
                .edges()
                .iter()
                .any(|e| e.source == s && e.target == t)
        };
        assert!(has_edge("A", "Bx"));
        assert!(has_edge("Bx", "Cx"));
        assert!(has_edge("A", "D"));
        assert!(graph.step("B").is_none());
        assert!(graph.step("C").is_none());
        assert_eq!(graph.step("Cx").unwrap().parent.as_deref(), Some("Bx"));
        assert_eq!(graph.step("Bx").unwrap().parent.as_deref(), Some("A"));
    }

    #[test]
    fn test_rename_subtree_leaves_siblings_unchanged() {
        let mut graph = create_test_graph();
        graph.update_step_result("D", json!({"answer": 42})).unwrap();
        let d_before = graph.step("D").unwrap().clone();
        let a_before = graph.step("A").unwrap().clone();

        graph.rename_subtree_from("B", "_retry").unwrap();

        assert_eq!(graph.step("D").unwrap(), &d_before);
        assert_eq!(graph.step("A").unwrap(), &a_before);
    }

    #[test]
    fn test_rename_subtree_remaps_failed_steps() {
        let mut graph = create_test_graph();
        graph.mark_step_failed("C", "boom").unwrap();
        graph.mark_step_failed("D", "boom").unwrap();
        graph.rename_subtree_from("B", "x").unwrap();
        assert_eq!(graph.failed_steps(), ["Cx".to_string(), "D".to_string()]);
    }

    #[test]
    fn test_rename_subtree_rejects_invalid_requests() {
        let mut graph = create_test_graph();
        let before = graph.get_context_snapshot();

        assert!(matches!(
            graph.rename_subtree_from(ROOT_STEP_ID, "x"),
            Err(GraphError::InvalidRename(_))
        ));
        assert!(matches!(graph.rename_subtree_from("B", ""), Err(GraphError::InvalidRename(_))));
        assert!(matches!(
            graph.rename_subtree_from("missing", "x"),
            Err(GraphError::StepNotFound(_))
        ));

        // "B" + "x" would collide with an unrelated "Bx"
        graph
            .add_step("Bx", "unrelated", StepType::Nop, Some("D"), EdgeType::Normal)
            .unwrap();
        let with_bx = graph.get_context_snapshot();
        assert!(matches!(graph.rename_subtree_from("B", "x"), Err(GraphError::InvalidRename(_))));
        assert_eq!(graph.get_context_snapshot(), with_bx);
        assert_ne!(before, with_bx);
    }

    #[test]
    fn test_context_snapshot_shape() {
        let graph = create_test_graph();
        let snapshot = graph.get_context_snapshot();
        assert!(snapshot.directed);
        assert_eq!(snapshot.nodes.len(), 5);
        assert_eq!(snapshot.links.len(), 4);

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["directed"], json!(true));
        assert_eq!(value["nodes"][0]["id"], json!("ROOT"));
        assert_eq!(value["nodes"][1]["data"]["type"], json!("CODE"));
        assert_eq!(value["links"][0]["source"], json!("ROOT"));
        assert_eq!(value["links"][3]["type"], json!("alternate"));
    }
}
