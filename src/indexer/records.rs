//! Session records
//!
//! One JSON file per past session, anywhere under the sessions directory.

use crate::indexer::error::IndexError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// An operation invoked during a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Operation name
    pub name: String,
    /// Whether the call succeeded
    #[serde(default)]
    pub success: bool,
}

/// A finished session as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session id; defaults to the file stem when absent
    #[serde(default)]
    pub session_id: String,
    /// The user's original query
    pub user_query: String,
    /// The answer the session concluded with
    #[serde(default)]
    pub final_answer: String,
    /// Operations invoked, in call order
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
}

impl SessionRecord {
    /// Distinct operation names in first-use order
    pub fn tools_used(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for call in &self.tool_calls {
            if !names.contains(&call.name) {
                names.push(call.name.clone());
            }
        }
        names
    }

    /// Fraction of successful tool calls; 1.0 when there were none
    pub fn success_ratio(&self) -> f32 {
        if self.tool_calls.is_empty() {
            return 1.0;
        }
        let succeeded = self.tool_calls.iter().filter(|c| c.success).count();
        succeeded as f32 / self.tool_calls.len() as f32
    }

    /// Text that represents the session in the index
    pub fn embedding_text(&self) -> String {
        format!(
            "User Query: {}\nFinal Answer: {}\nTools Used: {}",
            self.user_query,
            self.final_answer,
            self.tools_used().join(", ")
        )
    }
}

/// Load every readable session record under `root`, sorted by path
///
/// Files that cannot be read or parsed are skipped with a warning. A root
/// that cannot be walked at all is an error.
pub fn load_sessions(root: &Path) -> Result<Vec<SessionRecord>, IndexError> {
    if !root.is_dir() {
        return Err(IndexError::Scan(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let mut sessions = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable path in sessions directory");
                continue;
            }
        };

        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("json")
        {
            continue;
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable session file");
                continue;
            }
        };

        match serde_json::from_str::<SessionRecord>(&content) {
            Ok(mut record) => {
                if record.session_id.is_empty() {
                    record.session_id = path
                        .file_stem()
                        .map(|s| s.to_string_lossy().to_string())
                        .unwrap_or_default();
                }
                debug!(session_id = %record.session_id, "Loaded session record");
                sessions.push(record);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping malformed session file");
            }
        }
    }

    Ok(sessions)
}
