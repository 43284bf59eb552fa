//! Conversation indexer
//!
//! Embeds past session records and finds the ones closest to a new query, so
//! a planner can be shown how similar requests were handled before.

pub mod embedder;
pub mod error;
pub mod index;
pub mod records;

pub use embedder::{Embedder, HttpEmbedder};
pub use error::IndexError;
pub use index::FlatIndex;
pub use records::{load_sessions, SessionRecord, ToolCallRecord};

use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

/// Characters of query/answer text kept in a context block
const EXCERPT_CHARS: usize = 300;

/// A past session similar to the query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionMatch {
    /// Session id
    pub session_id: String,
    /// `1 / (1 + squared distance)`, in (0, 1]
    pub similarity: f32,
    /// Original user query
    pub user_query: String,
    /// Final answer
    pub final_answer: String,
    /// Distinct operations the session used
    pub tools_used: Vec<String>,
    /// Fraction of the session's calls that succeeded
    pub success_ratio: f32,
}

impl SessionMatch {
    /// Render as a prompt context block
    pub fn format_block(&self) -> String {
        let tools = if self.tools_used.is_empty() {
            "none".to_string()
        } else {
            self.tools_used.join(", ")
        };
        format!(
            "[Similarity: {:.2}]\nQuery: {}\nAnswer: {}\nTools Used: {}\nSuccess Rate: {:.0}%",
            self.similarity,
            excerpt(&self.user_query),
            excerpt(&self.final_answer),
            tools,
            self.success_ratio * 100.0
        )
    }
}

/// Join context blocks for prompt augmentation; empty when nothing matched
pub fn format_context(matches: &[SessionMatch]) -> String {
    matches
        .iter()
        .map(SessionMatch::format_block)
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= EXCERPT_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(EXCERPT_CHARS).collect();
    format!("{}...", cut)
}

/// Similarity index over past sessions
pub struct ConversationIndexer {
    embedder: Box<dyn Embedder>,
    index: FlatIndex,
    /// Sessions in index id order
    sessions: Vec<SessionRecord>,
    top_k: usize,
    min_similarity: f32,
}

impl ConversationIndexer {
    /// Create an empty indexer
    ///
    /// # Arguments
    /// * `embedder` - Source of embedding vectors
    /// * `top_k` - Maximum number of matches per query
    /// * `min_similarity` - Matches below this score are dropped
    pub fn new(embedder: Box<dyn Embedder>, top_k: usize, min_similarity: f32) -> Self {
        Self {
            embedder,
            index: FlatIndex::new(),
            sessions: Vec::new(),
            top_k,
            min_similarity,
        }
    }

    /// Rebuild the index from every session under `root`
    ///
    /// Always a full rebuild. The new index is built aside and only replaces
    /// the current one when every session was embedded, so a failing
    /// embedding service leaves the previous index usable.
    ///
    /// # Returns
    /// * `Result<usize, IndexError>` - Number of sessions indexed
    pub async fn rebuild(&mut self, root: &Path) -> Result<usize, IndexError> {
        let sessions = load_sessions(root)?;
        info!(
            root = %root.display(),
            session_count = sessions.len(),
            "Rebuilding conversation index"
        );

        let mut index = FlatIndex::new();
        for session in &sessions {
            let vector = self.embedder.embed(&session.embedding_text()).await?;
            index.add(vector)?;
            debug!(session_id = %session.session_id, "Session embedded");
        }

        self.index = index;
        self.sessions = sessions;

        info!(indexed = self.sessions.len(), "Conversation index rebuilt");
        Ok(self.sessions.len())
    }

    /// Find past sessions similar to `text`, most similar first
    pub async fn query(&self, text: &str) -> Result<Vec<SessionMatch>, IndexError> {
        if self.index.is_empty() || self.top_k == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed(text).await?;
        let hits = self.index.search(&vector, self.top_k)?;

        let matches: Vec<SessionMatch> = hits
            .into_iter()
            .filter_map(|(id, distance)| {
                let similarity = 1.0 / (1.0 + distance);
                if similarity < self.min_similarity {
                    return None;
                }
                let session = self.sessions.get(id)?;
                Some(SessionMatch {
                    session_id: session.session_id.clone(),
                    similarity,
                    user_query: session.user_query.clone(),
                    final_answer: session.final_answer.clone(),
                    tools_used: session.tools_used(),
                    success_ratio: session.success_ratio(),
                })
            })
            .collect();

        debug!(match_count = matches.len(), "Conversation index queried");
        Ok(matches)
    }

    /// Number of indexed sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether nothing is indexed
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Embeds by keyword: one dimension per topic
    struct KeywordEmbedder {
        fail: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(IndexError::Embedding("service down".to_string()));
            }
            let text = text.to_lowercase();
            Ok(vec![
                if text.contains("weather") { 1.0 } else { 0.0 },
                if text.contains("email") { 1.0 } else { 0.0 },
            ])
        }
    }

    fn write_sessions(dir: &TempDir) {
        std::fs::write(
            dir.path().join("weather.json"),
            r#"{"session_id": "w", "user_query": "Weather in Oslo", "final_answer": "Rainy",
                "tool_calls": [{"name": "search", "success": true}, {"name": "search", "success": false}]}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("email.json"),
            r#"{"session_id": "e", "user_query": "Email Bob", "final_answer": "Sent",
                "tool_calls": [{"name": "send_email", "success": true}]}"#,
        )
        .unwrap();
    }

    fn indexer(min_similarity: f32) -> (ConversationIndexer, Arc<AtomicBool>) {
        let fail = Arc::new(AtomicBool::new(false));
        let embedder = KeywordEmbedder { fail: fail.clone() };
        (ConversationIndexer::new(Box::new(embedder), 5, min_similarity), fail)
    }

    #[tokio::test]
    async fn test_query_ranks_and_filters() {
        let dir = TempDir::new().unwrap();
        write_sessions(&dir);
        let (mut indexer, _) = indexer(0.6);
        assert_eq!(indexer.rebuild(dir.path()).await.unwrap(), 2);

        let matches = indexer.query("what's the weather tomorrow").await.unwrap();
        // Exact match scores 1.0; the email session is at distance 2 -> 1/3, filtered
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].session_id, "w");
        assert_eq!(matches[0].similarity, 1.0);
        assert_eq!(matches[0].tools_used, vec!["search"]);
        assert_eq!(matches[0].success_ratio, 0.5);
    }

    #[tokio::test]
    async fn test_query_without_threshold_returns_all_in_order() {
        let dir = TempDir::new().unwrap();
        write_sessions(&dir);
        let (mut indexer, _) = indexer(0.0);
        indexer.rebuild(dir.path()).await.unwrap();

        let matches = indexer.query("email the report").await.unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].session_id, "e");
        assert!(matches[0].similarity > matches[1].similarity);
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_previous_index() {
        let dir = TempDir::new().unwrap();
        write_sessions(&dir);
        let (mut indexer, fail) = indexer(0.0);
        indexer.rebuild(dir.path()).await.unwrap();

        fail.store(true, Ordering::SeqCst);
        assert!(indexer.rebuild(dir.path()).await.is_err());
        assert_eq!(indexer.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_index_does_not_embed() {
        let (indexer, fail) = indexer(0.0);
        fail.store(true, Ordering::SeqCst);
        assert!(indexer.query("anything").await.unwrap().is_empty());
    }

    #[test]
    fn test_format_context() {
        let m = SessionMatch {
            session_id: "w".to_string(),
            similarity: 0.5,
            user_query: "Weather in Oslo".to_string(),
            final_answer: "Rainy".to_string(),
            tools_used: vec!["search".to_string()],
            success_ratio: 0.5,
        };
        let context = format_context(&[m.clone(), m]);
        assert!(context.starts_with("[Similarity: 0.50]\nQuery: Weather in Oslo"));
        assert!(context.contains("Tools Used: search\nSuccess Rate: 50%"));
        assert_eq!(context.matches("[Similarity").count(), 2);
        assert_eq!(format_context(&[]), "");
    }

    #[test]
    fn test_excerpt_truncates_long_text() {
        let long = "x".repeat(EXCERPT_CHARS + 10);
        let cut = excerpt(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), EXCERPT_CHARS + 3);
    }
}
