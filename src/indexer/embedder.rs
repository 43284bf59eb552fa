//! Text embedding
//!
//! The indexer only needs `text -> vector`; where the vector comes from is
//! behind the [`Embedder`] trait.

use crate::indexer::error::IndexError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Turns text into a fixed-length vector
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one piece of text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError>;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// Embedder backed by an Ollama-compatible `/api/embeddings` endpoint
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    /// Shared HTTP client (connection pooling)
    client: reqwest::Client,
    /// Service base URL without trailing slash
    base_url: String,
    /// Embedding model name
    model: String,
}

impl HttpEmbedder {
    /// Create an embedder for the given service and model
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        let url = format!("{}/api/embeddings", self.base_url);

        tracing::debug!(
            url = %url,
            model = %self.model,
            text_len = text.len(),
            "Requesting embedding"
        );

        let response = self
            .client
            .post(&url)
            .json(&EmbeddingRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error body".to_string());

            tracing::error!(
                status_code = status_code,
                error_body = %error_body,
                "Embedding service returned error status"
            );

            return Err(IndexError::Embedding(format!(
                "embedding service returned status {}: {}",
                status_code, error_body
            )));
        }

        let body = response.text().await?;
        let parsed: EmbeddingResponse = serde_json::from_str(&body)
            .map_err(|e| IndexError::InvalidResponse(format!("{} - Response body: {}", e, body)))?;

        if parsed.embedding.is_empty() {
            return Err(IndexError::InvalidResponse("empty embedding".to_string()));
        }
        Ok(parsed.embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    #[tokio::test]
    async fn test_embed_success() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/embeddings")
            .match_body(Matcher::Json(json!({"model": "nomic-embed-text", "prompt": "hello"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"embedding": [0.5, -1.0, 2.0]}"#)
            .create_async()
            .await;

        let embedder = HttpEmbedder::new(reqwest::Client::new(), server.url(), "nomic-embed-text");
        let vector = embedder.embed("hello").await.unwrap();
        assert_eq!(vector, vec![0.5, -1.0, 2.0]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_embed_error_status() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/embeddings")
            .with_status(404)
            .with_body(r#"{"error":"model not found"}"#)
            .create_async()
            .await;

        let embedder = HttpEmbedder::new(reqwest::Client::new(), server.url(), "missing");
        match embedder.embed("hello").await {
            Err(IndexError::Embedding(msg)) => {
                assert!(msg.contains("404"));
                assert!(msg.contains("model not found"));
            }
            other => panic!("Expected Embedding error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_embed_rejects_empty_vector() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/embeddings")
            .with_status(200)
            .with_body(r#"{"embedding": []}"#)
            .create_async()
            .await;

        let embedder = HttpEmbedder::new(reqwest::Client::new(), server.url(), "m");
        assert!(matches!(
            embedder.embed("hello").await,
            Err(IndexError::InvalidResponse(_))
        ));
    }
}
