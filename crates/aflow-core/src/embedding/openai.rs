//! OpenAI-compatible embeddings client.
//!
//! Speaks the `/embeddings` endpoint of OpenAI and compatible servers
//! (Ollama, vLLM, LocalAI).

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::BoxFuture;

use super::{EmbedError, Embedder};

const OPENAI_API_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiEmbedder {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiEmbedder {
    /// Create a new embedder with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: OPENAI_API_URL.to_string(),
            model: "text-embedding-ada-002".to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set a custom base URL (for OpenAI-compatible servers).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url.trim_end_matches('/'))
    }
}

impl Embedder for OpenAiEmbedder {
    fn name(&self) -> &str {
        "OpenAI"
    }

    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>, EmbedError>> {
        Box::pin(async move {
            debug!(model = %self.model, chars = text.len(), "Embedding request");

            let mut request = self
                .client
                .post(self.endpoint())
                .header("content-type", "application/json")
                .json(&EmbeddingRequest {
                    model: &self.model,
                    input: text,
                });
            if !self.api_key.is_empty() {
                request = request.header("authorization", format!("Bearer {}", self.api_key));
            }
            let resp = request
                .send()
                .await
                .map_err(|e| EmbedError::Network(e.to_string()))?;

            let status = resp.status().as_u16();
            if status == 401 {
                return Err(EmbedError::Auth("invalid API key".to_string()));
            }
            if status == 429 {
                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60);
                return Err(EmbedError::RateLimited {
                    retry_after_secs: retry_after,
                });
            }
            if !resp.status().is_success() {
                let message = resp.text().await.unwrap_or_default();
                return Err(EmbedError::Provider { status, message });
            }

            let body: EmbeddingResponse = resp
                .json()
                .await
                .map_err(|e| EmbedError::Parse(e.to_string()))?;
            body.data
                .into_iter()
                .next()
                .map(|d| d.embedding)
                .ok_or_else(|| EmbedError::Parse("no embedding in response".to_string()))
        })
    }
}

// ── OpenAI API types (private) ──────────────────────────────────────────

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}
