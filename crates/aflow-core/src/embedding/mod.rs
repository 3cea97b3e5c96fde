//! Text embedding providers.
//!
//! Record embeddings are computed from `name + " " + description` whenever a
//! record is created or updated, and search queries go through the same
//! provider so vectors are comparable. Two providers are bundled:
//!
//! - **Hashing** — deterministic feature hashing, offline, the default
//! - **OpenAI** — any endpoint speaking the OpenAI `/embeddings` format

pub mod hashing;
pub mod openai;

use crate::BoxFuture;

pub use hashing::HashingEmbedder;
pub use openai::OpenAiEmbedder;

/// Errors from embedding calls.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("authentication failed (check API key): {0}")]
    Auth(String),

    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("embedding provider error: {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("response parse error: {0}")]
    Parse(String),
}

/// Maps text to a dense vector.
pub trait Embedder: Send + Sync {
    /// Provider display name.
    fn name(&self) -> &str;

    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>, EmbedError>>;
}

/// Create an embedder from the `[embedder]` config section.
pub fn create_embedder(config: &aflow_config::EmbedderConfig) -> Box<dyn Embedder> {
    match config.provider.as_str() {
        "openai" => Box::new(
            OpenAiEmbedder::new(&config.api_key)
                .with_base_url(&config.base_url)
                .with_model(&config.model),
        ),
        _ => Box::new(HashingEmbedder::new(config.dimensions)),
    }
}

/// Text a record is embedded from.
pub fn record_text(name: &str, description: &str) -> String {
    if description.is_empty() {
        name.to_string()
    } else {
        format!("{name} {description}")
    }
}

/// Cosine similarity; zero when either vector is empty, zero-length or the
/// dimensions differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
