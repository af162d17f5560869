//! Embedding provider boundary: OpenAI-compatible HTTP backend, cosine
//! similarity, and the f32 blob codec used for SQLite storage.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::MemoryError;
use crate::EmbedCache;

fn embed_err(msg: impl Into<String>) -> MemoryError {
    MemoryError::EmbedBackend(msg.into())
}

const EMBED_TIMEOUT: Duration = Duration::from_secs(30);

/// Text-to-vector provider. `embed` is deterministic for a given deployment
/// and returns vectors of a fixed dimension `D`.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Idempotent warm-up. Safe to call more than once.
    async fn init(&self) -> Result<(), MemoryError> {
        Ok(())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError>;
}

/// Cache-through embed: consult the process-wide cache first, fall back to
/// the provider, and store the result. Runs strictly after any privacy
/// screening; callers must never pass suppressed content here.
pub async fn embed_with_cache(
    cache: &EmbedCache,
    embedder: &dyn Embedder,
    text: &str,
) -> Result<Vec<f32>, MemoryError> {
    if let Some(v) = cache.get(text) {
        return Ok(v);
    }
    let v = embedder.embed(text).await?;
    cache.insert(text.to_string(), v.clone());
    Ok(v)
}

/// OpenAI-compatible `/embeddings` backend.
#[derive(Clone)]
pub struct HttpEmbedder {
    pub url: String,
    pub key: String,
    pub model: String,
    client: reqwest::Client,
    warm: std::sync::Arc<tokio::sync::OnceCell<()>>,
}

impl HttpEmbedder {
    pub fn new(url: impl Into<String>, key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key: key.into(),
            model: model.into(),
            client: reqwest::Client::builder()
                .timeout(EMBED_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            warm: std::sync::Arc::new(tokio::sync::OnceCell::new()),
        }
    }

    /// Returns `None` if `MNEMON_EMBED_URL` is not set.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("MNEMON_EMBED_URL").ok()?;
        let key = std::env::var("MNEMON_EMBED_KEY").unwrap_or_default();
        let model = std::env::var("MNEMON_EMBED_MODEL")
            .unwrap_or_else(|_| "text-embedding-3-small".into());
        Some(Self::new(url, key, model))
    }

    async fn request(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let req = EmbedRequest {
            model: self.model.clone(),
            input: vec![text.to_string()],
        };
        let mut builder = self.client.post(&self.url).json(&req);
        if !self.key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.key));
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| embed_err(format!("embedding request failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(embed_err(format!("embedding API returned {status}: {body}")));
        }

        let parsed: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| embed_err(format!("embedding response parse failed: {e}")))?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| embed_err("embedding API returned no vectors"))
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn init(&self) -> Result<(), MemoryError> {
        self.warm
            .get_or_try_init(|| async {
                let v = self.request("warm-up probe").await?;
                debug!(dim = v.len(), model = %self.model, "embedding provider ready");
                Ok::<(), MemoryError>(())
            })
            .await?;
        Ok(())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        self.request(text).await
    }
}

#[derive(Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
}

/// Cosine similarity between two vectors. Length mismatch and zero-norm
/// vectors yield 0.0, never NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let denom = na.sqrt() * nb.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

/// Serialize an f32 vector to little-endian bytes for SQLite BLOB storage.
pub fn embedding_to_bytes(v: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(v.len() * 4);
    for &f in v {
        buf.extend_from_slice(&f.to_le_bytes());
    }
    buf
}

/// Deserialize a BLOB back to an f32 vector, enforcing the store's embedding
/// dimension when known. A mismatched blob (truncated row, or a vector
/// written under a different embedding model) yields `None` rather than a
/// garbage vector.
pub fn bytes_to_embedding(b: &[u8], expected_dim: Option<usize>) -> Option<Vec<f32>> {
    if b.len() % 4 != 0 {
        return None;
    }
    let dim = b.len() / 4;
    if let Some(expected) = expected_dim {
        if dim != expected {
            return None;
        }
    }
    Some(
        b.chunks_exact(4)
            .map(|chunk| {
                let arr: [u8; 4] = chunk.try_into().expect("4 bytes");
                f32::from_le_bytes(arr)
            })
            .collect(),
    )
}
