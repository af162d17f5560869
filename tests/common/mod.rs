//! Shared test fixtures: deterministic embedders and engine builders.

use async_trait::async_trait;
use std::sync::Arc;

use mnemon::embed::Embedder;
use mnemon::error::MemoryError;
use mnemon::store::Store;
use mnemon::{MemoryEngine, Scope};

/// Deterministic bag-of-words embedder: tokens hash into a fixed number of
/// buckets. Identical text always embeds identically; overlapping text
/// embeds similarly. No network, no model.
pub struct StubEmbedder {
    pub dim: usize,
}

impl Default for StubEmbedder {
    fn default() -> Self {
        Self { dim: 16 }
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let mut v = vec![0.0f32; self.dim];
        for token in text.to_lowercase().split_whitespace() {
            let mut h: u64 = 0xcbf2_9ce4_8422_2325;
            for b in token.bytes() {
                h ^= b as u64;
                h = h.wrapping_mul(0x0000_0100_0000_01b3);
            }
            v[(h % self.dim as u64) as usize] += 1.0;
        }
        Ok(v)
    }
}

/// Always-failing provider, for exercising the fail-open boundary.
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, MemoryError> {
        Err(MemoryError::EmbedBackend("provider down".into()))
    }
}

/// Opt-in log visibility: `RUST_LOG=mnemon=debug cargo test -- --nocapture`.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

/// Engine over two fresh in-memory stores, project + global.
pub fn dual_scope_engine() -> MemoryEngine {
    init_tracing();
    MemoryEngine::new(
        vec![
            Store::open(":memory:", Scope::Project).expect("project store"),
            Store::open(":memory:", Scope::Global).expect("global store"),
        ],
        Arc::new(StubEmbedder::default()),
    )
}

/// Engine over a single fresh in-memory global store.
pub fn global_only_engine() -> MemoryEngine {
    init_tracing();
    MemoryEngine::new(
        vec![Store::open(":memory:", Scope::Global).expect("global store")],
        Arc::new(StubEmbedder::default()),
    )
}
