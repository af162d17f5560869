#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("content must not be empty")]
    EmptyContent,

    #[error("content exceeds maximum length")]
    ContentTooLong,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found")]
    NotFound,

    #[error("embedding provider not configured (set MNEMON_EMBED_URL)")]
    EmbedNotConfigured,

    #[error("embedding backend error: {0}")]
    EmbedBackend(String),

    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("internal error: {0}")]
    Internal(String),
}
