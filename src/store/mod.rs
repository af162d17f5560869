//! SQLite-backed scoped storage with FTS5 keyword search.
//!
//! One `Store` per scope (global, project). Scope is a property of the
//! store a row lives in, not a column: the handle stamps its own scope
//! onto every row it returns.

mod fts;
mod heuristics;
mod learnings;
mod rules;

pub use fts::{build_fts_query, is_stopword};
pub use learnings::fingerprint;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::warn;

use crate::error::MemoryError;
use crate::scope::Scope;
use crate::thresholds::{MAX_CONTENT_LEN, MAX_PATTERN_LEN};

/// Set busy_timeout on every connection handed out by the pool.
/// Prevents SQLITE_BUSY under concurrent write pressure (consolidation +
/// retrieval share the pool).
#[derive(Debug)]
struct BusyTimeoutCustomizer;
impl r2d2::CustomizeConnection<rusqlite::Connection, rusqlite::Error> for BusyTimeoutCustomizer {
    fn on_acquire(&self, conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(())
    }
}

type PooledConn = r2d2::PooledConnection<SqliteConnectionManager>;

/// Outcome class of a recorded learning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Success,
    Failure,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Success => "success",
            Category::Failure => "failure",
        }
    }
}

impl TryFrom<&str> for Category {
    type Error = MemoryError;

    fn try_from(v: &str) -> Result<Self, Self::Error> {
        match v {
            "success" => Ok(Category::Success),
            "failure" => Ok(Category::Failure),
            other => Err(MemoryError::Validation(format!(
                "invalid category: {other} (expected success or failure)"
            ))),
        }
    }
}

/// A standing principle, always eligible for surfacing.
#[derive(Debug, Clone, Serialize)]
pub struct Rule {
    pub id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub created_at: i64,
    pub hit_count: i64,
    pub scope: Scope,
}

/// A recorded past outcome, retrieved by similarity.
#[derive(Debug, Clone, Serialize)]
pub struct Learning {
    pub id: String,
    pub content: String,
    pub category: Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub created_at: i64,
    pub context_hash: String,
    pub utility_score: f64,
    pub scope: Scope,
}

/// A pattern-triggered static suggestion. Immutable after creation.
#[derive(Debug, Clone, Serialize)]
pub struct Heuristic {
    pub id: String,
    pub pattern: String,
    pub suggestion: String,
    pub created_at: i64,
    pub scope: Scope,
}

/// One keyword-search match: the learning id plus an FTS-generated snippet.
#[derive(Debug, Clone, Serialize)]
pub struct KeywordHit {
    pub id: String,
    pub snippet: String,
}

#[derive(Debug, Default, Serialize)]
pub struct StoreStats {
    pub rules: usize,
    pub learnings: usize,
    pub heuristics: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct IntegrityReport {
    pub learnings: usize,
    pub fts_indexed: usize,
    pub orphan_fts: usize,
    pub missing_fts: usize,
    pub ok: bool,
}

pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as i64
}

fn validate_content(content: &str) -> Result<(), MemoryError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(MemoryError::EmptyContent);
    }
    if trimmed.chars().count() > MAX_CONTENT_LEN {
        return Err(MemoryError::ContentTooLong);
    }
    Ok(())
}

fn validate_pattern(pattern: &str) -> Result<(), MemoryError> {
    if pattern.trim().is_empty() {
        return Err(MemoryError::Validation("pattern must not be empty".into()));
    }
    if pattern.chars().count() > MAX_PATTERN_LEN {
        return Err(MemoryError::Validation(format!(
            "pattern too long (max {MAX_PATTERN_LEN})"
        )));
    }
    Ok(())
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS rules (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    embedding BLOB,
    created_at INTEGER NOT NULL,
    hit_count INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_rules_hits ON rules(hit_count);
CREATE INDEX IF NOT EXISTS idx_rules_created ON rules(created_at);

CREATE TABLE IF NOT EXISTS learnings (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    category TEXT NOT NULL CHECK (category IN ('success', 'failure')),
    embedding BLOB,
    created_at INTEGER NOT NULL,
    context_hash TEXT NOT NULL UNIQUE,
    utility_score REAL NOT NULL DEFAULT 1.0
);
CREATE INDEX IF NOT EXISTS idx_learnings_created ON learnings(created_at);

CREATE TABLE IF NOT EXISTS heuristics (
    id TEXT PRIMARY KEY,
    pattern TEXT NOT NULL,
    suggestion TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_heuristics_created ON heuristics(created_at);

CREATE TABLE IF NOT EXISTS mnemon_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

// External-content FTS over learnings; inserts/deletes are managed
// manually so the index and the table stay in lockstep with our writes.
const FTS_SCHEMA: &str =
    "CREATE VIRTUAL TABLE IF NOT EXISTS learnings_fts USING fts5(\
     id UNINDEXED, content, tokenize='unicode61')";

const META_EMBED_DIM: &str = "embed_dim";

/// Durable CRUD + keyword search for one scope.
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
    scope: Scope,
    /// Embedding dimension, learned from the first vector written and then
    /// immutable for the life of the store file.
    dim: OnceLock<usize>,
}

impl Store {
    /// Open (or create) a store at the given path for the given scope.
    /// `":memory:"` opens a private in-memory database (used by tests).
    pub fn open(path: &str, scope: Scope) -> Result<Self, MemoryError> {
        let pool_size = if path == ":memory:" { 2 } else { 8 };
        let manager = if path == ":memory:" {
            // Shared cache so all pool connections see the same in-memory DB.
            // Each open gets a unique name to avoid cross-test pollution.
            let name = uuid::Uuid::new_v4().to_string();
            SqliteConnectionManager::file(format!("file:{name}?mode=memory&cache=shared"))
        } else {
            SqliteConnectionManager::file(path)
        };
        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_customizer(Box::new(BusyTimeoutCustomizer))
            .build(manager)
            .map_err(|e| MemoryError::Internal(format!("pool: {e}")))?;

        let conn = pool
            .get()
            .map_err(|e| MemoryError::Internal(e.to_string()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        conn.execute(FTS_SCHEMA, [])?;
        drop(conn);

        let store = Self { pool, scope, dim: OnceLock::new() };
        if let Some(dim) = store
            .get_meta(META_EMBED_DIM)
            .and_then(|v| v.parse::<usize>().ok())
        {
            let _ = store.dim.set(dim);
        }
        Ok(store)
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    fn conn(&self) -> Result<PooledConn, MemoryError> {
        self.pool
            .get()
            .map_err(|e| MemoryError::Internal(format!("pool: {e}")))
    }

    pub fn get_meta(&self, key: &str) -> Option<String> {
        self.conn().ok().and_then(|c| {
            c.query_row("SELECT value FROM mnemon_meta WHERE key = ?1", [key], |r| r.get(0))
                .ok()
        })
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<(), MemoryError> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO mnemon_meta (key, value) VALUES (?1, ?2)",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    /// Embedding dimension recorded for this store, if any vector has been
    /// written yet.
    pub fn embed_dim(&self) -> Option<usize> {
        self.dim.get().copied()
    }

    /// Record the store's embedding dimension on first write; reject vectors
    /// of any other dimension afterwards.
    fn ensure_dim(&self, dim: usize) -> Result<(), MemoryError> {
        match self.dim.get() {
            Some(&expected) if expected != dim => {
                Err(MemoryError::DimensionMismatch { expected, got: dim })
            }
            Some(_) => Ok(()),
            None => {
                self.set_meta(META_EMBED_DIM, &dim.to_string())?;
                let _ = self.dim.set(dim);
                Ok(())
            }
        }
    }

    /// Decode a stored embedding blob, skipping (with a warning) vectors
    /// whose dimension disagrees with the store's, e.g. rows written under
    /// a previous embedding model.
    fn decode_embedding(&self, blob: Option<Vec<u8>>) -> Option<Vec<f32>> {
        let blob = blob?;
        let decoded = crate::embed::bytes_to_embedding(&blob, self.embed_dim());
        if decoded.is_none() {
            warn!(
                scope = %self.scope,
                blob_len = blob.len(),
                expected_dim = ?self.embed_dim(),
                "skipping embedding with mismatched dimension"
            );
        }
        decoded
    }

    pub fn stats(&self) -> StoreStats {
        let Ok(conn) = self.conn() else {
            return StoreStats::default();
        };
        let count = |sql: &str| -> usize {
            conn.query_row(sql, [], |r| r.get::<_, i64>(0))
                .map(|n| n as usize)
                .unwrap_or(0)
        };
        StoreStats {
            rules: count("SELECT COUNT(*) FROM rules"),
            learnings: count("SELECT COUNT(*) FROM learnings"),
            heuristics: count("SELECT COUNT(*) FROM heuristics"),
        }
    }
}

#[cfg(test)]
mod meta_tests {
    use super::*;

    #[test]
    fn meta_get_set() {
        let store = Store::open(":memory:", Scope::Global).unwrap();
        assert_eq!(store.get_meta("nonexistent"), None);
        store.set_meta("last_audit_ms", "1234567890").unwrap();
        assert_eq!(store.get_meta("last_audit_ms"), Some("1234567890".to_string()));
        store.set_meta("last_audit_ms", "9999999999").unwrap();
        assert_eq!(store.get_meta("last_audit_ms"), Some("9999999999".to_string()));
    }

    #[test]
    fn dim_is_sticky() {
        let store = Store::open(":memory:", Scope::Global).unwrap();
        assert_eq!(store.embed_dim(), None);
        store.ensure_dim(8).unwrap();
        assert_eq!(store.embed_dim(), Some(8));
        assert!(store.ensure_dim(8).is_ok());
        assert!(matches!(
            store.ensure_dim(16),
            Err(MemoryError::DimensionMismatch { expected: 8, got: 16 })
        ));
    }

    #[test]
    fn category_parse() {
        assert_eq!(Category::try_from("success").unwrap(), Category::Success);
        assert_eq!(Category::try_from("failure").unwrap(), Category::Failure);
        assert!(Category::try_from("partial").is_err());
    }
}
