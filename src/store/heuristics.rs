//! Heuristic CRUD: insert, listing, expiry. Rows are immutable after
//! creation; pattern compilation and quarantine happen at scan time in the
//! retrieval engine.

use rusqlite::params;

use super::*;
use crate::store::now_ms;

fn row_to_heuristic(store: &Store, row: &rusqlite::Row) -> rusqlite::Result<Heuristic> {
    Ok(Heuristic {
        id: row.get("id")?,
        pattern: row.get("pattern")?,
        suggestion: row.get("suggestion")?,
        created_at: row.get("created_at")?,
        scope: store.scope(),
    })
}

impl Store {
    pub fn insert_heuristic(
        &self,
        pattern: &str,
        suggestion: &str,
    ) -> Result<Heuristic, MemoryError> {
        validate_pattern(pattern)?;
        validate_content(suggestion)?;
        let heuristic = Heuristic {
            id: uuid::Uuid::new_v4().to_string(),
            pattern: pattern.trim().to_string(),
            suggestion: suggestion.trim().to_string(),
            created_at: now_ms(),
            scope: self.scope(),
        };
        self.conn()?.execute(
            "INSERT INTO heuristics (id, pattern, suggestion, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                heuristic.id,
                heuristic.pattern,
                heuristic.suggestion,
                heuristic.created_at,
            ],
        )?;
        Ok(heuristic)
    }

    /// Heuristics in creation order, oldest first; scan order is stable so
    /// pattern-text dedup keeps a deterministic winner.
    pub fn list_heuristics(&self) -> Result<Vec<Heuristic>, MemoryError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT * FROM heuristics ORDER BY created_at, id")?;
        let heuristics = stmt
            .query_map([], |row| row_to_heuristic(self, row))?
            .filter_map(|r| r.map_err(|e| tracing::warn!("heuristic row parse: {e}")).ok())
            .collect();
        Ok(heuristics)
    }

    pub fn delete_expired_heuristics(&self, cutoff_ms: i64) -> Result<usize, MemoryError> {
        let deleted = self.conn()?.execute(
            "DELETE FROM heuristics WHERE created_at < ?1",
            params![cutoff_ms],
        )?;
        Ok(deleted)
    }
}
