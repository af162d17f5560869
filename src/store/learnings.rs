//! Learning CRUD: hash-deduplicated insert, listings, utility updates,
//! expiry. The FTS index is maintained alongside every write.

use rusqlite::params;
use sha2::{Digest, Sha256};

use super::*;
use crate::store::now_ms;

/// Stable fingerprint of a raw outcome payload. Two recordings of the same
/// payload collapse into one row per store.
pub fn fingerprint(payload: &str) -> String {
    use std::fmt::Write;
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in hasher.finalize() {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn row_to_learning(store: &Store, row: &rusqlite::Row) -> rusqlite::Result<Learning> {
    let blob: Option<Vec<u8>> = row.get("embedding")?;
    let category: String = row.get("category")?;
    Ok(Learning {
        id: row.get("id")?,
        content: row.get("content")?,
        category: Category::try_from(category.as_str()).unwrap_or(Category::Failure),
        embedding: store.decode_embedding(blob),
        created_at: row.get("created_at")?,
        context_hash: row.get("context_hash")?,
        utility_score: row.get("utility_score")?,
        scope: store.scope(),
    })
}

impl Store {
    /// Insert a learning. Returns `Ok(None)` when a row with the same
    /// `context_hash` already exists; the duplicate is a deliberate no-op.
    pub fn insert_learning(
        &self,
        content: &str,
        category: Category,
        context_hash: &str,
        embedding: Option<&[f32]>,
    ) -> Result<Option<Learning>, MemoryError> {
        validate_content(content)?;
        let content = content.trim();
        if let Some(v) = embedding {
            self.ensure_dim(v.len())?;
        }
        let learning = Learning {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.to_string(),
            category,
            embedding: embedding.map(|v| v.to_vec()),
            created_at: now_ms(),
            context_hash: context_hash.to_string(),
            utility_score: 1.0,
            scope: self.scope(),
        };
        let inserted = self.conn()?.execute(
            "INSERT OR IGNORE INTO learnings \
             (id, content, category, embedding, created_at, context_hash, utility_score) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1.0)",
            params![
                learning.id,
                learning.content,
                category.as_str(),
                embedding.map(crate::embed::embedding_to_bytes),
                learning.created_at,
                learning.context_hash,
            ],
        )?;
        if inserted == 0 {
            return Ok(None);
        }
        self.fts_insert(&learning.id, &learning.content)?;
        Ok(Some(learning))
    }

    pub fn get_learning(&self, id: &str) -> Result<Option<Learning>, MemoryError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT * FROM learnings WHERE id = ?1")?;
        let mut rows = stmt.query_map([id], |row| row_to_learning(self, row))?;
        Ok(rows.next().transpose()?)
    }

    /// Learnings in creation order (oldest first): the deterministic
    /// iteration order clustering depends on. `since_ms` bounds the window.
    pub fn list_learnings(&self, since_ms: Option<i64>) -> Result<Vec<Learning>, MemoryError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM learnings WHERE created_at >= ?1 ORDER BY created_at, id",
        )?;
        let learnings = stmt
            .query_map([since_ms.unwrap_or(0)], |row| row_to_learning(self, row))?
            .filter_map(|r| r.map_err(|e| tracing::warn!("learning row parse: {e}")).ok())
            .collect();
        Ok(learnings)
    }

    /// Learnings carrying a decodable embedding: the semantic-search scan
    /// set. Exhaustive comparison over this set is the reference behavior;
    /// fine for the target scale, revisit with an index if volume grows.
    pub fn list_learnings_with_embeddings(&self) -> Result<Vec<Learning>, MemoryError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM learnings WHERE embedding IS NOT NULL ORDER BY created_at, id",
        )?;
        let learnings = stmt
            .query_map([], |row| row_to_learning(self, row))?
            .filter_map(|r| r.map_err(|e| tracing::warn!("learning row parse: {e}")).ok())
            .filter(|l: &Learning| l.embedding.is_some())
            .collect();
        Ok(learnings)
    }

    /// Additive utility adjustment. Returns false if the id does not exist
    /// in this store.
    pub fn update_learning_utility(&self, id: &str, delta: f64) -> Result<bool, MemoryError> {
        let changed = self.conn()?.execute(
            "UPDATE learnings SET utility_score = utility_score + ?1 WHERE id = ?2",
            params![delta, id],
        )?;
        Ok(changed > 0)
    }

    /// Age-based expiry, independent of utility_score.
    pub fn delete_expired_learnings(&self, cutoff_ms: i64) -> Result<usize, MemoryError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM learnings_fts WHERE id IN \
             (SELECT id FROM learnings WHERE created_at < ?1)",
            params![cutoff_ms],
        )?;
        let deleted = conn.execute(
            "DELETE FROM learnings WHERE created_at < ?1",
            params![cutoff_ms],
        )?;
        Ok(deleted)
    }

    /// Test/backfill hook: rewrite a learning's creation time.
    pub fn set_learning_created_at(&self, id: &str, created_at: i64) -> Result<(), MemoryError> {
        self.conn()?.execute(
            "UPDATE learnings SET created_at = ?1 WHERE id = ?2",
            params![created_at, id],
        )?;
        Ok(())
    }

    /// Test/backfill hook: rewrite a rule's creation time.
    pub fn set_rule_created_at(&self, id: &str, created_at: i64) -> Result<(), MemoryError> {
        self.conn()?.execute(
            "UPDATE rules SET created_at = ?1 WHERE id = ?2",
            params![created_at, id],
        )?;
        Ok(())
    }

    /// Test/backfill hook: rewrite a heuristic's creation time.
    pub fn set_heuristic_created_at(&self, id: &str, created_at: i64) -> Result<(), MemoryError> {
        self.conn()?.execute(
            "UPDATE heuristics SET created_at = ?1 WHERE id = ?2",
            params![created_at, id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Scope;

    #[test]
    fn mismatched_blob_is_skipped_on_read() {
        let store = Store::open(":memory:", Scope::Global).unwrap();
        let good = store
            .insert_learning("good row", Category::Success, "h1", Some(&[1.0, 0.0, 0.0]))
            .unwrap()
            .unwrap();
        let bad = store
            .insert_learning("bad row", Category::Success, "h2", Some(&[0.0, 1.0, 0.0]))
            .unwrap()
            .unwrap();

        // corrupt the second row's blob to a different dimension, as if it
        // had been written under another embedding model
        store
            .conn()
            .unwrap()
            .execute(
                "UPDATE learnings SET embedding = ?1 WHERE id = ?2",
                params![crate::embed::embedding_to_bytes(&[1.0, 2.0]), bad.id],
            )
            .unwrap();

        let rows = store.list_learnings_with_embeddings().unwrap();
        assert_eq!(rows.len(), 1, "mismatched-dimension row must be skipped");
        assert_eq!(rows[0].id, good.id);

        // the row itself still reads back, just without a vector
        let row = store.get_learning(&bad.id).unwrap().unwrap();
        assert!(row.embedding.is_none());
    }
}
