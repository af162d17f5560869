//! Rule CRUD: insert, ordered listing, hit accounting, expiry.

use rusqlite::params;

use super::*;
use crate::store::now_ms;

fn row_to_rule(store: &Store, row: &rusqlite::Row) -> rusqlite::Result<Rule> {
    let blob: Option<Vec<u8>> = row.get("embedding")?;
    Ok(Rule {
        id: row.get("id")?,
        content: row.get("content")?,
        embedding: store.decode_embedding(blob),
        created_at: row.get("created_at")?,
        hit_count: row.get("hit_count")?,
        scope: store.scope(),
    })
}

impl Store {
    pub fn insert_rule(
        &self,
        content: &str,
        embedding: Option<&[f32]>,
    ) -> Result<Rule, MemoryError> {
        validate_content(content)?;
        let content = content.trim();
        if let Some(v) = embedding {
            self.ensure_dim(v.len())?;
        }
        let rule = Rule {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.to_string(),
            embedding: embedding.map(|v| v.to_vec()),
            created_at: now_ms(),
            hit_count: 0,
            scope: self.scope(),
        };
        self.conn()?.execute(
            "INSERT INTO rules (id, content, embedding, created_at, hit_count) \
             VALUES (?1, ?2, ?3, ?4, 0)",
            params![
                rule.id,
                rule.content,
                embedding.map(crate::embed::embedding_to_bytes),
                rule.created_at,
            ],
        )?;
        Ok(rule)
    }

    pub fn get_rule(&self, id: &str) -> Result<Option<Rule>, MemoryError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT * FROM rules WHERE id = ?1")?;
        let mut rows = stmt.query_map([id], |row| row_to_rule(self, row))?;
        Ok(rows.next().transpose()?)
    }

    /// Rules ordered by hit_count descending: the retrieval order within a
    /// scope. Ties break on recency then id so listings are deterministic.
    pub fn list_rules(&self, limit: Option<usize>) -> Result<Vec<Rule>, MemoryError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM rules \
             ORDER BY hit_count DESC, created_at DESC, id LIMIT ?1",
        )?;
        let limit = limit.map(|n| n as i64).unwrap_or(-1);
        let rules = stmt
            .query_map([limit], |row| row_to_rule(self, row))?
            .filter_map(|r| r.map_err(|e| tracing::warn!("rule row parse: {e}")).ok())
            .collect();
        Ok(rules)
    }

    /// Rules that carry a decodable embedding: the promotion dedup set.
    pub fn list_rules_with_embeddings(&self) -> Result<Vec<Rule>, MemoryError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT * FROM rules WHERE embedding IS NOT NULL ORDER BY created_at")?;
        let rules = stmt
            .query_map([], |row| row_to_rule(self, row))?
            .filter_map(|r| r.map_err(|e| tracing::warn!("rule row parse: {e}")).ok())
            .filter(|r: &Rule| r.embedding.is_some())
            .collect();
        Ok(rules)
    }

    /// Returns false if the id does not exist.
    pub fn update_rule_hit_count(&self, id: &str, delta: i64) -> Result<bool, MemoryError> {
        let changed = self.conn()?.execute(
            "UPDATE rules SET hit_count = hit_count + ?1 WHERE id = ?2",
            params![delta, id],
        )?;
        Ok(changed > 0)
    }

    /// Delete rules that never earned their keep: fewer than `min_hits`
    /// surfacings AND created before `cutoff_ms`.
    pub fn delete_expired_rules(
        &self,
        min_hits: i64,
        cutoff_ms: i64,
    ) -> Result<usize, MemoryError> {
        let deleted = self.conn()?.execute(
            "DELETE FROM rules WHERE hit_count < ?1 AND created_at < ?2",
            params![min_hits, cutoff_ms],
        )?;
        Ok(deleted)
    }
}
