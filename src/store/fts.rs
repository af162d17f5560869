//! FTS5 keyword search over learnings, with query sanitization and index
//! repair.

use rusqlite::params;

use super::*;

impl Store {
    pub(super) fn fts_insert(&self, id: &str, content: &str) -> Result<(), MemoryError> {
        self.conn()?.execute(
            "INSERT INTO learnings_fts(id, content) VALUES (?1, ?2)",
            params![id, content],
        )?;
        Ok(())
    }

    /// Keyword search over learning content. Returns `(id, snippet)` pairs
    /// in BM25 order, best first. An unsanitizable query returns no hits;
    /// the caller logs and moves on, it never fails the retrieval.
    pub fn keyword_search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<KeywordHit>, MemoryError> {
        let Some(fts_query) = build_fts_query(query) else {
            return Ok(vec![]);
        };

        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, snippet(learnings_fts, 1, '', '', '…', 12) \
             FROM learnings_fts WHERE learnings_fts MATCH ?1 \
             ORDER BY rank LIMIT ?2",
        )?;
        let hits = stmt
            .query_map(params![fts_query, limit as i64], |row| {
                Ok(KeywordHit {
                    id: row.get(0)?,
                    snippet: row.get(1)?,
                })
            })?
            .filter_map(|r| r.map_err(|e| tracing::warn!("fts row parse: {e}")).ok())
            .collect();
        Ok(hits)
    }

    /// Index-vs-table consistency check.
    pub fn integrity(&self) -> IntegrityReport {
        let Ok(conn) = self.conn() else {
            return IntegrityReport::default();
        };
        let count = |sql: &str| -> usize {
            conn.query_row(sql, [], |r| r.get::<_, i64>(0))
                .map(|n| n as usize)
                .unwrap_or(0)
        };
        let learnings = count("SELECT COUNT(*) FROM learnings");
        let fts_indexed = count("SELECT COUNT(*) FROM learnings_fts");
        let orphan_fts =
            count("SELECT COUNT(*) FROM learnings_fts WHERE id NOT IN (SELECT id FROM learnings)");
        let missing_fts =
            count("SELECT COUNT(*) FROM learnings WHERE id NOT IN (SELECT id FROM learnings_fts)");
        IntegrityReport {
            learnings,
            fts_indexed,
            orphan_fts,
            missing_fts,
            ok: orphan_fts == 0 && missing_fts == 0,
        }
    }

    /// Auto-repair the FTS index: drop orphans, reindex missing rows.
    /// Returns (orphans_removed, missing_rebuilt).
    pub fn repair_fts(&self) -> Result<(usize, usize), MemoryError> {
        let conn = self.conn()?;

        let orphans = conn.execute(
            "DELETE FROM learnings_fts WHERE id NOT IN (SELECT id FROM learnings)",
            [],
        )?;

        let mut stmt = conn.prepare(
            "SELECT id, content FROM learnings WHERE id NOT IN (SELECT id FROM learnings_fts)",
        )?;
        let missing: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.map_err(|e| tracing::warn!("row parse: {e}")).ok())
            .collect();

        let rebuilt = missing.len();
        for (id, content) in &missing {
            conn.execute(
                "INSERT INTO learnings_fts(id, content) VALUES (?1, ?2)",
                params![id, content],
            )?;
        }

        if orphans > 0 || rebuilt > 0 {
            tracing::info!(orphans, rebuilt, scope = %self.scope(), "repaired FTS index");
        }
        Ok((orphans, rebuilt))
    }
}

/// Sanitize a raw query into an FTS5 MATCH expression: strip reserved
/// search syntax (quotes, stars, parens, column filters, everything
/// non-alphanumeric), lowercase, drop stopwords, OR-join the rest.
/// Returns `None` when nothing searchable remains.
pub fn build_fts_query(query: &str) -> Option<String> {
    let mut sanitized = String::with_capacity(query.len());
    for c in query.chars() {
        if c.is_alphanumeric() {
            sanitized.push(c);
        } else {
            sanitized.push(' ');
        }
    }

    let terms: Vec<String> = sanitized
        .split_whitespace()
        .map(str::to_lowercase)
        .filter(|w| !is_stopword(w))
        .collect();
    if terms.is_empty() {
        return None;
    }
    Some(terms.join(" OR "))
}

/// Ubiquitous function words that match nearly everything and add noise to
/// FTS queries. Kept minimal.
pub fn is_stopword(word: &str) -> bool {
    matches!(
        word,
        "the" | "a" | "an" | "is" | "are" | "was" | "were" | "be" | "been"
            | "and" | "or" | "but" | "in" | "on" | "at" | "to" | "for" | "of"
            | "it" | "as" | "if" | "no" | "not" | "so" | "this" | "that"
            | "do" | "i" | "how" | "what" | "my"
    )
}

#[cfg(test)]
#[path = "fts_tests.rs"]
mod tests;
