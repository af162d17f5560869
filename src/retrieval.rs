//! Hybrid context retrieval: rules + learnings + heuristics merged across
//! scoped stores.
//!
//! Every store query inside a merge fans out concurrently; a failing store
//! contributes nothing and is logged, never raised. Merging and ordering
//! are explicit and deterministic, so the result never depends on task
//! completion order.

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::embed::cosine_similarity;
use crate::scope::Scope;
use crate::store::{build_fts_query, Category, Heuristic, Learning, Rule};
use crate::thresholds::{
    HYBRID_BOOST, KEYWORD_CONFIDENCE, KEYWORD_PER_STORE_CAP, MAX_CONTEXT_LEARNINGS,
    MAX_CONTEXT_RULES, SCOPE_BIAS_MARGIN, SEMANTIC_THRESHOLD,
};
use crate::{store_call, SharedStore};

/// How a learning earned its place in the result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Semantic,
    Keyword,
    Hybrid,
}

/// A learning with its merged retrieval score. `score` is always the raw
/// merged score; the scope bias used for ranking never shows up here.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredLearning {
    pub learning: Learning,
    pub score: f64,
    pub match_type: MatchType,
}

/// The output of one retrieval call. Transient, never persisted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Context {
    pub rules: Vec<Rule>,
    pub learnings: Vec<ScoredLearning>,
    pub heuristics: Vec<Heuristic>,
}

impl Context {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.learnings.is_empty() && self.heuristics.is_empty()
    }

    /// Ids of the learnings in this context, in rank order. The feedback
    /// loop consumes these.
    pub fn learning_ids(&self) -> Vec<String> {
        self.learnings.iter().map(|sl| sl.learning.id.clone()).collect()
    }
}

/// Fetch rules from every store and merge: project-scoped rules first
/// (by hit_count desc), then global ones, truncated to the context cap.
pub(crate) async fn fetch_rules(stores: &[SharedStore]) -> Vec<Rule> {
    let futs = stores
        .iter()
        .map(|s| store_call(s, |st| st.list_rules(None)));
    let results = futures::future::join_all(futs).await;

    let mut merged: Vec<Rule> = Vec::new();
    for (store, res) in stores.iter().zip(results) {
        match res {
            Ok(Ok(rules)) => merged.extend(rules),
            Ok(Err(e)) | Err(e) => {
                warn!(scope = %store.scope(), error = %e, "rule fetch failed, scope degraded");
            }
        }
    }

    merged.sort_by(|a, b| {
        a.scope
            .rank()
            .cmp(&b.scope.rank())
            .then_with(|| b.hit_count.cmp(&a.hit_count))
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    merged.truncate(MAX_CONTEXT_RULES);
    merged
}

/// Semantic leg of hybrid search: exhaustive cosine against every stored
/// learning, thresholded.
pub(crate) async fn semantic_search(
    stores: &[SharedStore],
    query_emb: Vec<f32>,
) -> Vec<(Learning, f64)> {
    let futs = stores.iter().map(|s| {
        let q = query_emb.clone();
        store_call(s, move |st| {
            let learnings = st.list_learnings_with_embeddings()?;
            let scored = learnings
                .into_iter()
                .filter_map(|l| {
                    let sim = cosine_similarity(&q, l.embedding.as_deref()?);
                    (sim >= SEMANTIC_THRESHOLD).then_some((l, sim))
                })
                .collect::<Vec<_>>();
            Ok::<_, crate::error::MemoryError>(scored)
        })
    });
    let results = futures::future::join_all(futs).await;

    let mut out = Vec::new();
    for (store, res) in stores.iter().zip(results) {
        match res {
            Ok(Ok(scored)) => out.extend(scored),
            Ok(Err(e)) | Err(e) => {
                warn!(scope = %store.scope(), error = %e, "semantic search failed, scope degraded");
            }
        }
    }
    out
}

/// Keyword leg of hybrid search: sanitized FTS match, capped per store,
/// resolved back to full learning rows.
pub(crate) async fn keyword_search(stores: &[SharedStore], query: &str) -> Vec<Learning> {
    if build_fts_query(query).is_none() {
        debug!("query sanitized to nothing, keyword search skipped");
        return vec![];
    }

    let futs = stores.iter().map(|s| {
        let q = query.to_string();
        store_call(s, move |st| {
            let hits = st.keyword_search(&q, KEYWORD_PER_STORE_CAP)?;
            let mut learnings = Vec::with_capacity(hits.len());
            for hit in hits {
                if let Some(l) = st.get_learning(&hit.id)? {
                    learnings.push(l);
                }
            }
            Ok::<_, crate::error::MemoryError>(learnings)
        })
    });
    let results = futures::future::join_all(futs).await;

    let mut out = Vec::new();
    for (store, res) in stores.iter().zip(results) {
        match res {
            Ok(Ok(learnings)) => out.extend(learnings),
            Ok(Err(e)) | Err(e) => {
                warn!(scope = %store.scope(), error = %e, "keyword search failed, scope degraded");
            }
        }
    }
    out
}

/// Union the two legs by learning id. An id seen by one leg keeps that
/// leg's tag and score; an id seen by both becomes `hybrid` with
/// `min(1.0, semantic + boost)`.
pub(crate) fn merge_hybrid(
    semantic: Vec<(Learning, f64)>,
    keyword: Vec<Learning>,
) -> Vec<ScoredLearning> {
    let mut by_id: HashMap<String, ScoredLearning> = HashMap::new();
    for (learning, sim) in semantic {
        by_id.insert(
            learning.id.clone(),
            ScoredLearning { learning, score: sim, match_type: MatchType::Semantic },
        );
    }
    for learning in keyword {
        match by_id.get_mut(&learning.id) {
            Some(existing) => {
                existing.match_type = MatchType::Hybrid;
                existing.score = (existing.score + HYBRID_BOOST).min(1.0);
            }
            None => {
                by_id.insert(
                    learning.id.clone(),
                    ScoredLearning {
                        learning,
                        score: KEYWORD_CONFIDENCE,
                        match_type: MatchType::Keyword,
                    },
                );
            }
        }
    }
    by_id.into_values().collect()
}

/// Ranking key: raw score plus a small project-scope margin. The bias
/// lives only here; the stored score stays raw (reported confidence is
/// never inflated).
fn sort_key(sl: &ScoredLearning) -> f64 {
    let bias = match sl.learning.scope {
        Scope::Project => SCOPE_BIAS_MARGIN,
        Scope::Global => 0.0,
    };
    sl.score + bias
}

/// Deterministic multi-key ordering: biased score desc, then recency desc,
/// then id. `total_cmp` keeps the sort total even for pathological floats.
pub(crate) fn rank_learnings(items: &mut Vec<ScoredLearning>) {
    items.sort_by(|a, b| {
        sort_key(b)
            .total_cmp(&sort_key(a))
            .then_with(|| b.learning.created_at.cmp(&a.learning.created_at))
            .then_with(|| a.learning.id.cmp(&b.learning.id))
    });
    items.truncate(MAX_CONTEXT_LEARNINGS);
}

/// Compiled heuristic patterns, keyed by heuristic id. Heuristics are
/// immutable after creation, so a compiled pattern never goes stale; rows
/// that fail to compile are quarantined instead of failing the scan.
#[derive(Default)]
pub struct PatternCache {
    compiled: HashMap<String, Regex>,
    disabled: HashSet<String>,
}

impl PatternCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile-once lookup. Returns `None` for quarantined patterns.
    fn get(&mut self, heuristic: &Heuristic) -> Option<&Regex> {
        if self.disabled.contains(&heuristic.id) {
            return None;
        }
        if !self.compiled.contains_key(&heuristic.id) {
            match RegexBuilder::new(&heuristic.pattern)
                .case_insensitive(true)
                .build()
            {
                Ok(re) => {
                    self.compiled.insert(heuristic.id.clone(), re);
                }
                Err(e) => {
                    warn!(
                        heuristic = %heuristic.id,
                        pattern = %heuristic.pattern,
                        error = %e,
                        "invalid heuristic pattern quarantined"
                    );
                    self.disabled.insert(heuristic.id.clone());
                    return None;
                }
            }
        }
        self.compiled.get(&heuristic.id)
    }

    pub fn disabled_count(&self) -> usize {
        self.disabled.len()
    }
}

/// Match heuristics against the prompt, project stores before global,
/// deduplicated by pattern text (first match wins, so project-scope
/// heuristics shadow identically-patterned global ones).
pub(crate) async fn match_heuristics(
    stores: &[SharedStore],
    cache: &parking_lot::Mutex<PatternCache>,
    prompt: &str,
) -> Vec<Heuristic> {
    let futs = stores
        .iter()
        .map(|s| store_call(s, |st| st.list_heuristics()));
    let results = futures::future::join_all(futs).await;

    let mut per_store: Vec<Vec<Heuristic>> = Vec::with_capacity(stores.len());
    for (store, res) in stores.iter().zip(results) {
        match res {
            Ok(Ok(hs)) => per_store.push(hs),
            Ok(Err(e)) | Err(e) => {
                warn!(scope = %store.scope(), error = %e, "heuristic fetch failed, scope degraded");
                per_store.push(vec![]);
            }
        }
    }
    // stores are held project-first, so flattening preserves shadowing order
    let mut matched = Vec::new();
    let mut seen_patterns: HashSet<String> = HashSet::new();
    let mut cache = cache.lock();
    for heuristic in per_store.into_iter().flatten() {
        let Some(re) = cache.get(&heuristic) else { continue };
        if !re.is_match(prompt) {
            continue;
        }
        if seen_patterns.insert(heuristic.pattern.clone()) {
            matched.push(heuristic);
        }
    }
    matched
}

fn scope_tag(scope: Scope) -> &'static str {
    match scope {
        // global is the implicit default and stays unmarked
        Scope::Project => " [project]",
        Scope::Global => "",
    }
}

/// Deterministic, pure rendering of a context for prompt injection.
pub fn format_for_prompt(ctx: &Context) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    if !ctx.rules.is_empty() {
        out.push_str("## Golden Rules\n");
        for rule in &ctx.rules {
            let _ = writeln!(out, "- {}{}", rule.content, scope_tag(rule.scope));
        }
    }
    if !ctx.learnings.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str("## Relevant Past Experiences\n");
        for sl in &ctx.learnings {
            let marker = match sl.learning.category {
                Category::Success => '✓',
                Category::Failure => '✗',
            };
            let pct = (sl.score * 100.0).round() as i64;
            let _ = writeln!(
                out,
                "- [{marker}] ({pct}%) {}{}",
                sl.learning.content,
                scope_tag(sl.learning.scope)
            );
        }
    }
    if !ctx.heuristics.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str("## Applicable Heuristics\n");
        for h in &ctx.heuristics {
            let _ = writeln!(out, "- {}{}", h.suggestion, scope_tag(h.scope));
        }
    }
    out
}
