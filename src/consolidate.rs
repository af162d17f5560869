//! Consolidation: cluster recent similar learnings and promote qualifying
//! clusters into rules.
//!
//! Clustering is single-link to the seed only: a learning joins the first
//! cluster whose seed it is similar enough to. Membership is
//! similarity-to-seed, not all-pairs, so transitive chains are not
//! guaranteed: two members may be unalike as long as both resemble the
//! seed. The O(n²) pass is acceptable while the lookback window bounds n.

use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::embed::{cosine_similarity, embed_with_cache, Embedder};
use crate::error::MemoryError;
use crate::scope::Scope;
use crate::store::{now_ms, Learning, Rule};
use crate::thresholds::{CONSOLIDATION_LOOKBACK_MS, PROMOTE_DEDUP_SIM};
use crate::{store_call, EmbedCache, SharedStore};

/// A group of similar recent learnings. The seed is the earliest member,
/// the one every other member was measured against.
#[derive(Debug, Clone)]
pub struct LearningCluster {
    pub members: Vec<Learning>,
}

impl LearningCluster {
    pub fn seed(&self) -> &Learning {
        &self.members[0]
    }

    /// Scope that contributed the majority of members; ties go to global,
    /// the wider-visibility choice.
    pub fn dominant_scope(&self) -> Scope {
        let project = self
            .members
            .iter()
            .filter(|m| m.scope == Scope::Project)
            .count();
        if project * 2 > self.members.len() {
            Scope::Project
        } else {
            Scope::Global
        }
    }
}

/// Derives rule content from a cluster. Pluggable: the default builds a
/// labeled summary from the seed; a host can swap in an LLM-backed one.
pub type Summarizer = fn(&LearningCluster) -> String;

pub fn default_summarizer(cluster: &LearningCluster) -> String {
    let seed = cluster.seed();
    let label = match seed.category {
        crate::store::Category::Success => "worked repeatedly",
        crate::store::Category::Failure => "failed repeatedly",
    };
    format!(
        "Pattern across {} similar outcomes ({label}): {}",
        cluster.members.len(),
        seed.content
    )
}

#[derive(Debug, Default, serde::Serialize)]
pub struct ConsolidationReport {
    pub clustered_learnings: usize,
    pub clusters: usize,
    pub promoted: usize,
    pub skipped_duplicates: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub promoted_ids: Vec<String>,
}

/// Gather learnings created within the lookback window across all stores
/// and cluster them by cosine similarity to each cluster's seed.
///
/// Learnings are visited oldest-first (creation order, stable across
/// stores); the first unassigned learning seeds a cluster, and every later
/// unassigned learning joins it when `cos(seed, it) >= threshold`. Only
/// clusters with at least `min_count` members are returned.
pub async fn find_emergent_patterns(
    stores: &[SharedStore],
    threshold: f64,
    min_count: usize,
) -> Vec<LearningCluster> {
    let since = now_ms() - CONSOLIDATION_LOOKBACK_MS;
    let futs = stores
        .iter()
        .map(|s| store_call(s, move |st| st.list_learnings(Some(since))));
    let results = futures::future::join_all(futs).await;

    let mut recent: Vec<Learning> = Vec::new();
    for (store, res) in stores.iter().zip(results) {
        match res {
            Ok(Ok(ls)) => recent.extend(ls),
            Ok(Err(e)) | Err(e) => {
                warn!(scope = %store.scope(), error = %e, "learning fetch failed, scope degraded");
            }
        }
    }
    recent.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    let embeddable: Vec<&Learning> = recent.iter().filter(|l| l.embedding.is_some()).collect();
    if embeddable.len() < recent.len() {
        debug!(
            skipped = recent.len() - embeddable.len(),
            "learnings without embeddings excluded from clustering"
        );
    }

    let n = embeddable.len();
    let mut assigned = vec![false; n];
    let mut clusters: Vec<LearningCluster> = Vec::new();

    for i in 0..n {
        if assigned[i] {
            continue;
        }
        assigned[i] = true;
        let seed_emb = embeddable[i].embedding.as_deref().unwrap_or(&[]);
        let mut members = vec![embeddable[i].clone()];
        for j in (i + 1)..n {
            if assigned[j] {
                continue;
            }
            let emb = embeddable[j].embedding.as_deref().unwrap_or(&[]);
            if cosine_similarity(seed_emb, emb) >= threshold {
                assigned[j] = true;
                members.push(embeddable[j].clone());
            }
        }
        if members.len() >= min_count {
            clusters.push(LearningCluster { members });
        }
    }

    debug!(
        window = recent.len(),
        clusters = clusters.len(),
        threshold,
        min_count,
        "emergent pattern scan"
    );
    clusters
}

/// Promote a cluster into a rule in the target scope's store.
///
/// The candidate rule is embedded (through the cache) and compared against
/// existing rule embeddings first; a near-duplicate above
/// `PROMOTE_DEDUP_SIM` skips the promotion, so repeated runs over
/// overlapping windows don't mint the same rule twice. Returns the new
/// rule, or `None` when deduplicated.
pub async fn promote_to_rule(
    store: &SharedStore,
    cache: &EmbedCache,
    embedder: &dyn Embedder,
    cluster: &LearningCluster,
    summarize: Summarizer,
) -> Result<Option<Rule>, MemoryError> {
    let content = summarize(cluster);
    let embedding = embed_with_cache(cache, embedder, &content).await?;

    let existing = store_call(store, |st| st.list_rules_with_embeddings()).await??;
    for rule in &existing {
        if let Some(emb) = rule.embedding.as_deref() {
            let sim = cosine_similarity(&embedding, emb);
            if sim >= PROMOTE_DEDUP_SIM {
                debug!(
                    existing = %rule.id,
                    sim,
                    "promotion skipped, near-duplicate rule exists"
                );
                return Ok(None);
            }
        }
    }

    let rule = store_call(store, move |st| st.insert_rule(&content, Some(&embedding))).await??;
    info!(rule = %rule.id, scope = %rule.scope, members = cluster.members.len(), "cluster promoted to rule");
    Ok(Some(rule))
}

/// Full consolidation pass: cluster, then promote each qualifying cluster
/// into its dominant scope. Per-cluster failures degrade (logged, the rest
/// proceed).
pub async fn consolidate(
    stores: &[SharedStore],
    cache: &EmbedCache,
    embedder: &dyn Embedder,
    threshold: f64,
    min_count: usize,
    summarize: Summarizer,
) -> ConsolidationReport {
    let clusters = find_emergent_patterns(stores, threshold, min_count).await;

    let by_scope: HashMap<Scope, &SharedStore> =
        stores.iter().map(|s| (s.scope(), s)).collect();

    let mut report = ConsolidationReport {
        clusters: clusters.len(),
        clustered_learnings: clusters.iter().map(|c| c.members.len()).sum(),
        ..Default::default()
    };

    for cluster in &clusters {
        let scope = cluster.dominant_scope();
        // fall back to global when no store exists for the dominant scope
        let store = by_scope
            .get(&scope)
            .or_else(|| by_scope.get(&Scope::Global))
            .copied();
        let Some(store) = store else { continue };
        match promote_to_rule(store, cache, embedder, cluster, summarize).await {
            Ok(Some(rule)) => {
                report.promoted += 1;
                report.promoted_ids.push(rule.id);
            }
            Ok(None) => report.skipped_duplicates += 1,
            Err(e) => warn!(error = %e, "cluster promotion failed"),
        }
    }

    if report.promoted > 0 || report.skipped_duplicates > 0 {
        info!(
            clusters = report.clusters,
            promoted = report.promoted,
            skipped = report.skipped_duplicates,
            "consolidation finished"
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Category;

    fn member(id: &str, scope: Scope) -> Learning {
        Learning {
            id: id.into(),
            content: format!("learning {id}"),
            category: Category::Failure,
            embedding: Some(vec![1.0, 0.0]),
            created_at: 1,
            context_hash: id.into(),
            utility_score: 1.0,
            scope,
        }
    }

    #[test]
    fn dominant_scope_majority() {
        let cluster = LearningCluster {
            members: vec![
                member("a", Scope::Project),
                member("b", Scope::Project),
                member("c", Scope::Global),
            ],
        };
        assert_eq!(cluster.dominant_scope(), Scope::Project);
    }

    #[test]
    fn dominant_scope_tie_goes_global() {
        let cluster = LearningCluster {
            members: vec![member("a", Scope::Project), member("b", Scope::Global)],
        };
        assert_eq!(cluster.dominant_scope(), Scope::Global);
    }

    #[test]
    fn default_summarizer_labels_category_and_count() {
        let cluster = LearningCluster {
            members: vec![member("a", Scope::Global), member("b", Scope::Global)],
        };
        let text = default_summarizer(&cluster);
        assert!(text.contains("2 similar outcomes"));
        assert!(text.contains("failed repeatedly"));
        assert!(text.contains("learning a"), "seed content should appear");
    }
}
