//! The caller API: one dependency-injected context object the host's hook
//! glue drives. No process-wide registries: stores, cache, embedder and
//! throttle state all live here, so tests build isolated engines freely.
//!
//! Fail-open boundary: retrieval and record calls never surface provider
//! failures to the caller. At worst, memory context is absent for a turn.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cleanup::{run_cleanup, CleanupReport, CleanupThrottle};
use crate::consolidate::{consolidate, default_summarizer, ConsolidationReport, Summarizer};
use crate::embed::{embed_with_cache, Embedder};
use crate::error::MemoryError;
use crate::feedback::{apply_outcome, SurfacedSet};
use crate::privacy;
use crate::retrieval::{self, Context, PatternCache, ScoredLearning};
use crate::scope::{resolve_project_root, Scope};
use crate::store::{fingerprint, Category, Heuristic, Learning, Rule, Store};
use crate::{store_call, EmbedCache, SharedStore};

pub struct MemoryEngine {
    /// Active stores, project-first. The global store is always present.
    stores: Vec<SharedStore>,
    cache: EmbedCache,
    embedder: Arc<dyn Embedder>,
    patterns: parking_lot::Mutex<PatternCache>,
    surfaced: SurfacedSet,
    throttle: CleanupThrottle,
    summarizer: Summarizer,
}

impl MemoryEngine {
    pub fn new(mut stores: Vec<Store>, embedder: Arc<dyn Embedder>) -> Self {
        assert!(!stores.is_empty(), "MemoryEngine requires at least one store");
        stores.sort_by_key(|s| s.scope().rank());
        Self {
            stores: stores.into_iter().map(Arc::new).collect(),
            cache: EmbedCache::default(),
            embedder,
            patterns: parking_lot::Mutex::new(PatternCache::new()),
            surfaced: SurfacedSet::new(),
            throttle: CleanupThrottle::new(),
            summarizer: default_summarizer,
        }
    }

    /// Resolve scopes for `workdir` and open the matching stores: always
    /// the global one (`MNEMON_GLOBAL_DB`, else `$HOME/.mnemon/global.db`),
    /// plus `<project root>/.mnemon/project.db` when a project marker is
    /// found upward from `workdir`.
    pub fn open(workdir: &Path, embedder: Arc<dyn Embedder>) -> Result<Self, MemoryError> {
        let global_path = match std::env::var("MNEMON_GLOBAL_DB") {
            Ok(p) => PathBuf::from(p),
            Err(_) => {
                let home = std::env::var("HOME").map_err(|_| {
                    MemoryError::Internal(
                        "neither MNEMON_GLOBAL_DB nor HOME is set".into(),
                    )
                })?;
                PathBuf::from(home).join(".mnemon").join("global.db")
            }
        };
        if let Some(parent) = global_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MemoryError::Internal(format!("create {}: {e}", parent.display())))?;
        }

        let mut stores = Vec::with_capacity(2);
        if let Some(root) = resolve_project_root(workdir) {
            let dir = root.join(".mnemon");
            std::fs::create_dir_all(&dir)
                .map_err(|e| MemoryError::Internal(format!("create {}: {e}", dir.display())))?;
            let path = dir.join("project.db");
            stores.push(Store::open(&path.to_string_lossy(), Scope::Project)?);
            debug!(root = %root.display(), "project scope active");
        }
        stores.push(Store::open(&global_path.to_string_lossy(), Scope::Global)?);

        Ok(Self::new(stores, embedder))
    }

    /// Swap the cluster summarizer used at promotion time.
    pub fn with_summarizer(mut self, summarizer: Summarizer) -> Self {
        self.summarizer = summarizer;
        self
    }

    /// Idempotent provider warm-up.
    pub async fn init(&self) -> Result<(), MemoryError> {
        self.embedder.init().await
    }

    pub fn stores(&self) -> &[SharedStore] {
        &self.stores
    }

    pub fn store_for(&self, scope: Scope) -> &SharedStore {
        self.stores
            .iter()
            .find(|s| s.scope() == scope)
            .or_else(|| self.stores.iter().find(|s| s.scope() == Scope::Global))
            .unwrap_or(&self.stores[0])
    }

    pub fn cache_stats(&self) -> crate::CacheStats {
        self.cache.stats()
    }

    /// Build the memory context for a prompt. Read-pure: nothing is
    /// mutated, so back-to-back calls with no intervening writes return
    /// identical ordered results. A provider failure degrades the whole
    /// call to an empty context (fail-open); a single failing store only
    /// degrades its own scope.
    ///
    /// Also the lazy cleanup trigger: the first call past the throttle
    /// interval spawns an expiry pass in the background.
    pub async fn get_context(&self, prompt: &str) -> Context {
        self.maybe_spawn_cleanup();

        let (rules, learnings, heuristics) = tokio::join!(
            retrieval::fetch_rules(&self.stores),
            self.hybrid_inner(prompt),
            retrieval::match_heuristics(&self.stores, &self.patterns, prompt),
        );

        match learnings {
            Ok(learnings) => Context { rules, learnings, heuristics },
            Err(e) => {
                warn!(error = %e, "retrieval failed, returning empty context");
                Context::default()
            }
        }
    }

    /// Hybrid learning search on its own: semantic + keyword, merged and
    /// ranked. Unlike [`get_context`] this surfaces provider errors.
    pub async fn search_hybrid(&self, query: &str) -> Result<Vec<ScoredLearning>, MemoryError> {
        self.hybrid_inner(query).await
    }

    async fn hybrid_inner(&self, query: &str) -> Result<Vec<ScoredLearning>, MemoryError> {
        // the prompt is embedded exactly once per call, through the cache
        let query_emb = embed_with_cache(&self.cache, self.embedder.as_ref(), query).await?;

        let (semantic, keyword) = tokio::join!(
            retrieval::semantic_search(&self.stores, query_emb),
            retrieval::keyword_search(&self.stores, query),
        );

        let mut merged = retrieval::merge_hybrid(semantic, keyword);
        for sl in &mut merged {
            sl.learning.content = privacy::sanitize_for_output(&sl.learning.content);
        }
        retrieval::rank_learnings(&mut merged);
        Ok(merged)
    }

    /// Record that a context was injected: arms the one-shot feedback token
    /// with the surfaced learning ids and bumps each surfaced rule's
    /// hit_count.
    pub async fn mark_surfaced(&self, ctx: &Context) {
        for rule in &ctx.rules {
            let store = self.store_for(rule.scope);
            let id = rule.id.clone();
            if let Ok(Err(e)) | Err(e) =
                store_call(store, move |st| st.update_rule_hit_count(&id, 1)).await
            {
                warn!(rule = %rule.id, error = %e, "rule hit bump failed");
            }
        }
        self.surfaced.mark(ctx.learning_ids());
    }

    /// Lower-level variant for hosts that track ids themselves.
    pub fn mark_surfaced_ids(&self, ids: Vec<String>) {
        self.surfaced.mark(ids);
    }

    /// Apply an observed outcome to the last surfaced set. Consumes the
    /// token; returns how many learnings took the delta.
    pub async fn apply_outcome(&self, success: bool) -> usize {
        apply_outcome(&self.stores, &self.surfaced, success).await
    }

    /// Record an observed outcome as a learning. Privacy-screened before
    /// anything is embedded or stored; deduplicated per store on the
    /// payload fingerprint. Returns `Ok(None)` for suppressed, duplicate,
    /// or embed-failed (fail-open) writes.
    pub async fn record_learning(
        &self,
        content: &str,
        category: Category,
        payload: &serde_json::Value,
        scope: Scope,
    ) -> Result<Option<Learning>, MemoryError> {
        // serde_json renders maps with sorted keys, so the rendering, and
        // therefore the fingerprint, is stable for equal payloads
        let raw_payload = payload.to_string();
        if privacy::should_suppress(content, &raw_payload) {
            debug!("learning suppressed by privacy filter");
            return Ok(None);
        }

        let context_hash = fingerprint(&raw_payload);
        let embedding = match embed_with_cache(&self.cache, self.embedder.as_ref(), content).await
        {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "embedding failed, learning write skipped");
                return Ok(None);
            }
        };

        let store = self.store_for(scope);
        if store.scope() != scope {
            debug!(requested = %scope, "scope store unavailable, falling back to global");
        }
        let content = content.to_string();
        let learning = store_call(store, move |st| {
            st.insert_learning(&content, category, &context_hash, Some(&embedding))
        })
        .await??;
        if learning.is_none() {
            debug!("duplicate learning (same context hash), no-op");
        }
        Ok(learning)
    }

    /// Explicitly add a rule. The embedding is best-effort: a provider
    /// failure stores the rule without one (it only backs promotion dedup).
    pub async fn add_rule(&self, content: &str, scope: Scope) -> Result<Rule, MemoryError> {
        let embedding = match embed_with_cache(&self.cache, self.embedder.as_ref(), content).await
        {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(error = %e, "rule embedding failed, storing without vector");
                None
            }
        };
        let store = self.store_for(scope);
        let content = content.to_string();
        store_call(store, move |st| st.insert_rule(&content, embedding.as_deref())).await?
    }

    /// Explicitly add a heuristic. The pattern must compile; invalid
    /// patterns are rejected here rather than quarantined later.
    pub async fn add_heuristic(
        &self,
        pattern: &str,
        suggestion: &str,
        scope: Scope,
    ) -> Result<Heuristic, MemoryError> {
        regex::RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| MemoryError::Validation(format!("invalid pattern: {e}")))?;
        let store = self.store_for(scope);
        let (pattern, suggestion) = (pattern.to_string(), suggestion.to_string());
        store_call(store, move |st| st.insert_heuristic(&pattern, &suggestion)).await?
    }

    /// Cluster recent learnings and promote qualifying clusters to rules.
    pub async fn run_consolidation(
        &self,
        threshold: f64,
        min_count: usize,
    ) -> ConsolidationReport {
        consolidate(
            &self.stores,
            &self.cache,
            self.embedder.as_ref(),
            threshold,
            min_count,
            self.summarizer,
        )
        .await
    }

    /// Force an expiry pass over every active store.
    pub async fn run_cleanup(&self) -> Vec<CleanupReport> {
        let mut reports = Vec::with_capacity(self.stores.len());
        for store in &self.stores {
            reports.push(run_cleanup(store).await);
        }
        reports
    }

    fn maybe_spawn_cleanup(&self) {
        if !self.throttle.should_run() {
            return;
        }
        let stores = self.stores.clone();
        tokio::spawn(async move {
            for store in &stores {
                run_cleanup(store).await;
            }
        });
    }
}
