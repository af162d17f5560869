/// Tunables for retrieval, feedback, consolidation and expiry.
///
/// Scores live in [0, 1]; time constants are unix milliseconds unless noted.

/// Semantic hits below this cosine score are dropped from hybrid search.
pub const SEMANTIC_THRESHOLD: f64 = 0.70;

/// Fixed confidence assigned to keyword-only matches. High, but below a
/// strong semantic hit: an exact term match is a reliable signal without
/// telling us how related the surrounding content is.
pub const KEYWORD_CONFIDENCE: f64 = 0.80;

/// Added to the semantic score when keyword search confirms the same id.
pub const HYBRID_BOOST: f64 = 0.15;

/// Sort-key bias for project-scoped learnings. Affects ordering only; the
/// reported score stays raw.
pub const SCOPE_BIAS_MARGIN: f64 = 0.05;

/// Context caps after merging across stores.
pub const MAX_CONTEXT_RULES: usize = 10;
pub const MAX_CONTEXT_LEARNINGS: usize = 10;

/// Per-store cap on keyword search results.
pub const KEYWORD_PER_STORE_CAP: usize = 10;

/// Additive utility delta per observed outcome (+success / −failure).
pub const FEEDBACK_DELTA: f64 = 0.1;

/// Only learnings created within this window are eligible for clustering.
/// Bounds the O(n²) similarity pass.
pub const CONSOLIDATION_LOOKBACK_MS: i64 = 7 * 86_400_000;

/// Skip promoting a cluster whose derived rule is this similar to an
/// existing rule in the target store.
pub const PROMOTE_DEDUP_SIM: f64 = 0.85;

/// Rules need this many surfacings to survive past RULE_EXPIRY_MS.
pub const RULE_MIN_HITS: i64 = 3;
pub const RULE_EXPIRY_MS: i64 = 30 * 86_400_000;

/// Learnings expire on age alone; utility does not rescue them.
pub const LEARNING_EXPIRY_MS: i64 = 14 * 86_400_000;

pub const HEURISTIC_EXPIRY_MS: i64 = 90 * 86_400_000;

/// Cleanup runs at most once per interval per process, triggered lazily
/// from the first retrieval call past the interval.
pub const CLEANUP_INTERVAL_MS: i64 = 24 * 3_600_000;

/// Embedding cache bounds.
pub const EMBED_CACHE_CAP: usize = 256;
pub const EMBED_CACHE_TTL_SECS: u64 = 3_600;

/// Input limits, enforced at insert.
pub const MAX_CONTENT_LEN: usize = 8192;
pub const MAX_PATTERN_LEN: usize = 512;
