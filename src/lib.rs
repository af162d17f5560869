//! mnemon — scoped memory engine for AI coding assistants.
//! rules + learnings + heuristics, hybrid recall across global/project stores.

pub mod cleanup;
pub mod consolidate;
pub mod embed;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod privacy;
pub mod retrieval;
pub mod scope;
pub mod store;
pub mod thresholds;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use engine::MemoryEngine;
pub use retrieval::{format_for_prompt, Context, MatchType, ScoredLearning};
pub use scope::Scope;

pub type SharedStore = Arc<store::Store>;

/// Run a blocking store operation on tokio's blocking thread pool.
///
/// All synchronous store calls in async context MUST go through this
/// to avoid starving tokio worker threads.
pub async fn store_call<F, T>(store: &SharedStore, f: F) -> Result<T, error::MemoryError>
where
    F: FnOnce(&store::Store) -> T + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(&store))
        .await
        .map_err(|e| error::MemoryError::Internal(e.to_string()))
}

/// Process-wide cache in front of the embedding provider.
///
/// Bounded and time-expiring, with insertion-order (FIFO) eviction: when
/// capacity is exceeded the oldest-inserted entry goes, regardless of how
/// recently it was read. Re-inserting an existing key refreshes its vector
/// and TTL but keeps its original eviction slot. Concurrent misses for the
/// same text may both hit the provider; last write wins; the provider is
/// pure, so both writes carry the same vector.
#[derive(Clone)]
pub struct EmbedCache {
    inner: Arc<parking_lot::Mutex<EmbedCacheInner>>,
}

struct CacheSlot {
    vector: Vec<f32>,
    inserted_at: Instant,
}

struct EmbedCacheInner {
    map: HashMap<String, CacheSlot>,
    order: VecDeque<String>,
    cap: usize,
    ttl: Duration,
    hits: u64,
    misses: u64,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

impl Default for EmbedCache {
    fn default() -> Self {
        Self::new(
            thresholds::EMBED_CACHE_CAP,
            Duration::from_secs(thresholds::EMBED_CACHE_TTL_SECS),
        )
    }
}

impl EmbedCache {
    pub fn new(cap: usize, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(parking_lot::Mutex::new(EmbedCacheInner {
                map: HashMap::with_capacity(cap),
                order: VecDeque::with_capacity(cap),
                cap,
                ttl,
                hits: 0,
                misses: 0,
            })),
        }
    }

    /// Fresh entries count as hits; expired entries count as misses and are
    /// left in place for the follow-up `insert` to overwrite.
    pub fn get(&self, key: &str) -> Option<Vec<f32>> {
        let mut inner = self.inner.lock();
        let fresh = match inner.map.get(key) {
            Some(slot) if slot.inserted_at.elapsed() < inner.ttl => Some(slot.vector.clone()),
            _ => None,
        };
        if fresh.is_some() {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
        fresh
    }

    pub fn insert(&self, key: String, vector: Vec<f32>) {
        let mut inner = self.inner.lock();
        if inner.cap == 0 {
            return;
        }
        let slot = CacheSlot { vector, inserted_at: Instant::now() };
        if inner.map.insert(key.clone(), slot).is_some() {
            // known key: value and TTL refreshed, eviction slot unchanged
            return;
        }
        inner.order.push_back(key);
        if inner.order.len() > inner.cap {
            if let Some(oldest) = inner.order.pop_front() {
                inner.map.remove(&oldest);
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.map.len(),
            capacity: inner.cap,
            hits: inner.hits,
            misses: inner.misses,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().map.is_empty()
    }
}

#[cfg(test)]
mod cache_tests {
    use super::*;

    fn cache(cap: usize) -> EmbedCache {
        EmbedCache::new(cap, Duration::from_secs(60))
    }

    #[test]
    fn miss_then_hit() {
        let c = cache(4);
        assert!(c.get("a").is_none());
        c.insert("a".into(), vec![1.0, 2.0]);
        assert_eq!(c.get("a"), Some(vec![1.0, 2.0]));
        let s = c.stats();
        assert_eq!(s.hits, 1);
        assert_eq!(s.misses, 1);
    }

    #[test]
    fn evicts_oldest_inserted_not_least_recently_used() {
        let c = cache(2);
        c.insert("a".into(), vec![1.0]);
        c.insert("b".into(), vec![2.0]);
        // read "a" so an LRU cache would evict "b" next; FIFO must still evict "a"
        assert!(c.get("a").is_some());
        c.insert("c".into(), vec![3.0]);
        assert!(c.get("a").is_none(), "oldest-inserted entry must be evicted");
        assert!(c.get("b").is_some());
        assert!(c.get("c").is_some());
    }

    #[test]
    fn reinsert_keeps_eviction_slot() {
        let c = cache(2);
        c.insert("a".into(), vec![1.0]);
        c.insert("b".into(), vec![2.0]);
        c.insert("a".into(), vec![9.0]); // refresh, not a new slot
        c.insert("c".into(), vec![3.0]);
        // "a" kept its original (oldest) slot, so it is the one evicted
        assert!(c.get("a").is_none());
        assert_eq!(c.get("b"), Some(vec![2.0]));
    }

    #[test]
    fn ttl_expiry_counts_as_miss() {
        let c = EmbedCache::new(4, Duration::from_millis(5));
        c.insert("a".into(), vec![1.0]);
        std::thread::sleep(Duration::from_millis(20));
        assert!(c.get("a").is_none());
        assert_eq!(c.stats().misses, 1);
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let c = cache(0);
        c.insert("a".into(), vec![1.0]);
        assert!(c.get("a").is_none());
        assert!(c.is_empty());
    }
}
