//! Time-boxed expiry of rules, learnings and heuristics.
//!
//! Three independent deletions per store; each failure degrades to a zero
//! count for its category. Invocation is throttled per process: at most
//! once per interval, triggered lazily by the first retrieval call past
//! the interval; there is no background timer.

use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::{info, warn};

use crate::scope::Scope;
use crate::store::now_ms;
use crate::thresholds::{
    CLEANUP_INTERVAL_MS, HEURISTIC_EXPIRY_MS, LEARNING_EXPIRY_MS, RULE_EXPIRY_MS, RULE_MIN_HITS,
};
use crate::{store_call, SharedStore};

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CleanupReport {
    pub scope: Scope,
    pub rules_deleted: usize,
    pub learnings_deleted: usize,
    pub heuristics_deleted: usize,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.rules_deleted + self.learnings_deleted + self.heuristics_deleted
    }
}

/// Expire stale data in one store. Rules go when they are both cold
/// (hit_count below minimum) and old; learnings and heuristics go on age
/// alone; a learning's utility_score does not rescue it.
pub async fn run_cleanup(store: &SharedStore) -> CleanupReport {
    let now = now_ms();
    let scope = store.scope();

    let rule_cutoff = now - RULE_EXPIRY_MS;
    let learning_cutoff = now - LEARNING_EXPIRY_MS;
    let heuristic_cutoff = now - HEURISTIC_EXPIRY_MS;

    let rules_deleted = match store_call(store, move |st| {
        st.delete_expired_rules(RULE_MIN_HITS, rule_cutoff)
    })
    .await
    {
        Ok(Ok(n)) => n,
        Ok(Err(e)) | Err(e) => {
            warn!(scope = %scope, error = %e, "rule cleanup failed");
            0
        }
    };

    let learnings_deleted =
        match store_call(store, move |st| st.delete_expired_learnings(learning_cutoff)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) | Err(e) => {
                warn!(scope = %scope, error = %e, "learning cleanup failed");
                0
            }
        };

    let heuristics_deleted = match store_call(store, move |st| {
        st.delete_expired_heuristics(heuristic_cutoff)
    })
    .await
    {
        Ok(Ok(n)) => n,
        Ok(Err(e)) | Err(e) => {
            warn!(scope = %scope, error = %e, "heuristic cleanup failed");
            0
        }
    };

    let report = CleanupReport { scope, rules_deleted, learnings_deleted, heuristics_deleted };
    if report.total() > 0 {
        info!(
            scope = %scope,
            rules = rules_deleted,
            learnings = learnings_deleted,
            heuristics = heuristics_deleted,
            "cleanup removed expired records"
        );
    }
    report
}

/// Per-process cleanup gate. `should_run` flips to true at most once per
/// interval; the compare-exchange keeps concurrent retrieval calls from
/// both winning the slot.
pub struct CleanupThrottle {
    last_run_ms: AtomicI64,
}

impl Default for CleanupThrottle {
    fn default() -> Self {
        Self::new()
    }
}

impl CleanupThrottle {
    /// A fresh throttle fires on the first check: a newly started process
    /// gets one cleanup on its first retrieval.
    pub fn new() -> Self {
        Self { last_run_ms: AtomicI64::new(0) }
    }

    pub fn should_run(&self) -> bool {
        let now = now_ms();
        let last = self.last_run_ms.load(Ordering::Acquire);
        if now - last < CLEANUP_INTERVAL_MS {
            return false;
        }
        self.last_run_ms
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn last_run(&self) -> Option<i64> {
        match self.last_run_ms.load(Ordering::Acquire) {
            0 => None,
            ms => Some(ms),
        }
    }
}
