//! Outcome feedback: the surfaced-ids token and additive utility deltas.
//!
//! The caller records which learning ids were last surfaced; when a later
//! outcome lands, every id in that set gets a fixed ±delta. The set is a
//! one-shot token, consumed on apply, so a single surfacing is never
//! credited or penalized twice.

use tracing::debug;

use crate::thresholds::FEEDBACK_DELTA;
use crate::{store_call, SharedStore};

/// One-shot record of the most recently surfaced learning ids. Marking
/// again before an outcome arrives replaces the previous set; feedback
/// always applies to the latest surfacing.
#[derive(Default)]
pub struct SurfacedSet {
    inner: parking_lot::Mutex<Option<Vec<String>>>,
}

impl SurfacedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, ids: Vec<String>) {
        *self.inner.lock() = Some(ids);
    }

    /// Consume the token. Subsequent takes return `None` until the next mark.
    pub fn take(&self) -> Option<Vec<String>> {
        self.inner.lock().take()
    }

    pub fn is_armed(&self) -> bool {
        self.inner.lock().is_some()
    }
}

/// Apply the outcome delta to every marked learning, in whichever store
/// holds it. Returns the number of learnings actually updated. A missing
/// id (e.g. expired between surfacing and outcome) is skipped silently;
/// a row deleted mid-flight simply doesn't take the delta.
pub async fn apply_outcome(
    stores: &[SharedStore],
    surfaced: &SurfacedSet,
    success: bool,
) -> usize {
    let Some(ids) = surfaced.take() else {
        debug!("no surfaced set armed, outcome dropped");
        return 0;
    };
    let delta = if success { FEEDBACK_DELTA } else { -FEEDBACK_DELTA };

    let mut applied = 0;
    for id in ids {
        for store in stores {
            let id2 = id.clone();
            match store_call(store, move |st| st.update_learning_utility(&id2, delta)).await {
                Ok(Ok(true)) => {
                    applied += 1;
                    break;
                }
                Ok(Ok(false)) => continue,
                Ok(Err(e)) | Err(e) => {
                    tracing::warn!(scope = %store.scope(), error = %e, "utility update failed");
                }
            }
        }
    }
    debug!(applied, delta, "feedback applied");
    applied
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_one_shot() {
        let set = SurfacedSet::new();
        assert!(!set.is_armed());
        set.mark(vec!["a".into(), "b".into()]);
        assert!(set.is_armed());
        assert_eq!(set.take(), Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(set.take(), None);
        assert!(!set.is_armed());
    }

    #[test]
    fn remark_replaces_previous_set() {
        let set = SurfacedSet::new();
        set.mark(vec!["a".into()]);
        set.mark(vec!["b".into()]);
        assert_eq!(set.take(), Some(vec!["b".to_string()]));
    }
}
