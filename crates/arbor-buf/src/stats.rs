//! Buffer pool counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters for pool activity.
///
/// `optimistic_hits`/`optimistic_misses` split the outcomes of the
/// re-latch-and-check-clock fast path; `tree_descents` counts full
/// root-to-leaf searches, which lets tests observe whether a cursor
/// restoration took the fast path or fell through to a re-search.
#[derive(Debug, Default)]
pub struct PoolStats {
    fixes: AtomicU64,
    optimistic_hits: AtomicU64,
    optimistic_misses: AtomicU64,
    tree_descents: AtomicU64,
}

impl PoolStats {
    pub(crate) fn record_fix(&self) {
        self.fixes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an optimistic re-acquire outcome.
    pub fn record_optimistic(&self, hit: bool) {
        if hit {
            self.optimistic_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.optimistic_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record one full root-to-leaf descent.
    pub fn record_tree_descent(&self) {
        self.tree_descents.fetch_add(1, Ordering::Relaxed);
    }

    /// Consistent point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            fixes: self.fixes.load(Ordering::Relaxed),
            optimistic_hits: self.optimistic_hits.load(Ordering::Relaxed),
            optimistic_misses: self.optimistic_misses.load(Ordering::Relaxed),
            tree_descents: self.tree_descents.load(Ordering::Relaxed),
        }
    }
}

/// Plain-value snapshot of [`PoolStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatsSnapshot {
    pub fixes: u64,
    pub optimistic_hits: u64,
    pub optimistic_misses: u64,
    pub tree_descents: u64,
}
