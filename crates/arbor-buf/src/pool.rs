//! The buffer pool proper.

use std::collections::HashMap;
use std::sync::Arc;

use arbor_error::{ArborError, Result};
use arbor_types::{IndexPage, PageId, PageNo, SpaceId};
use parking_lot::Mutex;
use tracing::debug;

use crate::frame::Frame;
use crate::stats::PoolStats;

/// Buffer pool mapping [`PageId`] to resident frames.
///
/// Frames are shared via `Arc`; detached cursors keep only `Weak`
/// references and revalidate through the modify clock before trusting
/// anything they remember about a frame.
#[derive(Debug)]
pub struct BufferPool {
    frames: Mutex<HashMap<PageId, Arc<Frame>>>,
    next_page: Mutex<HashMap<SpaceId, u32>>,
    max_frames: usize,
    stats: PoolStats,
}

impl BufferPool {
    /// Create a pool admitting at most `max_frames` resident frames.
    #[must_use]
    pub fn new(max_frames: usize) -> Self {
        Self {
            frames: Mutex::new(HashMap::new()),
            next_page: Mutex::new(HashMap::new()),
            max_frames,
            stats: PoolStats::default(),
        }
    }

    /// Pool activity counters.
    #[must_use]
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Look up the frame for a page.
    ///
    /// The returned `Arc` is a buffer-fix in spirit: holding it keeps the
    /// frame alive, but grants no access to the page content without a
    /// latch.
    pub fn frame(&self, id: PageId) -> Result<Arc<Frame>> {
        self.stats.record_fix();
        self.frames
            .lock()
            .get(&id)
            .cloned()
            .ok_or(ArborError::PageNotFound {
                space: id.space.0,
                page: id.page_no.get(),
            })
    }

    /// Whether a page is resident.
    #[must_use]
    pub fn contains(&self, id: PageId) -> bool {
        self.frames.lock().contains_key(&id)
    }

    /// Number of resident frames.
    #[must_use]
    pub fn n_frames(&self) -> usize {
        self.frames.lock().len()
    }

    /// Allocate the next page of a space and admit a frame holding `page`.
    pub fn alloc_page(&self, space: SpaceId, page: IndexPage) -> Result<Arc<Frame>> {
        let mut frames = self.frames.lock();
        if frames.len() >= self.max_frames {
            return Err(ArborError::PoolExhausted {
                frames: frames.len(),
            });
        }
        let page_no = {
            let mut next = self.next_page.lock();
            let slot = next.entry(space).or_insert(1);
            let n = *slot;
            *slot += 1;
            PageNo::new(n).ok_or_else(|| ArborError::internal("page counter wrapped"))?
        };
        let id = PageId::new(space, page_no);
        let frame = Arc::new(Frame::new(id, page));
        frames.insert(id, Arc::clone(&frame));
        debug!(page = %id, "allocated page");
        Ok(frame)
    }

    /// Optimistic re-acquire: latch `frame` and verify its modify clock.
    ///
    /// Succeeds only when the clock still equals `expected_clock`; on a
    /// mismatch the just-taken latch is dropped immediately and `None` is
    /// returned.
    #[must_use]
    pub fn optimistic_s_fix(
        &self,
        frame: &Arc<Frame>,
        expected_clock: u64,
    ) -> Option<crate::frame::SGuard> {
        let guard = frame.s_latch();
        if frame.modify_clock() == expected_clock {
            self.stats.record_optimistic(true);
            Some(guard)
        } else {
            self.stats.record_optimistic(false);
            debug!(page = %frame.id(), "optimistic fix failed: clock moved");
            None
        }
    }

    /// Exclusive-latch flavor of [`Self::optimistic_s_fix`].
    #[must_use]
    pub fn optimistic_x_fix(
        &self,
        frame: &Arc<Frame>,
        expected_clock: u64,
    ) -> Option<crate::frame::XGuard> {
        let guard = frame.x_latch();
        if frame.modify_clock() == expected_clock {
            self.stats.record_optimistic(true);
            Some(guard)
        } else {
            self.stats.record_optimistic(false);
            debug!(page = %frame.id(), "optimistic fix failed: clock moved");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_types::IndexId;

    fn leaf() -> IndexPage {
        IndexPage::new(IndexId(1), 0)
    }

    #[test]
    fn alloc_numbers_pages_per_space() {
        let pool = BufferPool::new(16);
        let a = pool.alloc_page(SpaceId(0), leaf()).unwrap();
        let b = pool.alloc_page(SpaceId(0), leaf()).unwrap();
        let c = pool.alloc_page(SpaceId(1), leaf()).unwrap();
        assert_eq!(a.id().page_no.get(), 1);
        assert_eq!(b.id().page_no.get(), 2);
        assert_eq!(c.id().page_no.get(), 1);
        assert_eq!(pool.n_frames(), 3);
    }

    #[test]
    fn frame_lookup_and_missing_page() {
        let pool = BufferPool::new(16);
        let f = pool.alloc_page(SpaceId(0), leaf()).unwrap();
        let again = pool.frame(f.id()).unwrap();
        assert!(Arc::ptr_eq(&f, &again));

        let missing = PageId::new(SpaceId(0), PageNo::new(99).unwrap());
        let err = pool.frame(missing).unwrap_err();
        assert!(matches!(err, ArborError::PageNotFound { page: 99, .. }));
    }

    #[test]
    fn pool_exhaustion() {
        let pool = BufferPool::new(1);
        pool.alloc_page(SpaceId(0), leaf()).unwrap();
        let err = pool.alloc_page(SpaceId(0), leaf()).unwrap_err();
        assert!(matches!(err, ArborError::PoolExhausted { frames: 1 }));
    }

    #[test]
    fn optimistic_fix_honors_clock() {
        let pool = BufferPool::new(16);
        let f = pool.alloc_page(SpaceId(0), leaf()).unwrap();
        let clock = f.modify_clock();

        assert!(pool.optimistic_s_fix(&f, clock).is_some());

        {
            let _x = f.x_latch();
            f.bump_modify_clock();
        }
        assert!(pool.optimistic_s_fix(&f, clock).is_none());
        assert!(pool.optimistic_x_fix(&f, clock + 1).is_some());

        let snap = pool.stats().snapshot();
        assert_eq!(snap.optimistic_hits, 2);
        assert_eq!(snap.optimistic_misses, 1);
    }
}
