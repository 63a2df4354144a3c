//! A single buffer-pool frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arbor_types::{IndexPage, PageId};
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};

/// Shared (S) latch guard over a frame's page.
pub type SGuard = ArcRwLockReadGuard<RawRwLock, IndexPage>;

/// Exclusive (X) latch guard over a frame's page.
pub type XGuard = ArcRwLockWriteGuard<RawRwLock, IndexPage>;

/// An in-memory page frame.
///
/// The latch guards the page content; the modify clock is written only
/// while the X latch is held and read for optimistic purposes only after
/// some latch on the frame has been acquired.
#[derive(Debug)]
pub struct Frame {
    id: PageId,
    latch: Arc<RwLock<IndexPage>>,
    modify_clock: AtomicU64,
}

impl Frame {
    pub(crate) fn new(id: PageId, page: IndexPage) -> Self {
        Self {
            id,
            latch: Arc::new(RwLock::new(page)),
            modify_clock: AtomicU64::new(0),
        }
    }

    /// The page this frame holds.
    #[must_use]
    pub fn id(&self) -> PageId {
        self.id
    }

    /// Acquire the shared latch, blocking until granted.
    #[must_use]
    pub fn s_latch(&self) -> SGuard {
        self.latch.read_arc()
    }

    /// Acquire the exclusive latch, blocking until granted.
    #[must_use]
    pub fn x_latch(&self) -> XGuard {
        self.latch.write_arc()
    }

    /// Current modify-clock value.
    ///
    /// Meaningful only while the caller holds a latch on this frame; an
    /// unlatched read may race with a writer mid-mutation.
    #[must_use]
    pub fn modify_clock(&self) -> u64 {
        self.modify_clock.load(Ordering::Acquire)
    }

    /// Bump the modify clock. The caller must hold the X latch.
    pub fn bump_modify_clock(&self) {
        self.modify_clock.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_types::{IndexId, PageNo, SpaceId};

    fn frame() -> Frame {
        let id = PageId::new(SpaceId(0), PageNo::FIRST);
        Frame::new(id, IndexPage::new(IndexId(1), 0))
    }

    #[test]
    fn clock_starts_at_zero_and_bumps() {
        let f = frame();
        assert_eq!(f.modify_clock(), 0);
        {
            let _x = f.x_latch();
            f.bump_modify_clock();
            f.bump_modify_clock();
        }
        assert_eq!(f.modify_clock(), 2);
    }

    #[test]
    fn shared_latches_coexist() {
        let f = frame();
        let a = f.s_latch();
        let b = f.s_latch();
        assert!(a.is_leaf());
        assert!(b.is_leaf());
    }

    #[test]
    fn x_latch_excludes_s() {
        let f = frame();
        let x = f.x_latch();
        assert!(f.latch.try_read().is_none());
        drop(x);
        assert!(f.latch.try_read().is_some());
    }
}
