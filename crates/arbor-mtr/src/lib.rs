//! Mini-transactions.
//!
//! A mini-transaction (mtr) is a scoped bundle of page latches and redo
//! records. Page latches acquired through an mtr are recorded in its
//! *memo* and released on commit in reverse acquisition order; redo
//! records accumulate and become durable-eligible at commit, when they are
//! handed to the [`RedoLog`] sink in one batch.
//!
//! All page access inside the engine flows through an mtr: the memo is
//! what makes "which latches does this operation hold" a checkable
//! question rather than a convention.

mod redo;

pub use redo::{Lsn, RedoLog, RedoRec};

use std::sync::{Arc, Weak};

use arbor_buf::{BufferPool, Frame, SGuard, XGuard};
use arbor_error::{ArborError, Result};
use arbor_types::{IndexPage, PageId};
use tracing::{debug, warn};

/// Latch kind requested from the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Latch {
    /// Shared.
    S,
    /// Exclusive.
    X,
}

/// Lifecycle state of a mini-transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MtrState {
    Active,
    Committed,
}

/// Handle to a page fixed in an mtr's memo.
///
/// Valid only for the mtr that issued it, and only until that page is
/// released or the mtr commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHandle(usize);

enum PageLatch {
    S(SGuard),
    X(XGuard),
}

struct MemoSlot {
    frame: Arc<Frame>,
    latch: PageLatch,
}

/// A mini-transaction.
pub struct Mtr {
    state: MtrState,
    memo: Vec<Option<MemoSlot>>,
    log: Vec<RedoRec>,
    sink: Option<Arc<RedoLog>>,
}

impl Mtr {
    /// Start a mini-transaction whose redo records are discarded at commit.
    #[must_use]
    pub fn start() -> Self {
        Self {
            state: MtrState::Active,
            memo: Vec::new(),
            log: Vec::new(),
            sink: None,
        }
    }

    /// Start a mini-transaction that hands its redo records to `sink` at
    /// commit.
    #[must_use]
    pub fn start_with_log(sink: Arc<RedoLog>) -> Self {
        Self {
            state: MtrState::Active,
            memo: Vec::new(),
            log: Vec::new(),
            sink: Some(sink),
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == MtrState::Active
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(ArborError::MtrNotActive)
        }
    }

    /// Number of latches currently held in the memo.
    #[must_use]
    pub fn n_latched(&self) -> usize {
        self.memo.iter().flatten().count()
    }

    // -----------------------------------------------------------------------
    // Fixing pages
    // -----------------------------------------------------------------------

    /// Latch a page and record the fix in the memo.
    pub fn fix_page(&mut self, pool: &BufferPool, id: PageId, latch: Latch) -> Result<PageHandle> {
        self.ensure_active()?;
        let frame = pool.frame(id)?;
        let latch = match latch {
            Latch::S => PageLatch::S(frame.s_latch()),
            Latch::X => PageLatch::X(frame.x_latch()),
        };
        Ok(self.push_slot(MemoSlot { frame, latch }))
    }

    /// Latch a freshly allocated frame and record the fix.
    pub fn fix_frame(&mut self, frame: Arc<Frame>, latch: Latch) -> Result<PageHandle> {
        self.ensure_active()?;
        let latch = match latch {
            Latch::S => PageLatch::S(frame.s_latch()),
            Latch::X => PageLatch::X(frame.x_latch()),
        };
        Ok(self.push_slot(MemoSlot { frame, latch }))
    }

    /// Optimistic re-acquire of a frame remembered by a detached cursor.
    ///
    /// Latches the frame and verifies its modify clock equals
    /// `expected_clock`. On success the fix is recorded in the memo; on
    /// failure (frame evicted or clock moved) nothing is held and `None`
    /// is returned.
    pub fn optimistic_fix(
        &mut self,
        pool: &BufferPool,
        frame: &Weak<Frame>,
        latch: Latch,
        expected_clock: u64,
    ) -> Result<Option<PageHandle>> {
        self.ensure_active()?;
        let Some(frame) = frame.upgrade() else {
            pool.stats().record_optimistic(false);
            return Ok(None);
        };
        let latch = match latch {
            Latch::S => match pool.optimistic_s_fix(&frame, expected_clock) {
                Some(guard) => PageLatch::S(guard),
                None => return Ok(None),
            },
            Latch::X => match pool.optimistic_x_fix(&frame, expected_clock) {
                Some(guard) => PageLatch::X(guard),
                None => return Ok(None),
            },
        };
        Ok(Some(self.push_slot(MemoSlot { frame, latch })))
    }

    fn push_slot(&mut self, slot: MemoSlot) -> PageHandle {
        self.memo.push(Some(slot));
        PageHandle(self.memo.len() - 1)
    }

    fn slot(&self, h: PageHandle) -> &MemoSlot {
        self.memo
            .get(h.0)
            .and_then(Option::as_ref)
            .expect("page handle is stale: page released or mtr committed")
    }

    // -----------------------------------------------------------------------
    // Page access
    // -----------------------------------------------------------------------

    /// Read access to a fixed page.
    ///
    /// # Panics
    ///
    /// Panics on a stale handle; a stale handle is a latching bug, not a
    /// recoverable condition.
    #[must_use]
    pub fn page(&self, h: PageHandle) -> &IndexPage {
        match &self.slot(h).latch {
            PageLatch::S(guard) => guard,
            PageLatch::X(guard) => guard,
        }
    }

    /// Write access to an X-fixed page. Bumps the frame's modify clock.
    ///
    /// # Panics
    ///
    /// Panics on a stale handle or if the page is held under an S latch.
    pub fn page_mut(&mut self, h: PageHandle) -> &mut IndexPage {
        let slot = self
            .memo
            .get_mut(h.0)
            .and_then(Option::as_mut)
            .expect("page handle is stale: page released or mtr committed");
        match &mut slot.latch {
            PageLatch::S(_) => panic!("page_mut on a page fixed with only an S latch"),
            PageLatch::X(guard) => {
                slot.frame.bump_modify_clock();
                guard
            }
        }
    }

    /// The frame behind a fixed page.
    #[must_use]
    pub fn frame(&self, h: PageHandle) -> &Arc<Frame> {
        &self.slot(h).frame
    }

    /// The page id behind a handle.
    #[must_use]
    pub fn page_id(&self, h: PageHandle) -> PageId {
        self.slot(h).frame.id()
    }

    /// The latch kind a handle holds.
    #[must_use]
    pub fn latch_kind(&self, h: PageHandle) -> Latch {
        match self.slot(h).latch {
            PageLatch::S(_) => Latch::S,
            PageLatch::X(_) => Latch::X,
        }
    }

    /// Whether the memo holds a fix of at least `latch` strength on `frame`.
    ///
    /// An X fix satisfies a query for an S fix.
    #[must_use]
    pub fn memo_contains(&self, frame: &Arc<Frame>, latch: Latch) -> bool {
        self.memo.iter().flatten().any(|slot| {
            Arc::ptr_eq(&slot.frame, frame)
                && match (latch, &slot.latch) {
                    (Latch::S, _) | (Latch::X, PageLatch::X(_)) => true,
                    (Latch::X, PageLatch::S(_)) => false,
                }
        })
    }

    /// Release a single page latch before commit.
    ///
    /// The slot is tombstoned; the handle becomes stale.
    pub fn release(&mut self, h: PageHandle) {
        let slot = self
            .memo
            .get_mut(h.0)
            .expect("page handle out of range");
        assert!(slot.is_some(), "double release of page handle");
        *slot = None;
    }

    // -----------------------------------------------------------------------
    // Redo records
    // -----------------------------------------------------------------------

    /// Append a redo record to this mtr's log.
    pub fn log_rec(&mut self, rec: RedoRec) {
        debug_assert!(self.is_active());
        self.log.push(rec);
    }

    /// Redo records accumulated so far.
    #[must_use]
    pub fn log_recs(&self) -> &[RedoRec] {
        &self.log
    }

    // -----------------------------------------------------------------------
    // Commit
    // -----------------------------------------------------------------------

    /// Commit: release all latches in reverse acquisition order and hand
    /// the redo records to the sink.
    pub fn commit(&mut self) {
        assert!(self.is_active(), "commit of a committed mini-transaction");
        let n_latches = self.n_latched();
        while let Some(slot) = self.memo.pop() {
            // Guards drop here, newest first.
            drop(slot);
        }
        let records = std::mem::take(&mut self.log);
        let n_records = records.len();
        if let Some(sink) = &self.sink {
            sink.append_batch(records);
        }
        self.state = MtrState::Committed;
        debug!(n_latches, n_records, "mtr commit");
    }

    /// Re-arm a committed mtr for another round of work.
    pub fn start_again(&mut self) {
        assert!(
            !self.is_active(),
            "start_again on an active mini-transaction"
        );
        self.state = MtrState::Active;
        self.memo.clear();
    }

    /// Commit and immediately start again, keeping the redo sink.
    pub fn restart(&mut self) {
        self.commit();
        self.start_again();
    }
}

impl Drop for Mtr {
    fn drop(&mut self) {
        if self.is_active() && self.n_latched() > 0 {
            warn!(
                n_latches = self.n_latched(),
                "mini-transaction dropped while active; releasing latches"
            );
        }
    }
}

impl std::fmt::Debug for Mtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mtr")
            .field("state", &self.state)
            .field("n_latched", &self.n_latched())
            .field("n_log_recs", &self.log.len())
            .finish()
    }
}
