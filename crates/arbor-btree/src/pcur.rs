//! The persistent cursor.
//!
//! A [`PersistentCursor`] wraps a transient [`BtrCursor`] with a stored
//! logical position, so a caller can park its place in an index, commit
//! the mini-transaction that latched the leaf, and pick the scan back up
//! under a fresh one — even if the leaf has split, merged, or shed the
//! record in the meantime.
//!
//! The stored position is an owned copy of the record's ordering prefix
//! plus how the cursor sat relative to it ([`RelPos`]), and a weak
//! reference to the leaf frame with its modify clock at store time.
//! Restoration first tries the cheap path (re-latch the same frame, check
//! the clock); only when a writer has touched the page does it pay for a
//! full descent, re-searching by prefix with a tie-break mode chosen so
//! that range scans neither miss nor repeat rows.
//!
//! Contract violations (storing an unpositioned cursor, restoring with no
//! stored position, stepping off an unlatched page) are caller bugs: they
//! log the full cursor state and abort.

use std::sync::{Arc, Weak};

use arbor_buf::{BufferPool, Frame};
use arbor_error::Result;
use arbor_mtr::{Latch, Mtr};
use arbor_types::record::{cmp_rec_rec, cmp_tuple_rec, copy_order_prefix, RecPrefix, Tuple};
use arbor_types::{PageId, RecPos, TrxId};
use tracing::{debug, error};

use crate::cursor::{BtrCursor, LatchMode, SearchMode};
use crate::index::Index;

// ---------------------------------------------------------------------------
// State enums
// ---------------------------------------------------------------------------

/// Lifecycle state of a persistent cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PosState {
    /// Never positioned, or closed.
    NotPositioned,
    /// On a latched page; the embedded B-tree cursor is live.
    IsPositioned,
    /// Detached: no latches held, position recoverable from the stored
    /// prefix.
    WasPositioned,
}

/// How the stored prefix relates to the true logical position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelPos {
    /// The cursor was on the record the prefix was copied from.
    On,
    /// The cursor was just before it (page infimum at store time).
    Before,
    /// The cursor was just after it (page supremum at store time).
    After,
    /// Empty-tree sentinel: before everything.
    BeforeFirstInTree,
    /// Empty-tree sentinel: after everything.
    AfterLastInTree,
}

/// Whether the stored prefix is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OldStored {
    Stored,
    NotStored,
}

// ---------------------------------------------------------------------------
// PersistentCursor
// ---------------------------------------------------------------------------

/// A detachable cursor over one index.
#[derive(Debug)]
pub struct PersistentCursor {
    btr: BtrCursor,
    latch_mode: LatchMode,
    pos_state: PosState,
    rel_pos: RelPos,
    old_stored: OldStored,
    /// Ordering prefix of the record the position was stored against.
    old_rec: RecPrefix,
    old_n_fields: usize,
    /// Leaf frame identity at store time; revalidated via the modify
    /// clock, never dereferenced blindly.
    block_when_stored: Weak<Frame>,
    modify_clock: u64,
    /// The caller's search mode, preserved across restoration.
    search_mode: SearchMode,
    /// Diagnostics only; printed when a contract violation aborts.
    trx_if_known: Option<TrxId>,
}

impl PersistentCursor {
    /// Create a detached cursor over `index`.
    #[must_use]
    pub fn new(index: Arc<Index>) -> Self {
        Self {
            btr: BtrCursor::new(index),
            latch_mode: LatchMode::NoLatches,
            pos_state: PosState::NotPositioned,
            rel_pos: RelPos::On,
            old_stored: OldStored::NotStored,
            old_rec: RecPrefix::new(),
            old_n_fields: 0,
            block_when_stored: Weak::new(),
            modify_clock: 0,
            search_mode: SearchMode::Ge,
            trx_if_known: None,
        }
    }

    #[cold]
    fn die(&self, what: &str) -> ! {
        error!(cursor = ?self, "persistent cursor contract violation: {what}");
        panic!("persistent cursor contract violation: {what}");
    }

    #[cold]
    fn die_corrupt(&self, what: &str) -> ! {
        error!(cursor = ?self, "index tree corrupt: {what}");
        panic!("index tree corrupt: {what}");
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn index(&self) -> &Arc<Index> {
        self.btr.index()
    }

    #[must_use]
    pub fn pos_state(&self) -> PosState {
        self.pos_state
    }

    #[must_use]
    pub fn latch_mode(&self) -> LatchMode {
        self.latch_mode
    }

    #[must_use]
    pub fn rel_pos(&self) -> RelPos {
        self.rel_pos
    }

    #[must_use]
    pub fn old_stored(&self) -> OldStored {
        self.old_stored
    }

    #[must_use]
    pub fn search_mode(&self) -> SearchMode {
        self.search_mode
    }

    /// The stored ordering prefix (empty for tree sentinels).
    #[must_use]
    pub fn stored_prefix(&self) -> &[u8] {
        &self.old_rec
    }

    #[must_use]
    pub fn stored_n_fields(&self) -> usize {
        self.old_n_fields
    }

    /// Attach a transaction id for diagnostics.
    pub fn set_trx(&mut self, trx: TrxId) {
        self.trx_if_known = Some(trx);
    }

    #[must_use]
    pub fn trx_if_known(&self) -> Option<TrxId> {
        self.trx_if_known
    }

    /// The embedded transient cursor.
    #[must_use]
    pub fn btr(&self) -> &BtrCursor {
        &self.btr
    }

    /// The record under the cursor, if it rests on a user record.
    #[must_use]
    pub fn rec<'m>(&self, mtr: &'m Mtr) -> Option<&'m [u8]> {
        self.btr.rec(mtr)
    }

    #[must_use]
    pub fn is_on_user_rec(&self) -> bool {
        self.btr.is_on_user_rec()
    }

    #[must_use]
    pub fn is_before_first_on_page(&self) -> bool {
        self.btr.is_before_first_on_page()
    }

    #[must_use]
    pub fn is_after_last_on_page(&self) -> bool {
        self.btr.is_after_last_on_page()
    }

    #[must_use]
    pub fn is_before_first_in_tree(&self, mtr: &Mtr) -> bool {
        self.btr.is_before_first_in_tree(mtr)
    }

    #[must_use]
    pub fn is_after_last_in_tree(&self, mtr: &Mtr) -> bool {
        self.btr.is_after_last_in_tree(mtr)
    }

    // -----------------------------------------------------------------------
    // Opening
    // -----------------------------------------------------------------------

    /// Open by searching the index, leaving the located leaf latched.
    pub fn open(
        &mut self,
        pool: &BufferPool,
        mtr: &mut Mtr,
        tuple: &Tuple,
        mode: SearchMode,
        latch_mode: LatchMode,
    ) -> Result<()> {
        self.btr.search_to_leaf(pool, mtr, tuple, mode, latch_mode)?;
        self.pos_state = PosState::IsPositioned;
        self.latch_mode = latch_mode;
        self.search_mode = mode;
        self.old_stored = OldStored::NotStored;
        Ok(())
    }

    /// Open on the first user record satisfying a greater-than search,
    /// skipping over the supremum of the located leaf if necessary.
    ///
    /// The less-than modes are not part of this operation's contract.
    pub fn open_on_user_rec(
        &mut self,
        pool: &BufferPool,
        mtr: &mut Mtr,
        tuple: &Tuple,
        mode: SearchMode,
        latch_mode: LatchMode,
    ) -> Result<()> {
        if !matches!(mode, SearchMode::Ge | SearchMode::G) {
            self.die("open_on_user_rec supports only the greater-than modes");
        }
        self.open(pool, mtr, tuple, mode, latch_mode)?;
        if self.btr.is_after_last_on_page() {
            let _ = self.move_to_next_user_rec(pool, mtr)?;
        }
        Ok(())
    }

    /// Open at the leftmost or rightmost edge of the index.
    pub fn open_at_index_side(
        &mut self,
        pool: &BufferPool,
        mtr: &mut Mtr,
        leftmost: bool,
        latch_mode: LatchMode,
    ) -> Result<()> {
        self.btr.open_at_side(pool, mtr, leftmost, latch_mode)?;
        self.pos_state = PosState::IsPositioned;
        self.latch_mode = latch_mode;
        self.old_stored = OldStored::NotStored;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Store / restore
    // -----------------------------------------------------------------------

    /// Store the cursor's logical position so it can be restored under a
    /// future mini-transaction, surviving splits, merges, and relocation
    /// of the record.
    ///
    /// On an empty tree only a sentinel is recorded; otherwise the
    /// ordering prefix of the nearest user record is copied along with
    /// the frame identity and its modify clock.
    pub fn store_position(&mut self, mtr: &Mtr) {
        if self.pos_state != PosState::IsPositioned {
            self.die("store_position on a cursor that is not positioned");
        }
        if self.latch_mode == LatchMode::NoLatches {
            self.die("store_position without page latches");
        }
        let block = self.btr.block();
        let frame = mtr.frame(block.handle);
        if !mtr.memo_contains(frame, Latch::S) {
            self.die("store_position: current block is not fixed in the mtr memo");
        }
        let page = mtr.page(block.handle);

        if page.is_empty() {
            // Only the lone leaf of an empty tree may be empty here; an
            // empty page inside a populated tree belongs to purge.
            if page.next().is_some() || page.prev().is_some() {
                self.die_corrupt("empty page with siblings at store time");
            }
            self.old_stored = OldStored::Stored;
            self.rel_pos = if self.btr.is_after_last_on_page() {
                RelPos::AfterLastInTree
            } else {
                RelPos::BeforeFirstInTree
            };
            self.old_rec.clear();
            self.old_n_fields = 0;
            // Sentinel restores always re-search; no clock is recorded.
            return;
        }

        let (idx, rel_pos) = match self.btr.rec_pos() {
            RecPos::Supremum => (page.n_recs() - 1, RelPos::After),
            RecPos::Infimum => (0, RelPos::Before),
            RecPos::User(i) => (i, RelPos::On),
        };
        let n_fields = self.btr.index().n_uniq();
        let mut buf = std::mem::take(&mut self.old_rec);
        if copy_order_prefix(page.rec(idx), n_fields, &mut buf).is_err() {
            self.die_corrupt("user record carries fewer fields than the ordering prefix");
        }
        self.old_rec = buf;
        self.old_n_fields = n_fields;
        self.rel_pos = rel_pos;
        self.old_stored = OldStored::Stored;
        self.block_when_stored = Arc::downgrade(frame);
        self.modify_clock = frame.modify_clock();
    }

    /// Restore a stored position under `latch_mode` and a (typically new)
    /// mini-transaction.
    ///
    /// Returns `true` iff the position was stored on a user record and
    /// restoration landed on a user record whose ordering fields equal the
    /// stored prefix. On a miss the cursor re-stores wherever it landed,
    /// so a subsequent restore resumes from the new neighborhood.
    pub fn restore_position(
        &mut self,
        latch_mode: LatchMode,
        pool: &BufferPool,
        mtr: &mut Mtr,
    ) -> Result<bool> {
        if self.old_stored != OldStored::Stored
            || !matches!(
                self.pos_state,
                PosState::WasPositioned | PosState::IsPositioned
            )
        {
            self.die("restore_position without a stored position");
        }

        if matches!(
            self.rel_pos,
            RelPos::BeforeFirstInTree | RelPos::AfterLastInTree
        ) {
            // Tree sentinels never restore optimistically: open at the
            // matching edge of the (still possibly empty) tree.
            let leftmost = self.rel_pos == RelPos::BeforeFirstInTree;
            self.btr.open_at_side(pool, mtr, leftmost, latch_mode)?;
            self.latch_mode = latch_mode;
            self.pos_state = PosState::IsPositioned;
            self.block_when_stored = Arc::downgrade(mtr.frame(self.btr.handle()));
            return Ok(false);
        }

        if self.old_rec.is_empty() || self.old_n_fields == 0 {
            self.die("stored position has no ordering prefix");
        }

        if matches!(latch_mode, LatchMode::SearchLeaf | LatchMode::ModifyLeaf) {
            // Optimistic: re-latch the remembered frame and trust the
            // in-page position iff the modify clock has not moved.
            if let Some(h) = mtr.optimistic_fix(
                pool,
                &self.block_when_stored,
                latch_mode.leaf_latch(),
                self.modify_clock,
            )? {
                let page_id = mtr.page_id(h);
                let rec = self.btr.rec_pos();
                self.btr.set_position(h, page_id, rec);
                self.pos_state = PosState::IsPositioned;
                self.latch_mode = latch_mode;
                debug!(page = %page_id, "optimistic cursor restore");
                if self.rel_pos == RelPos::On {
                    debug_assert_eq!(
                        cmp_rec_rec(
                            &self.old_rec,
                            self.btr.rec(mtr).expect("position was stored on a user record"),
                            self.old_n_fields,
                        ),
                        std::cmp::Ordering::Equal,
                        "unchanged page no longer holds the stored record"
                    );
                    return Ok(true);
                }
                return Ok(false);
            }
        }

        // Pessimistic: re-search from the root. The mode encodes how the
        // prefix relates to the logical position, which is what lets a
        // range scan resume without missing or repeating rows.
        let tuple = Tuple::from_rec_prefix(&self.old_rec, self.old_n_fields)?;
        let mode = match self.rel_pos {
            RelPos::On => SearchMode::Le,
            RelPos::After => SearchMode::G,
            RelPos::Before => SearchMode::L,
            RelPos::BeforeFirstInTree | RelPos::AfterLastInTree => unreachable!(),
        };
        let saved_search_mode = self.search_mode;
        self.search_mode = mode;
        self.btr.search_to_leaf(pool, mtr, &tuple, mode, latch_mode)?;
        self.pos_state = PosState::IsPositioned;
        self.latch_mode = latch_mode;
        self.search_mode = saved_search_mode;

        if self.rel_pos == RelPos::On
            && self.btr.is_on_user_rec()
            && self
                .btr
                .rec(mtr)
                .map(|rec| cmp_tuple_rec(&tuple, rec))
                == Some(std::cmp::Ordering::Equal)
        {
            // Same logical record, possibly on a different page: refresh
            // the frame identity and clock, keep the prefix.
            let frame = mtr.frame(self.btr.handle());
            self.block_when_stored = Arc::downgrade(frame);
            self.modify_clock = frame.modify_clock();
            debug!(page = %mtr.page_id(self.btr.handle()), "pessimistic cursor restore hit");
            return Ok(true);
        }

        // The stored record is gone, or the position was relative to a
        // neighbor: remember where we actually landed instead.
        self.store_position(mtr);
        Ok(false)
    }

    // -----------------------------------------------------------------------
    // Latch hand-off
    // -----------------------------------------------------------------------

    /// Release the leaf latch, leaving the cursor detached but restorable.
    ///
    /// Under `ModifyLeaf` the caller must not have pending changes to the
    /// leaf in this mini-transaction; those may only be released by commit.
    pub fn release_leaf(&mut self, mtr: &mut Mtr) {
        if self.pos_state != PosState::IsPositioned || self.latch_mode == LatchMode::NoLatches {
            self.die("release_leaf on a cursor that holds no leaf latch");
        }
        mtr.release(self.btr.handle());
        self.latch_mode = LatchMode::NoLatches;
        self.pos_state = PosState::WasPositioned;
    }

    /// Commit the caller's mini-transaction through the cursor, moving it
    /// to the detached state in the same step.
    pub fn commit_specify_mtr(&mut self, mtr: &mut Mtr) {
        if self.pos_state != PosState::IsPositioned {
            self.die("commit_specify_mtr on a cursor that is not positioned");
        }
        self.latch_mode = LatchMode::NoLatches;
        mtr.commit();
        self.pos_state = PosState::WasPositioned;
    }

    /// Return the cursor to the detached, empty state.
    pub fn close(&mut self) {
        self.old_rec = RecPrefix::new();
        self.old_n_fields = 0;
        self.old_stored = OldStored::NotStored;
        self.latch_mode = LatchMode::NoLatches;
        self.pos_state = PosState::NotPositioned;
        self.block_when_stored = Weak::new();
        self.btr.clear_position();
    }

    // -----------------------------------------------------------------------
    // Stepping
    // -----------------------------------------------------------------------

    /// Step one position forward within the current page.
    pub fn move_to_next_on_page(&mut self, mtr: &Mtr) {
        self.old_stored = OldStored::NotStored;
        self.btr.move_next_on_page(mtr);
    }

    /// Step one position backward within the current page.
    pub fn move_to_prev_on_page(&mut self, mtr: &Mtr) {
        self.old_stored = OldStored::NotStored;
        self.btr.move_prev_on_page(mtr);
    }

    /// Advance to the next user record, crossing page boundaries as
    /// needed. Returns `false` at the end of the index, leaving the
    /// cursor after the last record.
    pub fn move_to_next_user_rec(&mut self, pool: &BufferPool, mtr: &mut Mtr) -> Result<bool> {
        if self.pos_state != PosState::IsPositioned {
            self.die("move_to_next_user_rec on a cursor that is not positioned");
        }
        self.old_stored = OldStored::NotStored;
        loop {
            if self.btr.is_after_last_on_page() {
                if self.btr.is_after_last_in_tree(mtr) {
                    return Ok(false);
                }
                self.move_to_next_page(pool, mtr)?;
            } else {
                self.btr.move_next_on_page(mtr);
            }
            if self.btr.is_on_user_rec() {
                return Ok(true);
            }
        }
    }

    /// Step back to the previous user record, crossing page boundaries
    /// via the store-commit-restore protocol when needed. Returns `false`
    /// at the start of the index.
    pub fn move_to_prev_user_rec(&mut self, pool: &BufferPool, mtr: &mut Mtr) -> Result<bool> {
        if self.pos_state != PosState::IsPositioned {
            self.die("move_to_prev_user_rec on a cursor that is not positioned");
        }
        self.old_stored = OldStored::NotStored;
        loop {
            if self.btr.is_before_first_on_page() {
                if self.btr.is_before_first_in_tree(mtr) {
                    return Ok(false);
                }
                self.move_backward_from_page(pool, mtr)?;
            } else {
                self.btr.move_prev_on_page(mtr);
            }
            if self.btr.is_on_user_rec() {
                return Ok(true);
            }
        }
    }

    /// Cross to the right sibling of the current leaf.
    ///
    /// The cursor must rest on the supremum with the sibling present; it
    /// ends before the first user record of the sibling, with the old
    /// leaf's latch released.
    pub fn move_to_next_page(&mut self, pool: &BufferPool, mtr: &mut Mtr) -> Result<()> {
        if self.pos_state != PosState::IsPositioned || self.latch_mode == LatchMode::NoLatches {
            self.die("move_to_next_page on a cursor without latches");
        }
        debug_assert!(self.btr.is_after_last_on_page());
        self.old_stored = OldStored::NotStored;

        let block = self.btr.block();
        let (next_no, format) = {
            let page = mtr.page(block.handle);
            (page.next(), page.format())
        };
        let Some(next_no) = next_no else {
            self.die("move_to_next_page at the end of the index");
        };
        let next_id = PageId::new(self.btr.index().space(), next_no);
        let next_h = mtr.fix_page(pool, next_id, self.latch_mode.leaf_latch())?;
        {
            let next_page = mtr.page(next_h);
            if next_page.format() != format {
                self.die_corrupt("sibling pages disagree on record format");
            }
            if next_page.prev() != Some(block.page_id.page_no) {
                self.die_corrupt("right sibling's back-pointer does not reference this page");
            }
        }
        mtr.release(block.handle);
        self.btr.set_position(next_h, next_id, RecPos::Infimum);
        Ok(())
    }

    /// Cross to the left sibling of the current leaf.
    ///
    /// Latching the left sibling directly would invert the tree's
    /// left-to-right latch order, so this stores the position, commits
    /// and restarts the mini-transaction, and restores under a
    /// previous-aware latch mode that pins the left sibling during the
    /// search. The cursor ends on the last user record of the page
    /// preceding the one it left.
    pub fn move_backward_from_page(&mut self, pool: &BufferPool, mtr: &mut Mtr) -> Result<()> {
        if self.pos_state != PosState::IsPositioned || self.latch_mode == LatchMode::NoLatches {
            self.die("move_backward_from_page on a cursor without latches");
        }
        debug_assert!(self.btr.is_before_first_on_page());
        debug_assert!(!self.btr.is_before_first_in_tree(mtr));

        let latch_mode = self.latch_mode;
        let prev_latch_mode = match latch_mode {
            LatchMode::SearchLeaf => LatchMode::SearchPrev,
            LatchMode::ModifyLeaf => LatchMode::ModifyPrev,
            _ => self.die("move_backward_from_page needs a plain leaf latch mode"),
        };

        self.store_position(mtr);
        mtr.restart();
        self.restore_position(prev_latch_mode, pool, mtr)?;

        let prev_no = mtr.page(self.btr.handle()).prev();
        if prev_no.is_some() {
            if self.btr.is_before_first_on_page() {
                // Landed on the infimum again: the left sibling pinned by
                // the previous-aware search is exactly the page we want.
                let Some(left) = self.btr.take_left_block() else {
                    self.die_corrupt("previous-aware restore did not pin the left sibling");
                };
                mtr.release(self.btr.handle());
                let pos = mtr.page(left.handle).last_user_pos();
                self.btr.set_position(left.handle, left.page_id, pos);
            } else if let Some(left) = self.btr.take_left_block() {
                // Landed elsewhere; the left-sibling latch is dead weight.
                mtr.release(left.handle);
            }
        }

        self.latch_mode = latch_mode;
        self.old_stored = OldStored::NotStored;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Copying
    // -----------------------------------------------------------------------

    /// Copy `src`'s stored position into `dst`, which must be a cursor
    /// over the same index. `dst` ends detached (`WasPositioned`) with its
    /// own copy of the prefix; no latches are transferred.
    pub fn copy_stored_position(dst: &mut Self, src: &Self) {
        assert_eq!(
            dst.btr.index().id(),
            src.btr.index().id(),
            "copy_stored_position across different indexes"
        );
        if src.old_stored != OldStored::Stored {
            src.die("copy_stored_position from a cursor with no stored position");
        }
        dst.old_rec.clear();
        dst.old_rec.extend_from_slice(&src.old_rec);
        dst.old_n_fields = src.old_n_fields;
        dst.rel_pos = src.rel_pos;
        dst.old_stored = OldStored::Stored;
        dst.block_when_stored = src.block_when_stored.clone();
        dst.modify_clock = src.modify_clock;
        dst.search_mode = src.search_mode;
        dst.trx_if_known = src.trx_if_known;
        if src.btr.is_positioned() {
            dst.btr
                .set_position(src.btr.handle(), src.btr.block().page_id, src.btr.rec_pos());
        }
        dst.pos_state = PosState::WasPositioned;
        dst.latch_mode = LatchMode::NoLatches;
    }
}
