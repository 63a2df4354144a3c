//! Transient B-tree cursor.
//!
//! A [`BtrCursor`] is a position on a single latched leaf page, valid only
//! while the mini-transaction that latched the page is active. Descent
//! couples latches parent-to-child, holds interior pages only transiently,
//! and leaves exactly the requested leaf latch behind (plus the left
//! sibling's for previous-aware modes).
//!
//! Detachable positions are the persistent cursor's job; see `pcur`.

use std::cmp::Ordering;
use std::sync::Arc;

use arbor_buf::BufferPool;
use arbor_error::{ArborError, Result};
use arbor_mtr::{Latch, Mtr, PageHandle};
use arbor_types::limits::BTREE_MAX_DEPTH;
use arbor_types::record::{cmp_tuple_rec, cmp_tuple_rec_n, node_ptr_child, Tuple};
use arbor_types::{IndexPage, PageId, RecPos};
use tracing::debug;

use crate::index::Index;

// ---------------------------------------------------------------------------
// Modes
// ---------------------------------------------------------------------------

/// Search comparison mode.
///
/// Where the cursor comes to rest relative to a matching record:
/// `L` on the last record strictly less than the tuple, `Le` on the last
/// record less-or-equal, `Ge`/`Eq` on the first record greater-or-equal,
/// `G` on the first record strictly greater. When no such record exists
/// on the located leaf the cursor rests on the infimum (`L`/`Le`) or the
/// supremum (`Ge`/`Eq`/`G`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Strictly less.
    L,
    /// Less or equal.
    Le,
    /// Equality probe; positions like `Ge`.
    Eq,
    /// Greater or equal.
    Ge,
    /// Strictly greater.
    G,
}

/// Latches a cursor operation acquires and keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchMode {
    /// Detached: no latches held.
    NoLatches,
    /// Shared latch on the located leaf.
    SearchLeaf,
    /// Exclusive latch on the located leaf.
    ModifyLeaf,
    /// Shared latches on the located leaf and its left sibling.
    SearchPrev,
    /// Exclusive latches on the located leaf and its left sibling.
    ModifyPrev,
}

impl LatchMode {
    /// The latch kind taken on leaf pages.
    ///
    /// # Panics
    ///
    /// Panics for [`LatchMode::NoLatches`]: a search cannot be asked to
    /// hold nothing.
    #[must_use]
    pub fn leaf_latch(self) -> Latch {
        match self {
            Self::SearchLeaf | Self::SearchPrev => Latch::S,
            Self::ModifyLeaf | Self::ModifyPrev => Latch::X,
            Self::NoLatches => panic!("latch mode NO_LATCHES has no leaf latch kind"),
        }
    }

    /// Whether this mode also pins the left sibling of the located leaf.
    #[must_use]
    pub const fn is_prev_aware(self) -> bool {
        matches!(self, Self::SearchPrev | Self::ModifyPrev)
    }
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// A page fixed in the current mini-transaction.
#[derive(Debug, Clone, Copy)]
pub struct FixedBlock {
    pub handle: PageHandle,
    pub page_id: PageId,
}

#[derive(Debug, Clone, Copy)]
struct CursorPos {
    block: FixedBlock,
    rec: RecPos,
}

/// Transient cursor: a position on one latched leaf page.
#[derive(Debug)]
pub struct BtrCursor {
    index: Arc<Index>,
    pos: Option<CursorPos>,
    /// Left sibling pinned by the latest previous-aware search.
    left_block: Option<FixedBlock>,
}

impl BtrCursor {
    /// Create a detached cursor over `index`.
    #[must_use]
    pub fn new(index: Arc<Index>) -> Self {
        Self {
            index,
            pos: None,
            left_block: None,
        }
    }

    #[must_use]
    pub fn index(&self) -> &Arc<Index> {
        &self.index
    }

    fn pos(&self) -> &CursorPos {
        self.pos
            .as_ref()
            .expect("B-tree cursor is not positioned on a leaf")
    }

    /// The fixed block the cursor rests on.
    #[must_use]
    pub fn block(&self) -> FixedBlock {
        self.pos().block
    }

    /// Memo handle of the leaf the cursor rests on.
    #[must_use]
    pub fn handle(&self) -> PageHandle {
        self.pos().block.handle
    }

    /// In-page position.
    #[must_use]
    pub fn rec_pos(&self) -> RecPos {
        self.pos().rec
    }

    /// Whether the cursor has ever been positioned.
    #[must_use]
    pub fn is_positioned(&self) -> bool {
        self.pos.is_some()
    }

    /// Overwrite the cursor position wholesale.
    ///
    /// Used by restoration paths that have located (and latched) the page
    /// themselves.
    pub fn set_position(&mut self, handle: PageHandle, page_id: PageId, rec: RecPos) {
        self.pos = Some(CursorPos {
            block: FixedBlock { handle, page_id },
            rec,
        });
    }

    /// Re-point the in-page position without touching the block.
    pub fn set_rec_pos(&mut self, rec: RecPos) {
        self.pos
            .as_mut()
            .expect("B-tree cursor is not positioned on a leaf")
            .rec = rec;
    }

    /// Drop the position (the latches belong to the mtr, not to us).
    pub fn clear_position(&mut self) {
        self.pos = None;
        self.left_block = None;
    }

    /// Take the left sibling pinned by a previous-aware search, if any.
    pub fn take_left_block(&mut self) -> Option<FixedBlock> {
        self.left_block.take()
    }

    // -----------------------------------------------------------------------
    // Predicates and record access
    // -----------------------------------------------------------------------

    /// Whether the cursor rests on a user record (not infimum/supremum).
    #[must_use]
    pub fn is_on_user_rec(&self) -> bool {
        self.pos().rec.is_user()
    }

    /// Whether the cursor rests on the page infimum.
    #[must_use]
    pub fn is_before_first_on_page(&self) -> bool {
        self.pos().rec == RecPos::Infimum
    }

    /// Whether the cursor rests on the page supremum.
    #[must_use]
    pub fn is_after_last_on_page(&self) -> bool {
        self.pos().rec == RecPos::Supremum
    }

    /// Whether the cursor rests before every record of the whole tree.
    #[must_use]
    pub fn is_before_first_in_tree(&self, mtr: &Mtr) -> bool {
        self.is_before_first_on_page() && mtr.page(self.handle()).prev().is_none()
    }

    /// Whether the cursor rests after every record of the whole tree.
    #[must_use]
    pub fn is_after_last_in_tree(&self, mtr: &Mtr) -> bool {
        self.is_after_last_on_page() && mtr.page(self.handle()).next().is_none()
    }

    /// The record under the cursor, if it rests on a user record.
    #[must_use]
    pub fn rec<'m>(&self, mtr: &'m Mtr) -> Option<&'m [u8]> {
        match self.pos().rec {
            RecPos::User(i) => Some(mtr.page(self.handle()).rec(i)),
            RecPos::Infimum | RecPos::Supremum => None,
        }
    }

    /// Step one position toward the supremum of the current page.
    pub fn move_next_on_page(&mut self, mtr: &Mtr) {
        let next = mtr.page(self.handle()).next_pos(self.pos().rec);
        self.set_rec_pos(next);
    }

    /// Step one position toward the infimum of the current page.
    pub fn move_prev_on_page(&mut self, mtr: &Mtr) {
        let prev = mtr.page(self.handle()).prev_pos(self.pos().rec);
        self.set_rec_pos(prev);
    }

    // -----------------------------------------------------------------------
    // Search
    // -----------------------------------------------------------------------

    /// Descend from the root and position on the leaf dictated by `tuple`
    /// and `mode`, leaving the leaf latched per `latch_mode`.
    pub fn search_to_leaf(
        &mut self,
        pool: &BufferPool,
        mtr: &mut Mtr,
        tuple: &Tuple,
        mode: SearchMode,
        latch_mode: LatchMode,
    ) -> Result<()> {
        let n_uniq = self.index.n_uniq();
        let leaf = self.descend(pool, mtr, latch_mode, |page| {
            interior_child_idx(page, tuple, mode, n_uniq)
        })?;
        let rec = leaf_position(mtr.page(leaf.handle), tuple, mode);
        self.pos = Some(CursorPos { block: leaf, rec });
        Ok(())
    }

    /// Position at the leftmost or rightmost edge of the tree: on the
    /// infimum of the first leaf, or the supremum of the last.
    pub fn open_at_side(
        &mut self,
        pool: &BufferPool,
        mtr: &mut Mtr,
        leftmost: bool,
        latch_mode: LatchMode,
    ) -> Result<()> {
        let leaf = self.descend(pool, mtr, latch_mode, |page| {
            if leftmost {
                Ok(0)
            } else {
                Ok(page.n_recs() - 1)
            }
        })?;
        let rec = if leftmost {
            RecPos::Infimum
        } else {
            RecPos::Supremum
        };
        self.pos = Some(CursorPos { block: leaf, rec });
        Ok(())
    }

    /// Shared descent skeleton: walk interior levels under transient S
    /// latches with parent-child coupling, then fix the leaf under the
    /// requested protocol. `pick_child` chooses the slot to follow on an
    /// interior page.
    fn descend(
        &mut self,
        pool: &BufferPool,
        mtr: &mut Mtr,
        latch_mode: LatchMode,
        pick_child: impl Fn(&IndexPage) -> Result<usize>,
    ) -> Result<FixedBlock> {
        pool.stats().record_tree_descent();
        self.pos = None;
        self.left_block = None;
        let leaf_latch = latch_mode.leaf_latch();
        let space = self.index.space();
        let root = PageId::new(space, self.index.root());

        'restart: loop {
            let mut current = root;
            let mut parent: Option<PageHandle> = None;
            for _ in 0..BTREE_MAX_DEPTH {
                let h = mtr.fix_page(pool, current, Latch::S)?;
                if let Some(p) = parent.take() {
                    mtr.release(p);
                }
                let page = mtr.page(h);
                if page.is_leaf() {
                    match self.fix_leaf(pool, mtr, h, current, leaf_latch, latch_mode)? {
                        Some(block) => return Ok(block),
                        None => {
                            debug!(page = %current, "leaf moved during latch hand-off, re-descending");
                            continue 'restart;
                        }
                    }
                }
                if page.is_empty() {
                    mtr.release(h);
                    return Err(ArborError::corrupt(format!(
                        "interior page {current} has no node pointers"
                    )));
                }
                let child_idx = pick_child(page)?;
                let child = node_ptr_child(page.rec(child_idx))?;
                parent = Some(h);
                current = PageId::new(space, child);
            }
            return Err(ArborError::corrupt(format!(
                "descent exceeded {BTREE_MAX_DEPTH} levels"
            )));
        }
    }

    /// Finalize the leaf fix. `probe` holds an S latch on `current`.
    ///
    /// Returns `None` when the structure moved underneath the hand-off and
    /// the descent must restart.
    fn fix_leaf(
        &mut self,
        pool: &BufferPool,
        mtr: &mut Mtr,
        probe: PageHandle,
        current: PageId,
        leaf_latch: Latch,
        latch_mode: LatchMode,
    ) -> Result<Option<FixedBlock>> {
        let prev_aware = latch_mode.is_prev_aware();
        if !prev_aware && leaf_latch == Latch::S {
            return Ok(Some(FixedBlock {
                handle: probe,
                page_id: current,
            }));
        }

        let frame = Arc::clone(mtr.frame(probe));
        let clock = frame.modify_clock();
        let prev = mtr.page(probe).prev();
        mtr.release(probe);

        if !prev_aware {
            // Upgrade by re-fix: the clock check rejects any mutation that
            // slipped in between the S release and the X grant.
            let weak = Arc::downgrade(&frame);
            return Ok(mtr
                .optimistic_fix(pool, &weak, Latch::X, clock)?
                .map(|handle| FixedBlock {
                    handle,
                    page_id: current,
                }));
        }

        // Previous-aware: take the left sibling first, preserving the
        // tree-wide left-to-right latch order, then re-verify the link.
        let space = self.index.space();
        let left = match prev {
            Some(p) => {
                let left_id = PageId::new(space, p);
                let handle = mtr.fix_page(pool, left_id, leaf_latch)?;
                Some(FixedBlock {
                    handle,
                    page_id: left_id,
                })
            }
            None => None,
        };
        let handle = mtr.fix_page(pool, current, leaf_latch)?;
        let page = mtr.page(handle);
        if page.is_leaf() && page.prev() == prev {
            self.left_block = left;
            return Ok(Some(FixedBlock {
                handle,
                page_id: current,
            }));
        }
        mtr.release(handle);
        if let Some(l) = left {
            mtr.release(l.handle);
        }
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Positioning rules
// ---------------------------------------------------------------------------

/// Compare `tuple` against a record with the mode's tie-break folded in:
/// on field equality the tuple counts as *before* the record for `L`,
/// `Ge`, and `Eq`, and as *after* it for `Le` and `G`.
fn cmp_with_mode(tuple: &Tuple, rec: &[u8], mode: SearchMode) -> Ordering {
    match cmp_tuple_rec(tuple, rec) {
        Ordering::Equal => match mode {
            SearchMode::L | SearchMode::Ge | SearchMode::Eq => Ordering::Less,
            SearchMode::Le | SearchMode::G => Ordering::Greater,
        },
        other => other,
    }
}

/// Where the cursor rests on the located leaf.
pub(crate) fn leaf_position(page: &IndexPage, tuple: &Tuple, mode: SearchMode) -> RecPos {
    let idx = page
        .recs()
        .partition_point(|rec| cmp_with_mode(tuple, rec, mode) == Ordering::Greater);
    match mode {
        SearchMode::L | SearchMode::Le => {
            if idx == 0 {
                RecPos::Infimum
            } else {
                RecPos::User(idx - 1)
            }
        }
        SearchMode::Eq | SearchMode::Ge | SearchMode::G => {
            if idx == page.n_recs() {
                RecPos::Supremum
            } else {
                RecPos::User(idx)
            }
        }
    }
}

/// Which child of an interior page to descend into.
///
/// Node-pointer keys are the first record keys of their children, so on a
/// tie every mode except `L` follows the child that starts with the key;
/// `L` stays to its left.
pub(crate) fn interior_child_idx(
    page: &IndexPage,
    tuple: &Tuple,
    mode: SearchMode,
    n_key_fields: usize,
) -> Result<usize> {
    debug_assert!(!page.is_leaf());
    if page.is_empty() {
        return Err(ArborError::corrupt("interior page has no node pointers"));
    }
    let cnt = page.recs().partition_point(|sep| {
        let ord = cmp_tuple_rec_n(tuple, sep, n_key_fields);
        match mode {
            SearchMode::L => ord == Ordering::Greater,
            _ => ord != Ordering::Less,
        }
    });
    Ok(cnt.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_types::record::{encode_fields, u64_key};
    use arbor_types::IndexId;

    fn leaf_with(keys: &[u64]) -> IndexPage {
        let mut page = IndexPage::new(IndexId(7), 0);
        for (i, k) in keys.iter().enumerate() {
            page.insert_rec_at(i, encode_fields([u64_key(*k).as_slice()]));
        }
        page
    }

    fn probe(k: u64) -> Tuple {
        Tuple::from_fields(vec![u64_key(k)])
    }

    #[test]
    fn leaf_position_all_modes_on_match() {
        let page = leaf_with(&[10, 20, 30]);
        let t = probe(20);
        assert_eq!(leaf_position(&page, &t, SearchMode::Le), RecPos::User(1));
        assert_eq!(leaf_position(&page, &t, SearchMode::Ge), RecPos::User(1));
        assert_eq!(leaf_position(&page, &t, SearchMode::Eq), RecPos::User(1));
        assert_eq!(leaf_position(&page, &t, SearchMode::L), RecPos::User(0));
        assert_eq!(leaf_position(&page, &t, SearchMode::G), RecPos::User(2));
    }

    #[test]
    fn leaf_position_between_keys() {
        let page = leaf_with(&[10, 20, 30]);
        let t = probe(25);
        assert_eq!(leaf_position(&page, &t, SearchMode::Le), RecPos::User(1));
        assert_eq!(leaf_position(&page, &t, SearchMode::L), RecPos::User(1));
        assert_eq!(leaf_position(&page, &t, SearchMode::Ge), RecPos::User(2));
        assert_eq!(leaf_position(&page, &t, SearchMode::G), RecPos::User(2));
    }

    #[test]
    fn leaf_position_at_edges() {
        let page = leaf_with(&[10, 20, 30]);
        assert_eq!(
            leaf_position(&page, &probe(5), SearchMode::Le),
            RecPos::Infimum
        );
        assert_eq!(
            leaf_position(&page, &probe(5), SearchMode::Ge),
            RecPos::User(0)
        );
        assert_eq!(
            leaf_position(&page, &probe(99), SearchMode::Ge),
            RecPos::Supremum
        );
        assert_eq!(
            leaf_position(&page, &probe(99), SearchMode::Le),
            RecPos::User(2)
        );
    }

    #[test]
    fn leaf_position_empty_page() {
        let page = leaf_with(&[]);
        assert_eq!(
            leaf_position(&page, &probe(1), SearchMode::Le),
            RecPos::Infimum
        );
        assert_eq!(
            leaf_position(&page, &probe(1), SearchMode::Ge),
            RecPos::Supremum
        );
    }

    #[test]
    fn interior_descent_tie_breaks() {
        use arbor_types::record::encode_node_ptr;
        use arbor_types::PageNo;

        // Separators 10, 20, 30 pointing at children 2, 3, 4.
        let mut page = IndexPage::new(IndexId(7), 1);
        for (i, (k, child)) in [(10u64, 2u32), (20, 3), (30, 4)].iter().enumerate() {
            let key = encode_fields([u64_key(*k).as_slice()]);
            page.insert_rec_at(i, encode_node_ptr(&key, PageNo::new(*child).unwrap()));
        }

        // Equal to a separator: every mode except L follows that child.
        let t = probe(20);
        assert_eq!(interior_child_idx(&page, &t, SearchMode::Ge, 1).unwrap(), 1);
        assert_eq!(interior_child_idx(&page, &t, SearchMode::Le, 1).unwrap(), 1);
        assert_eq!(interior_child_idx(&page, &t, SearchMode::G, 1).unwrap(), 1);
        assert_eq!(interior_child_idx(&page, &t, SearchMode::L, 1).unwrap(), 0);

        // Below every separator: clamp to the first child.
        let t = probe(5);
        assert_eq!(interior_child_idx(&page, &t, SearchMode::Ge, 1).unwrap(), 0);

        // Above every separator: last child.
        let t = probe(99);
        assert_eq!(interior_child_idx(&page, &t, SearchMode::Ge, 1).unwrap(), 2);
    }

    #[test]
    fn latch_mode_leaf_latch() {
        assert_eq!(LatchMode::SearchLeaf.leaf_latch(), Latch::S);
        assert_eq!(LatchMode::SearchPrev.leaf_latch(), Latch::S);
        assert_eq!(LatchMode::ModifyLeaf.leaf_latch(), Latch::X);
        assert_eq!(LatchMode::ModifyPrev.leaf_latch(), Latch::X);
        assert!(LatchMode::SearchPrev.is_prev_aware());
        assert!(!LatchMode::ModifyLeaf.is_prev_aware());
    }
}
