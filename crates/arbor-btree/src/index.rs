//! Index trees: metadata, creation, and structural mutation.
//!
//! The root page of an index never relocates: a root split moves the
//! records into two fresh children and rewrites the root in place as an
//! interior page, so `Index::root` stays valid for the index's lifetime.
//!
//! Mutations latch the whole descent path exclusively and hold it until
//! the operation (including any split propagation) completes. Deletes do
//! not merge pages; an emptied leaf keeps its sibling links and is
//! reclaimed by a purge path outside this crate.

use std::sync::Arc;

use arbor_buf::BufferPool;
use arbor_error::{ArborError, Result};
use arbor_mtr::{Latch, Mtr, PageHandle, RedoRec};
use arbor_types::limits::{BTREE_MAX_DEPTH, PAGE_CAPACITY_BYTES, REC_OVERHEAD_BYTES};
use arbor_types::record::{
    cmp_tuple_rec, cmp_tuple_rec_n, copy_order_prefix, encode_node_ptr, node_ptr_child, RecPrefix,
    Tuple,
};
use arbor_types::{IndexId, IndexPage, PageId, PageNo, RecPos, SpaceId};
use tracing::debug;

use crate::cursor::{interior_child_idx, leaf_position, SearchMode};

/// Metadata of one index tree.
#[derive(Debug)]
pub struct Index {
    id: IndexId,
    space: SpaceId,
    root: PageNo,
    n_fields: usize,
    n_uniq: usize,
    page_capacity: usize,
}

impl Index {
    /// Create an index with the default page byte budget.
    pub fn create(
        pool: &BufferPool,
        mtr: &mut Mtr,
        id: IndexId,
        space: SpaceId,
        n_fields: usize,
        n_uniq: usize,
    ) -> Result<Arc<Self>> {
        Self::create_with_capacity(pool, mtr, id, space, n_fields, n_uniq, PAGE_CAPACITY_BYTES)
    }

    /// Create an index whose pages split beyond `page_capacity` bytes.
    ///
    /// Small capacities let tests force specific tree shapes; production
    /// callers use [`Index::create`].
    pub fn create_with_capacity(
        pool: &BufferPool,
        mtr: &mut Mtr,
        id: IndexId,
        space: SpaceId,
        n_fields: usize,
        n_uniq: usize,
        page_capacity: usize,
    ) -> Result<Arc<Self>> {
        assert!(n_uniq >= 1 && n_uniq <= n_fields, "index needs at least one ordering field");
        let frame = pool.alloc_page(space, IndexPage::new(id, 0))?;
        let root = frame.id().page_no;
        let h = mtr.fix_frame(frame, Latch::X)?;
        mtr.log_rec(RedoRec::PageCreate {
            page: mtr.page_id(h),
            level: 0,
        });
        mtr.release(h);
        debug!(index = %id, root = %root, "created index");
        Ok(Arc::new(Self {
            id,
            space,
            root,
            n_fields,
            n_uniq,
            page_capacity,
        }))
    }

    #[must_use]
    pub fn id(&self) -> IndexId {
        self.id
    }

    #[must_use]
    pub fn space(&self) -> SpaceId {
        self.space
    }

    /// The root page. Stable for the index's lifetime.
    #[must_use]
    pub fn root(&self) -> PageNo {
        self.root
    }

    /// Total field count of a user record.
    #[must_use]
    pub fn n_fields(&self) -> usize {
        self.n_fields
    }

    /// Width of the ordering prefix: the leading fields that locate a
    /// logical record.
    #[must_use]
    pub fn n_uniq(&self) -> usize {
        self.n_uniq
    }

    /// Page byte budget before a split is forced.
    #[must_use]
    pub fn page_capacity(&self) -> usize {
        self.page_capacity
    }

    // -----------------------------------------------------------------------
    // Insert
    // -----------------------------------------------------------------------

    /// Insert a record built from `tuple` (all `n_fields` fields).
    ///
    /// A record whose ordering prefix equals an existing record's replaces
    /// it in place. Pages split as needed; the root grows in place.
    pub fn insert(&self, pool: &BufferPool, mtr: &mut Mtr, tuple: &Tuple) -> Result<()> {
        let rec = tuple.to_rec();
        if rec.len() + REC_OVERHEAD_BYTES > self.page_capacity {
            return Err(ArborError::RecordTooBig { size: rec.len() });
        }

        let path = self.latch_path(pool, mtr, tuple)?;
        let leaf = *path.last().expect("descent path cannot be empty");

        let (slot, replace) = {
            let page = mtr.page(leaf);
            match leaf_position(page, tuple, SearchMode::Le) {
                RecPos::User(i)
                    if cmp_tuple_rec_n(tuple, page.rec(i), self.n_uniq)
                        == std::cmp::Ordering::Equal =>
                {
                    (i, true)
                }
                RecPos::User(i) => (i + 1, false),
                RecPos::Infimum => (0, false),
                RecPos::Supremum => (page.n_recs(), false),
            }
        };

        let page_id = mtr.page_id(leaf);
        let n_bytes = rec.len();
        if replace {
            mtr.page_mut(leaf).replace_rec_at(slot, rec);
            mtr.log_rec(RedoRec::RecDelete { page: page_id });
        } else {
            mtr.page_mut(leaf).insert_rec_at(slot, rec);
        }
        mtr.log_rec(RedoRec::RecInsert { page: page_id, n_bytes });

        self.split_overflowed(pool, mtr, path)
    }

    // -----------------------------------------------------------------------
    // Delete
    // -----------------------------------------------------------------------

    /// Delete the record whose ordering prefix equals `tuple`.
    ///
    /// Returns whether a record was removed. Pages are not merged.
    pub fn delete(&self, pool: &BufferPool, mtr: &mut Mtr, tuple: &Tuple) -> Result<bool> {
        let path = self.latch_path(pool, mtr, tuple)?;
        let leaf = *path.last().expect("descent path cannot be empty");

        let slot = {
            let page = mtr.page(leaf);
            match leaf_position(page, tuple, SearchMode::Le) {
                RecPos::User(i)
                    if cmp_tuple_rec(tuple, page.rec(i)) == std::cmp::Ordering::Equal =>
                {
                    Some(i)
                }
                _ => None,
            }
        };
        let Some(slot) = slot else {
            self.release_path(mtr, &path);
            return Ok(false);
        };

        let page_id = mtr.page_id(leaf);
        mtr.page_mut(leaf).remove_rec_at(slot);
        mtr.log_rec(RedoRec::RecDelete { page: page_id });
        self.release_path(mtr, &path);
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Descent for mutation
    // -----------------------------------------------------------------------

    /// X-latch the path from the root to the target leaf, returning the
    /// handles root-first. The whole path stays latched so a split can
    /// propagate upward without re-entering the tree.
    fn latch_path(
        &self,
        pool: &BufferPool,
        mtr: &mut Mtr,
        tuple: &Tuple,
    ) -> Result<Vec<PageHandle>> {
        pool.stats().record_tree_descent();
        let mut path = Vec::new();
        let mut current = PageId::new(self.space, self.root);
        for _ in 0..BTREE_MAX_DEPTH {
            let h = mtr.fix_page(pool, current, Latch::X)?;
            path.push(h);
            let page = mtr.page(h);
            if page.is_leaf() {
                return Ok(path);
            }
            let child_idx = interior_child_idx(page, tuple, SearchMode::Le, self.n_uniq)?;
            let child = node_ptr_child(page.rec(child_idx))?;
            current = PageId::new(self.space, child);
        }
        self.release_path(mtr, &path);
        Err(ArborError::corrupt(format!(
            "descent exceeded {BTREE_MAX_DEPTH} levels"
        )))
    }

    fn release_path(&self, mtr: &mut Mtr, path: &[PageHandle]) {
        for &h in path.iter().rev() {
            mtr.release(h);
        }
    }

    // -----------------------------------------------------------------------
    // Splits
    // -----------------------------------------------------------------------

    /// Walk the latched path leaf-to-root, splitting any page over budget.
    fn split_overflowed(
        &self,
        pool: &BufferPool,
        mtr: &mut Mtr,
        path: Vec<PageHandle>,
    ) -> Result<()> {
        let mut depth = path.len() - 1;
        loop {
            let over = mtr.page(path[depth]).used_bytes() > self.page_capacity;
            if !over {
                break;
            }
            if depth == 0 {
                self.split_root(pool, mtr, path[0])?;
                break;
            }
            self.split_nonroot(pool, mtr, path[depth], path[depth - 1])?;
            depth -= 1;
        }
        self.release_path(mtr, &path);
        Ok(())
    }

    /// Split a non-root page `h`, whose parent `parent_h` is latched.
    fn split_nonroot(
        &self,
        pool: &BufferPool,
        mtr: &mut Mtr,
        h: PageHandle,
        parent_h: PageHandle,
    ) -> Result<()> {
        let page_id = mtr.page_id(h);
        let (upper, level, old_next) = {
            let page = mtr.page_mut(h);
            let at = page.n_recs() / 2;
            let upper = page.split_recs_off(at);
            (upper, page.level(), page.next())
        };

        let mut right = IndexPage::new(self.id, level);
        right.set_prev(Some(page_id.page_no));
        right.set_next(old_next);
        right.append_recs(upper);
        let right_key = order_prefix_of(right.rec(0), self.n_uniq)?;

        let right_frame = pool.alloc_page(self.space, right)?;
        let right_no = right_frame.id().page_no;
        let right_h = mtr.fix_frame(right_frame, Latch::X)?;
        mtr.log_rec(RedoRec::PageCreate {
            page: PageId::new(self.space, right_no),
            level,
        });

        mtr.page_mut(h).set_next(Some(right_no));
        mtr.log_rec(RedoRec::PageLink { page: page_id });

        if let Some(next_no) = old_next {
            let next_id = PageId::new(self.space, next_no);
            let next_h = mtr.fix_page(pool, next_id, Latch::X)?;
            mtr.page_mut(next_h).set_prev(Some(right_no));
            mtr.log_rec(RedoRec::PageLink { page: next_id });
            mtr.release(next_h);
        }
        mtr.release(right_h);

        self.insert_node_ptr(mtr, parent_h, &right_key, right_no)?;
        debug!(page = %page_id, right = %right_no, level, "split page");
        Ok(())
    }

    /// Split the root in place: move its records into two fresh children
    /// and rewrite the root as an interior page over them.
    fn split_root(&self, pool: &BufferPool, mtr: &mut Mtr, root_h: PageHandle) -> Result<()> {
        let root_id = mtr.page_id(root_h);
        let (mut recs, level) = {
            let page = mtr.page_mut(root_h);
            let level = page.level();
            (page.split_recs_off(0), level)
        };
        let at = recs.len() / 2;
        let upper = recs.split_off(at);

        let mut left = IndexPage::new(self.id, level);
        left.append_recs(recs);
        let mut right = IndexPage::new(self.id, level);
        right.append_recs(upper);

        let left_key = order_prefix_of(left.rec(0), self.n_uniq)?;
        let right_key = order_prefix_of(right.rec(0), self.n_uniq)?;

        let left_frame = pool.alloc_page(self.space, left)?;
        let left_no = left_frame.id().page_no;
        let right_frame = pool.alloc_page(self.space, right)?;
        let right_no = right_frame.id().page_no;

        let left_h = mtr.fix_frame(left_frame, Latch::X)?;
        let right_h = mtr.fix_frame(right_frame, Latch::X)?;
        mtr.page_mut(left_h).set_next(Some(right_no));
        mtr.page_mut(right_h).set_prev(Some(left_no));
        mtr.log_rec(RedoRec::PageCreate {
            page: PageId::new(self.space, left_no),
            level,
        });
        mtr.log_rec(RedoRec::PageCreate {
            page: PageId::new(self.space, right_no),
            level,
        });
        mtr.release(right_h);
        mtr.release(left_h);

        let new_root = {
            let mut page = IndexPage::new(self.id, level + 1);
            page.insert_rec_at(0, encode_node_ptr(&left_key, left_no));
            page.insert_rec_at(1, encode_node_ptr(&right_key, right_no));
            page
        };
        *mtr.page_mut(root_h) = new_root;
        mtr.log_rec(RedoRec::PageCreate {
            page: root_id,
            level: level + 1,
        });
        debug!(root = %root_id, left = %left_no, right = %right_no, "root grew a level");
        Ok(())
    }

    /// Insert a node pointer for `child` (first key `key`) into a latched
    /// interior page, after every separator less-or-equal to the key.
    fn insert_node_ptr(
        &self,
        mtr: &mut Mtr,
        parent_h: PageHandle,
        key: &RecPrefix,
        child: PageNo,
    ) -> Result<()> {
        let key_tuple = Tuple::from_rec_prefix(key, self.n_uniq)?;
        let slot = {
            let page = mtr.page(parent_h);
            page.recs().partition_point(|sep| {
                cmp_tuple_rec_n(&key_tuple, sep, self.n_uniq) != std::cmp::Ordering::Less
            })
        };
        let page_id = mtr.page_id(parent_h);
        let rec = encode_node_ptr(key, child);
        let n_bytes = rec.len();
        mtr.page_mut(parent_h).insert_rec_at(slot, rec);
        mtr.log_rec(RedoRec::RecInsert { page: page_id, n_bytes });
        Ok(())
    }
}

fn order_prefix_of(rec: &[u8], n_fields: usize) -> Result<RecPrefix> {
    let mut prefix = RecPrefix::new();
    copy_order_prefix(rec, n_fields, &mut prefix)?;
    Ok(prefix)
}
