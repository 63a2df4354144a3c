//! Public API facade for the arbor storage kernel.
//!
//! Arbor is a transactional, page-based storage kernel: fixed-budget
//! pages in a latched buffer pool, B-tree indexes, mini-transactions
//! bundling latches with redo records, and detachable persistent cursors
//! that survive latch release and mini-transaction commit.
//!
//! ```
//! use std::sync::Arc;
//! use arbor::{
//!     BufferPool, Index, LatchMode, Mtr, PersistentCursor, SearchMode, Tuple,
//! };
//! use arbor::types::record::u64_key;
//! use arbor::types::{IndexId, SpaceId};
//!
//! let pool = BufferPool::new(256);
//! let mut mtr = Mtr::start();
//! let index = Index::create(&pool, &mut mtr, IndexId(1), SpaceId(0), 2, 1).unwrap();
//! for k in [10u64, 20, 30] {
//!     let row = Tuple::from_fields(vec![u64_key(k), b"payload".to_vec()]);
//!     index.insert(&pool, &mut mtr, &row).unwrap();
//! }
//! mtr.commit();
//!
//! // Park a cursor on a row, let every latch go, and pick it back up.
//! let mut mtr = Mtr::start();
//! let mut cursor = PersistentCursor::new(Arc::clone(&index));
//! let probe = Tuple::from_fields(vec![u64_key(20)]);
//! cursor
//!     .open(&pool, &mut mtr, &probe, SearchMode::Ge, LatchMode::SearchLeaf)
//!     .unwrap();
//! cursor.store_position(&mtr);
//! cursor.commit_specify_mtr(&mut mtr);
//!
//! mtr.start_again();
//! assert!(cursor
//!     .restore_position(LatchMode::SearchLeaf, &pool, &mut mtr)
//!     .unwrap());
//! mtr.commit();
//! ```

pub use arbor_btree::{
    BtrCursor, FixedBlock, Index, LatchMode, OldStored, PersistentCursor, PosState, RelPos,
    SearchMode,
};
pub use arbor_buf::{BufferPool, Frame, PoolStats, PoolStatsSnapshot};
pub use arbor_error::{ArborError, Result};
pub use arbor_mtr::{Latch, Lsn, Mtr, PageHandle, RedoLog, RedoRec};
pub use arbor_types::record::Tuple;

/// Core identifier and record types.
pub use arbor_types as types;
