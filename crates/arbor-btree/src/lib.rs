//! B-tree index trees and cursors.
//!
//! [`Index`] owns tree structure and mutation (insert with splits,
//! delete). [`BtrCursor`] is a transient position on a latched leaf.
//! [`PersistentCursor`] is the detachable flavor: it survives latch
//! release and mini-transaction commit by storing the ordering prefix of
//! the record it sat on, and restores either optimistically (re-latch the
//! remembered frame, check its modify clock) or by a fresh descent.

pub mod cursor;
pub mod index;
pub mod pcur;

pub use cursor::{BtrCursor, FixedBlock, LatchMode, SearchMode};
pub use index::Index;
pub use pcur::{OldStored, PersistentCursor, PosState, RelPos};
