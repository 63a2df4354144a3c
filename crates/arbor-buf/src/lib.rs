//! Buffer pool: maps `(space, page_no)` to latched in-memory frames.
//!
//! Each frame carries a shared/exclusive latch over its page and a
//! monotonically non-decreasing **modify clock**, bumped under the
//! exclusive latch on every mutation. The clock is the single-word
//! validity oracle behind optimistic cursor restoration: a detached
//! reference to a frame can be re-fixed cheaply iff the clock still
//! matches the value observed at detach time.
//!
//! The pool retains frames for its lifetime; the replacement policy of a
//! production cache is invisible to latching and clock semantics and is
//! not modeled here.

mod frame;
mod pool;
mod stats;

pub use frame::{Frame, SGuard, XGuard};
pub use pool::BufferPool;
pub use stats::{PoolStats, PoolStatsSnapshot};
