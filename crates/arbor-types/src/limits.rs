//! Compile-time limits shared across the workspace.

/// Maximum B-tree depth. A descent deeper than this is treated as
/// corruption rather than followed further.
pub const BTREE_MAX_DEPTH: usize = 20;

/// Byte budget of a single index page. A leaf or node whose records
/// (plus per-record bookkeeping) would exceed this budget must split.
pub const PAGE_CAPACITY_BYTES: usize = 4096;

/// Per-record bookkeeping charged against [`PAGE_CAPACITY_BYTES`] in
/// addition to the encoded record bytes.
pub const REC_OVERHEAD_BYTES: usize = 8;

/// Inline capacity of the stored ordering-prefix buffer. Prefixes at or
/// under this size never hit the heap when a cursor position is stored.
pub const REC_PREFIX_INLINE_BYTES: usize = 128;

/// Upper bound on the encoded length of a single field.
pub const MAX_FIELD_BYTES: usize = u16::MAX as usize;
