//! Redo records and the append-only log sink.
//!
//! Commit hands each mtr's records to the sink as one batch, stamping
//! them with consecutive log sequence numbers. The sink marks records
//! durable-eligible; replay is a recovery concern outside this kernel.

use arbor_types::PageId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Log sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lsn(pub u64);

/// A physiological redo record: which page, what happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedoRec {
    /// A page was created at the given tree level.
    PageCreate { page: PageId, level: u16 },
    /// A record of `n_bytes` was inserted on the page.
    RecInsert { page: PageId, n_bytes: usize },
    /// A record was deleted from the page.
    RecDelete { page: PageId },
    /// The page's sibling links changed.
    PageLink { page: PageId },
}

/// Append-only redo sink shared by all mini-transactions of an engine.
#[derive(Debug, Default)]
pub struct RedoLog {
    next_lsn: AtomicU64,
    records: Mutex<Vec<(Lsn, RedoRec)>>,
}

impl RedoLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a batch of records, stamping consecutive LSNs.
    ///
    /// Returns the LSN of the last record, or `None` for an empty batch.
    pub fn append_batch(&self, batch: Vec<RedoRec>) -> Option<Lsn> {
        if batch.is_empty() {
            return None;
        }
        let n = batch.len() as u64;
        let first = self.next_lsn.fetch_add(n, Ordering::Relaxed);
        let mut records = self.records.lock();
        let mut last = Lsn(first);
        for (i, rec) in batch.into_iter().enumerate() {
            last = Lsn(first + i as u64);
            records.push((last, rec));
        }
        Some(last)
    }

    /// Number of records appended so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the full record stream, in LSN order.
    #[must_use]
    pub fn records(&self) -> Vec<(Lsn, RedoRec)> {
        self.records.lock().clone()
    }
}
