use thiserror::Error;

/// Primary error type for arbor storage operations.
///
/// Structured variants for the conditions callers can act on, string
/// payloads only where no caller branches on the content. Unrecoverable
/// conditions (latch-order violations, cursor contract breaches) are not
/// errors at all: they abort via assertions at the site that detected them.
#[derive(Error, Debug)]
pub enum ArborError {
    // === Page access ===
    /// The buffer pool has no frame for the requested page.
    #[error("page not found: space {space}, page {page}")]
    PageNotFound { space: u32, page: u32 },

    /// The buffer pool cannot admit another frame.
    #[error("buffer pool exhausted ({frames} frames resident)")]
    PoolExhausted { frames: usize },

    /// File I/O error reading or writing a frame.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Structure ===
    /// An index page violates a structural invariant.
    #[error("index tree is corrupt: {detail}")]
    Corrupt { detail: String },

    /// A record failed to decode.
    #[error("malformed record: {detail}")]
    BadRecord { detail: String },

    /// A page cannot admit the record without exceeding its byte budget
    /// and the tree has no further room to split.
    #[error("record of {size} bytes does not fit on an empty page")]
    RecordTooBig { size: usize },

    // === Transactions ===
    /// A mini-transaction was used after commit.
    #[error("mini-transaction is not active")]
    MtrNotActive,

    // === Internal ===
    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl ArborError {
    /// Create a corruption error.
    pub fn corrupt(detail: impl Into<String>) -> Self {
        Self::Corrupt {
            detail: detail.into(),
        }
    }

    /// Create a malformed-record error.
    pub fn bad_record(detail: impl Into<String>) -> Self {
        Self::BadRecord {
            detail: detail.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the operation may succeed if simply retried.
    ///
    /// Corruption and decode failures are never transient; a missing page
    /// may appear once a concurrent allocator publishes it.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::PageNotFound { .. } | Self::PoolExhausted { .. } | Self::Io(_)
        )
    }
}

/// Result type alias using `ArborError`.
pub type Result<T> = std::result::Result<T, ArborError>;
