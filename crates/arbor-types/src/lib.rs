pub mod limits;
pub mod page;
pub mod record;

pub use page::{IndexPage, PageFormat, RecPos};
pub use record::{RecPrefix, Tuple};

use std::fmt;
use std::num::NonZeroU32;

/// A tablespace identifier.
///
/// Every index lives in exactly one space; page numbers are unique only
/// within a space.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct SpaceId(pub u32);

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A page number within a tablespace.
///
/// Page numbers are 1-based; "no page" (the null sibling link at either
/// edge of a level) is `Option::<PageNo>::None`, never a sentinel value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct PageNo(NonZeroU32);

impl PageNo {
    /// The first allocatable page of a space.
    pub const FIRST: Self = Self(NonZeroU32::MIN);

    /// Create a new page number from a raw u32.
    ///
    /// Returns `None` if `n` is 0 (page 0 does not exist).
    #[inline]
    #[must_use]
    pub const fn new(n: u32) -> Option<Self> {
        match NonZeroU32::new(n) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Get the raw u32 value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for PageNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The full address of a page: space plus page number.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct PageId {
    pub space: SpaceId,
    pub page_no: PageNo,
}

impl PageId {
    #[inline]
    #[must_use]
    pub const fn new(space: SpaceId, page_no: PageNo) -> Self {
        Self { space, page_no }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.space, self.page_no)
    }
}

/// An index tree identifier, unique across spaces.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct IndexId(pub u64);

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A transaction identifier, carried by cursors for diagnostics only.
///
/// The cursor never dereferences transaction state; the id is printed when
/// a contract violation aborts, so the offending caller can be found.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct TrxId(pub u64);

impl fmt::Display for TrxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_no_rejects_zero() {
        assert!(PageNo::new(0).is_none());
        assert_eq!(PageNo::new(1), Some(PageNo::FIRST));
        assert_eq!(PageNo::new(7).unwrap().get(), 7);
    }

    #[test]
    fn page_id_display() {
        let id = PageId::new(SpaceId(3), PageNo::new(42).unwrap());
        assert_eq!(id.to_string(), "3:42");
    }

    #[test]
    fn page_no_ordering_matches_raw() {
        let a = PageNo::new(3).unwrap();
        let b = PageNo::new(9).unwrap();
        assert!(a < b);
    }
}
