//! Index record codec.
//!
//! A record is a sequence of byte-string fields. The wire form is the
//! concatenation of the fields, each preceded by a `u16` big-endian length.
//! Ordering is field-wise: fields compare bytewise, shorter-is-less on a
//! common prefix, and a record with fewer fields sorts before one that
//! extends it.
//!
//! Node-pointer records on interior pages reuse the same form: the key
//! fields of the child's first record followed by one trailing 4-byte
//! field holding the child page number.

use std::cmp::Ordering;

use arbor_error::{ArborError, Result};
use smallvec::SmallVec;

use crate::limits::{MAX_FIELD_BYTES, REC_PREFIX_INLINE_BYTES};
use crate::PageNo;

/// Owned ordering-prefix bytes, inline up to [`REC_PREFIX_INLINE_BYTES`].
pub type RecPrefix = SmallVec<[u8; REC_PREFIX_INLINE_BYTES]>;

// ---------------------------------------------------------------------------
// Tuple
// ---------------------------------------------------------------------------

/// A search tuple: owned field values used to probe an index.
///
/// A tuple may carry fewer fields than the records it is compared against;
/// comparison then covers only the tuple's fields, so a partial tuple that
/// matches a record prefix compares [`Ordering::Equal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple {
    fields: Vec<Vec<u8>>,
}

impl Tuple {
    /// Build a tuple from owned field values.
    #[must_use]
    pub fn from_fields(fields: Vec<Vec<u8>>) -> Self {
        Self { fields }
    }

    /// Build a tuple from the first `n_fields` fields of an encoded record.
    ///
    /// This is how a stored cursor position is turned back into a search
    /// tuple before a pessimistic re-descent.
    pub fn from_rec_prefix(rec: &[u8], n_fields: usize) -> Result<Self> {
        let mut fields = Vec::with_capacity(n_fields);
        let mut iter = FieldIter::new(rec);
        for i in 0..n_fields {
            let field = iter.next().ok_or_else(|| {
                ArborError::bad_record(format!("record has {i} fields, wanted {n_fields}"))
            })?;
            fields.push(field.to_vec());
        }
        Ok(Self { fields })
    }

    /// Number of fields in the tuple.
    #[must_use]
    pub fn n_fields(&self) -> usize {
        self.fields.len()
    }

    /// The field values.
    #[must_use]
    pub fn fields(&self) -> &[Vec<u8>] {
        &self.fields
    }

    /// Encode the tuple as a record.
    #[must_use]
    pub fn to_rec(&self) -> Vec<u8> {
        encode_fields(self.fields.iter().map(Vec::as_slice))
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode fields into the record wire form.
///
/// # Panics
///
/// Panics if a field exceeds [`MAX_FIELD_BYTES`]; callers validate sizes at
/// the ingestion boundary.
pub fn encode_fields<'a>(fields: impl IntoIterator<Item = &'a [u8]>) -> Vec<u8> {
    let mut out = Vec::new();
    for field in fields {
        assert!(
            field.len() <= MAX_FIELD_BYTES,
            "field of {} bytes exceeds the encodable maximum",
            field.len()
        );
        #[allow(clippy::cast_possible_truncation)]
        out.extend_from_slice(&(field.len() as u16).to_be_bytes());
        out.extend_from_slice(field);
    }
    out
}

/// Decode a record into its fields.
pub fn decode_fields(rec: &[u8]) -> Result<Vec<&[u8]>> {
    let mut fields = Vec::new();
    let mut offset = 0usize;
    while offset < rec.len() {
        if offset + 2 > rec.len() {
            return Err(ArborError::bad_record("truncated field length"));
        }
        let len = u16::from_be_bytes([rec[offset], rec[offset + 1]]) as usize;
        offset += 2;
        if offset + len > rec.len() {
            return Err(ArborError::bad_record("field overruns record"));
        }
        fields.push(&rec[offset..offset + len]);
        offset += len;
    }
    Ok(fields)
}

/// Number of fields in an encoded record.
pub fn field_count(rec: &[u8]) -> Result<usize> {
    Ok(decode_fields(rec)?.len())
}

/// Iterator over the fields of an encoded record.
///
/// Stops at the first malformed length; the encode path makes malformed
/// records unreachable for pages this crate produced, and comparison
/// treats a short record as exhausted.
struct FieldIter<'a> {
    rec: &'a [u8],
    offset: usize,
}

impl<'a> FieldIter<'a> {
    fn new(rec: &'a [u8]) -> Self {
        Self { rec, offset: 0 }
    }
}

impl<'a> Iterator for FieldIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.offset + 2 > self.rec.len() {
            return None;
        }
        let len = u16::from_be_bytes([self.rec[self.offset], self.rec[self.offset + 1]]) as usize;
        let start = self.offset + 2;
        if start + len > self.rec.len() {
            return None;
        }
        self.offset = start + len;
        Some(&self.rec[start..start + len])
    }
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

/// Compare two field values.
///
/// Sequential bytewise comparison with no pointer chasing; length breaks
/// ties on a shared prefix.
#[must_use]
pub fn compare_field_bytes(left: &[u8], right: &[u8]) -> Ordering {
    let common = left.len().min(right.len());
    for idx in 0..common {
        let l = left[idx];
        let r = right[idx];
        if l != r {
            return l.cmp(&r);
        }
    }
    left.len().cmp(&right.len())
}

/// Compare a tuple against an encoded record, over the tuple's fields only.
///
/// `Equal` means every tuple field matched the corresponding record field;
/// the record may still carry further fields. A record that runs out of
/// fields before the tuple does compares `Less`.
#[must_use]
pub fn cmp_tuple_rec(tuple: &Tuple, rec: &[u8]) -> Ordering {
    cmp_tuple_rec_n(tuple, rec, tuple.n_fields())
}

/// Compare a tuple against an encoded record over at most `n` fields.
///
/// Interior-page descent uses this to keep the trailing child field of a
/// node pointer out of the comparison.
#[must_use]
pub fn cmp_tuple_rec_n(tuple: &Tuple, rec: &[u8], n: usize) -> Ordering {
    let mut rec_fields = FieldIter::new(rec);
    for tuple_field in tuple.fields.iter().take(n) {
        match rec_fields.next() {
            None => return Ordering::Greater,
            Some(rec_field) => match compare_field_bytes(tuple_field, rec_field) {
                Ordering::Equal => {}
                other => return other,
            },
        }
    }
    Ordering::Equal
}

/// Compare two encoded records over their first `n_fields` fields.
#[must_use]
pub fn cmp_rec_rec(a: &[u8], b: &[u8], n_fields: usize) -> Ordering {
    let mut a_fields = FieldIter::new(a);
    let mut b_fields = FieldIter::new(b);
    for _ in 0..n_fields {
        match (a_fields.next(), b_fields.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(af), Some(bf)) => match compare_field_bytes(af, bf) {
                Ordering::Equal => {}
                other => return other,
            },
        }
    }
    Ordering::Equal
}

// ---------------------------------------------------------------------------
// Ordering prefix
// ---------------------------------------------------------------------------

/// Copy the encoding of the first `n_fields` fields of `rec` into `out`.
///
/// `out` is cleared first; its existing allocation is reused when large
/// enough, and prefixes at or under the inline capacity never allocate.
pub fn copy_order_prefix(rec: &[u8], n_fields: usize, out: &mut RecPrefix) -> Result<()> {
    let mut end = 0usize;
    let mut iter = FieldIter::new(rec);
    for i in 0..n_fields {
        let field = iter.next().ok_or_else(|| {
            ArborError::bad_record(format!("record has {i} fields, wanted {n_fields}"))
        })?;
        end = iter.offset;
        debug_assert!(end >= field.len() + 2);
    }
    out.clear();
    out.extend_from_slice(&rec[..end]);
    Ok(())
}

// ---------------------------------------------------------------------------
// Node pointers
// ---------------------------------------------------------------------------

/// Build a node-pointer record: `key_prefix` (already in wire form) plus a
/// trailing 4-byte field holding the child page number.
#[must_use]
pub fn encode_node_ptr(key_prefix: &[u8], child: PageNo) -> Vec<u8> {
    let mut rec = Vec::with_capacity(key_prefix.len() + 6);
    rec.extend_from_slice(key_prefix);
    rec.extend_from_slice(&4u16.to_be_bytes());
    rec.extend_from_slice(&child.get().to_be_bytes());
    rec
}

/// Extract the child page number from a node-pointer record.
pub fn node_ptr_child(rec: &[u8]) -> Result<PageNo> {
    let fields = decode_fields(rec)?;
    let child = fields
        .last()
        .ok_or_else(|| ArborError::bad_record("node pointer with no fields"))?;
    if child.len() != 4 {
        return Err(ArborError::bad_record(format!(
            "node pointer child field is {} bytes, wanted 4",
            child.len()
        )));
    }
    let raw = u32::from_be_bytes([child[0], child[1], child[2], child[3]]);
    PageNo::new(raw).ok_or_else(|| ArborError::bad_record("node pointer to page 0"))
}

/// Encode a `u64` as a single order-preserving key field.
#[must_use]
pub fn u64_key(v: u64) -> Vec<u8> {
    v.to_be_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(fields: &[&[u8]]) -> Vec<u8> {
        encode_fields(fields.iter().copied())
    }

    #[test]
    fn encode_decode_round_trip() {
        let r = rec(&[b"alpha", b"", b"beta"]);
        let fields = decode_fields(&r).unwrap();
        assert_eq!(fields, vec![b"alpha".as_slice(), b"", b"beta"]);
        assert_eq!(field_count(&r).unwrap(), 3);
    }

    #[test]
    fn decode_rejects_truncation() {
        let mut r = rec(&[b"alpha"]);
        r.truncate(r.len() - 1);
        assert!(decode_fields(&r).is_err());
        assert!(decode_fields(&[0x00]).is_err());
    }

    #[test]
    fn compare_field_bytes_matches_slice_cmp() {
        for (a, b) in [
            (b"abc".as_slice(), b"abd".as_slice()),
            (b"abc", b"abc"),
            (b"ab", b"abc"),
            (b"", b"a"),
        ] {
            assert_eq!(compare_field_bytes(a, b), a.cmp(b));
        }
    }

    #[test]
    fn tuple_prefix_compares_equal() {
        let r = rec(&[b"key", b"payload"]);
        let partial = Tuple::from_fields(vec![b"key".to_vec()]);
        assert_eq!(cmp_tuple_rec(&partial, &r), Ordering::Equal);

        let full = Tuple::from_fields(vec![b"key".to_vec(), b"payload".to_vec()]);
        assert_eq!(cmp_tuple_rec(&full, &r), Ordering::Equal);

        let longer = Tuple::from_fields(vec![b"key".to_vec(), b"payload".to_vec(), b"x".to_vec()]);
        assert_eq!(cmp_tuple_rec(&longer, &r), Ordering::Greater);
    }

    #[test]
    fn tuple_orders_against_record() {
        let r = rec(&[&u64_key(100)]);
        let lo = Tuple::from_fields(vec![u64_key(50)]);
        let hi = Tuple::from_fields(vec![u64_key(150)]);
        assert_eq!(cmp_tuple_rec(&lo, &r), Ordering::Less);
        assert_eq!(cmp_tuple_rec(&hi, &r), Ordering::Greater);
    }

    #[test]
    fn cmp_rec_rec_limits_fields() {
        let a = rec(&[b"same", b"aa"]);
        let b = rec(&[b"same", b"zz"]);
        assert_eq!(cmp_rec_rec(&a, &b, 1), Ordering::Equal);
        assert_eq!(cmp_rec_rec(&a, &b, 2), Ordering::Less);
    }

    #[test]
    fn order_prefix_copies_exact_fields() {
        let r = rec(&[b"k1", b"k2", b"rest"]);
        let mut prefix = RecPrefix::new();
        copy_order_prefix(&r, 2, &mut prefix).unwrap();
        assert_eq!(prefix.as_slice(), rec(&[b"k1", b"k2"]).as_slice());

        let back = Tuple::from_rec_prefix(&prefix, 2).unwrap();
        assert_eq!(back.fields(), &[b"k1".to_vec(), b"k2".to_vec()]);
    }

    #[test]
    fn order_prefix_too_few_fields_is_error() {
        let r = rec(&[b"only"]);
        let mut prefix = RecPrefix::new();
        assert!(copy_order_prefix(&r, 2, &mut prefix).is_err());
    }

    #[test]
    fn order_prefix_stays_inline() {
        let r = rec(&[b"short"]);
        let mut prefix = RecPrefix::new();
        copy_order_prefix(&r, 1, &mut prefix).unwrap();
        assert!(!prefix.spilled());
    }

    #[test]
    fn node_ptr_round_trip() {
        let key = rec(&[&u64_key(42)]);
        let ptr = encode_node_ptr(&key, PageNo::new(9).unwrap());
        assert_eq!(node_ptr_child(&ptr).unwrap().get(), 9);

        let probe = Tuple::from_fields(vec![u64_key(42)]);
        assert_eq!(cmp_tuple_rec_n(&probe, &ptr, 1), Ordering::Equal);
    }

    #[test]
    fn node_ptr_rejects_bad_child_field() {
        let r = rec(&[b"key", b"abc"]);
        assert!(node_ptr_child(&r).is_err());
    }

    #[test]
    fn u64_key_preserves_order() {
        let mut keys: Vec<Vec<u8>> = [5u64, 1, 300, 2, 255, 256].iter().map(|&v| u64_key(v)).collect();
        keys.sort();
        let decoded: Vec<u64> = keys
            .iter()
            .map(|k| u64::from_be_bytes(k.as_slice().try_into().unwrap()))
            .collect();
        assert_eq!(decoded, vec![1, 2, 5, 255, 256, 300]);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn encode_decode_round_trips(
            fields in proptest::collection::vec(
                proptest::collection::vec(any::<u8>(), 0..64),
                0..8,
            ),
        ) {
            let encoded = encode_fields(fields.iter().map(Vec::as_slice));
            let decoded = decode_fields(&encoded).unwrap();
            prop_assert_eq!(decoded.len(), fields.len());
            for (got, want) in decoded.iter().zip(&fields) {
                prop_assert_eq!(*got, want.as_slice());
            }
        }

        #[test]
        fn prefix_copy_matches_truncated_tuple(
            fields in proptest::collection::vec(
                proptest::collection::vec(any::<u8>(), 0..32),
                1..6,
            ),
            n in 1usize..6,
        ) {
            prop_assume!(n <= fields.len());
            let encoded = encode_fields(fields.iter().map(Vec::as_slice));
            let mut prefix = RecPrefix::new();
            copy_order_prefix(&encoded, n, &mut prefix).unwrap();

            // The prefix re-parses to exactly the first n fields, and a
            // tuple built from it compares Equal against the full record.
            let tuple = Tuple::from_rec_prefix(&prefix, n).unwrap();
            prop_assert_eq!(tuple.n_fields(), n);
            prop_assert_eq!(cmp_tuple_rec(&tuple, &encoded), Ordering::Equal);
        }

        #[test]
        fn tuple_rec_comparison_matches_field_order(
            a in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..16), 1..4),
            b in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..16), 1..4),
        ) {
            let rec = encode_fields(b.iter().map(Vec::as_slice));
            let tuple = Tuple::from_fields(a.clone());
            let expected = a
                .iter()
                .zip(&b)
                .map(|(x, y)| compare_field_bytes(x, y))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or_else(|| {
                    if a.len() > b.len() {
                        Ordering::Greater
                    } else {
                        Ordering::Equal
                    }
                });
            prop_assert_eq!(cmp_tuple_rec(&tuple, &rec), expected);
        }
    }
}
