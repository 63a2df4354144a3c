//! Property tests for persistent-cursor invariants: store/restore round
//! trips under no-op, split-heavy, and delete-heavy interleavings.

use std::sync::Arc;

use arbor_btree::{Index, LatchMode, OldStored, PersistentCursor, SearchMode};
use arbor_buf::BufferPool;
use arbor_mtr::Mtr;
use arbor_types::record::{decode_fields, u64_key, Tuple};
use arbor_types::{IndexId, SpaceId};
use proptest::prelude::*;

fn tuple(k: u64) -> Tuple {
    Tuple::from_fields(vec![u64_key(k), format!("v{k}").into_bytes()])
}

fn key(k: u64) -> Tuple {
    Tuple::from_fields(vec![u64_key(k)])
}

fn key_of(rec: &[u8]) -> u64 {
    let fields = decode_fields(rec).unwrap();
    u64::from_be_bytes(fields[0].try_into().unwrap())
}

fn build(keys: &[u64], capacity: usize) -> (BufferPool, Arc<Index>) {
    let pool = BufferPool::new(8192);
    let mut mtr = Mtr::start();
    let index =
        Index::create_with_capacity(&pool, &mut mtr, IndexId(1), SpaceId(0), 2, 1, capacity)
            .unwrap();
    for &k in keys {
        index.insert(&pool, &mut mtr, &tuple(k)).unwrap();
    }
    mtr.commit();
    (pool, index)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Store → commit → restore on an unchanged index is always a hit on
    /// the same record, and the relative position survives.
    #[test]
    fn restore_on_unchanged_index_hits(
        keys in proptest::collection::btree_set(1u64..10_000, 1..120),
        pick in any::<proptest::sample::Index>(),
    ) {
        let keys: Vec<u64> = keys.iter().copied().collect();
        let target = keys[pick.index(keys.len())];
        let (pool, index) = build(&keys, 300);

        let mut pcur = PersistentCursor::new(Arc::clone(&index));
        let mut mtr = Mtr::start();
        pcur.open(&pool, &mut mtr, &key(target), SearchMode::Ge, LatchMode::SearchLeaf)
            .unwrap();
        prop_assert_eq!(key_of(pcur.rec(&mtr).unwrap()), target);
        pcur.store_position(&mtr);
        let rel = pcur.rel_pos();
        let prefix: Vec<u8> = pcur.stored_prefix().to_vec();
        pcur.commit_specify_mtr(&mut mtr);

        mtr.start_again();
        let hit = pcur
            .restore_position(LatchMode::SearchLeaf, &pool, &mut mtr)
            .unwrap();
        prop_assert!(hit);
        prop_assert_eq!(key_of(pcur.rec(&mtr).unwrap()), target);
        prop_assert_eq!(pcur.rel_pos(), rel);

        // Idempotence: re-storing yields the same prefix bytes.
        pcur.store_position(&mtr);
        prop_assert_eq!(pcur.stored_prefix(), prefix.as_slice());
        mtr.commit();
    }

    /// Splits between store and restore never lose the logical position.
    #[test]
    fn restore_survives_interleaved_inserts(
        keys in proptest::collection::btree_set(1u64..5_000, 2..80),
        extra in proptest::collection::btree_set(1u64..5_000, 1..120),
        pick in any::<proptest::sample::Index>(),
    ) {
        let keys: Vec<u64> = keys.iter().copied().collect();
        let target = keys[pick.index(keys.len())];
        let (pool, index) = build(&keys, 200);

        let mut pcur = PersistentCursor::new(Arc::clone(&index));
        let mut mtr = Mtr::start();
        pcur.open(&pool, &mut mtr, &key(target), SearchMode::Ge, LatchMode::SearchLeaf)
            .unwrap();
        pcur.store_position(&mtr);
        pcur.commit_specify_mtr(&mut mtr);

        let mut writer = Mtr::start();
        for k in &extra {
            index.insert(&pool, &mut writer, &tuple(*k)).unwrap();
        }
        writer.commit();

        mtr.start_again();
        let hit = pcur
            .restore_position(LatchMode::SearchLeaf, &pool, &mut mtr)
            .unwrap();
        prop_assert!(hit);
        prop_assert_eq!(key_of(pcur.rec(&mtr).unwrap()), target);
        mtr.commit();
    }

    /// Deleting the stored row makes restore miss, and the cursor
    /// re-stores itself on a neighbor so the scan can continue.
    #[test]
    fn restore_after_delete_restores_nearby(
        keys in proptest::collection::btree_set(1u64..2_000, 2..60),
        pick in any::<proptest::sample::Index>(),
    ) {
        let keys: Vec<u64> = keys.iter().copied().collect();
        let target = keys[pick.index(keys.len())];
        let (pool, index) = build(&keys, 250);

        let mut pcur = PersistentCursor::new(Arc::clone(&index));
        let mut mtr = Mtr::start();
        pcur.open(&pool, &mut mtr, &key(target), SearchMode::Ge, LatchMode::SearchLeaf)
            .unwrap();
        pcur.store_position(&mtr);
        pcur.commit_specify_mtr(&mut mtr);

        let mut writer = Mtr::start();
        prop_assert!(index.delete(&pool, &mut writer, &key(target)).unwrap());
        writer.commit();

        mtr.start_again();
        let hit = pcur
            .restore_position(LatchMode::SearchLeaf, &pool, &mut mtr)
            .unwrap();
        prop_assert!(!hit);
        prop_assert_eq!(pcur.old_stored(), OldStored::Stored);

        // Scanning forward from the restored spot yields exactly the
        // surviving keys greater than the target.
        let mut rest: Vec<u64> = Vec::new();
        if pcur.is_on_user_rec() && key_of(pcur.rec(&mtr).unwrap()) > target {
            rest.push(key_of(pcur.rec(&mtr).unwrap()));
        }
        while pcur.move_to_next_user_rec(&pool, &mut mtr).unwrap() {
            let k = key_of(pcur.rec(&mtr).unwrap());
            if k > target {
                rest.push(k);
            }
        }
        let expected: Vec<u64> = keys.iter().copied().filter(|&k| k > target).collect();
        prop_assert_eq!(rest, expected);
        mtr.commit();
    }

    /// A backward full scan visits exactly the forward scan reversed,
    /// regardless of tree shape.
    #[test]
    fn backward_scan_mirrors_forward_scan(
        keys in proptest::collection::btree_set(1u64..3_000, 1..150),
    ) {
        let keys: Vec<u64> = keys.iter().copied().collect();
        let (pool, index) = build(&keys, 220);

        let mut mtr = Mtr::start();
        let mut pcur = PersistentCursor::new(Arc::clone(&index));
        pcur.open_at_index_side(&pool, &mut mtr, false, LatchMode::SearchLeaf)
            .unwrap();
        let mut backward = Vec::new();
        while pcur.move_to_prev_user_rec(&pool, &mut mtr).unwrap() {
            backward.push(key_of(pcur.rec(&mtr).unwrap()));
        }
        mtr.commit();

        backward.reverse();
        prop_assert_eq!(backward, keys);
    }

    /// Copying a stored position is observationally equivalent to using
    /// the donor.
    #[test]
    fn copied_cursor_restores_identically(
        keys in proptest::collection::btree_set(1u64..2_000, 1..60),
        pick in any::<proptest::sample::Index>(),
        delete_it in any::<bool>(),
    ) {
        let keys: Vec<u64> = keys.iter().copied().collect();
        let target = keys[pick.index(keys.len())];
        let (pool, index) = build(&keys, 300);

        let mut src = PersistentCursor::new(Arc::clone(&index));
        let mut mtr = Mtr::start();
        src.open(&pool, &mut mtr, &key(target), SearchMode::Ge, LatchMode::SearchLeaf)
            .unwrap();
        src.store_position(&mtr);
        src.commit_specify_mtr(&mut mtr);

        let mut dst = PersistentCursor::new(Arc::clone(&index));
        PersistentCursor::copy_stored_position(&mut dst, &src);

        if delete_it && keys.len() > 1 {
            let mut writer = Mtr::start();
            index.delete(&pool, &mut writer, &key(target)).unwrap();
            writer.commit();
        }

        mtr.start_again();
        let src_hit = src
            .restore_position(LatchMode::SearchLeaf, &pool, &mut mtr)
            .unwrap();
        let src_land = src.rec(&mtr).map(key_of);
        mtr.commit();

        let mut mtr = Mtr::start();
        let dst_hit = dst
            .restore_position(LatchMode::SearchLeaf, &pool, &mut mtr)
            .unwrap();
        let dst_land = dst.rec(&mtr).map(key_of);
        mtr.commit();

        prop_assert_eq!(src_hit, dst_hit);
        prop_assert_eq!(src_land, dst_land);
    }
}
