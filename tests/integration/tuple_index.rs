#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::NamedTempFile;
use tracedb::primitives::io::{MemFileIo, StdFileIo};
use tracedb::primitives::pager::{PagedFile, PagerOptions};
use tracedb::storage::btree::{
    find_tuple_index, BTreeStats, DeltaTree, EventRef, Lookup, Match, NoMatch, OpenCloseIndex,
    SequenceTree, TupleIndex, TupleIterator,
};
use tracedb::types::{InternalPointer, Result};

fn mem_pager(page_size: u32) -> Result<Arc<PagedFile>> {
    let options = PagerOptions::default()
        .page_size(page_size)
        .cache_bytes(page_size as usize * 16);
    Ok(Arc::new(PagedFile::create(Arc::new(MemFileIo::new()), options)?))
}

fn ev(n: u64) -> EventRef {
    EventRef(InternalPointer(n))
}

fn keys_forward<P: Clone>(it: &mut TupleIterator<P>) -> Result<Vec<u64>> {
    let mut out = Vec::new();
    while let Some((key, _)) = it.next()? {
        out.push(key);
    }
    Ok(out)
}

fn check_duplicates<I: TupleIndex<EventRef>>(index: &I) -> Result<()> {
    for (i, key) in [1u64, 1, 3, 3, 3, 7].into_iter().enumerate() {
        index.insert(key, ev(i as u64))?;
    }
    assert_eq!(index.len(), 6);
    assert_eq!(index.get_values(3)?, vec![ev(2), ev(3), ev(4)]);
    assert!(index.get_values(5)?.is_empty());

    let mut it = index.tuple_iterator(3)?;
    assert_eq!(it.next()?.map(|(k, p)| (k, p)), Some((3, ev(2))));
    assert_eq!(it.previous()?.map(|(k, _)| k), Some(3));
    assert_eq!(it.previous()?.map(|(k, p)| (k, p)), Some((1, ev(1))));

    let mut it = index.tuple_iterator(4)?;
    assert_eq!(it.peek_next()?.map(|(k, _)| k), Some(7));
    assert_eq!(it.peek_previous()?.map(|(k, p)| (k, p)), Some((3, ev(4))));
    assert_eq!(keys_forward(&mut index.tuple_iterator(0)?)?, vec![1, 1, 3, 3, 3, 7]);
    assert!(index.tuple_iterator(8)?.next()?.is_none());
    Ok(())
}

#[test]
fn duplicate_keys_keep_insertion_order() -> Result<()> {
    check_duplicates(&SequenceTree::<EventRef>::new(mem_pager(256)?, Arc::new(BTreeStats::default())))?;
    check_duplicates(&DeltaTree::<EventRef>::new(mem_pager(256)?, Arc::new(BTreeStats::default())))?;
    Ok(())
}

#[test]
fn finder_tie_breaks() {
    const KEYS: [u64; 6] = [1, 1, 3, 3, 3, 7];
    assert_eq!(find_tuple_index(&KEYS, 3, Match::First, NoMatch::After), Lookup::Exact(2));
    assert_eq!(find_tuple_index(&KEYS, 3, Match::Last, NoMatch::After), Lookup::Exact(4));
    assert_eq!(find_tuple_index(&KEYS, 2, Match::First, NoMatch::Before), Lookup::Nearest(1));
    assert_eq!(find_tuple_index(&KEYS, 2, Match::First, NoMatch::After), Lookup::Nearest(2));
    assert_eq!(find_tuple_index(&KEYS, 8, Match::Last, NoMatch::After).index(), None);
}

#[test]
fn sequence_tree_seeks_and_counts_across_pages() -> Result<()> {
    let tree = SequenceTree::<EventRef>::new(mem_pager(256)?, Arc::new(BTreeStats::default()));
    let mut rng = ChaCha8Rng::seed_from_u64(9);
    let mut keys = Vec::new();
    let mut key = 0u64;
    for i in 0..20_000u64 {
        key += rng.gen_range(0..4);
        keys.push(key);
        tree.insert(key, &ev(i))?;
    }
    assert!(tree.height() >= 3);
    assert_eq!(tree.first_key(), keys.first().copied());
    assert_eq!(tree.last_key(), keys.last().copied());

    for _ in 0..200 {
        let probe = rng.gen_range(0..=key + 2);
        let expected_rank = keys.partition_point(|&k| k < probe) as u64;
        let mut it = tree.seek(probe, Match::First)?;
        assert_eq!(it.rank(), Some(expected_rank));
        assert_eq!(it.next()?.map(|(k, _)| k), keys.get(expected_rank as usize).copied());

        let low = rng.gen_range(0..=key);
        let high = low + rng.gen_range(0..500);
        let expected = keys.iter().filter(|&&k| k >= low && k <= high).count() as u64;
        assert_eq!(tree.count_between(low, high)?, expected);

        let rank = rng.gen_range(0..keys.len() as u64);
        assert_eq!(tree.nth(rank)?, Some((keys[rank as usize], ev(rank))));
    }
    Ok(())
}

#[test]
fn delta_tree_matches_ordered_map() -> Result<()> {
    let tree = DeltaTree::<EventRef>::new(mem_pager(512)?, Arc::new(BTreeStats::default()));
    let mut rng = ChaCha8Rng::seed_from_u64(77);
    let mut keys: Vec<u64> = (0..6_000u64).map(|k| k * 3).collect();
    keys.shuffle(&mut rng);

    let mut oracle: BTreeMap<u64, Vec<EventRef>> = BTreeMap::new();
    for (i, &key) in keys.iter().enumerate() {
        let key = if i % 7 == 0 { key / 2 } else { key };
        tree.insert(key, &ev(i as u64))?;
        oracle.entry(key).or_default().push(ev(i as u64));
    }
    assert_eq!(tree.len(), keys.len() as u64);

    let expected: Vec<u64> = oracle
        .iter()
        .flat_map(|(k, values)| std::iter::repeat(*k).take(values.len()))
        .collect();
    assert_eq!(keys_forward(&mut tree.seek(0)?)?, expected);
    for probe in [0u64, 1, 2, 4_500, 9_001, 17_997, 18_000] {
        let values = oracle.get(&probe).cloned().unwrap_or_default();
        assert_eq!(tree.get_values(probe)?, values, "key {probe}");
    }
    Ok(())
}

#[test]
fn call_nesting_survives_reopen() -> Result<()> {
    let tmp = NamedTempFile::new()?;
    let options = PagerOptions::default().page_size(512).cache_bytes(512 * 8);
    let stats = Arc::new(BTreeStats::default());

    let root = {
        let pager = Arc::new(PagedFile::create(Arc::new(StdFileIo::open(tmp.path())?), options.clone())?);
        let nesting = OpenCloseIndex::new(pager.clone(), stats.clone());
        // calls open at even timestamps below 2_000 and close in mirror order
        for ts in 0..1_000u64 {
            nesting.push(ts * 2, InternalPointer(ts), true)?;
        }
        for ts in 0..1_000u64 {
            nesting.push(2_000 + ts * 2, InternalPointer(1_000 + ts), false)?;
        }
        pager.flush()?;
        nesting.root()
    };

    let pager = Arc::new(PagedFile::open(Arc::new(StdFileIo::open(tmp.path())?), options)?);
    let nesting = OpenCloseIndex::restore(pager, stats, &root)?;
    assert_eq!(nesting.len(), 2_000);
    assert_eq!(nesting.depth_at(999)?, 500);
    assert_eq!(nesting.enclosing(999)?, Some((998, InternalPointer(499))));
    assert_eq!(nesting.enclosing(2_001)?, Some((1_996, InternalPointer(998))));
    assert_eq!(nesting.enclosing(4_000)?, None);
    Ok(())
}
