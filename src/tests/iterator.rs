use std::ops::Bound;
use std::sync::Arc;

use tempfile::tempdir;

use super::harness::build_sst;
use crate::file::FileNameGenerator;
use crate::iterators::merge_iterator::MergeIterator;
use crate::iterators::two_merge_iterator::TwoMergeIterator;
use crate::iterators::StorageIterator;
use crate::key::RecordType;
use crate::level::{SortedRun, SortedRunIterator};
use crate::mem_table::MemTable;

#[test]
fn test_merge_iterator_interleaves_and_orders() {
    let a = MemTable::create(0);
    a.put(b"a", 1, b"1");
    a.put(b"c", 3, b"3");
    let b = MemTable::create(1);
    b.put(b"b", 2, b"2");
    b.put(b"d", 4, b"4");
    let mut iter = MergeIterator::create(vec![
        Box::new(a.scan(Bound::Unbounded)),
        Box::new(b.scan(Bound::Unbounded)),
    ]);
    let mut seen = Vec::new();
    while iter.is_valid() {
        seen.push(iter.key().user_key.to_vec());
        iter.next().unwrap();
    }
    assert_eq!(
        seen,
        vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]
    );
}

#[test]
fn test_merge_iterator_version_order_across_sources() {
    // Two sources carry different versions of one user key; the newer
    // sequence must come out first regardless of source.
    let old = MemTable::create(0);
    old.put(b"k", 1, b"old");
    let new = MemTable::create(1);
    new.put(b"k", 7, b"new");
    let mut iter = MergeIterator::create(vec![
        Box::new(old.scan(Bound::Unbounded)),
        Box::new(new.scan(Bound::Unbounded)),
    ]);
    assert_eq!(iter.key().seq, 7);
    assert_eq!(iter.value(), b"new");
    iter.next().unwrap();
    assert_eq!(iter.key().seq, 1);
    assert_eq!(iter.value(), b"old");
    iter.next().unwrap();
    assert!(!iter.is_valid());
}

#[test]
fn test_two_merge_iterator_prefers_a() {
    let dir = tempdir().unwrap();
    let file_gen = FileNameGenerator::new(dir.path(), 0);
    let mem = MemTable::create(0);
    mem.put(b"a", 5, b"mem");
    mem.put(b"b", 6, b"mem-b");
    let run = Arc::new(SortedRun::new(vec![build_sst(
        &file_gen,
        256,
        &[
            (b"a", 5, RecordType::Value, b"sst"),
            (b"c", 1, RecordType::Value, b"sst-c"),
        ],
    )]));
    let mem_iter = MergeIterator::create(vec![Box::new(mem.scan(Bound::Unbounded))]);
    let run_iter = MergeIterator::create(vec![Box::new(
        SortedRunIterator::create_and_seek_to_first(run).unwrap(),
    )]);
    let mut iter = TwoMergeIterator::create(mem_iter, run_iter).unwrap();
    // (a,5) exists on both sides; the first iterator wins.
    assert_eq!(iter.value(), b"mem");
    let mut seen = Vec::new();
    while iter.is_valid() {
        seen.push((iter.key().user_key.to_vec(), iter.value().to_vec()));
        iter.next().unwrap();
    }
    assert_eq!(
        seen,
        vec![
            (b"a".to_vec(), b"mem".to_vec()),
            (b"b".to_vec(), b"mem-b".to_vec()),
            (b"c".to_vec(), b"sst-c".to_vec()),
        ]
    );
}

#[test]
fn test_sorted_run_iterator_rolls_across_ssts() {
    let dir = tempdir().unwrap();
    let file_gen = FileNameGenerator::new(dir.path(), 0);
    let run = Arc::new(SortedRun::new(vec![
        build_sst(
            &file_gen,
            256,
            &[
                (b"a", 1, RecordType::Value, b"1"),
                (b"b", 1, RecordType::Value, b"2"),
            ],
        ),
        build_sst(
            &file_gen,
            256,
            &[
                (b"c", 1, RecordType::Value, b"3"),
                (b"d", 1, RecordType::Value, b"4"),
            ],
        ),
    ]));
    let mut iter = SortedRunIterator::create_and_seek_to_first(run.clone()).unwrap();
    let mut seen = Vec::new();
    while iter.is_valid() {
        seen.push(iter.key().user_key.to_vec());
        iter.next().unwrap();
    }
    assert_eq!(
        seen,
        vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]
    );

    // Seek straight into the second SST.
    let iter = SortedRunIterator::create_and_seek(run.clone(), b"c", u64::MAX).unwrap();
    assert_eq!(iter.key().user_key, b"c");
    // Seek into the gap between SSTs lands on the next key.
    let iter = SortedRunIterator::create_and_seek(run.clone(), b"bb", u64::MAX).unwrap();
    assert_eq!(iter.key().user_key, b"c");
    let iter = SortedRunIterator::create_and_seek(run, b"x", u64::MAX).unwrap();
    assert!(!iter.is_valid());
}

#[test]
fn test_sorted_run_get_binary_search() {
    let dir = tempdir().unwrap();
    let file_gen = FileNameGenerator::new(dir.path(), 0);
    let run = SortedRun::new(vec![
        build_sst(&file_gen, 256, &[(b"b", 1, RecordType::Value, b"1")]),
        build_sst(&file_gen, 256, &[(b"d", 1, RecordType::Value, b"2")]),
        build_sst(&file_gen, 256, &[(b"f", 1, RecordType::Value, b"3")]),
    ]);
    use crate::key::GetResult;
    assert_eq!(
        run.get(b"d", 5).unwrap(),
        GetResult::Found(bytes::Bytes::from_static(b"2"))
    );
    // Out of bounds on both sides and in a gap.
    assert_eq!(run.get(b"a", 5).unwrap(), GetResult::NotFound);
    assert_eq!(run.get(b"e", 5).unwrap(), GetResult::NotFound);
    assert_eq!(run.get(b"z", 5).unwrap(), GetResult::NotFound);
}
