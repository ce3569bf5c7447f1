use tempfile::tempdir;

use super::harness::build_sst;
use crate::file::FileNameGenerator;
use crate::iterators::StorageIterator;
use crate::key::{GetResult, RecordType};
use crate::table::SSTableIterator;

#[test]
fn test_sst_build_and_get() {
    let dir = tempdir().unwrap();
    let file_gen = FileNameGenerator::new(dir.path(), 0);
    let entries: Vec<(Vec<u8>, u64, RecordType, Vec<u8>)> = (0..100u64)
        .map(|i| {
            (
                format!("key-{i:03}").into_bytes(),
                i + 1,
                RecordType::Value,
                format!("value-{i}").into_bytes(),
            )
        })
        .collect();
    let borrowed: Vec<(&[u8], u64, RecordType, &[u8])> = entries
        .iter()
        .map(|(k, s, t, v)| (k.as_slice(), *s, *t, v.as_slice()))
        .collect();
    let sst = build_sst(&file_gen, 256, &borrowed);

    // Small blocks force several of them.
    assert!(sst.num_blocks() > 1);
    assert_eq!(sst.count(), 100);
    assert_eq!(sst.smallest_key().user_key(), b"key-000");
    assert_eq!(sst.largest_key().user_key(), b"key-099");

    for (k, s, _, v) in &entries {
        match sst.get(k, *s).unwrap() {
            GetResult::Found(found) => assert_eq!(&found[..], v.as_slice()),
            other => panic!("expected Found for {k:?}, got {other:?}"),
        }
    }
    // A lookup below the entry's seq misses it.
    assert_eq!(sst.get(b"key-050", 1).unwrap(), GetResult::NotFound);
    // Absent keys are rejected, usually by the bloom filter.
    assert_eq!(sst.get(b"nope", u64::MAX).unwrap(), GetResult::NotFound);
}

#[test]
fn test_sst_tombstone_get() {
    let dir = tempdir().unwrap();
    let file_gen = FileNameGenerator::new(dir.path(), 0);
    let sst = build_sst(
        &file_gen,
        256,
        &[
            (b"a", 3, RecordType::Value, b"va"),
            (b"b", 5, RecordType::Deletion, b""),
            (b"b", 2, RecordType::Value, b"vb"),
        ],
    );
    assert_eq!(
        sst.get(b"a", 10).unwrap(),
        GetResult::Found(bytes::Bytes::from_static(b"va"))
    );
    // The tombstone is the newest visible record.
    assert_eq!(sst.get(b"b", 10).unwrap(), GetResult::Deleted);
    // Below the tombstone's seq the older value is visible again.
    assert_eq!(
        sst.get(b"b", 2).unwrap(),
        GetResult::Found(bytes::Bytes::from_static(b"vb"))
    );
}

#[test]
fn test_sst_iterator_scan_and_seek() {
    let dir = tempdir().unwrap();
    let file_gen = FileNameGenerator::new(dir.path(), 0);
    let entries: Vec<(Vec<u8>, u64, RecordType, Vec<u8>)> = (0..50u64)
        .map(|i| {
            (
                format!("k{i:02}").into_bytes(),
                1,
                RecordType::Value,
                format!("v{i}").into_bytes(),
            )
        })
        .collect();
    let borrowed: Vec<(&[u8], u64, RecordType, &[u8])> = entries
        .iter()
        .map(|(k, s, t, v)| (k.as_slice(), *s, *t, v.as_slice()))
        .collect();
    let sst = build_sst(&file_gen, 128, &borrowed);

    let mut iter = SSTableIterator::create_and_seek_to_first(sst.clone()).unwrap();
    let mut n = 0;
    let mut prev: Option<Vec<u8>> = None;
    while iter.is_valid() {
        let key = iter.key().user_key.to_vec();
        if let Some(p) = &prev {
            assert!(p < &key, "keys out of order");
        }
        prev = Some(key);
        n += 1;
        iter.next().unwrap();
    }
    assert_eq!(n, 50);

    // Seek into the middle, to a present key and to a gap.
    let iter = SSTableIterator::create_and_seek_to_key(sst.clone(), b"k25", u64::MAX).unwrap();
    assert_eq!(iter.key().user_key, b"k25");
    let iter = SSTableIterator::create_and_seek_to_key(sst.clone(), b"k25a", u64::MAX).unwrap();
    assert_eq!(iter.key().user_key, b"k26");
    let iter = SSTableIterator::create_and_seek_to_key(sst, b"z", u64::MAX).unwrap();
    assert!(!iter.is_valid());
}

#[test]
fn test_sst_remove_tag_deletes_file() {
    let dir = tempdir().unwrap();
    let file_gen = FileNameGenerator::new(dir.path(), 0);
    let sst = build_sst(&file_gen, 256, &[(b"a", 1, RecordType::Value, b"v")]);
    let filename = sst.info().filename.clone();
    assert!(std::path::Path::new(&filename).exists());
    sst.set_remove_tag(true);
    drop(sst);
    assert!(!std::path::Path::new(&filename).exists());
}
