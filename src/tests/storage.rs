use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tempfile::tempdir;

use super::harness::{
    check_lsm_iter_result_by_key, count_sst_files, open_for_test, test_options, wait_until,
};
use crate::iterators::StorageIterator;
use crate::lsm_storage::LsmStorage;

#[test]
fn test_put_get_basic() {
    let dir = tempdir().unwrap();
    let storage = open_for_test(&dir);
    storage.put(b"a", b"1").unwrap();
    storage.put(b"b", b"2").unwrap();
    assert_eq!(storage.get(b"a").unwrap(), Some(Bytes::from_static(b"1")));
    assert_eq!(storage.get(b"b").unwrap(), Some(Bytes::from_static(b"2")));
    assert_eq!(storage.get(b"c").unwrap(), None);
}

#[test]
fn test_empty_db() {
    let dir = tempdir().unwrap();
    let storage = open_for_test(&dir);
    assert_eq!(storage.get(b"anything").unwrap(), None);
    let mut iter = storage.begin().unwrap();
    check_lsm_iter_result_by_key(&mut iter, vec![]);
}

#[test]
fn test_del_shadows_put() {
    let dir = tempdir().unwrap();
    let storage = open_for_test(&dir);
    storage.put(b"k", b"v1").unwrap();
    storage.del(b"k").unwrap();
    assert_eq!(storage.get(b"k").unwrap(), None);
    // Deleting an absent key is a no-op for reads.
    storage.del(b"ghost").unwrap();
    assert_eq!(storage.get(b"ghost").unwrap(), None);
}

#[test]
fn test_put_del_put_same_key() {
    let dir = tempdir().unwrap();
    let storage = open_for_test(&dir);
    storage.put(b"k", b"v1").unwrap();
    storage.del(b"k").unwrap();
    storage.put(b"k", b"v2").unwrap();
    assert_eq!(storage.get(b"k").unwrap(), Some(Bytes::from_static(b"v2")));
    let mut iter = storage.begin().unwrap();
    check_lsm_iter_result_by_key(&mut iter, vec![(Bytes::from("k"), Bytes::from("v2"))]);
}

#[test]
fn test_iterator_is_a_stable_snapshot() {
    let dir = tempdir().unwrap();
    let storage = open_for_test(&dir);
    storage.put(b"a", b"1").unwrap();
    storage.put(b"b", b"1").unwrap();
    let mut snapshot = storage.begin().unwrap();
    // Writes after the snapshot must stay invisible to it.
    storage.put(b"a", b"2").unwrap();
    storage.del(b"b").unwrap();
    storage.put(b"c", b"1").unwrap();
    check_lsm_iter_result_by_key(
        &mut snapshot,
        vec![
            (Bytes::from("a"), Bytes::from("1")),
            (Bytes::from("b"), Bytes::from("1")),
        ],
    );
    let mut now = storage.begin().unwrap();
    check_lsm_iter_result_by_key(
        &mut now,
        vec![
            (Bytes::from("a"), Bytes::from("2")),
            (Bytes::from("c"), Bytes::from("1")),
        ],
    );
}

#[test]
fn test_snapshot_survives_flush() {
    let dir = tempdir().unwrap();
    let storage = open_for_test(&dir);
    storage.put(b"a", b"1").unwrap();
    storage.put(b"b", b"1").unwrap();
    let mut snapshot = storage.begin().unwrap();
    storage.put(b"a", b"2").unwrap();
    storage.flush_all().unwrap();
    check_lsm_iter_result_by_key(
        &mut snapshot,
        vec![
            (Bytes::from("a"), Bytes::from("1")),
            (Bytes::from("b"), Bytes::from("1")),
        ],
    );
    assert_eq!(storage.get(b"a").unwrap(), Some(Bytes::from_static(b"2")));
}

#[test]
fn test_flush_and_read_back() {
    let dir = tempdir().unwrap();
    let storage = open_for_test(&dir);
    // ~10 memtables worth of distinct keys.
    let n = 500u32;
    for i in 0..n {
        storage
            .put(
                format!("key-{i:05}").as_bytes(),
                format!("value-{i}").as_bytes(),
            )
            .unwrap();
    }
    storage.flush_all().unwrap();
    {
        let sv = storage.inner.get_sv();
        assert!(sv.memtable().is_empty());
        assert!(sv.imms().is_empty());
        let total_runs: usize = sv
            .version()
            .levels()
            .iter()
            .map(|l| l.runs().len())
            .sum();
        assert!(total_runs >= 1, "flush must have produced runs");
    }
    for i in 0..n {
        assert_eq!(
            storage.get(format!("key-{i:05}").as_bytes()).unwrap(),
            Some(Bytes::from(format!("value-{i}"))),
            "lost key-{i:05}"
        );
    }
    let mut iter = storage.begin().unwrap();
    let mut count = 0;
    while iter.is_valid() {
        count += 1;
        iter.next().unwrap();
    }
    assert_eq!(count, n);
}

#[test]
fn test_tombstone_across_flushes() {
    let dir = tempdir().unwrap();
    let storage = open_for_test(&dir);
    storage.put(b"k", b"v1").unwrap();
    storage.flush_all().unwrap();
    storage.del(b"k").unwrap();
    storage.flush_all().unwrap();
    assert_eq!(storage.get(b"k").unwrap(), None);
    let mut iter = storage.begin().unwrap();
    check_lsm_iter_result_by_key(&mut iter, vec![]);
}

#[test]
fn test_seek_positions_mid_range() {
    let dir = tempdir().unwrap();
    let storage = open_for_test(&dir);
    for key in [b"apple".as_ref(), b"berry", b"cherry", b"grape"] {
        storage.put(key, b"v").unwrap();
    }
    storage.flush_all().unwrap();
    storage.put(b"fig", b"v").unwrap();
    let mut iter = storage.seek(b"berry").unwrap();
    assert!(iter.is_valid());
    assert_eq!(iter.key(), b"berry");
    let mut keys = Vec::new();
    while iter.is_valid() {
        keys.push(iter.key().to_vec());
        iter.next().unwrap();
    }
    assert_eq!(
        keys,
        vec![
            b"berry".to_vec(),
            b"cherry".to_vec(),
            b"fig".to_vec(),
            b"grape".to_vec(),
        ]
    );
    let iter = storage.seek(b"zzz").unwrap();
    assert!(!iter.is_valid());
}

#[test]
fn test_reopen_restores_mapping_and_seq() {
    let dir = tempdir().unwrap();
    let n = 300u32;
    let seq_at_close;
    {
        let storage = open_for_test(&dir);
        for i in 0..n {
            storage
                .put(format!("k{i:04}").as_bytes(), format!("v{i}").as_bytes())
                .unwrap();
        }
        for i in (0..n).step_by(3) {
            storage.del(format!("k{i:04}").as_bytes()).unwrap();
        }
        storage.flush_all().unwrap();
        seq_at_close = storage.inner.seq();
        storage.close().unwrap();
    }
    let mut options = test_options();
    options.create_new = false;
    let storage = LsmStorage::open(&dir, options).unwrap();
    assert_eq!(storage.inner.seq(), seq_at_close);
    for i in 0..n {
        let expected = if i % 3 == 0 {
            None
        } else {
            Some(Bytes::from(format!("v{i}")))
        };
        assert_eq!(
            storage.get(format!("k{i:04}").as_bytes()).unwrap(),
            expected,
            "wrong value for k{i:04} after reopen"
        );
    }
    // Levels below 0 must stay sorted and disjoint after the round trip.
    let sv = storage.inner.get_sv();
    for level in sv.version().levels().iter().skip(1) {
        for run in level.runs() {
            for pair in run.ssts().windows(2) {
                assert!(pair[0].largest_key() < pair[1].smallest_key());
            }
        }
    }
}

#[test]
fn test_drop_all_empties_the_tree() {
    let dir = tempdir().unwrap();
    let storage = open_for_test(&dir);
    for i in 0..200u32 {
        storage
            .put(format!("k{i:04}").as_bytes(), &[9u8; 64])
            .unwrap();
    }
    storage.flush_all().unwrap();
    assert!(count_sst_files(&dir) > 0);
    storage.drop_all().unwrap();
    assert_eq!(storage.get(b"k0000").unwrap(), None);
    let mut iter = storage.begin().unwrap();
    check_lsm_iter_result_by_key(&mut iter, vec![]);
    assert!(
        wait_until(|| count_sst_files(&dir) == 0, Duration::from_secs(5)),
        "SST files must be deleted after drop_all"
    );
    // The store keeps working after the wipe.
    storage.put(b"fresh", b"1").unwrap();
    assert_eq!(
        storage.get(b"fresh").unwrap(),
        Some(Bytes::from_static(b"1"))
    );
}

#[test]
fn test_concurrent_writer_and_scanner() {
    let dir = tempdir().unwrap();
    let storage = Arc::new(open_for_test(&dir));
    let n_before = 100u32;
    for i in 0..n_before {
        storage
            .put(format!("pre-{i:04}").as_bytes(), b"old")
            .unwrap();
    }
    let mut snapshot = storage.begin().unwrap();
    let writer = {
        let storage = storage.clone();
        std::thread::spawn(move || {
            for i in 0..2000u32 {
                storage
                    .put(format!("new-{i:05}").as_bytes(), &[3u8; 32])
                    .unwrap();
            }
        })
    };
    // Scan while the writer races; only the pre-writer state may show.
    let mut seen = 0;
    while snapshot.is_valid() {
        assert!(snapshot.key().starts_with(b"pre-"));
        assert_eq!(snapshot.value(), b"old");
        seen += 1;
        snapshot.next().unwrap();
    }
    assert_eq!(seen, n_before);
    writer.join().unwrap();
    storage.flush_all().unwrap();
    let mut iter = storage.begin().unwrap();
    let mut total = 0;
    while iter.is_valid() {
        total += 1;
        iter.next().unwrap();
    }
    assert_eq!(total, n_before + 2000);
}

#[test]
fn test_backpressure_keeps_writes_correct() {
    let dir = tempdir().unwrap();
    let mut options = test_options();
    options.sst_file_size = 512;
    options.max_immutable_count = 1;
    let storage = LsmStorage::open(&dir, options).unwrap();
    for i in 0..300u32 {
        storage
            .put(format!("k{i:04}").as_bytes(), &[1u8; 48])
            .unwrap();
    }
    storage.flush_all().unwrap();
    for i in 0..300u32 {
        assert!(
            storage.get(format!("k{i:04}").as_bytes()).unwrap().is_some(),
            "lost k{i:04} under backpressure"
        );
    }
}

#[test]
fn test_close_rejects_further_calls() {
    let dir = tempdir().unwrap();
    let storage = open_for_test(&dir);
    storage.put(b"a", b"1").unwrap();
    storage.close().unwrap();
    assert!(storage.put(b"b", b"2").is_err());
    assert!(storage.get(b"a").is_err());
    assert!(storage.begin().is_err());
    // A second close is a no-op.
    storage.close().unwrap();
}

#[test]
fn test_options_dump_written_on_create() {
    let dir = tempdir().unwrap();
    let storage = open_for_test(&dir);
    let raw = std::fs::read_to_string(dir.path().join("OPTIONS.json")).unwrap();
    let parsed: crate::lsm_storage::LsmStorageOptions = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed.block_size, storage.inner.options.block_size);
    assert_eq!(
        parsed.compaction_strategy,
        storage.inner.options.compaction_strategy
    );
}

#[test]
fn test_leveled_workload_stays_readable() {
    let dir = tempdir().unwrap();
    let mut options = test_options();
    options.sst_file_size = 1024;
    options.level0_compaction_trigger = 2;
    options.compaction_size_ratio = 2;
    let storage = LsmStorage::open(&dir, options).unwrap();
    // Enough churn to force flushes and several compaction rounds,
    // with overwrites mixed in.
    for round in 0..5u32 {
        for i in 0..200u32 {
            storage
                .put(
                    format!("k{i:04}").as_bytes(),
                    format!("r{round}-{i}").as_bytes(),
                )
                .unwrap();
        }
        storage.flush_all().unwrap();
    }
    for i in 0..200u32 {
        assert_eq!(
            storage.get(format!("k{i:04}").as_bytes()).unwrap(),
            Some(Bytes::from(format!("r4-{i}"))),
            "stale or missing k{i:04}"
        );
    }
    storage.close().unwrap();
    let mut options = test_options();
    options.create_new = false;
    options.sst_file_size = 1024;
    options.level0_compaction_trigger = 2;
    options.compaction_size_ratio = 2;
    let reopened = LsmStorage::open(&dir, options).unwrap();
    for i in (0..200u32).step_by(7) {
        assert_eq!(
            reopened.get(format!("k{i:04}").as_bytes()).unwrap(),
            Some(Bytes::from(format!("r4-{i}")))
        );
    }
}

#[test]
fn test_background_error_is_sticky() {
    let dir = tempdir().unwrap();
    let mut options = test_options();
    options.sst_file_size = 512;
    let storage = LsmStorage::open(&dir, options).unwrap();
    storage.put(b"seed", b"v").unwrap();
    // Yank the directory out from under the engine; the next flush
    // cannot create its SST file and must park a sticky error.
    std::fs::remove_dir_all(&dir).unwrap();
    let mut i = 0u32;
    let failed = wait_until(
        || {
            i += 1;
            let _ = storage.put(format!("fill-{i:06}").as_bytes(), &[0u8; 64]);
            storage.get(b"seed").is_err()
        },
        Duration::from_secs(10),
    );
    assert!(failed, "background flush failure must surface to readers");
    assert!(storage.put(b"more", b"v").is_err());
}
