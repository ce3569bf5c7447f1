// a basic memtable, based on crossbeam-skiplist.
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_skiplist::map::Entry;
use crossbeam_skiplist::SkipMap;
use ouroboros::self_referencing;

use crate::iterators::StorageIterator;
use crate::key::{GetResult, InternalKey, ParsedKey, RecordType, KEY_SUFFIX_LEN};

/// Mutable in-memory sorted store keyed by internal key, so every
/// `(user_key, seq)` version is its own entry and the newest version of a
/// user key sorts first. Safe for one writer (the write path serializes
/// writers) and many concurrent readers.
pub struct MemTable {
    pub(crate) map: Arc<SkipMap<InternalKey, Bytes>>,
    id: usize,
    approximate_size: Arc<AtomicUsize>,
    flush_in_progress: AtomicBool,
    flush_complete: AtomicBool,
}

impl MemTable {
    pub fn create(id: usize) -> Self {
        Self {
            id,
            map: Arc::new(SkipMap::new()),
            approximate_size: Arc::new(AtomicUsize::new(0)),
            flush_in_progress: AtomicBool::new(false),
            flush_complete: AtomicBool::new(false),
        }
    }

    /*----------------CRUD API and data manipulation------------------*/
    pub fn put(&self, user_key: &[u8], seq: u64, value: &[u8]) {
        let estimated_size = user_key.len() + KEY_SUFFIX_LEN + value.len();
        self.map.insert(
            InternalKey::new(user_key, seq, RecordType::Value),
            Bytes::copy_from_slice(value),
        );
        self.approximate_size
            .fetch_add(estimated_size, Ordering::Relaxed);
    }

    /// Inserts a tombstone for `user_key`.
    pub fn del(&self, user_key: &[u8], seq: u64) {
        let estimated_size = user_key.len() + KEY_SUFFIX_LEN;
        self.map.insert(
            InternalKey::new(user_key, seq, RecordType::Deletion),
            Bytes::new(),
        );
        self.approximate_size
            .fetch_add(estimated_size, Ordering::Relaxed);
    }

    /// Newest record of `user_key` with sequence ≤ `seq`, if any.
    pub fn get(&self, user_key: &[u8], seq: u64) -> GetResult {
        let lower = InternalKey::new(user_key, seq, RecordType::Value);
        if let Some(entry) = self
            .map
            .range((Bound::Included(lower), Bound::Unbounded))
            .next()
        {
            let found = entry.key().parse();
            if found.user_key == user_key && found.seq <= seq {
                return match found.record_type {
                    RecordType::Deletion => GetResult::Deleted,
                    RecordType::Value => GetResult::Found(entry.value().clone()),
                };
            }
        }
        GetResult::NotFound
    }

    /// Ordered iteration from `lower` to the end of the table.
    pub fn scan(&self, lower: Bound<InternalKey>) -> MemTableIterator {
        let mut iter = MemTableIteratorBuilder {
            map: self.map.clone(),
            iter_builder: |map| map.range((lower, Bound::Unbounded)),
            item: (InternalKey::default(), Bytes::new()),
        }
        .build();
        iter.next().unwrap();
        iter
    }

    /*-----------------flush bookkeeping-------------------*/
    pub fn set_flush_in_progress(&self, v: bool) {
        self.flush_in_progress.store(v, Ordering::SeqCst);
    }

    pub fn flush_in_progress(&self) -> bool {
        self.flush_in_progress.load(Ordering::SeqCst)
    }

    pub fn set_flush_complete(&self, v: bool) {
        self.flush_complete.store(v, Ordering::SeqCst);
    }

    pub fn flush_complete(&self) -> bool {
        self.flush_complete.load(Ordering::SeqCst)
    }

    /*-----------------util accessors-------------------*/
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Accumulated byte footprint; gates memtable switching.
    pub fn approximate_size(&self) -> usize {
        self.approximate_size.load(Ordering::Relaxed)
    }
}

type SkipMapRangeIter<'a> = crossbeam_skiplist::map::Range<
    'a,
    InternalKey,
    (Bound<InternalKey>, Bound<InternalKey>),
    InternalKey,
    Bytes,
>;

// self-referential: the range iterator borrows the map it walks.
#[self_referencing]
pub struct MemTableIterator {
    map: Arc<SkipMap<InternalKey, Bytes>>,

    #[borrows(map)]
    #[not_covariant]
    iter: SkipMapRangeIter<'this>,
    // the current entry; empty key means exhausted.
    item: (InternalKey, Bytes),
}

impl MemTableIterator {
    fn entry_to_item(entry: Option<Entry<'_, InternalKey, Bytes>>) -> (InternalKey, Bytes) {
        entry
            .map(|x| (x.key().clone(), x.value().clone()))
            .unwrap_or_else(|| (InternalKey::default(), Bytes::new()))
    }
}

impl StorageIterator for MemTableIterator {
    type KeyType<'a> = ParsedKey<'a>;

    fn key(&self) -> ParsedKey<'_> {
        self.borrow_item().0.parse()
    }

    fn value(&self) -> &[u8] {
        &self.borrow_item().1[..]
    }

    fn is_valid(&self) -> bool {
        !self.borrow_item().0.is_empty()
    }

    fn next(&mut self) -> anyhow::Result<()> {
        let entry = self.with_iter_mut(|iter| MemTableIterator::entry_to_item(iter.next()));
        self.with_mut(|x| *x.item = entry);
        Ok(())
    }
}
