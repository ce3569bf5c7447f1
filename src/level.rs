use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

use crate::iterators::StorageIterator;
use crate::key::{GetResult, InternalKey, ParsedKey, RecordType};
use crate::table::{SSTable, SSTableIterator};

/// A non-empty sequence of key-disjoint SSTs sorted by smallest key,
/// readable as one sorted stream. Binary search over member SSTs is
/// valid.
pub struct SortedRun {
    ssts: Vec<Arc<SSTable>>,
    size: u64,
    /// set when the run leaves its last version; propagated to member
    /// SSTs on drop so their files get deleted
    remove_tag: AtomicBool,
    compaction_in_progress: AtomicBool,
}

impl SortedRun {
    pub fn new(ssts: Vec<Arc<SSTable>>) -> Self {
        assert!(!ssts.is_empty(), "a sorted run cannot be empty");
        let size = ssts.iter().map(|s| s.size()).sum();
        Self {
            ssts,
            size,
            remove_tag: AtomicBool::new(false),
            compaction_in_progress: AtomicBool::new(false),
        }
    }

    pub fn ssts(&self) -> &[Arc<SSTable>] {
        &self.ssts
    }

    pub fn sst_count(&self) -> usize {
        self.ssts.len()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn smallest_key(&self) -> &InternalKey {
        self.ssts.first().unwrap().smallest_key()
    }

    pub fn largest_key(&self) -> &InternalKey {
        self.ssts.last().unwrap().largest_key()
    }

    /// Index of the first SST whose largest key is ≥ `target`.
    fn find_sst_idx(&self, target: ParsedKey) -> usize {
        let (mut lo, mut hi) = (0usize, self.ssts.len() - 1);
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.ssts[mid].largest_key().parse() >= target {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo
    }

    pub fn get(&self, user_key: &[u8], seq: u64) -> Result<GetResult> {
        if user_key < self.smallest_key().user_key() || user_key > self.largest_key().user_key() {
            return Ok(GetResult::NotFound);
        }
        let target = ParsedKey::new(user_key, seq, RecordType::Value);
        self.ssts[self.find_sst_idx(target)].get(user_key, seq)
    }

    pub fn set_remove_tag(&self, v: bool) {
        self.remove_tag.store(v, Ordering::SeqCst);
    }

    pub fn remove_tag(&self) -> bool {
        self.remove_tag.load(Ordering::SeqCst)
    }

    pub fn set_compaction_in_progress(&self, v: bool) {
        self.compaction_in_progress.store(v, Ordering::SeqCst);
    }

    pub fn compaction_in_progress(&self) -> bool {
        self.compaction_in_progress.load(Ordering::SeqCst)
    }
}

impl Drop for SortedRun {
    fn drop(&mut self) {
        if self.remove_tag() {
            for sst in &self.ssts {
                sst.set_remove_tag(true);
            }
        }
    }
}

/// Concatenates the member SSTs of one run in key order.
pub struct SortedRunIterator {
    run: Arc<SortedRun>,
    current: Option<SSTableIterator>,
    sst_idx: usize,
}

impl SortedRunIterator {
    pub fn create_and_seek_to_first(run: Arc<SortedRun>) -> Result<Self> {
        let current = Some(SSTableIterator::create_and_seek_to_first(
            run.ssts[0].clone(),
        )?);
        let mut iter = Self {
            run,
            current,
            sst_idx: 0,
        };
        iter.move_until_valid()?;
        Ok(iter)
    }

    pub fn create_and_seek(run: Arc<SortedRun>, user_key: &[u8], seq: u64) -> Result<Self> {
        let target = ParsedKey::new(user_key, seq, RecordType::Value);
        if target > run.largest_key().parse() {
            let sst_idx = run.ssts.len();
            return Ok(Self {
                run,
                current: None,
                sst_idx,
            });
        }
        let sst_idx = run.find_sst_idx(target);
        let current = Some(SSTableIterator::create_and_seek_to_key(
            run.ssts[sst_idx].clone(),
            user_key,
            seq,
        )?);
        let mut iter = Self {
            run,
            current,
            sst_idx,
        };
        iter.move_until_valid()?;
        Ok(iter)
    }

    /// Rolls to the next SST while the current position is exhausted.
    fn move_until_valid(&mut self) -> Result<()> {
        while let Some(current) = self.current.as_ref() {
            if current.is_valid() {
                break;
            }
            self.sst_idx += 1;
            if self.sst_idx >= self.run.ssts.len() {
                self.current = None;
            } else {
                self.current = Some(SSTableIterator::create_and_seek_to_first(
                    self.run.ssts[self.sst_idx].clone(),
                )?);
            }
        }
        Ok(())
    }
}

impl StorageIterator for SortedRunIterator {
    type KeyType<'a> = ParsedKey<'a>;

    fn key(&self) -> ParsedKey<'_> {
        self.current.as_ref().unwrap().key()
    }

    fn value(&self) -> &[u8] {
        self.current.as_ref().unwrap().value()
    }

    fn is_valid(&self) -> bool {
        self.current
            .as_ref()
            .map(|it| it.is_valid())
            .unwrap_or(false)
    }

    fn next(&mut self) -> Result<()> {
        self.current.as_mut().unwrap().next()?;
        self.move_until_valid()
    }
}

/// An ordered list of sorted runs. Level 0 holds one run per flushed
/// memtable and its runs may overlap; reads walk them newest (last
/// appended) first.
#[derive(Clone)]
pub struct Level {
    id: usize,
    runs: Vec<Arc<SortedRun>>,
    size: u64,
}

impl Level {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            runs: Vec::new(),
            size: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn runs(&self) -> &[Arc<SortedRun>] {
        &self.runs
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn get(&self, user_key: &[u8], seq: u64) -> Result<GetResult> {
        for run in self.runs.iter().rev() {
            let res = run.get(user_key, seq)?;
            if res != GetResult::NotFound {
                return Ok(res);
            }
        }
        Ok(GetResult::NotFound)
    }

    pub fn append(&mut self, run: Arc<SortedRun>) {
        self.size += run.size();
        self.runs.push(run);
    }

    pub fn append_all(&mut self, runs: Vec<Arc<SortedRun>>) {
        for run in runs {
            self.append(run);
        }
    }
}
