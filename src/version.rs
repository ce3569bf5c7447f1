use std::fmt::Write as _;
use std::ops::Bound;
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;

use crate::iterators::merge_iterator::MergeIterator;
use crate::iterators::two_merge_iterator::TwoMergeIterator;
use crate::iterators::StorageIterator;
use crate::key::{GetResult, InternalKey, ParsedKey, RecordType};
use crate::level::{Level, SortedRun, SortedRunIterator};
use crate::mem_table::{MemTable, MemTableIterator};

/// The on-disk half of the tree: levels 0..L. Immutable once published;
/// flush and compaction build a new version and install it.
#[derive(Clone, Default)]
pub struct Version {
    levels: Vec<Level>,
}

impl Version {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    /// First non-NotFound result walking levels top-down: a deletion at
    /// a shallower level shadows anything older below it.
    pub fn get(&self, user_key: &[u8], seq: u64) -> Result<GetResult> {
        for level in &self.levels {
            let res = level.get(user_key, seq)?;
            if res != GetResult::NotFound {
                return Ok(res);
            }
        }
        Ok(GetResult::NotFound)
    }

    pub fn append(&mut self, level_id: usize, run: Arc<SortedRun>) {
        while self.levels.len() <= level_id {
            self.levels.push(Level::new(self.levels.len()));
        }
        self.levels[level_id].append(run);
    }

    pub fn append_all(&mut self, level_id: usize, runs: Vec<Arc<SortedRun>>) {
        while self.levels.len() <= level_id {
            self.levels.push(Level::new(self.levels.len()));
        }
        self.levels[level_id].append_all(runs);
    }
}

/// An atomic snapshot of the whole store: the mutable memtable, the
/// immutable memtables (newest first) and the on-disk version. Holding
/// one keeps every underlying file alive.
pub struct SuperVersion {
    memtable: Arc<MemTable>,
    imms: Vec<Arc<MemTable>>,
    version: Arc<Version>,
}

impl SuperVersion {
    pub fn new(memtable: Arc<MemTable>, imms: Vec<Arc<MemTable>>, version: Arc<Version>) -> Self {
        Self {
            memtable,
            imms,
            version,
        }
    }

    pub fn memtable(&self) -> &Arc<MemTable> {
        &self.memtable
    }

    pub fn imms(&self) -> &[Arc<MemTable>] {
        &self.imms
    }

    pub fn version(&self) -> &Arc<Version> {
        &self.version
    }

    /// Memtable, then immutables newest first, then the tree. The first
    /// definitive answer wins; a deletion reads as absent.
    pub fn get(&self, user_key: &[u8], seq: u64) -> Result<Option<Bytes>> {
        match self.memtable.get(user_key, seq) {
            GetResult::Found(v) => return Ok(Some(v)),
            GetResult::Deleted => return Ok(None),
            GetResult::NotFound => {}
        }
        for imm in &self.imms {
            match imm.get(user_key, seq) {
                GetResult::Found(v) => return Ok(Some(v)),
                GetResult::Deleted => return Ok(None),
                GetResult::NotFound => {}
            }
        }
        match self.version.get(user_key, seq)? {
            GetResult::Found(v) => Ok(Some(v)),
            _ => Ok(None),
        }
    }

    /// One-line shape summary for logging.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = write!(
            out,
            "memtable: {} bytes, immutables: {}, tree: [",
            self.memtable.approximate_size(),
            self.imms.len()
        );
        for level in self.version.levels() {
            let num_sst: usize = level.runs().iter().map(|r| r.sst_count()).sum();
            let _ = write!(out, " {}", num_sst);
        }
        out.push_str(" ]");
        out
    }
}

type SuperVersionIterInner =
    TwoMergeIterator<MergeIterator<MemTableIterator>, MergeIterator<SortedRunIterator>>;

/// Merges every memtable and every sorted run of one SuperVersion into a
/// single internal-key-ordered stream.
pub struct SuperVersionIterator {
    _sv: Arc<SuperVersion>,
    inner: SuperVersionIterInner,
}

impl SuperVersionIterator {
    pub fn create_and_seek_to_first(sv: Arc<SuperVersion>) -> Result<Self> {
        Self::create(sv, None)
    }

    pub fn create_and_seek(sv: Arc<SuperVersion>, user_key: &[u8], seq: u64) -> Result<Self> {
        Self::create(sv, Some((user_key, seq)))
    }

    fn create(sv: Arc<SuperVersion>, seek: Option<(&[u8], u64)>) -> Result<Self> {
        let lower = match seek {
            None => Bound::Unbounded,
            Some((user_key, seq)) => {
                Bound::Included(InternalKey::new(user_key, seq, RecordType::Value))
            }
        };
        let mut mem_iters = Vec::with_capacity(1 + sv.imms().len());
        mem_iters.push(Box::new(sv.memtable().scan(lower.clone())));
        for imm in sv.imms() {
            mem_iters.push(Box::new(imm.scan(lower.clone())));
        }
        let mut run_iters = Vec::new();
        for level in sv.version().levels() {
            for run in level.runs() {
                let iter = match seek {
                    None => SortedRunIterator::create_and_seek_to_first(run.clone())?,
                    Some((user_key, seq)) => {
                        SortedRunIterator::create_and_seek(run.clone(), user_key, seq)?
                    }
                };
                run_iters.push(Box::new(iter));
            }
        }
        let inner = TwoMergeIterator::create(
            MergeIterator::create(mem_iters),
            MergeIterator::create(run_iters),
        )?;
        Ok(Self { _sv: sv, inner })
    }
}

impl StorageIterator for SuperVersionIterator {
    type KeyType<'a> = ParsedKey<'a>;

    fn key(&self) -> ParsedKey<'_> {
        self.inner.key()
    }

    fn value(&self) -> &[u8] {
        self.inner.value()
    }

    fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    fn next(&mut self) -> Result<()> {
        self.inner.next()
    }

    fn number_of_iterators(&self) -> usize {
        self.inner.number_of_iterators()
    }
}
