pub(crate) mod bloom;
pub mod builder;
pub mod iterator;

pub use builder::SSTableBuilder;
pub use iterator::SSTableIterator;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, ensure, Result};
use bytes::Bytes;
use log::warn;

use self::bloom::{bloom_hash, Bloom};
use crate::block::{Block, BlockHandle, BlockIterator};
use crate::file::{FileReader, ReadFile};
use crate::key::{GetResult, InternalKey, ParsedKey, RecordType};
use crate::lsm_storage::BlockCache;

/// Everything needed to open an SST; persisted in the metadata file, not
/// in the SST itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SSTInfo {
    pub count: u64,
    pub size: u64,
    pub sst_id: u64,
    pub index_offset: u64,
    pub bloom_filter_offset: u64,
    pub filename: String,
}

#[derive(Clone)]
pub(crate) struct IndexEntry {
    /// largest internal key in the block
    pub key: InternalKey,
    pub handle: BlockHandle,
}

/// An immutable sorted file: blocks, an index of per-block largest keys,
/// a Bloom filter over user keys, and the boundary keys.
pub struct SSTable {
    pub(crate) file: ReadFile,
    pub(crate) index: Vec<IndexEntry>,
    info: SSTInfo,
    bloom: Bloom,
    smallest: InternalKey,
    largest: InternalKey,
    block_cache: Option<Arc<BlockCache>>,
    /// set when the SST leaves its last sorted run; the backing file is
    /// deleted on drop
    remove_tag: AtomicBool,
    compaction_in_progress: AtomicBool,
}

impl SSTable {
    /// Opens an SST from its recorded info: reads index entries up to the
    /// bloom offset, then the filter, then the boundary keys.
    pub fn open(
        info: SSTInfo,
        block_cache: Option<Arc<BlockCache>>,
        use_direct_io: bool,
    ) -> Result<Self> {
        let file = ReadFile::open(&info.filename, use_direct_io)?;
        let mut reader = FileReader::new(&file, 1 << 16, info.index_offset);
        let mut index = Vec::new();
        while reader.position() < info.bloom_filter_offset {
            let key_len = reader.read_u32()? as usize;
            let key = InternalKey::from_encoded(reader.read_bytes(key_len)?);
            let handle = BlockHandle {
                offset: reader.read_u64()?,
                size: reader.read_u64()?,
                count: reader.read_u64()?,
            };
            index.push(IndexEntry { key, handle });
        }
        ensure!(
            reader.position() == info.bloom_filter_offset && !index.is_empty(),
            "corrupt SST index in {}",
            info.filename
        );
        let bloom_len = reader.read_u64()? as usize;
        let bloom = Bloom::decode(&reader.read_bytes(bloom_len)?);
        let smallest_len = reader.read_u64()? as usize;
        let smallest = InternalKey::from_encoded(reader.read_bytes(smallest_len)?);
        let largest_len = reader.read_u64()? as usize;
        let largest = InternalKey::from_encoded(reader.read_bytes(largest_len)?);
        drop(reader);
        Ok(Self {
            file,
            index,
            info,
            bloom,
            smallest,
            largest,
            block_cache,
            remove_tag: AtomicBool::new(false),
            compaction_in_progress: AtomicBool::new(false),
        })
    }

    /// Point lookup: Bloom reject, index binary search, block seek.
    pub fn get(&self, user_key: &[u8], seq: u64) -> Result<GetResult> {
        if !self.bloom.may_contain(bloom_hash(user_key)) {
            return Ok(GetResult::NotFound);
        }
        let target = ParsedKey::new(user_key, seq, RecordType::Value);
        let Some(block_idx) = self.find_block_idx(target) else {
            return Ok(GetResult::NotFound);
        };
        let block = self.read_block_cached(block_idx)?;
        let iter = BlockIterator::create_and_seek_to_key(block, user_key, seq);
        if iter.is_valid() {
            let found = iter.key();
            if found.user_key == user_key && found.seq <= seq {
                return Ok(match found.record_type {
                    RecordType::Deletion => GetResult::Deleted,
                    RecordType::Value => GetResult::Found(Bytes::copy_from_slice(iter.value())),
                });
            }
        }
        Ok(GetResult::NotFound)
    }

    /// First block whose largest key is ≥ `target`, or None when the
    /// target sorts past the whole table.
    pub(crate) fn find_block_idx(&self, target: ParsedKey) -> Option<usize> {
        if target > self.largest.parse() {
            return None;
        }
        let (mut lo, mut hi) = (0usize, self.index.len() - 1);
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.index[mid].key.parse() >= target {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        Some(lo)
    }

    pub(crate) fn read_block(&self, block_idx: usize) -> Result<Arc<Block>> {
        let handle = self.index[block_idx].handle;
        let mut buf = vec![0u8; handle.size as usize];
        self.file.read(&mut buf, handle.offset)?;
        Ok(Arc::new(Block::decode(&buf, handle.count as usize)))
    }

    pub(crate) fn read_block_cached(&self, block_idx: usize) -> Result<Arc<Block>> {
        if let Some(cache) = &self.block_cache {
            cache
                .try_get_with((self.info.sst_id, block_idx), || self.read_block(block_idx))
                .map_err(|e| anyhow!("{}", e))
        } else {
            self.read_block(block_idx)
        }
    }

    pub fn smallest_key(&self) -> &InternalKey {
        &self.smallest
    }

    pub fn largest_key(&self) -> &InternalKey {
        &self.largest
    }

    pub fn info(&self) -> &SSTInfo {
        &self.info
    }

    pub fn sst_id(&self) -> u64 {
        self.info.sst_id
    }

    pub fn size(&self) -> u64 {
        self.info.size
    }

    pub fn count(&self) -> u64 {
        self.info.count
    }

    pub fn num_blocks(&self) -> usize {
        self.index.len()
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

impl Drop for SSTable {
    fn drop(&mut self) {
        if self.remove_tag() {
            if let Err(e) = std::fs::remove_file(&self.info.filename) {
                warn!("failed to remove {}: {}", self.info.filename, e);
            }
        }
    }
}
