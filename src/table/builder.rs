use anyhow::{ensure, Result};

use super::bloom::{bloom_hash, Bloom};
use super::{IndexEntry, SSTInfo};
use crate::block::{BlockBuilder, BlockHandle};
use crate::file::FileWriter;
use crate::key::{InternalKey, ParsedKey};

/// Streams sorted records into one SST file: blocks as they fill, then
/// the index, the Bloom filter and the boundary keys.
pub struct SSTableBuilder {
    writer: FileWriter,
    block: BlockBuilder,
    block_size: usize,
    bloom_bits_per_key: usize,
    index: Vec<IndexEntry>,
    /// largest key appended to the block currently being built
    block_largest: Option<InternalKey>,
    smallest: Option<InternalKey>,
    largest: Option<InternalKey>,
    key_hashes: Vec<u64>,
    count: u64,
    index_offset: u64,
    bloom_filter_offset: u64,
}

impl SSTableBuilder {
    pub fn new(writer: FileWriter, block_size: usize, bloom_bits_per_key: usize) -> Self {
        Self {
            writer,
            block: BlockBuilder::new(block_size),
            block_size,
            bloom_bits_per_key,
            index: Vec::new(),
            block_largest: None,
            smallest: None,
            largest: None,
            key_hashes: Vec::new(),
            count: 0,
            index_offset: 0,
            bloom_filter_offset: 0,
        }
    }

    /// Appends one record. Keys must arrive in ascending internal-key
    /// order; a full block is flushed and a new one started.
    pub fn append(&mut self, key: ParsedKey, value: &[u8]) -> Result<()> {
        if !self.block.append(key, value) {
            self.finish_block()?;
            assert!(self.block.append(key, value));
        }
        let ik = key.to_internal_key();
        if self.smallest.is_none() {
            self.smallest = Some(ik.clone());
        }
        self.largest = Some(ik.clone());
        self.block_largest = Some(ik);
        self.key_hashes.push(bloom_hash(key.user_key));
        self.count += 1;
        Ok(())
    }

    /// Bytes this SST would occupy right now; gates SST rotation in
    /// compaction jobs.
    pub fn estimated_size(&self) -> u64 {
        self.writer.written() + self.block.estimated_size() as u64
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    fn finish_block(&mut self) -> Result<()> {
        if self.block.is_empty() {
            return Ok(());
        }
        let block = std::mem::replace(&mut self.block, BlockBuilder::new(self.block_size));
        let count = block.count();
        let raw = block.finish();
        let handle = BlockHandle {
            offset: self.writer.written(),
            size: raw.len() as u64,
            count,
        };
        self.writer.append_slice(&raw)?;
        self.index.push(IndexEntry {
            key: self.block_largest.take().unwrap(),
            handle,
        });
        Ok(())
    }

    /// Finalizes the file: last block, index, Bloom filter, boundary
    /// keys, flush. Returns the info the metadata file records.
    pub fn finish(mut self, sst_id: u64, filename: String) -> Result<SSTInfo> {
        ensure!(self.count > 0, "refusing to build an empty SST");
        self.finish_block()?;
        self.index_offset = self.writer.written();
        for entry in &self.index {
            self.writer.append_u32(entry.key.len() as u32)?;
            self.writer.append_slice(entry.key.as_bytes())?;
            self.writer.append_u64(entry.handle.offset)?;
            self.writer.append_u64(entry.handle.size)?;
            self.writer.append_u64(entry.handle.count)?;
        }
        self.bloom_filter_offset = self.writer.written();
        let bloom = Bloom::build_from_key_hashes(&self.key_hashes, self.bloom_bits_per_key);
        let mut bloom_bytes = Vec::with_capacity(bloom.encoded_len());
        bloom.encode(&mut bloom_bytes);
        self.writer.append_u64(bloom_bytes.len() as u64)?;
        self.writer.append_slice(&bloom_bytes)?;
        let smallest = self.smallest.take().unwrap();
        let largest = self.largest.take().unwrap();
        self.writer.append_u64(smallest.len() as u64)?;
        self.writer.append_slice(smallest.as_bytes())?;
        self.writer.append_u64(largest.len() as u64)?;
        self.writer.append_slice(largest.as_bytes())?;
        self.writer.finish()?;
        Ok(SSTInfo {
            count: self.count,
            size: self.writer.written(),
            sst_id,
            index_offset: self.index_offset,
            bloom_filter_offset: self.bloom_filter_offset,
            filename,
        })
    }
}
