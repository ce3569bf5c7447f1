use std::sync::Arc;

use anyhow::Result;

use super::SSTable;
use crate::block::BlockIterator;
use crate::iterators::StorageIterator;
use crate::key::{ParsedKey, RecordType};

/// Iterates one SSTable, loading blocks lazily through the block cache.
pub struct SSTableIterator {
    table: Arc<SSTable>,
    block_iter: Option<BlockIterator>,
    block_idx: usize,
}

impl SSTableIterator {
    pub fn create_and_seek_to_first(table: Arc<SSTable>) -> Result<Self> {
        let mut iter = Self {
            table,
            block_iter: None,
            block_idx: 0,
        };
        iter.seek_to_first()?;
        Ok(iter)
    }

    pub fn create_and_seek_to_key(table: Arc<SSTable>, user_key: &[u8], seq: u64) -> Result<Self> {
        let mut iter = Self {
            table,
            block_iter: None,
            block_idx: 0,
        };
        iter.seek(user_key, seq)?;
        Ok(iter)
    }

    pub fn seek_to_first(&mut self) -> Result<()> {
        self.block_idx = 0;
        self.block_iter = Some(BlockIterator::create_and_seek_to_first(
            self.table.read_block_cached(0)?,
        ));
        Ok(())
    }

    /// Positions on the first entry ≥ `(user_key, seq, Value)`, rolling
    /// into the next block when the target falls past a block boundary.
    pub fn seek(&mut self, user_key: &[u8], seq: u64) -> Result<()> {
        let target = ParsedKey::new(user_key, seq, RecordType::Value);
        let Some(mut block_idx) = self.table.find_block_idx(target) else {
            self.block_idx = self.table.num_blocks();
            self.block_iter = None;
            return Ok(());
        };
        let mut block_iter = BlockIterator::create_and_seek_to_key(
            self.table.read_block_cached(block_idx)?,
            user_key,
            seq,
        );
        if !block_iter.is_valid() {
            block_idx += 1;
            if block_idx < self.table.num_blocks() {
                block_iter = BlockIterator::create_and_seek_to_first(
                    self.table.read_block_cached(block_idx)?,
                );
            }
        }
        self.block_idx = block_idx;
        self.block_iter = Some(block_iter);
        Ok(())
    }
}

impl StorageIterator for SSTableIterator {
    type KeyType<'a> = ParsedKey<'a>;

    fn key(&self) -> ParsedKey<'_> {
        self.block_iter.as_ref().unwrap().key()
    }

    fn value(&self) -> &[u8] {
        self.block_iter.as_ref().unwrap().value()
    }

    fn is_valid(&self) -> bool {
        self.block_idx < self.table.num_blocks()
            && self
                .block_iter
                .as_ref()
                .map(|it| it.is_valid())
                .unwrap_or(false)
    }

    fn next(&mut self) -> Result<()> {
        let block_iter = self.block_iter.as_mut().unwrap();
        block_iter.next();
        if !block_iter.is_valid() {
            self.block_idx += 1;
            if self.block_idx < self.table.num_blocks() {
                self.block_iter = Some(BlockIterator::create_and_seek_to_first(
                    self.table.read_block_cached(self.block_idx)?,
                ));
            }
        }
        Ok(())
    }
}
