use std::sync::Arc;

use super::Block;
use crate::key::{ParsedKey, RecordType};

/// Cursor over one decoded block.
pub struct BlockIterator {
    block: Arc<Block>,
    idx: usize,
}

impl BlockIterator {
    fn new(block: Arc<Block>) -> Self {
        Self { block, idx: 0 }
    }

    pub fn create_and_seek_to_first(block: Arc<Block>) -> Self {
        let mut iter = Self::new(block);
        iter.seek_to_first();
        iter
    }

    pub fn create_and_seek_to_key(block: Arc<Block>, user_key: &[u8], seq: u64) -> Self {
        let mut iter = Self::new(block);
        iter.seek(user_key, seq);
        iter
    }

    pub fn key(&self) -> ParsedKey<'_> {
        ParsedKey::decode(self.block.key_at(self.idx))
    }

    pub fn value(&self) -> &[u8] {
        self.block.value_at(self.idx)
    }

    pub fn is_valid(&self) -> bool {
        self.idx < self.block.entry_count()
    }

    pub fn seek_to_first(&mut self) {
        self.idx = 0;
    }

    /// Positions on the first entry whose internal key is
    /// ≥ `(user_key, seq, Value)`. Binary search over the offset array.
    pub fn seek(&mut self, user_key: &[u8], seq: u64) {
        let target = ParsedKey::new(user_key, seq, RecordType::Value);
        let (mut lo, mut hi) = (0usize, self.block.entry_count());
        while lo < hi {
            let mid = (lo + hi) / 2;
            if ParsedKey::decode(self.block.key_at(mid)) < target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        self.idx = lo;
    }

    pub fn next(&mut self) {
        if self.is_valid() {
            self.idx += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockBuilder;

    fn sample_block() -> Arc<Block> {
        let mut builder = BlockBuilder::new(4096);
        // "b" has two versions: the newer (seq 5) sorts first.
        assert!(builder.append(ParsedKey::new(b"a", 1, RecordType::Value), b"va"));
        assert!(builder.append(ParsedKey::new(b"b", 5, RecordType::Value), b"vb5"));
        assert!(builder.append(ParsedKey::new(b"b", 2, RecordType::Value), b"vb2"));
        assert!(builder.append(ParsedKey::new(b"d", 3, RecordType::Deletion), b""));
        let count = builder.count();
        Arc::new(Block::decode(&builder.finish(), count as usize))
    }

    #[test]
    fn test_seek_to_first_and_next() {
        let mut iter = BlockIterator::create_and_seek_to_first(sample_block());
        let mut seen = Vec::new();
        while iter.is_valid() {
            seen.push((iter.key().user_key.to_vec(), iter.key().seq));
            iter.next();
        }
        assert_eq!(
            seen,
            vec![
                (b"a".to_vec(), 1),
                (b"b".to_vec(), 5),
                (b"b".to_vec(), 2),
                (b"d".to_vec(), 3),
            ]
        );
    }

    #[test]
    fn test_seek() {
        let block = sample_block();
        // Seeking "b"@3 lands on the newest version at or below seq 3.
        let iter = BlockIterator::create_and_seek_to_key(block.clone(), b"b", 3);
        assert_eq!(iter.key().user_key, b"b");
        assert_eq!(iter.key().seq, 2);
        // Seeking "b"@u64::MAX sees every version; the newest comes first.
        let iter = BlockIterator::create_and_seek_to_key(block.clone(), b"b", u64::MAX);
        assert_eq!(iter.key().seq, 5);
        // Seeking between keys lands on the next user key.
        let iter = BlockIterator::create_and_seek_to_key(block.clone(), b"c", u64::MAX);
        assert_eq!(iter.key().user_key, b"d");
        // Seeking past the end invalidates.
        let iter = BlockIterator::create_and_seek_to_key(block, b"z", u64::MAX);
        assert!(!iter.is_valid());
    }
}
