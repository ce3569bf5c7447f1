use bytes::BufMut;

use super::SIZEOF_U32;
use crate::key::ParsedKey;

/// Builds one block: length-prefixed entries followed by the offset
/// trailer. Entries must arrive in ascending internal-key order.
pub struct BlockBuilder {
    /// serialized entries, trailer not yet appended
    data: Vec<u8>,
    /// start offset of each entry
    offsets: Vec<u32>,
    /// target size of the finished block
    block_size: usize,
}

impl BlockBuilder {
    pub fn new(block_size: usize) -> Self {
        Self {
            data: Vec::new(),
            offsets: Vec::new(),
            block_size,
        }
    }

    /// Size of the block as it would be written right now, trailer
    /// included.
    pub(crate) fn estimated_size(&self) -> usize {
        self.data.len() + self.offsets.len() * SIZEOF_U32
    }

    /// Appends one entry. Returns false when the entry would push the
    /// block past `block_size`; a non-empty block must then be finished
    /// and a fresh one started. An oversized entry is still accepted into
    /// an empty block.
    #[must_use]
    pub fn append(&mut self, key: ParsedKey, value: &[u8]) -> bool {
        assert!(!key.user_key.is_empty(), "key must not be empty");
        let add_on = SIZEOF_U32 * 3 + key.encoded_len() + value.len();
        if self.estimated_size() + add_on > self.block_size && !self.is_empty() {
            return false;
        }
        self.offsets.push(self.data.len() as u32);
        self.data.put_u32_le(key.encoded_len() as u32);
        key.encode_to(&mut self.data);
        self.data.put_u32_le(value.len() as u32);
        self.data.put_slice(value);
        true
    }

    pub fn count(&self) -> u64 {
        self.offsets.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Appends the offset trailer and returns the full block bytes.
    pub fn finish(mut self) -> Vec<u8> {
        assert!(!self.is_empty(), "block should not be empty");
        for offset in &self.offsets {
            self.data.extend_from_slice(&offset.to_le_bytes());
        }
        self.data
    }
}
