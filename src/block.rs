pub mod builder;
pub mod iterator;

pub use builder::BlockBuilder;
pub use iterator::BlockIterator;

use bytes::{Buf, Bytes};

pub(crate) const SIZEOF_U32: usize = std::mem::size_of::<u32>();

/// Locates one block inside an SST file. `size` spans the entry region
/// plus the offset trailer; `count` is the number of entries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
    pub count: u64,
}

impl BlockHandle {
    pub const ENCODED_LEN: usize = 3 * std::mem::size_of::<u64>();
}

/// One decoded on-disk block: length-prefixed entries plus the trailing
/// offset array that indexes them.
pub struct Block {
    data: Bytes,
    offsets: Vec<u32>,
}

impl Block {
    /// Decodes a block from `raw` (exactly `handle.size` bytes); `count`
    /// comes from the block's index handle.
    pub fn decode(raw: &[u8], count: usize) -> Self {
        let data_end = raw.len() - count * SIZEOF_U32;
        let offsets = raw[data_end..]
            .chunks(SIZEOF_U32)
            .map(|mut x| x.get_u32_le())
            .collect();
        Self {
            data: Bytes::copy_from_slice(&raw[..data_end]),
            offsets,
        }
    }

    pub fn entry_count(&self) -> usize {
        self.offsets.len()
    }

    /// The encoded internal key of entry `idx`.
    pub fn key_at(&self, idx: usize) -> &[u8] {
        let mut buf = &self.data[self.offsets[idx] as usize..];
        let key_len = buf.get_u32_le() as usize;
        &buf[..key_len]
    }

    /// The value bytes of entry `idx`.
    pub fn value_at(&self, idx: usize) -> &[u8] {
        let mut buf = &self.data[self.offsets[idx] as usize..];
        let key_len = buf.get_u32_le() as usize;
        buf.advance(key_len);
        let value_len = buf.get_u32_le() as usize;
        &buf[..value_len]
    }
}
