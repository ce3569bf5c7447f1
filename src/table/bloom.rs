use bytes::{Bytes, BytesMut};

/// Bloom filter over user keys: filter bits plus a trailing byte holding
/// the probe count.
pub struct Bloom {
    /// data of filter in bits
    pub(crate) filter: Bytes,
    /// number of hash probes
    pub(crate) k: u8,
}

pub trait BitSlice {
    fn get_bit(&self, idx: usize) -> bool;
    fn bit_len(&self) -> usize;
}

pub trait BitSliceMut {
    fn set_bit(&mut self, idx: usize, val: bool);
}

impl<T: AsRef<[u8]>> BitSlice for T {
    fn get_bit(&self, idx: usize) -> bool {
        let pos = idx / 8;
        let offset = idx % 8;
        (self.as_ref()[pos] & (1 << offset)) != 0
    }

    fn bit_len(&self) -> usize {
        self.as_ref().len() * 8
    }
}

impl<T: AsMut<[u8]>> BitSliceMut for T {
    fn set_bit(&mut self, idx: usize, val: bool) {
        let pos = idx / 8;
        let offset = idx % 8;
        if val {
            self.as_mut()[pos] |= 1 << offset;
        } else {
            self.as_mut()[pos] &= !(1 << offset);
        }
    }
}

/// The hash every filter probe derives from.
pub fn bloom_hash(user_key: &[u8]) -> u64 {
    farmhash::fingerprint64(user_key)
}

impl Bloom {
    /// Decode a bloom filter from its on-disk section.
    pub fn decode(buf: &[u8]) -> Self {
        let filter = &buf[..buf.len() - 1];
        let k = buf[buf.len() - 1];
        Self {
            filter: Bytes::copy_from_slice(filter),
            k,
        }
    }

    /// Encode the filter bits followed by the probe count.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend(&self.filter);
        buf.push(self.k);
    }

    pub fn encoded_len(&self) -> usize {
        self.filter.len() + 1
    }

    /// Build a filter from key hashes. The probe count follows from
    /// `bits_per_key`; probes are double-hashed from the two halves of
    /// each 64-bit hash.
    pub fn build_from_key_hashes(keys: &[u64], bits_per_key: usize) -> Self {
        let k = (bits_per_key as f64 * 0.69) as u32;
        let k = k.clamp(1, 30);
        let nbits = (keys.len() * bits_per_key).max(64);
        let nbytes = (nbits + 7) / 8;
        let nbits = nbytes * 8;
        let mut filter = BytesMut::with_capacity(nbytes);
        filter.resize(nbytes, 0);
        for h in keys {
            let mut h1 = *h;
            let h2 = h.rotate_right(17);
            for _ in 0..k {
                filter.set_bit((h1 % nbits as u64) as usize, true);
                h1 = h1.wrapping_add(h2);
            }
        }
        Self {
            filter: filter.freeze(),
            k: k as u8,
        }
    }

    /// False positives possible, false negatives not.
    pub fn may_contain(&self, h: u64) -> bool {
        let nbits = self.filter.bit_len() as u64;
        let mut h1 = h;
        let h2 = h.rotate_right(17);
        for _ in 0..self.k {
            if !self.filter.get_bit((h1 % nbits) as usize) {
                return false;
            }
            h1 = h1.wrapping_add(h2);
        }
        true
    }
}
