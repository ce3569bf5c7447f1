use std::cmp::Ordering;

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Number of trailing bytes an internal key carries beyond the user key:
/// a little-endian u64 sequence number and a one-byte record type.
pub const KEY_SUFFIX_LEN: usize = std::mem::size_of::<u64>() + 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum RecordType {
    Value = 0,
    Deletion = 1,
}

/// Outcome of a point lookup at some layer of the tree. A deletion is a
/// definitive answer: layers below must not be consulted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GetResult {
    Found(Bytes),
    Deleted,
    NotFound,
}

/// A decoded view over an encoded internal key.
///
/// Ordering: ascending user key, then descending sequence number, then
/// record type. For one user key the newest write sorts first.
#[derive(Clone, Copy, Debug)]
pub struct ParsedKey<'a> {
    pub user_key: &'a [u8],
    pub seq: u64,
    pub record_type: RecordType,
}

impl<'a> ParsedKey<'a> {
    pub fn new(user_key: &'a [u8], seq: u64, record_type: RecordType) -> Self {
        Self {
            user_key,
            seq,
            record_type,
        }
    }

    /// Decodes `user_key · seq · type` from an encoded internal key.
    /// Panics if the slice is shorter than the fixed suffix; encoded keys
    /// only ever come from our own writers.
    pub fn decode(encoded: &'a [u8]) -> Self {
        assert!(encoded.len() >= KEY_SUFFIX_LEN, "internal key too short");
        let split = encoded.len() - KEY_SUFFIX_LEN;
        let user_key = &encoded[..split];
        let mut tail = &encoded[split..];
        let seq = tail.get_u64_le();
        let record_type = match tail.get_u8() {
            0 => RecordType::Value,
            _ => RecordType::Deletion,
        };
        Self {
            user_key,
            seq,
            record_type,
        }
    }

    pub fn encoded_len(&self) -> usize {
        self.user_key.len() + KEY_SUFFIX_LEN
    }

    pub fn encode_to(&self, buf: &mut impl BufMut) {
        buf.put_slice(self.user_key);
        buf.put_u64_le(self.seq);
        buf.put_u8(self.record_type as u8);
    }

    pub fn to_internal_key(self) -> InternalKey {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_to(&mut buf);
        InternalKey(buf.freeze())
    }
}

impl PartialEq for ParsedKey<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ParsedKey<'_> {}

impl PartialOrd for ParsedKey<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ParsedKey<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.user_key
            .cmp(other.user_key)
            .then_with(|| other.seq.cmp(&self.seq))
            .then_with(|| self.record_type.cmp(&other.record_type))
    }
}

/// An owned, encoded internal key. Comparison delegates to the parsed
/// form so that containers keyed by `InternalKey` sort in internal-key
/// order, not byte order.
#[derive(Clone, Debug, Default)]
pub struct InternalKey(Bytes);

impl InternalKey {
    pub fn new(user_key: &[u8], seq: u64, record_type: RecordType) -> Self {
        ParsedKey::new(user_key, seq, record_type).to_internal_key()
    }

    pub fn from_encoded(encoded: Bytes) -> Self {
        Self(encoded)
    }

    pub fn parse(&self) -> ParsedKey<'_> {
        ParsedKey::decode(&self.0)
    }

    pub fn user_key(&self) -> &[u8] {
        &self.0[..self.0.len() - KEY_SUFFIX_LEN]
    }

    pub fn seq(&self) -> u64 {
        self.parse().seq
    }

    pub fn record_type(&self) -> RecordType {
        self.parse().record_type
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PartialEq for InternalKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for InternalKey {}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parse().cmp(&other.parse())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsed_key_roundtrip() {
        let key = ParsedKey::new(b"hello", 42, RecordType::Value);
        let ik = key.to_internal_key();
        assert_eq!(ik.user_key(), b"hello");
        assert_eq!(ik.seq(), 42);
        assert_eq!(ik.record_type(), RecordType::Value);
        assert_eq!(ik.len(), 5 + KEY_SUFFIX_LEN);
    }

    #[test]
    fn test_internal_key_ordering() {
        let a1 = InternalKey::new(b"a", 1, RecordType::Value);
        let a9 = InternalKey::new(b"a", 9, RecordType::Value);
        let b5 = InternalKey::new(b"b", 5, RecordType::Value);
        // Same user key: the newer write sorts first.
        assert!(a9 < a1);
        assert!(a1 < b5);
        assert!(a9 < b5);
        // Value sorts before Deletion at the same (key, seq).
        let av = InternalKey::new(b"a", 3, RecordType::Value);
        let ad = InternalKey::new(b"a", 3, RecordType::Deletion);
        assert!(av < ad);
    }
}
