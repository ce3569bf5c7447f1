use std::sync::Arc;

use anyhow::Result;

use crate::iterators::StorageIterator;
use crate::key::RecordType;
use crate::version::{SuperVersion, SuperVersionIterator};

enum Step {
    Skip,
    Shadow(Vec<u8>),
    Stop,
}

/// User-facing scan over one SuperVersion at a fixed snapshot sequence.
/// Yields each live user key once, in ascending order, hiding records
/// newer than the snapshot, superseded versions, and tombstones.
pub struct LsmIterator {
    inner: SuperVersionIterator,
    /// snapshot: records with a larger sequence are invisible
    seq: u64,
    /// last user key yielded or shadowed; older versions of it are skipped
    prev_user_key: Option<Vec<u8>>,
}

impl LsmIterator {
    pub(crate) fn create_and_seek_to_first(sv: Arc<SuperVersion>, seq: u64) -> Result<Self> {
        let inner = SuperVersionIterator::create_and_seek_to_first(sv)?;
        let mut iter = Self {
            inner,
            seq,
            prev_user_key: None,
        };
        iter.move_to_visible()?;
        Ok(iter)
    }

    pub(crate) fn create_and_seek(sv: Arc<SuperVersion>, user_key: &[u8], seq: u64) -> Result<Self> {
        let inner = SuperVersionIterator::create_and_seek(sv, user_key, seq)?;
        let mut iter = Self {
            inner,
            seq,
            prev_user_key: None,
        };
        iter.move_to_visible()?;
        Ok(iter)
    }

    fn move_to_visible(&mut self) -> Result<()> {
        while self.inner.is_valid() {
            let step = {
                let key = self.inner.key();
                if key.seq > self.seq {
                    Step::Skip
                } else if self.prev_user_key.as_deref() == Some(key.user_key) {
                    Step::Skip
                } else if key.record_type == RecordType::Deletion {
                    // newest visible record of this key is a tombstone;
                    // remember it so older versions get skipped too
                    Step::Shadow(key.user_key.to_vec())
                } else {
                    Step::Stop
                }
            };
            match step {
                Step::Stop => break,
                Step::Skip => self.inner.next()?,
                Step::Shadow(user_key) => {
                    self.prev_user_key = Some(user_key);
                    self.inner.next()?;
                }
            }
        }
        Ok(())
    }
}

impl StorageIterator for LsmIterator {
    type KeyType<'a> = &'a [u8];

    fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    fn key(&self) -> &[u8] {
        self.inner.key().user_key
    }

    fn value(&self) -> &[u8] {
        self.inner.value()
    }

    fn next(&mut self) -> Result<()> {
        self.prev_user_key = Some(self.inner.key().user_key.to_vec());
        self.inner.next()?;
        self.move_to_visible()
    }

    fn number_of_iterators(&self) -> usize {
        self.inner.number_of_iterators()
    }
}
