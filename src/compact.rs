pub mod fluid;
pub mod lazy_leveling;
pub mod leveled;
pub mod tiered;

pub use fluid::FluidCompactionPicker;
pub use lazy_leveling::LazyLevelingCompactionPicker;
pub use leveled::LeveledCompactionPicker;
pub use tiered::TieredCompactionPicker;

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::file::{FileNameGenerator, FileWriter, SeqWriteFile};
use crate::iterators::StorageIterator;
use crate::key::{ParsedKey, RecordType};
use crate::level::SortedRun;
use crate::table::{SSTInfo, SSTable, SSTableBuilder};
use crate::version::Version;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompactionStrategy {
    Leveled,
    Tiered,
    LazyLeveling,
    Fluid,
}

impl FromStr for CompactionStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "leveled" => Ok(Self::Leveled),
            "tiered" => Ok(Self::Tiered),
            "lazyleveling" => Ok(Self::LazyLeveling),
            "fluid" => Ok(Self::Fluid),
            _ => bail!("unknown compaction strategy {s:?}"),
        }
    }
}

/// One unit of compaction work, as chosen by a picker.
pub struct Compaction {
    /// individual input SSTs (leveled partial picks, trivial moves)
    pub input_ssts: Vec<Arc<SSTable>>,
    /// whole input runs (L0 merges, tier merges)
    pub input_runs: Vec<Arc<SortedRun>>,
    pub src_level: usize,
    pub target_level: usize,
    /// the run at the target level the outputs splice into, when one
    /// survives the compaction
    pub target_sorted_run: Option<Arc<SortedRun>>,
    /// relocate inputs without merging
    pub is_trivial_move: bool,
}

/// Decides what to compact next. Pickers must skip inputs already in
/// compaction or flagged for removal and never propose overlapping work.
pub trait CompactionPicker: Send {
    fn pick(&mut self, version: &Version) -> Option<Compaction>;
}

pub(crate) fn run_busy(run: &SortedRun) -> bool {
    run.compaction_in_progress() || run.remove_tag()
}

/// Streams a sorted record stream into a sequence of SSTs, each closed
/// near `sst_size`. Of the versions of one user key only the newest
/// survives; deletions are elided when the job writes the bottom level.
pub struct CompactionJob<'a> {
    file_gen: &'a FileNameGenerator,
    block_size: usize,
    sst_size: u64,
    write_buffer_size: usize,
    bloom_bits_per_key: usize,
    use_direct_io: bool,
    drop_deletions: bool,
}

impl<'a> CompactionJob<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        file_gen: &'a FileNameGenerator,
        block_size: usize,
        sst_size: u64,
        write_buffer_size: usize,
        bloom_bits_per_key: usize,
        use_direct_io: bool,
        drop_deletions: bool,
    ) -> Self {
        Self {
            file_gen,
            block_size,
            sst_size,
            write_buffer_size,
            bloom_bits_per_key,
            use_direct_io,
            drop_deletions,
        }
    }

    pub fn run<I>(&self, mut iter: I) -> Result<Vec<SSTInfo>>
    where
        I: for<'b> StorageIterator<KeyType<'b> = ParsedKey<'b>>,
    {
        let mut ssts = Vec::new();
        let mut builder: Option<(SSTableBuilder, u64, String)> = None;
        let mut last_user_key: Option<Vec<u8>> = None;
        while iter.is_valid() {
            let (same_as_last, is_deletion) = {
                let key = iter.key();
                (
                    last_user_key.as_deref() == Some(key.user_key),
                    key.record_type == RecordType::Deletion,
                )
            };
            // older version of a key we already emitted
            if same_as_last {
                iter.next()?;
                continue;
            }
            last_user_key = Some(iter.key().user_key.to_vec());
            if self.drop_deletions && is_deletion {
                iter.next()?;
                continue;
            }
            if builder.is_none() {
                let (path, sst_id) = self.file_gen.generate();
                let writer = FileWriter::new(
                    SeqWriteFile::create(&path, self.use_direct_io)?,
                    self.write_buffer_size,
                );
                builder = Some((
                    SSTableBuilder::new(writer, self.block_size, self.bloom_bits_per_key),
                    sst_id,
                    path.to_string_lossy().into_owned(),
                ));
            }
            let (sst_builder, _, _) = builder.as_mut().unwrap();
            sst_builder.append(iter.key(), iter.value())?;
            if sst_builder.estimated_size() >= self.sst_size {
                let (sst_builder, sst_id, filename) = builder.take().unwrap();
                ssts.push(sst_builder.finish(sst_id, filename)?);
            }
            iter.next()?;
        }
        if let Some((sst_builder, sst_id, filename)) = builder.take() {
            ssts.push(sst_builder.finish(sst_id, filename)?);
        }
        Ok(ssts)
    }
}
