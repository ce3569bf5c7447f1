use super::{run_busy, Compaction, CompactionPicker};
use crate::version::Version;

/// Tiered compaction: a level may hold up to `ratio` runs; once it
/// reaches that many (or outgrows its size cap) all of its runs merge
/// into a single new run one level down.
pub struct TieredCompactionPicker {
    ratio: u64,
    base_level_size: u64,
    level0_compaction_trigger: usize,
}

impl TieredCompactionPicker {
    pub fn new(ratio: u64, base_level_size: u64, level0_compaction_trigger: usize) -> Self {
        Self {
            ratio,
            base_level_size,
            level0_compaction_trigger,
        }
    }
}

impl CompactionPicker for TieredCompactionPicker {
    fn pick(&mut self, version: &Version) -> Option<Compaction> {
        let levels = version.levels();
        if levels.is_empty() {
            return None;
        }
        let mut size_limit = self.base_level_size;
        for (i, level) in levels.iter().enumerate().skip(1) {
            size_limit = size_limit.saturating_mul(self.ratio);
            if level.runs().len() >= self.ratio as usize || level.size() >= size_limit {
                if level.runs().is_empty() || level.runs().iter().any(|r| run_busy(r)) {
                    continue;
                }
                return Some(Compaction {
                    input_ssts: Vec::new(),
                    input_runs: level.runs().to_vec(),
                    src_level: i,
                    target_level: i + 1,
                    target_sorted_run: None,
                    is_trivial_move: false,
                });
            }
        }
        if levels[0].runs().len() >= self.level0_compaction_trigger
            && !levels[0].runs().iter().any(|r| run_busy(r))
        {
            return Some(Compaction {
                input_ssts: Vec::new(),
                input_runs: levels[0].runs().to_vec(),
                src_level: 0,
                target_level: 1,
                target_sorted_run: None,
                is_trivial_move: false,
            });
        }
        None
    }
}
