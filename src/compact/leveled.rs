use std::sync::Arc;

use super::{run_busy, Compaction, CompactionPicker};
use crate::level::Level;
use crate::version::Version;

/// Classic leveled compaction: every level i ≥ 1 holds one sorted run
/// capped at `base_level_size · ratio^i`. An over-limit level pushes the
/// SST with the least overlap into the run below; L0 merges wholesale
/// into L1 once it accumulates `level0_compaction_trigger` runs.
pub struct LeveledCompactionPicker {
    ratio: u64,
    base_level_size: u64,
    level0_compaction_trigger: usize,
}

impl LeveledCompactionPicker {
    pub fn new(ratio: u64, base_level_size: u64, level0_compaction_trigger: usize) -> Self {
        Self {
            ratio,
            base_level_size,
            level0_compaction_trigger,
        }
    }

    fn pick_from_level(&self, levels: &[Level], i: usize) -> Option<Compaction> {
        let run = levels[i].runs().first()?;
        if run_busy(run) {
            return None;
        }
        if i + 1 >= levels.len() || levels[i + 1].runs().is_empty() {
            // Bottom of the tree: relocate one SST to open the next level.
            let sst = run
                .ssts()
                .iter()
                .find(|s| !s.compaction_in_progress() && !s.remove_tag())?;
            return Some(Compaction {
                input_ssts: vec![sst.clone()],
                input_runs: Vec::new(),
                src_level: i,
                target_level: i + 1,
                target_sorted_run: None,
                is_trivial_move: true,
            });
        }
        let target_run = &levels[i + 1].runs()[0];
        if run_busy(target_run) {
            return None;
        }
        // Sliding window over the target run: for each source SST the
        // overlapping target SSTs are [lp, rp).
        let targets = target_run.ssts();
        let (mut lp, mut rp) = (0usize, 0usize);
        let mut overlap_size: u64 = 0;
        let mut best: Option<(usize, usize, usize, u64)> = None;
        for (idx, sst) in run.ssts().iter().enumerate() {
            if sst.compaction_in_progress() || sst.remove_tag() {
                continue;
            }
            while rp < targets.len() && targets[rp].smallest_key() <= sst.largest_key() {
                overlap_size += targets[rp].size();
                rp += 1;
            }
            while lp < targets.len() && targets[lp].largest_key() < sst.smallest_key() {
                overlap_size -= targets[lp].size();
                lp += 1;
            }
            if best.map(|(_, _, _, min)| overlap_size < min).unwrap_or(true) {
                best = Some((idx, lp, rp, overlap_size));
            }
        }
        let (best_idx, best_l, best_r, _) = best?;
        let mut input_ssts = vec![run.ssts()[best_idx].clone()];
        let is_trivial_move = best_l == best_r;
        input_ssts.extend(targets[best_l..best_r].iter().cloned());
        Some(Compaction {
            input_ssts,
            input_runs: Vec::new(),
            src_level: i,
            target_level: i + 1,
            target_sorted_run: Some(target_run.clone()),
            is_trivial_move,
        })
    }

    fn pick_level0(&self, levels: &[Level]) -> Option<Compaction> {
        if levels[0].runs().len() < self.level0_compaction_trigger {
            return None;
        }
        if levels[0].runs().iter().any(|r| run_busy(r)) {
            return None;
        }
        let mut input_runs: Vec<Arc<_>> = levels[0].runs().to_vec();
        if levels.len() > 1 {
            if let Some(l1_run) = levels[1].runs().first() {
                if run_busy(l1_run) {
                    return None;
                }
                input_runs.push(l1_run.clone());
            }
        }
        Some(Compaction {
            input_ssts: Vec::new(),
            input_runs,
            src_level: 0,
            target_level: 1,
            target_sorted_run: None,
            is_trivial_move: false,
        })
    }
}

impl CompactionPicker for LeveledCompactionPicker {
    fn pick(&mut self, version: &Version) -> Option<Compaction> {
        let levels = version.levels();
        if levels.is_empty() {
            return None;
        }
        // Over-limit levels, most pressured (size over limit) first.
        let mut candidates: Vec<(usize, f64)> = Vec::new();
        let mut size_limit = self.base_level_size;
        for (i, level) in levels.iter().enumerate().skip(1) {
            size_limit = size_limit.saturating_mul(self.ratio);
            if !level.runs().is_empty() && level.size() >= size_limit {
                candidates.push((i, level.size() as f64 / size_limit as f64));
            }
        }
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
        for (i, _) in candidates {
            if let Some(compaction) = self.pick_from_level(levels, i) {
                return Some(compaction);
            }
        }
        self.pick_level0(levels)
    }
}
