use super::{run_busy, Compaction, CompactionPicker};
use crate::version::Version;

/// Lazy leveling: tiered behavior on the intermediate levels, a single
/// leveled run at the bottom. The merge out of level L−1 folds the
/// bottom run in so level L keeps exactly one run.
pub struct LazyLevelingCompactionPicker {
    ratio: u64,
    base_level_size: u64,
    level0_compaction_trigger: usize,
}

impl LazyLevelingCompactionPicker {
    pub fn new(ratio: u64, base_level_size: u64, level0_compaction_trigger: usize) -> Self {
        Self {
            ratio,
            base_level_size,
            level0_compaction_trigger,
        }
    }
}

impl CompactionPicker for LazyLevelingCompactionPicker {
    fn pick(&mut self, version: &Version) -> Option<Compaction> {
        let levels = version.levels();
        if levels.is_empty() {
            return None;
        }
        let bottom = levels.len() - 1;
        if bottom >= 1 {
            let mut size_limit = self.base_level_size;
            for (i, level) in levels.iter().enumerate().take(bottom).skip(1) {
                size_limit = size_limit.saturating_mul(self.ratio);
                if level.runs().len() >= self.ratio as usize || level.size() >= size_limit {
                    if level.runs().is_empty() || level.runs().iter().any(|r| run_busy(r)) {
                        continue;
                    }
                    let mut input_runs = level.runs().to_vec();
                    if i == bottom - 1 {
                        // Merge into the bottom level, which keeps one run.
                        match levels[bottom].runs().first() {
                            Some(run) if run_busy(run) => continue,
                            Some(run) => input_runs.push(run.clone()),
                            None => {}
                        }
                    }
                    return Some(Compaction {
                        input_ssts: Vec::new(),
                        input_runs,
                        src_level: i,
                        target_level: i + 1,
                        target_sorted_run: None,
                        is_trivial_move: false,
                    });
                }
            }
            size_limit = size_limit.saturating_mul(self.ratio);
            if levels[bottom].size() >= size_limit {
                if let Some(run) = levels[bottom].runs().first() {
                    if !run_busy(run)
                        && !run
                            .ssts()
                            .iter()
                            .any(|s| s.compaction_in_progress() || s.remove_tag())
                    {
                        return Some(Compaction {
                            input_ssts: run.ssts().to_vec(),
                            input_runs: Vec::new(),
                            src_level: bottom,
                            target_level: bottom + 1,
                            target_sorted_run: None,
                            is_trivial_move: true,
                        });
                    }
                }
            }
        }
        if levels[0].runs().len() >= self.level0_compaction_trigger
            && !levels[0].runs().iter().any(|r| run_busy(r))
        {
            let mut input_runs = levels[0].runs().to_vec();
            if bottom == 1 {
                match levels[1].runs().first() {
                    Some(run) if run_busy(run) => return None,
                    Some(run) => input_runs.push(run.clone()),
                    None => {}
                }
            }
            return Some(Compaction {
                input_ssts: Vec::new(),
                input_runs,
                src_level: 0,
                target_level: 1,
                target_sorted_run: None,
                is_trivial_move: false,
            });
        }
        None
    }
}
