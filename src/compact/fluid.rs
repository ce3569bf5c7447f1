use std::time::{Duration, Instant};

use log::debug;

use super::{run_busy, Compaction, CompactionPicker};
use crate::version::Version;

/// How long a fitted `(K, C)` pair stays frozen before refitting.
const REFIT_INTERVAL: Duration = Duration::from_secs(10);

/// Fluid LSM compaction: up to `K` runs on every intermediate level and
/// a single bottom run `C` times the size of the level above it. `(K, C)`
/// are refitted periodically to minimize `(L−1+C) + β·r`, trading merge
/// (write) cost against read cost, with `β` scaled by
/// `target_alpha · block_size · keys / bytes`. `r` is the point-lookup
/// cost term when `target_scan_length` is zero, otherwise a per-level
/// scan cost weighted by the chance a level contributes a block.
pub struct FluidCompactionPicker {
    alpha: f64,
    scan_length: u64,
    base_level_size: u64,
    level0_compaction_trigger: usize,
    block_size: usize,
    k: u64,
    c: u64,
    last_refit: Option<Instant>,
}

impl FluidCompactionPicker {
    pub fn new(
        alpha: f64,
        scan_length: u64,
        base_level_size: u64,
        level0_compaction_trigger: usize,
        block_size: usize,
    ) -> Self {
        Self {
            alpha,
            scan_length,
            base_level_size,
            level0_compaction_trigger,
            block_size,
            k: 4,
            c: 4,
            last_refit: None,
        }
    }

    fn read_cost(&self, k: u64, depth: usize, est_total: f64) -> f64 {
        let levels = depth as f64;
        if self.scan_length == 0 {
            // point lookups: one probe per run above the bottom plus the
            // bottom run itself
            return (k as f64 - 1.0) * (levels - 1.0) + 1.0;
        }
        let kf = k as f64;
        let total_size = est_total + (kf.powi(depth as i32 + 1) - kf) / (kf - 1.0);
        let mut cost = 0.0;
        let mut level_size = self.base_level_size as f64;
        for l in 1..=depth {
            if l == depth {
                cost += 1.0 - (-(self.scan_length as f64) * est_total / total_size).exp();
            } else {
                cost += kf * (1.0 - (-(self.scan_length as f64) * level_size / total_size).exp());
            }
            level_size *= kf;
        }
        cost
    }

    /// Refit `(K, C)` against the current bottom level, at most once per
    /// interval. `C` follows each candidate `K` so the tree still holds
    /// the projected data volume; `K` only moves on a clear win to avoid
    /// thrashing the tree shape.
    fn refit(&mut self, version: &Version) {
        if let Some(at) = self.last_refit {
            if at.elapsed() < REFIT_INTERVAL {
                return;
            }
        }
        self.last_refit = Some(Instant::now());
        let levels = version.levels();
        let depth = levels.len() - 1;
        let bottom_run = match levels[depth].runs().first() {
            Some(run) => run,
            None => return,
        };
        let bottom_size = levels[depth].size();
        if bottom_size == 0 {
            return;
        }
        let expand = if self.scan_length == 0 { 1.2 } else { 1.7 };
        let est_total = bottom_size as f64 * expand;
        let key_number: u64 = bottom_run.ssts().iter().map(|s| s.count()).sum();
        let beta =
            self.alpha * self.block_size as f64 * key_number as f64 / bottom_size as f64;
        let base = self.base_level_size as f64;
        let k_max = (0.5 * est_total / base)
            .powf(1.0 / (depth as f64 - 1.0))
            .ceil() as u64;
        let mut min_cost = f64::MAX;
        let (mut opt_k, mut opt_c) = (self.k, self.c);
        for k in 2..=k_max.max(2) {
            let c = (est_total / base / (k as f64).powi(depth as i32 - 1))
                .ceil()
                .max(2.0) as u64;
            let cost = (depth as f64 - 1.0 + c as f64)
                + beta * self.read_cost(k, depth, est_total);
            if cost < min_cost {
                min_cost = cost;
                opt_k = k;
                opt_c = c;
            }
        }
        self.c = opt_c;
        if opt_k.abs_diff(self.k) >= 2 {
            self.k = opt_k;
        }
        debug!("fluid picker refit: K={} C={}", self.k, self.c);
    }
}

impl CompactionPicker for FluidCompactionPicker {
    fn pick(&mut self, version: &Version) -> Option<Compaction> {
        let levels = version.levels();
        if levels.is_empty() {
            return None;
        }
        let bottom = levels.len() - 1;
        if bottom >= 2 {
            self.refit(version);
        }
        if bottom >= 1 {
            let mut size_limit = self.base_level_size;
            for (i, level) in levels.iter().enumerate().take(bottom).skip(1) {
                size_limit = size_limit.saturating_mul(self.k);
                if level.runs().len() >= self.k as usize || level.size() >= size_limit {
                    if level.runs().is_empty() || level.runs().iter().any(|r| run_busy(r)) {
                        continue;
                    }
                    let mut input_runs = level.runs().to_vec();
                    if i == bottom - 1 {
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
            size_limit = size_limit.saturating_mul(self.c);
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
