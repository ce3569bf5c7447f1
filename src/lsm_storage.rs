use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{bail, ensure, Context, Result};
use bytes::Bytes;
use crossbeam::channel::{self, RecvTimeoutError};
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::compact::{
    Compaction, CompactionJob, CompactionPicker, CompactionStrategy, FluidCompactionPicker,
    LazyLevelingCompactionPicker, LeveledCompactionPicker, TieredCompactionPicker,
};
use crate::file::{FileNameGenerator, FileReader, FileWriter, ReadFile, SeqWriteFile};
use crate::iterators::merge_iterator::MergeIterator;
use crate::iterators::two_merge_iterator::TwoMergeIterator;
use crate::level::{SortedRun, SortedRunIterator};
use crate::lsm_iterator::LsmIterator;
use crate::mem_table::MemTable;
use crate::table::{SSTInfo, SSTable, SSTableIterator};
use crate::version::{SuperVersion, Version};

/// Cache for blocks read from disk, keyed by `(sst_id, block_idx)`.
pub type BlockCache = moka::sync::Cache<(u64, usize), Arc<Block>>;

const BACKOFF: Duration = Duration::from_millis(50);
const WORKER_TICK: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LsmStorageOptions {
    /// start empty instead of loading the metadata file
    pub create_new: bool,
    pub block_size: usize,
    /// target SST size; also the memtable switch threshold
    pub sst_file_size: u64,
    /// FileWriter buffer size
    pub write_buffer_size: usize,
    pub bloom_bits_per_key: usize,
    pub use_direct_io: bool,
    pub compaction_strategy: CompactionStrategy,
    pub compaction_size_ratio: u64,
    pub level0_compaction_trigger: usize,
    /// flushes stall while L0 holds this many runs
    pub level0_stop_writes_trigger: usize,
    /// writers stall while this many immutable memtables are queued
    pub max_immutable_count: usize,
    /// Fluid: weight of read cost against merge cost
    pub target_alpha: f64,
    /// Fluid: expected scan length; 0 tunes for point lookups
    pub target_scan_length: u64,
}

impl Default for LsmStorageOptions {
    fn default() -> Self {
        Self {
            create_new: true,
            block_size: 4096,
            sst_file_size: 4 << 20,
            write_buffer_size: 1 << 20,
            bloom_bits_per_key: 10,
            use_direct_io: false,
            compaction_strategy: CompactionStrategy::Leveled,
            compaction_size_ratio: 10,
            level0_compaction_trigger: 4,
            level0_stop_writes_trigger: 8,
            max_immutable_count: 4,
            target_alpha: 1.0,
            target_scan_length: 0,
        }
    }
}

fn build_picker(options: &LsmStorageOptions) -> Box<dyn CompactionPicker> {
    let base_level_size = options.level0_compaction_trigger as u64 * options.sst_file_size;
    match options.compaction_strategy {
        CompactionStrategy::Leveled => Box::new(LeveledCompactionPicker::new(
            options.compaction_size_ratio,
            base_level_size,
            options.level0_compaction_trigger,
        )),
        CompactionStrategy::Tiered => Box::new(TieredCompactionPicker::new(
            options.compaction_size_ratio,
            base_level_size,
            options.level0_compaction_trigger,
        )),
        CompactionStrategy::LazyLeveling => Box::new(LazyLevelingCompactionPicker::new(
            options.compaction_size_ratio,
            base_level_size,
            options.level0_compaction_trigger,
        )),
        CompactionStrategy::Fluid => Box::new(FluidCompactionPicker::new(
            options.target_alpha,
            options.target_scan_length,
            base_level_size,
            options.level0_compaction_trigger,
            options.block_size,
        )),
    }
}

pub(crate) struct LsmStorageInner {
    /// the one published SuperVersion; readers clone the Arc under the
    /// read lock and drop the lock before doing I/O
    sv: RwLock<Arc<SuperVersion>>,
    /// serializes Put/Del so sequence assignment is totally ordered
    write_lock: Mutex<()>,
    /// protects memtable switching, install decisions and flags
    state_lock: Mutex<()>,
    path: PathBuf,
    pub(crate) block_cache: Arc<BlockCache>,
    seq: AtomicU64,
    next_memtable_id: AtomicUsize,
    file_gen: FileNameGenerator,
    pub(crate) options: Arc<LsmStorageOptions>,
    picker: Mutex<Box<dyn CompactionPicker>>,
    flush_tx: channel::Sender<()>,
    compact_tx: channel::Sender<()>,
    flush_in_progress: AtomicBool,
    compaction_in_progress: AtomicBool,
    /// first background failure; surfaced to every later foreground call
    background_error: Mutex<Option<String>>,
    stopped: AtomicBool,
}

impl LsmStorageInner {
    /*----------------------foreground API----------------------*/

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_alive()?;
        ensure!(!key.is_empty(), "key should not be empty");
        let _write_guard = self.write_lock.lock();
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let sv = self.get_sv();
        sv.memtable().put(key, seq, value);
        let size = sv.memtable().approximate_size() as u64;
        drop(sv);
        if size > self.options.sst_file_size {
            self.switch_memtable(false)?;
        }
        Ok(())
    }

    pub fn del(&self, key: &[u8]) -> Result<()> {
        self.check_alive()?;
        ensure!(!key.is_empty(), "key should not be empty");
        let _write_guard = self.write_lock.lock();
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let sv = self.get_sv();
        sv.memtable().del(key, seq);
        let size = sv.memtable().approximate_size() as u64;
        drop(sv);
        if size > self.options.sst_file_size {
            self.switch_memtable(false)?;
        }
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.check_alive()?;
        let sv = self.get_sv();
        let seq = self.seq.load(Ordering::SeqCst);
        sv.get(key, seq)
    }

    pub fn begin(&self) -> Result<LsmIterator> {
        self.check_alive()?;
        let sv = self.get_sv();
        let seq = self.seq.load(Ordering::SeqCst);
        LsmIterator::create_and_seek_to_first(sv, seq)
    }

    pub fn seek(&self, key: &[u8]) -> Result<LsmIterator> {
        self.check_alive()?;
        let sv = self.get_sv();
        let seq = self.seq.load(Ordering::SeqCst);
        LsmIterator::create_and_seek(sv, key, seq)
    }

    /// Forces the memtable out and waits until every memtable, mutable
    /// and immutable, has reached level 0.
    pub fn flush_all(&self) -> Result<()> {
        self.switch_memtable(true)?;
        loop {
            {
                let sv = self.get_sv();
                if sv.memtable().is_empty() && sv.imms().is_empty() {
                    return Ok(());
                }
            }
            self.check_background_error()?;
            let _ = self.flush_tx.send(());
            std::thread::sleep(BACKOFF);
        }
    }

    /// Empties the tree: every run is tagged for file removal and a
    /// fresh SuperVersion is installed. The idle check runs under the
    /// state lock so no in-flight flush or compaction can install on top
    /// of the wipe.
    pub fn drop_all(&self) -> Result<()> {
        self.check_alive()?;
        loop {
            {
                let _write_guard = self.write_lock.lock();
                let _state_guard = self.state_lock.lock();
                if !self.flush_in_progress.load(Ordering::SeqCst)
                    && !self.compaction_in_progress.load(Ordering::SeqCst)
                {
                    let sv = self.get_sv();
                    for level in sv.version().levels() {
                        for run in level.runs() {
                            run.set_remove_tag(true);
                        }
                    }
                    let new_sv = SuperVersion::new(
                        Arc::new(MemTable::create(
                            self.next_memtable_id.fetch_add(1, Ordering::SeqCst),
                        )),
                        Vec::new(),
                        Arc::new(Version::new()),
                    );
                    self.install_sv(new_sv);
                    info!("dropped all data");
                    return Ok(());
                }
            }
            self.check_background_error()?;
            std::thread::sleep(BACKOFF);
        }
    }

    /*----------------------shared state----------------------*/

    pub(crate) fn get_sv(&self) -> Arc<SuperVersion> {
        self.sv.read().clone()
    }

    fn install_sv(&self, sv: SuperVersion) {
        *self.sv.write() = Arc::new(sv);
    }

    pub(crate) fn seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn check_alive(&self) -> Result<()> {
        if self.stopped() {
            bail!("storage is shutting down");
        }
        self.check_background_error()
    }

    fn check_background_error(&self) -> Result<()> {
        if let Some(e) = self.background_error.lock().as_ref() {
            bail!("background error: {e}");
        }
        Ok(())
    }

    fn set_background_error(&self, e: &anyhow::Error) {
        error!("background worker failed: {e:#}");
        let mut slot = self.background_error.lock();
        if slot.is_none() {
            *slot = Some(format!("{e:#}"));
        }
    }

    /// Rotates the mutable memtable into the immutable list. Blocks
    /// while the immutable queue is full so the flusher can catch up.
    fn switch_memtable(&self, force: bool) -> Result<()> {
        loop {
            {
                let _state_guard = self.state_lock.lock();
                let sv = self.get_sv();
                if sv.imms().len() < self.options.max_immutable_count {
                    let memtable = sv.memtable().clone();
                    let switch = (force && !memtable.is_empty())
                        || memtable.approximate_size() as u64 > self.options.sst_file_size;
                    if switch {
                        let mut imms = Vec::with_capacity(sv.imms().len() + 1);
                        imms.push(memtable);
                        imms.extend(sv.imms().iter().cloned());
                        let new_sv = SuperVersion::new(
                            Arc::new(MemTable::create(
                                self.next_memtable_id.fetch_add(1, Ordering::SeqCst),
                            )),
                            imms,
                            sv.version().clone(),
                        );
                        debug!("memtable switched: {}", new_sv.describe());
                        self.install_sv(new_sv);
                        let _ = self.flush_tx.send(());
                    }
                    return Ok(());
                }
            }
            if self.stopped() {
                return Ok(());
            }
            self.check_background_error()?;
            let _ = self.flush_tx.send(());
            std::thread::sleep(BACKOFF);
        }
    }

    /*----------------------flush----------------------*/

    /// One round of flushing. Returns false when there was nothing to do.
    fn flush_once(&self) -> Result<bool> {
        // Stall while L0 is saturated; compaction has to drain it first.
        loop {
            let l0_runs = {
                let sv = self.get_sv();
                sv.version()
                    .levels()
                    .first()
                    .map(|l| l.runs().len())
                    .unwrap_or(0)
            };
            if l0_runs < self.options.level0_stop_writes_trigger
                || self.stopped()
                || self.check_background_error().is_err()
            {
                break;
            }
            warn!("flush stalled: {l0_runs} runs at level 0");
            let _ = self.compact_tx.send(());
            std::thread::sleep(BACKOFF);
        }
        let imms = {
            let _state_guard = self.state_lock.lock();
            let sv = self.get_sv();
            let imms: Vec<_> = sv
                .imms()
                .iter()
                .filter(|m| !m.flush_in_progress() && !m.flush_complete())
                .cloned()
                .collect();
            if imms.is_empty() {
                return Ok(false);
            }
            for imm in &imms {
                imm.set_flush_in_progress(true);
            }
            self.flush_in_progress.store(true, Ordering::SeqCst);
            imms
        };
        let runs = match self.flush_memtables(&imms) {
            Ok(runs) => runs,
            Err(e) => {
                // leave the memtables queued so the flush can be retried
                for imm in &imms {
                    imm.set_flush_in_progress(false);
                }
                self.flush_in_progress.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        {
            let _state_guard = self.state_lock.lock();
            for imm in &imms {
                imm.set_flush_complete(true);
            }
            let sv = self.get_sv();
            let mut version = (**sv.version()).clone();
            version.append_all(0, runs);
            let new_imms = sv
                .imms()
                .iter()
                .filter(|m| !m.flush_complete())
                .cloned()
                .collect();
            let new_sv =
                SuperVersion::new(sv.memtable().clone(), new_imms, Arc::new(version));
            info!("flush installed: {}", new_sv.describe());
            self.install_sv(new_sv);
            self.flush_in_progress.store(false, Ordering::SeqCst);
            let _ = self.compact_tx.send(());
        }
        Ok(true)
    }

    /// Turns each immutable memtable into one L0 sorted run. Oldest
    /// first: level 0 is read in reverse append order, so the newest
    /// memtable's run must land last.
    fn flush_memtables(&self, imms: &[Arc<MemTable>]) -> Result<Vec<Arc<SortedRun>>> {
        let mut runs = Vec::with_capacity(imms.len());
        for imm in imms.iter().rev() {
            let job = CompactionJob::new(
                &self.file_gen,
                self.options.block_size,
                self.options.sst_file_size,
                self.options.write_buffer_size,
                self.options.bloom_bits_per_key,
                self.options.use_direct_io,
                false,
            );
            let infos = job.run(imm.scan(Bound::Unbounded))?;
            if infos.is_empty() {
                continue;
            }
            let mut ssts = Vec::with_capacity(infos.len());
            for info in infos {
                ssts.push(Arc::new(SSTable::open(
                    info,
                    Some(self.block_cache.clone()),
                    self.options.use_direct_io,
                )?));
            }
            runs.push(Arc::new(SortedRun::new(ssts)));
        }
        Ok(runs)
    }

    /*----------------------compaction----------------------*/

    /// One round of compaction. Returns false when the picker found no
    /// work.
    fn compact_once(&self) -> Result<bool> {
        let (compaction, drop_deletions) = {
            let _state_guard = self.state_lock.lock();
            let sv = self.get_sv();
            let compaction = self.picker.lock().pick(sv.version());
            let Some(compaction) = compaction else {
                return Ok(false);
            };
            for sst in &compaction.input_ssts {
                sst.set_compaction_in_progress(true);
            }
            for run in &compaction.input_runs {
                run.set_compaction_in_progress(true);
            }
            if let Some(target) = &compaction.target_sorted_run {
                target.set_compaction_in_progress(true);
            }
            self.compaction_in_progress.store(true, Ordering::SeqCst);
            // Tombstones may be dropped only when nothing below or
            // beside the destination could still hold older values:
            // the destination is the bottom level and every run there
            // takes part in the merge.
            let levels = sv.version().levels();
            let drop_deletions = if compaction.target_level >= levels.len() {
                true
            } else if compaction.target_level == levels.len() - 1 {
                levels[compaction.target_level].runs().iter().all(|run| {
                    compaction
                        .input_runs
                        .iter()
                        .any(|input| Arc::ptr_eq(input, run))
                        || compaction
                            .target_sorted_run
                            .as_ref()
                            .map(|target| Arc::ptr_eq(target, run))
                            .unwrap_or(false)
                })
            } else {
                false
            };
            (compaction, drop_deletions)
        };
        debug!(
            "compaction picked: level {} -> {} ({} ssts, {} runs, trivial: {})",
            compaction.src_level,
            compaction.target_level,
            compaction.input_ssts.len(),
            compaction.input_runs.len(),
            compaction.is_trivial_move
        );
        let output = match self.run_compaction(&compaction, drop_deletions) {
            Ok(output) => output,
            Err(e) => {
                // clear the flags so the same work can be retried
                for sst in &compaction.input_ssts {
                    sst.set_compaction_in_progress(false);
                }
                for run in &compaction.input_runs {
                    run.set_compaction_in_progress(false);
                }
                if let Some(target) = &compaction.target_sorted_run {
                    target.set_compaction_in_progress(false);
                }
                self.compaction_in_progress.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        {
            let _state_guard = self.state_lock.lock();
            self.install_compaction(&compaction, output);
            self.compaction_in_progress.store(false, Ordering::SeqCst);
        }
        Ok(true)
    }

    fn run_compaction(
        &self,
        compaction: &Compaction,
        drop_deletions: bool,
    ) -> Result<Vec<Arc<SSTable>>> {
        if compaction.is_trivial_move {
            return Ok(compaction.input_ssts.clone());
        }
        let mut sst_iters = Vec::with_capacity(compaction.input_ssts.len());
        for sst in &compaction.input_ssts {
            sst_iters.push(Box::new(SSTableIterator::create_and_seek_to_first(
                sst.clone(),
            )?));
        }
        let mut run_iters = Vec::with_capacity(compaction.input_runs.len());
        for run in &compaction.input_runs {
            run_iters.push(Box::new(SortedRunIterator::create_and_seek_to_first(
                run.clone(),
            )?));
        }
        let iter = TwoMergeIterator::create(
            MergeIterator::create(sst_iters),
            MergeIterator::create(run_iters),
        )?;
        let job = CompactionJob::new(
            &self.file_gen,
            self.options.block_size,
            self.options.sst_file_size,
            self.options.write_buffer_size,
            self.options.bloom_bits_per_key,
            self.options.use_direct_io,
            drop_deletions,
        );
        let infos = job.run(iter)?;
        let mut ssts = Vec::with_capacity(infos.len());
        for info in infos {
            ssts.push(Arc::new(SSTable::open(
                info,
                Some(self.block_cache.clone()),
                self.options.use_direct_io,
            )?));
        }
        Ok(ssts)
    }

    /// Publishes a compaction result: inputs become removable, outputs
    /// splice into the target run (or form a new one), untouched runs
    /// carry over.
    fn install_compaction(&self, compaction: &Compaction, output: Vec<Arc<SSTable>>) {
        for sst in &compaction.input_ssts {
            sst.set_compaction_in_progress(false);
            sst.set_remove_tag(true);
        }
        for run in &compaction.input_runs {
            run.set_compaction_in_progress(false);
            run.set_remove_tag(true);
        }
        if let Some(target) = &compaction.target_sorted_run {
            target.set_compaction_in_progress(false);
        }
        let sv = self.get_sv();
        let new_run = match &compaction.target_sorted_run {
            None => {
                if output.is_empty() {
                    None
                } else {
                    Some(Arc::new(SortedRun::new(output)))
                }
            }
            Some(target) => {
                // Splice the outputs into the target's key range; target
                // SSTs that took part in the merge carry a remove tag and
                // fall out here.
                let old = target.ssts();
                let mut merged = Vec::with_capacity(old.len() + output.len());
                if output.is_empty() {
                    merged.extend(old.iter().filter(|s| !s.remove_tag()).cloned());
                } else {
                    let new_smallest = output[0].smallest_key().clone();
                    let mut idx = 0;
                    while idx < old.len() && *old[idx].largest_key() < new_smallest {
                        if !old[idx].remove_tag() {
                            merged.push(old[idx].clone());
                        }
                        idx += 1;
                    }
                    merged.extend(output.iter().cloned());
                    while idx < old.len() {
                        if !old[idx].remove_tag() {
                            merged.push(old[idx].clone());
                        }
                        idx += 1;
                    }
                }
                if merged.is_empty() {
                    None
                } else {
                    Some(Arc::new(SortedRun::new(merged)))
                }
            }
        };
        let mut version = Version::new();
        for level in sv.version().levels() {
            for run in level.runs() {
                let is_target = compaction
                    .target_sorted_run
                    .as_ref()
                    .map(|t| Arc::ptr_eq(t, run))
                    .unwrap_or(false);
                if run.remove_tag() || is_target {
                    continue;
                }
                if run.compaction_in_progress() {
                    version.append(level.id(), run.clone());
                    continue;
                }
                let ssts: Vec<_> = run
                    .ssts()
                    .iter()
                    .filter(|s| !s.remove_tag())
                    .cloned()
                    .collect();
                if !ssts.is_empty() {
                    version.append(level.id(), Arc::new(SortedRun::new(ssts)));
                }
            }
        }
        if compaction.is_trivial_move {
            for sst in &compaction.input_ssts {
                sst.set_remove_tag(false);
            }
        }
        if let Some(run) = new_run {
            version.append(compaction.target_level, run);
        }
        let new_sv = SuperVersion::new(
            sv.memtable().clone(),
            sv.imms().to_vec(),
            Arc::new(version),
        );
        info!("compaction installed: {}", new_sv.describe());
        self.install_sv(new_sv);
    }

    /*----------------------metadata----------------------*/

    fn save_metadata(&self) -> Result<()> {
        let path = self.path.join("metadata");
        let mut writer = FileWriter::new(
            SeqWriteFile::create(&path, self.options.use_direct_io)?,
            1 << 20,
        );
        let sv = self.get_sv();
        let version = sv.version();
        writer.append_u64(self.seq.load(Ordering::SeqCst))?;
        writer.append_u64(self.file_gen.next_id())?;
        writer.append_u64(version.levels().len() as u64)?;
        for level in version.levels() {
            writer.append_u64(level.id() as u64)?;
            writer.append_u64(level.runs().len() as u64)?;
            for run in level.runs() {
                writer.append_u64(run.ssts().len() as u64)?;
                for sst in run.ssts() {
                    let info = sst.info();
                    writer.append_u64(info.count)?;
                    writer.append_u64(info.size)?;
                    writer.append_u64(info.sst_id)?;
                    writer.append_u64(info.index_offset)?;
                    writer.append_u64(info.bloom_filter_offset)?;
                    writer.append_u64(info.filename.len() as u64)?;
                    writer.append_slice(info.filename.as_bytes())?;
                }
            }
        }
        writer.finish()?;
        Ok(())
    }

    fn load_metadata(
        path: &Path,
        options: &LsmStorageOptions,
        block_cache: &Arc<BlockCache>,
    ) -> Result<(u64, u64, Version)> {
        let metadata_path = path.join("metadata");
        let file = ReadFile::open(&metadata_path, options.use_direct_io)
            .context("fail to open metadata")?;
        let mut reader = FileReader::new(&file, 1 << 20, 0);
        let read = (|| -> Result<(u64, u64, Version)> {
            let seq = reader.read_u64()?;
            let next_file_id = reader.read_u64()?;
            let num_levels = reader.read_u64()?;
            let mut version = Version::new();
            for _ in 0..num_levels {
                let level_id = reader.read_u64()? as usize;
                let num_runs = reader.read_u64()?;
                for _ in 0..num_runs {
                    let num_ssts = reader.read_u64()?;
                    ensure!(num_ssts > 0, "empty sorted run");
                    let mut ssts = Vec::with_capacity(num_ssts as usize);
                    for _ in 0..num_ssts {
                        let count = reader.read_u64()?;
                        let size = reader.read_u64()?;
                        let sst_id = reader.read_u64()?;
                        let index_offset = reader.read_u64()?;
                        let bloom_filter_offset = reader.read_u64()?;
                        let name_len = reader.read_u64()? as usize;
                        let filename =
                            String::from_utf8(reader.read_bytes(name_len)?.to_vec())?;
                        let info = SSTInfo {
                            count,
                            size,
                            sst_id,
                            index_offset,
                            bloom_filter_offset,
                            filename,
                        };
                        ssts.push(Arc::new(SSTable::open(
                            info,
                            Some(block_cache.clone()),
                            options.use_direct_io,
                        )?));
                    }
                    version.append(level_id, Arc::new(SortedRun::new(ssts)));
                }
            }
            Ok((seq, next_file_id, version))
        })();
        read.context("corrupt metadata")
    }
}

/// The storage engine: an `LsmStorageInner` plus its two background
/// workers.
pub struct LsmStorage {
    pub(crate) inner: Arc<LsmStorageInner>,
    flush_thread: Mutex<Option<JoinHandle<()>>>,
    compaction_thread: Mutex<Option<JoinHandle<()>>>,
}

impl LsmStorage {
    pub fn open(path: impl AsRef<Path>, options: LsmStorageOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let block_cache = Arc::new(BlockCache::new(4096));
        let (seq, next_file_id, version) = if options.create_new {
            std::fs::create_dir_all(&path)
                .with_context(|| format!("fail to create {}", path.display()))?;
            std::fs::write(
                path.join("OPTIONS.json"),
                serde_json::to_string_pretty(&options)?,
            )?;
            (0, 0, Version::new())
        } else {
            LsmStorageInner::load_metadata(&path, &options, &block_cache)?
        };
        let (flush_tx, flush_rx) = channel::unbounded();
        let (compact_tx, compact_rx) = channel::unbounded();
        let inner = Arc::new(LsmStorageInner {
            sv: RwLock::new(Arc::new(SuperVersion::new(
                Arc::new(MemTable::create(0)),
                Vec::new(),
                Arc::new(version),
            ))),
            write_lock: Mutex::new(()),
            state_lock: Mutex::new(()),
            file_gen: FileNameGenerator::new(&path, next_file_id),
            path,
            block_cache,
            seq: AtomicU64::new(seq),
            next_memtable_id: AtomicUsize::new(1),
            picker: Mutex::new(build_picker(&options)),
            options: Arc::new(options),
            flush_tx,
            compact_tx,
            flush_in_progress: AtomicBool::new(false),
            compaction_in_progress: AtomicBool::new(false),
            background_error: Mutex::new(None),
            stopped: AtomicBool::new(false),
        });
        info!("storage opened at seq {}: {}", seq, inner.get_sv().describe());
        let flush_inner = inner.clone();
        let flush_thread = std::thread::spawn(move || {
            Self::worker_loop(flush_inner, flush_rx, LsmStorageInner::flush_once)
        });
        let compaction_inner = inner.clone();
        let compaction_thread = std::thread::spawn(move || {
            Self::worker_loop(compaction_inner, compact_rx, LsmStorageInner::compact_once)
        });
        Ok(Self {
            inner,
            flush_thread: Mutex::new(Some(flush_thread)),
            compaction_thread: Mutex::new(Some(compaction_thread)),
        })
    }

    /// Shared skeleton of the flush and compaction workers: wake on a
    /// notification (or tick), drain all available work, park again.
    fn worker_loop(
        inner: Arc<LsmStorageInner>,
        rx: channel::Receiver<()>,
        mut work: impl FnMut(&LsmStorageInner) -> Result<bool>,
    ) {
        loop {
            match rx.recv_timeout(WORKER_TICK) {
                Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if inner.stopped() {
                break;
            }
            loop {
                match work(&inner) {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(e) => {
                        inner.set_background_error(&e);
                        break;
                    }
                }
            }
        }
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.put(key, value)
    }

    pub fn del(&self, key: &[u8]) -> Result<()> {
        self.inner.del(key)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.inner.get(key)
    }

    /// Iterator over the whole store at the current snapshot.
    pub fn begin(&self) -> Result<LsmIterator> {
        self.inner.begin()
    }

    /// Iterator positioned at the first user key ≥ `key`.
    pub fn seek(&self, key: &[u8]) -> Result<LsmIterator> {
        self.inner.seek(key)
    }

    pub fn flush_all(&self) -> Result<()> {
        self.inner.check_alive()?;
        self.inner.flush_all()
    }

    pub fn drop_all(&self) -> Result<()> {
        self.inner.drop_all()
    }

    /// Drains memtables, stops the background workers and persists the
    /// metadata file. Idempotent; also runs on drop.
    pub fn close(&self) -> Result<()> {
        if self.inner.stopped() {
            return Ok(());
        }
        let drained = self.inner.flush_all();
        self.inner.stopped.store(true, Ordering::SeqCst);
        let _ = self.inner.flush_tx.send(());
        let _ = self.inner.compact_tx.send(());
        if let Some(handle) = self.flush_thread.lock().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.compaction_thread.lock().take() {
            let _ = handle.join();
        }
        self.inner.save_metadata()?;
        info!("storage closed at seq {}", self.inner.seq());
        drained
    }
}

impl Drop for LsmStorage {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("close on drop failed: {e:#}");
        }
    }
}
