use crate::compaction::Compaction;
use crate::db::filename::{generate_filename, parse_filename, read_current, update_current, FileType};
use crate::db::format::{InternalKey, InternalKeyComparator};
use crate::iterator::{Iter, MergingIterator};
use crate::opt::{Options, ReadOptions, MAX_LEVELS};
use crate::storage::{File, Storage};
use crate::table_cache::TableCache;
use crate::util::comparator::Comparator;
use crate::util::reporter::LogReporter;
use crate::version::run::Run;
use crate::version::version_builder::VersionBuilder;
use crate::version::version_edit::VersionEdit;
use crate::version::{total_file_size, Version};
use crate::wal::reader::Reader;
use crate::wal::writer::Writer;
use crate::{Error, IResult};
use log::{debug, error, info};
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashSet;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Lifecycle of a `VersionSet`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CatalogState {
    Uninitialized,
    Recovering,
    Serving,
    /// A `log_and_apply` is writing the manifest.
    Committing,
    /// The last manifest write failed. The next commit starts a new manifest.
    Faulted,
}

struct Inner<C: Comparator> {
    state: CatalogState,
    next_file_number: u64,
    manifest_file_number: u64,
    last_sequence: u64,
    log_number: u64,
    // 0 or backing store for memtable being compacted
    prev_log_number: u64,
    next_run_number: u64,
    next_vnum: u64,
    current: Arc<Version<C>>,
    // every version ever installed that may still be alive, oldest first
    versions: Vec<Weak<Version<C>>>,
}

impl<C: Comparator> Inner<C> {
    fn install(&mut self, v: Version<C>) {
        let v = Arc::new(v);
        self.versions.retain(|w| w.strong_count() > 0);
        self.versions.push(Arc::downgrade(&v));
        self.next_vnum = v.vnum() + 1;
        self.current = v;
    }

    fn mark_file_number_used(&mut self, number: u64) {
        if self.next_file_number <= number {
            self.next_file_number = number + 1;
        }
    }
}

/// The catalog of every run in the database.
///
/// It owns the current `Version`, persists every change as a `VersionEdit`
/// record in the MANIFEST file and rebuilds the state from it on `recover`.
/// Commits are serialized by the manifest lock; the state lock is never held
/// during manifest I/O so readers calling `current` are not blocked.
pub struct VersionSet<S: Storage + Clone, C: Comparator> {
    db_path: PathBuf,
    storage: S,
    options: Arc<Options<C>>,
    icmp: InternalKeyComparator<C>,
    table_cache: Arc<dyn TableCache>,
    inner: Mutex<Inner<C>>,
    // Lock order: `manifest` before `inner`.
    manifest: Mutex<Option<Writer<S::F>>>,
    db_lock: Option<S::F>,
}

impl<S: Storage + Clone, C: Comparator> VersionSet<S, C> {
    pub fn new<P: AsRef<Path>>(
        db_path: P,
        options: Arc<Options<C>>,
        storage: S,
        table_cache: Arc<dyn TableCache>,
    ) -> Self {
        let icmp = InternalKeyComparator::new(options.comparator.clone());
        let empty = Arc::new(Version::new(options.clone(), 0));
        let inner = Inner {
            state: CatalogState::Uninitialized,
            next_file_number: 2,
            manifest_file_number: 0,
            last_sequence: 0,
            log_number: 0,
            prev_log_number: 0,
            next_run_number: 1,
            next_vnum: 1,
            versions: vec![Arc::downgrade(&empty)],
            current: empty,
        };
        VersionSet {
            db_path: db_path.as_ref().to_path_buf(),
            storage,
            options,
            icmp,
            table_cache,
            inner: Mutex::new(inner),
            manifest: Mutex::new(None),
            db_lock: None,
        }
    }

    /// Open the catalog stored under `db_path`: take the directory lock,
    /// create a new database if there is none and `create_if_missing` is
    /// set, recover the state and roll a new manifest if the old one is not
    /// reused.
    pub fn open<P: AsRef<Path>>(
        db_path: P,
        options: Arc<Options<C>>,
        storage: S,
        table_cache: Arc<dyn TableCache>,
    ) -> IResult<Self> {
        let mut vset = Self::new(db_path, options, storage, table_cache);
        vset.storage.mkdir_all(&vset.db_path)?;
        let lock_path = generate_filename(&vset.db_path, FileType::Lock, 0);
        let lock = if vset.storage.exists(&lock_path) {
            vset.storage.open(&lock_path)?
        } else {
            vset.storage.create(&lock_path)?
        };
        lock.lock_file()?;
        vset.db_lock = Some(lock);

        let current = generate_filename(&vset.db_path, FileType::Current, 0);
        if !vset.storage.exists(&current) {
            if !vset.options.create_if_missing {
                return Err(Error::InvalidArgument(format!(
                    "{}: does not exist (create_if_missing is false)",
                    vset.db_path.display()
                )));
            }
            vset.create_new()?;
        }
        if vset.recover()? {
            let mut edit = VersionEdit::new();
            vset.log_and_apply(&mut edit)?;
        }
        Ok(vset)
    }

    /// Write the manifest of an empty database and point CURRENT at it.
    pub fn create_new(&self) -> IResult<()> {
        let mut edit = VersionEdit::new();
        edit.set_comparator_name(self.icmp.user_comparator.name());
        edit.set_log_number(0);
        edit.set_next_file(2);
        edit.set_last_sequence(0);

        let manifest = generate_filename(&self.db_path, FileType::Manifest, 1);
        let f = self.storage.create(&manifest)?;
        let mut writer = Writer::new(f);
        let res = writer
            .add_record(&edit.encode())
            .and_then(|_| writer.sync())
            .and_then(|_| writer.into_file().close())
            .and_then(|_| update_current(&self.storage, &self.db_path, 1));
        match res {
            Ok(()) => {
                info!("Created new database at {}", self.db_path.display());
                Ok(())
            }
            Err(e) => {
                let _ = self.storage.remove(&manifest);
                Err(e)
            }
        }
    }

    /// Recover the last saved state from the manifest CURRENT points to.
    /// Returns whether a new manifest is needed for later commits.
    pub fn recover(&self) -> IResult<bool> {
        let mut manifest = lock(&self.manifest);
        let mut inner = lock(&self.inner);
        inner.state = CatalogState::Recovering;
        match self.recover_locked(&mut manifest, &mut inner) {
            Ok(save_manifest) => {
                inner.state = CatalogState::Serving;
                Ok(save_manifest)
            }
            Err(e) => {
                inner.state = CatalogState::Uninitialized;
                Err(e)
            }
        }
    }

    fn recover_locked(
        &self,
        manifest: &mut Option<Writer<S::F>>,
        inner: &mut Inner<C>,
    ) -> IResult<bool> {
        let current = read_current(&self.storage, &self.db_path)?;
        let manifest_path = self.db_path.join(&current);
        let file = self.storage.open(&manifest_path)?;
        let file_length = file.len()?;

        let reporter = LogReporter::new();
        let mut reader = Reader::new(file, Some(Box::new(reporter.clone())), true, 0);
        let base = Arc::new(Version::new(self.options.clone(), 0));
        let mut builder = VersionBuilder::new(base);
        let mut next_file_number = None;
        let mut log_number = None;
        let mut prev_log_number = None;
        let mut last_sequence = None;
        let mut record = vec![];
        let mut count = 0;
        while reader.read_record(&mut record) {
            reporter.result()?;
            let edit = VersionEdit::decode_from(&record)?;
            if let Some(name) = &edit.comparator_name {
                if name.as_str() != self.icmp.user_comparator.name() {
                    return Err(Error::Corruption(format!(
                        "{} does not match existing comparator {}",
                        name,
                        self.icmp.user_comparator.name()
                    )));
                }
            }
            builder.apply(&edit);
            if edit.next_file_number.is_some() {
                next_file_number = edit.next_file_number;
            }
            if edit.log_number.is_some() {
                log_number = edit.log_number;
            }
            if edit.prev_log_number.is_some() {
                prev_log_number = edit.prev_log_number;
            }
            if edit.last_sequence.is_some() {
                last_sequence = edit.last_sequence;
            }
            count += 1;
        }
        reporter.result()?;

        let next_file_number = next_file_number
            .ok_or_else(|| Error::Corruption("no meta-nextfile entry in manifest".to_owned()))?;
        let log_number = log_number
            .ok_or_else(|| Error::Corruption("no meta-lognumber entry in manifest".to_owned()))?;
        let last_sequence = last_sequence.ok_or_else(|| {
            Error::Corruption("no last-sequence-number entry in manifest".to_owned())
        })?;
        let prev_log_number = prev_log_number.unwrap_or(0);

        let mut v = Version::new(self.options.clone(), inner.next_vnum);
        builder.save_to(&mut v);
        v.finalize();
        inner.install(v);
        inner.next_file_number = next_file_number;
        inner.mark_file_number_used(prev_log_number);
        inner.mark_file_number_used(log_number);
        inner.manifest_file_number = inner.next_file_number;
        inner.next_file_number += 1;
        inner.last_sequence = last_sequence;
        inner.log_number = log_number;
        inner.prev_log_number = prev_log_number;
        inner.next_run_number = builder.max_run_id().map_or(1, |id| id + 1);

        info!(
            "Recovered {} edits from {}, manifest #{}, next file #{}, last seq {}, log #{}, prev log #{}, {}",
            count,
            current,
            inner.manifest_file_number,
            inner.next_file_number,
            inner.last_sequence,
            inner.log_number,
            inner.prev_log_number,
            inner.current.level_summary(),
        );

        match self.reuse_manifest(&manifest_path, file_length) {
            Some((writer, number)) => {
                *manifest = Some(writer);
                inner.manifest_file_number = number;
                Ok(false)
            }
            None => Ok(true),
        }
    }

    // Returns a writer appending to the recovered manifest if it can be
    // reused.
    fn reuse_manifest(&self, manifest: &Path, file_length: u64) -> Option<(Writer<S::F>, u64)> {
        if !self.options.reuse_logs {
            return None;
        }
        let number = match parse_filename(manifest) {
            Some((FileType::Manifest, number)) => number,
            _ => return None,
        };
        // Make a new compacted manifest if the old one is too big
        if file_length >= self.options.max_file_size {
            return None;
        }
        let res = self.storage.open(manifest).and_then(|mut f| {
            f.seek(SeekFrom::End(0))?;
            Ok(f)
        });
        match res {
            Ok(f) => {
                info!("Reusing MANIFEST {}", manifest.display());
                Some((Writer::with_offset(f, file_length), number))
            }
            Err(e) => {
                error!("Reuse MANIFEST {}: {}", manifest.display(), e);
                None
            }
        }
    }

    /// Apply `edit` to the current version, persist it and install the
    /// result as the new current version.
    ///
    /// Unset log number fields are filled from the catalog. On failure the
    /// current version and the counters stay unchanged and a manifest
    /// created by this call is removed.
    pub fn log_and_apply(&self, edit: &mut VersionEdit) -> IResult<()> {
        edit.check_form()?;
        if let Some(name) = &edit.comparator_name {
            if name.as_str() != self.icmp.user_comparator.name() {
                return Err(Error::InvalidArgument(format!(
                    "comparator {} does not match {}",
                    name,
                    self.icmp.user_comparator.name()
                )));
            }
        }

        let mut manifest = lock(&self.manifest);
        let (v, base, manifest_number) = {
            let mut inner = lock(&self.inner);
            match inner.state {
                CatalogState::Serving | CatalogState::Faulted => {}
                state => {
                    return Err(Error::InvalidArgument(format!(
                        "cannot commit while {:?}",
                        state
                    )))
                }
            }
            match edit.log_number {
                Some(n) => {
                    if n < inner.log_number || n >= inner.next_file_number {
                        return Err(Error::InvalidArgument(format!(
                            "log number {} out of range [{}, {})",
                            n, inner.log_number, inner.next_file_number
                        )));
                    }
                }
                None => edit.set_log_number(inner.log_number),
            }
            if edit.prev_log_number.is_none() {
                edit.set_prev_log_number(inner.prev_log_number);
            }
            if manifest.is_none() && inner.state == CatalogState::Faulted {
                // The manifest CURRENT points to may be the one that failed,
                // never overwrite it.
                inner.manifest_file_number = inner.next_file_number;
                inner.next_file_number += 1;
            }
            edit.set_next_file(inner.next_file_number);
            edit.set_last_sequence(inner.last_sequence);

            let base = inner.current.clone();
            let mut builder = VersionBuilder::new(base.clone());
            builder.apply(edit);
            let mut v = Version::new(self.options.clone(), inner.next_vnum);
            builder.save_to(&mut v);
            v.finalize();
            inner.state = CatalogState::Committing;
            (v, base, inner.manifest_file_number)
        };

        let mut new_manifest = None;
        let res = self.write_manifest(&mut manifest, &mut new_manifest, &base, manifest_number, edit);

        let mut inner = lock(&self.inner);
        match res {
            Ok(()) => {
                debug!("Applied {:?}", edit);
                inner.install(v);
                inner.log_number = edit.log_number.unwrap_or(inner.log_number);
                inner.prev_log_number = edit.prev_log_number.unwrap_or(inner.prev_log_number);
                inner.state = CatalogState::Serving;
                Ok(())
            }
            Err(e) => {
                error!("MANIFEST write failed: {}", e);
                *manifest = None;
                if let Some(path) = new_manifest {
                    let _ = self.storage.remove(&path);
                }
                inner.state = CatalogState::Faulted;
                Err(e)
            }
        }
    }

    fn write_manifest(
        &self,
        manifest: &mut Option<Writer<S::F>>,
        new_manifest: &mut Option<PathBuf>,
        base: &Version<C>,
        manifest_number: u64,
        edit: &VersionEdit,
    ) -> IResult<()> {
        if manifest.is_none() {
            let path = generate_filename(&self.db_path, FileType::Manifest, manifest_number);
            let f = self.storage.create(&path)?;
            *new_manifest = Some(path);
            let mut writer = Writer::new(f);
            self.write_snapshot(&mut writer, base)?;
            *manifest = Some(writer);
        }
        if let Some(writer) = manifest.as_mut() {
            writer.add_record(&edit.encode())?;
            writer.sync()?;
        }
        if new_manifest.is_some() {
            // If we just created a new manifest, install it by pointing
            // CURRENT at it.
            update_current(&self.storage, &self.db_path, manifest_number)?;
            info!("New MANIFEST #{}", manifest_number);
        }
        Ok(())
    }

    // Persist every run of `v` as the first record of a new manifest.
    fn write_snapshot(&self, writer: &mut Writer<S::F>, v: &Version<C>) -> IResult<()> {
        let mut edit = VersionEdit::new();
        edit.set_comparator_name(self.icmp.user_comparator.name());
        for run in v.all_runs() {
            edit.add_snapshot_run(run.as_ref().clone());
        }
        writer.add_record(&edit.encode())
    }

    /// Pick the runs of the next compaction, or `None` if no compaction is
    /// needed.
    ///
    /// Size triggered compactions take precedence over seek triggered ones.
    /// Levels over budget are tried from the highest score down, skipping
    /// levels that have nothing to merge. The oldest runs of the chosen
    /// level are taken first, at most `tiered_trigger` of them.
    pub fn pick_compaction(&self) -> Option<Compaction<C>> {
        let current = self.current();
        let trigger = std::cmp::max(self.options.tiered_trigger, 1);

        // Levels over budget, most urgent first. A level with nothing to
        // merge must not hold back the others.
        let mut candidates: Vec<(usize, f64)> = (0..MAX_LEVELS)
            .map(|level| (level, current.level_score(level)))
            .filter(|(_, score)| *score >= 1.0)
            .collect();
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(CmpOrdering::Equal));
        for (level, score) in candidates {
            let runs: Vec<Arc<Run>> = current.runs(level).iter().take(trigger).cloned().collect();
            if let Some(c) = self.new_compaction(&current, level, runs, score) {
                return Some(c);
            }
        }

        let (level, file) = current.file_to_compact()?;
        let runs = current
            .runs(level)
            .iter()
            .filter(|r| r.files().iter().any(|f| f.number == file.number))
            .cloned()
            .collect();
        self.new_compaction(&current, level, runs, current.level_score(level))
    }

    fn new_compaction(
        &self,
        current: &Arc<Version<C>>,
        level: usize,
        runs: Vec<Arc<Run>>,
        score: f64,
    ) -> Option<Compaction<C>> {
        let output_level = self.options.output_level_policy.output_level(level);
        if runs.is_empty() || (output_level == level && runs.len() < 2) {
            // nothing to merge
            return None;
        }
        info!(
            "Compacting {} runs at level {} into level {}, score {:.2}",
            runs.len(),
            level,
            output_level,
            score
        );
        Some(Compaction::new(current.clone(), level, output_level, runs))
    }

    /// Create an iterator reading the entries of the compaction inputs in
    /// internal key order.
    pub fn make_input_iterator(&self, c: &Compaction<C>) -> IResult<Box<dyn Iter>> {
        let version = c
            .input_version()
            .ok_or_else(|| Error::InvalidArgument("compaction inputs released".to_owned()))?;
        let read_opts = ReadOptions {
            verify_checksums: self.options.paranoid_checks,
            fill_cache: false,
        };
        let mut iters: Vec<Box<dyn Iter>> = vec![];
        if c.level() == 0 {
            for f in c.inputs() {
                iters.push(self.table_cache.new_iter(&read_opts, f.number, f.file_size)?);
            }
        } else {
            for run in c.input_runs() {
                iters.push(version.new_run_iter(&read_opts, &self.table_cache, run)?);
            }
        }
        Ok(Box::new(MergingIterator::new(self.icmp.clone(), iters)))
    }

    /// Add the number of every file referenced by a live version to `live`.
    pub fn add_live_files(&self, live: &mut HashSet<u64>) {
        for v in self.live_versions() {
            for level in 0..MAX_LEVELS {
                for f in v.files(level) {
                    live.insert(f.number);
                }
            }
        }
    }

    /// Returns every version that is still referenced, oldest first.
    pub fn live_versions(&self) -> Vec<Arc<Version<C>>> {
        let mut inner = lock(&self.inner);
        inner.versions.retain(|w| w.strong_count() > 0);
        inner.versions.iter().filter_map(Weak::upgrade).collect()
    }

    pub fn oldest(&self) -> Option<Arc<Version<C>>> {
        self.live_versions().into_iter().next()
    }

    pub fn newest(&self) -> Option<Arc<Version<C>>> {
        self.live_versions().pop()
    }

    /// Returns the maximum overlapping data (in bytes) at next level for any
    /// file at a level >= 1.
    pub fn max_next_level_overlapping_bytes(&self) -> u64 {
        let current = self.current();
        let mut result = 0;
        for level in 1..MAX_LEVELS - 1 {
            for f in current.files(level) {
                let overlaps =
                    current.get_overlapping_inputs(level + 1, Some(&f.smallest), Some(&f.largest));
                result = std::cmp::max(result, total_file_size(&overlaps));
            }
        }
        result
    }

    /// Returns the approximate byte offset of `ikey` within the data of
    /// `v`, the total size of all data sorting before it.
    pub fn approximate_offset_of(&self, v: &Version<C>, ikey: &InternalKey) -> IResult<u64> {
        let mut result = 0;
        for run in v.all_runs() {
            for f in run.files() {
                if self.icmp.compare(f.largest.data(), ikey.data()) != CmpOrdering::Greater {
                    // entire file is before "ikey"
                    result += f.file_size;
                } else if self.icmp.compare(f.smallest.data(), ikey.data()) == CmpOrdering::Greater
                {
                    // files of a run are sorted, the rest are after "ikey" too
                    break;
                } else {
                    result +=
                        self.table_cache
                            .approximate_offset_of(f.number, f.file_size, ikey.data())?;
                }
            }
        }
        Ok(result)
    }

    pub fn level_summary(&self) -> String {
        self.current().level_summary()
    }

    #[inline]
    pub fn current(&self) -> Arc<Version<C>> {
        lock(&self.inner).current.clone()
    }

    #[inline]
    pub fn state(&self) -> CatalogState {
        lock(&self.inner).state
    }

    #[inline]
    pub fn options(&self) -> &Arc<Options<C>> {
        &self.options
    }

    #[inline]
    pub fn table_cache(&self) -> &Arc<dyn TableCache> {
        &self.table_cache
    }

    #[inline]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Allocate a new file number.
    pub fn new_file_number(&self) -> u64 {
        let mut inner = lock(&self.inner);
        let n = inner.next_file_number;
        inner.next_file_number += 1;
        n
    }

    /// Return `file_number` to the pool if it is the last one allocated.
    pub fn reuse_file_number(&self, file_number: u64) {
        let mut inner = lock(&self.inner);
        if inner.next_file_number == file_number + 1 {
            inner.next_file_number = file_number;
        }
    }

    /// Make sure `number` is never handed out by `new_file_number`.
    pub fn mark_file_number_used(&self, number: u64) {
        lock(&self.inner).mark_file_number_used(number);
    }

    #[inline]
    pub fn next_file_number(&self) -> u64 {
        lock(&self.inner).next_file_number
    }

    /// Allocate the id of a new run.
    pub fn new_run_number(&self) -> u64 {
        let mut inner = lock(&self.inner);
        let n = inner.next_run_number;
        inner.next_run_number += 1;
        n
    }

    #[inline]
    pub fn manifest_file_number(&self) -> u64 {
        lock(&self.inner).manifest_file_number
    }

    #[inline]
    pub fn log_number(&self) -> u64 {
        lock(&self.inner).log_number
    }

    #[inline]
    pub fn prev_log_number(&self) -> u64 {
        lock(&self.inner).prev_log_number
    }

    #[inline]
    pub fn last_sequence(&self) -> u64 {
        lock(&self.inner).last_sequence
    }

    pub fn set_last_sequence(&self, seq: u64) {
        let mut inner = lock(&self.inner);
        debug_assert!(
            seq >= inner.last_sequence,
            "last sequence {} goes backwards to {}",
            inner.last_sequence,
            seq
        );
        inner.last_sequence = seq;
    }
}

impl<S: Storage + Clone, C: Comparator> Drop for VersionSet<S, C> {
    fn drop(&mut self) {
        if let Some(lock) = self.db_lock.take() {
            let _ = lock.unlock_file();
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
