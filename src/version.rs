pub mod run;
pub mod version_builder;
pub mod version_edit;
pub mod version_set;

use crate::btree::OrderedIndex;
use crate::db::format::{
    InternalKey, InternalKeyComparator, LookupKey, ParsedInternalKey, ValueType,
    MAX_KEY_SEQUENCE, VALUE_TYPE_FOR_SEEK,
};
use crate::iterator::{ConcatenateIterator, Iter};
use crate::opt::{Options, ReadOptions, MAX_LEVELS};
use crate::table_cache::TableCache;
use crate::util::comparator::Comparator;
use crate::version::run::Run;
use crate::version::version_edit::FileMetaData;
use crate::{Error, IResult};
use fxhash::FxHashMap;
use log::warn;
use std::cmp::Ordering as CmpOrdering;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError, RwLock};

/// Outcome of a point lookup in one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueLookup {
    Found(Vec<u8>),
    /// The newest entry for the key is a tombstone.
    Deleted,
    NotFound,
}

/// The first file a lookup read without finding its key, recorded only
/// when the lookup had to read another file after it. `Version::update_stats`
/// charges it one seek.
#[derive(Debug, Default)]
pub struct GetStats {
    pub seek_file: Option<(usize, Arc<FileMetaData>)>,
}

enum SaverState {
    NotFound,
    Found(Vec<u8>),
    Deleted,
    Corrupt,
}

/// An immutable view of every live run.
///
/// Runs are shared with older and newer versions through `Arc`; a version is
/// never changed once it is installed. Readers hold an `Arc<Version>` for as
/// long as they need a consistent view.
pub struct Version<C: Comparator> {
    // generation number, increasing with every installed version
    vnum: u64,
    options: Arc<Options<C>>,
    icmp: InternalKeyComparator<C>,

    // Runs of every level. A level keeps its runs oldest first.
    runs: Vec<Vec<Arc<Run>>>,
    // Files of every level flattened from `runs`.
    files: Vec<Vec<Arc<FileMetaData>>>,
    // origin id -> the run currently holding that origin's data
    origins: FxHashMap<u64, Arc<Run>>,

    // Level that should be compacted next and its compaction score.
    // Score < 1 means compaction is not strictly needed. Set by `finalize`.
    compaction_score: f64,
    compaction_level: usize,

    // Next file to compact based on seek stats.
    file_to_compact: RwLock<Option<(usize, Arc<FileMetaData>)>>,
}

impl<C: Comparator> Version<C> {
    pub fn new(options: Arc<Options<C>>, vnum: u64) -> Self {
        let icmp = InternalKeyComparator::new(options.comparator.clone());
        Version {
            vnum,
            options,
            icmp,
            runs: vec![vec![]; MAX_LEVELS],
            files: vec![vec![]; MAX_LEVELS],
            origins: FxHashMap::default(),
            compaction_score: 0.0,
            compaction_level: 0,
            file_to_compact: RwLock::new(None),
        }
    }

    #[inline]
    pub fn vnum(&self) -> u64 {
        self.vnum
    }

    #[inline]
    pub fn options(&self) -> &Arc<Options<C>> {
        &self.options
    }

    #[inline]
    pub fn icmp(&self) -> &InternalKeyComparator<C> {
        &self.icmp
    }

    #[inline]
    pub fn runs(&self, level: usize) -> &[Arc<Run>] {
        &self.runs[level]
    }

    #[inline]
    pub fn files(&self, level: usize) -> &[Arc<FileMetaData>] {
        &self.files[level]
    }

    /// Returns the run that owns the data of `origin`.
    #[inline]
    pub fn origin_run(&self, origin: u64) -> Option<&Arc<Run>> {
        self.origins.get(&origin)
    }

    #[inline]
    pub fn origins(&self) -> &FxHashMap<u64, Arc<Run>> {
        &self.origins
    }

    /// Every run of the version, level by level.
    pub fn all_runs(&self) -> impl Iterator<Item = &Arc<Run>> {
        self.runs.iter().flatten()
    }

    #[inline]
    pub fn compaction_score(&self) -> f64 {
        self.compaction_score
    }

    #[inline]
    pub fn compaction_level(&self) -> usize {
        self.compaction_level
    }

    pub fn file_to_compact(&self) -> Option<(usize, Arc<FileMetaData>)> {
        self.file_to_compact
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[inline]
    pub fn num_level_files(&self, level: usize) -> usize {
        self.files[level].len()
    }

    #[inline]
    pub fn num_level_runs(&self, level: usize) -> usize {
        self.runs[level].len()
    }

    #[inline]
    pub fn num_level_bytes(&self, level: usize) -> u64 {
        total_file_size(&self.files[level])
    }

    pub(crate) fn set_runs(&mut self, level: usize, runs: Vec<Arc<Run>>) {
        self.files[level] = runs
            .iter()
            .flat_map(|r| r.files().iter().cloned())
            .collect();
        self.runs[level] = runs;
    }

    pub(crate) fn set_origins(&mut self, origins: FxHashMap<u64, Arc<Run>>) {
        self.origins = origins;
    }

    /// Bytes at `level` relative to the level's byte budget.
    pub fn level_score(&self, level: usize) -> f64 {
        self.num_level_bytes(level) as f64 / self.options.max_bytes_for_level(level) as f64
    }

    /// Compute the compaction score of every level and remember the level
    /// that needs compaction most.
    pub fn finalize(&mut self) {
        let mut best_level = 0;
        let mut best_score = -1.0;
        for level in 0..MAX_LEVELS {
            let score = self.level_score(level);
            if score > best_score {
                best_level = level;
                best_score = score;
            }
        }
        self.compaction_level = best_level;
        self.compaction_score = best_score;
    }

    /// Look up `key`. With an `origin` hint only the run owning that origin
    /// is searched, otherwise every run is searched from newest to oldest.
    ///
    /// A corrupted entry is reported as an error.
    pub fn get(
        &self,
        options: &ReadOptions,
        key: &LookupKey,
        origin: Option<u64>,
        table_cache: &Arc<dyn TableCache>,
    ) -> IResult<(ValueLookup, GetStats)> {
        let ikey = key.internal_key();
        let ukey = key.user_key();
        let ucmp = &self.icmp.user_comparator;
        let mut stats = GetStats::default();

        let candidates: Vec<&Arc<Run>> = match origin {
            Some(origin) => match self.origins.get(&origin) {
                Some(run) => vec![run],
                None => return Ok((ValueLookup::NotFound, stats)),
            },
            None => self.runs.iter().flat_map(|l| l.iter().rev()).collect(),
        };

        let mut last_file_read: Option<(usize, Arc<FileMetaData>)> = None;
        for run in candidates {
            let files = run.files();
            let index = find_file(&self.icmp, files, ikey);
            if index >= files.len() {
                continue;
            }
            let file = &files[index];
            if ucmp.compare(ukey, file.smallest.user_key()) == CmpOrdering::Less {
                continue;
            }
            // reading a second file charges the first one
            if let Some(missed) = last_file_read.take() {
                if stats.seek_file.is_none() {
                    stats.seek_file = Some(missed);
                }
            }
            last_file_read = Some((run.level(), file.clone()));
            let mut state = SaverState::NotFound;
            table_cache.get(
                options,
                file.number,
                file.file_size,
                ikey,
                &mut |k: &[u8], v: &[u8]| {
                    state = match ParsedInternalKey::decode_from(k) {
                        None => SaverState::Corrupt,
                        Some(parsed) => {
                            if ucmp.compare(parsed.user_key, ukey) == CmpOrdering::Equal {
                                match parsed.value_type {
                                    ValueType::Value => SaverState::Found(v.to_vec()),
                                    ValueType::Deletion => SaverState::Deleted,
                                }
                            } else {
                                SaverState::NotFound
                            }
                        }
                    }
                },
            )?;
            match state {
                SaverState::NotFound => {}
                SaverState::Found(value) => return Ok((ValueLookup::Found(value), stats)),
                SaverState::Deleted => return Ok((ValueLookup::Deleted, stats)),
                SaverState::Corrupt => {
                    return Err(Error::Corruption(format!(
                        "corrupted key for {:?} in file {}",
                        String::from_utf8_lossy(ukey),
                        file.number
                    )))
                }
            }
        }
        Ok((ValueLookup::NotFound, stats))
    }

    /// Charge the seek recorded in `stats`. Returns true when a file ran out
    /// of allowed seeks and should trigger a compaction.
    pub fn update_stats(&self, stats: GetStats) -> bool {
        if let Some((level, file)) = stats.seek_file {
            let remaining = file.allowed_seeks.fetch_sub(1, Ordering::AcqRel) - 1;
            if remaining <= 0 {
                let mut to_compact = self
                    .file_to_compact
                    .write()
                    .unwrap_or_else(PoisonError::into_inner);
                if to_compact.is_none() {
                    *to_compact = Some((level, file));
                    return true;
                }
            }
        }
        false
    }

    /// Returns an iterator over the entries of one run.
    pub fn new_run_iter(
        &self,
        options: &ReadOptions,
        table_cache: &Arc<dyn TableCache>,
        run: &Run,
    ) -> IResult<Box<dyn Iter>> {
        if run.files().len() == 1 {
            let file = &run.files()[0];
            table_cache.new_iter(options, file.number, file.file_size)
        } else {
            Ok(Box::new(ConcatenateIterator::new(
                self.icmp.clone(),
                run.files().to_vec(),
                table_cache.clone(),
                *options,
            )))
        }
    }

    /// Append one iterator per run to `iters` and record in `slots` which
    /// position each run id landed at.
    pub fn add_iterators(
        &self,
        options: &ReadOptions,
        table_cache: &Arc<dyn TableCache>,
        iters: &mut Vec<Box<dyn Iter>>,
        slots: &mut FxHashMap<u64, usize>,
    ) -> IResult<()> {
        for run in self.all_runs() {
            if run.is_empty() {
                continue;
            }
            slots.insert(run.id(), iters.len());
            iters.push(self.new_run_iter(options, table_cache, run)?);
        }
        Ok(())
    }

    /// Returns true iff some run in `level` overlaps the user key range
    /// `[smallest, largest]`. `None` stands for a key smaller (larger) than
    /// every key.
    pub fn overlap_in_level(
        &self,
        level: usize,
        smallest: Option<&[u8]>,
        largest: Option<&[u8]>,
    ) -> bool {
        self.runs[level]
            .iter()
            .any(|run| some_file_overlaps_range(&self.icmp, true, run.files(), smallest, largest))
    }

    /// Returns the files in `level` overlapping `[begin, end]`.
    ///
    /// Runs at one level may overlap each other, so whenever an overlapping
    /// file widens the range the search restarts with the wider range.
    pub fn get_overlapping_inputs(
        &self,
        level: usize,
        begin: Option<&InternalKey>,
        end: Option<&InternalKey>,
    ) -> Vec<Arc<FileMetaData>> {
        let ucmp = &self.icmp.user_comparator;
        let mut user_begin = begin.map(|k| k.user_key().to_vec());
        let mut user_end = end.map(|k| k.user_key().to_vec());
        let mut result = vec![];
        let files = &self.files[level];
        let mut i = 0;
        while i < files.len() {
            let f = &files[i];
            i += 1;
            let file_start = f.smallest.user_key();
            let file_limit = f.largest.user_key();
            if let Some(b) = &user_begin {
                if ucmp.compare(file_limit, b) == CmpOrdering::Less {
                    // "f" is completely before specified range; skip it
                    continue;
                }
            }
            if let Some(e) = &user_end {
                if ucmp.compare(file_start, e) == CmpOrdering::Greater {
                    // "f" is completely after specified range; skip it
                    continue;
                }
            }
            result.push(f.clone());
            if let Some(b) = &user_begin {
                if ucmp.compare(file_start, b) == CmpOrdering::Less {
                    user_begin = Some(file_start.to_vec());
                    result.clear();
                    i = 0;
                    continue;
                }
            }
            if let Some(e) = &user_end {
                if ucmp.compare(file_limit, e) == CmpOrdering::Greater {
                    user_end = Some(file_limit.to_vec());
                    result.clear();
                    i = 0;
                }
            }
        }
        result
    }

    /// Fill `index` with every user key of the version, each pointing at the
    /// first origin of the run holding its newest data.
    ///
    /// Levels are walked deepest first and the runs of a level oldest first,
    /// so keys of newer runs overwrite older ones.
    pub fn rebuild_index(
        &self,
        options: &ReadOptions,
        table_cache: &Arc<dyn TableCache>,
        index: &mut OrderedIndex<C>,
    ) -> IResult<()> {
        for level in (0..MAX_LEVELS).rev() {
            for run in self.runs[level].iter() {
                let origin = match run.origins().first() {
                    Some(origin) => *origin,
                    None => {
                        if !run.is_empty() {
                            warn!("run #{} at level {} has no origin, skipped", run.id(), level);
                        }
                        continue;
                    }
                };
                let mut iter = self.new_run_iter(options, table_cache, run)?;
                iter.seek_to_first();
                while iter.valid() {
                    let parsed = ParsedInternalKey::decode_from(iter.key()).ok_or_else(|| {
                        Error::Corruption(format!("bad internal key in run #{}", run.id()))
                    })?;
                    index.insert(parsed.user_key, origin);
                    iter.next();
                }
                iter.status()?;
            }
        }
        Ok(())
    }

    /// Returns a summary like "files[ 1 0 0 0 0 0 0 ] runs[ 1 0 0 0 0 0 0 ]".
    pub fn level_summary(&self) -> String {
        let mut s = String::from("files[ ");
        for files in self.files.iter() {
            s.push_str(&format!("{} ", files.len()));
        }
        s.push_str("] runs[ ");
        for runs in self.runs.iter() {
            s.push_str(&format!("{} ", runs.len()));
        }
        s.push(']');
        s
    }
}

impl<C: Comparator> Debug for Version<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Version #{} {}", self.vnum, self.level_summary())?;
        for (level, runs) in self.runs.iter().enumerate() {
            if runs.is_empty() {
                continue;
            }
            writeln!(f, "--- level {} ---", level)?;
            for run in runs.iter() {
                writeln!(f, " {:?}", run)?;
            }
        }
        Ok(())
    }
}

/// Returns the smallest index `i` such that `files[i].largest >= ikey`,
/// or `files.len()` if there is no such file. `files` must be sorted and
/// disjoint.
pub fn find_file<C: Comparator>(
    icmp: &InternalKeyComparator<C>,
    files: &[Arc<FileMetaData>],
    ikey: &[u8],
) -> usize {
    files.partition_point(|f| icmp.compare(f.largest.data(), ikey) == CmpOrdering::Less)
}

/// Returns true iff some file in `files` overlaps the user key range
/// `[smallest, largest]`. `None` stands for an unbounded end. When
/// `disjoint` is true the files must be sorted and non-overlapping.
pub fn some_file_overlaps_range<C: Comparator>(
    icmp: &InternalKeyComparator<C>,
    disjoint: bool,
    files: &[Arc<FileMetaData>],
    smallest: Option<&[u8]>,
    largest: Option<&[u8]>,
) -> bool {
    let ucmp = &icmp.user_comparator;
    if !disjoint {
        return files.iter().any(|f| {
            !(after_file(ucmp, smallest, f) || before_file(ucmp, largest, f))
        });
    }
    let index = match smallest {
        Some(s) => {
            let small = InternalKey::new(s, MAX_KEY_SEQUENCE, VALUE_TYPE_FOR_SEEK);
            find_file(icmp, files, small.data())
        }
        None => 0,
    };
    if index >= files.len() {
        // beginning of range is after all files, so no overlap
        return false;
    }
    !before_file(ucmp, largest, &files[index])
}

// user key is after all data in `f`
fn after_file<C: Comparator>(ucmp: &C, ukey: Option<&[u8]>, f: &FileMetaData) -> bool {
    match ukey {
        Some(k) => ucmp.compare(k, f.largest.user_key()) == CmpOrdering::Greater,
        None => false,
    }
}

// user key is before all data in `f`
fn before_file<C: Comparator>(ucmp: &C, ukey: Option<&[u8]>, f: &FileMetaData) -> bool {
    match ukey {
        Some(k) => ucmp.compare(k, f.smallest.user_key()) == CmpOrdering::Less,
        None => false,
    }
}

/// Sum of the file sizes of `files`.
pub fn total_file_size(files: &[Arc<FileMetaData>]) -> u64 {
    files.iter().fold(0, |acc, f| acc + f.file_size)
}
