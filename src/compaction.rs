use crate::opt::MAX_LEVELS;
use crate::util::comparator::Comparator;
use crate::version::run::Run;
use crate::version::version_edit::{FileMetaData, VersionEdit};
use crate::version::{total_file_size, Version};
use std::cmp::Ordering;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// A compaction merging some runs of `level` into one new run at
/// `output_level`.
pub struct Compaction<C: Comparator> {
    level: usize,
    output_level: usize,
    // The version the compaction was picked against. Released by
    // `release_inputs`.
    input_version: Option<Arc<Version<C>>>,
    input_runs: Vec<Arc<Run>>,
    // files of `input_runs` in run order
    inputs: Vec<Arc<FileMetaData>>,

    // State for implementing `is_base_level_for_key`.
    // level_ptrs[l][r] is the index of the first file of run r at level l
    // that may still contain a key passed in.
    level_ptrs: Vec<Vec<usize>>,
}

impl<C: Comparator> Compaction<C> {
    pub fn new(
        version: Arc<Version<C>>,
        level: usize,
        output_level: usize,
        input_runs: Vec<Arc<Run>>,
    ) -> Self {
        let inputs = input_runs
            .iter()
            .flat_map(|r| r.files().iter().cloned())
            .collect();
        let level_ptrs = (0..MAX_LEVELS)
            .map(|l| vec![0; version.num_level_runs(l)])
            .collect();
        Compaction {
            level,
            output_level,
            input_version: Some(version),
            input_runs,
            inputs,
            level_ptrs,
        }
    }

    #[inline]
    pub fn level(&self) -> usize {
        self.level
    }

    #[inline]
    pub fn output_level(&self) -> usize {
        self.output_level
    }

    #[inline]
    pub fn input_runs(&self) -> &[Arc<Run>] {
        &self.input_runs
    }

    #[inline]
    pub fn inputs(&self) -> &[Arc<FileMetaData>] {
        &self.inputs
    }

    #[inline]
    pub fn num_input_files(&self) -> usize {
        self.inputs.len()
    }

    #[inline]
    pub fn total_input_bytes(&self) -> u64 {
        total_file_size(&self.inputs)
    }

    #[inline]
    pub fn input_version(&self) -> Option<&Arc<Version<C>>> {
        self.input_version.as_ref()
    }

    /// Returns true if no run below `level` can hold `user_key`, so a
    /// deletion marker for it can be dropped.
    ///
    /// The output level is scanned too, since with the next-level policy its
    /// existing runs hold data older than the inputs. Keys must be passed in
    /// increasing order.
    pub fn is_base_level_for_key(&mut self, user_key: &[u8]) -> bool {
        let version = match &self.input_version {
            Some(v) => v,
            None => return false,
        };
        let ucmp = &version.icmp().user_comparator;
        // Starts at level + 1, not level + 2: the output run lands beside the
        // runs already at the output level, which keep their older entries.
        for level in self.level + 1..MAX_LEVELS {
            for (i, run) in version.runs(level).iter().enumerate() {
                let files = run.files();
                let ptr = &mut self.level_ptrs[level][i];
                while *ptr < files.len() {
                    let f = &files[*ptr];
                    if ucmp.compare(user_key, f.largest.user_key()) != Ordering::Greater {
                        // We've advanced far enough
                        if ucmp.compare(user_key, f.smallest.user_key()) != Ordering::Less {
                            // Key falls in this file's range, so definitely
                            // not base level
                            return false;
                        }
                        break;
                    }
                    *ptr += 1;
                }
            }
        }
        true
    }

    /// Retire every input run in `edit`.
    pub fn add_run_deletions(&self, edit: &mut VersionEdit) {
        for run in self.input_runs.iter() {
            edit.retire_run(run);
        }
    }

    /// Drop the reference to the input version. Calling it again is a no-op.
    pub fn release_inputs(&mut self) {
        self.input_version.take();
    }
}

impl<C: Comparator> Debug for Compaction<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Compaction level {} -> {}, {} runs, {} files, {} bytes",
            self.level,
            self.output_level,
            self.input_runs.len(),
            self.inputs.len(),
            self.total_input_bytes()
        )
    }
}
