use crate::opt::MAX_LEVELS;
use crate::util::comparator::Comparator;
use crate::version::run::Run;
use crate::version::version_edit::VersionEdit;
use crate::version::Version;
use fxhash::{FxHashMap, FxHashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[derive(Default)]
struct LevelState {
    deleted_runs: FxHashSet<u64>,
    // runs placed before the base runs of the level
    added_front: Vec<Arc<Run>>,
    added_runs: Vec<Arc<Run>>,
}

impl LevelState {
    fn delete(&mut self, run_id: u64) {
        self.deleted_runs.insert(run_id);
        self.added_front.retain(|r| r.id() != run_id);
        self.added_runs.retain(|r| r.id() != run_id);
    }
}

/// Accumulates a sequence of edits on top of a base version so the
/// intermediate versions are never materialized.
pub struct VersionBuilder<C: Comparator> {
    base: Arc<Version<C>>,
    levels: Vec<LevelState>,
    // origin id -> run that took it over, wins over the base map
    origin_remap: FxHashMap<u64, Arc<Run>>,
    max_run_id: Option<u64>,
}

impl<C: Comparator> VersionBuilder<C> {
    pub fn new(base: Arc<Version<C>>) -> Self {
        let mut levels = Vec::with_capacity(MAX_LEVELS);
        levels.resize_with(MAX_LEVELS, LevelState::default);
        VersionBuilder {
            base,
            levels,
            origin_remap: FxHashMap::default(),
            max_run_id: None,
        }
    }

    /// Highest run id seen in the applied edits.
    #[inline]
    pub fn max_run_id(&self) -> Option<u64> {
        self.max_run_id
    }

    /// Apply `edit` to the current state. The edit must have passed
    /// `VersionEdit::check_form`.
    pub fn apply(&mut self, edit: &VersionEdit) {
        for run in edit.snapshot_runs.iter() {
            let run = Arc::new(self.materialize(run, run.level()));
            for origin in run.origins() {
                self.origin_remap.insert(*origin, run.clone());
            }
            self.levels[run.level()].added_runs.push(run);
        }

        if let Some(nr) = &edit.new_run {
            let mut run = self.materialize(&nr.run, nr.output_level);
            if nr.output_level == 0 {
                if let Some(first) = run.files().first().map(|f| f.number) {
                    run.insert_origin(first);
                }
            } else {
                for (run_id, origins) in edit.retired.iter() {
                    self.levels[nr.input_level].delete(*run_id);
                    for origin in origins {
                        run.insert_origin(*origin);
                    }
                }
            }
            let run = Arc::new(run);
            for origin in run.origins() {
                self.origin_remap.insert(*origin, run.clone());
            }
            let state = &mut self.levels[nr.output_level];
            if nr.input_level == nr.output_level && nr.output_level > 0 {
                state.added_front.push(run);
            } else {
                state.added_runs.push(run);
            }
        }
    }

    // Copy `run` into a fresh run at `level` whose files carry a full
    // seek budget.
    fn materialize(&mut self, run: &Run, level: usize) -> Run {
        self.max_run_id = Some(self.max_run_id.map_or(run.id(), |m| m.max(run.id())));
        let options = self.base.options();
        let mut result = Run::new(run.id(), level);
        for file in run.files() {
            let f = file.as_ref().clone();
            f.allowed_seeks
                .store(options.allowed_seeks(f.file_size), Ordering::Release);
            result.insert_file(f);
        }
        for origin in run.origins() {
            result.insert_origin(*origin);
        }
        result
    }

    /// Save the accumulated state into `v`.
    pub fn save_to(&self, v: &mut Version<C>) {
        for (level, state) in self.levels.iter().enumerate() {
            // front runs are stacked newest first
            let mut runs: Vec<Arc<Run>> = state.added_front.iter().rev().cloned().collect();
            runs.extend(
                self.base
                    .runs(level)
                    .iter()
                    .filter(|r| !state.deleted_runs.contains(&r.id()))
                    .cloned(),
            );
            runs.extend(state.added_runs.iter().cloned());
            v.set_runs(level, runs);
        }
        let mut origins = self.base.origins().clone();
        for (origin, run) in self.origin_remap.iter() {
            origins.insert(*origin, run.clone());
        }
        v.set_origins(origins);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::format::{InternalKey, ValueType};
    use crate::opt::Options;
    use crate::util::comparator::BytewiseComparator;
    use crate::version::version_edit::FileMetaData;

    fn file(number: u64, lo: &str, hi: &str) -> FileMetaData {
        FileMetaData::new(
            number,
            1000,
            InternalKey::new(lo.as_bytes(), 100, ValueType::Value),
            InternalKey::new(hi.as_bytes(), 100, ValueType::Value),
        )
    }

    fn run(id: u64, level: usize, files: Vec<FileMetaData>, origins: &[u64]) -> Run {
        let mut r = Run::new(id, level);
        for f in files {
            r.insert_file(f);
        }
        for o in origins {
            r.insert_origin(*o);
        }
        r
    }

    fn empty_version() -> Arc<Version<BytewiseComparator>> {
        Arc::new(Version::new(Arc::new(Options::<BytewiseComparator>::default()), 0))
    }

    fn build(base: Arc<Version<BytewiseComparator>>, edits: &[VersionEdit]) -> Version<BytewiseComparator> {
        let mut builder = VersionBuilder::new(base.clone());
        for edit in edits {
            builder.apply(edit);
        }
        let mut v = Version::new(base.options().clone(), base.vnum() + 1);
        builder.save_to(&mut v);
        v
    }

    fn flush(id: u64, number: u64) -> VersionEdit {
        let mut edit = VersionEdit::new();
        edit.set_new_run(0, 0, run(id, 0, vec![file(number, "a", "z")], &[]));
        edit
    }

    fn run_ids(v: &Version<BytewiseComparator>, level: usize) -> Vec<u64> {
        v.runs(level).iter().map(|r| r.id()).collect()
    }

    #[test]
    fn test_level0_output_takes_own_file_as_origin() {
        let v = build(empty_version(), &[flush(1, 7), flush(2, 9)]);
        assert_eq!(run_ids(&v, 0), vec![1, 2]);
        assert_eq!(v.runs(0)[0].origins(), &[7]);
        assert_eq!(v.origin_run(7).unwrap().id(), 1);
        assert_eq!(v.origin_run(9).unwrap().id(), 2);
        assert_eq!(v.num_level_files(0), 2);
        // files got a seek budget
        let seeks = v.files(0)[0].allowed_seeks.load(Ordering::Acquire);
        assert_eq!(seeks, 100);
    }

    #[test]
    fn test_retired_origins_resolve_to_new_run() {
        let base = Arc::new(build(empty_version(), &[flush(1, 7), flush(2, 9), flush(3, 11)]));
        let mut edit = VersionEdit::new();
        edit.set_new_run(0, 1, run(4, 0, vec![file(20, "a", "m"), file(21, "n", "z")], &[]));
        edit.retire_run(&base.runs(0)[0]);
        edit.retire_run(&base.runs(0)[1]);
        let v = build(base.clone(), &[edit]);

        assert_eq!(run_ids(&v, 0), vec![3]);
        assert_eq!(run_ids(&v, 1), vec![4]);
        let new_run = &v.runs(1)[0];
        assert_eq!(new_run.level(), 1);
        assert_eq!(new_run.origins(), &[7, 9]);
        for origin in [7, 9].iter() {
            assert!(Arc::ptr_eq(v.origin_run(*origin).unwrap(), new_run));
        }
        assert_eq!(v.origin_run(11).unwrap().id(), 3);
        assert_eq!(v.num_level_files(1), 2);
        // the base version is untouched
        assert_eq!(run_ids(&base, 0), vec![1, 2, 3]);
        assert_eq!(base.origin_run(7).unwrap().id(), 1);
        // unchanged runs are shared
        assert!(Arc::ptr_eq(&v.runs(0)[0], &base.runs(0)[2]));
    }

    #[test]
    fn test_snapshot_edit_remaps_listed_origins() {
        let mut edit = VersionEdit::new();
        edit.add_snapshot_run(run(5, 2, vec![file(30, "a", "f")], &[7, 9]));
        edit.add_snapshot_run(run(6, 0, vec![file(31, "a", "z")], &[31]));
        let v = build(empty_version(), &[edit]);
        assert_eq!(run_ids(&v, 2), vec![5]);
        assert_eq!(run_ids(&v, 0), vec![6]);
        assert_eq!(v.origin_run(7).unwrap().id(), 5);
        assert_eq!(v.origin_run(9).unwrap().id(), 5);
        assert_eq!(v.origin_run(31).unwrap().id(), 6);
    }

    #[test]
    fn test_retire_pending_run_in_same_builder() {
        let mut merge = VersionEdit::new();
        merge.set_new_run(0, 1, run(2, 0, vec![file(8, "a", "z")], &[]));
        merge.retire_run(&run(1, 0, vec![file(7, "a", "z")], &[7]));
        let v = build(empty_version(), &[flush(1, 7), merge]);
        assert!(v.runs(0).is_empty());
        assert_eq!(run_ids(&v, 1), vec![2]);
        assert_eq!(v.origin_run(7).unwrap().id(), 2);
    }

    #[test]
    fn test_same_level_output_goes_to_front() {
        let mut seed = VersionEdit::new();
        for (id, origin) in [(1, 10), (2, 11), (3, 12)].iter() {
            seed.add_snapshot_run(run(*id, 2, vec![file(*origin, "a", "z")], &[*origin]));
        }
        let base = Arc::new(build(empty_version(), &[seed]));
        let mut edit = VersionEdit::new();
        edit.set_new_run(2, 2, run(4, 2, vec![file(20, "a", "z")], &[]));
        edit.retire_run(&base.runs(2)[0]);
        edit.retire_run(&base.runs(2)[1]);
        let v = build(base, &[edit]);
        assert_eq!(run_ids(&v, 2), vec![4, 3]);
        assert_eq!(v.origin_run(10).unwrap().id(), 4);
        assert_eq!(v.origin_run(12).unwrap().id(), 3);
        let numbers: Vec<u64> = v.files(2).iter().map(|f| f.number).collect();
        assert_eq!(numbers, vec![20, 12]);
    }

    #[test]
    fn test_max_run_id() {
        let mut builder = VersionBuilder::new(empty_version());
        assert_eq!(builder.max_run_id(), None);
        builder.apply(&flush(5, 1));
        builder.apply(&flush(3, 2));
        assert_eq!(builder.max_run_id(), Some(5));
    }
}
