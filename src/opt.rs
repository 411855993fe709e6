use crate::util::comparator::{BytewiseComparator, Comparator};

/// Number of levels a version tracks.
pub const MAX_LEVELS: usize = 7;

/// Where a compaction of runs at level `L` writes its output run.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum OutputLevelPolicy {
    /// Push the merged run one level down. The last level compacts into itself.
    NextLevel,
    /// Merge the runs in place at `L`. Level 0 still pushes to level 1 since
    /// level 0 only ever holds single-file runs.
    SameLevel,
}

impl OutputLevelPolicy {
    pub fn output_level(self, level: usize) -> usize {
        match self {
            OutputLevelPolicy::SameLevel if level > 0 => level,
            _ => std::cmp::min(level + 1, MAX_LEVELS - 1),
        }
    }
}

#[derive(Clone)]
pub struct Options<C: Comparator> {
    /// Comparator used to define the order of user keys. Its name is
    /// persisted in the manifest.
    pub comparator: C,
    /// Bootstrap a new manifest when the directory has no CURRENT file.
    pub create_if_missing: bool,
    /// Verify block checksums of every table read by a compaction.
    pub paranoid_checks: bool,
    /// Keep appending to the recovered manifest instead of starting a new one.
    pub reuse_logs: bool,
    /// A recovered manifest is only reused while it is smaller than this.
    pub max_file_size: u64,
    /// Byte budget of level 0 and level 1.
    pub max_bytes_for_level_base: u64,
    /// Each level beyond 1 gets this many times the budget of the one above.
    pub level_size_multiplier: u64,
    /// Number of runs at a level merged together by one compaction.
    pub tiered_trigger: usize,
    pub output_level_policy: OutputLevelPolicy,
    /// Fan-out of the routing index nodes.
    pub index_node_capacity: usize,
}

impl<C: Comparator> Options<C> {
    /// Returns the byte budget of `level`.
    pub fn max_bytes_for_level(&self, level: usize) -> u64 {
        let mut result = self.max_bytes_for_level_base;
        let mut level = level;
        while level > 1 {
            result = result.saturating_mul(self.level_size_multiplier);
            level -= 1;
        }
        result
    }

    /// Initial seek budget of a file of `file_size` bytes. One seek costs
    /// about as much as compacting 16KiB.
    pub fn allowed_seeks(&self, file_size: u64) -> i64 {
        std::cmp::max(100, (file_size / 16384) as i64)
    }
}

impl Default for Options<BytewiseComparator> {
    fn default() -> Self {
        Options::with_comparator(BytewiseComparator::default())
    }
}

impl<C: Comparator> Options<C> {
    pub fn with_comparator(comparator: C) -> Self {
        Options {
            comparator,
            create_if_missing: true,
            paranoid_checks: false,
            reuse_logs: false,
            max_file_size: 2 << 20,
            max_bytes_for_level_base: 10 * 1024 * 1024,
            level_size_multiplier: 10,
            tiered_trigger: 4,
            output_level_policy: OutputLevelPolicy::NextLevel,
            index_node_capacity: 64,
        }
    }
}

/// Options that control read operations.
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    /// If true, all data read from underlying storage will be
    /// verified against corresponding checksums.
    pub verify_checksums: bool,
    /// Should the data read for this iteration be cached in memory?
    pub fill_cache: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            verify_checksums: false,
            fill_cache: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_bytes_for_level() {
        let opts = Options::<BytewiseComparator>::default();
        let mut tests = vec![
            (0, 10 << 20),
            (1, 10 << 20),
            (2, 100 << 20),
            (3, 1000 << 20),
            (6, 1_000_000u64 << 20),
        ];
        for (level, expect) in tests.drain(..) {
            assert_eq!(opts.max_bytes_for_level(level), expect, "level {}", level);
        }
    }

    #[test]
    fn test_output_level_policy() {
        let tests = vec![
            (OutputLevelPolicy::NextLevel, 0, 1),
            (OutputLevelPolicy::NextLevel, 3, 4),
            (OutputLevelPolicy::NextLevel, MAX_LEVELS - 1, MAX_LEVELS - 1),
            (OutputLevelPolicy::SameLevel, 0, 1),
            (OutputLevelPolicy::SameLevel, 2, 2),
            (OutputLevelPolicy::SameLevel, MAX_LEVELS - 1, MAX_LEVELS - 1),
        ];
        for (policy, level, expect) in tests {
            assert_eq!(policy.output_level(level), expect);
        }
    }

    #[test]
    fn test_allowed_seeks() {
        let opts = Options::<BytewiseComparator>::default();
        assert_eq!(opts.allowed_seeks(0), 100);
        assert_eq!(opts.allowed_seeks(16384 * 1000), 1000);
    }
}
