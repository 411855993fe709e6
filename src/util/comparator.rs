use std::cmp::Ordering;

/// A Comparator provides a total order over the byte strings used as keys
/// in a run file, the manifest and the routing index. Implementations must be
/// thread-safe since one comparator is shared by every reader of a version.
pub trait Comparator: Send + Sync + Clone + 'static {
    /// Three-way  comparison. Returns value:
    /// Ordering::Less iff a < b
    /// Ordering::Equal iff a == b
    /// Ordering::Greater iff a > b
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// The name of comparator. Persisted in the manifest and checked on
    /// recovery, so a database built with one ordering is never reopened
    /// with another.
    fn name(&self) -> &str;

    /// Returns a short key in `[start, limit)` when `start < limit`, used to
    /// shrink boundary keys. Returning `start` unchanged is always correct.
    fn find_shortest_separator(&self, start: &[u8], limit: &[u8]) -> Vec<u8>;

    /// Returns a short string >= key.
    fn find_short_successor(&self, key: &[u8]) -> Vec<u8>;
}

/// `BytewiseComparator` uses lexicographic byte-wise ordering.
#[derive(Default, Clone, Copy, Debug)]
pub struct BytewiseComparator {}

impl Comparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn name(&self) -> &str {
        "routelsm.BytewiseComparator"
    }

    fn find_shortest_separator(&self, start: &[u8], limit: &[u8]) -> Vec<u8> {
        // Find length of common prefix.
        let min_length = std::cmp::min(start.len(), limit.len());
        let mut diff_index = 0;
        while diff_index < min_length && start[diff_index] == limit[diff_index] {
            diff_index += 1;
        }
        if diff_index >= min_length {
            // Do not shorten if one string is a prefix of the other.
        } else {
            let diff_byte = start[diff_index];
            if diff_byte < 0xff && diff_byte + 1 < limit[diff_index] {
                let mut res = start[..=diff_index].to_vec();
                res[diff_index] += 1;
                return res;
            }
        }
        start.to_owned()
    }

    fn find_short_successor(&self, key: &[u8]) -> Vec<u8> {
        // Find first character that can be incremented.
        match key.iter().position(|&b| b != 0xff) {
            Some(i) => {
                let mut res = key[..=i].to_vec();
                res[i] += 1;
                res
            }
            None => key.to_owned(),
        }
    }
}
