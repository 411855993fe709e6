use crate::db::format::InternalKeyComparator;
use crate::iterator::Iter;
use crate::opt::ReadOptions;
use crate::util::comparator::Comparator;
use crate::{Error, IResult};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Access to the sorted run files by file number.
///
/// Entry format of every table:
///     key: internal key
///     value: value of user key
pub trait TableCache: Send + Sync {
    /// Create an iterator for the specified `file_number` (the corresponding
    /// file length must be exactly `file_size` bytes).
    fn new_iter(
        &self,
        options: &ReadOptions,
        file_number: u64,
        file_size: u64,
    ) -> IResult<Box<dyn Iter>>;

    /// Seek to internal key `ikey` in the specified file and, if an entry at
    /// or after it exists, call `saver` with that entry.
    fn get(
        &self,
        options: &ReadOptions,
        file_number: u64,
        file_size: u64,
        ikey: &[u8],
        saver: &mut dyn FnMut(&[u8], &[u8]),
    ) -> IResult<()>;

    /// Returns the approximate offset within the specified file at which
    /// the data for `ikey` begins, or would begin if the key were present.
    fn approximate_offset_of(&self, file_number: u64, file_size: u64, ikey: &[u8]) -> IResult<u64>;

    /// Evict any entry for the specified file number.
    fn evict(&self, file_number: u64);
}

type Table = Arc<Vec<(Vec<u8>, Vec<u8>)>>;

/// A `TableCache` whose tables live in memory. Tables are registered with
/// [`MemTableCache::add_table`] under the file number a run refers to.
pub struct MemTableCache<C: Comparator> {
    icmp: InternalKeyComparator<C>,
    tables: RwLock<HashMap<u64, Table>>,
}

impl<C: Comparator> MemTableCache<C> {
    pub fn new(user_comparator: C) -> Self {
        MemTableCache {
            icmp: InternalKeyComparator::new(user_comparator),
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Register a table under `file_number`. Entries are sorted by internal
    /// key. Returns the table's nominal size in bytes.
    pub fn add_table(&self, file_number: u64, mut entries: Vec<(Vec<u8>, Vec<u8>)>) -> u64 {
        entries.sort_by(|a, b| self.icmp.compare(&a.0, &b.0));
        let size = entries
            .iter()
            .fold(0u64, |acc, (k, v)| acc + (k.len() + v.len()) as u64);
        self.tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(file_number, Arc::new(entries));
        size
    }

    pub fn contains(&self, file_number: u64) -> bool {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&file_number)
    }

    fn find_table(&self, file_number: u64) -> IResult<Table> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&file_number)
            .cloned()
            .ok_or_else(|| {
                Error::IO(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("table {} not found", file_number),
                ))
            })
    }
}

impl<C: Comparator> TableCache for MemTableCache<C> {
    fn new_iter(
        &self,
        _options: &ReadOptions,
        file_number: u64,
        _file_size: u64,
    ) -> IResult<Box<dyn Iter>> {
        let table = self.find_table(file_number)?;
        Ok(Box::new(SortedTableIterator::new(self.icmp.clone(), table)))
    }

    fn get(
        &self,
        _options: &ReadOptions,
        file_number: u64,
        _file_size: u64,
        ikey: &[u8],
        saver: &mut dyn FnMut(&[u8], &[u8]),
    ) -> IResult<()> {
        let table = self.find_table(file_number)?;
        let pos = table.partition_point(|(k, _)| self.icmp.compare(k, ikey) == Ordering::Less);
        if let Some((k, v)) = table.get(pos) {
            saver(k, v);
        }
        Ok(())
    }

    fn approximate_offset_of(&self, file_number: u64, _file_size: u64, ikey: &[u8]) -> IResult<u64> {
        let table = self.find_table(file_number)?;
        Ok(table
            .iter()
            .take_while(|(k, _)| self.icmp.compare(k, ikey) == Ordering::Less)
            .fold(0u64, |acc, (k, v)| acc + (k.len() + v.len()) as u64))
    }

    fn evict(&self, file_number: u64) {
        self.tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&file_number);
    }
}

/// Iterator over an in-memory table sorted by `cmp`.
pub struct SortedTableIterator<C: Comparator> {
    cmp: C,
    entries: Table,
    // `entries.len()` means invalid
    pos: usize,
}

impl<C: Comparator> SortedTableIterator<C> {
    pub fn new(cmp: C, entries: Arc<Vec<(Vec<u8>, Vec<u8>)>>) -> Self {
        let pos = entries.len();
        SortedTableIterator { cmp, entries, pos }
    }
}

impl<C: Comparator> Iter for SortedTableIterator<C> {
    fn valid(&self) -> bool {
        self.pos < self.entries.len()
    }

    fn seek_to_first(&mut self) {
        self.pos = 0;
    }

    fn seek_to_last(&mut self) {
        self.pos = if self.entries.is_empty() {
            0
        } else {
            self.entries.len() - 1
        };
    }

    fn seek(&mut self, target: &[u8]) {
        let cmp = &self.cmp;
        self.pos = self
            .entries
            .partition_point(|(k, _)| cmp.compare(k, target) == Ordering::Less);
    }

    fn next(&mut self) {
        if self.valid() {
            self.pos += 1;
        }
    }

    fn prev(&mut self) {
        if self.pos == 0 {
            self.pos = self.entries.len();
        } else if self.valid() {
            self.pos -= 1;
        }
    }

    fn key(&self) -> &[u8] {
        &self.entries[self.pos].0
    }

    fn value(&self) -> &[u8] {
        &self.entries[self.pos].1
    }

    fn status(&mut self) -> IResult<()> {
        Ok(())
    }
}
