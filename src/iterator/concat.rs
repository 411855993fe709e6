use crate::db::format::InternalKeyComparator;
use crate::iterator::Iter;
use crate::opt::ReadOptions;
use crate::table_cache::TableCache;
use crate::util::comparator::Comparator;
use crate::version::find_file;
use crate::version::version_edit::FileMetaData;
use crate::{Error, IResult};
use std::sync::Arc;

/// Iterates the entries of a list of sorted, disjoint files as one sorted
/// sequence, opening one table at a time through the table cache.
pub struct ConcatenateIterator<C: Comparator> {
    icmp: InternalKeyComparator<C>,
    files: Vec<Arc<FileMetaData>>,
    table_cache: Arc<dyn TableCache>,
    options: ReadOptions,
    // index of the opened file, `files.len()` when there is none
    index: usize,
    current: Option<Box<dyn Iter>>,
    err: Option<Error>,
}

impl<C: Comparator> ConcatenateIterator<C> {
    pub fn new(
        icmp: InternalKeyComparator<C>,
        files: Vec<Arc<FileMetaData>>,
        table_cache: Arc<dyn TableCache>,
        options: ReadOptions,
    ) -> Self {
        let index = files.len();
        ConcatenateIterator {
            icmp,
            files,
            table_cache,
            options,
            index,
            current: None,
            err: None,
        }
    }

    fn save_error(&mut self, e: Error) {
        if self.err.is_none() {
            self.err = Some(e);
        }
    }

    // Close the current table, keeping its error.
    fn close_current(&mut self) {
        if let Some(mut iter) = self.current.take() {
            if let Err(e) = iter.status() {
                self.save_error(e);
            }
        }
    }

    // Open the table at `index`.
    fn init_file(&mut self) {
        self.close_current();
        if self.index >= self.files.len() {
            return;
        }
        let f = &self.files[self.index];
        match self.table_cache.new_iter(&self.options, f.number, f.file_size) {
            Ok(iter) => self.current = Some(iter),
            Err(e) => self.save_error(e),
        }
    }

    fn skip_forward(&mut self) {
        while !self.valid() {
            if self.index + 1 >= self.files.len() {
                self.close_current();
                self.index = self.files.len();
                return;
            }
            self.index += 1;
            self.init_file();
            if let Some(iter) = self.current.as_mut() {
                iter.seek_to_first();
            }
        }
    }

    fn skip_backward(&mut self) {
        while !self.valid() {
            if self.index == 0 || self.index >= self.files.len() {
                self.close_current();
                self.index = self.files.len();
                return;
            }
            self.index -= 1;
            self.init_file();
            if let Some(iter) = self.current.as_mut() {
                iter.seek_to_last();
            }
        }
    }
}

impl<C: Comparator> Iter for ConcatenateIterator<C> {
    fn valid(&self) -> bool {
        self.current.as_ref().map_or(false, |iter| iter.valid())
    }

    fn seek_to_first(&mut self) {
        self.index = 0;
        self.init_file();
        if let Some(iter) = self.current.as_mut() {
            iter.seek_to_first();
        }
        self.skip_forward();
    }

    fn seek_to_last(&mut self) {
        self.index = if self.files.is_empty() {
            0
        } else {
            self.files.len() - 1
        };
        self.init_file();
        if let Some(iter) = self.current.as_mut() {
            iter.seek_to_last();
        }
        self.skip_backward();
    }

    fn seek(&mut self, target: &[u8]) {
        self.index = find_file(&self.icmp, &self.files, target);
        self.init_file();
        if let Some(iter) = self.current.as_mut() {
            iter.seek(target);
        }
        self.skip_forward();
    }

    fn next(&mut self) {
        if let Some(iter) = self.current.as_mut() {
            iter.next();
        }
        self.skip_forward();
    }

    fn prev(&mut self) {
        if let Some(iter) = self.current.as_mut() {
            iter.prev();
        }
        self.skip_backward();
    }

    fn key(&self) -> &[u8] {
        match &self.current {
            Some(iter) => iter.key(),
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match &self.current {
            Some(iter) => iter.value(),
            None => &[],
        }
    }

    fn status(&mut self) -> IResult<()> {
        if let Some(e) = self.err.take() {
            return Err(e);
        }
        match self.current.as_mut() {
            Some(iter) => iter.status(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::format::{InternalKey, ValueType};
    use crate::table_cache::MemTableCache;
    use crate::util::comparator::BytewiseComparator;

    fn ikey(k: &str) -> Vec<u8> {
        InternalKey::new(k.as_bytes(), 1, ValueType::Value).data().to_vec()
    }

    // Registers one table per key group and returns their descriptors.
    fn setup(
        cache: &MemTableCache<BytewiseComparator>,
        groups: &[&[&str]],
    ) -> Vec<Arc<FileMetaData>> {
        let mut files = vec![];
        for (i, keys) in groups.iter().enumerate() {
            let number = i as u64 + 1;
            let entries = keys
                .iter()
                .map(|k| (ikey(k), k.to_uppercase().into_bytes()))
                .collect();
            let size = cache.add_table(number, entries);
            let smallest: &[u8] = keys.first().map(|k| k.as_bytes()).unwrap_or_default();
            let largest: &[u8] = keys.last().map(|k| k.as_bytes()).unwrap_or_default();
            files.push(Arc::new(FileMetaData::new(
                number,
                size,
                InternalKey::new(smallest, 1, ValueType::Value),
                InternalKey::new(largest, 1, ValueType::Value),
            )));
        }
        files
    }

    fn concat(groups: &[&[&str]]) -> ConcatenateIterator<BytewiseComparator> {
        let cache = MemTableCache::new(BytewiseComparator::default());
        let files = setup(&cache, groups);
        ConcatenateIterator::new(
            InternalKeyComparator::new(BytewiseComparator::default()),
            files,
            Arc::new(cache),
            ReadOptions::default(),
        )
    }

    fn user_key(iter: &dyn Iter) -> String {
        let k = iter.key();
        String::from_utf8(k[..k.len() - 8].to_vec()).unwrap()
    }

    #[test]
    fn test_concat_forward_backward() {
        let mut iter = concat(&[&["a", "b"], &[], &["c"], &["d", "e"]]);
        iter.seek_to_first();
        let mut forward = vec![];
        while iter.valid() {
            forward.push(user_key(&iter));
            iter.next();
        }
        assert_eq!(forward, vec!["a", "b", "c", "d", "e"]);

        iter.seek_to_last();
        let mut backward = vec![];
        while iter.valid() {
            backward.push(user_key(&iter));
            iter.prev();
        }
        assert_eq!(backward, vec!["e", "d", "c", "b", "a"]);
        assert!(iter.status().is_ok());
    }

    #[test]
    fn test_concat_seek() {
        let mut iter = concat(&[&["a", "c"], &["e", "g"], &["i"]]);
        let tests = vec![
            ("0", Some("a")),
            ("a", Some("a")),
            ("b", Some("c")),
            ("d", Some("e")),
            ("g", Some("g")),
            ("h", Some("i")),
            ("j", None),
        ];
        for (target, expect) in tests {
            iter.seek(&ikey(target));
            match expect {
                Some(k) => {
                    assert!(iter.valid(), "seek {}", target);
                    assert_eq!(user_key(&iter), k, "seek {}", target);
                    assert_eq!(iter.value(), k.to_uppercase().as_bytes());
                }
                None => assert!(!iter.valid(), "seek {}", target),
            }
        }
        iter.seek(&ikey("e"));
        iter.prev();
        assert_eq!(user_key(&iter), "c");
    }

    #[test]
    fn test_concat_empty() {
        let mut iter = concat(&[]);
        iter.seek_to_first();
        assert!(!iter.valid());
        iter.seek_to_last();
        assert!(!iter.valid());
        iter.seek(&ikey("a"));
        assert!(!iter.valid());
        assert!(iter.status().is_ok());
    }

    #[test]
    fn test_concat_missing_table() {
        let cache = MemTableCache::new(BytewiseComparator::default());
        let files = setup(&cache, &[&["a"], &["b"]]);
        cache.evict(2);
        let mut iter = ConcatenateIterator::new(
            InternalKeyComparator::new(BytewiseComparator::default()),
            files,
            Arc::new(cache),
            ReadOptions::default(),
        );
        iter.seek_to_first();
        assert_eq!(user_key(&iter), "a");
        iter.next();
        assert!(!iter.valid());
        assert!(iter.status().is_err());
    }
}
