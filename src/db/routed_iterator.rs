use crate::btree::{Cursor, OrderedIndex};
use crate::db::format::{
    extract_user_key, InternalKey, InternalKeyComparator, INTERNAL_KEY_TAIL, MAX_KEY_SEQUENCE,
    VALUE_TYPE_FOR_SEEK,
};
use crate::iterator::{Direction, Iter};
use crate::util::comparator::Comparator;
use crate::version::Version;
use crate::{Error, IResult};
use fxhash::FxHashMap;
use std::cmp::Ordering;
use std::sync::Arc;

/// Yields the newest entry of every user key across many runs.
///
/// Instead of comparing the heads of all children like `MergingIterator`,
/// the routing index decides which run owns each user key: the cursor walks
/// the index, the origin id stored for the key is resolved to its run
/// through the version, and only that run's child is positioned on the key.
/// Index entries whose origin has no run or whose run has no child are
/// skipped.
pub struct RoutedMergeIterator<C: Comparator> {
    icmp: InternalKeyComparator<C>,
    version: Arc<Version<C>>,
    children: Vec<Box<dyn Iter>>,
    // run id -> index into `children`
    slots: FxHashMap<u64, usize>,
    cursor: Cursor<u64, C>,
    // child positioned on the cursor's key
    current: Option<usize>,
    direction: Direction,
    err: Option<Error>,
}

impl<C: Comparator> RoutedMergeIterator<C> {
    pub fn new(
        version: Arc<Version<C>>,
        index: Arc<OrderedIndex<C>>,
        children: Vec<Box<dyn Iter>>,
        slots: FxHashMap<u64, usize>,
    ) -> Self {
        RoutedMergeIterator {
            icmp: version.icmp().clone(),
            version,
            children,
            slots,
            cursor: Cursor::new(index),
            current: None,
            direction: Direction::Forward,
            err: None,
        }
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Position at the first user key at or past `user_key`.
    pub fn seek_user_key(&mut self, user_key: &[u8]) {
        self.direction = Direction::Forward;
        self.cursor.seek(user_key);
        self.find_forward();
    }

    // Child owning the key under the cursor.
    fn resolve(&self) -> Option<usize> {
        let origin = self.cursor.value()?;
        let run = self.version.origin_run(*origin)?;
        self.slots.get(&run.id()).copied()
    }

    // Position child `slot` on the newest entry of the cursor's key.
    // Returns false if the child has no entry for it.
    fn position_child(&mut self, slot: usize) -> bool {
        let user_key = self.cursor.key();
        let target = InternalKey::new(user_key, MAX_KEY_SEQUENCE, VALUE_TYPE_FOR_SEEK);
        let child = &mut self.children[slot];
        if self.direction == Direction::Forward
            && child.valid()
            && self.icmp.compare(child.key(), target.data()) == Ordering::Less
        {
            // children only move forward while the cursor does
            while child.valid() && self.icmp.compare(child.key(), target.data()) == Ordering::Less
            {
                child.next();
            }
        } else {
            // A child stepped backward lands on the oldest entry of a key,
            // so reverse moves always seek.
            child.seek(target.data());
        }
        if !child.valid() {
            if let Err(e) = child.status() {
                if self.err.is_none() {
                    self.err = Some(e);
                }
            }
            return false;
        }
        let ucmp = &self.icmp.user_comparator;
        ucmp.compare(extract_user_key(child.key()), user_key) == Ordering::Equal
    }

    fn find_forward(&mut self) {
        self.current = None;
        while self.cursor.valid() {
            if let Some(slot) = self.resolve() {
                if self.position_child(slot) {
                    self.current = Some(slot);
                    return;
                }
            }
            self.cursor.next();
        }
    }

    fn find_backward(&mut self) {
        self.current = None;
        while self.cursor.valid() {
            if let Some(slot) = self.resolve() {
                if self.position_child(slot) {
                    self.current = Some(slot);
                    return;
                }
            }
            self.cursor.prev();
        }
    }
}

impl<C: Comparator> Iter for RoutedMergeIterator<C> {
    fn valid(&self) -> bool {
        self.current.is_some() && self.cursor.valid()
    }

    fn seek_to_first(&mut self) {
        self.direction = Direction::Forward;
        self.cursor.seek_to_first();
        self.find_forward();
    }

    fn seek_to_last(&mut self) {
        self.direction = Direction::Reverse;
        self.cursor.seek_to_last();
        self.find_backward();
    }

    /// Position at the first user key at or past the user key of the
    /// internal key `target`. Every user key yields one entry, its newest.
    fn seek(&mut self, target: &[u8]) {
        if target.len() < INTERNAL_KEY_TAIL {
            self.direction = Direction::Forward;
            self.current = None;
            if self.err.is_none() {
                self.err = Some(Error::InvalidArgument(format!(
                    "seek target {:?} is not an internal key",
                    target
                )));
            }
            return;
        }
        self.seek_user_key(extract_user_key(target));
    }

    fn next(&mut self) {
        if !self.valid() {
            return;
        }
        self.direction = Direction::Forward;
        self.cursor.next();
        self.find_forward();
    }

    fn prev(&mut self) {
        if !self.valid() {
            return;
        }
        self.direction = Direction::Reverse;
        self.cursor.prev();
        self.find_backward();
    }

    fn key(&self) -> &[u8] {
        match self.current {
            Some(slot) => self.children[slot].key(),
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match self.current {
            Some(slot) => self.children[slot].value(),
            None => &[],
        }
    }

    fn status(&mut self) -> IResult<()> {
        if let Some(e) = self.err.take() {
            return Err(e);
        }
        for child in self.children.iter_mut() {
            child.status()?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::format::{ParsedInternalKey, ValueType};
    use crate::opt::{Options, ReadOptions};
    use crate::table_cache::{MemTableCache, TableCache};
    use crate::util::comparator::BytewiseComparator;
    use crate::version::run::Run;
    use crate::version::version_builder::VersionBuilder;
    use crate::version::version_edit::{FileMetaData, VersionEdit};

    pub(crate) struct Fixture {
        pub version: Arc<Version<BytewiseComparator>>,
        pub table_cache: Arc<dyn TableCache>,
    }

    fn ikey(k: &str, seq: u64, t: ValueType) -> Vec<u8> {
        InternalKey::new(k.as_bytes(), seq, t).data().to_vec()
    }

    fn table(
        cache: &MemTableCache<BytewiseComparator>,
        number: u64,
        entries: Vec<(Vec<u8>, &str)>,
    ) -> FileMetaData {
        let smallest = InternalKey::decoded_from(&entries[0].0);
        let largest = InternalKey::decoded_from(&entries[entries.len() - 1].0);
        let entries = entries
            .into_iter()
            .map(|(k, v)| (k, v.as_bytes().to_vec()))
            .collect();
        let size = cache.add_table(number, entries);
        FileMetaData::new(number, size, smallest, largest)
    }

    /// Level 1 holds run #1 (origin 1) over a..d in two files, level 0 holds
    /// run #2 (origin 5) with newer b, a deletion of d and a new key e.
    pub(crate) fn fixture() -> Fixture {
        use ValueType::{Deletion, Value};
        let cache = MemTableCache::new(BytewiseComparator::default());
        let mut old = Run::new(1, 1);
        old.insert_file(table(
            &cache,
            10,
            vec![(ikey("a", 1, Value), "a-old"), (ikey("b", 2, Value), "b-old")],
        ));
        old.insert_file(table(
            &cache,
            11,
            vec![(ikey("c", 3, Value), "c-old"), (ikey("d", 4, Value), "d-old")],
        ));
        old.insert_origin(1);
        let mut new = Run::new(2, 0);
        new.insert_file(table(
            &cache,
            5,
            vec![
                (ikey("b", 20, Value), "b-new"),
                (ikey("b", 6, Value), "b-older"),
                (ikey("d", 21, Deletion), ""),
                (ikey("e", 22, Value), "e-new"),
            ],
        ));
        new.insert_origin(5);

        let mut edit = VersionEdit::new();
        edit.add_snapshot_run(old);
        edit.add_snapshot_run(new);
        let base = Arc::new(Version::new(Arc::new(Options::<BytewiseComparator>::default()), 0));
        let mut builder = VersionBuilder::new(base.clone());
        builder.apply(&edit);
        let mut v = Version::new(base.options().clone(), 1);
        builder.save_to(&mut v);
        Fixture {
            version: Arc::new(v),
            table_cache: Arc::new(cache),
        }
    }

    fn routed(f: &Fixture, index: OrderedIndex<BytewiseComparator>) -> RoutedMergeIterator<BytewiseComparator> {
        let mut children = vec![];
        let mut slots = FxHashMap::default();
        f.version
            .add_iterators(&ReadOptions::default(), &f.table_cache, &mut children, &mut slots)
            .unwrap();
        RoutedMergeIterator::new(f.version.clone(), Arc::new(index), children, slots)
    }

    fn built_index(f: &Fixture) -> OrderedIndex<BytewiseComparator> {
        let mut index = OrderedIndex::new(BytewiseComparator::default(), 3).unwrap();
        f.version
            .rebuild_index(&ReadOptions::default(), &f.table_cache, &mut index)
            .unwrap();
        index
    }

    fn entry(iter: &dyn Iter) -> (String, u64, String) {
        let parsed = ParsedInternalKey::decode_from(iter.key()).unwrap();
        (
            String::from_utf8(parsed.user_key.to_vec()).unwrap(),
            parsed.seq,
            String::from_utf8(iter.value().to_vec()).unwrap(),
        )
    }

    fn expected() -> Vec<(String, u64, String)> {
        vec![
            ("a", 1, "a-old"),
            ("b", 20, "b-new"),
            ("c", 3, "c-old"),
            ("d", 21, ""),
            ("e", 22, "e-new"),
        ]
        .into_iter()
        .map(|(k, s, v)| (k.to_owned(), s, v.to_owned()))
        .collect()
    }

    #[test]
    fn test_rebuild_index_newer_run_wins() {
        let f = fixture();
        let index = built_index(&f);
        let tests = vec![("a", Some(1)), ("b", Some(5)), ("c", Some(1)), ("d", Some(5)), ("e", Some(5)), ("f", None)];
        for (key, expect) in tests {
            assert_eq!(index.search(key.as_bytes()).copied(), expect, "{}", key);
        }
        assert_eq!(index.len(), 5);
    }

    #[test]
    fn test_routed_forward_and_backward() {
        let f = fixture();
        let mut iter = routed(&f, built_index(&f));
        iter.seek_to_first();
        let mut forward = vec![];
        while iter.valid() {
            forward.push(entry(&iter));
            iter.next();
        }
        assert_eq!(forward, expected());

        iter.seek_to_last();
        assert_eq!(iter.direction(), Direction::Reverse);
        let mut backward = vec![];
        while iter.valid() {
            backward.push(entry(&iter));
            iter.prev();
        }
        let mut reversed = expected();
        reversed.reverse();
        assert_eq!(backward, reversed);
        assert!(iter.status().is_ok());
    }

    #[test]
    fn test_routed_seek_and_reverse() {
        let f = fixture();
        let mut iter = routed(&f, built_index(&f));
        iter.seek(&ikey("bb", MAX_KEY_SEQUENCE, ValueType::Value));
        assert_eq!(entry(&iter).0, "c");
        iter.prev();
        assert_eq!(entry(&iter), ("b".to_owned(), 20, "b-new".to_owned()));
        iter.next();
        assert_eq!(iter.direction(), Direction::Forward);
        assert_eq!(entry(&iter).0, "c");
        iter.next();
        assert_eq!(entry(&iter).0, "d");
        iter.seek_user_key(b"e");
        assert_eq!(entry(&iter).0, "e");
        iter.next();
        assert!(!iter.valid());
        // stepping an exhausted iterator keeps it invalid
        iter.prev();
        assert!(!iter.valid());
    }

    #[test]
    fn test_routed_skips_stale_origins() {
        let f = fixture();
        let mut index = built_index(&f);
        // origin 99 belongs to no run, "c" is routed to a run that lacks it
        index.insert(b"aa", 99);
        index.insert(b"c", 5);
        index.insert(b"zz", 99);
        let mut iter = routed(&f, index);
        iter.seek_to_first();
        let mut keys = vec![];
        while iter.valid() {
            keys.push(entry(&iter).0);
            iter.next();
        }
        assert_eq!(keys, vec!["a", "b", "d", "e"]);

        iter.seek_to_last();
        assert_eq!(entry(&iter).0, "e");
    }

    #[test]
    fn test_routed_empty_index() {
        let f = fixture();
        let index = OrderedIndex::new(BytewiseComparator::default(), 3).unwrap();
        let mut iter = routed(&f, index);
        iter.seek_to_first();
        assert!(!iter.valid());
        iter.seek_to_last();
        assert!(!iter.valid());
        iter.seek_user_key(b"a");
        assert!(!iter.valid());
        assert!(iter.status().is_ok());
    }

    #[test]
    fn test_routed_seek_long_user_keys() {
        use ValueType::Value;
        let cache = MemTableCache::new(BytewiseComparator::default());
        let mut run = Run::new(1, 0);
        run.insert_file(table(
            &cache,
            3,
            vec![
                (ikey("apple_01", 7, Value), "first"),
                (ikey("apple_09", 8, Value), "ninth"),
                (ikey("apple_10", 9, Value), "tenth"),
            ],
        ));
        run.insert_origin(3);
        let mut edit = VersionEdit::new();
        edit.add_snapshot_run(run);
        let base = Arc::new(Version::new(Arc::new(Options::<BytewiseComparator>::default()), 0));
        let mut builder = VersionBuilder::new(base.clone());
        builder.apply(&edit);
        let mut v = Version::new(base.options().clone(), 1);
        builder.save_to(&mut v);
        let f = Fixture {
            version: Arc::new(v),
            table_cache: Arc::new(cache),
        };
        let mut iter = routed(&f, built_index(&f));

        let tests = vec![
            ("apple_00", Some("apple_01")),
            ("apple_01", Some("apple_01")),
            ("apple_05", Some("apple_09")),
            ("apple_09", Some("apple_09")),
            ("apple_099", Some("apple_10")),
            ("apple_11", None),
        ];
        for (target, expect) in tests {
            iter.seek(&ikey(target, MAX_KEY_SEQUENCE, Value));
            let got = if iter.valid() { Some(entry(&iter).0) } else { None };
            assert_eq!(got.as_deref(), expect, "seek {}", target);
            iter.seek_user_key(target.as_bytes());
            let got = if iter.valid() { Some(entry(&iter).0) } else { None };
            assert_eq!(got.as_deref(), expect, "seek_user_key {}", target);
        }
        assert!(iter.status().is_ok());

        // a target without the sequence tail is rejected
        iter.seek(b"apple");
        assert!(!iter.valid());
        match iter.status() {
            Err(Error::InvalidArgument(_)) => {}
            other => panic!("expected invalid argument, got {:?}", other),
        }
    }
}
