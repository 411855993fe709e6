use crate::btree::OrderedIndex;
use crate::db::format::LookupKey;
use crate::db::routed_iterator::RoutedMergeIterator;
use crate::opt::{Options, ReadOptions};
use crate::table_cache::TableCache;
use crate::util::comparator::Comparator;
use crate::version::{ValueLookup, Version};
use crate::{Error, IResult};
use crossbeam_utils::sync::ShardedLock;
use fxhash::FxHashMap;
use log::debug;
use std::sync::{Arc, PoisonError};

/// Routes user keys to the run owning them.
///
/// The index is rebuilt from a whole version and then published, so a
/// reader holding the previous index keeps a consistent view while a
/// rebuild is in progress.
pub struct KeyRouter<C: Comparator> {
    comparator: C,
    node_capacity: usize,
    index: ShardedLock<Arc<OrderedIndex<C>>>,
}

impl<C: Comparator> KeyRouter<C> {
    pub fn new(options: &Options<C>) -> IResult<Self> {
        let index = OrderedIndex::new(options.comparator.clone(), options.index_node_capacity)?;
        Ok(KeyRouter {
            comparator: options.comparator.clone(),
            node_capacity: options.index_node_capacity,
            index: ShardedLock::new(Arc::new(index)),
        })
    }

    /// Returns the published index.
    pub fn index(&self) -> Arc<OrderedIndex<C>> {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Build a fresh index over `version` and publish it.
    pub fn rebuild(
        &self,
        version: &Version<C>,
        table_cache: &Arc<dyn TableCache>,
        options: &ReadOptions,
    ) -> IResult<()> {
        let mut index = OrderedIndex::new(self.comparator.clone(), self.node_capacity)?;
        version.rebuild_index(options, table_cache, &mut index)?;
        debug!(
            "Rebuilt routing index for version #{}: {} keys, height {}",
            version.vnum(),
            index.len(),
            index.height()
        );
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(index);
        Ok(())
    }

    /// Returns the origin id `user_key` is routed to.
    pub fn route(&self, user_key: &[u8]) -> Option<u64> {
        self.index().search(user_key).copied()
    }

    /// Look up `key` in the run it is routed to. A deleted key is reported
    /// as `Error::NotFound` like a missing one.
    pub fn get(
        &self,
        version: &Version<C>,
        key: &LookupKey,
        table_cache: &Arc<dyn TableCache>,
        options: &ReadOptions,
    ) -> IResult<Vec<u8>> {
        let origin = self.route(key.user_key()).ok_or(Error::NotFound)?;
        let (value, stats) = version.get(options, key, Some(origin), table_cache)?;
        version.update_stats(stats);
        match value {
            ValueLookup::Found(v) => Ok(v),
            ValueLookup::Deleted | ValueLookup::NotFound => Err(Error::NotFound),
        }
    }

    /// Returns an iterator yielding the newest entry of every routed key in
    /// `version`.
    pub fn new_iter(
        &self,
        version: Arc<Version<C>>,
        table_cache: &Arc<dyn TableCache>,
        options: &ReadOptions,
    ) -> IResult<RoutedMergeIterator<C>> {
        let mut children = vec![];
        let mut slots = FxHashMap::default();
        version.add_iterators(options, table_cache, &mut children, &mut slots)?;
        Ok(RoutedMergeIterator::new(version, self.index(), children, slots))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::routed_iterator::tests::fixture;
    use crate::iterator::Iter;
    use crate::util::comparator::BytewiseComparator;

    #[test]
    fn test_router_get() {
        let f = fixture();
        let router = KeyRouter::new(&Options::<BytewiseComparator>::default()).unwrap();
        let opts = ReadOptions::default();
        // nothing is routed before the first rebuild
        assert!(router
            .get(&f.version, &LookupKey::new(b"a", 100), &f.table_cache, &opts)
            .unwrap_err()
            .is_not_found());

        router.rebuild(&f.version, &f.table_cache, &opts).unwrap();
        let tests: Vec<(&str, u64, Option<&str>)> = vec![
            ("a", 100, Some("a-old")),
            ("b", 100, Some("b-new")),
            ("b", 10, Some("b-older")),
            ("b", 1, None),
            ("c", 100, Some("c-old")),
            // deleted at level 0 even though level 1 still holds a value
            ("d", 100, None),
            ("e", 100, Some("e-new")),
            ("x", 100, None),
        ];
        for (key, seq, expect) in tests {
            let res = router.get(&f.version, &LookupKey::new(key.as_bytes(), seq), &f.table_cache, &opts);
            match expect {
                Some(v) => assert_eq!(res.unwrap(), v.as_bytes(), "{}@{}", key, seq),
                None => assert!(res.unwrap_err().is_not_found(), "{}@{}", key, seq),
            }
        }
        assert_eq!(router.route(b"b"), Some(5));
        assert_eq!(router.route(b"c"), Some(1));
    }

    #[test]
    fn test_router_rebuild_publishes_new_index() {
        let f = fixture();
        let router = KeyRouter::new(&Options::<BytewiseComparator>::default()).unwrap();
        let before = router.index();
        router
            .rebuild(&f.version, &f.table_cache, &ReadOptions::default())
            .unwrap();
        // readers of the old index are unaffected
        assert!(before.is_empty());
        assert_eq!(router.index().len(), 5);

        let mut iter = router
            .new_iter(f.version.clone(), &f.table_cache, &ReadOptions::default())
            .unwrap();
        iter.seek_to_first();
        let mut count = 0;
        while iter.valid() {
            count += 1;
            iter.next();
        }
        assert_eq!(count, 5);
    }

    #[test]
    fn test_seek_charging() {
        let f = fixture();
        let router = KeyRouter::new(&Options::<BytewiseComparator>::default()).unwrap();
        let opts = ReadOptions::default();
        router.rebuild(&f.version, &f.table_cache, &opts).unwrap();
        let file = f.version.runs(0)[0].files()[0].clone();
        let seeks = || file.allowed_seeks.load(std::sync::atomic::Ordering::Acquire);
        let before = seeks();
        // "b" at sequence 1 predates every entry of the run it is routed to,
        // but a routed lookup reads a single file and is never charged
        assert!(router
            .get(&f.version, &LookupKey::new(b"b", 1), &f.table_cache, &opts)
            .unwrap_err()
            .is_not_found());
        assert_eq!(seeks(), before);

        // without a route "c" misses level 0 before level 1 answers
        let (value, stats) = f
            .version
            .get(&opts, &LookupKey::new(b"c", 100), None, &f.table_cache)
            .unwrap();
        assert_eq!(value, ValueLookup::Found(b"c-old".to_vec()));
        assert!(!f.version.update_stats(stats));
        assert_eq!(seeks(), before - 1);
    }
}
