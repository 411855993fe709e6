use crate::iterator::{Direction, Iter};
use crate::util::comparator::Comparator;
use crate::IResult;
use std::cmp::Ordering;

/// Merges the output of several ordered children into one ordered stream.
///
/// Entries with equal keys in different children are all yielded, the one
/// from the child with the smaller index first. No deduplication is done.
pub struct MergingIterator<C: Comparator> {
    cmp: C,
    children: Vec<Box<dyn Iter>>,
    current: Option<usize>,
    direction: Direction,
}

impl<C: Comparator> MergingIterator<C> {
    pub fn new(cmp: C, children: Vec<Box<dyn Iter>>) -> Self {
        MergingIterator {
            cmp,
            children,
            current: None,
            direction: Direction::Forward,
        }
    }

    fn find_smallest(&mut self) {
        let mut smallest: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate() {
            if !child.valid() {
                continue;
            }
            match smallest {
                Some(s) if self.cmp.compare(child.key(), self.children[s].key()) != Ordering::Less => {}
                _ => smallest = Some(i),
            }
        }
        self.current = smallest;
    }

    fn find_largest(&mut self) {
        let mut largest: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate().rev() {
            if !child.valid() {
                continue;
            }
            match largest {
                Some(l) if self.cmp.compare(child.key(), self.children[l].key()) != Ordering::Greater => {}
                _ => largest = Some(i),
            }
        }
        self.current = largest;
    }

    /// Reposition every non-current child relative to `key` when the
    /// direction of iteration flips.
    fn switch_direction(&mut self, direction: Direction) {
        let current = match self.current {
            Some(c) => c,
            None => return,
        };
        let key = self.children[current].key().to_vec();
        for (i, child) in self.children.iter_mut().enumerate() {
            if i == current {
                continue;
            }
            child.seek(&key);
            match direction {
                Direction::Forward => {
                    // Children are positioned at or after `key`. Entries equal
                    // to `key` have already been yielded.
                    if child.valid() && self.cmp.compare(&key, child.key()) == Ordering::Equal {
                        child.next();
                    }
                }
                Direction::Reverse => {
                    // Children are positioned at the first entry >= `key`.
                    // Step back to get the last entry < `key`.
                    if child.valid() {
                        child.prev();
                    } else {
                        child.seek_to_last();
                    }
                }
            }
        }
        self.direction = direction;
    }
}

impl<C: Comparator> Iter for MergingIterator<C> {
    fn valid(&self) -> bool {
        self.current
            .map_or(false, |i| self.children[i].valid())
    }

    fn seek_to_first(&mut self) {
        for child in self.children.iter_mut() {
            child.seek_to_first();
        }
        self.find_smallest();
        self.direction = Direction::Forward;
    }

    fn seek_to_last(&mut self) {
        for child in self.children.iter_mut() {
            child.seek_to_last();
        }
        self.find_largest();
        self.direction = Direction::Reverse;
    }

    fn seek(&mut self, target: &[u8]) {
        for child in self.children.iter_mut() {
            child.seek(target);
        }
        self.find_smallest();
        self.direction = Direction::Forward;
    }

    fn next(&mut self) {
        if let Some(current) = self.current {
            if self.direction != Direction::Forward {
                self.switch_direction(Direction::Forward);
            }
            self.children[current].next();
            self.find_smallest();
        }
    }

    fn prev(&mut self) {
        if let Some(current) = self.current {
            if self.direction != Direction::Reverse {
                self.switch_direction(Direction::Reverse);
            }
            self.children[current].prev();
            self.find_largest();
        }
    }

    fn key(&self) -> &[u8] {
        match self.current {
            Some(i) => self.children[i].key(),
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match self.current {
            Some(i) => self.children[i].value(),
            None => &[],
        }
    }

    fn status(&mut self) -> IResult<()> {
        for child in self.children.iter_mut() {
            child.status()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table_cache::SortedTableIterator;
    use crate::util::comparator::BytewiseComparator;
    use std::sync::Arc;

    fn child(keys: &[&str]) -> Box<dyn Iter> {
        let entries: Vec<(Vec<u8>, Vec<u8>)> = keys
            .iter()
            .map(|k| (k.as_bytes().to_vec(), k.to_uppercase().into_bytes()))
            .collect();
        Box::new(SortedTableIterator::new(BytewiseComparator::default(), Arc::new(entries)))
    }

    fn merged() -> MergingIterator<BytewiseComparator> {
        MergingIterator::new(
            BytewiseComparator::default(),
            vec![child(&["a", "d", "g"]), child(&[]), child(&["b", "e"]), child(&["c", "f", "h"])],
        )
    }

    fn collect_forward(iter: &mut dyn Iter) -> Vec<String> {
        let mut res = vec![];
        while iter.valid() {
            res.push(String::from_utf8(iter.key().to_vec()).unwrap());
            iter.next();
        }
        res
    }

    #[test]
    fn test_merging_forward_backward() {
        let mut iter = merged();
        iter.seek_to_first();
        assert_eq!(collect_forward(&mut iter), vec!["a", "b", "c", "d", "e", "f", "g", "h"]);

        iter.seek_to_last();
        let mut backward = vec![];
        while iter.valid() {
            backward.push(String::from_utf8(iter.key().to_vec()).unwrap());
            iter.prev();
        }
        assert_eq!(backward, vec!["h", "g", "f", "e", "d", "c", "b", "a"]);
        assert!(iter.status().is_ok());
    }

    #[test]
    fn test_merging_seek_and_switch_direction() {
        let mut iter = merged();
        iter.seek(b"cc");
        assert_eq!(iter.key(), b"d");
        assert_eq!(iter.value(), b"D");
        iter.prev();
        assert_eq!(iter.key(), b"c");
        iter.prev();
        assert_eq!(iter.key(), b"b");
        iter.next();
        assert_eq!(iter.key(), b"c");
        iter.next();
        assert_eq!(iter.key(), b"d");
        iter.seek(b"z");
        assert!(!iter.valid());
    }

    #[test]
    fn test_merging_duplicates_keep_child_order() {
        let mut iter = MergingIterator::new(
            BytewiseComparator::default(),
            vec![child(&["a", "b"]), child(&["b", "c"])],
        );
        iter.seek_to_first();
        assert_eq!(collect_forward(&mut iter), vec!["a", "b", "b", "c"]);
    }
}
