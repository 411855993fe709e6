//! An in-memory B+ tree keyed by byte strings.
//!
//! Every entry lives in a leaf. Leaves are chained in both directions so a
//! cursor can step either way without going back through the inner nodes.
//!
//! ```text
//!                     +---------+
//!                     | d  |  h |                 inner node
//!                     +---------+
//!                    /     |     \
//!          +-------+   +-------+   +-------+
//!          | a b c |<->| d f g |<->| h k   |      leaves
//!          +-------+   +-------+   +-------+
//! ```
//!
//! A node holds at most `capacity` entries (leaves) or children (inner
//! nodes) and, unless it is the root, at least `(capacity + 1) / 2`.

mod cursor;
mod node;

pub use cursor::{Cursor, Entries};

use crate::util::comparator::Comparator;
use crate::{Error, IResult};
use bytes::Bytes;
use node::{InnerNode, LeafNode, Node, NodeId, Slab};
use std::cmp::Ordering;

/// The routing index: user key to the origin id of the run owning it.
pub type OrderedIndex<C> = BPlusTree<u64, C>;

pub struct BPlusTree<V, C: Comparator> {
    cmp: C,
    capacity: usize,
    nodes: Slab<V>,
    root: NodeId,
    first_leaf: NodeId,
    last_leaf: NodeId,
    len: usize,
    height: usize,
}

impl<V, C: Comparator> BPlusTree<V, C> {
    pub const MIN_CAPACITY: usize = 3;

    pub fn new(cmp: C, capacity: usize) -> IResult<Self> {
        if capacity < Self::MIN_CAPACITY {
            return Err(Error::InvalidArgument(format!(
                "b+ tree capacity must be at least {} but got {}",
                Self::MIN_CAPACITY,
                capacity
            )));
        }
        let mut nodes = Slab::new();
        let root = nodes.insert(Node::Leaf(LeafNode::empty()));
        Ok(BPlusTree {
            cmp,
            capacity,
            nodes,
            root,
            first_leaf: root,
            last_leaf: root,
            len: 0,
            height: 1,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of node levels, 1 for a tree that is a single leaf.
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn comparator(&self) -> &C {
        &self.cmp
    }

    #[inline]
    fn min_len(&self) -> usize {
        (self.capacity + 1) / 2
    }

    /// Index of the child of `inner` whose range covers `key`.
    #[inline]
    fn child_index(&self, inner: &InnerNode, key: &[u8]) -> usize {
        inner
            .keys
            .partition_point(|k| self.cmp.compare(k, key) != Ordering::Greater)
    }

    /// Position of the first key >= `key` in `leaf`, and whether it is equal.
    #[inline]
    fn leaf_position(&self, leaf: &LeafNode<V>, key: &[u8]) -> (usize, bool) {
        let pos = leaf
            .keys
            .partition_point(|k| self.cmp.compare(k, key) == Ordering::Less);
        let found = pos < leaf.keys.len() && self.cmp.compare(&leaf.keys[pos], key) == Ordering::Equal;
        (pos, found)
    }

    /// Returns the leaf whose range covers `key`.
    fn find_leaf(&self, key: &[u8]) -> NodeId {
        let mut id = self.root;
        loop {
            match self.nodes.get(id) {
                Node::Leaf(_) => return id,
                Node::Inner(inner) => id = inner.children[self.child_index(inner, key)],
            }
        }
    }

    pub fn search(&self, key: &[u8]) -> Option<&V> {
        let leaf = self.nodes.leaf(self.find_leaf(key));
        match self.leaf_position(leaf, key) {
            (pos, true) => Some(&leaf.values[pos]),
            _ => None,
        }
    }

    #[inline]
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.search(key).is_some()
    }

    /// Insert `key` or update its value in place. Returns the previous value.
    pub fn insert(&mut self, key: &[u8], value: V) -> Option<V> {
        let (old, split) = self.insert_into(self.root, key, value);
        if let Some((separator, right)) = split {
            let root = Node::Inner(InnerNode {
                keys: vec![separator],
                children: vec![self.root, right],
            });
            self.root = self.nodes.insert(root);
            self.height += 1;
        }
        if old.is_none() {
            self.len += 1;
        }
        old
    }

    /// Returns the previous value and, if `id` was split, the separator key
    /// and the new right sibling.
    fn insert_into(&mut self, id: NodeId, key: &[u8], value: V) -> (Option<V>, Option<(Bytes, NodeId)>) {
        let child = match self.nodes.get(id) {
            Node::Inner(inner) => {
                let idx = self.child_index(inner, key);
                Some((idx, inner.children[idx]))
            }
            Node::Leaf(_) => None,
        };

        match child {
            None => {
                let (pos, found) = self.leaf_position(self.nodes.leaf(id), key);
                let leaf = self.nodes.leaf_mut(id);
                if found {
                    return (Some(std::mem::replace(&mut leaf.values[pos], value)), None);
                }
                leaf.keys.insert(pos, Bytes::copy_from_slice(key));
                leaf.values.insert(pos, value);
                if leaf.keys.len() > self.capacity {
                    return (None, Some(self.split_leaf(id)));
                }
                (None, None)
            }
            Some((idx, child)) => {
                let (old, split) = self.insert_into(child, key, value);
                if let Some((separator, right)) = split {
                    let inner = self.nodes.inner_mut(id);
                    inner.keys.insert(idx, separator);
                    inner.children.insert(idx + 1, right);
                    if inner.children.len() > self.capacity {
                        return (old, Some(self.split_inner(id)));
                    }
                }
                (old, None)
            }
        }
    }

    fn split_leaf(&mut self, id: NodeId) -> (Bytes, NodeId) {
        let leaf = self.nodes.leaf_mut(id);
        let mid = (leaf.keys.len() + 1) / 2;
        let keys = leaf.keys.split_off(mid);
        let values = leaf.values.split_off(mid);
        let old_next = leaf.next;
        let separator = keys[0].clone();
        let right = self.nodes.insert(Node::Leaf(LeafNode {
            keys,
            values,
            prev: Some(id),
            next: old_next,
        }));
        self.nodes.leaf_mut(id).next = Some(right);
        match old_next {
            Some(next) => self.nodes.leaf_mut(next).prev = Some(right),
            None => self.last_leaf = right,
        }
        (separator, right)
    }

    fn split_inner(&mut self, id: NodeId) -> (Bytes, NodeId) {
        let inner = self.nodes.inner_mut(id);
        let mid = (inner.children.len() + 1) / 2;
        let children = inner.children.split_off(mid);
        let mut keys = inner.keys.split_off(mid - 1);
        // The median moves up instead of staying in either half.
        let separator = keys.remove(0);
        let right = self.nodes.insert(Node::Inner(InnerNode { keys, children }));
        (separator, right)
    }

    /// Remove `key` from the tree, returning its value if it was present.
    pub fn remove(&mut self, key: &[u8]) -> Option<V> {
        let removed = self.remove_from(self.root, key);
        if removed.is_some() {
            self.len -= 1;
        }
        // Collapse a root left with a single child.
        loop {
            let only_child = match self.nodes.get(self.root) {
                Node::Inner(inner) if inner.children.len() == 1 => inner.children[0],
                _ => break,
            };
            self.nodes.free(self.root);
            self.root = only_child;
            self.height -= 1;
        }
        removed
    }

    fn remove_from(&mut self, id: NodeId, key: &[u8]) -> Option<V> {
        let child = match self.nodes.get(id) {
            Node::Inner(inner) => {
                let idx = self.child_index(inner, key);
                Some((idx, inner.children[idx]))
            }
            Node::Leaf(_) => None,
        };
        match child {
            None => {
                let (pos, found) = self.leaf_position(self.nodes.leaf(id), key);
                if !found {
                    return None;
                }
                let leaf = self.nodes.leaf_mut(id);
                leaf.keys.remove(pos);
                Some(leaf.values.remove(pos))
            }
            Some((idx, child)) => {
                let removed = self.remove_from(child, key);
                if removed.is_some() && self.nodes.get(child).len() < self.min_len() {
                    self.rebalance(id, idx);
                }
                removed
            }
        }
    }

    /// Fix the underflowing child `idx` of `parent` by borrowing from a
    /// sibling above the floor, the left one first, or else by merging with
    /// a sibling.
    fn rebalance(&mut self, parent: NodeId, idx: usize) {
        let min = self.min_len();
        let (left, right) = {
            let inner = self.nodes.inner(parent);
            let left = if idx > 0 {
                Some(inner.children[idx - 1])
            } else {
                None
            };
            (left, inner.children.get(idx + 1).copied())
        };
        match (left, right) {
            (Some(l), _) if self.nodes.get(l).len() > min => self.borrow_from_left(parent, idx),
            (_, Some(r)) if self.nodes.get(r).len() > min => self.borrow_from_right(parent, idx),
            (Some(_), _) => self.merge_children(parent, idx - 1),
            (None, Some(_)) => self.merge_children(parent, idx),
            // A lone child can only happen under the root, which is
            // collapsed by `remove`.
            (None, None) => {}
        }
    }

    fn borrow_from_left(&mut self, parent: NodeId, idx: usize) {
        let (left, child) = {
            let inner = self.nodes.inner(parent);
            (inner.children[idx - 1], inner.children[idx])
        };
        match self.nodes.get_mut(left) {
            Node::Leaf(l) => {
                let last = l.keys.len() - 1;
                let (k, v) = (l.keys.remove(last), l.values.remove(last));
                let c = self.nodes.leaf_mut(child);
                c.keys.insert(0, k.clone());
                c.values.insert(0, v);
                self.nodes.inner_mut(parent).keys[idx - 1] = k;
            }
            Node::Inner(l) => {
                let last = l.keys.len() - 1;
                let k = l.keys.remove(last);
                let moved = l.children.remove(last + 1);
                let separator = std::mem::replace(&mut self.nodes.inner_mut(parent).keys[idx - 1], k);
                let c = self.nodes.inner_mut(child);
                c.keys.insert(0, separator);
                c.children.insert(0, moved);
            }
        }
    }

    fn borrow_from_right(&mut self, parent: NodeId, idx: usize) {
        let (child, right) = {
            let inner = self.nodes.inner(parent);
            (inner.children[idx], inner.children[idx + 1])
        };
        match self.nodes.get_mut(right) {
            Node::Leaf(r) => {
                let (k, v) = (r.keys.remove(0), r.values.remove(0));
                let new_first = r.keys[0].clone();
                let c = self.nodes.leaf_mut(child);
                c.keys.push(k);
                c.values.push(v);
                self.nodes.inner_mut(parent).keys[idx] = new_first;
            }
            Node::Inner(r) => {
                let k = r.keys.remove(0);
                let moved = r.children.remove(0);
                let separator = std::mem::replace(&mut self.nodes.inner_mut(parent).keys[idx], k);
                let c = self.nodes.inner_mut(child);
                c.keys.push(separator);
                c.children.push(moved);
            }
        }
    }

    /// Merge child `idx + 1` of `parent` into child `idx`. The separator
    /// between them disappears from `parent`.
    fn merge_children(&mut self, parent: NodeId, idx: usize) {
        let (left, right, separator) = {
            let inner = self.nodes.inner_mut(parent);
            let right = inner.children.remove(idx + 1);
            let separator = inner.keys.remove(idx);
            (inner.children[idx], right, separator)
        };
        match self.nodes.free(right) {
            Node::Leaf(r) => {
                let l = self.nodes.leaf_mut(left);
                l.keys.extend(r.keys);
                l.values.extend(r.values);
                l.next = r.next;
                match r.next {
                    Some(next) => self.nodes.leaf_mut(next).prev = Some(left),
                    None => self.last_leaf = left,
                }
            }
            Node::Inner(r) => {
                let l = self.nodes.inner_mut(left);
                l.keys.push(separator);
                l.keys.extend(r.keys);
                l.children.extend(r.children);
            }
        }
    }

    /// Iterate all entries in key order.
    pub fn iter(&self) -> Entries<'_, V, C> {
        Entries::new(self)
    }
}

#[cfg(test)]
impl<V, C: Comparator> BPlusTree<V, C> {
    /// Check every structural invariant, panicking on the first violation.
    pub(crate) fn validate(&self) {
        let mut leaves = vec![];
        let depth = self.validate_node(self.root, None, None, true, &mut leaves);
        assert_eq!(depth, self.height, "height mismatch");
        assert_eq!(leaves.first().copied(), Some(self.first_leaf));
        assert_eq!(leaves.last().copied(), Some(self.last_leaf));
        let mut total = 0;
        for (i, id) in leaves.iter().enumerate() {
            let leaf = self.nodes.leaf(*id);
            total += leaf.keys.len();
            assert_eq!(leaf.prev, if i == 0 { None } else { Some(leaves[i - 1]) });
            assert_eq!(leaf.next, leaves.get(i + 1).copied());
        }
        assert_eq!(total, self.len, "len mismatch");
        let keys: Vec<&[u8]> = self.iter().map(|(k, _)| k).collect();
        for w in keys.windows(2) {
            assert_eq!(self.cmp.compare(w[0], w[1]), Ordering::Less, "keys out of order");
        }
    }

    fn validate_node(
        &self,
        id: NodeId,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        is_root: bool,
        leaves: &mut Vec<NodeId>,
    ) -> usize {
        let node = self.nodes.get(id);
        assert!(node.len() <= self.capacity, "node {} over capacity", id);
        if !is_root {
            assert!(node.len() >= self.min_len(), "node {} under the floor", id);
        }
        let in_range = |k: &[u8]| {
            lower.map_or(true, |l| self.cmp.compare(k, l) != Ordering::Less)
                && upper.map_or(true, |u| self.cmp.compare(k, u) == Ordering::Less)
        };
        match node {
            Node::Leaf(leaf) => {
                assert_eq!(leaf.keys.len(), leaf.values.len());
                assert!(leaf.keys.iter().all(|k| in_range(&k[..])), "leaf {} key out of range", id);
                leaves.push(id);
                1
            }
            Node::Inner(inner) => {
                assert_eq!(inner.keys.len() + 1, inner.children.len());
                assert!(inner.children.len() >= 2, "inner node {} has one child", id);
                let mut depth = None;
                for (i, child) in inner.children.iter().enumerate() {
                    let lo = if i == 0 { lower } else { Some(&inner.keys[i - 1][..]) };
                    let hi = if i == inner.keys.len() { upper } else { Some(&inner.keys[i][..]) };
                    let d = self.validate_node(*child, lo, hi, false, leaves);
                    assert!(depth.map_or(true, |x| x == d), "unbalanced at {}", id);
                    depth = Some(d);
                }
                depth.unwrap_or(0) + 1
            }
        }
    }

    pub(crate) fn live_nodes(&self) -> usize {
        self.nodes.live()
    }
}
