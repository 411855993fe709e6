use super::node::NodeId;
use super::BPlusTree;
use crate::util::comparator::Comparator;
use std::cmp::Ordering;
use std::sync::Arc;

/// A bidirectional cursor over a shared tree.
///
/// The cursor holds its own reference to the tree so it can outlive the
/// handle it was created from. A tree published behind an `Arc` is never
/// mutated, so the cursor position stays meaningful.
pub struct Cursor<V, C: Comparator> {
    tree: Arc<BPlusTree<V, C>>,
    // `None` means the cursor is not valid.
    leaf: Option<NodeId>,
    pos: usize,
}

impl<V, C: Comparator> Cursor<V, C> {
    pub fn new(tree: Arc<BPlusTree<V, C>>) -> Self {
        Cursor {
            tree,
            leaf: None,
            pos: 0,
        }
    }

    #[inline]
    pub fn valid(&self) -> bool {
        self.leaf.is_some()
    }

    pub fn seek_to_first(&mut self) {
        self.pos = 0;
        self.leaf = if self.tree.is_empty() {
            None
        } else {
            Some(self.tree.first_leaf)
        };
    }

    pub fn seek_to_last(&mut self) {
        if self.tree.is_empty() {
            self.leaf = None;
            return;
        }
        let last = self.tree.last_leaf;
        self.pos = self.tree.nodes.leaf(last).keys.len() - 1;
        self.leaf = Some(last);
    }

    /// Position at the first entry whose key is at or past `target`.
    pub fn seek(&mut self, target: &[u8]) {
        let id = self.tree.find_leaf(target);
        let leaf = self.tree.nodes.leaf(id);
        let (pos, _) = self.tree.leaf_position(leaf, target);
        if pos < leaf.keys.len() {
            self.leaf = Some(id);
            self.pos = pos;
        } else {
            // Every key of this leaf is smaller, the answer starts the next one.
            self.leaf = leaf.next;
            self.pos = 0;
        }
    }

    /// Position at the last entry whose key is at or before `target`.
    pub fn seek_for_prev(&mut self, target: &[u8]) {
        self.seek(target);
        if !self.valid() {
            self.seek_to_last();
        } else if self.tree.cmp.compare(self.key(), target) == Ordering::Greater {
            self.prev();
        }
    }

    pub fn next(&mut self) {
        if let Some(id) = self.leaf {
            let leaf = self.tree.nodes.leaf(id);
            if self.pos + 1 < leaf.keys.len() {
                self.pos += 1;
            } else {
                self.leaf = leaf.next;
                self.pos = 0;
            }
        }
    }

    pub fn prev(&mut self) {
        if let Some(id) = self.leaf {
            if self.pos > 0 {
                self.pos -= 1;
                return;
            }
            self.leaf = self.tree.nodes.leaf(id).prev;
            if let Some(prev) = self.leaf {
                self.pos = self.tree.nodes.leaf(prev).keys.len() - 1;
            }
        }
    }

    /// The key at the cursor. Empty when the cursor is not valid.
    pub fn key(&self) -> &[u8] {
        match self.leaf {
            Some(id) => &self.tree.nodes.leaf(id).keys[self.pos][..],
            None => &[],
        }
    }

    pub fn value(&self) -> Option<&V> {
        self.leaf
            .map(|id| &self.tree.nodes.leaf(id).values[self.pos])
    }

    pub fn tree(&self) -> &Arc<BPlusTree<V, C>> {
        &self.tree
    }
}

/// Forward iterator over the entries of a borrowed tree.
pub struct Entries<'a, V, C: Comparator> {
    tree: &'a BPlusTree<V, C>,
    leaf: Option<NodeId>,
    pos: usize,
}

impl<'a, V, C: Comparator> Entries<'a, V, C> {
    pub(super) fn new(tree: &'a BPlusTree<V, C>) -> Self {
        Entries {
            tree,
            leaf: if tree.is_empty() {
                None
            } else {
                Some(tree.first_leaf)
            },
            pos: 0,
        }
    }
}

impl<'a, V, C: Comparator> Iterator for Entries<'a, V, C> {
    type Item = (&'a [u8], &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let tree: &'a BPlusTree<V, C> = self.tree;
        let leaf = tree.nodes.leaf(self.leaf?);
        let item = (&leaf.keys[self.pos][..], &leaf.values[self.pos]);
        if self.pos + 1 < leaf.keys.len() {
            self.pos += 1;
        } else {
            self.leaf = leaf.next;
            self.pos = 0;
        }
        Some(item)
    }
}
