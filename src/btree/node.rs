use bytes::Bytes;

/// Index of a node inside a `Slab`.
pub type NodeId = u32;

pub struct LeafNode<V> {
    pub keys: Vec<Bytes>,
    pub values: Vec<V>,
    pub prev: Option<NodeId>,
    pub next: Option<NodeId>,
}

impl<V> LeafNode<V> {
    pub fn empty() -> Self {
        LeafNode {
            keys: vec![],
            values: vec![],
            prev: None,
            next: None,
        }
    }
}

/// `keys[i]` separates `children[i]` and `children[i + 1]`: every key stored
/// under `children[i + 1]` is >= `keys[i]` and every key under `children[i]`
/// is < `keys[i]`.
pub struct InnerNode {
    pub keys: Vec<Bytes>,
    pub children: Vec<NodeId>,
}

pub enum Node<V> {
    Leaf(LeafNode<V>),
    Inner(InnerNode),
}

impl<V> Node<V> {
    /// Entries of a leaf, children of an inner node. This is the size the
    /// capacity bounds apply to.
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Node::Leaf(leaf) => leaf.keys.len(),
            Node::Inner(inner) => inner.children.len(),
        }
    }
}

/// Arena owning every node of a tree. Freed slots are recycled.
pub struct Slab<V> {
    slots: Vec<Option<Node<V>>>,
    free: Vec<NodeId>,
}

impl<V> Slab<V> {
    pub fn new() -> Self {
        Slab {
            slots: vec![],
            free: vec![],
        }
    }

    pub fn insert(&mut self, node: Node<V>) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.slots[id as usize] = Some(node);
                id
            }
            None => {
                self.slots.push(Some(node));
                (self.slots.len() - 1) as NodeId
            }
        }
    }

    pub fn free(&mut self, id: NodeId) -> Node<V> {
        match self.slots[id as usize].take() {
            Some(node) => {
                self.free.push(id);
                node
            }
            None => panic!("btree: double free of node {}", id),
        }
    }

    /// Number of live nodes.
    pub fn live(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> &Node<V> {
        match &self.slots[id as usize] {
            Some(node) => node,
            None => panic!("btree: dangling node {}", id),
        }
    }

    #[inline]
    pub fn get_mut(&mut self, id: NodeId) -> &mut Node<V> {
        match &mut self.slots[id as usize] {
            Some(node) => node,
            None => panic!("btree: dangling node {}", id),
        }
    }

    #[inline]
    pub fn leaf(&self, id: NodeId) -> &LeafNode<V> {
        match self.get(id) {
            Node::Leaf(leaf) => leaf,
            Node::Inner(_) => panic!("btree: node {} is not a leaf", id),
        }
    }

    #[inline]
    pub fn leaf_mut(&mut self, id: NodeId) -> &mut LeafNode<V> {
        match self.get_mut(id) {
            Node::Leaf(leaf) => leaf,
            Node::Inner(_) => panic!("btree: node {} is not a leaf", id),
        }
    }

    #[inline]
    pub fn inner(&self, id: NodeId) -> &InnerNode {
        match self.get(id) {
            Node::Inner(inner) => inner,
            Node::Leaf(_) => panic!("btree: node {} is not an inner node", id),
        }
    }

    #[inline]
    pub fn inner_mut(&mut self, id: NodeId) -> &mut InnerNode {
        match self.get_mut(id) {
            Node::Inner(inner) => inner,
            Node::Leaf(_) => panic!("btree: node {} is not an inner node", id),
        }
    }
}
