//! The PATRICIA trie core.
//!
//! A PATRICIA trie stores data in every node instead of keeping empty
//! internal nodes. Each node branches on a single bit, and a child slot
//! either descends to a deeper branch (a downlink, strictly larger bit
//! index) or points back up at a data-bearing ancestor (an uplink, smaller
//! or equal bit index). Every operation is O(B) bit comparisons where B is
//! the bit length of the largest stored key.
//!
//! The link invariants are:
//! - every non-root node has a key; only the root (bit index `-1`) may be
//!   empty,
//! - bit indices strictly increase along downlinks,
//! - at most one child slot of a node is an uplink,
//! - `child.predecessor` names the node whose uplink slot points at
//!   `child`, and `child.parent` the node whose downlink reaches it,
//! - the in-order walk over uplink targets yields keys in strictly
//!   increasing analyzer order.

use std::cmp::Ordering;
use std::fmt;

use crate::analyzer::{is_valid_bit_index, KeyAnalyzer, EQUAL_BIT_KEY, NULL_BIT_KEY};
use crate::node::{Arena, NodeId};
use crate::{Decision, Error, Selection};

/// A sorted map over bit-addressable keys.
///
/// Ordering, bit access and prefix tests are delegated to the key
/// analyzer `A`. Entries iterate in the analyzer's key order.
///
/// ```
/// use patricia_map::StringPatriciaMap;
///
/// let mut map = StringPatriciaMap::default();
/// map.insert("hello".to_string(), 1);
/// map.insert("world".to_string(), 2);
///
/// assert_eq!(map.get(&"hello".to_string()), Some(&1));
/// assert_eq!(map.first_key(), Some(&"hello".to_string()));
/// ```
#[derive(Clone)]
pub struct PatriciaMap<K, V, A> {
    pub(crate) arena: Arena<K, V>,
    pub(crate) analyzer: A,
    pub(crate) size: usize,
    /// Bumped on every structural or value-replacing operation; walkers and
    /// cached view bounds compare against it.
    pub(crate) mod_count: u64,
}

impl<K, V, A: KeyAnalyzer<K>> PatriciaMap<K, V, A> {
    /// An empty trie using `analyzer` for all key-level operations.
    pub fn new(analyzer: A) -> Self {
        PatriciaMap {
            arena: Arena::new(),
            analyzer,
            size: 0,
            mod_count: 0,
        }
    }

    /// The key analyzer, which doubles as the map's comparator.
    pub fn analyzer(&self) -> &A {
        &self.analyzer
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Removes all entries. The root node is reset in place, not
    /// reallocated.
    pub fn clear(&mut self) {
        self.arena.clear();
        self.size = 0;
        self.mod_count += 1;
    }

    // =========================================================================
    // Insert
    // =========================================================================

    /// Inserts a key/value pair, returning the previous value if the key
    /// was already present. The stored key is replaced as well: keys that
    /// compare equal under the analyzer may still be distinct values (for
    /// example zero-padded twins), and the last one put wins.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let length = self.length_in_bits(&key);

        // The only place to store a zero-length key is the root.
        if length == 0 {
            return self.store_at_root(key, value);
        }

        let found = self.nearest_entry(&key, length);
        if self.node_key_equals(&key, found) {
            self.mod_count += 1;
            return self.arena[found].set_key_value(key, value);
        }

        let bit = self.bit_index_vs_node(&key, found);
        if is_valid_bit_index(bit) {
            let to_add = self.arena.alloc(key, value, bit);
            self.add_entry(to_add, length);
            self.size += 1;
            self.mod_count += 1;
            None
        } else if bit == NULL_BIT_KEY {
            // All bits of the key are zero; it shares the root with the
            // zero-length key.
            self.store_at_root(key, value)
        } else if bit == EQUAL_BIT_KEY && found != NodeId::ROOT {
            // Bit-identical to the stored key under zero extension.
            self.mod_count += 1;
            self.arena[found].set_key_value(key, value)
        } else {
            unreachable!("insert fell through: bit index {bit}");
        }
    }

    fn store_at_root(&mut self, key: K, value: V) -> Option<V> {
        if self.arena[NodeId::ROOT].is_empty() {
            self.size += 1;
        }
        self.mod_count += 1;
        self.arena[NodeId::ROOT].set_key_value(key, value)
    }

    /// Splices `to_add` into the walk position determined by its bit index:
    /// the first point where the current node's bit index is no smaller
    /// than the new one, or where the next step would cross an uplink.
    fn add_entry(&mut self, to_add: NodeId, length_in_bits: i32) {
        let to_add_bit = self.arena[to_add].bit_index;
        let mut path = NodeId::ROOT;
        let mut current = self.arena[NodeId::ROOT].left;
        loop {
            let current_bit = self.arena[current].bit_index;
            let path_bit = self.arena[path].bit_index;
            if current_bit >= to_add_bit || current_bit <= path_bit {
                if self.node_bit(to_add, to_add_bit, length_in_bits) {
                    self.arena[to_add].left = current;
                    self.arena[to_add].right = to_add;
                } else {
                    self.arena[to_add].left = to_add;
                    self.arena[to_add].right = current;
                }

                self.arena[to_add].parent = path;
                if current_bit >= to_add_bit {
                    self.arena[current].parent = to_add;
                }

                // The displaced link was an uplink; its source is now the
                // new node.
                if current_bit <= path_bit {
                    self.arena[current].predecessor = to_add;
                }

                if path == NodeId::ROOT || !self.node_bit(to_add, path_bit, length_in_bits) {
                    self.arena[path].left = to_add;
                } else {
                    self.arena[path].right = to_add;
                }
                return;
            }

            path = current;
            current = if self.node_bit(to_add, current_bit, length_in_bits) {
                self.arena[current].right
            } else {
                self.arena[current].left
            };
        }
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Descends by the key's bits until the next step would cross an
    /// uplink, and returns the landing node. The key is present iff the
    /// landing node holds an equal key; callers that insert use the landing
    /// key to compute the differing bit.
    fn nearest_entry(&self, key: &K, length_in_bits: i32) -> NodeId {
        let mut path = NodeId::ROOT;
        let mut current = self.arena[NodeId::ROOT].left;
        loop {
            if self.arena[current].bit_index <= self.arena[path].bit_index {
                return current;
            }
            path = current;
            current = if self.query_bit(key, self.arena[current].bit_index, length_in_bits) {
                self.arena[current].right
            } else {
                self.arena[current].left
            };
        }
    }

    pub(crate) fn find_node(&self, key: &K) -> Option<NodeId> {
        let length = self.length_in_bits(key);
        let entry = self.nearest_entry(key, length);
        if self.node_key_equals(key, entry) {
            Some(entry)
        } else {
            None
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.find_node(key).map(|id| self.entry(id).1)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.find_node(key).is_some()
    }

    /// Linear scan over the values.
    pub fn contains_value(&self, value: &V) -> bool
    where
        V: PartialEq,
    {
        self.values().any(|v| v == value)
    }

    // =========================================================================
    // Remove
    // =========================================================================

    /// Removes a key, returning its value if it was present.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let id = self.find_node(key)?;
        Some(self.remove_entry(id).1)
    }

    /// Unlinks the entry at `id` and returns its detached payload.
    pub(crate) fn remove_entry(&mut self, id: NodeId) -> (K, V) {
        if id != NodeId::ROOT {
            if self.is_internal(id) {
                self.remove_internal(id);
            } else {
                self.remove_external(id);
            }
        }

        self.size -= 1;
        self.mod_count += 1;

        let node = &mut self.arena[id];
        let key = node.key.take().expect("removed entry has a key");
        let value = node.value.take().expect("removed entry has a value");
        if id != NodeId::ROOT {
            self.arena.release(id);
        }
        (key, value)
    }

    /// External removal: one of `h`'s child slots loops back to `h`, so the
    /// other child simply takes `h`'s place under its parent.
    fn remove_external(&mut self, h: NodeId) {
        debug_assert!(h != NodeId::ROOT, "cannot remove the root node");
        debug_assert!(!self.is_internal(h), "{h:?} is not an external node");

        let parent = self.arena[h].parent;
        let child = if self.arena[h].left == h {
            self.arena[h].right
        } else {
            self.arena[h].left
        };

        if self.arena[parent].left == h {
            self.arena[parent].left = child;
        } else {
            self.arena[parent].right = child;
        }

        // Either the parent changes (downlink) or the uplink source moves
        // up to the parent.
        if self.arena[child].bit_index > self.arena[parent].bit_index {
            self.arena[child].parent = parent;
        } else {
            self.arena[child].predecessor = parent;
        }
    }

    /// Internal removal: both of `h`'s children are downlinks, so `h`'s
    /// predecessor `p` (the node whose uplink names `h`) is promoted into
    /// `h`'s position.
    fn remove_internal(&mut self, h: NodeId) {
        debug_assert!(h != NodeId::ROOT, "cannot remove the root node");
        debug_assert!(self.is_internal(h), "{h:?} is not an internal node");

        let p = self.arena[h].predecessor;
        self.arena[p].bit_index = self.arena[h].bit_index;

        // Fix p's old neighborhood.
        {
            let parent = self.arena[p].parent;
            let child = if self.arena[p].left == h {
                self.arena[p].right
            } else {
                self.arena[p].left
            };

            // A self-looping p is re-pointed from its parent, unless the
            // parent is the node being removed (then it keeps looping).
            if self.arena[p].predecessor == p && self.arena[p].parent != h {
                let pp = self.arena[p].parent;
                self.arena[p].predecessor = pp;
            }

            if self.arena[parent].left == p {
                self.arena[parent].left = child;
            } else {
                self.arena[parent].right = child;
            }

            if self.arena[child].bit_index > self.arena[parent].bit_index {
                self.arena[child].parent = parent;
            }
        }

        // Fix h's old neighborhood: re-parent h's children and slot p in.
        let (h_parent, h_left, h_right) = {
            let node = &self.arena[h];
            (node.parent, node.left, node.right)
        };
        {
            if self.arena[h_left].parent == h {
                self.arena[h_left].parent = p;
            }
            if self.arena[h_right].parent == h {
                self.arena[h_right].parent = p;
            }
            if self.arena[h_parent].left == h {
                self.arena[h_parent].left = p;
            } else {
                self.arena[h_parent].right = p;
            }
        }

        // p assumes h's links.
        self.arena[p].parent = h_parent;
        self.arena[p].left = h_left;
        self.arena[p].right = h_right;

        // Any uplink that named h now names p.
        if self.is_valid_uplink(h_left, p) {
            self.arena[h_left].predecessor = p;
        }
        if self.is_valid_uplink(h_right, p) {
            self.arena[h_right].predecessor = p;
        }
    }

    // =========================================================================
    // Ordered traversal
    // =========================================================================

    pub(crate) fn first_entry_id(&self) -> NodeId {
        if self.is_empty() {
            return NodeId::NONE;
        }
        self.follow_left(NodeId::ROOT)
    }

    pub(crate) fn last_entry_id(&self) -> NodeId {
        let top = self.arena[NodeId::ROOT].left;
        if top == NodeId::ROOT {
            // No branching structure: the only possible entry is the root
            // itself.
            return if self.arena[NodeId::ROOT].is_empty() {
                NodeId::NONE
            } else {
                NodeId::ROOT
            };
        }
        self.follow_right(top)
    }

    /// Leftmost uplink target below `node`. An empty left child (the
    /// unoccupied root) defers to the right.
    pub(crate) fn follow_left(&self, mut node: NodeId) -> NodeId {
        loop {
            let mut child = self.arena[node].left;
            if self.arena[child].is_empty() {
                child = self.arena[node].right;
            }
            if self.arena[child].bit_index <= self.arena[node].bit_index {
                return child;
            }
            node = child;
        }
    }

    /// Rightmost uplink target below `node`.
    pub(crate) fn follow_right(&self, mut node: NodeId) -> NodeId {
        if self.arena[node].right.is_none() {
            return NodeId::NONE;
        }
        loop {
            let right = self.arena[node].right;
            if self.arena[right].bit_index <= self.arena[node].bit_index {
                return right;
            }
            node = right;
        }
    }

    /// The entry after `node` in key order, or the first entry when `node`
    /// is the none sentinel.
    pub(crate) fn next_entry(&self, node: NodeId) -> NodeId {
        if node.is_none() {
            self.first_entry_id()
        } else {
            self.next_entry_impl(self.arena[node].predecessor, node, NodeId::NONE)
        }
    }

    /// Like [`Self::next_entry`] but never climbing above `tree_root`,
    /// which scopes iteration to a prefix subtree.
    pub(crate) fn next_entry_in_subtree(&self, node: NodeId, tree_root: NodeId) -> NodeId {
        self.next_entry_impl(self.arena[node].predecessor, node, tree_root)
    }

    /// Successor scan. `previous` is the entry most recently yielded (so it
    /// is not yielded again), `start` the position to resume from; both may
    /// be the none sentinel. The scan descends left to the first uplink,
    /// falls back to the right subtree, then climbs parents until it leaves
    /// a left child, stopping if the climb would pass `tree`.
    fn next_entry_impl(&self, start: NodeId, previous: NodeId, tree: NodeId) -> NodeId {
        let mut start = start;
        loop {
            let mut current = start;

            // Look at the left unless the previous entry already came from
            // this node's left subtree.
            if previous.is_none() || start != self.arena[previous].predecessor {
                loop {
                    let left = self.arena[current].left;
                    if self.arena[left].is_empty() || previous == left {
                        break;
                    }
                    if self.is_valid_uplink(left, current) {
                        return left;
                    }
                    current = left;
                }
            }

            // Nothing stored at all.
            if self.arena[current].is_empty() {
                return NodeId::NONE;
            }

            // A lone root entry has no right link.
            let right = self.arena[current].right;
            if right.is_none() {
                return NodeId::NONE;
            }

            if previous != right {
                if self.is_valid_uplink(right, current) {
                    return right;
                }
                start = right;
                continue;
            }

            // Both sides exhausted: climb until we leave a left child.
            loop {
                let parent = self.arena[current].parent;
                if self.arena[parent].right != current {
                    break;
                }
                if current == tree {
                    return NodeId::NONE;
                }
                current = parent;
            }

            if current == tree {
                return NodeId::NONE;
            }

            let parent = self.arena[current].parent;
            let parent_right = self.arena[parent].right;
            if parent_right.is_none() {
                return NodeId::NONE;
            }
            if previous != parent_right && self.is_valid_uplink(parent_right, parent) {
                return parent_right;
            }
            if parent_right == parent {
                return NodeId::NONE;
            }
            start = parent_right;
        }
    }

    /// The entry before `start` in key order.
    pub(crate) fn previous_entry(&self, start: NodeId) -> NodeId {
        let predecessor = self.arena[start].predecessor;
        debug_assert!(!predecessor.is_none(), "entry must have come from somewhere");

        if self.arena[predecessor].right == start {
            // Reached through a right uplink: the predecessor's left side
            // holds everything smaller.
            let left = self.arena[predecessor].left;
            if self.is_valid_uplink(left, predecessor) {
                left
            } else {
                self.follow_right(left)
            }
        } else {
            // Reached through a left uplink: climb out of the left spine.
            let mut node = predecessor;
            let parent = loop {
                let parent = self.arena[node].parent;
                if parent.is_none() {
                    return NodeId::NONE;
                }
                if self.arena[parent].left == node {
                    node = parent;
                } else {
                    break parent;
                }
            };

            let left = self.arena[parent].left;
            if self.is_valid_uplink(left, parent) {
                if left == NodeId::ROOT {
                    if self.arena[NodeId::ROOT].is_empty() {
                        NodeId::NONE
                    } else {
                        NodeId::ROOT
                    }
                } else {
                    left
                }
            } else {
                self.follow_right(left)
            }
        }
    }

    pub fn first_entry(&self) -> Option<(&K, &V)> {
        let id = self.first_entry_id();
        if id.is_none() {
            None
        } else {
            Some(self.entry(id))
        }
    }

    pub fn last_entry(&self) -> Option<(&K, &V)> {
        let id = self.last_entry_id();
        if id.is_none() {
            None
        } else {
            Some(self.entry(id))
        }
    }

    pub fn first_key(&self) -> Option<&K> {
        self.first_entry().map(|(k, _)| k)
    }

    pub fn last_key(&self) -> Option<&K> {
        self.last_entry().map(|(k, _)| k)
    }

    // =========================================================================
    // Ceiling / floor / higher / lower
    // =========================================================================

    /// Least entry with key greater than or equal to `key`.
    pub fn ceiling_entry(&self, key: &K) -> Option<(&K, &V)> {
        self.entry_opt(self.ceiling_entry_id(key))
    }

    /// Least entry with key strictly greater than `key`.
    pub fn higher_entry(&self, key: &K) -> Option<(&K, &V)> {
        self.entry_opt(self.higher_entry_id(key))
    }

    /// Greatest entry with key less than or equal to `key`.
    pub fn floor_entry(&self, key: &K) -> Option<(&K, &V)> {
        self.entry_opt(self.floor_entry_id(key))
    }

    /// Greatest entry with key strictly less than `key`.
    pub fn lower_entry(&self, key: &K) -> Option<(&K, &V)> {
        self.entry_opt(self.lower_entry_id(key))
    }

    pub(crate) fn ceiling_entry_id(&self, key: &K) -> NodeId {
        let length = self.length_in_bits(key);
        if length == 0 {
            return if !self.arena[NodeId::ROOT].is_empty() {
                NodeId::ROOT
            } else {
                self.first_entry_id()
            };
        }

        let found = self.nearest_entry(key, length);
        if self.node_key_equals(key, found) {
            return found;
        }

        let bit = self.bit_index_vs_node(key, found);
        if is_valid_bit_index(bit) {
            self.probe_successor(key, bit, length)
        } else if bit == NULL_BIT_KEY {
            if !self.arena[NodeId::ROOT].is_empty() {
                NodeId::ROOT
            } else {
                self.first_entry_id()
            }
        } else {
            debug_assert_eq!(bit, EQUAL_BIT_KEY);
            found
        }
    }

    pub(crate) fn higher_entry_id(&self, key: &K) -> NodeId {
        let length = self.length_in_bits(key);
        if length == 0 {
            if !self.arena[NodeId::ROOT].is_empty() {
                return if self.size > 1 {
                    self.next_entry(NodeId::ROOT)
                } else {
                    NodeId::NONE
                };
            }
            return self.first_entry_id();
        }

        let found = self.nearest_entry(key, length);
        if self.node_key_equals(key, found) {
            return self.next_entry(found);
        }

        let bit = self.bit_index_vs_node(key, found);
        if is_valid_bit_index(bit) {
            self.probe_successor(key, bit, length)
        } else if bit == NULL_BIT_KEY {
            if !self.arena[NodeId::ROOT].is_empty() {
                self.first_entry_id()
            } else if self.size > 1 {
                self.next_entry(self.first_entry_id())
            } else {
                NodeId::NONE
            }
        } else {
            debug_assert_eq!(bit, EQUAL_BIT_KEY);
            self.next_entry(found)
        }
    }

    pub(crate) fn floor_entry_id(&self, key: &K) -> NodeId {
        let length = self.length_in_bits(key);
        if length == 0 {
            return if !self.arena[NodeId::ROOT].is_empty() {
                NodeId::ROOT
            } else {
                NodeId::NONE
            };
        }

        let found = self.nearest_entry(key, length);
        if self.node_key_equals(key, found) {
            return found;
        }

        let bit = self.bit_index_vs_node(key, found);
        if is_valid_bit_index(bit) {
            self.probe_predecessor(key, bit, length)
        } else if bit == NULL_BIT_KEY {
            if !self.arena[NodeId::ROOT].is_empty() {
                NodeId::ROOT
            } else {
                NodeId::NONE
            }
        } else {
            debug_assert_eq!(bit, EQUAL_BIT_KEY);
            found
        }
    }

    pub(crate) fn lower_entry_id(&self, key: &K) -> NodeId {
        let length = self.length_in_bits(key);
        if length == 0 {
            // Nothing sorts before the root.
            return NodeId::NONE;
        }

        let found = self.nearest_entry(key, length);
        if self.node_key_equals(key, found) {
            return self.previous_entry(found);
        }

        let bit = self.bit_index_vs_node(key, found);
        if is_valid_bit_index(bit) {
            self.probe_predecessor(key, bit, length)
        } else if bit == NULL_BIT_KEY {
            NodeId::NONE
        } else {
            debug_assert_eq!(bit, EQUAL_BIT_KEY);
            self.previous_entry(found)
        }
    }

    /// Where the insertion walk would splice a node branching on `bit`:
    /// the parent (`path`) and the link it would displace (`current`).
    fn splice_point(&self, key: &K, bit: i32, length_in_bits: i32) -> (NodeId, NodeId) {
        let mut path = NodeId::ROOT;
        let mut current = self.arena[NodeId::ROOT].left;
        loop {
            let current_bit = self.arena[current].bit_index;
            if current_bit >= bit || current_bit <= self.arena[path].bit_index {
                return (path, current);
            }
            path = current;
            current = if self.query_bit(key, current_bit, length_in_bits) {
                self.arena[current].right
            } else {
                self.arena[current].left
            };
        }
    }

    /// The entry that would follow a probe node for `key` branching on
    /// `bit`. Tracks the successor scan around the splice position without
    /// mutating the trie.
    fn probe_successor(&self, key: &K, bit: i32, length_in_bits: i32) -> NodeId {
        let (path, current) = self.splice_point(key, bit, length_in_bits);

        if !self.query_bit(key, bit, length_in_bits) {
            // The probe would keep the displaced link on its right, so the
            // successor is the first entry of that branch.
            if self.arena[current].bit_index <= bit && !self.arena[current].is_empty() {
                return current;
            }
            return self.next_entry_impl(current, NodeId::NONE, NodeId::NONE);
        }

        // The probe would sort after the displaced branch: climb.
        let anchor = if path != NodeId::ROOT
            && self.query_bit(key, self.arena[path].bit_index, length_in_bits)
        {
            // The probe would hang off path's right slot.
            let mut node = path;
            loop {
                let parent = self.arena[node].parent;
                if parent.is_none() {
                    return NodeId::NONE;
                }
                if self.arena[parent].right == node {
                    node = parent;
                } else {
                    break parent;
                }
            }
        } else {
            path
        };

        let right = self.arena[anchor].right;
        if right.is_none() {
            return NodeId::NONE;
        }
        if self.is_valid_uplink(right, anchor) {
            return right;
        }
        if right == anchor {
            return NodeId::NONE;
        }
        self.next_entry_impl(right, NodeId::NONE, NodeId::NONE)
    }

    /// The entry that would precede a probe node for `key` branching on
    /// `bit`. Mirror image of [`Self::probe_successor`].
    fn probe_predecessor(&self, key: &K, bit: i32, length_in_bits: i32) -> NodeId {
        let (path, current) = self.splice_point(key, bit, length_in_bits);

        if self.query_bit(key, bit, length_in_bits) {
            // The probe would keep the displaced link on its left: the
            // predecessor is that branch's maximum.
            if self.arena[current].bit_index <= bit && !self.arena[current].is_empty() {
                return current;
            }
            return self.follow_right(current);
        }

        // The probe would sort before the displaced branch: climb out of
        // the left spine.
        let anchor = if path != NodeId::ROOT
            && self.query_bit(key, self.arena[path].bit_index, length_in_bits)
        {
            // The probe would hang off path's right slot; path's left side
            // is untouched.
            path
        } else {
            let mut node = path;
            loop {
                let parent = self.arena[node].parent;
                if parent.is_none() {
                    return NodeId::NONE;
                }
                if self.arena[parent].left == node {
                    node = parent;
                } else {
                    break parent;
                }
            }
        };

        let left = self.arena[anchor].left;
        if self.is_valid_uplink(left, anchor) {
            if left == NodeId::ROOT {
                if self.arena[NodeId::ROOT].is_empty() {
                    NodeId::NONE
                } else {
                    NodeId::ROOT
                }
            } else {
                left
            }
        } else {
            self.follow_right(left)
        }
    }

    // =========================================================================
    // XOR-nearest select
    // =========================================================================

    /// The entry bitwise-closest to `key` under the XOR metric: the
    /// traversal prefers the subtree matching the key's bit at each branch
    /// and backtracks into the sibling when a branch is exhausted.
    pub fn select(&self, key: &K) -> Option<(&K, &V)> {
        let length = self.length_in_bits(key);
        let mut found = NodeId::NONE;
        let start = self.arena[NodeId::ROOT].left;
        if !self.select_r(start, -1, key, length, &mut found) && !found.is_none() {
            return Some(self.entry(found));
        }
        None
    }

    /// Returns `true` while the scan should continue into a sibling.
    fn select_r(&self, h: NodeId, bit_index: i32, key: &K, length: i32, found: &mut NodeId) -> bool {
        if self.arena[h].bit_index <= bit_index {
            // An empty root forces the scan onward to the nearest real
            // alternative.
            if !self.arena[h].is_empty() {
                *found = h;
                return false;
            }
            return true;
        }

        let h_bit = self.arena[h].bit_index;
        let (left, right) = (self.arena[h].left, self.arena[h].right);
        if !self.query_bit(key, h_bit, length) {
            if self.select_r(left, h_bit, key, length, found) {
                return self.select_r(right, h_bit, key, length, found);
            }
        } else if self.select_r(right, h_bit, key, length, found) {
            return self.select_r(left, h_bit, key, length, found);
        }
        false
    }

    /// Like [`Self::select`], but the cursor decides at each visited entry
    /// whether to continue to the next-closest one, stop, or delete and
    /// stop. [`Decision::Remove`] is not permitted here: removal without
    /// exiting would pull the structure out from under the scan.
    pub fn select_with<F>(&mut self, key: &K, mut cursor: F) -> Result<Option<Selection<'_, K, V>>, Error>
    where
        F: FnMut(&K, &V) -> Decision,
    {
        let length = self.length_in_bits(key);
        let mut outcome = SelectOutcome::None;
        let start = self.arena[NodeId::ROOT].left;
        self.select_with_r(start, -1, key, length, &mut cursor, &mut outcome)?;
        Ok(match outcome {
            SelectOutcome::None => None,
            SelectOutcome::Found(id) => {
                let (k, v) = self.entry(id);
                Some(Selection::Found(k, v))
            }
            SelectOutcome::Removed(k, v) => Some(Selection::Removed(k, v)),
        })
    }

    fn select_with_r<F>(
        &mut self,
        h: NodeId,
        bit_index: i32,
        key: &K,
        length: i32,
        cursor: &mut F,
        outcome: &mut SelectOutcome<K, V>,
    ) -> Result<bool, Error>
    where
        F: FnMut(&K, &V) -> Decision,
    {
        if self.arena[h].bit_index <= bit_index {
            if !self.arena[h].is_empty() {
                let decision = {
                    let (k, v) = self.entry(h);
                    cursor(k, v)
                };
                match decision {
                    Decision::Remove => return Err(Error::RemoveDuringSelect),
                    Decision::Exit => {
                        *outcome = SelectOutcome::Found(h);
                        return Ok(false);
                    }
                    Decision::RemoveAndExit => {
                        // The removal happens after the cursor decided; the
                        // detached pair never aliases live structure.
                        let (k, v) = self.remove_entry(h);
                        *outcome = SelectOutcome::Removed(k, v);
                        return Ok(false);
                    }
                    Decision::Continue => {}
                }
            }
            return Ok(true);
        }

        let h_bit = self.arena[h].bit_index;
        let (left, right) = (self.arena[h].left, self.arena[h].right);
        if !self.query_bit(key, h_bit, length) {
            if self.select_with_r(left, h_bit, key, length, cursor, outcome)? {
                return self.select_with_r(right, h_bit, key, length, cursor, outcome);
            }
        } else if self.select_with_r(right, h_bit, key, length, cursor, outcome)? {
            return self.select_with_r(left, h_bit, key, length, cursor, outcome);
        }
        Ok(false)
    }

    // =========================================================================
    // Full traverse
    // =========================================================================

    /// Visits every entry in key order, letting the cursor continue, stop,
    /// or delete. Unlike select, [`Decision::Remove`] is legal: the
    /// successor is resolved before the removal, so iteration carries on
    /// seamlessly.
    pub fn traverse<F>(&mut self, mut cursor: F) -> Option<Selection<'_, K, V>>
    where
        F: FnMut(&K, &V) -> Decision,
    {
        let mut entry = self.next_entry(NodeId::NONE);
        while !entry.is_none() {
            let current = entry;
            let decision = {
                let (k, v) = self.entry(current);
                cursor(k, v)
            };
            entry = self.next_entry(current);

            match decision {
                Decision::Exit => {
                    let (k, v) = self.entry(current);
                    return Some(Selection::Found(k, v));
                }
                Decision::Remove => {
                    self.remove_entry(current);
                }
                Decision::RemoveAndExit => {
                    let (k, v) = self.remove_entry(current);
                    return Some(Selection::Removed(k, v));
                }
                Decision::Continue => {}
            }
        }
        None
    }

    // =========================================================================
    // Prefix subtree
    // =========================================================================

    /// Locates the node whose subtree spans every key carrying the given
    /// bit prefix, or the none sentinel when no key does. The descent is a
    /// lookup by the prefix's bits that additionally stops once the branch
    /// bit falls past the prefix length; the landing node is then vetted
    /// against the prefix.
    pub(crate) fn subtree(&self, prefix: &K, offset_in_bits: i32, length_in_bits: i32) -> NodeId {
        let mut path = NodeId::ROOT;
        let mut current = self.arena[NodeId::ROOT].left;
        loop {
            if self.arena[current].bit_index <= self.arena[path].bit_index
                || length_in_bits < self.arena[current].bit_index
            {
                break;
            }
            path = current;
            current = if self.query_bit(
                prefix,
                offset_in_bits + self.arena[current].bit_index,
                offset_in_bits + length_in_bits,
            ) {
                self.arena[current].right
            } else {
                self.arena[current].left
            };
        }

        let entry = if self.arena[current].is_empty() {
            path
        } else {
            current
        };
        if self.arena[entry].is_empty() {
            return NodeId::NONE;
        }

        let offset_length = offset_in_bits + length_in_bits;

        // A root entry shorter than the prefix cannot carry it; this keeps
        // a zero-extended root key (for example the empty string) from
        // claiming prefixes made of zero bits.
        if entry == NodeId::ROOT && self.length_in_bits(self.key_of(entry)) < offset_length {
            return NodeId::NONE;
        }

        // The stored key must not diverge from the prefix at the boundary
        // bit...
        let entry_key = self.key_of(entry);
        let entry_length = self.analyzer.length_in_bits(entry_key);
        if self.analyzer.is_bit_set(prefix, offset_length, offset_length)
            != self.analyzer.is_bit_set(entry_key, length_in_bits, entry_length)
        {
            return NodeId::NONE;
        }

        // ... nor anywhere within the prefix range.
        let bit = self.analyzer.bit_index(
            prefix,
            offset_in_bits,
            length_in_bits,
            Some(entry_key),
            0,
            entry_length,
        );
        if is_valid_bit_index(bit) && bit < length_in_bits {
            return NodeId::NONE;
        }

        entry
    }

    // =========================================================================
    // Small helpers
    // =========================================================================

    #[inline]
    pub(crate) fn length_in_bits(&self, key: &K) -> i32 {
        self.analyzer.length_in_bits(key)
    }

    #[inline]
    fn query_bit(&self, key: &K, bit_index: i32, length_in_bits: i32) -> bool {
        self.analyzer.is_bit_set(key, bit_index, length_in_bits)
    }

    /// Bit read on a stored node's key.
    #[inline]
    fn node_bit(&self, id: NodeId, bit_index: i32, length_in_bits: i32) -> bool {
        self.analyzer.is_bit_set(self.key_of(id), bit_index, length_in_bits)
    }

    /// First differing bit between `key` and the key stored at `id` (which
    /// is absent on the empty root).
    fn bit_index_vs_node(&self, key: &K, id: NodeId) -> i32 {
        let length = self.analyzer.length_in_bits(key);
        let (other, other_length) = match self.arena[id].key.as_ref() {
            Some(stored) => (Some(stored), self.analyzer.length_in_bits(stored)),
            None => (None, 0),
        };
        self.analyzer.bit_index(key, 0, length, other, 0, other_length)
    }

    /// Whether the key stored at `id` compares equal to `key`.
    pub(crate) fn node_key_equals(&self, key: &K, id: NodeId) -> bool {
        match self.arena[id].key.as_ref() {
            Some(stored) => self.analyzer.compare(key, stored) == Ordering::Equal,
            None => false,
        }
    }

    /// Both children descend: removal must promote the predecessor.
    fn is_internal(&self, id: NodeId) -> bool {
        self.arena[id].left != id && self.arena[id].right != id
    }

    /// True when `next` is an uplink out of `from`: it points at a
    /// data-bearing node no deeper than `from`.
    pub(crate) fn is_valid_uplink(&self, next: NodeId, from: NodeId) -> bool {
        !next.is_none()
            && self.arena[next].bit_index <= self.arena[from].bit_index
            && !self.arena[next].is_empty()
    }

    pub(crate) fn entry(&self, id: NodeId) -> (&K, &V) {
        let node = &self.arena[id];
        (
            node.key.as_ref().expect("entry node has a key"),
            node.value.as_ref().expect("entry node has a value"),
        )
    }

    pub(crate) fn entry_opt(&self, id: NodeId) -> Option<(&K, &V)> {
        if id.is_none() {
            None
        } else {
            Some(self.entry(id))
        }
    }

    pub(crate) fn key_of(&self, id: NodeId) -> &K {
        self.arena[id].key.as_ref().expect("entry node has a key")
    }
}

enum SelectOutcome<K, V> {
    None,
    Found(NodeId),
    Removed(K, V),
}

impl<K, V, A: KeyAnalyzer<K> + Default> Default for PatriciaMap<K, V, A> {
    fn default() -> Self {
        Self::new(A::default())
    }
}

impl<K: fmt::Debug, V: fmt::Debug, A: KeyAnalyzer<K>> fmt::Debug for PatriciaMap<K, V, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, A: KeyAnalyzer<K>> Extend<(K, V)> for PatriciaMap<K, V, A> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}
