//! Prefix views: live submaps over all keys sharing a bit prefix.
//!
//! The bounds of a prefix view are not keys but a located subtree: the
//! single node whose subtree spans every key carrying the prefix. Entries
//! stored above that node are still reached through its uplinks, so
//! iteration is a subtree-scoped successor walk. The mutable view caches
//! the located subtree, the neighboring entries just outside the prefix
//! set and the size, and recomputes them whenever the map's modification
//! count has moved on -- which, under an exclusive borrow, can only happen
//! through the view's own writes.

use crate::analyzer::KeyAnalyzer;
use crate::node::NodeId;
use crate::trie::PatriciaMap;
use crate::Error;

impl<K, V, A: KeyAnalyzer<K>> PatriciaMap<K, V, A> {
    /// View of the entries whose keys start with the whole of `prefix`.
    pub fn prefixed_by(&self, prefix: K) -> Result<PrefixView<'_, K, V, A>, Error> {
        let length = self.length_in_bits(&prefix);
        self.prefixed_by_bits_at(prefix, 0, length)
    }

    /// View keyed by the first `length` elements of `prefix` (elements as
    /// defined by the analyzer, e.g. characters).
    pub fn prefixed_by_elements(&self, prefix: K, length: i32) -> Result<PrefixView<'_, K, V, A>, Error> {
        let width = self.analyzer.bits_per_element();
        self.prefixed_by_bits_at(prefix, 0, length * width)
    }

    /// View keyed by `length` elements of `prefix` starting at element
    /// `offset`.
    pub fn prefixed_by_offset(
        &self,
        prefix: K,
        offset: i32,
        length: i32,
    ) -> Result<PrefixView<'_, K, V, A>, Error> {
        let width = self.analyzer.bits_per_element();
        self.prefixed_by_bits_at(prefix, offset * width, length * width)
    }

    /// View keyed by the first `length_in_bits` bits of `prefix`.
    pub fn prefixed_by_bits(
        &self,
        prefix: K,
        length_in_bits: i32,
    ) -> Result<PrefixView<'_, K, V, A>, Error> {
        self.prefixed_by_bits_at(prefix, 0, length_in_bits)
    }

    /// View keyed by `length_in_bits` bits of `prefix` starting at bit
    /// `offset_in_bits`. A zero-length specification spans the whole map.
    pub fn prefixed_by_bits_at(
        &self,
        prefix: K,
        offset_in_bits: i32,
        length_in_bits: i32,
    ) -> Result<PrefixView<'_, K, V, A>, Error> {
        let spec = self.prefix_spec(prefix, offset_in_bits, length_in_bits)?;
        let subtree = spec.locate(self);
        Ok(PrefixView {
            map: self,
            spec,
            subtree,
        })
    }

    /// Mutable counterpart of [`Self::prefixed_by`].
    pub fn prefixed_by_mut(&mut self, prefix: K) -> Result<PrefixViewMut<'_, K, V, A>, Error> {
        let length = self.length_in_bits(&prefix);
        self.prefixed_by_bits_at_mut(prefix, 0, length)
    }

    pub fn prefixed_by_elements_mut(
        &mut self,
        prefix: K,
        length: i32,
    ) -> Result<PrefixViewMut<'_, K, V, A>, Error> {
        let width = self.analyzer.bits_per_element();
        self.prefixed_by_bits_at_mut(prefix, 0, length * width)
    }

    pub fn prefixed_by_offset_mut(
        &mut self,
        prefix: K,
        offset: i32,
        length: i32,
    ) -> Result<PrefixViewMut<'_, K, V, A>, Error> {
        let width = self.analyzer.bits_per_element();
        self.prefixed_by_bits_at_mut(prefix, offset * width, length * width)
    }

    pub fn prefixed_by_bits_mut(
        &mut self,
        prefix: K,
        length_in_bits: i32,
    ) -> Result<PrefixViewMut<'_, K, V, A>, Error> {
        self.prefixed_by_bits_at_mut(prefix, 0, length_in_bits)
    }

    /// Mutable counterpart of [`Self::prefixed_by_bits_at`].
    pub fn prefixed_by_bits_at_mut(
        &mut self,
        prefix: K,
        offset_in_bits: i32,
        length_in_bits: i32,
    ) -> Result<PrefixViewMut<'_, K, V, A>, Error> {
        let spec = self.prefix_spec(prefix, offset_in_bits, length_in_bits)?;
        let cache = Cache::compute(self, &spec);
        Ok(PrefixViewMut {
            map: self,
            spec,
            cache,
        })
    }

    fn prefix_spec(
        &self,
        prefix: K,
        offset_in_bits: i32,
        length_in_bits: i32,
    ) -> Result<PrefixSpec<K>, Error> {
        let key_length_in_bits = self.length_in_bits(&prefix);
        if offset_in_bits + length_in_bits > key_length_in_bits {
            return Err(Error::PrefixOutOfBounds {
                offset_in_bits,
                length_in_bits,
                key_length_in_bits,
            });
        }
        self.analyzer.validate_alignment(offset_in_bits, length_in_bits)?;
        Ok(PrefixSpec {
            prefix,
            offset_in_bits,
            length_in_bits,
        })
    }
}

/// The prefix a view is scoped to.
struct PrefixSpec<K> {
    prefix: K,
    offset_in_bits: i32,
    length_in_bits: i32,
}

impl<K> PrefixSpec<K> {
    /// A zero-length prefix matches everything: the view is the map.
    fn is_whole(&self) -> bool {
        self.offset_in_bits + self.length_in_bits == 0
    }

    fn matches<V, A: KeyAnalyzer<K>>(&self, map: &PatriciaMap<K, V, A>, key: &K) -> bool {
        self.is_whole()
            || map.analyzer().is_prefix(&self.prefix, self.offset_in_bits, self.length_in_bits, key)
    }

    fn locate<V, A: KeyAnalyzer<K>>(&self, map: &PatriciaMap<K, V, A>) -> NodeId {
        if self.is_whole() {
            NodeId::NONE
        } else {
            map.subtree(&self.prefix, self.offset_in_bits, self.length_in_bits)
        }
    }

    /// Whether the located subtree is itself the only matching entry.
    fn is_singleton<V, A: KeyAnalyzer<K>>(&self, map: &PatriciaMap<K, V, A>, subtree: NodeId) -> bool {
        self.length_in_bits >= map.arena[subtree].bit_index
    }

    fn first<V, A: KeyAnalyzer<K>>(&self, map: &PatriciaMap<K, V, A>, subtree: NodeId) -> NodeId {
        if self.is_whole() {
            return map.first_entry_id();
        }
        if subtree.is_none() {
            return NodeId::NONE;
        }
        if self.is_singleton(map, subtree) {
            subtree
        } else {
            map.follow_left(subtree)
        }
    }

    fn last<V, A: KeyAnalyzer<K>>(&self, map: &PatriciaMap<K, V, A>, subtree: NodeId) -> NodeId {
        if self.is_whole() {
            return map.last_entry_id();
        }
        if subtree.is_none() {
            return NodeId::NONE;
        }
        if self.is_singleton(map, subtree) {
            subtree
        } else {
            map.follow_right(subtree)
        }
    }

    fn iter<'a, V, A: KeyAnalyzer<K>>(
        &self,
        map: &'a PatriciaMap<K, V, A>,
        subtree: NodeId,
    ) -> PrefixIter<'a, K, V, A> {
        let singleton = !self.is_whole()
            && !subtree.is_none()
            && self.is_singleton(map, subtree);
        PrefixIter {
            map,
            subtree: if self.is_whole() { NodeId::NONE } else { subtree },
            next: self.first(map, subtree),
            singleton,
        }
    }
}

// =============================================================================
// Read-only view
// =============================================================================

/// Live read-only view over the entries sharing a bit prefix. The bounds
/// are resolved at construction; the shared borrow guarantees the map
/// cannot change underneath.
pub struct PrefixView<'a, K, V, A> {
    map: &'a PatriciaMap<K, V, A>,
    spec: PrefixSpec<K>,
    subtree: NodeId,
}

impl<'a, K, V, A: KeyAnalyzer<K>> PrefixView<'a, K, V, A> {
    pub fn get(&self, key: &K) -> Option<&'a V> {
        if !self.spec.matches(self.map, key) {
            return None;
        }
        self.map.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.spec.matches(self.map, key) && self.map.contains_key(key)
    }

    pub fn first_entry(&self) -> Option<(&'a K, &'a V)> {
        self.map.entry_opt(self.spec.first(self.map, self.subtree))
    }

    pub fn last_entry(&self) -> Option<(&'a K, &'a V)> {
        self.map.entry_opt(self.spec.last(self.map, self.subtree))
    }

    pub fn first_key(&self) -> Option<&'a K> {
        self.first_entry().map(|(k, _)| k)
    }

    pub fn last_key(&self) -> Option<&'a K> {
        self.last_entry().map(|(k, _)| k)
    }

    pub fn iter(&self) -> PrefixIter<'a, K, V, A> {
        self.spec.iter(self.map, self.subtree)
    }

    pub fn len(&self) -> usize {
        if self.spec.is_whole() {
            return self.map.len();
        }
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        if self.spec.is_whole() {
            return self.map.is_empty();
        }
        self.subtree.is_none()
    }
}

// =============================================================================
// Mutable view
// =============================================================================

/// Cached bounds of a mutable prefix view: the located subtree, the
/// entries immediately outside the prefix set on either side, and the
/// size. Valid only while the map's modification count matches.
struct Cache {
    expected_mod_count: u64,
    subtree: NodeId,
    /// Entry just before the first matching one, if any.
    before: NodeId,
    /// Entry just after the last matching one, if any.
    after: NodeId,
    size: usize,
}

impl Cache {
    fn compute<K, V, A: KeyAnalyzer<K>>(map: &PatriciaMap<K, V, A>, spec: &PrefixSpec<K>) -> Cache {
        let subtree = spec.locate(map);
        let mut size = 0;
        let mut before = NodeId::NONE;
        let mut after = NodeId::NONE;
        if !spec.is_whole() && !subtree.is_none() {
            let first = spec.first(map, subtree);
            let last = spec.last(map, subtree);
            size = {
                let mut n = 0;
                let mut iter = spec.iter(map, subtree);
                while iter.next().is_some() {
                    n += 1;
                }
                n
            };
            if !first.is_none() {
                before = map.previous_entry(first);
            }
            if !last.is_none() {
                after = map.next_entry(last);
            }
        }
        Cache {
            expected_mod_count: map.mod_count,
            subtree,
            before,
            after,
            size,
        }
    }
}

/// Live mutable view over the entries sharing a bit prefix. Writes outside
/// the prefix fail with [`Error::OutOfRange`]. Bounds are recomputed lazily
/// after the view's own mutations.
pub struct PrefixViewMut<'a, K, V, A> {
    map: &'a mut PatriciaMap<K, V, A>,
    spec: PrefixSpec<K>,
    cache: Cache,
}

impl<'a, K, V, A: KeyAnalyzer<K>> PrefixViewMut<'a, K, V, A> {
    /// Refreshes the cached bounds if the map has changed since they were
    /// computed.
    fn fixup(&mut self) {
        if self.cache.expected_mod_count != self.map.mod_count {
            self.cache = Cache::compute(self.map, &self.spec);
        }
    }

    /// Inserts through the view. The key must carry the view's prefix.
    pub fn insert(&mut self, key: K, value: V) -> Result<Option<V>, Error> {
        if !self.spec.matches(self.map, &key) {
            return Err(Error::OutOfRange);
        }
        Ok(self.map.insert(key, value))
    }

    /// Removes through the view. Keys without the prefix are left alone.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        if !self.spec.matches(self.map, key) {
            return None;
        }
        self.map.remove(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        if !self.spec.matches(self.map, key) {
            return None;
        }
        self.map.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.spec.matches(self.map, key) && self.map.contains_key(key)
    }

    /// First matching entry: the successor of the cached outside-left
    /// neighbor, vetted against the prefix.
    pub fn first_entry(&mut self) -> Option<(&K, &V)> {
        self.fixup();
        if self.spec.is_whole() {
            return self.map.first_entry();
        }
        let id = if self.cache.before.is_none() {
            self.map.first_entry_id()
        } else {
            self.map.next_entry(self.cache.before)
        };
        if id.is_none() || !self.spec.matches(self.map, self.map.key_of(id)) {
            return None;
        }
        Some(self.map.entry(id))
    }

    /// Last matching entry: the predecessor of the cached outside-right
    /// neighbor, vetted against the prefix.
    pub fn last_entry(&mut self) -> Option<(&K, &V)> {
        self.fixup();
        if self.spec.is_whole() {
            return self.map.last_entry();
        }
        let id = if self.cache.after.is_none() {
            self.map.last_entry_id()
        } else {
            self.map.previous_entry(self.cache.after)
        };
        if id.is_none() || !self.spec.matches(self.map, self.map.key_of(id)) {
            return None;
        }
        Some(self.map.entry(id))
    }

    pub fn first_key(&mut self) -> Option<&K> {
        self.first_entry().map(|(k, _)| k)
    }

    pub fn last_key(&mut self) -> Option<&K> {
        self.last_entry().map(|(k, _)| k)
    }

    pub fn iter(&mut self) -> PrefixIter<'_, K, V, A> {
        self.fixup();
        self.spec.iter(self.map, self.cache.subtree)
    }

    pub fn len(&mut self) -> usize {
        self.fixup();
        if self.spec.is_whole() {
            return self.map.len();
        }
        self.cache.size
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }
}

/// Iterator over a prefix view: a successor walk scoped to the located
/// subtree (or a single yield when the subtree is one entry).
pub struct PrefixIter<'a, K, V, A> {
    map: &'a PatriciaMap<K, V, A>,
    /// Scope bound for the successor walk; the none sentinel means
    /// unscoped (whole-map) iteration.
    subtree: NodeId,
    next: NodeId,
    singleton: bool,
}

impl<'a, K, V, A: KeyAnalyzer<K>> Iterator for PrefixIter<'a, K, V, A> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next.is_none() {
            return None;
        }
        let id = self.next;
        self.next = if self.singleton {
            NodeId::NONE
        } else if self.subtree.is_none() {
            self.map.next_entry(id)
        } else {
            self.map.next_entry_in_subtree(id, self.subtree)
        };
        Some(self.map.entry(id))
    }
}

#[cfg(test)]
mod tests {
    use crate::{Error, StringPatriciaMap};

    fn s(text: &str) -> String {
        text.to_string()
    }

    #[test]
    fn test_prefix_view_lists_matches_in_order() {
        let mut t = StringPatriciaMap::default();
        t.insert(s("Lime"), 1);
        t.insert(s("LimeWire"), 2);
        t.insert(s("LimeRadio"), 3);
        assert_eq!(t.len(), 3);

        let view = t.prefixed_by(s("Lime")).unwrap();
        let keys: Vec<&String> = view.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["Lime", "LimeRadio", "LimeWire"]);
        assert_eq!(view.first_key(), Some(&s("Lime")));
        assert_eq!(view.last_key(), Some(&s("LimeWire")));
        assert_eq!(view.len(), 3);
    }

    #[test]
    fn test_prefix_view_excludes_non_matches() {
        let mut t = StringPatriciaMap::default();
        t.insert(s("Lime"), 1);
        t.insert(s("LimeWire"), 2);
        t.insert(s("Lemon"), 3);
        t.insert(s("Apple"), 4);

        let view = t.prefixed_by(s("Lime")).unwrap();
        let keys: Vec<&String> = view.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["Lime", "LimeWire"]);
        assert_eq!(view.get(&s("Lemon")), None);
        assert!(!view.contains_key(&s("Apple")));
        assert_eq!(view.get(&s("LimeWire")), Some(&2));
    }

    #[test]
    fn test_prefix_view_singleton() {
        let mut t = StringPatriciaMap::default();
        t.insert(s("alpha"), 1);
        t.insert(s("beta"), 2);

        let view = t.prefixed_by(s("alpha")).unwrap();
        let keys: Vec<&String> = view.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["alpha"]);
        assert_eq!(view.first_key(), Some(&s("alpha")));
        assert_eq!(view.last_key(), Some(&s("alpha")));
    }

    #[test]
    fn test_prefix_view_no_matches() {
        let mut t = StringPatriciaMap::default();
        t.insert(s("alpha"), 1);
        t.insert(s("beta"), 2);

        let view = t.prefixed_by(s("gamma")).unwrap();
        assert!(view.is_empty());
        assert_eq!(view.first_key(), None);
        assert_eq!(view.last_key(), None);
        assert_eq!(view.iter().count(), 0);
    }

    #[test]
    fn test_prefix_by_elements_and_offset() {
        let mut t = StringPatriciaMap::default();
        t.insert(s("abcd"), 1);
        t.insert(s("abxy"), 2);
        t.insert(s("zzzz"), 3);

        let view = t.prefixed_by_elements(s("abzz"), 2).unwrap();
        let keys: Vec<&String> = view.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["abcd", "abxy"]);

        // Offset selects which part of the given key is the prefix.
        let view = t.prefixed_by_offset(s("xxab"), 2, 2).unwrap();
        let keys: Vec<&String> = view.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["abcd", "abxy"]);
    }

    #[test]
    fn test_zero_length_prefix_spans_the_map() {
        let mut t = StringPatriciaMap::default();
        t.insert(s("a"), 1);
        t.insert(s("b"), 2);

        let view = t.prefixed_by_bits(s("ignored"), 0).unwrap();
        assert_eq!(view.len(), 2);
        assert_eq!(view.first_key(), Some(&s("a")));
        assert_eq!(view.last_key(), Some(&s("b")));
        assert!(view.contains_key(&s("a")));
    }

    #[test]
    fn test_prefix_spec_validation() {
        let t: StringPatriciaMap<u64> = StringPatriciaMap::default();
        assert!(matches!(
            t.prefixed_by_bits(s("ab"), 48),
            Err(Error::PrefixOutOfBounds { .. })
        ));
        assert!(matches!(
            t.prefixed_by_bits(s("ab"), 13),
            Err(Error::NotOnElementBoundary { .. })
        ));
    }

    #[test]
    fn test_mutable_view_rejects_foreign_keys() {
        let mut t = StringPatriciaMap::default();
        t.insert(s("Lime"), 1);

        let mut view = t.prefixed_by_mut(s("Lime")).unwrap();
        assert_eq!(view.insert(s("Lemon"), 9), Err(Error::OutOfRange));
        assert_eq!(view.insert(s("LimeWire"), 2), Ok(None));
        assert_eq!(view.remove(&s("Lemon")), None);
    }

    #[test]
    fn test_mutable_view_recomputes_bounds_after_own_writes() {
        let mut t = StringPatriciaMap::default();
        t.insert(s("Lime"), 1);
        t.insert(s("LimeWire"), 2);
        t.insert(s("Apple"), 4);

        let mut view = t.prefixed_by_mut(s("Lime")).unwrap();
        assert_eq!(view.len(), 2);

        view.insert(s("LimeRadio"), 3).unwrap();
        assert_eq!(view.len(), 3);
        assert_eq!(view.first_key(), Some(&s("Lime")));
        assert_eq!(view.last_key(), Some(&s("LimeWire")));

        assert_eq!(view.remove(&s("Lime")), Some(1));
        assert_eq!(view.len(), 2);
        assert_eq!(view.first_key(), Some(&s("LimeRadio")));

        let keys: Vec<String> = view.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, ["LimeRadio", "LimeWire"]);

        drop(view);
        assert_eq!(t.len(), 3);
        assert_eq!(t.get(&s("Apple")), Some(&4));
    }

    #[test]
    fn test_mutable_view_drained_to_empty() {
        let mut t = StringPatriciaMap::default();
        t.insert(s("Lime"), 1);
        t.insert(s("LimeWire"), 2);

        let mut view = t.prefixed_by_mut(s("Lime")).unwrap();
        assert_eq!(view.remove(&s("Lime")), Some(1));
        assert_eq!(view.remove(&s("LimeWire")), Some(2));
        assert!(view.is_empty());
        assert_eq!(view.first_key(), None);
        assert_eq!(view.last_key(), None);
    }

    #[test]
    fn test_prefix_view_with_empty_root_key() {
        let mut t = StringPatriciaMap::default();
        t.insert(s(""), 0);
        t.insert(s("ab"), 1);

        // The zero-extended root key must not claim real prefixes.
        let view = t.prefixed_by(s("ab")).unwrap();
        let keys: Vec<&String> = view.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["ab"]);
    }
}
