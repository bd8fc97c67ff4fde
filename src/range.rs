//! Bounded range views: live submaps over a key interval.
//!
//! A range view is a borrow of the trie plus a bounds record; it copies no
//! entries. Reads filter by the bounds, writes outside them are rejected,
//! and narrowing produces a new view after validating that the new bounds
//! sit inside the old ones.

use crate::analyzer::KeyAnalyzer;
use crate::node::NodeId;
use crate::trie::PatriciaMap;
use crate::Error;

/// Key interval `[from?, to?]` with independent inclusivity flags.
#[derive(Clone, Debug)]
pub(crate) struct KeyRange<K> {
    pub(crate) from: Option<K>,
    pub(crate) from_inclusive: bool,
    pub(crate) to: Option<K>,
    pub(crate) to_inclusive: bool,
}

impl<K> KeyRange<K> {
    pub(crate) fn in_range<A: KeyAnalyzer<K>>(&self, analyzer: &A, key: &K) -> bool {
        (self.from.is_none() || self.in_from_range(analyzer, key, false))
            && (self.to.is_none() || self.in_to_range(analyzer, key, false))
    }

    /// Range test that also admits the high endpoint, used when validating
    /// narrowed bounds.
    pub(crate) fn in_range_tolerant<A: KeyAnalyzer<K>>(&self, analyzer: &A, key: &K) -> bool {
        (self.from.is_none() || self.in_from_range(analyzer, key, false))
            && (self.to.is_none() || self.in_to_range(analyzer, key, true))
    }

    pub(crate) fn in_from_range<A: KeyAnalyzer<K>>(
        &self,
        analyzer: &A,
        key: &K,
        force_inclusive: bool,
    ) -> bool {
        let from = match &self.from {
            Some(from) => from,
            None => return true,
        };
        let order = analyzer.compare(key, from);
        if self.from_inclusive || force_inclusive {
            order.is_ge()
        } else {
            order.is_gt()
        }
    }

    pub(crate) fn in_to_range<A: KeyAnalyzer<K>>(
        &self,
        analyzer: &A,
        key: &K,
        force_inclusive: bool,
    ) -> bool {
        let to = match &self.to {
            Some(to) => to,
            None => return true,
        };
        let order = analyzer.compare(key, to);
        if self.to_inclusive || force_inclusive {
            order.is_le()
        } else {
            order.is_lt()
        }
    }
}

// =============================================================================
// View construction on the map
// =============================================================================

impl<K, V, A: KeyAnalyzer<K>> PatriciaMap<K, V, A> {
    /// View of the entries with keys in `[from, to)`. Fails when the bounds
    /// are reversed.
    pub fn sub_map(&self, from: K, to: K) -> Result<SubMap<'_, K, V, A>, Error> {
        let range = self.bounded_range(from, to)?;
        Ok(SubMap { map: self, range })
    }

    /// Mutable counterpart of [`Self::sub_map`].
    pub fn sub_map_mut(&mut self, from: K, to: K) -> Result<SubMapMut<'_, K, V, A>, Error> {
        let range = self.bounded_range(from, to)?;
        Ok(SubMapMut { map: self, range })
    }

    /// View of the entries with keys strictly before `to`.
    pub fn head_map(&self, to: K) -> SubMap<'_, K, V, A> {
        SubMap {
            map: self,
            range: head_range(to),
        }
    }

    pub fn head_map_mut(&mut self, to: K) -> SubMapMut<'_, K, V, A> {
        SubMapMut {
            map: self,
            range: head_range(to),
        }
    }

    /// View of the entries with keys at or after `from`.
    pub fn tail_map(&self, from: K) -> SubMap<'_, K, V, A> {
        SubMap {
            map: self,
            range: tail_range(from),
        }
    }

    pub fn tail_map_mut(&mut self, from: K) -> SubMapMut<'_, K, V, A> {
        SubMapMut {
            map: self,
            range: tail_range(from),
        }
    }

    fn bounded_range(&self, from: K, to: K) -> Result<KeyRange<K>, Error> {
        if self.analyzer.compare(&from, &to).is_gt() {
            return Err(Error::OutOfRange);
        }
        Ok(KeyRange {
            from: Some(from),
            from_inclusive: true,
            to: Some(to),
            to_inclusive: false,
        })
    }
}

fn head_range<K>(to: K) -> KeyRange<K> {
    KeyRange {
        from: None,
        from_inclusive: true,
        to: Some(to),
        to_inclusive: false,
    }
}

fn tail_range<K>(from: K) -> KeyRange<K> {
    KeyRange {
        from: Some(from),
        from_inclusive: true,
        to: None,
        to_inclusive: false,
    }
}

// =============================================================================
// Shared read logic
// =============================================================================

/// First entry inside the range: the ceiling or higher of the low endpoint
/// depending on inclusivity, vetted against the high endpoint.
fn first_in_range<K, V, A: KeyAnalyzer<K>>(
    map: &PatriciaMap<K, V, A>,
    range: &KeyRange<K>,
) -> NodeId {
    let id = match &range.from {
        None => map.first_entry_id(),
        Some(from) if range.from_inclusive => map.ceiling_entry_id(from),
        Some(from) => map.higher_entry_id(from),
    };
    if id.is_none() || !range.in_to_range(map.analyzer(), map.key_of(id), false) {
        NodeId::NONE
    } else {
        id
    }
}

/// Last entry inside the range, mirror of [`first_in_range`].
fn last_in_range<K, V, A: KeyAnalyzer<K>>(
    map: &PatriciaMap<K, V, A>,
    range: &KeyRange<K>,
) -> NodeId {
    let id = match &range.to {
        None => map.last_entry_id(),
        Some(to) if range.to_inclusive => map.floor_entry_id(to),
        Some(to) => map.lower_entry_id(to),
    };
    if id.is_none() || !range.in_from_range(map.analyzer(), map.key_of(id), false) {
        NodeId::NONE
    } else {
        id
    }
}

/// The first entry past the range's high end; iteration stops there.
fn excluded_end<K, V, A: KeyAnalyzer<K>>(
    map: &PatriciaMap<K, V, A>,
    range: &KeyRange<K>,
) -> NodeId {
    match &range.to {
        None => NodeId::NONE,
        Some(to) if range.to_inclusive => map.higher_entry_id(to),
        Some(to) => map.ceiling_entry_id(to),
    }
}

fn range_iter<'a, K, V, A: KeyAnalyzer<K>>(
    map: &'a PatriciaMap<K, V, A>,
    range: &KeyRange<K>,
) -> RangeIter<'a, K, V, A> {
    RangeIter {
        map,
        next: first_in_range(map, range),
        excluded: excluded_end(map, range),
    }
}

fn narrowed<K, V, A: KeyAnalyzer<K>>(
    map: &PatriciaMap<K, V, A>,
    range: &KeyRange<K>,
    from: Option<K>,
    to: Option<K>,
) -> Result<KeyRange<K>, Error>
where
    K: Clone,
{
    if let Some(from) = &from {
        if !range.in_range_tolerant(map.analyzer(), from) {
            return Err(Error::OutOfRange);
        }
    }
    if let Some(to) = &to {
        if !range.in_range_tolerant(map.analyzer(), to) {
            return Err(Error::OutOfRange);
        }
    }
    let from = from.or_else(|| range.from.clone());
    let to = to.or_else(|| range.to.clone());
    if let (Some(f), Some(t)) = (&from, &to) {
        if map.analyzer().compare(f, t).is_gt() {
            return Err(Error::OutOfRange);
        }
    }
    Ok(KeyRange {
        from,
        from_inclusive: range.from_inclusive,
        to,
        to_inclusive: range.to_inclusive,
    })
}

// =============================================================================
// The views
// =============================================================================

/// Live read-only view over a key interval.
pub struct SubMap<'a, K, V, A> {
    map: &'a PatriciaMap<K, V, A>,
    range: KeyRange<K>,
}

impl<'a, K, V, A: KeyAnalyzer<K>> SubMap<'a, K, V, A> {
    pub fn get(&self, key: &K) -> Option<&'a V> {
        if !self.range.in_range(self.map.analyzer(), key) {
            return None;
        }
        self.map.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.range.in_range(self.map.analyzer(), key) && self.map.contains_key(key)
    }

    pub fn first_entry(&self) -> Option<(&'a K, &'a V)> {
        self.map.entry_opt(first_in_range(self.map, &self.range))
    }

    pub fn last_entry(&self) -> Option<(&'a K, &'a V)> {
        self.map.entry_opt(last_in_range(self.map, &self.range))
    }

    pub fn first_key(&self) -> Option<&'a K> {
        self.first_entry().map(|(k, _)| k)
    }

    pub fn last_key(&self) -> Option<&'a K> {
        self.last_entry().map(|(k, _)| k)
    }

    pub fn iter(&self) -> RangeIter<'a, K, V, A> {
        range_iter(self.map, &self.range)
    }

    /// Entry count; proportional to the view's size.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Narrows to `[from, to)`. Both bounds must lie within this view.
    pub fn sub_map(&self, from: K, to: K) -> Result<SubMap<'a, K, V, A>, Error>
    where
        K: Clone,
    {
        let range = narrowed(self.map, &self.range, Some(from), Some(to))?;
        Ok(SubMap {
            map: self.map,
            range,
        })
    }

    pub fn head_map(&self, to: K) -> Result<SubMap<'a, K, V, A>, Error>
    where
        K: Clone,
    {
        let range = narrowed(self.map, &self.range, None, Some(to))?;
        Ok(SubMap {
            map: self.map,
            range,
        })
    }

    pub fn tail_map(&self, from: K) -> Result<SubMap<'a, K, V, A>, Error>
    where
        K: Clone,
    {
        let range = narrowed(self.map, &self.range, Some(from), None)?;
        Ok(SubMap {
            map: self.map,
            range,
        })
    }
}

/// Live mutable view over a key interval. Writes outside the bounds fail
/// with [`Error::OutOfRange`]; reads behave like [`SubMap`].
pub struct SubMapMut<'a, K, V, A> {
    map: &'a mut PatriciaMap<K, V, A>,
    range: KeyRange<K>,
}

impl<'a, K, V, A: KeyAnalyzer<K>> SubMapMut<'a, K, V, A> {
    /// Inserts through the view. The key must lie inside the bounds.
    pub fn insert(&mut self, key: K, value: V) -> Result<Option<V>, Error> {
        if !self.range.in_range(self.map.analyzer(), &key) {
            return Err(Error::OutOfRange);
        }
        Ok(self.map.insert(key, value))
    }

    /// Removes through the view. Keys outside the bounds are left alone.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        if !self.range.in_range(self.map.analyzer(), key) {
            return None;
        }
        self.map.remove(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        if !self.range.in_range(self.map.analyzer(), key) {
            return None;
        }
        self.map.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.range.in_range(self.map.analyzer(), key) && self.map.contains_key(key)
    }

    pub fn first_entry(&self) -> Option<(&K, &V)> {
        self.map.entry_opt(first_in_range(self.map, &self.range))
    }

    pub fn last_entry(&self) -> Option<(&K, &V)> {
        self.map.entry_opt(last_in_range(self.map, &self.range))
    }

    pub fn first_key(&self) -> Option<&K> {
        self.first_entry().map(|(k, _)| k)
    }

    pub fn last_key(&self) -> Option<&K> {
        self.last_entry().map(|(k, _)| k)
    }

    pub fn iter(&self) -> RangeIter<'_, K, V, A> {
        range_iter(self.map, &self.range)
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

/// Iterator over a bounded range: walks from the first in-range entry and
/// stops at the excluded end entry.
pub struct RangeIter<'a, K, V, A> {
    map: &'a PatriciaMap<K, V, A>,
    next: NodeId,
    excluded: NodeId,
}

impl<'a, K, V, A: KeyAnalyzer<K>> Iterator for RangeIter<'a, K, V, A> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next.is_none() || self.next == self.excluded {
            return None;
        }
        let id = self.next;
        self.next = self.map.next_entry(id);
        Some(self.map.entry(id))
    }
}
