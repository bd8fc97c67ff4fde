//! Iteration: borrowing iterators and the detached entry walker.
//!
//! Every iterator is fail-fast: it captures the trie's modification count
//! at creation and compares on each step. For the borrowing iterators the
//! borrow checker already rules out external mutation, so a mismatch there
//! is fatal. The detached [`EntryWalker`] holds no borrow at all -- the map
//! is passed to every call -- which is what makes interleaved mutation
//! expressible, and why it reports drift as an error instead.

use crate::analyzer::KeyAnalyzer;
use crate::node::NodeId;
use crate::trie::PatriciaMap;
use crate::Error;

impl<K, V, A: KeyAnalyzer<K>> PatriciaMap<K, V, A> {
    /// Iterates entries in key order.
    pub fn iter(&self) -> Iter<'_, K, V, A> {
        Iter {
            map: self,
            walker: self.walker(),
        }
    }

    /// Iterates keys in order.
    pub fn keys(&self) -> Keys<'_, K, V, A> {
        Keys { inner: self.iter() }
    }

    /// Iterates values in key order.
    pub fn values(&self) -> Values<'_, K, V, A> {
        Values { inner: self.iter() }
    }

    /// A detached cursor over the entries in key order. Unlike [`Self::iter`]
    /// it borrows nothing: the map is passed to every call, so the map can
    /// be mutated between steps -- the walker then fails with
    /// [`Error::ConcurrentModification`] instead of walking freed slots.
    pub fn walker(&self) -> EntryWalker {
        EntryWalker {
            next: self.first_entry_id(),
            current: NodeId::NONE,
            expected_mod_count: self.mod_count,
        }
    }
}

/// Detached fail-fast cursor. Must only be passed the map that created it;
/// handing it a different map yields unspecified (but memory-safe) results.
///
/// ```
/// use patricia_map::StringPatriciaMap;
///
/// let mut map = StringPatriciaMap::default();
/// map.insert("a".to_string(), 1);
/// map.insert("b".to_string(), 2);
///
/// let mut walker = map.walker();
/// while let Some((_k, _v)) = walker.next(&map).unwrap() {
///     // the map is not borrowed here
/// }
/// ```
#[derive(Clone, Debug)]
pub struct EntryWalker {
    next: NodeId,
    current: NodeId,
    expected_mod_count: u64,
}

impl EntryWalker {
    /// Advances to the next entry, or reports that the map was structurally
    /// modified since this walker last observed it.
    pub fn next<'a, K, V, A: KeyAnalyzer<K>>(
        &mut self,
        map: &'a PatriciaMap<K, V, A>,
    ) -> Result<Option<(&'a K, &'a V)>, Error> {
        self.check(map)?;
        if self.next.is_none() {
            self.current = NodeId::NONE;
            return Ok(None);
        }
        let id = self.next;
        self.next = map.next_entry(id);
        self.current = id;
        Ok(Some(map.entry(id)))
    }

    /// Removes the entry most recently returned by [`Self::next`] and
    /// returns its value; `None` when there is no current entry. The
    /// walker's expected modification count moves in lockstep, so its own
    /// removals never trip the fail-fast.
    pub fn remove<K, V, A: KeyAnalyzer<K>>(
        &mut self,
        map: &mut PatriciaMap<K, V, A>,
    ) -> Result<Option<V>, Error> {
        self.check(map)?;
        if self.current.is_none() {
            return Ok(None);
        }
        let id = self.current;
        self.current = NodeId::NONE;
        let (_, value) = map.remove_entry(id);
        self.expected_mod_count = map.mod_count;
        Ok(Some(value))
    }

    #[inline]
    fn check<K, V, A: KeyAnalyzer<K>>(&self, map: &PatriciaMap<K, V, A>) -> Result<(), Error> {
        if self.expected_mod_count != map.mod_count {
            return Err(Error::ConcurrentModification);
        }
        Ok(())
    }
}

/// Borrowing entry iterator.
pub struct Iter<'a, K, V, A> {
    map: &'a PatriciaMap<K, V, A>,
    walker: EntryWalker,
}

impl<'a, K, V, A: KeyAnalyzer<K>> Iterator for Iter<'a, K, V, A> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.walker
            .next(self.map)
            .expect("trie modified during iteration")
    }
}

/// Borrowing key iterator.
pub struct Keys<'a, K, V, A> {
    inner: Iter<'a, K, V, A>,
}

impl<'a, K, V, A: KeyAnalyzer<K>> Iterator for Keys<'a, K, V, A> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, _)| k)
    }
}

/// Borrowing value iterator.
pub struct Values<'a, K, V, A> {
    inner: Iter<'a, K, V, A>,
}

impl<'a, K, V, A: KeyAnalyzer<K>> Iterator for Values<'a, K, V, A> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }
}

impl<'a, K, V, A: KeyAnalyzer<K>> IntoIterator for &'a PatriciaMap<K, V, A> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V, A>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
