//! # patricia-map
//!
//! A PATRICIA trie: a compressed binary radix tree used as a sorted map
//! over bit-addressable keys.
//!
//! Instead of keeping payload-free internal nodes, PATRICIA stores an entry
//! in every node and encodes leaf positions as *uplinks*: child slots that
//! point back at an ancestor. Lookups, inserts and removals cost one bit
//! comparison per branch, O(B) for B-bit keys, and entries iterate in
//! lexicographic bit order.
//!
//! Beyond the usual ordered-map surface the trie offers two radix-only
//! operations:
//!
//! - **prefix views** ([`PatriciaMap::prefixed_by`]): live submaps over all
//!   keys sharing a bit prefix, and
//! - **XOR-nearest selection** ([`PatriciaMap::select`]): visiting entries
//!   in order of bitwise closeness to a query key.
//!
//! Key access is abstracted behind [`KeyAnalyzer`]; analyzers for `String`
//! (16-bit characters), `Vec<u8>` and `u64` ship with the crate.
//!
//! ```
//! use patricia_map::StringPatriciaMap;
//!
//! let mut map = StringPatriciaMap::default();
//! map.insert("Lime".to_string(), 1);
//! map.insert("LimeWire".to_string(), 2);
//! map.insert("LimeRadio".to_string(), 3);
//!
//! let view = map.prefixed_by("Lime".to_string()).unwrap();
//! let keys: Vec<&String> = view.iter().map(|(k, _)| k).collect();
//! assert_eq!(keys, ["Lime", "LimeRadio", "LimeWire"]);
//! ```

mod analyzer;
mod iter;
mod node;
mod prefix;
mod range;
mod trie;

pub use crate::analyzer::{
    ByteKeyAnalyzer, KeyAnalyzer, StringKeyAnalyzer, U64KeyAnalyzer, EQUAL_BIT_KEY, NULL_BIT_KEY,
};
pub use crate::iter::{EntryWalker, Iter, Keys, Values};
pub use crate::prefix::{PrefixIter, PrefixView, PrefixViewMut};
pub use crate::range::{RangeIter, SubMap, SubMapMut};
pub use crate::trie::PatriciaMap;

/// Trie over `String` keys in UTF-16 code unit order.
pub type StringPatriciaMap<V> = PatriciaMap<String, V, StringKeyAnalyzer>;

/// Trie over byte-vector keys.
pub type BytePatriciaMap<V> = PatriciaMap<Vec<u8>, V, ByteKeyAnalyzer>;

/// Trie over `u64` keys; XOR-nearest selection over it is the Kademlia
/// distance walk.
pub type U64PatriciaMap<V> = PatriciaMap<u64, V, U64KeyAnalyzer>;

/// Verdict a cursor returns for each visited entry during
/// [`PatriciaMap::select_with`] or [`PatriciaMap::traverse`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Proceed to the next entry.
    Continue,
    /// Stop; the entry just visited is the result.
    Exit,
    /// Delete the entry just visited and keep going. Only legal during
    /// `traverse`.
    Remove,
    /// Delete the entry just visited and stop; the result is the detached
    /// pair.
    RemoveAndExit,
}

/// Result of a cursor-driven scan: either a live entry or the detached
/// payload of one the cursor deleted.
#[derive(Debug, PartialEq, Eq)]
pub enum Selection<'a, K, V> {
    /// The entry the cursor stopped on.
    Found(&'a K, &'a V),
    /// The key/value pair removed by [`Decision::RemoveAndExit`]. It no
    /// longer aliases anything in the trie.
    Removed(K, V),
}

impl<'a, K, V> Selection<'a, K, V> {
    pub fn key(&self) -> &K {
        match self {
            Selection::Found(k, _) => k,
            Selection::Removed(k, _) => k,
        }
    }

    pub fn value(&self) -> &V {
        match self {
            Selection::Found(_, v) => v,
            Selection::Removed(_, v) => v,
        }
    }
}

/// Errors surfaced by trie operations. All of them are caller errors and
/// are never retried internally; violated structural invariants panic
/// instead.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A view was asked to store or bound a key outside its range.
    #[error("key out of range for this view")]
    OutOfRange,

    /// A walker observed a structural modification it did not perform.
    #[error("trie was structurally modified during iteration")]
    ConcurrentModification,

    /// [`Decision::Remove`] was returned during a select scan; removal
    /// without exiting is only supported by `traverse`.
    #[error("cannot remove during select")]
    RemoveDuringSelect,

    /// A prefix offset or length did not land on the analyzer's element
    /// grid.
    #[error(
        "offset {offset_in_bits} and length {length_in_bits} must be multiples \
         of the element width {bits_per_element}"
    )]
    NotOnElementBoundary {
        offset_in_bits: i32,
        length_in_bits: i32,
        bits_per_element: i32,
    },

    /// A prefix specification reached past the end of its key.
    #[error(
        "prefix offset {offset_in_bits} + length {length_in_bits} exceeds key \
         length {key_length_in_bits}"
    )]
    PrefixOutOfBounds {
        offset_in_bits: i32,
        length_in_bits: i32,
        key_length_in_bits: i32,
    },
}

#[cfg(test)]
mod proptests;
