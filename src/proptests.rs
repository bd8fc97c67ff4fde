use std::collections::BTreeMap;

use proptest::prelude::*;
use proptest_derive::Arbitrary;

use crate::analyzer::KeyAnalyzer;
use crate::{Decision, StringPatriciaMap};

/// Model implementation using BTreeMap for comparison. Keys are kept to
/// printable ASCII so that byte order, UTF-16 order and bit order all
/// coincide and no key is another's zero-padded twin.
#[derive(Default, Clone)]
struct Model {
    map: BTreeMap<String, u64>,
}

impl Model {
    fn insert(&mut self, key: String, value: u64) -> Option<u64> {
        self.map.insert(key, value)
    }

    fn get(&self, key: &String) -> Option<&u64> {
        self.map.get(key)
    }

    fn remove(&mut self, key: &String) -> Option<u64> {
        self.map.remove(key)
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

/// Actions to run against both implementations.
#[derive(Arbitrary, Debug, Clone)]
enum Action {
    Insert(KeyValue),
    Get(Key),
    Remove(Key),
    RemoveViaTraverse(Key),
    CheckOrder,
    CheckPrefix(Key),
    CheckRange(Key, Key),
    CheckNeighbors(Key),
}

/// Wrapper for key generation with a custom strategy.
#[derive(Debug, Clone)]
struct Key(String);

/// Wrapper for a key-value pair.
#[derive(Debug, Clone)]
struct KeyValue {
    key: Key,
    value: u64,
}

impl Arbitrary for Key {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        prop_oneof![
            // The empty key lives on the root node.
            Just(Key(String::new())),
            // Short dense keys to force shared structure.
            "[ab]{1,4}".prop_map(Key),
            "[a-e]{1,6}".prop_map(Key),
            // Longer keys with shared prefixes.
            "[a-d]{1,3}".prop_map(|prefix| Key(format!("{prefix}/suffix"))),
        ]
        .boxed()
    }
}

impl Arbitrary for KeyValue {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (any::<Key>(), any::<u64>())
            .prop_map(|(key, value)| KeyValue { key, value })
            .boxed()
    }
}

/// Test harness that executes actions on both the trie and the model.
#[derive(Default)]
struct Test {
    trie: StringPatriciaMap<u64>,
    model: Model,
}

impl Test {
    fn execute(&mut self, action: Action) {
        match action {
            Action::Insert(kv) => {
                let key = kv.key.0;
                let trie_result = self.trie.insert(key.clone(), kv.value);
                let model_result = self.model.insert(key.clone(), kv.value);
                prop_assert_helper(trie_result == model_result, "insert", &key);
            }
            Action::Get(key) => {
                let key = key.0;
                prop_assert_helper(
                    self.trie.get(&key) == self.model.get(&key),
                    "get",
                    &key,
                );
            }
            Action::Remove(key) => {
                let key = key.0;
                let trie_result = self.trie.remove(&key);
                let model_result = self.model.remove(&key);
                prop_assert_helper(trie_result == model_result, "remove", &key);
            }
            Action::RemoveViaTraverse(key) => {
                // Removing through the cursor must agree with a plain
                // remove.
                let key = key.0;
                let target = key.clone();
                let _ = self.trie.traverse(|k, _| {
                    if *k == target {
                        Decision::Remove
                    } else {
                        Decision::Continue
                    }
                });
                self.model.remove(&key);
            }
            Action::CheckOrder => {
                let got: Vec<&String> = self.trie.keys().collect();
                let expected: Vec<&String> = self.model.map.keys().collect();
                assert_eq!(got, expected, "iteration order diverged");
            }
            Action::CheckPrefix(prefix) => {
                let prefix = prefix.0;
                if prefix.is_empty() {
                    return;
                }
                let view = self
                    .trie
                    .prefixed_by(prefix.clone())
                    .expect("aligned prefix");
                let got: Vec<&String> = view.iter().map(|(k, _)| k).collect();
                let expected: Vec<&String> = self
                    .model
                    .map
                    .keys()
                    .filter(|k| k.starts_with(&prefix))
                    .collect();
                assert_eq!(got, expected, "prefix view for {prefix:?} diverged");
                assert_eq!(view.first_key(), expected.first().copied());
                assert_eq!(view.last_key(), expected.last().copied());
                assert_eq!(view.len(), expected.len());
            }
            Action::CheckRange(from, to) => {
                let (mut from, mut to) = (from.0, to.0);
                if self.trie.analyzer().compare(&from, &to).is_gt() {
                    std::mem::swap(&mut from, &mut to);
                }
                let view = match self.trie.sub_map(from.clone(), to.clone()) {
                    Ok(view) => view,
                    Err(_) => return,
                };
                let got: Vec<&String> = view.iter().map(|(k, _)| k).collect();
                let expected: Vec<&String> =
                    self.model.map.range(from.clone()..to.clone()).map(|(k, _)| k).collect();
                assert_eq!(got, expected, "sub map [{from:?}, {to:?}) diverged");
                assert_eq!(view.first_key(), expected.first().copied());
                assert_eq!(view.last_key(), expected.last().copied());
            }
            Action::CheckNeighbors(key) => {
                use std::ops::Bound;
                let key = key.0;
                if key.is_empty() {
                    return;
                }
                let ceiling = self.model.map.range(key.clone()..).next().map(|(k, _)| k);
                let higher = self
                    .model
                    .map
                    .range((Bound::Excluded(key.clone()), Bound::Unbounded))
                    .next()
                    .map(|(k, _)| k);
                let floor = self.model.map.range(..=key.clone()).next_back().map(|(k, _)| k);
                let lower = self.model.map.range(..key.clone()).next_back().map(|(k, _)| k);
                assert_eq!(self.trie.ceiling_entry(&key).map(|(k, _)| k), ceiling);
                assert_eq!(self.trie.higher_entry(&key).map(|(k, _)| k), higher);
                assert_eq!(self.trie.floor_entry(&key).map(|(k, _)| k), floor);
                assert_eq!(self.trie.lower_entry(&key).map(|(k, _)| k), lower);
            }
        }

        assert_eq!(
            self.trie.len(),
            self.model.len(),
            "length mismatch after action"
        );
        assert_eq!(self.trie.is_empty(), self.model.map.is_empty());
    }
}

fn prop_assert_helper(ok: bool, op: &str, key: &str) {
    assert!(ok, "{op} mismatch for key {key:?}");
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn proptest_vs_btreemap(actions in prop::collection::vec(any::<Action>(), 1..64)) {
        let mut test = Test::default();
        for action in actions {
            test.execute(action);
        }
    }

    #[test]
    fn proptest_insert_remove_roundtrip(
        base in prop::collection::vec(any::<KeyValue>(), 0..24),
        extra in any::<KeyValue>(),
    ) {
        let mut trie = StringPatriciaMap::default();
        for kv in &base {
            trie.insert(kv.key.0.clone(), kv.value);
        }
        let before: Vec<(String, u64)> = trie.iter().map(|(k, v)| (k.clone(), *v)).collect();

        // Inserting a fresh key and removing it restores the sequence.
        if trie.get(&extra.key.0).is_none() {
            trie.insert(extra.key.0.clone(), extra.value);
            trie.remove(&extra.key.0);
            let after: Vec<(String, u64)> = trie.iter().map(|(k, v)| (k.clone(), *v)).collect();
            prop_assert_eq!(before, after);
        }
    }

    #[test]
    fn proptest_clear_and_rebuild(entries in prop::collection::vec(any::<KeyValue>(), 0..24)) {
        let mut trie = StringPatriciaMap::default();
        for kv in &entries {
            trie.insert(kv.key.0.clone(), kv.value);
        }
        let before: Vec<(String, u64)> = trie.iter().map(|(k, v)| (k.clone(), *v)).collect();

        trie.clear();
        prop_assert!(trie.is_empty());
        for kv in &entries {
            trie.insert(kv.key.0.clone(), kv.value);
        }
        let after: Vec<(String, u64)> = trie.iter().map(|(k, v)| (k.clone(), *v)).collect();
        prop_assert_eq!(before, after);
    }
}
