//! Concurrent prefix tree mapping handles to mergeable values.
//!
//! This is essentially a map from 32-hex-digit handles to objects of a
//! value type, stored as a radix tree over the 16-symbol hex alphabet.
//! When a (key, value) pair is inserted and the key is already present,
//! [`TrieValue::merge`] on the stored value decides the outcome.
//!
//! Every node carries its own mutex and walks lock-couple ("crabbing"):
//! writers hold the current node and its parent while restructuring,
//! readers release a lock only after acquiring the next one. Locks are
//! always taken parent before child, which rules out deadlocks between
//! concurrent walks.

pub mod error;
mod node;

use std::sync::Arc;

pub use error::TrieError;
use node::{NodeGuard, NodeRef, TrieNodeBody};

/// Number of child slots per node (lowercase hex alphabet).
pub const TRIE_ALPHABET_SIZE: usize = 16;

/// Fixed key size: the number of hex characters in a handle.
pub const TRIE_KEY_SIZE: usize = das_common::constants::HANDLE_HASH_SIZE;

const INVALID_SLOT: u8 = 0xff;

/// Child-slot translation table: hex character -> slot index.
/// Uppercase folds onto the same slot as lowercase.
static TLB: [u8; 256] = build_tlb();

const fn build_tlb() -> [u8; 256] {
    let mut table = [INVALID_SLOT; 256];
    let mut i = 0;
    while i < 10 {
        table[b'0' as usize + i] = i as u8;
        i += 1;
    }
    let mut j = 0;
    while j < 6 {
        table[b'a' as usize + j] = 10 + j as u8;
        table[b'A' as usize + j] = 10 + j as u8;
        j += 1;
    }
    table
}

fn validate_key(key: &str) -> Result<[u8; TRIE_KEY_SIZE], TrieError> {
    let bytes = key.as_bytes();
    if bytes.len() != TRIE_KEY_SIZE {
        return Err(TrieError::InvalidKeySize(bytes.len()));
    }
    let mut normalized = [0u8; TRIE_KEY_SIZE];
    for (slot, &b) in normalized.iter_mut().zip(bytes) {
        if TLB[b as usize] == INVALID_SLOT {
            return Err(TrieError::InvalidKeyChar(b as char));
        }
        *slot = b.to_ascii_lowercase();
    }
    Ok(normalized)
}

/// Contract for objects stored as trie values.
pub trait TrieValue: Send {
    /// Called on the stored value when its key is inserted again.
    fn merge(&mut self, other: Self);
}

/// Concurrent map handle -> value backed by a prefix tree.
pub struct HandleTrie<V> {
    root: NodeRef<V>,
}

impl<V: TrieValue> Default for HandleTrie<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: TrieValue> HandleTrie<V> {
    pub fn new() -> Self {
        Self {
            root: TrieNodeBody::new_branch(),
        }
    }

    /// Inserts a new key or merges its value when the key already exists.
    ///
    /// Returns the value stored after the insertion (and the eventual
    /// merge) is processed.
    pub fn insert(&self, key: &str, value: V) -> Result<V, TrieError>
    where
        V: Clone,
    {
        let key = validate_key(key)?;
        let mut cursor: NodeRef<V> = Arc::clone(&self.root);
        let mut cursor_guard: NodeGuard<V> = cursor.lock_arc();
        let mut parent_guard: Option<NodeGuard<V>> = None;
        let mut key_cursor = 0usize;
        loop {
            let slot = TLB[key[key_cursor] as usize] as usize;
            if cursor_guard.children[slot].is_none() {
                if cursor_guard.is_leaf() {
                    // The cursor is an existing leaf sharing a prefix with
                    // the new key. The parent holds it at the slot keyed
                    // by the previous symbol.
                    let pred_slot = TLB[key[key_cursor - 1] as usize] as usize;
                    let Some(mut parent) = parent_guard.take() else {
                        unreachable!("leaf node at trie root");
                    };
                    if key[key_cursor] == cursor_guard.suffix[key_cursor] {
                        // Same next symbol: push the leaf one level down
                        // under a fresh branch node and keep walking.
                        let branch = TrieNodeBody::new_branch();
                        let mut branch_guard = branch.lock_arc();
                        branch_guard.children[slot] = Some(Arc::clone(&cursor));
                        cursor_guard.suffix_start += 1;
                        parent.children[pred_slot] = Some(branch);
                        drop(parent);
                        parent_guard = Some(branch_guard);
                        key_cursor += 1;
                    } else {
                        // Diverging symbol: split into a branch holding
                        // both the old leaf and a new one.
                        let stored = value.clone();
                        let leaf = TrieNodeBody::new_leaf(key, key_cursor + 1, value);
                        let cursor_slot =
                            TLB[cursor_guard.suffix[cursor_guard.suffix_start as usize] as usize]
                                as usize;
                        cursor_guard.suffix_start += 1;
                        let branch = TrieNodeBody::new_branch();
                        {
                            let mut branch_body = branch.lock();
                            branch_body.children[slot] = Some(leaf);
                            branch_body.children[cursor_slot] = Some(Arc::clone(&cursor));
                        }
                        parent.children[pred_slot] = Some(branch);
                        drop(parent);
                        drop(cursor_guard);
                        return Ok(stored);
                    }
                } else {
                    // Branch node with a free slot: attach a new leaf.
                    let stored = value.clone();
                    cursor_guard.children[slot] =
                        Some(TrieNodeBody::new_leaf(key, key_cursor + 1, value));
                    return Ok(stored);
                }
            } else {
                // Descend: the current node becomes the parent and stays
                // locked while the child lock is acquired.
                let child = match &cursor_guard.children[slot] {
                    Some(child) => Arc::clone(child),
                    None => unreachable!("checked above"),
                };
                parent_guard = Some(cursor_guard);
                cursor_guard = child.lock_arc();
                cursor = child;
                if cursor_guard.is_leaf() && cursor_guard.suffix[key_cursor..] == key[key_cursor..]
                {
                    // Key already present: merge on the stored value.
                    let merged = match cursor_guard.value.take() {
                        Some(mut existing) => {
                            existing.merge(value);
                            existing
                        }
                        None => value,
                    };
                    let stored = merged.clone();
                    cursor_guard.value = Some(merged);
                    return Ok(stored);
                }
                key_cursor += 1;
            }
        }
    }

    /// Looks up the value stored at `key`.
    pub fn lookup(&self, key: &str) -> Result<Option<V>, TrieError>
    where
        V: Clone,
    {
        let key = validate_key(key)?;
        let mut guard = self.root.lock_arc();
        let mut key_cursor = 0usize;
        loop {
            if guard.is_leaf() {
                let found = guard.suffix[key_cursor..] == key[key_cursor..];
                return Ok(if found { guard.value.clone() } else { None });
            }
            let slot = TLB[key[key_cursor] as usize] as usize;
            let child = match &guard.children[slot] {
                Some(child) => Arc::clone(child),
                None => return Ok(None),
            };
            // Acquire the child before releasing the current node.
            let child_guard = child.lock_arc();
            guard = child_guard;
            key_cursor += 1;
        }
    }

    /// Clears the value slot on the matching leaf, returning the stored
    /// value. The leaf itself remains; empty subtrees are not reclaimed.
    pub fn remove(&self, key: &str) -> Result<Option<V>, TrieError> {
        let key = validate_key(key)?;
        let mut guard = self.root.lock_arc();
        let mut key_cursor = 0usize;
        loop {
            if guard.is_leaf() {
                if guard.suffix[key_cursor..] == key[key_cursor..] {
                    return Ok(guard.value.take());
                }
                return Ok(None);
            }
            let slot = TLB[key[key_cursor] as usize] as usize;
            let child = match &guard.children[slot] {
                Some(child) => Arc::clone(child),
                None => return Ok(None),
            };
            let child_guard = child.lock_arc();
            guard = child_guard;
            key_cursor += 1;
        }
    }

    /// In-order traversal calling `visit` once per stored value.
    ///
    /// Returning true from `visit` aborts the traversal immediately. With
    /// `keep_root_locked` the root mutex is held until the traversal ends,
    /// serializing it against every other walk of this trie.
    pub fn traverse<F>(&self, keep_root_locked: bool, mut visit: F)
    where
        F: FnMut(&str, &mut V) -> bool,
    {
        let mut root_guard: Option<NodeGuard<V>> = None;
        let mut stack: Vec<NodeRef<V>> = vec![Arc::clone(&self.root)];
        while let Some(cursor) = stack.pop() {
            let is_root = Arc::ptr_eq(&cursor, &self.root);
            let mut guard = cursor.lock_arc();
            let body = &mut *guard;
            if body.is_leaf() {
                if let Some(value) = body.value.as_mut() {
                    let key = {
                        // Borrow the suffix separately from the value.
                        // SAFETY: suffix always holds validated ascii hex.
                        unsafe { std::str::from_utf8_unchecked(&body.suffix) }
                    };
                    if visit(key, value) {
                        return;
                    }
                }
            } else {
                for slot in (0..TRIE_ALPHABET_SIZE).rev() {
                    if let Some(child) = &body.children[slot] {
                        stack.push(Arc::clone(child));
                    }
                }
            }
            if keep_root_locked && is_root {
                root_guard = Some(guard);
            }
        }
        drop(root_guard);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::distributions::{Distribution, Uniform};
    use rand::Rng;
    use std::collections::BTreeMap;
    use std::thread;

    /// Value type counting how many times its key was inserted.
    #[derive(Debug, Clone, PartialEq, Eq)]
    struct AccumulatorValue {
        count: u32,
    }

    impl AccumulatorValue {
        fn new() -> Self {
            Self { count: 1 }
        }
    }

    impl TrieValue for AccumulatorValue {
        fn merge(&mut self, other: Self) {
            self.count += other.count;
        }
    }

    fn key_from(prefix: &str) -> String {
        assert!(prefix.len() <= TRIE_KEY_SIZE);
        let mut key = String::from(prefix);
        key.push_str(&"0".repeat(TRIE_KEY_SIZE - prefix.len()));
        key
    }

    fn random_key<R: Rng>(rng: &mut R) -> String {
        let digits = Uniform::from(0..16u32);
        (0..TRIE_KEY_SIZE)
            .map(|_| char::from_digit(digits.sample(rng), 16).expect("hex digit"))
            .collect()
    }

    #[test]
    fn insert_and_lookup() {
        let trie = HandleTrie::new();
        let k1 = key_from("abc");
        let k2 = key_from("abd");
        trie.insert(&k1, AccumulatorValue::new()).unwrap();
        trie.insert(&k2, AccumulatorValue::new()).unwrap();
        assert_eq!(trie.lookup(&k1).unwrap(), Some(AccumulatorValue::new()));
        assert_eq!(trie.lookup(&k2).unwrap(), Some(AccumulatorValue::new()));
        assert_eq!(trie.lookup(&key_from("abe")).unwrap(), None);
    }

    #[test]
    fn repeated_insert_merges() {
        let trie = HandleTrie::new();
        let key = key_from("f00");
        for expected in 1..=5u32 {
            let stored = trie.insert(&key, AccumulatorValue::new()).unwrap();
            assert_eq!(stored.count, expected);
        }
        assert_eq!(trie.lookup(&key).unwrap().map(|v| v.count), Some(5));
    }

    #[test]
    fn shared_prefixes_split_correctly() {
        let trie = HandleTrie::new();
        let keys = [
            key_from("0000"),
            key_from("0001"),
            key_from("001"),
            key_from("01"),
            key_from("1"),
            "0".repeat(TRIE_KEY_SIZE),
        ];
        for key in &keys {
            trie.insert(key, AccumulatorValue::new()).unwrap();
        }
        // "0000..." and the all-zeroes key are the same string.
        assert_eq!(trie.lookup(&keys[0]).unwrap().map(|v| v.count), Some(2));
        for key in &keys[1..5] {
            assert_eq!(trie.lookup(key).unwrap().map(|v| v.count), Some(1));
        }
    }

    #[test]
    fn uppercase_keys_fold() {
        let trie = HandleTrie::new();
        let lower = key_from("abcdef");
        let upper = key_from("ABCDEF");
        trie.insert(&lower, AccumulatorValue::new()).unwrap();
        let stored = trie.insert(&upper, AccumulatorValue::new()).unwrap();
        assert_eq!(stored.count, 2);
        assert_eq!(trie.lookup(&upper).unwrap().map(|v| v.count), Some(2));
    }

    #[test]
    fn remove_clears_the_value() {
        let trie = HandleTrie::new();
        let key = key_from("dead");
        trie.insert(&key, AccumulatorValue::new()).unwrap();
        assert_eq!(trie.remove(&key).unwrap().map(|v| v.count), Some(1));
        assert_eq!(trie.lookup(&key).unwrap(), None);
        assert_eq!(trie.remove(&key).unwrap(), None);
        // Reinsertion after removal starts a fresh accumulator.
        let stored = trie.insert(&key, AccumulatorValue::new()).unwrap();
        assert_eq!(stored.count, 1);
    }

    #[test]
    fn key_preconditions() {
        let trie: HandleTrie<AccumulatorValue> = HandleTrie::new();
        assert_eq!(
            trie.lookup("beef").unwrap_err(),
            TrieError::InvalidKeySize(4)
        );
        let bad = format!("g{}", "0".repeat(TRIE_KEY_SIZE - 1));
        assert_eq!(trie.lookup(&bad).unwrap_err(), TrieError::InvalidKeyChar('g'));
    }

    #[test]
    fn traverse_visits_keys_in_order() {
        let trie = HandleTrie::new();
        let mut keys: Vec<String> = (0..64)
            .map(|i| key_from(&format!("{i:02x}")))
            .collect();
        for key in &keys {
            trie.insert(key, AccumulatorValue::new()).unwrap();
        }
        let mut visited = Vec::new();
        trie.traverse(false, |key, _| {
            visited.push(key.to_owned());
            false
        });
        keys.sort();
        assert_eq!(visited, keys);
    }

    #[test]
    fn traverse_aborts_when_visit_returns_true() {
        let trie = HandleTrie::new();
        for i in 0..16 {
            trie.insert(&key_from(&format!("{i:x}")), AccumulatorValue::new())
                .unwrap();
        }
        let mut visited = 0;
        trie.traverse(true, |_, _| {
            visited += 1;
            visited == 3
        });
        assert_eq!(visited, 3);
    }

    #[test]
    fn traverse_can_mutate_values() {
        let trie = HandleTrie::new();
        for i in 0..8 {
            trie.insert(&key_from(&format!("{i:x}")), AccumulatorValue::new())
                .unwrap();
        }
        trie.traverse(true, |_, value| {
            value.count += 10;
            false
        });
        for i in 0..8 {
            let key = key_from(&format!("{i:x}"));
            assert_eq!(trie.lookup(&key).unwrap().map(|v| v.count), Some(11));
        }
    }

    #[test]
    fn concurrent_inserts_preserve_counts() {
        let trie = std::sync::Arc::new(HandleTrie::new());
        let keys: Vec<String> = (0..256).map(|i| key_from(&format!("{i:02x}"))).collect();
        let mut workers = Vec::new();
        for _ in 0..8 {
            let trie = std::sync::Arc::clone(&trie);
            let keys = keys.clone();
            workers.push(thread::spawn(move || {
                for key in &keys {
                    trie.insert(key, AccumulatorValue::new()).expect("insert");
                }
            }));
        }
        for worker in workers {
            worker.join().expect("worker panicked");
        }
        for key in &keys {
            assert_eq!(trie.lookup(key).unwrap().map(|v| v.count), Some(8));
        }
    }

    #[test]
    fn readers_run_against_concurrent_writers() {
        let trie = std::sync::Arc::new(HandleTrie::new());
        let keys: Vec<String> = (0..512).map(|i| key_from(&format!("{i:03x}"))).collect();
        let writer_trie = std::sync::Arc::clone(&trie);
        let writer_keys = keys.clone();
        let writer = thread::spawn(move || {
            for key in &writer_keys {
                writer_trie.insert(key, AccumulatorValue::new()).expect("insert");
            }
        });
        // Readers must never observe a torn node, only present-or-absent.
        let mut readers = Vec::new();
        for _ in 0..4 {
            let trie = std::sync::Arc::clone(&trie);
            let keys = keys.clone();
            readers.push(thread::spawn(move || {
                for key in &keys {
                    if let Some(value) = trie.lookup(key).expect("lookup") {
                        assert_eq!(value.count, 1);
                    }
                }
            }));
        }
        writer.join().expect("writer panicked");
        for reader in readers {
            reader.join().expect("reader panicked");
        }
        for key in &keys {
            assert_eq!(trie.lookup(key).expect("lookup").map(|v| v.count), Some(1));
        }
    }

    fn stress(insertions: usize) {
        let trie = HandleTrie::new();
        let mut rng = rand::thread_rng();
        let mut observed: BTreeMap<String, u32> = BTreeMap::new();
        let mut pool: Vec<String> = Vec::new();
        for _ in 0..insertions {
            // Roughly 10% of the keys repeat an earlier one.
            let key = if !pool.is_empty() && rng.gen_bool(0.1) {
                pool[rng.gen_range(0..pool.len())].clone()
            } else {
                let key = random_key(&mut rng);
                pool.push(key.clone());
                key
            };
            trie.insert(&key, AccumulatorValue::new()).expect("insert");
            *observed.entry(key).or_insert(0) += 1;
        }
        for (key, count) in &observed {
            assert_eq!(trie.lookup(key).unwrap().map(|v| v.count), Some(*count));
        }
    }

    #[test]
    fn stress_small() {
        stress(10_000);
    }

    #[test]
    #[ignore = "million-key stress run"]
    fn stress_large() {
        stress(1_000_000);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_key() -> impl Strategy<Value = String> {
            proptest::collection::vec(0u8..16, TRIE_KEY_SIZE).prop_map(|digits| {
                digits
                    .into_iter()
                    .map(|d| char::from_digit(u32::from(d), 16).expect("hex digit"))
                    .collect()
            })
        }

        proptest! {
            #[test]
            fn behaves_like_a_map(keys in proptest::collection::vec(arb_key(), 1..200)) {
                let trie = HandleTrie::new();
                let mut model: BTreeMap<String, u32> = BTreeMap::new();
                for key in &keys {
                    trie.insert(key, AccumulatorValue::new()).expect("insert");
                    *model.entry(key.clone()).or_insert(0) += 1;
                }
                for (key, count) in &model {
                    prop_assert_eq!(trie.lookup(key).expect("lookup").map(|v| v.count), Some(*count));
                }
                let mut visited = Vec::new();
                trie.traverse(false, |key, value| {
                    visited.push((key.to_owned(), value.count));
                    false
                });
                let expected: Vec<(String, u32)> =
                    model.iter().map(|(k, v)| (k.clone(), *v)).collect();
                prop_assert_eq!(visited, expected);
            }
        }
    }
}
