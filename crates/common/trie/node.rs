use std::sync::Arc;

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

use crate::{TRIE_ALPHABET_SIZE, TRIE_KEY_SIZE};

pub(crate) type NodeRef<V> = Arc<Mutex<TrieNodeBody<V>>>;
pub(crate) type NodeGuard<V> = ArcMutexGuard<RawMutex, TrieNodeBody<V>>;

/// Mutable body of a trie node, guarded by the node's own mutex.
///
/// Branch nodes carry only children (`suffix_start == 0`). Leaves carry the
/// full key in `suffix` with `suffix_start` marking the position at which
/// the leaf diverged from its siblings, plus the stored value.
pub(crate) struct TrieNodeBody<V> {
    pub children: [Option<NodeRef<V>>; TRIE_ALPHABET_SIZE],
    pub value: Option<V>,
    pub suffix: [u8; TRIE_KEY_SIZE],
    pub suffix_start: u8,
}

impl<V> TrieNodeBody<V> {
    pub fn new_branch() -> NodeRef<V> {
        Arc::new(Mutex::new(Self {
            children: std::array::from_fn(|_| None),
            value: None,
            suffix: [0; TRIE_KEY_SIZE],
            suffix_start: 0,
        }))
    }

    pub fn new_leaf(key: [u8; TRIE_KEY_SIZE], suffix_start: usize, value: V) -> NodeRef<V> {
        Arc::new(Mutex::new(Self {
            children: std::array::from_fn(|_| None),
            value: Some(value),
            suffix: key,
            suffix_start: suffix_start as u8,
        }))
    }

    pub fn is_leaf(&self) -> bool {
        self.suffix_start > 0
    }

    /// The full key stored on a leaf.
    pub fn suffix_str(&self) -> &str {
        // SAFETY: `suffix` is filled from a validated key, which only
        // contains ascii lowercase hex digits.
        unsafe { std::str::from_utf8_unchecked(&self.suffix) }
    }
}
