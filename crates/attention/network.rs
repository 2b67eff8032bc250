//! Asymmetric Hebbian network with only direct hebbian links.
//!
//! A Hebbian network is a directed graph whose edge A->B weights estimate
//! the probability of B being present in a query answer given that A is.
//! Nodes live in a [`HandleTrie`]; each node's value object carries
//! another trie keyed by the neighbour's handle, so edge lookup is a
//! two-level walk.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use das_common::Handle;
use das_trie::{HandleTrie, TrieValue};
use parking_lot::{Mutex, MutexGuard};

use crate::error::AttentionError;

pub type ImportanceType = f64;

/// Mutable scalars of a node, guarded by the node's own lock.
#[derive(Debug, Clone, Copy)]
pub struct NodeState {
    /// Number of neighbours of this node.
    pub arity: u32,
    /// How many times this node was observed.
    pub count: u32,
    pub importance: ImportanceType,
    /// Amount of importance this node will spread in the next cycle.
    pub stimuli_to_spread: ImportanceType,
}

pub struct HebbianNode {
    state: Mutex<NodeState>,
    neighbors: HandleTrie<EdgeValue>,
}

impl HebbianNode {
    fn new() -> Self {
        Self {
            state: Mutex::new(NodeState {
                arity: 0,
                count: 1,
                importance: 0.0,
                stimuli_to_spread: 0.0,
            }),
            neighbors: HandleTrie::new(),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock()
    }

    pub fn count(&self) -> u32 {
        self.state.lock().count
    }

    pub fn importance(&self) -> ImportanceType {
        self.state.lock().importance
    }

    pub fn neighbors(&self) -> &HandleTrie<EdgeValue> {
        &self.neighbors
    }
}

/// Node record stored as a trie value. Merging on re-insertion folds the
/// fresh record's count and importance into the record already stored.
#[derive(Clone)]
pub struct NodeValue(pub Arc<HebbianNode>);

impl TrieValue for NodeValue {
    fn merge(&mut self, other: Self) {
        let (other_count, other_importance) = {
            let state = other.0.state.lock();
            (state.count, state.importance)
        };
        let mut state = self.0.state.lock();
        state.count += other_count;
        state.importance += other_importance;
    }
}

pub struct HebbianEdge {
    count: AtomicU32,
    source: Arc<HebbianNode>,
    target: Arc<HebbianNode>,
}

impl HebbianEdge {
    fn new(source: Arc<HebbianNode>, target: Arc<HebbianNode>) -> Self {
        Self {
            count: AtomicU32::new(1),
            source,
            target,
        }
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn source(&self) -> &Arc<HebbianNode> {
        &self.source
    }

    pub fn target(&self) -> &Arc<HebbianNode> {
        &self.target
    }
}

/// Edge record stored as a trie value; merged by adding counts.
#[derive(Clone)]
pub struct EdgeValue(pub Arc<HebbianEdge>);

impl TrieValue for EdgeValue {
    fn merge(&mut self, other: Self) {
        self.0
            .count
            .fetch_add(other.0.count.load(Ordering::Relaxed), Ordering::Relaxed);
    }
}

pub struct HebbianNetwork {
    nodes: HandleTrie<NodeValue>,
    largest_arity: Mutex<u32>,
    tokens_to_distribute: Mutex<ImportanceType>,
}

impl HebbianNetwork {
    /// A fresh network is seeded with one unit of importance tokens.
    pub fn new() -> Self {
        Self {
            nodes: HandleTrie::new(),
            largest_arity: Mutex::new(0),
            tokens_to_distribute: Mutex::new(1.0),
        }
    }

    /// Adds a node or bumps its count when it already exists.
    pub fn add_node(&self, handle: &Handle) -> Result<Arc<HebbianNode>, AttentionError> {
        let stored = self
            .nodes
            .insert(handle.as_str(), NodeValue(Arc::new(HebbianNode::new())))?;
        Ok(stored.0)
    }

    /// Adds the directed edge `source -> target`, bumping its count when
    /// it already exists. The first insertion increments the source's
    /// arity and possibly the network-wide largest arity.
    pub fn add_asymmetric_edge(
        &self,
        target_handle: &Handle,
        source: &Arc<HebbianNode>,
        target: &Arc<HebbianNode>,
    ) -> Result<Arc<HebbianEdge>, AttentionError> {
        let edge = source
            .neighbors
            .insert(
                target_handle.as_str(),
                EdgeValue(Arc::new(HebbianEdge::new(
                    Arc::clone(source),
                    Arc::clone(target),
                ))),
            )?
            .0;
        if edge.count() == 1 {
            let arity = {
                let mut state = source.state.lock();
                state.arity += 1;
                state.arity
            };
            let mut largest = self.largest_arity.lock();
            if arity > *largest {
                *largest = arity;
            }
        }
        Ok(edge)
    }

    /// Adds both `h1 -> h2` and `h2 -> h1`.
    pub fn add_symmetric_edge(
        &self,
        handle1: &Handle,
        handle2: &Handle,
        node1: &Arc<HebbianNode>,
        node2: &Arc<HebbianNode>,
    ) -> Result<(), AttentionError> {
        self.add_asymmetric_edge(handle2, node1, node2)?;
        self.add_asymmetric_edge(handle1, node2, node1)?;
        Ok(())
    }

    pub fn lookup_node(&self, handle: &Handle) -> Option<Arc<HebbianNode>> {
        self.nodes
            .lookup(handle.as_str())
            .ok()
            .flatten()
            .map(|value| value.0)
    }

    pub fn get_node_count(&self, handle: &Handle) -> u32 {
        self.lookup_node(handle).map_or(0, |node| node.count())
    }

    pub fn get_node_importance(&self, handle: &Handle) -> ImportanceType {
        self.lookup_node(handle)
            .map_or(0.0, |node| node.importance())
    }

    pub fn get_asymmetric_edge_count(&self, handle1: &Handle, handle2: &Handle) -> u32 {
        self.lookup_node(handle1)
            .and_then(|source| source.neighbors.lookup(handle2.as_str()).ok().flatten())
            .map_or(0, |edge| edge.0.count())
    }

    pub fn largest_arity(&self) -> u32 {
        *self.largest_arity.lock()
    }

    /// Atomically takes the accumulated tokens, leaving zero behind.
    pub fn alienate_tokens(&self) -> ImportanceType {
        let mut tokens = self.tokens_to_distribute.lock();
        std::mem::replace(&mut *tokens, 0.0)
    }

    pub fn tokens_to_distribute(&self) -> ImportanceType {
        *self.tokens_to_distribute.lock()
    }

    /// Walks the node trie calling `visit` once per node. With
    /// `keep_root_locked` the walk is serialized against every other
    /// traversal of this network.
    pub fn visit_nodes<F>(&self, keep_root_locked: bool, mut visit: F)
    where
        F: FnMut(&str, &Arc<HebbianNode>) -> bool,
    {
        self.nodes
            .traverse(keep_root_locked, |key, value| visit(key, &value.0));
    }
}

impl Default for HebbianNetwork {
    fn default() -> Self {
        Self::new()
    }
}
