//! Hebbian network updater fed by correlation events.

use std::sync::Arc;

use das_common::Handle;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::AttentionError;
use crate::network::{HebbianNetwork, HebbianNode};

/// Updater keeping exact co-occurrence counts.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExactCountUpdater;

impl ExactCountUpdater {
    pub fn new() -> Self {
        Self
    }

    /// Feeds one correlation event: every handle gets a node (count +1),
    /// every lexicographically ordered pair gets a symmetric edge pair
    /// (count +1).
    pub fn correlation(
        &self,
        network: &HebbianNetwork,
        handles: &[Handle],
    ) -> Result<(), AttentionError> {
        let mut nodes: FxHashMap<Handle, Arc<HebbianNode>> = FxHashMap::default();
        for handle in handles {
            let node = network.add_node(handle)?;
            nodes.insert(*handle, node);
        }
        for h1 in handles {
            for h2 in handles {
                if h1 < h2 {
                    if let (Some(n1), Some(n2)) = (nodes.get(h1), nodes.get(h2)) {
                        network.add_symmetric_edge(h1, h2, n1, n2)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Reserved: determiner sets are accepted and acknowledged but have
    /// no effect on importance ordering yet.
    pub fn determiners(
        &self,
        _network: &HebbianNetwork,
        determiners: &[Vec<Handle>],
    ) -> Result<(), AttentionError> {
        debug!(count = determiners.len(), "ignoring determiner sets");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use das_common::hasher::compute_hash;

    fn handles(tags: &[&str]) -> Vec<Handle> {
        tags.iter().map(|tag| compute_hash(tag)).collect()
    }

    #[test]
    fn correlation_builds_pairwise_edges() {
        let network = HebbianNetwork::new();
        let updater = ExactCountUpdater::new();
        let hs = handles(&["h1", "h2", "h3", "h4"]);
        updater.correlation(&network, &hs).expect("correlate");

        for (i, h1) in hs.iter().enumerate() {
            for h2 in &hs[i + 1..] {
                assert_eq!(network.get_asymmetric_edge_count(h1, h2), 1);
                assert_eq!(network.get_asymmetric_edge_count(h2, h1), 1);
            }
        }
    }

    #[test]
    fn repeated_correlation_accumulates() {
        let network = HebbianNetwork::new();
        let updater = ExactCountUpdater::new();
        let first = handles(&["h1", "h2", "h3", "h4"]);
        let second = handles(&["h1", "h2", "h5", "h6"]);
        updater.correlation(&network, &first).expect("correlate");
        updater.correlation(&network, &second).expect("correlate");

        let h = |tag: &str| compute_hash(tag);
        assert_eq!(network.get_asymmetric_edge_count(&h("h1"), &h("h2")), 2);
        assert_eq!(network.get_asymmetric_edge_count(&h("h1"), &h("h5")), 1);
        assert_eq!(network.get_asymmetric_edge_count(&h("h3"), &h("h5")), 0);
        assert_eq!(network.get_node_count(&h("h1")), 2);
        assert_eq!(network.get_node_count(&h("h3")), 1);
    }

    #[test]
    fn single_handle_request_still_inserts_its_node() {
        let network = HebbianNetwork::new();
        let updater = ExactCountUpdater::new();
        updater
            .correlation(&network, &handles(&["h1"]))
            .expect("correlate");
        assert_eq!(network.get_node_count(&compute_hash("h1")), 1);
        assert_eq!(network.largest_arity(), 0);
    }
}
