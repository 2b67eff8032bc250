//! Token-based importance spreading.
//!
//! One stimulate request drives one cycle of importance flow: rent is
//! collected from every node, the rent plus any alienated tokens are paid
//! back as wages proportional to the requested counts, and each node then
//! spreads a slice of its importance to its hebbian neighbours.

use das_common::Handle;
use das_trie::{HandleTrie, TrieValue};
use rustc_hash::FxHashMap;
use tracing::warn;

use crate::error::AttentionError;
use crate::network::{HebbianNetwork, ImportanceType};

/// Spreading parameters. Rates are fractions in `[0, 1]`; the upper bound
/// must not be below the lower bound.
#[derive(Debug, Clone, Copy)]
pub struct SpreaderParams {
    pub rent_rate: f64,
    pub spreading_rate_lowerbound: f64,
    pub spreading_rate_upperbound: f64,
}

impl Default for SpreaderParams {
    fn default() -> Self {
        Self {
            rent_rate: 0.50,
            spreading_rate_lowerbound: 0.01,
            spreading_rate_upperbound: 0.10,
        }
    }
}

/// A stimulate request: per-handle counts plus the mandatory total.
#[derive(Debug, Clone, Default)]
pub struct HandleCount {
    counts: FxHashMap<Handle, u32>,
    sum: Option<u32>,
}

impl HandleCount {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a request from entries, computing the SUM automatically.
    pub fn from_entries(entries: impl IntoIterator<Item = (Handle, u32)>) -> Self {
        let counts: FxHashMap<Handle, u32> = entries.into_iter().collect();
        let sum = counts.values().sum();
        Self {
            counts,
            sum: Some(sum),
        }
    }

    pub fn insert(&mut self, handle: Handle, count: u32) {
        self.counts.insert(handle, count);
    }

    pub fn set_sum(&mut self, sum: u32) {
        self.sum = Some(sum);
    }

    pub fn sum(&self) -> Result<u32, AttentionError> {
        self.sum.ok_or(AttentionError::MissingSum)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Handle, u32)> {
        self.counts.iter().map(|(handle, count)| (handle, *count))
    }
}

/// Per-run importance deltas stashed in a side trie.
#[derive(Debug, Clone, Copy, Default)]
struct ImportanceChanges {
    rent: ImportanceType,
    wages: ImportanceType,
}

impl TrieValue for ImportanceChanges {
    fn merge(&mut self, other: Self) {
        self.rent += other.rent;
        self.wages += other.wages;
    }
}

pub struct TokenSpreader {
    params: SpreaderParams,
}

impl TokenSpreader {
    pub fn new(params: SpreaderParams) -> Self {
        Self { params }
    }

    /// Runs one spreading cycle. Each step is a full trie traversal under
    /// the root lock, so a cycle is atomic with respect to other cycles
    /// on the same network.
    pub fn spread_stimuli(
        &self,
        request: &HandleCount,
        network: &HebbianNetwork,
    ) -> Result<(), AttentionError> {
        let total_wages = request.sum()?;
        if total_wages == 0 {
            warn!("stimulate request with zero SUM, nothing to spread");
            return Ok(());
        }

        // Collect rent.
        let changes: HandleTrie<ImportanceChanges> = HandleTrie::new();
        let mut total_rent: ImportanceType = 0.0;
        let rent_rate = self.params.rent_rate;
        network.visit_nodes(true, |key, node| {
            let rent = rent_rate * node.importance();
            total_rent += rent;
            // Keys coming from a traversal are always valid.
            let _ = changes.insert(key, ImportanceChanges { rent, wages: 0.0 });
            false
        });

        // Distribute wages out of the alienated tokens plus the rent.
        let tokens_to_distribute = network.alienate_tokens() + total_rent;
        for (handle, count) in request.entries() {
            let wages = (f64::from(count) * tokens_to_distribute) / f64::from(total_wages);
            let _ = changes.insert(
                handle.as_str(),
                ImportanceChanges { rent: 0.0, wages },
            );
        }

        // Consolidate changes and compute the amount each node spreads.
        let largest_arity = network.largest_arity();
        let lowerbound = self.params.spreading_rate_lowerbound;
        let range_size = self.params.spreading_rate_upperbound - lowerbound;
        network.visit_nodes(true, |key, node| {
            let deltas = changes
                .lookup(key)
                .ok()
                .flatten()
                .unwrap_or_default();
            let mut state = node.state();
            state.importance += deltas.wages - deltas.rent;
            let arity_ratio = if largest_arity == 0 {
                0.0
            } else {
                f64::from(state.arity) / f64::from(largest_arity)
            };
            let spreading_rate = lowerbound + range_size * arity_ratio;
            let to_spread = state.importance * spreading_rate;
            state.importance -= to_spread;
            state.stimuli_to_spread = to_spread;
            false
        });

        // Spread activation (one cycle).
        network.visit_nodes(true, |_, node| {
            let (count, to_spread) = {
                let mut state = node.state();
                let values = (state.count, state.stimuli_to_spread);
                state.stimuli_to_spread = 0.0;
                values
            };
            if count == 0 || to_spread == 0.0 {
                return false;
            }
            let mut sum_weights = 0.0;
            node.neighbors().traverse(true, |_, edge| {
                sum_weights += f64::from(edge.0.count()) / f64::from(count);
                false
            });
            if sum_weights == 0.0 {
                return false;
            }
            node.neighbors().traverse(true, |_, edge| {
                let weight = f64::from(edge.0.count()) / f64::from(count);
                let stimulus = (weight / sum_weights) * to_spread;
                edge.0.target().state().importance += stimulus;
                false
            });
            false
        });

        Ok(())
    }
}

impl Default for TokenSpreader {
    fn default() -> Self {
        Self::new(SpreaderParams::default())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::updater::ExactCountUpdater;
    use das_common::hasher::compute_hash;

    fn handles(n: usize) -> Vec<Handle> {
        (0..n).map(|i| compute_hash(&format!("h{i}"))).collect()
    }

    fn correlated_network(hs: &[Handle]) -> HebbianNetwork {
        let network = HebbianNetwork::new();
        ExactCountUpdater::new()
            .correlation(&network, hs)
            .expect("correlate");
        network
    }

    fn total_importance(network: &HebbianNetwork) -> f64 {
        let mut total = 0.0;
        network.visit_nodes(true, |_, node| {
            total += node.importance();
            false
        });
        total
    }

    #[test]
    fn missing_sum_is_rejected() {
        let network = HebbianNetwork::new();
        let spreader = TokenSpreader::default();
        let mut request = HandleCount::new();
        request.insert(compute_hash("h0"), 1);
        assert!(matches!(
            spreader.spread_stimuli(&request, &network),
            Err(AttentionError::MissingSum)
        ));
    }

    #[test]
    fn stimulated_nodes_end_up_more_important() {
        let hs = handles(4);
        let network = correlated_network(&hs);
        let spreader = TokenSpreader::default();
        let request = HandleCount::from_entries([(hs[0], 1), (hs[1], 1)]);
        spreader.spread_stimuli(&request, &network).expect("spread");

        let importance: Vec<f64> = hs
            .iter()
            .map(|h| network.get_node_importance(h))
            .collect();
        assert!(
            importance[0] + importance[1] > importance[2] + importance[3],
            "stimulated pair should dominate: {importance:?}"
        );
    }

    #[test]
    fn one_cycle_conserves_tokens() {
        let hs = handles(4);
        let network = correlated_network(&hs);
        let spreader = TokenSpreader::default();
        let request = HandleCount::from_entries([(hs[0], 1), (hs[1], 1)]);
        spreader.spread_stimuli(&request, &network).expect("spread");

        let total = total_importance(&network) + network.tokens_to_distribute();
        assert!(
            (total - 1.0).abs() < 1e-9,
            "importance + tokens should stay at the seeded unit, got {total}"
        );
    }

    #[test]
    fn repeated_cycles_keep_conserving() {
        let hs = handles(6);
        let network = correlated_network(&hs);
        let spreader = TokenSpreader::default();
        for i in 0..5 {
            let request =
                HandleCount::from_entries([(hs[i % 6], 1), (hs[(i + 1) % 6], 2)]);
            spreader.spread_stimuli(&request, &network).expect("spread");
        }
        let total = total_importance(&network) + network.tokens_to_distribute();
        assert!((total - 1.0).abs() < 1e-9, "drifted to {total}");
    }

    #[test]
    fn unknown_network_nodes_get_no_importance() {
        let hs = handles(2);
        let network = correlated_network(&hs);
        let spreader = TokenSpreader::default();
        let request = HandleCount::from_entries([(hs[0], 1)]);
        spreader.spread_stimuli(&request, &network).expect("spread");
        assert_eq!(network.get_node_importance(&compute_hash("unknown")), 0.0);
    }
}
