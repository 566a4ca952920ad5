//! Contraction hierarchy preparation.
//!
//! Nodes are contracted one by one in ascending order of a heuristic
//! priority. Contracting a node inserts shortcuts between its neighbors
//! wherever the path over the node is the only shortest one, which a
//! witness search decides. Two contraction flavors exist: node-based for
//! plain weightings and edge-based for weightings with turn costs. The
//! driver in this module is shared between both.

use crate::datastr::graph::*;
use crate::datastr::index_heap::IndexdMinHeap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub mod ch_graph;
pub mod edge_based;
pub mod edge_witness;
pub mod node_based;
pub mod node_witness;
pub mod prepare_graph;

use ch_graph::ChGraph;
use edge_based::EdgeBasedContractor;
use node_based::{NodeBasedContractor, NodeBasedContractorParams};
use prepare_graph::PreparationGraph;

/// Contraction strategy driven by [`contract_graph`].
pub trait NodeContractor {
    /// Estimated cost of contracting `node` right now. Nodes with higher
    /// priority are contracted later.
    fn calculate_priority(&mut self, node: NodeId) -> f64;
    /// Contracts `node`: inserts the required shortcuts, flushes the
    /// shortcuts adjacent to `node` into `ch` and disconnects it from the
    /// preparation graph. Returns the affected neighbors.
    fn contract_node(&mut self, node: NodeId, ch: &mut ChGraph) -> Vec<NodeId>;
    /// Rewrites provisional skip pointers to final edge ids. Called once,
    /// after the last contraction.
    fn finish_contraction(&mut self, ch: &mut ChGraph);
    fn statistics(&self) -> String;
}

/// Knobs of the contraction order heuristic. All values are percentages
/// between 0 and 100.
#[derive(Debug, Clone)]
pub struct Params {
    /// How often all remaining priorities are recomputed: every
    /// `initial_queue_size * percentage / 100` polls (at least every 10).
    /// Zero disables periodic updates.
    pub periodic_updates_percentage: u32,
    /// While the queue holds fewer than this percentage of the initial
    /// nodes, every polled node's priority is re-checked before its
    /// contraction and the node is requeued when it is no longer minimal.
    pub last_nodes_lazy_updates_percentage: u32,
    /// Chance for each neighbor of a contracted node to get its priority
    /// recomputed immediately. Zero disables neighbor updates.
    pub neighbor_updates_percentage: u32,
    /// Contraction stops once this percentage of nodes is contracted. The
    /// remaining nodes keep the maximum level.
    pub contracted_nodes_percentage: u32,
    /// Granularity of progress log messages. Zero disables them.
    pub log_messages_percentage: u32,
}

impl Params {
    pub fn node_based() -> Self {
        Params {
            periodic_updates_percentage: 20,
            last_nodes_lazy_updates_percentage: 10,
            neighbor_updates_percentage: 20,
            contracted_nodes_percentage: 100,
            log_messages_percentage: 20,
        }
    }

    /// Edge-based contraction is much more expensive per priority
    /// calculation, so periodic and neighbor updates are off and lazy
    /// updates are always on instead.
    pub fn edge_based() -> Self {
        Params {
            periodic_updates_percentage: 0,
            last_nodes_lazy_updates_percentage: 100,
            neighbor_updates_percentage: 0,
            contracted_nodes_percentage: 100,
            log_messages_percentage: 5,
        }
    }

    fn check(&self) {
        assert!(self.periodic_updates_percentage <= 100, "periodic_updates_percentage must be in [0, 100]");
        assert!(
            self.last_nodes_lazy_updates_percentage <= 100,
            "last_nodes_lazy_updates_percentage must be in [0, 100]"
        );
        assert!(self.neighbor_updates_percentage <= 100, "neighbor_updates_percentage must be in [0, 100]");
        assert!(self.contracted_nodes_percentage <= 100, "contracted_nodes_percentage must be in [0, 100]");
        assert!(self.log_messages_percentage <= 100, "log_messages_percentage must be in [0, 100]");
    }
}

/// Contracts nodes in heuristic order until the configured share of nodes
/// is contracted, assigning ascending levels as it goes.
pub fn contract_graph<C: NodeContractor>(contractor: &mut C, params: &Params, ch: &mut ChGraph) {
    params.check();
    let num_nodes = ch.num_nodes();
    let mut queue = IndexdMinHeap::new(num_nodes);
    for node in 0..num_nodes {
        queue.push(node, contractor.calculate_priority(node as NodeId));
    }

    let initial_size = queue.len();
    let periodic_interval = (initial_size * params.periodic_updates_percentage as usize / 100).max(10);
    let lazy_threshold = initial_size * params.last_nodes_lazy_updates_percentage as usize / 100;
    let stop_size = initial_size * (100 - params.contracted_nodes_percentage) as usize / 100;
    let log_interval = (initial_size * params.log_messages_percentage as usize / 100).max(1);
    let mut rng = StdRng::seed_from_u64(123);

    let mut level = 0u32;
    let mut polls = 0usize;
    let mut contracted = 0usize;
    loop {
        if params.periodic_updates_percentage != 0 && polls > 0 && polls % periodic_interval == 0 {
            update_remaining_priorities(contractor, &mut queue, num_nodes);
        }
        polls += 1;
        let node = match queue.pop() {
            Some((node, _)) => node as NodeId,
            None => break,
        };
        if !queue.is_empty() && queue.len() < lazy_threshold {
            // the priority may be outdated, re-check before contracting
            let priority = contractor.calculate_priority(node);
            if let Some((_, min_priority)) = queue.peek() {
                if priority > min_priority {
                    queue.push(node as usize, priority);
                    continue;
                }
            }
        }

        let neighbors = contractor.contract_node(node, ch);
        ch.set_level(node, level);
        level += 1;
        contracted += 1;
        if params.log_messages_percentage != 0 && contracted % log_interval == 0 {
            log::info!("contracted {} of {} nodes, queue size {}, {}", contracted, initial_size, queue.len(), contractor.statistics());
        }
        if queue.len() < stop_size {
            log::info!("stopping early, {} of {} nodes contracted", contracted, initial_size);
            break;
        }
        for neighbor in neighbors {
            if params.neighbor_updates_percentage != 0 && rng.gen_range(0..100) < params.neighbor_updates_percentage {
                let priority = contractor.calculate_priority(neighbor);
                queue.update_key(neighbor as usize, priority);
            }
        }
    }

    contractor.finish_contraction(ch);
    log::info!("contraction finished, {}", contractor.statistics());
}

fn update_remaining_priorities<C: NodeContractor>(contractor: &mut C, queue: &mut IndexdMinHeap, num_nodes: usize) {
    for node in 0..num_nodes {
        if queue.contains(node) {
            let priority = contractor.calculate_priority(node as NodeId);
            queue.update_key(node, priority);
        }
    }
}

/// Contracts all nodes in the given order, one level per position. Used
/// with externally computed orderings and by tests.
pub fn contract_in_order<C: NodeContractor>(contractor: &mut C, order: &[NodeId], ch: &mut ChGraph) {
    assert_eq!(order.len(), ch.num_nodes(), "the contraction order must name every node exactly once");
    for (level, &node) in order.iter().enumerate() {
        assert!(!ch.is_contracted(node), "node {} appears twice in the contraction order", node);
        contractor.contract_node(node, ch);
        ch.set_level(node, level as u32);
    }
    contractor.finish_contraction(ch);
}

/// Prepares a contraction hierarchy for a weighting without turn costs.
pub fn prepare_node_based<G: EdgeAccessGraph, W: Weighting>(graph: &G, weighting: &W) -> ChGraph {
    prepare_node_based_with_params(graph, weighting, NodeBasedContractorParams::default(), &Params::node_based())
}

pub fn prepare_node_based_with_params<G: EdgeAccessGraph, W: Weighting>(
    graph: &G,
    weighting: &W,
    contractor_params: NodeBasedContractorParams,
    params: &Params,
) -> ChGraph {
    let prep = PreparationGraph::from_graph(graph, weighting, false);
    let mut ch = ChGraph::new(graph.num_nodes(), graph.num_edges());
    let mut contractor = NodeBasedContractor::new(prep, contractor_params);
    contract_graph(&mut contractor, params, &mut ch);
    ch
}

/// Prepares a node-based hierarchy with a fixed contraction order.
pub fn prepare_node_based_with_order<G: EdgeAccessGraph, W: Weighting>(graph: &G, weighting: &W, order: &[NodeId]) -> ChGraph {
    let prep = PreparationGraph::from_graph(graph, weighting, false);
    let mut ch = ChGraph::new(graph.num_nodes(), graph.num_edges());
    let mut contractor = NodeBasedContractor::new(prep, NodeBasedContractorParams::default());
    contract_in_order(&mut contractor, order, &mut ch);
    ch
}

/// Prepares a contraction hierarchy for a turn-cost-aware weighting.
pub fn prepare_edge_based<G: EdgeAccessGraph, W: Weighting>(graph: &G, weighting: &W) -> ChGraph {
    prepare_edge_based_with_params(graph, weighting, &Params::edge_based())
}

pub fn prepare_edge_based_with_params<G: EdgeAccessGraph, W: Weighting>(graph: &G, weighting: &W, params: &Params) -> ChGraph {
    let prep = PreparationGraph::from_graph(graph, weighting, true);
    let mut ch = ChGraph::new(graph.num_nodes(), graph.num_edges());
    let mut contractor = EdgeBasedContractor::new(prep, weighting);
    contract_graph(&mut contractor, params, &mut ch);
    ch
}

/// Prepares an edge-based hierarchy with a fixed contraction order.
pub fn prepare_edge_based_with_order<G: EdgeAccessGraph, W: Weighting>(graph: &G, weighting: &W, order: &[NodeId]) -> ChGraph {
    let prep = PreparationGraph::from_graph(graph, weighting, true);
    let mut ch = ChGraph::new(graph.num_nodes(), graph.num_edges());
    let mut contractor = EdgeBasedContractor::new(prep, weighting);
    contract_in_order(&mut contractor, order, &mut ch);
    ch
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weighted_edge(graph: &mut EdgeList, weighting: &mut TableWeighting, from: NodeId, to: NodeId, weight: Weight) {
        let edge = graph.add_edge(from, to);
        weighting.set_edge_weight(edge, weight, weight);
    }

    #[test]
    fn prepares_a_small_graph() {
        // 0 - 1 - 2 - 3 - 4 in a line, plus a detour 1 - 5 - 3
        let mut graph = EdgeList::new(6);
        let mut weighting = TableWeighting::new();
        weighted_edge(&mut graph, &mut weighting, 0, 1, 1.0);
        weighted_edge(&mut graph, &mut weighting, 1, 2, 1.0);
        weighted_edge(&mut graph, &mut weighting, 2, 3, 1.0);
        weighted_edge(&mut graph, &mut weighting, 3, 4, 1.0);
        weighted_edge(&mut graph, &mut weighting, 1, 5, 2.0);
        weighted_edge(&mut graph, &mut weighting, 5, 3, 2.0);

        let ch = prepare_node_based(&graph, &weighting);
        // all nodes contracted, all levels distinct
        let mut levels: Vec<u32> = (0..6).map(|node| ch.level(node)).collect();
        levels.sort_unstable();
        assert_eq!(levels, vec![0, 1, 2, 3, 4, 5]);
        for sc in ch.shortcuts() {
            assert!((sc.skipped1 as usize) < 6 + ch.num_shortcuts());
            assert!((sc.skipped2 as usize) < 6 + ch.num_shortcuts());
        }
    }

    #[test]
    fn fixed_order_contracts_line_graph() {
        let mut graph = EdgeList::new(4);
        let mut weighting = TableWeighting::new();
        weighted_edge(&mut graph, &mut weighting, 0, 1, 1.0);
        weighted_edge(&mut graph, &mut weighting, 1, 2, 2.0);
        weighted_edge(&mut graph, &mut weighting, 2, 3, 3.0);

        let ch = prepare_node_based_with_order(&graph, &weighting, &[1, 2, 0, 3]);
        assert_eq!(ch.level(1), 0);
        assert_eq!(ch.level(2), 1);
        assert_eq!(ch.level(0), 2);
        assert_eq!(ch.level(3), 3);
        // contracting 1 first bridges 0 - 2, contracting 2 next bridges 0 - 3,
        // shortcut ids continue the three base edge ids
        assert_eq!(ch.num_shortcuts(), 2);
        let sc = ch.shortcut(3);
        assert_eq!((sc.from, sc.to, sc.weight), (2, 0, 3.0));
        let sc = ch.shortcut(4);
        assert_eq!((sc.from, sc.to, sc.weight), (0, 3, 6.0));
        for sc in ch.shortcuts() {
            assert_eq!(sc.flags, ch_graph::SHORTCUT_BOTH);
        }
    }

    #[test]
    fn partial_contraction_leaves_top_nodes_uncontracted() {
        let mut graph = EdgeList::new(10);
        let mut weighting = TableWeighting::new();
        for i in 0..9 {
            weighted_edge(&mut graph, &mut weighting, i, i + 1, 1.0);
        }
        let mut params = Params::node_based();
        params.contracted_nodes_percentage = 50;
        let ch = prepare_node_based_with_params(&graph, &weighting, Default::default(), &params);
        let contracted = (0..10).filter(|&node| ch.is_contracted(node)).count();
        assert!(contracted >= 5);
        assert!(contracted < 10);
    }

    #[test]
    #[should_panic(expected = "contraction order")]
    fn rejects_duplicate_nodes_in_fixed_order() {
        let mut graph = EdgeList::new(3);
        let mut weighting = TableWeighting::new();
        weighted_edge(&mut graph, &mut weighting, 0, 1, 1.0);
        weighted_edge(&mut graph, &mut weighting, 1, 2, 1.0);
        prepare_node_based_with_order(&graph, &weighting, &[1, 1, 2]);
    }
}
