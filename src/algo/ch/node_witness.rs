//! Witness search for node-based contraction.

use super::prepare_graph::PreparationGraph;
use crate::datastr::graph::*;
use crate::datastr::index_heap::IndexdMinHeap;

/// A one-to-many Dijkstra over the preparation graph that ignores one node
/// (the contraction candidate). Used to check whether a path between two
/// neighbors of the ignored node exists that makes a shortcut unnecessary.
///
/// The search tree is kept between [`find_upper_bound`](Self::find_upper_bound)
/// calls for the same source and only reset by the next
/// [`init`](Self::init). Resetting only touches nodes reached by the
/// previous search.
#[derive(Debug)]
pub struct NodeBasedWitnessSearch {
    weights: Vec<Weight>,
    heap: IndexdMinHeap,
    changed_nodes: Vec<NodeId>,
    ignore_node: NodeId,
    num_settled: usize,
}

impl NodeBasedWitnessSearch {
    pub fn new(num_nodes: usize) -> Self {
        NodeBasedWitnessSearch {
            weights: vec![INFINITY; num_nodes],
            heap: IndexdMinHeap::new(num_nodes),
            changed_nodes: Vec::new(),
            ignore_node: NodeId::MAX,
            num_settled: 0,
        }
    }

    /// Drops the previous search tree and starts a new search from
    /// `source`, ignoring `ignore_node` entirely.
    pub fn init(&mut self, source: NodeId, ignore_node: NodeId) {
        for &node in &self.changed_nodes {
            self.weights[node as usize] = INFINITY;
        }
        self.changed_nodes.clear();
        self.heap.clear();
        self.num_settled = 0;
        self.ignore_node = ignore_node;
        self.weights[source as usize] = 0.0;
        self.changed_nodes.push(source);
        self.heap.push(source as usize, 0.0);
    }

    /// Searches until `target` is reached with a weight of at most
    /// `accepted_weight`, the poll budget is used up, or all remaining heap
    /// entries are more expensive than `accepted_weight`. Returns the best
    /// weight known for `target` so far, which may well be infinite.
    ///
    /// The poll budget is shared across all calls since the last
    /// [`init`](Self::init).
    pub fn find_upper_bound(&mut self, graph: &PreparationGraph, target: NodeId, accepted_weight: Weight, max_polls: usize) -> Weight {
        while let Some((node, key)) = self.heap.peek() {
            if self.num_settled >= max_polls || key > accepted_weight {
                break;
            }
            if self.weights[target as usize] <= accepted_weight {
                return self.weights[target as usize];
            }
            self.heap.pop();
            for edge in graph.out_edges(node as NodeId) {
                let adj = edge.to;
                if adj == self.ignore_node {
                    continue;
                }
                let weight = self.weights[node] + edge.weight;
                let adj_weight = self.weights[adj as usize];
                if weight < adj_weight {
                    self.weights[adj as usize] = weight;
                    if adj_weight == INFINITY {
                        self.changed_nodes.push(adj);
                        self.heap.push(adj as usize, weight);
                    } else {
                        self.heap.update_key(adj as usize, weight);
                    }
                }
            }
            self.num_settled += 1;
            if self.weights[target as usize] <= accepted_weight {
                return self.weights[target as usize];
            }
        }
        self.weights[target as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> PreparationGraph {
        //     1
        //   /   \
        // 0       3
        //   \   /
        //     2
        let mut g = PreparationGraph::node_based(4, 4);
        g.add_edge(0, 1, 0, 1.0, 1.0);
        g.add_edge(1, 3, 1, 1.0, 1.0);
        g.add_edge(0, 2, 2, 1.0, 1.0);
        g.add_edge(2, 3, 3, 2.0, 2.0);
        g.prepare_for_contraction();
        g
    }

    #[test]
    fn finds_witness_around_ignored_node() {
        let g = diamond();
        let mut search = NodeBasedWitnessSearch::new(4);
        // contracting 2: direct path 0 -> 2 -> 3 weighs 3, witness via 1 weighs 2
        search.init(0, 2);
        let bound = search.find_upper_bound(&g, 3, 3.0, 100);
        assert_eq!(bound, 2.0);
    }

    #[test]
    fn ignored_node_blocks_only_path() {
        let mut g = PreparationGraph::node_based(3, 2);
        g.add_edge(0, 1, 0, 1.0, 1.0);
        g.add_edge(1, 2, 1, 1.0, 1.0);
        g.prepare_for_contraction();
        let mut search = NodeBasedWitnessSearch::new(3);
        search.init(0, 1);
        assert!(search.find_upper_bound(&g, 2, 2.0, 100).is_infinite());
    }

    #[test]
    fn witness_wins_on_equal_weight() {
        // like diamond(), but both routes weigh 2
        let mut g = PreparationGraph::node_based(4, 4);
        g.add_edge(0, 1, 0, 1.0, 1.0);
        g.add_edge(1, 3, 1, 1.0, 1.0);
        g.add_edge(0, 2, 2, 1.0, 1.0);
        g.add_edge(2, 3, 3, 1.0, 1.0);
        g.prepare_for_contraction();
        let mut search = NodeBasedWitnessSearch::new(4);
        search.init(0, 2);
        // upper bound equals the accepted weight, so the caller skips the shortcut
        assert_eq!(search.find_upper_bound(&g, 3, 2.0, 100), 2.0);
    }

    #[test]
    fn tree_reuse_across_targets() {
        let g = diamond();
        let mut search = NodeBasedWitnessSearch::new(4);
        search.init(0, 2);
        assert_eq!(search.find_upper_bound(&g, 1, 1.0, 100), 1.0);
        assert_eq!(search.find_upper_bound(&g, 3, 3.0, 100), 2.0);
    }

    #[test]
    fn poll_budget_caps_search() {
        let g = diamond();
        let mut search = NodeBasedWitnessSearch::new(4);
        search.init(0, 2);
        // budget of zero polls, nothing beyond the source is found
        assert!(search.find_upper_bound(&g, 3, 3.0, 0).is_infinite());
    }
}
