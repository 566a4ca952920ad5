//! Node contraction for graphs without turn costs.

use super::ch_graph::{ChGraph, SHORTCUT_BOTH, SHORTCUT_BWD, SHORTCUT_FWD};
use super::node_witness::NodeBasedWitnessSearch;
use super::prepare_graph::{PrepEdge, PreparationGraph};
use super::NodeContractor;
use crate::datastr::graph::*;

/// Tuning knobs of the node-based contractor.
#[derive(Debug, Clone)]
pub struct NodeBasedContractorParams {
    /// Weight of `shortcuts - degree` in the priority.
    pub edge_difference_weight: f64,
    /// Weight of the original edges all new shortcuts would subsume.
    pub original_edge_count_weight: f64,
    /// Weight of the number of already contracted neighbors.
    pub contracted_neighbor_weight: f64,
    /// Witness search poll budget for priority calculation, as a factor of
    /// the current mean degree.
    pub max_poll_factor_heuristic: f64,
    /// Witness search poll budget for actual contraction. Much larger than
    /// the heuristic budget: giving up early here directly adds shortcuts.
    pub max_poll_factor_contraction: f64,
}

impl Default for NodeBasedContractorParams {
    fn default() -> Self {
        NodeBasedContractorParams {
            edge_difference_weight: 10.0,
            original_edge_count_weight: 1.0,
            contracted_neighbor_weight: 1.0,
            max_poll_factor_heuristic: 5.0,
            max_poll_factor_contraction: 200.0,
        }
    }
}

enum Handling {
    /// Count shortcuts without touching the graph (priority dry run).
    Count,
    /// Insert or update shortcuts in the preparation graph.
    Add,
}

/// Finds and inserts the shortcuts required when contracting a node: for
/// every pair of an incoming and an outgoing neighbor edge a witness search
/// checks whether the path over the contracted node is the only shortest
/// one.
#[derive(Debug)]
pub struct NodeBasedContractor {
    graph: PreparationGraph,
    witness_search: NodeBasedWitnessSearch,
    params: NodeBasedContractorParams,
    contracted_neighbors: Vec<u32>,
    mean_degree: f64,
    in_buf: Vec<PrepEdge>,
    out_buf: Vec<PrepEdge>,
    shortcut_buf: Vec<PrepEdge>,
    added_shortcuts: usize,
    witness_searches: usize,
}

impl NodeBasedContractor {
    pub fn new(graph: PreparationGraph, params: NodeBasedContractorParams) -> Self {
        assert!(!graph.is_edge_based());
        let num_nodes = graph.num_nodes();
        let mean_degree = graph.num_edges() as f64 / (num_nodes.max(1)) as f64;
        NodeBasedContractor {
            witness_search: NodeBasedWitnessSearch::new(num_nodes),
            params,
            contracted_neighbors: vec![0; num_nodes],
            mean_degree,
            in_buf: Vec::new(),
            out_buf: Vec::new(),
            shortcut_buf: Vec::new(),
            added_shortcuts: 0,
            witness_searches: 0,
            graph,
        }
    }

    /// For each (in-neighbor, out-neighbor) pair of `node`, searches for a
    /// witness path not using `node` and handles a shortcut when none is
    /// found within budget. Returns `(degree, shortcuts, original edges)`
    /// as counted during the scan.
    fn find_shortcuts(&mut self, node: NodeId, handling: Handling, max_polls: usize) -> (u32, u32, u32) {
        let mut degree = 0;
        let mut shortcut_count = 0;
        let mut orig_edge_count = 0;

        let mut in_edges = std::mem::take(&mut self.in_buf);
        let mut out_edges = std::mem::take(&mut self.out_buf);
        in_edges.clear();
        in_edges.extend(self.graph.in_edges(node));
        out_edges.clear();
        out_edges.extend(self.graph.out_edges(node));

        for in_edge in &in_edges {
            let from = in_edge.from;
            debug_assert_ne!(from, node);
            degree += 1;
            self.witness_search.init(from, node);
            self.witness_searches += 1;
            for out_edge in &out_edges {
                let to = out_edge.to;
                if to == from || to == node {
                    continue;
                }
                let direct_weight = in_edge.weight + out_edge.weight;
                let upper_bound = self.witness_search.find_upper_bound(&self.graph, to, direct_weight, max_polls);
                if upper_bound <= direct_weight {
                    // witness found, no shortcut needed
                    continue;
                }
                shortcut_count += 1;
                orig_edge_count += in_edge.orig_edge_count + out_edge.orig_edge_count;
                if let Handling::Add = handling {
                    self.add_or_update_shortcut(
                        from,
                        to,
                        direct_weight,
                        in_edge.prepare_edge,
                        out_edge.prepare_edge,
                        in_edge.orig_edge_count + out_edge.orig_edge_count,
                    );
                }
            }
        }

        self.in_buf = in_edges;
        self.out_buf = out_edges;
        (degree, shortcut_count, orig_edge_count)
    }

    fn add_or_update_shortcut(&mut self, from: NodeId, to: NodeId, weight: Weight, skipped1: EdgeId, skipped2: EdgeId, orig_edge_count: u32) {
        let existing = self.graph.out_edges(from).find(|e| e.is_shortcut() && e.to == to);
        match existing {
            Some(e) => {
                if weight < e.weight {
                    self.graph.update_shortcut(e.record, weight, skipped1, skipped2, orig_edge_count);
                }
            }
            None => {
                self.graph
                    .add_shortcut(from, to, INVALID_EDGE, INVALID_EDGE, skipped1, skipped2, weight, orig_edge_count);
            }
        }
    }

    /// Moves the shortcuts adjacent to `node` into the output graph. Called
    /// right before `node` is disconnected, i.e. the last time these
    /// records are reachable. Forward/backward shortcut pairs with equal
    /// weight and matching skip pointers are merged into one bidirectional
    /// output shortcut.
    fn insert_shortcuts(&mut self, node: NodeId, ch: &mut ChGraph) {
        let mut shortcuts = std::mem::take(&mut self.shortcut_buf);
        shortcuts.clear();
        shortcuts.extend(self.graph.out_edges(node).filter(PrepEdge::is_shortcut));
        let num_forward = shortcuts.len();

        // backward partners carry their skip pointers in reversed order and
        // are matched via final ids, two prepare edges may already refer to
        // the same inserted shortcut
        let backward: Vec<PrepEdge> = self.graph.in_edges(node).filter(PrepEdge::is_shortcut).collect();
        let mut flags = vec![SHORTCUT_FWD; num_forward];
        let mut bwd_prepare_edges: Vec<Option<EdgeId>> = vec![None; num_forward];
        let mut unmatched = Vec::new();
        for in_edge in backward {
            let skipped1 = in_edge.skipped2;
            let skipped2 = in_edge.skipped1;
            let mut matched = false;
            for i in 0..num_forward {
                let sc = &shortcuts[i];
                if flags[i] == SHORTCUT_FWD
                    && sc.to == in_edge.from
                    && sc.weight.to_bits() == in_edge.weight.to_bits()
                    && self.graph.shortcut_for_prepare_edge(sc.skipped1) == self.graph.shortcut_for_prepare_edge(skipped1)
                    && self.graph.shortcut_for_prepare_edge(sc.skipped2) == self.graph.shortcut_for_prepare_edge(skipped2)
                {
                    flags[i] = SHORTCUT_BOTH;
                    bwd_prepare_edges[i] = Some(in_edge.prepare_edge);
                    matched = true;
                    break;
                }
            }
            if !matched {
                unmatched.push((in_edge.prepare_edge, in_edge.from, skipped1, skipped2, in_edge.weight));
            }
        }

        for i in 0..num_forward {
            let sc = &shortcuts[i];
            let id = ch.add_shortcut(node, sc.to, flags[i], sc.weight, sc.skipped1, sc.skipped2);
            self.graph.set_shortcut_for_prepare_edge(sc.prepare_edge, id);
            if let Some(bwd) = bwd_prepare_edges[i] {
                self.graph.set_shortcut_for_prepare_edge(bwd, id);
            }
            self.added_shortcuts += 1;
        }
        for (prepare_edge, from, skipped1, skipped2, weight) in unmatched {
            let id = ch.add_shortcut(node, from, SHORTCUT_BWD, weight, skipped1, skipped2);
            self.graph.set_shortcut_for_prepare_edge(prepare_edge, id);
            self.added_shortcuts += 1;
        }

        self.shortcut_buf = shortcuts;
    }

    fn max_polls(&self, factor: f64) -> usize {
        (self.mean_degree * factor) as usize
    }
}

impl NodeContractor for NodeBasedContractor {
    fn calculate_priority(&mut self, node: NodeId) -> f64 {
        let max_polls = self.max_polls(self.params.max_poll_factor_heuristic);
        let (_, shortcut_count, orig_edge_count) = self.find_shortcuts(node, Handling::Count, max_polls);
        let edge_difference = shortcut_count as f64 - self.graph.degree(node) as f64;
        self.params.edge_difference_weight * edge_difference
            + self.params.original_edge_count_weight * orig_edge_count as f64
            + self.params.contracted_neighbor_weight * self.contracted_neighbors[node as usize] as f64
    }

    fn contract_node(&mut self, node: NodeId, ch: &mut ChGraph) -> Vec<NodeId> {
        let max_polls = self.max_polls(self.params.max_poll_factor_contraction);
        let (degree, _, _) = self.find_shortcuts(node, Handling::Add, max_polls);
        self.insert_shortcuts(node, ch);
        let neighbors = self.graph.disconnect(node);
        for &neighbor in &neighbors {
            self.contracted_neighbors[neighbor as usize] += 1;
        }
        self.mean_degree = (self.mean_degree * 2.0 + degree as f64) / 3.0;
        neighbors
    }

    fn finish_contraction(&mut self, ch: &mut ChGraph) {
        let graph = &self.graph;
        ch.replace_skipped_edges(|prepare_edge| graph.shortcut_for_prepare_edge(prepare_edge));
    }

    fn statistics(&self) -> String {
        format!(
            "mean degree: {:.1}, witness searches: {}, shortcuts: {}",
            self.mean_degree, self.witness_searches, self.added_shortcuts
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::ch::ch_graph::SHORTCUT_BOTH;

    // 0 - 1 - 2 with weights 1 and 2, both directions
    fn line() -> PreparationGraph {
        let mut g = PreparationGraph::node_based(3, 2);
        g.add_edge(0, 1, 0, 1.0, 1.0);
        g.add_edge(1, 2, 1, 2.0, 2.0);
        g.prepare_for_contraction();
        g
    }

    #[test]
    fn priority_of_line_middle_node() {
        let g = line();
        let mut contractor = NodeBasedContractor::new(g, NodeBasedContractorParams::default());
        // 2 shortcuts, degree 4, 4 subsumed original edges, no contracted
        // neighbors: 10 * (2 - 4) + 4
        assert_eq!(contractor.calculate_priority(1), -16.0);
        // the dry run must not change anything
        assert_eq!(contractor.calculate_priority(1), -16.0);
    }

    #[test]
    fn symmetric_shortcut_pair_is_merged() {
        let g = line();
        let mut contractor = NodeBasedContractor::new(g, NodeBasedContractorParams::default());
        let mut ch = ChGraph::new(3, 2);

        let neighbors = contractor.contract_node(1, &mut ch);
        assert_eq!(neighbors, vec![2, 0]);
        // the shortcut pair lives between 0 and 2, flushed when 0 goes
        assert_eq!(ch.num_shortcuts(), 0);
        contractor.contract_node(0, &mut ch);
        assert_eq!(ch.num_shortcuts(), 1);
        let sc = ch.shortcut(2);
        assert_eq!((sc.from, sc.to), (0, 2));
        assert_eq!(sc.flags, SHORTCUT_BOTH);
        assert_eq!(sc.weight, 3.0);

        contractor.finish_contraction(&mut ch);
        assert_eq!(ch.shortcut(2).skipped1, 0);
        assert_eq!(ch.shortcut(2).skipped2, 1);
    }

    #[test]
    fn asymmetric_weights_keep_directed_shortcuts_apart() {
        let mut g = PreparationGraph::node_based(3, 2);
        g.add_edge(0, 1, 0, 1.0, 1.0);
        g.add_edge(1, 2, 1, 2.0, 3.0);
        g.prepare_for_contraction();
        let mut contractor = NodeBasedContractor::new(g, NodeBasedContractorParams::default());
        let mut ch = ChGraph::new(3, 2);

        contractor.contract_node(1, &mut ch);
        contractor.contract_node(0, &mut ch);
        // 0 -> 2 weighs 3, 2 -> 0 weighs 4, no merge possible
        assert_eq!(ch.num_shortcuts(), 2);
        let weights: Vec<Weight> = ch.shortcuts().iter().map(|sc| sc.weight).collect();
        assert!(weights.contains(&3.0) && weights.contains(&4.0));
        for sc in ch.shortcuts() {
            assert_ne!(sc.flags, SHORTCUT_BOTH);
        }
    }

    #[test]
    fn witness_route_prevents_shortcut() {
        // triangle with a cheap direct edge 0 - 2
        let mut g = PreparationGraph::node_based(3, 3);
        g.add_edge(0, 1, 0, 1.0, 1.0);
        g.add_edge(1, 2, 1, 1.0, 1.0);
        g.add_edge(0, 2, 2, 1.0, 1.0);
        g.prepare_for_contraction();
        let mut contractor = NodeBasedContractor::new(g, NodeBasedContractorParams::default());
        let mut ch = ChGraph::new(3, 3);

        contractor.contract_node(1, &mut ch);
        contractor.contract_node(0, &mut ch);
        contractor.contract_node(2, &mut ch);
        assert_eq!(ch.num_shortcuts(), 0);
    }

    #[test]
    fn contracted_neighbors_raise_priority() {
        let g = line();
        let mut contractor = NodeBasedContractor::new(g, NodeBasedContractorParams::default());
        let mut ch = ChGraph::new(3, 2);
        let before = contractor.calculate_priority(2);
        contractor.contract_node(0, &mut ch);
        // node 1 lost its neighbor 0, node 2 is unaffected except for the
        // contracted neighbor term staying at zero
        let after = contractor.calculate_priority(2);
        assert_eq!(before, after);
        assert!(contractor.calculate_priority(1) > f64::NEG_INFINITY);
    }
}
