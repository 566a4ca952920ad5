//! The mutable graph used during contraction.
//!
//! Built once from the input graph, then modified as nodes are contracted:
//! shortcuts are appended with provisional ids and contracted nodes are
//! disconnected from their neighbors' adjacency lists. Edge records live in
//! an append-only arena and are threaded through two intrusive singly linked
//! lists per node (outgoing and incoming), so disconnecting unlinks in
//! O(degree) without moving records.

use crate::datastr::graph::*;
use indexmap::IndexSet;

const INVALID_RECORD: u32 = u32::MAX;

#[derive(Debug, Clone, Copy)]
struct EdgeRecord {
    prepare_edge: EdgeId,
    from: NodeId,
    to: NodeId,
    weight: Weight,
    key_first: EdgeKey,
    key_last: EdgeKey,
    // INVALID_EDGE for base edges
    skipped1: EdgeId,
    skipped2: EdgeId,
    orig_edge_count: u32,
    next_out: u32,
    next_in: u32,
}

/// A copied-out view of one directed edge record, as yielded by the
/// adjacency iterators. `record` is an opaque handle that stays valid for
/// the lifetime of the graph and can be passed to
/// [`PreparationGraph::update_shortcut`].
#[derive(Debug, Clone, Copy)]
pub struct PrepEdge {
    pub record: u32,
    pub prepare_edge: EdgeId,
    pub from: NodeId,
    pub to: NodeId,
    pub weight: Weight,
    pub key_first: EdgeKey,
    pub key_last: EdgeKey,
    pub skipped1: EdgeId,
    pub skipped2: EdgeId,
    pub orig_edge_count: u32,
}

impl PrepEdge {
    pub fn is_shortcut(&self) -> bool {
        self.skipped1 != INVALID_EDGE
    }
}

/// An original edge incident to some base node of the [`OrigGraph`].
/// `key` is oriented from the base node towards `adj_node`.
#[derive(Debug, Clone, Copy)]
pub struct OrigEdge {
    pub adj_node: NodeId,
    pub edge: EdgeId,
    pub key: EdgeKey,
}

/// The preparation graph. See the module docs.
///
/// Mutation methods are split into two phases: `add_edge` before
/// [`prepare_for_contraction`](Self::prepare_for_contraction) freezes the
/// base edges, `add_shortcut`/`disconnect` after. Mixing the phases up is a
/// programming error and panics.
#[derive(Debug)]
pub struct PreparationGraph {
    num_nodes: usize,
    num_edges: usize,
    records: Vec<EdgeRecord>,
    out_head: Vec<u32>,
    in_head: Vec<u32>,
    next_prepare_id: EdgeId,
    // indexed by prepare_edge - num_edges
    shortcut_final_ids: Vec<EdgeId>,
    shortcut_orig_counts: Vec<u32>,
    neighbor_set: IndexSet<NodeId>,
    ready: bool,
    orig_builder: Option<OrigGraphBuilder>,
    orig_graph: Option<OrigGraph>,
}

impl PreparationGraph {
    /// An empty graph for node-based contraction.
    pub fn node_based(num_nodes: usize, num_edges: usize) -> Self {
        Self::new(num_nodes, num_edges, false)
    }

    /// An empty graph for edge-based contraction. Additionally collects the
    /// original edges for the [`OrigGraph`] built on freeze.
    pub fn edge_based(num_nodes: usize, num_edges: usize) -> Self {
        Self::new(num_nodes, num_edges, true)
    }

    fn new(num_nodes: usize, num_edges: usize, edge_based: bool) -> Self {
        PreparationGraph {
            num_nodes,
            num_edges,
            records: Vec::with_capacity(2 * num_edges),
            out_head: vec![INVALID_RECORD; num_nodes],
            in_head: vec![INVALID_RECORD; num_nodes],
            next_prepare_id: num_edges as EdgeId,
            shortcut_final_ids: Vec::new(),
            shortcut_orig_counts: Vec::new(),
            neighbor_set: IndexSet::new(),
            ready: false,
            orig_builder: edge_based.then(OrigGraphBuilder::default),
            orig_graph: None,
        }
    }

    /// Builds the preparation graph from an input graph and weighting and
    /// freezes it. NaN weights are a defect in the weighting and panic with
    /// the offending edge.
    pub fn from_graph<G: EdgeAccessGraph, W: Weighting>(graph: &G, weighting: &W, edge_based: bool) -> Self {
        let mut prep = Self::new(graph.num_nodes(), graph.num_edges(), edge_based);
        for edge in 0..graph.num_edges() as EdgeId {
            let (from, to) = graph.endpoints(edge);
            let forward = weighting.edge_weight(edge, false);
            let backward = weighting.edge_weight(edge, true);
            assert!(
                !forward.is_nan() && !backward.is_nan(),
                "weighting returned NaN for edge {} ({} - {})",
                edge,
                from,
                to
            );
            prep.add_edge(from, to, edge, forward, backward);
        }
        prep.prepare_for_contraction();
        prep
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// The number of original (non-shortcut) edges.
    pub fn num_edges(&self) -> usize {
        self.num_edges
    }

    pub fn is_edge_based(&self) -> bool {
        self.orig_builder.is_some() || self.orig_graph.is_some()
    }

    /// Adds a base edge. Directions with infinite weight are not stored, an
    /// edge that is infinite in both directions is skipped entirely.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId, edge: EdgeId, weight_fwd: Weight, weight_bwd: Weight) {
        self.check_not_ready();
        assert_ne!(from, to, "loop edges are not supported");
        debug_assert!(!weight_fwd.is_nan() && !weight_bwd.is_nan());
        let fwd = weight_fwd.is_finite();
        let bwd = weight_bwd.is_finite();
        if !fwd && !bwd {
            return;
        }
        if let Some(builder) = &mut self.orig_builder {
            builder.add_edge(from, to, edge, fwd, bwd);
        }
        if fwd {
            self.push_record(from, to, edge, weight_fwd, edge_key(edge, from, to));
        }
        if bwd {
            self.push_record(to, from, edge, weight_bwd, edge_key(edge, to, from));
        }
    }

    fn push_record(&mut self, from: NodeId, to: NodeId, edge: EdgeId, weight: Weight, key: EdgeKey) {
        let idx = self.records.len() as u32;
        self.records.push(EdgeRecord {
            prepare_edge: edge,
            from,
            to,
            weight,
            key_first: key,
            key_last: key,
            skipped1: INVALID_EDGE,
            skipped2: INVALID_EDGE,
            orig_edge_count: 1,
            next_out: self.out_head[from as usize],
            next_in: self.in_head[to as usize],
        });
        self.out_head[from as usize] = idx;
        self.in_head[to as usize] = idx;
    }

    /// Freezes the base edges. Must be called exactly once, before any
    /// shortcut is added. For edge-based graphs this builds the
    /// [`OrigGraph`].
    pub fn prepare_for_contraction(&mut self) {
        self.check_not_ready();
        self.ready = true;
        self.orig_graph = self.orig_builder.take().map(|builder| builder.build(self.num_nodes));
    }

    /// Adds a shortcut and returns its provisional prepare edge id.
    /// Prepare ids continue the original edge id space. Loop shortcuts
    /// (`from == to`, edge-based only) join only the out list.
    #[allow(clippy::too_many_arguments)]
    pub fn add_shortcut(
        &mut self,
        from: NodeId,
        to: NodeId,
        key_first: EdgeKey,
        key_last: EdgeKey,
        skipped1: EdgeId,
        skipped2: EdgeId,
        weight: Weight,
        orig_edge_count: u32,
    ) -> EdgeId {
        self.check_ready();
        debug_assert!(weight.is_finite());
        if self.next_prepare_id == INVALID_EDGE {
            log::error!("prepare edge id space exhausted after {} shortcuts", self.shortcut_final_ids.len());
            panic!("prepare edge id space exhausted");
        }
        let prepare_edge = self.next_prepare_id;
        self.next_prepare_id += 1;
        self.shortcut_final_ids.push(INVALID_EDGE);
        self.shortcut_orig_counts.push(orig_edge_count);

        let idx = self.records.len() as u32;
        self.records.push(EdgeRecord {
            prepare_edge,
            from,
            to,
            weight,
            key_first,
            key_last,
            skipped1,
            skipped2,
            orig_edge_count,
            next_out: self.out_head[from as usize],
            next_in: if from == to { INVALID_RECORD } else { self.in_head[to as usize] },
        });
        self.out_head[from as usize] = idx;
        if from != to {
            self.in_head[to as usize] = idx;
        }
        prepare_edge
    }

    /// Overwrites weight, skip pointers and original edge count of an
    /// existing shortcut record.
    pub fn update_shortcut(&mut self, record: u32, weight: Weight, skipped1: EdgeId, skipped2: EdgeId, orig_edge_count: u32) {
        self.check_ready();
        debug_assert!(weight.is_finite());
        let rec = &mut self.records[record as usize];
        debug_assert!(rec.skipped1 != INVALID_EDGE, "cannot update a base edge");
        rec.weight = weight;
        rec.skipped1 = skipped1;
        rec.skipped2 = skipped2;
        rec.orig_edge_count = orig_edge_count;
        self.shortcut_orig_counts[(rec.prepare_edge - self.num_edges as EdgeId) as usize] = orig_edge_count;
    }

    /// Records the final output edge id of a shortcut prepare edge.
    pub fn set_shortcut_for_prepare_edge(&mut self, prepare_edge: EdgeId, shortcut: EdgeId) {
        self.shortcut_final_ids[(prepare_edge - self.num_edges as EdgeId) as usize] = shortcut;
    }

    /// Resolves a prepare edge id to the final output edge id. Original
    /// edges map to themselves, shortcuts to the id recorded via
    /// [`set_shortcut_for_prepare_edge`](Self::set_shortcut_for_prepare_edge).
    pub fn shortcut_for_prepare_edge(&self, prepare_edge: EdgeId) -> EdgeId {
        if (prepare_edge as usize) < self.num_edges {
            prepare_edge
        } else {
            self.shortcut_final_ids[(prepare_edge - self.num_edges as EdgeId) as usize]
        }
    }

    /// The number of original edges a prepare edge stands for.
    pub fn orig_edge_count(&self, prepare_edge: EdgeId) -> u32 {
        if (prepare_edge as usize) < self.num_edges {
            1
        } else {
            self.shortcut_orig_counts[(prepare_edge - self.num_edges as EdgeId) as usize]
        }
    }

    /// Number of adjacency list entries at `node` (both directions, so a
    /// bidirectional base edge counts twice).
    pub fn degree(&self, node: NodeId) -> u32 {
        self.out_edges(node).count() as u32 + self.in_edges(node).count() as u32
    }

    pub fn out_edges(&self, node: NodeId) -> AdjacencyIter<'_> {
        AdjacencyIter {
            records: &self.records,
            cur: self.out_head[node as usize],
            out: true,
        }
    }

    pub fn in_edges(&self, node: NodeId) -> AdjacencyIter<'_> {
        AdjacencyIter {
            records: &self.records,
            cur: self.in_head[node as usize],
            out: false,
        }
    }

    /// Original edges leaving `node`. Edge-based graphs only, and only
    /// after the freeze.
    pub fn orig_out_edges(&self, node: NodeId) -> impl Iterator<Item = OrigEdge> + '_ {
        self.orig_graph().edges(node, false)
    }

    /// Original edges entering `node` (their `key` is still oriented away
    /// from `node`, reverse it to get the inbound orientation).
    pub fn orig_in_edges(&self, node: NodeId) -> impl Iterator<Item = OrigEdge> + '_ {
        self.orig_graph().edges(node, true)
    }

    fn orig_graph(&self) -> &OrigGraph {
        self.check_ready();
        self.orig_graph
            .as_ref()
            .expect("original edge exploration requires an edge-based graph")
    }

    /// Removes `node` from the adjacency lists of all its neighbors and
    /// clears its own lists. Returns the distinct neighbors in
    /// first-encounter order, which is deterministic for a given graph
    /// state.
    pub fn disconnect(&mut self, node: NodeId) -> Vec<NodeId> {
        self.check_ready();
        self.neighbor_set.clear();
        let mut idx = self.out_head[node as usize];
        while idx != INVALID_RECORD {
            let rec = self.records[idx as usize];
            if rec.to != node {
                self.unlink_in(rec.to, idx);
                self.neighbor_set.insert(rec.to);
            }
            idx = rec.next_out;
        }
        let mut idx = self.in_head[node as usize];
        while idx != INVALID_RECORD {
            let rec = self.records[idx as usize];
            if rec.from != node {
                self.unlink_out(rec.from, idx);
                self.neighbor_set.insert(rec.from);
            }
            idx = rec.next_in;
        }
        self.out_head[node as usize] = INVALID_RECORD;
        self.in_head[node as usize] = INVALID_RECORD;
        self.neighbor_set.iter().copied().collect()
    }

    fn unlink_out(&mut self, node: NodeId, record: u32) {
        let next = self.records[record as usize].next_out;
        let mut cur = self.out_head[node as usize];
        if cur == record {
            self.out_head[node as usize] = next;
            return;
        }
        while cur != INVALID_RECORD {
            if self.records[cur as usize].next_out == record {
                self.records[cur as usize].next_out = next;
                return;
            }
            cur = self.records[cur as usize].next_out;
        }
        debug_assert!(false, "record {} not in out list of node {}", record, node);
    }

    fn unlink_in(&mut self, node: NodeId, record: u32) {
        let next = self.records[record as usize].next_in;
        let mut cur = self.in_head[node as usize];
        if cur == record {
            self.in_head[node as usize] = next;
            return;
        }
        while cur != INVALID_RECORD {
            if self.records[cur as usize].next_in == record {
                self.records[cur as usize].next_in = next;
                return;
            }
            cur = self.records[cur as usize].next_in;
        }
        debug_assert!(false, "record {} not in in list of node {}", record, node);
    }

    fn check_ready(&self) {
        assert!(self.ready, "prepare_for_contraction was not called yet");
    }

    fn check_not_ready(&self) {
        assert!(!self.ready, "the graph was already prepared for contraction");
    }
}

/// Iterator over the out or in adjacency list of a node, yielding copied
/// [`PrepEdge`] views. For in lists, `from` is the neighbor and `to` the
/// base node.
#[derive(Debug)]
pub struct AdjacencyIter<'a> {
    records: &'a [EdgeRecord],
    cur: u32,
    out: bool,
}

impl Iterator for AdjacencyIter<'_> {
    type Item = PrepEdge;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cur == INVALID_RECORD {
            return None;
        }
        let idx = self.cur;
        let rec = &self.records[idx as usize];
        self.cur = if self.out { rec.next_out } else { rec.next_in };
        Some(PrepEdge {
            record: idx,
            prepare_edge: rec.prepare_edge,
            from: rec.from,
            to: rec.to,
            weight: rec.weight,
            key_first: rec.key_first,
            key_last: rec.key_last,
            skipped1: rec.skipped1,
            skipped2: rec.skipped2,
            orig_edge_count: rec.orig_edge_count,
        })
    }
}

/// Immutable CSR over the original edges, sorted by base node, with the
/// access direction flags packed beside the edge id. Lets the edge-based
/// search enumerate original in/out edges of a node without touching the
/// mutable adjacency lists.
#[derive(Debug)]
struct OrigGraph {
    first_out: Vec<u32>,
    adj_nodes: Vec<NodeId>,
    edges_and_flags: Vec<u32>,
}

const FLAG_FWD: u32 = 0b10;
const FLAG_BWD: u32 = 0b01;

impl OrigGraph {
    fn edges(&self, node: NodeId, reverse: bool) -> impl Iterator<Item = OrigEdge> + '_ {
        let range = self.first_out[node as usize] as usize..self.first_out[node as usize + 1] as usize;
        let access = if reverse { FLAG_BWD } else { FLAG_FWD };
        range.filter_map(move |i| {
            if self.edges_and_flags[i] & access == 0 {
                return None;
            }
            let adj_node = self.adj_nodes[i];
            let edge = self.edges_and_flags[i] >> 2;
            Some(OrigEdge {
                adj_node,
                edge,
                key: edge_key(edge, node, adj_node),
            })
        })
    }
}

#[derive(Debug, Default)]
struct OrigGraphBuilder {
    base_nodes: Vec<NodeId>,
    adj_nodes: Vec<NodeId>,
    edges_and_flags: Vec<u32>,
}

impl OrigGraphBuilder {
    fn add_edge(&mut self, from: NodeId, to: NodeId, edge: EdgeId, fwd: bool, bwd: bool) {
        assert!(edge < EdgeId::MAX >> 2, "edge id does not fit the packed representation");
        self.push(from, to, edge, fwd, bwd);
        self.push(to, from, edge, bwd, fwd);
    }

    fn push(&mut self, base: NodeId, adj: NodeId, edge: EdgeId, fwd: bool, bwd: bool) {
        self.base_nodes.push(base);
        self.adj_nodes.push(adj);
        self.edges_and_flags
            .push(edge << 2 | (fwd as u32) << 1 | bwd as u32);
    }

    fn build(self, num_nodes: usize) -> OrigGraph {
        let mut order: Vec<u32> = (0..self.base_nodes.len() as u32).collect();
        // stable, so entries of one node keep insertion order
        order.sort_by_key(|&i| self.base_nodes[i as usize]);

        let mut first_out = Vec::with_capacity(num_nodes + 1);
        first_out.push(0);
        let mut adj_nodes = Vec::with_capacity(order.len());
        let mut edges_and_flags = Vec::with_capacity(order.len());
        for &i in &order {
            while first_out.len() <= self.base_nodes[i as usize] as usize {
                first_out.push(adj_nodes.len() as u32);
            }
            adj_nodes.push(self.adj_nodes[i as usize]);
            edges_and_flags.push(self.edges_and_flags[i as usize]);
        }
        while first_out.len() <= num_nodes {
            first_out.push(adj_nodes.len() as u32);
        }
        OrigGraph {
            first_out,
            adj_nodes,
            edges_and_flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_graph() -> PreparationGraph {
        // 0 - 1 - 2 - 3, unit weights, bidirectional
        let mut g = PreparationGraph::node_based(4, 3);
        g.add_edge(0, 1, 0, 1.0, 1.0);
        g.add_edge(1, 2, 1, 1.0, 1.0);
        g.add_edge(2, 3, 2, 1.0, 1.0);
        g.prepare_for_contraction();
        g
    }

    #[test]
    fn adjacency_lists() {
        let g = line_graph();
        let out: Vec<_> = g.out_edges(1).map(|e| e.to).collect();
        let ins: Vec<_> = g.in_edges(1).map(|e| e.from).collect();
        assert_eq!(out.len(), 2);
        assert_eq!(ins.len(), 2);
        assert!(out.contains(&0) && out.contains(&2));
        assert!(ins.contains(&0) && ins.contains(&2));
        assert_eq!(g.degree(1), 4);
        assert_eq!(g.degree(0), 2);
    }

    #[test]
    fn one_way_edges_join_one_list_only() {
        let mut g = PreparationGraph::node_based(3, 2);
        g.add_edge(0, 1, 0, 2.0, INFINITY);
        g.add_edge(1, 2, 1, INFINITY, INFINITY);
        g.prepare_for_contraction();
        assert_eq!(g.out_edges(0).count(), 1);
        assert_eq!(g.in_edges(0).count(), 0);
        assert_eq!(g.out_edges(1).count(), 0);
        assert_eq!(g.in_edges(1).count(), 1);
        assert_eq!(g.degree(2), 0);
    }

    #[test]
    fn disconnect_unlinks_both_directions() {
        let mut g = line_graph();
        let neighbors = g.disconnect(1);
        assert_eq!(neighbors.len(), 2);
        assert!(neighbors.contains(&0) && neighbors.contains(&2));
        assert_eq!(g.degree(1), 0);
        assert_eq!(g.degree(0), 0);
        assert_eq!(g.out_edges(2).map(|e| e.to).collect::<Vec<_>>(), vec![3]);
        assert_eq!(g.in_edges(2).map(|e| e.from).collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn disconnect_is_deterministic() {
        let neighbors_a = line_graph().disconnect(1);
        let neighbors_b = line_graph().disconnect(1);
        assert_eq!(neighbors_a, neighbors_b);
    }

    #[test]
    fn shortcut_ids_continue_edge_ids() {
        let mut g = line_graph();
        let sc = g.add_shortcut(0, 2, INVALID_EDGE, INVALID_EDGE, 0, 1, 2.0, 2);
        assert_eq!(sc, 3);
        assert_eq!(g.shortcut_for_prepare_edge(2), 2);
        assert_eq!(g.shortcut_for_prepare_edge(sc), INVALID_EDGE);
        g.set_shortcut_for_prepare_edge(sc, 7);
        assert_eq!(g.shortcut_for_prepare_edge(sc), 7);
        assert_eq!(g.orig_edge_count(sc), 2);
        assert_eq!(g.orig_edge_count(1), 1);
        let shortcut = g.out_edges(0).find(|e| e.is_shortcut()).unwrap();
        assert_eq!((shortcut.to, shortcut.weight), (2, 2.0));
    }

    #[test]
    #[should_panic(expected = "already prepared")]
    fn add_edge_after_freeze_panics() {
        let mut g = line_graph();
        g.add_edge(0, 2, 3, 1.0, 1.0);
    }

    #[test]
    #[should_panic(expected = "prepare_for_contraction")]
    fn add_shortcut_before_freeze_panics() {
        let mut g = PreparationGraph::node_based(2, 1);
        g.add_shortcut(0, 1, INVALID_EDGE, INVALID_EDGE, 0, 0, 1.0, 2);
    }

    #[test]
    #[should_panic(expected = "prepare_for_contraction")]
    fn update_shortcut_before_freeze_panics() {
        let mut g = PreparationGraph::node_based(2, 1);
        g.add_edge(0, 1, 0, 1.0, 1.0);
        g.update_shortcut(0, 2.0, 0, 0, 2);
    }

    #[test]
    #[should_panic(expected = "NaN")]
    fn nan_weight_panics_with_the_offending_edge() {
        let mut graph = EdgeList::new(2);
        let edge = graph.add_edge(0, 1);
        let mut weighting = TableWeighting::new();
        weighting.set_edge_weight(edge, f64::NAN, 1.0);
        PreparationGraph::from_graph(&graph, &weighting, false);
    }

    #[test]
    fn orig_graph_respects_directions() {
        let mut g = PreparationGraph::edge_based(3, 3);
        g.add_edge(0, 1, 0, 1.0, 1.0);
        g.add_edge(1, 2, 1, 1.0, INFINITY);
        g.add_edge(2, 0, 2, INFINITY, 1.0);
        g.prepare_for_contraction();

        let out1: Vec<_> = g.orig_out_edges(1).map(|e| (e.adj_node, e.edge)).collect();
        assert!(out1.contains(&(0, 0)) && out1.contains(&(2, 1)));
        let in1: Vec<_> = g.orig_in_edges(1).map(|e| (e.adj_node, e.edge)).collect();
        assert_eq!(in1, vec![(0, 0)]);
        // edge 2 is only usable 0 -> 2, so node 2 has two in edges and no out edge
        let in2: Vec<_> = g.orig_in_edges(2).map(|e| e.edge).collect();
        assert_eq!(in2, vec![1, 2]);
        assert_eq!(g.orig_out_edges(2).count(), 0);

        for e in g.orig_out_edges(1) {
            assert_eq!(e.key, edge_key(e.edge, 1, e.adj_node));
        }
    }
}
