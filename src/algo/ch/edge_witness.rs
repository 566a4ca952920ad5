//! Witness search for edge-based contraction.

use super::prepare_graph::PreparationGraph;
use crate::datastr::graph::*;
use crate::datastr::index_heap::IndexdMinHeap;
use crate::datastr::stats::RunningStats;
use rustc_hash::FxHashMap;

/// Weight threshold below which a loop is treated as a zero weight loop.
const MAX_ZERO_WEIGHT_LOOP: Weight = 1.0e-3;
/// On equal weights a witness path is preferred over a bridge path.
const WITNESS_TOLERANCE: Weight = 1.0e-6;

const INVALID_NODE: NodeId = NodeId::MAX;

/// Self-tuning knobs for the settled edge cap.
#[derive(Debug, Clone)]
pub struct EdgeWitnessSearchParams {
    /// Number of standard deviations above the mean settled edge count at
    /// which the next searches are capped.
    pub sigma_factor: f64,
    pub minimum_max_settled_edges: usize,
    /// Number of searches after which the cap is recomputed and the settled
    /// edge statistics start over.
    pub stats_reset_interval: u64,
}

impl Default for EdgeWitnessSearchParams {
    fn default() -> Self {
        EdgeWitnessSearchParams {
            sigma_factor: 3.0,
            minimum_max_settled_edges: 100,
            stats_reset_interval: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Parent {
    Invalid,
    /// Parent of an initial entry, stored in the root parent table.
    Root,
    Key(EdgeKey),
}

/// Data attached to the parent of an initial entry: the first original edge
/// key of the path and the turn weight from the source edge onto it.
#[derive(Debug, Clone, Copy)]
struct RootParent {
    key_first: EdgeKey,
    turn_weight: Weight,
}

/// One entry of a bridge path, keyed by the original edge key the path uses
/// to enter `adj_node`.
#[derive(Debug, Clone, Copy)]
pub struct WitnessSearchEntry {
    pub prepare_edge: EdgeId,
    pub key: EdgeKey,
    pub adj_node: NodeId,
    pub weight: Weight,
}

/// A best path from source edge to target edge that runs over the center
/// node only, possibly with loops at the center. Exactly the paths that
/// require shortcuts. Entry weights exclude the initial turn off the source
/// edge, so they can be used as shortcut weights directly.
#[derive(Debug)]
pub struct BridgePath {
    /// Path entries, root first. The root's adjacent node is the center.
    pub entries: Vec<WitnessSearchEntry>,
    /// First original edge key of the whole path.
    pub key_first: EdgeKey,
}

/// A turn-cost-aware Dijkstra over original edge keys used to decide
/// whether contracting the center node requires a shortcut between a given
/// source and target edge.
///
/// Let x be the center node and s, t neighbors of x. For an original edge
/// incoming to s the search finds the minimal path to each original edge
/// incoming to t, including the final turn onto a target edge outgoing from
/// t. Two outcomes matter: the best path consists of one edge s -> x, any
/// number of loops at x and one edge x -> t (a bridge path, reported via
/// [`BridgePath`]), or some cheaper path avoids x (a witness, reported as
/// `None`).
///
/// The shortest path tree is kept across [`run_search`](Self::run_search)
/// calls for different target edges and only dropped by the next
/// [`init_search`](Self::init_search). The search must never miss an
/// existing bridge path, so after the settled edge cap is exceeded only
/// entries still on a path to the center are expanded. The cap itself is
/// derived from the settled edge statistics of previous searches.
#[derive(Debug)]
pub struct EdgeBasedWitnessSearch {
    params: EdgeWitnessSearchParams,

    source_edge: EdgeId,
    source_node: NodeId,
    center_node: NodeId,
    best_weight: Weight,
    best_inc_key: EdgeKey,
    best_is_bridge: bool,
    num_paths_to_center: i32,
    num_settled: usize,

    // shortest path tree, indexed by original edge key
    weights: Vec<Weight>,
    prepare_edges: Vec<EdgeId>,
    parents: Vec<Parent>,
    adj_nodes: Vec<NodeId>,
    path_to_center: Vec<bool>,
    root_parents: FxHashMap<EdgeKey, RootParent>,
    changed_keys: Vec<EdgeKey>,
    heap: IndexdMinHeap,

    max_settled: usize,
    settled_stats: RunningStats,
    num_searches: u64,
    num_polled_total: u64,
    num_settled_total: u64,
}

impl EdgeBasedWitnessSearch {
    pub fn new(num_original_edges: usize) -> Self {
        Self::with_params(num_original_edges, EdgeWitnessSearchParams::default())
    }

    pub fn with_params(num_original_edges: usize, params: EdgeWitnessSearchParams) -> Self {
        let num_keys = 2 * num_original_edges;
        EdgeBasedWitnessSearch {
            max_settled: params.minimum_max_settled_edges,
            params,
            source_edge: INVALID_EDGE,
            source_node: INVALID_NODE,
            center_node: INVALID_NODE,
            best_weight: INFINITY,
            best_inc_key: INVALID_EDGE,
            best_is_bridge: false,
            num_paths_to_center: 0,
            num_settled: 0,
            weights: vec![INFINITY; num_keys],
            prepare_edges: vec![INVALID_EDGE; num_keys],
            parents: vec![Parent::Invalid; num_keys],
            adj_nodes: vec![INVALID_NODE; num_keys],
            path_to_center: vec![false; num_keys],
            root_parents: FxHashMap::default(),
            changed_keys: Vec::new(),
            heap: IndexdMinHeap::new(num_keys),
            settled_stats: RunningStats::new(),
            num_searches: 0,
            num_polled_total: 0,
            num_settled_total: 0,
        }
    }

    /// Drops the previous shortest path tree and seeds a new search from
    /// the original edge `source_edge` incoming to `source_node`, for the
    /// contraction of `center_node`.
    ///
    /// Returns the number of seeded entries. Zero means no seeded entry can
    /// reach the center at all, so no target query for this source edge can
    /// ever need a shortcut and the caller skips them.
    pub fn init_search<W: Weighting>(
        &mut self,
        graph: &PreparationGraph,
        weighting: &W,
        center_node: NodeId,
        source_node: NodeId,
        source_edge: EdgeId,
    ) -> usize {
        self.reset();
        self.source_edge = source_edge;
        self.source_node = source_node;
        self.center_node = center_node;
        self.set_initial_entries(graph, weighting);
        if self.num_paths_to_center < 1 {
            self.reset();
            return 0;
        }
        self.num_searches += 1;
        self.heap.len()
    }

    /// Extends the search towards the original edge `target_edge` outgoing
    /// from `target_node` and classifies the best path found. Returns the
    /// bridge path if one is the unique best path, `None` when a witness
    /// exists or nothing finite was found.
    pub fn run_search<W: Weighting>(&mut self, graph: &PreparationGraph, weighting: &W, target_node: NodeId, target_edge: EdgeId) -> Option<BridgePath> {
        // with equal source and target node a plain turn between the two
        // edges is already a witness candidate
        self.best_weight = if self.source_node == target_node {
            calc_turn_weight(weighting, self.source_edge, self.source_node, target_edge)
        } else {
            INFINITY
        };
        self.best_inc_key = INVALID_EDGE;
        self.best_is_bridge = false;

        // the tree built so far may already reach the target node
        for orig_edge in graph.orig_in_edges(target_node) {
            let key = reverse_edge_key(orig_edge.key);
            if self.prepare_edges[key as usize] == INVALID_EDGE {
                continue;
            }
            // a zero weight loop must not downgrade the best path from
            // bridge to witness status, there might be several of them and
            // only one gets a shortcut
            let is_zero_weight_loop = match self.parents[key as usize] {
                Parent::Key(parent) => {
                    self.adj_nodes[parent as usize] == target_node && self.weights[key as usize] - self.weights[parent as usize] <= MAX_ZERO_WEIGHT_LOOP
                }
                _ => false,
            };
            if !is_zero_weight_loop {
                self.update_best_path(weighting, target_node, target_edge, key);
            }
        }

        while let Some((curr, _)) = self.heap.peek() {
            if self.num_paths_to_center < 1 && (!self.best_is_bridge || self.best_weight.is_infinite()) {
                // no bridge path can be found anymore
                break;
            }
            let curr_key = curr as EdgeKey;
            if self.weights[curr] > self.best_weight {
                // entry is kept on the heap for later target queries
                break;
            }
            self.heap.pop();
            self.num_polled_total += 1;
            if self.path_to_center[curr] {
                self.num_paths_to_center -= 1;
            }
            // over budget, only entries that might yield a bridge path are
            // still expanded
            if self.num_settled > self.max_settled && !self.path_to_center[curr] {
                continue;
            }

            let from_node = self.adj_nodes[curr];
            for edge in graph.out_edges(from_node) {
                let turn_weight = calc_turn_weight(weighting, edge_from_key(curr_key), from_node, edge_from_key(edge.key_first));
                let edge_weight = edge.weight + turn_weight;
                let weight = edge_weight + self.weights[curr];
                if weight.is_infinite() {
                    continue;
                }
                // a zero weight loop at the source node would masquerade as
                // a witness for paths that actually need a loop shortcut
                if edge.to == from_node && from_node == self.source_node && edge_weight <= MAX_ZERO_WEIGHT_LOOP {
                    continue;
                }
                let is_path_to_center = self.path_to_center[curr] && edge.to == self.center_node;
                let is_zero_weight_loop = from_node == target_node && edge_weight <= MAX_ZERO_WEIGHT_LOOP;

                let key = edge.key_last;
                if self.prepare_edges[key as usize] == INVALID_EDGE {
                    self.set_entry(key, edge.prepare_edge, weight, Parent::Key(curr_key), edge.to, is_path_to_center);
                    self.changed_keys.push(key);
                    self.heap.push(key as usize, weight);
                    if !is_zero_weight_loop {
                        self.update_best_path(weighting, target_node, target_edge, key);
                    }
                } else if weight < self.weights[key as usize]
                    // an equal weight witness path is preferred over the bridge path
                    || (weight == self.weights[key as usize] && edge.to == target_node && !self.path_to_center[curr])
                {
                    self.update_entry(key, edge.prepare_edge, weight, Parent::Key(curr_key), is_path_to_center);
                    self.heap.push_or_update_key(key as usize, weight);
                    if !is_zero_weight_loop {
                        self.update_best_path(weighting, target_node, target_edge, key);
                    }
                }
            }
            self.num_settled += 1;
            self.num_settled_total += 1;
        }

        if !self.best_is_bridge {
            return None;
        }
        let mut entries = Vec::new();
        let mut key = self.best_inc_key;
        loop {
            entries.push(WitnessSearchEntry {
                prepare_edge: self.prepare_edges[key as usize],
                key,
                adj_node: self.adj_nodes[key as usize],
                weight: self.weights[key as usize],
            });
            match self.parents[key as usize] {
                Parent::Key(parent) => key = parent,
                Parent::Root => break,
                Parent::Invalid => unreachable!("path entry without a parent"),
            }
        }
        entries.reverse();
        let root = self.root_parents[&key];
        for entry in &mut entries {
            entry.weight -= root.turn_weight;
        }
        Some(BridgePath {
            entries,
            key_first: root.key_first,
        })
    }

    fn set_initial_entries<W: Weighting>(&mut self, graph: &PreparationGraph, weighting: &W) {
        for edge in graph.out_edges(self.source_node) {
            let turn_weight = calc_turn_weight(weighting, self.source_edge, self.source_node, edge_from_key(edge.key_first));
            if turn_weight.is_infinite() {
                continue;
            }
            let weight = turn_weight + edge.weight;
            if edge.to == self.source_node && weight <= MAX_ZERO_WEIGHT_LOOP {
                // see the zero weight loop skip in the main loop
                continue;
            }
            let is_path_to_center = edge.to == self.center_node;
            let key = edge.key_last;
            let root = RootParent {
                key_first: edge.key_first,
                turn_weight,
            };
            if self.prepare_edges[key as usize] == INVALID_EDGE {
                self.prepare_edges[key as usize] = edge.prepare_edge;
                self.weights[key as usize] = weight;
                self.parents[key as usize] = Parent::Root;
                self.adj_nodes[key as usize] = edge.to;
                self.path_to_center[key as usize] = is_path_to_center;
                self.root_parents.insert(key, root);
                self.changed_keys.push(key);
            } else if weight < self.weights[key as usize] {
                // several parallel edges may share the last original edge
                // key, only the cheapest one matters
                self.prepare_edges[key as usize] = edge.prepare_edge;
                self.weights[key as usize] = weight;
                self.parents[key as usize] = Parent::Root;
                self.path_to_center[key as usize] = is_path_to_center;
                self.root_parents.insert(key, root);
            }
        }
        for i in 0..self.changed_keys.len() {
            let key = self.changed_keys[i];
            if self.path_to_center[key as usize] {
                self.num_paths_to_center += 1;
            }
            self.heap.push(key as usize, self.weights[key as usize]);
        }
    }

    fn update_best_path<W: Weighting>(&mut self, weighting: &W, target_node: NodeId, target_edge: EdgeId, key: EdgeKey) {
        if self.adj_nodes[key as usize] != target_node {
            return;
        }
        let total_weight = self.weights[key as usize] + calc_turn_weight(weighting, edge_from_key(key), target_node, target_edge);
        // a path whose parent still runs to the center consists of the edge
        // into the center, loops at the center and the edge out of it
        let is_bridge = matches!(self.parents[key as usize], Parent::Key(parent) if self.path_to_center[parent as usize]);
        let tolerance = if is_bridge { 0.0 } else { WITNESS_TOLERANCE };
        if total_weight - tolerance < self.best_weight {
            self.best_weight = total_weight;
            self.best_inc_key = key;
            self.best_is_bridge = is_bridge;
        }
    }

    fn set_entry(&mut self, key: EdgeKey, prepare_edge: EdgeId, weight: Weight, parent: Parent, adj_node: NodeId, is_path_to_center: bool) {
        self.prepare_edges[key as usize] = prepare_edge;
        self.weights[key as usize] = weight;
        self.parents[key as usize] = parent;
        self.adj_nodes[key as usize] = adj_node;
        self.path_to_center[key as usize] = is_path_to_center;
        if is_path_to_center {
            self.num_paths_to_center += 1;
        }
    }

    fn update_entry(&mut self, key: EdgeKey, prepare_edge: EdgeId, weight: Weight, parent: Parent, is_path_to_center: bool) {
        self.prepare_edges[key as usize] = prepare_edge;
        self.weights[key as usize] = weight;
        self.parents[key as usize] = parent;
        if is_path_to_center != self.path_to_center[key as usize] {
            self.num_paths_to_center += if is_path_to_center { 1 } else { -1 };
            self.path_to_center[key as usize] = is_path_to_center;
        }
    }

    fn reset(&mut self) {
        self.update_max_settled();
        self.num_settled = 0;
        self.num_paths_to_center = 0;
        for i in 0..self.changed_keys.len() {
            let key = self.changed_keys[i] as usize;
            self.weights[key] = INFINITY;
            self.prepare_edges[key] = INVALID_EDGE;
            self.parents[key] = Parent::Invalid;
            self.adj_nodes[key] = INVALID_NODE;
            self.path_to_center[key] = false;
        }
        self.changed_keys.clear();
        self.root_parents.clear();
        self.heap.clear();
    }

    /// Feeds the settled edge count of the finished search into the running
    /// statistics and recomputes the cap once per reset interval.
    fn update_max_settled(&mut self) {
        self.settled_stats.add_observation(self.num_settled as f64);
        if self.settled_stats.count() == self.params.stats_reset_interval {
            let estimate = self.settled_stats.mean() + self.params.sigma_factor * self.settled_stats.variance().sqrt();
            self.max_settled = (estimate as usize).max(self.params.minimum_max_settled_edges);
            self.settled_stats.reset();
        }
    }

    /// The current cap on settled edges per search.
    pub fn max_settled_edges(&self) -> usize {
        self.max_settled
    }

    pub fn num_polled_edges(&self) -> u64 {
        self.num_polled_total
    }

    pub fn statistics(&self) -> String {
        format!(
            "searches: {}, avg settled: {:.1}, max settled cap: {}",
            self.num_searches,
            self.num_settled_total as f64 / (self.num_searches.max(1)) as f64,
            self.max_settled
        )
    }
}

/// U-turns are never taken during witness searches, whatever the weighting
/// says about them.
fn calc_turn_weight<W: Weighting>(weighting: &W, in_edge: EdgeId, via_node: NodeId, out_edge: EdgeId) -> Weight {
    if in_edge == out_edge {
        return INFINITY;
    }
    weighting.turn_weight(in_edge, via_node, out_edge)
}
