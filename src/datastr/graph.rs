//! Fundamental graph types and traits.
//!
//! Nodes and edges are identified by consecutive unsigned ids.
//! Weights are `f64` where `INFINITY` encodes "forbidden"; `NaN` weights
//! are a bug in the supplied weighting and cause a panic during graph
//! construction.

use rustc_hash::FxHashMap;

/// Node ids are unsigned 32 bit integers
pub type NodeId = u32;
/// Edge ids are unsigned 32 bit integers
pub type EdgeId = u32;
/// Directed edge identifier, see [`edge_key`]
pub type EdgeKey = u32;
/// Edge and turn weights
pub type Weight = f64;
/// The weight of forbidden edges and turns
pub const INFINITY: Weight = f64::INFINITY;

/// Sentinel for "no edge" in flat arrays where an `Option` would bloat the layout.
pub const INVALID_EDGE: EdgeId = EdgeId::MAX;

/// Derives the directed key of an edge traversed from `from` to `to`.
///
/// The two traversal directions of one stored edge get the keys
/// `edge << 1` and `edge << 1 | 1`. Which direction gets the even key only
/// depends on the node ids, so seeding and expansion of the edge based
/// witness search always agree on the key of an edge.
#[inline]
pub fn edge_key(edge: EdgeId, from: NodeId, to: NodeId) -> EdgeKey {
    debug_assert_ne!(from, to);
    (edge << 1) | (from > to) as EdgeKey
}

/// The stored edge id of a directed edge key.
#[inline]
pub fn edge_from_key(key: EdgeKey) -> EdgeId {
    key >> 1
}

/// The key of the opposite traversal direction.
#[inline]
pub fn reverse_edge_key(key: EdgeKey) -> EdgeKey {
    key ^ 1
}

/// Base trait for graphs with consecutively numbered nodes and edges.
pub trait Graph {
    fn num_nodes(&self) -> usize;
    fn num_edges(&self) -> usize;
}

/// Random access to the endpoints of each stored edge.
///
/// This is all the preparation needs from the input graph, adjacency
/// structures are built internally.
pub trait EdgeAccessGraph: Graph {
    /// The two endpoints of an edge. Loops (`from == to`) are not supported.
    fn endpoints(&self, edge: EdgeId) -> (NodeId, NodeId);
}

/// Edge and turn weights consumed by the preparation.
///
/// Implementations must be deterministic and side effect free.
/// `INFINITY` encodes forbidden edges/turns, negative weights are not
/// allowed and `NaN` is a fatal error.
pub trait Weighting {
    /// Weight of traversing `edge` in storage direction (`reverse == false`)
    /// or against it.
    fn edge_weight(&self, edge: EdgeId, reverse: bool) -> Weight;

    /// Weight of the turn from `in_edge` onto `out_edge` at `via`.
    fn turn_weight(&self, in_edge: EdgeId, via: NodeId, out_edge: EdgeId) -> Weight;
}

/// A plain edge list input graph.
#[derive(Debug, Clone, Default)]
pub struct EdgeList {
    num_nodes: usize,
    edges: Vec<(NodeId, NodeId)>,
}

impl EdgeList {
    pub fn new(num_nodes: usize) -> Self {
        EdgeList { num_nodes, edges: Vec::new() }
    }

    /// Appends an edge and returns its id.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) -> EdgeId {
        assert_ne!(from, to, "loop edges are not supported");
        assert!((from as usize) < self.num_nodes && (to as usize) < self.num_nodes);
        let id = self.edges.len() as EdgeId;
        self.edges.push((from, to));
        id
    }
}

impl Graph for EdgeList {
    fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    fn num_edges(&self) -> usize {
        self.edges.len()
    }
}

impl EdgeAccessGraph for EdgeList {
    fn endpoints(&self, edge: EdgeId) -> (NodeId, NodeId) {
        self.edges[edge as usize]
    }
}

/// A weighting backed by per edge weight pairs and an explicit turn cost table.
///
/// Turns without a table entry cost zero, u-turns cost `u_turn_cost`
/// (infinite by default, i.e. forbidden).
#[derive(Debug, Clone)]
pub struct TableWeighting {
    weights: Vec<(Weight, Weight)>,
    turn_costs: FxHashMap<(EdgeId, NodeId, EdgeId), Weight>,
    u_turn_cost: Weight,
}

impl TableWeighting {
    pub fn new() -> Self {
        TableWeighting {
            weights: Vec::new(),
            turn_costs: FxHashMap::default(),
            u_turn_cost: INFINITY,
        }
    }

    /// Sets the weight pair of `edge`, growing the table as necessary.
    pub fn set_edge_weight(&mut self, edge: EdgeId, forward: Weight, backward: Weight) {
        if self.weights.len() <= edge as usize {
            self.weights.resize(edge as usize + 1, (INFINITY, INFINITY));
        }
        self.weights[edge as usize] = (forward, backward);
    }

    pub fn set_turn_cost(&mut self, in_edge: EdgeId, via: NodeId, out_edge: EdgeId, cost: Weight) {
        self.turn_costs.insert((in_edge, via, out_edge), cost);
    }

    pub fn set_u_turn_cost(&mut self, cost: Weight) {
        self.u_turn_cost = cost;
    }
}

impl Default for TableWeighting {
    fn default() -> Self {
        Self::new()
    }
}

impl Weighting for TableWeighting {
    fn edge_weight(&self, edge: EdgeId, reverse: bool) -> Weight {
        let (forward, backward) = self.weights[edge as usize];
        if reverse {
            backward
        } else {
            forward
        }
    }

    fn turn_weight(&self, in_edge: EdgeId, via: NodeId, out_edge: EdgeId) -> Weight {
        if in_edge == out_edge {
            return self.u_turn_cost;
        }
        self.turn_costs.get(&(in_edge, via, out_edge)).copied().unwrap_or(0.0)
    }
}
