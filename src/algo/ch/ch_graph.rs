//! The prepared hierarchy produced by contraction.

use crate::datastr::graph::*;

/// Shortcut usable in storage direction (`from` towards `to`).
pub const SHORTCUT_FWD: u8 = 0b01;
/// Shortcut usable against storage direction.
pub const SHORTCUT_BWD: u8 = 0b10;
pub const SHORTCUT_BOTH: u8 = SHORTCUT_FWD | SHORTCUT_BWD;

/// A shortcut edge of the output hierarchy.
///
/// `skipped1`/`skipped2` reference the two halves the shortcut bypasses.
/// During contraction they hold provisional prepare edge ids and are
/// rewritten to final edge ids by
/// [`ChGraph::replace_skipped_edges`] once contraction finished.
/// `key_first`/`key_last` are the original edge keys spanned, only
/// meaningful for edge-based preparation (`INVALID_EDGE` otherwise).
#[derive(Debug, Clone, Copy)]
pub struct Shortcut {
    pub from: NodeId,
    pub to: NodeId,
    pub flags: u8,
    pub weight: Weight,
    pub skipped1: EdgeId,
    pub skipped2: EdgeId,
    pub key_first: EdgeKey,
    pub key_last: EdgeKey,
}

/// Levels and shortcuts of a (possibly partially) contracted graph.
///
/// Shortcut edge ids continue the original edge id space, the first
/// shortcut gets id `num_base_edges`. A node with `level == max_level`
/// has not been contracted.
#[derive(Debug)]
pub struct ChGraph {
    num_nodes: usize,
    num_base_edges: usize,
    levels: Vec<u32>,
    shortcuts: Vec<Shortcut>,
}

impl ChGraph {
    pub fn new(num_nodes: usize, num_base_edges: usize) -> Self {
        ChGraph {
            num_nodes,
            num_base_edges,
            levels: vec![num_nodes as u32; num_nodes],
            shortcuts: Vec::new(),
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn num_base_edges(&self) -> usize {
        self.num_base_edges
    }

    /// The level value marking uncontracted nodes.
    pub fn max_level(&self) -> u32 {
        self.num_nodes as u32
    }

    pub fn level(&self, node: NodeId) -> u32 {
        self.levels[node as usize]
    }

    pub fn set_level(&mut self, node: NodeId, level: u32) {
        self.levels[node as usize] = level;
    }

    pub fn is_contracted(&self, node: NodeId) -> bool {
        self.level(node) != self.max_level()
    }

    pub fn num_shortcuts(&self) -> usize {
        self.shortcuts.len()
    }

    pub fn shortcuts(&self) -> &[Shortcut] {
        &self.shortcuts
    }

    /// The shortcut stored under final edge id `edge`
    /// (`edge >= num_base_edges`).
    pub fn shortcut(&self, edge: EdgeId) -> &Shortcut {
        &self.shortcuts[edge as usize - self.num_base_edges]
    }

    /// Appends a node-based shortcut and returns its final edge id.
    pub fn add_shortcut(&mut self, from: NodeId, to: NodeId, flags: u8, weight: Weight, skipped1: EdgeId, skipped2: EdgeId) -> EdgeId {
        self.add_shortcut_edge_based(from, to, flags, weight, skipped1, skipped2, INVALID_EDGE, INVALID_EDGE)
    }

    /// Appends an edge-based shortcut carrying its original edge key span
    /// and returns its final edge id.
    #[allow(clippy::too_many_arguments)]
    pub fn add_shortcut_edge_based(
        &mut self,
        from: NodeId,
        to: NodeId,
        flags: u8,
        weight: Weight,
        skipped1: EdgeId,
        skipped2: EdgeId,
        key_first: EdgeKey,
        key_last: EdgeKey,
    ) -> EdgeId {
        debug_assert!(flags != 0 && flags <= SHORTCUT_BOTH);
        debug_assert!(weight.is_finite());
        let id = (self.num_base_edges + self.shortcuts.len()) as EdgeId;
        self.shortcuts.push(Shortcut {
            from,
            to,
            flags,
            weight,
            skipped1,
            skipped2,
            key_first,
            key_last,
        });
        id
    }

    /// Rewrites all skip pointers from provisional prepare edge ids to
    /// final edge ids. Called once after the last node was contracted.
    pub fn replace_skipped_edges(&mut self, resolve: impl Fn(EdgeId) -> EdgeId) {
        for shortcut in &mut self.shortcuts {
            shortcut.skipped1 = resolve(shortcut.skipped1);
            shortcut.skipped2 = resolve(shortcut.skipped2);
            assert!(
                shortcut.skipped1 != INVALID_EDGE && shortcut.skipped2 != INVALID_EDGE,
                "skip pointer references a shortcut that was never inserted"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortcut_ids_continue_base_edges() {
        let mut ch = ChGraph::new(5, 4);
        let first = ch.add_shortcut(1, 3, SHORTCUT_FWD, 2.0, 0, 1);
        let second = ch.add_shortcut(3, 1, SHORTCUT_BWD, 2.0, 1, 0);
        assert_eq!(first, 4);
        assert_eq!(second, 5);
        assert_eq!(ch.shortcut(4).to, 3);
        assert_eq!(ch.num_shortcuts(), 2);
    }

    #[test]
    fn levels_start_at_max() {
        let mut ch = ChGraph::new(3, 0);
        assert!(!ch.is_contracted(1));
        ch.set_level(1, 0);
        assert!(ch.is_contracted(1));
        assert_eq!(ch.level(0), ch.max_level());
    }

    #[test]
    fn skip_remap() {
        let mut ch = ChGraph::new(4, 2);
        ch.add_shortcut(0, 2, SHORTCUT_FWD, 2.0, 10, 11);
        ch.replace_skipped_edges(|prepare| prepare - 10);
        assert_eq!(ch.shortcut(2).skipped1, 0);
        assert_eq!(ch.shortcut(2).skipped2, 1);
    }
}
