//! Contraction Hierarchy preparation for road graphs.
//!
//! This crate implements the preprocessing side of Contraction Hierarchies:
//! nodes are ordered by a contraction priority and removed ("contracted")
//! one at a time, while local witness path searches decide which shortcut
//! edges must be inserted to preserve shortest path distances among the
//! remaining nodes. Both the classic node-based variant and the edge-based
//! variant with turn costs are supported.
//!
//! Query algorithms over the prepared hierarchy are not part of this crate,
//! the produced [`ChGraph`](algo::ch::ch_graph::ChGraph) carries everything they need
//! (levels, shortcuts with direction flags and skip pointers).

pub mod algo;
pub mod datastr;
