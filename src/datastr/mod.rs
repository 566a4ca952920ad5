//! Basic data structures for preprocessing algorithms.

pub mod graph;
pub mod index_heap;
pub mod stats;
