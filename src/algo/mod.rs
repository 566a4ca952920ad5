//! Preprocessing algorithms.

pub mod ch;
