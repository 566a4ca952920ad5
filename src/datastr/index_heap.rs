//! A priority queue indexed by dense integer ids.
//!
//! Forms the basis of all local searches and of the contraction queue.
//! In addition to the basic methods of a priority queue it allows updating
//! the key of a contained id in logarithmic time, which plain binary heaps
//! do not support.

use crate::datastr::graph::Weight;

const TREE_ARITY: usize = 4;
const INVALID_POSITION: usize = usize::MAX;

/// A 4-ary min-heap over `(id, weight)` pairs with support for decreasing
/// and increasing keys. Ids must be smaller than the capacity given on
/// creation and each id can be contained at most once.
///
/// Keys must never be `NaN`, ordering uses `f64::total_cmp`.
#[derive(Debug)]
pub struct IndexdMinHeap {
    positions: Vec<usize>,
    data: Vec<(usize, Weight)>,
}

impl IndexdMinHeap {
    /// Creates an empty heap for ids in `0..max_id`.
    pub fn new(max_id: usize) -> IndexdMinHeap {
        IndexdMinHeap {
            positions: vec![INVALID_POSITION; max_id],
            data: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Checks if the id is currently in the heap.
    pub fn contains(&self, id: usize) -> bool {
        self.positions[id] != INVALID_POSITION
    }

    /// The current key of a contained id.
    pub fn key_of(&self, id: usize) -> Option<Weight> {
        let position = self.positions[id];
        (position != INVALID_POSITION).then(|| self.data[position].1)
    }

    /// Drops all elements. Amortized O(contained elements).
    pub fn clear(&mut self) {
        for &(id, _) in &self.data {
            self.positions[id] = INVALID_POSITION;
        }
        self.data.clear();
    }

    /// The minimum element without removing it.
    pub fn peek(&self) -> Option<(usize, Weight)> {
        self.data.first().copied()
    }

    /// Inserts a new element. Panics if the id is already contained.
    pub fn push(&mut self, id: usize, key: Weight) {
        assert!(!self.contains(id));
        debug_assert!(!key.is_nan());
        let position = self.data.len();
        self.positions[id] = position;
        self.data.push((id, key));
        self.sift_up(position);
    }

    /// Removes and returns the minimum element.
    pub fn pop(&mut self) -> Option<(usize, Weight)> {
        if self.data.is_empty() {
            return None;
        }
        let last = self.data.len() - 1;
        self.data.swap(0, last);
        let (id, key) = self.data.pop().unwrap();
        self.positions[id] = INVALID_POSITION;
        if !self.data.is_empty() {
            self.positions[self.data[0].0] = 0;
            self.sift_down(0);
        }
        Some((id, key))
    }

    /// Sets the key of a contained id, restoring the heap property in
    /// either direction. Panics if the id is not contained.
    pub fn update_key(&mut self, id: usize, key: Weight) {
        debug_assert!(!key.is_nan());
        let position = self.positions[id];
        assert!(position != INVALID_POSITION);
        let old = self.data[position].1;
        self.data[position].1 = key;
        if key < old {
            self.sift_up(position);
        } else if key > old {
            self.sift_down(position);
        }
    }

    /// Inserts the id or updates its key if already contained.
    pub fn push_or_update_key(&mut self, id: usize, key: Weight) {
        if self.contains(id) {
            self.update_key(id, key);
        } else {
            self.push(id, key);
        }
    }

    fn sift_up(&mut self, mut position: usize) {
        while position > 0 {
            let parent = (position - 1) / TREE_ARITY;
            if self.data[parent].1.total_cmp(&self.data[position].1).is_le() {
                break;
            }
            self.swap_positions(parent, position);
            position = parent;
        }
    }

    fn sift_down(&mut self, mut position: usize) {
        loop {
            let first_child = TREE_ARITY * position + 1;
            if first_child >= self.data.len() {
                break;
            }
            let last_child = (TREE_ARITY * position + TREE_ARITY + 1).min(self.data.len());
            let mut smallest = position;
            for child in first_child..last_child {
                if self.data[child].1.total_cmp(&self.data[smallest].1).is_lt() {
                    smallest = child;
                }
            }
            if smallest == position {
                break;
            }
            self.swap_positions(smallest, position);
            position = smallest;
        }
    }

    fn swap_positions(&mut self, a: usize, b: usize) {
        self.data.swap(a, b);
        self.positions[self.data[a].0] = a;
        self.positions[self.data[b].0] = b;
    }
}
