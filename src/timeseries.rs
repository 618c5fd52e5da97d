//! # Rolling Buffer Module
//!
//! Fixed-capacity FIFO storage used for every live channel, every computed
//! metric and the HRV analysis window.
//!
//! Inserting into a full buffer evicts the oldest value. Snapshots are plain
//! ordered copies so readers never hold a reference into live state.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct RollingBuffer<T> {
    data: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> RollingBuffer<T> {
    /// A zero capacity is bumped to one so `push` always retains the newest value
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: T) {
        if self.data.len() == self.capacity {
            self.data.pop_front();
        }
        self.data.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Ordered copy, oldest first
    pub fn snapshot(&self) -> Vec<T> {
        self.data.iter().cloned().collect()
    }
}

pub trait ValueSliceExt {
    fn min_max(&self) -> Option<(f64, f64)>;
}

impl ValueSliceExt for [f64] {
    fn min_max(&self) -> Option<(f64, f64)> {
        self.iter().fold(None, |acc, &value| match acc {
            None => Some((value, value)),
            Some((min, max)) => Some((min.min(value), max.max(value))),
        })
    }
}
