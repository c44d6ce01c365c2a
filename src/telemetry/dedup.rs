//! Bounded recency set of deduplication keys

use std::collections::{HashSet, VecDeque};

/// Remembers the last `capacity` keys; the oldest key is evicted first
#[derive(Debug)]
pub struct DedupWindow {
    capacity: usize,
    keys: HashSet<String>,
    order: VecDeque<String>,
}

impl DedupWindow {
    /// Create a window holding at most `capacity` keys (at least one)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            keys: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// Record `key`. Returns `false` if it is already in the window.
    pub fn insert(&mut self, key: &str) -> bool {
        if self.keys.contains(key) {
            return false;
        }
        if self.order.len() == self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.keys.remove(&oldest);
        }
        self.keys.insert(key.to_string());
        self.order.push_back(key.to_string());
        true
    }

    /// Whether `key` is in the window
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    /// Keys currently held
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the window is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
