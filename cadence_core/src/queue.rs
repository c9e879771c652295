// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Internal bounded queue utilities.

use alloc::collections::VecDeque;

/// Bounded FIFO queue with a `drop_oldest` overflow policy.
///
/// Once full, new pushes remove the oldest item before inserting the newest.
#[derive(Debug, Clone)]
pub(crate) struct BoundedQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
    dropped_count: u64,
}

impl<T> BoundedQueue<T> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            dropped_count: 0,
        }
    }

    pub(crate) fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            let _ = self.items.pop_front();
            self.dropped_count += 1;
        }
        self.items.push_back(item);
    }

    /// Keeps items for which `keep` returns `true`, oldest first.
    pub(crate) fn retain(&mut self, keep: impl FnMut(&T) -> bool) {
        self.items.retain(keep);
    }

    pub(crate) fn clear(&mut self) {
        self.items.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn dropped_count(&self) -> u64 {
        self.dropped_count
    }
}
