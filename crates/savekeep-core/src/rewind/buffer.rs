//! Ring buffer of rewind snapshots.

use std::collections::VecDeque;

use crate::snapshot::Snapshot;

/// Fixed-capacity history of snapshots, oldest first.
///
/// Pushing beyond capacity evicts the oldest snapshot. Unlike a save slot the
/// history is only ever played back newest-to-oldest, so there is no random
/// write access.
#[derive(Debug)]
pub struct RewindBuffer {
    snapshots: VecDeque<Snapshot>,
    capacity: usize,
}

impl RewindBuffer {
    /// Creates an empty buffer. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            snapshots: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `snapshot`, evicting the oldest entries if over capacity.
    pub fn push(&mut self, snapshot: Snapshot) {
        self.snapshots.push_back(snapshot);
        while self.snapshots.len() > self.capacity {
            self.snapshots.pop_front();
        }
    }

    /// Snapshot at `index` (0 = oldest, `len - 1` = newest).
    #[inline]
    pub fn get(&self, index: usize) -> Option<&Snapshot> {
        self.snapshots.get(index)
    }

    #[inline]
    pub fn newest(&self) -> Option<&Snapshot> {
        self.snapshots.back()
    }

    #[inline]
    pub fn oldest(&self) -> Option<&Snapshot> {
        self.snapshots.front()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterates oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Snapshot> {
        self.snapshots.iter()
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }
}

impl Default for RewindBuffer {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_REWIND_CAPACITY)
    }
}
