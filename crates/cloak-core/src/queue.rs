//! Ready queue of verified, undelivered messages.

use std::collections::VecDeque;

/// FIFO of log indices awaiting delivery.
///
/// Each index refers to a valid `Recv` entry in the accountability log and
/// appears at most once. Order is global arrival order across all
/// connections; taking an entry from the middle leaves the relative order of
/// everything else intact.
#[derive(Debug, Clone, Default)]
pub struct ReadyQueue {
    indices: VecDeque<usize>,
}

impl ReadyQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a log index at the back.
    pub fn push(&mut self, index: usize) {
        debug_assert!(!self.indices.contains(&index), "log index {index} queued twice");
        self.indices.push_back(index);
    }

    /// Remove and return the first index accepted by `matches`.
    pub fn take_first(&mut self, mut matches: impl FnMut(usize) -> bool) -> Option<usize> {
        let position = self.indices.iter().position(|&index| matches(index))?;
        self.indices.remove(position)
    }

    /// Number of queued indices.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Queued indices, front first.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.indices.iter().copied()
    }

    /// Drop every queued index.
    pub fn clear(&mut self) {
        self.indices.clear();
    }
}
