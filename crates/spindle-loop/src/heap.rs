// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Min-heap of timer deadlines.
//!
//! Cancellation is lazy: the loop drops the callback and the stale heap
//! entry is skipped when it reaches the top, or swept by `retain` once
//! stale entries outnumber live ones.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use crate::TimerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    deadline: Duration,
    timer: TimerId,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: earliest deadline first, then registration order.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.timer.cmp(&self.timer))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub(crate) struct TimerHeap {
    heap: BinaryHeap<Entry>,
}

impl TimerHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_reserve(&mut self) -> Result<(), std::collections::TryReserveError> {
        self.heap.try_reserve(1)
    }

    pub fn push(&mut self, timer: TimerId, deadline: Duration) {
        self.heap.push(Entry { deadline, timer });
    }

    pub fn peek(&self) -> Option<(TimerId, Duration)> {
        self.heap.peek().map(|e| (e.timer, e.deadline))
    }

    pub fn pop(&mut self) -> Option<(TimerId, Duration)> {
        self.heap.pop().map(|e| (e.timer, e.deadline))
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Keep only entries whose timer satisfies `live`.
    pub fn retain<F>(&mut self, mut live: F)
    where
        F: FnMut(TimerId) -> bool,
    {
        self.heap.retain(|e| live(e.timer));
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}
