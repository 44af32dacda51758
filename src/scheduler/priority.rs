//! Priority ordering shared by the task scheduler and load admission.
//!
//! Higher priority pops first; equal priorities pop in arrival order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Heap entry: a payload keyed by priority and arrival sequence.
#[derive(Debug)]
pub struct PrioritizedItem<T> {
    pub priority: i32,
    pub sequence: u64,
    pub item: T,
}

impl<T> PartialEq for PrioritizedItem<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl<T> Eq for PrioritizedItem<T> {}

impl<T> PartialOrd for PrioritizedItem<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for PrioritizedItem<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: reverse the sequence so earlier arrivals win ties.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Binary-heap priority queue with stable tie-breaking.
pub struct PriorityQueue<T> {
    heap: BinaryHeap<PrioritizedItem<T>>,
    next_sequence: u64,
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_sequence: 0,
        }
    }

    pub fn push(&mut self, item: T, priority: i32) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.push_with_sequence(item, priority, sequence);
    }

    /// Push with a caller-assigned sequence, for items whose arrival order
    /// was fixed before they became eligible (e.g. tasks released by a
    /// completed dependency).
    pub fn push_with_sequence(&mut self, item: T, priority: i32, sequence: u64) {
        self.heap.push(PrioritizedItem { priority, sequence, item });
    }

    pub fn pop(&mut self) -> Option<T> {
        self.heap.pop().map(|p| p.item)
    }

    pub fn peek(&self) -> Option<&T> {
        self.heap.peek().map(|p| &p.item)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.next_sequence = 0;
    }
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_priority_then_arrival() {
        let mut queue = PriorityQueue::new();
        queue.push("low", -1);
        queue.push("first-normal", 0);
        queue.push("high", 10);
        queue.push("second-normal", 0);

        assert_eq!(queue.pop(), Some("high"));
        assert_eq!(queue.pop(), Some("first-normal"));
        assert_eq!(queue.pop(), Some("second-normal"));
        assert_eq!(queue.pop(), Some("low"));
        assert!(queue.is_empty());
    }

    #[test]
    fn explicit_sequence_preserves_original_arrival() {
        let mut queue = PriorityQueue::new();
        queue.push_with_sequence("late", 5, 9);
        queue.push_with_sequence("early", 5, 2);
        assert_eq!(queue.peek(), Some(&"early"));
        assert_eq!(queue.len(), 2);
    }
}
