use crate::models::OrderBookDiff;
use std::collections::VecDeque;

/// Bounded FIFO of diffs received while a snapshot fetch is in flight.
///
/// On overflow the oldest diff is evicted. An eviction always leaves a hole
/// in the sequence, so the continuity check reports a gap when the buffer is
/// drained and the caller bootstraps again instead of publishing a torn book.
#[derive(Debug)]
pub struct DiffBuffer {
    queue: VecDeque<OrderBookDiff>,
    capacity: usize,
    dropped: u64,
}

impl DiffBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            dropped: 0,
        }
    }

    /// Appends `diff` in arrival order. Returns true if an older diff had to
    /// be evicted to make room.
    pub fn push(&mut self, diff: OrderBookDiff) -> bool {
        let evicted = if self.queue.len() >= self.capacity {
            self.queue.pop_front();
            self.dropped += 1;
            true
        } else {
            false
        };
        self.queue.push_back(diff);
        evicted
    }

    pub fn pop(&mut self) -> Option<OrderBookDiff> {
        self.queue.pop_front()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total diffs evicted over the buffer's lifetime.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff(id: u64) -> OrderBookDiff {
        OrderBookDiff {
            first_update_id: id,
            last_update_id: id,
            timestamp: id,
            bid_changes: vec![],
            ask_changes: vec![],
        }
    }

    #[test]
    fn keeps_arrival_order() {
        let mut buffer = DiffBuffer::new(4);
        for id in [3, 1, 2] {
            buffer.push(diff(id));
        }
        let order: Vec<_> = std::iter::from_fn(|| buffer.pop()).map(|d| d.first_update_id).collect();
        assert_eq!(order, vec![3, 1, 2]);
    }

    #[test]
    fn overflow_evicts_oldest() {
        let mut buffer = DiffBuffer::new(2);
        assert!(!buffer.push(diff(1)));
        assert!(!buffer.push(diff(2)));
        assert!(buffer.push(diff(3)));

        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.dropped(), 1);
        assert_eq!(buffer.pop().map(|d| d.first_update_id), Some(2));
    }
}
