//! Bounded FIFO of payloads awaiting delivery.

use std::collections::VecDeque;

use crate::error::EnqueueRejected;

/// Default number of payloads a client holds before dropping new ones.
pub const DEFAULT_QUEUE_CAPACITY: usize = 50;

/// Ordered payload buffer with a fixed capacity.
///
/// Payloads are appended at the tail and leave from the head, either after
/// a confirmed delivery or when the retry controller discards them. The
/// queue never grows past its capacity.
#[derive(Debug, Clone)]
pub struct DeliveryQueue {
    payloads: VecDeque<String>,
    capacity: usize,
}

impl DeliveryQueue {
    /// Creates an empty queue holding at most `capacity` payloads.
    pub fn new(capacity: usize) -> Self {
        Self { payloads: VecDeque::with_capacity(capacity), capacity }
    }

    /// Appends a payload at the tail.
    ///
    /// # Errors
    ///
    /// Returns `EnqueueRejected::QueueFull` and leaves the queue untouched
    /// when it is already at capacity.
    pub fn push(&mut self, payload: String) -> Result<(), EnqueueRejected> {
        if self.payloads.len() >= self.capacity {
            return Err(EnqueueRejected::QueueFull { capacity: self.capacity });
        }
        self.payloads.push_back(payload);
        Ok(())
    }

    /// The payload that will be sent next, without removing it.
    pub fn front(&self) -> Option<&str> {
        self.payloads.front().map(String::as_str)
    }

    /// Removes the head payload.
    pub fn pop_front(&mut self) -> Option<String> {
        self.payloads.pop_front()
    }

    /// Discards every payload, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let discarded = self.payloads.len();
        self.payloads.clear();
        discarded
    }

    /// Number of queued payloads.
    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    /// Whether the queue holds no payloads.
    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    /// Maximum number of payloads.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for DeliveryQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_when_full() {
        let mut queue = DeliveryQueue::new(2);
        queue.push("a".into()).unwrap();
        queue.push("b".into()).unwrap();

        assert_eq!(queue.push("c".into()), Err(EnqueueRejected::QueueFull { capacity: 2 }));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.front(), Some("a"));
    }

    #[test]
    fn clear_reports_discarded_count() {
        let mut queue = DeliveryQueue::default();
        for i in 0..7 {
            queue.push(format!("{{\"Id\":{i}}}")).unwrap();
        }

        assert_eq!(queue.clear(), 7);
        assert!(queue.is_empty());
        assert_eq!(queue.capacity(), DEFAULT_QUEUE_CAPACITY);
    }
}
