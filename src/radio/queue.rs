use super::message::OutboundMessage;
use super::DOWNLINK_QUEUE_CAPACITY;
use heapless::Vec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("downlink queue full ({capacity} messages)")]
    Full { capacity: usize },
}

#[derive(Debug)]
struct Queued {
    seq: u64,
    message: OutboundMessage,
}

/// Bounded outbound queue, highest priority first, FIFO among equals.
#[derive(Debug)]
pub struct TransmissionQueue {
    entries: Vec<Queued, DOWNLINK_QUEUE_CAPACITY>,
    capacity: usize,
    next_seq: u64,
    total_enqueued: u32,
    total_rejected: u32,
}

impl TransmissionQueue {
    pub fn new() -> Self {
        Self::with_capacity(DOWNLINK_QUEUE_CAPACITY)
    }

    /// Capacity is clamped to the compile-time maximum.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity: capacity.clamp(1, DOWNLINK_QUEUE_CAPACITY),
            next_seq: 0,
            total_enqueued: 0,
            total_rejected: 0,
        }
    }

    pub fn push(&mut self, message: OutboundMessage) -> Result<(), QueueError> {
        if self.entries.len() >= self.capacity {
            self.total_rejected = self.total_rejected.saturating_add(1);
            return Err(QueueError::Full {
                capacity: self.capacity,
            });
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        if self.entries.push(Queued { seq, message }).is_err() {
            return Err(QueueError::Full {
                capacity: self.capacity,
            });
        }
        // stable sort keeps insertion order among equal priorities
        self.entries
            .sort_by(|a, b| b.message.priority().cmp(&a.message.priority()));
        self.total_enqueued = self.total_enqueued.saturating_add(1);

        debug_assert!(
            self.entries.windows(2).all(|w| {
                w[0].message.priority() > w[1].message.priority()
                    || (w[0].message.priority() == w[1].message.priority() && w[0].seq < w[1].seq)
            }),
            "downlink queue order violated"
        );
        Ok(())
    }

    pub fn front(&self) -> Option<&OutboundMessage> {
        self.entries.first().map(|q| &q.message)
    }

    pub fn front_mut(&mut self) -> Option<&mut OutboundMessage> {
        self.entries.first_mut().map(|q| &mut q.message)
    }

    pub fn pop(&mut self) -> Option<OutboundMessage> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0).message)
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn total_enqueued(&self) -> u32 {
        self.total_enqueued
    }

    pub fn total_rejected(&self) -> u32 {
        self.total_rejected
    }
}

impl Default for TransmissionQueue {
    fn default() -> Self {
        Self::new()
    }
}
