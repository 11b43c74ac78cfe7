//! Outbound queue for messages submitted while the connection is not open.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// What to discard when a message arrives at a full queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverflowPolicy {
    /// Evict the oldest queued message to make room for the new one.
    #[default]
    DropOldest,
    /// Keep the queue as is and discard the new message.
    DropNewest,
}

/// A message already encoded for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct QueuedFrame {
    pub(crate) id: String,
    pub(crate) text: String,
}

/// Result of [`OutboundQueue::push`].
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PushOutcome {
    Queued,
    /// Queued after evicting the returned frame.
    Evicted(QueuedFrame),
    /// Not queued; the frame is handed back.
    Rejected(QueuedFrame),
}

/// Bounded FIFO of encoded frames.
///
/// A capacity of zero disables offline buffering entirely: every push is
/// rejected, which matches a client that only sends while connected.
#[derive(Debug)]
pub(crate) struct OutboundQueue {
    frames: VecDeque<QueuedFrame>,
    capacity: usize,
    policy: OverflowPolicy,
}

impl OutboundQueue {
    pub(crate) fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            policy,
        }
    }

    pub(crate) fn push(&mut self, frame: QueuedFrame) -> PushOutcome {
        if self.capacity == 0 {
            return PushOutcome::Rejected(frame);
        }
        if self.frames.len() < self.capacity {
            self.frames.push_back(frame);
            return PushOutcome::Queued;
        }
        match self.policy {
            OverflowPolicy::DropNewest => PushOutcome::Rejected(frame),
            OverflowPolicy::DropOldest => {
                let evicted = self.frames.pop_front();
                self.frames.push_back(frame);
                match evicted {
                    Some(old) => PushOutcome::Evicted(old),
                    None => PushOutcome::Queued,
                }
            }
        }
    }

    /// Puts a frame back at the head, e.g. after a failed flush.
    ///
    /// Ignores the capacity: the frame was already accounted for.
    pub(crate) fn push_front(&mut self, frame: QueuedFrame) {
        self.frames.push_front(frame);
    }

    pub(crate) fn pop_front(&mut self) -> Option<QueuedFrame> {
        self.frames.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.frames.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
