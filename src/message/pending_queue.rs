use std::collections::VecDeque;

use crate::service::DrainOrder;

use super::InboundMessage;

/// Uncorrelated messages waiting for `drain_next`.
#[derive(Debug)]
pub struct PendingQueue {
    messages: VecDeque<InboundMessage>,
    order: DrainOrder,
}

impl PendingQueue {
    pub fn new(order: DrainOrder) -> Self {
        PendingQueue {
            messages: VecDeque::new(),
            order,
        }
    }

    pub fn push(&mut self, message: InboundMessage) {
        match self.order {
            DrainOrder::Fifo => self.messages.push_back(message),
            DrainOrder::Lifo => self.messages.push_front(message),
        }
    }

    pub fn pop(&mut self) -> Option<InboundMessage> {
        self.messages.pop_front()
    }

    /// Removes every queued message for `sid` and returns them oldest first.
    pub fn take_sid(&mut self, sid: &str) -> Vec<InboundMessage> {
        if !self.messages.iter().any(|m| m.sid == sid) {
            return Vec::new();
        }
        let (taken, kept): (VecDeque<_>, VecDeque<_>) =
            self.messages.drain(..).partition(|m| m.sid == sid);
        self.messages = kept;
        let mut taken = Vec::from(taken);
        if let DrainOrder::Lifo = self.order {
            taken.reverse();
        }
        taken
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
