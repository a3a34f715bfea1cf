use std::collections::HashMap;

use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::message::{InboundMessage, Sid};

/// Where a request/reply exchange stands for one sid.
///
/// A sid with no entry in the table is not a tracked exchange; its messages
/// go to the live subscriber or the pending queue instead.
#[derive(Debug)]
pub(crate) enum Correlation {
    /// registered, the reply has not arrived and nobody is waiting
    NoWaiterYet,
    /// the reply arrived before anybody asked for it
    MessageWaiting(InboundMessage),
    /// a caller is suspended until the reply arrives
    Awaiting(oneshot::Sender<InboundMessage>),
}

/// Observable state of a sid, mainly for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationState {
    Absent,
    NoWaiterYet,
    MessageWaiting,
    Awaiting,
}

/// Outcome of routing an inbound message through the table.
#[derive(Debug)]
pub(crate) enum Routed {
    /// the sid is not tracked, the caller decides where the message goes
    Uncorrelated(InboundMessage),
    /// stored, or handed to a suspended caller
    Correlated,
}

/// Per-connection mapping from sid to request/reply state.
///
/// Only the connection actor touches the table, so no locking is involved.
#[derive(Debug, Default)]
pub(crate) struct CorrelationTable {
    entries: HashMap<Sid, Correlation>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `sid`. An existing entry, including a reply that already
    /// landed, is left as it is.
    pub fn register(&mut self, sid: Sid) {
        self.entries.entry(sid).or_insert(Correlation::NoWaiterYet);
    }

    /// Hand the stored reply for `sid` to `waiter`, or park `waiter` until it
    /// arrives.
    ///
    /// Parking on a sid that was never registered starts tracking it. A waiter
    /// already parked on `sid` is replaced and its caller sees the channel close.
    pub fn await_response(&mut self, sid: Sid, waiter: oneshot::Sender<InboundMessage>) {
        match self.entries.remove(&sid) {
            Some(Correlation::MessageWaiting(message)) => {
                trace!("sid {} answered from stored reply", sid);
                if waiter.send(message).is_err() {
                    debug!("caller awaiting sid {} is gone, reply dropped", sid);
                }
            }
            Some(Correlation::Awaiting(previous)) => {
                warn!(
                    "sid {} awaited twice, the earlier caller is released without a reply",
                    sid
                );
                drop(previous);
                self.entries.insert(sid, Correlation::Awaiting(waiter));
            }
            Some(Correlation::NoWaiterYet) | None => {
                self.entries.insert(sid, Correlation::Awaiting(waiter));
            }
        }
    }

    /// Route an inbound message by its sid. Never blocks.
    pub fn deliver(&mut self, message: InboundMessage) -> Routed {
        match self.entries.remove(&message.sid) {
            None => return Routed::Uncorrelated(message),
            Some(Correlation::NoWaiterYet) => {
                self.entries
                    .insert(message.sid.clone(), Correlation::MessageWaiting(message));
            }
            Some(Correlation::MessageWaiting(_)) => {
                warn!(
                    "sid {} received a second reply before it was collected, keeping the newest",
                    message.sid
                );
                self.entries
                    .insert(message.sid.clone(), Correlation::MessageWaiting(message));
            }
            Some(Correlation::Awaiting(waiter)) => {
                let sid = message.sid.clone();
                if waiter.send(message).is_err() {
                    debug!("caller awaiting sid {} gave up, reply dropped", sid);
                }
            }
        }
        Routed::Correlated
    }

    pub fn state(&self, sid: &str) -> CorrelationState {
        match self.entries.get(sid) {
            None => CorrelationState::Absent,
            Some(Correlation::NoWaiterYet) => CorrelationState::NoWaiterYet,
            Some(Correlation::MessageWaiting(_)) => CorrelationState::MessageWaiting,
            Some(Correlation::Awaiting(_)) => CorrelationState::Awaiting,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
