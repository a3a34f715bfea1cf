pub use inbound::{InboundMessage, Sid};
pub use pending_queue::PendingQueue;

mod inbound;
mod pending_queue;
