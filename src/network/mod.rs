//! Network Module Implementation
//!
//! The client side of a connection: one tokio task per TCP connection owns
//! the socket and all per-connection state, and callers talk to it through
//! a cloneable `Client` handle.
//!
//! # Architecture
//!
//! - `Connection`: the connection task. Performs the handshake, then loops
//!   over a single outstanding socket read and the command mailbox, so frame
//!   dispatch and caller operations never run concurrently.
//! - `Framer`: splits the byte stream into complete frames, keeping the
//!   unconsumed remainder in the reassembly buffer.
//! - `CorrelationTable`: request/reply state per sid.
//! - `Client`: the mailbox sender plus convenience operations (publish,
//!   subscribe, request).
//!
//! # Message routing
//!
//! A MSG under a registered sid is stored or handed to the caller awaiting
//! it. Any other MSG goes to the live subscriber when one is installed, or
//! to the pending queue for `drain_next`.

pub use client::Client;
pub use connection::ConnectionStatus;
pub use correlation::CorrelationState;
pub use frame::{Framer, LineFramer};

mod client;
mod command;
mod connection;
mod correlation;
mod frame;
