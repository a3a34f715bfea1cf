//! Protocol Module Implementation
//!
//! Structured messages of the text protocol and the codec that maps them to
//! and from raw frames.
//!
//! # Components
//!
//! - `ServerMessage` / `ClientMessage`: the operations each side may send
//! - `ServerInfo` / `ConnectOptions`: JSON payloads of INFO and CONNECT
//! - `Codec`: decode a complete raw frame, encode an outbound message
//!
//! Splitting the byte stream into complete frames is the framer's job, see
//! `network::frame`.

pub use codec::{Codec, TextCodec};
pub use info::{ConnectOptions, ServerInfo, PROTOCOL_VERSION};
pub use op::{ClientMessage, ServerMessage};

pub(crate) use codec::{find_crlf, CRLF};

mod codec;
mod info;
mod op;
