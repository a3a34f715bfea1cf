mod message;
mod network;
mod protocol;
mod service;

pub use message::{InboundMessage, PendingQueue, Sid};
pub use network::{Client, ConnectionStatus, CorrelationState, Framer, LineFramer};
pub use protocol::{
    ClientMessage, Codec, ConnectOptions, ServerInfo, ServerMessage, TextCodec, PROTOCOL_VERSION,
};
pub use service::{
    setup_local_tracing, setup_tracing, AppError, AppResult, ClientConfig, DeliveryConfig,
    DrainOrder, GeneralConfig, NetworkConfig, Shutdown,
};
