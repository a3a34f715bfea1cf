use tokio::sync::{mpsc, oneshot};

use crate::message::{InboundMessage, Sid};
use crate::protocol::{ClientMessage, ServerInfo};
use crate::AppResult;

use super::CorrelationState;

/// Operations callers submit to the connection mailbox.
#[derive(Debug)]
pub(crate) enum Command {
    RegisterRequest {
        sid: Sid,
        reply: oneshot::Sender<()>,
    },
    AwaitResponse {
        sid: Sid,
        reply: oneshot::Sender<InboundMessage>,
    },
    Transmit {
        message: ClientMessage,
        reply: oneshot::Sender<AppResult<()>>,
    },
    DrainNext {
        reply: oneshot::Sender<Option<InboundMessage>>,
    },
    GetInfo {
        reply: oneshot::Sender<ServerInfo>,
    },
    SetSubscriber {
        subscriber: Option<mpsc::UnboundedSender<InboundMessage>>,
        reply: oneshot::Sender<()>,
    },
    InspectCorrelation {
        sid: Sid,
        reply: oneshot::Sender<CorrelationState>,
    },
    Shutdown,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::RegisterRequest { .. } => "register_request",
            Command::AwaitResponse { .. } => "await_response",
            Command::Transmit { .. } => "transmit",
            Command::DrainNext { .. } => "drain_next",
            Command::GetInfo { .. } => "get_info",
            Command::SetSubscriber { .. } => "set_subscriber",
            Command::InspectCorrelation { .. } => "inspect_correlation",
            Command::Shutdown => "shutdown",
        }
    }
}
