use bytes::Bytes;

/// Subscription id chosen by the caller when subscribing.
pub type Sid = String;

/// A message delivered by the server under a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub subject: String,
    pub sid: Sid,
    pub reply_to: Option<String>,
    pub payload: Bytes,
    /// byte count announced in the MSG header
    pub declared_len: usize,
}

impl InboundMessage {
    pub fn new(
        subject: impl Into<String>,
        sid: impl Into<Sid>,
        reply_to: Option<String>,
        payload: Bytes,
    ) -> Self {
        let declared_len = payload.len();
        InboundMessage {
            subject: subject.into(),
            sid: sid.into(),
            reply_to,
            payload,
            declared_len,
        }
    }
}
