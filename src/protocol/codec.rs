use bytes::{BufMut, Bytes, BytesMut};

use crate::message::InboundMessage;
use crate::{AppError, AppResult};

use super::{ClientMessage, ServerMessage};

pub(crate) const CRLF: &[u8] = b"\r\n";

/// Maps complete raw frames to protocol messages and back.
pub trait Codec: Send + 'static {
    fn decode(&self, frame: &Bytes) -> AppResult<ServerMessage>;
    fn encode(&self, message: &ClientMessage) -> AppResult<Bytes>;
}

/// The line-oriented text protocol spoken by the server.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextCodec;

pub(crate) fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

fn malformed(reason: impl Into<String>) -> AppError {
    AppError::MalformedFrame(reason.into())
}

/// Subjects, queue groups and sids are single whitespace-free tokens on the wire.
fn check_token(kind: &str, token: &str) -> AppResult<()> {
    if token.is_empty() || token.chars().any(char::is_whitespace) {
        return Err(AppError::InvalidValue(format!(
            "{} must be a non-empty token without whitespace: {:?}",
            kind, token
        )));
    }
    Ok(())
}

impl TextCodec {
    fn decode_msg(&self, args: &str, body: Bytes) -> AppResult<ServerMessage> {
        let tokens: Vec<&str> = args.split_whitespace().collect();
        let (subject, sid, reply_to, count) = match tokens.as_slice() {
            [subject, sid, count] => (*subject, *sid, None, *count),
            [subject, sid, reply_to, count] => (*subject, *sid, Some(*reply_to), *count),
            _ => return Err(malformed(format!("MSG arguments: {:?}", args))),
        };
        let declared_len: usize = count
            .parse()
            .map_err(|_| malformed(format!("MSG byte count: {:?}", count)))?;

        let frame_len = declared_len
            .checked_add(CRLF.len())
            .ok_or_else(|| malformed(format!("MSG byte count out of range: {}", declared_len)))?;
        if body.len() < frame_len || &body[declared_len..frame_len] != CRLF {
            return Err(malformed(format!(
                "MSG payload does not match declared length {}",
                declared_len
            )));
        }

        Ok(ServerMessage::Msg(InboundMessage {
            subject: subject.to_string(),
            sid: sid.to_string(),
            reply_to: reply_to.map(str::to_string),
            payload: body.slice(..declared_len),
            declared_len,
        }))
    }
}

impl Codec for TextCodec {
    fn decode(&self, frame: &Bytes) -> AppResult<ServerMessage> {
        let header_end = find_crlf(frame).ok_or_else(|| malformed("frame without CRLF"))?;
        let header = std::str::from_utf8(&frame[..header_end])
            .map_err(|e| malformed(format!("non utf-8 control line: {}", e)))?;
        let (verb, args) = match header.split_once(|c: char| c == ' ' || c == '\t') {
            Some((verb, args)) => (verb, args.trim()),
            None => (header.trim(), ""),
        };

        match verb.to_ascii_uppercase().as_str() {
            "INFO" => serde_json::from_str(args)
                .map(ServerMessage::Info)
                .map_err(|e| malformed(format!("INFO payload: {}", e))),
            "PING" => Ok(ServerMessage::Ping),
            "PONG" => Ok(ServerMessage::Pong),
            "+OK" => Ok(ServerMessage::Ok),
            "-ERR" => Ok(ServerMessage::Err(args.trim_matches('\'').to_string())),
            "MSG" => self.decode_msg(args, frame.slice(header_end + CRLF.len()..)),
            _ => Err(malformed(format!("unknown operation: {:?}", header))),
        }
    }

    fn encode(&self, message: &ClientMessage) -> AppResult<Bytes> {
        let mut buf = BytesMut::new();
        match message {
            ClientMessage::Connect(options) => {
                let json = serde_json::to_string(options)
                    .map_err(|e| AppError::InvalidValue(format!("CONNECT options: {}", e)))?;
                buf.put_slice(b"CONNECT ");
                buf.put_slice(json.as_bytes());
            }
            ClientMessage::Ping => buf.put_slice(b"PING"),
            ClientMessage::Pong => buf.put_slice(b"PONG"),
            ClientMessage::Pub {
                subject,
                reply_to,
                payload,
            } => {
                check_token("subject", subject)?;
                let header = match reply_to {
                    Some(reply_to) => {
                        check_token("reply subject", reply_to)?;
                        format!("PUB {} {} {}", subject, reply_to, payload.len())
                    }
                    None => format!("PUB {} {}", subject, payload.len()),
                };
                buf.reserve(header.len() + payload.len() + 2 * CRLF.len());
                buf.put_slice(header.as_bytes());
                buf.put_slice(CRLF);
                buf.put_slice(payload);
            }
            ClientMessage::Sub {
                subject,
                queue_group,
                sid,
            } => {
                check_token("subject", subject)?;
                check_token("sid", sid)?;
                let line = match queue_group {
                    Some(queue_group) => {
                        check_token("queue group", queue_group)?;
                        format!("SUB {} {} {}", subject, queue_group, sid)
                    }
                    None => format!("SUB {} {}", subject, sid),
                };
                buf.put_slice(line.as_bytes());
            }
            ClientMessage::Unsub { sid, max_msgs } => {
                check_token("sid", sid)?;
                let line = match max_msgs {
                    Some(max_msgs) => format!("UNSUB {} {}", sid, max_msgs),
                    None => format!("UNSUB {}", sid),
                };
                buf.put_slice(line.as_bytes());
            }
        }
        buf.put_slice(CRLF);
        Ok(buf.freeze())
    }
}
