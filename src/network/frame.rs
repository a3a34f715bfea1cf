use bytes::{Buf, Bytes, BytesMut};

use crate::protocol::{find_crlf, CRLF};
use crate::AppError::Incomplete;
use crate::{AppError, AppResult};

/// Splits the inbound byte stream into complete raw frames.
///
/// `append` adds freshly read bytes to the reassembly buffer and returns every
/// frame that is now complete, in stream order. Whatever is left in `buffer`
/// afterwards is the start of a frame that has not fully arrived yet.
pub trait Framer: Send + 'static {
    fn append(&mut self, buffer: &mut BytesMut, bytes: &[u8]) -> AppResult<Vec<Bytes>>;
}

/// Framer for CRLF-terminated control lines, where `MSG` lines are followed by
/// a payload of the byte count given as the last header token.
#[derive(Debug, Clone)]
pub struct LineFramer {
    max_frame_size: usize,
}

impl LineFramer {
    pub fn new(max_frame_size: usize) -> Self {
        LineFramer { max_frame_size }
    }

    /// Returns the length of the first complete frame in `buffer`, or
    /// `Incomplete` when more bytes are needed.
    pub fn check(&self, buffer: &mut BytesMut) -> AppResult<usize> {
        let line_end = match find_crlf(buffer) {
            Some(pos) => pos,
            None => {
                if buffer.remaining() > self.max_frame_size {
                    return Err(AppError::FrameTooLarge(format!(
                        "control line exceeds {} bytes",
                        self.max_frame_size
                    )));
                }
                return Err(Incomplete);
            }
        };
        if line_end > self.max_frame_size {
            return Err(AppError::FrameTooLarge(format!(
                "control line of length {} is too large",
                line_end
            )));
        }
        let header_len = line_end + CRLF.len();

        let line = &buffer[..line_end];
        let verb = line
            .split(|b| *b == b' ' || *b == b'\t')
            .next()
            .unwrap_or_default();
        if !verb.eq_ignore_ascii_case(b"MSG") {
            return Ok(header_len);
        }

        let payload_len = Self::declared_len(line)?;
        if payload_len > self.max_frame_size {
            return Err(AppError::FrameTooLarge(format!(
                "payload of length {} is too large",
                payload_len
            )));
        }
        let frame_len = header_len + payload_len + CRLF.len();
        if buffer.remaining() < frame_len {
            buffer.reserve(frame_len - buffer.remaining());
            return Err(Incomplete);
        }
        if &buffer[frame_len - CRLF.len()..frame_len] != CRLF {
            return Err(AppError::MalformedFrame(format!(
                "payload of declared length {} is not terminated by CRLF",
                payload_len
            )));
        }
        Ok(frame_len)
    }

    pub(crate) fn parse(&self, buffer: &mut BytesMut) -> AppResult<Option<Bytes>> {
        match self.check(buffer) {
            Ok(frame_len) => Ok(Some(buffer.split_to(frame_len).freeze())),
            Err(AppError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn declared_len(line: &[u8]) -> AppResult<usize> {
        let line = std::str::from_utf8(line)
            .map_err(|e| AppError::MalformedFrame(format!("non utf-8 MSG line: {}", e)))?;
        let count = line.split_whitespace().last().unwrap_or_default();
        count
            .parse()
            .map_err(|_| AppError::MalformedFrame(format!("MSG byte count in {:?}", line)))
    }
}

impl Framer for LineFramer {
    fn append(&mut self, buffer: &mut BytesMut, bytes: &[u8]) -> AppResult<Vec<Bytes>> {
        buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();
        while let Some(frame) = self.parse(buffer)? {
            frames.push(frame);
        }
        Ok(frames)
    }
}
