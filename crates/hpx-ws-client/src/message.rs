//! Application-level messages exchanged over a connection.

use std::str::Utf8Error;

use bytes::{BufMut, Bytes, BytesMut};

use crate::frame::{CloseCode, OpCode};

/// An outbound message, formatted into one frame by a
/// [`MessageFormatter`](crate::formatter::MessageFormatter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    opcode: OpCode,
    payload: Bytes,
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            opcode: OpCode::Text,
            payload: Bytes::from(text.into()),
        }
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Binary,
            payload: data.into(),
        }
    }

    pub fn ping(data: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Ping,
            payload: data.into(),
        }
    }

    pub fn pong(data: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Pong,
            payload: data.into(),
        }
    }

    /// Close message with a status code and a UTF-8 reason.
    pub fn close(code: CloseCode, reason: &str) -> Self {
        let mut payload = BytesMut::with_capacity(2 + reason.len());
        payload.put_u16(code.into());
        payload.put_slice(reason.as_bytes());
        Self {
            opcode: OpCode::Close,
            payload: payload.freeze(),
        }
    }

    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

/// A fully reassembled inbound message.
///
/// `closed` is set when the message is the peer's close frame; the reader
/// stops after dispatching it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    opcode: OpCode,
    payload: Bytes,
    closed: bool,
}

impl InboundMessage {
    /// Wraps a reassembled payload. A `Close` message marks the end of the
    /// session; custom [`MessageParser`](crate::parser::MessageParser)s build
    /// their messages with this.
    pub fn new(opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
            closed: opcode == OpCode::Close,
        }
    }

    /// `Text`, `Binary`, `Close`, `Ping` or `Pong`; never `Continuation`.
    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Whether the peer initiated the close of the session.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Payload as text. Text messages are validated while parsing, so this
    /// only fails for binary payloads.
    pub fn as_text(&self) -> Result<&str, Utf8Error> {
        std::str::from_utf8(&self.payload)
    }

    /// Status code of a close message, `None` when absent or not a close.
    pub fn close_code(&self) -> Option<CloseCode> {
        if self.opcode != OpCode::Close || self.payload.len() < 2 {
            return None;
        }
        Some(CloseCode::from(u16::from_be_bytes([
            self.payload[0],
            self.payload[1],
        ])))
    }

    /// Reason text of a close message.
    pub fn close_reason(&self) -> Option<&str> {
        if self.opcode != OpCode::Close || self.payload.len() < 2 {
            return None;
        }
        std::str::from_utf8(&self.payload[2..]).ok()
    }
}
