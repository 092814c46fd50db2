//! # Frame
//!
//! RFC 6455 frames as they travel on the wire, and the codec that reads and
//! writes them.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |        Extended payload length continued, if payload len == 127|
//! +---------------------------------------------------------------+
//! |                               |   Masking-key, if MASK set to 1|
//! +-------------------------------+-------------------------------+
//! |     Masking-key (continued)       |          Payload Data      |
//! +-----------------------------------+ - - - - - - - - - - - - - -+
//! ```
//!
//! The connection never sees frames directly: the [`parser`](crate::parser)
//! reassembles them into messages and the [`formatter`](crate::formatter)
//! turns messages back into frames.

mod close;
mod codec;
mod mask;

use bytes::{BufMut, Bytes, BytesMut};
pub use close::CloseCode;
pub use codec::{Decoder, Encoder};
pub use mask::apply_mask;

use crate::error::FrameError;

/// Largest possible frame header: 2 bytes, 8 bytes of length, 4 bytes of mask.
pub const MAX_HEAD_SIZE: usize = 14;

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// The end of the connection a codec works for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Masks outgoing frames and refuses masked incoming ones.
    Client,
    /// Sends plain frames and requires incoming frames to be masked.
    Server,
}

/// WebSocket operation code.
///
/// The numeric values are defined in RFC 6455, section 11.8.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Returns `true` for `Close`, `Ping` and `Pong`.
    ///
    /// Control frames cannot be fragmented and carry at most 125 bytes.
    pub fn is_control(&self) -> bool {
        matches!(*self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(FrameError::InvalidOpCode(value)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(val: OpCode) -> Self {
        match val {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// A single WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    fin: bool,
    opcode: OpCode,
    mask: Option<[u8; 4]>,
    payload: Bytes,
}

impl Frame {
    /// Creates a frame from its parts. The payload is expected unmasked.
    pub fn new(fin: bool, opcode: OpCode, mask: Option<[u8; 4]>, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            opcode,
            mask,
            payload: payload.into(),
        }
    }

    /// Final text frame.
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Text, None, payload)
    }

    /// Final binary frame.
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Binary, None, payload)
    }

    /// Continuation frame, final unless changed with [`Frame::with_fin`].
    pub fn continuation(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Continuation, None, payload)
    }

    /// Sets the FIN bit.
    #[must_use]
    pub fn with_fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }

    /// Sets the masking key used when the frame is encoded.
    #[must_use]
    pub fn with_mask(mut self, mask: [u8; 4]) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    pub fn is_fin(&self) -> bool {
        self.fin
    }

    pub fn mask(&self) -> Option<[u8; 4]> {
        self.mask
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub(crate) fn set_random_mask_if_not_set(&mut self) {
        if self.mask.is_none() {
            self.mask = Some(rand::random());
        }
    }

    /// Writes the frame header straight into `dst`.
    pub(crate) fn write_head(&self, dst: &mut BytesMut) {
        let first_byte = (self.fin as u8) << 7 | u8::from(self.opcode);
        let mask_bit = if self.mask.is_some() { 0x80 } else { 0 };
        let len = self.payload.len();

        dst.put_u8(first_byte);
        if len < 126 {
            dst.put_u8(len as u8 | mask_bit);
        } else if len < 65536 {
            dst.put_u8(126 | mask_bit);
            dst.put_u16(len as u16);
        } else {
            dst.put_u8(127 | mask_bit);
            dst.put_u64(len as u64);
        }

        if let Some(mask) = self.mask {
            dst.put_slice(&mask);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_control() {
        assert!(OpCode::Close.is_control());
        assert!(OpCode::Ping.is_control());
        assert!(OpCode::Pong.is_control());
        assert!(!OpCode::Text.is_control());
        assert!(!OpCode::Binary.is_control());
        assert!(!OpCode::Continuation.is_control());
    }

    #[test]
    fn test_try_from_u8() {
        assert_eq!(OpCode::try_from(0x1), Ok(OpCode::Text));
        assert_eq!(OpCode::try_from(0xA), Ok(OpCode::Pong));
        assert_eq!(OpCode::try_from(0x3), Err(FrameError::InvalidOpCode(0x3)));
        assert_eq!(OpCode::try_from(0xB), Err(FrameError::InvalidOpCode(0xB)));
    }

    #[test]
    fn test_write_head_lengths() {
        let mut dst = BytesMut::new();
        Frame::text("hi").write_head(&mut dst);
        assert_eq!(&dst[..], &[0x81, 0x02]);

        let mut dst = BytesMut::new();
        Frame::binary(vec![0u8; 300]).with_fin(false).write_head(&mut dst);
        assert_eq!(&dst[..], &[0x02, 126, 0x01, 0x2C]);

        let mut dst = BytesMut::new();
        Frame::binary(vec![0u8; 70_000]).write_head(&mut dst);
        assert_eq!(dst.len(), 10);
        assert_eq!(dst[1], 127);

        let mut dst = BytesMut::new();
        Frame::text("").with_mask([1, 2, 3, 4]).write_head(&mut dst);
        assert_eq!(&dst[..], &[0x81, 0x80, 1, 2, 3, 4]);
    }
}
