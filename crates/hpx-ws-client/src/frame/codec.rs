//! Byte-level frame decoding and encoding.
//!
//! The decoder is resumable: it keeps the parsed header of a frame whose
//! payload has not fully arrived and only consumes bytes from the source
//! buffer once a whole frame is available.

use bytes::{Buf, BytesMut};
use tokio_util::codec;

use super::{Frame, MAX_CONTROL_PAYLOAD, MAX_HEAD_SIZE, OpCode, Role};
use crate::error::FrameError;

/// Header of a frame whose payload is still incomplete.
#[derive(Debug, Clone, Copy)]
struct ReadState {
    fin: bool,
    opcode: OpCode,
    mask: Option<[u8; 4]>,
    payload_len: usize,
}

/// Decodes frames from a byte buffer.
///
/// Masked payloads are unmasked in place; the returned [`Frame`] always holds
/// plain payload bytes and keeps the key it arrived with. A client decoder
/// fails on masked frames, a server decoder on unmasked ones.
#[derive(Debug)]
pub struct Decoder {
    role: Role,
    state: Option<ReadState>,
    max_payload_size: usize,
}

impl Decoder {
    /// Creates a decoder for `role` refusing frames with payloads above
    /// `max_payload_size`.
    pub fn new(role: Role, max_payload_size: usize) -> Self {
        Self {
            role,
            state: None,
            max_payload_size,
        }
    }

    /// Whether the decoder is holding the header of a partially received frame.
    pub fn is_mid_frame(&self) -> bool {
        self.state.is_some()
    }

    fn finish(state: ReadState, src: &mut BytesMut) -> Frame {
        if let Some(mask) = state.mask {
            super::apply_mask(&mut src[..state.payload_len], mask);
        }
        let payload = src.split_to(state.payload_len).freeze();
        Frame::new(state.fin, state.opcode, state.mask, payload)
    }
}

impl codec::Decoder for Decoder {
    type Item = Frame;
    type Error = FrameError;

    /// Returns `Ok(None)` when more bytes are needed.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(state) = self.state.take() {
            if src.remaining() < state.payload_len {
                self.state = Some(state);
                return Ok(None);
            }
            return Ok(Some(Self::finish(state, src)));
        }

        if src.remaining() < 2 {
            return Ok(None);
        }

        let fin = src[0] & 0b1000_0000 != 0;
        if src[0] & 0b0111_0000 != 0 {
            return Err(FrameError::ReservedBitsNotZero);
        }

        let opcode = OpCode::try_from(src[0] & 0b0000_1111)?;
        let masked = src[1] & 0b1000_0000 != 0;
        match (self.role, masked) {
            (Role::Client, true) => return Err(FrameError::MaskedFrame),
            (Role::Server, false) => return Err(FrameError::UnmaskedFrame),
            _ => {}
        }
        let length_code = src[1] & 0x7F;

        let extra = match length_code {
            126 => 2,
            127 => 8,
            _ => 0,
        };
        let header_size = 2 + extra + (masked as usize * 4);
        if src.remaining() < header_size {
            return Ok(None);
        }

        src.advance(2);

        let payload_len = match extra {
            0 => usize::from(length_code),
            2 => src.get_u16() as usize,
            _ => usize::try_from(src.get_u64()).map_err(|_| FrameError::MessageTooLarge {
                size: usize::MAX,
                limit: self.max_payload_size,
            })?,
        };

        let mask = masked.then(|| src.get_u32().to_be_bytes());

        if opcode.is_control() {
            if !fin {
                return Err(FrameError::ControlFrameFragmented);
            }
            if payload_len > MAX_CONTROL_PAYLOAD {
                return Err(FrameError::ControlFrameTooLarge);
            }
        }
        if payload_len > self.max_payload_size {
            return Err(FrameError::MessageTooLarge {
                size: payload_len,
                limit: self.max_payload_size,
            });
        }

        let state = ReadState {
            fin,
            opcode,
            mask,
            payload_len,
        };
        if src.remaining() < payload_len {
            self.state = Some(state);
            return Ok(None);
        }

        Ok(Some(Self::finish(state, src)))
    }
}

/// Encodes frames into a byte buffer.
///
/// On the client side every frame without a key gets a fresh random one, as
/// RFC 6455 requires.
#[derive(Debug, Clone, Copy)]
pub struct Encoder {
    role: Role,
}

impl Encoder {
    pub fn new(role: Role) -> Self {
        Self { role }
    }
}

impl codec::Encoder<Frame> for Encoder {
    type Error = FrameError;

    fn encode(&mut self, mut frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if frame.opcode().is_control() && frame.payload().len() > MAX_CONTROL_PAYLOAD {
            return Err(FrameError::ControlFrameTooLarge);
        }
        if self.role == Role::Client {
            frame.set_random_mask_if_not_set();
        }

        dst.reserve(MAX_HEAD_SIZE + frame.payload().len());
        frame.write_head(dst);

        let index = dst.len();
        dst.extend_from_slice(frame.payload());
        if let Some(mask) = frame.mask() {
            super::apply_mask(&mut dst[index..], mask);
        }

        Ok(())
    }
}
