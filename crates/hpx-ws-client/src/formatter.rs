//! Outbound message formatting.

use std::fmt;

use bytes::BytesMut;
use tokio_util::codec::Encoder as _;

use crate::{
    error::FrameError,
    frame::{Encoder, Frame, Role},
    message::Message,
};

/// Serializes a message into the bytes written to the socket.
///
/// Formatters are stateless and shared by every `send` on a connection; the
/// whole message is materialized before the write lock is taken.
pub trait MessageFormatter: Send + Sync + fmt::Debug {
    fn format(&self, message: &Message, dst: &mut BytesMut) -> Result<(), FrameError>;
}

/// Formats every message as a single final RFC 6455 frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameFormatter {
    role: Role,
}

impl FrameFormatter {
    /// Masks every frame with a random key, as clients must.
    pub fn client() -> Self {
        Self { role: Role::Client }
    }

    /// Leaves frames unmasked, as servers must.
    pub fn server() -> Self {
        Self { role: Role::Server }
    }
}

impl Default for FrameFormatter {
    fn default() -> Self {
        Self::client()
    }
}

impl MessageFormatter for FrameFormatter {
    fn format(&self, message: &Message, dst: &mut BytesMut) -> Result<(), FrameError> {
        let frame = Frame::new(true, message.opcode(), None, message.payload().clone());
        Encoder::new(self.role).encode(frame, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{CloseCode, OpCode};

    #[test]
    fn server_frames_are_plain() {
        let mut dst = BytesMut::new();
        FrameFormatter::server()
            .format(&Message::text("hi"), &mut dst)
            .unwrap();
        assert_eq!(&dst[..], &[0x81, 0x02, b'h', b'i']);
    }

    #[test]
    fn client_frames_are_masked() {
        let mut dst = BytesMut::new();
        FrameFormatter::client()
            .format(&Message::binary(vec![0u8; 4]), &mut dst)
            .unwrap();
        assert_eq!(dst[0], 0x82);
        assert_eq!(dst[1], 0x84);
        assert_eq!(&dst[6..], &dst[2..6]);
    }

    #[test]
    fn close_message_is_a_close_frame() {
        let mut dst = BytesMut::new();
        let message = Message::close(CloseCode::Normal, "");
        assert_eq!(message.opcode(), OpCode::Close);
        FrameFormatter::server().format(&message, &mut dst).unwrap();
        assert_eq!(&dst[..], &[0x88, 0x02, 0x03, 0xE8]);
    }
}
