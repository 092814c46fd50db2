//! Inbound message parsing.
//!
//! The reader task owns one [`MessageParser`] per inbound message. It pushes
//! whatever bytes it has; the parser consumes complete frames, leaves the rest
//! in the buffer and reports when a whole message has been reassembled. The
//! next message always gets a fresh parser from the [`ParserFactory`].

use std::{fmt, sync::Arc};

use bytes::BytesMut;
use tokio_util::codec::Decoder as _;
use tracing::trace;

use crate::{
    error::FrameError,
    frame::{CloseCode, Decoder, Frame, OpCode, Role},
    message::InboundMessage,
};

/// Protocol version sent in `Sec-WebSocket-Version` and recorded in [`ParserConfig`].
pub const WEBSOCKET_VERSION: u16 = 13;

/// Default limit of [`MemoryDataProvider`]: 16 MiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Supplies storage for inbound message bodies.
pub trait DataProvider: Send + Sync + fmt::Debug {
    /// Returns the buffer that will receive a message of type `opcode` on
    /// `path`, whose first frame announces `len` bytes. `None` refuses the
    /// message and ends the connection.
    fn allocate(&self, path: &str, opcode: OpCode, len: usize) -> Option<BytesMut>;

    /// Largest reassembled message this provider accepts.
    fn max_message_size(&self) -> usize {
        usize::MAX
    }
}

/// Keeps message bodies in memory, up to a size limit.
#[derive(Debug, Clone, Copy)]
pub struct MemoryDataProvider {
    max_message_size: usize,
}

impl MemoryDataProvider {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }
}

impl Default for MemoryDataProvider {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl DataProvider for MemoryDataProvider {
    fn allocate(&self, _path: &str, _opcode: OpCode, len: usize) -> Option<BytesMut> {
        (len <= self.max_message_size).then(|| BytesMut::with_capacity(len))
    }

    fn max_message_size(&self) -> usize {
        self.max_message_size
    }
}

/// A resumable parser for exactly one inbound message.
pub trait MessageParser: Send {
    /// Consumes as many bytes from `input` as the current message needs.
    /// Bytes belonging to the next message stay in `input`.
    fn push(&mut self, input: &mut BytesMut) -> Result<(), FrameError>;

    /// Whether a complete message is available.
    fn is_done(&self) -> bool;

    /// Takes the completed message.
    fn take_message(&mut self) -> Option<InboundMessage>;

    /// Whether the completed message closes the session.
    fn is_closing(&self) -> bool;
}

/// Creates a fresh parser for every inbound message.
pub trait ParserFactory: Send + Sync + fmt::Debug {
    fn new_parser(&self) -> Box<dyn MessageParser>;
}

/// Configuration of the RFC 6455 parser built by the negotiator.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    data_provider: Arc<dyn DataProvider>,
    protocols: Vec<String>,
    path: Arc<str>,
    version: u16,
}

impl ParserConfig {
    pub fn new(
        data_provider: Arc<dyn DataProvider>,
        protocols: Vec<String>,
        path: impl Into<Arc<str>>,
        version: u16,
    ) -> Self {
        Self {
            data_provider,
            protocols,
            path: path.into(),
            version,
        }
    }

    pub fn data_provider(&self) -> &Arc<dyn DataProvider> {
        &self.data_provider
    }

    /// Subprotocols offered during the handshake.
    pub fn protocols(&self) -> &[String] {
        &self.protocols
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> u16 {
        self.version
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self::new(
            Arc::new(MemoryDataProvider::default()),
            Vec::new(),
            "/",
            WEBSOCKET_VERSION,
        )
    }
}

impl ParserFactory for ParserConfig {
    fn new_parser(&self) -> Box<dyn MessageParser> {
        Box::new(FrameParser::new(self))
    }
}

/// Data message being reassembled from fragments.
struct Partial {
    opcode: OpCode,
    body: BytesMut,
}

/// RFC 6455 parser: decodes frames and joins fragments into one message.
///
/// Ping and pong frames are messages of their own. When they arrive between
/// the fragments of a data message they are skipped; a close frame there ends
/// the session.
pub struct FrameParser {
    decoder: Decoder,
    data_provider: Arc<dyn DataProvider>,
    path: Arc<str>,
    partial: Option<Partial>,
    complete: Option<InboundMessage>,
    closing: bool,
}

impl FrameParser {
    pub fn new(config: &ParserConfig) -> Self {
        Self {
            decoder: Decoder::new(Role::Client, config.data_provider.max_message_size()),
            data_provider: Arc::clone(&config.data_provider),
            path: Arc::clone(&config.path),
            partial: None,
            complete: None,
            closing: false,
        }
    }

    fn on_frame(&mut self, frame: Frame) -> Result<(), FrameError> {
        match frame.opcode() {
            OpCode::Close => {
                validate_close(frame.payload())?;
                self.partial = None;
                self.closing = true;
                self.complete = Some(InboundMessage::new(OpCode::Close, frame.into_payload()));
            }
            opcode @ (OpCode::Ping | OpCode::Pong) => {
                if self.partial.is_some() {
                    trace!(?opcode, "skipping control frame inside fragmented message");
                } else {
                    self.complete = Some(InboundMessage::new(opcode, frame.into_payload()));
                }
            }
            opcode @ (OpCode::Text | OpCode::Binary) => {
                if self.partial.is_some() {
                    return Err(FrameError::InvalidFragment);
                }
                let len = frame.payload().len();
                let mut body = self
                    .data_provider
                    .allocate(&self.path, opcode, len)
                    .ok_or(FrameError::MessageRejected)?;
                body.extend_from_slice(frame.payload());
                let partial = Partial { opcode, body };
                if frame.is_fin() {
                    self.finish(partial)?;
                } else {
                    self.partial = Some(partial);
                }
            }
            OpCode::Continuation => {
                let mut partial = self
                    .partial
                    .take()
                    .ok_or(FrameError::InvalidContinuationFrame)?;
                let size = partial.body.len() + frame.payload().len();
                let limit = self.data_provider.max_message_size();
                if size > limit {
                    return Err(FrameError::MessageTooLarge { size, limit });
                }
                partial.body.extend_from_slice(frame.payload());
                if frame.is_fin() {
                    self.finish(partial)?;
                } else {
                    self.partial = Some(partial);
                }
            }
        }
        Ok(())
    }

    fn finish(&mut self, partial: Partial) -> Result<(), FrameError> {
        let payload = partial.body.freeze();
        if partial.opcode == OpCode::Text && std::str::from_utf8(&payload).is_err() {
            return Err(FrameError::InvalidUtf8);
        }
        self.complete = Some(InboundMessage::new(partial.opcode, payload));
        Ok(())
    }
}

impl MessageParser for FrameParser {
    fn push(&mut self, input: &mut BytesMut) -> Result<(), FrameError> {
        while self.complete.is_none() {
            match self.decoder.decode(input)? {
                Some(frame) => self.on_frame(frame)?,
                None => break,
            }
        }
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.complete.is_some()
    }

    fn take_message(&mut self) -> Option<InboundMessage> {
        self.complete.take()
    }

    fn is_closing(&self) -> bool {
        self.closing
    }
}

fn validate_close(payload: &[u8]) -> Result<(), FrameError> {
    match payload.len() {
        0 => Ok(()),
        1 => Err(FrameError::InvalidCloseFrame),
        _ => {
            let code = CloseCode::from(u16::from_be_bytes([payload[0], payload[1]]));
            if !code.is_allowed() || std::str::from_utf8(&payload[2..]).is_err() {
                return Err(FrameError::InvalidCloseFrame);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::codec::Encoder as _;

    use super::*;
    use crate::frame::Encoder;

    fn encode(frames: impl IntoIterator<Item = Frame>) -> BytesMut {
        let mut encoder = Encoder::new(Role::Server);
        let mut dst = BytesMut::new();
        for frame in frames {
            encoder.encode(frame, &mut dst).unwrap();
        }
        dst
    }

    fn parse_one(config: &ParserConfig, input: &mut BytesMut) -> Result<Option<InboundMessage>, FrameError> {
        let mut parser = config.new_parser();
        parser.push(input)?;
        Ok(parser.take_message())
    }

    #[test]
    fn reassembles_fragmented_text() {
        let config = ParserConfig::default();
        let mut input = encode([
            Frame::text("Hel").with_fin(false),
            Frame::continuation("lo, ").with_fin(false),
            Frame::continuation("world"),
        ]);

        let message = parse_one(&config, &mut input).unwrap().unwrap();
        assert_eq!(message.opcode(), OpCode::Text);
        assert_eq!(message.as_text().unwrap(), "Hello, world");
        assert!(input.is_empty());
    }

    #[test]
    fn leaves_next_message_in_buffer() {
        let config = ParserConfig::default();
        let mut input = encode([Frame::text("first"), Frame::binary(vec![1, 2, 3])]);

        let first = parse_one(&config, &mut input).unwrap().unwrap();
        assert_eq!(first.as_text().unwrap(), "first");
        assert!(!input.is_empty());

        let second = parse_one(&config, &mut input).unwrap().unwrap();
        assert_eq!(second.opcode(), OpCode::Binary);
        assert_eq!(&second.payload()[..], &[1, 2, 3]);
    }

    #[test]
    fn incomplete_input_is_not_done() {
        let config = ParserConfig::default();
        let full = encode([Frame::text("partial message")]);
        let mut parser = config.new_parser();

        let mut input = BytesMut::from(&full[..5]);
        parser.push(&mut input).unwrap();
        assert!(!parser.is_done());

        input.extend_from_slice(&full[5..]);
        parser.push(&mut input).unwrap();
        assert!(parser.is_done());
        assert!(!parser.is_closing());
        assert_eq!(parser.take_message().unwrap().as_text().unwrap(), "partial message");
    }

    #[test]
    fn close_frame_marks_session_closing() {
        let config = ParserConfig::default();
        let mut input = encode([Frame::new(true, OpCode::Close, None, vec![0x03, 0xE8])]);
        let mut parser = config.new_parser();
        parser.push(&mut input).unwrap();

        assert!(parser.is_done());
        assert!(parser.is_closing());
        assert!(parser.take_message().unwrap().is_closed());
    }

    #[test]
    fn ping_inside_fragments_is_skipped() {
        let config = ParserConfig::default();
        let mut input = encode([
            Frame::binary(vec![1]).with_fin(false),
            Frame::new(true, OpCode::Ping, None, "beat"),
            Frame::continuation(vec![2]),
        ]);

        let message = parse_one(&config, &mut input).unwrap().unwrap();
        assert_eq!(message.opcode(), OpCode::Binary);
        assert_eq!(&message.payload()[..], &[1, 2]);
    }

    #[test]
    fn standalone_ping_is_a_message() {
        let config = ParserConfig::default();
        let mut input = encode([Frame::new(true, OpCode::Ping, None, "beat")]);
        let message = parse_one(&config, &mut input).unwrap().unwrap();
        assert_eq!(message.opcode(), OpCode::Ping);
        assert!(!message.is_closed());
    }

    #[test]
    fn rejects_bad_sequences() {
        let config = ParserConfig::default();

        let mut input = encode([Frame::continuation("orphan")]);
        assert_eq!(
            parse_one(&config, &mut input),
            Err(FrameError::InvalidContinuationFrame)
        );

        let mut input = encode([Frame::text("a").with_fin(false), Frame::text("b")]);
        assert_eq!(parse_one(&config, &mut input), Err(FrameError::InvalidFragment));

        let mut input = encode([Frame::text(vec![0xFF, 0xFE])]);
        assert_eq!(parse_one(&config, &mut input), Err(FrameError::InvalidUtf8));

        let mut input = encode([Frame::new(true, OpCode::Close, None, vec![0x03])]);
        assert_eq!(parse_one(&config, &mut input), Err(FrameError::InvalidCloseFrame));

        let mut input = encode([Frame::new(true, OpCode::Close, None, vec![0x03, 0xF6])]);
        let message = parse_one(&config, &mut input).unwrap().unwrap();
        assert_eq!(message.close_code(), Some(CloseCode::BadGateway));

        // 1006 never appears on the wire.
        let mut input = encode([Frame::new(true, OpCode::Close, None, vec![0x03, 0xEE])]);
        assert_eq!(parse_one(&config, &mut input), Err(FrameError::InvalidCloseFrame));
    }

    #[test]
    fn masked_server_frames_are_rejected() {
        let config = ParserConfig::default();
        let mut input = BytesMut::new();
        Encoder::new(Role::Client)
            .encode(Frame::text("hidden"), &mut input)
            .unwrap();
        assert_eq!(parse_one(&config, &mut input), Err(FrameError::MaskedFrame));
    }

    #[test]
    fn enforces_provider_limit_across_fragments() {
        let config = ParserConfig::new(Arc::new(MemoryDataProvider::new(8)), Vec::new(), "/", 13);
        let mut input = encode([
            Frame::binary(vec![0u8; 6]).with_fin(false),
            Frame::continuation(vec![0u8; 6]),
        ]);
        assert_eq!(
            parse_one(&config, &mut input),
            Err(FrameError::MessageTooLarge { size: 12, limit: 8 })
        );
    }

    #[derive(Debug)]
    struct RefuseBinary;

    impl DataProvider for RefuseBinary {
        fn allocate(&self, _path: &str, opcode: OpCode, len: usize) -> Option<BytesMut> {
            (opcode == OpCode::Text).then(|| BytesMut::with_capacity(len))
        }
    }

    #[test]
    fn provider_can_refuse_messages() {
        let config = ParserConfig::new(Arc::new(RefuseBinary), vec!["chat".into()], "/feed", 13);
        assert_eq!(config.protocols(), ["chat".to_string()]);
        assert_eq!(config.path(), "/feed");

        let mut input = encode([Frame::binary(vec![1, 2])]);
        assert_eq!(parse_one(&config, &mut input), Err(FrameError::MessageRejected));
    }
}
