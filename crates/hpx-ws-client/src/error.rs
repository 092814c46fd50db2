//! Error types for the handshake, the transport and the live connection.

use std::{io, time::Duration};

use thiserror::Error;

/// Result of [`connect`](crate::connect) and the negotiation helpers.
pub type HandshakeResult<T> = Result<T, HandshakeError>;

/// Result of the HTTP exchange performed by an [`UpgradeTransport`](crate::transport::UpgradeTransport).
pub type TransportResult<T> = Result<T, TransportError>;

/// Result of operations on an established [`Connection`](crate::Connection).
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Fatal failure of an upgrade attempt.
///
/// Every way the handshake can go wrong ends up here, so a caller of
/// [`connect`](crate::connect) only ever has one error to report.
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// The server answered with something other than `101 Switching Protocols`.
    #[error("the server did not respond with the expected 101 code, instead we received {code}: {message}")]
    UnexpectedStatus { code: u16, message: String },

    /// The 101 response had no `Sec-WebSocket-Accept` header.
    #[error("the response did not include a Sec-WebSocket-Accept header")]
    MissingAcceptHeader,

    /// The accept value does not prove the server processed our key.
    #[error("the server did not respond with the expected accept value '{expected}', instead we received '{actual}'")]
    AcceptMismatch { expected: String, actual: String },

    /// The transport no longer holds the socket the upgrade was performed on.
    #[error("the socket was closed after the upgrade request")]
    SocketClosedPrematurely,

    /// The transport opened more than one socket during the exchange.
    #[error("more than one socket ({count}) was used in the upgrade request")]
    AmbiguousSocket { count: usize },

    /// The upgrade request could not be built from the supplied options.
    #[error("invalid upgrade request: {0}")]
    InvalidRequest(#[from] http::Error),

    /// The URL handed to [`connect_url`](crate::connect_url) cannot be used.
    #[error("invalid websocket url: {message}")]
    InvalidUrl { message: String },

    /// [`ConnectOptions`](crate::ConnectOptions) failed validation.
    #[error("invalid connect options: {message}")]
    InvalidOptions { message: String },

    /// The HTTP exchange itself failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl HandshakeError {
    /// Create an invalid URL error.
    pub fn invalid_url(message: impl Into<String>) -> Self {
        Self::InvalidUrl {
            message: message.into(),
        }
    }

    /// Create an invalid options error.
    pub fn invalid_options(message: impl Into<String>) -> Self {
        Self::InvalidOptions {
            message: message.into(),
        }
    }
}

/// Failure of the HTTP exchange that carries the upgrade request.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Socket level failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// HTTP/1.1 protocol failure reported by hyper.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// TLS setup failure, or a secure exchange without a TLS context.
    #[error("TLS error: {message}")]
    Tls { message: String },

    /// The request does not name a host the transport can dial.
    #[error("invalid host: {message}")]
    InvalidHost { message: String },

    /// The authenticator refused to sign the request.
    #[error("authentication error: {message}")]
    Auth { message: String },

    /// The exchange did not complete in time.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Invalid transport configuration.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl TransportError {
    /// Create a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls {
            message: message.into(),
        }
    }

    /// Create an invalid host error.
    pub fn invalid_host(message: impl Into<String>) -> Self {
        Self::InvalidHost {
            message: message.into(),
        }
    }

    /// Create an authentication error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Protocol violation found while decoding or encoding frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// RSV bits set without a negotiated extension.
    #[error("reserved bits are not zero")]
    ReservedBitsNotZero,

    /// Opcode outside the RFC 6455 table.
    #[error("invalid opcode (byte={0})")]
    InvalidOpCode(u8),

    /// Control frame without the FIN bit.
    #[error("control frame must not be fragmented")]
    ControlFrameFragmented,

    /// Control frame payload above 125 bytes.
    #[error("control frame too large")]
    ControlFrameTooLarge,

    /// A new data frame started while a fragmented message was in progress.
    #[error("invalid fragment")]
    InvalidFragment,

    /// Continuation frame without an initial data frame.
    #[error("invalid continuation frame")]
    InvalidContinuationFrame,

    /// Text message is not valid UTF-8.
    #[error("invalid UTF-8")]
    InvalidUtf8,

    /// Close frame with a one byte payload, a code not allowed on the wire,
    /// or a non-UTF-8 reason.
    #[error("invalid close frame")]
    InvalidCloseFrame,

    /// Message exceeds the limit of the data provider.
    #[error("message of {size} bytes exceeds the limit of {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },

    /// The data provider refused to store the message.
    #[error("message rejected by the data provider")]
    MessageRejected,

    /// A server sent a masked frame.
    #[error("received a masked frame from the server")]
    MaskedFrame,

    /// A client sent an unmasked frame.
    #[error("received an unmasked frame from the client")]
    UnmaskedFrame,

    /// The byte source of the codec failed.
    #[error("I/O error: {0}")]
    Io(io::ErrorKind),
}

impl From<io::Error> for FrameError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.kind())
    }
}

/// Failure of an operation on an established connection.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// The reader task was already started once.
    #[error("connection reader already started")]
    AlreadyStarted,

    /// The socket has been closed by either side.
    #[error("connection is closed")]
    Closed,

    /// Socket level failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// [`start`](crate::Connection::start) was called outside a Tokio runtime.
    #[error("no Tokio runtime to run the reader on: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    /// The peer violated the framing protocol.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

impl ConnectionError {
    /// Whether this is an I/O failure such as a reset or an early EOF,
    /// as opposed to a protocol or programming error.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Closed | Self::Frame(FrameError::Io(_)))
    }
}
