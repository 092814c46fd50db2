//! The HTTP exchange that carries the upgrade request.
//!
//! The negotiator only needs three things from a transport: send a request
//! and return the response head, hand over the sockets that were switched to
//! the WebSocket protocol, and release everything when the attempt fails.
//! [`HttpTransport`] is the default implementation over TCP or TLS.

mod client;
mod stream;

use std::{fmt, io};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Request, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite};

pub use self::{
    client::{HttpTransport, HttpTransportBuilder, TransportConfig, webpki_connector},
    stream::MaybeTlsStream,
};
use crate::{auth::Principal, error::TransportResult};

/// A duplex byte stream a connection can run on.
pub trait Socket: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Socket for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedSocket = Box<dyn Socket>;

/// A socket switched to the WebSocket protocol.
pub struct UpgradedSocket {
    io: BoxedSocket,
    read_buf: Bytes,
}

impl UpgradedSocket {
    pub fn new<S: Socket>(io: S) -> Self {
        Self {
            io: Box::new(io),
            read_buf: Bytes::new(),
        }
    }

    /// Bytes the HTTP layer read past the response head. They belong to the
    /// first frames and are parsed before anything read from the socket.
    #[must_use]
    pub fn with_read_buf(mut self, read_buf: Bytes) -> Self {
        self.read_buf = read_buf;
        self
    }

    pub fn read_buf(&self) -> &Bytes {
        &self.read_buf
    }

    pub fn into_parts(self) -> (BoxedSocket, Bytes) {
        (self.io, self.read_buf)
    }
}

impl fmt::Debug for UpgradedSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpgradedSocket")
            .field("read_buf", &self.read_buf.len())
            .finish_non_exhaustive()
    }
}

/// Status line and headers of the upgrade response.
#[derive(Debug, Clone)]
pub struct UpgradeResponse {
    pub status: StatusCode,
    pub reason: Option<String>,
    pub headers: HeaderMap,
}

impl UpgradeResponse {
    pub fn new(status: StatusCode, headers: HeaderMap) -> Self {
        Self {
            status,
            reason: None,
            headers,
        }
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// The reason phrase, falling back to the canonical one for the status.
    pub fn reason(&self) -> &str {
        self.reason
            .as_deref()
            .or_else(|| self.status.canonical_reason())
            .unwrap_or_default()
    }
}

/// Performs the HTTP exchange of a WebSocket upgrade.
#[async_trait]
pub trait UpgradeTransport: Send {
    /// Sends `request` and returns the response head. With
    /// `retain_connection`, a socket switched by a `101` response is kept for
    /// [`take_open_sockets`](Self::take_open_sockets).
    async fn execute(
        &mut self,
        request: Request<()>,
        principal: Option<&Principal>,
        secure: bool,
        retain_connection: bool,
    ) -> TransportResult<UpgradeResponse>;

    /// Hands over every socket retained so far.
    async fn take_open_sockets(&mut self) -> Vec<UpgradedSocket>;

    /// Releases all resources, including retained sockets.
    async fn close(&mut self) -> io::Result<()>;

    /// Whether exchanges run over TLS.
    fn is_secure(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_falls_back_to_canonical() {
        let response = UpgradeResponse::new(StatusCode::FORBIDDEN, HeaderMap::new());
        assert_eq!(response.reason(), "Forbidden");
        let response = response.with_reason("go away");
        assert_eq!(response.reason(), "go away");
    }

    #[test]
    fn upgraded_socket_keeps_leftover_bytes() {
        let (client, _server) = tokio::io::duplex(64);
        let socket = UpgradedSocket::new(client).with_read_buf(Bytes::from_static(b"\x81\x00"));
        assert_eq!(socket.read_buf().as_ref(), b"\x81\x00");
        let (_io, read_buf) = socket.into_parts();
        assert_eq!(read_buf.len(), 2);
    }
}
