//! # hpx-ws-client
//!
//! Client-side WebSocket (RFC 6455) connection manager.
//!
//! The crate performs the HTTP/1.1 upgrade handshake, binds the switched
//! socket to a [`Connection`], and runs one reader task per connection that
//! reassembles inbound messages and hands them to a [`Dispatcher`] in arrival
//! order. Writes from any number of tasks go through a single serialized,
//! buffered write path.
//!
//! Every collaborator sits behind a trait and can be replaced:
//!
//! - [`UpgradeTransport`](transport::UpgradeTransport) carries the upgrade
//!   request ([`HttpTransport`] over TCP or TLS by default),
//! - [`ParserFactory`](parser::ParserFactory) parses inbound bytes
//!   ([`ParserConfig`] builds the RFC 6455 [`FrameParser`](parser::FrameParser)),
//! - [`MessageFormatter`](formatter::MessageFormatter) serializes outbound
//!   messages ([`FrameFormatter`]),
//! - [`Dispatcher`] receives inbound messages ([`Subscribers`] or a tokio
//!   `mpsc` sender).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use hpx_ws_client::{InboundMessage, Message, connect_url};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (tx, mut rx) = mpsc::unbounded_channel::<InboundMessage>();
//!     let connection = connect_url("wss://echo.websocket.org", Arc::new(tx)).await?;
//!     connection.start()?;
//!
//!     connection.send(&Message::text("hello")).await?;
//!     if let Some(message) = rx.recv().await {
//!         println!("received {:?}", message.as_text());
//!     }
//!
//!     connection.close().await;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod connection;
pub mod cookie;
pub mod dispatch;
pub mod error;
pub mod formatter;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod parser;
pub mod transport;

// Re-export commonly used types
pub use auth::{Authenticator, Principal};
pub use connection::{Connection, ConnectionId};
pub use dispatch::{Dispatcher, Subscribers};
pub use error::{
    ConnectionError, ConnectionResult, FrameError, HandshakeError, HandshakeResult, TransportError,
    TransportResult,
};
pub use formatter::FrameFormatter;
pub use handshake::{ConnectOptions, HandshakeKey, KeyGenerator, connect, connect_url};
pub use message::{InboundMessage, Message};
pub use parser::{MemoryDataProvider, ParserConfig};
pub use transport::{HttpTransport, TransportConfig, UpgradeTransport, UpgradedSocket};
