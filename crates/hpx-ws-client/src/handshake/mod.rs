//! The client side of the RFC 6455 opening handshake.

pub mod key;
pub mod negotiate;

pub use self::{
    key::{HandshakeKey, KeyGenerator, expected_accept, verify_accept},
    negotiate::{ConnectOptions, connect, connect_url, upgrade_request},
};
