//! `Sec-WebSocket-Key` generation and `Sec-WebSocket-Accept` derivation.

use std::fmt;

use base64::prelude::*;
use parking_lot::Mutex;
use rand::{RngCore, SeedableRng, rngs::StdRng};
use sha1::{Digest, Sha1};

use crate::error::{HandshakeError, HandshakeResult};

/// GUID appended to the key before hashing, fixed by RFC 6455.
pub const WEBSOCKET_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Number of random bytes in a handshake key.
pub const KEY_LEN: usize = 18;

/// The base64 nonce sent as `Sec-WebSocket-Key`.
#[derive(Clone, PartialEq, Eq)]
pub struct HandshakeKey(String);

impl HandshakeKey {
    /// Generates a key from the thread-local RNG.
    pub fn generate() -> Self {
        Self::from_bytes(rand::random::<[u8; KEY_LEN]>())
    }

    fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(BASE64_STANDARD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The accept value a server must answer this key with.
    pub fn expected_accept(&self) -> String {
        expected_accept(&self.0)
    }
}

impl fmt::Display for HandshakeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for HandshakeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HandshakeKey").field(&self.0).finish()
    }
}

/// Owned source of handshake nonces.
///
/// The key is a protocol nonce rather than a secret, so any seeded RNG will
/// do; a fixed seed makes handshakes reproducible in tests.
pub struct KeyGenerator {
    rng: Mutex<StdRng>,
}

impl KeyGenerator {
    /// Seeds the generator from the operating system.
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn generate(&self) -> HandshakeKey {
        let mut bytes = [0u8; KEY_LEN];
        self.rng.lock().fill_bytes(&mut bytes);
        HandshakeKey::from_bytes(bytes)
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for KeyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyGenerator").finish_non_exhaustive()
    }
}

/// base64(SHA-1(key + GUID)).
pub fn expected_accept(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WEBSOCKET_GUID);
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Checks the server's `Sec-WebSocket-Accept` value against `key`.
pub fn verify_accept(key: &HandshakeKey, received: &str) -> HandshakeResult<()> {
    let expected = key.expected_accept();
    if expected == received.trim() {
        Ok(())
    } else {
        Err(HandshakeError::AcceptMismatch {
            expected,
            actual: received.to_string(),
        })
    }
}
