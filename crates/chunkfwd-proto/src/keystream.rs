//! Repeating-XOR keystream derived from the tunnel URL
//!
//! This is obfuscation, not encryption. The key is the SHA-1 of a string that
//! any observer of the tunnel requests can read, there is no nonce and no
//! authentication. It only keeps payloads from being plaintext on the wire.

use sha1::{Digest, Sha1};
use std::fmt;

/// Keystream length (SHA-1 output size)
pub const KEYSTREAM_LEN: usize = 20;

/// Fixed 20-byte keystream
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Keystream([u8; KEYSTREAM_LEN]);

impl Keystream {
    /// Derive the keystream from a shared secret (the tunnel URL as typed).
    pub fn derive(secret: &str) -> Self {
        let digest = Sha1::digest(secret.as_bytes());
        let mut key = [0u8; KEYSTREAM_LEN];
        key.copy_from_slice(&digest);
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8; KEYSTREAM_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Keystream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Keystream").field(&self.to_hex()).finish()
    }
}

/// One direction's position in the keystream.
///
/// Each direction of a tunnel owns its own cipher; the index advances once
/// per byte and is never reset during a session.
#[derive(Debug, Clone)]
pub struct KeystreamCipher {
    key: Keystream,
    index: usize,
}

impl KeystreamCipher {
    pub fn new(key: Keystream) -> Self {
        Self { key, index: 0 }
    }

    /// Current position, always in `0..KEYSTREAM_LEN`
    pub fn index(&self) -> usize {
        self.index
    }

    /// XOR `buf` in place and advance the index past it.
    pub fn apply(&mut self, buf: &mut [u8]) {
        for byte in buf.iter_mut() {
            *byte ^= self.key.0[self.index];
            self.index = (self.index + 1) % KEYSTREAM_LEN;
        }
    }
}
