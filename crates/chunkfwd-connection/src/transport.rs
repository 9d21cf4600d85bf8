//! Connection trait for relay endpoints

use async_trait::async_trait;
use bytes::Bytes;
use chunkfwd_proto::CodecError;
use std::fmt;
use thiserror::Error;

/// Connection errors
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Invalid target {target:?}: {reason}")]
    Config { target: String, reason: String },

    #[error("Failed to connect {target}: {source}")]
    Connect {
        target: String,
        source: std::io::Error,
    },

    #[error("Stream error: {0}")]
    Stream(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] CodecError),

    #[error("Connection not open")]
    NotOpen,

    #[error("Tunnel push half closed")]
    PushClosed,
}

impl ConnectionError {
    pub fn config(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            target: target.into(),
            reason: reason.into(),
        }
    }

    pub fn connect(target: impl Into<String>, source: std::io::Error) -> Self {
        Self::Connect {
            target: target.into(),
            source,
        }
    }

    /// Whether the error can only happen before forwarding starts.
    ///
    /// Everything else is reported mid-relay and only ends one direction.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::Connect { .. })
    }
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Which side of the relay a connection sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Listens (TCP) or fetches `/0` and pushes `/1` (tunnel)
    Source,
    /// Dials (TCP) or fetches `/1` and pushes `/0` (tunnel)
    Destination,
}

impl Role {
    /// Path suffix of the GET request for this side
    pub fn fetch_suffix(self) -> &'static str {
        match self {
            Role::Source => chunkfwd_proto::SOURCE_FETCH_SUFFIX,
            Role::Destination => chunkfwd_proto::DESTINATION_FETCH_SUFFIX,
        }
    }

    /// Path suffix of the PUT request for this side
    pub fn push_suffix(self) -> &'static str {
        match self {
            Role::Source => chunkfwd_proto::DESTINATION_FETCH_SUFFIX,
            Role::Destination => chunkfwd_proto::SOURCE_FETCH_SUFFIX,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Source => write!(f, "source"),
            Role::Destination => write!(f, "destination"),
        }
    }
}

/// One endpoint of a relay.
///
/// `open` is called once before any `send`/`recv`. After that the two
/// forwarding loops call `send` and `recv` concurrently through a shared
/// reference, so implementations keep their read and write sides
/// independent.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Establish the underlying transport (listen+accept, dial, or tunnel requests)
    async fn open(&mut self) -> ConnectionResult<()>;

    /// Send a buffer, returning the number of bytes accepted
    async fn send(&self, data: Bytes) -> ConnectionResult<usize>;

    /// Receive the next buffer; an empty buffer means end of stream
    async fn recv(&self) -> ConnectionResult<Bytes>;

    /// Short label for diagnostics
    fn kind(&self) -> &'static str;

    fn role(&self) -> Role;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_suffixes_cross() {
        assert_eq!(Role::Source.fetch_suffix(), "/0");
        assert_eq!(Role::Source.push_suffix(), "/1");
        assert_eq!(Role::Destination.fetch_suffix(), "/1");
        assert_eq!(Role::Destination.push_suffix(), "/0");
        assert_eq!(Role::Source.fetch_suffix(), Role::Destination.push_suffix());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(ConnectionError::config("x", "bad").is_fatal());
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(ConnectionError::connect("127.0.0.1:1", io).is_fatal());
        assert!(!ConnectionError::NotOpen.is_fatal());
        assert!(!ConnectionError::Protocol(CodecError::MissingChunkCrlf).is_fatal());
    }
}
