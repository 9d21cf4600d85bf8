//! Relay endpoints
//!
//! A [`Connection`] is one side of a relay: either a plain TCP socket
//! ([`DirectConnection`]) or an HTTP chunked tunnel made of a GET and a PUT
//! request ([`TunneledConnection`]).

pub mod config;
pub mod direct;
pub mod transport;
pub mod tunnel;

pub use config::TunnelConfig;
pub use direct::DirectConnection;
pub use transport::{Connection, ConnectionError, ConnectionResult, Role};
pub use tunnel::TunneledConnection;
