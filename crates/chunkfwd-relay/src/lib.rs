//! Relay between two endpoints
//!
//! High-level API: parse two targets, build their connections and run one
//! relay between them.
//!
//! ```no_run
//! use chunkfwd_relay::{relay, RelayConfig};
//!
//! # async fn example() -> Result<(), chunkfwd_relay::ConnectionError> {
//! // Accept one TCP client on 9001 and hand it to a tunnel peer
//! let report = relay(
//!     "127.0.0.1:9001",
//!     "http://relay.example.com/session",
//!     RelayConfig::default(),
//! )
//! .await?;
//! println!("{:?}", report);
//! # Ok(())
//! # }
//! ```

pub mod endpoint;
pub mod forwarder;
pub mod relay_config;

pub use chunkfwd_connection::{Connection, ConnectionError, ConnectionResult, Role, TunnelConfig};
pub use endpoint::{build_pair, Target};
pub use forwarder::{Direction, Relay, RelayReport, RelayState};
pub use relay_config::{RelayConfig, DEFAULT_DRAIN_GRACE};

/// Build both endpoints from their target strings and run one relay
pub async fn relay(
    source: &str,
    destination: &str,
    config: RelayConfig,
) -> ConnectionResult<RelayReport> {
    let (source, destination) = build_pair(source, destination, &config.tunnel)?;
    Relay::new(source, destination, config).run().await
}
