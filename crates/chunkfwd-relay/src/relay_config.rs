//! Relay configuration

use chunkfwd_connection::TunnelConfig;
use std::time::Duration;

/// Default time the second direction gets to finish after the first one ends
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// How long to wait for the other direction once one direction has ended
    pub drain_grace: Duration,

    /// Settings applied to HTTP tunnel endpoints
    pub tunnel: TunnelConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            drain_grace: DEFAULT_DRAIN_GRACE,
            tunnel: TunnelConfig::default(),
        }
    }
}

impl RelayConfig {
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    pub fn with_tunnel(mut self, tunnel: TunnelConfig) -> Self {
        self.tunnel = tunnel;
        self
    }
}
