//! Target parsing and connection construction

use chunkfwd_connection::{
    Connection, ConnectionError, ConnectionResult, DirectConnection, Role, TunnelConfig,
    TunneledConnection,
};
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// A relay endpoint as given on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// `host:port`
    Tcp(String),
    /// Anything starting with `http`
    Tunnel(String),
}

impl Target {
    pub fn parse(target: &str) -> ConnectionResult<Self> {
        if target.get(..4) == Some("http") {
            return Ok(Target::Tunnel(target.to_string()));
        }

        let Some((host, port)) = target.rsplit_once(':') else {
            return Err(ConnectionError::config(target, "expected host:port or an http URL"));
        };
        if host.is_empty() {
            return Err(ConnectionError::config(target, "missing host"));
        }
        if port.parse::<u16>().is_err() {
            return Err(ConnectionError::config(target, format!("invalid port '{}'", port)));
        }
        Ok(Target::Tcp(target.to_string()))
    }

    /// Build the connection for this target in the given role
    pub fn into_connection(
        self,
        role: Role,
        tunnel: &TunnelConfig,
    ) -> ConnectionResult<Box<dyn Connection>> {
        Ok(match self {
            Target::Tcp(address) => Box::new(DirectConnection::new(address, role)),
            Target::Tunnel(url) => Box::new(TunneledConnection::new(&url, role, tunnel.clone())?),
        })
    }
}

impl FromStr for Target {
    type Err = ConnectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Tcp(address) => write!(f, "tcp://{}", address),
            Target::Tunnel(url) => write!(f, "{}", url),
        }
    }
}

/// Source and destination connections for one relay
pub fn build_pair(
    source: &str,
    destination: &str,
    tunnel: &TunnelConfig,
) -> ConnectionResult<(Box<dyn Connection>, Box<dyn Connection>)> {
    let source = Target::parse(source)?;
    let destination = Target::parse(destination)?;
    info!("Relaying {} -> {}", source, destination);

    Ok((
        source.into_connection(Role::Source, tunnel)?,
        destination.into_connection(Role::Destination, tunnel)?,
    ))
}
