//! Forwarding engine
//!
//! Opens both endpoints, copies each direction in its own task and, once
//! either direction ends, gives the other one a grace period to finish
//! before the relay closes.

use chunkfwd_connection::{Connection, ConnectionResult};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::relay_config::RelayConfig;

/// Lifecycle of a relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Opening,
    Forwarding,
    Draining,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    SourceToDestination,
    DestinationToSource,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::SourceToDestination => write!(f, "source -> destination"),
            Direction::DestinationToSource => write!(f, "destination -> source"),
        }
    }
}

/// Bytes moved per direction; `None` when a direction was abandoned after
/// the drain grace period
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub source_to_destination: Option<u64>,
    pub destination_to_source: Option<u64>,
}

impl RelayReport {
    fn record(&mut self, direction: Direction, bytes: Option<u64>) {
        match direction {
            Direction::SourceToDestination => self.source_to_destination = bytes,
            Direction::DestinationToSource => self.destination_to_source = bytes,
        }
    }
}

/// One source ↔ destination relay
pub struct Relay {
    source: Box<dyn Connection>,
    destination: Box<dyn Connection>,
    config: RelayConfig,
    state: watch::Sender<RelayState>,
}

impl Relay {
    pub fn new(
        source: Box<dyn Connection>,
        destination: Box<dyn Connection>,
        config: RelayConfig,
    ) -> Self {
        let (state, _) = watch::channel(RelayState::Idle);
        Self {
            source,
            destination,
            config,
            state,
        }
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<RelayState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> RelayState {
        *self.state.borrow()
    }

    /// Run the relay to completion.
    ///
    /// Errors are only returned for failures while opening an endpoint;
    /// anything that goes wrong while forwarding just ends that direction.
    pub async fn run(self) -> ConnectionResult<RelayReport> {
        let Relay {
            mut source,
            mut destination,
            config,
            state,
        } = self;

        transition(&state, RelayState::Opening);
        info!("Opening source ({})", source.kind());
        if let Err(e) = source.open().await {
            error!("Failed to open source: {}", e);
            transition(&state, RelayState::Closed);
            return Err(e);
        }
        info!("Opening destination ({})", destination.kind());
        if let Err(e) = destination.open().await {
            error!("Failed to open destination: {}", e);
            transition(&state, RelayState::Closed);
            return Err(e);
        }

        let source: Arc<dyn Connection> = Arc::from(source);
        let destination: Arc<dyn Connection> = Arc::from(destination);

        transition(&state, RelayState::Forwarding);
        let mut forward = spawn_pump(
            source.clone(),
            destination.clone(),
            Direction::SourceToDestination,
        );
        let mut backward = spawn_pump(destination, source, Direction::DestinationToSource);

        let (finished, result) = tokio::select! {
            result = &mut forward => (Direction::SourceToDestination, result),
            result = &mut backward => (Direction::DestinationToSource, result),
        };

        let mut report = RelayReport::default();
        report.record(finished, result.ok());

        let (remaining_direction, mut remaining) = match finished {
            Direction::SourceToDestination => (Direction::DestinationToSource, backward),
            Direction::DestinationToSource => (Direction::SourceToDestination, forward),
        };

        transition(&state, RelayState::Draining);
        debug!(
            "{} finished, waiting up to {:?} for {}",
            finished, config.drain_grace, remaining_direction
        );
        match tokio::time::timeout(config.drain_grace, &mut remaining).await {
            Ok(result) => report.record(remaining_direction, result.ok()),
            Err(_) => {
                warn!(
                    "{} still running after {:?}, abandoning it",
                    remaining_direction, config.drain_grace
                );
                remaining.abort();
            }
        }

        transition(&state, RelayState::Closed);
        info!(
            "Relay closed (source -> destination: {:?} bytes, destination -> source: {:?} bytes)",
            report.source_to_destination, report.destination_to_source
        );
        Ok(report)
    }
}

fn transition(state: &watch::Sender<RelayState>, next: RelayState) {
    let previous = state.send_replace(next);
    debug!("Relay state {:?} -> {:?}", previous, next);
}

fn spawn_pump(
    reader: Arc<dyn Connection>,
    writer: Arc<dyn Connection>,
    direction: Direction,
) -> JoinHandle<u64> {
    tokio::spawn(async move { pump(reader, writer, direction).await })
}

/// Copy one direction until end of stream or the first failure
async fn pump(reader: Arc<dyn Connection>, writer: Arc<dyn Connection>, direction: Direction) -> u64 {
    let mut total = 0u64;
    loop {
        let data = match reader.recv().await {
            Ok(data) => data,
            Err(e) => {
                warn!("{}: {} recv failed: {}", direction, reader.kind(), e);
                break;
            }
        };
        trace!("{} recv {}", reader.kind(), data.len());

        if data.is_empty() {
            debug!("{}: {} reached end of stream", direction, reader.kind());
            break;
        }

        match writer.send(data).await {
            Ok(sent) => total += sent as u64,
            Err(e) => {
                warn!("{}: {} send failed: {}", direction, writer.kind(), e);
                break;
            }
        }
    }
    total
}
