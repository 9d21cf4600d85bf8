//! Plain TCP endpoint

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::transport::{Connection, ConnectionError, ConnectionResult, Role};

/// Upper bound on bytes returned by a single `recv`
pub const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// TCP socket endpoint.
///
/// As a source it listens and accepts exactly one peer; as a destination it
/// dials the address.
pub struct DirectConnection {
    role: Role,
    address: String,
    listener: Option<TcpListener>,
    peer_addr: Option<SocketAddr>,
    reader: Option<Mutex<OwnedReadHalf>>,
    writer: Option<Mutex<OwnedWriteHalf>>,
}

impl std::fmt::Debug for DirectConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectConnection")
            .field("role", &self.role)
            .field("address", &self.address)
            .field("peer_addr", &self.peer_addr)
            .field("open", &self.reader.is_some())
            .finish()
    }
}

impl DirectConnection {
    pub fn new(address: impl Into<String>, role: Role) -> Self {
        Self {
            role,
            address: address.into(),
            listener: None,
            peer_addr: None,
            reader: None,
            writer: None,
        }
    }

    /// Source endpoint that accepts on an already bound listener
    pub fn from_listener(listener: TcpListener) -> ConnectionResult<Self> {
        let address = listener.local_addr()?.to_string();
        Ok(Self {
            listener: Some(listener),
            ..Self::new(address, Role::Source)
        })
    }

    /// Address of the accepted or dialed peer, once open
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    async fn accept_one(&mut self) -> ConnectionResult<(TcpStream, SocketAddr)> {
        let listener = match self.listener.take() {
            Some(listener) => listener,
            None => TcpListener::bind(&self.address)
                .await
                .map_err(|e| ConnectionError::connect(&self.address, e))?,
        };

        info!("Waiting for a connection on {}", self.address);
        // The listener is dropped after the first peer; later peers are refused
        listener
            .accept()
            .await
            .map_err(|e| ConnectionError::connect(&self.address, e))
    }
}

#[async_trait]
impl Connection for DirectConnection {
    async fn open(&mut self) -> ConnectionResult<()> {
        let stream = match self.role {
            Role::Source => {
                let (stream, peer_addr) = self.accept_one().await?;
                info!("TCP: connected from {} on {}", peer_addr, self.address);
                self.peer_addr = Some(peer_addr);
                stream
            }
            Role::Destination => {
                let stream = TcpStream::connect(&self.address)
                    .await
                    .map_err(|e| ConnectionError::connect(&self.address, e))?;
                info!("TCP: connected to {}", self.address);
                self.peer_addr = stream.peer_addr().ok();
                stream
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY on {}: {}", self.address, e);
        }

        let (reader, writer) = stream.into_split();
        self.reader = Some(Mutex::new(reader));
        self.writer = Some(Mutex::new(writer));
        Ok(())
    }

    async fn send(&self, data: Bytes) -> ConnectionResult<usize> {
        let writer = self.writer.as_ref().ok_or(ConnectionError::NotOpen)?;
        writer.lock().await.write_all(&data).await?;
        Ok(data.len())
    }

    async fn recv(&self) -> ConnectionResult<Bytes> {
        let reader = self.reader.as_ref().ok_or(ConnectionError::NotOpen)?;
        let mut buf = BytesMut::with_capacity(RECV_BUFFER_SIZE);
        reader.lock().await.read_buf(&mut buf).await?;
        Ok(buf.freeze())
    }

    fn kind(&self) -> &'static str {
        "tcp"
    }

    fn role(&self) -> Role {
        self.role
    }
}
