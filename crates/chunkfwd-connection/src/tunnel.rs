//! HTTP chunked tunnel endpoint
//!
//! A tunneled connection is two unrelated HTTP/1.1 requests against the same
//! URL: a GET whose chunked response body carries inbound bytes, and a PUT
//! whose chunked request body carries outbound bytes. The HTTP server in the
//! middle only has to pipe the body of `PUT <path>/N` into the response of
//! `GET <path>/N`. The source side fetches `/0` and pushes `/1`, the
//! destination side the reverse, so two peers that can only dial out meet
//! through the server.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chunkfwd_proto::{
    request_head, ChunkDecoder, ChunkEncoder, Keystream, KeystreamCipher, ResponseHeadDecoder,
};
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{BytesCodec, FramedRead, FramedWrite};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::TunnelConfig;
use crate::transport::{Connection, ConnectionError, ConnectionResult, Role};

/// Aborts the wrapped task when dropped
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Live state of an opened tunnel.
///
/// The sockets and both cipher positions live inside the background tasks;
/// the session only keeps the queues and the task handles.
struct TunnelSession {
    outbox: mpsc::Sender<Bytes>,
    inbox: Mutex<mpsc::Receiver<Bytes>>,
    _push: AbortOnDrop,
    _fetch: AbortOnDrop,
}

/// HTTP tunnel endpoint
pub struct TunneledConnection {
    target: String,
    url: Url,
    role: Role,
    config: TunnelConfig,
    session: Option<TunnelSession>,
}

impl std::fmt::Debug for TunneledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunneledConnection")
            .field("url", &self.url.as_str())
            .field("role", &self.role)
            .field("obfuscate", &self.config.obfuscate)
            .field("open", &self.session.is_some())
            .finish()
    }
}

impl TunneledConnection {
    /// Parse the tunnel URL. Only plain `http` is supported.
    pub fn new(target: &str, role: Role, config: TunnelConfig) -> ConnectionResult<Self> {
        let url = Url::parse(target).map_err(|e| ConnectionError::config(target, e.to_string()))?;

        if url.scheme() != "http" {
            return Err(ConnectionError::config(
                target,
                format!("unsupported scheme '{}', expected http", url.scheme()),
            ));
        }
        if url.host_str().is_none() {
            return Err(ConnectionError::config(target, "missing host"));
        }

        Ok(Self {
            target: target.to_string(),
            url,
            role,
            config,
            session: None,
        })
    }

    /// Keystream shared by both peers of this tunnel
    pub fn keystream(&self) -> Keystream {
        Keystream::derive(&self.target)
    }

    /// `host:port` to dial, port 80 when the URL has none
    pub fn endpoint(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        let port = self.url.port_or_known_default().unwrap_or(80);
        format!("{}:{}", host, port)
    }

    /// Value of the `Host` header
    pub fn host_header(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Request path for one half of the tunnel
    pub fn request_path(&self, suffix: &str) -> String {
        format!("{}{}", self.url.path().trim_end_matches('/'), suffix)
    }

    fn cipher(&self) -> Option<KeystreamCipher> {
        self.config
            .obfuscate
            .then(|| KeystreamCipher::new(self.keystream()))
    }

    /// Dial the tunnel server and send one request head
    async fn http_open(&self, method: &str, suffix: &str) -> ConnectionResult<TcpStream> {
        let endpoint = self.endpoint();
        let path = self.request_path(suffix);
        debug!("HTTP open {} {} via {}", method, path, endpoint);

        let mut stream = TcpStream::connect(&endpoint)
            .await
            .map_err(|e| ConnectionError::connect(&self.target, e))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY on {}: {}", endpoint, e);
        }

        let head = request_head(method, &path, &self.host_header());
        stream
            .write_all(head.as_bytes())
            .await
            .map_err(|e| ConnectionError::connect(&self.target, e))?;
        Ok(stream)
    }
}

fn apply_cipher(cipher: &mut Option<KeystreamCipher>, data: Bytes) -> Bytes {
    match cipher {
        Some(cipher) => {
            let mut buf = BytesMut::from(&data[..]);
            cipher.apply(&mut buf);
            buf.freeze()
        }
        None => data,
    }
}

/// PUT half: wait for the interim response, then write each queued buffer
/// as one chunk. Never writes the terminating chunk.
async fn run_push(
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    mut outbox: mpsc::Receiver<Bytes>,
    mut cipher: Option<KeystreamCipher>,
    max_head_len: usize,
) {
    let mut responses = FramedRead::new(reader, ResponseHeadDecoder::new(max_head_len));
    match responses.next().await {
        Some(Ok(head)) => debug!("PUT response: {} {}", head.status, head.reason),
        Some(Err(e)) => {
            warn!("PUT response unreadable: {}", e);
            return;
        }
        None => {
            warn!("PUT connection closed before response");
            return;
        }
    }

    // The server may keep talking on this socket; it must be read so it
    // never stalls, but nothing in it matters.
    let mut discard = responses.map_decoder(|_| BytesCodec::new());
    let _drain = AbortOnDrop(tokio::spawn(async move {
        while let Some(Ok(bytes)) = discard.next().await {
            debug!("PUT discard {} bytes", bytes.len());
        }
        debug!("PUT response closed");
    }));

    let mut sink = FramedWrite::new(writer, ChunkEncoder);
    while let Some(data) = outbox.recv().await {
        let len = data.len();
        let data = apply_cipher(&mut cipher, data);
        debug!("put chunk {} bytes ({:x})", len, len);
        if let Err(e) = sink.send(data).await {
            warn!("PUT write failed: {}", e);
            break;
        }
    }
    debug!("PUT half finished");
}

/// GET half: skip the response head, then deliver decoded chunks to the
/// inbox. Always ends by delivering one empty buffer.
async fn run_fetch(
    stream: TcpStream,
    inbox: mpsc::Sender<Bytes>,
    mut cipher: Option<KeystreamCipher>,
    max_head_len: usize,
    max_size_line: usize,
) {
    let mut framed = FramedRead::new(stream, ResponseHeadDecoder::new(max_head_len));
    match framed.next().await {
        Some(Ok(head)) => debug!("GET response: {} {}", head.status, head.reason),
        Some(Err(e)) => {
            warn!("GET response unreadable: {}", e);
            let _ = inbox.send(Bytes::new()).await;
            return;
        }
        None => {
            warn!("GET connection closed before response");
            let _ = inbox.send(Bytes::new()).await;
            return;
        }
    }

    let mut chunks = framed.map_decoder(|_| ChunkDecoder::new(max_size_line));
    loop {
        match chunks.next().await {
            Some(Ok(data)) if data.is_empty() => {
                debug!("get chunk 0 bytes, end of stream");
                break;
            }
            Some(Ok(data)) => {
                debug!("get chunk {} bytes", data.len());
                let data = apply_cipher(&mut cipher, data);
                if inbox.send(data).await.is_err() {
                    return;
                }
            }
            Some(Err(e)) => {
                warn!("GET stream error: {}", e);
                break;
            }
            None => {
                debug!("GET connection closed");
                break;
            }
        }
    }
    let _ = inbox.send(Bytes::new()).await;
}

#[async_trait]
impl Connection for TunneledConnection {
    async fn open(&mut self) -> ConnectionResult<()> {
        if self.session.is_some() {
            return Ok(());
        }

        let key = self.keystream();
        debug!("HTTP tunnel keystream {}", key.to_hex());

        let depth = self.config.queue_depth.max(1);
        let (outbox_tx, outbox_rx) = mpsc::channel(depth);
        let (inbox_tx, inbox_rx) = mpsc::channel(depth);

        let put = self.http_open("PUT", self.role.push_suffix()).await?;
        let (put_reader, put_writer) = put.into_split();
        let push = tokio::spawn(run_push(
            put_reader,
            put_writer,
            outbox_rx,
            self.cipher(),
            self.config.max_head_len,
        ));
        let push = AbortOnDrop(push);

        let get = self.http_open("GET", self.role.fetch_suffix()).await?;
        let fetch = tokio::spawn(run_fetch(
            get,
            inbox_tx,
            self.cipher(),
            self.config.max_head_len,
            self.config.max_size_line,
        ));

        self.session = Some(TunnelSession {
            outbox: outbox_tx,
            inbox: Mutex::new(inbox_rx),
            _push: push,
            _fetch: AbortOnDrop(fetch),
        });

        info!("HTTP tunnel ({}): connected to {}", self.role, self.url);
        Ok(())
    }

    async fn send(&self, data: Bytes) -> ConnectionResult<usize> {
        let session = self.session.as_ref().ok_or(ConnectionError::NotOpen)?;
        // An empty chunk would terminate the peer's stream
        if data.is_empty() {
            return Ok(0);
        }
        let len = data.len();
        session
            .outbox
            .send(data)
            .await
            .map_err(|_| ConnectionError::PushClosed)?;
        Ok(len)
    }

    async fn recv(&self) -> ConnectionResult<Bytes> {
        let session = self.session.as_ref().ok_or(ConnectionError::NotOpen)?;
        let mut inbox = session.inbox.lock().await;
        Ok(inbox.recv().await.unwrap_or_default())
    }

    fn kind(&self) -> &'static str {
        "http-tunnel"
    }

    fn role(&self) -> Role {
        self.role
    }
}
