//! HTTP pipe server shared by the integration tests

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

enum Half {
    Get(TcpStream),
    Put(TcpStream, Vec<u8>),
}

/// Stand-in for an HTTP piping server: the body of `PUT <path>` is streamed
/// verbatim into the response body of `GET <path>`. Every piped byte is
/// also recorded so tests can look at the wire.
pub struct PipeServer {
    pub addr: SocketAddr,
    wire: Arc<Mutex<Vec<u8>>>,
}

impl PipeServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let wire = Arc::new(Mutex::new(Vec::new()));
        let waiting: Arc<Mutex<HashMap<String, Half>>> = Arc::new(Mutex::new(HashMap::new()));

        let recorded = wire.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle(stream, waiting.clone(), recorded.clone()));
            }
        });

        Self { addr, wire }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    #[allow(dead_code)]
    pub async fn wire_bytes(&self) -> Vec<u8> {
        self.wire.lock().await.clone()
    }
}

async fn read_request_head(stream: &mut TcpStream) -> (String, String, Vec<u8>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed before sending a request");
        buf.extend_from_slice(&chunk[..n]);

        let mut headers = [httparse::EMPTY_HEADER; 16];
        let mut req = httparse::Request::new(&mut headers);
        if let httparse::Status::Complete(len) = req.parse(&buf).unwrap() {
            let method = req.method.unwrap().to_string();
            let path = req.path.unwrap().to_string();
            return (method, path, buf[len..].to_vec());
        }
    }
}

async fn handle(
    mut stream: TcpStream,
    waiting: Arc<Mutex<HashMap<String, Half>>>,
    wire: Arc<Mutex<Vec<u8>>>,
) {
    let (method, path, leftover) = read_request_head(&mut stream).await;
    let half = match method.as_str() {
        "GET" => {
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n")
                .await
                .unwrap();
            Half::Get(stream)
        }
        "PUT" => {
            stream
                .write_all(b"HTTP/1.1 100 Continue\r\n\r\n")
                .await
                .unwrap();
            Half::Put(stream, leftover)
        }
        other => panic!("unexpected method {}", other),
    };

    let peer = {
        let mut waiting = waiting.lock().await;
        match waiting.remove(&path) {
            Some(peer) => peer,
            None => {
                waiting.insert(path, half);
                return;
            }
        }
    };

    let (mut get, put, leftover) = match (half, peer) {
        (Half::Get(get), Half::Put(put, leftover)) | (Half::Put(put, leftover), Half::Get(get)) => {
            (get, put, leftover)
        }
        _ => panic!("two requests of the same kind on one path"),
    };

    get.write_all(&leftover).await.unwrap();
    let (mut put_read, _put_write) = put.into_split();
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        match put_read.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                wire.lock().await.extend_from_slice(&buf[..n]);
                if get.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
        }
    }
}
