//! HTTP/1.1 chunked framing for the tunnel requests
//!
//! Only the subset the tunnel needs is implemented: writing a request head,
//! skipping a response head, and encoding/decoding `<hex>\r\n<bytes>\r\n`
//! chunks. Response status codes are never interpreted.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

/// Maximum number of response headers accepted
const MAX_HEADERS: usize = 64;

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Response head exceeds {0} bytes")]
    HeadTooLarge(usize),

    #[error("Malformed response head: {0}")]
    MalformedHead(String),

    #[error("Chunk size line exceeds {0} bytes")]
    SizeLineTooLong(usize),

    #[error("Invalid chunk size: {0:?}")]
    InvalidChunkSize(String),

    #[error("Chunk data not followed by CRLF")]
    MissingChunkCrlf,
}

/// Build the request line and headers for one tunnel request.
///
/// `PUT` and `POST` requests announce a chunked body and ask for
/// `100 Continue` before sending it.
pub fn request_head(method: &str, path: &str, host: &str) -> String {
    let mut head = format!("{} {} HTTP/1.1\r\nHost: {}\r\n", method, path, host);
    if method == "PUT" || method == "POST" {
        head.push_str("Transfer-Encoding: chunked\r\n");
        head.push_str("Expect: 100-continue\r\n");
    }
    head.push_str("\r\n");
    head
}

/// Status line of a skipped response head, kept for logging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: String,
    pub header_count: usize,
}

/// Consumes one response head (status line through the blank line)
#[derive(Debug)]
pub struct ResponseHeadDecoder {
    max_len: usize,
}

impl ResponseHeadDecoder {
    pub fn new(max_len: usize) -> Self {
        Self { max_len }
    }
}

impl Default for ResponseHeadDecoder {
    fn default() -> Self {
        Self::new(crate::MAX_HEAD_LEN)
    }
}

impl Decoder for ResponseHeadDecoder {
    type Item = ResponseHead;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut response = httparse::Response::new(&mut headers);

        match response.parse(&src[..]) {
            Ok(httparse::Status::Complete(head_len)) => {
                let head = ResponseHead {
                    status: response.code.unwrap_or_default(),
                    reason: response.reason.unwrap_or_default().to_string(),
                    header_count: response.headers.len(),
                };
                src.advance(head_len);
                Ok(Some(head))
            }
            Ok(httparse::Status::Partial) if src.len() > self.max_len => {
                Err(CodecError::HeadTooLarge(self.max_len))
            }
            Ok(httparse::Status::Partial) => Ok(None),
            Err(e) => Err(CodecError::MalformedHead(e.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data { remaining: usize },
    DataCrlf,
    Done,
}

/// Decodes a chunked body into payload pieces.
///
/// Payload bytes are yielded as soon as they are buffered, so one wire chunk
/// may come out as several pieces; their order is preserved. Only the byte
/// order of the encoded buffers survives, not their boundaries. The
/// zero-size chunk yields a single empty `Bytes` and ends decoding.
#[derive(Debug)]
pub struct ChunkDecoder {
    state: ChunkState,
    max_size_line: usize,
}

impl ChunkDecoder {
    pub fn new(max_size_line: usize) -> Self {
        Self {
            state: ChunkState::Size,
            max_size_line,
        }
    }

    /// True once the terminal chunk has been seen
    pub fn is_done(&self) -> bool {
        self.state == ChunkState::Done
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new(crate::MAX_SIZE_LINE)
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, CodecError> {
    let invalid = || CodecError::InvalidChunkSize(String::from_utf8_lossy(line).into_owned());

    let text = std::str::from_utf8(line).map_err(|_| invalid())?;
    let digits = text.split(';').next().unwrap_or_default().trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    usize::from_str_radix(digits, 16).map_err(|_| invalid())
}

impl Decoder for ChunkDecoder {
    type Item = Bytes;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                ChunkState::Size => {
                    let scan = src.len().min(self.max_size_line + 2);
                    let Some(line_len) = src[..scan].windows(2).position(|w| w == b"\r\n") else {
                        if src.len() > self.max_size_line + 1 {
                            return Err(CodecError::SizeLineTooLong(self.max_size_line));
                        }
                        return Ok(None);
                    };

                    let line = src.split_to(line_len);
                    src.advance(2);
                    let size = parse_chunk_size(&line)?;
                    trace!("chunk header: {} bytes", size);

                    if size == 0 {
                        self.state = ChunkState::Done;
                        return Ok(Some(Bytes::new()));
                    }
                    self.state = ChunkState::Data { remaining: size };
                }
                ChunkState::Data { remaining } => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let n = remaining.min(src.len());
                    let data = src.split_to(n).freeze();
                    self.state = if n == remaining {
                        ChunkState::DataCrlf
                    } else {
                        ChunkState::Data {
                            remaining: remaining - n,
                        }
                    };
                    return Ok(Some(data));
                }
                ChunkState::DataCrlf => {
                    if src.len() < 2 {
                        return Ok(None);
                    }
                    if &src[..2] != b"\r\n" {
                        return Err(CodecError::MissingChunkCrlf);
                    }
                    src.advance(2);
                    self.state = ChunkState::Size;
                }
                ChunkState::Done => {
                    // Anything after the terminator is ignored
                    src.clear();
                    return Ok(None);
                }
            }
        }
    }
}

/// Encodes each buffer as one chunk; an empty buffer encodes the terminator.
#[derive(Debug, Default)]
pub struct ChunkEncoder;

impl Encoder<Bytes> for ChunkEncoder {
    type Error = CodecError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let size_line = format!("{:x}\r\n", item.len());
        dst.reserve(size_line.len() + item.len() + 2);
        dst.put_slice(size_line.as_bytes());
        dst.put_slice(&item);
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio_util::codec::FramedRead;

    fn encode_all(buffers: &[&[u8]]) -> BytesMut {
        let mut encoder = ChunkEncoder;
        let mut out = BytesMut::new();
        for buf in buffers {
            encoder
                .encode(Bytes::copy_from_slice(buf), &mut out)
                .unwrap();
        }
        out
    }

    #[test]
    fn test_request_head_get() {
        let head = request_head("GET", "/tunnel/0", "relay.example.com");
        assert_eq!(
            head,
            "GET /tunnel/0 HTTP/1.1\r\nHost: relay.example.com\r\n\r\n"
        );
    }

    #[test]
    fn test_request_head_put() {
        let head = request_head("PUT", "/tunnel/1", "relay.example.com:8080");
        assert_eq!(
            head,
            "PUT /tunnel/1 HTTP/1.1\r\nHost: relay.example.com:8080\r\n\
             Transfer-Encoding: chunked\r\nExpect: 100-continue\r\n\r\n"
        );
    }

    #[test]
    fn test_encode_lowercase_hex() {
        let out = encode_all(&[&[0xABu8; 26][..]]);
        assert!(out.starts_with(b"1a\r\n"));
        assert!(out.ends_with(b"\r\n"));
        assert_eq!(out.len(), 4 + 26 + 2);
    }

    #[test]
    fn test_encode_terminator() {
        let out = encode_all(&[&b""[..]]);
        assert_eq!(&out[..], b"0\r\n\r\n");
    }

    #[test]
    fn test_framing_roundtrip_with_terminator() {
        let zeros = [0u8; 300];
        let buffers: Vec<&[u8]> = vec![&b"hello"[..], &b" "[..], &zeros[..], &b"world"[..]];
        let mut wire = encode_all(&buffers);
        wire.extend_from_slice(b"0\r\n\r\n");

        let mut decoder = ChunkDecoder::default();
        let mut decoded = Vec::new();
        while let Some(piece) = decoder.decode(&mut wire).unwrap() {
            if piece.is_empty() {
                break;
            }
            decoded.push(piece);
        }

        assert_eq!(decoded.len(), buffers.len());
        for (got, want) in decoded.iter().zip(&buffers) {
            assert_eq!(&got[..], *want);
        }
        assert!(decoder.is_done());
    }

    #[test]
    fn test_decode_partial_chunk() {
        let mut decoder = ChunkDecoder::default();
        let mut buf = BytesMut::from(&b"a\r\n01234"[..]);

        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap(), &b"01234"[..]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"56789\r");
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap(), &b"56789"[..]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"\n3\r\nabc\r\n");
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap(), &b"abc"[..]);
    }

    #[test]
    fn test_split_input_keeps_byte_order() {
        let buffers: Vec<&[u8]> = vec![&b"hello"[..], &b", "[..], &b"chunked world"[..]];
        let mut wire = encode_all(&buffers);
        wire.extend_from_slice(&encode_all(&[&b""[..]]));

        let mut decoder = ChunkDecoder::default();
        let mut buf = BytesMut::new();
        let mut joined = Vec::new();
        let mut pieces = 0;
        let mut ended = false;
        // Feed the wire three bytes at a time so chunks arrive split
        for step in wire.chunks(3) {
            buf.extend_from_slice(step);
            while let Some(piece) = decoder.decode(&mut buf).unwrap() {
                if piece.is_empty() {
                    ended = true;
                    break;
                }
                pieces += 1;
                joined.extend_from_slice(&piece);
            }
        }

        assert!(ended);
        assert!(decoder.is_done());
        assert_eq!(joined, b"hello, chunked world");
        assert!(pieces > buffers.len());
    }

    #[test]
    fn test_decode_ignores_chunk_extension() {
        let mut decoder = ChunkDecoder::default();
        let mut buf = BytesMut::from(&b"4;name=value\r\nabcd\r\n"[..]);
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap(), &b"abcd"[..]);
    }

    #[test]
    fn test_decode_stops_after_terminator() {
        let mut decoder = ChunkDecoder::default();
        let mut buf = BytesMut::from(&b"0\r\n\r\n3\r\nabc\r\n"[..]);

        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(Bytes::new()));
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_invalid_size() {
        let mut decoder = ChunkDecoder::default();
        let mut buf = BytesMut::from(&b"zz\r\n"[..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(CodecError::InvalidChunkSize(_))
        ));

        let mut decoder = ChunkDecoder::default();
        let mut buf = BytesMut::from(&b"+5\r\n"[..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(CodecError::InvalidChunkSize(_))
        ));
    }

    #[test]
    fn test_decode_unbounded_size_line_rejected() {
        let mut decoder = ChunkDecoder::new(16);
        let mut buf = BytesMut::from(&[b'f'; 64][..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(CodecError::SizeLineTooLong(16))
        ));
    }

    #[test]
    fn test_decode_missing_crlf_after_data() {
        let mut decoder = ChunkDecoder::default();
        let mut buf = BytesMut::from(&b"2\r\nhiXX"[..]);
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap(), &b"hi"[..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(CodecError::MissingChunkCrlf)
        ));
    }

    #[test]
    fn test_response_head_any_status() {
        let mut decoder = ResponseHeadDecoder::default();
        let mut buf = BytesMut::from(
            &b"HTTP/1.1 404 Not Found\r\nServer: test\r\nTransfer-Encoding: chunked\r\n\r\n5\r\n"[..],
        );

        let head = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(head.status, 404);
        assert_eq!(head.reason, "Not Found");
        assert_eq!(head.header_count, 2);
        assert_eq!(&buf[..], b"5\r\n");
    }

    #[test]
    fn test_response_head_partial_then_complete() {
        let mut decoder = ResponseHeadDecoder::default();
        let mut buf = BytesMut::from(&b"HTTP/1.1 100 Cont"[..]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"inue\r\n\r\n");
        let head = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(head.status, 100);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_response_head_too_large() {
        let mut decoder = ResponseHeadDecoder::new(64);
        let mut buf = BytesMut::from(&b"HTTP/1.1 200 OK\r\n"[..]);
        for _ in 0..10 {
            buf.extend_from_slice(b"X-Padding: aaaaaaaa\r\n");
        }
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(CodecError::HeadTooLarge(64))
        ));
    }

    #[test]
    fn test_response_head_malformed() {
        let mut decoder = ResponseHeadDecoder::default();
        let mut buf = BytesMut::from(&b"garbage\r\n\r\n"[..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(CodecError::MalformedHead(_))
        ));
    }

    #[tokio::test]
    async fn test_framed_response_then_chunks() {
        let wire: &[u8] =
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";

        let mut framed = FramedRead::new(wire, ResponseHeadDecoder::default());
        let head = framed.next().await.unwrap().unwrap();
        assert_eq!(head.status, 200);

        let mut framed = framed.map_decoder(|_| ChunkDecoder::default());
        let mut body = Vec::new();
        while let Some(piece) = framed.next().await {
            let piece = piece.unwrap();
            if piece.is_empty() {
                break;
            }
            body.extend_from_slice(&piece);
        }
        assert_eq!(body, b"hello world");
    }
}
