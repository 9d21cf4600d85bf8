//! Tunnel Protocol Definitions
//!
//! This crate holds the wire-level pieces of the HTTP chunked tunnel: the
//! request/response framing and the keystream used to obfuscate payloads.

pub mod chunked;
pub mod keystream;

pub use chunked::{request_head, ChunkDecoder, ChunkEncoder, CodecError, ResponseHead, ResponseHeadDecoder};
pub use keystream::{Keystream, KeystreamCipher, KEYSTREAM_LEN};

/// Path suffix fetched by the source side and pushed to by the destination side
pub const SOURCE_FETCH_SUFFIX: &str = "/0";

/// Path suffix fetched by the destination side and pushed to by the source side
pub const DESTINATION_FETCH_SUFFIX: &str = "/1";

/// Maximum size of a response head (status line + headers)
pub const MAX_HEAD_LEN: usize = 16 * 1024;

/// Maximum length of a chunk-size line, extensions included
pub const MAX_SIZE_LINE: usize = 1024;
