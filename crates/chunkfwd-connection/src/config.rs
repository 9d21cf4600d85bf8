//! Tunnel configuration

use chunkfwd_proto::{MAX_HEAD_LEN, MAX_SIZE_LINE};

/// HTTP tunnel settings
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// XOR payloads with the keystream derived from the tunnel URL.
    /// Both peers must agree.
    pub obfuscate: bool,

    /// Maximum response head size before the session is dropped
    pub max_head_len: usize,

    /// Maximum chunk-size line length
    pub max_size_line: usize,

    /// Buffers queued between the relay and the tunnel tasks, per direction
    pub queue_depth: usize,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            obfuscate: true,
            max_head_len: MAX_HEAD_LEN,
            max_size_line: MAX_SIZE_LINE,
            queue_depth: 1,
        }
    }
}

impl TunnelConfig {
    /// Send payloads without the keystream
    pub fn plain() -> Self {
        Self::default().with_obfuscation(false)
    }

    pub fn with_obfuscation(mut self, obfuscate: bool) -> Self {
        self.obfuscate = obfuscate;
        self
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    pub fn with_max_head_len(mut self, len: usize) -> Self {
        self.max_head_len = len;
        self
    }

    pub fn with_max_size_line(mut self, len: usize) -> Self {
        self.max_size_line = len;
        self
    }
}
