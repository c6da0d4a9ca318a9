//! Per-server settings shared by every connection.

use std::time::Duration;

use crate::codec::{DEFAULT_MAX_HEADER_BYTES, DEFAULT_MAX_HEADER_PAIRS};

/// Connection settings.
///
/// | setting                 | default  |
/// |-------------------------|----------|
/// | `timeout`               | 120 s    |
/// | `keep_alive_timeout`    | 5 s      |
/// | `max_header_pairs`      | 2000     |
/// | `max_header_bytes`      | 80 KiB   |
/// | `write_high_water_mark` | 16 KiB   |
/// | `read_buffer_size`      | 8 KiB    |
/// | `allow_half_open`       | true     |
/// | `body_channel_capacity` | 8 chunks |
///
/// A zero duration disables the corresponding timer.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    timeout: Duration,
    keep_alive_timeout: Duration,
    max_header_pairs: usize,
    max_header_bytes: usize,
    write_high_water_mark: usize,
    read_buffer_size: usize,
    allow_half_open: bool,
    body_channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            keep_alive_timeout: Duration::from_secs(5),
            max_header_pairs: DEFAULT_MAX_HEADER_PAIRS,
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            write_high_water_mark: 16 * 1024,
            read_buffer_size: 8 * 1024,
            allow_half_open: true,
            body_channel_capacity: 8,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inactivity timeout while a request is being received or answered.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Inactivity timeout between two exchanges on a kept-alive connection.
    #[must_use]
    pub fn with_keep_alive_timeout(mut self, keep_alive_timeout: Duration) -> Self {
        self.keep_alive_timeout = keep_alive_timeout;
        self
    }

    /// Maximum number of header lines in a request head; more is a parse error.
    #[must_use]
    pub fn with_max_header_pairs(mut self, max_header_pairs: usize) -> Self {
        self.max_header_pairs = max_header_pairs;
        self
    }

    #[must_use]
    pub fn with_max_header_bytes(mut self, max_header_bytes: usize) -> Self {
        self.max_header_bytes = max_header_bytes;
        self
    }

    /// Amount of buffered response data above which the connection stops reading requests.
    #[must_use]
    pub fn with_write_high_water_mark(mut self, write_high_water_mark: usize) -> Self {
        self.write_high_water_mark = write_high_water_mark;
        self
    }

    #[must_use]
    pub fn with_read_buffer_size(mut self, read_buffer_size: usize) -> Self {
        self.read_buffer_size = read_buffer_size.max(1);
        self
    }

    /// When false, a peer closing its write side aborts the requests in flight and closes the
    /// connection; when true, in-flight responses are still delivered before closing.
    #[must_use]
    pub fn with_allow_half_open(mut self, allow_half_open: bool) -> Self {
        self.allow_half_open = allow_half_open;
        self
    }

    /// Number of body chunks buffered for a handler before the connection stops parsing.
    #[must_use]
    pub fn with_body_channel_capacity(mut self, body_channel_capacity: usize) -> Self {
        self.body_channel_capacity = body_channel_capacity;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn keep_alive_timeout(&self) -> Duration {
        self.keep_alive_timeout
    }

    pub fn max_header_pairs(&self) -> usize {
        self.max_header_pairs
    }

    pub fn max_header_bytes(&self) -> usize {
        self.max_header_bytes
    }

    pub fn write_high_water_mark(&self) -> usize {
        self.write_high_water_mark
    }

    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }

    pub fn allow_half_open(&self) -> bool {
        self.allow_half_open
    }

    pub fn body_channel_capacity(&self) -> usize {
        self.body_channel_capacity
    }

    pub(crate) fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub(crate) fn set_keep_alive_timeout(&mut self, keep_alive_timeout: Duration) {
        self.keep_alive_timeout = keep_alive_timeout;
    }
}
