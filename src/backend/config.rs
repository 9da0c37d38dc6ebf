//! Backend connection tuning knobs.

use crate::backend::flush::FlushPolicy;
use std::time::Duration;

/// Configuration for one backend connection.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Capacity of the submission queue (default: 1024).
    ///
    /// `submit` waits once this many requests are queued.
    pub queue_capacity: usize,

    /// Capacity of the per-connection queue of written, unanswered
    /// requests (default: 4096).
    pub pending_capacity: usize,

    /// When the writer forces buffered commands onto the socket.
    pub flush: FlushPolicy,

    /// Pause between a connection failure and the next dial (default: 50ms).
    pub restart_backoff: Duration,

    /// Failures this soon after the writer started waiting for work shed
    /// queued requests (default: 1s).
    pub discard_window: Duration,

    /// A failure discards `queue_len / discard_divisor + 1` requests
    /// (default: 20).
    pub discard_divisor: usize,

    /// Timeout for establishing the TCP connection (default: 1s).
    pub dial_timeout: Duration,

    /// Timeout for each socket read (default: 1 minute).
    pub read_timeout: Duration,

    /// Timeout for each command write (default: 1 minute).
    pub write_timeout: Duration,

    /// Size of the socket write buffer (default: 512 KiB).
    pub write_buffer: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            pending_capacity: 4096,
            flush: FlushPolicy::default(),
            restart_backoff: Duration::from_millis(50),
            discard_window: Duration::from_secs(1),
            discard_divisor: 20,
            dial_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(60),
            write_buffer: 512 * 1024,
        }
    }
}

impl BackendConfig {
    /// Replaces values that would make the pipeline unusable.
    ///
    /// Channels cannot have zero capacity and the discard formula divides
    /// by `discard_divisor`.
    pub(crate) fn sanitized(mut self) -> Self {
        self.queue_capacity = self.queue_capacity.max(1);
        self.pending_capacity = self.pending_capacity.max(1);
        self.discard_divisor = self.discard_divisor.max(1);
        self
    }

    /// Number of queued requests to shed after a fast failure.
    pub fn discard_budget(&self, queue_len: usize) -> usize {
        queue_len / self.discard_divisor.max(1) + 1
    }
}
