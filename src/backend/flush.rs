//! Flush Policy
//!
//! The writer buffers encoded commands and decides, per command, whether to
//! push the buffer onto the socket. Flushing every command wastes syscalls
//! under load; never flushing strands requests whose replies the reader is
//! already waiting for.
//!
//! Rules, first match wins:
//!
//! ```text
//! submission queue empty                     -> flush (nothing to batch with)
//! unflushed >= max_unflushed                 -> flush
//! unflushed >= pending capacity / occupancy  -> flush (reader caught up)
//! now - last flush >= max_delay              -> flush
//! otherwise                                  -> keep buffering
//! ```

use std::time::{Duration, Instant};

/// Thresholds for batching writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    /// Most commands left in the write buffer (default: 64).
    pub max_unflushed: usize,
    /// Longest time between flushes under load (default: 300µs).
    pub max_delay: Duration,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            max_unflushed: 64,
            max_delay: Duration::from_micros(300),
        }
    }
}

/// What the writer knows when it is about to encode one command.
#[derive(Debug, Clone, Copy)]
pub struct FlushState {
    /// No further request is waiting in the submission queue.
    pub queue_empty: bool,
    /// Commands written since the last flush.
    pub unflushed: usize,
    /// Requests currently in the pending queue.
    pub pending_len: usize,
    /// Capacity of the pending queue.
    pub pending_capacity: usize,
    /// When the buffer was last flushed on this connection.
    pub last_flush: Option<Instant>,
    pub now: Instant,
}

impl FlushPolicy {
    pub fn should_flush(&self, state: &FlushState) -> bool {
        if state.queue_empty {
            return true;
        }
        if state.unflushed >= self.max_unflushed
            || state.unflushed >= state.pending_capacity
            || state.unflushed >= state.pending_len
        {
            return true;
        }
        match state.last_flush {
            Some(at) => state.now.saturating_duration_since(at) >= self.max_delay,
            None => true,
        }
    }
}
