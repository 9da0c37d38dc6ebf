use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one backend connection.
///
/// Shared between the submitter-facing handle, the writer and the reader.
/// All counters are monotonic except `requests_submitted`, which gives back
/// a submission the closed queue refused.
#[derive(Debug, Default)]
pub struct BackendStats {
    /// Requests accepted into the submission queue
    pub requests_submitted: AtomicU64,
    /// Requests completed with a backend reply
    pub requests_completed: AtomicU64,
    /// Requests completed with an error (dial, write, read, decode, abandoned)
    pub requests_failed: AtomicU64,
    /// Queued requests shed after a fast connection failure
    pub requests_discarded: AtomicU64,
    /// Successful dials
    pub connections_opened: AtomicU64,
    /// Connection failures that led to a redial
    pub restarts: AtomicU64,
    /// Write-buffer flushes
    pub flushes: AtomicU64,
}

impl BackendStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_submitted(&self) {
        self.requests_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn submission_withdrawn(&self) {
        self.requests_submitted.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn request_completed(&self) {
        self.requests_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_discarded(&self, count: usize) {
        self.requests_discarded
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn restarted(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn flushed(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Requests submitted but not yet completed, failed or discarded.
    pub fn in_flight(&self) -> u64 {
        let submitted = self.requests_submitted.load(Ordering::Relaxed);
        let done = self.requests_completed.load(Ordering::Relaxed)
            + self.requests_failed.load(Ordering::Relaxed)
            + self.requests_discarded.load(Ordering::Relaxed);
        submitted.saturating_sub(done)
    }
}
