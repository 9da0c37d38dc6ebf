//! Pipelined Backend Connection
//!
//! One [`BackendConn`] owns one logical connection to one backend address and
//! multiplexes every submitted request onto it. Replies come back in the order
//! commands were written, so matching is a FIFO pop rather than an id lookup.
//!
//! ## Tasks
//!
//! ```text
//!  submit() ──> submission queue (1024) ──> writer ──> socket
//!                                             │
//!                                             ▼
//!                                   pending queue (4096)
//!                                             │
//!                     socket ──> reader ──────┴──> complete(request, reply)
//! ```
//!
//! - **Supervisor** (one task for the object's lifetime): runs the writer
//!   inline, and on failure sheds stale load, backs off and redials.
//! - **Writer**: pulls requests, encodes them with adaptive flushing and hands
//!   each one to the pending queue after it is written.
//! - **Reader** (one task per physical connection): pops the oldest pending
//!   request for every reply it decodes.
//!
//! ## Lifecycle
//!
//! ```text
//! DIALING ──ok──> STREAMING ──error──> FAILED ──backoff──> DIALING
//!    │                │
//!    └─error─> FAILED └─queue closed and drained──> CLOSED
//! ```
//!
//! A dial happens only once there is a request to send. A failure within
//! `discard_window` of the writer starting to wait for work discards
//! `queue_len / 20 + 1` requests from the front of the submission queue,
//! completing each with the failure. The supervisor never gives up on its
//! own; only [`BackendConn::close`] (or dropping the handle) ends it, and
//! even then every queued request is still sent and answered first.

use crate::backend::config::BackendConfig;
use crate::backend::error::{BackendError, BackendResult};
use crate::backend::flush::FlushState;
use crate::backend::request::Request;
use crate::backend::stats::BackendStats;
use crate::backend::transport::{CommandWriter, Dialer, ResponseReader, TcpDialer};
use crate::protocol::RespValue;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::error::SendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, trace, warn};

/// Handle to a supervised, pipelined backend connection.
///
/// Share it behind an `Arc`; every method takes `&self` except
/// [`shutdown`](Self::shutdown). Dropping the last handle has the same effect
/// as [`close`](Self::close).
#[derive(Debug)]
pub struct BackendConn {
    addr: Arc<str>,
    input: mpsc::Sender<Request>,
    closing: Trigger,
    stats: Arc<BackendStats>,
    task: JoinHandle<()>,
}

impl BackendConn {
    /// Starts a connection to `addr` with the default configuration.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(addr: impl Into<String>) -> Self {
        Self::with_config(addr, BackendConfig::default())
    }

    /// Starts a RESP-over-TCP connection to `addr`.
    pub fn with_config(addr: impl Into<String>, config: BackendConfig) -> Self {
        let dialer = TcpDialer::new(
            config.read_timeout,
            config.write_timeout,
            config.write_buffer,
        );
        Self::with_dialer(addr, config, dialer)
    }

    /// Starts a connection to `addr` over a custom transport.
    pub fn with_dialer<D: Dialer>(
        addr: impl Into<String>,
        config: BackendConfig,
        dialer: D,
    ) -> Self {
        let config = config.sanitized();
        let addr: Arc<str> = Arc::from(addr.into());
        let (input, queue) = mpsc::channel(config.queue_capacity);
        let closing = Trigger::new();
        let stats = Arc::new(BackendStats::new());

        let supervisor = Supervisor {
            addr: Arc::clone(&addr),
            config,
            dialer,
            closing: closing.clone(),
            stats: Arc::clone(&stats),
        };
        let task = tokio::spawn(supervisor.run(queue));

        Self {
            addr,
            input,
            closing,
            stats,
            task,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn stats(&self) -> &Arc<BackendStats> {
        &self.stats
    }

    pub fn is_closed(&self) -> bool {
        self.closing.is_fired()
    }

    /// Queues a request, waiting while the submission queue is full.
    ///
    /// Submitting after [`close`](Self::close) is a caller bug: the request
    /// is completed with [`BackendError::Closed`] and the same error is
    /// returned. Connection failures are never returned here; they reach the
    /// submitter through the request's [`PendingResponse`].
    ///
    /// [`PendingResponse`]: crate::backend::PendingResponse
    pub async fn submit(&self, mut request: Request) -> BackendResult<()> {
        if self.closing.is_fired() {
            request.fail(BackendError::Closed);
            return Err(BackendError::Closed);
        }
        // Counted before the send: the supervisor may finish it before we resume.
        self.stats.request_submitted();
        request.attach_stats(Arc::clone(&self.stats));
        match self.input.send(request).await {
            Ok(()) => Ok(()),
            Err(SendError(request)) => {
                self.stats.submission_withdrawn();
                request.fail(BackendError::Closed);
                Err(BackendError::Closed)
            }
        }
    }

    /// Sends one command and waits for its reply.
    pub async fn call(&self, command: RespValue) -> BackendResult<RespValue> {
        let (request, response) = Request::new(command);
        self.submit(request).await?;
        response.await
    }

    /// Stops accepting requests. Safe to call any number of times, from any
    /// number of tasks; only the first call has an effect.
    pub fn close(&self) {
        if self.closing.fire(()) {
            info!(backend = %self.addr, "Backend connection closing");
        }
    }

    /// Closes the connection and waits until every queued request has been
    /// answered and the supervisor has exited.
    pub async fn shutdown(self) {
        self.close();
        let Self {
            addr, input, task, ..
        } = self;
        drop(input);
        if let Err(err) = task.await {
            error!(backend = %addr, error = %err, "Backend supervisor task failed");
        }
    }
}

/// One-shot broadcast slot.
///
/// `fire` stores a value exactly once no matter how many tasks race on it,
/// and every `fired()` waiter, present or future, observes that first value.
#[derive(Debug)]
struct Trigger<T = ()>(Arc<watch::Sender<Option<T>>>);

impl<T> Clone for Trigger<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: Clone> Trigger<T> {
    fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self(Arc::new(tx))
    }

    /// Returns true for the one call whose value was stored.
    fn fire(&self, value: T) -> bool {
        self.0.send_if_modified(|slot| {
            if slot.is_some() {
                false
            } else {
                *slot = Some(value);
                true
            }
        })
    }

    fn is_fired(&self) -> bool {
        self.0.borrow().is_some()
    }

    /// The value stored by the first `fire`, if any.
    fn cause(&self) -> Option<T> {
        self.0.borrow().clone()
    }

    async fn fired(&self) -> T {
        let mut rx = self.0.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(value) = current {
                return value;
            }
            // The sender lives as long as `self`, so this cannot fail.
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// State owned by the supervisor task.
struct Supervisor<D> {
    addr: Arc<str>,
    config: BackendConfig,
    dialer: D,
    closing: Trigger,
    stats: Arc<BackendStats>,
}

/// A live physical connection, seen from the writer.
struct Session<W> {
    writer: W,
    pending: mpsc::Sender<Request>,
    broken: Trigger<BackendError>,
    reader: JoinHandle<()>,
}

impl<D: Dialer> Supervisor<D> {
    async fn run(self, mut queue: mpsc::Receiver<Request>) {
        info!(backend = %self.addr, "Backend connection started");

        for restart in 1u64.. {
            let started = time::Instant::now();
            let err = match self.stream(&mut queue).await {
                Ok(()) => break,
                Err(err) => err,
            };

            let discarded = if started.elapsed() < self.config.discard_window {
                let budget = self.config.discard_budget(queue.len());
                discard(&mut queue, &err, budget)
            } else {
                0
            };
            self.stats.requests_discarded(discarded);
            self.stats.restarted();

            if discarded > 0 {
                warn!(
                    backend = %self.addr,
                    restart,
                    discarded,
                    error = %err,
                    "Backend connection failed, restarting and discarding queued requests"
                );
            } else {
                warn!(
                    backend = %self.addr,
                    restart,
                    error = %err,
                    "Backend connection failed, restarting"
                );
            }

            time::sleep(self.config.restart_backoff).await;
        }

        info!(backend = %self.addr, "Backend connection stopped");
    }

    /// Runs one STREAMING phase.
    ///
    /// Returns `Ok(())` only when the submission queue is closed and drained.
    async fn stream(&self, queue: &mut mpsc::Receiver<Request>) -> BackendResult<()> {
        let Some(mut request) = next_request(queue, &self.closing).await else {
            return Ok(());
        };

        let mut session = match self.open().await {
            Ok(session) => session,
            Err(err) => {
                self.stats.request_failed();
                request.fail(err.clone());
                return Err(err);
            }
        };

        let mut unflushed = 0usize;
        let mut last_flush: Option<Instant> = None;

        loop {
            let flush = self.config.flush.should_flush(&FlushState {
                queue_empty: queue.is_empty(),
                unflushed,
                pending_len: session.pending.max_capacity() - session.pending.capacity(),
                pending_capacity: session.pending.max_capacity(),
                last_flush,
                now: Instant::now(),
            });

            if let Err(err) = session.writer.encode(request.command(), flush).await {
                session.broken.fire(err.clone());
                self.stats.request_failed();
                request.fail(err.clone());
                return Err(err);
            }

            if let Err(SendError(request)) = session.pending.send(request).await {
                // The reader only stops once the pending queue is closed.
                session.broken.fire(BackendError::ConnectionClosed);
                let err = session
                    .broken
                    .cause()
                    .unwrap_or(BackendError::ConnectionClosed);
                self.stats.request_failed();
                request.fail(err.clone());
                return Err(err);
            }

            if flush {
                self.stats.flushed();
                trace!(backend = %self.addr, batched = unflushed + 1, "Flushed commands");
                unflushed = 0;
                last_flush = Some(Instant::now());
            } else {
                unflushed += 1;
            }

            request = tokio::select! {
                biased;
                err = session.broken.fired() => return Err(err),
                next = next_request(queue, &self.closing) => match next {
                    Some(request) => request,
                    None => break,
                },
            };
        }

        // Keep the write half open until every written command is answered:
        // some servers drop replies once the client half-closes.
        let Session {
            writer,
            pending,
            reader,
            ..
        } = session;
        drop(pending);
        if let Err(err) = reader.await {
            error!(backend = %self.addr, error = %err, "Backend reader task failed");
        }
        drop(writer);
        Ok(())
    }

    /// Dials the backend and starts the reader for the new connection.
    async fn open(&self) -> BackendResult<Session<D::Writer>> {
        let (reader, writer) = self
            .dialer
            .dial(&self.addr, self.config.dial_timeout)
            .await?;
        self.stats.connection_opened();
        debug!(backend = %self.addr, "Backend connection established");

        let (pending, pending_rx) = mpsc::channel(self.config.pending_capacity);
        let broken = Trigger::new();
        let reader = tokio::spawn(read_loop(
            Arc::clone(&self.addr),
            reader,
            pending_rx,
            broken.clone(),
            Arc::clone(&self.stats),
        ));

        Ok(Session {
            writer,
            pending,
            broken,
            reader,
        })
    }
}

/// Matches each decoded reply to the oldest written request.
///
/// Runs until the writer closes the pending queue. After the first failure
/// the stream is unusable: every request still pending, and any written
/// later, is failed with that same error without another read.
async fn read_loop<R: ResponseReader>(
    addr: Arc<str>,
    mut reader: R,
    mut pending: mpsc::Receiver<Request>,
    broken: Trigger<BackendError>,
    stats: Arc<BackendStats>,
) {
    while let Some(request) = pending.recv().await {
        let result = match broken.cause() {
            Some(err) => Err(err),
            None => tokio::select! {
                biased;
                err = broken.fired() => Err(err),
                reply = reader.decode() => reply,
            },
        };

        match &result {
            Ok(_) => stats.request_completed(),
            Err(err) => {
                if broken.fire(err.clone()) {
                    debug!(backend = %addr, error = %err, "Backend reply stream failed");
                }
                stats.request_failed();
            }
        }
        request.complete(result);
    }
    broken.fire(BackendError::ConnectionClosed);
}

/// Waits for the next submitted request.
///
/// Returns `None` once the connection is closed and every queued request has
/// been taken.
async fn next_request(
    queue: &mut mpsc::Receiver<Request>,
    closing: &Trigger<()>,
) -> Option<Request> {
    tokio::select! {
        biased;
        request = queue.recv() => request,
        _ = closing.fired() => {
            // Refuse new sends; what is already queued is still delivered.
            queue.close();
            queue.recv().await
        }
    }
}

/// Fails up to `budget` requests from the front of the queue without waiting.
fn discard(queue: &mut mpsc::Receiver<Request>, err: &BackendError, budget: usize) -> usize {
    let mut discarded = 0;
    while discarded < budget {
        match queue.try_recv() {
            Ok(request) => {
                request.fail(err.clone());
                discarded += 1;
            }
            Err(_) => break,
        }
    }
    discarded
}
