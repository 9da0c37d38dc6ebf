//! Requests and Completion
//!
//! A [`Request`] carries one command from a submitter to the backend and its
//! reply back. It moves by value: submission queue, then pending queue, then
//! completion. Only the current holder can complete it, and completing
//! consumes it, so no request is ever answered twice.
//!
//! ```text
//! Request::new(cmd) ──> (Request, PendingResponse)
//!        │                        │
//!   submit(request)               │ .await
//!        ▼                        │
//!   writer ─> pending ─> reader ──┴─> Ok(reply) / Err(BackendError)
//!                                 └─> done hook (owner accounting)
//! ```
//!
//! A request dropped without being completed (runtime shutting down, a task
//! aborted) completes itself with [`BackendError::Abandoned`], so every
//! submitter is woken and every done hook fires exactly once. Once submitted
//! it is also counted as failed in its connection's [`BackendStats`].

use crate::backend::error::{BackendError, BackendResult};
use crate::backend::stats::BackendStats;
use crate::protocol::RespValue;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::{oneshot, Notify};

type DoneHook = Box<dyn FnOnce() + Send + 'static>;

/// One command awaiting a backend reply.
pub struct Request {
    command: RespValue,
    reply: Option<oneshot::Sender<BackendResult<RespValue>>>,
    on_done: Option<DoneHook>,
    stats: Option<Arc<BackendStats>>,
}

impl Request {
    /// Creates a request and the handle its submitter awaits.
    pub fn new(command: RespValue) -> (Self, PendingResponse) {
        let (tx, rx) = oneshot::channel();
        let request = Self {
            command,
            reply: Some(tx),
            on_done: None,
            stats: None,
        };
        (request, PendingResponse { rx })
    }

    /// Attaches a callback run once, right after the reply is delivered.
    ///
    /// This is how the routing layer learns one unit of its work finished.
    /// The hook must not own the thing it notifies; see [`JobTracker::track`].
    pub fn with_done_hook(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_done = Some(Box::new(hook));
        self
    }

    pub fn command(&self) -> &RespValue {
        &self.command
    }

    pub(crate) fn attach_stats(&mut self, stats: Arc<BackendStats>) {
        self.stats = Some(stats);
    }

    /// Delivers the outcome, wakes the submitter and runs the done hook.
    pub(crate) fn complete(mut self, result: BackendResult<RespValue>) {
        self.finish(result);
    }

    pub(crate) fn fail(self, err: BackendError) {
        self.complete(Err(err));
    }

    fn finish(&mut self, result: BackendResult<RespValue>) {
        if let Some(tx) = self.reply.take() {
            // The submitter may have stopped waiting; the hook still runs.
            let _ = tx.send(result);
        }
        if let Some(hook) = self.on_done.take() {
            hook();
        }
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        if self.reply.is_some() || self.on_done.is_some() {
            if let Some(stats) = &self.stats {
                stats.request_failed();
            }
            self.finish(Err(BackendError::Abandoned));
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("command", &self.command)
            .field("completed", &self.reply.is_none())
            .field("has_done_hook", &self.on_done.is_some())
            .finish()
    }
}

/// Resolves to the backend's reply, or the error that ended the request.
#[derive(Debug)]
#[must_use = "the reply is only observable by awaiting the PendingResponse"]
pub struct PendingResponse {
    rx: oneshot::Receiver<BackendResult<RespValue>>,
}

impl PendingResponse {
    /// Returns the outcome if the request has already completed.
    pub fn try_take(&mut self) -> Option<BackendResult<RespValue>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(BackendError::Abandoned)),
        }
    }
}

impl Future for PendingResponse {
    type Output = BackendResult<RespValue>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(BackendError::Abandoned)))
    }
}

/// Outstanding-work counter for one routing unit.
///
/// The router calls [`track`](Self::track) for each request it hands to a
/// backend and attaches the returned hook with [`Request::with_done_hook`].
/// Hooks hold only a `Weak` reference: a finished request never keeps the
/// routing unit alive.
#[derive(Debug, Default)]
pub struct JobTracker {
    pending: AtomicUsize,
    idle: Notify,
}

impl JobTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Counts one more outstanding request and returns its completion hook.
    pub fn track(self: &Arc<Self>) -> impl FnOnce() + Send + 'static {
        self.pending.fetch_add(1, Ordering::AcqRel);
        let owner: Weak<Self> = Arc::downgrade(self);
        move || {
            if let Some(tracker) = owner.upgrade() {
                tracker.finish_one();
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Waits until no tracked request is outstanding.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn test_complete_delivers_reply() {
        let (request, pending) = Request::new(RespValue::command(["PING"]));
        request.complete(Ok(RespValue::simple_string("PONG")));
        assert_eq!(pending.await.unwrap(), RespValue::simple_string("PONG"));
    }

    #[tokio::test]
    async fn test_fail_delivers_error() {
        let (request, pending) = Request::new(RespValue::command(["PING"]));
        request.fail(BackendError::ConnectionClosed);
        assert!(matches!(pending.await, Err(BackendError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_drop_completes_as_abandoned() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let (request, pending) = Request::new(RespValue::command(["PING"]));
        let request = request.with_done_hook(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(request);
        assert!(matches!(pending.await, Err(BackendError::Abandoned)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_abandoned_request_counts_as_failed() {
        let stats = Arc::new(BackendStats::new());
        stats.request_submitted();
        let (mut request, _pending) = Request::new(RespValue::command(["PING"]));
        request.attach_stats(Arc::clone(&stats));
        drop(request);
        assert_eq!(stats.requests_failed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.in_flight(), 0);

        // Explicit completion is counted by the pipeline, not by the request.
        let (mut request, _pending) = Request::new(RespValue::command(["PING"]));
        request.attach_stats(Arc::clone(&stats));
        request.complete(Ok(RespValue::ok()));
        assert_eq!(stats.requests_failed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_hook_runs_exactly_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let (request, _pending) = Request::new(RespValue::command(["PING"]));
        request
            .with_done_hook(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .complete(Ok(RespValue::ok()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_hook_runs_when_submitter_gone() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let (request, pending) = Request::new(RespValue::command(["PING"]));
        drop(pending);
        request
            .with_done_hook(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .complete(Ok(RespValue::ok()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_try_take() {
        let (request, mut pending) = Request::new(RespValue::command(["PING"]));
        assert!(pending.try_take().is_none());
        request.complete(Ok(RespValue::ok()));
        assert_eq!(pending.try_take().unwrap().unwrap(), RespValue::ok());
    }

    #[tokio::test]
    async fn test_job_tracker_counts_and_wakes() {
        let tracker = JobTracker::new();
        let (a, _ra) = Request::new(RespValue::command(["GET", "a"]));
        let (b, _rb) = Request::new(RespValue::command(["GET", "b"]));
        let a = a.with_done_hook(tracker.track());
        let b = b.with_done_hook(tracker.track());
        assert_eq!(tracker.pending(), 2);

        let waiter = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.wait_idle().await })
        };

        a.complete(Ok(RespValue::Null));
        assert_eq!(tracker.pending(), 1);
        b.fail(BackendError::ConnectionClosed);
        assert_eq!(tracker.pending(), 0);
        waiter.await.unwrap();
    }

    #[test]
    fn test_job_tracker_hook_is_non_owning() {
        let tracker = JobTracker::new();
        let hook = tracker.track();
        let weak = Arc::downgrade(&tracker);
        drop(tracker);
        assert!(weak.upgrade().is_none());
        // Firing after the routing unit is gone is a no-op.
        hook();
    }
}
