//! # FlashPipe - Pipelined Backend Connections for a Redis-Compatible Proxy
//!
//! A proxy in front of Redis-compatible servers accepts commands from many
//! clients and must forward each to the backend that owns its key. Opening a
//! connection per client command is far too slow; FlashPipe keeps a single
//! TCP connection per backend and pipelines every command routed to it.
//!
//! ## Features
//!
//! - **Pipelining**: many commands in flight on one socket, replies matched
//!   in FIFO order
//! - **Adaptive Batching**: writes are buffered while more work is queued and
//!   flushed on a count or time threshold
//! - **Backpressure**: a bounded submission queue suspends submitters instead
//!   of growing without limit
//! - **Self-Healing**: failed connections are redialed forever with a short
//!   backoff, shedding stale queued requests while the backend is down
//! - **Exactly-Once Completion**: every request is answered once, with a
//!   reply or an error, no matter how its connection ended
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            BackendConn                               │
//! │                                                                      │
//! │  submit() ─┐                                                         │
//! │  submit() ─┼──> ┌──────────────────┐     ┌────────┐                  │
//! │  submit() ─┘    │ Submission Queue │ ──> │ Writer │ ──> TCP ──┐      │
//! │                 │   (bounded 1024) │     └───┬────┘           │      │
//! │                 └──────────────────┘         │                │      │
//! │                                              ▼                ▼      │
//! │                                      ┌───────────────┐   ┌─────────┐ │
//! │                                      │ Pending Queue │──>│ Reader  │ │
//! │                                      │ (bounded 4096)│   └────┬────┘ │
//! │                                      └───────────────┘        │      │
//! │                                                               ▼      │
//! │                                              complete(request, reply)│
//! │  ┌───────────────────────────────────────────────┐                   │
//! │  │ Supervisor: redial, backoff, discard on failure│                  │
//! │  └───────────────────────────────────────────────┘                   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use flashpipe::{BackendConn, RespValue};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), flashpipe::BackendError> {
//!     let backend = BackendConn::connect("127.0.0.1:6379");
//!
//!     let reply = backend.call(RespValue::command(["SET", "name", "Ariz"])).await?;
//!     assert_eq!(reply, RespValue::ok());
//!
//!     backend.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`backend`]: supervisor, writer/reader loops, requests and transports
//! - [`protocol`]: RESP values and the incremental reply parser
//!
//! ## Ordering Contract
//!
//! Commands are written in submission order and the backend must answer in
//! the order it received them. A backend that reorders replies will have its
//! replies handed to the wrong requests; this crate cannot detect that.

pub mod backend;
pub mod protocol;

pub use backend::{
    BackendConfig, BackendConn, BackendError, BackendResult, BackendStats, JobTracker,
    PendingResponse, Request,
};
pub use protocol::{ParseError, RespParser, RespValue};

/// Version of FlashPipe
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
