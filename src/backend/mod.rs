//! Backend Connection Module
//!
//! Everything needed to keep one pipelined connection to one backend server
//! alive: the supervisor and its writer/reader loops, the request model,
//! transports, flush tuning and counters.
//!
//! ## Example
//!
//! ```ignore
//! use flashpipe::backend::{BackendConn, JobTracker, Request};
//! use flashpipe::protocol::RespValue;
//! use std::sync::Arc;
//!
//! let backend = Arc::new(BackendConn::connect("127.0.0.1:6379"));
//! let slot = JobTracker::new();
//!
//! let (request, response) = Request::new(RespValue::command(["GET", "user:1"]));
//! backend.submit(request.with_done_hook(slot.track())).await?;
//! let reply = response.await?;
//!
//! slot.wait_idle().await;
//! backend.close();
//! ```

pub mod config;
pub mod conn;
pub mod error;
pub mod flush;
pub mod request;
pub mod stats;
pub mod transport;

pub use config::BackendConfig;
pub use conn::BackendConn;
pub use error::{BackendError, BackendResult};
pub use flush::{FlushPolicy, FlushState};
pub use request::{JobTracker, PendingResponse, Request};
pub use stats::BackendStats;
pub use transport::{CommandWriter, Dialer, ResponseReader, TcpDialer};
