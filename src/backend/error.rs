//! Backend Errors
//!
//! Every failure a request can observe. Connectivity errors never unwind
//! into the submitter: they travel through the request's response slot.
//! One failure is often reported to many requests (a discard burst, or
//! every entry still waiting on a dead socket), so the type is `Clone` and
//! keeps I/O errors behind an `Arc`.

use crate::protocol::ParseError;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result delivered to a request's submitter.
pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The backend refused the connection or was unreachable.
    #[error("dial {addr} failed: {source}")]
    Dial {
        addr: String,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("dial {addr} timed out after {timeout:?}")]
    DialTimeout { addr: String, timeout: Duration },

    /// Encoding or writing a command to the socket failed.
    #[error("write to backend failed: {0}")]
    Write(#[source] Arc<io::Error>),

    #[error("write to backend timed out after {0:?}")]
    WriteTimeout(Duration),

    /// Reading a reply from the socket failed.
    #[error("read from backend failed: {0}")]
    Read(#[source] Arc<io::Error>),

    #[error("read from backend timed out after {0:?}")]
    ReadTimeout(Duration),

    /// The reply stream was malformed.
    #[error("malformed backend reply: {0}")]
    Decode(#[from] ParseError),

    /// The backend closed the stream in the middle of a reply.
    #[error("backend closed the connection mid-reply")]
    UnexpectedEof,

    /// The backend closed the stream while a reply was still owed.
    #[error("backend closed the connection")]
    ConnectionReset,

    /// The connection was torn down before this request's reply was read.
    #[error("backend connection closed")]
    ConnectionClosed,

    /// The request was submitted after the backend connection was closed.
    #[error("backend connection is shut down")]
    Closed,

    /// The request was dropped before anything completed it.
    #[error("request abandoned before completion")]
    Abandoned,
}

impl BackendError {
    pub(crate) fn write(err: io::Error) -> Self {
        BackendError::Write(Arc::new(err))
    }

    pub(crate) fn read(err: io::Error) -> Self {
        BackendError::Read(Arc::new(err))
    }

    /// True for failures caused by the connection rather than the request.
    pub fn is_connection_error(&self) -> bool {
        !matches!(self, BackendError::Closed | BackendError::Abandoned)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            BackendError::DialTimeout { .. }
                | BackendError::WriteTimeout(_)
                | BackendError::ReadTimeout(_)
        )
    }
}
