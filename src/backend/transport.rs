//! Backend Transport
//!
//! The pipeline needs three things from a transport: open a connection, write
//! one command (optionally flushing), read one reply. Writes and reads happen
//! on different tasks, so a dial hands back the two directions as separately
//! owned halves. Neither half is ever used from two tasks at once. Dropping
//! both halves closes the connection.
//!
//! [`TcpDialer`] is the production transport: RESP over a tokio `TcpStream`
//! with per-operation timeouts. Tests substitute in-memory dialers.

use crate::backend::error::{BackendError, BackendResult};
use crate::protocol::{RespParser, RespValue};
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time;
use tracing::trace;

/// Initial capacity of the reply buffer.
const INITIAL_READ_BUFFER: usize = 16 * 1024;

/// Reserve more space once free capacity drops below this.
const MIN_READ_HEADROOM: usize = 4096;

/// Opens connections to a backend address.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    type Reader: ResponseReader;
    type Writer: CommandWriter;

    async fn dial(
        &self,
        addr: &str,
        timeout: Duration,
    ) -> BackendResult<(Self::Reader, Self::Writer)>;
}

/// Write half of a backend connection.
#[async_trait]
pub trait CommandWriter: Send + 'static {
    /// Encodes `command`; pushes buffered bytes to the peer when `flush`.
    async fn encode(&mut self, command: &RespValue, flush: bool) -> BackendResult<()>;
}

/// Read half of a backend connection.
#[async_trait]
pub trait ResponseReader: Send + 'static {
    /// Reads the next reply, in the order commands were written.
    async fn decode(&mut self) -> BackendResult<RespValue>;
}

/// RESP over TCP.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    read_timeout: Duration,
    write_timeout: Duration,
    write_buffer: usize,
}

impl TcpDialer {
    pub fn new(read_timeout: Duration, write_timeout: Duration, write_buffer: usize) -> Self {
        Self {
            read_timeout,
            write_timeout,
            write_buffer: write_buffer.max(1),
        }
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    type Reader = TcpReplyReader;
    type Writer = TcpCommandWriter;

    async fn dial(
        &self,
        addr: &str,
        timeout: Duration,
    ) -> BackendResult<(TcpReplyReader, TcpCommandWriter)> {
        let dial_error = |err| BackendError::Dial {
            addr: addr.to_string(),
            source: Arc::new(err),
        };

        let stream = match time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(connected) => connected.map_err(dial_error)?,
            Err(_) => {
                return Err(BackendError::DialTimeout {
                    addr: addr.to_string(),
                    timeout,
                })
            }
        };
        // Pipelined commands are small; let the flush policy do the batching.
        stream.set_nodelay(true).map_err(dial_error)?;

        let (read_half, write_half) = stream.into_split();
        let reader = TcpReplyReader {
            stream: read_half,
            buffer: BytesMut::with_capacity(INITIAL_READ_BUFFER),
            parser: RespParser::new(),
            timeout: self.read_timeout,
            broken: None,
        };
        let writer = TcpCommandWriter {
            stream: BufWriter::with_capacity(self.write_buffer, write_half),
            scratch: BytesMut::with_capacity(256),
            timeout: self.write_timeout,
        };
        Ok((reader, writer))
    }
}

/// Buffered write half of a TCP backend connection.
#[derive(Debug)]
pub struct TcpCommandWriter {
    stream: BufWriter<OwnedWriteHalf>,
    scratch: BytesMut,
    timeout: Duration,
}

#[async_trait]
impl CommandWriter for TcpCommandWriter {
    async fn encode(&mut self, command: &RespValue, flush: bool) -> BackendResult<()> {
        self.scratch.clear();
        command.serialize_into(&mut self.scratch);

        let stream = &mut self.stream;
        let bytes = &self.scratch[..];
        let write = async move {
            stream.write_all(bytes).await?;
            if flush {
                stream.flush().await?;
            }
            Ok::<_, std::io::Error>(())
        };

        match time::timeout(self.timeout, write).await {
            Ok(written) => written.map_err(BackendError::write),
            Err(_) => Err(BackendError::WriteTimeout(self.timeout)),
        }
    }
}

/// Read half of a TCP backend connection.
///
/// Once a read fails the byte stream can no longer be trusted, so every
/// later call returns the same error without touching the socket.
#[derive(Debug)]
pub struct TcpReplyReader {
    stream: OwnedReadHalf,
    buffer: BytesMut,
    parser: RespParser,
    timeout: Duration,
    broken: Option<BackendError>,
}

impl TcpReplyReader {
    async fn read_reply(&mut self) -> BackendResult<RespValue> {
        loop {
            if let Some((value, consumed)) = self.parser.parse(&self.buffer)? {
                self.buffer.advance(consumed);
                return Ok(value);
            }

            if self.buffer.capacity() - self.buffer.len() < MIN_READ_HEADROOM {
                self.buffer.reserve(INITIAL_READ_BUFFER);
            }

            let n = match time::timeout(self.timeout, self.stream.read_buf(&mut self.buffer)).await
            {
                Ok(read) => read.map_err(BackendError::read)?,
                Err(_) => return Err(BackendError::ReadTimeout(self.timeout)),
            };
            if n == 0 {
                return Err(if self.buffer.is_empty() {
                    BackendError::ConnectionReset
                } else {
                    BackendError::UnexpectedEof
                });
            }
            trace!(bytes = n, buffered = self.buffer.len(), "Read backend data");
        }
    }
}

#[async_trait]
impl ResponseReader for TcpReplyReader {
    async fn decode(&mut self) -> BackendResult<RespValue> {
        if let Some(err) = &self.broken {
            return Err(err.clone());
        }
        let result = self.read_reply().await;
        if let Err(err) = &result {
            self.broken = Some(err.clone());
        }
        result
    }
}
