//! Mock backends and transports shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use flashpipe::backend::{BackendError, BackendResult, CommandWriter, Dialer, ResponseReader};
use flashpipe::protocol::{RespParser, RespValue};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn echo(i: usize) -> RespValue {
    RespValue::command(["ECHO".to_string(), i.to_string()])
}

/// Answers `ECHO x` with `x` and `PING` with `PONG`, in order.
fn answer(command: &RespValue) -> RespValue {
    match command.as_array() {
        Some([name, arg]) if name.as_str() == Some("ECHO") => arg.clone(),
        Some([name]) if name.as_str() == Some("PING") => RespValue::simple_string("PONG"),
        _ => RespValue::error("ERR unknown command"),
    }
}

async fn serve_echo(mut socket: TcpStream) {
    let mut parser = RespParser::new();
    let mut input = BytesMut::with_capacity(4096);
    let mut output = BytesMut::with_capacity(4096);
    loop {
        loop {
            match parser.parse(&input) {
                Ok(Some((command, used))) => {
                    input.advance(used);
                    answer(&command).serialize_into(&mut output);
                }
                Ok(None) => break,
                Err(_) => return,
            }
        }
        if !output.is_empty() {
            if socket.write_all(&output).await.is_err() {
                return;
            }
            output.clear();
        }
        match socket.read_buf(&mut input).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

/// A well-behaved backend. Returns its address.
pub async fn spawn_echo_backend() -> String {
    spawn_flaky_backend(0).await
}

/// Drops the first `broken` connections on accept, then echoes.
pub async fn spawn_flaky_backend(broken: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let mut accepted = 0;
        while let Ok((socket, _)) = listener.accept().await {
            accepted += 1;
            if accepted <= broken {
                drop(socket);
                continue;
            }
            tokio::spawn(serve_echo(socket));
        }
    });
    addr
}

/// Accepts connections and reads forever without replying.
pub async fn spawn_silent_backend() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut sink = vec![0u8; 4096];
                while let Ok(n) = socket.read(&mut sink).await {
                    if n == 0 {
                        break;
                    }
                }
            });
        }
    });
    addr
}

/// Accepts one connection, waits for the first command bytes, then shuts
/// down both the connection and the listener without answering.
pub async fn spawn_dying_backend() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            drop(listener);
            let mut first = [0u8; 1];
            let _ = socket.read(&mut first).await;
        }
    });
    addr
}

/// In-memory transport: commands become visible to the reader only once
/// flushed, and each is answered with itself.
#[derive(Clone, Default)]
pub struct MemoryDialer {
    writes: Arc<Mutex<Vec<(RespValue, bool)>>>,
    dials: Arc<AtomicUsize>,
}

impl MemoryDialer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every encode seen so far, with its flush flag.
    pub fn writes(&self) -> Vec<(RespValue, bool)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

pub struct MemoryWriter {
    writes: Arc<Mutex<Vec<(RespValue, bool)>>>,
    buffered: Vec<RespValue>,
    wire: mpsc::UnboundedSender<RespValue>,
}

pub struct MemoryReader {
    wire: mpsc::UnboundedReceiver<RespValue>,
}

#[async_trait]
impl Dialer for MemoryDialer {
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    async fn dial(
        &self,
        _addr: &str,
        _timeout: Duration,
    ) -> BackendResult<(MemoryReader, MemoryWriter)> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = MemoryWriter {
            writes: Arc::clone(&self.writes),
            buffered: Vec::new(),
            wire: tx,
        };
        Ok((MemoryReader { wire: rx }, writer))
    }
}

#[async_trait]
impl CommandWriter for MemoryWriter {
    async fn encode(&mut self, command: &RespValue, flush: bool) -> BackendResult<()> {
        self.writes.lock().unwrap().push((command.clone(), flush));
        self.buffered.push(command.clone());
        if flush {
            for command in self.buffered.drain(..) {
                if self.wire.send(command).is_err() {
                    return Err(BackendError::ConnectionReset);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ResponseReader for MemoryReader {
    async fn decode(&mut self) -> BackendResult<RespValue> {
        self.wire.recv().await.ok_or(BackendError::ConnectionReset)
    }
}

/// A backend that is always down.
#[derive(Clone, Default)]
pub struct RefusingDialer {
    dials: Arc<AtomicUsize>,
}

impl RefusingDialer {
    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for RefusingDialer {
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    async fn dial(
        &self,
        addr: &str,
        _timeout: Duration,
    ) -> BackendResult<(MemoryReader, MemoryWriter)> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        Err(BackendError::Dial {
            addr: addr.to_string(),
            source: Arc::new(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")),
        })
    }
}

/// Connects instantly, swallows every command and fails every read with
/// `error`.
#[derive(Clone)]
pub struct FailingDialer {
    error: BackendError,
    dials: Arc<AtomicUsize>,
}

impl FailingDialer {
    pub fn new(error: BackendError) -> Self {
        Self {
            error,
            dials: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

pub struct SinkWriter;

pub struct FailingReader {
    error: BackendError,
}

#[async_trait]
impl Dialer for FailingDialer {
    type Reader = FailingReader;
    type Writer = SinkWriter;

    async fn dial(
        &self,
        _addr: &str,
        _timeout: Duration,
    ) -> BackendResult<(FailingReader, SinkWriter)> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let reader = FailingReader {
            error: self.error.clone(),
        };
        Ok((reader, SinkWriter))
    }
}

#[async_trait]
impl CommandWriter for SinkWriter {
    async fn encode(&mut self, _command: &RespValue, _flush: bool) -> BackendResult<()> {
        Ok(())
    }
}

#[async_trait]
impl ResponseReader for FailingReader {
    async fn decode(&mut self) -> BackendResult<RespValue> {
        Err(self.error.clone())
    }
}
