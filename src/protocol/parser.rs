//! Incremental RESP Parser
//!
//! Replies arrive from the backend as a byte stream: one read may carry half
//! a frame or dozens of pipelined frames. The parser therefore never consumes
//! input itself. It reports how many bytes a complete frame occupied and the
//! caller advances its buffer:
//!
//! - `Ok(Some((value, consumed)))`: one full frame at the front of `buf`
//! - `Ok(None)`: the frame is incomplete, read more and retry
//! - `Err(ParseError)`: the stream is corrupt and cannot be resynchronized
//!
//! Unlike a server-side parser there is no inline-command fallback: a
//! backend never answers with bare text, so an unknown prefix is an error.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors produced while decoding a RESP stream.
///
/// `Clone` so one decode failure can be reported to several requests.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Largest bulk string accepted (512 MiB, the Redis limit).
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Deepest array nesting accepted.
pub const MAX_NESTING_DEPTH: usize = 32;

/// Stateless-between-calls RESP frame parser.
#[derive(Debug, Default)]
pub struct RespParser {
    depth: usize,
}

impl RespParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses one frame from the front of `buf`.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        self.depth = 0;
        self.parse_frame(buf)
    }

    fn parse_frame(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let Some(&type_prefix) = buf.first() else {
            return Ok(None);
        };
        let Some((line, header_len)) = read_line(buf) else {
            return Ok(None);
        };

        let value = match type_prefix {
            prefix::SIMPLE_STRING => RespValue::SimpleString(utf8(line)?.to_string()),
            prefix::ERROR => RespValue::Error(utf8(line)?.to_string()),
            prefix::INTEGER => RespValue::Integer(int(line)?),
            prefix::BULK_STRING => return self.parse_bulk(buf, line, header_len),
            prefix::ARRAY => return self.parse_array(buf, line, header_len),
            other => return Err(ParseError::UnknownPrefix(other)),
        };
        Ok(Some((value, header_len)))
    }

    fn parse_bulk(
        &mut self,
        buf: &[u8],
        line: &[u8],
        header_len: usize,
    ) -> ParseResult<Option<(RespValue, usize)>> {
        let len = match int(line)? {
            -1 => return Ok(Some((RespValue::Null, header_len))),
            n if n < 0 => return Err(ParseError::InvalidBulkLength(n)),
            n => n as usize,
        };
        if len > MAX_BULK_SIZE {
            return Err(ParseError::MessageTooLarge {
                size: len,
                max: MAX_BULK_SIZE,
            });
        }

        let end = header_len + len;
        if buf.len() < end + CRLF.len() {
            return Ok(None);
        }
        if &buf[end..end + CRLF.len()] != CRLF {
            return Err(ParseError::ProtocolError(
                "bulk string missing trailing CRLF".to_string(),
            ));
        }

        let data = Bytes::copy_from_slice(&buf[header_len..end]);
        Ok(Some((RespValue::BulkString(data), end + CRLF.len())))
    }

    fn parse_array(
        &mut self,
        buf: &[u8],
        line: &[u8],
        header_len: usize,
    ) -> ParseResult<Option<(RespValue, usize)>> {
        let count = match int(line)? {
            -1 => return Ok(Some((RespValue::Null, header_len))),
            n if n < 0 => return Err(ParseError::InvalidArrayLength(n)),
            n => n as usize,
        };

        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::ProtocolError(format!(
                "maximum nesting depth exceeded: {}",
                MAX_NESTING_DEPTH
            )));
        }

        // Cap the preallocation: the count comes off the wire.
        let mut elements = Vec::with_capacity(count.min(1024));
        let mut offset = header_len;
        for _ in 0..count {
            match self.parse_frame(&buf[offset..])? {
                Some((value, used)) => {
                    elements.push(value);
                    offset += used;
                }
                None => return Ok(None),
            }
        }

        self.depth -= 1;
        Ok(Some((RespValue::Array(elements), offset)))
    }
}

/// Splits off the header line after the type prefix.
///
/// Returns the line body and the number of bytes up to and including CRLF.
fn read_line(buf: &[u8]) -> Option<(&[u8], usize)> {
    let body = &buf[1..];
    let end = body.windows(CRLF.len()).position(|w| w == CRLF)?;
    Some((&body[..end], 1 + end + CRLF.len()))
}

fn utf8(line: &[u8]) -> ParseResult<&str> {
    std::str::from_utf8(line).map_err(|e| ParseError::InvalidUtf8(e.to_string()))
}

fn int(line: &[u8]) -> ParseResult<i64> {
    utf8(line)?
        .parse()
        .map_err(|e: std::num::ParseIntError| ParseError::InvalidInteger(e.to_string()))
}

/// Parses a single frame with a fresh parser.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    RespParser::new().parse(buf)
}
