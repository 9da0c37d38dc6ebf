//! RESP Values
//!
//! The value model shared by commands sent to a backend and the replies read
//! back from it. Every frame starts with a one-byte type prefix and ends with
//! CRLF:
//!
//! ```text
//! +OK\r\n                      simple string
//! -ERR wrong type\r\n          error
//! :42\r\n                      integer
//! $5\r\nhello\r\n              bulk string ($-1\r\n is null)
//! *2\r\n$3\r\nGET\r\n$1\r\nk\r\n   array (*-1\r\n is null)
//! ```

use bytes::{BufMut, Bytes, BytesMut};

/// Frame terminator.
pub const CRLF: &[u8] = b"\r\n";

/// Type prefix bytes.
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A single RESP frame.
///
/// Commands are arrays of bulk strings; replies may be any variant. An
/// `Error` value is a perfectly valid reply (the backend refused the
/// command), not a transport failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// `+<text>\r\n`
    SimpleString(String),
    /// `-<message>\r\n`
    Error(String),
    /// `:<n>\r\n`
    Integer(i64),
    /// `$<len>\r\n<bytes>\r\n`
    BulkString(Bytes),
    /// Null bulk string or null array.
    Null,
    /// `*<count>\r\n` followed by `count` frames.
    Array(Vec<RespValue>),
}

impl RespValue {
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    pub fn null() -> Self {
        RespValue::Null
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    /// Builds a command frame: an array of bulk strings.
    ///
    /// ```
    /// use flashpipe::protocol::RespValue;
    /// let get = RespValue::command(["GET", "user:1"]);
    /// assert_eq!(get.serialize(), b"*2\r\n$3\r\nGET\r\n$6\r\nuser:1\r\n");
    /// ```
    pub fn command<I, P>(parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Bytes>,
    {
        RespValue::Array(
            parts
                .into_iter()
                .map(|part| RespValue::BulkString(part.into()))
                .collect(),
        )
    }

    /// Returns the wire encoding as a fresh buffer.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_len_hint());
        self.serialize_into(&mut buf);
        buf.to_vec()
    }

    /// Appends the wire encoding to `buf`.
    pub fn serialize_into(&self, buf: &mut BytesMut) {
        match self {
            RespValue::SimpleString(s) => put_line(buf, prefix::SIMPLE_STRING, s.as_bytes()),
            RespValue::Error(s) => put_line(buf, prefix::ERROR, s.as_bytes()),
            RespValue::Integer(n) => put_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            RespValue::BulkString(data) => {
                put_line(buf, prefix::BULK_STRING, data.len().to_string().as_bytes());
                buf.put_slice(data);
                buf.put_slice(CRLF);
            }
            RespValue::Null => put_line(buf, prefix::BULK_STRING, b"-1"),
            RespValue::Array(values) => {
                put_line(buf, prefix::ARRAY, values.len().to_string().as_bytes());
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }

    fn encoded_len_hint(&self) -> usize {
        match self {
            RespValue::BulkString(data) => data.len() + 16,
            RespValue::Array(values) => {
                values.iter().map(Self::encoded_len_hint).sum::<usize>() + 16
            }
            _ => 32,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Text of a simple string, or of a bulk string holding valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::BulkString(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[RespValue]> {
        match self {
            RespValue::Array(values) => Some(values),
            _ => None,
        }
    }
}

fn put_line(buf: &mut BytesMut, type_prefix: u8, body: &[u8]) {
    buf.reserve(body.len() + 3);
    buf.put_u8(type_prefix);
    buf.put_slice(body);
    buf.put_slice(CRLF);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_frame() {
        let value = RespValue::command(["SET", "k", "v"]);
        assert_eq!(value.serialize(), b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
    }

    #[test]
    fn test_scalar_frames() {
        assert_eq!(RespValue::ok().serialize(), b"+OK\r\n");
        assert_eq!(RespValue::error("ERR nope").serialize(), b"-ERR nope\r\n");
        assert_eq!(RespValue::integer(-7).serialize(), b":-7\r\n");
        assert_eq!(RespValue::null().serialize(), b"$-1\r\n");
    }

    #[test]
    fn test_serialize_into_appends() {
        let mut buf = BytesMut::new();
        RespValue::integer(1).serialize_into(&mut buf);
        RespValue::bulk_string("ab").serialize_into(&mut buf);
        assert_eq!(&buf[..], b":1\r\n$2\r\nab\r\n");
    }

    #[test]
    fn test_accessors() {
        let bulk = RespValue::bulk_string("hi");
        assert_eq!(bulk.as_str(), Some("hi"));
        assert_eq!(bulk.as_bytes(), Some(&b"hi"[..]));
        assert!(RespValue::error("x").is_error());
        assert!(RespValue::Null.is_null());
        assert_eq!(RespValue::integer(3).as_integer(), Some(3));
        assert_eq!(
            RespValue::command(["PING"]).as_array().map(|a| a.len()),
            Some(1)
        );
    }
}
