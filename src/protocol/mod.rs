//! RESP Protocol
//!
//! The wire codec spoken to backends. The pipelining core treats commands and
//! replies as opaque `RespValue`s; only the default TCP transport in
//! [`crate::backend::transport`] touches bytes.
//!
//! ## Modules
//!
//! - `types`: the `RespValue` model and its serialization
//! - `parser`: incremental parser for reply streams
//!
//! ## Example
//!
//! ```
//! use flashpipe::protocol::{parse_message, RespValue};
//!
//! let bytes = RespValue::command(["GET", "name"]).serialize();
//! let (value, consumed) = parse_message(&bytes).unwrap().unwrap();
//! assert_eq!(consumed, bytes.len());
//! assert_eq!(value, RespValue::command(["GET", "name"]));
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_message, ParseError, ParseResult, RespParser};
pub use types::RespValue;
