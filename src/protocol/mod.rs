//! RESP Protocol Implementation
//!
//! Request decoding and reply encoding for the RESP wire protocol.
//!
//! ## Modules
//!
//! - `parser`: bounds-checked decoder turning client bytes into [`Frame`]s
//! - `types`: the `RespValue` reply type and its serialization
//!
//! ## Example
//!
//! ```
//! use snapkv::protocol::{decode_frame, RespValue};
//! use bytes::Bytes;
//!
//! let frame = decode_frame(b"*2\r\n$4\r\nECHO\r\n$3\r\nhey\r\n").unwrap();
//! assert!(frame.is_command("echo"));
//!
//! let reply = RespValue::bulk_string(Bytes::from("hey"));
//! assert_eq!(reply.serialize(), b"$3\r\nhey\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{decode_frame, DecodeError, DecodeResult, Frame, FrameParser};
pub use types::RespValue;
