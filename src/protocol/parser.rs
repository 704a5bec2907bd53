//! Request Frame Decoder
//!
//! This module turns raw client bytes into [`Frame`]s: a command name plus an
//! ordered list of binary-safe arguments. It knows nothing about what the
//! commands mean.
//!
//! ## Framing
//!
//! ```text
//! *<N>\r\n
//! $<len0>\r\n<arg0 bytes>\r\n
//! ...
//! $<lenN-1>\r\n<argN-1 bytes>\r\n
//! ```
//!
//! A line that does not start with `*` is treated as an inline command and
//! split on ASCII whitespace, so `PING\r\n` typed into a telnet session works.
//!
//! ## How the Parser Works
//!
//! All reads go through a bounds-checked [`Cursor`]. The parser returns either:
//! - `Ok(Some((frame, consumed)))` - a complete frame, `consumed` bytes were used
//! - `Ok(None)` - the frame is incomplete, more data is needed
//! - `Err(DecodeError)` - the input can never become a valid frame
//!
//! NUL bytes in front of a frame are padding left behind by fixed-size read
//! buffers. They are skipped (and counted as consumed) and never become part
//! of an argument.

use crate::protocol::types::{prefix, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur while decoding a request frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer ended before the frame did
    #[error("truncated frame")]
    Truncated,

    /// The frame carries no command
    #[error("empty frame")]
    EmptyFrame,

    /// A length token is not a decimal integer
    #[error("invalid length token '{0}'")]
    InvalidLength(String),

    /// Element count is negative
    #[error("invalid multibulk length: {0}")]
    InvalidArrayLength(i64),

    /// Bulk length is negative
    #[error("invalid bulk length: {0}")]
    InvalidBulkLength(i64),

    /// An array element is not a bulk string
    #[error("expected '$', got byte {0:#04x}")]
    UnexpectedElement(u8),

    /// Bulk data is not followed by CRLF
    #[error("bulk string missing trailing CRLF")]
    MissingCrlf,

    /// A line ran past the maximum length without a CRLF
    #[error("line too long (max: {max})")]
    LineTooLong { max: usize },

    /// A bulk string exceeds the configured limit
    #[error("bulk string too large: {size} bytes (max: {max})")]
    BulkTooLarge { size: usize, max: usize },

    /// The element count exceeds the configured limit
    #[error("too many elements: {count} (max: {max})")]
    TooManyElements { count: usize, max: usize },
}

/// Result type for decoding operations.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Maximum size for a single bulk string (512 MB)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of elements in one request frame
pub const MAX_ELEMENTS: usize = 1024 * 1024;

/// Longest accepted length line (`*<N>` / `$<len>`), excluding CRLF
const MAX_LENGTH_LINE: usize = 32;

/// Longest accepted inline command, excluding CRLF
const MAX_INLINE_LINE: usize = 64 * 1024;

/// One decoded request: a command name and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    command: Bytes,
    args: Vec<Bytes>,
}

impl Frame {
    pub fn new(command: impl Into<Bytes>, args: Vec<Bytes>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    /// Builds a frame from string parts; the first part is the command.
    ///
    /// Returns `None` for an empty slice.
    pub fn from_parts(parts: &[&str]) -> Option<Self> {
        let (command, args) = parts.split_first()?;
        Some(Self::new(
            Bytes::copy_from_slice(command.as_bytes()),
            args.iter()
                .map(|a| Bytes::copy_from_slice(a.as_bytes()))
                .collect(),
        ))
    }

    /// The raw command token, exactly as sent.
    pub fn command(&self) -> &[u8] {
        &self.command
    }

    /// Case-insensitive comparison of the command token.
    pub fn is_command(&self, name: &str) -> bool {
        self.command.eq_ignore_ascii_case(name.as_bytes())
    }

    /// The command token upper-cased for messages and logs.
    pub fn command_name(&self) -> String {
        String::from_utf8_lossy(&self.command).to_ascii_uppercase()
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    pub fn into_parts(self) -> (Bytes, Vec<Bytes>) {
        (self.command, self.args)
    }

    /// Encodes the frame the way a client would send it.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(prefix::ARRAY);
        buf.extend_from_slice((self.args.len() + 1).to_string().as_bytes());
        buf.extend_from_slice(CRLF);
        for part in std::iter::once(&self.command).chain(self.args.iter()) {
            buf.push(prefix::BULK_STRING);
            buf.extend_from_slice(part.len().to_string().as_bytes());
            buf.extend_from_slice(CRLF);
            buf.extend_from_slice(part);
            buf.extend_from_slice(CRLF);
        }
        buf
    }
}

/// Bounds-checked reader over a byte slice.
///
/// Every primitive returns [`DecodeError::Truncated`] instead of reading past
/// the end of the buffer.
#[derive(Debug)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    /// Skips NUL padding.
    pub fn skip_padding(&mut self) {
        while self.peek() == Some(0) {
            self.pos += 1;
        }
    }

    pub fn read_byte(&mut self) -> DecodeResult<u8> {
        let byte = self.peek().ok_or(DecodeError::Truncated)?;
        self.pos += 1;
        Ok(byte)
    }

    /// Reads `n` bytes.
    pub fn read_exact(&mut self, n: usize) -> DecodeResult<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(DecodeError::Truncated)?;
        let bytes = self.buf.get(self.pos..end).ok_or(DecodeError::Truncated)?;
        self.pos = end;
        Ok(bytes)
    }

    /// Reads up to the next CRLF and consumes it; the CRLF is not returned.
    pub fn read_line(&mut self, max: usize) -> DecodeResult<&'a [u8]> {
        let rest = self.remaining();
        match find_crlf(rest) {
            Some(end) if end > max => Err(DecodeError::LineTooLong { max }),
            Some(end) => {
                self.pos += end + CRLF.len();
                Ok(&rest[..end])
            }
            None if rest.len() > max + 1 => Err(DecodeError::LineTooLong { max }),
            None => Err(DecodeError::Truncated),
        }
    }

    /// Consumes a CRLF.
    pub fn expect_crlf(&mut self) -> DecodeResult<()> {
        match self.buf.get(self.pos..self.pos + CRLF.len()) {
            Some(bytes) if bytes == CRLF => {
                self.pos += CRLF.len();
                Ok(())
            }
            Some(_) => Err(DecodeError::MissingCrlf),
            None => Err(DecodeError::Truncated),
        }
    }
}

/// Request frame parser with configurable limits.
///
/// # Example
///
/// ```
/// use snapkv::protocol::parser::FrameParser;
///
/// let parser = FrameParser::new();
/// let (frame, consumed) = parser
///     .parse(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
///     .unwrap()
///     .unwrap();
/// assert!(frame.is_command("get"));
/// assert_eq!(consumed, 23);
/// ```
#[derive(Debug, Clone)]
pub struct FrameParser {
    max_bulk_size: usize,
    max_elements: usize,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            max_bulk_size: MAX_BULK_SIZE,
            max_elements: MAX_ELEMENTS,
        }
    }

    pub fn with_limits(max_bulk_size: usize, max_elements: usize) -> Self {
        Self {
            max_bulk_size,
            max_elements,
        }
    }

    /// Attempts to decode one frame from the front of `buf`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some((frame, consumed)))` - a complete frame
    /// - `Ok(None)` - incomplete data, need more bytes
    /// - `Err(e)` - malformed input
    pub fn parse(&self, buf: &[u8]) -> DecodeResult<Option<(Frame, usize)>> {
        let mut cursor = Cursor::new(buf);
        cursor.skip_padding();
        if cursor.is_empty() {
            return Ok(None);
        }

        match self.decode(&mut cursor) {
            Ok(frame) => Ok(Some((frame, cursor.position()))),
            Err(DecodeError::Truncated) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Decodes the first frame in `buf`, treating incomplete input as an error.
    ///
    /// Anything after the first frame (further frames, partial data, padding)
    /// is ignored.
    pub fn decode_frame(&self, buf: &[u8]) -> DecodeResult<Frame> {
        let mut cursor = Cursor::new(buf);
        cursor.skip_padding();
        if cursor.is_empty() {
            return Err(DecodeError::EmptyFrame);
        }
        self.decode(&mut cursor)
    }

    fn decode(&self, cursor: &mut Cursor<'_>) -> DecodeResult<Frame> {
        if cursor.peek() == Some(prefix::ARRAY) {
            self.decode_array(cursor)
        } else {
            self.decode_inline(cursor)
        }
    }

    /// Decodes `*<N>\r\n` followed by N bulk strings.
    fn decode_array(&self, cursor: &mut Cursor<'_>) -> DecodeResult<Frame> {
        cursor.read_byte()?;
        let count = parse_length(cursor.read_line(MAX_LENGTH_LINE)?)?;
        if count < 0 {
            return Err(DecodeError::InvalidArrayLength(count));
        }
        let count = count as usize;
        if count == 0 {
            return Err(DecodeError::EmptyFrame);
        }
        if count > self.max_elements {
            return Err(DecodeError::TooManyElements {
                count,
                max: self.max_elements,
            });
        }

        let command = self.decode_bulk(cursor)?;
        let mut args = Vec::with_capacity((count - 1).min(64));
        for _ in 1..count {
            args.push(self.decode_bulk(cursor)?);
        }

        Ok(Frame { command, args })
    }

    /// Decodes `$<len>\r\n<data>\r\n`.
    fn decode_bulk(&self, cursor: &mut Cursor<'_>) -> DecodeResult<Bytes> {
        match cursor.read_byte()? {
            prefix::BULK_STRING => {}
            other => return Err(DecodeError::UnexpectedElement(other)),
        }

        let length = parse_length(cursor.read_line(MAX_LENGTH_LINE)?)?;
        if length < 0 {
            return Err(DecodeError::InvalidBulkLength(length));
        }
        let length = length as usize;
        if length > self.max_bulk_size {
            return Err(DecodeError::BulkTooLarge {
                size: length,
                max: self.max_bulk_size,
            });
        }

        let data = cursor.read_exact(length)?;
        cursor.expect_crlf()?;
        Ok(Bytes::copy_from_slice(data))
    }

    fn decode_inline(&self, cursor: &mut Cursor<'_>) -> DecodeResult<Frame> {
        let line = cursor.read_line(MAX_INLINE_LINE)?;
        let mut parts = line
            .split(|b| b.is_ascii_whitespace())
            .filter(|part| !part.is_empty())
            .map(Bytes::copy_from_slice);

        let command = parts.next().ok_or(DecodeError::EmptyFrame)?;
        Ok(Frame {
            command,
            args: parts.collect(),
        })
    }
}

/// Parses a decimal length token.
fn parse_length(token: &[u8]) -> DecodeResult<i64> {
    std::str::from_utf8(token)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| DecodeError::InvalidLength(String::from_utf8_lossy(token).into_owned()))
}

/// Finds the position of CRLF in the buffer.
///
/// Returns the position of `\r` if found, or None if CRLF is not present.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Decodes one frame from `buf` with the default limits.
pub fn decode_frame(buf: &[u8]) -> DecodeResult<Frame> {
    FrameParser::new().decode_frame(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &[u8]) -> DecodeResult<Option<(Frame, usize)>> {
        FrameParser::new().parse(input)
    }

    #[test]
    fn test_parse_ping() {
        let input = b"*1\r\n$4\r\nPING\r\n";
        let (frame, consumed) = parse(input).unwrap().unwrap();
        assert!(frame.is_command("ping"));
        assert!(frame.args().is_empty());
        assert_eq!(consumed, input.len());
    }

    #[test]
    fn test_parse_set_command() {
        let input = b"*5\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n$2\r\npx\r\n$3\r\n100\r\n";
        let (frame, _) = parse(input).unwrap().unwrap();
        assert_eq!(frame.command(), b"SET");
        assert_eq!(
            frame.args(),
            &[
                Bytes::from("foo"),
                Bytes::from("bar"),
                Bytes::from("px"),
                Bytes::from("100"),
            ]
        );
    }

    #[test]
    fn test_command_name_is_case_insensitive() {
        let frame = decode_frame(b"*1\r\n$4\r\npInG\r\n").unwrap();
        assert!(frame.is_command("PING"));
        assert_eq!(frame.command_name(), "PING");
        // raw token is preserved
        assert_eq!(frame.command(), b"pInG");
    }

    #[test]
    fn test_binary_safe_arguments() {
        let input = b"*2\r\n$4\r\nECHO\r\n$6\r\na\r\n\x00\xffb\r\n";
        let frame = decode_frame(input).unwrap();
        assert_eq!(frame.args()[0], Bytes::from_static(b"a\r\n\x00\xffb"));
    }

    #[test]
    fn test_empty_bulk_argument() {
        let frame = decode_frame(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$0\r\n\r\n").unwrap();
        assert_eq!(frame.args()[1], Bytes::new());
    }

    #[test]
    fn test_incomplete_returns_none() {
        assert!(parse(b"*2\r\n$3\r\nGET\r\n$4\r\nna").unwrap().is_none());
        assert!(parse(b"*2\r\n$3\r\nGET").unwrap().is_none());
        assert!(parse(b"*2").unwrap().is_none());
        assert!(parse(b"").unwrap().is_none());
    }

    #[test]
    fn test_truncated_frame_is_decode_error() {
        // Declared bulk length exceeds what is in the buffer
        let result = decode_frame(b"*2\r\n$3\r\nGET\r\n$40\r\nname\r\n");
        assert_eq!(result, Err(DecodeError::Truncated));
    }

    #[test]
    fn test_trailing_nul_padding_is_not_data() {
        let mut input = b"*2\r\n$4\r\nECHO\r\n$3\r\nhey\r\n".to_vec();
        input.resize(1024, 0);
        let frame = decode_frame(&input).unwrap();
        assert_eq!(frame.args(), &[Bytes::from("hey")]);
    }

    #[test]
    fn test_leading_padding_is_consumed() {
        let input = b"\x00\x00*1\r\n$4\r\nPING\r\n";
        let (frame, consumed) = parse(input).unwrap().unwrap();
        assert!(frame.is_command("PING"));
        assert_eq!(consumed, input.len());

        assert!(parse(b"\x00\x00\x00").unwrap().is_none());
        assert_eq!(decode_frame(b"\x00\x00"), Err(DecodeError::EmptyFrame));
    }

    #[test]
    fn test_pipelined_frames() {
        let input = b"*1\r\n$4\r\nPING\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n";
        let parser = FrameParser::new();
        let (first, consumed) = parser.parse(input).unwrap().unwrap();
        assert!(first.is_command("PING"));
        let (second, rest) = parser.parse(&input[consumed..]).unwrap().unwrap();
        assert!(second.is_command("GET"));
        assert_eq!(consumed + rest, input.len());
    }

    #[test]
    fn test_invalid_length_token() {
        assert_eq!(
            decode_frame(b"*x\r\n$4\r\nPING\r\n"),
            Err(DecodeError::InvalidLength("x".to_string()))
        );
        assert_eq!(
            decode_frame(b"*1\r\n$4a\r\nPING\r\n"),
            Err(DecodeError::InvalidLength("4a".to_string()))
        );
    }

    #[test]
    fn test_negative_lengths() {
        assert_eq!(
            decode_frame(b"*-1\r\n"),
            Err(DecodeError::InvalidArrayLength(-1))
        );
        assert_eq!(
            decode_frame(b"*1\r\n$-1\r\n"),
            Err(DecodeError::InvalidBulkLength(-1))
        );
    }

    #[test]
    fn test_empty_array() {
        assert_eq!(decode_frame(b"*0\r\n"), Err(DecodeError::EmptyFrame));
    }

    #[test]
    fn test_non_bulk_element() {
        assert_eq!(
            decode_frame(b"*1\r\n:1\r\n"),
            Err(DecodeError::UnexpectedElement(b':'))
        );
    }

    #[test]
    fn test_missing_trailing_crlf() {
        assert_eq!(
            decode_frame(b"*1\r\n$4\r\nPINGxx"),
            Err(DecodeError::MissingCrlf)
        );
    }

    #[test]
    fn test_length_line_too_long() {
        let mut input = b"*1\r\n$".to_vec();
        input.extend(std::iter::repeat(b'9').take(64));
        assert!(matches!(
            parse(&input),
            Err(DecodeError::LineTooLong { .. })
        ));
    }

    #[test]
    fn test_limits() {
        let parser = FrameParser::with_limits(4, 2);
        assert_eq!(
            parser.parse(b"*1\r\n$5\r\nhello\r\n"),
            Err(DecodeError::BulkTooLarge { size: 5, max: 4 })
        );
        assert_eq!(
            parser.parse(b"*3\r\n"),
            Err(DecodeError::TooManyElements { count: 3, max: 2 })
        );
    }

    #[test]
    fn test_inline_command() {
        let (frame, consumed) = parse(b"SET  key value\r\n").unwrap().unwrap();
        assert!(frame.is_command("set"));
        assert_eq!(frame.args(), &[Bytes::from("key"), Bytes::from("value")]);
        assert_eq!(consumed, 16);

        assert!(parse(b"PING").unwrap().is_none());
        assert_eq!(parse(b"  \r\n"), Err(DecodeError::EmptyFrame));
    }

    #[test]
    fn test_encode_then_decode() {
        let frame = Frame::from_parts(&["SET", "user:101", "Ariz"]).unwrap();
        assert_eq!(
            frame.encode(),
            b"*3\r\n$3\r\nSET\r\n$8\r\nuser:101\r\n$4\r\nAriz\r\n"
        );
        assert_eq!(decode_frame(&frame.encode()).unwrap(), frame);
    }

    #[test]
    fn test_cursor_bounds() {
        let mut cursor = Cursor::new(b"ab");
        assert_eq!(cursor.read_exact(3), Err(DecodeError::Truncated));
        assert_eq!(cursor.read_exact(usize::MAX), Err(DecodeError::Truncated));
        assert_eq!(cursor.read_exact(2).unwrap(), b"ab");
        assert_eq!(cursor.read_byte(), Err(DecodeError::Truncated));
        assert_eq!(cursor.expect_crlf(), Err(DecodeError::Truncated));
    }
}
