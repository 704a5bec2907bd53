//! Snapshot Key Scanner
//!
//! Reads just enough of an RDB-style snapshot to list the keys it holds.
//!
//! ## Supported Subset
//!
//! ```text
//! ... 0xFB <table size: u8> <expiry table size: u8>
//!     repeated <table size> times:
//!         [0xFC <u64 LE millis> | 0xFD <u32 LE secs>]
//!         <value type: 0x00>
//!         <len> <key bytes>
//!         <len> <value bytes>
//! ```
//!
//! A length byte whose top two bits are `00` carries the length in its low six
//! bits. Every other length form (14-bit, 32/64-bit, integer and compressed
//! strings) is unsupported and stops the scan.
//!
//! The scanner never fails hard: any problem ends the scan and the keys read
//! so far are returned together with the [`ScanError`] that stopped it.

use bytes::Bytes;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::trace;

/// Marks the hash table size section
pub const OPCODE_RESIZE_DB: u8 = 0xFB;
/// Next key carries an expiry in milliseconds (8 bytes, little-endian)
pub const OPCODE_EXPIRE_TIME_MS: u8 = 0xFC;
/// Next key carries an expiry in seconds (4 bytes, little-endian)
pub const OPCODE_EXPIRE_TIME_SECS: u8 = 0xFD;
/// Value type byte of a plain string value
pub const VALUE_TYPE_STRING: u8 = 0x00;

/// Length encoding selected by the top two bits of a length byte
const LENGTH_ENCODING_6BIT: u8 = 0b00;

/// Why a scan stopped before reading every record.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to open snapshot {}: {}", .path.display(), .source)]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("hash table size marker (0xFB) not found")]
    MissingTableSizeMarker,

    #[error("unexpected end of snapshot while reading {0}")]
    UnexpectedEof(&'static str),

    #[error("unsupported length encoding {encoding:#04x} for {field}")]
    UnsupportedEncoding { field: &'static str, encoding: u8 },

    #[error("unsupported value type {0:#04x}")]
    UnsupportedValueType(u8),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// One key found in the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedKey {
    pub key: Bytes,
    /// Expiry recorded for the key, normalized to epoch milliseconds
    pub expires_at_ms: Option<i64>,
}

/// Result of one scan: the keys read and, if the scan stopped early, why.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub keys: Vec<ScannedKey>,
    /// Declared number of records
    pub table_size: usize,
    /// Declared number of records carrying an expiry
    pub expires_size: usize,
    pub error: Option<ScanError>,
}

impl ScanOutcome {
    pub fn failed(error: ScanError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    /// True if every declared record was read.
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    /// The key names in file order.
    pub fn key_names(&self) -> Vec<Bytes> {
        self.keys.iter().map(|k| k.key.clone()).collect()
    }
}

/// Streams records out of a snapshot.
///
/// # Example
///
/// ```
/// use snapkv::snapshot::KeyScanner;
///
/// let snapshot = b"REDIS0011\xfe\x00\xfb\x01\x00\x00\x03foo\x03bar\xff";
/// let outcome = KeyScanner::new(&snapshot[..]).scan();
/// assert!(outcome.is_complete());
/// assert_eq!(outcome.key_names(), vec![bytes::Bytes::from("foo")]);
/// ```
pub struct KeyScanner<R> {
    reader: BufReader<R>,
}

impl<R: Read> KeyScanner<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Runs the scan to completion or to the first problem.
    pub fn scan(mut self) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        if let Err(e) = self.scan_into(&mut outcome) {
            outcome.error = Some(e);
        }
        outcome
    }

    fn scan_into(&mut self, outcome: &mut ScanOutcome) -> Result<(), ScanError> {
        self.seek_table_marker()?;

        outcome.table_size = self.read_u8("hash table size")? as usize;
        outcome.expires_size = self.read_u8("expiry table size")? as usize;
        trace!(
            table_size = outcome.table_size,
            expires_size = outcome.expires_size,
            "Found hash table sizes"
        );

        for _ in 0..outcome.table_size {
            let mut expires_at_ms = None;
            let mut value_type = self.read_u8("value type")?;

            match value_type {
                OPCODE_EXPIRE_TIME_MS => {
                    let ms = u64::from_le_bytes(self.read_array("millisecond expiry")?);
                    expires_at_ms = Some(ms as i64);
                    value_type = self.read_u8("value type")?;
                }
                OPCODE_EXPIRE_TIME_SECS => {
                    let secs = u32::from_le_bytes(self.read_array("second expiry")?);
                    expires_at_ms = Some(i64::from(secs) * 1000);
                    value_type = self.read_u8("value type")?;
                }
                _ => {}
            }

            if value_type != VALUE_TYPE_STRING {
                return Err(ScanError::UnsupportedValueType(value_type));
            }

            let key = self.read_string("key")?;
            trace!(key = ?key, expires_at_ms, "Read snapshot key");
            outcome.keys.push(ScannedKey { key, expires_at_ms });

            self.skip_string("value")?;
        }

        Ok(())
    }

    /// Consumes input up to and including the first 0xFB byte.
    ///
    /// Skipped bytes are dropped chunk by chunk, never accumulated.
    fn seek_table_marker(&mut self) -> Result<(), ScanError> {
        loop {
            let chunk = self.reader.fill_buf()?;
            if chunk.is_empty() {
                return Err(ScanError::MissingTableSizeMarker);
            }
            match chunk.iter().position(|&b| b == OPCODE_RESIZE_DB) {
                Some(at) => {
                    self.reader.consume(at + 1);
                    return Ok(());
                }
                None => {
                    let skipped = chunk.len();
                    self.reader.consume(skipped);
                }
            }
        }
    }

    fn read_array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], ScanError> {
        let mut buf = [0u8; N];
        self.reader.read_exact(&mut buf).map_err(|e| eof_as(e, field))?;
        Ok(buf)
    }

    fn read_u8(&mut self, field: &'static str) -> Result<u8, ScanError> {
        Ok(self.read_array::<1>(field)?[0])
    }

    /// Reads a length byte; only the 6-bit form is supported.
    fn read_length(&mut self, field: &'static str) -> Result<usize, ScanError> {
        let byte = self.read_u8(field)?;
        if byte >> 6 != LENGTH_ENCODING_6BIT {
            return Err(ScanError::UnsupportedEncoding {
                field,
                encoding: byte,
            });
        }
        Ok((byte & 0x3F) as usize)
    }

    fn read_string(&mut self, field: &'static str) -> Result<Bytes, ScanError> {
        let len = self.read_length(field)?;
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf).map_err(|e| eof_as(e, field))?;
        Ok(Bytes::from(buf))
    }

    fn skip_string(&mut self, field: &'static str) -> Result<(), ScanError> {
        let len = self.read_length(field)? as u64;
        let skipped = io::copy(&mut (&mut self.reader).take(len), &mut io::sink())?;
        if skipped < len {
            return Err(ScanError::UnexpectedEof(field));
        }
        Ok(())
    }
}

fn eof_as(e: io::Error, field: &'static str) -> ScanError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        ScanError::UnexpectedEof(field)
    } else {
        ScanError::Io(e)
    }
}

/// Anything that can list the keys of a snapshot.
pub trait KeySource: Send + Sync {
    fn list_keys(&self) -> ScanOutcome;
}

/// A snapshot on disk, opened fresh on every scan.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeySource for SnapshotFile {
    fn list_keys(&self) -> ScanOutcome {
        match File::open(&self.path) {
            Ok(file) => KeyScanner::new(file).scan(),
            Err(source) => ScanOutcome::failed(ScanError::Open {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// An in-memory snapshot image.
impl KeySource for Bytes {
    fn list_keys(&self) -> ScanOutcome {
        KeyScanner::new(&self[..]).scan()
    }
}
