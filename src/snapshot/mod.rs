//! Snapshot Module
//!
//! Lists the keys persisted in an on-disk snapshot. The scanner is read-only
//! and never touches the in-memory store; each call opens the file, reads it
//! front to back and releases it.
//!
//! Only a small subset of the format is understood (see [`scanner`]).
//! Anything outside it ends the scan softly with the keys found so far.

pub mod scanner;

pub use scanner::{
    KeyScanner, KeySource, ScanError, ScanOutcome, ScannedKey, SnapshotFile,
};
