//! # snapkv - An In-Memory Key-Value Server with Snapshot Key Listing
//!
//! snapkv speaks the RESP array-of-bulk-strings wire protocol, keeps string
//! keys in memory with optional millisecond expiry, and answers `KEYS *` by
//! scanning an on-disk snapshot file.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              snapkv                                     │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │   Server    │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │                            │                  │                         │
//! │                            ▼                  ▼                         │
//! │                     ┌─────────────┐    ┌──────────────────────────────┐ │
//! │                     │ FrameParser │    │ StorageEngine (64 RwLock     │ │
//! │                     └─────────────┘    │ shards, lazy expiry)         │ │
//! │                                        ├──────────────────────────────┤ │
//! │                                        │ ServerConfig (dir, dbfile)   │ │
//! │                                        ├──────────────────────────────┤ │
//! │                                        │ KeySource -> KeyScanner      │ │
//! │                                        │ (snapshot file, per request) │ │
//! │                                        └──────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use snapkv::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!     server.run(async { let _ = tokio::signal::ctrl_c().await; }).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `PING`
//! - `ECHO message [message ...]`
//! - `SET key value [PX milliseconds]`
//! - `GET key`
//! - `CONFIG GET dir|dbfilename`
//! - `KEYS *`
//!
//! ## Module Overview
//!
//! - [`protocol`]: frame decoding and reply encoding
//! - [`commands`]: command validation and execution
//! - [`storage`]: sharded store with lazy expiry
//! - [`snapshot`]: snapshot key scanner
//! - [`config`]: server settings and CLI parsing
//! - [`connection`]: per-client worker
//! - [`server`]: accept loop and graceful shutdown
//!
//! ## Expiry
//!
//! Expired keys are removed only when read. Keys that expire and are never
//! read again stay in memory until the process exits.

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod snapshot;
pub mod storage;

pub use commands::{Command, CommandError, CommandHandler};
pub use config::{CliAction, ConfigError, ServerConfig};
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{decode_frame, DecodeError, Frame, FrameParser, RespValue};
pub use server::Server;
pub use snapshot::{KeyScanner, KeySource, ScanOutcome, SnapshotFile};
pub use storage::StorageEngine;

pub use config::{DEFAULT_HOST, DEFAULT_PORT};

/// Version of snapkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
