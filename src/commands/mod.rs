//! Command Layer
//!
//! Validates decoded frames into [`Command`]s and executes them.
//!
//! ```text
//! Frame ──> Command::from_frame ──> CommandHandler ──> RespValue
//!                                        │
//!                        StorageEngine / ServerConfig / KeySource
//! ```
//!
//! ## Supported Commands
//!
//! - `PING`
//! - `ECHO message [message ...]`
//! - `SET key value [PX milliseconds]`
//! - `GET key`
//! - `CONFIG GET parameter` (`dir`, `dbfilename`)
//! - `KEYS *` (keys of the on-disk snapshot)

pub mod command;
pub mod handler;

pub use command::{Command, CommandError};
pub use handler::{protocol_error, CommandHandler};
