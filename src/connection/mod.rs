//! Connection Handling
//!
//! Each accepted client is served by its own [`ConnectionHandler`] task.
//! Workers share the store through the [`CommandHandler`](crate::commands::CommandHandler)
//! and never talk to each other.
//!
//! ## Features
//!
//! - **Pipelining**: several frames in one read are answered in order
//! - **Split frames**: partial frames wait in the buffer for more bytes
//! - **Recovery**: a malformed frame gets a protocol error, not a hang-up
//! - **Deadlines**: optional per-read/per-write idle timeout
//! - **Shutdown**: idle workers exit when the server signals shutdown
//!
//! ## Example
//!
//! ```ignore
//! use snapkv::connection::{handle_connection, ConnectionStats};
//!
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(stream, addr, handler.clone(), stats.clone(), idle_timeout, shutdown_rx.clone()));
//! ```

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
