//! Connection Handler
//!
//! One `ConnectionHandler` serves one client for the lifetime of its
//! connection, reading frames, executing them and writing replies in order.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Server accepts a client and spawns a handler task
//!        │
//!        ▼
//! 2. ┌──────────────────────────────┐
//!    │      Main Loop               │
//!    │                              │
//!    │  decode every complete frame │
//!    │  in the buffer, execute it,  │
//!    │  write the reply             │
//!    │              │               │
//!    │              ▼               │
//!    │  read more bytes (deadline,  │
//!    │  shutdown aware)             │
//!    │              │               │
//!    │         [Loop back]          │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 3. EOF, I/O error, timeout or shutdown: the task ends
//! ```
//!
//! ## Buffer Management
//!
//! Incoming bytes accumulate in a `BytesMut`. TCP is a stream, so one read
//! may hold half a frame or several pipelined frames. A frame that can never
//! decode poisons everything after it, so on a decode error the buffer is
//! dropped, the client gets a protocol error and the connection carries on.

use crate::commands::{protocol_error, CommandHandler};
use crate::protocol::{parser::MAX_BULK_SIZE, DecodeError, Frame, FrameParser, RespValue};
use bytes::BytesMut;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

/// Largest amount of unparsed data held for one client (one max-size bulk
/// plus framing overhead)
const MAX_BUFFER_SIZE: usize = MAX_BULK_SIZE + 64 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Frames rejected by the decoder
    pub protocol_errors: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Handles a single client connection.
///
/// Generic over the stream so the same loop serves TCP sockets and scripted
/// test streams.
pub struct ConnectionHandler<S> {
    /// The client stream, write side buffered
    stream: BufWriter<S>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Buffer for incoming data
    buffer: BytesMut,

    /// The command handler (shared across connections)
    command_handler: CommandHandler,

    parser: FrameParser,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,

    /// Deadline for each read and each reply write
    idle_timeout: Option<Duration>,

    /// Flips to `true` when the server is shutting down
    shutdown: watch::Receiver<bool>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a handler with no deadline and no shutdown signal.
    pub fn new(
        stream: S,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();
        let (_never, shutdown) = watch::channel(false);

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            parser: FrameParser::new(),
            stats,
            idle_timeout: None,
            shutdown,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Serves the client until it disconnects, fails, times out or the
    /// server shuts down.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Connection closed for shutdown"),
            Err(e) => match e {
                ConnectionError::ClientDisconnected => {
                    info!(client = %self.addr, "Client disconnected")
                }
                ConnectionError::Io(io_err)
                    if io_err.kind() == io::ErrorKind::ConnectionReset =>
                {
                    debug!(client = %self.addr, "Connection reset by client")
                }
                ConnectionError::Timeout => {
                    debug!(client = %self.addr, "Connection timed out")
                }
                _ => warn!(client = %self.addr, error = %e, "Connection error"),
            },
        }

        result
    }

    /// The main read-execute-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            match self.try_parse_frame() {
                Ok(Some(frame)) => {
                    let response = self.command_handler.execute(frame).await;
                    self.stats.command_processed();
                    self.send_response(&response).await?;
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(client = %self.addr, error = %e, "Protocol error");
                    self.stats.protocol_error();
                    self.buffer.clear();
                    self.send_response(&protocol_error(&e)).await?;
                    continue;
                }
            }

            if *self.shutdown.borrow() {
                return Ok(());
            }

            match self.read_more_data().await {
                Ok(true) => {}
                Ok(false) => return Ok(()),
                Err(e @ (ConnectionError::Timeout | ConnectionError::UnexpectedEof))
                    if self.has_partial_frame() =>
                {
                    // Best effort: the client may already be gone.
                    let _ = self
                        .send_response(&protocol_error(&DecodeError::Truncated))
                        .await;
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Attempts to decode one frame from the front of the buffer.
    fn try_parse_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match self.parser.parse(&self.buffer)? {
            Some((frame, consumed)) => {
                let _ = self.buffer.split_to(consumed);
                trace!(
                    client = %self.addr,
                    command = %frame.command_name(),
                    consumed = consumed,
                    remaining = self.buffer.len(),
                    "Parsed frame"
                );
                Ok(Some(frame))
            }
            None => {
                trace!(
                    client = %self.addr,
                    buffered = self.buffer.len(),
                    "Incomplete frame, need more data"
                );
                Ok(None)
            }
        }
    }

    /// True if the buffer holds part of a frame (not just NUL padding).
    fn has_partial_frame(&self) -> bool {
        self.buffer.iter().any(|&b| b != 0)
    }

    /// Reads more data from the client into the buffer.
    ///
    /// Returns `Ok(false)` if the server started shutting down while waiting.
    async fn read_more_data(&mut self) -> Result<bool, ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            error!(
                client = %self.addr,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let read = self.stream.get_mut().read_buf(&mut self.buffer);
        let n = tokio::select! {
            n = with_deadline(self.idle_timeout, read) => n?,
            _ = shutdown_requested(&mut self.shutdown) => return Ok(false),
        };

        if n == 0 {
            return if self.has_partial_frame() {
                Err(ConnectionError::UnexpectedEof)
            } else {
                Err(ConnectionError::ClientDisconnected)
            };
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(true)
    }

    /// Sends a reply to the client.
    async fn send_response(&mut self, response: &RespValue) -> Result<(), ConnectionError> {
        let bytes = response.serialize();
        let stream = &mut self.stream;
        with_deadline(self.idle_timeout, async {
            stream.write_all(&bytes).await?;
            stream.flush().await
        })
        .await?;

        self.stats.bytes_written(bytes.len());
        trace!(
            client = %self.addr,
            bytes = bytes.len(),
            reply = %response,
            "Sent response"
        );
        Ok(())
    }
}

/// Counts the connection as closed however the handler goes away, including
/// when its task is aborted.
impl<S> Drop for ConnectionHandler<S> {
    fn drop(&mut self) {
        self.stats.connection_closed();
    }
}

/// Runs an I/O future under an optional deadline.
async fn with_deadline<F, T>(deadline: Option<Duration>, fut: F) -> Result<T, ConnectionError>
where
    F: Future<Output = io::Result<T>>,
{
    match deadline {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ConnectionError::Timeout),
        },
        None => Ok(fut.await?),
    }
}

/// Resolves once shutdown is signalled; never resolves if the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Client disconnected between frames
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Client disconnected in the middle of a frame
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// No data arrived, or a reply could not be written, within the deadline
    #[error("Connection idle timeout")]
    Timeout,

    /// Buffer size limit exceeded
    #[error("Buffer size limit exceeded")]
    BufferFull,
}

/// Handles a client connection.
///
/// Convenience wrapper that builds a [`ConnectionHandler`] and runs it to
/// completion, logging only unusual endings.
pub async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
    idle_timeout: Option<Duration>,
    shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handler = ConnectionHandler::new(stream, addr, command_handler, stats)
        .with_idle_timeout(idle_timeout)
        .with_shutdown(shutdown);

    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::Io(ref io_err)
                if io_err.kind() == io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}
