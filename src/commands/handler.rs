//! Command Execution
//!
//! `CommandHandler` runs validated commands against the shared store, the
//! server configuration and the snapshot key source, and renders every
//! outcome (including validation and decode failures) as a [`RespValue`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌──────────────┐   ┌──────────────┐   ┌───────────────┐   │
//! │  │ from_frame() │──>│  execute_    │──>│ StorageEngine │   │
//! │  └──────────────┘   │  command()   │   │ ServerConfig  │   │
//! │                     └──────────────┘   │ KeySource     │   │
//! │                                        └───────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::commands::command::{printable, Command};
use crate::config::ServerConfig;
use crate::protocol::{DecodeError, Frame, RespValue};
use crate::snapshot::{KeySource, ScanError, SnapshotFile};
use crate::storage::StorageEngine;
use bytes::Bytes;
use std::io;
use std::sync::Arc;
use tracing::{debug, warn};

/// Executes commands on behalf of connection workers.
///
/// Cheap to clone: all state is behind `Arc`s.
#[derive(Clone)]
pub struct CommandHandler {
    storage: Arc<StorageEngine>,
    config: Arc<ServerConfig>,
    keys: Arc<dyn KeySource>,
}

impl CommandHandler {
    /// Creates a handler that lists keys from the configured snapshot file.
    pub fn new(storage: Arc<StorageEngine>, config: Arc<ServerConfig>) -> Self {
        let keys = Arc::new(SnapshotFile::new(config.snapshot_path()));
        Self::with_key_source(storage, config, keys)
    }

    /// Creates a handler with an explicit key source.
    pub fn with_key_source(
        storage: Arc<StorageEngine>,
        config: Arc<ServerConfig>,
        keys: Arc<dyn KeySource>,
    ) -> Self {
        Self {
            storage,
            config,
            keys,
        }
    }

    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    /// Validates and executes one frame.
    pub async fn execute(&self, frame: Frame) -> RespValue {
        match Command::from_frame(frame) {
            Ok(command) => self.execute_command(command).await,
            Err(e) => {
                debug!(error = %e, "Rejected command");
                RespValue::error(e.to_string())
            }
        }
    }

    /// Executes an already validated command.
    pub async fn execute_command(&self, command: Command) -> RespValue {
        match command {
            Command::Ping => RespValue::pong(),
            Command::Echo(mut parts) => {
                if parts.len() == 1 {
                    RespValue::bulk_string(parts.remove(0))
                } else {
                    RespValue::bulk_array(parts)
                }
            }
            Command::Set {
                key,
                value,
                expires_at_ms,
            } => {
                self.storage.set(key, value, expires_at_ms);
                RespValue::ok()
            }
            Command::Get(key) => match self.storage.get(&key) {
                Some(value) => RespValue::bulk_string(value),
                None => RespValue::null(),
            },
            Command::ConfigGet(parameter) => {
                let value = self
                    .config
                    .get(&parameter)
                    .map(|v| Bytes::copy_from_slice(v.as_bytes()))
                    .unwrap_or_default();
                RespValue::bulk_array([parameter, value])
            }
            Command::Keys => self.keys().await,
        }
    }

    /// KEYS * - lists the snapshot's keys on the blocking pool.
    async fn keys(&self) -> RespValue {
        let source = Arc::clone(&self.keys);
        let outcome = match tokio::task::spawn_blocking(move || source.list_keys()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Snapshot scan task failed");
                return RespValue::array(vec![]);
            }
        };

        match &outcome.error {
            None => {}
            Some(ScanError::Open { path, source }) if source.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No snapshot file, KEYS returns nothing");
            }
            Some(e) => {
                warn!(
                    error = %e,
                    recovered = outcome.keys.len(),
                    declared = outcome.table_size,
                    "Snapshot scan stopped early"
                );
            }
        }

        RespValue::bulk_array(outcome.key_names())
    }
}

/// Renders a decode failure as the reply sent to the client.
pub fn protocol_error(e: &DecodeError) -> RespValue {
    let reason = printable(e.to_string().as_bytes());
    RespValue::error(format!("ERR Protocol error: {}", reason))
}
