//! TCP Server
//!
//! Owns the listener and the shared state, accepts clients and spawns one
//! connection task per client. Shutdown is cooperative: stop accepting,
//! tell idle workers to exit, give busy ones a grace period, abort the rest.

use crate::commands::CommandHandler;
use crate::config::ServerConfig;
use crate::connection::{handle_connection, ConnectionStats};
use crate::snapshot::KeySource;
use crate::storage::StorageEngine;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept so a full fd table does not spin the loop
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A bound server, ready to run.
pub struct Server {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    storage: Arc<StorageEngine>,
    handler: CommandHandler,
    stats: Arc<ConnectionStats>,
}

impl Server {
    /// Binds the listening socket described by `config`.
    pub async fn bind(config: ServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(config.bind_address()).await?;
        Ok(Self::from_listener(listener, config))
    }

    /// Wraps an already bound listener.
    pub fn from_listener(listener: TcpListener, config: ServerConfig) -> Self {
        let config = Arc::new(config);
        let storage = Arc::new(StorageEngine::new());
        let handler = CommandHandler::new(Arc::clone(&storage), Arc::clone(&config));

        Self {
            listener,
            config,
            storage,
            handler,
            stats: Arc::new(ConnectionStats::new()),
        }
    }

    /// Replaces the snapshot file as the source for KEYS.
    pub fn with_key_source(mut self, keys: Arc<dyn KeySource>) -> Self {
        self.handler = CommandHandler::with_key_source(
            Arc::clone(&self.storage),
            Arc::clone(&self.config),
            keys,
        );
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }

    /// Accepts clients until `shutdown` resolves, then drains.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        let Server {
            listener,
            config,
            storage,
            handler,
            stats,
        } = self;

        let (notify_shutdown, shutdown_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!(client = %addr, "Accepted connection");
                        connections.spawn(handle_connection(
                            stream,
                            addr,
                            handler.clone(),
                            Arc::clone(&stats),
                            config.idle_timeout,
                            shutdown_rx.clone(),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        error!(error = %e, "Connection task failed");
                    }
                }
            }
        }

        drop(listener);
        let _ = notify_shutdown.send(true);
        info!(
            active = connections.len(),
            grace_ms = config.shutdown_grace.as_millis() as u64,
            "Stopped accepting, draining connections"
        );

        let drain = async {
            while let Some(finished) = connections.join_next().await {
                if let Err(e) = finished {
                    error!(error = %e, "Connection task failed");
                }
            }
        };
        if tokio::time::timeout(config.shutdown_grace, drain).await.is_err() {
            warn!(
                remaining = connections.len(),
                "Grace period over, aborting connections"
            );
            connections.shutdown().await;
        }

        let storage_stats = storage.stats();
        info!(
            keys = storage_stats.keys,
            gets = storage_stats.get_ops,
            sets = storage_stats.set_ops,
            expired = storage_stats.expired,
            "Storage statistics"
        );
        info!(
            accepted = stats.connections_accepted.load(Ordering::Relaxed),
            commands = stats.commands_processed.load(Ordering::Relaxed),
            protocol_errors = stats.protocol_errors.load(Ordering::Relaxed),
            bytes_read = stats.bytes_read.load(Ordering::Relaxed),
            bytes_written = stats.bytes_written.load(Ordering::Relaxed),
            "Connection statistics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Frame;
    use bytes::Bytes;
    use std::path::PathBuf;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;

    struct TestServer {
        addr: SocketAddr,
        storage: Arc<StorageEngine>,
        stop: oneshot::Sender<()>,
        task: JoinHandle<()>,
    }

    async fn start(config: ServerConfig) -> TestServer {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..config
        };
        let server = Server::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let storage = Arc::clone(server.storage());
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run(async {
            let _ = stopped.await;
        }));

        TestServer {
            addr,
            storage,
            stop,
            task,
        }
    }

    /// Sends one command and checks the exact reply bytes.
    async fn roundtrip(client: &mut TcpStream, parts: &[&str], expected: &[u8]) {
        let frame = Frame::from_parts(parts).unwrap();
        client.write_all(&frame.encode()).await.unwrap();

        let mut reply = vec![0u8; expected.len()];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(
            String::from_utf8_lossy(&reply),
            String::from_utf8_lossy(expected),
            "reply to {:?}",
            parts
        );
    }

    fn temp_snapshot(name: &str, contents: &[u8]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "snapkv-server-{}-{}",
            name,
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("dump.rdb"), contents).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_ping_echo() {
        let server = start(ServerConfig::default()).await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        roundtrip(&mut client, &["PING"], b"+PONG\r\n").await;
        roundtrip(&mut client, &["ECHO", "hey"], b"$3\r\nhey\r\n").await;
        roundtrip(&mut client, &["NOPE"], b"-ERR unknown command 'NOPE'\r\n").await;
    }

    #[tokio::test]
    async fn test_concurrent_clients() {
        let server = start(ServerConfig::default()).await;

        let mut clients = Vec::new();
        for c in 0..8 {
            let addr = server.addr;
            clients.push(tokio::spawn(async move {
                let mut client = TcpStream::connect(addr).await.unwrap();
                for i in 0..50 {
                    let key = format!("client{}:key{}", c, i);
                    let value = format!("value{}", i);
                    roundtrip(&mut client, &["SET", key.as_str(), value.as_str()], b"+OK\r\n")
                        .await;
                }
            }));
        }
        for client in clients {
            client.await.unwrap();
        }

        assert_eq!(server.storage.len(), 400);

        let mut client = TcpStream::connect(server.addr).await.unwrap();
        for c in 0..8 {
            for i in 0..50 {
                let key = format!("client{}:key{}", c, i);
                let value = format!("value{}", i);
                let expected = format!("${}\r\n{}\r\n", value.len(), value);
                roundtrip(&mut client, &["GET", key.as_str()], expected.as_bytes()).await;
            }
        }
    }

    #[tokio::test]
    async fn test_px_expiry() {
        let server = start(ServerConfig::default()).await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        roundtrip(&mut client, &["SET", "a", "1"], b"+OK\r\n").await;
        roundtrip(&mut client, &["SET", "t", "v", "PX", "50"], b"+OK\r\n").await;
        roundtrip(&mut client, &["GET", "t"], b"$1\r\nv\r\n").await;
        assert_eq!(server.storage.len(), 2);

        tokio::time::sleep(Duration::from_millis(80)).await;
        roundtrip(&mut client, &["GET", "t"], b"$-1\r\n").await;
        assert_eq!(server.storage.len(), 1);
    }

    #[tokio::test]
    async fn test_config_get() {
        let server = start(ServerConfig {
            dir: "/srv/data".to_string(),
            dbfilename: "kv.rdb".to_string(),
            ..ServerConfig::default()
        })
        .await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        roundtrip(
            &mut client,
            &["CONFIG", "GET", "dir"],
            b"*2\r\n$3\r\ndir\r\n$9\r\n/srv/data\r\n",
        )
        .await;
        roundtrip(
            &mut client,
            &["config", "get", "dbfilename"],
            b"*2\r\n$10\r\ndbfilename\r\n$6\r\nkv.rdb\r\n",
        )
        .await;
        roundtrip(
            &mut client,
            &["CONFIG", "GET", "unknown"],
            b"*2\r\n$7\r\nunknown\r\n$0\r\n\r\n",
        )
        .await;
    }

    #[tokio::test]
    async fn test_keys_from_snapshot_file() {
        let dir = temp_snapshot(
            "keys",
            b"REDIS0011\xfa\x09redis-ver\x057.2.0\xfe\x00\xfb\x02\x01\
              \xfc\x00\x9c\xef\x12\x7e\x01\x00\x00\x00\x03foo\x03one\
              \x00\x03bar\x03two\xff",
        );
        let server = start(ServerConfig {
            dir: dir.to_string_lossy().into_owned(),
            ..ServerConfig::default()
        })
        .await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        roundtrip(
            &mut client,
            &["KEYS", "*"],
            b"*2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n",
        )
        .await;

        std::fs::remove_dir_all(&dir).unwrap();
        roundtrip(&mut client, &["KEYS", "*"], b"*0\r\n").await;
    }

    #[tokio::test]
    async fn test_injected_key_source() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Server::from_listener(listener, ServerConfig::default()).with_key_source(
            Arc::new(Bytes::from_static(b"\xfb\x01\x00\x00\x01k\x01v")),
        );
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run(async {
            let _ = stopped.await;
        }));

        let mut client = TcpStream::connect(addr).await.unwrap();
        roundtrip(&mut client, &["KEYS", "*"], b"*1\r\n$1\r\nk\r\n").await;

        stop.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_connections() {
        let server = start(ServerConfig::default()).await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();
        roundtrip(&mut client, &["PING"], b"+PONG\r\n").await;

        server.stop.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), server.task)
            .await
            .unwrap()
            .unwrap();

        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
        assert!(TcpStream::connect(server.addr).await.is_err());
    }
}
