//! Single-connection SSH listener.
//!
//! One task drives everything with `tokio::select!`: accepting, reading
//! from the active connection, and waiting for shutdown. A newly accepted
//! connection replaces the active one, which is sent a DISCONNECT and
//! dropped. All protocol work happens synchronously inside
//! [`Connection::receive`] between socket operations.
//!
//! # Example
//!
//! ```rust,no_run
//! use ember_platform::TracingSink;
//! use ember_proto::ssh::config::SshServerConfig;
//! use ember_proto::ssh::server::SshServer;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SshServerConfig {
//!     listen_addr: "127.0.0.1:2222".to_string(),
//!     ..SshServerConfig::default()
//! };
//! let server = SshServer::bind(config, Arc::new(TracingSink)).await?;
//! server.run_until(async {
//!     let _ = tokio::signal::ctrl_c().await;
//! }).await?;
//! # Ok(())
//! # }
//! ```

use super::config::SshServerConfig;
use super::connection::Connection;
use super::hostkey::HostKey;
use super::message::DisconnectReason;
use ember_platform::{ConnectionEvent, EmberResult, EventSink};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// The connection currently being served.
struct Active {
    stream: TcpStream,
    conn: Connection,
}

enum ReadOutcome {
    Read(std::io::Result<usize>),
    Idle,
}

/// SSH server bound to one port.
pub struct SshServer {
    listener: TcpListener,
    config: SshServerConfig,
    host_key: Arc<dyn HostKey>,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for SshServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshServer")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("host_key", &self.host_key.fingerprint())
            .finish_non_exhaustive()
    }
}

impl SshServer {
    /// Validates `config`, loads the host key and binds the listener.
    pub async fn bind(config: SshServerConfig, sink: Arc<dyn EventSink>) -> EmberResult<Self> {
        config.validate()?;
        let host_key: Arc<dyn HostKey> = Arc::new(config.load_host_key()?);
        Self::bind_with_host_key(config, host_key, sink).await
    }

    /// Binds with an explicit host key, ignoring the configured key source.
    pub async fn bind_with_host_key(
        config: SshServerConfig,
        host_key: Arc<dyn HostKey>,
        sink: Arc<dyn EventSink>,
    ) -> EmberResult<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.socket_addr()?).await?;
        info!(
            addr = %listener.local_addr()?,
            host_key = %host_key.fingerprint(),
            "SSH server bound"
        );
        Ok(Self {
            listener,
            config,
            host_key,
            sink,
        })
    }

    /// Bound address.
    pub fn local_addr(&self) -> EmberResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Host key fingerprint, hex encoded SHA-256 of the key blob.
    pub fn host_key_fingerprint(&self) -> String {
        self.host_key.fingerprint()
    }

    /// Serves connections forever.
    pub async fn run(self) -> EmberResult<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serves connections until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> EmberResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        self.sink.notify(&ConnectionEvent::Listening {
            addr: self.local_addr()?,
        });

        let idle_timeout = self.config.idle_timeout();
        let mut buf = vec![0u8; self.config.read_buffer_size];
        let mut active: Option<Active> = None;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    if let Some(current) = active.take() {
                        self.replace(current, "Server shutting down").await;
                    }
                    info!("SSH server stopped");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Some(previous) = active.take() {
                            self.replace(previous, "Replaced by a new connection").await;
                        }
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(%peer, error = %e, "Cannot set TCP_NODELAY");
                        }
                        self.sink.notify(&ConnectionEvent::Accepted { peer });
                        let conn = Connection::new(peer, &self.config, self.host_key.clone());
                        active = Some(Active { stream, conn });
                    }
                    Err(e) => error!(error = %e, "Accept failed"),
                },
                read = read_active(&mut active, &mut buf, idle_timeout) => {
                    if let Some(reason) = self.on_read(&mut active, read, &buf).await {
                        if let Some(current) = active.take() {
                            self.finish(current, reason);
                        }
                    }
                }
            }
        }
    }

    /// Handles one read; returns a reason when the connection must end.
    async fn on_read(
        &self,
        active: &mut Option<Active>,
        read: ReadOutcome,
        buf: &[u8],
    ) -> Option<String> {
        let current = active.as_mut()?;
        let n = match read {
            ReadOutcome::Idle => {
                let bytes = current
                    .conn
                    .disconnect(DisconnectReason::ByApplication, "Idle timeout");
                write_best_effort(&mut current.stream, bytes).await;
                return Some("Idle timeout".to_string());
            }
            ReadOutcome::Read(Ok(0)) => return Some("Peer closed the connection".to_string()),
            ReadOutcome::Read(Err(e)) => return Some(format!("Read failed: {}", e)),
            ReadOutcome::Read(Ok(n)) => n,
        };

        match current.conn.receive(&buf[..n]) {
            Ok(transmit) => {
                if !transmit.bytes.is_empty() {
                    if let Err(e) = current.stream.write_all(&transmit.bytes).await {
                        return Some(format!("Write failed: {}", e));
                    }
                }
                for event in &transmit.events {
                    self.sink.notify(event);
                }
                transmit.close
            }
            Err(e) => {
                warn!(peer = %current.conn.peer(), error = %e, "Protocol failure");
                let bytes = current.conn.disconnect_for(&e);
                write_best_effort(&mut current.stream, bytes).await;
                Some(e.to_string())
            }
        }
    }

    /// Sends a DISCONNECT to a connection being replaced and drops it.
    async fn replace(&self, mut current: Active, reason: &str) {
        let bytes = current
            .conn
            .disconnect(DisconnectReason::ByApplication, reason);
        write_best_effort(&mut current.stream, bytes).await;
        self.finish(current, reason.to_string());
    }

    fn finish(&self, mut current: Active, reason: String) {
        current.conn.close();
        self.sink.notify(&ConnectionEvent::Closed {
            peer: current.conn.peer(),
            reason,
        });
    }
}

/// Reads from the active connection; never resolves when there is none.
async fn read_active(
    active: &mut Option<Active>,
    buf: &mut [u8],
    idle_timeout: Option<Duration>,
) -> ReadOutcome {
    let Some(current) = active.as_mut() else {
        return std::future::pending().await;
    };
    match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, current.stream.read(buf)).await {
            Ok(read) => ReadOutcome::Read(read),
            Err(_) => ReadOutcome::Idle,
        },
        None => ReadOutcome::Read(current.stream.read(buf).await),
    }
}

async fn write_best_effort(stream: &mut TcpStream, bytes: Option<Vec<u8>>) {
    if let Some(bytes) = bytes {
        if let Err(e) = stream.write_all(&bytes).await {
            debug!(error = %e, "DISCONNECT not delivered");
        }
    }
    let _ = stream.shutdown().await;
}
