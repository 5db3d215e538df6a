//! Relay server listener
//!
//! Handles the TCP accept loop, spawns connection tasks and coordinates
//! shutdown.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};
use crate::server::config::ServerConfig;
use crate::server::connection::Connection;
use crate::stats::RelayMetrics;

/// Pause after an accept error so a persistent failure (e.g. out of file
/// descriptors) doesn't spin the loop
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Cloneable handle that stops a running [`RelayServer`]
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    /// Stop accepting and close every active connection
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Check if shutdown was requested
    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Broadcast relay server
pub struct RelayServer {
    config: Arc<ServerConfig>,
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<RelayMetrics>,
    next_connection_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
    shutdown: CancellationToken,
}

impl RelayServer {
    /// Bind the listening socket
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Ok(Self {
            config: Arc::new(config),
            listener,
            local_addr,
            registry: Arc::new(ConnectionRegistry::new()),
            metrics: Arc::new(RelayMetrics::new()),
            next_connection_id: AtomicU64::new(1),
            connection_semaphore,
            shutdown: CancellationToken::new(),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get a reference to the connection registry
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Get a reference to the server counters
    pub fn metrics(&self) -> &Arc<RelayMetrics> {
        &self.metrics
    }

    /// Handle for stopping the server from elsewhere
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            token: self.shutdown.clone(),
        }
    }

    /// Run the server until a [`ShutdownHandle`] fires
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server until `shutdown` completes or a [`ShutdownHandle`] fires
    ///
    /// Returns once every connection task has finished and the registry is
    /// empty.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(addr = %self.local_addr, "Relay server listening");

        let mut tasks = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Shutdown requested");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer_addr)) => {
                        self.handle_connection(&mut tasks, socket, peer_addr);
                    }
                    Err(e) => {
                        self.metrics.accept_failed();
                        tracing::error!(error = %e, "Failed to accept connection");
                        accept_backoff(&self.shutdown).await;
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    reap(joined);
                }
            }
        }

        let RelayServer {
            listener,
            registry,
            metrics,
            shutdown: token,
            ..
        } = self;

        // Stop accepting before tearing connections down
        drop(listener);
        token.cancel();

        tracing::info!(connections = tasks.len(), "Closing active connections");

        while let Some(joined) = tasks.join_next().await {
            reap(joined);
        }

        // Only a panicked task can leave its entry behind
        for handle in registry.drain().await {
            if handle.begin_close() {
                tracing::warn!(
                    connection_id = %handle.id(),
                    peer = %handle.peer_addr(),
                    age_ms = handle.age().as_millis() as u64,
                    "Closing orphaned connection"
                );
                handle.close().await;
                metrics.connection_closed();
            }
        }

        tracing::info!("Relay server stopped");
        Ok(())
    }

    fn handle_connection(
        &self,
        tasks: &mut JoinSet<()>,
        socket: TcpStream,
        peer_addr: SocketAddr,
    ) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match Arc::clone(sem).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    self.metrics.connection_rejected();
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        let id = ConnectionId::new(self.next_connection_id.fetch_add(1, Ordering::Relaxed));
        self.metrics.connection_accepted();

        tracing::debug!(connection_id = %id, peer = %peer_addr, "New connection");

        if let Err(e) = self.configure_socket(&socket) {
            tracing::error!(connection_id = %id, error = %e, "Failed to configure socket");
            return;
        }

        let (reader, writer) = socket.into_split();
        let handle = Arc::new(ConnectionHandle::new(
            id,
            peer_addr,
            Box::new(writer),
            self.shutdown.child_token(),
        ));
        let connection = Connection::new(
            handle,
            reader,
            Arc::clone(&self.config),
            Arc::clone(&self.registry),
            Arc::clone(&self.metrics),
            self.shutdown.clone(),
        );

        tasks.spawn(async move {
            let _permit = permit;

            if let Err(e) = connection.run().await {
                tracing::debug!(connection_id = %id, error = %e, "Connection error");
            }
        });
    }

    fn configure_socket(&self, socket: &TcpStream) -> std::io::Result<()> {
        if self.config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }

        Ok(())
    }
}

/// Wait out [`ACCEPT_ERROR_BACKOFF`], returning early on shutdown
async fn accept_backoff(shutdown: &CancellationToken) {
    tokio::select! {
        _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => {}
        _ = shutdown.cancelled() => {}
    }
}

fn reap(joined: std::result::Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::error!(error = %e, "Connection task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[tokio::test]
    async fn test_accept_backoff_waits() {
        let token = CancellationToken::new();
        let started = Instant::now();

        accept_backoff(&token).await;

        assert!(started.elapsed() >= ACCEPT_ERROR_BACKOFF);
    }

    #[tokio::test]
    async fn test_accept_backoff_interrupted_by_shutdown() {
        let token = CancellationToken::new();
        token.cancel();

        tokio::time::timeout(Duration::from_millis(40), accept_backoff(&token))
            .await
            .expect("backoff ignored shutdown");
    }

    #[tokio::test]
    async fn test_shutdown_handle_is_shared() {
        let server = RelayServer::bind(ServerConfig::with_addr(
            "127.0.0.1:0".parse().unwrap(),
        ))
        .await
        .unwrap();
        let first = server.shutdown_handle();
        let second = first.clone();

        assert!(!second.is_shutdown());
        first.shutdown();
        assert!(second.is_shutdown());

        tokio::time::timeout(Duration::from_secs(5), server.run())
            .await
            .expect("server ignored shutdown")
            .unwrap();
    }
}
