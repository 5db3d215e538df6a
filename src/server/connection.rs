//! Per-connection task
//!
//! Drives one accepted connection through its lifecycle: register, greet,
//! relay inbound chunks to every other connection, then deregister and close
//! exactly once.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::registry::entry::write_chunk;
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::server::broadcast::broadcast;
use crate::server::config::ServerConfig;
use crate::session::{SessionState, TerminationReason};
use crate::stats::RelayMetrics;

/// One accepted client
///
/// Owns the read half of the socket; the write half lives in the shared
/// [`ConnectionHandle`].
pub(crate) struct Connection {
    handle: Arc<ConnectionHandle>,
    reader: OwnedReadHalf,
    state: SessionState,
    config: Arc<ServerConfig>,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<RelayMetrics>,
    shutdown: CancellationToken,
}

impl Connection {
    pub(crate) fn new(
        handle: Arc<ConnectionHandle>,
        reader: OwnedReadHalf,
        config: Arc<ServerConfig>,
        registry: Arc<ConnectionRegistry>,
        metrics: Arc<RelayMetrics>,
        shutdown: CancellationToken,
    ) -> Self {
        let state = SessionState::new(handle.id(), handle.peer_addr());

        Self {
            handle,
            reader,
            state,
            config,
            registry,
            metrics,
            shutdown,
        }
    }

    /// Run the connection to completion
    ///
    /// Only a refused registration is reported as an error; every other way
    /// the connection ends is a [`TerminationReason`].
    pub(crate) async fn run(mut self) -> Result<()> {
        let handle = Arc::clone(&self.handle);

        // Hold our own writer across registration and greeting so no
        // broadcast can reach this client ahead of the greeting.
        let greeted = {
            let mut writer = handle.lock_writer().await;

            if let Err(e) = self.registry.register(Arc::clone(&handle)).await {
                drop(writer);
                self.state.abort(TerminationReason::Rejected);
                if handle.begin_close() {
                    handle.close().await;
                }
                return Err(e.into());
            }
            self.state.register();
            self.metrics.connection_opened();

            match &self.config.greeting {
                Some(greeting) => {
                    let result = handle
                        .write_guarded(
                            self.config.write_timeout,
                            write_chunk(&mut writer, greeting),
                        )
                        .await;
                    if result.is_ok() {
                        handle.record_sent(greeting.len());
                    }
                    result
                }
                None => Ok(()),
            }
        };

        let reason = match greeted {
            Ok(()) => {
                self.state.start_relaying();
                self.relay().await
            }
            Err(e) => {
                tracing::debug!(
                    connection_id = %handle.id(),
                    error = %e,
                    "Greeting failed"
                );
                TerminationReason::WriteFailed
            }
        };

        self.terminate(reason).await;
        Ok(())
    }

    /// Read loop: every chunk goes to a fresh snapshot of the other connections
    async fn relay(&mut self) -> TerminationReason {
        let id = self.handle.id();
        let mut buf = BytesMut::with_capacity(self.config.read_buffer_size);

        loop {
            buf.reserve(self.config.read_buffer_size);

            let read = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return TerminationReason::Shutdown,
                _ = self.handle.terminated() => return TerminationReason::Terminated,
                read = self.reader.read_buf(&mut buf) => read,
            };

            match read {
                Ok(0) => return TerminationReason::EndOfStream,
                Ok(n) => {
                    let chunk = buf.split().freeze();
                    self.state.on_chunk(n);
                    self.metrics.chunk_received(n);

                    let recipients = self.registry.snapshot_excluding(id).await;
                    let outcome = broadcast(
                        id,
                        &recipients,
                        &chunk,
                        self.config.write_timeout,
                        &self.metrics,
                    )
                    .await;

                    tracing::trace!(
                        connection_id = %id,
                        len = n,
                        delivered = outcome.delivered,
                        failed = outcome.failed,
                        skipped = outcome.skipped,
                        "Chunk relayed"
                    );
                }
                Err(e) => {
                    tracing::debug!(connection_id = %id, error = %e, "Read failed");
                    return TerminationReason::ReadFailed;
                }
            }
        }
    }

    /// Deregister and close, at most once per connection
    async fn terminate(&mut self, reason: TerminationReason) {
        if !self.state.terminate(reason) {
            return;
        }

        self.registry.deregister(self.handle.id()).await;

        if self.handle.begin_close() {
            self.handle.close().await;
            self.metrics.connection_closed();
        }

        self.state.close();

        tracing::debug!(
            connection_id = %self.handle.id(),
            peer = %self.state.peer_addr,
            reason = %reason,
            bytes_received = self.state.bytes_received,
            chunks_received = self.state.chunks_received,
            bytes_sent = self.handle.bytes_sent(),
            duration_ms = self.state.duration().as_millis() as u64,
            relaying_ms = self
                .state
                .relaying_duration()
                .map_or(0, |d| d.as_millis() as u64),
            "Connection closed"
        );
    }
}
