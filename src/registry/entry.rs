//! Connection handle and identifier types
//!
//! This module defines the shared, write-side view of a connection that the
//! registry indexes and broadcasters write into.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// How long `close` waits for an in-flight broadcast write to release the writer
const CLOSE_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

/// Write half of a connection, type-erased so the registry doesn't care
/// whether it sits on a TCP socket or anything else.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Unique identifier for a connection within one server instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Create a connection ID from its raw value
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw value
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a connection as seen by writers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Accepting writes
    Active = 0,
    /// Termination started, writes are skipped
    Closing = 1,
    /// Stream shut down
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Active,
            1 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Shared handle to one accepted connection
///
/// The relay server owns the connection; the registry and in-flight
/// broadcasts hold `Arc` clones of this handle only to write into it.
pub struct ConnectionHandle {
    id: ConnectionId,
    peer_addr: SocketAddr,
    connected_at: Instant,

    /// Serializes writers so chunks from different senders never interleave
    writer: Mutex<BoxedWriter>,

    state: AtomicU8,

    /// Explicit termination signal observed by the connection's read loop
    token: CancellationToken,

    bytes_sent: AtomicU64,
}

impl ConnectionHandle {
    /// Create a new handle around the write half of a stream
    pub fn new(
        id: ConnectionId,
        peer_addr: SocketAddr,
        writer: BoxedWriter,
        token: CancellationToken,
    ) -> Self {
        Self {
            id,
            peer_addr,
            connected_at: Instant::now(),
            writer: Mutex::new(writer),
            state: AtomicU8::new(ConnectionState::Active as u8),
            token,
            bytes_sent: AtomicU64::new(0),
        }
    }

    /// Get the connection ID
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the remote peer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Time since the connection was accepted
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Check if the connection still accepts writes
    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    /// Total bytes written to this connection
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Move from `Active` to `Closing`
    ///
    /// Returns `true` for exactly one caller; every later call returns `false`.
    pub fn begin_close(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Active as u8,
                ConnectionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Ask the owning read loop to terminate this connection
    pub fn terminate(&self) {
        self.token.cancel();
    }

    /// Check if termination has been requested
    pub fn is_terminated(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until termination is requested
    pub async fn terminated(&self) {
        self.token.cancelled().await
    }

    /// Lock the writer for a sequence of writes
    pub(crate) async fn lock_writer(&self) -> MutexGuard<'_, BoxedWriter> {
        self.writer.lock().await
    }

    /// Write a whole chunk to this connection
    ///
    /// Waits for any concurrent writer to finish first. With `timeout` set,
    /// the lock wait and the write together must complete in time or the
    /// call fails with `TimedOut`. A termination request or server shutdown
    /// interrupts the call with `ConnectionAborted`.
    pub async fn send(&self, data: &[u8], timeout: Option<Duration>) -> io::Result<()> {
        if !self.is_active() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection is closing",
            ));
        }

        self.write_guarded(timeout, async {
            let mut writer = self.writer.lock().await;
            write_chunk(&mut writer, data).await
        })
        .await?;

        self.record_sent(data.len());
        Ok(())
    }

    /// Run a write against this connection, bounded by `timeout` and
    /// abandoned as soon as the connection's token is cancelled
    pub(crate) async fn write_guarded<F>(
        &self,
        timeout: Option<Duration>,
        write: F,
    ) -> io::Result<()>
    where
        F: Future<Output = io::Result<()>>,
    {
        let bounded = async move {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, write)
                    .await
                    .unwrap_or_else(|_| {
                        Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out"))
                    }),
                None => write.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "connection terminated",
            )),
            result = bounded => result,
        }
    }

    pub(crate) fn record_sent(&self, len: usize) {
        self.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
    }

    /// Shut down the write side of the stream and mark the handle closed
    ///
    /// Safe to call more than once. If a broadcaster keeps the writer busy
    /// past a short grace period, the stream is left to close when the last
    /// handle clone is dropped.
    pub async fn close(&self) {
        self.state
            .store(ConnectionState::Closing as u8, Ordering::Release);
        self.token.cancel();

        match tokio::time::timeout(CLOSE_LOCK_TIMEOUT, self.writer.lock()).await {
            Ok(mut writer) => {
                if let Err(e) = writer.shutdown().await {
                    tracing::trace!(connection_id = %self.id, error = %e, "Writer shutdown failed");
                }
            }
            Err(_) => {
                tracing::debug!(connection_id = %self.id, "Writer busy, deferring close to drop");
            }
        }

        self.state.store(ConnectionState::Closed as u8, Ordering::Release);
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .field("bytes_sent", &self.bytes_sent())
            .finish_non_exhaustive()
    }
}

/// Write and flush one chunk into an already locked writer
pub(crate) async fn write_chunk(writer: &mut BoxedWriter, data: &[u8]) -> io::Result<()> {
    writer.write_all(data).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_test::io::Builder;

    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_send_writes_whole_chunk() {
        let mock = Builder::new().write(b"hello").build();
        let handle = ConnectionHandle::new(
            ConnectionId::new(1),
            addr(),
            Box::new(mock),
            CancellationToken::new(),
        );

        handle.send(b"hello", None).await.unwrap();

        assert_eq!(handle.bytes_sent(), 5);
        assert!(handle.is_active());
    }

    #[tokio::test]
    async fn test_send_propagates_write_error() {
        let mock = Builder::new()
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            .build();
        let handle = ConnectionHandle::new(
            ConnectionId::new(1),
            addr(),
            Box::new(mock),
            CancellationToken::new(),
        );

        let err = handle.send(b"hello", None).await.unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(handle.bytes_sent(), 0);
    }

    #[tokio::test]
    async fn test_terminate_interrupts_stalled_send() {
        let handle = Arc::new(ConnectionHandle::new(
            ConnectionId::new(1),
            addr(),
            Box::new(tokio::io::sink()),
            CancellationToken::new(),
        ));

        // Another writer holds the lock and never lets go
        let _guard = handle.lock_writer().await;

        let terminator = Arc::clone(&handle);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            terminator.terminate();
        });

        let result = tokio::time::timeout(Duration::from_secs(5), handle.send(b"stuck", None))
            .await
            .expect("send was not interrupted");

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::ConnectionAborted);
        assert_eq!(handle.bytes_sent(), 0);
    }

    #[tokio::test]
    async fn test_begin_close_only_once() {
        let handle = ConnectionHandle::new(
            ConnectionId::new(1),
            addr(),
            Box::new(tokio::io::sink()),
            CancellationToken::new(),
        );

        assert!(handle.begin_close());
        assert!(!handle.begin_close());
        assert_eq!(handle.state(), ConnectionState::Closing);
    }

    #[tokio::test]
    async fn test_send_after_close_is_rejected() {
        let handle = ConnectionHandle::new(
            ConnectionId::new(1),
            addr(),
            Box::new(tokio::io::sink()),
            CancellationToken::new(),
        );

        handle.close().await;
        handle.close().await;

        assert_eq!(handle.state(), ConnectionState::Closed);
        assert!(handle.is_terminated());

        let err = handle.send(b"late", None).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn test_terminate_wakes_waiter() {
        let token = CancellationToken::new();
        let handle = ConnectionHandle::new(
            ConnectionId::new(3),
            addr(),
            Box::new(tokio::io::sink()),
            token.clone(),
        );

        handle.terminate();
        handle.terminated().await;

        assert!(token.is_cancelled());
        // Termination is a request; the state only changes when the owner closes.
        assert!(handle.is_active());
    }

    #[test]
    fn test_connection_id_ordering() {
        assert!(ConnectionId::new(1) < ConnectionId::new(2));
        assert_eq!(ConnectionId::new(42).get(), 42);
        assert_eq!(ConnectionId::new(42).to_string(), "42");
    }
}
