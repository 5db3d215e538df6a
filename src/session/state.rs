//! Connection state machine
//!
//! Tracks one connection from accept to close:
//! `Accepted → Registered → Relaying → Terminating → Closed`.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::registry::ConnectionId;

/// Connection lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// TCP accepted, not yet in the registry
    Accepted,
    /// Registered, greeting not yet sent
    Registered,
    /// Reading and broadcasting
    Relaying,
    /// Leaving the registry and closing the stream
    Terminating,
    /// Stream closed
    Closed,
}

/// Why a connection left the `Relaying` phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Peer closed its side cleanly
    EndOfStream,
    /// Reading from the peer failed
    ReadFailed,
    /// Writing to this connection failed (greeting)
    WriteFailed,
    /// Termination was requested after a broadcast write to this connection failed
    Terminated,
    /// Server is shutting down
    Shutdown,
    /// Registration was refused
    Rejected,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TerminationReason::EndOfStream => "end of stream",
            TerminationReason::ReadFailed => "read failed",
            TerminationReason::WriteFailed => "write failed",
            TerminationReason::Terminated => "terminated",
            TerminationReason::Shutdown => "server shutdown",
            TerminationReason::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Per-connection state owned by the connection's read loop
#[derive(Debug)]
pub struct SessionState {
    /// Connection ID
    pub id: ConnectionId,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// Current phase
    pub phase: SessionPhase,

    /// Accept time
    pub connected_at: Instant,

    /// Time relaying started
    pub relaying_since: Option<Instant>,

    /// Bytes read from the peer
    pub bytes_received: u64,

    /// Chunks read from the peer
    pub chunks_received: u64,

    /// Set once when termination starts
    pub termination: Option<TerminationReason>,
}

impl SessionState {
    /// Create state for a freshly accepted connection
    pub fn new(id: ConnectionId, peer_addr: SocketAddr) -> Self {
        Self {
            id,
            peer_addr,
            phase: SessionPhase::Accepted,
            connected_at: Instant::now(),
            relaying_since: None,
            bytes_received: 0,
            chunks_received: 0,
            termination: None,
        }
    }

    /// Registration succeeded
    pub fn register(&mut self) {
        if self.phase == SessionPhase::Accepted {
            self.phase = SessionPhase::Registered;
        }
    }

    /// Enter the read loop
    pub fn start_relaying(&mut self) {
        if self.phase == SessionPhase::Registered {
            self.phase = SessionPhase::Relaying;
            self.relaying_since = Some(Instant::now());
        }
    }

    /// Account for one inbound chunk
    pub fn on_chunk(&mut self, len: usize) {
        self.chunks_received += 1;
        self.bytes_received += len as u64;
    }

    /// Start termination
    ///
    /// Returns `false` if termination already started or the connection never
    /// got registered; the first reason wins.
    pub fn terminate(&mut self, reason: TerminationReason) -> bool {
        match self.phase {
            SessionPhase::Registered | SessionPhase::Relaying => {
                self.phase = SessionPhase::Terminating;
                self.termination = Some(reason);
                true
            }
            _ => false,
        }
    }

    /// Abort before registration, skipping straight to `Closed`
    pub fn abort(&mut self, reason: TerminationReason) {
        if self.phase == SessionPhase::Accepted {
            self.phase = SessionPhase::Closed;
            self.termination = Some(reason);
        }
    }

    /// Finish termination
    pub fn close(&mut self) {
        if self.phase == SessionPhase::Terminating {
            self.phase = SessionPhase::Closed;
        }
    }

    /// Time since accept
    pub fn duration(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Time spent in the read loop, if it was ever entered
    pub fn relaying_duration(&self) -> Option<Duration> {
        self.relaying_since.map(|since| since.elapsed())
    }

    /// Check if the read loop is running
    pub fn is_relaying(&self) -> bool {
        self.phase == SessionPhase::Relaying
    }

    /// Check if the connection reached its final phase
    pub fn is_closed(&self) -> bool {
        self.phase == SessionPhase::Closed
    }
}
