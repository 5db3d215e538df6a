//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;

/// Port the relay listens on unless told otherwise
pub const DEFAULT_PORT: u16 = 3333;

/// Greeting written to every new connection before relaying starts
pub const DEFAULT_GREETING: &[u8] = b"Welcome to the chat server! \n";

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Read buffer reserved per read; chunks are whatever a read returns
    pub read_buffer_size: usize,

    /// Payload written to a new connection only, before it joins the relay
    pub greeting: Option<Bytes>,

    /// Limit for a single write to one destination (None = wait forever)
    pub write_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_connections: 0, // Unlimited
            tcp_nodelay: true,
            read_buffer_size: 8 * 1024,
            greeting: Some(Bytes::from_static(DEFAULT_GREETING)),
            write_timeout: Some(Duration::from_secs(10)),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    /// Set read buffer size (at least 1 byte)
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Set the greeting sent to new connections
    pub fn greeting(mut self, greeting: impl Into<Bytes>) -> Self {
        self.greeting = Some(greeting.into());
        self
    }

    /// Don't greet new connections
    pub fn disable_greeting(mut self) -> Self {
        self.greeting = None;
        self
    }

    /// Set per-destination write timeout
    pub fn write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }
}
