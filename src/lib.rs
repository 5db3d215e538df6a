//! chat-relay: broadcast relay over raw TCP byte streams
//!
//! Every chunk of bytes read from one client is forwarded, unmodified, to
//! every other currently connected client. There is no framing and no
//! handshake; a newly accepted client may receive a fixed greeting first.
//!
//! # Example
//! ```no_run
//! use chat_relay::{RelayServer, ServerConfig};
//!
//! # async fn example() -> chat_relay::error::Result<()> {
//! let server = RelayServer::bind(ServerConfig::default()).await?;
//! let shutdown = server.shutdown_handle();
//!
//! tokio::spawn(async move {
//!     let _ = tokio::signal::ctrl_c().await;
//!     shutdown.shutdown();
//! });
//!
//! server.run().await
//! # }
//! ```

pub mod error;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;

pub use error::{Error, Result};
pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, RegistryError};
pub use server::{RelayServer, ServerConfig, ShutdownHandle};
pub use stats::{RelayMetrics, RelayStats};
