//! Relay server
//!
//! Owns the accept loop and one task per connection. Each task reads from
//! its socket and writes every chunk to a snapshot of the other connections.

pub mod broadcast;
pub mod config;
pub mod listener;

mod connection;

pub use broadcast::BroadcastOutcome;
pub use config::ServerConfig;
pub use listener::{RelayServer, ShutdownHandle};
