//! Connection registry for broadcast routing
//!
//! The registry indexes every live connection by its identifier. It never owns
//! a connection's lifecycle: the relay server registers a connection when it
//! is accepted and deregisters it when it terminates. Broadcasting reads the
//! registry through [`ConnectionRegistry::snapshot_excluding`].
//!
//! # Architecture
//!
//! ```text
//!                       Arc<ConnectionRegistry>
//!                   ┌──────────────────────────────┐
//!                   │ connections: BTreeMap<Id,    │
//!                   │   Arc<ConnectionHandle> {    │
//!                   │     writer: Mutex<Writer>,   │
//!                   │     state, token,            │
//!                   │   }                          │
//!                   │ >                            │
//!                   └──────────────┬───────────────┘
//!                                  │
//!        ┌─────────────────────────┼─────────────────────────┐
//!        │                         │                         │
//!        ▼                         ▼                         ▼
//!   [Connection 1]           [Connection 2]            [Connection 3]
//!   read_buf()                  writer                    writer
//!        │                         ▲                         ▲
//!        └──► snapshot_excluding(1) ──► write_all() ─────────┘
//! ```
//!
//! # Snapshot Design
//!
//! The snapshot is a `Vec` of `Arc` clones taken under the registry lock.
//! The lock is released before any write happens, so a slow destination can
//! stall only the sender that is writing to it, never admission or removal.

pub mod entry;
pub mod error;
pub mod store;

pub use entry::{BoxedWriter, ConnectionHandle, ConnectionId, ConnectionState};
pub use error::RegistryError;
pub use store::ConnectionRegistry;
