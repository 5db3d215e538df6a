//! Registry error types

use super::entry::ConnectionId;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A connection with this identifier is already registered
    DuplicateIdentifier(ConnectionId),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::DuplicateIdentifier(id) => {
                write!(f, "Duplicate connection identifier: {}", id)
            }
        }
    }
}

impl std::error::Error for RegistryError {}
