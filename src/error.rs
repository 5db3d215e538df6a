//! Error types
//!
//! Only listener-level failures surface as errors. Everything that happens to
//! a single connection ends that connection's lifecycle and is reported as a
//! [`TerminationReason`](crate::session::TerminationReason) instead.

use crate::registry::RegistryError;

/// Error type for relay server operations
#[derive(Debug)]
pub enum Error {
    /// Socket level failure (bind, accept, configure)
    Io(std::io::Error),
    /// Registry refused an operation
    Registry(RegistryError),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Registry(e) => write!(f, "Registry error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Registry(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::Registry(e)
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;
