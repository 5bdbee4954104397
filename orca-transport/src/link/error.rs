//! Error types for link operations.

use std::io;

use orca_core::NodeId;
use thiserror::Error;

use crate::wire::WireError;

/// Errors that end a connection attempt or an established connection.
#[derive(Error, Debug, Clone)]
pub enum LinkError {
    /// TCP connect did not complete within the configured timeout
    #[error("connection timeout")]
    Timeout,

    /// The remote side closed the connection
    #[error("connection closed by peer")]
    ConnectionLost,

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(String),

    /// The hello exchange failed or timed out
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The byte stream is not valid frames
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// After a reconnect the peer announced a different node id
    #[error("peer identity changed from {expected} to {announced}")]
    IdentityChanged {
        /// Id learned on the first handshake.
        expected: NodeId,
        /// Id announced now.
        announced: NodeId,
    },
}

impl From<io::Error> for LinkError {
    fn from(error: io::Error) -> Self {
        LinkError::Io(error.to_string())
    }
}

/// Result type for link operations.
pub type LinkResult<T> = Result<T, LinkError>;
