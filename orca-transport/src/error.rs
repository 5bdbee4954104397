//! Error types returned across the node's public boundary.
//!
//! Only configuration and startup problems surface here. Duplicate ids and
//! unroutable mail are reported to the node's [`orca_core::ErrorSink`]
//! instead.

use std::io;
use std::net::SocketAddr;

use orca_core::AddressError;

/// Errors from configuring or starting an [`crate::EndPoint`].
#[derive(Debug, thiserror::Error)]
pub enum EndPointError {
    /// Bad address or parameter, or configuration after `run()` started.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        /// What was wrong.
        message: String,
    },

    /// The bind address could not be listened on.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: SocketAddr,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The event loop runtime could not be created.
    #[error("failed to start event loop: {0}")]
    Runtime(#[source] io::Error),
}

impl EndPointError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        EndPointError::InvalidConfiguration {
            message: message.into(),
        }
    }
}

impl From<AddressError> for EndPointError {
    fn from(err: AddressError) -> Self {
        EndPointError::invalid(err.to_string())
    }
}
