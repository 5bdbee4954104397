//! # Orca Transport Layer
//!
//! Node-level transport for the orca actor framework.
//!
//! This crate provides:
//! - **EndPoint**: one node, its single-threaded event loop and the
//!   registration barrier over its configured peers
//! - **Links**: outbound connections with reconnection, and the inbound
//!   server that accepts peer connections
//! - **Wire format**: length-prefixed frames with CRC32C checksums
//! - **Mail dispatch**: a periodic drain with per-destination FIFO and
//!   bounded retries for peers that have not registered yet

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

use serde::de::DeserializeOwned;
use serde::Serialize;

// Re-export core types for convenience
pub use orca_core::{
    Address, AddressError, Destination, EndPointAddress, ErrorKind, ErrorSink, IpVersion, NodeId,
    RecordingSink, RemoteMail, Report, TracingSink, Uid,
};

// =============================================================================
// Modules
// =============================================================================

/// The node, its event loop and its handle.
pub mod endpoint;

/// Error types for node configuration and startup.
pub mod error;

/// Links between nodes.
pub mod link;

/// Inbound connection acceptor.
pub mod server;

/// Frame format with CRC32C checksums.
pub mod wire;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use endpoint::{
    DrainStats, EndPoint, EndPointConfig, EndPointHandle, LinkStatus, NodeStatus,
    DEFAULT_MAX_DISPATCH_ATTEMPTS, MAIL_PROCESS_PERIOD,
};
pub use error::EndPointError;
pub use link::{
    LinkClosed, LinkConfig, LinkError, LinkHandle, LinkMessage, LinkMetrics, LinkOrigin,
    LinkOutbox, OutboundLink,
};
pub use server::InboundServer;
pub use wire::{Frame, FrameKind, WireError, HEADER_SIZE, MAX_PAYLOAD_SIZE};

/// Payload carried in mail between nodes.
///
/// Blanket-implemented for every serde type that can cross threads.
pub trait Message: Serialize + DeserializeOwned + Send + 'static {}

impl<T> Message for T where T: Serialize + DeserializeOwned + Send + 'static {}
