//! Links between nodes.
//!
//! A link is one TCP connection to a peer node, wrapped in a task that owns
//! the socket. The node talks to a link only through a [`LinkHandle`]: it
//! hands over mail and never waits on the network.
//!
//! # Handshake
//!
//! ```text
//!   dialer                         acceptor
//!     │ ── Hello(local id) ─────────► │
//!     │ ◄──────────── Hello(its id) ─ │
//!     │       Mail frames both ways   │
//! ```
//!
//! Both sides learn each other's node id, so a node finds out who a peer is
//! whether it dialed out ([`OutboundLink`]) or was dialed into
//! ([`crate::InboundServer`]). Either way the peer ends up in the node's
//! registration path.
//!
//! # Reconnection
//!
//! Outbound links reconnect with exponential backoff:
//! - Initial delay: configurable (default 100ms)
//! - Maximum delay: configurable (default 30s)
//! - Doubling after each consecutive failure
//!
//! Accepted connections do not reconnect; the dialing side owns that.

use std::rc::Rc;

use orca_core::{NodeId, RemoteMail};

/// Configuration structures for link behavior
pub mod config;

/// Connection I/O after the handshake
pub(crate) mod connection;

/// Error types specific to link operations
pub mod error;

/// The node-side handle onto a link
pub mod handle;

/// Counters and connection state
pub mod metrics;

/// Dialing links with reconnection
pub mod outbound;

pub use config::LinkConfig;
pub use error::{LinkError, LinkResult};
pub use handle::{LinkClosed, LinkHandle, LinkMessage, LinkOrigin, LinkOutbox};
pub use metrics::LinkMetrics;
pub use outbound::{OnRegistered, OutboundLink};

/// Called on the loop thread for every mail a connection decodes, with the
/// id of the peer it came from.
pub(crate) type MailCallback<M> = Rc<dyn Fn(NodeId, RemoteMail<M>)>;

/// Called on the loop thread when an accepted connection completes its
/// handshake. The receiver resolves to `true` once the node admits the peer.
pub(crate) type AdmitCallback<M> =
    Rc<dyn Fn(NodeId, LinkHandle<M>) -> tokio::sync::oneshot::Receiver<bool>>;
