//! The node's only cross-thread entry point.
//!
//! Every public operation that touches node state becomes a [`Command`]
//! posted into the loop's channel. Posting never blocks; the loop applies
//! commands in the order each sender posted them.

use std::net::SocketAddr;

use orca_core::{Address, NodeId, RemoteMail};
use tokio::sync::{mpsc, oneshot};

use crate::link::{LinkHandle, LinkMetrics, LinkOrigin};

/// Work posted to the loop thread.
pub(crate) enum Command<M> {
    /// Append one mail to the queue.
    Enqueue(RemoteMail<M>),
    /// A link learned its peer's id. `verdict`, if any, learns whether the
    /// peer was admitted.
    Register {
        peer: NodeId,
        link: LinkHandle<M>,
        origin: LinkOrigin,
        verdict: Option<oneshot::Sender<bool>>,
    },
    /// A connection decoded a mail from `peer`.
    Inbound { peer: NodeId, mail: RemoteMail<M> },
    /// Report the node's state.
    Status(oneshot::Sender<NodeStatus>),
    /// Stop the loop.
    Shutdown,
}

impl<M> std::fmt::Debug for Command<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Enqueue(mail) => write!(f, "Enqueue(to {})", mail.destination()),
            Command::Register { peer, origin, .. } => {
                write!(f, "Register({} via {:?})", peer, origin)
            }
            Command::Inbound { peer, .. } => write!(f, "Inbound(from {})", peer),
            Command::Status(_) => f.write_str("Status"),
            Command::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// State of one outbound link.
#[derive(Debug, Clone)]
pub struct LinkStatus {
    /// Configured peer address.
    pub peer: String,
    /// Link counters at the time of the query.
    pub metrics: LinkMetrics,
}

/// Snapshot of a running node.
#[derive(Debug, Clone)]
pub struct NodeStatus {
    /// Local node id.
    pub id: NodeId,
    /// Registered peer ids, ascending.
    pub registered_peers: Vec<NodeId>,
    /// Whether every configured outbound link has registered.
    pub registration_complete: bool,
    /// Mails waiting in the queue.
    pub queued_mail: usize,
    /// Address the inbound server listens on.
    pub listen_addr: Option<SocketAddr>,
    /// One entry per configured outbound link.
    pub links: Vec<LinkStatus>,
}

/// Thread-safe handle onto an [`crate::EndPoint`].
///
/// Cheap to clone and `Send`. Every method returns immediately; the work
/// happens later on the node's loop thread.
pub struct EndPointHandle<M> {
    id: NodeId,
    commands: mpsc::UnboundedSender<Command<M>>,
}

impl<M> Clone for EndPointHandle<M> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            commands: self.commands.clone(),
        }
    }
}

impl<M> std::fmt::Debug for EndPointHandle<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndPointHandle")
            .field("id", &self.id)
            .field("stopped", &self.commands.is_closed())
            .finish()
    }
}

impl<M> EndPointHandle<M> {
    pub(crate) fn new(id: NodeId, commands: mpsc::UnboundedSender<Command<M>>) -> Self {
        Self { id, commands }
    }

    /// Local node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Send `message` to a concrete address.
    pub fn send(&self, message: M, from: Address, destination: Address) {
        self.append_mail(RemoteMail::new(from, destination, message));
    }

    /// Send `message` to the actor registered as `name` on node `node`.
    pub fn send_named(&self, message: M, from: Address, name: impl Into<String>, node: NodeId) {
        self.append_mail(RemoteMail::named(from, name, node, message));
    }

    /// Queue an already built mail.
    pub fn append_mail(&self, mail: RemoteMail<M>) {
        self.post(Command::Enqueue(mail));
    }

    /// Register `link` as the route to `peer`.
    ///
    /// This is the path an outbound link takes after its handshake. A
    /// rejected registration is reported as `DuplicateNodeId` and the link
    /// is asked to close.
    pub fn register_peer(&self, peer: NodeId, link: LinkHandle<M>) {
        self.post(Command::Register {
            peer,
            link,
            origin: LinkOrigin::Outbound,
            verdict: None,
        });
    }

    /// Ask the node to stop; `run()` returns once every task is done.
    pub fn shutdown(&self) {
        self.post(Command::Shutdown);
    }

    /// Query the node's state.
    ///
    /// Returns `None` if the loop has stopped.
    pub async fn status(&self) -> Option<NodeStatus> {
        let (tx, rx) = oneshot::channel();
        self.post(Command::Status(tx));
        rx.await.ok()
    }

    pub(crate) fn post(&self, command: Command<M>) {
        if let Err(mpsc::error::SendError(command)) = self.commands.send(command) {
            tracing::debug!("node {}: loop stopped, dropping {:?}", self.id, command);
        }
    }
}
