//! The node's view of a link: a non-blocking hand-off into the link's own
//! outbound buffer.

use orca_core::RemoteMail;
use tokio::sync::mpsc;

/// Which side opened the connection behind a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkOrigin {
    /// This node dialed the peer.
    Outbound,
    /// The peer dialed this node.
    Inbound,
}

/// Instruction consumed by the task that owns a connection.
#[derive(Debug)]
pub enum LinkMessage<M> {
    /// Write this mail to the peer.
    Mail(RemoteMail<M>),
    /// Close the connection and stop.
    Close,
}

/// Returned by [`LinkHandle::transmit`] when the link task is gone.
///
/// Carries the mail back so the caller keeps ownership.
#[derive(Debug)]
pub struct LinkClosed<M>(pub RemoteMail<M>);

impl<M> std::fmt::Display for LinkClosed<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "link closed, mail for node {} not sent", self.0.target_node())
    }
}

impl<M: std::fmt::Debug> std::error::Error for LinkClosed<M> {}

/// Sending side of a link.
///
/// Cheap to clone; every clone feeds the same link task. Transmission never
/// waits on the network: the mail is queued for the task, which writes it
/// when the socket allows.
pub struct LinkHandle<M> {
    peer_addr: String,
    tx: mpsc::UnboundedSender<LinkMessage<M>>,
}

impl<M> Clone for LinkHandle<M> {
    fn clone(&self) -> Self {
        Self {
            peer_addr: self.peer_addr.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<M> std::fmt::Debug for LinkHandle<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkHandle")
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<M> LinkHandle<M> {
    /// Create a handle and the outbox its messages land in.
    ///
    /// Whoever holds the [`LinkOutbox`] is the link: the TCP link tasks in
    /// this crate, or any other transport plugged in through
    /// `EndPointHandle::register_peer`.
    pub fn channel(peer_addr: impl Into<String>) -> (Self, LinkOutbox<M>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                peer_addr: peer_addr.into(),
                tx,
            },
            LinkOutbox { rx },
        )
    }

    /// Address of the peer, for logs.
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    /// Hand one mail to the link.
    ///
    /// # Errors
    ///
    /// Returns the mail inside [`LinkClosed`] if the link task has stopped.
    pub fn transmit(&self, mail: RemoteMail<M>) -> Result<(), LinkClosed<M>> {
        self.tx
            .send(LinkMessage::Mail(mail))
            .map_err(|mpsc::error::SendError(message)| match message {
                LinkMessage::Mail(mail) => LinkClosed(mail),
                LinkMessage::Close => unreachable!("transmit only sends mail"),
            })
    }

    /// Ask the link to close its connection.
    pub fn close(&self) {
        let _ = self.tx.send(LinkMessage::Close);
    }

    /// Check if the link task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Check if both handles feed the same link.
    pub fn same_link(&self, other: &LinkHandle<M>) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

/// Receiving side of a link, owned by the task that writes to the socket.
#[derive(Debug)]
pub struct LinkOutbox<M> {
    rx: mpsc::UnboundedReceiver<LinkMessage<M>>,
}

impl<M> LinkOutbox<M> {
    /// Wait for the next message. `None` once every handle is dropped.
    pub async fn recv(&mut self) -> Option<LinkMessage<M>> {
        self.rx.recv().await
    }

    /// Next message if one is queued.
    pub fn try_recv(&mut self) -> Option<LinkMessage<M>> {
        self.rx.try_recv().ok()
    }

    /// Drain every queued mail, skipping close requests.
    pub fn drain_mail(&mut self) -> Vec<RemoteMail<M>> {
        let mut mails = Vec::new();
        while let Some(message) = self.try_recv() {
            if let LinkMessage::Mail(mail) = message {
                mails.push(mail);
            }
        }
        mails
    }
}
