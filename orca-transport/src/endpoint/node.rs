//! Node state owned by the loop thread.
//!
//! Nothing here is shared: the loop task owns one [`Node`] and feeds it
//! commands and timer ticks one at a time.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::rc::Rc;
use std::sync::Arc;

use orca_core::{ErrorKind, ErrorSink, NodeId, RemoteMail};
use tokio::sync::mpsc;

use super::command::{Command, LinkStatus, NodeStatus};
use super::mailbox::{DrainStats, MailQueue};
use super::registry::{Admission, Registry};
use crate::link::{LinkHandle, LinkMetrics, LinkOrigin};

pub(crate) struct Node<M> {
    id: NodeId,
    registry: Registry<M>,
    queue: MailQueue<M>,
    inbox: mpsc::UnboundedSender<RemoteMail<M>>,
    sink: Arc<dyn ErrorSink>,
    listen_addr: Option<SocketAddr>,
    links: Vec<(String, Rc<RefCell<LinkMetrics>>)>,
}

impl<M> Node<M> {
    pub(crate) fn new(
        id: NodeId,
        max_dispatch_attempts: u32,
        inbox: mpsc::UnboundedSender<RemoteMail<M>>,
        sink: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            id,
            registry: Registry::new(id),
            queue: MailQueue::new(max_dispatch_attempts),
            inbox,
            sink,
            listen_addr: None,
            links: Vec::new(),
        }
    }

    /// Arm the registration barrier for `outbound` configured links.
    pub(crate) fn arm(&mut self, outbound: usize) {
        self.registry.arm(outbound);
    }

    pub(crate) fn set_listen_addr(&mut self, addr: SocketAddr) {
        self.listen_addr = Some(addr);
    }

    pub(crate) fn watch_link(&mut self, peer: String, metrics: Rc<RefCell<LinkMetrics>>) {
        self.links.push((peer, metrics));
    }

    /// Apply one command. `Break` means the loop should stop.
    pub(crate) fn apply(&mut self, command: Command<M>) -> ControlFlow<()> {
        match command {
            Command::Enqueue(mail) => self.queue.push(mail),
            Command::Register {
                peer,
                link,
                origin,
                verdict,
            } => {
                let admitted = self.register(peer, link, origin);
                if let Some(verdict) = verdict {
                    // The connection may already be gone.
                    let _ = verdict.send(admitted);
                }
            }
            Command::Inbound { peer, mail } => self.receive(peer, mail),
            Command::Status(reply) => {
                // The caller may have stopped waiting.
                let _ = reply.send(self.status());
            }
            Command::Shutdown => {
                tracing::info!("node {}: shutdown requested", self.id);
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn register(&mut self, peer: NodeId, link: LinkHandle<M>, origin: LinkOrigin) -> bool {
        let peer_addr = link.peer_addr().to_string();
        match self.registry.register(peer, link.clone(), origin) {
            Ok(Admission::Shadowed) => {
                tracing::debug!(
                    "node {}: inbound connection from node {} at {} is receive-only",
                    self.id,
                    peer,
                    peer_addr
                );
                true
            }
            Ok(Admission::Standby) => {
                tracing::debug!(
                    "node {}: link to node {} at {} waits for the inbound route to close",
                    self.id,
                    peer,
                    peer_addr
                );
                true
            }
            Ok(admission) => {
                tracing::info!(
                    "node {}: registered node {} at {} ({:?}, {:?})",
                    self.id,
                    peer,
                    peer_addr,
                    origin,
                    admission
                );
                true
            }
            Err(rejection) => {
                self.sink.report(
                    ErrorKind::DuplicateNodeId,
                    &format!("node {}: {} (connection {})", self.id, rejection, peer_addr),
                );
                link.close();
                false
            }
        }
    }

    fn receive(&mut self, peer: NodeId, mail: RemoteMail<M>) {
        let target = mail.target_node();
        if !self.registry.is_admitted(peer) {
            tracing::warn!(
                "node {}: dropping mail for {} from node {}, which is not admitted",
                self.id,
                mail.destination(),
                peer
            );
        } else if target == self.id {
            tracing::debug!(
                "node {}: mail from node {} for {}",
                self.id,
                peer,
                mail.destination()
            );
            deliver_local(self.id, &self.inbox, mail);
        } else {
            self.sink.report(
                ErrorKind::UnroutableMail,
                &format!(
                    "node {}: node {} sent mail for node {}, dropping it",
                    self.id, peer, target
                ),
            );
        }
    }

    /// One timer tick.
    pub(crate) fn process_mail(&mut self) -> DrainStats {
        self.registry.settle();
        let id = self.id;
        let inbox = &self.inbox;
        let stats = self.queue.drain(
            id,
            &self.registry,
            |mail| deliver_local(id, inbox, mail),
            self.sink.as_ref(),
        );
        if stats != DrainStats::default() {
            tracing::debug!("node {}: drained mail {:?}", id, stats);
        }
        stats
    }

    pub(crate) fn status(&self) -> NodeStatus {
        NodeStatus {
            id: self.id,
            registered_peers: self.registry.peers(),
            registration_complete: self.registry.is_complete(),
            queued_mail: self.queue.len(),
            listen_addr: self.listen_addr,
            links: self
                .links
                .iter()
                .map(|(peer, metrics)| LinkStatus {
                    peer: peer.clone(),
                    metrics: metrics.borrow().clone(),
                })
                .collect(),
        }
    }
}

fn deliver_local<M>(
    id: NodeId,
    inbox: &mpsc::UnboundedSender<RemoteMail<M>>,
    mail: RemoteMail<M>,
) {
    if let Err(mpsc::error::SendError(mail)) = inbox.send(mail) {
        tracing::debug!(
            "node {}: inbox closed, discarding mail for {}",
            id,
            mail.destination()
        );
    }
}
