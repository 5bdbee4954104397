//! Pending mail and the per-tick drain.
//!
//! Each tick drains exactly what was queued when it started. For every
//! mail:
//!
//! 1. destination node is the local node: delivered locally;
//! 2. destination node registered and its link open: handed to the link;
//! 3. otherwise: kept for the next tick, until it has waited
//!    `max_attempts` ticks, then dropped with one `UnroutableMail` report.
//!
//! Once a mail to some node is kept, every later mail to that node in the
//! same tick is kept behind it, so per-destination order survives retries.

use std::collections::{HashSet, VecDeque};

use orca_core::{ErrorKind, ErrorSink, NodeId, RemoteMail};

use super::registry::Registry;
use crate::link::LinkClosed;

struct Pending<M> {
    mail: RemoteMail<M>,
    attempts: u32,
}

/// Counters for one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Mails handed to a link.
    pub transmitted: usize,
    /// Mails delivered to this node's inbox.
    pub delivered_locally: usize,
    /// Mails kept for a later tick.
    pub deferred: usize,
    /// Mails dropped as unroutable.
    pub dropped: usize,
}

pub(crate) struct MailQueue<M> {
    pending: VecDeque<Pending<M>>,
    max_attempts: u32,
}

impl<M> MailQueue<M> {
    pub(crate) fn new(max_attempts: u32) -> Self {
        Self {
            pending: VecDeque::new(),
            max_attempts: max_attempts.max(1),
        }
    }

    pub(crate) fn push(&mut self, mail: RemoteMail<M>) {
        self.pending.push_back(Pending { mail, attempts: 0 });
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn drain(
        &mut self,
        local: NodeId,
        registry: &Registry<M>,
        mut deliver_local: impl FnMut(RemoteMail<M>),
        sink: &dyn ErrorSink,
    ) -> DrainStats {
        let mut stats = DrainStats::default();
        let batch = std::mem::take(&mut self.pending);
        let mut kept: VecDeque<Pending<M>> = VecDeque::with_capacity(batch.len());
        let mut blocked: HashSet<NodeId> = HashSet::new();

        for Pending { mail, attempts } in batch {
            let target = mail.target_node();
            if target == local {
                deliver_local(mail);
                stats.delivered_locally += 1;
                continue;
            }

            let unsent = if blocked.contains(&target) {
                Some(mail)
            } else {
                match registry.link(target) {
                    Some(link) => match link.transmit(mail) {
                        Ok(()) => None,
                        Err(LinkClosed(mail)) => Some(mail),
                    },
                    None => Some(mail),
                }
            };

            let Some(mail) = unsent else {
                stats.transmitted += 1;
                continue;
            };

            blocked.insert(target);
            let attempts = attempts + 1;
            if attempts >= self.max_attempts {
                sink.report(
                    ErrorKind::UnroutableMail,
                    &format!(
                        "node {}: dropping mail from {} to {} after {} ticks without a route",
                        local,
                        mail.sender(),
                        mail.destination(),
                        attempts
                    ),
                );
                stats.dropped += 1;
            } else {
                kept.push_back(Pending { mail, attempts });
                stats.deferred += 1;
            }
        }

        // Anything pushed during the drain goes after the retained mail.
        kept.append(&mut self.pending);
        self.pending = kept;
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{LinkHandle, LinkOrigin, LinkOutbox};
    use orca_core::{Address, RecordingSink};

    fn mail(to: NodeId, n: u32) -> RemoteMail<u32> {
        RemoteMail::named(Address::actor(1, "src"), "svc", to, n)
    }

    fn registered(peers: &[NodeId]) -> (Registry<u32>, Vec<LinkOutbox<u32>>) {
        let mut registry = Registry::new(1);
        registry.arm(peers.len());
        let mut outboxes = Vec::new();
        for &peer in peers {
            let (handle, outbox) = LinkHandle::channel(format!("node-{}", peer));
            registry
                .register(peer, handle, LinkOrigin::Outbound)
                .expect("register");
            outboxes.push(outbox);
        }
        (registry, outboxes)
    }

    fn payloads(outbox: &mut LinkOutbox<u32>) -> Vec<u32> {
        outbox
            .drain_mail()
            .into_iter()
            .map(RemoteMail::into_payload)
            .collect()
    }

    #[test]
    fn test_fifo_per_destination() {
        let (registry, mut outboxes) = registered(&[2, 3]);
        let sink = RecordingSink::new();
        let mut queue = MailQueue::new(5);
        for n in 0..4 {
            queue.push(mail(2, n));
            queue.push(mail(3, 100 + n));
        }

        let stats = queue.drain(1, &registry, |_| {}, &sink);

        assert_eq!(stats.transmitted, 8);
        assert_eq!(payloads(&mut outboxes[0]), vec![0, 1, 2, 3]);
        assert_eq!(payloads(&mut outboxes[1]), vec![100, 101, 102, 103]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_local_destination_is_delivered_locally() {
        let (registry, _outboxes) = registered(&[]);
        let sink = RecordingSink::new();
        let mut queue = MailQueue::new(5);
        queue.push(mail(1, 42));

        let mut local = Vec::new();
        let stats = queue.drain(1, &registry, |m| local.push(m.into_payload()), &sink);

        assert_eq!(stats.delivered_locally, 1);
        assert_eq!(local, vec![42]);
    }

    #[test]
    fn test_unregistered_destination_is_dropped_after_bound() {
        let (registry, _outboxes) = registered(&[]);
        let sink = RecordingSink::new();
        let mut queue = MailQueue::new(3);
        queue.push(mail(9, 1));

        for tick in 1..=2 {
            let stats = queue.drain(1, &registry, |_| {}, &sink);
            assert_eq!(stats.deferred, 1, "tick {}", tick);
            assert_eq!(sink.count(ErrorKind::UnroutableMail), 0);
        }

        let stats = queue.drain(1, &registry, |_| {}, &sink);
        assert_eq!(stats.dropped, 1);
        assert_eq!(queue.len(), 0);
        assert_eq!(sink.count(ErrorKind::UnroutableMail), 1);

        let stats = queue.drain(1, &registry, |_| {}, &sink);
        assert_eq!(stats, DrainStats::default());
        assert_eq!(sink.count(ErrorKind::UnroutableMail), 1);
    }

    #[test]
    fn test_deferred_mail_goes_out_once_peer_registers() {
        let sink = RecordingSink::new();
        let mut queue = MailQueue::new(10);
        queue.push(mail(2, 1));
        queue.push(mail(2, 2));

        let mut registry = Registry::new(1);
        registry.arm(1);
        let stats = queue.drain(1, &registry, |_| {}, &sink);
        assert_eq!(stats.deferred, 2);

        queue.push(mail(2, 3));
        let (handle, mut outbox) = LinkHandle::channel("node-2");
        registry
            .register(2, handle, LinkOrigin::Outbound)
            .expect("register");

        let stats = queue.drain(1, &registry, |_| {}, &sink);
        assert_eq!(stats.transmitted, 3);
        assert_eq!(payloads(&mut outbox), vec![1, 2, 3]);
        assert_eq!(sink.count(ErrorKind::UnroutableMail), 0);
    }

    #[test]
    fn test_closed_link_defers_and_blocks_later_mail() {
        let (registry, mut outboxes) = registered(&[2]);
        let closed = outboxes.remove(0);
        drop(closed);

        let sink = RecordingSink::new();
        let mut queue = MailQueue::new(4);
        queue.push(mail(2, 1));
        queue.push(mail(2, 2));

        let stats = queue.drain(1, &registry, |_| {}, &sink);
        assert_eq!(stats.transmitted, 0);
        assert_eq!(stats.deferred, 2);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_zero_bound_still_tries_once() {
        let (registry, _outboxes) = registered(&[]);
        let sink = RecordingSink::new();
        let mut queue = MailQueue::new(0);
        queue.push(mail(9, 1));

        let stats = queue.drain(1, &registry, |_| {}, &sink);
        assert_eq!(stats.dropped, 1);
        assert_eq!(sink.count(ErrorKind::UnroutableMail), 1);
    }
}
