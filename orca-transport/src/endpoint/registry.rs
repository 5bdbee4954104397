//! Peer registry and the registration barrier.
//!
//! Maps peer node ids to the link used to reach them. Lives on the loop
//! thread; every mutation goes through [`Registry::register`].
//!
//! Admission rules, by existing entry for the announced id:
//!
//! | existing            | new origin | result                                |
//! |---------------------|------------|---------------------------------------|
//! | (id is local id)    | any        | rejected                              |
//! | none, or closed     | any        | inserted                              |
//! | same origin, open   | same       | rejected                              |
//! | inbound, open       | outbound   | outbound on standby; inbound routes   |
//! | outbound, open      | inbound    | kept; inbound is receive-only         |
//!
//! A peer is reached through one connection at a time, so mail to it stays
//! in order. An outbound link on standby takes over the route once the
//! inbound connection closes ([`Registry::settle`]).
//!
//! The barrier counts peers with an outbound registration, standby
//! included, against the number of configured outbound links. Once
//! complete it stays complete.

use std::collections::{HashMap, HashSet};

use orca_core::NodeId;

use crate::link::{LinkHandle, LinkOrigin};

/// Why a registration was refused. Both cases are duplicate node ids.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(crate) enum Rejection {
    /// A peer announced the local node's own id.
    #[error("peer announced the local node id {0}")]
    LocalId(NodeId),
    /// The id is already registered through an open link of the same origin.
    #[error("node id {0} is already registered")]
    Repeated(NodeId),
}

/// What a successful registration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// New entry.
    Inserted,
    /// Replaced an entry whose link had closed.
    Replaced,
    /// Outbound link parked behind an open inbound route.
    Standby,
    /// An outbound link already serves this peer; registry unchanged.
    Shadowed,
}

struct Entry<M> {
    link: LinkHandle<M>,
    origin: LinkOrigin,
    standby: Option<LinkHandle<M>>,
}

impl<M> Entry<M> {
    fn new(link: LinkHandle<M>, origin: LinkOrigin) -> Self {
        Self {
            link,
            origin,
            standby: None,
        }
    }

    /// Swap in the standby link if the route closed. Returns true if it did.
    fn settle(&mut self) -> bool {
        if !self.link.is_closed() {
            return false;
        }
        match self.standby.take() {
            Some(standby) if !standby.is_closed() => {
                self.link = standby;
                self.origin = LinkOrigin::Outbound;
                true
            }
            _ => false,
        }
    }
}

pub(crate) struct Registry<M> {
    local: NodeId,
    entries: HashMap<NodeId, Entry<M>>,
    expected_outbound: usize,
    outbound: HashSet<NodeId>,
    complete: bool,
}

impl<M> Registry<M> {
    pub(crate) fn new(local: NodeId) -> Self {
        Self {
            local,
            entries: HashMap::new(),
            expected_outbound: 0,
            outbound: HashSet::new(),
            complete: false,
        }
    }

    /// Set the number of outbound registrations that completes the barrier.
    ///
    /// With no outbound links the barrier is complete immediately.
    pub(crate) fn arm(&mut self, expected_outbound: usize) {
        self.expected_outbound = expected_outbound;
        self.update_barrier();
    }

    pub(crate) fn register(
        &mut self,
        peer: NodeId,
        link: LinkHandle<M>,
        origin: LinkOrigin,
    ) -> Result<Admission, Rejection> {
        if peer == self.local {
            return Err(Rejection::LocalId(peer));
        }

        let admission = match self.entries.get_mut(&peer) {
            None => {
                self.entries.insert(peer, Entry::new(link, origin));
                Admission::Inserted
            }
            Some(existing) => {
                existing.settle();
                if existing.link.is_closed() {
                    *existing = Entry::new(link, origin);
                    Admission::Replaced
                } else if existing.origin == origin {
                    return Err(Rejection::Repeated(peer));
                } else if existing.origin == LinkOrigin::Outbound {
                    Admission::Shadowed
                } else if existing.standby.as_ref().is_some_and(|s| !s.is_closed()) {
                    return Err(Rejection::Repeated(peer));
                } else {
                    existing.standby = Some(link);
                    Admission::Standby
                }
            }
        };

        if origin == LinkOrigin::Outbound && admission != Admission::Shadowed {
            self.outbound.insert(peer);
            self.update_barrier();
        }
        Ok(admission)
    }

    fn update_barrier(&mut self) {
        if !self.complete && self.outbound.len() >= self.expected_outbound {
            self.complete = true;
            tracing::info!(
                "node {}: registration complete with {} peers",
                self.local,
                self.entries.len()
            );
        }
    }

    /// Hand routes whose inbound connection closed to their standby link.
    pub(crate) fn settle(&mut self) {
        for (peer, entry) in self.entries.iter_mut() {
            if entry.settle() {
                tracing::info!(
                    "node {}: node {} now routed through {}",
                    self.local,
                    peer,
                    entry.link.peer_addr()
                );
            }
        }
    }

    pub(crate) fn link(&self, peer: NodeId) -> Option<&LinkHandle<M>> {
        self.entries.get(&peer).map(|entry| &entry.link)
    }

    /// Check if some connection from `peer` was ever admitted.
    ///
    /// Receive-only connections are not stored, so a closed route does not
    /// make the peer unknown.
    pub(crate) fn is_admitted(&self, peer: NodeId) -> bool {
        self.entries.contains_key(&peer)
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.complete
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Registered peer ids in ascending order.
    pub(crate) fn peers(&self) -> Vec<NodeId> {
        let mut peers: Vec<NodeId> = self.entries.keys().copied().collect();
        peers.sort_unstable();
        peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkOutbox;

    fn link(name: &str) -> (LinkHandle<u32>, LinkOutbox<u32>) {
        LinkHandle::channel(name)
    }

    #[test]
    fn test_no_outbound_links_means_complete() {
        let mut registry = Registry::<u32>::new(1);
        assert!(!registry.is_complete());
        registry.arm(0);
        assert!(registry.is_complete());
    }

    #[test]
    fn test_barrier_completes_when_all_outbound_registered() {
        let mut registry = Registry::new(1);
        registry.arm(2);
        let (to_two, _outbox_two) = link("two");
        let (to_three, _outbox_three) = link("three");

        assert_eq!(
            registry.register(2, to_two, LinkOrigin::Outbound),
            Ok(Admission::Inserted)
        );
        assert!(!registry.is_complete());
        assert_eq!(
            registry.register(3, to_three, LinkOrigin::Outbound),
            Ok(Admission::Inserted)
        );
        assert!(registry.is_complete());
        assert_eq!(registry.peers(), vec![2, 3]);
    }

    #[test]
    fn test_local_id_is_rejected() {
        let mut registry = Registry::new(1);
        registry.arm(1);
        let (to_self, _outbox) = link("self");

        assert_eq!(
            registry.register(1, to_self, LinkOrigin::Outbound),
            Err(Rejection::LocalId(1))
        );
        assert_eq!(registry.len(), 0);
        assert!(!registry.is_complete());
    }

    #[test]
    fn test_repeat_registration_is_rejected_and_changes_nothing() {
        let mut registry = Registry::new(1);
        registry.arm(1);
        let (first, _outbox_first) = link("first");
        let (second, _outbox_second) = link("second");

        registry
            .register(2, first.clone(), LinkOrigin::Outbound)
            .expect("first");
        assert_eq!(
            registry.register(2, second, LinkOrigin::Outbound),
            Err(Rejection::Repeated(2))
        );
        assert_eq!(registry.len(), 1);
        assert!(registry.link(2).expect("present").same_link(&first));
        assert!(registry.is_complete());
    }

    #[test]
    fn test_latch_never_reverts() {
        let mut registry = Registry::new(1);
        registry.arm(1);
        let (first, _outbox_first) = link("first");
        registry
            .register(2, first, LinkOrigin::Outbound)
            .expect("first");
        assert!(registry.is_complete());

        for attempt in 0..3 {
            let (again, _outbox) = link("again");
            let _ = registry.register(2, again, LinkOrigin::Outbound);
            let (own, _outbox) = link("own");
            let _ = registry.register(1, own, LinkOrigin::Inbound);
            assert!(registry.is_complete(), "reverted on attempt {}", attempt);
        }
    }

    #[test]
    fn test_outbound_waits_behind_open_inbound_route() {
        let mut registry = Registry::new(1);
        registry.arm(1);
        let (inbound, inbound_outbox) = link("in");
        let (outbound, _outbox_out) = link("out");

        assert_eq!(
            registry.register(2, inbound.clone(), LinkOrigin::Inbound),
            Ok(Admission::Inserted)
        );
        assert!(!registry.is_complete());
        assert_eq!(
            registry.register(2, outbound.clone(), LinkOrigin::Outbound),
            Ok(Admission::Standby)
        );
        assert!(registry.is_complete());

        registry.settle();
        assert!(registry.link(2).expect("present").same_link(&inbound));

        drop(inbound_outbox);
        registry.settle();
        assert!(registry.link(2).expect("present").same_link(&outbound));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_second_standby_is_rejected() {
        let mut registry = Registry::new(1);
        registry.arm(1);
        let (inbound, _outbox_in) = link("in");
        let (first, _outbox_first) = link("first");
        let (second, _outbox_second) = link("second");

        registry
            .register(2, inbound, LinkOrigin::Inbound)
            .expect("inbound");
        registry
            .register(2, first, LinkOrigin::Outbound)
            .expect("standby");
        assert_eq!(
            registry.register(2, second, LinkOrigin::Outbound),
            Err(Rejection::Repeated(2))
        );
    }

    #[test]
    fn test_rejected_peer_is_not_admitted() {
        let mut registry = Registry::new(1);
        registry.arm(0);
        let (inbound, outbox) = link("in");
        let (own, _own_outbox) = link("own");
        assert!(!registry.is_admitted(2));

        registry
            .register(2, inbound, LinkOrigin::Inbound)
            .expect("inbound");
        assert!(registry.is_admitted(2));

        drop(outbox);
        assert!(registry.is_admitted(2));

        assert!(registry.register(1, own, LinkOrigin::Inbound).is_err());
        assert!(!registry.is_admitted(1));
    }

    #[test]
    fn test_outbound_then_inbound_is_shadowed() {
        let mut registry = Registry::new(1);
        registry.arm(1);
        let (outbound, _outbox_out) = link("out");
        let (inbound, _outbox_in) = link("in");

        registry
            .register(2, outbound.clone(), LinkOrigin::Outbound)
            .expect("outbound");
        assert_eq!(
            registry.register(2, inbound, LinkOrigin::Inbound),
            Ok(Admission::Shadowed)
        );
        assert!(registry.link(2).expect("present").same_link(&outbound));
    }

    #[test]
    fn test_closed_link_can_be_replaced() {
        let mut registry = Registry::new(1);
        registry.arm(0);
        let (stale, stale_outbox) = link("stale");
        registry
            .register(2, stale, LinkOrigin::Inbound)
            .expect("first");
        drop(stale_outbox);

        let (fresh, _outbox) = link("fresh");
        assert_eq!(
            registry.register(2, fresh.clone(), LinkOrigin::Inbound),
            Ok(Admission::Replaced)
        );
        assert!(registry.link(2).expect("present").same_link(&fresh));
        assert_eq!(registry.len(), 1);
    }
}
