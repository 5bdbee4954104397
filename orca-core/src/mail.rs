//! The mail envelope routed between nodes.

use serde::{Deserialize, Serialize};

use crate::types::{Address, Destination, NodeId};

/// An addressed payload on its way to another actor.
///
/// Built by the node's `send` operations and moved by value from then on:
/// the queue owns it, then the link that transmits it, so a sender can never
/// observe the payload again after handing it over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMail<M> {
    from: Address,
    to: Destination,
    payload: M,
}

impl<M> RemoteMail<M> {
    /// Mail to a concrete address.
    pub fn new(from: Address, to: Address, payload: M) -> Self {
        Self {
            from,
            to: Destination::Address(to),
            payload,
        }
    }

    /// Mail to a `(name, node)` pair.
    pub fn named(from: Address, name: impl Into<String>, node: NodeId, payload: M) -> Self {
        Self {
            from,
            to: Destination::Named {
                name: name.into(),
                node,
            },
            payload,
        }
    }

    /// Sender address.
    pub fn sender(&self) -> &Address {
        &self.from
    }

    /// Destination.
    pub fn destination(&self) -> &Destination {
        &self.to
    }

    /// Node the mail must reach.
    pub fn target_node(&self) -> NodeId {
        self.to.node()
    }

    /// Borrow the payload.
    pub fn payload(&self) -> &M {
        &self.payload
    }

    /// Take the payload out of the envelope.
    pub fn into_payload(self) -> M {
        self.payload
    }

    /// Split into `(from, to, payload)`.
    pub fn into_parts(self) -> (Address, Destination, M) {
        (self.from, self.to, self.payload)
    }
}
