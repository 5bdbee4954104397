//! # orca-core
//!
//! Value types shared by every part of an orca node.
//!
//! - **Addressing**: [`NodeId`], [`EndPointAddress`], [`Address`], [`Destination`]
//! - **Mail**: [`RemoteMail`], the envelope routed between nodes
//! - **Reports**: [`ErrorSink`] and the [`ErrorKind`]s a node reports instead
//!   of failing a call
//!
//! The transport itself (links, server, the node event loop) lives in
//! `orca-transport`.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod mail;
mod report;
mod types;

pub use mail::RemoteMail;
pub use report::{ErrorKind, ErrorSink, RecordingSink, Report, TracingSink};
pub use types::{Address, AddressError, Destination, EndPointAddress, IpVersion, NodeId, Uid};
