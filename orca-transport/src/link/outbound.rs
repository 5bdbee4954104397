//! Outbound links: one dialed connection per configured peer.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use orca_core::{EndPointAddress, NodeId};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::config::LinkConfig;
use super::connection::{dial_handshake, drive_connection, ConnectionEnd, ConnectionIo};
use super::error::{LinkError, LinkResult};
use super::handle::{LinkHandle, LinkOutbox};
use super::metrics::LinkMetrics;
use super::MailCallback;
use crate::Message;

/// One-shot continuation run after the first successful handshake.
pub type OnRegistered<M> = Box<dyn FnOnce(NodeId, LinkHandle<M>) + Send>;

/// What a link task needs from the node that starts it.
pub(crate) struct LinkContext<M> {
    pub(crate) local: NodeId,
    pub(crate) config: LinkConfig,
    pub(crate) on_mail: MailCallback<M>,
    pub(crate) shutdown: watch::Receiver<bool>,
}

/// A configured connection to one peer node.
///
/// The [`LinkHandle`] exists from construction, so mail handed to the link
/// before it connects waits in its outbox and goes out once the handshake
/// is done. The link dials, announces the local id, learns the peer's id
/// and reports it once through the registration continuation. After a
/// lost connection it reconnects with exponential backoff.
pub struct OutboundLink<M> {
    peer: EndPointAddress,
    socket_addr: SocketAddr,
    handle: LinkHandle<M>,
    outbox: LinkOutbox<M>,
    on_registered: Option<OnRegistered<M>>,
}

impl<M: Message> OutboundLink<M> {
    /// Configure a link to `peer`.
    ///
    /// # Errors
    ///
    /// Returns error if the address is malformed or has port 0.
    pub fn new(peer: EndPointAddress) -> Result<Self, orca_core::AddressError> {
        let socket_addr = peer.dialable()?;
        let (handle, outbox) = LinkHandle::channel(peer.to_string());
        Ok(Self {
            peer,
            socket_addr,
            handle,
            outbox,
            on_registered: None,
        })
    }

    /// Configured peer address.
    pub fn peer(&self) -> &EndPointAddress {
        &self.peer
    }

    /// A handle feeding this link.
    pub fn handle(&self) -> LinkHandle<M> {
        self.handle.clone()
    }

    /// Set the continuation invoked once the peer's id is known.
    pub fn set_on_registered(
        &mut self,
        callback: impl FnOnce(NodeId, LinkHandle<M>) + Send + 'static,
    ) {
        self.on_registered = Some(Box::new(callback));
    }

    /// Start connecting on the current `LocalSet`.
    ///
    /// Returns the task handle and the link's live metrics.
    pub(crate) fn connect(
        self,
        ctx: LinkContext<M>,
    ) -> (JoinHandle<()>, Rc<RefCell<LinkMetrics>>) {
        let metrics = Rc::new(RefCell::new(LinkMetrics::new()));
        let task = tokio::task::spawn_local(link_task(self, ctx, metrics.clone()));
        (task, metrics)
    }
}

/// Dial, handshake, drive; repeat until shutdown or the failure limit.
async fn link_task<M: Message>(
    link: OutboundLink<M>,
    ctx: LinkContext<M>,
    metrics: Rc<RefCell<LinkMetrics>>,
) {
    let OutboundLink {
        peer,
        socket_addr,
        handle,
        mut outbox,
        mut on_registered,
    } = link;
    let LinkContext {
        local,
        config,
        on_mail,
        mut shutdown,
    } = ctx;

    let mut unsent: VecDeque<Vec<u8>> = VecDeque::new();
    let mut known_peer: Option<NodeId> = None;
    let mut delay = config.initial_reconnect_delay;
    let mut failures: u32 = 0;

    tracing::info!("link to {}: starting", peer);

    loop {
        metrics.borrow_mut().record_connection_attempt();
        let attempt = tokio::select! {
            _ = shutdown.changed() => break,
            result = establish(socket_addr, local, &config) => result,
        };

        let checked = attempt.and_then(|(stream, announced, buffer)| match known_peer {
            Some(expected) if expected != announced => Err(LinkError::IdentityChanged {
                expected,
                announced,
            }),
            _ => Ok((stream, announced, buffer)),
        });

        match checked {
            Ok((stream, peer_id, buffer)) => {
                failures = 0;
                delay = config.initial_reconnect_delay;
                metrics.borrow_mut().record_connection_success();
                tracing::info!("link to {}: connected to node {}", peer, peer_id);

                if known_peer.is_none() {
                    known_peer = Some(peer_id);
                    if let Some(callback) = on_registered.take() {
                        callback(peer_id, handle.clone());
                    }
                }

                let end = drive_connection(
                    stream,
                    buffer,
                    ConnectionIo {
                        peer: peer_id,
                        outbox: &mut outbox,
                        unsent: &mut unsent,
                        on_mail: &on_mail,
                        shutdown: &mut shutdown,
                        metrics: &metrics,
                    },
                )
                .await;

                match end {
                    ConnectionEnd::Closed => break,
                    ConnectionEnd::Lost(e) => {
                        metrics.borrow_mut().record_connection_lost();
                        tracing::warn!(
                            "link to {}: connection lost ({}), {} frames pending",
                            peer,
                            e,
                            unsent.len()
                        );
                    }
                }
            }
            Err(e) => {
                failures += 1;
                delay = backoff_after(&config, failures, delay);
                metrics.borrow_mut().record_connection_failure(delay);
                tracing::debug!(
                    "link to {}: attempt {} failed: {}, retrying in {:?}",
                    peer,
                    failures,
                    e,
                    delay
                );

                if let Some(max) = config.max_connection_failures {
                    if failures >= max {
                        tracing::warn!("link to {}: giving up after {} failures", peer, failures);
                        break;
                    }
                }
            }
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    metrics.borrow_mut().is_connected = false;
    tracing::info!("link to {}: stopped", peer);
}

/// Connect with timeout, then run the dialer handshake.
async fn establish(
    addr: SocketAddr,
    local: NodeId,
    config: &LinkConfig,
) -> LinkResult<(TcpStream, NodeId, Vec<u8>)> {
    let mut stream = tokio::time::timeout(config.connection_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| LinkError::Timeout)??;
    stream.set_nodelay(true)?;
    let (peer, buffer) = dial_handshake(&mut stream, local, config.handshake_timeout).await?;
    Ok((stream, peer, buffer))
}

/// Delay before the next attempt after `failures` consecutive failures.
fn backoff_after(config: &LinkConfig, failures: u32, previous: Duration) -> Duration {
    if failures <= 1 {
        config.initial_reconnect_delay
    } else {
        config.next_delay(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orca_core::{Address, RemoteMail};

    #[test]
    fn test_new_rejects_undialable_address() {
        assert!(OutboundLink::<u32>::new(EndPointAddress::v4("127.0.0.1", 0)).is_err());
        assert!(OutboundLink::<u32>::new(EndPointAddress::v6("127.0.0.1", 80)).is_err());
        assert!(OutboundLink::<u32>::new(EndPointAddress::v4("127.0.0.1", 80)).is_ok());
    }

    #[test]
    fn test_mail_waits_in_outbox_before_connect() {
        let mut link =
            OutboundLink::<u32>::new(EndPointAddress::v4("127.0.0.1", 4500)).expect("link");
        link.handle()
            .transmit(RemoteMail::named(Address::actor(1, "a"), "svc", 2, 7))
            .expect("open");
        let queued = link.outbox.drain_mail();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].payload(), &7);
    }

    #[test]
    fn test_first_retry_uses_initial_delay() {
        let config = LinkConfig::default()
            .with_reconnect_delay(Duration::from_millis(10), Duration::from_millis(50));
        let mut delay = Duration::ZERO;
        let delays: Vec<Duration> = (1..=4)
            .map(|failures| {
                delay = backoff_after(&config, failures, delay);
                delay
            })
            .collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(40),
                Duration::from_millis(50),
            ]
        );
    }
}
