//! Inbound server: accepts peer connections and runs the acceptor side of
//! the handshake.
//!
//! Each accepted connection gets its own task and its own [`LinkHandle`].
//! Once the peer's hello arrives the handle is passed to the node's
//! registration path with origin [`LinkOrigin::Inbound`](crate::link::LinkOrigin).
//! Nothing read from the socket is dispatched until the node admits the
//! peer; a rejected connection is dropped with its buffered frames.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

use orca_core::NodeId;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::link::connection::{accept_handshake, drive_connection, ConnectionEnd, ConnectionIo};
use crate::link::{AdmitCallback, LinkConfig, LinkHandle, LinkMetrics, MailCallback};
use crate::Message;

/// What the server needs from the node that starts it.
pub(crate) struct ServerContext<M> {
    pub(crate) local: NodeId,
    pub(crate) config: LinkConfig,
    pub(crate) on_mail: MailCallback<M>,
    pub(crate) on_admit: AdmitCallback<M>,
    pub(crate) shutdown: watch::Receiver<bool>,
}

/// Listening socket of a node.
pub struct InboundServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl InboundServer {
    /// Bind the listening socket.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the address cannot be bound.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!("inbound server bound to {}", local_addr);
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start accepting on the current `LocalSet`.
    ///
    /// The returned task finishes after shutdown is signalled and every
    /// accepted connection has closed.
    pub(crate) fn start<M: Message>(self, ctx: ServerContext<M>) -> JoinHandle<()> {
        tokio::task::spawn_local(accept_loop(self, ctx))
    }
}

async fn accept_loop<M: Message>(server: InboundServer, ctx: ServerContext<M>) {
    let ServerContext {
        local,
        config,
        on_mail,
        on_admit,
        mut shutdown,
    } = ctx;
    let mut connections: Vec<JoinHandle<()>> = Vec::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = server.listener.accept() => {
                match accepted {
                    Ok((stream, remote)) => {
                        tracing::debug!("inbound server: accepted connection from {}", remote);
                        connections.retain(|task| !task.is_finished());
                        connections.push(tokio::task::spawn_local(inbound_connection(
                            stream,
                            remote,
                            local,
                            config.clone(),
                            on_mail.clone(),
                            on_admit.clone(),
                            shutdown.clone(),
                        )));
                    }
                    Err(e) => {
                        tracing::warn!("inbound server: accept failed: {}", e);
                    }
                }
            }
        }
    }

    for task in connections {
        if let Err(e) = task.await {
            tracing::warn!("inbound server: connection task failed: {}", e);
        }
    }
    tracing::info!("inbound server on {} stopped", server.local_addr);
}

async fn inbound_connection<M: Message>(
    mut stream: TcpStream,
    remote: SocketAddr,
    local: NodeId,
    config: LinkConfig,
    on_mail: MailCallback<M>,
    on_admit: AdmitCallback<M>,
    mut shutdown: watch::Receiver<bool>,
) {
    let _ = stream.set_nodelay(true);
    let handshake = tokio::select! {
        _ = shutdown.changed() => return,
        result = accept_handshake(&mut stream, local, config.handshake_timeout) => result,
    };
    let (peer, buffer) = match handshake {
        Ok(done) => done,
        Err(e) => {
            tracing::warn!("inbound connection from {}: handshake failed: {}", remote, e);
            return;
        }
    };
    tracing::info!("inbound connection from {}: peer is node {}", remote, peer);

    // The task keeps its own handle so the connection outlives a registry
    // that declines to store it; only Close or shutdown end it locally.
    let (handle, mut outbox) = LinkHandle::channel(remote.to_string());
    let verdict = on_admit(peer, handle.clone());
    let admitted = tokio::select! {
        _ = shutdown.changed() => return,
        verdict = verdict => verdict.unwrap_or(false),
    };
    if !admitted {
        tracing::debug!(
            "inbound connection from {}: node {} not admitted, closing",
            remote,
            peer
        );
        return;
    }

    let metrics = Rc::new(RefCell::new(LinkMetrics::new()));
    metrics.borrow_mut().record_connection_success();
    let mut unsent = VecDeque::new();
    let end = drive_connection(
        stream,
        buffer,
        ConnectionIo {
            peer,
            outbox: &mut outbox,
            unsent: &mut unsent,
            on_mail: &on_mail,
            shutdown: &mut shutdown,
            metrics: &metrics,
        },
    )
    .await;

    match end {
        ConnectionEnd::Closed => {
            tracing::debug!("inbound connection from node {} closed", peer);
        }
        ConnectionEnd::Lost(e) => {
            tracing::info!(
                "inbound connection from node {} lost: {} ({} mails received)",
                peer,
                e,
                metrics.borrow().mails_received
            );
        }
    }
    drop(handle);
}
