//! The node: configuration, the event loop and its foreign-thread handle.
//!
//! An [`EndPoint`] is configured on any thread, then [`EndPoint::run`]
//! takes over the calling thread for the node's lifetime. While it runs,
//! other threads reach the node only through an [`EndPointHandle`].
//!
//! # Event loop
//!
//! ```text
//!   foreign threads ──► Command channel ─┐
//!   link / server tasks ─────────────────┤
//!                                        ▼
//!                          ┌──────────── loop ─────────────┐
//!                          │ Node: registry + mail queue   │
//!                          │ every mail_period: drain      │
//!                          └──────────────┬────────────────┘
//!                                         ▼
//!                             LinkHandle::transmit / inbox
//! ```
//!
//! The loop is a current-thread tokio runtime driving a `LocalSet`. Link
//! and server tasks run on the same thread; they post what they learn
//! (peer ids, decoded mail) into the same command channel as foreign
//! threads, so the registry and the queue have exactly one writer.

use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;

use orca_core::{
    Address, EndPointAddress, ErrorKind, ErrorSink, NodeId, RemoteMail, TracingSink,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::EndPointError;
use crate::link::outbound::LinkContext;
use crate::link::{AdmitCallback, LinkHandle, LinkOrigin, MailCallback, OutboundLink};
use crate::server::{InboundServer, ServerContext};
use crate::Message;

mod command;
pub mod config;
mod mailbox;
mod node;
mod registry;

pub use command::{EndPointHandle, LinkStatus, NodeStatus};
pub use config::{EndPointConfig, DEFAULT_MAX_DISPATCH_ATTEMPTS, MAIL_PROCESS_PERIOD};
pub use mailbox::DrainStats;

use command::Command;
use node::Node;

/// One node of the cluster.
///
/// # Example
///
/// ```rust,no_run
/// use orca_core::{Address, EndPointAddress};
/// use orca_transport::EndPoint;
///
/// let mut node = EndPoint::<String>::new(EndPointAddress::v4("127.0.0.1", 4500), 1)?;
/// node.append_remote_endpoint(EndPointAddress::v4("127.0.0.1", 4501))?;
///
/// let handle = node.handle();
/// std::thread::spawn(move || {
///     handle.send_named("hello".to_string(), Address::actor(1, "client"), "svc", 2);
/// });
///
/// node.run()?;
/// # Ok::<(), orca_transport::EndPointError>(())
/// ```
pub struct EndPoint<M> {
    id: NodeId,
    bind: EndPointAddress,
    bind_addr: SocketAddr,
    config: EndPointConfig,
    links: Vec<OutboundLink<M>>,
    handle: EndPointHandle<M>,
    commands: Option<mpsc::UnboundedReceiver<Command<M>>>,
    inbox_tx: mpsc::UnboundedSender<RemoteMail<M>>,
    inbox: Option<mpsc::UnboundedReceiver<RemoteMail<M>>>,
    sink: Arc<dyn ErrorSink>,
    started: bool,
}

impl<M: Message> EndPoint<M> {
    /// Create a node with id `id` that will listen on `bind`.
    ///
    /// Uses the default configuration and reports through [`TracingSink`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if `bind` is malformed.
    pub fn new(bind: EndPointAddress, id: NodeId) -> Result<Self, EndPointError> {
        Self::with_options(bind, id, EndPointConfig::default(), Arc::new(TracingSink))
    }

    /// Create a node with explicit configuration and report sink.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if `bind` is malformed or `config`
    /// fails validation. The problem is also reported to `sink`.
    pub fn with_options(
        bind: EndPointAddress,
        id: NodeId,
        config: EndPointConfig,
        sink: Arc<dyn ErrorSink>,
    ) -> Result<Self, EndPointError> {
        if let Err(e) = config.validate() {
            return Err(reported(sink.as_ref(), e));
        }
        let bind_addr = match bind.socket_addr() {
            Ok(addr) => addr,
            Err(e) => return Err(reported(sink.as_ref(), e.into())),
        };

        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        tracing::debug!("node {}: configured to listen on {}", id, bind);

        Ok(Self {
            id,
            bind,
            bind_addr,
            config,
            links: Vec::new(),
            handle: EndPointHandle::new(id, commands_tx),
            commands: Some(commands),
            inbox_tx,
            inbox: Some(inbox),
            sink,
            started: false,
        })
    }

    /// Local node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Configured listen address.
    pub fn bind_address(&self) -> &EndPointAddress {
        &self.bind
    }

    /// Number of configured outbound links.
    pub fn outbound_links(&self) -> usize {
        self.links.len()
    }

    /// A thread-safe handle onto this node.
    ///
    /// Commands posted before [`EndPoint::run`] are applied once it starts.
    pub fn handle(&self) -> EndPointHandle<M> {
        self.handle.clone()
    }

    /// Take the receiver of mail addressed to this node.
    ///
    /// Returns `None` after the first call. Without a receiver, local mail
    /// is discarded.
    pub fn take_inbox(&mut self) -> Option<mpsc::UnboundedReceiver<RemoteMail<M>>> {
        self.inbox.take()
    }

    /// Add an outbound link to the node listening at `addr`.
    ///
    /// Once the link's handshake learns the peer's id, the link registers
    /// itself with this node.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if `addr` cannot be dialed or the
    /// node has already started.
    pub fn append_remote_endpoint(&mut self, addr: EndPointAddress) -> Result<(), EndPointError> {
        if self.started {
            return Err(self.reject("cannot add a remote endpoint after run() started"));
        }
        let mut link = match OutboundLink::new(addr) {
            Ok(link) => link,
            Err(e) => return Err(reported(self.sink.as_ref(), e.into())),
        };
        let handle = self.handle.clone();
        link.set_on_registered(move |peer, link| handle.register_peer(peer, link));
        tracing::debug!("node {}: added outbound link to {}", self.id, link.peer());
        self.links.push(link);
        Ok(())
    }

    /// Discard every configured outbound link.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if the node has already started.
    pub fn clear(&mut self) -> Result<(), EndPointError> {
        if self.started {
            return Err(self.reject("cannot clear remote endpoints after run() started"));
        }
        self.links.clear();
        Ok(())
    }

    /// Send `message` to a concrete address. See [`EndPointHandle::send`].
    pub fn send(&self, message: M, from: Address, destination: Address) {
        self.handle.send(message, from, destination);
    }

    /// Send `message` to `name` on node `node`. See
    /// [`EndPointHandle::send_named`].
    pub fn send_named(&self, message: M, from: Address, name: impl Into<String>, node: NodeId) {
        self.handle.send_named(message, from, name, node);
    }

    /// Queue an already built mail.
    pub fn append_mail(&self, mail: RemoteMail<M>) {
        self.handle.append_mail(mail);
    }

    /// Run the node on the calling thread until shutdown.
    ///
    /// Binds the listen address, starts every outbound link, the inbound
    /// server and the mail timer, then serves commands until
    /// [`EndPointHandle::shutdown`]. Returns after every link and server
    /// task has finished.
    ///
    /// # Errors
    ///
    /// - `InvalidConfiguration` when called a second time
    /// - `Bind` if the listen address cannot be bound
    /// - `Runtime` if the event loop cannot be created
    pub fn run(&mut self) -> Result<(), EndPointError> {
        if self.started {
            return Err(self.reject("run() may only be called once"));
        }
        self.started = true;
        let commands = match self.commands.take() {
            Some(commands) => commands,
            None => return Err(self.reject("command channel already consumed")),
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()
            .map_err(EndPointError::Runtime)?;
        let local = tokio::task::LocalSet::new();

        let parts = LoopParts {
            id: self.id,
            bind_addr: self.bind_addr,
            config: self.config.clone(),
            links: std::mem::take(&mut self.links),
            handle: self.handle.clone(),
            commands,
            inbox: self.inbox_tx.clone(),
            sink: self.sink.clone(),
        };
        local.block_on(&runtime, event_loop(parts))
    }

    fn reject(&self, message: &str) -> EndPointError {
        reported(self.sink.as_ref(), EndPointError::invalid(message))
    }
}

impl<M> std::fmt::Debug for EndPoint<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndPoint")
            .field("id", &self.id)
            .field("bind", &self.bind)
            .field("outbound_links", &self.links.len())
            .field("started", &self.started)
            .finish()
    }
}

/// Report a configuration error to the sink and hand it back.
fn reported(sink: &dyn ErrorSink, err: EndPointError) -> EndPointError {
    sink.report(ErrorKind::InvalidConfiguration, &err.to_string());
    err
}

/// Everything the loop takes from the [`EndPoint`] when it starts.
struct LoopParts<M> {
    id: NodeId,
    bind_addr: SocketAddr,
    config: EndPointConfig,
    links: Vec<OutboundLink<M>>,
    handle: EndPointHandle<M>,
    commands: mpsc::UnboundedReceiver<Command<M>>,
    inbox: mpsc::UnboundedSender<RemoteMail<M>>,
    sink: Arc<dyn ErrorSink>,
}

async fn event_loop<M: Message>(parts: LoopParts<M>) -> Result<(), EndPointError> {
    let LoopParts {
        id,
        bind_addr,
        config,
        links,
        handle,
        mut commands,
        inbox,
        sink,
    } = parts;

    let server = match InboundServer::bind(bind_addr).await {
        Ok(server) => server,
        Err(source) => {
            tracing::error!("node {}: cannot listen on {}: {}", id, bind_addr, source);
            return Err(EndPointError::Bind {
                addr: bind_addr,
                source,
            });
        }
    };

    let mut node = Node::new(id, config.max_dispatch_attempts, inbox, sink);
    node.set_listen_addr(server.local_addr());
    node.arm(links.len());

    // Tasks report back through the command channel like everyone else.
    let on_mail: MailCallback<M> = {
        let handle = handle.clone();
        Rc::new(move |peer, mail| handle.post(Command::Inbound { peer, mail }))
    };
    let on_admit: AdmitCallback<M> = {
        let handle = handle.clone();
        Rc::new(move |peer, link: LinkHandle<M>| {
            let (verdict, admitted) = oneshot::channel();
            handle.post(Command::Register {
                peer,
                link,
                origin: LinkOrigin::Inbound,
                verdict: Some(verdict),
            });
            admitted
        })
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: Vec<JoinHandle<()>> = Vec::with_capacity(links.len() + 1);

    for link in links {
        let peer = link.peer().to_string();
        let (task, metrics) = link.connect(LinkContext {
            local: id,
            config: config.link.clone(),
            on_mail: on_mail.clone(),
            shutdown: shutdown_rx.clone(),
        });
        node.watch_link(peer, metrics);
        tasks.push(task);
    }
    tasks.push(server.start(ServerContext {
        local: id,
        config: config.link.clone(),
        on_mail,
        on_admit,
        shutdown: shutdown_rx,
    }));

    let mut timer = tokio::time::interval(config.mail_period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(
        "node {}: running, {} outbound links, mail every {:?}",
        id,
        tasks.len() - 1,
        config.mail_period
    );

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => {
                    if node.apply(command).is_break() {
                        break;
                    }
                }
                None => break,
            },
            _ = timer.tick() => {
                node.process_mail();
            }
        }
    }

    // Stop the timer, signal every task, then wait for each to finish.
    drop(timer);
    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!("node {}: task failed during shutdown: {}", id, e);
        }
    }
    tracing::info!(
        "node {}: stopped with {} mails still queued",
        id,
        node.status().queued_mail
    );
    Ok(())
}
