//! Nodes talking over real loopback TCP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use orca_transport::{
    Address, EndPoint, EndPointAddress, EndPointConfig, EndPointError, EndPointHandle, ErrorKind,
    LinkConfig, NodeStatus, RecordingSink, RemoteMail,
};
use tokio::sync::mpsc::UnboundedReceiver;

const WAIT: Duration = Duration::from_secs(10);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Node {
    handle: EndPointHandle<String>,
    sink: Arc<RecordingSink>,
    inbox: UnboundedReceiver<RemoteMail<String>>,
    thread: thread::JoinHandle<Result<(), EndPointError>>,
}

fn config() -> EndPointConfig {
    EndPointConfig::local_network().with_link(
        LinkConfig::local_network()
            .with_reconnect_delay(Duration::from_millis(20), Duration::from_millis(200)),
    )
}

fn spawn(id: u32, peers: &[SocketAddr]) -> Node {
    spawn_with(id, peers, config())
}

fn spawn_with(id: u32, peers: &[SocketAddr], config: EndPointConfig) -> Node {
    init_tracing();
    let sink = Arc::new(RecordingSink::new());
    let mut endpoint = EndPoint::with_options(
        EndPointAddress::v4("127.0.0.1", 0),
        id,
        config,
        sink.clone(),
    )
    .expect("endpoint");
    for peer in peers {
        endpoint
            .append_remote_endpoint(EndPointAddress::from(*peer))
            .expect("peer address");
    }
    let inbox = endpoint.take_inbox().expect("inbox");
    let handle = endpoint.handle();
    let thread = thread::spawn(move || endpoint.run());
    Node {
        handle,
        sink,
        inbox,
        thread,
    }
}

impl Node {
    async fn wait_for(&self, what: &str, check: impl Fn(&NodeStatus) -> bool) -> NodeStatus {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let status = self.handle.status().await.expect("node running");
            if check(&status) {
                return status;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "node {}: timed out waiting for {}: {:?}",
                self.handle.id(),
                what,
                status
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn listen_addr(&self) -> SocketAddr {
        let status = self.wait_for("listener", |s| s.listen_addr.is_some()).await;
        status.listen_addr.expect("listening")
    }

    async fn receive(&mut self) -> RemoteMail<String> {
        tokio::time::timeout(WAIT, self.inbox.recv())
            .await
            .expect("mail in time")
            .expect("inbox open")
    }

    fn stop(self) {
        self.handle.shutdown();
        let result = self.thread.join().expect("loop thread");
        assert!(result.is_ok(), "run() failed: {:?}", result);
    }
}

#[tokio::test]
async fn test_two_nodes_exchange_mail() {
    let mut b = spawn(2, &[]);
    let b_addr = b.listen_addr().await;
    let mut a = spawn(1, &[b_addr]);

    // Sent before the link is up; waits in the queue until B registers.
    a.handle.send_named(
        "ping".to_string(),
        Address::actor(1, "client"),
        "echo",
        2,
    );

    let status = a
        .wait_for("registration", |s| s.registration_complete)
        .await;
    assert_eq!(status.registered_peers, vec![2]);
    b.wait_for("inbound peer", |s| s.registered_peers == vec![1])
        .await;

    let ping = b.receive().await;
    assert_eq!(ping.sender(), &Address::actor(1, "client"));
    assert_eq!(ping.target_node(), 2);
    assert_eq!(ping.into_payload(), "ping");

    // B never dialed A: the reply rides the accepted connection.
    b.handle.send(
        "pong".to_string(),
        Address::actor(2, "echo"),
        Address::actor(1, "client"),
    );
    let pong = a.receive().await;
    assert_eq!(pong.into_payload(), "pong");

    let status = a.handle.status().await.expect("running");
    assert_eq!(status.links.len(), 1);
    assert!(status.links[0].metrics.is_connected);
    assert!(status.links[0].metrics.mails_sent >= 1);
    assert!(status.links[0].metrics.mails_received >= 1);

    assert!(a.sink.reports().is_empty(), "{:?}", a.sink.reports());
    assert!(b.sink.reports().is_empty(), "{:?}", b.sink.reports());
    a.stop();
    b.stop();
}

#[tokio::test]
async fn test_three_node_mesh_completes_barrier() {
    let c = spawn(3, &[]);
    let c_addr = c.listen_addr().await;
    let b = spawn(2, &[c_addr]);
    let b_addr = b.listen_addr().await;
    let mut a = spawn(1, &[b_addr, c_addr]);

    let status = a
        .wait_for("registration", |s| s.registration_complete)
        .await;
    assert_eq!(status.registered_peers, vec![2, 3]);
    b.wait_for("registration", |s| s.registration_complete)
        .await;
    c.wait_for("inbound peers", |s| s.registered_peers == vec![1, 2])
        .await;

    b.handle.send_named(
        "from b".to_string(),
        Address::actor(2, "worker"),
        "client",
        1,
    );
    c.handle.send_named(
        "from c".to_string(),
        Address::actor(3, "worker"),
        "client",
        1,
    );
    let mut received = vec![a.receive().await.into_payload(), a.receive().await.into_payload()];
    received.sort();
    assert_eq!(received, vec!["from b".to_string(), "from c".to_string()]);

    a.stop();
    b.stop();
    c.stop();
}

#[tokio::test]
async fn test_peer_with_local_id_is_reported_on_both_sides() {
    let b = spawn(1, &[]);
    let b_addr = b.listen_addr().await;
    let a = spawn(1, &[b_addr]);

    let deadline = tokio::time::Instant::now() + WAIT;
    while a.sink.count(ErrorKind::DuplicateNodeId) == 0
        || b.sink.count(ErrorKind::DuplicateNodeId) == 0
    {
        assert!(tokio::time::Instant::now() < deadline, "no duplicate report");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let status = a.handle.status().await.expect("running");
    assert!(status.registered_peers.is_empty());
    assert!(!status.registration_complete);
    let status = b.handle.status().await.expect("running");
    assert!(status.registered_peers.is_empty());

    a.stop();
    b.stop();
}

#[tokio::test]
async fn test_repeated_id_from_second_dialer_is_rejected() {
    let b = spawn(2, &[]);
    let b_addr = b.listen_addr().await;
    let a = spawn(1, &[b_addr]);
    b.wait_for("first dialer", |s| s.registered_peers == vec![1])
        .await;

    let impostor = spawn(1, &[b_addr]);
    let deadline = tokio::time::Instant::now() + WAIT;
    while b.sink.count(ErrorKind::DuplicateNodeId) == 0 {
        assert!(tokio::time::Instant::now() < deadline, "no duplicate report");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        b.handle.status().await.expect("running").registered_peers,
        vec![1]
    );

    impostor.stop();
    a.stop();
    b.stop();
}

#[tokio::test]
async fn test_link_waits_for_late_listener() {
    // Reserve a port, release it, and start the listener there later.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .expect("probe")
        .local_addr()
        .expect("probe addr")
        .port();
    let late_addr: SocketAddr = ([127, 0, 0, 1], port).into();

    let mut a = spawn(1, &[late_addr]);
    a.handle.send_named(
        "queued early".to_string(),
        Address::actor(1, "client"),
        "svc",
        2,
    );
    a.wait_for("failed attempts", |s| s.links[0].metrics.connection_failures > 0)
        .await;

    let sink = Arc::new(RecordingSink::new());
    let mut late = EndPoint::<String>::with_options(
        EndPointAddress::v4("127.0.0.1", port),
        2,
        config(),
        sink,
    )
    .expect("late endpoint");
    let mut late_inbox = late.take_inbox().expect("inbox");
    let late_handle = late.handle();
    let late_thread = thread::spawn(move || late.run());

    let mail = tokio::time::timeout(WAIT, late_inbox.recv())
        .await
        .expect("mail in time")
        .expect("inbox open");
    assert_eq!(mail.into_payload(), "queued early");

    late_handle.send_named("ack".to_string(), Address::actor(2, "svc"), "client", 1);
    assert_eq!(a.receive().await.into_payload(), "ack");

    a.stop();
    late_handle.shutdown();
    assert!(late_thread.join().expect("late thread").is_ok());
}

#[tokio::test]
async fn test_mail_for_abandoned_link_is_reported_once() {
    let b = spawn(2, &[]);
    let b_addr = b.listen_addr().await;
    let a = spawn_with(
        1,
        &[b_addr],
        EndPointConfig::local_network()
            .with_max_dispatch_attempts(20)
            .with_link(
                LinkConfig::local_network()
                    .with_reconnect_delay(Duration::from_millis(20), Duration::from_millis(100))
                    .with_max_connection_failures(3),
            ),
    );
    a.wait_for("registration", |s| s.registration_complete)
        .await;
    b.stop();

    // The link gives up on the same poll that records its last failure.
    let status = a
        .wait_for("link to give up", |s| s.links[0].metrics.connection_failures >= 3)
        .await;
    assert!(!status.links[0].metrics.is_connected);

    a.handle.send_named(
        "after give-up".to_string(),
        Address::actor(1, "client"),
        "svc",
        2,
    );
    let deadline = tokio::time::Instant::now() + WAIT;
    while a.sink.count(ErrorKind::UnroutableMail) == 0 {
        assert!(tokio::time::Instant::now() < deadline, "no unroutable report");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(a.sink.count(ErrorKind::UnroutableMail), 1);
    let status = a.handle.status().await.expect("running");
    assert_eq!(status.queued_mail, 0);
    assert_eq!(status.links[0].metrics.connection_failures, 3);
    a.stop();
}
