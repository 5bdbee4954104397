//! Connection I/O shared by outbound links and accepted connections.
//!
//! Once the hello exchange is done both directions look the same: a task
//! owns the socket, writes whatever its [`LinkOutbox`] hands it and posts
//! every decoded mail back to the node.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use orca_core::NodeId;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;

use super::error::{LinkError, LinkResult};
use super::handle::{LinkMessage, LinkOutbox};
use super::metrics::LinkMetrics;
use super::MailCallback;
use crate::wire::{decode_mail, encode_hello, encode_mail, try_decode_frame, Frame};
use crate::Message;

const READ_CHUNK: usize = 4096;

/// Why [`drive_connection`] returned.
#[derive(Debug)]
pub(crate) enum ConnectionEnd {
    /// Local close: shutdown signal, close request, or every handle dropped.
    Closed,
    /// The socket failed or the peer misbehaved.
    Lost(LinkError),
}

/// Dialer side: send our hello, then read the peer's.
///
/// Returns the peer id and any bytes read past the hello frame.
pub(crate) async fn dial_handshake(
    stream: &mut TcpStream,
    local: NodeId,
    timeout: Duration,
) -> LinkResult<(NodeId, Vec<u8>)> {
    let exchange = async {
        stream.write_all(&encode_hello(local)).await?;
        let mut buffer = Vec::with_capacity(READ_CHUNK);
        let peer = read_hello(stream, &mut buffer).await?;
        Ok::<_, LinkError>((peer, buffer))
    };
    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| LinkError::Handshake("timed out waiting for hello".to_string()))?
}

/// Acceptor side: read the peer's hello, then answer with ours.
pub(crate) async fn accept_handshake(
    stream: &mut TcpStream,
    local: NodeId,
    timeout: Duration,
) -> LinkResult<(NodeId, Vec<u8>)> {
    let exchange = async {
        let mut buffer = Vec::with_capacity(READ_CHUNK);
        let peer = read_hello(stream, &mut buffer).await?;
        stream.write_all(&encode_hello(local)).await?;
        Ok::<_, LinkError>((peer, buffer))
    };
    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| LinkError::Handshake("timed out waiting for hello".to_string()))?
}

/// Read until one full frame is buffered; it must be a hello.
async fn read_hello<S: AsyncRead + Unpin>(
    stream: &mut S,
    buffer: &mut Vec<u8>,
) -> LinkResult<NodeId> {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        if let Some((frame, consumed)) = try_decode_frame(buffer)? {
            buffer.drain(..consumed);
            return match frame {
                Frame::Hello(peer) => Ok(peer),
                Frame::Mail(_) => Err(LinkError::Handshake(
                    "first frame was not a hello".to_string(),
                )),
            };
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(LinkError::ConnectionLost);
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
}

/// Everything a connection task needs besides the socket.
pub(crate) struct ConnectionIo<'a, M> {
    pub(crate) peer: NodeId,
    pub(crate) outbox: &'a mut LinkOutbox<M>,
    /// Encoded frames not yet fully written, oldest first.
    pub(crate) unsent: &'a mut VecDeque<Vec<u8>>,
    pub(crate) on_mail: &'a MailCallback<M>,
    pub(crate) shutdown: &'a mut watch::Receiver<bool>,
    pub(crate) metrics: &'a Rc<RefCell<LinkMetrics>>,
}

/// Run an established connection until it closes or fails.
///
/// Frames left in `unsent` are written first. A frame whose write fails
/// stays at the front of `unsent` so a reconnecting link can retry it.
pub(crate) async fn drive_connection<M: Message>(
    stream: TcpStream,
    mut read_buffer: Vec<u8>,
    io: ConnectionIo<'_, M>,
) -> ConnectionEnd {
    let ConnectionIo {
        peer,
        outbox,
        unsent,
        on_mail,
        shutdown,
        metrics,
    } = io;
    let (mut reader, mut writer) = stream.into_split();

    // Bytes that followed the hello are already frames.
    if let Err(e) = dispatch_frames(peer, &mut read_buffer, on_mail, metrics) {
        return ConnectionEnd::Lost(e);
    }
    if let Err(e) = flush(&mut writer, unsent, metrics).await {
        return ConnectionEnd::Lost(e);
    }

    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::debug!("connection to node {}: shutdown signalled", peer);
                let _ = writer.shutdown().await;
                return ConnectionEnd::Closed;
            }

            message = outbox.recv() => {
                match message {
                    Some(LinkMessage::Mail(mail)) => match encode_mail(&mail) {
                        Ok(frame) => {
                            unsent.push_back(frame);
                            if let Err(e) = flush(&mut writer, unsent, metrics).await {
                                return ConnectionEnd::Lost(e);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(
                                "connection to node {}: dropping mail that cannot be encoded: {}",
                                peer,
                                e
                            );
                        }
                    },
                    Some(LinkMessage::Close) | None => {
                        tracing::debug!("connection to node {}: closed locally", peer);
                        let _ = writer.shutdown().await;
                        return ConnectionEnd::Closed;
                    }
                }
            }

            read_result = reader.read(&mut chunk) => {
                match read_result {
                    Ok(0) => return ConnectionEnd::Lost(LinkError::ConnectionLost),
                    Ok(n) => {
                        read_buffer.extend_from_slice(&chunk[..n]);
                        tracing::debug!(
                            "connection to node {}: received {} bytes, buffer now {} bytes",
                            peer,
                            n,
                            read_buffer.len()
                        );
                        if let Err(e) = dispatch_frames(peer, &mut read_buffer, on_mail, metrics) {
                            return ConnectionEnd::Lost(e);
                        }
                    }
                    Err(e) => return ConnectionEnd::Lost(e.into()),
                }
            }
        }
    }
}

/// Write queued frames in order; stop at the first failure.
async fn flush<W: AsyncWrite + Unpin>(
    writer: &mut W,
    unsent: &mut VecDeque<Vec<u8>>,
    metrics: &Rc<RefCell<LinkMetrics>>,
) -> LinkResult<()> {
    while let Some(frame) = unsent.front() {
        writer.write_all(frame).await?;
        metrics.borrow_mut().record_mail_sent(frame.len());
        unsent.pop_front();
    }
    Ok(())
}

/// Decode every complete frame in `buffer` and hand mails to the node.
fn dispatch_frames<M: Message>(
    peer: NodeId,
    buffer: &mut Vec<u8>,
    on_mail: &MailCallback<M>,
    metrics: &Rc<RefCell<LinkMetrics>>,
) -> LinkResult<()> {
    while let Some((frame, consumed)) = try_decode_frame(buffer)? {
        buffer.drain(..consumed);
        match frame {
            Frame::Mail(payload) => {
                metrics.borrow_mut().record_mail_received(consumed);
                match decode_mail::<M>(&payload) {
                    Ok(mail) => on_mail(peer, mail),
                    Err(e) => {
                        tracing::warn!("connection to node {}: undecodable mail: {}", peer, e);
                    }
                }
            }
            Frame::Hello(again) => {
                return Err(LinkError::Handshake(format!(
                    "unexpected hello from node {} after handshake",
                    again
                )));
            }
        }
    }
    Ok(())
}
