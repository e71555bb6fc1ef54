//! Full-mesh TCP transport for one-process-per-rank fleets
//!
//! Every rank listens on its own address from the peer list, connects to every
//! lower rank and accepts from every higher rank, so each pair shares exactly one
//! connection. Both ends of a connection open with a [`HelloMessage`]; a wrong
//! protocol version, fleet size or rank aborts setup.
//!
//! The transport owns a small tokio runtime. Per connection there is one reader
//! task feeding a crossbeam inbox and one writer task draining an unbounded queue,
//! so the protocol thread itself never enters async code.

use super::{check_dest, SendTicket, Transport};
use crate::distributed::error::TransportError;
use crate::distributed::protocol::{
    read_frame, write_frame, Envelope, Frame, HelloMessage, Packet, Rank, PROTOCOL_VERSION,
};
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Wait between connection attempts while a lower rank is still starting up
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Time writers get to flush at shutdown before the runtime is torn down
const FLUSH_GRACE: Duration = Duration::from_millis(500);

struct Outgoing {
    packet: Packet,
    ticket: SendTicket,
}

/// One rank's end of a TCP mesh
pub struct TcpTransport {
    rank: Rank,
    size: usize,
    runtime: Option<Runtime>,
    /// Indexed by destination rank; `None` for self and after shutdown
    outboxes: Vec<Option<mpsc::UnboundedSender<Outgoing>>>,
    writers: Vec<JoinHandle<()>>,
    inbox: Receiver<Envelope>,
    loopback: VecDeque<Envelope>,
}

impl TcpTransport {
    /// Join the mesh described by `peers` as `rank`
    ///
    /// Blocks until every connection is established and greeted, or fails with a
    /// handshake error once `connect_timeout` has elapsed.
    pub fn connect(
        rank: Rank,
        peers: &[String],
        connect_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let size = peers.len();
        check_dest(rank, size)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("fleetstop-net")
            .enable_all()
            .build()?;

        let streams = runtime.block_on(async {
            tokio::time::timeout(connect_timeout, establish_mesh(rank, peers))
                .await
                .map_err(|_| {
                    TransportError::Handshake(format!(
                        "rank {} could not reach every peer within {:?}",
                        rank, connect_timeout
                    ))
                })?
        })?;

        let (inbox_tx, inbox) = unbounded();
        let mut outboxes: Vec<Option<mpsc::UnboundedSender<Outgoing>>> =
            (0..size).map(|_| None).collect();
        let mut writers = Vec::with_capacity(size.saturating_sub(1));

        for (peer, stream) in streams {
            let (read_half, write_half) = stream.into_split();
            runtime.spawn(reader_task(rank, peer, read_half, inbox_tx.clone()));

            let (tx, rx) = mpsc::unbounded_channel();
            writers.push(runtime.spawn(writer_task(rank, peer, write_half, rx)));
            outboxes[peer] = Some(tx);
        }
        // Readers hold the only senders now; the inbox disconnects when they all end.
        drop(inbox_tx);

        tracing::debug!(rank, size, "tcp mesh established");

        Ok(Self {
            rank,
            size,
            runtime: Some(runtime),
            outboxes,
            writers,
            inbox,
            loopback: VecDeque::new(),
        })
    }
}

impl Transport for TcpTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn start_send(&mut self, dest: Rank, packet: Packet) -> Result<SendTicket, TransportError> {
        check_dest(dest, self.size)?;

        if dest == self.rank {
            self.loopback.push_back(Envelope::new(self.rank, packet));
            return Ok(SendTicket::completed());
        }

        let ticket = SendTicket::pending();
        let queued = match &self.outboxes[dest] {
            Some(tx) => tx
                .send(Outgoing {
                    packet,
                    ticket: ticket.clone(),
                })
                .is_ok(),
            None => false,
        };

        if !queued {
            tracing::warn!(rank = self.rank, dest, "connection closed, packet dropped");
            ticket.fail();
        }
        Ok(ticket)
    }

    fn try_recv(&mut self) -> Result<Option<Envelope>, TransportError> {
        if let Some(envelope) = self.loopback.pop_front() {
            return Ok(Some(envelope));
        }
        match self.inbox.try_recv() {
            Ok(envelope) => Ok(Some(envelope)),
            Err(_) => Ok(None),
        }
    }

    fn recv(&mut self) -> Result<Envelope, TransportError> {
        if let Some(envelope) = self.loopback.pop_front() {
            return Ok(envelope);
        }
        self.inbox
            .recv()
            .map_err(|_| TransportError::Disconnected { rank: self.rank })
    }

    fn shutdown(&mut self) -> Result<(), TransportError> {
        let Some(runtime) = self.runtime.take() else {
            return Ok(());
        };

        // Closing the queues lets each writer flush what is left and exit.
        for outbox in self.outboxes.iter_mut() {
            outbox.take();
        }
        let rank = self.rank;
        let writers = std::mem::take(&mut self.writers);
        runtime.block_on(async {
            for writer in writers {
                if let Err(e) = writer.await {
                    tracing::warn!(rank, error = %e, "writer task failed");
                }
            }
        });
        runtime.shutdown_timeout(FLUSH_GRACE);

        tracing::debug!(rank, "tcp transport shut down");
        Ok(())
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

async fn establish_mesh(
    rank: Rank,
    peers: &[String],
) -> Result<Vec<(Rank, TcpStream)>, TransportError> {
    let size = peers.len();
    let listener = TcpListener::bind(&peers[rank]).await?;
    tracing::debug!(rank, addr = %peers[rank], "listening for higher ranks");

    let (mut accepted, connected) = tokio::try_join!(
        accept_higher(&listener, rank, size),
        connect_lower(rank, peers),
    )?;

    accepted.extend(connected);
    Ok(accepted)
}

async fn accept_higher(
    listener: &TcpListener,
    rank: Rank,
    size: usize,
) -> Result<Vec<(Rank, TcpStream)>, TransportError> {
    let expected = size - rank - 1;
    let mut seen = vec![false; size];
    let mut streams = Vec::with_capacity(expected);

    while streams.len() < expected {
        let (mut stream, addr) = listener.accept().await?;
        stream.set_nodelay(true)?;

        let hello = expect_hello(&mut stream).await?;
        let peer = validate_hello(&hello, size)?;
        if peer <= rank || seen[peer] {
            return Err(TransportError::Handshake(format!(
                "unexpected connection from rank {} at {}",
                peer, addr
            )));
        }
        seen[peer] = true;

        write_frame(&mut stream, &Frame::Hello(hello_for(rank, size))).await?;
        tracing::debug!(rank, peer, %addr, "accepted peer");
        streams.push((peer, stream));
    }

    Ok(streams)
}

async fn connect_lower(
    rank: Rank,
    peers: &[String],
) -> Result<Vec<(Rank, TcpStream)>, TransportError> {
    let size = peers.len();
    let mut streams = Vec::with_capacity(rank);

    for (peer, addr) in peers.iter().enumerate().take(rank) {
        let mut stream = connect_with_retry(addr).await;
        stream.set_nodelay(true)?;

        write_frame(&mut stream, &Frame::Hello(hello_for(rank, size))).await?;
        let hello = expect_hello(&mut stream).await?;
        if validate_hello(&hello, size)? != peer {
            return Err(TransportError::Handshake(format!(
                "{} answered as rank {}, expected {}",
                addr, hello.rank, peer
            )));
        }

        tracing::debug!(rank, peer, %addr, "connected to peer");
        streams.push((peer, stream));
    }

    Ok(streams)
}

/// Retry until the peer's listener is up; the caller bounds the total wait
async fn connect_with_retry(addr: &str) -> TcpStream {
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return stream,
            Err(e) => {
                tracing::trace!(%addr, error = %e, "peer not ready yet");
                tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
            }
        }
    }
}

async fn expect_hello(stream: &mut TcpStream) -> Result<HelloMessage, TransportError> {
    match read_frame(stream).await? {
        Frame::Hello(hello) => Ok(hello),
        Frame::Packet(packet) => Err(TransportError::Handshake(format!(
            "expected hello, got {}",
            packet.tag()
        ))),
    }
}

fn hello_for(rank: Rank, size: usize) -> HelloMessage {
    HelloMessage {
        protocol_version: PROTOCOL_VERSION,
        rank,
        fleet_size: size,
    }
}

/// Check a peer's hello against this fleet and return the peer's rank
fn validate_hello(hello: &HelloMessage, size: usize) -> Result<Rank, TransportError> {
    if hello.protocol_version != PROTOCOL_VERSION {
        return Err(TransportError::Handshake(format!(
            "protocol version mismatch: peer {}, local {}",
            hello.protocol_version, PROTOCOL_VERSION
        )));
    }
    if hello.fleet_size != size {
        return Err(TransportError::Handshake(format!(
            "fleet size mismatch: peer {}, local {}",
            hello.fleet_size, size
        )));
    }
    if hello.rank >= size {
        return Err(TransportError::Handshake(format!(
            "peer rank {} outside fleet of {}",
            hello.rank, size
        )));
    }
    Ok(hello.rank)
}

async fn reader_task(rank: Rank, peer: Rank, mut read_half: OwnedReadHalf, inbox: Sender<Envelope>) {
    loop {
        match read_frame(&mut read_half).await {
            Ok(Frame::Packet(packet)) => {
                if inbox.send(Envelope::new(peer, packet)).is_err() {
                    break;
                }
            }
            Ok(Frame::Hello(_)) => {
                tracing::warn!(rank, peer, "ignoring repeated hello");
            }
            Err(TransportError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                tracing::debug!(rank, peer, "peer closed connection");
                break;
            }
            Err(e) => {
                tracing::warn!(rank, peer, error = %e, "read failed, dropping connection");
                break;
            }
        }
    }
}

async fn writer_task(
    rank: Rank,
    peer: Rank,
    mut write_half: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<Outgoing>,
) {
    while let Some(outgoing) = queue.recv().await {
        match write_frame(&mut write_half, &Frame::Packet(outgoing.packet)).await {
            Ok(()) => outgoing.ticket.complete(),
            Err(e) => {
                tracing::warn!(rank, peer, error = %e, "send failed");
                outgoing.ticket.fail();
                while let Some(rest) = queue.recv().await {
                    rest.ticket.fail();
                }
                return;
            }
        }
    }
    let _ = write_half.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::protocol::{KillToken, Tag};
    use std::thread;

    fn free_addresses(n: usize) -> Vec<String> {
        let listeners: Vec<_> = (0..n)
            .map(|_| std::net::TcpListener::bind("127.0.0.1:0").unwrap())
            .collect();
        listeners
            .iter()
            .map(|l| l.local_addr().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_validate_hello() {
        assert_eq!(validate_hello(&hello_for(2, 4), 4).unwrap(), 2);

        let mut wrong_version = hello_for(1, 4);
        wrong_version.protocol_version = PROTOCOL_VERSION + 1;
        assert!(matches!(
            validate_hello(&wrong_version, 4),
            Err(TransportError::Handshake(_))
        ));
        assert!(validate_hello(&hello_for(1, 3), 4).is_err());
        assert!(validate_hello(&hello_for(4, 4), 4).is_err());
    }

    #[test]
    fn test_three_rank_mesh() {
        let peers = free_addresses(3);

        let handles: Vec<_> = (0..3)
            .map(|rank| {
                let peers = peers.clone();
                thread::spawn(move || {
                    let mut transport =
                        TcpTransport::connect(rank, &peers, Duration::from_secs(10)).unwrap();

                    if rank != 0 {
                        let ticket = transport
                            .start_send(0, Packet::KillAll(KillToken::announcement(rank)))
                            .unwrap();
                        let reply = transport.recv().unwrap();
                        assert_eq!(reply.source, 0);
                        assert_eq!(reply.tag(), Tag::KillAll);
                        assert!(!ticket.has_failed());
                        transport.shutdown().unwrap();
                        return Vec::new();
                    }

                    let mut sources = Vec::new();
                    for _ in 0..2 {
                        let envelope = transport.recv().unwrap();
                        sources.push(envelope.source);
                        transport
                            .start_send(envelope.source, Packet::KillAll(KillToken::new(1, 0)))
                            .unwrap();
                    }
                    transport.shutdown().unwrap();
                    sources
                })
            })
            .collect();

        let mut results: Vec<Vec<Rank>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let mut sources = results.remove(0);
        sources.sort();
        assert_eq!(sources, vec![1, 2]);
    }

    #[test]
    fn test_connect_times_out_without_peers() {
        let peers = free_addresses(2);
        let result = TcpTransport::connect(1, &peers, Duration::from_millis(300));
        assert!(matches!(result, Err(TransportError::Handshake(_))));
    }
}
