//! In-process fleet over crossbeam channels
//!
//! Every rank gets one unbounded inbox. Each transport holds a sender for every
//! other rank's inbox but none for its own, so once all peers have dropped their
//! transports a blocking receive reports `Disconnected` instead of hanging.

use super::{check_dest, SendTicket, Transport};
use crate::distributed::error::TransportError;
use crate::distributed::protocol::{Envelope, Packet, Rank};
use crossbeam::channel::{unbounded, Receiver, Sender, TryRecvError};
use std::collections::VecDeque;

/// One rank's end of an in-process fleet
pub struct LocalTransport {
    rank: Rank,
    size: usize,
    /// Indexed by destination rank; `None` for self and after shutdown
    peers: Vec<Option<Sender<Envelope>>>,
    inbox: Receiver<Envelope>,
    /// Self-addressed packets, delivered ahead of the inbox
    loopback: VecDeque<Envelope>,
}

/// Build a fully connected in-process fleet of `n` ranks
///
/// The returned vector is indexed by rank.
pub fn local_fleet(n: usize) -> Vec<LocalTransport> {
    let (senders, receivers): (Vec<_>, Vec<_>) = (0..n).map(|_| unbounded()).unzip();

    receivers
        .into_iter()
        .enumerate()
        .map(|(rank, inbox)| {
            let peers = senders
                .iter()
                .enumerate()
                .map(|(dest, tx)| (dest != rank).then(|| tx.clone()))
                .collect();
            LocalTransport {
                rank,
                size: n,
                peers,
                inbox,
                loopback: VecDeque::new(),
            }
        })
        .collect()
}

impl Transport for LocalTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn start_send(&mut self, dest: Rank, packet: Packet) -> Result<SendTicket, TransportError> {
        check_dest(dest, self.size)?;

        let envelope = Envelope::new(self.rank, packet);
        if dest == self.rank {
            self.loopback.push_back(envelope);
            return Ok(SendTicket::completed());
        }

        let delivered = match &self.peers[dest] {
            Some(tx) => tx.send(envelope).is_ok(),
            None => false,
        };

        if delivered {
            Ok(SendTicket::completed())
        } else {
            tracing::warn!(rank = self.rank, dest, "peer has left, packet dropped");
            Ok(SendTicket::failed())
        }
    }

    fn try_recv(&mut self) -> Result<Option<Envelope>, TransportError> {
        if let Some(envelope) = self.loopback.pop_front() {
            return Ok(Some(envelope));
        }
        match self.inbox.try_recv() {
            Ok(envelope) => Ok(Some(envelope)),
            Err(TryRecvError::Empty) => Ok(None),
            // Nothing can arrive anymore; a blocking receive reports it.
            Err(TryRecvError::Disconnected) => Ok(None),
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
        // Channel sends complete synchronously; dropping the senders is the flush.
        for peer in self.peers.iter_mut() {
            peer.take();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::protocol::KillToken;

    fn kill(bound: usize, origin: Rank) -> Packet {
        Packet::KillAll(KillToken::new(bound, origin))
    }

    #[test]
    fn test_fleet_layout() {
        let fleet = local_fleet(3);
        assert_eq!(fleet.len(), 3);
        for (rank, transport) in fleet.iter().enumerate() {
            assert_eq!(transport.rank(), rank);
            assert_eq!(transport.size(), 3);
            assert!(transport.peers[rank].is_none());
        }
    }

    #[test]
    fn test_per_link_fifo() {
        let mut fleet = local_fleet(2);
        let mut receiver = fleet.pop().unwrap();
        let mut sender = fleet.pop().unwrap();

        for origin in 0..5 {
            assert!(sender.start_send(1, kill(1, origin)).unwrap().is_complete());
        }
        for origin in 0..5 {
            let envelope = receiver.recv().unwrap();
            assert_eq!(envelope.source, 0);
            assert_eq!(envelope.packet, kill(1, origin));
        }
        assert!(receiver.try_recv().unwrap().is_none());
    }

    #[test]
    fn test_self_send_loops_back() {
        let mut fleet = local_fleet(1);
        let transport = &mut fleet[0];
        transport.start_send(0, Packet::results("|row|")).unwrap();
        let envelope = transport.try_recv().unwrap().unwrap();
        assert_eq!(envelope.source, 0);
        assert_eq!(envelope.tag(), crate::distributed::protocol::Tag::SendingResults);
    }

    #[test]
    fn test_unknown_peer() {
        let mut fleet = local_fleet(2);
        assert!(matches!(
            fleet[0].start_send(5, kill(1, 0)),
            Err(TransportError::UnknownPeer { dest: 5, size: 2 })
        ));
    }

    #[test]
    fn test_send_to_departed_peer_fails_ticket() {
        let mut fleet = local_fleet(2);
        let departed = fleet.pop().unwrap();
        drop(departed);

        let ticket = fleet[0].start_send(1, kill(1, 0)).unwrap();
        assert!(ticket.has_failed());
    }

    #[test]
    fn test_recv_reports_disconnect() {
        let mut fleet = local_fleet(2);
        let mut survivor = fleet.remove(0);
        let mut other = fleet.remove(0);
        other.start_send(0, kill(1, 1)).unwrap();
        other.shutdown().unwrap();
        drop(other);

        // Queued packets are still delivered before the disconnect surfaces.
        assert_eq!(survivor.recv().unwrap().source, 1);
        assert!(matches!(
            survivor.recv(),
            Err(TransportError::Disconnected { rank: 0 })
        ));
    }
}
