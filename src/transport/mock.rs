//! Mock transport for testing
//!
//! Inbound packets are scripted up front with [`MockTransport::inject`]; every
//! outbound packet is recorded so tests can assert on exactly what a worker sent.
//! Clones share state, so a test keeps one handle while the coordinator owns the
//! other.
//!
//! # Example
//!
//! ```
//! use fleetstop::transport::{MockTransport, Transport};
//! use fleetstop::distributed::protocol::{KillToken, Packet};
//!
//! let mut transport = MockTransport::new(1, 4);
//! let probe = transport.clone();
//! probe.inject_kill(0, KillToken::new(2, 3));
//!
//! let envelope = transport.try_recv().unwrap().unwrap();
//! assert_eq!(envelope.source, 0);
//!
//! transport.start_send(0, Packet::results("|row|")).unwrap();
//! assert_eq!(probe.sent().len(), 1);
//! ```

use super::{check_dest, SendTicket, Transport};
use crate::distributed::error::TransportError;
use crate::distributed::protocol::{Envelope, KillToken, Packet, Rank};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

/// Record of one outbound packet
#[derive(Debug, Clone, PartialEq)]
pub struct SentRecord {
    pub dest: Rank,
    pub packet: Packet,
}

#[derive(Default)]
struct MockState {
    inbound: VecDeque<Envelope>,
    sent: Vec<SentRecord>,
    /// When set, tickets stay pending until `complete_sends`
    hold_sends: bool,
    held: Vec<SendTicket>,
    closed_peers: HashSet<Rank>,
    shutdowns: usize,
}

/// Scripted transport
#[derive(Clone)]
pub struct MockTransport {
    rank: Rank,
    size: usize,
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new(rank: Rank, size: usize) -> Self {
        Self {
            rank,
            size,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Queue a packet as if `source` had sent it
    pub fn inject(&self, source: Rank, packet: Packet) {
        self.state
            .lock()
            .unwrap()
            .inbound
            .push_back(Envelope::new(source, packet));
    }

    pub fn inject_kill(&self, source: Rank, token: KillToken) {
        self.inject(source, Packet::KillAll(token));
    }

    pub fn inject_results(&self, source: Rank, rendered: &str) {
        self.inject(source, Packet::results(rendered));
    }

    /// Number of scripted packets not yet received
    pub fn pending_inbound(&self) -> usize {
        self.state.lock().unwrap().inbound.len()
    }

    /// Every packet sent so far, in order
    pub fn sent(&self) -> Vec<SentRecord> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn sent_to(&self, dest: Rank) -> Vec<Packet> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|record| record.dest == dest)
            .map(|record| record.packet.clone())
            .collect()
    }

    /// Keep new send tickets pending until [`complete_sends`](Self::complete_sends)
    pub fn set_hold_sends(&self, hold: bool) {
        self.state.lock().unwrap().hold_sends = hold;
    }

    /// Complete every held ticket
    pub fn complete_sends(&self) {
        let mut state = self.state.lock().unwrap();
        for ticket in state.held.drain(..) {
            ticket.complete();
        }
    }

    /// Make sends to `peer` fail as if it had already exited
    pub fn close_peer(&self, peer: Rank) {
        self.state.lock().unwrap().closed_peers.insert(peer);
    }

    pub fn shutdown_count(&self) -> usize {
        self.state.lock().unwrap().shutdowns
    }
}

impl Transport for MockTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn start_send(&mut self, dest: Rank, packet: Packet) -> Result<SendTicket, TransportError> {
        check_dest(dest, self.size)?;

        let mut state = self.state.lock().unwrap();
        state.sent.push(SentRecord { dest, packet });

        if state.closed_peers.contains(&dest) {
            return Ok(SendTicket::failed());
        }
        if state.hold_sends {
            let ticket = SendTicket::pending();
            state.held.push(ticket.clone());
            return Ok(ticket);
        }
        Ok(SendTicket::completed())
    }

    fn try_recv(&mut self) -> Result<Option<Envelope>, TransportError> {
        Ok(self.state.lock().unwrap().inbound.pop_front())
    }

    fn recv(&mut self) -> Result<Envelope, TransportError> {
        // Nothing else will ever be scripted once the test hands control over.
        self.state
            .lock()
            .unwrap()
            .inbound
            .pop_front()
            .ok_or(TransportError::Disconnected { rank: self.rank })
    }

    fn shutdown(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.shutdowns += 1;
        for ticket in state.held.drain(..) {
            ticket.complete();
        }
        Ok(())
    }
}
