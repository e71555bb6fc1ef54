//! Point-to-point transport abstraction
//!
//! A transport moves [`Packet`]s between the ranks of one fleet. The protocol layer
//! only ever needs four things from it: a non-blocking send that hands back a
//! completion ticket, a non-blocking receive, a blocking receive, and an orderly
//! shutdown that flushes whatever is still queued.
//!
//! # Implementations
//!
//! - [`local::LocalTransport`]: one OS thread per rank, crossbeam channels in between
//! - [`tcp::TcpTransport`]: one process per rank, full TCP mesh driven by tokio
//! - [`mock::MockTransport`]: scripted inbound queue for state machine tests
//!
//! # Ordering
//!
//! Every implementation preserves FIFO order per (sender, receiver) link. Nothing is
//! promised about the interleaving of different senders.

pub mod local;
pub mod mock;
pub mod tcp;

use crate::distributed::error::TransportError;
use crate::distributed::protocol::{Envelope, Packet, Rank};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

pub use local::{local_fleet, LocalTransport};
pub use mock::MockTransport;
pub use tcp::TcpTransport;

const TICKET_PENDING: u8 = 0;
const TICKET_COMPLETE: u8 = 1;
const TICKET_FAILED: u8 = 2;

/// Completion flag for one in-flight send
///
/// The transport keeps one clone and flips it once the packet has left the process
/// (or could not). The pool keeps the other and will not recycle the buffer behind
/// it until the flag is no longer pending.
#[derive(Debug, Clone)]
pub struct SendTicket {
    state: Arc<AtomicU8>,
}

impl SendTicket {
    pub fn pending() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(TICKET_PENDING)),
        }
    }

    /// A ticket for a send that finished synchronously
    pub fn completed() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(TICKET_COMPLETE)),
        }
    }

    /// A ticket for a send that could not be delivered
    pub fn failed() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(TICKET_FAILED)),
        }
    }

    pub fn complete(&self) {
        self.state.store(TICKET_COMPLETE, Ordering::Release);
    }

    pub fn fail(&self) {
        self.state.store(TICKET_FAILED, Ordering::Release);
    }

    /// True once the send is no longer pending, successfully or not
    pub fn is_complete(&self) -> bool {
        self.state.load(Ordering::Acquire) != TICKET_PENDING
    }

    pub fn has_failed(&self) -> bool {
        self.state.load(Ordering::Acquire) == TICKET_FAILED
    }
}

/// Transport trait for all fleet backends
///
/// Each worker owns exactly one transport. Implementations must be `Send` so the
/// in-process fleet can move them onto worker threads, but are never shared.
///
/// # Errors
///
/// Sending to a peer that has already left is not an error: the returned ticket is
/// simply marked failed. Errors are reserved for conditions the worker cannot
/// recover from (unknown destination, lost inbox, broken codec).
pub trait Transport: Send {
    /// This worker's rank
    fn rank(&self) -> Rank;

    /// Number of ranks in the fleet
    fn size(&self) -> usize;

    /// Queue `packet` for delivery to `dest` without waiting for it to leave
    fn start_send(&mut self, dest: Rank, packet: Packet) -> Result<SendTicket, TransportError>;

    /// Take the next delivered packet, if any, without blocking
    ///
    /// Lost peers are not reported here; an empty poll looks the same either way.
    fn try_recv(&mut self) -> Result<Option<Envelope>, TransportError>;

    /// Block until a packet is delivered
    ///
    /// Fails with [`TransportError::Disconnected`] when no peer can send anymore and
    /// nothing is queued, instead of blocking forever.
    fn recv(&mut self) -> Result<Envelope, TransportError>;

    /// Flush queued sends and release the channel
    ///
    /// Must be idempotent; the coordinator calls it exactly once, but drop paths may
    /// call it again.
    fn shutdown(&mut self) -> Result<(), TransportError>;
}

/// Reject destinations outside the fleet
pub(crate) fn check_dest(dest: Rank, size: usize) -> Result<(), TransportError> {
    if dest >= size {
        return Err(TransportError::UnknownPeer { dest, size });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_states() {
        let ticket = SendTicket::pending();
        let shared = ticket.clone();
        assert!(!ticket.is_complete());

        shared.complete();
        assert!(ticket.is_complete());
        assert!(!ticket.has_failed());

        let failed = SendTicket::failed();
        assert!(failed.is_complete());
        assert!(failed.has_failed());
        assert!(SendTicket::completed().is_complete());
    }

    #[test]
    fn test_check_dest() {
        assert!(check_dest(3, 4).is_ok());
        assert!(matches!(
            check_dest(4, 4),
            Err(TransportError::UnknownPeer { dest: 4, size: 4 })
        ));
    }
}
