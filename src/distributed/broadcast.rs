//! Kill-token propagation
//!
//! The holder of a token `{bound, origin}` is responsible for the `bound`
//! consecutive ranks starting at itself, wrapping modulo N. It repeatedly splits its
//! span in two, keeps the lower half and hands the upper half to that half's first
//! rank:
//!
//! ```text
//! N = 8, initiator 0
//!
//!   0 ──{4}──> 4 ──{2}──> 6 ──{1}──> 7
//!   │          └──{1}──> 5
//!   ├──{2}──> 2 ──{1}──> 3
//!   └──{1}──> 1
//! ```
//!
//! Every rank is reached exactly once and the deepest chain is `ceil(log2 N)` hops.

use super::error::ProtocolResult;
use super::pool::MessageBufferPool;
use super::protocol::{KillToken, Packet, Rank};
use crate::transport::Transport;

/// One forward a holder has to issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hop {
    pub dest: Rank,
    pub token: KillToken,
}

/// Forwards `rank` must issue on receiving `token` in a fleet of `size`
///
/// Hops come out largest span first, so the longest subtree starts earliest.
pub fn plan_hops(rank: Rank, size: usize, token: KillToken) -> Vec<Hop> {
    let mut hops = Vec::new();
    if size == 0 {
        return hops;
    }

    let mut span = token.bound.min(size);
    while span > 1 {
        let keep = span.div_ceil(2);
        hops.push(Hop {
            dest: (rank + keep) % size,
            token: KillToken::new(span - keep, token.origin),
        });
        span = keep;
    }
    hops
}

/// Depth of the broadcast tree for `size` ranks
pub fn max_hops(size: usize) -> usize {
    if size <= 1 {
        0
    } else {
        (usize::BITS - (size - 1).leading_zeros()) as usize
    }
}

/// Result of handing a token to the broadcaster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// First sighting; `hops` forwards were issued
    Relayed { hops: usize },
    /// Already forwarded once, dropped
    Duplicate,
}

/// Per-worker forwarding state
#[derive(Debug)]
pub struct KillBroadcaster {
    rank: Rank,
    size: usize,
    forwarded: Option<KillToken>,
    hops_sent: usize,
    duplicates: usize,
}

impl KillBroadcaster {
    pub fn new(rank: Rank, size: usize) -> Self {
        Self {
            rank,
            size,
            forwarded: None,
            hops_sent: 0,
            duplicates: 0,
        }
    }

    /// Start a fleet-wide broadcast naming `origin` as the terminating rank
    pub fn initiate<T: Transport + ?Sized>(
        &mut self,
        origin: Rank,
        pool: &mut MessageBufferPool,
        transport: &mut T,
    ) -> ProtocolResult<ForwardOutcome> {
        tracing::debug!(rank = self.rank, origin, "initiating kill broadcast");
        self.forward(KillToken::new(self.size, origin), pool, transport)
    }

    /// Relay a received token to the rest of this rank's span
    ///
    /// A worker forwards at most once; later tokens are counted and dropped.
    pub fn forward<T: Transport + ?Sized>(
        &mut self,
        token: KillToken,
        pool: &mut MessageBufferPool,
        transport: &mut T,
    ) -> ProtocolResult<ForwardOutcome> {
        if let Some(first) = self.forwarded {
            self.duplicates += 1;
            tracing::debug!(
                rank = self.rank,
                bound = token.bound,
                origin = token.origin,
                first_origin = first.origin,
                "duplicate kill token dropped"
            );
            return Ok(ForwardOutcome::Duplicate);
        }
        self.forwarded = Some(token);

        let hops = plan_hops(self.rank, self.size, token);
        for hop in &hops {
            let ticket = pool.send_through(transport, hop.dest, Packet::KillAll(hop.token))?;
            if ticket.has_failed() {
                tracing::warn!(rank = self.rank, dest = hop.dest, "kill forward failed, not retried");
            }
        }
        self.hops_sent += hops.len();

        tracing::debug!(
            rank = self.rank,
            origin = token.origin,
            hops = hops.len(),
            "kill token forwarded"
        );
        Ok(ForwardOutcome::Relayed { hops: hops.len() })
    }

    /// The token this worker acted on, if any
    pub fn forwarded(&self) -> Option<KillToken> {
        self.forwarded
    }

    pub fn hops_sent(&self) -> usize {
        self.hops_sent
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }
}
