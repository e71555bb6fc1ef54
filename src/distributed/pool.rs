//! Message buffer pool
//!
//! An arena of fixed-size message buffers shared by the mailbox and every
//! outbound send of one worker. Each buffer lives in exactly one place at a time:
//!
//! - the free list
//! - the sending list, paired with the ticket of its in-flight send
//! - the receiving list, while the mailbox has it posted
//! - lent out to the caller that acquired it, as a [`BufferId`]
//!
//! `BufferId` is neither `Clone` nor `Copy`: handing it back to the pool consumes
//! it, so a buffer cannot be released twice or touched after it has been parked.

use super::error::{ProtocolError, ProtocolResult};
use super::protocol::{Packet, Rank, Tag};
use crate::transport::{SendTicket, Transport};
use std::collections::VecDeque;

/// One fixed-size message record
#[derive(Debug, Clone, Default)]
pub struct MessageBuffer {
    /// `[bound, origin]` for `KILL_ALL`, zeros otherwise
    pub payload: [usize; 2],
    /// Destination for sends, source for receives
    pub peer: Rank,
    pub tag: Option<Tag>,
}

impl MessageBuffer {
    fn clear(&mut self) {
        *self = MessageBuffer::default();
    }
}

/// Move-only handle to a lent buffer
#[derive(Debug, PartialEq, Eq)]
pub struct BufferId(usize);

impl BufferId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Snapshot of where every buffer currently is
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PoolCounts {
    pub free: usize,
    pub sending: usize,
    pub receiving: usize,
    pub lent: usize,
    pub total: usize,
}

impl PoolCounts {
    /// Every buffer is accounted for exactly once
    pub fn is_conserved(&self) -> bool {
        self.free + self.sending + self.receiving + self.lent == self.total
    }
}

/// Number of buffers to provision for a fleet of `n` workers
///
/// The protocol sends O(N log N) kill messages plus O(N) result messages, so
/// `4·N²` leaves ample headroom. Two workers get a flat 20.
pub fn provisioned_buffers(n: usize) -> usize {
    if n == 2 {
        20
    } else {
        n.saturating_mul(n).saturating_mul(4).max(4)
    }
}

/// Largest fleet a pool is provisioned for
pub const MAX_FLEET_SIZE: usize = 256;

/// Worker-local buffer arena
pub struct MessageBufferPool {
    buffers: Vec<MessageBuffer>,
    free: VecDeque<usize>,
    sending: Vec<(usize, SendTicket)>,
    receiving: Vec<usize>,
    lent: usize,
    failed_sends: usize,
}

impl MessageBufferPool {
    /// Create a pool with `count` buffers, all free
    pub fn new(count: usize) -> Self {
        Self {
            buffers: vec![MessageBuffer::default(); count],
            free: (0..count).collect(),
            sending: Vec::new(),
            receiving: Vec::new(),
            lent: 0,
            failed_sends: 0,
        }
    }

    /// Create a pool sized for a fleet of `fleet_size` workers
    ///
    /// Panics if the fleet is too large to provision; see [`Self::try_for_fleet`].
    pub fn for_fleet(fleet_size: usize) -> Self {
        Self::new(provisioned_buffers(fleet_size))
    }

    /// Fallible [`Self::for_fleet`]: fleets above [`MAX_FLEET_SIZE`], or an
    /// allocation the system refuses, fail with [`ProtocolError::ProvisionFailed`]
    pub fn try_for_fleet(fleet_size: usize) -> ProtocolResult<Self> {
        let requested = provisioned_buffers(fleet_size);
        let failed = ProtocolError::ProvisionFailed {
            fleet_size,
            requested,
        };
        if fleet_size > MAX_FLEET_SIZE {
            return Err(failed);
        }

        let mut buffers = Vec::new();
        let mut free = VecDeque::new();
        if buffers.try_reserve_exact(requested).is_err() || free.try_reserve_exact(requested).is_err() {
            return Err(failed);
        }
        buffers.resize(requested, MessageBuffer::default());
        free.extend(0..requested);

        Ok(Self {
            buffers,
            free,
            sending: Vec::new(),
            receiving: Vec::new(),
            lent: 0,
            failed_sends: 0,
        })
    }

    /// Take a free buffer
    ///
    /// Reclaims buffers whose sends have completed before giving up with
    /// [`ProtocolError::PoolExhausted`].
    pub fn acquire(&mut self) -> ProtocolResult<BufferId> {
        if self.free.is_empty() {
            self.reap_sends();
        }

        let index = self.free.pop_front().ok_or(ProtocolError::PoolExhausted {
            provisioned: self.buffers.len(),
        })?;
        self.lent += 1;
        Ok(BufferId(index))
    }

    /// Return a lent buffer to the free list
    pub fn release(&mut self, id: BufferId) {
        debug_assert!(self.lent > 0, "release without a lent buffer");
        self.buffers[id.0].clear();
        self.free.push_back(id.0);
        self.lent -= 1;
    }

    /// Hand a buffer over to an in-flight send
    pub fn park_send(&mut self, id: BufferId, ticket: SendTicket) {
        self.sending.push((id.0, ticket));
        self.lent -= 1;
    }

    /// Hand a buffer over to a posted receive
    ///
    /// Returns the slot the mailbox uses to take it back.
    pub fn park_recv(&mut self, id: BufferId) -> usize {
        self.receiving.push(id.0);
        self.lent -= 1;
        id.0
    }

    /// Take a buffer back from the receiving list
    pub fn unpark_recv(&mut self, index: usize) -> Option<BufferId> {
        let position = self.receiving.iter().position(|&slot| slot == index)?;
        self.receiving.swap_remove(position);
        self.lent += 1;
        Some(BufferId(index))
    }

    /// Move every buffer whose send is no longer pending back to the free list
    ///
    /// Returns how many were reclaimed.
    pub fn reap_sends(&mut self) -> usize {
        let mut reclaimed = 0;
        let mut i = 0;
        while i < self.sending.len() {
            if self.sending[i].1.is_complete() {
                let (index, ticket) = self.sending.swap_remove(i);
                if ticket.has_failed() {
                    self.failed_sends += 1;
                    tracing::warn!(
                        peer = self.buffers[index].peer,
                        tag = ?self.buffers[index].tag,
                        "send did not complete, not retried"
                    );
                }
                self.buffers[index].clear();
                self.free.push_back(index);
                reclaimed += 1;
            } else {
                i += 1;
            }
        }
        reclaimed
    }

    /// Send `packet` to `dest`, tracking it with a pool buffer until it completes
    pub fn send_through<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        dest: Rank,
        packet: Packet,
    ) -> ProtocolResult<SendTicket> {
        let id = self.acquire()?;
        {
            let buffer = self.get_mut(&id);
            buffer.payload = packet.payload();
            buffer.peer = dest;
            buffer.tag = Some(packet.tag());
        }

        match transport.start_send(dest, packet) {
            Ok(ticket) => {
                self.park_send(id, ticket.clone());
                Ok(ticket)
            }
            Err(e) => {
                self.release(id);
                Err(e.into())
            }
        }
    }

    #[inline]
    pub fn get(&self, id: &BufferId) -> &MessageBuffer {
        &self.buffers[id.0]
    }

    #[inline]
    pub fn get_mut(&mut self, id: &BufferId) -> &mut MessageBuffer {
        &mut self.buffers[id.0]
    }

    /// Sends that completed with a failure so far
    pub fn failed_sends(&self) -> usize {
        self.failed_sends
    }

    pub fn counts(&self) -> PoolCounts {
        PoolCounts {
            free: self.free.len(),
            sending: self.sending.len(),
            receiving: self.receiving.len(),
            lent: self.lent,
            total: self.buffers.len(),
        }
    }
}
