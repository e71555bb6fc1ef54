//! The always-listening receive slot
//!
//! A worker keeps exactly one receive posted from startup until it exits. The only
//! gap is between taking a completed buffer and reposting, which the caller closes
//! by calling [`Mailbox::post_receive`] again after it has read the buffer.

use super::error::{ProtocolError, ProtocolResult};
use super::pool::{BufferId, MessageBufferPool};
use super::protocol::Envelope;
use crate::transport::Transport;

#[derive(Debug, Default)]
pub struct Mailbox {
    /// Receiving-list slot of the posted buffer
    posted: Option<usize>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_posted(&self) -> bool {
        self.posted.is_some()
    }

    /// Post a receive-from-any into a fresh pool buffer
    pub fn post_receive(&mut self, pool: &mut MessageBufferPool) -> ProtocolResult<()> {
        if self.posted.is_some() {
            return Err(ProtocolError::AlreadyPosted);
        }
        let id = pool.acquire()?;
        self.posted = Some(pool.park_recv(id));
        Ok(())
    }

    /// Check, without blocking, whether the posted receive has completed
    ///
    /// On completion the filled buffer is lent to the caller and the mailbox is
    /// left unposted.
    pub fn poll_completed<T: Transport + ?Sized>(
        &mut self,
        pool: &mut MessageBufferPool,
        transport: &mut T,
    ) -> ProtocolResult<Option<BufferId>> {
        let slot = self.posted.ok_or(ProtocolError::NotPosted)?;
        match transport.try_recv()? {
            Some(envelope) => Ok(Some(self.complete(pool, slot, envelope)?)),
            None => Ok(None),
        }
    }

    /// Block until the posted receive completes
    pub fn wait_completed<T: Transport + ?Sized>(
        &mut self,
        pool: &mut MessageBufferPool,
        transport: &mut T,
    ) -> ProtocolResult<BufferId> {
        let slot = self.posted.ok_or(ProtocolError::NotPosted)?;
        let envelope = transport.recv()?;
        self.complete(pool, slot, envelope)
    }

    /// Withdraw a still-pending receive and free its buffer
    ///
    /// Returns whether anything was posted.
    pub fn cancel(&mut self, pool: &mut MessageBufferPool) -> bool {
        let Some(slot) = self.posted.take() else {
            return false;
        };
        if let Some(id) = pool.unpark_recv(slot) {
            pool.release(id);
        }
        true
    }

    fn complete(
        &mut self,
        pool: &mut MessageBufferPool,
        slot: usize,
        envelope: Envelope,
    ) -> ProtocolResult<BufferId> {
        let id = pool.unpark_recv(slot).ok_or(ProtocolError::NotPosted)?;
        self.posted = None;

        // Result text has no room in the fixed payload; only kill tokens matter here.
        let buffer = pool.get_mut(&id);
        buffer.peer = envelope.source;
        buffer.tag = Some(envelope.tag());
        buffer.payload = envelope.packet.payload();
        Ok(id)
    }
}
