//! Per-worker termination state machine
//!
//! ```text
//!              finish_local             root: poll empty / KILL_ALL
//!   RUNNING ───────────────> LOCAL_DONE ──> LISTENING ────────────┐
//!     │                          │                                 v
//!     │ KILL_ALL                 └──> NOTIFYING ──> DRAINING    FINALIZING
//!     │  non-root: forward, exit          (announce)     │          │
//!     │  root: claim sender ──────────────────────────────┼─────────>│
//!     v                                                   v          v
//!   EXITED <──────────────────────────────────────────────┴──────────┘
//! ```
//!
//! Every transition is its own method so tests can drive a single step from a
//! scripted inbox. [`TerminationCoordinator::run_to_exit`] simply steps until
//! `EXITED`.
//!
//! Rank 0 is special in three ways: it never announces (it decides), it never
//! drains (it already knows who it broadcast for), and it is the only rank that
//! ever owns a report.

use super::arbiter::{arbitrate, ResultRecord};
use super::broadcast::{ForwardOutcome, KillBroadcaster};
use super::error::{ProtocolError, ProtocolResult};
use super::mailbox::Mailbox;
use super::pool::{BufferId, MessageBufferPool, PoolCounts};
use super::protocol::{KillToken, Packet, Rank, Tag, ROOT};
use crate::transport::Transport;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    LocalDone,
    Notifying,
    Listening,
    Draining,
    Finalizing,
    Exited,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::Running => "RUNNING",
            Phase::LocalDone => "LOCAL_DONE",
            Phase::Notifying => "NOTIFYING",
            Phase::Listening => "LISTENING",
            Phase::Draining => "DRAINING",
            Phase::Finalizing => "FINALIZING",
            Phase::Exited => "EXITED",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a worker's participation ended
///
/// This is the rank's role in stopping the fleet, not whose row was reported:
/// when rank 0's own row beats the claimant's, the claimant is still `Winner` and
/// rank 0 `Coordinator`. Compare [`Termination::rank`] with the report's origin
/// for the latter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// Its own completion terminated the run
    Winner,
    /// Told to stop by someone else's result
    Loser,
    /// Rank 0 relaying and reporting another rank's result
    Coordinator,
}

impl Verdict {
    pub fn name(self) -> &'static str {
        match self {
            Verdict::Winner => "winner",
            Verdict::Loser => "loser",
            Verdict::Coordinator => "coordinator",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Final state of one worker after `EXITED`
#[derive(Debug, Clone, Serialize)]
pub struct Termination {
    pub rank: Rank,
    pub verdict: Verdict,
    /// Only rank 0 carries a report
    pub report: Option<ResultRecord>,
    pub hops_sent: usize,
    pub discarded: usize,
    pub duplicates: usize,
    pub pool: PoolCounts,
}

/// Termination protocol driver for one worker
pub struct TerminationCoordinator<T: Transport> {
    transport: T,
    pool: MessageBufferPool,
    mailbox: Mailbox,
    broadcaster: KillBroadcaster,
    phase: Phase,
    /// This worker's own finished result
    local: Option<ResultRecord>,
    /// Rank whose completion rank 0 acted on
    claimant: Option<Rank>,
    verdict: Option<Verdict>,
    report: Option<ResultRecord>,
    discarded: usize,
}

impl<T: Transport> TerminationCoordinator<T> {
    /// Take ownership of `transport` and post the first receive
    pub fn new(transport: T) -> ProtocolResult<Self> {
        let rank = transport.rank();
        let size = transport.size();

        let mut pool = MessageBufferPool::try_for_fleet(size)?;
        let mut mailbox = Mailbox::new();
        mailbox.post_receive(&mut pool)?;

        Ok(Self {
            transport,
            pool,
            mailbox,
            broadcaster: KillBroadcaster::new(rank, size),
            phase: Phase::Running,
            local: None,
            claimant: None,
            verdict: None,
            report: None,
            discarded: 0,
        })
    }

    pub fn rank(&self) -> Rank {
        self.transport.rank()
    }

    pub fn size(&self) -> usize {
        self.transport.size()
    }

    pub fn is_root(&self) -> bool {
        self.rank() == ROOT
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn verdict(&self) -> Option<Verdict> {
        self.verdict
    }

    pub fn claimant(&self) -> Option<Rank> {
        self.claimant
    }

    pub fn report(&self) -> Option<&ResultRecord> {
        self.report.as_ref()
    }

    pub fn discarded(&self) -> usize {
        self.discarded
    }

    pub fn pool_counts(&self) -> PoolCounts {
        self.pool.counts()
    }

    /// Stop probe called from inside the running search
    ///
    /// Drains whatever has arrived. Returns `true` once the search must stop, which
    /// is also the answer in every phase after `RUNNING`.
    pub fn check_interrupt(&mut self) -> ProtocolResult<bool> {
        if self.phase != Phase::Running {
            return Ok(true);
        }

        while let Some(id) = self.mailbox.poll_completed(&mut self.pool, &mut self.transport)? {
            let (source, tag, payload) = self.take(id);
            if tag != Some(Tag::KillAll) {
                self.discard(source, tag)?;
                continue;
            }

            if self.is_root() {
                tracing::debug!(rank = ROOT, source, "completion announced while searching");
                self.claim(source, Verdict::Coordinator)?;
            } else {
                let token = KillToken::from_payload(payload);
                tracing::debug!(
                    rank = self.rank(),
                    source,
                    origin = token.origin,
                    "told to stop while searching"
                );
                self.broadcaster
                    .forward(token, &mut self.pool, &mut self.transport)?;
                self.verdict = Some(Verdict::Loser);
                self.exit()?;
            }
            return Ok(true);
        }

        Ok(false)
    }

    /// Record this worker's finished result: `RUNNING -> LOCAL_DONE`
    pub fn finish_local(&mut self, record: ResultRecord) -> ProtocolResult<()> {
        self.expect_phase("finish_local", Phase::Running)?;
        tracing::debug!(
            rank = self.rank(),
            objective = record.objective,
            "local search finished"
        );
        self.local = Some(record);
        self.phase = Phase::LocalDone;
        Ok(())
    }

    /// Advance by one transition and return the new phase
    pub fn step(&mut self) -> ProtocolResult<Phase> {
        match self.phase {
            Phase::Running => {
                return Err(ProtocolError::InvalidPhase {
                    operation: "step",
                    phase: Phase::Running.name(),
                })
            }
            Phase::LocalDone => {
                self.phase = if self.is_root() {
                    Phase::Listening
                } else {
                    Phase::Notifying
                };
            }
            Phase::Notifying => self.notify()?,
            Phase::Listening => self.listen()?,
            Phase::Draining => self.drain()?,
            Phase::Finalizing => self.finalize()?,
            Phase::Exited => {}
        }
        Ok(self.phase)
    }

    /// Announce completion to rank 0: `NOTIFYING -> DRAINING`
    pub fn notify(&mut self) -> ProtocolResult<()> {
        self.expect_phase("notify", Phase::Notifying)?;

        let rank = self.rank();
        let ticket = self.pool.send_through(
            &mut self.transport,
            ROOT,
            Packet::KillAll(KillToken::announcement(rank)),
        )?;
        if ticket.has_failed() {
            tracing::warn!(rank, "completion announcement was not delivered");
        }

        tracing::debug!(rank, "announced completion");
        self.phase = Phase::Draining;
        Ok(())
    }

    /// Rank 0 decides who terminated the run: `LISTENING -> FINALIZING`
    ///
    /// Never blocks. An empty poll means nobody beat rank 0 to it.
    pub fn listen(&mut self) -> ProtocolResult<()> {
        self.expect_phase("listen", Phase::Listening)?;

        loop {
            match self.mailbox.poll_completed(&mut self.pool, &mut self.transport)? {
                None => {
                    tracing::debug!(rank = ROOT, "no earlier announcement, winner by default");
                    return self.claim(ROOT, Verdict::Winner);
                }
                Some(id) => {
                    let (source, tag, _) = self.take(id);
                    if tag == Some(Tag::KillAll) {
                        tracing::debug!(rank = ROOT, source, "announcement arrived first");
                        return self.claim(source, Verdict::Coordinator);
                    }
                    self.discard(source, tag)?;
                }
            }
        }
    }

    /// Wait for the authoritative token: `DRAINING -> EXITED`
    ///
    /// Everything else that arrives first is discarded, including tokens that raced
    /// with this worker's own announcement.
    pub fn drain(&mut self) -> ProtocolResult<()> {
        self.expect_phase("drain", Phase::Draining)?;

        let token = loop {
            let id = self.mailbox.wait_completed(&mut self.pool, &mut self.transport)?;
            let (source, tag, payload) = self.take(id);
            if tag == Some(Tag::KillAll) {
                break KillToken::from_payload(payload);
            }
            self.discard(source, tag)?;
        };

        self.broadcaster
            .forward(token, &mut self.pool, &mut self.transport)?;

        let rank = self.rank();
        if token.origin == rank {
            let record = self.local.as_ref().ok_or(ProtocolError::InvalidPhase {
                operation: "send_results",
                phase: Phase::Draining.name(),
            })?;
            let ticket = self.pool.send_through(
                &mut self.transport,
                ROOT,
                Packet::results(&record.rendered),
            )?;
            if ticket.has_failed() {
                tracing::warn!(rank, "result row was not delivered");
            }
            tracing::debug!(rank, objective = record.objective, "confirmed winner, result sent");
            self.verdict = Some(Verdict::Winner);
        } else {
            tracing::debug!(rank, origin = token.origin, "stopped by another result");
            self.verdict = Some(Verdict::Loser);
        }

        self.exit()
    }

    /// Rank 0 settles the report: `FINALIZING -> EXITED`
    pub fn finalize(&mut self) -> ProtocolResult<()> {
        self.expect_phase("finalize", Phase::Finalizing)?;

        let claimant = self.claimant.ok_or(ProtocolError::InvalidPhase {
            operation: "finalize",
            phase: Phase::Finalizing.name(),
        })?;

        let report = if claimant == ROOT {
            self.local.clone()
        } else {
            let text = self.await_results(claimant)?;
            let remote = ResultRecord::from_wire(claimant, &text)?;
            match self.local.clone() {
                Some(own) => Some(arbitrate(remote, own)?),
                None => Some(remote),
            }
        };

        if let Some(record) = &report {
            tracing::debug!(
                rank = ROOT,
                origin = record.origin,
                objective = record.objective,
                "report settled"
            );
        }
        self.report = report;
        self.exit()
    }

    /// Step until `EXITED` and hand back the outcome
    pub fn run_to_exit(mut self) -> ProtocolResult<Termination> {
        while self.phase != Phase::Exited {
            self.step()?;
        }
        Ok(self.termination())
    }

    pub fn termination(&self) -> Termination {
        Termination {
            rank: self.rank(),
            verdict: self.verdict.unwrap_or(Verdict::Loser),
            report: self.report.clone(),
            hops_sent: self.broadcaster.hops_sent(),
            discarded: self.discarded,
            duplicates: self.broadcaster.duplicates(),
            pool: self.pool.counts(),
        }
    }

    /// Rank 0 adopts `claimant`'s completion and broadcasts it
    fn claim(&mut self, claimant: Rank, verdict: Verdict) -> ProtocolResult<()> {
        let outcome = self
            .broadcaster
            .initiate(claimant, &mut self.pool, &mut self.transport)?;
        debug_assert!(matches!(outcome, ForwardOutcome::Relayed { .. }));

        self.claimant = Some(claimant);
        self.verdict = Some(verdict);
        self.phase = Phase::Finalizing;
        Ok(())
    }

    /// Matching receive for the claimant's result row; everything else is dropped
    fn await_results(&mut self, claimant: Rank) -> ProtocolResult<String> {
        loop {
            let envelope = self.transport.recv()?;
            match envelope.packet {
                Packet::SendingResults(text) if envelope.source == claimant => return Ok(text),
                other => {
                    self.discarded += 1;
                    tracing::debug!(
                        rank = ROOT,
                        source = envelope.source,
                        tag = %other.tag(),
                        "late message discarded while awaiting results"
                    );
                }
            }
        }
    }

    /// Read a completed buffer and give it back to the pool
    fn take(&mut self, id: BufferId) -> (Rank, Option<Tag>, [usize; 2]) {
        let buffer = self.pool.get(&id);
        let fields = (buffer.peer, buffer.tag, buffer.payload);
        self.pool.release(id);
        fields
    }

    /// Drop a stale message and listen again
    fn discard(&mut self, source: Rank, tag: Option<Tag>) -> ProtocolResult<()> {
        self.discarded += 1;
        tracing::debug!(
            rank = self.rank(),
            source,
            tag = ?tag,
            phase = %self.phase,
            "stale message discarded"
        );
        self.mailbox.post_receive(&mut self.pool)
    }

    /// Tear down: the only place the posted receive is cancelled
    fn exit(&mut self) -> ProtocolResult<()> {
        self.mailbox.cancel(&mut self.pool);
        self.pool.reap_sends();
        self.transport.shutdown()?;
        self.pool.reap_sends();

        tracing::debug!(
            rank = self.rank(),
            verdict = ?self.verdict,
            discarded = self.discarded,
            "exited"
        );
        self.phase = Phase::Exited;
        Ok(())
    }

    fn expect_phase(&self, operation: &'static str, expected: Phase) -> ProtocolResult<()> {
        if self.phase != expected {
            return Err(ProtocolError::InvalidPhase {
                operation,
                phase: self.phase.name(),
            });
        }
        Ok(())
    }
}
