//! Termination detection, kill broadcast and winner arbitration
//!
//! Each worker of a fleet races its own search. The first to finish announces it to
//! rank 0, rank 0 broadcasts a kill token naming the terminating rank, and exactly
//! one result row travels back to rank 0 for reporting.
//!
//! # Modules
//!
//! - `protocol`: message kinds, kill tokens and the TCP frame codec
//! - `pool`: worker-local arena of message buffers
//! - `mailbox`: the single always-posted receive
//! - `broadcast`: O(log N) kill-token propagation
//! - `arbiter`: result rows and winner selection
//! - `coordinator`: the per-worker state machine tying it together
//! - `error`: protocol and transport error types

pub mod arbiter;
pub mod broadcast;
pub mod coordinator;
pub mod error;
pub mod mailbox;
pub mod pool;
pub mod protocol;

// Re-export key types
pub use arbiter::{arbitrate, ResultRecord};
pub use broadcast::{ForwardOutcome, KillBroadcaster};
pub use coordinator::{Phase, Termination, TerminationCoordinator, Verdict};
pub use error::{exit_code_for, ProtocolError, ProtocolResult, TransportError};
pub use mailbox::Mailbox;
pub use pool::{MessageBufferPool, PoolCounts, MAX_FLEET_SIZE};
pub use protocol::{KillToken, Packet, Rank, Tag, ROOT};
