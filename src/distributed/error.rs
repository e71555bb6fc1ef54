//! Error taxonomy for the termination protocol and its transports
//!
//! Only two conditions are fatal by design: an exhausted buffer pool and a result
//! row the arbiter cannot order. Duplicate kill tokens and stale messages are not
//! errors at all; the coordinator drops them and keeps going.

use super::protocol::Rank;
use thiserror::Error;

/// Failures raised by a [`crate::transport::Transport`] implementation
#[derive(Debug, Error)]
pub enum TransportError {
    /// Every peer that could send to this rank is gone and nothing is queued
    #[error("rank {rank} lost every peer before a message arrived")]
    Disconnected { rank: Rank },

    /// Destination outside the fleet
    #[error("destination rank {dest} is outside the fleet of {size}")]
    UnknownPeer { dest: Rank, size: usize },

    /// Connection setup failed (wrong hello, version mismatch, timeout)
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Frame length prefix above the accepted maximum
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    /// Buffer shorter than its length prefix announces
    #[error("incomplete frame: need {need} bytes, got {got}")]
    Incomplete { need: usize, got: usize },

    #[error("failed to encode frame")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode frame")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures raised by the protocol components
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Pool sizing assumption violated
    #[error("message buffer pool exhausted: all {provisioned} buffers are in use")]
    PoolExhausted { provisioned: usize },

    /// The pool for this fleet size could not be allocated
    #[error("cannot provision {requested} message buffers for a fleet of {fleet_size}")]
    ProvisionFailed { fleet_size: usize, requested: usize },

    /// A result row without a usable objective field
    #[error("malformed result from rank {origin}: {reason}")]
    MalformedResult { origin: Rank, reason: String },

    #[error("mailbox already has a posted receive")]
    AlreadyPosted,

    #[error("mailbox has no posted receive")]
    NotPosted,

    /// A transition was requested from a phase that does not allow it
    #[error("`{operation}` is not valid in phase {phase}")]
    InvalidPhase {
        operation: &'static str,
        phase: &'static str,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ProtocolError {
    /// Process exit code for this error
    ///
    /// `2` for a malformed result, `3` for an exhausted pool, `1` otherwise.
    pub fn exit_code(&self) -> u8 {
        match self {
            ProtocolError::MalformedResult { .. } => 2,
            ProtocolError::PoolExhausted { .. } | ProtocolError::ProvisionFailed { .. } => 3,
            _ => 1,
        }
    }
}

/// Result alias for protocol operations
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Map an application error to a process exit code
///
/// Walks the cause chain looking for a [`ProtocolError`]; anything else is `1`.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ProtocolError>())
        .map(ProtocolError::exit_code)
        .unwrap_or(1)
}
