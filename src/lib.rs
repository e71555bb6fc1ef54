//! fleetstop - fleet-wide termination for multi-walk local search
//!
//! A fleet of workers each runs an independent randomized local search. The first
//! worker to finish stops everyone else, and exactly one result row reaches rank 0
//! for reporting.
//!
//! # Architecture
//!
//! - **Termination protocol**: per-worker state machine, kill-token broadcast in
//!   O(log N) hops, winner arbitration
//! - **Transports**: in-process crossbeam channels, a TCP mesh driven by tokio, and
//!   a scripted mock
//! - **Searches**: a min-conflicts N-queens walk and a scripted stand-in

pub mod config;
pub mod distributed;
pub mod fleet;
pub mod output;
pub mod search;
pub mod transport;
pub mod util;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use distributed::{Termination, TerminationCoordinator, Verdict};
pub use fleet::{run_local_fleet, run_peer, FleetReport};
pub use transport::Transport;
pub use worker::Worker;

/// Result type used throughout fleetstop
pub type Result<T> = anyhow::Result<T>;
