//! CLI argument parsing using clap

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutionMode {
    /// Run every rank as a thread of this process (default)
    Local,
    /// Run one rank of a multi-process fleet over TCP
    Peer,
}

/// fleetstop - multi-walk local search with fleet-wide termination
#[derive(Parser, Debug)]
#[command(name = "fleetstop")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Problem size (board size for the queens search)
    #[arg(value_name = "SIZE")]
    pub problem_size: Option<usize>,

    /// TOML configuration file; command-line flags override it
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Execution mode: local or peer
    #[arg(long, value_enum)]
    pub mode: Option<ExecutionMode>,

    // === Fleet Options ===
    /// Number of workers in local mode (default: number of CPUs)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// This process's rank (peer mode)
    #[arg(long, env = "FLEETSTOP_RANK")]
    pub rank: Option<usize>,

    /// Comma-separated listen addresses of all ranks, in rank order (peer mode)
    #[arg(long, env = "FLEETSTOP_PEERS", value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Poll for kill messages every N stop probes
    #[arg(short = 'C', long)]
    pub check_every: Option<usize>,

    /// Seconds allowed for connecting to all peers (peer mode)
    #[arg(long)]
    pub connect_timeout: Option<u64>,

    // === Search Options ===
    /// Fleet-wide base seed (default: derived from the clock)
    #[arg(short = 's', long)]
    pub seed: Option<u64>,

    /// Iterations before a walk restarts
    #[arg(short = 'a', long)]
    pub restart_limit: Option<u64>,

    /// Restarts before a walk gives up
    #[arg(short = 'r', long)]
    pub restart_max: Option<u64>,

    // === Output Options ===
    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Write the JSON report to this file
    #[arg(long)]
    pub json_output: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'D', long)]
    pub debug: bool,

    /// Validate configuration and exit without running
    #[arg(long)]
    pub dry_run: bool,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate CLI arguments
    ///
    /// Only checks what can be judged without the config file; the merged
    /// configuration goes through [`super::validator::validate_config`].
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers == Some(0) {
            anyhow::bail!("workers must be at least 1");
        }
        if self.check_every == Some(0) {
            anyhow::bail!("check_every must be at least 1");
        }
        if self.problem_size == Some(0) {
            anyhow::bail!("problem size must be at least 1");
        }
        if self.mode == Some(ExecutionMode::Local) && (self.rank.is_some() || !self.peers.is_empty()) {
            anyhow::bail!("--rank and --peers only apply to peer mode");
        }
        Ok(())
    }
}
