//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation.

pub mod cli;
pub mod toml;
pub mod validator;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Complete run configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub fleet: FleetConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// How the fleet is laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FleetMode {
    /// Every rank is a thread of this process
    Local,
    /// This process is one rank of a TCP mesh
    Peer,
}

impl Default for FleetMode {
    fn default() -> Self {
        Self::Local
    }
}

impl fmt::Display for FleetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FleetMode::Local => write!(f, "local"),
            FleetMode::Peer => write!(f, "peer"),
        }
    }
}

/// Fleet configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Number of workers in local mode (None = number of CPUs, capped)
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub mode: FleetMode,
    /// This process's rank in peer mode
    #[serde(default)]
    pub rank: usize,
    /// Listen address of every rank, indexed by rank (peer mode)
    #[serde(default)]
    pub peers: Vec<String>,
    /// Poll the mailbox once every this many stop probes
    #[serde(default = "default_check_every")]
    pub check_every: usize,
    /// Seconds allowed for building the TCP mesh
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_check_every() -> usize {
    1
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            workers: None,
            mode: FleetMode::default(),
            rank: 0,
            peers: Vec::new(),
            check_every: default_check_every(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl FleetConfig {
    /// Number of ranks in the fleet this process belongs to
    pub fn fleet_size(&self) -> usize {
        match self.mode {
            FleetMode::Local => self
                .workers
                .unwrap_or_else(|| num_cpus::get().min(crate::distributed::MAX_FLEET_SIZE)),
            FleetMode::Peer => self.peers.len(),
        }
    }
}

/// Search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Board size for the queens search
    #[serde(default)]
    pub problem_size: usize,
    /// Fleet-wide base seed (None = derived from the clock)
    #[serde(default)]
    pub seed: Option<u64>,
    /// Iterations before a walk restarts
    #[serde(default = "default_restart_limit")]
    pub restart_limit: u64,
    /// Restarts before a walk gives up
    #[serde(default = "default_restart_max")]
    pub restart_max: u64,
}

fn default_restart_limit() -> u64 {
    1_000_000
}

fn default_restart_max() -> u64 {
    1_000
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            problem_size: 0,
            seed: None,
            restart_limit: default_restart_limit(),
            restart_max: default_restart_max(),
        }
    }
}

/// Report format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Text,
    Json,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::Text
    }
}

/// Output configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
    /// Write the JSON report here instead of stdout
    #[serde(default)]
    pub json_path: Option<PathBuf>,
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Configuration:")?;
        writeln!(f, "  Fleet: {}", self.fleet)?;
        writeln!(f, "  Search: {}", self.search)?;
        writeln!(f, "  Output: {}", self.output)?;
        Ok(())
    }
}

impl fmt::Display for FleetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mode={}, workers={}, check_every={}",
            self.mode,
            self.fleet_size(),
            self.check_every
        )?;
        if self.mode == FleetMode::Peer {
            write!(f, ", rank={}, connect_timeout={}s", self.rank, self.connect_timeout_secs)?;
        }
        Ok(())
    }
}

impl fmt::Display for SearchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "problem_size={}, restart_limit={}, restart_max={}",
            self.problem_size, self.restart_limit, self.restart_max
        )?;
        if let Some(seed) = self.seed {
            write!(f, ", seed={}", seed)?;
        }
        Ok(())
    }
}

impl fmt::Display for OutputConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.format, &self.json_path) {
            (OutputFormat::Json, Some(path)) => write!(f, "json -> {}", path.display()),
            (OutputFormat::Json, None) => write!(f, "json"),
            (OutputFormat::Text, _) => write!(f, "text"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.fleet.mode, FleetMode::Local);
        assert_eq!(config.fleet.check_every, 1);
        assert_eq!(config.fleet.connect_timeout_secs, 10);
        assert_eq!(
            config.fleet.fleet_size(),
            num_cpus::get().min(crate::distributed::MAX_FLEET_SIZE)
        );
        assert_eq!(config.output.format, OutputFormat::Text);
    }

    #[test]
    fn test_peer_fleet_size_follows_peers() {
        let fleet = FleetConfig {
            mode: FleetMode::Peer,
            peers: vec!["a:1".into(), "b:2".into(), "c:3".into()],
            workers: Some(8),
            ..Default::default()
        };
        assert_eq!(fleet.fleet_size(), 3);
    }

    #[test]
    fn test_display() {
        let mut config = Config::default();
        config.fleet.workers = Some(4);
        config.search.problem_size = 30;
        let text = config.to_string();
        assert!(text.contains("mode=local, workers=4"));
        assert!(text.contains("problem_size=30"));
    }
}
