//! TOML configuration file parsing

use super::*;
use crate::config::cli::{Cli, ExecutionMode};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<Config> {
    let config: Config = ::toml::from_str(contents)
        .context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut config: Config) -> Result<Config> {
    // Fleet layout
    if let Some(mode) = cli.mode {
        config.fleet.mode = match mode {
            ExecutionMode::Local => FleetMode::Local,
            ExecutionMode::Peer => FleetMode::Peer,
        };
    }
    if let Some(workers) = cli.workers {
        config.fleet.workers = Some(workers);
    }
    if let Some(rank) = cli.rank {
        config.fleet.rank = rank;
    }
    if !cli.peers.is_empty() {
        config.fleet.peers = cli
            .peers
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
    }
    if let Some(check_every) = cli.check_every {
        config.fleet.check_every = check_every;
    }
    if let Some(timeout) = cli.connect_timeout {
        config.fleet.connect_timeout_secs = timeout;
    }

    // Search
    if let Some(size) = cli.problem_size {
        config.search.problem_size = size;
    }
    if cli.seed.is_some() {
        config.search.seed = cli.seed;
    }
    if let Some(limit) = cli.restart_limit {
        config.search.restart_limit = limit;
    }
    if let Some(max) = cli.restart_max {
        config.search.restart_max = max;
    }

    // Output; a JSON path implies JSON output
    if cli.json {
        config.output.format = OutputFormat::Json;
    }
    if let Some(ref path) = cli.json_output {
        config.output.format = OutputFormat::Json;
        config.output.json_path = Some(path.clone());
    }

    Ok(config)
}

/// Build the effective configuration: config file (if any), then CLI overrides
pub fn load_config(cli: &Cli) -> Result<Config> {
    let base = match cli.config {
        Some(ref path) => parse_toml_file(path)?,
        None => Config::default(),
    };
    merge_cli_with_config(cli, base)
}
