//! Configuration validation

use super::*;
use crate::distributed::MAX_FLEET_SIZE;
use anyhow::Result;
use std::collections::HashSet;

/// Validate complete configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_fleet(&config.fleet)?;
    validate_search(&config.search)?;
    validate_output(&config.output)?;
    Ok(())
}

/// Validate fleet layout
pub fn validate_fleet(fleet: &FleetConfig) -> Result<()> {
    if fleet.check_every == 0 {
        anyhow::bail!("fleet.check_every must be at least 1");
    }

    match fleet.mode {
        FleetMode::Local => {
            if fleet.workers == Some(0) {
                anyhow::bail!("fleet.workers must be at least 1");
            }
        }
        FleetMode::Peer => validate_peers(fleet)?,
    }

    let size = fleet.fleet_size();
    if size > MAX_FLEET_SIZE {
        anyhow::bail!(
            "fleet of {} workers is above the supported maximum of {}",
            size,
            MAX_FLEET_SIZE
        );
    }

    Ok(())
}

fn validate_peers(fleet: &FleetConfig) -> Result<()> {
    if fleet.peers.is_empty() {
        anyhow::bail!("peer mode needs at least one address in fleet.peers");
    }
    if fleet.rank >= fleet.peers.len() {
        anyhow::bail!(
            "fleet.rank {} is out of range for {} peers",
            fleet.rank,
            fleet.peers.len()
        );
    }
    if let Some(workers) = fleet.workers {
        if workers != fleet.peers.len() {
            anyhow::bail!(
                "fleet.workers is {} but {} peer addresses were given",
                workers,
                fleet.peers.len()
            );
        }
    }

    let mut seen = HashSet::new();
    for (rank, addr) in fleet.peers.iter().enumerate() {
        if !addr.contains(':') {
            anyhow::bail!("peer {} address {:?} has no port", rank, addr);
        }
        if !seen.insert(addr.as_str()) {
            anyhow::bail!("peer address {} is listed twice", addr);
        }
    }

    if fleet.connect_timeout_secs == 0 {
        anyhow::bail!("fleet.connect_timeout_secs must be at least 1");
    }
    Ok(())
}

/// Validate search parameters
pub fn validate_search(search: &SearchConfig) -> Result<()> {
    if search.problem_size == 0 {
        anyhow::bail!("problem size must be at least 1 (pass SIZE or set search.problem_size)");
    }
    if search.restart_limit == 0 {
        anyhow::bail!("search.restart_limit must be at least 1");
    }
    Ok(())
}

/// Validate output configuration
pub fn validate_output(output: &OutputConfig) -> Result<()> {
    if output.json_path.is_some() && output.format != OutputFormat::Json {
        anyhow::bail!("output.json_path requires output.format = \"json\"");
    }
    Ok(())
}
