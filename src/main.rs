//! fleetstop CLI entry point

use anyhow::{Context, Result};
use fleetstop::config::cli::Cli;
use fleetstop::config::toml::load_config;
use fleetstop::config::{validator, Config, FleetMode, OutputFormat};
use fleetstop::distributed::{exit_code_for, ROOT};
use fleetstop::fleet::{self, FleetReport};
use fleetstop::output::{json, text};
use fleetstop::search::QueensSearch;
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse_args();
    cli.validate()?;

    fleetstop::util::init_logging(cli.debug);

    let config = load_config(&cli)?;
    validator::validate_config(&config).context("Configuration validation failed")?;

    let quiet = config.output.format == OutputFormat::Json && config.output.json_path.is_none();
    if !quiet {
        println!("fleetstop v{}", env!("CARGO_PKG_VERSION"));
        println!();
        text::print_banner(&config);
    }

    if cli.debug {
        eprintln!("DEBUG: {}", config);
    }

    if cli.dry_run {
        println!("Dry run mode - configuration validated successfully");
        return Ok(());
    }

    let report = match config.fleet.mode {
        FleetMode::Local => fleet::run_local_fleet(&config, |_| QueensSearch::new())?,
        FleetMode::Peer => fleet::run_peer(&config, QueensSearch::new())?,
    };

    emit(&config, &report)
}

/// Print or write the report; in peer mode only rank 0 has one
fn emit(config: &Config, report: &FleetReport) -> Result<()> {
    if config.fleet.mode == FleetMode::Peer && config.fleet.rank != ROOT {
        if let Some(me) = report.workers.first() {
            println!("Rank {} finished: {}", me.rank, me.verdict);
        }
        return Ok(());
    }

    match config.output.format {
        OutputFormat::Text => text::print_report(report),
        OutputFormat::Json => json::write_report(report, config.output.json_path.as_deref())?,
    }
    Ok(())
}
