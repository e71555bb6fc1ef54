//! JSON report
//!
//! ```json
//! {
//!   "winner": { "origin": 2, "objective": 50.0, "rendered": "|* ..." },
//!   "fleet_size": 4,
//!   "elapsed_secs": 0.12,
//!   "workers": [ { "rank": 0, "verdict": "coordinator", "reported": false, "hops_sent": 2, "discarded": 0 } ]
//! }
//! ```

use crate::distributed::{Rank, ResultRecord};
use crate::fleet::FleetReport;
use crate::Result;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonReport {
    pub winner: Option<ResultRecord>,
    pub fleet_size: usize,
    pub elapsed_secs: f64,
    pub workers: Vec<JsonWorker>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonWorker {
    pub rank: Rank,
    pub verdict: String,
    /// This rank's row is the reported winner
    pub reported: bool,
    pub hops_sent: usize,
    pub discarded: usize,
}

pub fn build_report(report: &FleetReport) -> JsonReport {
    let reported = report.winner.as_ref().map(|w| w.origin);
    JsonReport {
        winner: report.winner.clone(),
        fleet_size: report.fleet_size,
        elapsed_secs: report.elapsed.as_secs_f64(),
        workers: report
            .workers
            .iter()
            .map(|w| JsonWorker {
                rank: w.rank,
                verdict: w.verdict.name().to_string(),
                reported: reported == Some(w.rank),
                hops_sent: w.hops_sent,
                discarded: w.discarded,
            })
            .collect(),
    }
}

/// Print the report to stdout, or write it to `path` when given
pub fn write_report(report: &FleetReport, path: Option<&Path>) -> Result<()> {
    let json = build_report(report);
    match path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create JSON output {}", path.display()))?;
            serde_json::to_writer_pretty(file, &json).context("Failed to write JSON report")?;
        }
        None => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json).context("Failed to serialize JSON report")?
            );
        }
    }
    Ok(())
}
