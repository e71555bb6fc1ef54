//! Result rendering
//!
//! `text` prints the banner, the table header and the winning row; `json` writes a
//! machine-readable report. Both start from the fixed-width result row built here,
//! which is also what travels over the wire to rank 0.

pub mod json;
pub mod text;

use crate::distributed::Rank;

/// Counters that make up one result row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryFields {
    pub seed: u64,
    pub rank: Rank,
    pub fleet_size: usize,
    pub restarts: u64,
    pub objective: i64,
    pub iterations: u64,
    pub local_minima: u64,
    pub swaps: u64,
    pub resets: u64,
    pub elapsed_secs: f64,
}

impl SummaryFields {
    /// Render the `|`-delimited row; the objective is the third pipe-delimited field
    pub fn render(&self) -> String {
        format!(
            "|* {}/({}/{}) | {:5} | {:8} | {:8} | {:8} | {:8} | {:8} | {:8.2} |",
            self.seed,
            self.rank,
            self.fleet_size,
            self.restarts,
            self.objective,
            self.iterations,
            self.local_minima,
            self.swaps,
            self.resets,
            self.elapsed_secs,
        )
    }
}
