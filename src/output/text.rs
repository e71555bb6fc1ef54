//! Human-readable text output

use crate::config::Config;
use crate::distributed::Verdict;
use crate::fleet::FleetReport;

/// Column header matching [`super::SummaryFields::render`]
pub fn table_header() -> String {
    format!(
        "|  {:<16}| {:>5} | {:>8} | {:>8} | {:>8} | {:>8} | {:>8} | {:>8} |",
        "seed/(rank/N)", "rest", "obj", "iters", "loc min", "swaps", "resets", "time(s)"
    )
}

/// Print the run banner
pub fn print_banner(config: &Config) {
    println!("═══════════════════════════════════════════════════════════");
    println!("                 fleetstop multi-walk search");
    println!("═══════════════════════════════════════════════════════════");
    println!();
    println!("Problem size:   {}", config.search.problem_size);
    match config.search.seed {
        Some(seed) => println!("Base seed:      {}", seed),
        None => println!("Base seed:      time-derived"),
    }
    println!("Restart limit:  {}", config.search.restart_limit);
    println!("Restart max:    {}", config.search.restart_max);
    println!("Check every:    {} probe(s)", config.fleet.check_every);
    println!();
}

/// Print the fleet report produced by rank 0
pub fn print_report(report: &FleetReport) {
    println!("{}", table_header());
    match &report.winner {
        Some(winner) => println!("{}", winner.rendered),
        None => println!("(no result)"),
    }
    println!();

    println!("Workers:        {}", report.fleet_size);
    println!("Elapsed Time:   {:.3}s", report.elapsed.as_secs_f64());
    if let Some(winner) = &report.winner {
        println!("Winning rank:   {}", winner.origin);
    }

    let relayed: usize = report.workers.iter().map(|w| w.hops_sent).sum();
    let discarded: usize = report.workers.iter().map(|w| w.discarded).sum();
    let losers = report
        .workers
        .iter()
        .filter(|w| w.verdict == Verdict::Loser)
        .count();
    if !report.workers.is_empty() {
        println!("Kill forwards:  {}", relayed);
        println!("Stopped early:  {}", losers);
        if discarded > 0 {
            println!("Stale messages: {}", discarded);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::SummaryFields;

    #[test]
    fn test_header_lines_up_with_row() {
        let row = SummaryFields {
            seed: 1234567,
            rank: 3,
            fleet_size: 8,
            ..Default::default()
        }
        .render();
        let header = table_header();

        let header_pipes: Vec<_> = header.match_indices('|').map(|(i, _)| i).collect();
        let row_pipes: Vec<_> = row.match_indices('|').map(|(i, _)| i).collect();
        // Everything after the seed column is fixed width.
        assert_eq!(header_pipes.len(), row_pipes.len());
        let header_tail: Vec<_> = header_pipes.windows(2).skip(1).map(|w| w[1] - w[0]).collect();
        let row_tail: Vec<_> = row_pipes.windows(2).skip(1).map(|w| w[1] - w[0]).collect();
        assert_eq!(header_tail, row_tail);
    }
}
