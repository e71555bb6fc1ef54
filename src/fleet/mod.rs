//! Fleet launchers
//!
//! [`run_local_fleet`] runs every rank as a named thread of this process over
//! crossbeam channels. [`run_peer`] runs the one rank this process owns in a TCP
//! mesh; only rank 0's report carries a winner.

use crate::config::Config;
use crate::distributed::{Rank, ResultRecord, Termination, ROOT};
use crate::search::LocalSearch;
use crate::transport::{local_fleet, TcpTransport};
use crate::worker::{Worker, WorkerSettings};
use crate::Result;
use anyhow::Context;
use std::time::{Duration, Instant};

/// What one run of the fleet produced
#[derive(Debug, Clone)]
pub struct FleetReport {
    /// Result row rank 0 settled on; `None` when this process is not rank 0
    pub winner: Option<ResultRecord>,
    pub fleet_size: usize,
    pub elapsed: Duration,
    /// Terminations of the ranks this process ran, ordered by rank
    pub workers: Vec<Termination>,
}

/// Run `config.fleet.fleet_size()` workers as threads of this process
///
/// `make_search` is called once per rank, on the launching thread.
pub fn run_local_fleet<S, F>(config: &Config, make_search: F) -> Result<FleetReport>
where
    S: LocalSearch + 'static,
    F: Fn(Rank) -> S,
{
    let size = config.fleet.fleet_size();
    if size == 0 {
        anyhow::bail!("a fleet needs at least one worker");
    }
    let settings = WorkerSettings::from_config(config);
    tracing::info!(workers = size, base_seed = settings.base_seed, "starting local fleet");

    let start = Instant::now();
    let mut handles = Vec::with_capacity(size);
    for (rank, transport) in local_fleet(size).into_iter().enumerate() {
        let search = make_search(rank);
        let settings = settings.clone();
        let handle = std::thread::Builder::new()
            .name(format!("rank-{}", rank))
            .spawn(move || Worker::new(transport, search, settings)?.run())
            .with_context(|| format!("Failed to spawn worker thread for rank {}", rank))?;
        handles.push(handle);
    }

    // Join everyone before reporting the first failure so no thread is left behind.
    let mut workers = Vec::with_capacity(size);
    let mut first_error = None;
    for handle in handles {
        let outcome = handle
            .join()
            .map_err(|_| anyhow::anyhow!("Worker thread panicked"))?;
        match outcome {
            Ok(termination) => workers.push(termination),
            Err(err) => {
                tracing::error!(error = %format!("{:#}", err), "worker failed");
                first_error.get_or_insert(err);
            }
        }
    }
    if let Some(err) = first_error {
        return Err(err);
    }

    workers.sort_by_key(|t| t.rank);
    let winner = workers
        .iter()
        .find(|t| t.rank == ROOT)
        .and_then(|t| t.report.clone());

    Ok(FleetReport {
        winner,
        fleet_size: size,
        elapsed: start.elapsed(),
        workers,
    })
}

/// Run this process's rank of a TCP fleet
pub fn run_peer<S>(config: &Config, search: S) -> Result<FleetReport>
where
    S: LocalSearch,
{
    let rank = config.fleet.rank;
    let peers = &config.fleet.peers;
    let timeout = Duration::from_secs(config.fleet.connect_timeout_secs);
    tracing::info!(rank, fleet_size = peers.len(), "joining peer fleet");

    let start = Instant::now();
    let transport = TcpTransport::connect(rank, peers, timeout)
        .with_context(|| format!("Rank {} could not join the fleet", rank))?;
    tracing::info!(rank, elapsed_ms = start.elapsed().as_millis() as u64, "mesh established");

    let settings = WorkerSettings::from_config(config);
    let termination = Worker::new(transport, search, settings)?.run()?;

    Ok(FleetReport {
        winner: termination.report.clone(),
        fleet_size: peers.len(),
        elapsed: start.elapsed(),
        workers: vec![termination],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::Verdict;
    use crate::config::FleetMode;
    use crate::search::{QueensSearch, ScriptedSearch};
    use std::thread;

    fn config(workers: usize, problem_size: usize) -> Config {
        let mut config = Config::default();
        config.fleet.workers = Some(workers);
        config.search.problem_size = problem_size;
        config.search.seed = Some(12345);
        config
    }

    #[test]
    fn test_first_finisher_wins() {
        let slow = Duration::from_secs(5);
        let report = run_local_fleet(&config(4, 8), |rank| match rank {
            0 => ScriptedSearch::finishes_after(30, slow),
            1 => ScriptedSearch::finishes_after(50, slow),
            2 => ScriptedSearch::finishes(50),
            _ => ScriptedSearch::finishes_after(10, slow),
        })
        .unwrap();

        let winner = report.winner.unwrap();
        assert_eq!(winner.origin, 2);
        assert_eq!(winner.objective, 50.0);
        assert!(report.elapsed < slow);

        let verdicts: Vec<_> = report.workers.iter().map(|w| w.verdict).collect();
        assert_eq!(
            verdicts,
            vec![Verdict::Coordinator, Verdict::Loser, Verdict::Winner, Verdict::Loser]
        );
        assert!(report.workers.iter().all(|w| w.pool.is_conserved()));
    }

    #[test]
    fn test_root_finishes_first() {
        let report = run_local_fleet(&config(5, 8), |rank| {
            if rank == 0 {
                ScriptedSearch::finishes(20)
            } else {
                ScriptedSearch::never()
            }
        })
        .unwrap();

        assert_eq!(report.winner.unwrap().origin, 0);
        assert_eq!(report.workers[0].verdict, Verdict::Winner);
        assert!(report.workers[1..].iter().all(|w| w.verdict == Verdict::Loser));
        // Every non-root rank is reached exactly once.
        let forwards: usize = report.workers.iter().map(|w| w.hops_sent).sum();
        assert_eq!(forwards, 4);
    }

    #[test]
    fn test_single_worker() {
        let report = run_local_fleet(&config(1, 8), |_| ScriptedSearch::finishes(8)).unwrap();
        assert_eq!(report.fleet_size, 1);
        assert_eq!(report.workers.len(), 1);
        assert_eq!(report.workers[0].verdict, Verdict::Winner);
        assert_eq!(report.winner.unwrap().objective, 8.0);
    }

    #[test]
    fn test_everyone_finishes_at_once() {
        let report = run_local_fleet(&config(6, 8), |rank| ScriptedSearch::finishes(rank as i64)).unwrap();

        let winner = report.winner.unwrap();
        let winners: Vec<_> = report
            .workers
            .iter()
            .filter(|w| w.verdict == Verdict::Winner)
            .map(|w| w.rank)
            .collect();
        assert_eq!(winners.len(), 1);
        if winners[0] != ROOT {
            assert_eq!(report.workers[0].verdict, Verdict::Coordinator);
        }
        // Rank 0's own row only replaces the claimant's when strictly better.
        assert_eq!(winner.origin, winners[0]);
        assert_eq!(winner.objective, winners[0] as f64);
        assert!(report.workers.iter().all(|w| w.pool.is_conserved()));
    }

    #[test]
    fn test_queens_fleet() {
        let report = run_local_fleet(&config(3, 8), |_| QueensSearch::new()).unwrap();
        let winner = report.winner.unwrap();
        assert_eq!(winner.objective, 8.0);
        assert!(winner.rendered.starts_with("|* "));
    }

    fn free_addresses(n: usize) -> Vec<String> {
        let listeners: Vec<_> = (0..n)
            .map(|_| std::net::TcpListener::bind("127.0.0.1:0").unwrap())
            .collect();
        listeners
            .iter()
            .map(|l| l.local_addr().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_peer_fleet_over_tcp() {
        let slow = Duration::from_secs(3);
        let peers = free_addresses(4);

        let handles: Vec<_> = (0..4)
            .map(|rank| {
                let mut peer_config = config(1, 8);
                peer_config.fleet.workers = None;
                peer_config.fleet.mode = FleetMode::Peer;
                peer_config.fleet.rank = rank;
                peer_config.fleet.peers = peers.clone();
                let search = match rank {
                    0 => ScriptedSearch::finishes_after(30, slow),
                    1 => ScriptedSearch::finishes_after(50, slow),
                    2 => ScriptedSearch::finishes(50),
                    _ => ScriptedSearch::finishes_after(10, slow),
                };
                thread::spawn(move || run_peer(&peer_config, search))
            })
            .collect();

        let reports: Vec<FleetReport> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();

        let root = &reports[0];
        let winner = root.winner.as_ref().unwrap();
        assert_eq!(winner.origin, 2);
        assert_eq!(winner.objective, 50.0);
        assert!(root.elapsed < slow);
        assert_eq!(root.fleet_size, 4);

        for (rank, report) in reports.iter().enumerate() {
            assert_eq!(report.workers.len(), 1);
            let termination = &report.workers[0];
            assert_eq!(termination.rank, rank);
            assert!(termination.pool.is_conserved());
            if rank != ROOT {
                assert!(report.winner.is_none());
            }
        }
        assert_eq!(reports[0].workers[0].verdict, Verdict::Coordinator);
        assert_eq!(reports[2].workers[0].verdict, Verdict::Winner);
        assert_eq!(reports[1].workers[0].verdict, Verdict::Loser);
        assert_eq!(reports[3].workers[0].verdict, Verdict::Loser);
    }
}
