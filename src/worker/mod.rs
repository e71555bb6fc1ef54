//! Worker implementation
//!
//! A worker is one walk of the fleet: it owns a transport (wrapped in its
//! [`TerminationCoordinator`]) and a [`LocalSearch`]. While the search runs, every
//! `check_every`-th stop probe polls the mailbox; once the search returns, the
//! coordinator is stepped to `EXITED`.
//!
//! # Example
//!
//! ```no_run
//! use fleetstop::search::ScriptedSearch;
//! use fleetstop::transport::local_fleet;
//! use fleetstop::worker::{Worker, WorkerSettings};
//!
//! let transport = local_fleet(1).pop().unwrap();
//! let settings = WorkerSettings::solo(8, 42);
//! let worker = Worker::new(transport, ScriptedSearch::finishes(8), settings)?;
//! let termination = worker.run()?;
//! println!("{}", termination.verdict);
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::config::Config;
use crate::distributed::{Phase, ProtocolError, ResultRecord, Termination, TerminationCoordinator};
use crate::search::{derive_seed, time_base_seed, Interrupt, LocalSearch, SearchContext};
use crate::transport::Transport;
use crate::Result;
use anyhow::Context;

/// Per-run knobs every worker of a fleet shares
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub problem_size: usize,
    /// Fleet-wide seed; each rank diversifies it
    pub base_seed: u64,
    pub restart_limit: u64,
    pub restart_max: u64,
    pub check_every: usize,
}

impl WorkerSettings {
    /// Settings from a validated configuration
    ///
    /// The clock seed is drawn here, once, so that all ranks built from the same
    /// settings share it.
    pub fn from_config(config: &Config) -> Self {
        Self {
            problem_size: config.search.problem_size,
            base_seed: config.search.seed.unwrap_or_else(time_base_seed),
            restart_limit: config.search.restart_limit,
            restart_max: config.search.restart_max,
            check_every: config.fleet.check_every.max(1),
        }
    }

    pub fn solo(problem_size: usize, base_seed: u64) -> Self {
        Self {
            problem_size,
            base_seed,
            restart_limit: 100_000,
            restart_max: 100,
            check_every: 1,
        }
    }
}

/// One walk bound to one rank
pub struct Worker<T: Transport, S: LocalSearch> {
    coordinator: TerminationCoordinator<T>,
    search: S,
    settings: WorkerSettings,
}

impl<T: Transport, S: LocalSearch> Worker<T, S> {
    pub fn new(transport: T, search: S, settings: WorkerSettings) -> Result<Self> {
        let rank = transport.rank();
        let coordinator = TerminationCoordinator::new(transport)
            .with_context(|| format!("Failed to set up termination state for rank {}", rank))?;
        Ok(Self {
            coordinator,
            search,
            settings,
        })
    }

    /// Search context for this rank
    pub fn context(&self) -> SearchContext {
        let rank = self.coordinator.rank();
        SearchContext {
            rank,
            fleet_size: self.coordinator.size(),
            problem_size: self.settings.problem_size,
            seed: derive_seed(rank, self.settings.base_seed),
            restart_limit: self.settings.restart_limit,
            restart_max: self.settings.restart_max,
        }
    }

    /// Run the search, then drive the termination protocol to the end
    pub fn run(mut self) -> Result<Termination> {
        let ctx = self.context();
        let rank = ctx.rank;
        tracing::debug!(
            rank,
            seed = ctx.seed,
            search = self.search.name(),
            "worker starting"
        );

        let outcome = {
            let mut probe = MailboxProbe::new(&mut self.coordinator, self.settings.check_every);
            let outcome = self.search.run(&ctx, &mut probe);
            if let Some(err) = probe.error.take() {
                return Err(err).with_context(|| format!("Rank {} failed while searching", rank));
            }
            outcome
        };

        if self.coordinator.phase() == Phase::Running {
            if !outcome.found {
                tracing::warn!(
                    rank,
                    objective = outcome.objective,
                    "restart budget spent without a solution, announcing anyway"
                );
            }
            let record = ResultRecord::from_wire(rank, &outcome.summary)
                .with_context(|| format!("Rank {} produced an unreadable result row", rank))?;
            self.coordinator.finish_local(record)?;
        } else {
            tracing::debug!(rank, phase = %self.coordinator.phase(), "search stopped by fleet");
        }

        self.coordinator
            .run_to_exit()
            .with_context(|| format!("Rank {} failed to terminate cleanly", rank))
    }
}

/// Stop probe handed to the search
///
/// Only every `check_every`-th call touches the mailbox. A protocol error stops the
/// search and is surfaced once it returns.
struct MailboxProbe<'a, T: Transport> {
    coordinator: &'a mut TerminationCoordinator<T>,
    check_every: usize,
    calls: usize,
    error: Option<ProtocolError>,
}

impl<'a, T: Transport> MailboxProbe<'a, T> {
    fn new(coordinator: &'a mut TerminationCoordinator<T>, check_every: usize) -> Self {
        Self {
            coordinator,
            check_every: check_every.max(1),
            calls: 0,
            error: None,
        }
    }
}

impl<T: Transport> Interrupt for MailboxProbe<'_, T> {
    fn should_stop(&mut self) -> bool {
        if self.error.is_some() || self.coordinator.phase() != Phase::Running {
            return true;
        }

        self.calls += 1;
        if self.calls % self.check_every != 0 {
            return false;
        }

        match self.coordinator.check_interrupt() {
            Ok(stop) => stop,
            Err(err) => {
                self.error = Some(err);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::{KillToken, Verdict};
    use crate::search::{SearchOutcome, ScriptedSearch};
    use crate::transport::{local_fleet, MockTransport};

    /// Counts how often it was probed, never finishes on its own
    struct CountingSearch {
        probes: usize,
        stop_on: usize,
    }

    impl LocalSearch for CountingSearch {
        fn name(&self) -> &str {
            "counting"
        }

        fn run(&mut self, ctx: &SearchContext, interrupt: &mut dyn Interrupt) -> SearchOutcome {
            while self.probes < self.stop_on {
                self.probes += 1;
                if interrupt.should_stop() {
                    break;
                }
            }
            SearchOutcome {
                found: false,
                completed: false,
                objective: 0,
                summary: format!("|* {}/({}/{}) | 0 | 0 |", ctx.seed, ctx.rank, ctx.fleet_size),
            }
        }
    }

    #[test]
    fn test_single_worker_wins() {
        let transport = local_fleet(1).pop().unwrap();
        let worker = Worker::new(transport, ScriptedSearch::finishes(8), WorkerSettings::solo(8, 1)).unwrap();
        let termination = worker.run().unwrap();

        assert_eq!(termination.verdict, Verdict::Winner);
        let report = termination.report.unwrap();
        assert_eq!(report.origin, 0);
        assert_eq!(report.objective, 8.0);
    }

    #[test]
    fn test_context_diversifies_seed() {
        let settings = WorkerSettings::solo(10, 77);
        let a = Worker::new(MockTransport::new(0, 2), ScriptedSearch::never(), settings.clone()).unwrap();
        let b = Worker::new(MockTransport::new(1, 2), ScriptedSearch::never(), settings).unwrap();
        assert_eq!(a.context().seed, derive_seed(0, 77));
        assert_ne!(a.context().seed, b.context().seed);
        assert_eq!(b.context().fleet_size, 2);
    }

    #[test]
    fn test_killed_during_search() {
        let transport = MockTransport::new(3, 4);
        transport.inject_kill(2, KillToken::new(1, 1));
        let worker = Worker::new(transport.clone(), ScriptedSearch::never(), WorkerSettings::solo(8, 1)).unwrap();

        let termination = worker.run().unwrap();
        assert_eq!(termination.verdict, Verdict::Loser);
        assert!(termination.report.is_none());
        assert_eq!(termination.hops_sent, 0);
        assert_eq!(transport.shutdown_count(), 1);
        assert!(termination.pool.is_conserved());
    }

    #[test]
    fn test_check_every_spaces_polls() {
        let transport = MockTransport::new(1, 2);
        transport.inject_kill(0, KillToken::new(1, 0));
        let mut settings = WorkerSettings::solo(8, 1);
        settings.check_every = 5;

        let mut worker = Worker::new(
            transport,
            CountingSearch { probes: 0, stop_on: 100 },
            settings,
        )
        .unwrap();
        let ctx = worker.context();
        let mut probe = MailboxProbe::new(&mut worker.coordinator, 5);
        let outcome = worker.search.run(&ctx, &mut probe);
        assert!(!outcome.completed);
        drop(probe);
        assert_eq!(worker.search.probes, 5);
        assert_eq!(worker.coordinator.phase(), Phase::Exited);
    }

    #[test]
    fn test_gave_up_still_announces() {
        let transport = MockTransport::new(2, 3);
        transport.inject_kill(0, KillToken::new(1, 2));
        let worker = Worker::new(transport.clone(), ScriptedSearch::gives_up(3), WorkerSettings::solo(8, 1)).unwrap();

        let termination = worker.run().unwrap();
        assert_eq!(termination.verdict, Verdict::Winner);
        let to_root = transport.sent_to(0);
        assert_eq!(to_root.len(), 2);
    }

    #[test]
    fn test_unreadable_row_is_an_error() {
        struct Garbled;
        impl LocalSearch for Garbled {
            fn name(&self) -> &str {
                "garbled"
            }
            fn run(&mut self, _: &SearchContext, _: &mut dyn Interrupt) -> SearchOutcome {
                SearchOutcome {
                    found: true,
                    completed: true,
                    objective: 1,
                    summary: "no fields".to_string(),
                }
            }
        }

        let worker = Worker::new(MockTransport::new(1, 2), Garbled, WorkerSettings::solo(8, 1)).unwrap();
        let err = worker.run().unwrap_err();
        assert_eq!(crate::distributed::exit_code_for(&err), 2);
    }
}
