//! Local search engines
//!
//! The termination protocol treats the search as opaque: it hands in a context,
//! gets polled through an [`Interrupt`], and takes back a [`SearchOutcome`] whose
//! summary row carries the objective.

pub mod queens;
pub mod scripted;
pub mod seed;

use crate::distributed::Rank;

pub use queens::QueensSearch;
pub use scripted::ScriptedSearch;
pub use seed::{derive_seed, time_base_seed};

/// Everything a search needs to know about its walk
#[derive(Debug, Clone)]
pub struct SearchContext {
    pub rank: Rank,
    pub fleet_size: usize,
    pub problem_size: usize,
    /// Per-worker seed, already diversified
    pub seed: u64,
    /// Iterations before a restart
    pub restart_limit: u64,
    /// Restarts before giving up
    pub restart_max: u64,
}

impl SearchContext {
    /// Context for a single walk, mostly useful in tests
    pub fn solo(problem_size: usize, seed: u64) -> Self {
        Self {
            rank: 0,
            fleet_size: 1,
            problem_size,
            seed,
            restart_limit: 100_000,
            restart_max: 100,
        }
    }
}

/// What a finished (or stopped) search hands back
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    /// A solution was found
    pub found: bool,
    /// False when the search returned because the interrupt fired
    pub completed: bool,
    pub objective: i64,
    /// Rendered result row, see [`crate::output::SummaryFields`]
    pub summary: String,
}

/// Stop probe polled by the search loop
pub trait Interrupt {
    fn should_stop(&mut self) -> bool;
}

/// Interrupt that never fires
pub struct NeverInterrupt;

impl Interrupt for NeverInterrupt {
    fn should_stop(&mut self) -> bool {
        false
    }
}

/// A randomized local search one worker runs
pub trait LocalSearch: Send {
    fn name(&self) -> &str;

    /// Run until a solution is found, the restart budget is spent, or `interrupt`
    /// asks to stop
    fn run(&mut self, ctx: &SearchContext, interrupt: &mut dyn Interrupt) -> SearchOutcome;
}

impl<S: LocalSearch + ?Sized> LocalSearch for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn run(&mut self, ctx: &SearchContext, interrupt: &mut dyn Interrupt) -> SearchOutcome {
        (**self).run(ctx, interrupt)
    }
}
