//! Deterministic stand-in search for protocol tests
//!
//! A `ScriptedSearch` does no work. It reports a fixed objective, optionally only
//! after a delay during which it keeps polling its interrupt like a real search
//! would.

use super::{Interrupt, LocalSearch, SearchContext, SearchOutcome};
use crate::output::SummaryFields;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finish {
    After(Duration),
    Never,
}

#[derive(Debug, Clone)]
pub struct ScriptedSearch {
    objective: i64,
    found: bool,
    finish: Finish,
}

impl ScriptedSearch {
    /// Finish immediately with `objective`
    pub fn finishes(objective: i64) -> Self {
        Self::finishes_after(objective, Duration::ZERO)
    }

    /// Finish with `objective` once `delay` has passed, unless interrupted first
    pub fn finishes_after(objective: i64, delay: Duration) -> Self {
        Self {
            objective,
            found: true,
            finish: Finish::After(delay),
        }
    }

    /// Keep polling until interrupted
    pub fn never() -> Self {
        Self {
            objective: 0,
            found: false,
            finish: Finish::Never,
        }
    }

    /// Finish immediately without a solution
    pub fn gives_up(objective: i64) -> Self {
        Self {
            objective,
            found: false,
            finish: Finish::After(Duration::ZERO),
        }
    }

    fn outcome(&self, ctx: &SearchContext, started: Instant, completed: bool) -> SearchOutcome {
        let summary = SummaryFields {
            seed: ctx.seed,
            rank: ctx.rank,
            fleet_size: ctx.fleet_size,
            objective: self.objective,
            elapsed_secs: started.elapsed().as_secs_f64(),
            ..Default::default()
        }
        .render();

        SearchOutcome {
            found: completed && self.found,
            completed,
            objective: self.objective,
            summary,
        }
    }
}

impl LocalSearch for ScriptedSearch {
    fn name(&self) -> &str {
        "scripted"
    }

    fn run(&mut self, ctx: &SearchContext, interrupt: &mut dyn Interrupt) -> SearchOutcome {
        let started = Instant::now();
        loop {
            if let Finish::After(delay) = self.finish {
                if started.elapsed() >= delay {
                    return self.outcome(ctx, started, true);
                }
            }
            if interrupt.should_stop() {
                return self.outcome(ctx, started, false);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::NeverInterrupt;

    struct StopAfter(usize);

    impl Interrupt for StopAfter {
        fn should_stop(&mut self) -> bool {
            if self.0 == 0 {
                return true;
            }
            self.0 -= 1;
            false
        }
    }

    #[test]
    fn test_finishes_immediately() {
        let ctx = SearchContext::solo(8, 1);
        let outcome = ScriptedSearch::finishes(50).run(&ctx, &mut NeverInterrupt);
        assert!(outcome.found && outcome.completed);
        assert_eq!(outcome.objective, 50);
        assert!(outcome.summary.contains("|       50 |"));
    }

    #[test]
    fn test_never_stops_on_interrupt() {
        let ctx = SearchContext::solo(8, 1);
        let outcome = ScriptedSearch::never().run(&ctx, &mut StopAfter(3));
        assert!(!outcome.completed);
        assert!(!outcome.found);
    }

    #[test]
    fn test_delay_interrupted() {
        let ctx = SearchContext::solo(8, 1);
        let outcome = ScriptedSearch::finishes_after(30, Duration::from_secs(60))
            .run(&ctx, &mut StopAfter(0));
        assert!(!outcome.completed);
    }

    #[test]
    fn test_gives_up() {
        let ctx = SearchContext::solo(8, 1);
        let outcome = ScriptedSearch::gives_up(3).run(&ctx, &mut NeverInterrupt);
        assert!(outcome.completed);
        assert!(!outcome.found);
    }
}
