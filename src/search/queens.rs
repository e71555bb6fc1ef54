//! Min-conflicts N-queens
//!
//! The board is a permutation: queen `i` sits in row `i`, column `cols[i]`, so rows
//! and columns never clash and only the two diagonal families need counting. Each
//! iteration picks the most attacked queen and swaps it with whichever partner lowers
//! the conflict count most. When no swap helps, the queen is frozen for a while;
//! once too many queens are frozen a slice of the board is reshuffled. A walk that
//! stalls for `restart_limit` iterations starts over from a fresh permutation.

use super::{Interrupt, LocalSearch, SearchContext, SearchOutcome};
use crate::output::SummaryFields;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::time::Instant;

/// Iterations a queen stays frozen after a local minimum
const FREEZE_LOC_MIN: u64 = 3;
/// Iterations a swapped queen stays frozen
const FREEZE_SWAP: u64 = 0;
/// Share of the board reshuffled on a reset, in percent
const RESET_PERCENT: usize = 10;

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    iterations: u64,
    local_minima: u64,
    swaps: u64,
    resets: u64,
    restarts: u64,
}

/// Board state with incrementally maintained diagonal counts
struct Board {
    n: usize,
    cols: Vec<usize>,
    /// Queens per `row + col` diagonal
    up: Vec<u32>,
    /// Queens per `row - col + n - 1` diagonal
    down: Vec<u32>,
    /// Sum over all diagonals of `count - 1`, zero when solved
    cost: i64,
}

impl Board {
    fn new(cols: Vec<usize>) -> Self {
        let n = cols.len();
        let mut board = Self {
            n,
            cols: Vec::new(),
            up: vec![0; 2 * n.max(1) - 1],
            down: vec![0; 2 * n.max(1) - 1],
            cost: 0,
        };
        for (row, &col) in cols.iter().enumerate() {
            board.place(row, col);
        }
        board.cols = cols;
        board
    }

    fn random(n: usize, rng: &mut Xoshiro256PlusPlus) -> Self {
        let mut cols: Vec<usize> = (0..n).collect();
        cols.shuffle(rng);
        Self::new(cols)
    }

    #[inline]
    fn diagonals(&self, row: usize, col: usize) -> (usize, usize) {
        (row + col, row + self.n - 1 - col)
    }

    fn place(&mut self, row: usize, col: usize) {
        let (u, d) = self.diagonals(row, col);
        if self.up[u] > 0 {
            self.cost += 1;
        }
        if self.down[d] > 0 {
            self.cost += 1;
        }
        self.up[u] += 1;
        self.down[d] += 1;
    }

    fn remove(&mut self, row: usize, col: usize) {
        let (u, d) = self.diagonals(row, col);
        self.up[u] -= 1;
        self.down[d] -= 1;
        if self.up[u] > 0 {
            self.cost -= 1;
        }
        if self.down[d] > 0 {
            self.cost -= 1;
        }
    }

    fn swap(&mut self, i: usize, j: usize) {
        let (ci, cj) = (self.cols[i], self.cols[j]);
        self.remove(i, ci);
        self.remove(j, cj);
        self.place(i, cj);
        self.place(j, ci);
        self.cols.swap(i, j);
    }

    /// Conflict count after swapping `i` and `j`, board left unchanged
    fn cost_if_swapped(&mut self, i: usize, j: usize) -> i64 {
        self.swap(i, j);
        let cost = self.cost;
        self.swap(i, j);
        cost
    }

    /// Other queens attacking queen `row`
    fn attacks(&self, row: usize) -> u32 {
        let (u, d) = self.diagonals(row, self.cols[row]);
        (self.up[u] - 1) + (self.down[d] - 1)
    }

    fn attacked_queens(&self) -> usize {
        (0..self.n).filter(|&row| self.attacks(row) > 0).count()
    }
}

/// Demonstration search: place N queens with no two attacking
#[derive(Debug, Default)]
pub struct QueensSearch;

impl QueensSearch {
    pub fn new() -> Self {
        Self
    }

    /// Most attacked queen that is not frozen, ties broken at random
    fn select_queen(
        board: &Board,
        frozen_until: &[u64],
        iteration: u64,
        rng: &mut Xoshiro256PlusPlus,
    ) -> Option<usize> {
        let mut best = 0;
        let mut chosen = None;
        let mut ties = 0u32;
        for row in 0..board.n {
            if frozen_until[row] > iteration {
                continue;
            }
            let attacks = board.attacks(row);
            if attacks == 0 || attacks < best {
                continue;
            }
            if attacks > best {
                best = attacks;
                ties = 0;
            }
            ties += 1;
            if rng.gen_range(0..ties) == 0 {
                chosen = Some(row);
            }
        }
        chosen
    }

    /// Partner giving the lowest cost after a swap, ties broken at random
    fn select_partner(board: &mut Board, queen: usize, rng: &mut Xoshiro256PlusPlus) -> (usize, i64) {
        let mut best_cost = i64::MAX;
        let mut partner = queen;
        let mut ties = 0u32;
        for other in 0..board.n {
            if other == queen {
                continue;
            }
            let cost = board.cost_if_swapped(queen, other);
            if cost < best_cost {
                best_cost = cost;
                partner = other;
                ties = 1;
            } else if cost == best_cost {
                ties += 1;
                if rng.gen_range(0..ties) == 0 {
                    partner = other;
                }
            }
        }
        (partner, best_cost)
    }

    fn reset(board: &mut Board, frozen_until: &mut [u64], rng: &mut Xoshiro256PlusPlus) {
        let count = (board.n * RESET_PERCENT / 100).max(2).min(board.n);
        for _ in 0..count {
            let i = rng.gen_range(0..board.n);
            let j = rng.gen_range(0..board.n);
            if i != j {
                board.swap(i, j);
            }
        }
        frozen_until.iter_mut().for_each(|f| *f = 0);
    }

    fn outcome(
        ctx: &SearchContext,
        board: &Board,
        counters: Counters,
        started: Instant,
        completed: bool,
    ) -> SearchOutcome {
        let objective = (board.n - board.attacked_queens()) as i64;
        let summary = SummaryFields {
            seed: ctx.seed,
            rank: ctx.rank,
            fleet_size: ctx.fleet_size,
            restarts: counters.restarts,
            objective,
            iterations: counters.iterations,
            local_minima: counters.local_minima,
            swaps: counters.swaps,
            resets: counters.resets,
            elapsed_secs: started.elapsed().as_secs_f64(),
        }
        .render();

        SearchOutcome {
            found: board.cost == 0,
            completed,
            objective,
            summary,
        }
    }
}

impl LocalSearch for QueensSearch {
    fn name(&self) -> &str {
        "queens"
    }

    fn run(&mut self, ctx: &SearchContext, interrupt: &mut dyn Interrupt) -> SearchOutcome {
        let started = Instant::now();
        let n = ctx.problem_size;
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(ctx.seed);
        let mut counters = Counters::default();

        let mut board = Board::random(n, &mut rng);
        let mut frozen_until = vec![0u64; n];
        let reset_limit = (n / 5).max(1);
        let mut since_restart = 0u64;

        while board.cost > 0 {
            if interrupt.should_stop() {
                return Self::outcome(ctx, &board, counters, started, false);
            }

            if since_restart >= ctx.restart_limit {
                if counters.restarts >= ctx.restart_max {
                    tracing::debug!(rank = ctx.rank, restarts = counters.restarts, "restart budget spent");
                    return Self::outcome(ctx, &board, counters, started, true);
                }
                counters.restarts += 1;
                since_restart = 0;
                board = Board::random(n, &mut rng);
                frozen_until.iter_mut().for_each(|f| *f = 0);
                continue;
            }

            counters.iterations += 1;
            since_restart += 1;
            let iteration = counters.iterations;

            let Some(queen) = Self::select_queen(&board, &frozen_until, iteration, &mut rng) else {
                // Every attacked queen is frozen.
                counters.resets += 1;
                Self::reset(&mut board, &mut frozen_until, &mut rng);
                continue;
            };

            let (partner, cost) = Self::select_partner(&mut board, queen, &mut rng);
            if cost < board.cost {
                board.swap(queen, partner);
                counters.swaps += 1;
                frozen_until[queen] = iteration + FREEZE_SWAP;
                frozen_until[partner] = iteration + FREEZE_SWAP;
                continue;
            }

            // Local minimum: take a plateau move now and then, otherwise freeze.
            counters.local_minima += 1;
            if cost == board.cost && rng.gen_bool(0.5) {
                board.swap(queen, partner);
                counters.swaps += 1;
            } else {
                frozen_until[queen] = iteration + FREEZE_LOC_MIN;
            }

            let frozen = frozen_until.iter().filter(|&&f| f > iteration).count();
            if frozen >= reset_limit {
                counters.resets += 1;
                Self::reset(&mut board, &mut frozen_until, &mut rng);
            }
        }

        Self::outcome(ctx, &board, counters, started, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::arbiter::objective_field;
    use crate::search::NeverInterrupt;

    fn brute_cost(cols: &[usize]) -> i64 {
        let n = cols.len();
        let mut up = vec![0i64; 2 * n - 1];
        let mut down = vec![0i64; 2 * n - 1];
        for (row, &col) in cols.iter().enumerate() {
            up[row + col] += 1;
            down[row + n - 1 - col] += 1;
        }
        up.iter().chain(down.iter()).map(|&c| (c - 1).max(0)).sum()
    }

    #[test]
    fn test_incremental_cost_matches_recount() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        let mut board = Board::random(12, &mut rng);
        assert_eq!(board.cost, brute_cost(&board.cols));

        for _ in 0..200 {
            let i = rng.gen_range(0..12);
            let j = rng.gen_range(0..12);
            if i == j {
                continue;
            }
            let predicted = board.cost_if_swapped(i, j);
            board.swap(i, j);
            assert_eq!(board.cost, predicted);
            assert_eq!(board.cost, brute_cost(&board.cols));
        }
    }

    #[test]
    fn test_solved_board_has_no_attacks() {
        let board = Board::new(vec![1, 3, 0, 2]);
        assert_eq!(board.cost, 0);
        assert_eq!(board.attacked_queens(), 0);
    }

    #[test]
    fn test_solves_small_boards() {
        for n in [4, 8, 20] {
            let ctx = SearchContext::solo(n, 42);
            let outcome = QueensSearch::new().run(&ctx, &mut NeverInterrupt);
            assert!(outcome.found, "n = {} not solved", n);
            assert!(outcome.completed);
            assert_eq!(outcome.objective, n as i64);
            assert_eq!(objective_field(&outcome.summary).unwrap(), n as f64);
        }
    }

    #[test]
    fn test_same_seed_same_walk() {
        let ctx = SearchContext::solo(16, 99);
        let a = QueensSearch::new().run(&ctx, &mut NeverInterrupt);
        let b = QueensSearch::new().run(&ctx, &mut NeverInterrupt);
        // Rows differ only in the elapsed time column.
        let strip = |s: &str| s.rsplitn(3, '|').nth(2).map(str::to_string);
        assert_eq!(strip(&a.summary), strip(&b.summary));
    }

    #[test]
    fn test_interrupt_stops_search() {
        struct StopNow;
        impl Interrupt for StopNow {
            fn should_stop(&mut self) -> bool {
                true
            }
        }

        let ctx = SearchContext::solo(200, 1);
        let outcome = QueensSearch::new().run(&ctx, &mut StopNow);
        assert!(!outcome.completed);
        assert!(!outcome.found);
    }

    #[test]
    fn test_unsolvable_board_exhausts_restarts() {
        let mut ctx = SearchContext::solo(3, 5);
        ctx.restart_limit = 50;
        ctx.restart_max = 2;
        let outcome = QueensSearch::new().run(&ctx, &mut NeverInterrupt);
        assert!(!outcome.found);
        assert!(outcome.completed);
        assert!(outcome.objective < 3);
    }
}
