//! Sliding-window coins selection.
//!
//! Maintains a two-pointer window `[lo, hi)` over the descending-amount
//! candidate array. Each step includes the candidate at `hi`; while either
//! upper bound is violated the candidate at `lo` is excluded. Whenever the
//! window meets the target it is recorded if it beats the incumbent
//! (more candidates, or as many with a smaller total amount). Each index is
//! pushed and popped at most once, so a run is O(n).

use crate::solver::{Candidate, CoinsSelector, SolverCore};
use harbor_core::amount::Amount;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Sliding-window solver. Fast and admissible but not guaranteed optimal;
/// pair it with [`BranchAndBoundSelector`](crate::BranchAndBoundSelector)
/// and keep the better solution.
pub struct SlidingWindowSelector {
    core: SolverCore,
}

impl SlidingWindowSelector {
    /// Build a solver over `candidates` with the given bounds.
    pub fn new(
        candidates: Vec<Candidate>,
        target_amount: Amount,
        target_amount_ceiling: Amount,
        size_ceiling: usize,
    ) -> Self {
        Self {
            core: SolverCore::new(candidates, target_amount, target_amount_ceiling, size_ceiling),
        }
    }
}

impl CoinsSelector for SlidingWindowSelector {
    fn solve(&mut self) {
        if self.core.is_completed() {
            return;
        }
        self.core.reset();

        let n = self.core.len();
        let mut lo = 0usize;
        let mut hi = 0usize;
        let mut total_amount: Amount = 0;
        let mut total_size = 0usize;

        while hi < n {
            if self.core.stop_requested() {
                return;
            }

            total_amount += self.core.amounts[hi];
            total_size += self.core.sizes[hi];
            hi += 1;

            while total_amount > self.core.target_amount_ceiling
                || total_size > self.core.size_ceiling
            {
                total_amount -= self.core.amounts[lo];
                total_size -= self.core.sizes[lo];
                lo += 1;
            }

            if total_amount >= self.core.target_amount {
                self.core.maybe_record_window(lo, hi, total_amount, total_size);
            }
        }

        self.core.mark_completed();
    }

    fn completed(&self) -> bool {
        self.core.is_completed()
    }

    fn optimal_selection(&self) -> &[bool] {
        self.core.optimal_selection()
    }

    fn optimal_total_amount(&self) -> Amount {
        self.core.optimal_total_amount()
    }

    fn optimal_total_size(&self) -> usize {
        self.core.optimal_total_size()
    }

    fn optimal_count(&self) -> u32 {
        self.core.optimal_count()
    }

    fn stop_flag(&self) -> Arc<AtomicBool> {
        self.core.stop_flag()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates(pairs: &[(Amount, usize)]) -> Vec<Candidate> {
        pairs
            .iter()
            .map(|&(amount, size)| Candidate { amount, size })
            .collect()
    }

    fn selected_totals(solver: &SlidingWindowSelector) -> (Amount, usize) {
        // Recompute totals from the mask to cross-check the recorded ones.
        let mut amount = 0;
        let mut size = 0;
        for (i, &selected) in solver.optimal_selection().iter().enumerate() {
            if selected {
                amount += solver.core.amounts[i];
                size += solver.core.sizes[i];
            }
        }
        (amount, size)
    }

    #[test]
    fn empty_input_is_infeasible() {
        let mut solver = SlidingWindowSelector::new(vec![], 10, 20, 100);
        solver.solve();
        assert!(solver.completed());
        assert_eq!(solver.optimal_count(), 0);
    }

    #[test]
    fn single_exact_hit() {
        let mut solver =
            SlidingWindowSelector::new(candidates(&[(10, 1)]), 10, 10, 10);
        solver.solve();
        assert!(solver.completed());
        assert_eq!(solver.optimal_count(), 1);
        assert_eq!(solver.optimal_total_amount(), 10);
    }

    #[test]
    fn prefers_more_smaller_inputs() {
        // Window slides past the big coin to pick the three small ones.
        let mut solver = SlidingWindowSelector::new(
            candidates(&[(50, 1), (5, 1), (5, 1), (5, 1)]),
            15,
            20,
            10,
        );
        solver.solve();
        assert!(solver.completed());
        assert_eq!(solver.optimal_count(), 3);
        assert_eq!(solver.optimal_total_amount(), 15);
    }

    #[test]
    fn size_ceiling_limits_window() {
        let mut solver = SlidingWindowSelector::new(
            candidates(&[(10, 5), (10, 5), (10, 5)]),
            20,
            30,
            10,
        );
        solver.solve();
        assert!(solver.completed());
        assert_eq!(solver.optimal_count(), 2);
        assert!(solver.optimal_total_size() <= 10);
    }

    #[test]
    fn infeasible_when_target_unreachable() {
        let mut solver =
            SlidingWindowSelector::new(candidates(&[(1, 1), (1, 1)]), 10, 20, 100);
        solver.solve();
        assert!(solver.completed());
        assert_eq!(solver.optimal_count(), 0);
        assert!(solver.optimal_selection().iter().all(|&b| !b));
    }

    #[test]
    fn infeasible_when_everything_exceeds_ceiling() {
        let mut solver =
            SlidingWindowSelector::new(candidates(&[(100, 1)]), 10, 20, 100);
        solver.solve();
        assert!(solver.completed());
        assert_eq!(solver.optimal_count(), 0);
    }

    #[test]
    fn recorded_totals_match_mask() {
        let mut solver = SlidingWindowSelector::new(
            candidates(&[(9, 3), (7, 2), (5, 4), (4, 1), (2, 1)]),
            12,
            18,
            8,
        );
        solver.solve();
        assert!(solver.completed());
        assert!(solver.optimal_count() > 0);
        let (amount, size) = selected_totals(&solver);
        assert_eq!(amount, solver.optimal_total_amount());
        assert_eq!(size, solver.optimal_total_size());
        assert!(amount >= 12 && amount <= 18);
        assert!(size <= 8);
    }

    #[test]
    fn solve_idempotent_after_completion() {
        let mut solver =
            SlidingWindowSelector::new(candidates(&[(10, 1), (5, 1)]), 10, 20, 10);
        solver.solve();
        let first = (solver.optimal_count(), solver.optimal_total_amount());
        solver.solve();
        assert_eq!(first, (solver.optimal_count(), solver.optimal_total_amount()));
    }

    #[test]
    fn stop_before_solve_leaves_incomplete() {
        let mut solver =
            SlidingWindowSelector::new(candidates(&[(10, 1), (5, 1)]), 10, 20, 10);
        solver
            .stop_flag()
            .store(true, std::sync::atomic::Ordering::Relaxed);
        solver.solve();
        assert!(!solver.completed());
        assert_eq!(solver.optimal_count(), 0);
    }

    #[test]
    fn reference_fixture_yields_admissible_selection() {
        // 97 candidates: amounts cycle 1..=97, sizes alternate 140/160/180.
        let pairs: Vec<(Amount, usize)> = (1..=97)
            .map(|i| (i as Amount, 140 + (i % 3) * 20))
            .collect();
        let mut solver = SlidingWindowSelector::new(candidates(&pairs), 50, 60, 14_700);
        solver.solve();
        assert!(solver.completed());
        assert!(solver.optimal_count() > 0);
        assert!(solver.optimal_total_amount() >= 50);
        assert!(solver.optimal_total_amount() <= 60);
        assert!(solver.optimal_total_size() <= 14_700);
    }
}
