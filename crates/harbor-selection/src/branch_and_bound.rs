//! Branch & Bound coins selection.
//!
//! Explores the include/exclude decision tree over the descending-amount
//! candidate array and returns an exact optimum. Three prunes keep the
//! exploration far from the 2^n worst case:
//!
//! 1. upper-bound infeasibility: the running amount or size already
//!    exceeds its ceiling;
//! 2. reachability: even taking every remaining candidate cannot reach
//!    the target amount (precomputed forward cumulative sums);
//! 3. bounding: even taking every remaining candidate cannot beat the
//!    incumbent count, nor tie it with a strictly smaller amount.
//!
//! The include branch is explored before the exclude branch. The tree walk
//! uses an explicit stack, so candidate counts in the thousands cannot
//! overflow the native stack. The cancellation flag is sampled at every
//! node entry.

use crate::solver::{Candidate, CoinsSelector, SolverCore};
use harbor_core::amount::Amount;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// One pending action of the explicit tree walk.
enum Step {
    /// Enter the node at `index` with the given running totals.
    Enter {
        index: usize,
        total_size: usize,
        total_amount: Amount,
        count: u32,
    },
    /// Unwind: clear the include mark left at `index`.
    Unmark { index: usize },
}

/// Exact solver; optimal but exponential in the worst case, so callers
/// should run it with a cancellation deadline next to a fast heuristic.
pub struct BranchAndBoundSelector {
    core: SolverCore,
    /// `cumulative_amounts_forward[i]` = sum of `amounts[i..]`.
    cumulative_amounts_forward: Vec<Amount>,
    temp_selection: Vec<bool>,
}

impl BranchAndBoundSelector {
    /// Build a solver over `candidates` with the given bounds.
    pub fn new(
        candidates: Vec<Candidate>,
        target_amount: Amount,
        target_amount_ceiling: Amount,
        size_ceiling: usize,
    ) -> Self {
        let core =
            SolverCore::new(candidates, target_amount, target_amount_ceiling, size_ceiling);
        let n = core.len();
        let mut cumulative: Vec<Amount> = vec![0; n + 1];
        for i in (0..n).rev() {
            cumulative[i] = cumulative[i + 1].saturating_add(core.amounts[i]);
        }
        Self {
            core,
            cumulative_amounts_forward: cumulative,
            temp_selection: vec![false; n],
        }
    }
}

impl CoinsSelector for BranchAndBoundSelector {
    fn solve(&mut self) {
        if self.core.is_completed() {
            return;
        }
        self.core.reset();
        self.temp_selection.iter_mut().for_each(|b| *b = false);

        let n = self.core.len();
        let mut stack = Vec::with_capacity(2 * n + 1);
        stack.push(Step::Enter {
            index: 0,
            total_size: 0,
            total_amount: 0,
            count: 0,
        });

        while let Some(step) = stack.pop() {
            let (index, total_size, total_amount, count) = match step {
                Step::Unmark { index } => {
                    self.temp_selection[index] = false;
                    continue;
                }
                Step::Enter {
                    index,
                    total_size,
                    total_amount,
                    count,
                } => (index, total_size, total_amount, count),
            };

            if self.core.stop_requested() {
                return;
            }

            // Upper-bound infeasibility.
            if total_amount > self.core.target_amount_ceiling
                || total_size > self.core.size_ceiling
            {
                continue;
            }

            // Reachability: the best remaining completion cannot meet the target.
            if total_amount.saturating_add(self.cumulative_amounts_forward[index])
                < self.core.target_amount
            {
                continue;
            }

            // Bounding: not enough candidates left to beat the incumbent, nor
            // to tie it with a strictly smaller amount (amounts only grow
            // along a path, so the running amount is a lower bound).
            let reachable_count = count + (n - index) as u32;
            let best_count = self.core.optimal_count();
            if reachable_count < best_count
                || (best_count > 0
                    && reachable_count == best_count
                    && total_amount >= self.core.optimal_total_amount())
            {
                continue;
            }

            if index == n {
                if total_amount >= self.core.target_amount {
                    self.core.maybe_record_selection(
                        &self.temp_selection,
                        total_amount,
                        total_size,
                        count,
                    );
                }
                continue;
            }

            // Exclude branch, explored after the include branch below.
            stack.push(Step::Enter {
                index: index + 1,
                total_size,
                total_amount,
                count,
            });
            stack.push(Step::Unmark { index });
            stack.push(Step::Enter {
                index: index + 1,
                total_size: total_size + self.core.sizes[index],
                total_amount: total_amount + self.core.amounts[index],
                count: count + 1,
            });
            self.temp_selection[index] = true;
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
