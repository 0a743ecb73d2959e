//! Common contract shared by the coins-selection solvers.
//!
//! A solver is built once per request from a candidate list and three
//! constraints: a target amount (inclusive lower bound), a target-amount
//! ceiling (inclusive upper bound), and a ceiling on the summed input
//! sizes. The objective is to maximize the number of selected candidates,
//! breaking ties by the smaller total amount.
//!
//! Candidates are held in descending amount order; every solver relies on
//! that invariant. The optimal selection is a boolean mask over the sorted
//! array.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::debug;

use harbor_core::amount::Amount;

/// One spendable input offered to a solver: its amount and the serialized
/// size its spend would add to the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    /// Input amount in grains.
    pub amount: Amount,
    /// Serialized size of the input in bytes.
    pub size: usize,
}

/// Input arrays, constraints, cancellation flag, and best-so-far solution
/// shared by the three solver implementations.
pub(crate) struct SolverCore {
    /// Candidate amounts, descending.
    pub(crate) amounts: Vec<Amount>,
    /// Candidate sizes, permuted alongside `amounts`.
    pub(crate) sizes: Vec<usize>,
    /// Inclusive lower bound on the selected total amount.
    pub(crate) target_amount: Amount,
    /// Inclusive upper bound on the selected total amount.
    pub(crate) target_amount_ceiling: Amount,
    /// Upper bound on the summed selected sizes.
    pub(crate) size_ceiling: usize,
    stop: Arc<AtomicBool>,
    completed: bool,
    optimal_selection: Vec<bool>,
    optimal_total_amount: Amount,
    optimal_total_size: usize,
    optimal_count: u32,
}

impl SolverCore {
    /// Sort candidates by descending amount (stable over equal amounts) and
    /// set up empty scratch state.
    pub(crate) fn new(
        mut candidates: Vec<Candidate>,
        target_amount: Amount,
        target_amount_ceiling: Amount,
        size_ceiling: usize,
    ) -> Self {
        candidates.sort_by(|a, b| b.amount.cmp(&a.amount));
        let amounts = candidates.iter().map(|c| c.amount).collect::<Vec<_>>();
        let sizes = candidates.iter().map(|c| c.size).collect::<Vec<_>>();
        let n = amounts.len();
        Self {
            amounts,
            sizes,
            target_amount,
            target_amount_ceiling,
            size_ceiling,
            stop: Arc::new(AtomicBool::new(false)),
            completed: false,
            optimal_selection: vec![false; n],
            optimal_total_amount: 0,
            optimal_total_size: 0,
            optimal_count: 0,
        }
    }

    /// Number of candidates.
    pub(crate) fn len(&self) -> usize {
        self.amounts.len()
    }

    /// Whether cooperative cancellation has been requested.
    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Clear scratch and output state before a (re)run.
    pub(crate) fn reset(&mut self) {
        self.optimal_selection.iter_mut().for_each(|b| *b = false);
        self.optimal_total_amount = 0;
        self.optimal_total_size = 0;
        self.optimal_count = 0;
    }

    /// Whether `(count, amount)` beats the incumbent objective tuple.
    pub(crate) fn improves(&self, count: u32, total_amount: Amount) -> bool {
        count > self.optimal_count
            || (count == self.optimal_count
                && count > 0
                && total_amount < self.optimal_total_amount)
    }

    /// Record the contiguous window `[lo, hi)` as the new best, if better.
    pub(crate) fn maybe_record_window(
        &mut self,
        lo: usize,
        hi: usize,
        total_amount: Amount,
        total_size: usize,
    ) {
        let count = (hi - lo) as u32;
        if !self.improves(count, total_amount) {
            return;
        }
        self.optimal_selection.iter_mut().for_each(|b| *b = false);
        for slot in &mut self.optimal_selection[lo..hi] {
            *slot = true;
        }
        self.optimal_total_amount = total_amount;
        self.optimal_total_size = total_size;
        self.optimal_count = count;
    }

    /// Record an arbitrary selection mask as the new best, if better.
    pub(crate) fn maybe_record_selection(
        &mut self,
        selection: &[bool],
        total_amount: Amount,
        total_size: usize,
        count: u32,
    ) {
        if !self.improves(count, total_amount) {
            return;
        }
        self.optimal_selection.copy_from_slice(selection);
        self.optimal_total_amount = total_amount;
        self.optimal_total_size = total_size;
        self.optimal_count = count;
    }

    pub(crate) fn mark_completed(&mut self) {
        self.completed = true;
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.completed
    }

    pub(crate) fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub(crate) fn optimal_selection(&self) -> &[bool] {
        &self.optimal_selection
    }

    pub(crate) fn optimal_total_amount(&self) -> Amount {
        self.optimal_total_amount
    }

    pub(crate) fn optimal_total_size(&self) -> usize {
        self.optimal_total_size
    }

    pub(crate) fn optimal_count(&self) -> u32 {
        self.optimal_count
    }
}

/// The operations every coins-selection solver exposes.
///
/// `solve` runs to completion on the caller's thread, polling the shared
/// cancellation flag at natural boundaries; when cancelled it returns with
/// `completed() == false` and whatever best solution it had found so far,
/// which must not be trusted as optimal. An infeasible instance completes
/// with `optimal_count() == 0` and an all-false mask.
pub trait CoinsSelector: Send {
    /// Run the solving routine synchronously. Idempotent once completed.
    fn solve(&mut self);

    /// Whether the last `solve` ran to completion (not cancelled).
    fn completed(&self) -> bool;

    /// Best selection mask over the descending-sorted candidate array.
    fn optimal_selection(&self) -> &[bool];

    /// Total amount of the best selection.
    fn optimal_total_amount(&self) -> Amount;

    /// Total size of the best selection.
    fn optimal_total_size(&self) -> usize;

    /// Number of selected candidates in the best selection.
    fn optimal_count(&self) -> u32;

    /// Shared flag that requests cooperative cancellation when set.
    fn stop_flag(&self) -> Arc<AtomicBool>;
}

/// A solver running on a background worker thread.
///
/// Obtained from [`start_async`]; consuming the task via [`stop`] or
/// [`join`] returns the solver for result inspection.
///
/// [`stop`]: SolverTask::stop
/// [`join`]: SolverTask::join
pub struct SolverTask<S> {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<S>,
}

impl<S: CoinsSelector> SolverTask<S> {
    /// Request cancellation and wait for the worker to return the solver.
    ///
    /// Safe to call at any point; if the worker already finished this only
    /// joins it.
    pub fn stop(self) -> S {
        self.stop.store(true, Ordering::Relaxed);
        self.handle.join().expect("selection worker panicked")
    }

    /// Wait for the worker to run to completion without cancelling.
    pub fn join(self) -> S {
        self.handle.join().expect("selection worker panicked")
    }
}

/// Spawn a worker thread running `solve` on the given solver.
///
/// Consuming the solver enforces the one-start-per-instance rule; the
/// returned task is the only way to get it back.
pub fn start_async<S: CoinsSelector + 'static>(mut solver: S) -> SolverTask<S> {
    let stop = solver.stop_flag();
    debug!("starting selection worker");
    let handle = std::thread::spawn(move || {
        solver.solve();
        solver
    });
    SolverTask { stop, handle }
}

/// The better of two solved instances by the `(count, -amount)` objective.
///
/// Position does not matter; on a full tie the left argument wins.
pub fn best_of<'a>(
    left: &'a dyn CoinsSelector,
    right: &'a dyn CoinsSelector,
) -> &'a dyn CoinsSelector {
    let left_key = (left.optimal_count(), -left.optimal_total_amount());
    let right_key = (right.optimal_count(), -right.optimal_total_amount());
    if left_key >= right_key {
        left
    } else {
        right
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core(amounts: &[Amount]) -> SolverCore {
        let candidates = amounts
            .iter()
            .map(|&amount| Candidate { amount, size: 1 })
            .collect();
        SolverCore::new(candidates, 0, Amount::MAX, usize::MAX)
    }

    #[test]
    fn candidates_sorted_descending() {
        let core = core(&[5, 9, 1, 9, 3]);
        assert_eq!(core.amounts, vec![9, 9, 5, 3, 1]);
    }

    #[test]
    fn sort_is_stable_over_equal_amounts() {
        let candidates = vec![
            Candidate { amount: 7, size: 10 },
            Candidate { amount: 9, size: 20 },
            Candidate { amount: 7, size: 30 },
        ];
        let core = SolverCore::new(candidates, 0, Amount::MAX, usize::MAX);
        assert_eq!(core.amounts, vec![9, 7, 7]);
        // The two 7s keep their original relative order.
        assert_eq!(core.sizes, vec![20, 10, 30]);
    }

    #[test]
    fn improves_prefers_count_then_lower_amount() {
        let mut core = core(&[10, 5, 3]);
        core.maybe_record_window(0, 2, 15, 2);
        assert!(core.improves(3, 18));
        assert!(core.improves(2, 14));
        assert!(!core.improves(2, 15));
        assert!(!core.improves(2, 16));
        assert!(!core.improves(1, 1));
    }

    #[test]
    fn record_window_sets_mask() {
        let mut core = core(&[10, 5, 3]);
        core.maybe_record_window(1, 3, 8, 2);
        assert_eq!(core.optimal_selection(), &[false, true, true]);
        assert_eq!(core.optimal_total_amount(), 8);
        assert_eq!(core.optimal_count(), 2);
    }

    #[test]
    fn record_selection_overwrites_previous_mask() {
        let mut core = core(&[10, 5, 3]);
        core.maybe_record_window(0, 1, 10, 1);
        core.maybe_record_selection(&[true, false, true], 13, 2, 2);
        assert_eq!(core.optimal_selection(), &[true, false, true]);
        assert_eq!(core.optimal_total_amount(), 13);
    }

    #[test]
    fn reset_clears_outputs() {
        let mut core = core(&[10, 5]);
        core.maybe_record_window(0, 2, 15, 2);
        core.reset();
        assert_eq!(core.optimal_count(), 0);
        assert_eq!(core.optimal_selection(), &[false, false]);
    }
}
