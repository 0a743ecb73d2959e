//! Shielded-note selection.
//!
//! Unlike transparent coins, a note adds no size of its own: size grows in
//! whole joinsplits. A joinsplit consumes up to
//! [`JOINSPLIT_INPUT_ARITY`] notes, so a note that fits an already-open
//! joinsplit is free, while one that opens a new joinsplit charges
//! [`JOINSPLIT_SIZE`] bytes. Independently, the recipients' payout amounts
//! each need a joinsplit of their own; those are charged whenever they
//! exceed what the input side already requires.
//!
//! The search walks notes from smallest amount to largest. Because
//! dropping a single note does not necessarily close a joinsplit, an
//! upper-bound violation does not pop one note: it restarts a fresh search
//! that excludes the smallest note of the violating window.

use crate::solver::{Candidate, CoinsSelector, SolverCore};
use harbor_core::amount::Amount;
use harbor_core::constants::{JOINSPLIT_INPUT_ARITY, JOINSPLIT_SIZE};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Selection over shielded notes with joinsplit-quantized size accounting.
///
/// Candidate sizes are ignored; all size comes from joinsplits.
pub struct NotesSelector {
    core: SolverCore,
    /// Payout amounts, one per recipient joinsplit output, in the order the
    /// recipients will be served.
    joinsplit_output_amounts: Vec<Amount>,
}

impl NotesSelector {
    /// Build a solver over `candidates` (notes) with the given bounds and
    /// the recipients' joinsplit output amounts.
    pub fn new(
        candidates: Vec<Candidate>,
        target_amount: Amount,
        target_amount_ceiling: Amount,
        size_ceiling: usize,
        joinsplit_output_amounts: Vec<Amount>,
    ) -> Self {
        Self {
            core: SolverCore::new(candidates, target_amount, target_amount_ceiling, size_ceiling),
            joinsplit_output_amounts,
        }
    }

    /// Joinsplits (and therefore bytes) charged for `count` selected notes,
    /// never less than the mandatory payout joinsplits.
    fn charged_size(&self, count: usize) -> usize {
        let input_joinsplits = count.div_ceil(JOINSPLIT_INPUT_ARITY);
        input_joinsplits.max(self.joinsplit_output_amounts.len()) * JOINSPLIT_SIZE
    }
}

impl CoinsSelector for NotesSelector {
    fn solve(&mut self) {
        if self.core.is_completed() {
            return;
        }
        self.core.reset();

        // The payout joinsplits are charged even for an empty selection; if
        // they alone break the ceiling no window is admissible.
        if self.charged_size(0) > self.core.size_ceiling {
            self.core.mark_completed();
            return;
        }

        let n = self.core.len();
        // Exclusive upper end of the window in the descending array; the
        // window's smallest note sits at `search_start - 1`.
        let mut search_start = n;

        'search: while search_start > 0 {
            let mut total_amount: Amount = 0;
            let mut count = 0usize;
            let mut idx = search_start;

            while idx > 0 {
                if self.core.stop_requested() {
                    return;
                }

                let next = idx - 1;
                let next_amount = total_amount + self.core.amounts[next];
                let next_size = self.charged_size(count + 1);

                if next_amount > self.core.target_amount_ceiling
                    || next_size > self.core.size_ceiling
                {
                    // Removing one note may not free a joinsplit slot:
                    // restart past the smallest note of this window.
                    search_start -= 1;
                    continue 'search;
                }

                total_amount = next_amount;
                count += 1;
                idx = next;

                if total_amount >= self.core.target_amount {
                    self.core.maybe_record_window(
                        idx,
                        search_start,
                        total_amount,
                        self.charged_size(count),
                    );
                }
            }

            // Reached the largest note without a violation.
            break;
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
