//! The shrinking search.
//!
//! Seeded with a decision log known to produce a failing case, the search
//! greedily explores smaller logs under the complexity ordering until no
//! single reducing move still fails. Moves, in priority order:
//!
//! 1. drop the trailing decision (padding replay supplies most-shrunk
//!    defaults for anything the shorter log no longer covers);
//! 2. lower an index decision to an earlier alternative;
//! 3. move a value decision toward its most-shrunk input by binary search
//!    between the current value and that input, so the search is logarithmic
//!    in the domain size and converges onto the exact failure boundary;
//! 4. sub-logs produced by dependent composition sit later in the flat log,
//!    so moves 2 and 3 scan positions from the end backward, simplifying
//!    inner structure before outer.
//!
//! The first failing, strictly-smaller candidate becomes the new current log
//! and the search restarts from move 1. Every candidate is replayed through
//! the expression; the canonical log is whatever that evaluation actually
//! consumed, which keeps candidates honest when a changed decision reshapes
//! everything downstream of it. The search is bounded by a replay budget so
//! flaky failures freeze it at the best-known failing log instead of looping.

use crate::decision::{Decision, DecisionLog};
use crate::source::{ReplayMode, ReplaySource};
use crate::trials::Trials;
use log::{debug, trace};
use std::collections::HashSet;

/// Hard bound on replays per search. Exceeding it freezes the search at the
/// best-known failing log.
pub const MAX_SHRINK_ATTEMPTS: usize = 1000;

/// The local minimum the search settled on.
pub struct ShrinkOutcome<Case> {
    pub case: Case,
    pub log: DecisionLog,
    pub failure: String,
    /// Replays spent getting there.
    pub attempts: usize,
}

/// Greedy local-search shrinker over one failing decision log.
pub struct Shrinker<'a, Case, Probe> {
    trials: &'a Trials<Case>,
    /// Replays the consumer against a candidate case; `Some(failure)` when
    /// the candidate still fails.
    probe: Probe,
    current_log: DecisionLog,
    current_case: Case,
    current_failure: String,
    seen: HashSet<DecisionLog>,
    attempts: usize,
}

impl<'a, Case, Probe> Shrinker<'a, Case, Probe>
where
    Case: Clone + 'static,
    Probe: FnMut(&Case) -> Option<String>,
{
    pub fn new(
        trials: &'a Trials<Case>,
        probe: Probe,
        failing_log: DecisionLog,
        failing_case: Case,
        failure: String,
    ) -> Self {
        let mut seen = HashSet::new();
        seen.insert(failing_log.clone());
        Shrinker {
            trials,
            probe,
            current_log: failing_log,
            current_case: failing_case,
            current_failure: failure,
            seen,
            attempts: 0,
        }
    }

    /// Run the search to its local minimum (or the attempt bound).
    pub fn shrink(mut self) -> ShrinkOutcome<Case> {
        let initial_key = self.current_log.sort_key();
        loop {
            if self.budget_spent() {
                debug!(
                    "shrink attempt budget of {} spent, freezing at the best-known failing log",
                    MAX_SHRINK_ATTEMPTS
                );
                break;
            }
            if self.drop_trailing() {
                continue;
            }
            if self.lower_indices() {
                continue;
            }
            if self.bisect_values() {
                continue;
            }
            break;
        }
        debug_assert!(self.current_log.sort_key() <= initial_key);
        debug!(
            "shrinking finished after {} replays with complexity {} over {} decisions",
            self.attempts,
            self.current_log.complexity(),
            self.current_log.len()
        );
        ShrinkOutcome {
            case: self.current_case,
            log: self.current_log,
            failure: self.current_failure,
            attempts: self.attempts,
        }
    }

    fn budget_spent(&self) -> bool {
        self.attempts >= MAX_SHRINK_ATTEMPTS
    }

    /// Move 1: drop the trailing decision.
    fn drop_trailing(&mut self) -> bool {
        if self.current_log.is_empty() {
            return false;
        }
        let mut decisions = self.current_log.decisions().to_vec();
        decisions.pop();
        self.consider(decisions)
    }

    /// Move 2: lower an index decision to an earlier alternative, innermost
    /// positions first, simplest replacement first.
    fn lower_indices(&mut self) -> bool {
        for position in (0..self.current_log.len()).rev() {
            let Decision::Index { index, .. } = self.current_log.decisions()[position] else {
                continue;
            };
            for lower in 0..index {
                if self.budget_spent() {
                    return false;
                }
                if self.consider_replacement(position, |decision| match decision {
                    Decision::Index { cost, .. } => Decision::Index { index: lower, cost },
                    other => other,
                }) {
                    return true;
                }
            }
        }
        false
    }

    /// Move 3: binary-search a value decision toward its most-shrunk input.
    fn bisect_values(&mut self) -> bool {
        for position in (0..self.current_log.len()).rev() {
            if self.bisect_value_at(position) {
                return true;
            }
        }
        false
    }

    fn bisect_value_at(&mut self, position: usize) -> bool {
        let Some(&Decision::Value { value, shrunk, .. }) =
            self.current_log.decisions().get(position)
        else {
            return false;
        };
        if value == shrunk {
            return false;
        }

        // Cheap win first: the most-shrunk input itself.
        if self.replace_value(position, shrunk) {
            return true;
        }

        // Invariant: the value at `position` fails, `passing` does not.
        // Narrow the bracket until the two are adjacent.
        let mut passing = shrunk;
        let mut improved = false;
        loop {
            if self.budget_spent() {
                return improved;
            }
            let Some(&Decision::Value {
                value: failing,
                shrunk: still_shrunk,
                ..
            }) = self.current_log.decisions().get(position)
            else {
                // An accepted candidate reshaped the log; the outer loop
                // will rescan from the top.
                return improved;
            };
            if still_shrunk != shrunk || failing.abs_diff(passing) <= 1 {
                return improved;
            }
            let midpoint = (failing as i128 - (failing as i128 - passing as i128) / 2) as i64;
            if self.replace_value(position, midpoint) {
                improved = true;
            } else {
                passing = midpoint;
            }
        }
    }

    fn replace_value(&mut self, position: usize, replacement: i64) -> bool {
        self.consider_replacement(position, |decision| match decision {
            Decision::Value { shrunk, cost, .. } => Decision::Value {
                value: replacement,
                shrunk,
                cost,
            },
            other => other,
        })
    }

    fn consider_replacement(
        &mut self,
        position: usize,
        replace: impl FnOnce(Decision) -> Decision,
    ) -> bool {
        let mut decisions = self.current_log.decisions().to_vec();
        decisions[position] = replace(decisions[position]);
        self.consider(decisions)
    }

    /// Replay a candidate; adopt it when it still fails and is strictly
    /// smaller under the complexity ordering.
    fn consider(&mut self, decisions: Vec<Decision>) -> bool {
        if self.budget_spent() {
            return false;
        }
        let candidate = DecisionLog::from_decisions(decisions);
        if !self.seen.insert(candidate.clone()) {
            return false;
        }

        self.attempts += 1;
        let mut source = ReplaySource::new(candidate.decisions().to_vec(), ReplayMode::Padding);
        let Ok((case, canonical)) = self.trials.evaluate_with(&mut source) else {
            return false;
        };
        // The evaluation may have consumed something other than what the
        // candidate proposed; judge what actually happened.
        if canonical != candidate && !self.seen.insert(canonical.clone()) {
            return false;
        }
        if canonical.sort_key() >= self.current_log.sort_key() {
            return false;
        }

        match (self.probe)(&case) {
            Some(failure) => {
                trace!(
                    "shrunk to complexity {} over {} decisions",
                    canonical.complexity(),
                    canonical.len()
                );
                self.current_log = canonical;
                self.current_case = case;
                self.current_failure = failure;
                true
            }
            None => false,
        }
    }
}
