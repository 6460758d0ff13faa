//! Cases-limit strategies.
//!
//! A strategy is the pluggable stopping rule consulted by the supply driver
//! before each generation attempt. One strategy instance belongs to exactly
//! one `supply_to` call: it is created fresh, mutated only through the four
//! notification operations, and once `more_to_do` has answered false it is
//! terminal — the driver performs no further interaction beyond repeating
//! that query.

use log::debug;
use std::time::{Duration, Instant};

/// Stopping rule for one `supply_to` call.
pub trait CasesLimitStrategy {
    /// Whether the driver should request another case. Once false, always
    /// false.
    fn more_to_do(&mut self) -> bool;

    /// A guard clause inside the consumer body rejected an emitted case.
    /// Never called for `filter`-expression rejections.
    fn note_rejection_of_case(&mut self);

    /// A case that had not been seen before in this call was handed to the
    /// consumer.
    fn note_emission_of_case(&mut self);

    /// A generation attempt failed to produce a usable fresh case: a
    /// duplicate, a filter that exhausted its retries, or a complexity-wall
    /// breach.
    fn note_starvation(&mut self);
}

/// Consecutive starvations tolerated per unit of target before the case
/// space is declared exhausted.
pub const STARVATION_FACTOR: usize = 10;

/// The default policy: stop once `target` cases have been emitted, or once
/// consecutive starvation exceeds [`STARVATION_FACTOR`] times the target,
/// whichever happens first. Deterministic given the same notification
/// sequence.
#[derive(Debug)]
pub struct FixedCasesLimit {
    target: usize,
    emitted: usize,
    rejected: usize,
    consecutive_starvations: usize,
    exhausted: bool,
}

impl FixedCasesLimit {
    pub fn new(target: usize) -> Self {
        FixedCasesLimit {
            target,
            emitted: 0,
            rejected: 0,
            consecutive_starvations: 0,
            exhausted: false,
        }
    }

    pub fn emitted(&self) -> usize {
        self.emitted
    }

    pub fn rejected(&self) -> usize {
        self.rejected
    }
}

impl CasesLimitStrategy for FixedCasesLimit {
    fn more_to_do(&mut self) -> bool {
        if self.exhausted {
            return false;
        }
        if self.emitted >= self.target {
            self.exhausted = true;
        } else if self.consecutive_starvations > STARVATION_FACTOR * self.target {
            debug!(
                "case space exhausted after {} consecutive starvations with {} of {} emitted",
                self.consecutive_starvations, self.emitted, self.target
            );
            self.exhausted = true;
        }
        !self.exhausted
    }

    fn note_rejection_of_case(&mut self) {
        self.rejected += 1;
    }

    fn note_emission_of_case(&mut self) {
        self.emitted += 1;
        self.consecutive_starvations = 0;
    }

    fn note_starvation(&mut self) {
        self.consecutive_starvations += 1;
    }
}

/// Time-budget policy: keep going until the deadline passes, regardless of
/// emission and starvation counts.
#[derive(Debug)]
pub struct TimedCasesLimit {
    deadline: Instant,
    exhausted: bool,
}

impl TimedCasesLimit {
    pub fn new(budget: Duration) -> Self {
        TimedCasesLimit {
            deadline: Instant::now() + budget,
            exhausted: false,
        }
    }
}

impl CasesLimitStrategy for TimedCasesLimit {
    fn more_to_do(&mut self) -> bool {
        if !self.exhausted && Instant::now() >= self.deadline {
            self.exhausted = true;
        }
        !self.exhausted
    }

    fn note_rejection_of_case(&mut self) {}

    fn note_emission_of_case(&mut self) {}

    fn note_starvation(&mut self) {}
}
