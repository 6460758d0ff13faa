//! Decisions and decision logs.
//!
//! A `Decision` is one primitive, replayable choice made while generating a
//! case: either the pick of one weighted alternative, or a raw value drawn
//! from a case factory's domain. The ordered sequence of decisions taken
//! while producing one case is a `DecisionLog`; replaying a log through the
//! expression that produced it must yield the identical case, which is what
//! makes shrinking and recipe reproduction meaningful.
//!
//! Logs are compared by a complexity ordering: total accumulated cost first,
//! then lexicographic comparison of per-decision keys, with shorter logs
//! preferred on ties. All cost arithmetic is integer-only so the ordering is
//! identical across platforms.

use std::cmp::Ordering;

/// One primitive choice recorded during generation.
///
/// The cost is assigned by the evaluator when the decision is taken and
/// contributes to the complexity of the enclosing log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    /// An index into a finite weighted alternative set.
    Index { index: usize, cost: u32 },
    /// A raw value drawn from a case factory's domain. Carries the domain's
    /// most-shrunk input so the shrinking search knows which way is simpler.
    Value { value: i64, shrunk: i64, cost: u32 },
}

impl Decision {
    pub fn cost(&self) -> u32 {
        match self {
            Decision::Index { cost, .. } | Decision::Value { cost, .. } => *cost,
        }
    }

    /// Key used for the lexicographic leg of the complexity ordering.
    ///
    /// Indices compare directly; values are mapped through a zigzag walk
    /// outward from the most-shrunk input (shrunk, shrunk - 1, shrunk + 1,
    /// shrunk - 2, ...) so that values nearer it compare smaller regardless
    /// of direction.
    fn sort_component(&self) -> u64 {
        match self {
            Decision::Index { index, .. } => *index as u64,
            Decision::Value { value, shrunk, .. } => {
                let distance = value.abs_diff(*shrunk);
                if *value < *shrunk {
                    distance.saturating_mul(2) - 1
                } else {
                    distance.saturating_mul(2)
                }
            }
        }
    }
}

/// Number of bits needed to represent `value`; zero for zero.
///
/// Used as the cost metric for factory draws: the cost of a value is the bit
/// length of its distance from the factory's most-shrunk input, so halving
/// the distance strictly reduces the cost.
pub fn bit_length(value: u64) -> u32 {
    64 - value.leading_zeros()
}

/// Cost of picking an alternative of weight `weight` out of `total`.
///
/// One unit plus the information content of the pick, floor(log2(total /
/// weight)), computed in integer arithmetic. The floor of one unit per pick
/// is what lets the complexity wall bound recursive expansion even through
/// overwhelmingly probable alternatives.
pub fn weight_cost(weight: u64, total: u64) -> u32 {
    debug_assert!(weight >= 1 && weight <= total);
    1 + (total / weight).ilog2()
}

/// Cost of drawing `value` from a domain whose most-shrunk input is `shrunk`.
pub fn distance_cost(value: i64, shrunk: i64) -> u32 {
    bit_length(value.abs_diff(shrunk))
}

/// Ordered record of the decisions taken while generating one case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DecisionLog {
    decisions: Vec<Decision>,
}

impl DecisionLog {
    pub fn new() -> Self {
        DecisionLog { decisions: Vec::new() }
    }

    pub fn from_decisions(decisions: Vec<Decision>) -> Self {
        DecisionLog { decisions }
    }

    pub fn push(&mut self, decision: Decision) {
        self.decisions.push(decision);
    }

    /// Discard every decision from `len` onward. Used to roll back the
    /// decisions consumed by a rejected filter attempt.
    pub fn truncate(&mut self, len: usize) {
        self.decisions.truncate(len);
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    pub fn decisions(&self) -> &[Decision] {
        &self.decisions
    }

    /// Total accumulated cost of the log, saturating at `u64::MAX`.
    pub fn complexity(&self) -> u64 {
        self.decisions
            .iter()
            .fold(0u64, |total, decision| total.saturating_add(decision.cost() as u64))
    }

    /// The complexity ordering key: total cost, then per-decision keys, then
    /// length (shorter preferred).
    pub fn sort_key(&self) -> (u64, Vec<u64>, usize) {
        (
            self.complexity(),
            self.decisions.iter().map(Decision::sort_component).collect(),
            self.decisions.len(),
        )
    }
}

impl PartialOrd for DecisionLog {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DecisionLog {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}
