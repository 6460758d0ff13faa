//! Decision sources.
//!
//! The evaluator is parametric in where its decisions come from: a fresh
//! random source during ordinary generation, or a recorded log during
//! shrinking and recipe reproduction. Either way the evaluator re-records
//! every decision it takes, so evaluation always yields a canonical log of
//! exactly what was consumed.

use crate::decision::{bit_length, Decision};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

/// Errors surfaced by a replay source when the supplied log does not line up
/// with what the expression asks for.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("replay log exhausted after {consumed} decisions")]
    Exhausted { consumed: usize },

    #[error("decision {position} is of the wrong kind for this point of the expression")]
    KindMismatch { position: usize },

    #[error("decision {position} picks alternative {index} but only {alternatives} exist")]
    IndexOutOfRange {
        position: usize,
        index: usize,
        alternatives: usize,
    },

    #[error("decision {position} value {value} lies outside the factory domain [{lower}, {upper}]")]
    ValueOutOfDomain {
        position: usize,
        value: i64,
        lower: i64,
        upper: i64,
    },
}

/// Supplier of primitive decisions to the evaluator.
pub trait DecisionSource {
    /// Pick one alternative given its weight table. Weights are validated at
    /// expression construction: non-empty, every entry at least one.
    fn pick_index(&mut self, weights: &[u32]) -> Result<usize, SourceError>;

    /// Draw a value from `[lower, upper]`, biased toward `shrunk` when the
    /// source is free to choose.
    fn pick_value(&mut self, lower: i64, upper: i64, shrunk: i64) -> Result<i64, SourceError>;

    /// True when the source replays a fixed log: retrying a rejected filter
    /// attempt cannot produce anything new, so the evaluator bails early.
    fn is_replay(&self) -> bool;
}

/// Fresh randomness from a seedable RNG. Never fails.
pub struct RandomSource {
    rng: ChaCha8Rng,
}

impl RandomSource {
    pub fn new(rng: ChaCha8Rng) -> Self {
        RandomSource { rng }
    }
}

impl DecisionSource for RandomSource {
    fn pick_index(&mut self, weights: &[u32]) -> Result<usize, SourceError> {
        let total: u64 = weights.iter().map(|w| *w as u64).sum();
        let mut roll = self.rng.gen_range(0..total);
        for (index, weight) in weights.iter().enumerate() {
            let weight = *weight as u64;
            if roll < weight {
                return Ok(index);
            }
            roll -= weight;
        }
        unreachable!("roll is bounded by the total weight");
    }

    fn pick_value(&mut self, lower: i64, upper: i64, shrunk: i64) -> Result<i64, SourceError> {
        // Draw a magnitude uniformly, then shift it right by a uniformly
        // chosen bit count. Small magnitudes dominate, so most draws land
        // near the most-shrunk input while the whole domain stays reachable.
        let reach_down = shrunk.abs_diff(lower);
        let reach_up = upper.abs_diff(shrunk);
        let reach = reach_down.max(reach_up);
        if reach == 0 {
            return Ok(shrunk);
        }
        let shift = self.rng.gen_range(0..=bit_length(reach));
        let magnitude = self
            .rng
            .gen_range(0..=reach)
            .checked_shr(shift)
            .unwrap_or(0);
        let go_down = match (reach_down > 0, reach_up > 0) {
            (true, true) => self.rng.gen::<bool>(),
            (true, false) => true,
            (false, _) => false,
        };
        let offset = if go_down {
            -(magnitude.min(reach_down) as i128)
        } else {
            magnitude.min(reach_up) as i128
        };
        Ok((shrunk as i128 + offset) as i64)
    }

    fn is_replay(&self) -> bool {
        false
    }
}

/// What a replaying source does once the recorded log runs out, or stops
/// lining up with what the expression asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    /// Fail: used by recipe reproduction, where any divergence means the
    /// recipe does not belong to this expression.
    Strict,
    /// Fall back to the most-shrunk defaults (alternative zero, the
    /// most-shrunk input): used by the shrinking search, where a truncated
    /// candidate log is deliberately shorter than the original.
    Padding,
}

/// Replays a recorded decision log.
pub struct ReplaySource {
    decisions: Vec<Decision>,
    position: usize,
    mode: ReplayMode,
    /// Set once the log has stopped lining up in padding mode; every
    /// subsequent draw takes the default rather than consuming misaligned
    /// decisions.
    diverged: bool,
}

impl ReplaySource {
    pub fn new(decisions: Vec<Decision>, mode: ReplayMode) -> Self {
        ReplaySource {
            decisions,
            position: 0,
            mode,
            diverged: false,
        }
    }

    /// Decisions the evaluation did not consume. Strict replay requires this
    /// to be zero afterwards; recipes with leftovers are rejected.
    pub fn remaining(&self) -> usize {
        self.decisions.len() - self.position.min(self.decisions.len())
    }

    fn next(&mut self) -> Option<Decision> {
        if self.diverged {
            return None;
        }
        let decision = self.decisions.get(self.position).copied();
        if decision.is_some() {
            self.position += 1;
        }
        decision
    }
}

impl DecisionSource for ReplaySource {
    fn pick_index(&mut self, weights: &[u32]) -> Result<usize, SourceError> {
        let position = self.position;
        match self.next() {
            Some(Decision::Index { index, .. }) if index < weights.len() => Ok(index),
            Some(Decision::Index { index, .. }) => match self.mode {
                ReplayMode::Strict => Err(SourceError::IndexOutOfRange {
                    position,
                    index,
                    alternatives: weights.len(),
                }),
                ReplayMode::Padding => {
                    self.diverged = true;
                    Ok(0)
                }
            },
            Some(Decision::Value { .. }) => match self.mode {
                ReplayMode::Strict => Err(SourceError::KindMismatch { position }),
                ReplayMode::Padding => {
                    self.diverged = true;
                    self.position -= 1;
                    Ok(0)
                }
            },
            None => match self.mode {
                ReplayMode::Strict => Err(SourceError::Exhausted { consumed: position }),
                ReplayMode::Padding => Ok(0),
            },
        }
    }

    fn pick_value(&mut self, lower: i64, upper: i64, shrunk: i64) -> Result<i64, SourceError> {
        let position = self.position;
        match self.next() {
            Some(Decision::Value { value, .. }) if (lower..=upper).contains(&value) => Ok(value),
            Some(Decision::Value { value, .. }) => match self.mode {
                ReplayMode::Strict => Err(SourceError::ValueOutOfDomain {
                    position,
                    value,
                    lower,
                    upper,
                }),
                ReplayMode::Padding => {
                    self.diverged = true;
                    Ok(shrunk)
                }
            },
            Some(Decision::Index { .. }) => match self.mode {
                ReplayMode::Strict => Err(SourceError::KindMismatch { position }),
                ReplayMode::Padding => {
                    self.diverged = true;
                    self.position -= 1;
                    Ok(shrunk)
                }
            },
            None => match self.mode {
                ReplayMode::Strict => Err(SourceError::Exhausted { consumed: position }),
                ReplayMode::Padding => Ok(shrunk),
            },
        }
    }

    fn is_replay(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn random_source(seed: u64) -> RandomSource {
        RandomSource::new(ChaCha8Rng::seed_from_u64(seed))
    }

    #[test]
    fn random_pick_index_respects_the_weight_table() {
        let mut source = random_source(0);
        for _ in 0..200 {
            let index = source.pick_index(&[1, 2, 3]).unwrap();
            assert!(index < 3);
        }
    }

    #[test]
    fn zero_weight_alternatives_are_never_picked() {
        // Construction forbids zero weights upstream, but the sampler itself
        // must also skip anything with no probability mass.
        let mut source = random_source(7);
        for _ in 0..100 {
            assert_ne!(source.pick_index(&[1, 0, 1]).unwrap(), 1);
        }
    }

    #[test]
    fn random_values_stay_in_domain() {
        let mut source = random_source(3);
        for _ in 0..500 {
            let value = source.pick_value(-1000, 1000, 0).unwrap();
            assert!((-1000..=1000).contains(&value));
        }
    }

    #[test]
    fn random_values_cluster_near_the_most_shrunk_input() {
        let mut source = random_source(11);
        let near = (0..1000)
            .filter(|_| source.pick_value(-1000, 1000, 0).unwrap().abs() <= 100)
            .count();
        assert!(near > 500, "only {near} of 1000 draws landed near zero");
    }

    #[test]
    fn degenerate_domain_yields_the_single_value() {
        let mut source = random_source(5);
        assert_eq!(source.pick_value(42, 42, 42).unwrap(), 42);
    }

    #[test]
    fn strict_replay_returns_recorded_decisions() {
        let mut source = ReplaySource::new(
            vec![
                Decision::Index { index: 2, cost: 1 },
                Decision::Value { value: -7, shrunk: 0, cost: 3 },
            ],
            ReplayMode::Strict,
        );
        assert_eq!(source.pick_index(&[1, 1, 1]).unwrap(), 2);
        assert_eq!(source.pick_value(-100, 100, 0).unwrap(), -7);
        assert_eq!(source.remaining(), 0);
    }

    #[test]
    fn strict_replay_fails_on_exhaustion() {
        let mut source = ReplaySource::new(vec![], ReplayMode::Strict);
        assert_eq!(
            source.pick_index(&[1, 1]),
            Err(SourceError::Exhausted { consumed: 0 })
        );
    }

    #[test]
    fn strict_replay_fails_on_kind_mismatch() {
        let mut source =
            ReplaySource::new(vec![Decision::Value { value: 0, shrunk: 0, cost: 0 }], ReplayMode::Strict);
        assert_eq!(
            source.pick_index(&[1, 1]),
            Err(SourceError::KindMismatch { position: 0 })
        );
    }

    #[test]
    fn strict_replay_fails_on_out_of_domain_value() {
        let mut source =
            ReplaySource::new(vec![Decision::Value { value: 500, shrunk: 0, cost: 9 }], ReplayMode::Strict);
        assert!(matches!(
            source.pick_value(0, 10, 0),
            Err(SourceError::ValueOutOfDomain { value: 500, .. })
        ));
    }

    #[test]
    fn padding_replay_defaults_after_exhaustion() {
        let mut source =
            ReplaySource::new(vec![Decision::Index { index: 1, cost: 1 }], ReplayMode::Padding);
        assert_eq!(source.pick_index(&[1, 1]).unwrap(), 1);
        assert_eq!(source.pick_index(&[1, 1]).unwrap(), 0);
        assert_eq!(source.pick_value(-10, 10, 3).unwrap(), 3);
    }

    #[test]
    fn padding_replay_stops_consuming_once_diverged() {
        let mut source = ReplaySource::new(
            vec![
                Decision::Value { value: 5, shrunk: 0, cost: 3 },
                Decision::Index { index: 1, cost: 1 },
            ],
            ReplayMode::Padding,
        );
        // First draw wants an index but the log holds a value: divergence.
        assert_eq!(source.pick_index(&[1, 1]).unwrap(), 0);
        // Everything afterwards takes defaults, misaligned log untouched.
        assert_eq!(source.pick_value(0, 9, 2).unwrap(), 2);
        assert_eq!(source.remaining(), 2);
    }
}
