//! The supply driver.
//!
//! This is where an expression meets a consumer: the driver primes a
//! strategy, a seeded random source and a per-call seen-set, then loops
//! generating cases and handing fresh ones to the consumer until the
//! strategy declares the call over. A consumer failure is a panic; the
//! driver catches it, hands the failing log to the shrinking search, and
//! surfaces the local minimum as a `TrialException` carrying a recipe that
//! reproduces it exactly.

use crate::decision::DecisionLog;
use crate::recipe::{self, RecipeError};
use crate::shrinking::Shrinker;
use crate::source::{RandomSource, ReplayMode, ReplaySource};
use crate::strategy::{CasesLimitStrategy, FixedCasesLimit};
use crate::trials::{GenerationError, Trials};
use log::debug;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// What a consumer says about a case that did not make it fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    /// An inline guard clause rejected the case as inapplicable. Counted
    /// against the strategy's rejection tally, never as a failure.
    Reject,
}

/// A shrunk consumer failure: the simplest case found to provoke it, a
/// recipe that reproduces that case exactly, and the panic payload text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("trial failed on {provoking_case:?}: {failure}; reproduce with recipe {recipe}")]
pub struct TrialException<Case: fmt::Debug> {
    pub provoking_case: Case,
    pub recipe: String,
    pub failure: String,
}

/// Terminal outcomes of a `supply_to` call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrialsError<Case: fmt::Debug> {
    #[error("the cases limit must be at least one")]
    InvalidCasesLimit,

    #[error(transparent)]
    Failing(#[from] TrialException<Case>),
}

/// Supply syntax bound to one expression: holds the strategy recipe and the
/// RNG seed, both fixed before `supply_to` runs. One driver can supply any
/// number of calls; each call gets a fresh strategy, seen-set and source, so
/// repeated calls are identical.
pub struct SupplyDriver<Case> {
    trials: Trials<Case>,
    strategy_factory: Box<dyn Fn() -> Box<dyn CasesLimitStrategy>>,
    seed: u64,
}

impl<Case: Clone + Eq + Hash + fmt::Debug + 'static> Trials<Case> {
    /// Supply syntax stopping after `limit` emitted cases (or starvation of
    /// the case space). A limit of zero is meaningless and rejected.
    pub fn with_limit(&self, limit: usize) -> Result<SupplyDriver<Case>, TrialsError<Case>> {
        if limit == 0 {
            return Err(TrialsError::InvalidCasesLimit);
        }
        Ok(self.with_strategy(move || Box::new(FixedCasesLimit::new(limit)) as Box<dyn CasesLimitStrategy>))
    }

    /// Supply syntax with a custom stopping policy. The factory is invoked
    /// once per `supply_to` call, so strategy state never leaks between
    /// calls.
    pub fn with_strategy(
        &self,
        factory: impl Fn() -> Box<dyn CasesLimitStrategy> + 'static,
    ) -> SupplyDriver<Case> {
        SupplyDriver {
            trials: self.clone(),
            strategy_factory: Box::new(factory),
            seed: 0,
        }
    }
}

impl<Case: 'static> Trials<Case> {
    /// Re-derive the one case a recipe describes, by strict replay against
    /// this expression. Any divergence between recipe and expression is a
    /// typed error; a recipe never silently yields a different case.
    pub fn reproduce(&self, recipe: &str) -> Result<Case, RecipeError> {
        let log = recipe::decode(recipe, &self.shape_digest())?;
        let mut source = ReplaySource::new(log.decisions().to_vec(), ReplayMode::Strict);
        let (case, _) = self.evaluate_with(&mut source).map_err(|error| match error {
            GenerationError::Replay(replay) => RecipeError::ReplayFailed(replay),
            starved => RecipeError::ReplayStarved(starved.to_string()),
        })?;
        let left_over = source.remaining();
        if left_over > 0 {
            return Err(RecipeError::ExcessDecisions { left_over });
        }
        Ok(case)
    }
}

impl<Case: Clone + Eq + Hash + fmt::Debug + 'static> SupplyDriver<Case> {
    /// Fix the RNG seed for this driver. The default seed is zero, so runs
    /// are deterministic unless a caller opts into varying them.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Generate cases and feed them to `consumer` until the strategy says
    /// stop. A panicking consumer ends the call: the failure is shrunk to a
    /// local minimum and returned as [`TrialsError::Failing`].
    pub fn supply_to(
        &mut self,
        mut consumer: impl FnMut(Case) -> Verdict,
    ) -> Result<(), TrialsError<Case>> {
        let mut strategy = (self.strategy_factory)();
        let mut source = RandomSource::new(ChaCha8Rng::seed_from_u64(self.seed));
        let mut seen = HashSet::new();

        while strategy.more_to_do() {
            let (case, log) = match self.trials.evaluate_with(&mut source) {
                Ok(generated) => generated,
                Err(starved) => {
                    debug!("generation attempt starved: {starved}");
                    strategy.note_starvation();
                    continue;
                }
            };
            if !seen.insert(case.clone()) {
                strategy.note_starvation();
                continue;
            }
            strategy.note_emission_of_case();
            match catch_unwind(AssertUnwindSafe(|| consumer(case.clone()))) {
                Ok(Verdict::Pass) => {}
                Ok(Verdict::Reject) => strategy.note_rejection_of_case(),
                Err(payload) => {
                    let failure = describe_panic(payload.as_ref());
                    debug!("consumer failed ({failure}), entering the shrinking search");
                    return Err(TrialsError::Failing(
                        self.shrink_failure(&mut consumer, log, case, failure),
                    ));
                }
            }
        }
        Ok(())
    }

    fn shrink_failure(
        &self,
        consumer: &mut impl FnMut(Case) -> Verdict,
        failing_log: DecisionLog,
        failing_case: Case,
        failure: String,
    ) -> TrialException<Case> {
        let probe = |candidate: &Case| {
            match catch_unwind(AssertUnwindSafe(|| consumer(candidate.clone()))) {
                Err(payload) => Some(describe_panic(payload.as_ref())),
                Ok(_) => None,
            }
        };
        let outcome = Shrinker::new(&self.trials, probe, failing_log, failing_case, failure).shrink();
        TrialException {
            recipe: recipe::encode(&outcome.log, &self.trials.shape_digest()),
            provoking_case: outcome.case,
            failure: outcome.failure,
        }
    }
}

fn describe_panic(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "consumer panicked with a non-textual payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Decision;
    use crate::factory::FnFactory;
    use crate::strategy::TimedCasesLimit;
    use std::time::Duration;

    /// Tests that provoke consumer panics install a quiet hook so the
    /// expected unwinds do not spray backtraces over the test output.
    fn quietly<T>(body: impl FnOnce() -> T) -> T {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(|_| {}));
        let result = body();
        std::panic::set_hook(previous);
        result
    }

    #[test]
    fn passing_run_emits_distinct_cases_up_to_the_limit() {
        let trials = Trials::choose(["a", "b", "c"]).unwrap();
        let mut emitted = Vec::new();
        trials
            .with_limit(3)
            .unwrap()
            .supply_to(|case| {
                emitted.push(case);
                Verdict::Pass
            })
            .unwrap();
        assert_eq!(emitted.len(), 3);
        let distinct: HashSet<_> = emitted.iter().collect();
        assert_eq!(distinct.len(), emitted.len());
    }

    #[test]
    fn a_zero_cases_limit_is_rejected() {
        let trials = Trials::only(1u8);
        assert!(matches!(
            trials.with_limit(0),
            Err(TrialsError::InvalidCasesLimit)
        ));
    }

    #[test]
    fn runs_are_deterministic_for_a_fixed_seed() {
        let trials = Trials::longs();
        let mut driver = trials.with_limit(20).unwrap().with_seed(42);
        let mut first = Vec::new();
        driver
            .supply_to(|case| {
                first.push(case);
                Verdict::Pass
            })
            .unwrap();
        let mut second = Vec::new();
        driver
            .supply_to(|case| {
                second.push(case);
                Verdict::Pass
            })
            .unwrap();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn rejected_cases_do_not_fail_the_run() {
        let trials = Trials::longs();
        let mut rejections = 0;
        trials
            .with_limit(10)
            .unwrap()
            .supply_to(|_| {
                rejections += 1;
                Verdict::Reject
            })
            .unwrap();
        assert_eq!(rejections, 10);
    }

    #[test_log::test]
    fn an_unsatisfiable_filter_starves_into_graceful_termination() {
        let trials = Trials::longs().filter(|_| false);
        let mut calls = 0;
        trials
            .with_limit(5)
            .unwrap()
            .supply_to(|_| {
                calls += 1;
                Verdict::Pass
            })
            .unwrap();
        assert_eq!(calls, 0, "consumer saw a case no filter should let through");
    }

    #[test]
    fn an_exhausted_case_space_starves_into_graceful_termination() {
        // Two distinct cases can never satisfy a limit of five; the
        // de-duplicated duplicates count as starvation until the strategy
        // gives up.
        let trials = Trials::booleans();
        let mut emitted = Vec::new();
        trials
            .with_limit(5)
            .unwrap()
            .supply_to(|case| {
                emitted.push(case);
                Verdict::Pass
            })
            .unwrap();
        emitted.sort();
        assert_eq!(emitted, vec![false, true]);
    }

    #[test]
    fn a_custom_strategy_governs_the_run() {
        let trials = Trials::longs();
        let mut calls = 0;
        trials
            .with_strategy(|| Box::new(TimedCasesLimit::new(Duration::from_millis(0))))
            .supply_to(|_| {
                calls += 1;
                Verdict::Pass
            })
            .unwrap();
        assert_eq!(calls, 0);
    }

    #[test_log::test]
    fn a_failing_case_is_shrunk_and_reproducible_from_its_recipe() {
        let trials = Trials::choose(["a", "b", "c"])
            .unwrap()
            .map(|s: &str| s.to_uppercase());
        let error = quietly(|| {
            trials.with_limit(3).unwrap().supply_to(|case| {
                if case == "C" {
                    panic!("forbidden case");
                }
                Verdict::Pass
            })
        })
        .unwrap_err();
        let TrialsError::Failing(exception) = error else {
            panic!("expected a failing run");
        };
        assert_eq!(exception.provoking_case, "C");
        assert_eq!(exception.failure, "forbidden case");
        assert_eq!(trials.reproduce(&exception.recipe).unwrap(), "C");
    }

    #[test]
    fn the_provoking_case_sits_on_the_failure_boundary() {
        let trials = Trials::stream(FnFactory::new(|value| value, -1000, 1000, 0).unwrap());
        let error = quietly(|| {
            trials.with_limit(500).unwrap().supply_to(|value| {
                assert!(value >= -5, "value {value} fell below the floor");
                Verdict::Pass
            })
        })
        .unwrap_err();
        let TrialsError::Failing(exception) = error else {
            panic!("expected a failing run");
        };
        // The minimal value violating `value >= -5` is its outer neighbour.
        assert_eq!(exception.provoking_case, -6);
        assert_eq!(trials.reproduce(&exception.recipe).unwrap(), -6);
    }

    #[test]
    fn a_recipe_from_another_expression_is_rejected() {
        let abc = Trials::choose(["a", "b", "c"]).unwrap();
        let pair = Trials::choose(["a", "b"]).unwrap();
        let error = quietly(|| {
            abc.with_limit(3).unwrap().supply_to(|case| {
                if case == "c" {
                    panic!("boom");
                }
                Verdict::Pass
            })
        })
        .unwrap_err();
        let TrialsError::Failing(exception) = error else {
            panic!("expected a failing run");
        };
        assert_eq!(
            pair.reproduce(&exception.recipe).unwrap_err(),
            RecipeError::ShapeMismatch
        );
    }

    #[test]
    fn a_recipe_is_rejected_across_structurally_different_delayed_expressions() {
        // The delayed structure must reach the shape digest; were it hashed
        // as a bare tag, this recipe would silently replay into "x".
        let abc = Trials::delay(|| Trials::choose(["a", "b", "c"]).unwrap());
        let xy = Trials::delay(|| Trials::choose(["x", "y"]).unwrap());
        let recipe = recipe::encode(
            &DecisionLog::from_decisions(vec![Decision::Index { index: 0, cost: 2 }]),
            &abc.shape_digest(),
        );
        assert_eq!(abc.reproduce(&recipe).unwrap(), "a");
        assert_eq!(
            xy.reproduce(&recipe).unwrap_err(),
            RecipeError::ShapeMismatch
        );
    }

    #[test]
    fn a_recipe_with_leftover_decisions_is_rejected() {
        let trials = Trials::only("fixed");
        let padded = recipe::encode(
            &DecisionLog::from_decisions(vec![Decision::Index { index: 0, cost: 1 }]),
            &trials.shape_digest(),
        );
        assert_eq!(
            trials.reproduce(&padded).unwrap_err(),
            RecipeError::ExcessDecisions { left_over: 1 }
        );
    }

    #[test]
    fn a_recipe_starving_on_replay_is_rejected() {
        let trials = Trials::longs().filter(|value| *value > 0);
        let starving = recipe::encode(
            &DecisionLog::from_decisions(vec![Decision::Value {
                value: -3,
                shrunk: 0,
                cost: 2,
            }]),
            &trials.shape_digest(),
        );
        assert!(matches!(
            trials.reproduce(&starving).unwrap_err(),
            RecipeError::ReplayStarved(_)
        ));
    }
}
