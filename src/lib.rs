//! Test-case generation and shrinking.
//!
//! A [`Trials<Case>`] is an immutable, composable description of how to
//! produce cases of some type: constants, weighted choices, alternations of
//! sub-expressions, streams over integer domains, and dependent composition
//! via `flat_map`. Supplying an expression to a consumer generates cases
//! biased toward simple ones, de-duplicated per call, until a pluggable
//! cases-limit strategy says stop.
//!
//! A failing consumer (a panic) triggers a shrinking search that replays
//! ever-smaller decision logs through the expression until no single
//! reducing move still fails, then reports the local minimum together with a
//! recipe: an opaque string that reproduces the provoking case exactly via
//! [`Trials::reproduce`].
//!
//! ```
//! use trials::{Trials, TrialsError, Verdict};
//!
//! let trials = Trials::choose(["a", "b", "c"]).unwrap();
//! let result = trials.with_limit(3).unwrap().supply_to(|case| {
//!     assert_ne!(case, "c");
//!     Verdict::Pass
//! });
//! let Err(TrialsError::Failing(exception)) = result else {
//!     panic!("the forbidden case is always among three emissions");
//! };
//! assert_eq!(exception.provoking_case, "c");
//! assert_eq!(trials.reproduce(&exception.recipe).unwrap(), "c");
//! ```
//!
//! All generation is deterministic for a fixed seed (default zero), and
//! recipes are bound to the structural shape of the expression that produced
//! them, so replaying one against a different expression fails fast with a
//! typed error.

pub mod decision;
pub mod engine;
pub mod factory;
pub mod recipe;
pub mod shrinking;
pub mod source;
pub mod strategy;
pub mod trials;

pub use decision::{Decision, DecisionLog};
pub use engine::{SupplyDriver, TrialException, TrialsError, Verdict};
pub use factory::{CaseFactory, FnFactory, InvalidDomain};
pub use recipe::RecipeError;
pub use shrinking::{ShrinkOutcome, Shrinker, MAX_SHRINK_ATTEMPTS};
pub use source::{DecisionSource, RandomSource, ReplayMode, ReplaySource, SourceError};
pub use strategy::{CasesLimitStrategy, FixedCasesLimit, TimedCasesLimit, STARVATION_FACTOR};
pub use trials::{
    DefinitionError, GenerationError, Trials, COMPLEXITY_WALL, FILTER_RETRY_BUDGET,
};
