//! The generation-expression algebra and its evaluator.
//!
//! A `Trials<Case>` is an immutable, composable description of how to produce
//! cases. It is a tree of tagged variants behind an `Arc`, so handles are
//! cheap to clone, sub-expressions are shared by reference, and the same
//! expression value can be evaluated any number of times against different
//! decision sources.
//!
//! Evaluation threads a context through the tree that records every
//! primitive decision taken along with its cost, so one evaluation yields
//! both a case and the `DecisionLog` that reproduces it.

use crate::decision::{distance_cost, weight_cost, Decision, DecisionLog};
use crate::factory::{CaseFactory, FnFactory};
use crate::source::{DecisionSource, SourceError};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Ceiling on the accumulated cost of one evaluation. Once breached, any
/// further decision-consuming node fails the attempt, which the driver
/// reports as starvation. Recursively flat-mapped expressions should consult
/// [`Trials::complexities`] to steer toward terminating alternatives well
/// before hitting this.
pub const COMPLEXITY_WALL: u64 = 100;

/// How many fresh attempts a `filter` makes before giving up on the current
/// generation. A replaying source is deterministic, so replays stop after
/// the first rejection regardless.
pub const FILTER_RETRY_BUDGET: usize = 5;

/// Errors raised while constructing an expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    #[error("a choice or alternation needs at least one alternative")]
    EmptyAlternatives,

    #[error("alternative {index} has zero weight; weights must be at least one")]
    ZeroWeight { index: usize },

    #[error("the weights overflow their total")]
    WeightOverflow,
}

/// Why one generation attempt failed to produce a case. All of these are
/// recoverable at the driver, which counts them as starvation and retries;
/// only recipe reproduction treats them as terminal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("filter rejected every attempt within the retry budget")]
    FilterExhausted,

    #[error("complexity wall breached at accumulated cost {complexity}")]
    ComplexityWall { complexity: u64 },

    #[error(transparent)]
    Replay(#[from] SourceError),
}

/// Evaluation context: the decision source being consumed, the log being
/// built and the running complexity. This is the complexity tracker of the
/// engine; `complexities()` exposes the running total back into the algebra.
pub(crate) struct Evaluation<'a> {
    source: &'a mut dyn DecisionSource,
    log: DecisionLog,
    complexity: u64,
}

impl<'a> Evaluation<'a> {
    fn new(source: &'a mut dyn DecisionSource) -> Self {
        Evaluation {
            source,
            log: DecisionLog::new(),
            complexity: 0,
        }
    }

    fn check_wall(&self) -> Result<(), GenerationError> {
        if self.complexity > COMPLEXITY_WALL {
            Err(GenerationError::ComplexityWall {
                complexity: self.complexity,
            })
        } else {
            Ok(())
        }
    }

    fn pick_index(&mut self, weights: &[u32]) -> Result<usize, GenerationError> {
        self.check_wall()?;
        let index = self.source.pick_index(weights)?;
        let total: u64 = weights.iter().map(|w| *w as u64).sum();
        let cost = weight_cost(weights[index] as u64, total);
        self.log.push(Decision::Index { index, cost });
        self.complexity += cost as u64;
        Ok(index)
    }

    fn pick_value(&mut self, lower: i64, upper: i64, shrunk: i64) -> Result<i64, GenerationError> {
        self.check_wall()?;
        let value = self.source.pick_value(lower, upper, shrunk)?;
        let cost = distance_cost(value, shrunk);
        self.log.push(Decision::Value { value, shrunk, cost });
        self.complexity += cost as u64;
        Ok(value)
    }
}

trait Node<Case>: Send + Sync {
    fn evaluate(&self, eval: &mut Evaluation<'_>) -> Result<Case, GenerationError>;

    /// Contribute this node's structure (never case values) to the shape
    /// digest that binds recipes to an expression. `delay_depth` is the
    /// remaining allowance for expanding delayed sub-expressions.
    fn shape(&self, hasher: &mut Sha256, delay_depth: u32);
}

/// An immutable, composable description of how to produce cases.
pub struct Trials<Case> {
    node: Arc<dyn Node<Case>>,
}

impl<Case> std::fmt::Debug for Trials<Case> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trials").finish_non_exhaustive()
    }
}

impl<Case> Clone for Trials<Case> {
    fn clone(&self) -> Self {
        Trials {
            node: Arc::clone(&self.node),
        }
    }
}

fn validated_weights(weights: &[u32]) -> Result<(), DefinitionError> {
    if weights.is_empty() {
        return Err(DefinitionError::EmptyAlternatives);
    }
    if let Some(index) = weights.iter().position(|weight| *weight == 0) {
        return Err(DefinitionError::ZeroWeight { index });
    }
    let mut total = 0u64;
    for weight in weights {
        total = total
            .checked_add(*weight as u64)
            .ok_or(DefinitionError::WeightOverflow)?;
    }
    Ok(())
}

impl<Case: Clone + Send + Sync + 'static> Trials<Case> {
    /// The expression that always produces `case`, consuming no decisions.
    pub fn only(case: Case) -> Self {
        Trials {
            node: Arc::new(OnlyNode { case }),
        }
    }

    /// Choose between several cases with equal weight.
    pub fn choose(cases: impl IntoIterator<Item = Case>) -> Result<Self, DefinitionError> {
        Self::choose_with_weights(cases.into_iter().map(|case| (1, case)))
    }

    /// Choose between several cases, each with a selection weight of at
    /// least one. Selection probability is weight over the total.
    pub fn choose_with_weights(
        weighted: impl IntoIterator<Item = (u32, Case)>,
    ) -> Result<Self, DefinitionError> {
        let (weights, cases): (Vec<u32>, Vec<Case>) = weighted.into_iter().unzip();
        validated_weights(&weights)?;
        Ok(Trials {
            node: Arc::new(ChooseNode { weights, cases }),
        })
    }
}

impl<Case: 'static> Trials<Case> {
    /// Alternate between several sub-expressions with equal weight.
    pub fn alternate(
        alternatives: impl IntoIterator<Item = Trials<Case>>,
    ) -> Result<Self, DefinitionError> {
        Self::alternate_with_weights(alternatives.into_iter().map(|trials| (1, trials)))
    }

    /// Alternate between several weighted sub-expressions.
    pub fn alternate_with_weights(
        weighted: impl IntoIterator<Item = (u32, Trials<Case>)>,
    ) -> Result<Self, DefinitionError> {
        let (weights, alternatives): (Vec<u32>, Vec<Trials<Case>>) =
            weighted.into_iter().unzip();
        validated_weights(&weights)?;
        Ok(Trials {
            node: Arc::new(AlternateNode {
                weights,
                alternatives,
            }),
        })
    }

    /// Stream cases from a factory over an integer domain. Draws are biased
    /// toward the factory's most-shrunk input.
    pub fn stream(factory: impl CaseFactory<Case> + Send + Sync + 'static) -> Self {
        Trials {
            node: Arc::new(StreamNode {
                factory: Arc::new(factory),
            }),
        }
    }

    /// Stream cases from a pure function over the whole `i64` domain,
    /// shrinking toward zero.
    pub fn stream_fn(factory: impl Fn(i64) -> Case + Send + Sync + 'static) -> Self {
        Self::stream(FnFactory::over_full_domain(factory))
    }

    /// Defer construction of the underlying expression until evaluation.
    /// This is what lets recursively defined expression graphs tie the knot
    /// without recursing at construction time.
    pub fn delay(build: impl Fn() -> Trials<Case> + Send + Sync + 'static) -> Self {
        Trials {
            node: Arc::new(DelayNode {
                build: Box::new(build),
            }),
        }
    }

    /// Transform every produced case. Adds no decisions; a mapped log is the
    /// sub-expression's log unchanged.
    pub fn map<Transformed: 'static>(
        &self,
        transform: impl Fn(Case) -> Transformed + Send + Sync + 'static,
    ) -> Trials<Transformed> {
        Trials {
            node: Arc::new(MapNode {
                inner: self.clone(),
                transform: Box::new(transform),
            }),
        }
    }

    /// Dependent composition: produce a case, then use it to formulate the
    /// expression that produces the final case. The dependent log is
    /// appended after the inner one.
    pub fn flat_map<Transformed: 'static>(
        &self,
        step: impl Fn(Case) -> Trials<Transformed> + Send + Sync + 'static,
    ) -> Trials<Transformed> {
        Trials {
            node: Arc::new(FlatMapNode {
                inner: self.clone(),
                step: Box::new(step),
            }),
        }
    }

    /// Reject cases failing the predicate. Rejection rolls the log back and
    /// retries with fresh decisions up to [`FILTER_RETRY_BUDGET`] times;
    /// exhaustion surfaces as starvation, not as an emitted case.
    pub fn filter(&self, predicate: impl Fn(&Case) -> bool + Send + Sync + 'static) -> Trials<Case> {
        Trials {
            node: Arc::new(FilterNode {
                inner: self.clone(),
                predicate: Box::new(predicate),
            }),
        }
    }

    /// Evaluate against a decision source, yielding the case and the log of
    /// decisions consumed.
    pub(crate) fn evaluate_with(
        &self,
        source: &mut dyn DecisionSource,
    ) -> Result<(Case, DecisionLog), GenerationError> {
        let mut eval = Evaluation::new(source);
        let case = self.node.evaluate(&mut eval)?;
        Ok((case, eval.log))
    }

    /// Structural digest of this expression, independent of case values.
    /// Recipes are bound to it so that decoding against a structurally
    /// different expression fails fast.
    pub fn shape_digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        self.node.shape(&mut hasher, DELAY_SHAPE_DEPTH);
        hasher.finalize().into()
    }
}

impl Trials<u64> {
    /// The running accumulated cost at this point of the evaluation, as a
    /// case. Consumes no decision. Recursive expression graphs flat-map this
    /// to steer toward base cases before the complexity wall cuts them off.
    pub fn complexities() -> Trials<u64> {
        Trials {
            node: Arc::new(ComplexitiesNode),
        }
    }
}

/// How many levels of `delay` the shape walk expands. Delayed structure
/// within the allowance distinguishes recipes; past it the bare tag stands
/// in, so hashing a self-referential expression graph still terminates.
const DELAY_SHAPE_DEPTH: u32 = 4;

// Shape tags, one per node variant.
const SHAPE_ONLY: u8 = 0;
const SHAPE_CHOOSE: u8 = 1;
const SHAPE_ALTERNATE: u8 = 2;
const SHAPE_MAP: u8 = 3;
const SHAPE_FLAT_MAP: u8 = 4;
const SHAPE_FILTER: u8 = 5;
const SHAPE_STREAM: u8 = 6;
const SHAPE_COMPLEXITIES: u8 = 7;
const SHAPE_DELAY: u8 = 8;

fn shape_weights(hasher: &mut Sha256, tag: u8, weights: &[u32]) {
    hasher.update([tag]);
    hasher.update((weights.len() as u32).to_be_bytes());
    for weight in weights {
        hasher.update(weight.to_be_bytes());
    }
}

struct OnlyNode<Case> {
    case: Case,
}

impl<Case: Clone + Send + Sync> Node<Case> for OnlyNode<Case> {
    fn evaluate(&self, _eval: &mut Evaluation<'_>) -> Result<Case, GenerationError> {
        Ok(self.case.clone())
    }

    fn shape(&self, hasher: &mut Sha256, _delay_depth: u32) {
        hasher.update([SHAPE_ONLY]);
    }
}

struct ChooseNode<Case> {
    weights: Vec<u32>,
    cases: Vec<Case>,
}

impl<Case: Clone + Send + Sync> Node<Case> for ChooseNode<Case> {
    fn evaluate(&self, eval: &mut Evaluation<'_>) -> Result<Case, GenerationError> {
        let index = eval.pick_index(&self.weights)?;
        Ok(self.cases[index].clone())
    }

    fn shape(&self, hasher: &mut Sha256, _delay_depth: u32) {
        shape_weights(hasher, SHAPE_CHOOSE, &self.weights);
    }
}

struct AlternateNode<Case> {
    weights: Vec<u32>,
    alternatives: Vec<Trials<Case>>,
}

impl<Case: 'static> Node<Case> for AlternateNode<Case> {
    fn evaluate(&self, eval: &mut Evaluation<'_>) -> Result<Case, GenerationError> {
        let index = eval.pick_index(&self.weights)?;
        self.alternatives[index].node.evaluate(eval)
    }

    fn shape(&self, hasher: &mut Sha256, delay_depth: u32) {
        shape_weights(hasher, SHAPE_ALTERNATE, &self.weights);
        for alternative in &self.alternatives {
            alternative.node.shape(hasher, delay_depth);
        }
    }
}

struct MapNode<Inner, Case> {
    inner: Trials<Inner>,
    transform: Box<dyn Fn(Inner) -> Case + Send + Sync>,
}

impl<Inner: 'static, Case> Node<Case> for MapNode<Inner, Case> {
    fn evaluate(&self, eval: &mut Evaluation<'_>) -> Result<Case, GenerationError> {
        let inner = self.inner.node.evaluate(eval)?;
        Ok((self.transform)(inner))
    }

    fn shape(&self, hasher: &mut Sha256, delay_depth: u32) {
        hasher.update([SHAPE_MAP]);
        self.inner.node.shape(hasher, delay_depth);
    }
}

struct FlatMapNode<Inner, Case> {
    inner: Trials<Inner>,
    step: Box<dyn Fn(Inner) -> Trials<Case> + Send + Sync>,
}

impl<Inner: 'static, Case: 'static> Node<Case> for FlatMapNode<Inner, Case> {
    fn evaluate(&self, eval: &mut Evaluation<'_>) -> Result<Case, GenerationError> {
        let inner = self.inner.node.evaluate(eval)?;
        let dependent = (self.step)(inner);
        dependent.node.evaluate(eval)
    }

    fn shape(&self, hasher: &mut Sha256, delay_depth: u32) {
        // The dependent expression is a function of the inner case, so only
        // the inner structure is statically known.
        hasher.update([SHAPE_FLAT_MAP]);
        self.inner.node.shape(hasher, delay_depth);
    }
}

struct FilterNode<Case> {
    inner: Trials<Case>,
    predicate: Box<dyn Fn(&Case) -> bool + Send + Sync>,
}

impl<Case: 'static> Node<Case> for FilterNode<Case> {
    fn evaluate(&self, eval: &mut Evaluation<'_>) -> Result<Case, GenerationError> {
        for _attempt in 0..FILTER_RETRY_BUDGET {
            let log_mark = eval.log.len();
            let complexity_mark = eval.complexity;
            let case = self.inner.node.evaluate(eval)?;
            if (self.predicate)(&case) {
                return Ok(case);
            }
            eval.log.truncate(log_mark);
            eval.complexity = complexity_mark;
            if eval.source.is_replay() {
                // Deterministic source: a retry would reject identically.
                break;
            }
        }
        Err(GenerationError::FilterExhausted)
    }

    fn shape(&self, hasher: &mut Sha256, delay_depth: u32) {
        hasher.update([SHAPE_FILTER]);
        self.inner.node.shape(hasher, delay_depth);
    }
}

struct StreamNode<Case> {
    factory: Arc<dyn CaseFactory<Case> + Send + Sync>,
}

impl<Case: 'static> Node<Case> for StreamNode<Case> {
    fn evaluate(&self, eval: &mut Evaluation<'_>) -> Result<Case, GenerationError> {
        let value = eval.pick_value(
            self.factory.lower_bound(),
            self.factory.upper_bound(),
            self.factory.most_shrunk(),
        )?;
        Ok(self.factory.apply(value))
    }

    fn shape(&self, hasher: &mut Sha256, _delay_depth: u32) {
        hasher.update([SHAPE_STREAM]);
        hasher.update(self.factory.lower_bound().to_be_bytes());
        hasher.update(self.factory.upper_bound().to_be_bytes());
        hasher.update(self.factory.most_shrunk().to_be_bytes());
    }
}

struct ComplexitiesNode;

impl Node<u64> for ComplexitiesNode {
    fn evaluate(&self, eval: &mut Evaluation<'_>) -> Result<u64, GenerationError> {
        Ok(eval.complexity)
    }

    fn shape(&self, hasher: &mut Sha256, _delay_depth: u32) {
        hasher.update([SHAPE_COMPLEXITIES]);
    }
}

struct DelayNode<Case> {
    build: Box<dyn Fn() -> Trials<Case> + Send + Sync>,
}

impl<Case: 'static> Node<Case> for DelayNode<Case> {
    fn evaluate(&self, eval: &mut Evaluation<'_>) -> Result<Case, GenerationError> {
        (self.build)().node.evaluate(eval)
    }

    fn shape(&self, hasher: &mut Sha256, delay_depth: u32) {
        hasher.update([SHAPE_DELAY]);
        // A self-referential graph would expand forever, so the built
        // expression contributes its structure only within the allowance.
        if let Some(remaining) = delay_depth.checked_sub(1) {
            (self.build)().node.shape(hasher, remaining);
        }
    }
}
