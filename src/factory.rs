//! Case factories.
//!
//! A case factory wraps a pure injection from a declared integer domain onto
//! cases, together with the input that denotes the maximally shrunk case.
//! Factories back the streaming leaf of the expression algebra: draws are
//! biased toward the most-shrunk input, and the shrinking search moves
//! recorded draws toward it.
//!
//! The engine tolerates impure or non-injective factories — they degrade
//! shrink quality but never crash generation.

use crate::trials::Trials;

/// A pure injection from a bounded `i64` domain onto cases.
///
/// The same input must always yield the same case; distinct inputs may
/// collapse onto equivalent cases. Inputs nearer `most_shrunk` are expected
/// to yield "smaller" cases in whatever sense suits the case type.
pub trait CaseFactory<Case> {
    fn apply(&self, input: i64) -> Case;

    fn lower_bound(&self) -> i64;

    fn upper_bound(&self) -> i64;

    /// The input denoting the maximally shrunk case. Must lie within the
    /// declared bounds.
    fn most_shrunk(&self) -> i64;
}

/// Error raised when a factory's bounds do not bracket its most-shrunk input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("factory domain must satisfy lower {lower} <= shrunk {shrunk} <= upper {upper}")]
pub struct InvalidDomain {
    pub lower: i64,
    pub upper: i64,
    pub shrunk: i64,
}

/// Adapts a closure plus explicit domain bounds as a [`CaseFactory`].
pub struct FnFactory<F> {
    function: F,
    lower: i64,
    upper: i64,
    shrunk: i64,
}

impl<F> std::fmt::Debug for FnFactory<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnFactory")
            .field("lower", &self.lower)
            .field("upper", &self.upper)
            .field("shrunk", &self.shrunk)
            .finish_non_exhaustive()
    }
}

impl<F> FnFactory<F> {
    /// A factory over `[lower, upper]` shrinking toward `shrunk`.
    pub fn new(function: F, lower: i64, upper: i64, shrunk: i64) -> Result<Self, InvalidDomain> {
        if lower <= shrunk && shrunk <= upper {
            Ok(FnFactory {
                function,
                lower,
                upper,
                shrunk,
            })
        } else {
            Err(InvalidDomain {
                lower,
                upper,
                shrunk,
            })
        }
    }

    /// A factory over the whole `i64` domain shrinking toward zero.
    pub fn over_full_domain(function: F) -> Self {
        FnFactory {
            function,
            lower: i64::MIN,
            upper: i64::MAX,
            shrunk: 0,
        }
    }
}

impl<Case, F: Fn(i64) -> Case> CaseFactory<Case> for FnFactory<F> {
    fn apply(&self, input: i64) -> Case {
        (self.function)(input)
    }

    fn lower_bound(&self) -> i64 {
        self.lower
    }

    fn upper_bound(&self) -> i64 {
        self.upper
    }

    fn most_shrunk(&self) -> i64 {
        self.shrunk
    }
}

// Canned trials over primitive types, all thin factory or choice wrappers.

impl Trials<bool> {
    pub fn booleans() -> Trials<bool> {
        Trials::choose([false, true]).unwrap_or_else(|_| unreachable!("two alternatives"))
    }
}

impl Trials<i64> {
    pub fn longs() -> Trials<i64> {
        Trials::stream_fn(|value| value)
    }
}

impl Trials<i32> {
    pub fn integers() -> Trials<i32> {
        Trials::stream(
            FnFactory::new(
                |input| input as i32,
                i32::MIN as i64,
                i32::MAX as i64,
                0,
            )
            .unwrap_or_else(|_| unreachable!("zero lies within the i32 domain")),
        )
    }
}

impl Trials<u8> {
    pub fn bytes() -> Trials<u8> {
        Trials::stream(
            FnFactory::new(|input| input as u8, 0, u8::MAX as i64, 0)
                .unwrap_or_else(|_| unreachable!("zero lies within the byte domain")),
        )
    }
}

impl Trials<char> {
    /// Characters drawn from the Basic Multilingual Plane, skipping the
    /// surrogate gap, shrinking toward `'\0'`.
    pub fn characters() -> Trials<char> {
        Trials::stream(
            FnFactory::new(
                |input| {
                    let code = input as u32;
                    char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER)
                },
                0,
                0xD7FF,
                0,
            )
            .unwrap_or_else(|_| unreachable!("zero lies within the BMP domain")),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_rejects_a_shrunk_input_outside_the_bounds() {
        let error = FnFactory::new(|input: i64| input, 0, 10, 11).unwrap_err();
        assert_eq!(
            error,
            InvalidDomain {
                lower: 0,
                upper: 10,
                shrunk: 11
            }
        );
    }

    #[test]
    fn full_domain_factory_shrinks_toward_zero() {
        let factory = FnFactory::over_full_domain(|input| input);
        assert_eq!(factory.lower_bound(), i64::MIN);
        assert_eq!(factory.upper_bound(), i64::MAX);
        assert_eq!(factory.most_shrunk(), 0);
        assert_eq!(factory.apply(17), 17);
    }

    #[test]
    fn byte_factory_covers_its_domain() {
        let trials = Trials::bytes();
        let digest = trials.shape_digest();
        assert_eq!(digest, Trials::bytes().shape_digest());
    }

    #[test]
    fn character_factory_avoids_the_surrogate_gap() {
        let factory = FnFactory::new(
            |input| char::from_u32(input as u32).unwrap_or(char::REPLACEMENT_CHARACTER),
            0,
            0xD7FF,
            0,
        )
        .unwrap();
        for input in [0, 0x41, 0xD7FF] {
            let character = factory.apply(input);
            assert_ne!(character, char::REPLACEMENT_CHARACTER, "input {input}");
        }
    }
}
