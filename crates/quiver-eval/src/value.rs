//! Runtime values, generic over the probability value type.

use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Zero};

/// The capability set probability and rate arithmetic needs.
///
/// The engine is polymorphic over the numeric kind used for
/// probabilities, rates, and rewards: machine floats for speed, exact
/// rationals for soundness. Tolerance comparison is part of the
/// contract because distribution sums are validated against one.
pub trait ProbValue:
    Clone
    + fmt::Debug
    + fmt::Display
    + PartialEq
    + PartialOrd
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + Zero
    + One
{
    fn from_int(n: i64) -> Self;

    /// Exact conversion of the rational `num / den`; `den` is non-zero.
    fn from_ratio(num: i64, den: i64) -> Self;

    /// Equality up to the type's comparator tolerance.
    fn approx_eq(&self, other: &Self) -> bool;

    /// Whether the value equals one up to tolerance.
    fn approx_one(&self) -> bool {
        self.approx_eq(&Self::one())
    }
}

impl ProbValue for f64 {
    fn from_int(n: i64) -> f64 {
        n as f64
    }

    fn from_ratio(num: i64, den: i64) -> f64 {
        num as f64 / den as f64
    }

    fn approx_eq(&self, other: &f64) -> bool {
        // Relative comparison with an absolute floor, matching the usual
        // model-checker comparator precision for doubles.
        const PRECISION: f64 = 1e-6;
        let diff = (self - other).abs();
        if diff <= PRECISION {
            return true;
        }
        diff <= PRECISION * self.abs().max(other.abs())
    }
}

impl ProbValue for BigRational {
    fn from_int(n: i64) -> BigRational {
        BigRational::from_integer(BigInt::from(n))
    }

    fn from_ratio(num: i64, den: i64) -> BigRational {
        BigRational::new(BigInt::from(num), BigInt::from(den))
    }

    fn approx_eq(&self, other: &BigRational) -> bool {
        self == other
    }
}

/// A runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<V> {
    Bool(bool),
    Int(i64),
    Real(V),
}

impl<V: ProbValue> Value<V> {
    /// Return a human-readable type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Real(_) => "Real",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric view: integers widen to the probability value type.
    pub fn as_real(&self) -> Option<V> {
        match self {
            Value::Int(n) => Some(V::from_int(*n)),
            Value::Real(v) => Some(v.clone()),
            Value::Bool(_) => None,
        }
    }

    /// Whether this is a numeric value (Int or Real).
    pub fn is_numeric(&self) -> bool {
        !matches!(self, Value::Bool(_))
    }
}
