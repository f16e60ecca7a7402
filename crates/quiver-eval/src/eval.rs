//! Expression evaluator over a variable environment.

use num_traits::Zero;
use quiver_model::{ArrayDecl, BinOp, Expr, UnaryOp};
use thiserror::Error;

use crate::value::{ProbValue, Value};

/// Evaluation error.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("array index out of bounds: index {index}, length {length}")]
    IndexOutOfBounds { index: i64, length: usize },

    #[error("division by zero")]
    DivisionByZero,

    #[error("undefined variable at index {0}")]
    UndefinedVariable(usize),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type EvalResult<T> = Result<T, EvalError>;

fn type_mismatch<T, V: ProbValue>(expected: &'static str, actual: &Value<V>) -> EvalResult<T> {
    Err(EvalError::TypeMismatch {
        expected,
        actual: actual.type_name(),
    })
}

/// An expression evaluator holding one variable environment.
///
/// The environment is a dense table indexed by variable id. The caller
/// decides the table size and what lives in each slot; the generator
/// appends one pseudo-slot per automaton to expose locations to label
/// expressions.
pub struct Evaluator<V> {
    env: Vec<Value<V>>,
    /// Per array: the element replacement variable indices.
    arrays: Vec<Vec<usize>>,
}

impl<V: ProbValue> Evaluator<V> {
    pub fn new(env_size: usize, arrays: &[ArrayDecl]) -> Evaluator<V> {
        Evaluator {
            env: vec![Value::Int(0); env_size],
            arrays: arrays.iter().map(|a| a.elements.clone()).collect(),
        }
    }

    pub fn set(&mut self, variable: usize, value: Value<V>) {
        self.env[variable] = value;
    }

    pub fn set_bool(&mut self, variable: usize, value: bool) {
        self.env[variable] = Value::Bool(value);
    }

    pub fn set_int(&mut self, variable: usize, value: i64) {
        self.env[variable] = Value::Int(value);
    }

    pub fn set_real(&mut self, variable: usize, value: V) {
        self.env[variable] = Value::Real(value);
    }

    pub fn get(&self, variable: usize) -> &Value<V> {
        &self.env[variable]
    }

    /// Evaluate an expression against the current environment.
    pub fn eval(&self, expr: &Expr) -> EvalResult<Value<V>> {
        match expr {
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(n) => Ok(Value::Int(*n)),
            Expr::Real(num, den) => {
                if *den == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                Ok(Value::Real(V::from_ratio(*num, *den)))
            }

            Expr::Var(index) => self
                .env
                .get(*index)
                .cloned()
                .ok_or(EvalError::UndefinedVariable(*index)),

            Expr::ArrayRead { array, index } => {
                let elements = self
                    .arrays
                    .get(array.0)
                    .ok_or_else(|| EvalError::Internal(format!("unknown array {}", array.0)))?;
                let i = self.eval_int(index)?;
                if i < 0 || i as usize >= elements.len() {
                    return Err(EvalError::IndexOutOfBounds {
                        index: i,
                        length: elements.len(),
                    });
                }
                let variable = elements[i as usize];
                self.env
                    .get(variable)
                    .cloned()
                    .ok_or(EvalError::UndefinedVariable(variable))
            }

            Expr::Unary { op, operand } => {
                let v = self.eval(operand)?;
                match (op, v) {
                    (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (UnaryOp::Not, v) => type_mismatch("Bool", &v),
                    (UnaryOp::Neg, Value::Int(n)) => Ok(Value::Int(-n)),
                    (UnaryOp::Neg, Value::Real(v)) => Ok(Value::Real(-v)),
                    (UnaryOp::Neg, v) => type_mismatch("Int or Real", &v),
                }
            }

            Expr::Binary { op, left, right } => self.eval_binary(*op, left, right),

            Expr::Ite {
                cond,
                then_branch,
                else_branch,
            } => {
                if self.eval_bool(cond)? {
                    self.eval(then_branch)
                } else {
                    self.eval(else_branch)
                }
            }
        }
    }

    fn eval_binary(&self, op: BinOp, left: &Expr, right: &Expr) -> EvalResult<Value<V>> {
        // Short-circuiting logical operators first.
        match op {
            BinOp::And => {
                return Ok(Value::Bool(
                    self.eval_bool(left)? && self.eval_bool(right)?,
                ))
            }
            BinOp::Or => {
                return Ok(Value::Bool(
                    self.eval_bool(left)? || self.eval_bool(right)?,
                ))
            }
            BinOp::Implies => {
                return Ok(Value::Bool(
                    !self.eval_bool(left)? || self.eval_bool(right)?,
                ))
            }
            _ => {}
        }

        let lhs = self.eval(left)?;
        let rhs = self.eval(right)?;
        match op {
            BinOp::Eq | BinOp::Ne => {
                let equal = match (&lhs, &rhs) {
                    (Value::Bool(a), Value::Bool(b)) => a == b,
                    (Value::Int(a), Value::Int(b)) => a == b,
                    (a, b) if a.is_numeric() && b.is_numeric() => {
                        self.coerce_real(a)? == self.coerce_real(b)?
                    }
                    (a, b) => {
                        return Err(EvalError::TypeMismatch {
                            expected: a.type_name(),
                            actual: b.type_name(),
                        })
                    }
                };
                Ok(Value::Bool(if op == BinOp::Eq { equal } else { !equal }))
            }

            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let result = match (&lhs, &rhs) {
                    (Value::Int(a), Value::Int(b)) => match op {
                        BinOp::Lt => a < b,
                        BinOp::Le => a <= b,
                        BinOp::Gt => a > b,
                        _ => a >= b,
                    },
                    _ => {
                        let a = self.coerce_real(&lhs)?;
                        let b = self.coerce_real(&rhs)?;
                        match op {
                            BinOp::Lt => a < b,
                            BinOp::Le => a <= b,
                            BinOp::Gt => a > b,
                            _ => a >= b,
                        }
                    }
                };
                Ok(Value::Bool(result))
            }

            BinOp::Add | BinOp::Sub | BinOp::Mul => {
                if let (Value::Int(a), Value::Int(b)) = (&lhs, &rhs) {
                    let n = match op {
                        BinOp::Add => a + b,
                        BinOp::Sub => a - b,
                        _ => a * b,
                    };
                    return Ok(Value::Int(n));
                }
                let a = self.coerce_real(&lhs)?;
                let b = self.coerce_real(&rhs)?;
                let v = match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    _ => a * b,
                };
                Ok(Value::Real(v))
            }

            BinOp::Div => {
                // Division is rational-valued even on integer operands,
                // so probability literals like 1/6 evaluate exactly.
                if let (Value::Int(a), Value::Int(b)) = (&lhs, &rhs) {
                    if *b == 0 {
                        return Err(EvalError::DivisionByZero);
                    }
                    return Ok(Value::Real(V::from_ratio(*a, *b)));
                }
                let a = self.coerce_real(&lhs)?;
                let b = self.coerce_real(&rhs)?;
                if b.is_zero() {
                    return Err(EvalError::DivisionByZero);
                }
                Ok(Value::Real(a / b))
            }

            BinOp::Mod => match (&lhs, &rhs) {
                (Value::Int(_), Value::Int(0)) => Err(EvalError::DivisionByZero),
                (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a % b)),
                (a, b) => {
                    if a.is_numeric() && b.is_numeric() {
                        Err(EvalError::TypeMismatch {
                            expected: "Int",
                            actual: "Real",
                        })
                    } else {
                        type_mismatch("Int", if a.is_numeric() { b } else { a })
                    }
                }
            },

            BinOp::Min | BinOp::Max => {
                if let (Value::Int(a), Value::Int(b)) = (&lhs, &rhs) {
                    let n = if op == BinOp::Min {
                        (*a).min(*b)
                    } else {
                        (*a).max(*b)
                    };
                    return Ok(Value::Int(n));
                }
                let a = self.coerce_real(&lhs)?;
                let b = self.coerce_real(&rhs)?;
                let take_left = if op == BinOp::Min { a <= b } else { a >= b };
                Ok(Value::Real(if take_left { a } else { b }))
            }

            BinOp::And | BinOp::Or | BinOp::Implies => unreachable!("handled above"),
        }
    }

    fn coerce_real(&self, value: &Value<V>) -> EvalResult<V> {
        value.as_real().ok_or(EvalError::TypeMismatch {
            expected: "Int or Real",
            actual: value.type_name(),
        })
    }

    /// Evaluate as a boolean; anything else is a type mismatch.
    pub fn eval_bool(&self, expr: &Expr) -> EvalResult<bool> {
        match self.eval(expr)? {
            Value::Bool(b) => Ok(b),
            v => type_mismatch("Bool", &v),
        }
    }

    /// Evaluate as an integer; reals do not narrow.
    pub fn eval_int(&self, expr: &Expr) -> EvalResult<i64> {
        match self.eval(expr)? {
            Value::Int(n) => Ok(n),
            v => type_mismatch("Int", &v),
        }
    }

    /// Evaluate as the probability value type; integers widen.
    pub fn eval_real(&self, expr: &Expr) -> EvalResult<V> {
        let v = self.eval(expr)?;
        self.coerce_real(&v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_model::{Model, ModelType};

    fn evaluator() -> Evaluator<f64> {
        let mut model = Model::new("m", ModelType::Dtmc);
        model.add_bounded_int("x", 0, 10, 0);
        model.add_bool("b", false);
        model.add_int_array("a", 3, 0, 5, 0);
        let mut ev = Evaluator::new(model.variables.len(), &model.arrays);
        ev.set_int(0, 4);
        ev.set_bool(1, true);
        ev.set_int(2, 7);
        ev.set_int(3, 8);
        ev.set_int(4, 9);
        ev
    }

    #[test]
    fn arithmetic_and_comparison() {
        let ev = evaluator();
        let e = Expr::var(0).add(Expr::int(2)).le(Expr::int(6));
        assert!(ev.eval_bool(&e).unwrap());
        let e = Expr::var(0).mul(Expr::var(0));
        assert_eq!(ev.eval_int(&e).unwrap(), 16);
    }

    #[test]
    fn integer_division_is_rational() {
        let ev = evaluator();
        let e = Expr::int(1).div(Expr::int(6));
        let v = ev.eval_real(&e).unwrap();
        assert!((v - 1.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let ev = evaluator();
        let e = Expr::var(0).div(Expr::int(0));
        assert!(matches!(ev.eval(&e), Err(EvalError::DivisionByZero)));
    }

    #[test]
    fn short_circuit_avoids_rhs_error() {
        let ev = evaluator();
        // rhs would divide by zero if evaluated
        let bad = Expr::int(1).div(Expr::int(0)).gt(Expr::int(0));
        let e = Expr::Bool(false).and(bad);
        assert!(!ev.eval_bool(&e).unwrap());
    }

    #[test]
    fn array_read_resolves_replacement() {
        let ev = evaluator();
        let arr = quiver_model::ArrayRef(0);
        let e = Expr::array_read(arr, Expr::int(1));
        assert_eq!(ev.eval_int(&e).unwrap(), 8);
    }

    #[test]
    fn array_read_out_of_bounds() {
        let ev = evaluator();
        let arr = quiver_model::ArrayRef(0);
        let e = Expr::array_read(arr, Expr::int(3));
        assert!(matches!(
            ev.eval(&e),
            Err(EvalError::IndexOutOfBounds { index: 3, length: 3 })
        ));
    }

    #[test]
    fn non_boolean_guard_is_type_mismatch() {
        let ev = evaluator();
        assert!(matches!(
            ev.eval_bool(&Expr::int(1)),
            Err(EvalError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn ite_selects_branch() {
        let ev = evaluator();
        let e = Expr::ite(Expr::var(1), Expr::int(10), Expr::int(20));
        assert_eq!(ev.eval_int(&e).unwrap(), 10);
    }
}
